//! Boundary conditions.
//!
//! Two kinds exist. A [`DirichletBC`] prescribes values on a boundary subset; it is
//! style-agnostic. An [`EquationBC`] imposes a boundary equation, written either as `F == 0` or
//! `a == L`, by replacing the residual and Jacobian rows on its subset. An equation condition may
//! carry its own Dirichlet conditions, which [`BoundaryCondition::dirichlet_bcs`] flattens.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::VError;
use crate::form::{EquationStyle, Form, action, derivative};
use crate::function::{Function, FunctionSpace, Marker};

/// Where a boundary condition applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubDomain {
    Marker(Marker),
    Markers(Vec<Marker>),
    /// Every marked boundary of the space.
    OnBoundary,
}

impl SubDomain {
    pub fn nodes(&self, space: &FunctionSpace) -> Vec<usize> {
        let mut nodes: Vec<usize> = match self {
            SubDomain::Marker(m) => space.boundary_nodes(*m).to_vec(),
            SubDomain::Markers(ms) => ms.iter().flat_map(|m| space.boundary_nodes(*m).iter().copied()).collect(),
            SubDomain::OnBoundary => space.discretization().boundary_nodes().to_vec(),
        };
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }
}

impl From<Marker> for SubDomain {
    fn from(m: Marker) -> Self {
        SubDomain::Marker(m)
    }
}

impl From<Vec<Marker>> for SubDomain {
    fn from(ms: Vec<Marker>) -> Self {
        SubDomain::Markers(ms)
    }
}

/// Prescribed boundary value.
#[derive(Clone)]
pub enum BcValue {
    Constant(f64),
    /// Values are read from the field at the boundary nodes.
    Function(Function),
    /// Evaluated per node every time the condition is applied.
    Expression(Rc<dyn Fn(usize) -> f64>),
}

impl BcValue {
    pub fn expression(f: impl Fn(usize) -> f64 + 'static) -> Self {
        BcValue::Expression(Rc::new(f))
    }

    pub fn at(&self, node: usize) -> f64 {
        match self {
            BcValue::Constant(c) => *c,
            BcValue::Function(f) => f.get(node),
            BcValue::Expression(e) => e(node),
        }
    }
}

impl fmt::Debug for BcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BcValue::Constant(c) => write!(f, "Constant({c})"),
            BcValue::Function(func) => write!(f, "Function({})", func.name()),
            BcValue::Expression(_) => write!(f, "Expression"),
        }
    }
}

impl From<f64> for BcValue {
    fn from(c: f64) -> Self {
        BcValue::Constant(c)
    }
}

impl From<Function> for BcValue {
    fn from(f: Function) -> Self {
        BcValue::Function(f)
    }
}

impl From<&Function> for BcValue {
    fn from(f: &Function) -> Self {
        BcValue::Function(f.clone())
    }
}

struct DirichletData {
    space: FunctionSpace,
    sub_domain: SubDomain,
    nodes: Vec<usize>,
    value: RefCell<BcValue>,
}

/// Strong (Dirichlet) condition `u = g` on a boundary subset. Clones share the value.
#[derive(Clone)]
pub struct DirichletBC {
    inner: Rc<DirichletData>,
}

impl DirichletBC {
    pub fn new(space: &FunctionSpace, value: impl Into<BcValue>, sub_domain: impl Into<SubDomain>) -> Self {
        let sub_domain = sub_domain.into();
        let nodes = sub_domain.nodes(space);
        Self {
            inner: Rc::new(DirichletData {
                space: space.clone(),
                sub_domain,
                nodes,
                value: RefCell::new(value.into()),
            }),
        }
    }

    pub fn function_space(&self) -> &FunctionSpace {
        &self.inner.space
    }

    pub fn sub_domain(&self) -> &SubDomain {
        &self.inner.sub_domain
    }

    /// Constrained dofs, sorted.
    pub fn nodes(&self) -> &[usize] {
        &self.inner.nodes
    }

    /// Replace the prescribed value; takes effect at the next application.
    pub fn set_value(&self, value: impl Into<BcValue>) {
        *self.inner.value.borrow_mut() = value.into();
    }

    /// Current boundary value at `node`.
    pub fn value_at(&self, node: usize) -> f64 {
        self.inner.value.borrow().at(node)
    }

    /// `(node, value)` pairs at the current value.
    pub fn values(&self) -> Vec<(usize, f64)> {
        let value = self.inner.value.borrow();
        self.inner.nodes.iter().map(|&n| (n, value.at(n))).collect()
    }

    /// Write the boundary values into `u`.
    pub fn apply(&self, u: &Function) -> Result<(), VError> {
        if u.len() != self.inner.space.dim() {
            return Err(VError::DimensionMismatch { expected: self.inner.space.dim(), found: u.len() });
        }
        let values = self.values();
        u.with_values_mut(|dat| {
            for (n, g) in values {
                dat[n] = g;
            }
        });
        Ok(())
    }
}

impl fmt::Debug for DirichletBC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirichletBC")
            .field("sub_domain", &self.inner.sub_domain)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

struct EquationData {
    style: EquationStyle,
    residual: Form,
    jacobian: Form,
    nodes: Vec<usize>,
    bcs: Vec<BoundaryCondition>,
}

/// Boundary equation imposed on the rows of a boundary subset.
#[derive(Clone)]
pub struct EquationBC {
    inner: Rc<EquationData>,
}

impl EquationBC {
    /// `F == 0` on `sub_domain`; the Jacobian is derived from `F`.
    pub fn residual(f: Form, u: &Function, sub_domain: impl Into<SubDomain>) -> Self {
        let jacobian = derivative(&f, u);
        Self::build(EquationStyle::Residual, f, jacobian, u, sub_domain.into())
    }

    /// `a == L` on `sub_domain`; `None` for `L` means a homogeneous right-hand side.
    pub fn linear(a: Form, l: Option<Form>, u: &Function, sub_domain: impl Into<SubDomain>) -> Self {
        let residual = match l {
            Some(l) => action(&a, u) - l,
            None => action(&a, u),
        };
        Self::build(EquationStyle::Linear, residual, a, u, sub_domain.into())
    }

    fn build(style: EquationStyle, residual: Form, jacobian: Form, u: &Function, sub_domain: SubDomain) -> Self {
        let nodes = sub_domain.nodes(u.function_space());
        Self { inner: Rc::new(EquationData { style, residual, jacobian, nodes, bcs: Vec::new() }) }
    }

    /// Attach boundary conditions belonging to this equation (e.g. its end points).
    pub fn with_bcs(self, bcs: impl IntoIterator<Item = BoundaryCondition>) -> Self {
        let d = &self.inner;
        let mut all = d.bcs.clone();
        all.extend(bcs);
        Self {
            inner: Rc::new(EquationData {
                style: d.style,
                residual: d.residual.clone(),
                jacobian: d.jacobian.clone(),
                nodes: d.nodes.clone(),
                bcs: all,
            }),
        }
    }

    pub fn style(&self) -> EquationStyle {
        self.inner.style
    }

    pub fn residual_form(&self) -> &Form {
        &self.inner.residual
    }

    pub fn jacobian_form(&self) -> &Form {
        &self.inner.jacobian
    }

    /// Rows replaced by this equation.
    pub fn nodes(&self) -> &[usize] {
        &self.inner.nodes
    }

    pub fn bcs(&self) -> &[BoundaryCondition] {
        &self.inner.bcs
    }
}

impl fmt::Debug for EquationBC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EquationBC")
            .field("style", &self.inner.style)
            .field("nodes", &self.inner.nodes)
            .field("bcs", &self.inner.bcs)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum BoundaryCondition {
    Dirichlet(DirichletBC),
    Equation(EquationBC),
}

impl BoundaryCondition {
    /// Declared style, or `None` for Dirichlet conditions.
    pub fn style(&self) -> Option<EquationStyle> {
        match self {
            BoundaryCondition::Dirichlet(_) => None,
            BoundaryCondition::Equation(e) => Some(e.style()),
        }
    }

    /// Dirichlet conditions reachable from this one, depth first, in insertion order.
    pub fn dirichlet_bcs(&self) -> DirichletBcs<'_> {
        DirichletBcs::new(std::slice::from_ref(self))
    }
}

impl From<DirichletBC> for BoundaryCondition {
    fn from(bc: DirichletBC) -> Self {
        BoundaryCondition::Dirichlet(bc)
    }
}

impl From<EquationBC> for BoundaryCondition {
    fn from(bc: EquationBC) -> Self {
        BoundaryCondition::Equation(bc)
    }
}

/// Lazy depth-first walk yielding only Dirichlet conditions.
pub struct DirichletBcs<'a> {
    stack: Vec<&'a BoundaryCondition>,
}

impl<'a> DirichletBcs<'a> {
    pub fn new(bcs: &'a [BoundaryCondition]) -> Self {
        Self { stack: bcs.iter().rev().collect() }
    }
}

impl<'a> Iterator for DirichletBcs<'a> {
    type Item = &'a DirichletBC;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(bc) = self.stack.pop() {
            match bc {
                BoundaryCondition::Dirichlet(d) => return Some(d),
                BoundaryCondition::Equation(e) => self.stack.extend(e.bcs().iter().rev()),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::LinearKernel;

    #[test]
    fn apply_writes_current_value() {
        let v = FunctionSpace::interval(4);
        let u = Function::constant(&v, 5.0);
        let bc = DirichletBC::new(&v, 1.0, 1);
        bc.apply(&u).unwrap();
        assert_eq!(u.to_vec(), vec![1.0, 5.0, 5.0, 5.0]);
        bc.set_value(BcValue::expression(|n| n as f64 * 10.0));
        DirichletBC::new(&v, 0.0, 2).apply(&u).unwrap();
        let shared = bc.clone();
        shared.apply(&u).unwrap();
        assert_eq!(u.to_vec(), vec![0.0, 5.0, 5.0, 0.0]);
    }

    #[test]
    fn on_boundary_collects_all_markers() {
        let v = FunctionSpace::interval(5);
        let bc = DirichletBC::new(&v, 0.0, SubDomain::OnBoundary);
        assert_eq!(bc.nodes(), &[0, 4]);
        let none = DirichletBC::new(&v, 0.0, 9);
        assert!(none.nodes().is_empty());
    }

    #[test]
    fn dirichlet_walk_flattens_in_order() {
        let v = FunctionSpace::interval(4);
        let u = Function::new(&v);
        let left = DirichletBC::new(&v, 1.0, 1);
        let right = DirichletBC::new(&v, 2.0, 2);
        let g = Form::linear(LinearKernel::new("g", &v, || vec![0.0; 4]));
        let eq = EquationBC::residual(g, &u, 2).with_bcs([right.clone().into()]);
        let bcs: Vec<BoundaryCondition> = vec![eq.into(), left.clone().into()];
        let walk = || DirichletBcs::new(&bcs).map(|d| d.value_at(0)).collect::<Vec<_>>();
        assert_eq!(walk(), vec![2.0, 1.0]);
        // restartable
        assert_eq!(walk(), vec![2.0, 1.0]);
        assert_eq!(bcs[1].dirichlet_bcs().count(), 1);
    }
}
