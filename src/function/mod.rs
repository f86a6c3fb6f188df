//! Function spaces, fields and the discretization handle derived from them.
//!
//! Mesh construction and finite-element spaces live outside this crate. A [`FunctionSpace`]
//! only records what the solver layer needs: the number of degrees of freedom and which of them
//! sit on each marked boundary. A [`Function`] is a shared, mutable field over such a space; the
//! caller owns it and problems/solvers hold handles to it.

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::VError;

/// Boundary marker id.
pub type Marker = usize;

static NEXT_SPACE_ID: AtomicUsize = AtomicUsize::new(0);
static NEXT_FUNCTION_ID: AtomicUsize = AtomicUsize::new(0);

struct SpaceData {
    id: usize,
    dim: usize,
    boundaries: BTreeMap<Marker, Vec<usize>>,
}

/// Degrees of freedom plus marked boundary subsets.
#[derive(Clone)]
pub struct FunctionSpace {
    inner: Rc<SpaceData>,
}

impl FunctionSpace {
    /// Create a space with `dim` degrees of freedom and no marked boundaries.
    pub fn new(dim: usize) -> Self {
        Self::from_checked(dim, BTreeMap::new())
    }

    /// Create a space with the given boundary markers.
    ///
    /// Fails with [`VError::DimensionMismatch`] if a marker references a dof outside `0..dim`.
    pub fn with_boundaries(
        dim: usize,
        boundaries: BTreeMap<Marker, Vec<usize>>,
    ) -> Result<Self, VError> {
        for nodes in boundaries.values() {
            if let Some(&bad) = nodes.iter().find(|&&n| n >= dim) {
                return Err(VError::DimensionMismatch { expected: dim, found: bad + 1 });
            }
        }
        Ok(Self::from_checked(dim, boundaries))
    }

    fn from_checked(dim: usize, boundaries: BTreeMap<Marker, Vec<usize>>) -> Self {
        let boundaries = boundaries
            .into_iter()
            .map(|(m, mut nodes)| {
                nodes.sort_unstable();
                nodes.dedup();
                (m, nodes)
            })
            .collect();
        Self {
            inner: Rc::new(SpaceData {
                id: NEXT_SPACE_ID.fetch_add(1, Ordering::Relaxed),
                dim,
                boundaries,
            }),
        }
    }

    /// One-dimensional interval with `n` nodes; marker 1 is the left end, marker 2 the right.
    pub fn interval(n: usize) -> Self {
        let mut b = BTreeMap::new();
        if n > 0 {
            b.insert(1, vec![0]);
            b.insert(2, vec![n - 1]);
        }
        Self::from_checked(n, b)
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn dim(&self) -> usize {
        self.inner.dim
    }

    /// Nodes carrying `marker`, or an empty slice for an unknown marker.
    pub fn boundary_nodes(&self, marker: Marker) -> &[usize] {
        self.inner.boundaries.get(&marker).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn markers(&self) -> impl Iterator<Item = Marker> + '_ {
        self.inner.boundaries.keys().copied()
    }

    pub fn ptr_eq(&self, other: &FunctionSpace) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Build the discretization handle for this space.
    pub fn discretization(&self) -> Discretization {
        let mut boundary: Vec<usize> = self.inner.boundaries.values().flatten().copied().collect();
        boundary.sort_unstable();
        boundary.dedup();
        log::debug!("building discretization for space {} ({} dofs)", self.id(), self.dim());
        Discretization { space_id: self.id(), ndofs: self.dim(), boundary_nodes: boundary }
    }
}

impl fmt::Debug for FunctionSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpace")
            .field("id", &self.inner.id)
            .field("dim", &self.inner.dim)
            .field("markers", &self.inner.boundaries.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Layout of the discrete system a solver works on.
#[derive(Debug, Clone, PartialEq)]
pub struct Discretization {
    space_id: usize,
    ndofs: usize,
    boundary_nodes: Vec<usize>,
}

impl Discretization {
    pub fn space_id(&self) -> usize {
        self.space_id
    }

    pub fn ndofs(&self) -> usize {
        self.ndofs
    }

    /// Union of all marked boundary nodes, sorted.
    pub fn boundary_nodes(&self) -> &[usize] {
        &self.boundary_nodes
    }

    /// Fresh zero vector with the layout of this discretization.
    pub fn layout_vec(&self) -> Vec<f64> {
        vec![0.0; self.ndofs]
    }
}

struct FunctionData {
    id: usize,
    name: String,
    space: FunctionSpace,
    values: RefCell<Vec<f64>>,
}

/// A field over a [`FunctionSpace`]; clones share storage.
#[derive(Clone)]
pub struct Function {
    inner: Rc<FunctionData>,
}

impl Function {
    /// Zero-initialised field.
    pub fn new(space: &FunctionSpace) -> Self {
        Self::build(space, None)
    }

    pub fn named(space: &FunctionSpace, name: impl Into<String>) -> Self {
        Self::build(space, Some(name.into()))
    }

    fn build(space: &FunctionSpace, name: Option<String>) -> Self {
        let id = NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Rc::new(FunctionData {
                id,
                name: name.unwrap_or_else(|| format!("f_{id}")),
                space: space.clone(),
                values: RefCell::new(vec![0.0; space.dim()]),
            }),
        }
    }

    /// Field with every dof set to `value`.
    pub fn constant(space: &FunctionSpace, value: f64) -> Self {
        let f = Self::new(space);
        f.inner.values.borrow_mut().fill(value);
        f
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn function_space(&self) -> &FunctionSpace {
        &self.inner.space
    }

    pub fn len(&self) -> usize {
        self.inner.space.dim()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the current values.
    pub fn values(&self) -> Ref<'_, Vec<f64>> {
        self.inner.values.borrow()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.inner.values.borrow().clone()
    }

    pub fn get(&self, i: usize) -> f64 {
        self.inner.values.borrow()[i]
    }

    pub fn set(&self, i: usize, value: f64) {
        self.inner.values.borrow_mut()[i] = value;
    }

    /// Overwrite all values; the length must match the space.
    pub fn assign(&self, values: &[f64]) -> Result<(), VError> {
        let mut dat = self.inner.values.borrow_mut();
        if values.len() != dat.len() {
            return Err(VError::DimensionMismatch { expected: dat.len(), found: values.len() });
        }
        dat.copy_from_slice(values);
        Ok(())
    }

    /// Set every dof from a closure of its index.
    pub fn interpolate(&self, f: impl Fn(usize) -> f64) {
        for (i, v) in self.inner.values.borrow_mut().iter_mut().enumerate() {
            *v = f(i);
        }
    }

    /// Run `f` with mutable access to the values.
    pub fn with_values_mut<R>(&self, f: impl FnOnce(&mut [f64]) -> R) -> R {
        f(&mut self.inner.values.borrow_mut())
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("dim", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_outside_space_are_rejected() {
        let mut b = BTreeMap::new();
        b.insert(1, vec![0, 7]);
        assert!(matches!(
            FunctionSpace::with_boundaries(4, b),
            Err(VError::DimensionMismatch { expected: 4, found: 8 })
        ));
    }

    #[test]
    fn clones_share_storage() {
        let v = FunctionSpace::interval(3);
        let u = Function::new(&v);
        let alias = u.clone();
        alias.set(1, 2.5);
        assert_eq!(u.to_vec(), vec![0.0, 2.5, 0.0]);
        assert!(u.ptr_eq(&alias));
        assert!(u.assign(&[1.0]).is_err());
    }

    #[test]
    fn discretization_collects_boundary_nodes() {
        let v = FunctionSpace::interval(5);
        let dm = v.discretization();
        assert_eq!(dm.ndofs(), 5);
        assert_eq!(dm.boundary_nodes(), &[0, 4]);
        assert_eq!(dm.layout_vec(), vec![0.0; 5]);
    }
}
