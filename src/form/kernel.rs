//! Leaf kernels of the form language.
//!
//! Kernels are opaque evaluation closures standing in for generated assembly code. They read
//! whatever fields they captured; during a solve the unknown field holds the current iterate.

use std::fmt;
use std::rc::Rc;

use faer::Mat;

use crate::function::{Function, FunctionSpace};

type VectorFn = Rc<dyn Fn() -> Vec<f64>>;
type MatrixFn = Rc<dyn Fn() -> Mat<f64>>;

/// Arity-1 kernel: evaluates to a vector over its test space.
pub struct LinearKernel {
    pub(crate) name: String,
    pub(crate) space: FunctionSpace,
    pub(crate) eval: VectorFn,
    pub(crate) derivative: Option<(Function, MatrixFn)>,
}

impl LinearKernel {
    pub fn new(name: impl Into<String>, space: &FunctionSpace, eval: impl Fn() -> Vec<f64> + 'static) -> Self {
        Self { name: name.into(), space: space.clone(), eval: Rc::new(eval), derivative: None }
    }

    /// Attach the exact derivative with respect to `wrt`, used instead of finite differences.
    pub fn with_derivative(mut self, wrt: &Function, jac: impl Fn() -> Mat<f64> + 'static) -> Self {
        self.derivative = Some((wrt.clone(), Rc::new(jac)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dim(&self) -> usize {
        self.space.dim()
    }

    pub fn evaluate(&self) -> Vec<f64> {
        (self.eval)()
    }

    pub(crate) fn derivative_for(&self, wrt: &Function) -> Option<MatrixFn> {
        self.derivative
            .as_ref()
            .filter(|(f, _)| f.ptr_eq(wrt))
            .map(|(_, jac)| jac.clone())
    }
}

impl fmt::Debug for LinearKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinearKernel({}, dim={})", self.name, self.dim())
    }
}

/// Values of a bilinear kernel.
#[derive(Clone)]
pub enum BilinearData {
    /// Does not depend on any field.
    Constant(Rc<Mat<f64>>),
    /// Re-evaluated on every assembly.
    Dynamic(MatrixFn),
}

/// Arity-2 kernel: evaluates to a `rows × cols` matrix (test × trial).
pub struct BilinearKernel {
    pub(crate) name: String,
    pub(crate) rows: usize,
    pub(crate) cols: usize,
    pub(crate) data: BilinearData,
}

impl BilinearKernel {
    pub fn constant(name: impl Into<String>, mat: Mat<f64>) -> Self {
        Self { name: name.into(), rows: mat.nrows(), cols: mat.ncols(), data: BilinearData::Constant(Rc::new(mat)) }
    }

    pub fn dynamic(
        name: impl Into<String>,
        test: &FunctionSpace,
        trial: &FunctionSpace,
        eval: impl Fn() -> Mat<f64> + 'static,
    ) -> Self {
        Self { name: name.into(), rows: test.dim(), cols: trial.dim(), data: BilinearData::Dynamic(Rc::new(eval)) }
    }

    pub(crate) fn from_fn(name: String, rows: usize, cols: usize, eval: MatrixFn) -> Self {
        Self { name, rows, cols, data: BilinearData::Dynamic(eval) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.data, BilinearData::Constant(_))
    }

    pub fn evaluate(&self) -> Mat<f64> {
        match &self.data {
            BilinearData::Constant(m) => m.as_ref().clone(),
            BilinearData::Dynamic(f) => f(),
        }
    }
}

impl fmt::Debug for BilinearKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BilinearKernel({}, {}x{}, constant={})", self.name, self.rows, self.cols, self.is_constant())
    }
}

/// Arity-0 kernel.
pub struct FunctionalKernel {
    pub(crate) name: String,
    pub(crate) eval: Rc<dyn Fn() -> f64>,
}

impl FunctionalKernel {
    pub fn new(name: impl Into<String>, eval: impl Fn() -> f64 + 'static) -> Self {
        Self { name: name.into(), eval: Rc::new(eval) }
    }

    pub fn evaluate(&self) -> f64 {
        (self.eval)()
    }
}

impl fmt::Debug for FunctionalKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionalKernel({})", self.name)
    }
}
