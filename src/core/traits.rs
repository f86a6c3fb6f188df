//! Slice-level vector-space operations used by the Krylov solve and the null-space code.

/// Operator applied to a slice: `y ← A x`.
pub trait MatVec<T> {
    fn matvec(&self, x: &[T], y: &mut [T]);
}

/// Euclidean inner product over slices.
///
/// `()` is the stock implementation; it reduces with Rayon when the `rayon` feature is on.
pub trait InnerProduct<T> {
    fn dot(&self, x: &[T], y: &[T]) -> T;

    /// `‖x‖₂`
    fn norm(&self, x: &[T]) -> T;
}
