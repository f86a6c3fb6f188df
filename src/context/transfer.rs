//! Grid-transfer operators for two-level preconditioning.

/// Moves vectors between the fine discretization and one coarser level.
pub trait TransferManager {
    /// Number of fine degrees of freedom the operators act on.
    fn fine_size(&self) -> usize;

    /// Number of coarse degrees of freedom.
    fn coarse_size(&self) -> usize;

    /// Coarse → fine interpolation.
    fn prolong(&self, coarse: &[f64], fine: &mut [f64]);

    /// Fine → coarse residual transfer.
    fn restrict(&self, fine: &[f64], coarse: &mut [f64]);

    /// Fine → coarse state transfer.
    fn inject(&self, fine: &[f64], coarse: &mut [f64]) {
        self.restrict(fine, coarse);
    }
}

/// Piecewise-linear transfer on a uniform 1D grid of `2m - 1` fine / `m` coarse nodes.
///
/// Restriction is the scaled transpose of prolongation (full weighting).
#[derive(Debug, Clone, Copy)]
pub struct LinearIntervalTransfer {
    coarse: usize,
}

impl LinearIntervalTransfer {
    pub fn new(coarse: usize) -> Self {
        Self { coarse }
    }
}

impl TransferManager for LinearIntervalTransfer {
    fn fine_size(&self) -> usize {
        (2 * self.coarse).saturating_sub(1)
    }

    fn coarse_size(&self) -> usize {
        self.coarse
    }

    fn prolong(&self, coarse: &[f64], fine: &mut [f64]) {
        for (i, f) in fine.iter_mut().enumerate() {
            *f = if i % 2 == 0 {
                coarse[i / 2]
            } else {
                0.5 * (coarse[i / 2] + coarse[i / 2 + 1])
            };
        }
    }

    fn restrict(&self, fine: &[f64], coarse: &mut [f64]) {
        let n = fine.len();
        for (c, out) in coarse.iter_mut().enumerate() {
            let i = 2 * c;
            let mut acc = fine[i];
            if i > 0 {
                acc += 0.5 * fine[i - 1];
            }
            if i + 1 < n {
                acc += 0.5 * fine[i + 1];
            }
            *out = 0.5 * acc;
        }
    }

    fn inject(&self, fine: &[f64], coarse: &mut [f64]) {
        for (c, out) in coarse.iter_mut().enumerate() {
            *out = fine[2 * c];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prolong_interpolates_and_inject_samples() {
        let t = LinearIntervalTransfer::new(3);
        let mut fine = vec![0.0; t.fine_size()];
        t.prolong(&[0.0, 2.0, 4.0], &mut fine);
        assert_eq!(fine, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        let mut coarse = vec![0.0; 3];
        t.inject(&fine, &mut coarse);
        assert_eq!(coarse, vec![0.0, 2.0, 4.0]);
        t.restrict(&[1.0; 5], &mut coarse);
        assert_eq!(coarse, vec![0.75, 1.0, 0.75]);
    }
}
