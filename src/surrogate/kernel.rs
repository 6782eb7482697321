//! Matérn 5/2 covariance kernel with ARD lengthscales.

use nalgebra::DMatrix;

/// Precomputed √5 constant.
pub(crate) const SQRT_5: f64 = 2.236_067_977_499_79;

/// Matérn 5/2 kernel with ARD lengthscales.
///
/// `k(x1, x2) = σ² (1 + √5 r + 5/3 r²) exp(-√5 r)`
/// where `r = sqrt(Σ ((x1_i - x2_i) / l_i)²)`
pub(crate) fn matern52(x1: &[f64], x2: &[f64], lengthscales: &[f64], signal_var: f64) -> f64 {
    let mut r_sq = 0.0;
    for i in 0..x1.len() {
        let diff = (x1[i] - x2[i]) / lengthscales[i];
        r_sq += diff * diff;
    }
    let r = r_sq.sqrt();
    let sqrt5_r = SQRT_5 * r;
    signal_var * (1.0 + sqrt5_r + 5.0 / 3.0 * r_sq) * (-sqrt5_r).exp()
}

/// Build the kernel matrix `K + σ²I`.
pub(crate) fn kernel_matrix(
    x: &[Vec<f64>],
    lengthscales: &[f64],
    signal_var: f64,
    noise_var: f64,
) -> DMatrix<f64> {
    let n = x.len();
    DMatrix::from_fn(n, n, |i, j| {
        let k = matern52(&x[i], &x[j], lengthscales, signal_var);
        if i == j {
            k + noise_var
        } else {
            k
        }
    })
}

/// Build the cross-kernel matrix k(X*, X) for a block of test points.
pub(crate) fn cross_kernel(
    x_star: &[Vec<f64>],
    x_train: &[Vec<f64>],
    lengthscales: &[f64],
    signal_var: f64,
) -> DMatrix<f64> {
    DMatrix::from_fn(x_star.len(), x_train.len(), |i, j| {
        matern52(&x_star[i], &x_train[j], lengthscales, signal_var)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_peaks_at_zero_distance() {
        let ls = vec![1.0, 1.0];
        let k_self = matern52(&[0.3, -0.7], &[0.3, -0.7], &ls, 2.0);
        assert!((k_self - 2.0).abs() < 1e-12);

        let k_far = matern52(&[0.3, -0.7], &[5.0, 5.0], &ls, 2.0);
        assert!(k_far < k_self);
        assert!(k_far > 0.0);
    }

    #[test]
    fn kernel_is_symmetric() {
        let ls = vec![0.5, 2.0, 1.3];
        let a = [0.1, 0.2, 0.3];
        let b = [-1.0, 0.7, 2.2];
        let kab = matern52(&a, &b, &ls, 1.0);
        let kba = matern52(&b, &a, &ls, 1.0);
        assert!((kab - kba).abs() < 1e-15);
    }

    #[test]
    fn kernel_matrix_has_noise_on_diagonal() {
        let x = vec![vec![0.0], vec![1.0]];
        let k = kernel_matrix(&x, &[1.0], 1.0, 0.25);
        assert!((k[(0, 0)] - 1.25).abs() < 1e-12);
        assert!((k[(1, 1)] - 1.25).abs() < 1e-12);
        assert!((k[(0, 1)] - k[(1, 0)]).abs() < 1e-15);
        assert!(k[(0, 1)] < 1.0);
    }
}
