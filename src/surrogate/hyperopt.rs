//! Marginal-likelihood maximization over kernel hyperparameters.
//!
//! The hyperparameter vector `θ` packs the log ARD lengthscales followed
//! by the log signal variance. Both optimizers work on the log marginal
//! likelihood with its analytic gradient and return the best `θ` seen,
//! so a fit can never end up worse than its initialization.

use nalgebra::{DMatrix, DVector};

use super::kernel::{SQRT_5, kernel_matrix};

/// Hard clamp on each `θ` component. exp(12) ≈ 1.6e5 is already far
/// outside any standardized-input lengthscale that makes sense.
const THETA_CLAMP: f64 = 12.0;

/// One likelihood evaluation: the value and its gradient wrt `θ`.
pub(crate) struct Eval {
    pub(crate) value: f64,
    pub(crate) grad: Vec<f64>,
}

/// Borrowed view of the training data the likelihood is evaluated on.
pub(crate) struct Likelihood<'a> {
    x: &'a [Vec<f64>],
    y: DVector<f64>,
    noise_var: f64,
    dim: usize,
}

impl<'a> Likelihood<'a> {
    pub(crate) fn new(x: &'a [Vec<f64>], y_standardized: &[f64], noise_var: f64) -> Self {
        let dim = x.first().map_or(0, Vec::len);
        Self {
            x,
            y: DVector::from_column_slice(y_standardized),
            noise_var,
            dim,
        }
    }

    pub(crate) fn dim(&self) -> usize {
        self.dim
    }

    /// Log marginal likelihood and gradient at `theta`.
    ///
    /// `L(θ) = -½ yᵀ K⁻¹ y - ½ log|K| - n/2 log 2π` and
    /// `∂L/∂θ_k = ½ tr((α αᵀ - K⁻¹) ∂K/∂θ_k)` with `α = K⁻¹ y`.
    ///
    /// Returns `None` when the kernel matrix at `theta` is not positive
    /// definite; optimizers treat that point as unusable.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn eval(&self, theta: &[f64]) -> Option<Eval> {
        let n = self.x.len();
        let lengthscales: Vec<f64> = theta[..self.dim].iter().map(|&t| t.exp()).collect();
        let signal_var = theta[self.dim].exp();

        let k = kernel_matrix(self.x, &lengthscales, signal_var, self.noise_var);
        let cholesky = nalgebra::linalg::Cholesky::new(k)?;
        let alpha = cholesky.solve(&self.y);

        let l = cholesky.l();
        let mut log_det_half = 0.0;
        for i in 0..n {
            log_det_half += l[(i, i)].ln();
        }
        let value = -0.5 * self.y.dot(&alpha)
            - log_det_half
            - 0.5 * n as f64 * (2.0 * core::f64::consts::PI).ln();

        // A = α αᵀ - K⁻¹; each gradient component is ½ Σ_ab A_ab (∂K)_ab.
        let mut a_mat: DMatrix<f64> = &alpha * alpha.transpose();
        a_mat -= cholesky.inverse();

        let mut grad = vec![0.0; self.dim + 1];
        for a in 0..n {
            for b in 0..n {
                let mut r_sq = 0.0;
                let mut scaled_sq = vec![0.0; self.dim];
                for (j, s) in scaled_sq.iter_mut().enumerate() {
                    let diff = (self.x[a][j] - self.x[b][j]) / lengthscales[j];
                    *s = diff * diff;
                    r_sq += *s;
                }
                let r = r_sq.sqrt();
                let decay = (-SQRT_5 * r).exp();
                let base = signal_var * (1.0 + SQRT_5 * r + 5.0 / 3.0 * r_sq) * decay;
                // ∂k/∂log l_j = σ² (5/3)(1 + √5 r) e^{-√5 r} ((Δ_j)/l_j)²
                let factor = signal_var * (5.0 / 3.0) * (1.0 + SQRT_5 * r) * decay;

                let weight = a_mat[(a, b)];
                for (g, &s) in grad[..self.dim].iter_mut().zip(&scaled_sq) {
                    *g += weight * factor * s;
                }
                grad[self.dim] += weight * base;
            }
        }
        for g in &mut grad {
            *g *= 0.5;
        }

        Some(Eval { value, grad })
    }
}

fn inf_norm(values: &[f64]) -> f64 {
    values.iter().fold(0.0, |acc, v| acc.max(v.abs()))
}

fn clamp_theta(theta: &mut [f64]) {
    for t in theta {
        *t = t.clamp(-THETA_CLAMP, THETA_CLAMP);
    }
}

/// First-order adaptive gradient ascent (Adam) on the log marginal
/// likelihood.
pub(crate) fn adam_maximize(
    likelihood: &Likelihood<'_>,
    theta0: Vec<f64>,
    max_iters: usize,
    tolerance: f64,
) -> Vec<f64> {
    const LEARNING_RATE: f64 = 0.05;
    const BETA_1: f64 = 0.9;
    const BETA_2: f64 = 0.999;
    const EPS: f64 = 1e-8;

    let d = theta0.len();
    let mut theta = theta0.clone();
    let mut best_theta = theta0;
    let mut best_value = f64::NEG_INFINITY;
    let mut m = vec![0.0; d];
    let mut v = vec![0.0; d];

    for step in 1..=max_iters {
        let Some(eval) = likelihood.eval(&theta) else {
            break;
        };
        if eval.value > best_value {
            best_value = eval.value;
            best_theta.copy_from_slice(&theta);
        }
        if inf_norm(&eval.grad) < tolerance {
            break;
        }

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let t = step as i32;
        for i in 0..d {
            m[i] = BETA_1 * m[i] + (1.0 - BETA_1) * eval.grad[i];
            v[i] = BETA_2 * v[i] + (1.0 - BETA_2) * eval.grad[i] * eval.grad[i];
            let m_hat = m[i] / (1.0 - BETA_1.powi(t));
            let v_hat = v[i] / (1.0 - BETA_2.powi(t));
            theta[i] += LEARNING_RATE * m_hat / (v_hat.sqrt() + EPS);
        }
        clamp_theta(&mut theta);
    }

    best_theta
}

/// Quasi-Newton (BFGS) ascent with backtracking line search.
///
/// The hyperparameter vector has at most D+1 entries, so the dense
/// inverse-Hessian approximation stays tiny.
pub(crate) fn bfgs_maximize(
    likelihood: &Likelihood<'_>,
    theta0: Vec<f64>,
    max_iters: usize,
    tolerance: f64,
) -> Vec<f64> {
    const ARMIJO_C1: f64 = 1e-4;
    const MAX_BACKTRACKS: usize = 30;
    const CURVATURE_FLOOR: f64 = 1e-12;

    let d = theta0.len();
    let mut best_theta = theta0.clone();

    let mut theta = DVector::from_vec(theta0);
    // Minimize f = -L; g = -∇L.
    let Some(eval) = likelihood.eval(theta.as_slice()) else {
        return best_theta;
    };
    let mut f = -eval.value;
    let mut g = DVector::from_vec(eval.grad.iter().map(|v| -v).collect::<Vec<_>>());
    let mut best_value = eval.value;

    let mut h_inv: DMatrix<f64> = DMatrix::identity(d, d);

    for _ in 0..max_iters {
        if inf_norm(g.as_slice()) < tolerance {
            break;
        }

        let direction = -(&h_inv * &g);
        let slope = g.dot(&direction);
        if slope >= 0.0 {
            // Not a descent direction; reset the curvature estimate.
            h_inv = DMatrix::identity(d, d);
            continue;
        }

        // Backtracking Armijo line search.
        let mut step_size = 1.0;
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let mut candidate = &theta + step_size * &direction;
            clamp_theta(candidate.as_mut_slice());
            if let Some(eval) = likelihood.eval(candidate.as_slice()) {
                let f_new = -eval.value;
                if f_new <= f + ARMIJO_C1 * step_size * slope {
                    accepted = Some((candidate, eval));
                    break;
                }
            }
            step_size *= 0.5;
        }
        let Some((theta_new, eval_new)) = accepted else {
            break;
        };

        if eval_new.value > best_value {
            best_value = eval_new.value;
            best_theta.copy_from_slice(theta_new.as_slice());
        }

        let g_new = DVector::from_vec(eval_new.grad.iter().map(|v| -v).collect::<Vec<_>>());
        let s = &theta_new - &theta;
        let y_vec = &g_new - &g;
        let sy = s.dot(&y_vec);
        if sy > CURVATURE_FLOOR {
            // BFGS inverse-Hessian update:
            // H ← (I - ρ s yᵀ) H (I - ρ y sᵀ) + ρ s sᵀ with ρ = 1 / (sᵀy)
            let rho = 1.0 / sy;
            let identity = DMatrix::identity(d, d);
            let left = &identity - rho * (&s * y_vec.transpose());
            let right = &identity - rho * (&y_vec * s.transpose());
            h_inv = &left * &h_inv * &right + rho * (&s * s.transpose());
        } else {
            h_inv = DMatrix::identity(d, d);
        }

        theta = theta_new;
        f = -eval_new.value;
        g = g_new;
    }

    best_theta
}
