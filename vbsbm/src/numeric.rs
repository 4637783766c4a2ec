//! Scalar link functions shared by the ELBO, E-step and M-step.

use num_traits::Float;

/// Numerically stable `ln(1 + exp(x))`
///
/// Written as `max(x, 0) + ln(1 + exp(-|x|))` so that large positive `x`
/// does not overflow.
#[inline]
pub fn softplus<T: Float>(x: T) -> T {
    x.max(T::zero()) + (-x.abs()).exp().ln_1p()
}

/// Numerically stable logistic function `1 / (1 + exp(-x))`
#[inline]
pub fn sigmoid<T: Float>(x: T) -> T {
    if x >= T::zero() {
        T::one() / (T::one() + (-x).exp())
    } else {
        let ex = x.exp();
        ex / (T::one() + ex)
    }
}

/// `ln(p / (1 - p))`
#[inline]
pub fn logit<T: Float>(p: T) -> T {
    p.ln() - (-p).ln_1p()
}

/// Bernoulli log-likelihood of `y` under log-odds `eta`,
/// `y * eta - ln(1 + exp(eta))`
#[inline]
pub fn logistic_loglik<T: Float>(y: T, eta: T) -> T {
    y * eta - softplus(eta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_softplus_matches_naive_in_safe_range() {
        for &x in &[-20.0, -3.0, -0.5, 0.0, 0.5, 3.0, 20.0] {
            let naive = (1.0_f64 + f64::exp(x)).ln();
            assert_abs_diff_eq!(softplus(x), naive, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_softplus_tails() {
        assert_abs_diff_eq!(softplus(1000.0_f64), 1000.0, epsilon = 1e-9);
        assert!(softplus(-1000.0_f64) >= 0.0);
        assert!(softplus(-1000.0_f64) < 1e-300);
        assert!(softplus(800.0_f64).is_finite());
    }

    #[test]
    fn test_sigmoid_symmetry_and_tails() {
        for &x in &[-5.0, -1.0, 0.0, 2.0, 7.5] {
            assert_abs_diff_eq!(sigmoid(x) + sigmoid(-x), 1.0, epsilon = 1e-12);
        }
        assert_eq!(sigmoid(-1000.0_f64), 0.0);
        assert_eq!(sigmoid(1000.0_f64), 1.0);
        assert_abs_diff_eq!(sigmoid(0.0_f64), 0.5);
    }

    #[test]
    fn test_logit_inverts_sigmoid() {
        for &p in &[0.01, 0.2, 0.5, 0.9] {
            assert_abs_diff_eq!(sigmoid(logit(p)), p, epsilon = 1e-12);
        }
    }
}
