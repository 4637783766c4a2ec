//! Parameter updates for fixed soft memberships `Z`.
//!
//! * Without covariates the update is closed form:
//!   `θ = (Zᵗ Y Z) ⊘ (Zᵗ R Z)`, `π = colMeans(Z)`.
//! * With covariates `(Γ, β)` are packed into one vector and handed to a
//!   [`GradientOptimizer`] that minimizes the negative expected
//!   log-likelihood of the observed dyads.

use crate::elbo::effective_gamma;
use crate::error::{check_len, check_shape};
use crate::network::{DyadCovariates, ObservedDyad, SparseNetwork};
use crate::numeric::{logistic_loglik, sigmoid};
use crate::optimizer::{GradientOptimizer, Objective, OptimizerConfig, OptimizerStatus};
use crate::packing::{BlockShape, PackLayout};

use log::info;
use matrix_util::dmatrix_util::column_means;
use matrix_util::traits::SparseGraphOps;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

const GAMMA_ID: usize = 0;
const BETA_ID: usize = 1;

/// Closed-form estimate
#[derive(Debug, Clone, PartialEq)]
pub struct BlockEstimate {
    /// Connectivity `θ` (k x k); `NaN` where a block pair has no observed dyad
    pub theta_kk: DMatrix<f64>,
    /// Cluster prior `π`
    pub pi_k: DVector<f64>,
}

/// Starting point of the covariate M-step
#[derive(Debug, Clone, PartialEq)]
pub struct CovariateParams {
    /// Block log-odds `Γ` (k x k)
    pub gamma_kk: DMatrix<f64>,
    /// Covariate effects `β` (p)
    pub beta_p: DVector<f64>,
}

/// Outcome of the covariate M-step
#[derive(Debug, Clone, PartialEq)]
pub struct CovariateEstimate {
    /// `sigmoid(Γ)`, the block edge probability at zero covariates
    pub theta_kk: DMatrix<f64>,
    /// Fitted block log-odds `Γ`
    pub gamma_kk: DMatrix<f64>,
    /// Fitted covariate effects `β`
    pub beta_p: DVector<f64>,
    /// Cluster prior `π`
    pub pi_k: DVector<f64>,
    /// Optimizer stop reason; non-convergence is reported here
    pub status: OptimizerStatus,
    /// Objective evaluations spent by the optimizer
    pub iterations: usize,
    /// Negative expected log-likelihood at the returned `(Γ, β)`
    pub objective: f64,
}

/// Closed-form M-step.
///
/// `θ(q,l)` is the expected number of edges over the expected number of
/// observed dyads between clusters `q` and `l`. A block pair without any
/// observed dyad gives `0/0 = NaN`; it is reported as is, not clamped.
pub fn m_step(net: &SparseNetwork, z_nk: &DMatrix<f64>) -> anyhow::Result<BlockEstimate> {
    net.check_membership(z_nk)?;
    let e_kk = net.adjacency().sandwich(z_nk)?;
    let d_kk = net.observed().sandwich(z_nk)?;
    Ok(BlockEstimate {
        theta_kk: e_kk.component_div(&d_kk),
        pi_k: column_means(z_nk),
    })
}

/// M-step with dyadic covariates.
///
/// The optimizer is built before anything else, so an invalid `config`
/// fails right away. Running out of evaluations or time is not an error:
/// check [`CovariateEstimate::status`].
///
/// For undirected networks the likelihood depends on `Γ` only through its
/// symmetric part, which is what gets reported.
pub fn m_step_covariates(
    net: &SparseNetwork,
    covariates: &DyadCovariates,
    z_nk: &DMatrix<f64>,
    init: &CovariateParams,
    config: &OptimizerConfig,
) -> anyhow::Result<CovariateEstimate> {
    let kk = z_nk.ncols();
    let pp = covariates.num_covariates();
    let optimizer = GradientOptimizer::new(config, kk * kk + pp)?;

    let objective = CovariateObjective::new(net, covariates, z_nk)?;
    check_shape("initial block log-odds", (kk, kk), init.gamma_kk.shape())?;
    check_len("initial covariate effects", pp, init.beta_p.len())?;

    let layout = objective.layout();
    let mut params = layout.zeros();
    layout.put_matrix(GAMMA_ID, &mut params, &init.gamma_kk)?;
    layout.put_vector(BETA_ID, &mut params, &init.beta_p)?;

    let outcome = optimizer.minimize(&objective, &mut params)?;

    let gamma_kk = effective_gamma(net, &layout.copy_matrix(GAMMA_ID, &params)?);
    let beta_p = layout.copy_vector(BETA_ID, &params)?;

    info!(
        "covariate M-step [{}]: {} after {} evaluations, -loglik {:.6}",
        optimizer.algorithm(),
        outcome.status,
        outcome.iterations,
        outcome.value
    );

    Ok(CovariateEstimate {
        theta_kk: gamma_kk.map(sigmoid),
        gamma_kk,
        beta_p,
        pi_k: column_means(z_nk),
        status: outcome.status,
        iterations: outcome.iterations,
        objective: outcome.value,
    })
}

/// Negative expected log-likelihood of the observed dyads as a function
/// of the packed `(Γ, β)`, with its analytic gradient.
///
/// Holds the data by reference; every evaluation re-derives the value
/// from the current parameters only. The packed layout is `[Γ (k x k), β (p)]`.
pub struct CovariateObjective<'a> {
    covariates: &'a DyadCovariates,
    z_nk: &'a DMatrix<f64>,
    dyads: Vec<ObservedDyad>,
    layout: PackLayout,
    symmetric: bool,
}

impl<'a> CovariateObjective<'a> {
    /// Fails unless `z_nk` has one row per node and `covariates` matches
    /// the network size.
    pub fn new(
        net: &SparseNetwork,
        covariates: &'a DyadCovariates,
        z_nk: &'a DMatrix<f64>,
    ) -> anyhow::Result<Self> {
        net.check_membership(z_nk)?;
        covariates.check_network(net)?;

        let kk = z_nk.ncols();
        let layout = PackLayout::new(&[
            BlockShape::Matrix { nrows: kk, ncols: kk },
            BlockShape::Vector {
                len: covariates.num_covariates(),
            },
        ]);

        Ok(CovariateObjective {
            covariates,
            z_nk,
            dyads: net.observed_dyads(),
            layout,
            symmetric: !net.is_directed(),
        })
    }

    /// Where `Γ` and `β` sit in the packed parameter vector
    pub fn layout(&self) -> &PackLayout {
        &self.layout
    }

    fn loglik_and_gradient(
        &self,
        gamma_kk: &DMatrix<f64>,
        beta_p: &DVector<f64>,
    ) -> (f64, DMatrix<f64>, DVector<f64>) {
        let kk = gamma_kk.nrows();
        let pp = beta_p.len();
        let z_nk = self.z_nk;

        let zero = || (0.0, DMatrix::<f64>::zeros(kk, kk), DVector::<f64>::zeros(pp));

        self.dyads
            .par_iter()
            .fold(zero, |(mut llik, mut grad_kk, mut grad_p), d| {
                let x_p = self.covariates.features(d.i, d.j);
                let mu = x_p.iter().zip(beta_p.iter()).map(|(x, b)| x * b).sum::<f64>();

                let mut delta_sum = 0.0;
                for l in 0..kk {
                    let z_jl = z_nk[(d.j, l)];
                    for q in 0..kk {
                        let w = z_nk[(d.i, q)] * z_jl;
                        if w == 0.0 {
                            continue;
                        }
                        let eta = gamma_kk[(q, l)] + mu;
                        llik += w * logistic_loglik(d.y, eta);
                        let delta = w * (d.y - sigmoid(eta));
                        grad_kk[(q, l)] += delta;
                        delta_sum += delta;
                    }
                }
                for (g, x) in grad_p.iter_mut().zip(x_p.iter()) {
                    *g += delta_sum * x;
                }
                (llik, grad_kk, grad_p)
            })
            .reduce(zero, |a, b| (a.0 + b.0, a.1 + b.1, a.2 + b.2))
    }
}

impl Objective for CovariateObjective<'_> {
    fn evaluate(&self, x: &[f64], grad: &mut [f64]) -> anyhow::Result<f64> {
        let gamma_kk = self.layout.copy_matrix(GAMMA_ID, x)?;
        let beta_p = self.layout.copy_vector(BETA_ID, x)?;

        let gamma_kk = if self.symmetric {
            (&gamma_kk + gamma_kk.transpose()) * 0.5
        } else {
            gamma_kk
        };

        let (llik, mut grad_kk, grad_p) = self.loglik_and_gradient(&gamma_kk, &beta_p);

        if self.symmetric {
            grad_kk = (&grad_kk + grad_kk.transpose()) * 0.5;
        }

        self.layout
            .matrix_view_mut(GAMMA_ID, grad)?
            .copy_from(&(-grad_kk));
        self.layout.vector_view_mut(BETA_ID, grad)?.copy_from(&(-grad_p));
        Ok(-llik)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SbmError;
    use crate::network::Direction;
    use approx::assert_abs_diff_eq;
    use matrix_util::traits::MatTriplets;
    use nalgebra_sparse::CscMatrix;
    use ndarray::Array3;

    fn small_problem(direction: Direction) -> (SparseNetwork, DyadCovariates, DMatrix<f64>) {
        let y = CscMatrix::<f64>::from_nonzero_triplets(
            4,
            4,
            vec![(1, 0, 1.0), (2, 1, 1.0), (3, 2, 1.0), (0, 3, 1.0)],
        )
        .unwrap();
        let net = SparseNetwork::fully_observed(&y, direction).unwrap();
        let x = Array3::from_shape_fn((4, 4, 2), |(i, j, p)| {
            ((i + 2 * j + 3 * p) % 5) as f64 * 0.25 - 0.5
        });
        let cov = DyadCovariates::new(x).unwrap();
        let z = DMatrix::from_row_slice(4, 2, &[0.8, 0.2, 0.3, 0.7, 0.6, 0.4, 0.1, 0.9]);
        (net, cov, z)
    }

    fn finite_difference_check(direction: Direction) {
        let (net, cov, z) = small_problem(direction);
        let objective = CovariateObjective::new(&net, &cov, &z).unwrap();
        let layout = objective.layout();
        assert_eq!(layout.packed_size(), 6);

        let x = vec![0.3, -0.2, 0.5, -1.0, 0.4, -0.7];
        let mut grad = layout.zeros();
        objective.evaluate(&x, &mut grad).unwrap();

        let h = 1e-6;
        let mut scratch = layout.zeros();
        for k in 0..x.len() {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[k] += h;
            xm[k] -= h;
            let fp = objective.evaluate(&xp, &mut scratch).unwrap();
            let fm = objective.evaluate(&xm, &mut scratch).unwrap();
            assert_abs_diff_eq!(grad[k], (fp - fm) / (2.0 * h), epsilon = 1e-6);
        }
    }

    #[test]
    fn test_gradient_matches_finite_differences_directed() {
        finite_difference_check(Direction::Directed);
    }

    #[test]
    fn test_gradient_matches_finite_differences_undirected() {
        finite_difference_check(Direction::Undirected);
    }

    #[test]
    fn test_closed_form_counts() {
        let (net, _, _) = small_problem(Direction::Directed);
        let z = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0]);
        let est = m_step(&net, &z).unwrap();
        // 1 -> 0 inside cluster 0, two ordered dyads there
        assert_abs_diff_eq!(est.theta_kk[(0, 0)], 0.5, epsilon = 1e-12);
        // 0 -> 3 out of four dyads from cluster 0 to cluster 1
        assert_abs_diff_eq!(est.theta_kk[(0, 1)], 0.25, epsilon = 1e-12);
        // 2 -> 1
        assert_abs_diff_eq!(est.theta_kk[(1, 0)], 0.25, epsilon = 1e-12);
        // 3 -> 2
        assert_abs_diff_eq!(est.theta_kk[(1, 1)], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(est.pi_k[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_block_pair_is_nan() {
        let (net, _, _) = small_problem(Direction::Undirected);
        let z = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
        let est = m_step(&net, &z).unwrap();
        assert!(est.theta_kk[(1, 1)].is_nan());
        assert!(est.theta_kk[(0, 1)].is_nan());
        assert!(est.theta_kk[(0, 0)] > 0.0 && est.theta_kk[(0, 0)] < 1.0);
    }

    #[test]
    fn test_covariate_step_rejects_bad_init() {
        let (net, cov, z) = small_problem(Direction::Directed);
        let init = CovariateParams {
            gamma_kk: DMatrix::zeros(3, 3),
            beta_p: DVector::zeros(2),
        };
        let config = OptimizerConfig::new("LBFGS");
        assert!(m_step_covariates(&net, &cov, &z, &init, &config).is_err());
    }

    #[test]
    fn test_objective_rejects_mismatched_inputs() {
        let (net, cov, _) = small_problem(Direction::Directed);
        let short_z = DMatrix::from_element(3, 2, 0.5);
        let err = CovariateObjective::new(&net, &cov, &short_z).err().unwrap();
        assert!(err.downcast_ref::<SbmError>().is_some());

        let (small_net, _, small_z) = small_problem(Direction::Undirected);
        let wide = DyadCovariates::new(Array3::zeros((5, 5, 2))).unwrap();
        assert!(CovariateObjective::new(&small_net, &wide, &small_z).is_err());

        // a 3-cluster membership gets a 3 x 3 block of log-odds
        let z3 = DMatrix::from_element(4, 3, 1.0 / 3.0);
        let objective = CovariateObjective::new(&net, &cov, &z3).unwrap();
        assert_eq!(objective.layout().packed_size(), 9 + 2);
        let mut grad = objective.layout().zeros();
        assert!(objective.evaluate(&[0.0; 6], &mut grad).is_err());
    }
}
