//! Mean-field update of the soft memberships.
//!
//! Each row of the new `Z` is a shifted softmax of
//!
//! ```text
//! log Z(i,q) ∝ Σ_{dyads ∋ i} Σ_l Z(j,l) log p(Y | q, l) + log λ(i) + log π(q)
//! ```
//!
//! computed from the current `Z` for every row at once. In a directed
//! network node `i` is the sender of `(i,j)` and the receiver of `(j,i)`,
//! so both the out- and the in-dyads contribute.

use crate::elbo::{bernoulli_block, check_inputs, effective_gamma, effective_theta, EdgeModel};
use crate::error::check_len;
use crate::network::SparseNetwork;
use crate::numeric::logistic_loglik;

use matrix_util::dmatrix_util::softmax_rows_inplace;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CscMatrix;
use rayon::prelude::*;

/// One E-step. Returns the updated memberships; every row sums to one.
///
/// * `z_nk` - current memberships (n x k)
/// * `log_lambda` - optional per-node offset added before normalization
pub fn e_step(
    net: &SparseNetwork,
    z_nk: &DMatrix<f64>,
    model: EdgeModel<'_>,
    pi_k: &DVector<f64>,
    log_lambda: Option<&DVector<f64>>,
) -> anyhow::Result<DMatrix<f64>> {
    check_inputs(net, z_nk, &model, pi_k)?;
    if let Some(log_lambda) = log_lambda {
        check_len("per-node log offset", net.num_nodes(), log_lambda.len())?;
    }

    let mut log_nk = match model {
        EdgeModel::Bernoulli { theta_kk } => bernoulli_scores(net, z_nk, theta_kk),
        EdgeModel::Logistic { gamma_kk, mu_nn } => logistic_scores(net, z_nk, gamma_kk, mu_nn),
    };

    let log_pi_k = pi_k.map(f64::ln);
    for (i, mut row) in log_nk.row_iter_mut().enumerate() {
        let offset = log_lambda.map_or(0.0, |ll| ll[i]);
        for (x, &lp) in row.iter_mut().zip(log_pi_k.iter()) {
            *x += lp + offset;
        }
    }

    softmax_rows_inplace(&mut log_nk);
    Ok(log_nk)
}

fn bernoulli_scores(net: &SparseNetwork, z_nk: &DMatrix<f64>, theta_kk: &DMatrix<f64>) -> DMatrix<f64> {
    let theta_kk = effective_theta(net, theta_kk);

    let mut log_nk = neighbour_scores(net.adjacency(), net.observed(), z_nk, &theta_kk);
    if net.is_directed() {
        let yt = net.adjacency().transpose();
        let rt = net.observed().transpose();
        log_nk += neighbour_scores(&yt, &rt, z_nk, &theta_kk.transpose());
    }
    log_nk
}

/// `S(i,q) = Σ_l [ E(i,l) log θ(q,l) + (D(i,l) - E(i,l)) log(1 - θ(q,l)) ]`
/// with `E = Y Z`, `D = R Z`.
///
/// A block pair with undefined `θ` (no observed dyad at the last M-step)
/// carries no information and is skipped.
fn neighbour_scores(
    y_nn: &CscMatrix<f64>,
    r_nn: &CscMatrix<f64>,
    z_nk: &DMatrix<f64>,
    theta_kk: &DMatrix<f64>,
) -> DMatrix<f64> {
    let e_nk: DMatrix<f64> = y_nn * z_nk;
    let d_nk: DMatrix<f64> = r_nn * z_nk;
    let kk = z_nk.ncols();

    DMatrix::from_fn(z_nk.nrows(), kk, |i, q| {
        (0..kk)
            .filter(|&l| !theta_kk[(q, l)].is_nan())
            .map(|l| bernoulli_block(e_nk[(i, l)], d_nk[(i, l)], theta_kk[(q, l)]))
            .sum::<f64>()
    })
}

/// Per-dyad accumulation: for an observed dyad `(i, j)` with
/// `η(q,l) = Γ(q,l) + M(i,j)`,
///
/// * row `i`, cluster `q` gains `Σ_l Z(j,l) [y η(q,l) - softplus η(q,l)]`
/// * row `j`, cluster `l` gains `Σ_q Z(i,q) [y η(q,l) - softplus η(q,l)]`
fn logistic_scores(
    net: &SparseNetwork,
    z_nk: &DMatrix<f64>,
    gamma_kk: &DMatrix<f64>,
    mu_nn: &DMatrix<f64>,
) -> DMatrix<f64> {
    let gamma_kk = effective_gamma(net, gamma_kk);
    let (nn, kk) = z_nk.shape();
    let zero = || DMatrix::<f64>::zeros(nn, kk);

    net.observed_dyads()
        .par_iter()
        .fold(zero, |mut log_nk, d| {
            let mu = mu_nn[(d.i, d.j)];
            for q in 0..kk {
                for l in 0..kk {
                    let ll = logistic_loglik(d.y, gamma_kk[(q, l)] + mu);
                    log_nk[(d.i, q)] += z_nk[(d.j, l)] * ll;
                    log_nk[(d.j, l)] += z_nk[(d.i, q)] * ll;
                }
            }
            log_nk
        })
        .reduce(zero, |a, b| a + b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Direction;
    use crate::numeric::logit;
    use approx::assert_abs_diff_eq;
    use matrix_util::traits::MatTriplets;

    fn two_cliques() -> CscMatrix<f64> {
        CscMatrix::<f64>::from_nonzero_triplets(
            4,
            4,
            vec![(0, 1, 1.0), (1, 0, 1.0), (2, 3, 1.0), (3, 2, 1.0)],
        )
        .unwrap()
    }

    #[test]
    fn test_recovers_cliques() {
        let net = SparseNetwork::fully_observed(&two_cliques(), Direction::Undirected).unwrap();
        let z = DMatrix::from_row_slice(4, 2, &[0.6, 0.4, 0.55, 0.45, 0.45, 0.55, 0.4, 0.6]);
        let theta = DMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.1, 0.9]);
        let pi = DVector::from_vec(vec![0.5, 0.5]);

        let z_new = e_step(&net, &z, EdgeModel::Bernoulli { theta_kk: &theta }, &pi, None).unwrap();
        assert!(z_new[(0, 0)] > 0.6 && z_new[(1, 0)] > 0.55);
        assert!(z_new[(2, 1)] > 0.55 && z_new[(3, 1)] > 0.6);
    }

    #[test]
    fn test_log_lambda_shifts_rows_uniformly() {
        let net = SparseNetwork::fully_observed(&two_cliques(), Direction::Directed).unwrap();
        let z = DMatrix::from_row_slice(4, 2, &[0.6, 0.4, 0.55, 0.45, 0.45, 0.55, 0.4, 0.6]);
        let theta = DMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.2, 0.8]);
        let pi = DVector::from_vec(vec![0.4, 0.6]);
        let model = EdgeModel::Bernoulli { theta_kk: &theta };

        let a = e_step(&net, &z, model, &pi, None).unwrap();
        let offset = DVector::from_vec(vec![100.0, -3.0, 0.0, 1e3]);
        let b = e_step(&net, &z, model, &pi, Some(&offset)).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-12);
        }

        let short = DVector::from_vec(vec![0.0; 3]);
        assert!(e_step(&net, &z, model, &pi, Some(&short)).is_err());
    }

    #[test]
    fn test_logistic_matches_bernoulli_without_covariates() {
        let net = SparseNetwork::fully_observed(&two_cliques(), Direction::Directed).unwrap();
        let z = DMatrix::from_row_slice(4, 2, &[0.7, 0.3, 0.5, 0.5, 0.2, 0.8, 0.35, 0.65]);
        let theta = DMatrix::from_row_slice(2, 2, &[0.6, 0.3, 0.15, 0.7]);
        let gamma = theta.map(logit);
        let mu = DMatrix::<f64>::zeros(4, 4);
        let pi = DVector::from_vec(vec![0.5, 0.5]);

        let a = e_step(&net, &z, EdgeModel::Bernoulli { theta_kk: &theta }, &pi, None).unwrap();
        let b = e_step(
            &net,
            &z,
            EdgeModel::Logistic {
                gamma_kk: &gamma,
                mu_nn: &mu,
            },
            &pi,
            None,
        )
        .unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_saturated_theta_keeps_rows_stochastic() {
        let net = SparseNetwork::fully_observed(&two_cliques(), Direction::Undirected).unwrap();
        let z = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0]);
        let theta = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        let pi = DVector::from_vec(vec![0.5, 0.5]);
        let z_new = e_step(&net, &z, EdgeModel::Bernoulli { theta_kk: &theta }, &pi, None).unwrap();
        for row in z_new.row_iter() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(z_new[(0, 0)], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(z_new[(3, 1)], 1.0, epsilon = 1e-12);
    }
}
