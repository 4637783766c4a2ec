//! Variational lower bound of the complete-data log-likelihood.
//!
//! For soft memberships `Z` (n x k) and cluster prior `π`,
//!
//! ```text
//! ELBO = Σ_{observed dyads (i,j)} Σ_{q,l} Z(i,q) Z(j,l) log p(Y(i,j) | q, l)
//!      + Σ_i Σ_q Z(i,q) log π(q)
//! ```
//!
//! where each unordered pair is counted once for undirected networks and
//! each ordered pair once for directed ones. Without covariates the dyad
//! sum collapses into the quadratic forms `Zᵗ Y Z` and `Zᵗ R Z`; with
//! covariates the linear predictor `M(i,j)` varies per dyad and the sum
//! runs over the stored entries of `R`.

use crate::error::{check_len, check_shape};
use crate::network::{ObservedDyad, SparseNetwork};
use crate::numeric::logistic_loglik;

use matrix_util::dmatrix_util::xlogy;
use matrix_util::traits::SparseGraphOps;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

/// Edge probability model for one block pair
#[derive(Debug, Clone, Copy)]
pub enum EdgeModel<'a> {
    /// `P(Y(i,j) = 1) = θ(q,l)`
    Bernoulli {
        /// Block connectivity `θ` (k x k)
        theta_kk: &'a DMatrix<f64>,
    },
    /// `logit P(Y(i,j) = 1) = Γ(q,l) + M(i,j)`
    Logistic {
        /// Block log-odds `Γ` (k x k)
        gamma_kk: &'a DMatrix<f64>,
        /// Covariate linear predictor `M` (n x n)
        mu_nn: &'a DMatrix<f64>,
    },
}

/// The two parts of the bound
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElboTerms {
    /// Expected log-likelihood of the observed dyads
    pub dyads: f64,
    /// `Σ Z ⊙ log π`
    pub prior: f64,
}

impl ElboTerms {
    /// `dyads + prior`
    pub fn total(&self) -> f64 {
        self.dyads + self.prior
    }
}

/// Evidence lower bound for `(net, z_nk)` under `model` and `pi_k`
pub fn elbo(
    net: &SparseNetwork,
    z_nk: &DMatrix<f64>,
    model: EdgeModel<'_>,
    pi_k: &DVector<f64>,
) -> anyhow::Result<f64> {
    Ok(elbo_terms(net, z_nk, model, pi_k)?.total())
}

/// Same as [`elbo`], split into the dyad and prior contributions
pub fn elbo_terms(
    net: &SparseNetwork,
    z_nk: &DMatrix<f64>,
    model: EdgeModel<'_>,
    pi_k: &DVector<f64>,
) -> anyhow::Result<ElboTerms> {
    check_inputs(net, z_nk, &model, pi_k)?;

    let dyads = match model {
        EdgeModel::Bernoulli { theta_kk } => bernoulli_dyads(net, z_nk, theta_kk)?,
        EdgeModel::Logistic { gamma_kk, mu_nn } => {
            let gamma_kk = effective_gamma(net, gamma_kk);
            logistic_dyads(&net.observed_dyads(), z_nk, &gamma_kk, mu_nn)
        }
    };

    let prior = z_nk
        .row_iter()
        .map(|z_k| z_k.iter().zip(pi_k.iter()).map(|(&z, &p)| xlogy(z, p)).sum::<f64>())
        .sum::<f64>();

    Ok(ElboTerms { dyads, prior })
}

/// Block-level Bernoulli log-likelihood of `e` edges among `d` observed
/// dyads. Empty block pairs (`e = d = 0`) contribute nothing, whatever
/// `θ` is.
#[inline]
pub(crate) fn bernoulli_block(e: f64, d: f64, theta: f64) -> f64 {
    xlogy(e, theta) + xlogy((d - e).max(0.0), 1.0 - theta)
}

fn bernoulli_dyads(net: &SparseNetwork, z_nk: &DMatrix<f64>, theta_kk: &DMatrix<f64>) -> anyhow::Result<f64> {
    let e_kk = net.adjacency().sandwich(z_nk)?;
    let d_kk = net.observed().sandwich(z_nk)?;

    let theta_kk = effective_theta(net, theta_kk);
    let total = e_kk
        .iter()
        .zip(d_kk.iter())
        .zip(theta_kk.iter())
        .map(|((&e, &d), &t)| bernoulli_block(e, d, t))
        .sum::<f64>();

    // symmetric storage visits every unordered pair twice
    Ok(if net.is_directed() { total } else { 0.5 * total })
}

/// `Σ_{dyads} Σ_{q,l} Z(i,q) Z(j,l) [y η - softplus(η)]`, `η = Γ(q,l) + M(i,j)`
pub(crate) fn logistic_dyads(
    dyads: &[ObservedDyad],
    z_nk: &DMatrix<f64>,
    gamma_kk: &DMatrix<f64>,
    mu_nn: &DMatrix<f64>,
) -> f64 {
    let kk = z_nk.ncols();
    dyads
        .par_iter()
        .map(|d| {
            let mu = mu_nn[(d.i, d.j)];
            let mut ll = 0.0;
            for l in 0..kk {
                let z_jl = z_nk[(d.j, l)];
                if z_jl == 0.0 {
                    continue;
                }
                for q in 0..kk {
                    let w = z_nk[(d.i, q)] * z_jl;
                    if w > 0.0 {
                        ll += w * logistic_loglik(d.y, gamma_kk[(q, l)] + mu);
                    }
                }
            }
            ll
        })
        .sum()
}

/// Undirected networks only see the symmetric part of `θ`
pub(crate) fn effective_theta(net: &SparseNetwork, theta_kk: &DMatrix<f64>) -> DMatrix<f64> {
    symmetric_part_if_undirected(net, theta_kk)
}

/// Undirected networks only see the symmetric part of `Γ`
pub(crate) fn effective_gamma(net: &SparseNetwork, gamma_kk: &DMatrix<f64>) -> DMatrix<f64> {
    symmetric_part_if_undirected(net, gamma_kk)
}

fn symmetric_part_if_undirected(net: &SparseNetwork, x_kk: &DMatrix<f64>) -> DMatrix<f64> {
    if net.is_directed() {
        x_kk.clone()
    } else {
        (x_kk + x_kk.transpose()) * 0.5
    }
}

/// Shape checks shared by the ELBO and the E-step
pub(crate) fn check_inputs(
    net: &SparseNetwork,
    z_nk: &DMatrix<f64>,
    model: &EdgeModel<'_>,
    pi_k: &DVector<f64>,
) -> anyhow::Result<()> {
    let nn = net.num_nodes();
    let kk = z_nk.ncols();
    net.check_membership(z_nk)?;
    check_len("cluster prior", kk, pi_k.len())?;
    match model {
        EdgeModel::Bernoulli { theta_kk } => {
            check_shape("connectivity matrix", (kk, kk), theta_kk.shape())?;
        }
        EdgeModel::Logistic { gamma_kk, mu_nn } => {
            check_shape("block log-odds", (kk, kk), gamma_kk.shape())?;
            check_shape("covariate linear predictor", (nn, nn), mu_nn.shape())?;
        }
    }
    Ok(())
}
