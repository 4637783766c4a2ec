//! Variational EM engine for the Bernoulli stochastic block model, with
//! optional dyadic covariates.
//!
//! The crate exposes the three pure operations an outer EM loop
//! alternates until the bound stops improving:
//!
//! * [`e_step`] updates the soft memberships `Z` for fixed parameters;
//! * [`m_step`] / [`m_step_covariates`] update the parameters for fixed `Z`;
//! * [`elbo`] evaluates the variational lower bound.
//!
//! Each operation comes in four variants, picked by the network
//! [`Direction`] and the [`EdgeModel`]: plain block probabilities `θ`, or
//! block log-odds `Γ` shifted by a per-dyad linear predictor
//! `M(i,j) = β · X(i,j,·)`.
//!
//! # Model
//!
//! ```text
//! Y(i,j) | z_i = q, z_j = l ~ Bernoulli(θ(q,l))              (no covariates)
//! logit P(Y(i,j) = 1 | q, l) = Γ(q,l) + β · X(i,j,·)          (covariates)
//! ```
//!
//! only for the dyads marked as observed in `R`.

#![deny(missing_docs)]

/// Error kinds
pub mod error;

/// Stable scalar link functions
pub mod numeric;

/// Canonical sparse network and dyadic covariates
pub mod network;

/// Packing typed parameter blocks into one flat vector
pub mod packing;

/// String-configured gradient-based minimizer
pub mod optimizer;

/// Evidence lower bound
pub mod elbo;

/// Parameter updates
pub mod mstep;

/// Membership updates
pub mod estep;


pub use elbo::{elbo, elbo_terms, EdgeModel, ElboTerms};
pub use error::SbmError;
pub use estep::e_step;
pub use mstep::{
    m_step, m_step_covariates, BlockEstimate, CovariateEstimate, CovariateObjective,
    CovariateParams,
};
pub use network::{Direction, DyadCovariates, ObservedDyad, SparseNetwork};
pub use optimizer::{
    Algorithm, GradientOptimizer, Objective, OptimizeOutcome, OptimizerConfig, OptimizerStatus,
    XtolAbs,
};
pub use packing::{BlockShape, PackLayout};
