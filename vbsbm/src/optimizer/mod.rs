//! Gradient-based local minimization behind a string-named algorithm.
//!
//! ```ignore
//! let config = OptimizerConfig::from_json(r#"{"algorithm": "LBFGS", "xtol_rel": 1e-6}"#)?;
//! let opt = GradientOptimizer::new(&config, 1)?;
//! let mut x = [42.0];
//! let outcome = opt.minimize(&|x: &[f64], g: &mut [f64]| {
//!     g[0] = 2.0 * x[0];
//!     Ok(x[0] * x[0])
//! }, &mut x)?;
//! ```
//!
//! Backend mapping (all solvers come from `argmin`):
//!
//! | name                      | solver                             |
//! |---------------------------|------------------------------------|
//! | `LBFGS_NOCEDAL`           | L-BFGS (m = 7), More-Thuente       |
//! | `LBFGS`                   | L-BFGS (m = 7), Hager-Zhang        |
//! | `VAR1`, `VAR2`            | L-BFGS (m = 1, 2), More-Thuente    |
//! | `TNEWTON`                 | nonlinear CG, Polak-Ribiere        |
//! | `TNEWTON_RESTART`         | nonlinear CG, PR+, with restarts   |
//! | `TNEWTON_PRECOND`         | nonlinear CG, Hestenes-Stiefel     |
//! | `TNEWTON_PRECOND_RESTART` | nonlinear CG, HS, with restarts    |
//! | `MMA`                     | steepest descent, More-Thuente     |
//! | `CCSAQ`                   | steepest descent, Hager-Zhang      |

mod adapter;
mod config;
mod run;
mod status;

pub use adapter::Objective;
pub use config::{Algorithm, OptimizerConfig, XtolAbs};
pub use run::{GradientOptimizer, OptimizeOutcome};
pub use status::OptimizerStatus;
