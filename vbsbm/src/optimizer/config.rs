//! Optimizer configuration record and algorithm names.

use crate::error::SbmError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported gradient-based local minimizers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// `LBFGS_NOCEDAL`
    LbfgsNocedal,
    /// `LBFGS`
    Lbfgs,
    /// `VAR1`
    Var1,
    /// `VAR2`
    Var2,
    /// `TNEWTON`
    TNewton,
    /// `TNEWTON_RESTART`
    TNewtonRestart,
    /// `TNEWTON_PRECOND`
    TNewtonPrecond,
    /// `TNEWTON_PRECOND_RESTART`
    TNewtonPrecondRestart,
    /// `MMA`
    Mma,
    /// `CCSAQ`
    Ccsaq,
}

const SUPPORTED_ALGORITHMS: [(&str, Algorithm); 10] = [
    ("LBFGS_NOCEDAL", Algorithm::LbfgsNocedal),
    ("LBFGS", Algorithm::Lbfgs),
    ("VAR1", Algorithm::Var1),
    ("VAR2", Algorithm::Var2),
    ("TNEWTON", Algorithm::TNewton),
    ("TNEWTON_RESTART", Algorithm::TNewtonRestart),
    ("TNEWTON_PRECOND", Algorithm::TNewtonPrecond),
    ("TNEWTON_PRECOND_RESTART", Algorithm::TNewtonPrecondRestart),
    ("MMA", Algorithm::Mma),
    ("CCSAQ", Algorithm::Ccsaq),
];

impl Algorithm {
    /// Configuration name, e.g. `"LBFGS_NOCEDAL"`
    pub fn name(&self) -> &'static str {
        SUPPORTED_ALGORITHMS
            .iter()
            .find(|(_, alg)| alg == self)
            .map(|(name, _)| *name)
            .unwrap_or("UNKNOWN")
    }

    /// Every supported algorithm, in table order
    pub fn all() -> impl Iterator<Item = Algorithm> {
        SUPPORTED_ALGORITHMS.iter().map(|&(_, alg)| alg)
    }

    /// Space-separated list of accepted names
    pub fn supported_names() -> String {
        SUPPORTED_ALGORITHMS
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl FromStr for Algorithm {
    type Err = SbmError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        SUPPORTED_ALGORITHMS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, alg)| alg)
            .ok_or_else(|| SbmError::UnsupportedAlgorithm {
                name: name.to_string(),
                supported: Algorithm::supported_names(),
            })
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Absolute parameter tolerance, shared or one per parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum XtolAbs {
    /// Same tolerance on every parameter
    Uniform(f64),
    /// One tolerance per parameter, in packed order
    PerParameter(Vec<f64>),
}

/// Optimizer knobs. Every field except `algorithm` is optional; a
/// missing field keeps the backend default.
///
/// * `maxeval <= 0` and `maxtime <= 0` mean no limit
/// * `maxtime` is in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// One of [`Algorithm::supported_names`]; checked when the optimizer
    /// is built
    pub algorithm: String,
    /// Stop when every parameter moves by less than `xtol_rel * |x_i|`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xtol_rel: Option<f64>,
    /// Stop when every parameter moves by less than its absolute tolerance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xtol_abs: Option<XtolAbs>,
    /// Stop when the objective moves by less than this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ftol_abs: Option<f64>,
    /// Stop when the objective moves by less than `ftol_rel * |f|`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ftol_rel: Option<f64>,
    /// Objective evaluation budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxeval: Option<i64>,
    /// Wall-clock budget in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxtime: Option<f64>,
}

impl OptimizerConfig {
    /// Config with `algorithm` and every option unset
    pub fn new(algorithm: &str) -> Self {
        OptimizerConfig {
            algorithm: algorithm.to_string(),
            xtol_rel: None,
            xtol_abs: None,
            ftol_abs: None,
            ftol_rel: None,
            maxeval: None,
            maxtime: None,
        }
    }

    /// Parse a JSON object such as
    /// `{"algorithm": "LBFGS", "xtol_rel": 1e-6, "maxeval": 100}`
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize, omitting unset options
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Set `xtol_rel`
    pub fn with_xtol_rel(mut self, tol: f64) -> Self {
        self.xtol_rel = Some(tol);
        self
    }

    /// Set `xtol_abs`
    pub fn with_xtol_abs(mut self, tol: XtolAbs) -> Self {
        self.xtol_abs = Some(tol);
        self
    }

    /// Set `ftol_abs`
    pub fn with_ftol_abs(mut self, tol: f64) -> Self {
        self.ftol_abs = Some(tol);
        self
    }

    /// Set `ftol_rel`
    pub fn with_ftol_rel(mut self, tol: f64) -> Self {
        self.ftol_rel = Some(tol);
        self
    }

    /// Set `maxeval`
    pub fn with_maxeval(mut self, maxeval: i64) -> Self {
        self.maxeval = Some(maxeval);
        self
    }

    /// Set `maxtime` in seconds
    pub fn with_maxtime(mut self, seconds: f64) -> Self {
        self.maxtime = Some(seconds);
        self
    }
}
