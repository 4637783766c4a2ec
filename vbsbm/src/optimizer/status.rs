use std::fmt;

/// Why the optimizer stopped. Codes follow the NLopt numbering:
/// positive values are normal stops, negative values are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptimizerStatus {
    /// Vanishing gradient or solver convergence
    Success,
    /// Target objective value reached
    StopvalReached,
    /// `ftol_abs` or `ftol_rel` met
    FtolReached,
    /// `xtol_abs` or `xtol_rel` met
    XtolReached,
    /// Evaluation budget used up
    MaxEvalReached,
    /// Wall-clock budget used up
    MaxTimeReached,
    /// Stopped without a reason
    Failure,
    /// Invalid arguments
    InvalidArgs,
    /// Allocation failure
    OutOfMemory,
    /// No further progress possible, e.g. non-finite values or a failed
    /// line search
    RoundoffLimited,
    /// The objective asked to stop
    ForcedStop,
}

impl OptimizerStatus {
    /// Integer code in the NLopt numbering
    pub fn code(&self) -> i32 {
        match self {
            OptimizerStatus::Success => 1,
            OptimizerStatus::StopvalReached => 2,
            OptimizerStatus::FtolReached => 3,
            OptimizerStatus::XtolReached => 4,
            OptimizerStatus::MaxEvalReached => 5,
            OptimizerStatus::MaxTimeReached => 6,
            OptimizerStatus::Failure => -1,
            OptimizerStatus::InvalidArgs => -2,
            OptimizerStatus::OutOfMemory => -3,
            OptimizerStatus::RoundoffLimited => -4,
            OptimizerStatus::ForcedStop => -5,
        }
    }

    /// A tolerance criterion was met
    pub fn is_converged(&self) -> bool {
        (1..=4).contains(&self.code())
    }

    /// An evaluation or time budget ran out
    pub fn is_budget_exhausted(&self) -> bool {
        matches!(
            self,
            OptimizerStatus::MaxEvalReached | OptimizerStatus::MaxTimeReached
        )
    }
}

impl fmt::Display for OptimizerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptimizerStatus::Success => "SUCCESS",
            OptimizerStatus::StopvalReached => "STOPVAL_REACHED",
            OptimizerStatus::FtolReached => "FTOL_REACHED",
            OptimizerStatus::XtolReached => "XTOL_REACHED",
            OptimizerStatus::MaxEvalReached => "MAXEVAL_REACHED",
            OptimizerStatus::MaxTimeReached => "MAXTIME_REACHED",
            OptimizerStatus::Failure => "FAILURE",
            OptimizerStatus::InvalidArgs => "INVALID_ARGS",
            OptimizerStatus::OutOfMemory => "OUT_OF_MEMORY",
            OptimizerStatus::RoundoffLimited => "ROUNDOFF_LIMITED",
            OptimizerStatus::ForcedStop => "FORCED_STOP",
        };
        write!(f, "{} ({})", name, self.code())
    }
}
