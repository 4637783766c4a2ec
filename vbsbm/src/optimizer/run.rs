//! Configured local minimizer over a fixed number of parameters.

use crate::error::{check_len, SbmError};
use crate::optimizer::adapter::{
    ArgminProblem, EvalBudget, EvalTracker, Objective, Params, SolverState, StopRequest,
    StopTolerances, ToleranceObserver,
};
use crate::optimizer::config::{Algorithm, OptimizerConfig, XtolAbs};
use crate::optimizer::status::OptimizerStatus;

use argmin::core::observers::ObserverMode;
use argmin::core::{Executor, Solver, State, TerminationReason, TerminationStatus};
use argmin::solver::conjugategradient::beta::{HestenesStiefel, PolakRibiere, PolakRibierePlus};
use argmin::solver::conjugategradient::NonlinearConjugateGradient;
use argmin::solver::gradientdescent::SteepestDescent;
use argmin::solver::linesearch::{HagerZhangLineSearch, MoreThuenteLineSearch};
use argmin::solver::quasinewton::LBFGS;
use log::{debug, warn};
use std::sync::Mutex;
use std::time::Duration;

type MoreThuenteLS = MoreThuenteLineSearch<Params, Params, f64>;
type HagerZhangLS = HagerZhangLineSearch<Params, Params, f64>;
type LbfgsMoreThuente = LBFGS<MoreThuenteLS, Params, Params, f64>;
type LbfgsHagerZhang = LBFGS<HagerZhangLS, Params, Params, f64>;
type Ncg<B> = NonlinearConjugateGradient<Params, MoreThuenteLS, B, f64>;

/// History length of the full L-BFGS variants
const DEFAULT_LBFGS_MEM: usize = 7;

/// Conjugate-gradient restart period for the `*_RESTART` variants
const NCG_RESTART_ITERS: u64 = 10;

/// Restart when consecutive gradients lose orthogonality beyond this
const NCG_RESTART_ORTHOGONALITY: f64 = 0.1;

/// Result of one [`GradientOptimizer::minimize`] call
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeOutcome {
    /// Why the run stopped
    pub status: OptimizerStatus,
    /// Objective evaluations performed
    pub iterations: usize,
    /// Objective value at the returned parameters
    pub value: f64,
}

/// A local minimizer bound to an algorithm, a parameter dimension and a
/// set of stopping rules.
#[derive(Debug, Clone)]
pub struct GradientOptimizer {
    algorithm: Algorithm,
    dimension: usize,
    xtol_rel: Option<f64>,
    xtol_abs: Option<Vec<f64>>,
    ftol_abs: Option<f64>,
    ftol_rel: Option<f64>,
    maxeval: Option<usize>,
    maxtime: Option<Duration>,
}

impl GradientOptimizer {
    /// Build an optimizer from `config`.
    ///
    /// Fails with [`SbmError::UnsupportedAlgorithm`] for an unknown name,
    /// or [`SbmError::OptimizerConfig`] when an option is invalid (negative
    /// or NaN tolerance, NaN time limit).
    pub fn new(config: &OptimizerConfig, dimension: usize) -> anyhow::Result<Self> {
        let algorithm: Algorithm = config.algorithm.parse()?;

        let mut ret = GradientOptimizer {
            algorithm,
            dimension,
            xtol_rel: None,
            xtol_abs: None,
            ftol_abs: None,
            ftol_rel: None,
            maxeval: None,
            maxtime: None,
        };

        if let Some(tol) = config.xtol_rel {
            ret.xtol_rel = Some(check_tolerance("xtol_rel", tol)?);
        }
        match config.xtol_abs.as_ref() {
            Some(XtolAbs::Uniform(tol)) => ret.set_uniform_xtol_abs(*tol)?,
            Some(XtolAbs::PerParameter(tol)) => ret.set_per_parameter_xtol_abs(tol)?,
            None => {}
        }
        if let Some(tol) = config.ftol_abs {
            ret.ftol_abs = Some(check_tolerance("ftol_abs", tol)?);
        }
        if let Some(tol) = config.ftol_rel {
            ret.ftol_rel = Some(check_tolerance("ftol_rel", tol)?);
        }
        if let Some(maxeval) = config.maxeval {
            ret.maxeval = usize::try_from(maxeval).ok().filter(|&m| m > 0);
        }
        if let Some(maxtime) = config.maxtime {
            if maxtime.is_nan() {
                return Err(SbmError::OptimizerConfig {
                    option: "maxtime",
                    reason: "time limit is NaN".into(),
                }
                .into());
            }
            ret.maxtime = if maxtime > 0.0 {
                Duration::try_from_secs_f64(maxtime).ok()
            } else {
                None
            };
        }

        debug!(
            "{} optimizer over {} parameters, maxeval {:?}, maxtime {:?}",
            ret.algorithm, ret.dimension, ret.maxeval, ret.maxtime
        );
        Ok(ret)
    }

    /// Same absolute tolerance on every parameter
    pub fn set_uniform_xtol_abs(&mut self, tol: f64) -> anyhow::Result<()> {
        let tol = check_tolerance("xtol_abs", tol)?;
        self.xtol_abs = Some(vec![tol; self.dimension]);
        Ok(())
    }

    /// One absolute tolerance per parameter
    pub fn set_per_parameter_xtol_abs(&mut self, tol: &[f64]) -> anyhow::Result<()> {
        check_len("per-parameter xtol_abs", self.dimension, tol.len())?;
        let tol = tol
            .iter()
            .map(|&t| check_tolerance("xtol_abs", t))
            .collect::<anyhow::Result<Vec<_>>>()?;
        self.xtol_abs = Some(tol);
        Ok(())
    }

    /// Configured algorithm
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Number of parameters
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Relative x-tolerance, if set
    pub fn xtol_rel(&self) -> Option<f64> {
        self.xtol_rel
    }

    /// Per-parameter absolute x-tolerance, if set
    pub fn xtol_abs(&self) -> Option<&[f64]> {
        self.xtol_abs.as_deref()
    }

    /// Absolute f-tolerance, if set
    pub fn ftol_abs(&self) -> Option<f64> {
        self.ftol_abs
    }

    /// Relative f-tolerance, if set
    pub fn ftol_rel(&self) -> Option<f64> {
        self.ftol_rel
    }

    /// Evaluation budget; `None` is unlimited
    pub fn maxeval(&self) -> Option<usize> {
        self.maxeval
    }

    /// Wall-clock budget; `None` is unlimited
    pub fn maxtime(&self) -> Option<Duration> {
        self.maxtime
    }

    /// Minimize `objective` starting from `params`, overwriting `params`
    /// with the best point found.
    ///
    /// Hitting a budget or a tolerance is reported through
    /// [`OptimizeOutcome::status`], never as an error. Errors are reserved
    /// for a wrong parameter length and for failures of the objective
    /// itself.
    pub fn minimize<O>(&self, objective: &O, params: &mut [f64]) -> anyhow::Result<OptimizeOutcome>
    where
        O: Objective + Sync,
    {
        check_len("initial parameters", self.dimension, params.len())?;

        let tracker = Mutex::new(EvalTracker::new());
        let budget = EvalBudget {
            maxeval: self.maxeval,
            maxtime: self.maxtime,
        };
        let problem = ArgminProblem::new(objective, budget, &tracker);
        let observer = ToleranceObserver::new(StopTolerances {
            xtol_rel: self.xtol_rel,
            xtol_abs: self.xtol_abs.clone(),
            ftol_abs: self.ftol_abs,
            ftol_rel: self.ftol_rel,
        });
        let x0 = params.to_vec();
        let max_iters = self.maxeval.map(|m| m as u64);

        let run = match self.algorithm {
            Algorithm::LbfgsNocedal => {
                let solver = LbfgsMoreThuente::new(MoreThuenteLS::new(), DEFAULT_LBFGS_MEM);
                run_solver(problem, solver, x0, observer, max_iters)
            }
            Algorithm::Lbfgs => {
                let solver = LbfgsHagerZhang::new(HagerZhangLS::new(), DEFAULT_LBFGS_MEM);
                run_solver(problem, solver, x0, observer, max_iters)
            }
            Algorithm::Var1 => {
                let solver = LbfgsMoreThuente::new(MoreThuenteLS::new(), 1);
                run_solver(problem, solver, x0, observer, max_iters)
            }
            Algorithm::Var2 => {
                let solver = LbfgsMoreThuente::new(MoreThuenteLS::new(), 2);
                run_solver(problem, solver, x0, observer, max_iters)
            }
            Algorithm::TNewton => {
                let solver = Ncg::new(MoreThuenteLS::new(), PolakRibiere::new());
                run_solver(problem, solver, x0, observer, max_iters)
            }
            Algorithm::TNewtonRestart => {
                let solver = Ncg::new(MoreThuenteLS::new(), PolakRibierePlus::new())
                    .restart_iters(NCG_RESTART_ITERS)
                    .restart_orthogonality(NCG_RESTART_ORTHOGONALITY);
                run_solver(problem, solver, x0, observer, max_iters)
            }
            Algorithm::TNewtonPrecond => {
                let solver = Ncg::new(MoreThuenteLS::new(), HestenesStiefel::new());
                run_solver(problem, solver, x0, observer, max_iters)
            }
            Algorithm::TNewtonPrecondRestart => {
                let solver = Ncg::new(MoreThuenteLS::new(), HestenesStiefel::new())
                    .restart_iters(NCG_RESTART_ITERS)
                    .restart_orthogonality(NCG_RESTART_ORTHOGONALITY);
                run_solver(problem, solver, x0, observer, max_iters)
            }
            Algorithm::Mma => {
                let solver = SteepestDescent::new(MoreThuenteLS::new());
                run_solver(problem, solver, x0, observer, max_iters)
            }
            Algorithm::Ccsaq => {
                let solver = SteepestDescent::new(HagerZhangLS::new());
                run_solver(problem, solver, x0, observer, max_iters)
            }
        };

        let mut tracker = tracker
            .into_inner()
            .map_err(|_| anyhow::anyhow!("evaluation tracker lock poisoned"))?;

        if let Some(err) = tracker.take_failure() {
            return Err(err.context(format!("objective failed under {}", self.algorithm)));
        }

        let status = match (tracker.take_stop(), run) {
            (Some(status), _) => status,
            (None, Ok(status)) => status,
            (None, Err(err)) => match err.downcast_ref::<StopRequest>() {
                Some(StopRequest(status)) => *status,
                None => {
                    warn!("{} stopped early: {}", self.algorithm, err);
                    OptimizerStatus::RoundoffLimited
                }
            },
        };

        let value = match tracker.take_best() {
            Some((x_best, f_best)) => {
                params.copy_from_slice(&x_best);
                f_best
            }
            None => f64::NAN,
        };

        debug!(
            "{} finished: {} after {} evaluations, value {}",
            self.algorithm,
            status,
            tracker.evaluations(),
            value
        );

        Ok(OptimizeOutcome {
            status,
            iterations: tracker.evaluations(),
            value,
        })
    }
}

fn check_tolerance(option: &'static str, tol: f64) -> anyhow::Result<f64> {
    if tol.is_nan() || tol < 0.0 {
        return Err(SbmError::OptimizerConfig {
            option,
            reason: format!("tolerance must be non-negative, got {}", tol),
        }
        .into());
    }
    Ok(tol)
}

fn run_solver<'a, O, S>(
    problem: ArgminProblem<'a, O>,
    solver: S,
    x0: Params,
    observer: ToleranceObserver,
    max_iters: Option<u64>,
) -> Result<OptimizerStatus, argmin::core::Error>
where
    O: Objective + Sync,
    S: Solver<ArgminProblem<'a, O>, SolverState> + Send + 'static,
{
    let mut executor = Executor::new(problem, solver)
        .configure(|state| state.param(x0))
        .add_observer(observer, ObserverMode::Always);
    if let Some(max_iters) = max_iters {
        executor = executor.configure(|state| state.max_iters(max_iters));
    }
    let result = executor.run()?;
    Ok(status_of(result.state().get_termination_status()))
}

fn status_of(termination: &TerminationStatus) -> OptimizerStatus {
    match termination {
        TerminationStatus::Terminated(reason) => match reason {
            TerminationReason::SolverConverged => OptimizerStatus::Success,
            TerminationReason::TargetCostReached => OptimizerStatus::StopvalReached,
            TerminationReason::MaxItersReached => OptimizerStatus::MaxEvalReached,
            TerminationReason::Timeout => OptimizerStatus::MaxTimeReached,
            TerminationReason::Interrupt => OptimizerStatus::ForcedStop,
            // solver gave up, e.g. no descent direction left
            _ => OptimizerStatus::RoundoffLimited,
        },
        TerminationStatus::NotTerminated => OptimizerStatus::Failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: &[f64], grad: &mut [f64]) -> anyhow::Result<f64> {
        grad[0] = 2.0 * x[0];
        Ok(x[0] * x[0])
    }

    #[test]
    fn test_minimize_square() {
        let config = OptimizerConfig::new("LBFGS")
            .with_xtol_rel(1e-6)
            .with_xtol_abs(XtolAbs::Uniform(1e-6))
            .with_ftol_abs(1e-6)
            .with_ftol_rel(1e-6)
            .with_maxeval(100)
            .with_maxtime(100.0);
        let opt = GradientOptimizer::new(&config, 1).unwrap();

        assert_eq!(opt.algorithm(), Algorithm::Lbfgs);
        assert_eq!(opt.xtol_rel(), Some(1e-6));
        assert_eq!(opt.xtol_abs(), Some(&[1e-6][..]));
        assert_eq!(opt.ftol_abs(), Some(1e-6));
        assert_eq!(opt.ftol_rel(), Some(1e-6));
        assert_eq!(opt.maxeval(), Some(100));
        assert_eq!(opt.maxtime(), Some(Duration::from_secs(100)));

        let mut x = [42.0];
        let outcome = opt.minimize(&square, &mut x).unwrap();
        assert!(x[0].abs() < 1e-6, "x = {}", x[0]);
        assert!(outcome.value < 1e-12);
        assert!(outcome.iterations >= 1 && outcome.iterations <= 100);
        assert!(outcome.status.code() > 0, "status {}", outcome.status);
    }

    #[test]
    fn test_every_algorithm_descends() {
        let quad = |x: &[f64], grad: &mut [f64]| -> anyhow::Result<f64> {
            grad[0] = 2.0 * (x[0] - 1.0);
            grad[1] = 8.0 * (x[1] + 2.0);
            Ok((x[0] - 1.0).powi(2) + 4.0 * (x[1] + 2.0).powi(2))
        };
        for alg in Algorithm::all() {
            let config = OptimizerConfig::new(alg.name()).with_maxeval(200);
            let opt = GradientOptimizer::new(&config, 2).unwrap();
            let mut x = [5.0, 5.0];
            let outcome = opt.minimize(&quad, &mut x).unwrap();
            assert!(outcome.value < 212.0, "{} did not descend", alg);
            assert!(outcome.iterations <= 200);
        }
    }

    #[test]
    fn test_single_evaluation_budget() {
        let config = OptimizerConfig::new("LBFGS_NOCEDAL").with_maxeval(1);
        let opt = GradientOptimizer::new(&config, 1).unwrap();
        let mut x = [3.0];
        let outcome = opt.minimize(&square, &mut x).unwrap();
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.status, OptimizerStatus::MaxEvalReached);
        assert_eq!(x[0], 3.0);
        assert_eq!(outcome.value, 9.0);
    }

    #[test]
    fn test_single_evaluation_budget_every_algorithm() {
        for alg in Algorithm::all() {
            let config = OptimizerConfig::new(alg.name()).with_maxeval(1);
            let opt = GradientOptimizer::new(&config, 1).unwrap();
            let mut x = [3.0];
            let outcome = opt.minimize(&square, &mut x).unwrap();
            assert_eq!(outcome.status, OptimizerStatus::MaxEvalReached, "{}", alg);
            assert_eq!(outcome.iterations, 1, "{}", alg);
            assert_eq!(x[0], 3.0);
        }
    }

    #[test]
    fn test_time_budget() {
        let slow = |x: &[f64], grad: &mut [f64]| -> anyhow::Result<f64> {
            std::thread::sleep(Duration::from_millis(20));
            square(x, grad)
        };
        for name in ["LBFGS_NOCEDAL", "LBFGS", "TNEWTON", "MMA"] {
            let config = OptimizerConfig::new(name).with_maxtime(0.005);
            let opt = GradientOptimizer::new(&config, 1).unwrap();
            assert_eq!(opt.maxtime(), Some(Duration::from_millis(5)));
            let mut x = [3.0];
            let outcome = opt.minimize(&slow, &mut x).unwrap();
            assert_eq!(outcome.status, OptimizerStatus::MaxTimeReached, "{}", name);
            assert!(outcome.iterations <= 1, "{}", name);
        }
    }

    #[test]
    fn test_rejects_bad_options() {
        let err = GradientOptimizer::new(&OptimizerConfig::new("UNKNOWN"), 1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SbmError>(),
            Some(SbmError::UnsupportedAlgorithm { .. })
        ));

        let config = OptimizerConfig::new("MMA").with_ftol_rel(-1.0);
        let err = GradientOptimizer::new(&config, 1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SbmError>(),
            Some(SbmError::OptimizerConfig { option: "ftol_rel", .. })
        ));

        let config = OptimizerConfig::new("MMA").with_xtol_rel(f64::NAN);
        assert!(GradientOptimizer::new(&config, 1).is_err());

        let config = OptimizerConfig::new("MMA").with_maxtime(f64::NAN);
        assert!(GradientOptimizer::new(&config, 1).is_err());

        let config = OptimizerConfig::new("MMA").with_xtol_abs(XtolAbs::PerParameter(vec![1e-6; 3]));
        let err = GradientOptimizer::new(&config, 2).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SbmError>(),
            Some(SbmError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_non_positive_limits_mean_unlimited() {
        let config = OptimizerConfig::new("VAR1").with_maxeval(0).with_maxtime(-1.0);
        let opt = GradientOptimizer::new(&config, 1).unwrap();
        assert_eq!(opt.maxeval(), None);
        assert_eq!(opt.maxtime(), None);

        let config = OptimizerConfig::new("VAR1").with_maxtime(f64::INFINITY);
        assert_eq!(GradientOptimizer::new(&config, 1).unwrap().maxtime(), None);
    }

    #[test]
    fn test_wrong_parameter_length() {
        let opt = GradientOptimizer::new(&OptimizerConfig::new("LBFGS"), 2).unwrap();
        let mut x = [1.0];
        assert!(opt.minimize(&square, &mut x).is_err());
    }

    #[test]
    fn test_objective_error_propagates() {
        let opt = GradientOptimizer::new(&OptimizerConfig::new("LBFGS"), 1).unwrap();
        let failing = |_: &[f64], _: &mut [f64]| -> anyhow::Result<f64> { anyhow::bail!("no data") };
        let mut x = [1.0];
        let err = opt.minimize(&failing, &mut x).unwrap_err();
        assert!(format!("{:#}", err).contains("no data"));
    }
}
