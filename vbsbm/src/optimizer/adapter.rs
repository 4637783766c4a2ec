//! Bridge between an [`Objective`] and `argmin`'s problem / observer
//! traits.
//!
//! `argmin` asks for the cost and the gradient separately. The problem
//! keeps a one-point cache so that both requests at the same parameter
//! cost a single objective evaluation, and it enforces the evaluation
//! and wall-clock budgets before every fresh evaluation. A budget stop is
//! raised as a [`StopRequest`] error, which the runner maps back to a
//! status.

use crate::optimizer::status::OptimizerStatus;

use argmin::core::observers::Observe;
use argmin::core::{CostFunction, Error, Gradient, IterState, State, KV};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Flat parameter and gradient vectors seen by the solvers
pub(crate) type Params = Vec<f64>;

pub(crate) type SolverState = IterState<Params, Params, (), (), (), f64>;

/// Function to minimize
pub trait Objective {
    /// Objective value at `x`; writes the gradient into `grad` (same
    /// length as `x`). An error aborts the whole minimization.
    fn evaluate(&self, x: &[f64], grad: &mut [f64]) -> anyhow::Result<f64>;
}

impl<F> Objective for F
where
    F: Fn(&[f64], &mut [f64]) -> anyhow::Result<f64>,
{
    fn evaluate(&self, x: &[f64], grad: &mut [f64]) -> anyhow::Result<f64> {
        self(x, grad)
    }
}

/// Early termination carried through `argmin` as an error value
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("optimizer stopped: {0}")]
pub(crate) struct StopRequest(pub OptimizerStatus);

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EvalBudget {
    pub maxeval: Option<usize>,
    pub maxtime: Option<Duration>,
}

/// Book-keeping shared by the problem across solver iterations
#[derive(Debug)]
pub(crate) struct EvalTracker {
    started: Instant,
    evaluations: usize,
    last: Option<(Params, f64, Params)>,
    best: Option<(Params, f64)>,
    failure: Option<anyhow::Error>,
    stop: Option<OptimizerStatus>,
}

impl EvalTracker {
    pub fn new() -> Self {
        EvalTracker {
            started: Instant::now(),
            evaluations: 0,
            last: None,
            best: None,
            failure: None,
            stop: None,
        }
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Lowest objective value seen so far and where
    pub fn take_best(&mut self) -> Option<(Params, f64)> {
        self.best.take()
    }

    /// Error raised by the objective itself, if any
    pub fn take_failure(&mut self) -> Option<anyhow::Error> {
        self.failure.take()
    }

    /// First stop raised by an evaluation.
    ///
    /// Solvers may wrap the [`StopRequest`] in their own error (the line
    /// searches report it as a plain exit message), so the runner reads
    /// the status from here instead of the error chain.
    pub fn take_stop(&mut self) -> Option<OptimizerStatus> {
        self.stop.take()
    }

    fn stop_with(&mut self, status: OptimizerStatus) -> Error {
        self.stop.get_or_insert(status);
        StopRequest(status).into()
    }
}

pub(crate) struct ArgminProblem<'a, O: Objective> {
    objective: &'a O,
    budget: EvalBudget,
    tracker: &'a Mutex<EvalTracker>,
}

impl<'a, O: Objective> ArgminProblem<'a, O> {
    pub fn new(objective: &'a O, budget: EvalBudget, tracker: &'a Mutex<EvalTracker>) -> Self {
        ArgminProblem {
            objective,
            budget,
            tracker,
        }
    }

    fn evaluate(&self, x: &[f64]) -> Result<(f64, Params), Error> {
        let mut tracker = self
            .tracker
            .lock()
            .map_err(|_| anyhow::anyhow!("evaluation tracker lock poisoned"))?;

        if let Some((x_last, f_last, g_last)) = tracker.last.as_ref() {
            if x_last.as_slice() == x {
                return Ok((*f_last, g_last.clone()));
            }
        }

        if let Some(maxeval) = self.budget.maxeval {
            if tracker.evaluations >= maxeval {
                return Err(tracker.stop_with(OptimizerStatus::MaxEvalReached));
            }
        }
        if let Some(maxtime) = self.budget.maxtime {
            if tracker.started.elapsed() >= maxtime {
                return Err(tracker.stop_with(OptimizerStatus::MaxTimeReached));
            }
        }

        tracker.evaluations += 1;
        let mut grad = vec![0.0; x.len()];
        let value = match self.objective.evaluate(x, &mut grad) {
            Ok(value) => value,
            Err(err) => {
                tracker.failure = Some(err);
                return Err(tracker.stop_with(OptimizerStatus::ForcedStop));
            }
        };

        if !value.is_finite() || grad.iter().any(|g| !g.is_finite()) {
            return Err(tracker.stop_with(OptimizerStatus::RoundoffLimited));
        }

        if tracker.best.as_ref().map_or(true, |(_, f_best)| value < *f_best) {
            tracker.best = Some((x.to_vec(), value));
        }
        tracker.last = Some((x.to_vec(), value, grad.clone()));
        Ok((value, grad))
    }
}

impl<O: Objective> CostFunction for ArgminProblem<'_, O> {
    type Param = Params;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.evaluate(param)?.0)
    }
}

impl<O: Objective> Gradient for ArgminProblem<'_, O> {
    type Param = Params;
    type Gradient = Params;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, Error> {
        Ok(self.evaluate(param)?.1)
    }
}

/// Stopping tolerances checked between iterations
#[derive(Debug, Clone, Default)]
pub(crate) struct StopTolerances {
    pub xtol_rel: Option<f64>,
    pub xtol_abs: Option<Vec<f64>>,
    pub ftol_abs: Option<f64>,
    pub ftol_rel: Option<f64>,
}

impl StopTolerances {
    /// Compare two consecutive iterates
    pub fn check(&self, x_prev: &[f64], f_prev: f64, x: &[f64], f: f64) -> Option<OptimizerStatus> {
        let df = (f - f_prev).abs();
        if self.ftol_abs.is_some_and(|tol| df < tol) {
            return Some(OptimizerStatus::FtolReached);
        }
        if self.ftol_rel.is_some_and(|tol| relative_stop(f_prev, f, tol)) {
            return Some(OptimizerStatus::FtolReached);
        }

        if let Some(tol) = self.xtol_rel {
            if x.iter().zip(x_prev).all(|(&a, &b)| relative_stop(b, a, tol)) {
                return Some(OptimizerStatus::XtolReached);
            }
        }
        if let Some(tol) = self.xtol_abs.as_ref() {
            let all_small = x
                .iter()
                .zip(x_prev)
                .zip(tol)
                .all(|((a, b), t)| (a - b).abs() < *t);
            if all_small {
                return Some(OptimizerStatus::XtolReached);
            }
        }
        None
    }
}

/// `|new - old| < tol * |new|`, or no change at all under a positive
/// tolerance, so that a value pinned at zero can still stop.
fn relative_stop(old: f64, new: f64, tol: f64) -> bool {
    (new - old).abs() < tol * new.abs() || (tol > 0.0 && new == old)
}

/// Vanishing-gradient threshold
const GRAD_NORM_TOL: f64 = 1.490_116_119_384_765_6e-8;

/// Checks the tolerances on every iteration and stops the executor once
/// one of them is met.
pub(crate) struct ToleranceObserver {
    tolerances: StopTolerances,
    previous: Option<(Params, f64)>,
}

impl ToleranceObserver {
    pub fn new(tolerances: StopTolerances) -> Self {
        ToleranceObserver {
            tolerances,
            previous: None,
        }
    }
}

impl Observe<SolverState> for ToleranceObserver {
    fn observe_iter(&mut self, state: &SolverState, _kv: &KV) -> Result<(), Error> {
        if let Some(grad) = state.get_gradient() {
            let norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
            if norm < GRAD_NORM_TOL {
                return Err(StopRequest(OptimizerStatus::Success).into());
            }
        }

        let Some(x) = state.get_param() else {
            return Ok(());
        };
        let f = state.get_cost();

        if let Some((x_prev, f_prev)) = self.previous.as_ref() {
            if let Some(status) = self.tolerances.check(x_prev, *f_prev, x, f) {
                return Err(StopRequest(status).into());
            }
        }
        self.previous = Some((x.clone(), f));
        Ok(())
    }
}
