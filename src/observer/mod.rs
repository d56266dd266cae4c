//! Things which watch a reconstruction as it progresses, and may stop it.
//!
//! The scheduler calls every registered `Observer` at cadence boundaries. An
//! observer stops the run by returning `ControlSignal::Stop`; stopping is a
//! normal outcome, not an error.

mod progress;
mod save_iters;
mod stats_log;

pub use progress::ProgressObserver;
pub use save_iters::SaveIters;
pub use stats_log::StatsLog;

use std::fmt;

use log::info;

use crate::{Result, types::ImageData};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The time budget is exhausted
    Timeout,
    /// Quality thresholds have been met for long enough
    Converged,
    /// An observer imposed an iteration limit
    MaxIteration,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout      => "timeout",
            Self::Converged    => "converged",
            Self::MaxIteration => "iteration limit",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSignal {
    Continue,
    Stop(StopReason),
}

/// How a run which did not fail came to an end
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// `max_iteration` was reached
    Completed,
    /// An observer stopped the run
    Cancelled(StopReason),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed         => write!(f, "completed"),
            Self::Cancelled(reason) => write!(f, "cancelled ({reason})"),
        }
    }
}

/// What observers get to see of a run
#[derive(Clone, Copy, Debug)]
pub struct IterationState<'a> {
    /// Number of subset updates made so far
    pub iteration: usize,
    /// `None` when the run is unbounded
    pub max_iteration: Option<usize>,
    /// Number of complete passes over all subsets
    pub epoch: usize,
    pub image: &'a ImageData,
    /// Most recently evaluated objective, if any has been
    pub objective: Option<f64>,
    /// Seconds of run time, excluding any time a `TimeoutGovernor` has spent in
    /// the observers it wraps
    pub logical_time: f64,
}

pub trait Observer {
    fn on_iteration(&mut self, state: &IterationState) -> Result<ControlSignal>;

    /// Called once, after the run has stopped without error
    fn on_run_end(&mut self, _state: &IterationState, _outcome: Outcome) -> Result<()> { Ok(()) }
}

impl<O: Observer + ?Sized> Observer for &mut O {
    fn on_iteration(&mut self, state: &IterationState) -> Result<ControlSignal> { (**self).on_iteration(state) }
    fn on_run_end(&mut self, state: &IterationState, outcome: Outcome) -> Result<()> { (**self).on_run_end(state, outcome) }
}

impl<O: Observer + ?Sized> Observer for Box<O> {
    fn on_iteration(&mut self, state: &IterationState) -> Result<ControlSignal> { (**self).on_iteration(state) }
    fn on_run_end(&mut self, state: &IterationState, outcome: Outcome) -> Result<()> { (**self).on_run_end(state, outcome) }
}

/// Call each observer in turn, stopping at the first one which asks to stop
pub fn notify_all<O: Observer>(observers: &mut [O], state: &IterationState) -> Result<ControlSignal> {
    for observer in observers {
        if let stop @ ControlSignal::Stop(_) = observer.on_iteration(state)? {
            return Ok(stop)
        }
    }
    Ok(ControlSignal::Continue)
}

/// Stop once a number of iterations has been reached
#[derive(Clone, Copy, Debug)]
pub struct MaxIteration(pub usize);

impl Observer for MaxIteration {
    fn on_iteration(&mut self, state: &IterationState) -> Result<ControlSignal> {
        Ok(if state.iteration >= self.0 {
            info!("Iteration limit {} reached", self.0);
            ControlSignal::Stop(StopReason::MaxIteration)
        } else {
            ControlSignal::Continue
        })
    }
}
