//! Wall-clock budget for a run, which does not charge the run for the time
//! spent in the observers it wraps.
//!
//! The deadline is checked only when the scheduler calls its observers, so a
//! run can overshoot its budget by up to `update_cadence` scheduler steps plus
//! the time taken to reach the check.

use std::time::Instant;

use log::warn;

use crate::{
    Result,
    observer::{notify_all, ControlSignal, IterationState, Observer, Outcome, StopReason},
};

/// Source of time, in seconds since some fixed origin
pub trait Clock {
    fn now(&self) -> f64;
}

#[derive(Clone, Copy, Debug)]
pub struct SystemClock { origin: Instant }

impl Default for SystemClock {
    fn default() -> Self { Self { origin: Instant::now() } }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 { self.origin.elapsed().as_secs_f64() }
}

pub struct TimeoutGovernor<C: Clock = SystemClock> {
    clock: C,
    /// When the budget was last reset
    start: f64,
    /// Deadline, before adjusting for `offset`
    limit: f64,
    /// Accumulated time spent in the wrapped observers
    offset: f64,
    observers: Vec<Box<dyn Observer>>,
}

impl TimeoutGovernor {
    pub fn new(seconds: f64) -> Self { Self::with_clock(seconds, SystemClock::default()) }
}

impl<C: Clock> TimeoutGovernor<C> {
    pub fn with_clock(seconds: f64, clock: C) -> Self {
        let mut governor = Self { clock, start: 0.0, limit: 0.0, offset: 0.0, observers: vec![] };
        governor.reset(seconds);
        governor
    }

    /// Start a fresh budget of `seconds`, from now
    pub fn reset(&mut self, seconds: f64) {
        self.start = self.clock.now();
        self.limit = self.start + seconds;
        self.offset = 0.0;
    }

    pub fn push(&mut self, observer: Box<dyn Observer>) { self.observers.push(observer) }

    pub fn with_observer(mut self, observer: impl Observer + 'static) -> Self {
        self.push(Box::new(observer));
        self
    }

    /// Remove and return all wrapped observers
    pub fn take_observers(&mut self) -> Vec<Box<dyn Observer>> { std::mem::take(&mut self.observers) }

    /// Time excluded from the budget so far
    pub fn offset(&self) -> f64 { self.offset }

    /// Run time charged against the budget so far
    pub fn logical_time(&self) -> f64 { self.clock.now() - self.offset - self.start }

    pub fn timed_out(&self) -> bool { self.clock.now() - self.offset > self.limit }
}

impl<C: Clock> Observer for TimeoutGovernor<C> {
    fn on_iteration(&mut self, state: &IterationState) -> Result<ControlSignal> {
        let now = self.clock.now();
        if now - self.offset > self.limit {
            warn!("Timeout reached at iteration {}. Stopping algorithm.", state.iteration);
            return Ok(ControlSignal::Stop(StopReason::Timeout))
        }
        let inner = IterationState { logical_time: now - self.offset - self.start, ..*state };
        let signal = notify_all(&mut self.observers, &inner);
        self.offset += self.clock.now() - now;
        signal
    }

    fn on_run_end(&mut self, state: &IterationState, outcome: Outcome) -> Result<()> {
        let now = self.clock.now();
        let inner = IterationState { logical_time: now - self.offset - self.start, ..*state };
        let result = self.observers.iter_mut().try_for_each(|observer| observer.on_run_end(&inner, outcome));
        self.offset += self.clock.now() - now;
        result
    }
}
