//! Drives an update rule round-robin over the subsets, and calls observers at
//! cadence boundaries.
//!
//! ```text
//! Initialized --run--> Running --> Completed | Cancelled(reason) | Failed
//! ```
//!
//! One scheduler step is one subset update, and advances the iteration count
//! by one. Observers are called whenever the iteration count is a multiple of
//! the update cadence, and at `max_iteration`. Any observer may stop the run;
//! the observers after it are not called for that iteration. Errors from the
//! update rule or the observers end the run as `Failed`, and are returned to
//! the caller.

use std::time::Instant;

use log::{debug, info};

pub use crate::observer::Outcome;
use crate::{
    Error, Result,
    image::shape_of,
    observer::{notify_all, ControlSignal, IterationState, Observer},
    partition::Subset,
    projector::Projector,
    types::ImageData,
    update::{SubsetCursor, UpdateRule},
    utils::group_digits,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Initialized,
    Running,
    Stopped(Termination),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    Finished(Outcome),
    Failed,
}

/// When to stop and when to look
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Schedule {
    /// `None`: run until an observer stops the run
    pub max_iteration: Option<usize>,
    pub update_cadence: usize,
    /// Evaluate the objective every this many iterations
    pub objective_interval: Option<usize>,
}

impl Schedule {
    fn is_cadence_boundary(&self, iteration: usize) -> bool {
        iteration % self.update_cadence == 0 || Some(iteration) == self.max_iteration
    }
}

pub struct Scheduler<'a, P, R> {
    reconstruction: Reconstruction<P, R>,
    observers: Vec<Box<dyn Observer + 'a>>,
    state: RunState,
}

/// Everything the scheduler drives, as distinct from what watches it
struct Reconstruction<P, R> {
    subsets: Vec<Subset<P>>,
    rule: R,
    image: ImageData,
    cursor: SubsetCursor,
    schedule: Schedule,
    iteration: usize,
    objective: Option<f64>,
}

impl<'a, P: Projector, R: UpdateRule<P>> Scheduler<'a, P, R> {
    pub fn new(subsets: Vec<Subset<P>>, rule: R, initial: ImageData, schedule: Schedule) -> Result<Self> {
        if schedule.update_cadence == 0 { return Err(Error::config("Update cadence must be positive")) }
        if schedule.objective_interval == Some(0) { return Err(Error::config("Objective interval must be positive")) }
        let cursor = SubsetCursor::new(subsets.len())?;
        if let Some(subset) = subsets.iter().find(|s| shape_of(&s.sensitivity) != shape_of(&initial)) {
            return Err(Error::config(format!(
                "Initial image shape {:?} does not match subset {} image shape {:?}",
                shape_of(&initial), subset.id, shape_of(&subset.sensitivity))))
        }
        let reconstruction = Reconstruction {
            subsets, rule, image: initial, cursor, schedule, iteration: 0, objective: None,
        };
        Ok(Self { reconstruction, observers: vec![], state: RunState::Initialized })
    }

    /// Observers are called in the order in which they were added
    pub fn add_observer(&mut self, observer: impl Observer + 'a) { self.observers.push(Box::new(observer)) }

    pub fn with_observer(mut self, observer: impl Observer + 'a) -> Self {
        self.add_observer(observer);
        self
    }

    pub fn image    (&self) -> &ImageData   { &self.reconstruction.image }
    pub fn iteration(&self) -> usize        {  self.reconstruction.iteration }
    pub fn objective(&self) -> Option<f64>  {  self.reconstruction.objective }
    pub fn subsets  (&self) -> &[Subset<P>] { &self.reconstruction.subsets }
    pub fn rule     (&self) -> &R           { &self.reconstruction.rule }
    pub fn state    (&self) -> RunState     {  self.state }
    pub fn into_image(self) -> ImageData    {  self.reconstruction.image }

    /// Run until `max_iteration` is reached, or an observer stops the run. A
    /// scheduler can be run only once.
    pub fn run(&mut self) -> Result<Outcome> {
        if self.state != RunState::Initialized {
            return Err(Error::config(format!("Scheduler cannot be run from state {:?}", self.state)))
        }
        self.state = RunState::Running;
        info!("Running {} subsets, max iteration {}", self.reconstruction.subsets.len(),
              self.reconstruction.schedule.max_iteration.map_or("unbounded".into(), group_digits));
        match self.run_to_end() {
            Ok(outcome) => {
                self.state = RunState::Stopped(Termination::Finished(outcome));
                info!("Run {outcome} after {} iterations", group_digits(self.iteration()));
                Ok(outcome)
            }
            Err(e) => {
                self.state = RunState::Stopped(Termination::Failed);
                Err(e)
            }
        }
    }

    fn run_to_end(&mut self) -> Result<Outcome> {
        let start = Instant::now();
        let run = &mut self.reconstruction;
        if run.schedule.objective_interval.is_some() { run.update_objective()? }
        let outcome = loop {
            if run.schedule.max_iteration.is_some_and(|max| run.iteration >= max) {
                break Outcome::Completed
            }
            run.step()?;
            if run.schedule.is_cadence_boundary(run.iteration) {
                if let ControlSignal::Stop(reason) = notify_all(&mut self.observers, &run.iteration_state(start))? {
                    break Outcome::Cancelled(reason)
                }
            }
        };
        let state = run.iteration_state(start);
        for observer in &mut self.observers {
            observer.on_run_end(&state, outcome)?;
        }
        Ok(outcome)
    }
}

impl<P: Projector, R: UpdateRule<P>> Reconstruction<P, R> {
    /// One subset update, with its epoch and objective bookkeeping
    fn step(&mut self) -> Result<()> {
        let subset = self.cursor.advance();
        self.rule.update(&mut self.image, &self.subsets[subset])?;
        self.iteration += 1;
        if self.cursor.at_epoch_boundary() {
            let completed = self.iteration / self.subsets.len();
            debug!("Epoch {completed} complete");
            self.rule.end_epoch(completed);
        }
        if self.schedule.objective_interval.is_some_and(|n| self.iteration % n == 0) {
            self.update_objective()?;
        }
        Ok(())
    }

    fn update_objective(&mut self) -> Result<()> {
        let objective = self.rule.objective(&self.image, &self.subsets)?;
        debug!("Objective at iteration {}: {objective}", self.iteration);
        self.objective = Some(objective);
        Ok(())
    }

    fn iteration_state(&self, start: Instant) -> IterationState<'_> {
        IterationState {
            iteration: self.iteration,
            max_iteration: self.schedule.max_iteration,
            epoch: self.iteration / self.subsets.len(),
            image: &self.image,
            objective: self.objective,
            logical_time: start.elapsed().as_secs_f64(),
        }
    }
}
