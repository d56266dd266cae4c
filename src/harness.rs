//! Evaluation of one dataset: partition, reconstruct under a time budget,
//! record quality.

use std::path::Path;

use log::info;

use crate::{
    Result,
    config::{Algorithm, Config},
    dataset::Dataset,
    governor::{Clock, TimeoutGovernor},
    monitor::{QualityMetrics, QualityMonitor, Thresholds},
    observer::{Outcome, ProgressObserver, SaveIters, StatsLog},
    partition::{partition, Subset},
    prior::RelativeDifferencePrior,
    projector::{AcquisitionModel, Projector},
    scheduler::{Schedule, Scheduler},
    sink::{self, JsonLinesSink},
    types::ImageData,
    update::{Bsrem, Osem, StepSize, UpdateRule},
};

/// The update rule chosen by the configuration
pub enum Rule {
    Osem(Osem),
    Bsrem(Bsrem),
}

impl Rule {
    pub fn from_config<P>(config: &Config, dataset: &Dataset, subsets: &[Subset<P>]) -> Result<Self> {
        Ok(match config.algorithm {
            Algorithm::Osem => Rule::Osem(Osem),
            Algorithm::Bsrem => {
                let step = StepSize::new(config.initial_step_size, config.relaxation_eta)?;
                let prior = RelativeDifferencePrior::new(dataset.penalty_strength, dataset.kappa.clone(), &dataset.initial)?;
                let bsrem = Bsrem::new(subsets, &dataset.initial, step)?.with_prior(prior);
                Rule::Bsrem(match &dataset.fov_mask {
                    Some(mask) => bsrem.with_update_filter(mask.clone())?,
                    None       => bsrem,
                })
            }
        })
    }
}

impl<P: Projector> UpdateRule<P> for Rule {
    fn update(&mut self, image: &mut ImageData, subset: &Subset<P>) -> Result<()> {
        match self {
            Rule::Osem (rule) => rule.update(image, subset),
            Rule::Bsrem(rule) => rule.update(image, subset),
        }
    }

    fn end_epoch(&mut self, completed: usize) {
        match self {
            Rule::Osem (rule) => UpdateRule::<P>::end_epoch(rule, completed),
            Rule::Bsrem(rule) => UpdateRule::<P>::end_epoch(rule, completed),
        }
    }

    fn objective(&self, image: &ImageData, subsets: &[Subset<P>]) -> Result<f64> {
        match self {
            Rule::Osem (rule) => rule.objective(image, subsets),
            Rule::Bsrem(rule) => rule.objective(image, subsets),
        }
    }
}

/// Reconstruct `dataset` as `config` says, writing checkpoints and events into
/// `out_dir`.
///
/// The governor's budget is reset here, and the observers it wraps are
/// replaced for the duration of the run: progress display, checkpoints,
/// statistics and, if the dataset has a reference, the quality monitor.
pub fn evaluate<M: AcquisitionModel, C: Clock>(
    dataset : &Dataset,
    model   : &M,
    config  : &Config,
    out_dir : &Path,
    governor: &mut TimeoutGovernor<C>,
) -> Result<Outcome> {
    config.validate()?;
    dataset.check_shapes()?;
    info!("Evaluating {} with {:?}, {} subsets ({:?})",
          dataset.name, config.algorithm, config.num_subsets, config.mode);

    let subsets = partition(&dataset.prompts, &dataset.additive, &dataset.multiplicative,
                            config.num_subsets, config.mode, model, &dataset.initial)?;
    let rule = Rule::from_config(config, dataset, &subsets)?;
    let schedule = Schedule {
        max_iteration: config.max_iteration,
        update_cadence: config.update_cadence,
        objective_interval: config.objective_interval,
    };
    let scheduler = Scheduler::new(subsets, rule, dataset.initial.clone(), schedule)?;

    let sink = sink::shared(JsonLinesSink::create(out_dir)?);
    governor.take_observers();
    governor.push(Box::new(ProgressObserver::new()));
    governor.push(Box::new(SaveIters::new(out_dir)?));
    governor.push(Box::new(StatsLog::new(sink.clone(), config.slices)));
    if let Some(reference) = &dataset.reference {
        let metrics = QualityMetrics::new(reference.clone())?;
        let thresholds = Thresholds::new(config.quality_thresholds.clone());
        governor.push(Box::new(QualityMonitor::new(metrics, thresholds, config.hysteresis_window)?.with_sink(sink)));
    }

    governor.reset(config.time_budget_seconds);
    let result = scheduler.with_observer(&mut *governor).run();
    governor.take_observers();
    let outcome = result?;
    info!("{}: {outcome}", dataset.name);
    Ok(outcome)
}
