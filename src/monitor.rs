//! Image quality against a reference, and convergence by sustained quality.
//!
//! Metrics, all normalized by the mean of the reference over the background:
//!
//! + `RMSE_whole_object`, `RMSE_background`: root mean square error over the
//!   whole object and background masks.
//!
//! + `AEM_VOI_<name>`: absolute error of the mean over each named volume of
//!   interest.
//!
//! A check passes when every metric is at or below its threshold. The run is
//! declared converged after `window` consecutive passing checks.

use std::collections::BTreeMap;

use log::{debug, info};

use crate::{
    Error, Result,
    image::{self, mask_indices, shape_of},
    index::Index1_u,
    observer::{ControlSignal, IterationState, Observer, StopReason},
    sink::SharedSink,
    types::{ImageData, MaskData},
};

pub const RMSE_WHOLE_OBJECT: &str = "RMSE_whole_object";
pub const RMSE_BACKGROUND  : &str = "RMSE_background";
pub const AEM_VOI          : &str = "AEM_VOI";

/// Reference image and the masks over which it is compared
#[derive(Clone, Debug)]
pub struct Reference {
    pub image: ImageData,
    pub whole_object: MaskData,
    pub background: MaskData,
    pub vois: BTreeMap<String, MaskData>,
}

pub struct QualityMetrics {
    reference: ImageData,
    whole_object: Vec<Index1_u>,
    background: Vec<Index1_u>,
    /// Sorted by name
    vois: Vec<(String, Vec<Index1_u>)>,
    norm: f64,
}

impl QualityMetrics {
    pub fn new(reference: Reference) -> Result<Self> {
        let Reference { image, whole_object, background, vois } = reference;
        let indices = |name: &str, mask: &MaskData| -> Result<Vec<Index1_u>> {
            let (z, y, x) = mask.dim();
            if [z, y, x] != shape_of(&image) {
                return Err(Error::config(format!(
                    "{name} mask shape {:?} does not match reference image shape {:?}", [z, y, x], shape_of(&image))))
            }
            let indices = mask_indices(mask);
            if indices.is_empty() { return Err(Error::config(format!("{name} mask is empty"))) }
            Ok(indices)
        };
        let whole_object = indices("Whole object", &whole_object)?;
        let background   = indices("Background"  , &background  )?;
        let vois = vois.iter()
            .map(|(name, mask)| -> Result<(String, Vec<Index1_u>)> {
                Ok((name.clone(), indices(&format!("VOI {name}"), mask)?))
            })
            .collect::<Result<Vec<_>>>()?;
        let norm = image::mean_at(&image, &background).unwrap_or(0.0);
        if !(norm > 0.0 && norm.is_finite()) {
            return Err(Error::config(format!("Mean of reference over background must be positive, got {norm}")))
        }
        Ok(Self { reference: image, whole_object, background, vois, norm })
    }

    /// Normalization of all metrics: fixed when the reference is given
    pub fn norm(&self) -> f64 { self.norm }

    /// Names of the metrics, in the order `evaluate` reports them
    pub fn keys(&self) -> Vec<String> {
        [RMSE_WHOLE_OBJECT.to_string(), RMSE_BACKGROUND.to_string()].into_iter()
            .chain(self.vois.iter().map(|(name, _)| voi_key(name)))
            .collect()
    }

    pub fn evaluate(&self, image: &ImageData) -> Result<Vec<(String, f64)>> {
        if shape_of(image) != shape_of(&self.reference) {
            return Err(Error::config(format!(
                "Image shape {:?} does not match reference shape {:?}", shape_of(image), shape_of(&self.reference))))
        }
        let rmse = |indices: &[Index1_u]| {
            let sum: f64 = image::values_at(image, indices)
                .zip(image::values_at(&self.reference, indices))
                .map(|(x, r)| (x - r).powi(2))
                .sum();
            (sum / indices.len() as f64).sqrt() / self.norm
        };
        let aem = |indices: &[Index1_u]| {
            let mean = |image| image::mean_at(image, indices).unwrap_or(f64::NAN);
            (mean(image) - mean(&self.reference)).abs() / self.norm
        };
        Ok([(RMSE_WHOLE_OBJECT.to_string(), rmse(&self.whole_object)),
            (RMSE_BACKGROUND  .to_string(), rmse(&self.background  ))].into_iter()
           .chain(self.vois.iter().map(|(name, indices)| (voi_key(name), aem(indices))))
           .collect())
    }
}

fn voi_key(name: &str) -> String { format!("{AEM_VOI}_{name}") }

/// Per-metric thresholds: explicit overrides, then the `AEM_VOI` catch-all for
/// VOI metrics, then the defaults
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Thresholds(BTreeMap<String, f64>);

impl Thresholds {
    pub const DEFAULT_RMSE: f64 = 0.01;
    pub const DEFAULT_AEM : f64 = 0.005;

    pub fn new(overrides: BTreeMap<String, f64>) -> Self { Self(overrides) }

    pub fn get(&self, metric: &str) -> f64 {
        let is_voi = metric.starts_with(AEM_VOI);
        self.0.get(metric).copied()
            .or_else(|| if is_voi { self.0.get(AEM_VOI).copied() } else { None })
            .unwrap_or(if is_voi { Self::DEFAULT_AEM } else { Self::DEFAULT_RMSE })
    }

    /// Are all metrics at or below their thresholds? NaN never passes.
    pub fn all_pass<'a>(&self, metrics: impl IntoIterator<Item = &'a (String, f64)>) -> bool {
        metrics.into_iter().all(|(name, value)| *value <= self.get(name))
    }
}

/// Counts consecutive passing checks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThresholdState {
    window: usize,
    consecutive: usize,
}

impl ThresholdState {
    pub fn new(window: usize) -> Result<Self> {
        if window == 0 { return Err(Error::config("Hysteresis window must be positive")) }
        Ok(Self { window, consecutive: 0 })
    }

    /// Record the result of a check. Returns whether the window has been filled.
    pub fn record(&mut self, passed: bool) -> bool {
        self.consecutive = if passed { self.consecutive + 1 } else { 0 };
        self.consecutive >= self.window
    }

    pub fn consecutive(&self) -> usize { self.consecutive }
    pub fn reset(&mut self) { self.consecutive = 0 }
}

/// Evaluates the quality metrics, reports them, and stops the run once they
/// have stayed within their thresholds for long enough
pub struct QualityMonitor {
    metrics: QualityMetrics,
    thresholds: Thresholds,
    state: ThresholdState,
    sink: Option<SharedSink>,
}

impl QualityMonitor {
    pub fn new(metrics: QualityMetrics, thresholds: Thresholds, window: usize) -> Result<Self> {
        Ok(Self { metrics, thresholds, state: ThresholdState::new(window)?, sink: None })
    }

    pub fn with_sink(self, sink: SharedSink) -> Self { Self { sink: Some(sink), ..self } }

    pub fn metrics(&self) -> &QualityMetrics { &self.metrics }
    pub fn consecutive_passes(&self) -> usize { self.state.consecutive() }
}

impl Observer for QualityMonitor {
    fn on_iteration(&mut self, state: &IterationState) -> Result<ControlSignal> {
        let values = self.metrics.evaluate(state.image)?;
        if let Some(sink) = &self.sink {
            let mut sink = sink.borrow_mut();
            for (tag, value) in &values {
                sink.scalar(tag, *value, state.iteration, state.logical_time)?;
            }
        }
        let passed = self.thresholds.all_pass(&values);
        debug!("Iteration {}: quality {} ({} consecutive)", state.iteration,
               if passed { "passed" } else { "failed" }, self.state.consecutive() + usize::from(passed));
        Ok(if self.state.record(passed) {
            info!("Quality thresholds met for {} consecutive checks at iteration {}",
                  self.state.consecutive(), state.iteration);
            ControlSignal::Stop(StopReason::Converged)
        } else {
            ControlSignal::Continue
        })
    }
}
