use log::debug;

use crate::{
    Result,
    config::Slices,
    image::{self, Plane},
    sink::SharedSink,
    types::{ImageData, Intensityf32},
};

use super::{ControlSignal, IterationState, Observer};

/// Reports the objective, the relative change of the image since the previous
/// call, and three orthogonal slices through the image
pub struct StatsLog {
    sink: SharedSink,
    slices: Slices,
    vmax: Option<Intensityf32>,
    previous: Option<ImageData>,
}

impl StatsLog {
    pub fn new(sink: SharedSink, slices: Slices) -> Self {
        Self { sink, slices, vmax: None, previous: None }
    }

    /// Fix the scale of the slices, instead of using the maximum of the first
    /// image seen
    pub fn with_vmax(self, vmax: Intensityf32) -> Self { Self { vmax: Some(vmax), ..self } }
}

impl Observer for StatsLog {
    fn on_iteration(&mut self, state: &IterationState) -> Result<ControlSignal> {
        debug!("logging iter {} ...", state.iteration);
        let IterationState { iteration, image, logical_time, .. } = *state;
        let mut sink = self.sink.borrow_mut();
        if let Some(objective) = state.objective {
            sink.scalar("objective", objective, iteration, logical_time)?;
        }
        if let Some(previous) = &self.previous {
            let norm = image::norm(image);
            // Undefined for an empty image
            if norm > 0.0 {
                let change = image::distance(image, previous) / norm;
                sink.scalar("normalised_change", change, iteration, logical_time)?;
            }
        }
        self.previous = Some(image.clone());

        let vmax = *self.vmax.get_or_insert_with(|| image::max(image));
        for plane in Plane::ALL {
            let index = self.slices.get(plane).unwrap_or_else(|| plane.middle(image));
            if let Some(slice) = plane.slice(image, index) {
                sink.image(plane.name(), image::clipped(slice, vmax).view(), iteration)?;
            }
        }
        debug!("... logged");
        Ok(ControlSignal::Continue)
    }
}
