//! Splitting the acquisition into subsets of views.
//!
//! Each `Subset` owns its slice of the data, a projector set up for its views,
//! and its sensitivity image. Sensitivities are computed once, here, and never
//! again: recomputing them mid-run would change the problem being solved.

use log::debug;
use ndarray::Axis;
use serde::Deserialize;

use crate::{
    Error, Result,
    image,
    projector::{AcquisitionModel, Projector},
    types::{ImageData, SinogramData},
};

/// Sensitivity images are raised by this fraction of their maximum, so that
/// they can safely be divided by.
pub const SENSITIVITY_FLOOR: f32 = 1e-6;

/// How views are assigned to subsets
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Contiguous blocks of views
    Sequential,
    /// View `i` goes to subset `i mod num_subsets`
    #[default]
    Staggered,
}

pub struct Subset<P> {
    pub id: usize,
    pub views: Vec<usize>,
    pub prompts: SinogramData,
    pub additive: SinogramData,
    pub multiplicative: SinogramData,
    pub projector: P,
    /// `Pᵀ m`, floored (strictly positive everywhere)
    pub sensitivity: ImageData,
}

/// Which views belong to which subset.
///
/// In sequential mode, when `num_views` is not a multiple of `num_subsets`, the
/// first `num_views % num_subsets` subsets get one view more than the others.
pub fn partition_indices(num_subsets: usize, num_views: usize, mode: Mode) -> Result<Vec<Vec<usize>>> {
    if num_subsets == 0 {
        return Err(Error::config("Number of subsets must be positive"))
    }
    if num_subsets > num_views {
        return Err(Error::config(format!(
            "Cannot split {num_views} views into {num_subsets} non-empty subsets")))
    }
    Ok(match mode {
        Mode::Staggered => (0..num_subsets)
            .map(|i| (i..num_views).step_by(num_subsets).collect())
            .collect(),
        Mode::Sequential => {
            let (size, remainder) = (num_views / num_subsets, num_views % num_subsets);
            let mut start = 0;
            (0..num_subsets)
                .map(|i| {
                    let len = size + usize::from(i < remainder);
                    let block = (start..start + len).collect();
                    start += len;
                    block
                })
                .collect()
        }
    })
}

/// Split the acquisition into `num_subsets` subsets. `prompts`, `additive` and
/// `multiplicative` must all have the same shape, with views along the first
/// axis.
pub fn partition<M: AcquisitionModel>(
    prompts       : &SinogramData,
    additive      : &SinogramData,
    multiplicative: &SinogramData,
    num_subsets   : usize,
    mode          : Mode,
    model         : &M,
    template      : &ImageData,
) -> Result<Vec<Subset<M::Projector>>> {
    if prompts.dim() != additive.dim() || prompts.dim() != multiplicative.dim() {
        return Err(Error::config(format!(
            "Acquisition data shapes differ: prompts {:?}, additive {:?}, multiplicative {:?}",
            prompts.dim(), additive.dim(), multiplicative.dim())))
    }
    let num_views = prompts.len_of(Axis(0));
    if num_views != model.num_views() {
        return Err(Error::config(format!(
            "Acquisition data have {num_views} views, the acquisition model has {}", model.num_views())))
    }

    partition_indices(num_subsets, num_views, mode)?
        .into_iter()
        .enumerate()
        .map(|(id, views)| {
            let select = |data: &SinogramData| data.select(Axis(0), &views);
            let prompts        = select(prompts);
            let additive       = select(additive);
            let multiplicative = select(multiplicative);
            let projector = model.set_up(&views, additive.clone(), template)?;
            let sensitivity = floored(id, projector.backward(&multiplicative)?)?;
            debug!("Subset {id}: {} views, sensitivity max {:.3e}", views.len(), image::max(&sensitivity));
            Ok(Subset { id, views, prompts, additive, multiplicative, projector, sensitivity })
        })
        .collect()
}

/// Raise `sensitivity` by a small fraction of its own maximum, making it
/// strictly positive
fn floored(subset: usize, mut sensitivity: ImageData) -> Result<ImageData> {
    if !image::all_finite(&sensitivity) {
        return Err(Error::numerical(subset, "sensitivity image contains non-finite values"))
    }
    let max = image::max(&sensitivity);
    if max <= 0.0 {
        return Err(Error::numerical(subset, format!("sensitivity image has no positive values (max = {max})")))
    }
    let floor = max * SENSITIVITY_FLOOR;
    sensitivity.mapv_inplace(|s| s.max(0.0) + floor);
    Ok(sensitivity)
}
