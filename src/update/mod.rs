//! Per-subset image updates.
//!
//! An `UpdateRule` takes the current image and one subset, and moves the image
//! towards the solution using only that subset's data. Which subset comes next
//! is decided by the scheduler, through a `SubsetCursor`.

mod osem;
mod bsrem;

pub use osem::Osem;
pub use bsrem::{Bsrem, StepSize};

use ndarray::Zip;

use crate::{
    Error, Result,
    partition::Subset,
    projector::Projector,
    types::{ImageData, Intensityf32, SinogramData},
};

/// Added to forward projections before dividing by them
pub const FORWARD_EPSILON: Intensityf32 = 1e-4;

pub trait UpdateRule<P: Projector> {
    /// Update `image` in place, using the data of one subset. On error,
    /// `image` is left unchanged.
    fn update(&mut self, image: &mut ImageData, subset: &Subset<P>) -> Result<()>;

    /// Notification that `completed` full passes over all subsets have been
    /// made
    fn end_epoch(&mut self, _completed: usize) {}

    /// The quantity being maximized, evaluated over all subsets
    fn objective(&self, image: &ImageData, subsets: &[Subset<P>]) -> Result<f64>;
}

/// Round-robin choice of subsets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubsetCursor {
    num_subsets: usize,
    next: usize,
}

impl SubsetCursor {
    pub fn new(num_subsets: usize) -> Result<Self> {
        if num_subsets == 0 { return Err(Error::config("Cannot cycle through zero subsets")) }
        Ok(Self { num_subsets, next: 0 })
    }

    /// Index of the subset to be used next. Advances the cursor.
    pub fn advance(&mut self) -> usize {
        let current = self.next;
        self.next = (self.next + 1) % self.num_subsets;
        current
    }

    /// Has the cursor just wrapped around, completing an epoch?
    pub fn at_epoch_boundary(&self) -> bool { self.next == 0 }
}

/// Poisson log-likelihood `Σ y log(ŷ) - ŷ`, with `ŷ = m (P x + a)`, summed over
/// all subsets
pub fn log_likelihood<P: Projector>(image: &ImageData, subsets: &[Subset<P>]) -> Result<f64> {
    let mut total = 0.0;
    for subset in subsets {
        let forward = subset.projector.forward(image)?;
        Zip::from(&forward).and(&subset.prompts).and(&subset.multiplicative)
            .for_each(|&f, &y, &m| {
                let expected = (m * f) as f64;
                if y > 0.0 { total += y as f64 * expected.ln() }
                total -= expected;
            });
    }
    Ok(total)
}

/// Sensitivity images are divided by: any zero or non-finite voxel would poison
/// the image
fn check_sensitivity<P>(subset: &Subset<P>) -> Result<()> {
    match subset.sensitivity.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
        None => Ok(()),
        Some(bad) => Err(Error::numerical(subset.id, format!("sensitivity image contains {bad}"))),
    }
}

/// `y / (P x + a + ε)`
fn quotient<P: Projector>(image: &ImageData, subset: &Subset<P>) -> Result<SinogramData> {
    let mut quotient = subset.projector.forward(image)?;
    Zip::from(&mut quotient).and(&subset.prompts)
        .for_each(|f, &y| *f = y / (*f + FORWARD_EPSILON));
    if !quotient.iter().all(|q| q.is_finite()) {
        return Err(Error::numerical(subset.id, "non-finite value in measured/expected quotient"))
    }
    Ok(quotient)
}
