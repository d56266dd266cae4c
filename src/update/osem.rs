use ndarray::Zip;

use crate::{
    Error, Result,
    image,
    partition::Subset,
    projector::Projector,
    types::ImageData,
};

use super::{UpdateRule, check_sensitivity, log_likelihood, quotient};

/// Ordered Subsets Expectation Maximization:
///
/// `x ← x · Pᵀ(y / (P x + a + ε)) / sensitivity`
///
/// The multiplicative factors do not appear: they cancel between the forward
/// and backward projections (see the `projector` module).
#[derive(Clone, Copy, Debug, Default)]
pub struct Osem;

impl<P: Projector> UpdateRule<P> for Osem {
    fn update(&mut self, image: &mut ImageData, subset: &Subset<P>) -> Result<()> {
        check_sensitivity(subset)?;
        let mut next = subset.projector.backward(&quotient(image, subset)?)?;
        Zip::from(&mut next).and(&*image).and(&subset.sensitivity)
            .for_each(|n, &x, &s| *n = x * *n / s);
        if !image::all_finite(&next) {
            return Err(Error::numerical(subset.id, "OSEM update produced non-finite voxels"))
        }
        *image = next;
        Ok(())
    }

    fn objective(&self, image: &ImageData, subsets: &[Subset<P>]) -> Result<f64> {
        log_likelihood(image, subsets)
    }
}
