use log::debug;
use ndarray::Zip;

use crate::{
    Error, Result,
    image::{self, shape_of},
    partition::Subset,
    prior::RelativeDifferencePrior,
    projector::Projector,
    types::{ImageData, MaskData},
};

use super::{UpdateRule, check_sensitivity, log_likelihood, quotient};

/// Relaxation schedule for BSREM: `initial / (1 + η · epoch)`.
///
/// Only ever changes at epoch boundaries. Never increases, and never reaches
/// zero.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepSize {
    initial: f32,
    relaxation_eta: f32,
    current: f32,
}

impl StepSize {
    pub fn new(initial: f32, relaxation_eta: f32) -> Result<Self> {
        if !(initial > 0.0 && initial.is_finite()) {
            return Err(Error::config(format!("Initial step size must be positive, got {initial}")))
        }
        if !(relaxation_eta >= 0.0 && relaxation_eta.is_finite()) {
            return Err(Error::config(format!("Relaxation eta must be non-negative, got {relaxation_eta}")))
        }
        Ok(Self { initial, relaxation_eta, current: initial })
    }

    pub fn current       (&self) -> f32 { self.current }
    pub fn initial       (&self) -> f32 { self.initial }
    pub fn relaxation_eta(&self) -> f32 { self.relaxation_eta }

    /// Step size in force during (zero-based) `epoch`
    pub fn at_epoch(&self, epoch: usize) -> f32 {
        let relaxed = self.initial as f64 / (1.0 + self.relaxation_eta as f64 * epoch as f64);
        (relaxed as f32).max(f32::MIN_POSITIVE)
    }

    /// Move to the step size of the epoch following `completed` full epochs
    pub fn advance(&mut self, completed: usize) { self.current = self.at_epoch(completed).min(self.current) }

    pub fn reset(&mut self) { self.current = self.initial }
}

/// Block Sequential Regularized Expectation Maximization: preconditioned,
/// relaxed gradient ascent on the penalized log-likelihood, one subset at a
/// time.
///
/// `Δ = (x + ε) · g / s̄ · step`, with `g` the subset's share of the penalized
/// gradient and `s̄` the mean sensitivity over subsets, then `x ← max(x + Δ, 0)`.
#[derive(Clone, Debug)]
pub struct Bsrem {
    step: StepSize,
    prior: Option<RelativeDifferencePrior>,
    num_subsets: usize,
    epsilon: f32,
    average_sensitivity: ImageData,
    update_filter: Option<MaskData>,
}

impl Bsrem {
    /// Preconditioner offset as a fraction of the initial image's maximum
    pub const EPSILON_FRACTION: f32 = 1e-3;
    /// Floor added to the average sensitivity, as a fraction of its maximum
    pub const SENSITIVITY_FLOOR: f32 = 1e-4;

    pub fn new<P>(subsets: &[Subset<P>], initial: &ImageData, step: StepSize) -> Result<Self> {
        let Some(first) = subsets.first() else {
            return Err(Error::config("BSREM needs at least one subset"))
        };
        let max = image::max(initial);
        if !(max > 0.0 && max.is_finite()) {
            return Err(Error::config(format!("Initial image must have a positive finite maximum, got {max}")))
        }
        let mut average_sensitivity = ImageData::zeros(first.sensitivity.raw_dim());
        for subset in subsets {
            if subset.sensitivity.dim() != average_sensitivity.dim() {
                return Err(Error::config(format!("Subset {} sensitivity has inconsistent shape", subset.id)))
            }
            average_sensitivity += &subset.sensitivity;
        }
        average_sensitivity /= subsets.len() as f32;
        let floor = image::max(&average_sensitivity) * Self::SENSITIVITY_FLOOR;
        average_sensitivity += floor;
        if !(floor > 0.0 && image::all_finite(&average_sensitivity)) {
            return Err(Error::numerical(first.id, "unusable average sensitivity"))
        }
        let epsilon = max * Self::EPSILON_FRACTION;
        debug!("BSREM: {} subsets, epsilon {epsilon:.3e}, initial step {}", subsets.len(), step.initial());
        Ok(Self { step, prior: None, num_subsets: subsets.len(), epsilon, average_sensitivity, update_filter: None })
    }

    pub fn with_prior(self, prior: RelativeDifferencePrior) -> Self { Self { prior: Some(prior), ..self } }

    /// Restrict updates to the voxels inside `mask`
    pub fn with_update_filter(self, mask: MaskData) -> Result<Self> {
        let (z, y, x) = mask.dim();
        if [z, y, x] != shape_of(&self.average_sensitivity) {
            return Err(Error::config(format!(
                "Update filter shape {:?} does not match image shape {:?}",
                [z, y, x], shape_of(&self.average_sensitivity))))
        }
        Ok(Self { update_filter: Some(mask), ..self })
    }

    pub fn step_size(&self) -> &StepSize { &self.step }
    pub fn epsilon  (&self) -> f32 { self.epsilon }

    /// Gradient of the subset's share of the penalized log-likelihood:
    /// `Pᵀ(y / (P x + a + ε)) - sensitivity - ∇R(x) / num_subsets`
    fn subset_gradient<P: Projector>(&self, image: &ImageData, subset: &Subset<P>) -> Result<ImageData> {
        let mut gradient = subset.projector.backward(&quotient(image, subset)?)?;
        gradient -= &subset.sensitivity;
        if let Some(prior) = &self.prior {
            let share = 1.0 / self.num_subsets as f32;
            gradient.scaled_add(-share, &prior.gradient(image)?);
        }
        Ok(gradient)
    }
}

impl<P: Projector> UpdateRule<P> for Bsrem {
    fn update(&mut self, image: &mut ImageData, subset: &Subset<P>) -> Result<()> {
        check_sensitivity(subset)?;
        let mut next = self.subset_gradient(image, subset)?;
        let (epsilon, step) = (self.epsilon, self.step.current());
        Zip::from(&mut next).and(&*image).and(&self.average_sensitivity)
            .for_each(|g, &x, &s| *g = (x + epsilon) * *g / s * step);
        if let Some(mask) = &self.update_filter {
            Zip::from(&mut next).and(mask).for_each(|delta, &inside| if !inside { *delta = 0.0 });
        }
        Zip::from(&mut next).and(&*image).for_each(|n, &x| *n = (x + *n).max(0.0));
        if !image::all_finite(&next) {
            return Err(Error::numerical(subset.id, "BSREM update produced non-finite voxels"))
        }
        *image = next;
        Ok(())
    }

    fn end_epoch(&mut self, completed: usize) {
        self.step.advance(completed);
        debug!("BSREM step size after epoch {completed}: {}", self.step.current());
    }

    fn objective(&self, image: &ImageData, subsets: &[Subset<P>]) -> Result<f64> {
        let likelihood = log_likelihood(image, subsets)?;
        Ok(match &self.prior {
            Some(prior) => likelihood - prior.value(image)?,
            None        => likelihood,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        partition::{partition, Mode},
        projector::MatrixProjector,
        system_matrix::SystemMatrix,
    };
    use float_eq::assert_float_eq;
    use ndarray::Array3;
    use proptest::prelude::*;
    use rstest::rstest;

    proptest! {
        #[test]
        fn step_size_is_monotone_and_positive(
            initial in 1e-6..1e3_f32,
            eta in 0.0..1e3_f32,
            e1 in 0..100_000_usize,
            gap in 0..100_000_usize,
        ) {
            let step = StepSize::new(initial, eta).unwrap();
            let (a, b) = (step.at_epoch(e1), step.at_epoch(e1 + gap));
            prop_assert!(b <= a);
            prop_assert!(b > 0.0);
            prop_assert!(step.at_epoch(usize::MAX) > 0.0);
        }
    }

    #[rstest(/**/ initial, eta , epoch, expected,
             case(1.0   , 0.1 , 0    , 1.0),
             case(1.0   , 0.1 , 10   , 0.5),
             case(0.3   , 0.0 , 1000 , 0.3),
             case(2.0   , 1.0 , 3    , 0.5),
    )]
    fn step_size_schedule(initial: f32, eta: f32, epoch: usize, expected: f32) {
        assert_float_eq!(StepSize::new(initial, eta).unwrap().at_epoch(epoch), expected, rmax <= 1e-6);
    }

    #[test]
    fn step_size_changes_only_when_told() {
        let mut step = StepSize::new(1.0, 1.0).unwrap();
        assert_eq!(step.current(), 1.0);
        step.advance(1);
        assert_eq!(step.current(), 0.5);
        step.advance(3);
        assert_eq!(step.current(), 0.25);
        // Stale notifications never increase the step
        step.advance(1);
        assert_eq!(step.current(), 0.25);
        step.reset();
        assert_eq!(step.current(), 1.0);
    }

    #[rstest(initial, eta, case(0.0, 0.1), case(-1.0, 0.1), case(1.0, -0.1), case(f32::INFINITY, 0.0))]
    fn bad_step_sizes(initial: f32, eta: f32) {
        assert!(matches!(StepSize::new(initial, eta), Err(Error::Configuration(_))));
    }

    fn voxel_subsets(prompts: f32, n: usize) -> Vec<Subset<MatrixProjector>> {
        let model = SystemMatrix::column_sum(n, [1, 1, 1]);
        let y = Array3::from_elem([n, 1, 1], prompts);
        let zeros = Array3::zeros([n, 1, 1]);
        let mult = Array3::ones([n, 1, 1]);
        partition(&y, &zeros, &mult, n, Mode::Staggered, &model, &Array3::ones([1, 1, 1])).unwrap()
    }

    #[test]
    fn single_voxel_step() {
        let subsets = voxel_subsets(10.0, 1);
        let initial = Array3::from_elem([1, 1, 1], 4.0);
        let mut bsrem = Bsrem::new(&subsets, &initial, StepSize::new(1.0, 0.1).unwrap()).unwrap();
        let mut image = initial.clone();
        bsrem.update(&mut image, &subsets[0]).unwrap();

        let s = subsets[0].sensitivity[[0, 0, 0]];
        let average = s * (1.0 + Bsrem::SENSITIVITY_FLOOR);
        let gradient = 10.0 / (4.0 + 1e-4) - s;
        let expected = 4.0 + (4.0 + 0.004) * gradient / average;
        assert_float_eq!(image[[0, 0, 0]], expected, rmax <= 1e-5);
        assert_float_eq!(bsrem.epsilon(), 0.004, rmax <= 1e-6);
    }

    #[test]
    fn converges_on_single_voxel() {
        let subsets = voxel_subsets(10.0, 2);
        let initial = Array3::from_elem([1, 1, 1], 1.0);
        let mut bsrem = Bsrem::new(&subsets, &initial, StepSize::new(0.5, 0.1).unwrap()).unwrap();
        let mut image = initial.clone();
        for epoch in 1..=30 {
            for subset in &subsets { bsrem.update(&mut image, subset).unwrap(); }
            <Bsrem as UpdateRule<MatrixProjector>>::end_epoch(&mut bsrem, epoch);
        }
        // Two views of the same voxel, each measuring 10
        assert_float_eq!(image[[0, 0, 0]], 10.0, rmax <= 1e-3);
        assert_float_eq!(bsrem.step_size().current(), 0.5 / 4.0, rmax <= 1e-6);
    }

    #[test]
    fn negative_values_are_clipped() {
        let subsets = voxel_subsets(0.0, 1);
        let initial = Array3::from_elem([1, 1, 1], 3.0);
        let mut bsrem = Bsrem::new(&subsets, &initial, StepSize::new(2.0, 0.0).unwrap()).unwrap();
        let mut image = initial.clone();
        bsrem.update(&mut image, &subsets[0]).unwrap();
        assert_eq!(image[[0, 0, 0]], 0.0);
    }

    #[test]
    fn update_filter_freezes_outside_voxels() {
        let image_shape = [1, 2, 2];
        let model = SystemMatrix::column_sum(2, image_shape);
        let y = Array3::from_elem([2, 1, 2], 20.0);
        let zeros = Array3::zeros([2, 1, 2]);
        let mult = Array3::ones([2, 1, 2]);
        let initial = Array3::ones(image_shape);
        let subsets = partition(&y, &zeros, &mult, 2, Mode::Staggered, &model, &initial).unwrap();
        let mut mask = Array3::from_elem(image_shape, true);
        mask[[0, 1, 1]] = false;
        let mut bsrem = Bsrem::new(&subsets, &initial, StepSize::new(1.0, 0.0).unwrap()).unwrap()
            .with_update_filter(mask).unwrap();
        let mut image = initial.clone();
        bsrem.update(&mut image, &subsets[0]).unwrap();
        assert_eq!(image[[0, 1, 1]], 1.0);
        assert!(image[[0, 1, 0]] > 1.0);
        assert!(Bsrem::new(&subsets, &initial, StepSize::new(1.0, 0.0).unwrap()).unwrap()
                .with_update_filter(Array3::from_elem([1, 1, 2], true)).is_err());
    }

    #[test]
    fn prior_is_subtracted_from_objective() {
        let image_shape = [1, 2, 2];
        let model = SystemMatrix::column_sum(2, image_shape);
        let y = Array3::from_shape_fn([2, 1, 2], |(v, _, x)| (3 + v + 4 * x) as f32);
        let a = Array3::from_elem([2, 1, 2], 0.5);
        let mult = Array3::ones([2, 1, 2]);
        let initial = Array3::from_shape_fn(image_shape, |(_, y, x)| (1 + y + 2 * x) as f32);
        let subsets = partition(&y, &a, &mult, 2, Mode::Sequential, &model, &initial).unwrap();
        let prior = RelativeDifferencePrior::new(0.5, Array3::ones(image_shape), &initial).unwrap();
        let plain = Bsrem::new(&subsets, &initial, StepSize::new(1.0, 0.1).unwrap()).unwrap();
        let penalized = plain.clone().with_prior(prior.clone());
        let difference = plain.objective(&initial, &subsets).unwrap() - penalized.objective(&initial, &subsets).unwrap();
        assert_float_eq!(difference, prior.value(&initial).unwrap(), rmax <= 1e-9);
        assert!(difference > 0.0);
    }

    #[test]
    fn zero_sensitivity_is_numerical_error() {
        let mut subsets = voxel_subsets(1.0, 2);
        let initial = Array3::ones([1, 1, 1]);
        let mut bsrem = Bsrem::new(&subsets, &initial, StepSize::new(1.0, 0.1).unwrap()).unwrap();
        subsets[1].sensitivity.fill(0.0);
        let mut image = initial.clone();
        assert!(matches!(bsrem.update(&mut image, &subsets[1]), Err(Error::Numerical { subset: 1, .. })));
        assert_eq!(image, initial);
    }

    #[test]
    fn initial_image_must_be_positive_somewhere() {
        let subsets = voxel_subsets(1.0, 1);
        assert!(Bsrem::new(&subsets, &Array3::zeros([1, 1, 1]), StepSize::new(1.0, 0.1).unwrap()).is_err());
    }
}
