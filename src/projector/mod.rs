//! Forward and backward projection.
//!
//! The reconstruction core only ever sees two things:
//!
//! + `AcquisitionModel`: knows the scanner geometry and can be *set up* for a
//!   particular subset of views, together with that subset's additive term,
//!   against the geometry of the image being reconstructed.
//!
//! + `Projector`: the result of that set-up. Projects images into the subset's
//!   sinogram space and back.
//!
//! # Additive-term convention
//!
//! The expected measurement is `m · (P x + a)`, where `m` are the
//! multiplicative factors and `a` is the additive term *before* multiplicative
//! correction. A `Projector`'s `forward` computes `P x + a` and its `backward`
//! computes `Pᵀ s`; neither applies `m`. With this convention `m` cancels
//! out of the OSEM quotient and out of the log-likelihood gradient, and is
//! needed only for sensitivity images (`Pᵀ m`). A `Projector` which folds
//! `m` into `forward` would break that cancellation.

use ndarray::Array3;
use rayon::prelude::*;

use crate::{
    Error, Result,
    image::{flat, shape_of},
    system_matrix::{SystemMatrix, SystemMatrixRow},
    types::{ImageData, ImageShape, Intensityf32, SinogramData, SinogramShape},
};

/// Projections for one subset of the acquisition
pub trait Projector: Send + Sync {
    fn image_shape(&self) -> ImageShape;
    fn sinogram_shape(&self) -> SinogramShape;

    /// `P x + a`: expected counts (before multiplicative correction)
    fn forward(&self, image: &ImageData) -> Result<SinogramData>;

    /// `Pᵀ s`: adjoint of the linear part of `forward`
    fn backward(&self, sinogram: &SinogramData) -> Result<ImageData>;
}

/// Source of per-subset projectors
pub trait AcquisitionModel {
    type Projector: Projector;

    /// Number of views in the full acquisition
    fn num_views(&self) -> usize;

    /// Create a projector for the given views (in the given order), which adds
    /// `additive` in its forward projection, and works on images shaped like
    /// `template`
    fn set_up(&self, views: &[usize], additive: SinogramData, template: &ImageData) -> Result<Self::Projector>;
}

// ----- Sparse matrix implementation --------------------------------------------------------

/// Projector backed by the rows of a `SystemMatrix` which belong to one subset
/// of views
#[derive(Clone, Debug)]
pub struct MatrixProjector {
    image_shape: ImageShape,
    sinogram_shape: SinogramShape,
    rows: Vec<SystemMatrixRow>,
    additive: SinogramData,
    job_size: usize,
}

impl AcquisitionModel for SystemMatrix {
    type Projector = MatrixProjector;

    fn num_views(&self) -> usize { SystemMatrix::num_views(self) }

    fn set_up(&self, views: &[usize], additive: SinogramData, template: &ImageData) -> Result<MatrixProjector> {
        let image_shape = shape_of(template);
        if image_shape != self.image_shape() {
            return Err(Error::config(format!(
                "Image shape {:?} does not match system matrix image shape {:?}",
                image_shape, self.image_shape())))
        }
        if views.is_empty() {
            return Err(Error::config("Cannot set up a projector without any views"))
        }
        if let Some(v) = views.iter().find(|&&v| v >= self.num_views()) {
            return Err(Error::config(format!("View {v} out of range: acquisition has {} views", self.num_views())))
        }
        let [_, na, nt] = self.sinogram_shape();
        let sinogram_shape = [views.len(), na, nt];
        let (av, aa, at) = additive.dim();
        if [av, aa, at] != sinogram_shape {
            return Err(Error::config(format!(
                "Additive term shape {:?} does not match subset sinogram shape {:?}",
                [av, aa, at], sinogram_shape)))
        }
        let rows: Vec<_> = views.iter().flat_map(|&v| self.view(v).iter().cloned()).collect();
        // Rayon is too eager in spawning small jobs, each of which requires the
        // construction and subsequent combination of expensive accumulators
        // (whole images). So here we try to limit it to one job per thread.
        let job_size = (rows.len() / rayon::current_num_threads()).max(1);
        Ok(MatrixProjector { image_shape, sinogram_shape, rows, additive, job_size })
    }
}

impl Projector for MatrixProjector {
    fn image_shape   (&self) -> ImageShape    { self.image_shape }
    fn sinogram_shape(&self) -> SinogramShape { self.sinogram_shape }

    fn forward(&self, image: &ImageData) -> Result<SinogramData> {
        check_shape("image", shape_of(image), self.image_shape)?;
        let x = flat(image);
        let a = flat(&self.additive);
        let values: Vec<Intensityf32> = self.rows
            .par_iter()
            .zip(a.par_iter())
            .with_min_len(self.job_size)
            .map(|(row, &additive)| row.forward_project(&x) + additive)
            .collect();
        Ok(Array3::from_shape_vec(self.sinogram_shape, values)?)
    }

    fn backward(&self, sinogram: &SinogramData) -> Result<ImageData> {
        let (v, a, t) = sinogram.dim();
        check_shape("sinogram", [v, a, t], self.sinogram_shape)?;
        let n_voxels = self.image_shape.iter().product();
        let s = flat(sinogram);

        // -------- Backproject all bins, one accumulator per rayon job ------
        let backprojection = self.rows
            .par_iter()
            .zip(s.par_iter())
            .with_min_len(self.job_size)
            .fold(|| zeros_buffer(n_voxels), |mut backprojection, (row, &value)| {
                if value != 0.0 { row.back_project(&mut backprojection, value) }
                backprojection
            })
            // Sum the backprojections calculated on each thread
            .reduce(|| zeros_buffer(n_voxels), elementwise_add);

        Ok(Array3::from_shape_vec(self.image_shape, backprojection)?)
    }
}

fn check_shape(what: &str, got: [usize; 3], expected: [usize; 3]) -> Result<()> {
    if got == expected { Ok(()) }
    else { Err(Error::config(format!("Projector expected {what} of shape {expected:?}, got {got:?}"))) }
}

// A new empty data store with matching size
fn zeros_buffer(n: usize) -> Vec<Intensityf32> { vec![0.0; n] }

pub fn elementwise_add(mut a: Vec<Intensityf32>, b: Vec<Intensityf32>) -> Vec<Intensityf32> {
    a.iter_mut().zip(b.iter()).for_each(|(l, r)| *l += r);
    a
}

#[cfg(test)]
mod test {
    use super::*;
    use float_eq::assert_float_eq;
    use ndarray::Array3;
    use proptest::prelude::*;

    fn ramp(shape: [usize; 3]) -> ImageData {
        Array3::from_shape_fn(shape, |(z, y, x)| (1 + z + 2 * y + 3 * x) as f32)
    }

    #[test]
    fn column_sum_forward() -> Result<()> {
        let shape = [2, 3, 4];
        let matrix = SystemMatrix::column_sum(4, shape);
        let additive = Array3::from_elem([2, 2, 4], 0.5);
        let projector = matrix.set_up(&[1, 3], additive, &ramp(shape))?;
        let projection = projector.forward(&ramp(shape))?;
        assert_eq!(projection.dim(), (2, 2, 4));
        for ((_, z, x), &value) in projection.indexed_iter() {
            let expected: f32 = (0..3).map(|y| (1 + z + 2 * y + 3 * x) as f32).sum::<f32>() + 0.5;
            assert_float_eq!(value, expected, abs <= 1e-4);
        }
        Ok(())
    }

    #[test]
    fn column_sum_backward_broadcasts() -> Result<()> {
        let shape = [1, 2, 3];
        let matrix = SystemMatrix::column_sum(2, shape);
        let projector = matrix.set_up(&[0, 1], Array3::zeros([2, 1, 3]), &Array3::zeros(shape))?;
        let ones = Array3::from_elem([2, 1, 3], 1.0);
        let bp = projector.backward(&ones)?;
        assert_eq!(bp, Array3::from_elem(shape, 2.0));
        Ok(())
    }

    #[test]
    fn set_up_rejects_bad_input() {
        let shape = [1, 2, 3];
        let matrix = SystemMatrix::column_sum(2, shape);
        let template = Array3::zeros(shape);
        assert!(matrix.set_up(&[], Array3::zeros([0, 1, 3]), &template).is_err());
        assert!(matrix.set_up(&[2], Array3::zeros([1, 1, 3]), &template).is_err());
        assert!(matrix.set_up(&[0], Array3::zeros([2, 1, 3]), &template).is_err());
        assert!(matrix.set_up(&[0], Array3::zeros([1, 1, 3]), &Array3::zeros([2, 2, 3])).is_err());
    }

    #[test]
    fn wrong_input_shape_is_an_error() -> Result<()> {
        let shape = [1, 2, 3];
        let matrix = SystemMatrix::column_sum(2, shape);
        let projector = matrix.set_up(&[0], Array3::zeros([1, 1, 3]), &Array3::zeros(shape))?;
        assert!(projector.forward (&Array3::zeros([1, 3, 2])).is_err());
        assert!(projector.backward(&Array3::zeros([2, 1, 3])).is_err());
        Ok(())
    }

    // <P x, s> == <x, Pᵀ s>: backward really is the adjoint of forward
    proptest! {
        #[test]
        fn pixel_driven_adjointness(
            x in proptest::collection::vec(0.0..10.0_f32, 2 * 5 * 5),
            s in proptest::collection::vec(0.0..10.0_f32, 3 * 2 * 9),
        ) {
            let shape = [2, 5, 5];
            let matrix = SystemMatrix::pixel_driven(6, 9, shape);
            let views = [0, 2, 4];
            let projector = matrix.set_up(&views, Array3::zeros([3, 2, 9]), &Array3::zeros(shape)).unwrap();
            let x = Array3::from_shape_vec(shape, x).unwrap();
            let s = Array3::from_shape_vec([3, 2, 9], s).unwrap();
            let px  = projector.forward(&x).unwrap();
            let pts = projector.backward(&s).unwrap();
            let lhs: f64 = px.iter().zip(s.iter()).map(|(a, b)| (a * b) as f64).sum();
            let rhs: f64 = x.iter().zip(pts.iter()).map(|(a, b)| (a * b) as f64).sum();
            prop_assert!((lhs - rhs).abs() <= 1e-3 * lhs.abs().max(1.0), "{} != {}", lhs, rhs);
        }
    }
}
