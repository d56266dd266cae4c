//! Scalar and array types shared across the crate.
//!
//! Voxel and bin values are stored as `f32`. Reductions which feed a metric or
//! objective accumulate in `f64`.

use ndarray::Array3;

pub type Intensityf32 = f32;
pub type Weightf32    = f32;

/// Reconstructed activity, indexed `(z, y, x)`
pub type ImageData = Array3<Intensityf32>;

/// Acquisition data (prompts, additive term, multiplicative factors), indexed
/// `(view, axial, tangential)`
pub type SinogramData = Array3<Intensityf32>;

/// Binary voxel mask, indexed like `ImageData`
pub type MaskData = Array3<bool>;

/// Shape of an image: `[nz, ny, nx]`
pub type ImageShape = [usize; 3];

/// Shape of acquisition data: `[n_views, n_axial, n_tangential]`
pub type SinogramShape = [usize; 3];
