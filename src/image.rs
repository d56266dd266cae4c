//! Whole-image helpers used by the update rules and observers.

use std::borrow::Cow;

use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};

use crate::types::{ImageData, ImageShape, MaskData, Intensityf32};
use crate::index::{Index1_u, index1_to_3};

pub fn shape_of(image: &ImageData) -> ImageShape {
    let (z, y, x) = image.dim();
    [z, y, x]
}

/// Largest voxel value (`-inf` for empty images; NaNs are ignored)
pub fn max(image: &ImageData) -> Intensityf32 {
    image.iter().copied().fold(Intensityf32::NEG_INFINITY, Intensityf32::max)
}

pub fn min(image: &ImageData) -> Intensityf32 {
    image.iter().copied().fold(Intensityf32::INFINITY, Intensityf32::min)
}

/// Euclidean norm
pub fn norm(image: &ImageData) -> f64 {
    image.iter().map(|&v| (v as f64).powi(2)).sum::<f64>().sqrt()
}

/// `‖a - b‖`
pub fn distance(a: &ImageData, b: &ImageData) -> f64 {
    let mut sum = 0.0;
    Zip::from(a).and(b).for_each(|&a, &b| sum += ((a - b) as f64).powi(2));
    sum.sqrt()
}

/// Contiguous row-major view of the data, copying only if necessary
pub fn flat(array: &Array3<Intensityf32>) -> Cow<'_, [Intensityf32]> {
    match array.as_slice() {
        Some(slice) => Cow::Borrowed(slice),
        None        => Cow::Owned(array.iter().copied().collect()),
    }
}

pub fn all_finite(image: &ImageData) -> bool { image.iter().all(|v| v.is_finite()) }

/// Flat indices of the voxels lying inside `mask`
pub fn mask_indices(mask: &MaskData) -> Vec<Index1_u> {
    mask.iter().enumerate()
        .filter_map(|(i, &inside)| inside.then_some(i))
        .collect()
}

/// Values of `image` at the given flat indices (flat in logical, row-major
/// order, whatever the memory layout of `image`)
pub fn values_at<'a>(image: &'a ImageData, indices: &'a [Index1_u]) -> impl Iterator<Item = f64> + 'a {
    let shape = shape_of(image);
    indices.iter().map(move |&i| image[index1_to_3(i, shape)] as f64)
}

/// Arithmetic mean of `image` over the given voxels
pub fn mean_at(image: &ImageData, indices: &[Index1_u]) -> Option<f64> {
    if indices.is_empty() { return None }
    Some(values_at(image, indices).sum::<f64>() / indices.len() as f64)
}

/// The three orthogonal planes through an image, for visual inspection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Plane {
    Transverse,
    Coronal,
    Sagittal,
}

impl Plane {
    pub const ALL: [Plane; 3] = [Plane::Transverse, Plane::Coronal, Plane::Sagittal];

    pub fn name(self) -> &'static str {
        match self {
            Plane::Transverse => "transverse",
            Plane::Coronal    => "coronal",
            Plane::Sagittal   => "sagittal",
        }
    }

    fn axis(self) -> Axis {
        match self {
            Plane::Transverse => Axis(0),
            Plane::Coronal    => Axis(1),
            Plane::Sagittal   => Axis(2),
        }
    }

    /// Index of the central slice of `image` in this plane
    pub fn middle(self, image: &ImageData) -> usize { image.len_of(self.axis()) / 2 }

    /// The `index`th slice in this plane. `None` if out of range.
    pub fn slice(self, image: &ImageData, index: usize) -> Option<ArrayView2<'_, Intensityf32>> {
        (index < image.len_of(self.axis())).then(|| image.index_axis(self.axis(), index))
    }
}

/// Scale `slice` by `1 / vmax` and clip to `[0, 1]`
pub fn clipped(slice: ArrayView2<Intensityf32>, vmax: Intensityf32) -> Array2<Intensityf32> {
    let scale = if vmax > 0.0 { 1.0 / vmax } else { 0.0 };
    slice.mapv(|v| (v * scale).clamp(0.0, 1.0))
}
