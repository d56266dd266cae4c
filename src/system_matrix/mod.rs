//! Sparse system matrices: the probabilities of a decay in each voxel being
//! detected in each sinogram bin.
//!
//! Rows are stored for the full acquisition, bins ordered `(view, axial,
//! tangential)`, so that the rows belonging to any subset of views can be
//! picked out when setting up a subset projector.

use std::f32::consts::PI;

use crate::{
    Error, Result,
    index::{Index1_u, index3_to_1},
    types::{ImageShape, SinogramShape, Weightf32, Intensityf32},
};

// ----- Storage of system matrix elements. Only one row is relevant at any single time ------
pub type SystemMatrixElement = (Index1_u, Weightf32);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SystemMatrixRow(pub Vec<SystemMatrixElement>);

impl SystemMatrixRow {
    pub fn iter(&self) -> std::slice::Iter<SystemMatrixElement> { self.0.iter() }
    pub fn push(&mut self, element: SystemMatrixElement) { self.0.push(element) }

    /// Sum product of relevant voxels' weights and activities
    #[inline]
    pub fn forward_project(&self, image: &[Intensityf32]) -> Intensityf32 {
        let mut projection = 0.0;
        for (j, w) in self {
            projection += w * image[j]
        }
        projection
    }

    /// Spread `value` over the voxels touched by this row
    #[inline]
    pub fn back_project(&self, backprojection: &mut [Intensityf32], value: Intensityf32) {
        for (j, w) in self {
            backprojection[j] += w * value;
        }
    }
}

impl IntoIterator for SystemMatrixRow {
    type Item = SystemMatrixElement;
    type IntoIter = std::vec::IntoIter<Self::Item>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a SystemMatrixRow {
    type Item = SystemMatrixElement;
    type IntoIter = std::iter::Cloned<std::slice::Iter<'a, Self::Item>>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().cloned()
    }
}

// ----- The full matrix ----------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct SystemMatrix {
    image_shape: ImageShape,
    sinogram_shape: SinogramShape,
    rows: Vec<SystemMatrixRow>,
}

impl SystemMatrix {

    pub fn new(image_shape: ImageShape, sinogram_shape: SinogramShape, rows: Vec<SystemMatrixRow>) -> Result<Self> {
        let n_bins: usize = sinogram_shape.iter().product();
        let n_voxels: usize = image_shape.iter().product();
        if rows.len() != n_bins {
            return Err(Error::config(format!(
                "System matrix has {} rows, but sinogram shape {:?} has {} bins",
                rows.len(), sinogram_shape, n_bins)))
        }
        if let Some((j, _)) = rows.iter().flat_map(SystemMatrixRow::iter).find(|(j, _)| *j >= n_voxels) {
            return Err(Error::config(format!(
                "System matrix refers to voxel {j}, but image shape {image_shape:?} has only {n_voxels}")))
        }
        Ok(Self { image_shape, sinogram_shape, rows })
    }

    /// Every view sees the image summed along y: bin `(v, z, x)` collects the
    /// voxels `(z, *, x)` with unit weight. All views are geometrically
    /// identical, which makes this matrix handy for testing the machinery
    /// around the projector.
    pub fn column_sum(n_views: usize, image_shape: ImageShape) -> Self {
        let [nz, ny, nx] = image_shape;
        let sinogram_shape = [n_views, nz, nx];
        let mut rows = Vec::with_capacity(n_views * nz * nx);
        for _view in 0..n_views {
            for z in 0..nz {
                for x in 0..nx {
                    rows.push(SystemMatrixRow((0..ny).map(|y| (index3_to_1([z, y, x], image_shape), 1.0)).collect()));
                }
            }
        }
        Self { image_shape, sinogram_shape, rows }
    }

    /// Parallel-beam geometry with `n_views` angles evenly spread over `[0,
    /// π)`. Each transverse slice is projected independently (axial position
    /// = slice index). Voxel centres are projected onto the tangential axis
    /// and shared between the two nearest bins by linear interpolation.
    /// Distances are measured in voxel widths, as are tangential bins.
    pub fn pixel_driven(n_views: usize, n_tangential: usize, image_shape: ImageShape) -> Self {
        let [nz, ny, nx] = image_shape;
        let sinogram_shape = [n_views, nz, n_tangential];
        let mut rows = vec![SystemMatrixRow::default(); n_views * nz * n_tangential];
        let bin = |v: usize, z: usize, t: usize| (v * nz + z) * n_tangential + t;
        let half = |n: usize| n as f32 / 2.0;
        for v in 0..n_views {
            let (sin, cos) = (PI * v as f32 / n_views as f32).sin_cos();
            for z in 0..nz {
                for y in 0..ny {
                    for x in 0..nx {
                        let cx = x as f32 + 0.5 - half(nx);
                        let cy = y as f32 + 0.5 - half(ny);
                        // Continuous tangential bin coordinate, 0 at the centre of the first bin
                        let u = cx * cos + cy * sin + half(n_tangential) - 0.5;
                        let lo = u.floor();
                        let frac = u - lo;
                        let voxel = index3_to_1([z, y, x], image_shape);
                        for (t, w) in [(lo as isize, 1.0 - frac), (lo as isize + 1, frac)] {
                            if w > 0.0 && t >= 0 && (t as usize) < n_tangential {
                                rows[bin(v, z, t as usize)].push((voxel, w));
                            }
                        }
                    }
                }
            }
        }
        Self { image_shape, sinogram_shape, rows }
    }

    pub fn image_shape   (&self) -> ImageShape    { self.image_shape }
    pub fn sinogram_shape(&self) -> SinogramShape { self.sinogram_shape }
    pub fn num_views     (&self) -> usize         { self.sinogram_shape[0] }

    /// The rows of all bins in one view
    pub fn view(&self, v: usize) -> &[SystemMatrixRow] {
        let [_, na, nt] = self.sinogram_shape;
        let per_view = na * nt;
        &self.rows[v * per_view..(v + 1) * per_view]
    }
}
