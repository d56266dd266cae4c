//! Relative Difference Prior, the smoothing penalty used by BSREM.

use ndarray::Array3;
use rayon::prelude::*;

use crate::{
    Error, Result,
    image::{self, flat, shape_of},
    index::neighbours,
    types::{ImageData, ImageShape, Intensityf32},
};

/// Penalty strength used when a dataset does not specify one
pub const DEFAULT_PENALTY_STRENGTH: f32 = 1.0 / 700.0;

#[derive(Clone, Debug)]
pub struct RelativeDifferencePrior {
    penalty_strength: f32,
    kappa: ImageData,
    epsilon: f32,
    gamma: f32,
}

impl RelativeDifferencePrior {
    pub const GAMMA: f32 = 2.0;
    /// `epsilon` as a fraction of the initial image's maximum
    pub const EPSILON_FRACTION: f32 = 1e-3;

    /// Prior with the standard `gamma` and an `epsilon` derived from `initial`
    pub fn new(penalty_strength: f32, kappa: ImageData, initial: &ImageData) -> Result<Self> {
        let epsilon = image::max(initial) * Self::EPSILON_FRACTION;
        Self::with_parameters(penalty_strength, kappa, epsilon, Self::GAMMA)
    }

    pub fn with_parameters(penalty_strength: f32, kappa: ImageData, epsilon: f32, gamma: f32) -> Result<Self> {
        if !(penalty_strength >= 0.0 && penalty_strength.is_finite()) {
            return Err(Error::config(format!("Penalty strength must be non-negative, got {penalty_strength}")))
        }
        if !(epsilon > 0.0 && epsilon.is_finite()) {
            return Err(Error::config(format!("Prior epsilon must be positive, got {epsilon}")))
        }
        if !(gamma >= 0.0 && gamma.is_finite()) {
            return Err(Error::config(format!("Prior gamma must be non-negative, got {gamma}")))
        }
        Ok(Self { penalty_strength, kappa, epsilon, gamma })
    }

    pub fn penalty_strength(&self) -> f32 { self.penalty_strength }
    pub fn epsilon         (&self) -> f32 { self.epsilon }

    /// `β/2 Σ_j Σ_k w_jk κ_j κ_k (x_j - x_k)² / (x_j + x_k + γ|x_j - x_k| + ε)`
    pub fn value(&self, image: &ImageData) -> Result<f64> {
        let shape = self.check_shape(image)?;
        let x = flat(image);
        let kappa = flat(&self.kappa);
        let (gamma, epsilon) = (self.gamma as f64, self.epsilon as f64);
        let sum: f64 = (0..x.len()).into_par_iter()
            .map(|j| {
                neighbours(j, shape)
                    .map(|(k, offset)| {
                        let (xj, xk) = (x[j] as f64, x[k] as f64);
                        let d = xj - xk;
                        let denominator = xj + xk + gamma * d.abs() + epsilon;
                        weight(offset) as f64 * (kappa[j] * kappa[k]) as f64 * d * d / denominator
                    })
                    .sum::<f64>()
            })
            .sum();
        Ok(self.penalty_strength as f64 / 2.0 * sum)
    }

    /// `β Σ_k w_jk κ_j κ_k (x_j - x_k)(γ|x_j - x_k| + x_j + 3x_k + 2ε) / (x_j + x_k + γ|x_j - x_k| + ε)²`
    pub fn gradient(&self, image: &ImageData) -> Result<ImageData> {
        let shape = self.check_shape(image)?;
        let x = flat(image);
        let kappa = flat(&self.kappa);
        let gradient: Vec<Intensityf32> = (0..x.len()).into_par_iter()
            .map(|j| {
                let sum: f32 = neighbours(j, shape)
                    .map(|(k, offset)| {
                        let d = x[j] - x[k];
                        let denominator = x[j] + x[k] + self.gamma * d.abs() + self.epsilon;
                        let numerator = d * (self.gamma * d.abs() + x[j] + 3.0 * x[k] + 2.0 * self.epsilon);
                        weight(offset) * kappa[k] * numerator / (denominator * denominator)
                    })
                    .sum();
                self.penalty_strength * kappa[j] * sum
            })
            .collect();
        Ok(Array3::from_shape_vec(shape, gradient)?)
    }

    fn check_shape(&self, image: &ImageData) -> Result<ImageShape> {
        let (shape, kappa) = (shape_of(image), shape_of(&self.kappa));
        if shape != kappa {
            return Err(Error::config(format!("Image shape {shape:?} does not match kappa shape {kappa:?}")))
        }
        Ok(shape)
    }
}

/// Inverse distance between neighbouring voxel centres, in voxel units
fn weight([dz, dy, dx]: [isize; 3]) -> f32 {
    1.0 / ((dz * dz + dy * dy + dx * dx) as f32).sqrt()
}
