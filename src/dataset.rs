//! Loading (and writing) evaluation datasets from a directory.
//!
//! ```text
//! <dir>/dataset.toml                 shapes and acquisition geometry
//! <dir>/prompts.raw                  measured counts
//! <dir>/additive_term.raw            background, before multiplicative correction
//! <dir>/mult_factors.raw             multiplicative correction factors
//! <dir>/OSEM_image.raw               initial image
//! <dir>/kappa.raw                    spatially varying prior weights
//! <dir>/penalisation_factor.txt      optional prior strength
//! <dir>/FOV_mask.raw                 optional update filter
//! <dir>/PETRIC/reference_image.raw   optional reference for quality metrics,
//! <dir>/PETRIC/VOI_whole_object.raw    required with a reference
//! <dir>/PETRIC/VOI_background.raw      required with a reference
//! <dir>/PETRIC/VOI_<name>.raw          any number of named VOIs
//! ```
//!
//! All `.raw` files are little-endian `f32`, in row-major order. Masks are
//! non-zero inside.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    Error, Result,
    image::shape_of,
    io::raw,
    monitor::Reference,
    prior::DEFAULT_PENALTY_STRENGTH,
    system_matrix::SystemMatrix,
    types::{ImageData, ImageShape, MaskData, SinogramData, SinogramShape},
};

/// How the acquisition relates to the image
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Geometry {
    /// Every view is the image summed along y
    ColumnSum,
    /// Parallel-beam views at evenly spaced angles
    #[default]
    PixelDriven,
}

/// Contents of `dataset.toml`
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatasetInfo {
    /// `[z, y, x]`
    pub image_shape: ImageShape,
    /// `[views, axial, tangential]`
    pub acquisition_shape: SinogramShape,
    #[serde(default)]
    pub geometry: Geometry,
}

impl DatasetInfo {
    /// The acquisition model described by this dataset
    pub fn system_matrix(&self) -> Result<SystemMatrix> {
        let [nz, _, nx] = self.image_shape;
        let [views, axial, tangential] = self.acquisition_shape;
        if axial != nz {
            return Err(Error::config(format!("Acquisition has {axial} axial positions, image has {nz} slices")))
        }
        Ok(match self.geometry {
            Geometry::ColumnSum => {
                if tangential != nx {
                    return Err(Error::config(format!(
                        "Column-sum geometry needs {nx} tangential positions, acquisition has {tangential}")))
                }
                SystemMatrix::column_sum(views, self.image_shape)
            }
            Geometry::PixelDriven => SystemMatrix::pixel_driven(views, tangential, self.image_shape),
        })
    }
}

pub struct Dataset {
    pub name: String,
    pub info: DatasetInfo,
    pub prompts: SinogramData,
    pub additive: SinogramData,
    pub multiplicative: SinogramData,
    pub initial: ImageData,
    pub kappa: ImageData,
    pub penalty_strength: f32,
    pub fov_mask: Option<MaskData>,
    pub reference: Option<Reference>,
}

const INFO_FILE: &str = "dataset.toml";
const PENALTY_FILE: &str = "penalisation_factor.txt";
const REFERENCE_DIR: &str = "PETRIC";
const VOI_PREFIX: &str = "VOI_";
const WHOLE_OBJECT: &str = "whole_object";
const BACKGROUND: &str = "background";

impl Dataset {
    pub fn load(dir: &Path) -> Result<Self> {
        let name = dir.file_name().map_or_else(|| dir.display().to_string(), |n| n.to_string_lossy().into_owned());
        let info_path = dir.join(INFO_FILE);
        let text = fs::read_to_string(&info_path)
            .map_err(|e| Error::config(format!("Couldn't read `{}`: {e}", info_path.display())))?;
        let info: DatasetInfo = toml::from_str(&text)?;
        let image = |file: &str| raw::read_array3(&dir.join(file), info.image_shape);
        let sinogram = |file: &str| raw::read_array3(&dir.join(file), info.acquisition_shape);

        let penalty_path = dir.join(PENALTY_FILE);
        let penalty_strength = if penalty_path.exists() {
            let text = fs::read_to_string(&penalty_path)?;
            text.trim().parse::<f32>()
                .map_err(|e| Error::config(format!("Bad penalty strength in `{}`: {e}", penalty_path.display())))?
        } else {
            DEFAULT_PENALTY_STRENGTH
        };

        let fov_path = dir.join("FOV_mask.raw");
        let dataset = Self {
            prompts       : sinogram("prompts.raw")?,
            additive      : sinogram("additive_term.raw")?,
            multiplicative: sinogram("mult_factors.raw")?,
            initial       : image("OSEM_image.raw")?,
            kappa         : image("kappa.raw")?,
            penalty_strength,
            fov_mask: if fov_path.exists() { Some(raw::read_mask3(&fov_path, info.image_shape)?) } else { None },
            reference: load_reference(&dir.join(REFERENCE_DIR), info.image_shape)?,
            name,
            info,
        };
        info!("Loaded dataset {}: image {:?}, acquisition {:?}, reference {}", dataset.name,
              info.image_shape, info.acquisition_shape,
              if dataset.reference.is_some() { "present" } else { "absent" });
        Ok(dataset)
    }

    /// Write the dataset in the layout which `load` reads
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(INFO_FILE), toml::to_string(&self.info).map_err(|e| Error::config(e.to_string()))?)?;
        fs::write(dir.join(PENALTY_FILE), format!("{}\n", self.penalty_strength))?;
        raw::write_array(self.prompts       .view(), &dir.join("prompts.raw"))?;
        raw::write_array(self.additive      .view(), &dir.join("additive_term.raw"))?;
        raw::write_array(self.multiplicative.view(), &dir.join("mult_factors.raw"))?;
        raw::write_array(self.initial       .view(), &dir.join("OSEM_image.raw"))?;
        raw::write_array(self.kappa         .view(), &dir.join("kappa.raw"))?;
        if let Some(mask) = &self.fov_mask {
            write_mask(mask, &dir.join("FOV_mask.raw"))?;
        }
        if let Some(Reference { image, whole_object, background, vois }) = &self.reference {
            let dir = dir.join(REFERENCE_DIR);
            fs::create_dir_all(&dir)?;
            raw::write_array(image.view(), &dir.join("reference_image.raw"))?;
            write_mask(whole_object, &voi_path(&dir, WHOLE_OBJECT))?;
            write_mask(background  , &voi_path(&dir, BACKGROUND  ))?;
            for (name, mask) in vois {
                write_mask(mask, &voi_path(&dir, name))?;
            }
        }
        Ok(())
    }

    /// Check that all arrays agree with the declared shapes
    pub fn check_shapes(&self) -> Result<()> {
        let image_shape = self.info.image_shape;
        for (what, image) in [("initial image", &self.initial), ("kappa", &self.kappa)] {
            if shape_of(image) != image_shape {
                return Err(Error::config(format!("{what} shape {:?} differs from {image_shape:?}", shape_of(image))))
            }
        }
        for (what, data) in [("prompts", &self.prompts), ("additive", &self.additive), ("multiplicative", &self.multiplicative)] {
            let (v, a, t) = data.dim();
            if [v, a, t] != self.info.acquisition_shape {
                return Err(Error::config(format!(
                    "{what} shape {:?} differs from {:?}", [v, a, t], self.info.acquisition_shape)))
            }
        }
        Ok(())
    }
}

fn voi_path(dir: &Path, name: &str) -> PathBuf { dir.join(format!("{VOI_PREFIX}{name}.raw")) }

fn write_mask(mask: &MaskData, path: &Path) -> Result<()> {
    Ok(raw::write(mask.iter().map(|&inside| if inside { 1.0 } else { 0.0 }), path)?)
}

/// Reference image and masks, if the dataset has a reference
fn load_reference(dir: &Path, shape: ImageShape) -> Result<Option<Reference>> {
    let reference_path = dir.join("reference_image.raw");
    if !reference_path.exists() {
        debug!("No reference image in {}", dir.display());
        return Ok(None)
    }
    let image = raw::read_array3(&reference_path, shape)?;
    let required_mask = |name: &str| {
        let path = voi_path(dir, name);
        if !path.exists() {
            return Err(Error::config(format!(
                "Reference image present, but mask `{}` is missing", path.display())))
        }
        raw::read_mask3(&path, shape)
    };
    let whole_object = required_mask(WHOLE_OBJECT)?;
    let background   = required_mask(BACKGROUND  )?;

    let mut vois = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(file) = path.file_name().and_then(|f| f.to_str()) else { continue };
        let Some(name) = file.strip_prefix(VOI_PREFIX).and_then(|f| f.strip_suffix(".raw")) else { continue };
        if name == WHOLE_OBJECT || name == BACKGROUND { continue }
        vois.insert(name.to_string(), raw::read_mask3(&path, shape)?);
    }
    debug!("Reference VOIs: {:?}", vois.keys().collect::<Vec<_>>());
    Ok(Some(Reference { image, whole_object, background, vois }))
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::Array3;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    fn small(with_reference: bool) -> Dataset {
        let info = DatasetInfo { image_shape: [1, 2, 3], acquisition_shape: [4, 1, 3], geometry: Geometry::ColumnSum };
        let sinogram = |v: f32| Array3::from_elem([4, 1, 3], v);
        let mask = Array3::from_shape_fn([1, 2, 3], |(_, y, _)| y == 1);
        Dataset {
            name: "small".into(),
            info,
            prompts: Array3::from_shape_fn([4, 1, 3], |(v, _, t)| (v * 3 + t) as f32),
            additive: sinogram(0.5),
            multiplicative: sinogram(1.0),
            initial: Array3::ones([1, 2, 3]),
            kappa: Array3::from_elem([1, 2, 3], 2.0),
            penalty_strength: 0.25,
            fov_mask: Some(mask.clone()),
            reference: with_reference.then(|| Reference {
                image: Array3::from_elem([1, 2, 3], 3.0),
                whole_object: Array3::from_elem([1, 2, 3], true),
                background: mask.clone(),
                vois: BTreeMap::from([("lesion".to_string(), mask.mapv(|m| !m))]),
            }),
        }
    }

    #[test]
    fn saved_dataset_loads() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("small");
        let original = small(true);
        original.save(&path)?;
        let loaded = Dataset::load(&path)?;
        loaded.check_shapes()?;
        assert_eq!(loaded.name, "small");
        assert_eq!(loaded.info, original.info);
        assert_eq!(loaded.prompts, original.prompts);
        assert_eq!(loaded.kappa, original.kappa);
        assert_eq!(loaded.penalty_strength, 0.25);
        assert_eq!(loaded.fov_mask, original.fov_mask);
        let reference = loaded.reference.unwrap();
        assert_eq!(reference.vois.keys().collect::<Vec<_>>(), vec!["lesion"]);
        assert_eq!(reference.background, original.reference.as_ref().unwrap().background);
        Ok(())
    }

    #[test]
    fn optional_parts_may_be_missing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut dataset = small(false);
        dataset.fov_mask = None;
        dataset.save(dir.path())?;
        fs::remove_file(dir.path().join(PENALTY_FILE))?;
        let loaded = Dataset::load(dir.path())?;
        assert!(loaded.reference.is_none());
        assert!(loaded.fov_mask.is_none());
        assert_eq!(loaded.penalty_strength, DEFAULT_PENALTY_STRENGTH);
        Ok(())
    }

    #[test]
    fn reference_without_masks_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        small(true).save(dir.path())?;
        fs::remove_file(voi_path(&dir.path().join(REFERENCE_DIR), BACKGROUND))?;
        assert!(matches!(Dataset::load(dir.path()), Err(Error::Configuration(_))));
        Ok(())
    }

    #[test]
    fn wrong_sized_files_are_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        small(false).save(dir.path())?;
        raw::write([1.0, 2.0].into_iter(), &dir.path().join("kappa.raw"))?;
        assert!(matches!(Dataset::load(dir.path()), Err(Error::Configuration(_))));
        Ok(())
    }

    #[test]
    fn geometry_must_fit_shapes() {
        let info = |geometry, acquisition_shape| DatasetInfo { image_shape: [2, 3, 4], acquisition_shape, geometry };
        assert!(info(Geometry::ColumnSum  , [5, 2, 4]).system_matrix().is_ok());
        assert!(info(Geometry::ColumnSum  , [5, 2, 7]).system_matrix().is_err());
        assert!(info(Geometry::PixelDriven, [5, 2, 7]).system_matrix().is_ok());
        assert!(info(Geometry::PixelDriven, [5, 3, 7]).system_matrix().is_err());
    }
}
