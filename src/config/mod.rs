//! Run configuration, read from TOML

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, de};

use crate::{Error, Result, image::Plane, partition::Mode};

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    Osem,
    Bsrem,
}

/// Accept either a non-negative integer, or one of `"inf"`/`"infinite"`
/// (mapped to `None`)
fn deserialize_max_iteration<'d, D>(deserializer: D) -> std::result::Result<Option<usize>, D::Error>
where
    D: Deserializer<'d>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Limit { Count(usize), Word(String) }

    match Limit::deserialize(deserializer)? {
        Limit::Count(n) => Ok(Some(n)),
        Limit::Word(w) if matches!(w.as_str(), "inf" | "infinite") => Ok(None),
        Limit::Word(w) => Err(de::Error::custom(
            format!("max_iteration must be an integer, \"inf\" or \"infinite\", got \"{w}\""))),
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {

    #[serde(default)]
    pub algorithm: Algorithm,

    /// Number of subsets into which the views are split
    #[serde(default = "default_subsets")]
    pub num_subsets: usize,

    #[serde(default)]
    pub mode: Mode,

    /// BSREM only
    #[serde(default = "default_step_size")]
    pub initial_step_size: f32,

    /// BSREM only
    #[serde(default = "default_relaxation_eta")]
    pub relaxation_eta: f32,

    /// Observers are called every `update_cadence` iterations
    #[serde(default = "default_cadence")]
    pub update_cadence: usize,

    /// `None` means no limit: run until an observer stops the run
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_max_iteration")]
    pub max_iteration: Option<usize>,

    #[serde(default = "default_time_budget")]
    pub time_budget_seconds: f64,

    /// Consecutive passing quality checks needed to declare convergence
    #[serde(default = "default_hysteresis_window")]
    pub hysteresis_window: usize,

    /// Per-metric overrides of the default thresholds. The key `AEM_VOI`
    /// applies to every VOI metric without a key of its own.
    #[serde(default)]
    pub quality_thresholds: BTreeMap<String, f64>,

    /// Evaluate the objective every this many iterations
    #[serde(default)]
    pub objective_interval: Option<usize>,

    #[serde(default)]
    pub slices: Slices,
}

/// Which slices of the image to report. Central slices when not specified.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Slices {
    pub transverse: Option<usize>,
    pub coronal   : Option<usize>,
    pub sagittal  : Option<usize>,
}

impl Slices {
    pub fn get(&self, plane: Plane) -> Option<usize> {
        match plane {
            Plane::Transverse => self.transverse,
            Plane::Coronal    => self.coronal,
            Plane::Sagittal   => self.sagittal,
        }
    }
}

fn default_subsets()           -> usize {   7  }
fn default_step_size()         -> f32   {   0.3 }
fn default_relaxation_eta()    -> f32   {   0.01 }
fn default_cadence()           -> usize {   3  }
fn default_time_budget()       -> f64   { 600.0 }
fn default_hysteresis_window() -> usize {  10  }

impl Default for Config {
    fn default() -> Self {
        Self {
            algorithm          : Algorithm::default(),
            num_subsets        : default_subsets(),
            mode               : Mode::default(),
            initial_step_size  : default_step_size(),
            relaxation_eta     : default_relaxation_eta(),
            update_cadence     : default_cadence(),
            max_iteration      : None,
            time_budget_seconds: default_time_budget(),
            hysteresis_window  : default_hysteresis_window(),
            quality_thresholds : BTreeMap::new(),
            objective_interval : None,
            slices             : Slices::default(),
        }
    }
}

impl Config {
    /// Check the value ranges which the type system does not
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(Error::config(message));
        if self.num_subsets == 0 { return fail("num_subsets must be positive".into()) }
        if self.update_cadence == 0 { return fail("update_cadence must be positive".into()) }
        if self.hysteresis_window == 0 { return fail("hysteresis_window must be positive".into()) }
        if self.objective_interval == Some(0) { return fail("objective_interval must be positive".into()) }
        if !(self.initial_step_size > 0.0 && self.initial_step_size.is_finite()) {
            return fail(format!("initial_step_size must be positive, got {}", self.initial_step_size))
        }
        if !(self.relaxation_eta >= 0.0 && self.relaxation_eta.is_finite()) {
            return fail(format!("relaxation_eta must be non-negative, got {}", self.relaxation_eta))
        }
        if !(self.time_budget_seconds > 0.0 && self.time_budget_seconds.is_finite()) {
            return fail(format!("time_budget_seconds must be positive, got {}", self.time_budget_seconds))
        }
        if let Some((name, value)) = self.quality_thresholds.iter().find(|(_, v)| !(**v >= 0.0 && v.is_finite())) {
            return fail(format!("quality threshold {name} must be non-negative, got {value}"))
        }
        Ok(())
    }
}

pub fn read_config_file(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("Couldn't read config file `{}`: {e}", path.display())))?;
    let config: Config = toml::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    // ----- Some helpers to make the tests more concise ---------------------------------
    fn parse<'d, D: Deserialize<'d>>(input: &'d str) -> D {
        toml::from_str(input).unwrap()
    }
    fn parse_config(input: &str) -> std::result::Result<Config, toml::de::Error> {
        toml::from_str(input)
    }
    //  ---  Macro for concise assertions about values of parsed fields -------------------
    macro_rules! check {
        ($type:ident($text:expr).$field:ident = $expected:expr) => {
            let config: $type = parse::<$type>($text);
            println!("DESERIALIZED: {config:?}");
            assert_eq!(config.$field, $expected);
        };
        ($type:ident($text:expr) fields: $($field:ident = $expected:expr);+$(;)?) => {
            let config: $type = parse::<$type>($text);
            println!("DESERIALIZED: {config:?}");
            $(assert_eq!(config.$field, $expected);)*
        }
    }
    // ----- An empty file gives the defaults --------------------------------------------
    #[test]
    fn config_defaults() {
        let config: Config = parse("");
        assert_eq!(config, Config::default());
        assert!(config.validate().is_ok());
    }
    // ----- Test deserializing of individual aspects of the Config type ----------------
    #[test]
    fn config_algorithm() {
        check!(Config(r#"algorithm = "osem""#).algorithm = Algorithm::Osem);
        check!(Config(r#"algorithm = "bsrem""#).algorithm = Algorithm::Bsrem);
        assert!(parse_config(r#"algorithm = "mlem""#).is_err());
    }

    #[test]
    fn config_subsets() {
        check!{Config(r#"
                 num_subsets = 4
                 mode = "sequential"
               "#) fields:
               num_subsets = 4;
               mode        = Mode::Sequential;
        }
        check!(Config("num_subsets = 2").mode = Mode::Staggered);
    }

    #[test]
    fn config_max_iteration() {
        check!(Config(r#"max_iteration = 660"#       ).max_iteration = Some(660));
        check!(Config(r#"max_iteration = "inf""#     ).max_iteration = None);
        check!(Config(r#"max_iteration = "infinite""#).max_iteration = None);
        check!(Config(r#"                           "#).max_iteration = None);
        assert!(parse_config(r#"max_iteration = "lots""#).is_err());
        assert!(parse_config(r#"max_iteration = -3"#).is_err());
    }

    #[test]
    fn config_quality_and_slices() {
        check!{Config(r#"
                 hysteresis_window = 4
                 [quality_thresholds]
                 RMSE_whole_object = 0.02
                 AEM_VOI = 0.001
                 [slices]
                 coronal = 7
               "#) fields:
               hysteresis_window = 4;
               quality_thresholds = BTreeMap::from([("RMSE_whole_object".to_string(), 0.02),
                                                    ("AEM_VOI".to_string(), 0.001)]);
               slices = Slices { transverse: None, coronal: Some(7), sagittal: None };
        }
    }
    // ----- Make sure that unknown fields are not accepted -----------------------------
    #[test]
    fn config_reject_unknown_field() {
        assert!(parse_config("unknown_field = 666").is_err());
        assert!(parse_config("[slices]\naxial = 2").is_err());
    }
    // ----- Ranges are checked after parsing ---------------------------------------------
    #[test]
    fn config_validation() {
        let invalid = [
            "num_subsets = 0",
            "update_cadence = 0",
            "hysteresis_window = 0",
            "objective_interval = 0",
            "initial_step_size = 0.0",
            "relaxation_eta = -0.1",
            "time_budget_seconds = 0",
            "[quality_thresholds]\nRMSE_background = -1.0",
        ];
        for text in invalid {
            let config = parse_config(text).unwrap();
            assert!(matches!(config.validate(), Err(Error::Configuration(_))), "accepted: {text}");
        }
    }
    // ----- Test an on-disk config file --------------------------------------------------
    #[test]
    fn read_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("run.toml");
        fs::write(&path, "algorithm = \"bsrem\"\nnum_subsets = 3\ntime_budget_seconds = 30\n")?;
        let config = read_config_file(&path)?;
        assert_eq!(config.algorithm, Algorithm::Bsrem);
        assert_eq!(config.num_subsets, 3);
        assert_eq!(config.time_budget_seconds, 30.0);

        fs::write(&path, "num_subsets = 0\n")?;
        assert!(read_config_file(&path).is_err());
        assert!(read_config_file(&dir.path().join("missing.toml")).is_err());
        Ok(())
    }
}
