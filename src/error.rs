use thiserror::Error;

/// Everything that can make a reconstruction run fail.
///
/// Early termination (timeout or convergence) is not represented here: it is a
/// normal `Outcome` of a run.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Numerical error in subset {subset}: {reason}")]
    Numerical { subset: usize, reason: String },

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self { Self::Configuration(message.into()) }

    pub fn numerical(subset: usize, reason: impl Into<String>) -> Self {
        Self::Numerical { subset, reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
