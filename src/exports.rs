pub use crate::error::{Error, Result};

pub use crate::types::{Intensityf32, Weightf32, ImageData, SinogramData, MaskData, ImageShape, SinogramShape};

pub use crate::index::{Index1_u, Index3_u};

pub use crate::observer::{ControlSignal, IterationState, Observer, Outcome, StopReason};
pub use crate::scheduler::{Schedule, Scheduler};
