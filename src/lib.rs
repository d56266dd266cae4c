mod exports;
pub use exports::*;

pub mod error;
pub mod types;
pub mod index;
pub mod image;
pub mod io;
pub mod utils;
pub mod config;
pub mod system_matrix;
pub mod projector;
pub mod partition;
pub mod prior;
pub mod update;
pub mod observer;
pub mod scheduler;
pub mod monitor;
pub mod governor;
pub mod sink;
pub mod dataset;
pub mod harness;
