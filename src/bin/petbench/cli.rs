#[derive(clap::Parser, Debug, Clone)]
#[clap(name = "petbench", about = "Evaluate iterative PET reconstruction under a time budget")]
pub struct Cli {

    /// Reconstruction and evaluation settings (TOML). Defaults are used if absent
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Dataset directories to evaluate, in order
    #[clap(short, long = "data", required = true, num_args = 1..)]
    pub datasets: Vec<PathBuf>,

    /// Directory in which each dataset gets its own output subdirectory
    #[clap(short, long, default_value = "output")]
    pub out: PathBuf,

    /// Maximum number of rayon threads
    #[clap(short = 'j', long = "threads", default_value = "4")]
    pub n_threads: usize,

    /// Logging level, overridden by `RUST_LOG`
    #[clap(long, default_value = "info")]
    pub log: log::LevelFilter,
}

// ----- Imports -----------------------------------------------------------------------------------------
use std::path::PathBuf;
