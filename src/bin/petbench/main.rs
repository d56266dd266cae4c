mod cli;
use cli::*;

fn main() -> Result<(), Box<dyn Error>> {

    let Cli { config, datasets, out, n_threads, log } = Cli::parse();

    env_logger::Builder::new()
        .filter_level(log)
        .parse_default_env()
        .init();

    let mut progress = Progress::new();

    let config = match &config {
        Some(path) => {
            progress.start(&format!("Reading config from {}", path.display()));
            let config = read_config_file(path)?;
            progress.done();
            config
        }
        None => Config::default(),
    };
    config.validate()?;

    rayon::ThreadPoolBuilder::new().num_threads(n_threads).build_global()?;

    // One governor for the whole session: its budget is reset for each dataset
    let mut governor = TimeoutGovernor::new(config.time_budget_seconds);
    let mut failures = 0;
    for dir in &datasets {
        match evaluate_one(dir, &out, &config, &mut governor, &mut progress) {
            Ok(outcome) => progress.done_with_message(&format!("{}: {outcome}", dir.display())),
            Err(e) => {
                error!("Evaluation of {} failed: {e}", dir.display());
                failures += 1;
            }
        }
    }
    info!("Evaluated {} of {} datasets", datasets.len() - failures, datasets.len());
    if failures > 0 {
        return Err(format!("{failures} dataset(s) failed").into())
    }
    Ok(())
}

fn evaluate_one(
    dir     : &Path,
    out     : &Path,
    config  : &Config,
    governor: &mut TimeoutGovernor,
    progress: &mut Progress,
) -> petbench::Result<Outcome> {
    progress.start(&format!("Loading dataset {}", dir.display()));
    let dataset = Dataset::load(dir)?;
    let model = dataset.info.system_matrix()?;
    progress.done();

    let out_dir = out.join(&dataset.name);
    progress.startln(&format!("Reconstructing {} into {}", dataset.name, out_dir.display()));
    evaluate(&dataset, &model, config, &out_dir, governor)
}

// ----- Imports -----------------------------------------------------------------------------------------
use std::{
    error::Error,
    path::Path,
};

use petbench::{
    Outcome,
    config::{read_config_file, Config},
    dataset::Dataset,
    governor::TimeoutGovernor,
    harness::evaluate,
    utils::timing::Progress,
};

use clap::Parser;
use log::{error, info};
