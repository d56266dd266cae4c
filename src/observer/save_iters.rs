use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::{Result, io::raw};

use super::{ControlSignal, IterationState, Observer, Outcome};

/// Writes the image as `iter_NNNN.raw` whenever called, and as `iter_final.raw`
/// when the run ends. The objective at each checkpoint goes into a CSV file.
pub struct SaveIters {
    directory: PathBuf,
    csv: BufWriter<File>,
}

impl SaveIters {
    pub const CSV_FILE: &'static str = "objectives.csv";

    pub fn new(directory: &Path) -> Result<Self> {
        std::fs::create_dir_all(directory)?;
        let mut csv = BufWriter::new(File::create(directory.join(Self::CSV_FILE))?);
        writeln!(csv, "iter,objective")?;
        Ok(Self { directory: directory.into(), csv })
    }

    pub fn checkpoint_path(directory: &Path, iteration: usize) -> PathBuf {
        directory.join(format!("iter_{iteration:04}.raw"))
    }

    pub fn final_path(directory: &Path) -> PathBuf { directory.join("iter_final.raw") }
}

impl Observer for SaveIters {
    fn on_iteration(&mut self, state: &IterationState) -> Result<ControlSignal> {
        debug!("saving iter {} ...", state.iteration);
        raw::write_array(state.image.view(), &Self::checkpoint_path(&self.directory, state.iteration))?;
        match state.objective {
            Some(objective) => writeln!(self.csv, "{},{objective}", state.iteration)?,
            None            => writeln!(self.csv, "{},", state.iteration)?,
        }
        self.csv.flush()?;
        debug!("... saved");
        Ok(ControlSignal::Continue)
    }

    fn on_run_end(&mut self, state: &IterationState, _outcome: Outcome) -> Result<()> {
        raw::write_array(state.image.view(), &Self::final_path(&self.directory))?;
        self.csv.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::observer::test::state;
    use ndarray::Array3;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    #[test]
    fn checkpoints_and_objectives() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("run");
        let mut save = SaveIters::new(&out)?;
        let image = Array3::from_shape_fn([1, 2, 2], |(_, y, x)| (2 * y + x) as f32);

        let mut s = state(&image, 3);
        save.on_iteration(&s)?;
        s.iteration = 6;
        s.objective = Some(-1.5);
        save.on_iteration(&s)?;
        save.on_run_end(&s, Outcome::Completed)?;

        for path in [out.join("iter_0003.raw"), out.join("iter_0006.raw"), out.join("iter_final.raw")] {
            let read = raw::read_array3(&path, [1, 2, 2])?;
            assert_eq!(read, image);
        }
        let csv = std::fs::read_to_string(out.join(SaveIters::CSV_FILE))?;
        assert_eq!(csv, "iter,objective\n3,\n6,-1.5\n");
        Ok(())
    }

    #[test]
    fn unwritable_directory_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("not_a_directory");
        std::fs::write(&file, "")?;
        assert!(SaveIters::new(&file).is_err());
        Ok(())
    }
}
