//! Append-only destinations for the scalars and image slices observers report.

use std::{
    cell::RefCell,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    rc::Rc,
};

use log::debug;
use ndarray::{Array2, ArrayView2};
use serde::Serialize;

use crate::{Result, io::raw, types::Intensityf32};

pub trait Sink {
    fn scalar(&mut self, tag: &str, value: f64, iteration: usize, logical_time: f64) -> Result<()>;
    fn image(&mut self, tag: &str, slice: ArrayView2<Intensityf32>, iteration: usize) -> Result<()>;
}

/// Sink shared between several observers of the same run
pub type SharedSink = Rc<RefCell<dyn Sink>>;

pub fn shared(sink: impl Sink + 'static) -> SharedSink { Rc::new(RefCell::new(sink)) }

// ----- In memory ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Scalar { tag: String, value: f64, iteration: usize, logical_time: f64 },
    Image  { tag: String, slice: Array2<Intensityf32>, iteration: usize },
}

/// Keeps every event, for inspection after (or during) the run
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    pub events: Vec<Event>,
}

impl MemorySink {
    pub fn new() -> Self { Self::default() }

    /// `(iteration, value)` of every scalar reported under `tag`
    pub fn scalars(&self, tag: &str) -> Vec<(usize, f64)> {
        self.events.iter()
            .filter_map(|event| match event {
                Event::Scalar { tag: t, value, iteration, .. } if t == tag => Some((*iteration, *value)),
                _ => None,
            })
            .collect()
    }

    pub fn images(&self, tag: &str) -> Vec<(usize, &Array2<Intensityf32>)> {
        self.events.iter()
            .filter_map(|event| match event {
                Event::Image { tag: t, slice, iteration } if t == tag => Some((*iteration, slice)),
                _ => None,
            })
            .collect()
    }
}

impl Sink for MemorySink {
    fn scalar(&mut self, tag: &str, value: f64, iteration: usize, logical_time: f64) -> Result<()> {
        self.events.push(Event::Scalar { tag: tag.into(), value, iteration, logical_time });
        Ok(())
    }

    fn image(&mut self, tag: &str, slice: ArrayView2<Intensityf32>, iteration: usize) -> Result<()> {
        self.events.push(Event::Image { tag: tag.into(), slice: slice.to_owned(), iteration });
        Ok(())
    }
}

// ----- JSON lines on disk ------------------------------------------------------------------

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Line<'a> {
    Scalar { tag: &'a str, value: f64, iteration: usize, logical_time: f64 },
    Image  { tag: &'a str, iteration: usize, shape: [usize; 2], file: &'a str },
}

/// Writes one JSON object per event to `events.jsonl`. Image slices go into
/// raw `f32` files in the same directory, referenced from their event.
pub struct JsonLinesSink {
    directory: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub const FILE_NAME: &'static str = "events.jsonl";

    pub fn create(directory: &Path) -> Result<Self> {
        std::fs::create_dir_all(directory)?;
        let path = directory.join(Self::FILE_NAME);
        debug!("Writing events to {}", path.display());
        Ok(Self { directory: directory.into(), writer: BufWriter::new(File::create(path)?) })
    }

    fn write_line(&mut self, line: &Line) -> Result<()> {
        serde_json::to_writer(&mut self.writer, line)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl Sink for JsonLinesSink {
    fn scalar(&mut self, tag: &str, value: f64, iteration: usize, logical_time: f64) -> Result<()> {
        self.write_line(&Line::Scalar { tag, value, iteration, logical_time })
    }

    fn image(&mut self, tag: &str, slice: ArrayView2<Intensityf32>, iteration: usize) -> Result<()> {
        let file = format!("{}_{iteration:04}.raw", tag.replace(['/', ' '], "_"));
        raw::write_array(slice.view(), &self.directory.join(&file))?;
        let (rows, cols) = slice.dim();
        self.write_line(&Line::Image { tag, iteration, shape: [rows, cols], file: &file })
    }
}
