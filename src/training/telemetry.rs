use std::fs::{File, OpenOptions};
use std::path::Path;

use serde::Serialize;

use crate::error::TrainError;

pub const SCALARS_FILE: &str = "scalars.csv";

/// Append-only scalar time series keyed by metric name and global step
pub trait ScalarSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<(), TrainError>;

    fn flush(&mut self) -> Result<(), TrainError> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ScalarRow<'a> {
    tag: &'a str,
    step: usize,
    value: f64,
}

/// Writes `tag,step,value` rows to a CSV file, appending to an existing one
pub struct CsvScalarWriter {
    writer: csv::Writer<File>,
}

impl CsvScalarWriter {
    pub fn open(path: &Path) -> Result<Self, TrainError> {
        let is_new = !path.exists() || std::fs::metadata(path)?.len() == 0;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        Ok(Self { writer })
    }
}

impl ScalarSink for CsvScalarWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<(), TrainError> {
        self.writer.serialize(ScalarRow { tag, step, value })?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TrainError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps every scalar in memory
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    pub scalars: Vec<(String, usize, f64)>,
}

#[cfg(test)]
impl MemorySink {
    pub fn steps(&self, tag: &str) -> Vec<usize> {
        self.scalars
            .iter()
            .filter(|(t, _, _)| t == tag)
            .map(|(_, step, _)| *step)
            .collect()
    }
}

#[cfg(test)]
impl ScalarSink for MemorySink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<(), TrainError> {
        self.scalars.push((tag.to_string(), step, value));
        Ok(())
    }
}
