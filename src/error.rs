use std::path::PathBuf;

use thiserror::Error;

/// Everything that can abort a training run.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot restore checkpoint: {} does not exist", .0.display())]
    Restore(PathBuf),

    #[error("no metric samples were recorded during epoch {epoch}")]
    EmptyMetrics { epoch: usize },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("checkpoint record error: {0}")]
    Record(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
