pub mod batcher;
pub mod dataset;
pub mod pipeline;

pub use dataset::Split;
pub use pipeline::{batches_per_epoch, DataPipeline, ImageLoader};
