use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    tensor::backend::Backend,
};
use tracing::info;

use crate::{
    data::{
        batcher::{ImageBatch, ImageBatcher},
        dataset::{ImageDataset, Split},
    },
    error::TrainError,
    training::config::Hyperparameters,
};

pub type ImageLoader<B> = Arc<dyn DataLoader<B, ImageBatch<B>>>;

/// Builds batched loaders over a dataset directory.
///
/// `max_batches` caps every loader it builds, which is how reduced "test"
/// runs are expressed.
#[derive(Debug, Clone)]
pub struct DataPipeline {
    pub data_dir: PathBuf,
    pub batch_size: usize,
    pub num_workers: usize,
    pub seed: u64,
    pub max_batches: Option<usize>,
}

impl DataPipeline {
    pub fn new(data_dir: &Path, params: &Hyperparameters, max_batches: Option<usize>) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            batch_size: params.batch_size,
            num_workers: params.num_workers,
            seed: params.seed,
            max_batches,
        }
    }

    /// Reads `split` from the CIFAR-10 files in `data_dir` and wraps it in a loader
    pub fn fetch<B: Backend>(&self, split: Split) -> Result<ImageLoader<B>, TrainError> {
        let dataset = ImageDataset::cifar10(&self.data_dir, split)?;
        Ok(self.loader(dataset, split))
    }

    /// Wraps an already loaded dataset. The train split is shuffled with the run seed.
    pub fn loader<B: Backend>(&self, mut dataset: ImageDataset, split: Split) -> ImageLoader<B> {
        if let Some(max_batches) = self.max_batches {
            dataset.truncate(max_batches * self.batch_size);
            info!(
                "{} split limited to {} batch(es), {} images",
                split.name(),
                max_batches,
                dataset.len()
            );
        }

        let builder = DataLoaderBuilder::new(ImageBatcher::new(dataset.shape))
            .batch_size(self.batch_size)
            .num_workers(self.num_workers);
        let builder = match split {
            Split::Train => builder.shuffle(self.seed),
            Split::Test => builder,
        };
        builder.build(dataset)
    }
}

/// Number of batches a loader yields per pass
pub fn batches_per_epoch<B: Backend>(loader: &ImageLoader<B>, batch_size: usize) -> usize {
    loader.num_items().div_ceil(batch_size)
}
