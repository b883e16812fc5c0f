use std::fs;
use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use tracing::{debug, info};

use crate::error::TrainError;

/// Bytes per CIFAR-10 record: one label byte followed by a 3x32x32 image.
const CIFAR_RECORD_LEN: usize = 1 + CIFAR_SHAPE.len();

pub const CIFAR_SHAPE: ImageShape = ImageShape {
    channels: 3,
    height: 32,
    width: 32,
};

/// Which portion of the dataset to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    /// Number of pixel values in one image
    pub const fn len(&self) -> usize {
        self.channels * self.height * self.width
    }
}

/// A single labelled image, pixels stored channel-major (CHW)
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub pixels: Vec<u8>,
    pub label: u8,
}

/// In-memory image classification dataset
pub struct ImageDataset {
    pub items: Vec<ImageItem>,
    pub shape: ImageShape,
}

impl ImageDataset {
    /// Creates a dataset directly from pre-built items
    pub fn from_items(items: Vec<ImageItem>, shape: ImageShape) -> Self {
        Self { items, shape }
    }

    /// Reads the CIFAR-10 binary release found in `data_dir`.
    ///
    /// The training split is every `data_batch_*.bin` file (sorted by name),
    /// the test split is `test_batch.bin`.
    pub fn cifar10(data_dir: &Path, split: Split) -> Result<Self, TrainError> {
        let files = cifar_files(data_dir, split)?;
        let mut items = Vec::new();
        for file in &files {
            let bytes = fs::read(file).map_err(|e| {
                TrainError::Dataset(format!("cannot read {}: {e}", file.display()))
            })?;
            let parsed = parse_cifar_records(&bytes).map_err(|msg| {
                TrainError::Dataset(format!("{}: {msg}", file.display()))
            })?;
            debug!(file = %file.display(), records = parsed.len(), "read CIFAR batch file");
            items.extend(parsed);
        }
        info!("{} split: {} images from {} file(s)", split.name(), items.len(), files.len());
        Ok(Self::from_items(items, CIFAR_SHAPE))
    }

    /// Keeps only the first `n` items
    pub fn truncate(&mut self, n: usize) {
        self.items.truncate(n);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

fn cifar_files(data_dir: &Path, split: Split) -> Result<Vec<PathBuf>, TrainError> {
    if !data_dir.is_dir() {
        return Err(TrainError::Dataset(format!(
            "data directory {} does not exist",
            data_dir.display()
        )));
    }

    let mut files: Vec<PathBuf> = match split {
        Split::Test => vec![data_dir.join("test_batch.bin")],
        Split::Train => fs::read_dir(data_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("data_batch_") && n.ends_with(".bin"))
            })
            .collect(),
    };
    files.sort();

    if files.is_empty() || files.iter().any(|f| !f.is_file()) {
        return Err(TrainError::Dataset(format!(
            "no CIFAR-10 {} files found in {}",
            split.name(),
            data_dir.display()
        )));
    }
    Ok(files)
}

fn parse_cifar_records(bytes: &[u8]) -> Result<Vec<ImageItem>, String> {
    if bytes.len() % CIFAR_RECORD_LEN != 0 {
        return Err(format!(
            "length {} is not a multiple of the {CIFAR_RECORD_LEN}-byte record size",
            bytes.len()
        ));
    }
    Ok(bytes
        .chunks_exact(CIFAR_RECORD_LEN)
        .map(|record| ImageItem {
            label: record[0],
            pixels: record[1..].to_vec(),
        })
        .collect())
}

/// Small deterministic dataset for tests: the label is 1 when the image is bright.
#[cfg(test)]
pub fn synthetic(n: usize, shape: ImageShape) -> ImageDataset {
    let items = (0..n)
        .map(|i| {
            let label = (i % 2) as u8;
            let base: u8 = if label == 1 { 200 } else { 40 };
            let pixels = (0..shape.len())
                .map(|p| base.wrapping_add(((p + i) % 17) as u8))
                .collect();
            ImageItem { pixels, label }
        })
        .collect();
    ImageDataset::from_items(items, shape)
}
