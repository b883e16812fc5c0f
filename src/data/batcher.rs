use burn::{
    data::dataloader::batcher::Batcher,
    tensor::{backend::Backend, Int, Tensor},
};

use crate::data::dataset::{ImageItem, ImageShape};

/// Per-channel CIFAR-10 statistics
const CIFAR_MEAN: [f32; 3] = [0.4914, 0.4822, 0.4465];
const CIFAR_STD: [f32; 3] = [0.2470, 0.2435, 0.2616];

#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// [batch, channels, height, width]
    pub images: Tensor<B, 4>,
    /// [batch]
    pub targets: Tensor<B, 1, Int>,
}

/// Turns raw byte images into normalized float tensors
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    shape: ImageShape,
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl ImageBatcher {
    /// Uses the CIFAR-10 channel statistics, falling back to 0.5/0.5 when the
    /// image does not have three channels.
    pub fn new(shape: ImageShape) -> Self {
        let (mean, std) = if shape.channels == 3 {
            (CIFAR_MEAN.to_vec(), CIFAR_STD.to_vec())
        } else {
            (vec![0.5; shape.channels], vec![0.5; shape.channels])
        };
        Self { shape, mean, std }
    }

    fn normalize(&self, pixels: &[u8], out: &mut Vec<f32>) {
        let plane = self.shape.height * self.shape.width;
        for (i, &p) in pixels.iter().enumerate() {
            let c = i / plane;
            out.push((p as f32 / 255.0 - self.mean[c]) / self.std[c]);
        }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let ImageShape { channels, height, width } = self.shape;

        let mut flat = Vec::with_capacity(batch_size * self.shape.len());
        for item in &items {
            self.normalize(&item.pixels, &mut flat);
        }

        let labels: Vec<i32> = items.iter().map(|item| item.label as i32).collect();

        let images = Tensor::<B, 1>::from_floats(flat.as_slice(), device)
            .reshape([batch_size, channels, height, width]);
        let targets = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), device);

        ImageBatch { images, targets }
    }
}
