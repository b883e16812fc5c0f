use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Configuration for the CIFAR-style convolutional classifier
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    pub num_classes: usize,
    pub in_channels: usize,
    /// Output channels of each stage; every stage after the first halves the resolution
    pub stage_widths: Vec<usize>,
    pub blocks_per_stage: usize,
    /// Plain networks drop the shortcut connections
    pub residual: bool,
}

impl ClassifierConfig {
    /// ResNet for 32x32 inputs with `6n + 2` layers (He et al., section 4.2)
    pub fn cifar_resnet(n: usize, num_classes: usize) -> Self {
        Self {
            num_classes,
            in_channels: 3,
            stage_widths: vec![16, 32, 64],
            blocks_per_stage: n,
            residual: true,
        }
    }

    /// Same topology as `cifar_resnet` without shortcuts
    pub fn cifar_plain(n: usize, num_classes: usize) -> Self {
        Self {
            residual: false,
            ..Self::cifar_resnet(n, num_classes)
        }
    }

    /// Number of weighted layers (convolutions on the main path plus the head)
    pub fn depth(&self) -> usize {
        2 + 2 * self.blocks_per_stage * self.stage_widths.len()
    }

    /// Initializes the model on the given device
    pub fn init<B: Backend>(&self, device: &B::Device) -> Classifier<B> {
        let stem_width = self.stage_widths.first().copied().unwrap_or(16);
        let stem = conv3x3(self.in_channels, stem_width, 1, device);
        let stem_norm = BatchNormConfig::new(stem_width).init(device);

        let mut blocks = Vec::new();
        let mut channels = stem_width;
        for (stage, &width) in self.stage_widths.iter().enumerate() {
            for block in 0..self.blocks_per_stage {
                let stride = if stage > 0 && block == 0 { 2 } else { 1 };
                blocks.push(BasicBlock::new(channels, width, stride, self.residual, device));
                channels = width;
            }
        }

        Classifier {
            stem,
            stem_norm,
            blocks,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: LinearConfig::new(channels, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

fn conv3x3<B: Backend>(input: usize, output: usize, stride: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([input, output], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .init(device)
}

/// 1x1 strided convolution matching the shortcut to the block output
#[derive(Module, Debug)]
pub struct Projection<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> Projection<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(self.conv.forward(x))
    }
}

/// Two 3x3 convolutions with an optional shortcut connection
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    projection: Option<Projection<B>>,
    residual: bool,
    activation: Relu,
}

impl<B: Backend> BasicBlock<B> {
    fn new(input: usize, output: usize, stride: usize, residual: bool, device: &B::Device) -> Self {
        let projection = (residual && (stride != 1 || input != output)).then(|| Projection {
            conv: Conv2dConfig::new([input, output], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            norm: BatchNormConfig::new(output).init(device),
        });

        Self {
            conv1: conv3x3(input, output, stride, device),
            norm1: BatchNormConfig::new(output).init(device),
            conv2: conv3x3(output, output, 1, device),
            norm2: BatchNormConfig::new(output).init(device),
            projection,
            residual,
            activation: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.activation.forward(self.norm1.forward(self.conv1.forward(x.clone())));
        let out = self.norm2.forward(self.conv2.forward(out));

        let out = if self.residual {
            let shortcut = match &self.projection {
                Some(projection) => projection.forward(x),
                None => x,
            };
            out + shortcut
        } else {
            out
        };

        self.activation.forward(out)
    }
}

/// Image classifier: stem, stacked basic blocks, global pooling, linear head
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    stem: Conv2d<B>,
    stem_norm: BatchNorm<B, 2>,
    blocks: Vec<BasicBlock<B>>,
    pool: AdaptiveAvgPool2d,
    head: Linear<B>,
    activation: Relu,
}

impl<B: Backend> Classifier<B> {
    /// images: [batch, channels, height, width] -> logits: [batch, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self
            .activation
            .forward(self.stem_norm.forward(self.stem.forward(images)));

        for block in &self.blocks {
            x = block.forward(x);
        }

        // [batch, channels, 1, 1] -> [batch, channels]
        let x = self.pool.forward(x).flatten::<2>(1, 3);
        self.head.forward(x)
    }
}

/// Two-stage network small enough for unit tests on the CPU backend
#[cfg(test)]
pub fn tiny() -> ClassifierConfig {
    ClassifierConfig {
        num_classes: 2,
        in_channels: 3,
        stage_widths: vec![4, 8],
        blocks_per_stage: 1,
        residual: true,
    }
}

/// Guards the backend's global random generator, which tests share across threads
#[cfg(test)]
static RNG_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Initializes `config`, seeding the backend first when `seed` is given
#[cfg(test)]
pub fn init_locked<B: Backend>(
    config: &ClassifierConfig,
    seed: Option<u64>,
    device: &B::Device,
) -> Classifier<B> {
    let _guard = RNG_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(seed) = seed {
        B::seed(seed);
    }
    // Parameters are drawn lazily on first access; draw them under the lock.
    let model = config.init(device);
    model.visit(&mut TouchParams);
    model
}

#[cfg(test)]
struct TouchParams;

#[cfg(test)]
impl<B: Backend> burn::module::ModuleVisitor<B> for TouchParams {}

#[cfg(test)]
pub fn init_tiny<B: Backend>(device: &B::Device) -> Classifier<B> {
    init_locked(&tiny(), None, device)
}

/// Deterministic [n, 3, size, size] input
#[cfg(test)]
pub fn fixed_images<B: Backend>(n: usize, size: usize, device: &B::Device) -> Tensor<B, 4> {
    let values: Vec<f32> = (0..n * 3 * size * size)
        .map(|i| ((i * 37) % 101) as f32 / 50.0 - 1.0)
        .collect();
    Tensor::<B, 1>::from_floats(values.as_slice(), device).reshape([n, 3, size, size])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    fn logits(model: &Classifier<NdArray>) -> Vec<f32> {
        let device = Default::default();
        model
            .forward(fixed_images(2, 8, &device))
            .into_data()
            .to_vec::<f32>()
            .unwrap()
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = init_tiny::<NdArray>(&device);
        let images = Tensor::<NdArray, 4>::zeros([3, 3, 8, 8], &device);
        assert_eq!(model.forward(images).dims(), [3, 2]);
    }

    #[test]
    fn test_plain_network_has_no_projections() {
        let device = Default::default();
        let residual = init_locked::<NdArray>(&ClassifierConfig::cifar_resnet(1, 10), None, &device);
        let plain = init_locked::<NdArray>(&ClassifierConfig::cifar_plain(1, 10), None, &device);

        assert!(residual.blocks.iter().any(|b| b.projection.is_some()));
        assert!(plain.blocks.iter().all(|b| b.projection.is_none()));
        assert!(plain.num_params() < residual.num_params());
    }

    #[test]
    fn test_depth() {
        assert_eq!(ClassifierConfig::cifar_resnet(3, 10).depth(), 20);
        assert_eq!(ClassifierConfig::cifar_resnet(5, 10).depth(), 32);
    }

    #[test]
    fn test_seed_fixes_initial_weights() {
        let device = Default::default();
        let first = init_locked::<NdArray>(&tiny(), Some(200), &device);
        let second = init_locked::<NdArray>(&tiny(), Some(200), &device);
        let other = init_locked::<NdArray>(&tiny(), Some(201), &device);

        assert_eq!(logits(&first), logits(&second));
        assert_ne!(logits(&first), logits(&other));
    }
}
