use std::collections::BTreeMap;

use burn::{
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion, Int, Tensor},
};

/// Metric name -> scalar value
pub type MetricMap = BTreeMap<String, f64>;

/// Computes a scalar from logits [batch, classes] and labels [batch]
pub type MetricFn<B> = fn(Tensor<B, 2>, Tensor<B, 1, Int>) -> f64;

/// Mean cross-entropy between logits [batch, classes] and labels [batch]
pub fn loss_fn<B: Backend>(logits: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    CrossEntropyLossConfig::new()
        .init(&logits.device())
        .forward(logits, labels)
}

/// Fraction of samples whose arg-max prediction matches the label
pub fn accuracy<B: Backend>(logits: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> f64 {
    let [batch_size, _] = logits.dims();
    if batch_size == 0 {
        return 0.0;
    }
    let predictions = logits.argmax(1).reshape([batch_size]);
    let correct: i64 = predictions.equal(labels).int().sum().into_scalar().elem();
    correct as f64 / batch_size as f64
}

/// Named metric functions evaluated on a batch
#[derive(Clone)]
pub struct Metrics<B: Backend> {
    entries: Vec<(&'static str, MetricFn<B>)>,
}

impl<B: Backend> Metrics<B> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// The metric set every run reports
    pub fn standard() -> Self {
        Self::new().with("accuracy", accuracy::<B>)
    }

    pub fn with(mut self, name: &'static str, metric: MetricFn<B>) -> Self {
        self.entries.push((name, metric));
        self
    }

    pub fn compute(&self, logits: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> MetricMap {
        self.entries
            .iter()
            .map(|(name, metric)| (name.to_string(), metric(logits.clone(), labels.clone())))
            .collect()
    }
}

impl<B: Backend> Default for Metrics<B> {
    fn default() -> Self {
        Self::standard()
    }
}
