use burn::{
    module::AutodiffModule,
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
};
use tracing::info;

use crate::{
    data::ImageLoader,
    error::TrainError,
    model::Classifier,
    training::{
        metrics::{format_metrics, MetricSummary},
        objectives::{loss_fn, MetricMap, Metrics},
    },
};

/// Scores a model on held-out data after each epoch
pub trait Evaluator<B: AutodiffBackend> {
    /// Returns the mean of every metric; the map must contain `accuracy`
    fn evaluate(&mut self, model: &Classifier<B>) -> Result<MetricMap, TrainError>;
}

/// Runs the inference model over every batch of `loader` without gradient tracking
pub fn evaluate<B: Backend>(
    model: &Classifier<B>,
    loader: &ImageLoader<B>,
    metrics: &Metrics<B>,
) -> Result<MetricMap, TrainError> {
    let mut summary = MetricSummary::new();

    for batch in loader.iter() {
        let output = model.forward(batch.images);
        let loss: f64 = loss_fn(output.clone(), batch.targets.clone())
            .into_scalar()
            .elem();

        let mut sample = metrics.compute(output, batch.targets);
        sample.insert("loss".to_string(), loss);
        summary.push(sample);
    }

    let mean = summary
        .mean()
        .ok_or_else(|| TrainError::Evaluation("validation loader yielded no batches".to_string()))?;
    info!("- Eval metrics : {}", format_metrics(&mean));
    Ok(mean)
}

/// Evaluates on a fixed validation loader
pub struct HeldOutEvaluator<B: AutodiffBackend> {
    loader: ImageLoader<B::InnerBackend>,
    metrics: Metrics<B::InnerBackend>,
}

impl<B: AutodiffBackend> HeldOutEvaluator<B> {
    pub fn new(loader: ImageLoader<B::InnerBackend>, metrics: Metrics<B::InnerBackend>) -> Self {
        Self { loader, metrics }
    }
}

impl<B: AutodiffBackend> Evaluator<B> for HeldOutEvaluator<B> {
    fn evaluate(&mut self, model: &Classifier<B>) -> Result<MetricMap, TrainError> {
        evaluate(&model.valid(), &self.loader, &self.metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{
            dataset::{synthetic, ImageShape},
            DataPipeline, Split,
        },
        model::classifier::init_tiny,
    };
    use burn::backend::{Autodiff, NdArray};
    use std::path::PathBuf;

    type TestBackend = Autodiff<NdArray>;

    fn pipeline() -> DataPipeline {
        DataPipeline {
            data_dir: PathBuf::from("unused"),
            batch_size: 4,
            num_workers: 1,
            seed: 1,
            max_batches: None,
        }
    }

    #[test]
    fn test_held_out_evaluator_reports_accuracy_and_loss() {
        let device = Default::default();
        let shape = ImageShape { channels: 3, height: 4, width: 4 };
        let loader = pipeline().loader(synthetic(10, shape), Split::Test);
        let model = init_tiny::<TestBackend>(&device);

        let mut evaluator = HeldOutEvaluator::<TestBackend>::new(loader, Metrics::standard());
        let metrics = evaluator.evaluate(&model).unwrap();

        assert!((0.0..=1.0).contains(&metrics["accuracy"]));
        assert!(metrics["loss"] > 0.0);
    }

    #[test]
    fn test_empty_loader_is_an_error() {
        let device = Default::default();
        let shape = ImageShape { channels: 3, height: 4, width: 4 };
        let loader = pipeline().loader(synthetic(0, shape), Split::Test);
        let model = init_tiny::<NdArray>(&device);

        let err = evaluate(&model, &loader, &Metrics::standard()).unwrap_err();
        assert!(matches!(err, TrainError::Evaluation(_)));
    }
}
