use std::path::Path;
use std::time::Instant;

use burn::{
    optim::{GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use tracing::{debug, info};

use crate::{
    data::{batches_per_epoch, ImageLoader},
    error::TrainError,
    model::Classifier,
    training::{
        checkpoint::{
            load_checkpoint, save_checkpoint, save_metrics_json, Checkpoint, BEST_METRICS_FILE,
            LAST_METRICS_FILE,
        },
        config::Hyperparameters,
        evaluate::Evaluator,
        metrics::{format_metrics, EpochRecord, MetricSummary, RunningAverage, TrainingHistory},
        objectives::{loss_fn, MetricMap, Metrics},
        optim::LrSchedule,
        telemetry::ScalarSink,
    },
};

pub const HISTORY_FILE: &str = "history.csv";

/// Fixed inputs of a run
pub struct Session<'a, B: AutodiffBackend> {
    pub params: &'a Hyperparameters,
    /// Directory holding params.json, checkpoints and logs
    pub exp_dir: &'a Path,
    /// Checkpoint tag in `exp_dir` to load before the first epoch
    pub restore_file: Option<&'a str>,
    pub device: B::Device,
}

/// Result of a completed run; the final weights live in the `latest` checkpoint
#[derive(Debug)]
pub struct TrainingOutcome {
    pub history: TrainingHistory,
    pub best_val_accuracy: f64,
    /// 1-based epoch of the best checkpoint
    pub best_epoch: Option<usize>,
    /// Epochs completed by the checkpoint the run was restored from
    pub restored_epoch: Option<usize>,
}

/// Runs one pass over `loader`, updating the model after every batch.
///
/// Every `save_summary_steps`-th batch (starting with the first) the metrics
/// and the loss are sampled and written to `sink` at step
/// `epoch * batches_per_epoch + batch`. Returns the updated model and the
/// per-metric mean of the samples.
#[allow(clippy::too_many_arguments)]
pub fn train<B, O>(
    mut model: Classifier<B>,
    optimizer: &mut O,
    lr: f64,
    loader: &ImageLoader<B>,
    metrics: &Metrics<B::InnerBackend>,
    params: &Hyperparameters,
    epoch: usize,
    sink: &mut dyn ScalarSink,
) -> Result<(Classifier<B>, MetricMap), TrainError>
where
    B: AutodiffBackend,
    O: Optimizer<Classifier<B>, B>,
{
    let num_batches = batches_per_epoch(loader, params.batch_size);
    let mut summary = MetricSummary::new();
    let mut loss_avg = RunningAverage::new();

    for (i, batch) in loader.iter().enumerate() {
        let output = model.forward(batch.images);
        let loss = loss_fn(output.clone(), batch.targets.clone());
        let loss_value: f64 = loss.clone().into_scalar().elem();

        // Gradients are produced fresh by every backward pass.
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optimizer.step(lr, model, grads);

        if i % params.save_summary_steps == 0 {
            let mut sample = metrics.compute(output.inner(), batch.targets.inner());
            sample.insert("loss".to_string(), loss_value);

            let step = epoch * num_batches + i;
            for (name, value) in &sample {
                sink.add_scalar(name, *value, step)?;
            }
            summary.push(sample);
        }

        loss_avg.update(loss_value);
        debug!("batch {}/{} loss={:05.3}", i + 1, num_batches, loss_avg.value());
    }
    sink.flush()?;

    let mean = summary.mean().ok_or(TrainError::EmptyMetrics { epoch: epoch + 1 })?;
    info!("- Train metrics: {}", format_metrics(&mean));
    Ok((model, mean))
}

/// Trains for `num_epochs`, evaluating and checkpointing after every epoch.
///
/// A validation accuracy equal to the best so far still counts as best, so the
/// most recent of equally good epochs owns the `best` checkpoint.
#[allow(clippy::too_many_arguments)]
pub fn train_and_evaluate<B, O, E>(
    session: &Session<'_, B>,
    mut model: Classifier<B>,
    mut optimizer: O,
    train_loader: &ImageLoader<B>,
    evaluator: &mut E,
    metrics: &Metrics<B::InnerBackend>,
    schedule: &mut LrSchedule,
    sink: &mut dyn ScalarSink,
) -> Result<TrainingOutcome, TrainError>
where
    B: AutodiffBackend,
    O: Optimizer<Classifier<B>, B>,
    E: Evaluator<B>,
{
    let params = session.params;

    let mut restored_epoch = None;
    if let Some(tag) = session.restore_file {
        let restored = load_checkpoint(session.exp_dir, tag, model, optimizer, &session.device)?;
        info!("- restored checkpoint saved after epoch {}", restored.meta.epoch);
        model = restored.model;
        optimizer = restored.optimizer;
        restored_epoch = Some(restored.meta.epoch);
    }

    let mut best_val_accuracy = 0.0;
    let mut best_epoch = None;
    let mut history = TrainingHistory::new();

    for epoch in 0..params.num_epochs {
        let started = Instant::now();
        info!("Epoch {} / {}", epoch + 1, params.num_epochs);

        let lr = schedule.lr();
        info!("learning rate = {} for parameter group 0", lr);

        let (trained, train_metrics) = train(
            model,
            &mut optimizer,
            lr,
            train_loader,
            metrics,
            params,
            epoch,
            sink,
        )?;
        model = trained;

        let val_metrics = evaluator.evaluate(&model)?;
        schedule.step();

        let val_accuracy = *val_metrics.get("accuracy").ok_or_else(|| {
            TrainError::Evaluation("validation metrics have no 'accuracy' entry".to_string())
        })?;
        let is_best = val_accuracy >= best_val_accuracy;

        save_checkpoint(
            Checkpoint {
                epoch: epoch + 1,
                model: &model,
                optimizer: &optimizer,
                val_metrics: &val_metrics,
            },
            is_best,
            session.exp_dir,
        )?;
        save_metrics_json(&val_metrics, &session.exp_dir.join(LAST_METRICS_FILE))?;

        if is_best {
            info!("- Found new best accuracy model at epoch {}", epoch + 1);
            best_val_accuracy = val_accuracy;
            best_epoch = Some(epoch + 1);
            save_metrics_json(&val_metrics, &session.exp_dir.join(BEST_METRICS_FILE))?;
        }

        history.push(EpochRecord::new(
            epoch + 1,
            lr,
            &train_metrics,
            &val_metrics,
            started.elapsed().as_secs_f64(),
        ));
        history.save_csv(&session.exp_dir.join(HISTORY_FILE))?;
    }

    Ok(TrainingOutcome {
        history,
        best_val_accuracy,
        best_epoch,
        restored_epoch,
    })
}
