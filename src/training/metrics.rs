use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::{error::TrainError, training::objectives::MetricMap};

/// Online mean of a stream of scalars
#[derive(Debug, Default, Clone)]
pub struct RunningAverage {
    total: f64,
    steps: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.total += value;
        self.steps += 1;
    }

    /// Mean of every value seen so far, 0.0 before the first update
    pub fn value(&self) -> f64 {
        if self.steps == 0 {
            return 0.0;
        }
        self.total / self.steps as f64
    }
}

/// Metric samples collected during one pass, one map per sampled batch
#[derive(Debug, Default, Clone)]
pub struct MetricSummary {
    samples: Vec<MetricMap>,
}

impl MetricSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: MetricMap) {
        self.samples.push(sample);
    }

    /// Per-metric mean over the samples, `None` when nothing was sampled.
    ///
    /// The keys of the first sample define the reported metrics.
    pub fn mean(&self) -> Option<MetricMap> {
        let first = self.samples.first()?;
        Some(
            first
                .keys()
                .map(|name| {
                    let mut average = RunningAverage::new();
                    for value in self.samples.iter().filter_map(|s| s.get(name)) {
                        average.update(*value);
                    }
                    (name.clone(), average.value())
                })
                .collect(),
        )
    }
}

/// `name: value ; name: value` with three decimals
pub fn format_metrics(metrics: &MetricMap) -> String {
    metrics
        .iter()
        .map(|(name, value)| format!("{name}: {value:05.3}"))
        .collect::<Vec<_>>()
        .join(" ; ")
}

/// One row of the training history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub learning_rate: f64,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub duration_secs: f64,
}

impl EpochRecord {
    pub fn new(
        epoch: usize,
        learning_rate: f64,
        train: &MetricMap,
        val: &MetricMap,
        duration_secs: f64,
    ) -> Self {
        let get = |map: &MetricMap, key: &str| map.get(key).copied().unwrap_or(f64::NAN);
        Self {
            epoch,
            learning_rate,
            train_loss: get(train, "loss"),
            train_accuracy: get(train, "accuracy"),
            val_loss: get(val, "loss"),
            val_accuracy: get(val, "accuracy"),
            duration_secs,
        }
    }

    pub fn log(&self) {
        info!(
            "Epoch {:>3} | Train Loss: {:.4} | Val Loss: {:.4} | Train Acc: {:.2}% | Val Acc: {:.2}% | Time: {:.1}s",
            self.epoch,
            self.train_loss,
            self.val_loss,
            self.train_accuracy * 100.0,
            self.val_accuracy * 100.0,
            self.duration_secs,
        );
    }
}

#[derive(Debug, Default, Clone)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EpochRecord) {
        record.log();
        self.epochs.push(record);
    }

    pub fn save_csv(&self, path: &Path) -> Result<(), TrainError> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.epochs {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Validation accuracy of every completed epoch, in order
    pub fn val_accuracies(&self) -> Vec<f64> {
        self.epochs.iter().map(|r| r.val_accuracy).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample(pairs: &[(&str, f64)]) -> MetricMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_running_average_is_mean() {
        let mut average = RunningAverage::new();
        let values = [0.5, 1.5, 2.0, -1.0, 3.25];
        for v in values {
            average.update(v);
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        assert!((average.value() - mean).abs() < 1e-12);
    }

    #[test]
    fn test_running_average_empty_is_zero() {
        assert_eq!(RunningAverage::new().value(), 0.0);
    }

    #[test]
    fn test_summary_mean() {
        let mut summary = MetricSummary::new();
        summary.push(sample(&[("accuracy", 0.5), ("loss", 2.0)]));
        summary.push(sample(&[("accuracy", 1.0), ("loss", 1.0)]));

        assert_eq!(
            summary.mean().unwrap(),
            sample(&[("accuracy", 0.75), ("loss", 1.5)])
        );
    }

    #[test]
    fn test_empty_summary_has_no_mean() {
        assert!(MetricSummary::new().mean().is_none());
    }

    #[test]
    fn test_format_metrics() {
        let text = format_metrics(&sample(&[("accuracy", 0.5), ("loss", 1.23456)]));
        assert_eq!(text, "accuracy: 0.500 ; loss: 1.235");
    }

    #[test]
    fn test_history_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        let mut history = TrainingHistory::new();
        let train = sample(&[("accuracy", 0.5), ("loss", 1.0)]);
        let val = sample(&[("accuracy", 0.25), ("loss", 2.0)]);
        history.push(EpochRecord::new(1, 0.1, &train, &val, 1.5));
        history.save_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "epoch,learning_rate,train_loss,train_accuracy,val_loss,val_accuracy,duration_secs"
        );
        assert_eq!(lines.next().unwrap(), "1,0.1,1.0,0.5,2.0,0.25,1.5");
        assert_eq!(history.val_accuracies(), vec![0.25]);
    }
}
