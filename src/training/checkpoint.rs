use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    optim::Optimizer,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{error::TrainError, model::Classifier, training::objectives::MetricMap};

/// Lossless recorder so restored parameters match the saved ones exactly
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

pub const LATEST: &str = "latest";
pub const BEST: &str = "best";
pub const BEST_METRICS_FILE: &str = "metrics_val_best_weights.json";
pub const LAST_METRICS_FILE: &str = "metrics_val_last_weights.json";

/// Everything needed to resume from the end of an epoch
pub struct Checkpoint<'a, B: AutodiffBackend, O> {
    /// Number of completed epochs
    pub epoch: usize,
    pub model: &'a Classifier<B>,
    pub optimizer: &'a O,
    pub val_metrics: &'a MetricMap,
}

/// Stored next to the tensor records of a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub epoch: usize,
    pub val_metrics: MetricMap,
}

/// Files of one checkpoint tag.
///
/// The recorder replaces the extension of the path it is given with `.mpk`,
/// so record paths already carry it and reach the disk unchanged.
struct CheckpointFiles {
    model: PathBuf,
    optimizer: PathBuf,
    meta: PathBuf,
}

impl CheckpointFiles {
    fn new(dir: &Path, tag: &str) -> Self {
        Self {
            model: dir.join(format!("{tag}.model.mpk")),
            optimizer: dir.join(format!("{tag}.optim.mpk")),
            meta: dir.join(format!("{tag}.json")),
        }
    }

    fn all(&self) -> [&Path; 3] {
        [&self.model, &self.optimizer, &self.meta]
    }
}

fn record_error(e: impl std::fmt::Debug) -> TrainError {
    TrainError::Record(format!("{e:?}"))
}

/// Writes the `latest` checkpoint and, when `is_best`, copies it to `best`
pub fn save_checkpoint<B, O>(
    state: Checkpoint<'_, B, O>,
    is_best: bool,
    dir: &Path,
) -> Result<(), TrainError>
where
    B: AutodiffBackend,
    O: Optimizer<Classifier<B>, B>,
{
    fs::create_dir_all(dir)?;
    let recorder = CheckpointRecorder::new();
    let latest = CheckpointFiles::new(dir, LATEST);

    state
        .model
        .clone()
        .save_file(latest.model.clone(), &recorder)
        .map_err(record_error)?;
    <CheckpointRecorder as Recorder<B>>::record(
        &recorder,
        state.optimizer.to_record(),
        latest.optimizer.clone(),
    )
    .map_err(record_error)?;

    let meta = CheckpointMeta {
        epoch: state.epoch,
        val_metrics: state.val_metrics.clone(),
    };
    fs::write(&latest.meta, serde_json::to_string_pretty(&meta)?)?;
    debug!(epoch = state.epoch, dir = %dir.display(), "saved latest checkpoint");

    if is_best {
        copy_checkpoint(dir, LATEST, BEST)?;
        debug!(epoch = state.epoch, "copied checkpoint to best");
    }
    Ok(())
}

/// Copies every file of checkpoint `from` to checkpoint `to` in `dir`
pub fn copy_checkpoint(dir: &Path, from: &str, to: &str) -> Result<(), TrainError> {
    let from_files = CheckpointFiles::new(dir, from);
    let to_files = CheckpointFiles::new(dir, to);
    for (source, target) in from_files.all().into_iter().zip(to_files.all()) {
        if !source.is_file() {
            return Err(TrainError::Restore(source.to_path_buf()));
        }
        fs::copy(source, target)?;
    }
    Ok(())
}

/// A checkpoint read back from disk
pub struct Restored<B: AutodiffBackend, O> {
    pub model: Classifier<B>,
    pub optimizer: O,
    pub meta: CheckpointMeta,
}

/// Loads the checkpoint `tag` from `dir` into `model` and `optimizer`
pub fn load_checkpoint<B, O>(
    dir: &Path,
    tag: &str,
    model: Classifier<B>,
    optimizer: O,
    device: &B::Device,
) -> Result<Restored<B, O>, TrainError>
where
    B: AutodiffBackend,
    O: Optimizer<Classifier<B>, B>,
{
    let files = CheckpointFiles::new(dir, tag);
    for path in files.all() {
        if !path.is_file() {
            return Err(TrainError::Restore(path.to_path_buf()));
        }
    }
    info!("Restoring weights from {}", files.model.display());

    let recorder = CheckpointRecorder::new();
    let model = model
        .load_file(files.model, &recorder, device)
        .map_err(record_error)?;
    let record = <CheckpointRecorder as Recorder<B>>::load(&recorder, files.optimizer, device)
        .map_err(record_error)?;
    let optimizer = optimizer.load_record(record);
    let meta = read_meta(dir, tag)?;

    Ok(Restored {
        model,
        optimizer,
        meta,
    })
}

/// Reads the metadata of checkpoint `tag` without touching tensors
pub fn read_meta(dir: &Path, tag: &str) -> Result<CheckpointMeta, TrainError> {
    let path = CheckpointFiles::new(dir, tag).meta;
    if !path.is_file() {
        return Err(TrainError::Restore(path));
    }
    Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
}

/// Writes a metric map as pretty JSON
pub fn save_metrics_json(metrics: &MetricMap, path: &Path) -> Result<(), TrainError> {
    fs::write(path, serde_json::to_string_pretty(metrics)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::classifier::{fixed_images, init_tiny},
        training::objectives::loss_fn,
    };
    use burn::{
        backend::{Autodiff, NdArray},
        module::AutodiffModule,
        optim::{AdamConfig, GradientsParams},
        tensor::{Int, Tensor},
    };

    type TestBackend = Autodiff<NdArray>;

    fn step<O: Optimizer<Classifier<TestBackend>, TestBackend>>(
        model: Classifier<TestBackend>,
        optimizer: &mut O,
        images: Tensor<TestBackend, 4>,
    ) -> Classifier<TestBackend> {
        let device = images.device();
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([0, 1, 1, 0], &device);
        let loss = loss_fn(model.forward(images), labels);
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        optimizer.step(1e-2, model, grads)
    }

    fn logits(model: &Classifier<TestBackend>, images: Tensor<TestBackend, 4>) -> Vec<f32> {
        model
            .valid()
            .forward(images.inner())
            .into_data()
            .to_vec::<f32>()
            .unwrap()
    }

    fn assert_all_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() <= 1e-6, "{x} != {y}");
        }
    }

    fn metrics(accuracy: f64) -> MetricMap {
        MetricMap::from([("accuracy".to_string(), accuracy)])
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_round_trip_restores_model_and_optimizer() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let batch = fixed_images::<TestBackend>(4, 8, &device);

        let mut optimizer = AdamConfig::new().init::<TestBackend, Classifier<TestBackend>>();
        let model = step(init_tiny::<TestBackend>(&device), &mut optimizer, batch.clone());

        let val_metrics = metrics(0.5);
        save_checkpoint(
            Checkpoint { epoch: 3, model: &model, optimizer: &optimizer, val_metrics: &val_metrics },
            false,
            dir.path(),
        )
        .unwrap();

        let restored = load_checkpoint(
            dir.path(),
            LATEST,
            init_tiny::<TestBackend>(&device),
            AdamConfig::new().init::<TestBackend, Classifier<TestBackend>>(),
            &device,
        )
        .unwrap();
        assert_eq!(restored.meta, CheckpointMeta { epoch: 3, val_metrics });
        assert_eq!(logits(&restored.model, batch.clone()), logits(&model, batch.clone()));

        // Identical Adam moments produce identical updates.
        let mut restored_optimizer = restored.optimizer;
        let continued = step(model, &mut optimizer, batch.clone());
        let resumed = step(restored.model, &mut restored_optimizer, batch.clone());
        assert_all_close(&logits(&resumed, batch.clone()), &logits(&continued, batch));
    }

    #[test]
    fn test_model_and_optimizer_records_use_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model = init_tiny::<TestBackend>(&device);
        let optimizer = AdamConfig::new().init::<TestBackend, Classifier<TestBackend>>();

        let val_metrics = metrics(0.5);
        save_checkpoint(
            Checkpoint { epoch: 1, model: &model, optimizer: &optimizer, val_metrics: &val_metrics },
            false,
            dir.path(),
        )
        .unwrap();
        assert_eq!(
            file_names(dir.path()),
            vec!["latest.json", "latest.model.mpk", "latest.optim.mpk"]
        );

        save_checkpoint(
            Checkpoint { epoch: 2, model: &model, optimizer: &optimizer, val_metrics: &val_metrics },
            true,
            dir.path(),
        )
        .unwrap();
        assert_eq!(
            file_names(dir.path()),
            vec![
                "best.json",
                "best.model.mpk",
                "best.optim.mpk",
                "latest.json",
                "latest.model.mpk",
                "latest.optim.mpk",
            ]
        );
    }

    #[test]
    fn test_best_copy_only_when_best() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model = init_tiny::<TestBackend>(&device);
        let optimizer = AdamConfig::new().init::<TestBackend, Classifier<TestBackend>>();

        let first = metrics(0.7);
        save_checkpoint(
            Checkpoint { epoch: 1, model: &model, optimizer: &optimizer, val_metrics: &first },
            true,
            dir.path(),
        )
        .unwrap();
        let second = metrics(0.6);
        save_checkpoint(
            Checkpoint { epoch: 2, model: &model, optimizer: &optimizer, val_metrics: &second },
            false,
            dir.path(),
        )
        .unwrap();

        assert_eq!(read_meta(dir.path(), BEST).unwrap().epoch, 1);
        assert_eq!(read_meta(dir.path(), LATEST).unwrap().epoch, 2);

        let restored = load_checkpoint(
            dir.path(),
            BEST,
            init_tiny::<TestBackend>(&device),
            AdamConfig::new().init::<TestBackend, Classifier<TestBackend>>(),
            &device,
        )
        .unwrap();
        assert_eq!(restored.meta.val_metrics, first);
    }

    #[test]
    fn test_dotted_tag_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let batch = fixed_images::<TestBackend>(2, 8, &device);
        let model = init_tiny::<TestBackend>(&device);
        let optimizer = AdamConfig::new().init::<TestBackend, Classifier<TestBackend>>();

        let val_metrics = metrics(0.5);
        save_checkpoint(
            Checkpoint { epoch: 1, model: &model, optimizer: &optimizer, val_metrics: &val_metrics },
            false,
            dir.path(),
        )
        .unwrap();
        copy_checkpoint(dir.path(), LATEST, "run.v2").unwrap();

        let restored = load_checkpoint(
            dir.path(),
            "run.v2",
            init_tiny::<TestBackend>(&device),
            AdamConfig::new().init::<TestBackend, Classifier<TestBackend>>(),
            &device,
        )
        .unwrap();
        assert_eq!(logits(&restored.model, batch.clone()), logits(&model, batch));
    }

    #[test]
    fn test_missing_checkpoint_is_restore_error() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let result = load_checkpoint(
            dir.path(),
            "best",
            init_tiny::<TestBackend>(&device),
            AdamConfig::new().init::<TestBackend, Classifier<TestBackend>>(),
            &device,
        );
        match result {
            Err(TrainError::Restore(path)) => assert!(path.ends_with("best.model.mpk")),
            _ => panic!("expected a restore error"),
        }
        assert!(matches!(
            copy_checkpoint(dir.path(), LATEST, BEST),
            Err(TrainError::Restore(_))
        ));
    }
}
