use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TrainError;

pub const PARAMS_FILE: &str = "params.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    Adam,
    #[serde(rename = "SGD")]
    Sgd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerKind {
    #[serde(rename = "MultiStepLR")]
    MultiStep,
}

/// All hyperparameters for a run, read from `params.json` in the experiment directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Learning rate before any scheduling
    pub initial_lr: f64,
    /// Number of samples per batch
    pub batch_size: usize,
    /// Number of full passes through the training data
    pub num_epochs: usize,
    pub optimizer: OptimizerKind,
    /// Nesterov momentum, SGD only
    #[serde(default = "default_momentum")]
    pub momentum: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default)]
    pub scheduler: Option<SchedulerKind>,
    /// Epochs after which the learning rate is multiplied by `scheduler_gamma`
    #[serde(default)]
    pub scheduler_milestones: Vec<usize>,
    #[serde(default = "default_gamma")]
    pub scheduler_gamma: f64,
    /// Record training metrics every N batches
    #[serde(default = "default_summary_steps")]
    pub save_summary_steps: usize,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_momentum() -> f64 {
    0.9
}

fn default_gamma() -> f64 {
    0.1
}

fn default_summary_steps() -> usize {
    100
}

fn default_num_workers() -> usize {
    1
}

fn default_seed() -> u64 {
    200
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            initial_lr: 0.1,
            batch_size: 128,
            num_epochs: 160,
            optimizer: OptimizerKind::Sgd,
            momentum: default_momentum(),
            weight_decay: 1e-4,
            scheduler: Some(SchedulerKind::MultiStep),
            scheduler_milestones: vec![80, 120],
            scheduler_gamma: default_gamma(),
            save_summary_steps: default_summary_steps(),
            num_workers: default_num_workers(),
            seed: default_seed(),
        }
    }
}

impl Hyperparameters {
    /// Reads and validates the hyperparameter file
    pub fn load(path: &Path) -> Result<Self, TrainError> {
        if !path.is_file() {
            return Err(TrainError::Config(format!(
                "no configuration file found at {}",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)?;
        let params: Self = serde_json::from_str(&content)
            .map_err(|e| TrainError::Config(format!("invalid {}: {e}", path.display())))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), TrainError> {
        let fail = |msg: &str| Err(TrainError::Config(msg.to_string()));

        if self.batch_size == 0 {
            return fail("batch_size must be at least 1");
        }
        if self.num_epochs == 0 {
            return fail("num_epochs must be at least 1");
        }
        if self.save_summary_steps == 0 {
            return fail("save_summary_steps must be at least 1");
        }
        if self.initial_lr.is_nan() || self.initial_lr <= 0.0 {
            return fail("initial_lr must be positive");
        }
        if self.weight_decay < 0.0 {
            return fail("weight_decay must not be negative");
        }
        if self.scheduler_milestones.windows(2).any(|w| w[0] >= w[1]) {
            return fail("scheduler_milestones must be strictly increasing");
        }
        if self.scheduler == Some(SchedulerKind::MultiStep) && self.scheduler_milestones.is_empty() {
            return fail("MultiStepLR needs at least one milestone");
        }
        Ok(())
    }
}
