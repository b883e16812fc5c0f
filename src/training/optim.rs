use burn::optim::{
    decay::WeightDecayConfig, momentum::MomentumConfig, AdamConfig, SgdConfig,
};

use crate::training::config::{Hyperparameters, SchedulerKind};

fn weight_decay(params: &Hyperparameters) -> Option<WeightDecayConfig> {
    (params.weight_decay > 0.0).then(|| WeightDecayConfig::new(params.weight_decay as f32))
}

/// Adam with optional L2 weight decay
pub fn adam(params: &Hyperparameters) -> AdamConfig {
    AdamConfig::new().with_weight_decay(weight_decay(params))
}

/// SGD with Nesterov momentum and optional L2 weight decay
pub fn sgd(params: &Hyperparameters) -> SgdConfig {
    let momentum = MomentumConfig::new()
        .with_momentum(params.momentum)
        .with_dampening(0.0)
        .with_nesterov(true);
    SgdConfig::new()
        .with_momentum(Some(momentum))
        .with_weight_decay(weight_decay(params))
}

/// Multiplies the learning rate by `gamma` once the number of completed epochs
/// reaches each milestone.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiStepLr {
    initial_lr: f64,
    milestones: Vec<usize>,
    gamma: f64,
    epochs_stepped: usize,
}

impl MultiStepLr {
    pub fn new(initial_lr: f64, milestones: Vec<usize>, gamma: f64) -> Self {
        Self {
            initial_lr,
            milestones,
            gamma,
            epochs_stepped: 0,
        }
    }

    pub fn lr(&self) -> f64 {
        let passed = self
            .milestones
            .iter()
            .filter(|&&m| m <= self.epochs_stepped)
            .count();
        self.initial_lr * self.gamma.powi(passed as i32)
    }

    pub fn step(&mut self) {
        self.epochs_stepped += 1;
    }
}

/// Learning rate used for every optimizer step of an epoch
#[derive(Debug, Clone, PartialEq)]
pub enum LrSchedule {
    Constant(f64),
    MultiStep(MultiStepLr),
}

impl LrSchedule {
    pub fn from_params(params: &Hyperparameters) -> Self {
        match params.scheduler {
            Some(SchedulerKind::MultiStep) => LrSchedule::MultiStep(MultiStepLr::new(
                params.initial_lr,
                params.scheduler_milestones.clone(),
                params.scheduler_gamma,
            )),
            None => LrSchedule::Constant(params.initial_lr),
        }
    }

    pub fn lr(&self) -> f64 {
        match self {
            LrSchedule::Constant(lr) => *lr,
            LrSchedule::MultiStep(schedule) => schedule.lr(),
        }
    }

    /// Advances by one epoch
    pub fn step(&mut self) {
        if let LrSchedule::MultiStep(schedule) = self {
            schedule.step();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-12, "{a} != {b}");
    }

    #[test]
    fn test_multi_step_decays_at_milestones() {
        let mut schedule = MultiStepLr::new(0.1, vec![2, 4], 0.1);
        let mut lrs = Vec::new();
        for _ in 0..6 {
            lrs.push(schedule.lr());
            schedule.step();
        }
        let expected = [0.1, 0.1, 0.01, 0.01, 0.001, 0.001];
        for (lr, want) in lrs.iter().zip(expected) {
            assert_close(*lr, want);
        }
    }

    #[test]
    fn test_schedule_from_params() {
        let constant = Hyperparameters {
            initial_lr: 0.01,
            scheduler: None,
            ..Default::default()
        };
        let mut schedule = LrSchedule::from_params(&constant);
        schedule.step();
        assert_eq!(schedule, LrSchedule::Constant(0.01));

        let stepped = Hyperparameters {
            initial_lr: 1.0,
            scheduler_milestones: vec![1],
            scheduler_gamma: 0.5,
            ..Default::default()
        };
        let mut schedule = LrSchedule::from_params(&stepped);
        assert_close(schedule.lr(), 1.0);
        schedule.step();
        assert_close(schedule.lr(), 0.5);
    }

    #[test]
    fn test_weight_decay_only_when_positive() {
        let none = Hyperparameters { weight_decay: 0.0, ..Default::default() };
        assert!(weight_decay(&none).is_none());

        let some = Hyperparameters { weight_decay: 5e-4, ..Default::default() };
        assert_eq!(weight_decay(&some).unwrap().penalty, 5e-4);
    }
}
