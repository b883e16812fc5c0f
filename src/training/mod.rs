pub mod checkpoint;
pub mod config;
pub mod evaluate;
pub mod metrics;
pub mod objectives;
pub mod optim;
pub mod telemetry;
pub mod trainer;

pub use config::{Hyperparameters, OptimizerKind, PARAMS_FILE};
pub use evaluate::HeldOutEvaluator;
pub use objectives::Metrics;
pub use optim::LrSchedule;
pub use telemetry::{CsvScalarWriter, SCALARS_FILE};
pub use trainer::{train_and_evaluate, Session, TrainingOutcome};
