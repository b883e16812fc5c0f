pub mod classifier;
pub mod registry;

pub use classifier::Classifier;
pub use registry::{ModelCatalog, ModelRegistry};
