use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::{error::TrainError, model::classifier::ClassifierConfig};

/// CIFAR-10 has ten classes
const NUM_CLASSES: usize = 10;

pub type Constructor = fn() -> ClassifierConfig;

fn resnet8() -> ClassifierConfig {
    ClassifierConfig::cifar_resnet(1, NUM_CLASSES)
}

fn resnet20() -> ClassifierConfig {
    ClassifierConfig::cifar_resnet(3, NUM_CLASSES)
}

fn resnet32() -> ClassifierConfig {
    ClassifierConfig::cifar_resnet(5, NUM_CLASSES)
}

fn plain20() -> ClassifierConfig {
    ClassifierConfig::cifar_plain(3, NUM_CLASSES)
}

/// Constructors keyed by their fully-qualified reference, e.g. `resnet.resnet20`
pub struct ModelRegistry {
    constructors: BTreeMap<&'static str, Constructor>,
}

impl ModelRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self {
            constructors: BTreeMap::new(),
        };
        registry.register("resnet.resnet8", resnet8);
        registry.register("resnet.resnet20", resnet20);
        registry.register("resnet.resnet32", resnet32);
        registry.register("resnet.plain20", plain20);
        registry
    }

    pub fn register(&mut self, reference: &'static str, constructor: Constructor) {
        self.constructors.insert(reference, constructor);
    }

    /// Looks up `name` in the catalog and builds the configuration it refers to
    pub fn resolve(&self, catalog: &ModelCatalog, name: &str) -> Result<ClassifierConfig, TrainError> {
        let reference = catalog.reference(name).ok_or_else(|| {
            TrainError::Config(format!(
                "unknown model '{name}', known models: {}",
                catalog.names().collect::<Vec<_>>().join(", ")
            ))
        })?;
        let constructor = self.constructors.get(reference).ok_or_else(|| {
            TrainError::Config(format!(
                "model '{name}' refers to unknown constructor '{reference}'"
            ))
        })?;
        debug!(name, reference, "resolved model");
        Ok(constructor())
    }
}

/// The models document: model name -> constructor reference
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCatalog {
    entries: BTreeMap<String, String>,
}

impl ModelCatalog {
    /// Short names for every built-in constructor
    pub fn builtin() -> Self {
        let entries = ModelRegistry::builtin()
            .constructors
            .keys()
            .filter_map(|reference| {
                let (_, short) = reference.split_once('.')?;
                Some((short.to_string(), reference.to_string()))
            })
            .collect();
        Self { entries }
    }

    /// Reads a JSON object of `"name": "module.constructor"` pairs
    pub fn load(path: &Path) -> Result<Self, TrainError> {
        let content = fs::read_to_string(path).map_err(|e| {
            TrainError::Config(format!("cannot read models file {}: {e}", path.display()))
        })?;
        let entries = serde_json::from_str(&content).map_err(|e| {
            TrainError::Config(format!("invalid models file {}: {e}", path.display()))
        })?;
        Ok(Self { entries })
    }

    pub fn reference(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
