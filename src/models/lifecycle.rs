//! Lifecycle contract for trainers and runners.
//!
//! Every required operation has a default body that fails with
//! [`ModelError::NotImplemented`], so an incomplete variant is caught at the
//! first call instead of silently doing nothing. Diagnostic getters default to
//! empty maps.

use std::collections::BTreeMap;

use crate::error::{ModelError, ModelResult};
use crate::models::base_model::BaseModel;
use crate::models::network::Network;
use crate::tensor::Tensor;

/// Named tensors for display.
pub type Visuals = BTreeMap<String, Tensor>;

/// Named scalar diagnostics (losses, learning rates).
pub type Scalars = BTreeMap<String, f64>;

/// Source file paths of the current batch, by role.
pub type ImagePaths = BTreeMap<String, String>;

/// One batch of named `[n, c, h, w]` input tensors, as produced by a dataset.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub tensors: BTreeMap<String, Tensor>,
    pub paths: ImagePaths,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tensor(mut self, key: &str, tensor: Tensor) -> Self {
        self.tensors.insert(key.to_string(), tensor);
        self
    }

    pub fn with_path(mut self, key: &str, path: impl Into<String>) -> Self {
        self.paths.insert(key.to_string(), path.into());
        self
    }

    pub fn get(&self, key: &str) -> ModelResult<&Tensor> {
        self.tensors
            .get(key)
            .ok_or_else(|| ModelError::MissingInput(key.to_string()))
    }
}

/// Capabilities shared by both personalities.
pub trait Model: Send {
    fn base(&self) -> &BaseModel;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn is_train(&self) -> bool {
        self.base().is_train()
    }

    /// Owned sub-networks by label.
    fn networks(&self) -> Vec<(&str, &dyn Network)> {
        Vec::new()
    }
}

/// Training personality.
pub trait TrainerModel: Model {
    fn set_input(&mut self, _batch: Batch) -> ModelResult<()> {
        Err(ModelError::NotImplemented("set_input"))
    }

    fn set_train(&mut self) -> ModelResult<()> {
        Err(ModelError::NotImplemented("set_train"))
    }

    fn set_eval(&mut self) -> ModelResult<()> {
        Err(ModelError::NotImplemented("set_eval"))
    }

    fn forward(&mut self) -> ModelResult<Visuals> {
        Err(ModelError::NotImplemented("forward"))
    }

    /// Inference-only forward pass; parameters are left untouched.
    fn test(&mut self) -> ModelResult<Visuals> {
        Err(ModelError::NotImplemented("test"))
    }

    /// Forward, losses, backward and one optimizer step for the bound batch.
    fn optimize_parameters(&mut self) -> ModelResult<()> {
        Err(ModelError::NotImplemented("optimize_parameters"))
    }

    fn get_image_paths(&self) -> ImagePaths {
        ImagePaths::new()
    }

    fn get_current_visuals(&self) -> Visuals {
        Visuals::new()
    }

    fn get_current_errors(&self) -> Scalars {
        Scalars::new()
    }

    fn get_current_scalars(&self) -> Scalars {
        Scalars::new()
    }

    fn save(&mut self, _label: &str) -> ModelResult<()> {
        Err(ModelError::NotImplemented("save"))
    }

    fn load(&mut self) -> ModelResult<()> {
        Err(ModelError::NotImplemented("load"))
    }

    fn update_learning_rate(&mut self) -> ModelResult<()> {
        Ok(())
    }
}

/// Inference personality.
pub trait RunnerModel: Model {
    fn infer(&mut self, _batch: Batch) -> ModelResult<Visuals> {
        Err(ModelError::NotImplemented("infer"))
    }

    fn visualize(&self) -> ModelResult<Visuals> {
        Err(ModelError::NotImplemented("visualize"))
    }
}
