//! State and checkpoint helpers shared by every trainer and runner.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ModelOptions;
use crate::error::ModelResult;
use crate::events::{EventSink, ModelEvent};
use crate::models::mesh::map_fn_dim;
use crate::models::network::Network;
use crate::tensor::{Device, TensorKind};
use crate::training::checkpoint::{strip_module_prefix, ArtifactKey, CheckpointStore};
use crate::training::optimizer::{Optimizer, OptimizerState};
use crate::training::scheduler::{get_scheduler, LrScheduler};

/// Derived state every variant composes: identity, device, run directory and
/// conditioning channel counts.
pub struct BaseModel {
    name: String,
    options: Arc<ModelOptions>,
    device: Device,
    backend: candle_core::Device,
    store: CheckpointStore,
    g_cond_nc: usize,
    d_cond_nc: usize,
    events: Arc<dyn EventSink>,
}

impl fmt::Debug for BaseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseModel")
            .field("name", &self.name)
            .field("device", &self.device)
            .field("save_dir", &self.store.dir())
            .field("g_cond_nc", &self.g_cond_nc)
            .field("d_cond_nc", &self.d_cond_nc)
            .finish()
    }
}

impl BaseModel {
    pub fn new(
        name: impl Into<String>,
        options: Arc<ModelOptions>,
        events: Arc<dyn EventSink>,
    ) -> ModelResult<Self> {
        let (g_cond_nc, d_cond_nc) = Self::cond_nc(&options)?;
        let device = Device::from_gpu_ids(&options.gpu_ids);
        Ok(Self {
            name: name.into(),
            backend: device.backend()?,
            device,
            store: CheckpointStore::new(options.save_dir()),
            g_cond_nc,
            d_cond_nc,
            options,
            events,
        })
    }

    /// Conditioning channels for generator and discriminator. An empty map
    /// name counts as unset.
    pub fn cond_nc(options: &ModelOptions) -> ModelResult<(usize, usize)> {
        match options.map_name.as_deref().filter(|m| !m.is_empty()) {
            Some(map_name) => {
                let nc = map_fn_dim(map_name)?;
                Ok((nc, nc))
            }
            None => Ok((options.cond_nc, options.cond_nc)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_train(&self) -> bool {
        self.options.is_train
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Backend device tensors and parameters are allocated on.
    pub fn backend(&self) -> &candle_core::Device {
        &self.backend
    }

    pub fn tensor_kind(&self) -> TensorKind {
        self.device.tensor_kind()
    }

    pub fn save_dir(&self) -> &Path {
        self.store.dir()
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn g_cond_nc(&self) -> usize {
        self.g_cond_nc
    }

    pub fn d_cond_nc(&self) -> usize {
        self.d_cond_nc
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Restore `network` from `net_epoch_<epoch>_id_<label>.pth`.
    ///
    /// Unless the live network is itself data-parallel wrapped (`need_module`),
    /// a leading `module.` is stripped from saved parameter names first.
    pub fn load_network(
        &self,
        network: &mut dyn Network,
        network_label: &str,
        epoch_label: impl fmt::Display,
        need_module: bool,
    ) -> ModelResult<PathBuf> {
        let key = ArtifactKey::network(network_label, epoch_label);
        let (path, artifact) = self.store.load(&key)?;

        let state = if need_module {
            artifact.tensors
        } else {
            strip_module_prefix(artifact.tensors)
        };
        network.load_state_dict(state)?;

        self.events
            .emit(ModelEvent::NetworkLoaded { path: path.clone() });
        Ok(path)
    }

    pub fn save_network(
        &self,
        network: &dyn Network,
        network_label: &str,
        epoch_label: impl fmt::Display,
    ) -> ModelResult<PathBuf> {
        let key = ArtifactKey::network(network_label, epoch_label);
        let path = self
            .store
            .save(&key, &network.state_dict()?, Default::default())?;
        self.events
            .emit(ModelEvent::NetworkSaved { path: path.clone() });
        Ok(path)
    }

    pub fn save_optimizer(
        &self,
        optimizer: &dyn Optimizer,
        optimizer_label: &str,
        epoch_label: impl fmt::Display,
    ) -> ModelResult<PathBuf> {
        let key = ArtifactKey::optimizer(optimizer_label, epoch_label);
        let state = optimizer.state();
        let path = self.store.save(&key, &state.tensors, state.scalars)?;
        self.events
            .emit(ModelEvent::OptimizerSaved { path: path.clone() });
        Ok(path)
    }

    pub fn load_optimizer(
        &self,
        optimizer: &mut dyn Optimizer,
        optimizer_label: &str,
        epoch_label: impl fmt::Display,
    ) -> ModelResult<PathBuf> {
        let key = ArtifactKey::optimizer(optimizer_label, epoch_label);
        let (path, artifact) = self.store.load(&key)?;
        optimizer.load_state(OptimizerState {
            tensors: artifact.tensors,
            scalars: artifact.metadata,
        })?;
        self.events
            .emit(ModelEvent::OptimizerLoaded { path: path.clone() });
        Ok(path)
    }

    /// Scheduler for `optimizer` following the configured policy.
    pub fn get_scheduler(&self, optimizer: &mut dyn Optimizer) -> ModelResult<LrScheduler> {
        get_scheduler(optimizer, &self.options)
    }

    /// Emit a structural summary of `network`; returns its parameter count.
    pub fn print_network(&self, network: &dyn Network) -> usize {
        let num_params = network.num_parameters();
        self.events.emit(ModelEvent::NetworkSummary {
            summary: network.summary(),
            num_params,
        });
        num_params
    }
}
