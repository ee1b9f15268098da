//! Lifecycle events emitted by models and the factory.
//!
//! Events are informational only. The default sink forwards them to
//! `tracing`; tests install a [`RecordingSink`] and assert on what was emitted.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// A variant was constructed by the factory.
    Created { name: String },
    NetworkSaved { path: PathBuf },
    NetworkLoaded { path: PathBuf },
    OptimizerSaved { path: PathBuf },
    OptimizerLoaded { path: PathBuf },
    /// Structural summary of one network plus its parameter count.
    NetworkSummary { summary: String, num_params: usize },
}

/// Destination for [`ModelEvent`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ModelEvent);
}

/// Forwards every event to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ModelEvent) {
        match event {
            ModelEvent::Created { name } => tracing::info!("Model {} was created", name),
            ModelEvent::NetworkSaved { path } => tracing::info!("saved net: {}", path.display()),
            ModelEvent::NetworkLoaded { path } => tracing::info!("loaded net: {}", path.display()),
            ModelEvent::OptimizerSaved { path } => {
                tracing::info!("saved optimizer: {}", path.display())
            }
            ModelEvent::OptimizerLoaded { path } => {
                tracing::info!("loaded optimizer: {}", path.display())
            }
            ModelEvent::NetworkSummary { summary, num_params } => {
                tracing::info!("{}", summary);
                tracing::info!("Total number of parameters: {}", num_params);
            }
        }
    }
}

/// Keeps every emitted event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ModelEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ModelEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ModelEvent) {
        self.events.lock().push(event);
    }
}

/// Sink used when the caller does not inject one.
pub fn default_sink() -> Arc<dyn EventSink> {
    Arc::new(TracingSink)
}
