pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod tensor;
pub mod training;

// Re-export commonly used types
pub use config::{ModelArgs, ModelOptions};
pub use error::{ModelError, ModelResult};
pub use events::{default_sink, EventSink, ModelEvent, RecordingSink, TracingSink};
pub use models::{Batch, Model, ModelFactory, ModelInstance, ModelKind, RunnerModel, TrainerModel};
pub use tensor::{to_host, Device, HostState, StateDict, Tensor, TensorKind};
