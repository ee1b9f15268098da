//! Model variants, the lifecycle contract they implement and the factory that
//! constructs them by name.

pub mod base_model;
pub mod factory;
pub mod generator;
pub mod lifecycle;
pub mod mesh;
pub mod network;
pub mod runners;
pub mod trainers;

pub use base_model::BaseModel;
pub use factory::{ModelFactory, ModelInstance, ModelKind};
pub use lifecycle::{Batch, ImagePaths, Model, RunnerModel, Scalars, TrainerModel, Visuals};
pub use mesh::map_fn_dim;
pub use network::{ConvNet, Network};
