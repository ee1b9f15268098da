//! Checkpoint persistence, optimizers and learning-rate schedules

pub mod checkpoint;
pub mod optimizer;
pub mod scheduler;

pub use checkpoint::{
    strip_module_prefix,
    strip_param_prefix,
    Artifact,
    ArtifactKey,
    ArtifactKind,
    CheckpointStore,
    MODULE_PREFIX,
};

pub use optimizer::{Adam, Optimizer, OptimizerState};

pub use scheduler::{get_scheduler, lambda_rule, LrPolicy, LrScheduler};
