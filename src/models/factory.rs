//! Name-based model construction.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::ModelOptions;
use crate::error::{ModelError, ModelResult};
use crate::events::{EventSink, ModelEvent};
use crate::models::lifecycle::{Model, RunnerModel, TrainerModel};
use crate::models::network::Network;
use crate::models::runners::{GeneratorRunner, IMITATOR, INPAINTOR};
use crate::models::trainers::{
    GanTrainer, CONCAT_TRAINER, FEATURE_WARPING_TRAINER, IMPERSONATOR_TRAINER, IMPER_TRAINER,
    IMPER_TRAINER_FIXBG, INPAINTOR_TRAINER, TEXTURE_WARPING_TRAINER,
};

/// Registered model variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    BackgroundInpaintor,
    ImperV2,
    ImperV2FixBg,
    ImperV2FixBgImitator,
    Concat,
    Texture,
    Feature,
    Impersonator,
}

impl ModelKind {
    pub const ALL: [ModelKind; 8] = [
        ModelKind::BackgroundInpaintor,
        ModelKind::ImperV2,
        ModelKind::ImperV2FixBg,
        ModelKind::ImperV2FixBgImitator,
        ModelKind::Concat,
        ModelKind::Texture,
        ModelKind::Feature,
        ModelKind::Impersonator,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::BackgroundInpaintor => "background_inpaintor",
            ModelKind::ImperV2 => "imper_v2",
            ModelKind::ImperV2FixBg => "imper_v2_fixbg",
            ModelKind::ImperV2FixBgImitator => "imper_v2_fixbg_imitator",
            ModelKind::Concat => "concat",
            ModelKind::Texture => "texture",
            ModelKind::Feature => "feature",
            ModelKind::Impersonator => "impersonator",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ModelError::UnknownModelKind(s.to_string()))
    }
}

/// A constructed variant in one of the two personalities.
pub enum ModelInstance {
    Trainer(Box<dyn TrainerModel>),
    Runner(Box<dyn RunnerModel>),
}

impl fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let personality = match self {
            ModelInstance::Trainer(_) => "Trainer",
            ModelInstance::Runner(_) => "Runner",
        };
        f.debug_tuple(personality).field(&self.name()).finish()
    }
}

impl ModelInstance {
    pub fn name(&self) -> &str {
        match self {
            ModelInstance::Trainer(m) => m.name(),
            ModelInstance::Runner(m) => m.name(),
        }
    }

    pub fn is_train(&self) -> bool {
        match self {
            ModelInstance::Trainer(m) => m.is_train(),
            ModelInstance::Runner(m) => m.is_train(),
        }
    }

    pub fn networks(&self) -> Vec<(&str, &dyn Network)> {
        match self {
            ModelInstance::Trainer(m) => m.networks(),
            ModelInstance::Runner(m) => m.networks(),
        }
    }

    pub fn as_trainer(&mut self) -> Option<&mut dyn TrainerModel> {
        match self {
            ModelInstance::Trainer(m) => Some(m.as_mut()),
            ModelInstance::Runner(_) => None,
        }
    }

    pub fn as_runner(&mut self) -> Option<&mut dyn RunnerModel> {
        match self {
            ModelInstance::Runner(m) => Some(m.as_mut()),
            ModelInstance::Trainer(_) => None,
        }
    }

    pub fn into_trainer(self) -> Option<Box<dyn TrainerModel>> {
        match self {
            ModelInstance::Trainer(m) => Some(m),
            ModelInstance::Runner(_) => None,
        }
    }

    pub fn into_runner(self) -> Option<Box<dyn RunnerModel>> {
        match self {
            ModelInstance::Runner(m) => Some(m),
            ModelInstance::Trainer(_) => None,
        }
    }
}

pub struct ModelFactory;

impl ModelFactory {
    /// Construct the variant registered under `model_name`.
    ///
    /// Only the selected variant's constructor runs.
    pub fn create(
        model_name: &str,
        options: Arc<ModelOptions>,
        events: Arc<dyn EventSink>,
    ) -> ModelResult<ModelInstance> {
        let kind: ModelKind = model_name.parse()?;
        let is_train = options.is_train;

        let instance = match kind {
            ModelKind::BackgroundInpaintor if is_train => {
                trainer(GanTrainer::new(INPAINTOR_TRAINER, options, events.clone())?)
            }
            ModelKind::BackgroundInpaintor => {
                runner(GeneratorRunner::new(INPAINTOR, options, events.clone())?)
            }
            ModelKind::ImperV2 => trainer(GanTrainer::new(IMPER_TRAINER, options, events.clone())?),
            ModelKind::ImperV2FixBg => {
                trainer(GanTrainer::new(IMPER_TRAINER_FIXBG, options, events.clone())?)
            }
            ModelKind::ImperV2FixBgImitator => {
                runner(GeneratorRunner::new(IMITATOR, options, events.clone())?)
            }
            ModelKind::Concat => trainer(GanTrainer::new(CONCAT_TRAINER, options, events.clone())?),
            ModelKind::Texture => {
                trainer(GanTrainer::new(TEXTURE_WARPING_TRAINER, options, events.clone())?)
            }
            ModelKind::Feature => {
                trainer(GanTrainer::new(FEATURE_WARPING_TRAINER, options, events.clone())?)
            }
            ModelKind::Impersonator => {
                trainer(GanTrainer::new(IMPERSONATOR_TRAINER, options, events.clone())?)
            }
        };

        events.emit(ModelEvent::Created {
            name: instance.name().to_string(),
        });
        Ok(instance)
    }
}

fn trainer(model: impl TrainerModel + 'static) -> ModelInstance {
    ModelInstance::Trainer(Box::new(model))
}

fn runner(model: impl RunnerModel + 'static) -> ModelInstance {
    ModelInstance::Runner(Box::new(model))
}
