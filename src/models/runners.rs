//! Inference runners: a generator stack restored from a training run.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::ModelOptions;
use crate::error::ModelResult;
use crate::events::EventSink;
use crate::models::base_model::BaseModel;
use crate::models::generator::{pass_visuals, Generator, Input};
use crate::models::lifecycle::{Batch, Model, RunnerModel, Visuals};
use crate::models::network::Network;

#[derive(Debug, Clone, Copy)]
pub struct RunnerPreset {
    pub name: &'static str,
    pub generator_inputs: &'static [Input],
    pub background: Option<&'static [Input]>,
}

/// Fills the masked region of a background image.
pub const INPAINTOR: RunnerPreset = RunnerPreset {
    name: "Inpaintor",
    generator_inputs: &[Input::BgImg, Input::BgMask],
    background: None,
};

/// Renders the source appearance under the target conditioning over a
/// restored background.
pub const IMITATOR: RunnerPreset = RunnerPreset {
    name: "Imitator",
    generator_inputs: &[Input::SrcImg, Input::SrcCond],
    background: Some(&[Input::BgImg, Input::BgMask]),
};

pub struct GeneratorRunner {
    base: BaseModel,
    generator: Generator,
    visuals: Option<Visuals>,
}

impl GeneratorRunner {
    pub fn new(
        preset: RunnerPreset,
        options: Arc<ModelOptions>,
        events: Arc<dyn EventSink>,
    ) -> ModelResult<Self> {
        let base = BaseModel::new(preset.name, options, events)?;
        let mut rng = StdRng::seed_from_u64(base.options().seed);
        let mut generator = Generator::new(
            preset.generator_inputs,
            preset.background.map(|inputs| (inputs, false)),
            base.g_cond_nc(),
            base.backend(),
            &mut rng,
        )?;
        generator.set_training(false);

        for (_, net) in generator.networks() {
            base.print_network(net);
        }

        let epoch = base.options().load_epoch;
        if epoch > 0 {
            for (label, net) in generator.networks_mut() {
                base.load_network(net, label, epoch, false)?;
            }
        } else {
            tracing::warn!(
                "{} runs with freshly initialized weights (load_epoch = 0)",
                base.name()
            );
        }

        Ok(Self {
            base,
            generator,
            visuals: None,
        })
    }
}

impl Model for GeneratorRunner {
    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn networks(&self) -> Vec<(&str, &dyn Network)> {
        self.generator.networks()
    }
}

impl RunnerModel for GeneratorRunner {
    fn infer(&mut self, batch: Batch) -> ModelResult<Visuals> {
        self.generator.set_training(false);
        let pass = self.generator.forward(&batch)?;
        let visuals = pass_visuals(&batch, &pass);
        self.visuals = Some(visuals.clone());
        Ok(visuals)
    }

    /// Visuals of the last [`infer`](RunnerModel::infer) call.
    fn visualize(&self) -> ModelResult<Visuals> {
        Ok(self.visuals.clone().unwrap_or_default())
    }
}
