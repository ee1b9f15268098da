//! Adversarial trainers behind the registered training variants.
//!
//! All of them share one loop: a generator stack reconstructs the target
//! image and a patch discriminator scores real against generated pixels.
//! Variants differ in what the generator sees, whether a background branch
//! exists and is trained, and whether the discriminator is conditioned.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::ModelOptions;
use crate::error::{ModelError, ModelResult};
use crate::events::EventSink;
use crate::models::base_model::BaseModel;
use crate::models::generator::{
    gather, pass_visuals, Generator, Input, HIDDEN_NC, IMAGE_NC, TARGET_KEY,
};
use crate::models::lifecycle::{Batch, ImagePaths, Model, Scalars, TrainerModel, Visuals};
use crate::models::network::{ConvNet, Network};
use crate::tensor::Tensor;
use crate::training::optimizer::{Adam, Optimizer};
use crate::training::scheduler::LrScheduler;

const IMPER_G_INPUTS: &[Input] = &[Input::SrcImg, Input::SrcCond];
const BG_INPUTS: &[Input] = &[Input::BgImg, Input::BgMask];

/// Static description of one trainer variant.
#[derive(Debug, Clone, Copy)]
pub struct TrainerPreset {
    pub name: &'static str,
    pub generator_inputs: &'static [Input],
    /// Background branch inputs and whether it is optimized.
    pub background: Option<(&'static [Input], bool)>,
    /// Feed the conditioning maps to the discriminator next to the image.
    pub conditioned_discriminator: bool,
}

const fn preset(
    name: &'static str,
    generator_inputs: &'static [Input],
    background: Option<bool>,
    conditioned_discriminator: bool,
) -> TrainerPreset {
    TrainerPreset {
        name,
        generator_inputs,
        background: match background {
            Some(trainable) => Some((BG_INPUTS, trainable)),
            None => None,
        },
        conditioned_discriminator,
    }
}

pub const INPAINTOR_TRAINER: TrainerPreset = preset("InpaintorTrainer", BG_INPUTS, None, false);
pub const IMPER_TRAINER: TrainerPreset = preset("ImperTrainer", IMPER_G_INPUTS, Some(true), true);
pub const IMPER_TRAINER_FIXBG: TrainerPreset =
    preset("ImperTrainerFixBG", IMPER_G_INPUTS, Some(false), true);
pub const IMPERSONATOR_TRAINER: TrainerPreset =
    preset("ImpersonatorTrainer", IMPER_G_INPUTS, Some(true), true);
pub const CONCAT_TRAINER: TrainerPreset = preset("ConcatTrainer", IMPER_G_INPUTS, None, true);
pub const TEXTURE_WARPING_TRAINER: TrainerPreset =
    preset("TextureWarpingTrainer", &[Input::SrcImg], None, true);
pub const FEATURE_WARPING_TRAINER: TrainerPreset =
    preset("FeatureWarpingTrainer", IMPER_G_INPUTS, None, false);

struct Schedulers {
    g: LrScheduler,
    d: LrScheduler,
    bg: Option<LrScheduler>,
}

/// Generator/discriminator trainer configured by a [`TrainerPreset`].
pub struct GanTrainer {
    base: BaseModel,
    preset: TrainerPreset,
    generator: Generator,
    discriminator: ConvNet,
    optimizer_g: Adam,
    optimizer_d: Adam,
    optimizer_bg: Option<Adam>,
    schedulers: Option<Schedulers>,
    input: Option<Batch>,
    visuals: Visuals,
    losses: Scalars,
}

impl GanTrainer {
    pub fn new(
        preset: TrainerPreset,
        options: Arc<ModelOptions>,
        events: Arc<dyn EventSink>,
    ) -> ModelResult<Self> {
        let base = BaseModel::new(preset.name, options, events)?;
        let opts = base.options();
        let device = base.backend();
        let mut rng = StdRng::seed_from_u64(opts.seed);

        let generator = Generator::new(
            preset.generator_inputs,
            preset.background,
            base.g_cond_nc(),
            device,
            &mut rng,
        )?;
        let d_in = if preset.conditioned_discriminator {
            IMAGE_NC + base.d_cond_nc()
        } else {
            IMAGE_NC
        };
        let discriminator =
            ConvNet::new("PatchDiscriminator", &[d_in, HIDDEN_NC, 1], device, &mut rng)?;

        let adam = |net: &dyn Network, lr: f64| Adam::new(net.all_vars(), lr, opts.beta1, opts.beta2);
        let mut optimizer_g = adam(&generator.net, opts.lr_g)?;
        let mut optimizer_d = adam(&discriminator, opts.lr_d)?;
        let mut optimizer_bg = match &generator.background {
            Some(bg) if bg.trainable => Some(adam(&bg.net, opts.lr_g)?),
            _ => None,
        };

        let schedulers = if base.is_train() {
            Some(Schedulers {
                g: base.get_scheduler(&mut optimizer_g)?,
                d: base.get_scheduler(&mut optimizer_d)?,
                bg: match optimizer_bg.as_mut() {
                    Some(opt) => Some(base.get_scheduler(opt)?),
                    None => None,
                },
            })
        } else {
            None
        };
        let load_epoch = opts.load_epoch;

        let mut trainer = Self {
            base,
            preset,
            generator,
            discriminator,
            optimizer_g,
            optimizer_d,
            optimizer_bg,
            schedulers,
            input: None,
            visuals: Visuals::new(),
            losses: Scalars::new(),
        };

        for (_, net) in trainer.networks() {
            trainer.base.print_network(net);
        }
        if load_epoch > 0 {
            trainer.load()?;
        }
        Ok(trainer)
    }

    pub fn preset(&self) -> &TrainerPreset {
        &self.preset
    }

    pub fn scheduler_g(&self) -> Option<&LrScheduler> {
        self.schedulers.as_ref().map(|s| &s.g)
    }

    fn batch(&self) -> ModelResult<&Batch> {
        self.input
            .as_ref()
            .ok_or_else(|| ModelError::MissingInput("no batch bound; call set_input first".into()))
    }

    /// Discriminator logits for `image`, conditioned on the pose maps when
    /// the preset asks for it.
    fn discriminate(&self, image: &Tensor, batch: &Batch) -> ModelResult<Tensor> {
        let input = if self.preset.conditioned_discriminator {
            let cond = gather(batch, &[Input::SrcCond], self.generator.device())?;
            Tensor::cat(&[image, &cond], 1)?
        } else {
            image.clone()
        };
        self.discriminator.forward(&input)
    }

    fn optimizers(&self) -> Vec<(&'static str, &dyn Optimizer)> {
        let mut opts: Vec<(&'static str, &dyn Optimizer)> =
            vec![("G", &self.optimizer_g), ("D", &self.optimizer_d)];
        if let Some(opt) = &self.optimizer_bg {
            opts.push(("bg", opt));
        }
        opts
    }
}

/// Mean logistic loss of `logits` against an all-real or all-fake target,
/// `mean(softplus(-z))` or `mean(softplus(z))`.
fn logistic_loss(logits: &Tensor, real: bool) -> candle_core::Result<Tensor> {
    let z = if real { logits.neg()? } else { logits.clone() };
    let softplus = (z.relu()? + (z.abs()?.neg()?.exp()? + 1.0)?.log()?)?;
    softplus.mean_all()
}

fn scalar(loss: &Tensor) -> ModelResult<f64> {
    Ok(loss.to_scalar::<f32>()? as f64)
}

impl Model for GanTrainer {
    fn base(&self) -> &BaseModel {
        &self.base
    }

    fn networks(&self) -> Vec<(&str, &dyn Network)> {
        let mut nets: Vec<(&str, &dyn Network)> = self.generator.networks();
        nets.push(("D", &self.discriminator));
        nets
    }
}

impl TrainerModel for GanTrainer {
    fn set_input(&mut self, batch: Batch) -> ModelResult<()> {
        let device = self.generator.device();
        batch.get(TARGET_KEY)?;
        gather(&batch, self.generator.inputs, device)?;
        if let Some(bg) = &self.generator.background {
            gather(&batch, bg.inputs, device)?;
        }
        self.input = Some(batch);
        Ok(())
    }

    fn set_train(&mut self) -> ModelResult<()> {
        self.generator.set_training(true);
        self.discriminator.set_training(true);
        Ok(())
    }

    fn set_eval(&mut self) -> ModelResult<()> {
        self.generator.set_training(false);
        self.discriminator.set_training(false);
        Ok(())
    }

    fn forward(&mut self) -> ModelResult<Visuals> {
        let batch = self.batch()?;
        let pass = self.generator.forward(batch)?;
        self.visuals = pass_visuals(batch, &pass);
        Ok(self.visuals.clone())
    }

    fn test(&mut self) -> ModelResult<Visuals> {
        self.forward()
    }

    fn optimize_parameters(&mut self) -> ModelResult<()> {
        if !self.base.is_train() {
            return Err(ModelError::invalid_state(format!(
                "{} was built for inference and cannot optimize",
                self.base.name()
            )));
        }
        let batch = self.batch()?.clone();
        let pass = self.generator.forward(&batch)?;
        let target = batch.get(TARGET_KEY)?.to_device(self.generator.device())?;
        if target.dims() != pass.output.dims() {
            return Err(ModelError::shape_mismatch(
                TARGET_KEY,
                pass.output.dims(),
                target.dims(),
            ));
        }
        let opts = self.base.options();
        let (lambda_rec, lambda_adv) = (opts.lambda_rec, opts.lambda_adv);

        // generator: lambda_rec * mse(fake, real) + lambda_adv * fool D
        let g_rec = (candle_nn::loss::mse(&pass.output, &target)? * lambda_rec)?;
        let g_adv = (logistic_loss(&self.discriminate(&pass.output, &batch)?, true)? * lambda_adv)?;
        let grads = (&g_rec + &g_adv)?.backward()?;
        self.optimizer_g.step(&grads)?;
        if let Some(opt) = self.optimizer_bg.as_mut() {
            opt.step(&grads)?;
        }

        // discriminator: real vs the detached fake
        let d_real = logistic_loss(&self.discriminate(&target, &batch)?, true)?;
        let d_fake = logistic_loss(&self.discriminate(&pass.output.detach(), &batch)?, false)?;
        let grads = (&d_real + &d_fake)?.backward()?;
        self.optimizer_d.step(&grads)?;

        self.visuals = pass_visuals(&batch, &pass);
        self.losses.clear();
        self.losses.insert("g_rec".into(), scalar(&g_rec)?);
        self.losses.insert("g_adv".into(), scalar(&g_adv)?);
        self.losses.insert("d_real".into(), scalar(&d_real)?);
        self.losses.insert("d_fake".into(), scalar(&d_fake)?);
        Ok(())
    }

    fn get_image_paths(&self) -> ImagePaths {
        self.input
            .as_ref()
            .map(|b| b.paths.clone())
            .unwrap_or_default()
    }

    fn get_current_visuals(&self) -> Visuals {
        self.visuals.clone()
    }

    fn get_current_errors(&self) -> Scalars {
        self.losses.clone()
    }

    fn get_current_scalars(&self) -> Scalars {
        let mut scalars = Scalars::new();
        scalars.insert("lr_G".into(), self.optimizer_g.lr());
        scalars.insert("lr_D".into(), self.optimizer_d.lr());
        if let Some(opt) = &self.optimizer_bg {
            scalars.insert("lr_bg".into(), opt.lr());
        }
        scalars
    }

    fn save(&mut self, label: &str) -> ModelResult<()> {
        for (net_label, net) in self.networks() {
            self.base.save_network(net, net_label, label)?;
        }
        for (opt_label, opt) in self.optimizers() {
            self.base.save_optimizer(opt, opt_label, label)?;
        }
        Ok(())
    }

    fn load(&mut self) -> ModelResult<()> {
        let epoch = self.base.options().load_epoch;
        for (label, net) in self.generator.networks_mut() {
            self.base.load_network(net, label, epoch, false)?;
        }
        self.base
            .load_network(&mut self.discriminator, "D", epoch, false)?;

        if self.base.is_train() {
            self.base.load_optimizer(&mut self.optimizer_g, "G", epoch)?;
            self.base.load_optimizer(&mut self.optimizer_d, "D", epoch)?;
            if let Some(opt) = self.optimizer_bg.as_mut() {
                self.base.load_optimizer(opt, "bg", epoch)?;
            }
        }
        Ok(())
    }

    /// Step every schedule once. The plateau metric is the summed generator
    /// (or discriminator) loss of the last optimization step; before the
    /// first step there is no metric.
    fn update_learning_rate(&mut self) -> ModelResult<()> {
        let Some(schedulers) = self.schedulers.as_mut() else {
            return Ok(());
        };
        let sum = |keys: [&str; 2]| -> Option<f64> {
            keys.iter()
                .map(|k| self.losses.get(*k).copied())
                .sum::<Option<f64>>()
        };
        let g_loss = sum(["g_rec", "g_adv"]);
        let d_loss = sum(["d_real", "d_fake"]);

        schedulers.g.step(&mut self.optimizer_g, g_loss);
        schedulers.d.step(&mut self.optimizer_d, d_loss);
        if let (Some(scheduler), Some(opt)) = (schedulers.bg.as_mut(), self.optimizer_bg.as_mut()) {
            scheduler.step(opt, g_loss);
        }
        tracing::info!(
            "update G learning rate: {:.7}, D learning rate: {:.7}",
            self.optimizer_g.lr(),
            self.optimizer_d.lr()
        );
        Ok(())
    }
}
