//! Impersonator binary.
//!
//! Builds registered model variants from layered configuration, drives a
//! trainer over synthetic batches and inspects run directories.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use impersonator_core::{
    default_sink,
    models::{BaseModel, Batch},
    training::CheckpointStore,
    ModelArgs, ModelFactory, ModelInstance, ModelOptions, Tensor, TrainerModel,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log level when no -v flag is given
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Explicit tracing filter, e.g. `impersonator_core=debug`
    #[arg(long, env = "RUST_LOG", global = true)]
    pub log_filter: Option<String>,
}

impl LoggingArgs {
    fn effective_level(&self) -> String {
        match self.verbose {
            0 => self.log_level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Construct the configured variant and print its networks
    Describe,
    /// Train the configured variant on synthetic batches
    Fit(FitCommand),
    /// List artifacts stored for the configured run
    Checkpoints,
}

#[derive(Args, Debug, Clone)]
pub struct FitCommand {
    /// Number of epochs to run
    #[arg(long, default_value_t = 3)]
    pub epochs: usize,

    /// Optimization steps per epoch
    #[arg(long, default_value_t = 10)]
    pub steps: usize,

    /// Side length of the square synthetic images
    #[arg(long, default_value_t = 16)]
    pub size: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli.logging.effective_level();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.parse().unwrap_or(Level::INFO).into())
                .parse_lossy(cli.logging.log_filter.as_deref().unwrap_or("")),
        )
        .with_target(true)
        .with_line_number(true)
        .init();

    let options = Arc::new(
        ModelOptions::load(&cli.model).context("Failed to load model options")?,
    );

    match cli.command {
        Commands::Describe => describe(options),
        Commands::Fit(cmd) => fit(options, &cmd),
        Commands::Checkpoints => checkpoints(&options),
    }
}

fn describe(options: Arc<ModelOptions>) -> Result<()> {
    let model = options.model.clone();
    let instance = ModelFactory::create(&model, options, default_sink())
        .with_context(|| format!("Failed to create model {}", model))?;

    let networks: Vec<_> = instance
        .networks()
        .into_iter()
        .map(|(label, net)| {
            json!({
                "label": label,
                "kind": net.kind(),
                "parameters": net.num_parameters(),
            })
        })
        .collect();
    let summary = json!({
        "model": model,
        "name": instance.name(),
        "is_train": instance.is_train(),
        "networks": networks,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn fit(options: Arc<ModelOptions>, cmd: &FitCommand) -> Result<()> {
    if !options.is_train {
        bail!("fit requires is_train = true");
    }
    let (cond_nc, _) = BaseModel::cond_nc(&options)?;
    let first_epoch = options.load_epoch + 1;
    let seed = options.seed;

    let instance = ModelFactory::create(&options.model, options.clone(), default_sink())
        .with_context(|| format!("Failed to create model {}", options.model))?;
    let mut trainer = match instance {
        ModelInstance::Trainer(trainer) => trainer,
        ModelInstance::Runner(_) => bail!("{} has no training personality", options.model),
    };

    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    trainer.set_train()?;
    for epoch in first_epoch..first_epoch + cmd.epochs {
        for _ in 0..cmd.steps {
            trainer.set_input(synthetic_batch(&mut rng, cond_nc, cmd.size)?)?;
            trainer.optimize_parameters()?;
        }
        let errors = trainer.get_current_errors();
        info!(
            "epoch {}: {}",
            epoch,
            serde_json::to_string(&errors).unwrap_or_default()
        );

        trainer
            .save(&epoch.to_string())
            .with_context(|| format!("Failed to save epoch {}", epoch))?;
        trainer.update_learning_rate()?;
    }

    let scalars = trainer.get_current_scalars();
    println!("{}", serde_json::to_string_pretty(&scalars)?);
    Ok(())
}

fn checkpoints(options: &ModelOptions) -> Result<()> {
    let store = CheckpointStore::new(options.save_dir());
    let keys = store
        .list()
        .with_context(|| format!("Failed to list {}", store.dir().display()))?;

    let artifacts: Vec<_> = keys
        .iter()
        .map(|key| {
            json!({
                "kind": key.kind.prefix(),
                "label": key.label,
                "epoch": key.epoch,
                "file": key.file_name(),
            })
        })
        .collect();
    let listing = json!({
        "dir": store.dir().display().to_string(),
        "latest_epoch": store.latest_epoch()?,
        "artifacts": artifacts,
    });
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

/// A batch whose target is a fixed mix of its inputs, so the generator has
/// something learnable to fit.
fn synthetic_batch(rng: &mut StdRng, cond_nc: usize, size: usize) -> Result<Batch> {
    let mut uniform = |channels: usize| -> Result<Tensor> {
        let values: Vec<f32> = (0..channels * size * size)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        Ok(Tensor::from_vec(
            values,
            (1, channels, size, size),
            &candle_core::Device::Cpu,
        )?)
    };
    let src_img = uniform(3)?;
    let src_cond = uniform(cond_nc)?;
    let bg_img = uniform(3)?;
    let bg_mask = Tensor::ones(
        (1, 1, size, size),
        candle_core::DType::F32,
        &candle_core::Device::Cpu,
    )?;
    let tgt = ((&src_img * 0.7)? + (&bg_img * 0.3)?)?;

    Ok(Batch::new()
        .with_tensor("src_img", src_img)
        .with_tensor("src_cond", src_cond)
        .with_tensor("bg_img", bg_img)
        .with_tensor("bg_mask", bg_mask)
        .with_tensor("tgt_img", tgt))
}
