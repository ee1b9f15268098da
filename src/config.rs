//! Configuration management for model construction and training.
//!
//! Options are loaded from several sources, later ones overriding earlier ones:
//! 1. Default configuration (embedded in binary)
//! 2. User-specified configuration file
//! 3. Environment variables (prefixed with `IMPERSONATOR_`)
//! 4. Command-line arguments
//!
//! # Environment Variables
//!
//! Every flat option can be set from the environment, e.g.
//! - `IMPERSONATOR_NAME` - run name, also the checkpoint sub-directory
//! - `IMPERSONATOR_CHECKPOINTS_DIR` - root directory for run checkpoints
//! - `IMPERSONATOR_LR_POLICY` - `lambda`, `step` or `plateau`

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Command-line overrides for [`ModelOptions`].
#[derive(Debug, Default, Clone, clap::Args)]
pub struct ModelArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Registered model variant
    #[arg(long)]
    pub model: Option<String>,

    /// Run name, used as the checkpoint sub-directory
    #[arg(long)]
    pub name: Option<String>,

    /// Root directory holding one sub-directory per run
    #[arg(long)]
    pub checkpoints_dir: Option<PathBuf>,

    /// Comma separated GPU ids; `-1` selects the CPU
    #[arg(long)]
    pub gpu_ids: Option<String>,

    /// Build the training personality of the model
    #[arg(long)]
    pub is_train: Option<bool>,

    /// Semantic map used to derive conditioning channels
    #[arg(long)]
    pub map_name: Option<String>,

    /// Conditioning channels when no semantic map is given
    #[arg(long)]
    pub cond_nc: Option<usize>,

    /// Learning rate policy (lambda, step, plateau)
    #[arg(long)]
    pub lr_policy: Option<String>,

    /// Epoch to resume from; 0 starts from fresh weights
    #[arg(long)]
    pub load_epoch: Option<usize>,
}

/// Options every model variant reads at construction.
///
/// Owned by the caller and shared with models behind an `Arc`; never mutated
/// once a model holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Registered variant name
    pub model: String,
    /// Run identifier
    pub name: String,
    pub is_train: bool,
    #[serde(default)]
    pub gpu_ids: Vec<usize>,
    pub checkpoints_dir: PathBuf,
    #[serde(default)]
    pub map_name: Option<String>,
    pub cond_nc: usize,

    /// Learning rate policy name
    pub lr_policy: String,
    /// Epoch index the schedule starts counting from
    pub epoch_count: usize,
    /// Epochs at the initial learning rate
    pub niter: usize,
    /// Epochs of linear decay after `niter`
    pub niter_decay: usize,
    /// Step policy period
    pub lr_decay_iters: usize,

    #[serde(default)]
    pub load_epoch: usize,
    #[serde(default = "default_lr")]
    pub lr_g: f64,
    #[serde(default = "default_lr")]
    pub lr_d: f64,
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    #[serde(default = "default_lambda_rec")]
    pub lambda_rec: f64,
    #[serde(default = "default_lambda_adv")]
    pub lambda_adv: f64,
    #[serde(default)]
    pub seed: u64,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            model: "impersonator".to_string(),
            name: "experiment".to_string(),
            is_train: true,
            gpu_ids: Vec::new(),
            checkpoints_dir: PathBuf::from("./outputs/checkpoints"),
            map_name: None,
            cond_nc: 3,
            lr_policy: "lambda".to_string(),
            epoch_count: 0,
            niter: 10,
            niter_decay: 10,
            lr_decay_iters: 50,
            load_epoch: 0,
            lr_g: default_lr(),
            lr_d: default_lr(),
            beta1: default_beta1(),
            beta2: default_beta2(),
            lambda_rec: default_lambda_rec(),
            lambda_adv: default_lambda_adv(),
            seed: 0,
        }
    }
}

impl ModelOptions {
    /// Load options from all sources
    pub fn load(args: &ModelArgs) -> ModelResult<Self> {
        let mut builder = config::Config::builder().add_source(config::File::from_str(
            include_str!("../config/default.toml"),
            config::FileFormat::Toml,
        ));

        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        builder = builder.add_source(config::Environment::with_prefix("IMPERSONATOR"));

        let mut options: ModelOptions = builder.build()?.try_deserialize()?;
        // `map_name = ""` in a file or the environment means no semantic map
        options.map_name = options.map_name.filter(|m| !m.is_empty());
        options.apply_args(args)?;
        Ok(options)
    }

    /// Override with command line args
    pub fn apply_args(&mut self, args: &ModelArgs) -> ModelResult<()> {
        if let Some(model) = &args.model {
            self.model = model.clone();
        }
        if let Some(name) = &args.name {
            self.name = name.clone();
        }
        if let Some(dir) = &args.checkpoints_dir {
            self.checkpoints_dir = dir.clone();
        }
        if let Some(ids) = &args.gpu_ids {
            self.gpu_ids = parse_gpu_ids(ids)?;
        }
        if let Some(is_train) = args.is_train {
            self.is_train = is_train;
        }
        if let Some(map_name) = &args.map_name {
            self.map_name = Some(map_name.clone()).filter(|m| !m.is_empty());
        }
        if let Some(cond_nc) = args.cond_nc {
            self.cond_nc = cond_nc;
        }
        if let Some(policy) = &args.lr_policy {
            self.lr_policy = policy.clone();
        }
        if let Some(epoch) = args.load_epoch {
            self.load_epoch = epoch;
        }
        Ok(())
    }

    /// Directory holding this run's artifacts.
    pub fn save_dir(&self) -> PathBuf {
        self.checkpoints_dir.join(&self.name)
    }
}

/// Parse `"0,1"` style GPU lists. `"-1"` and the empty string select the CPU.
pub fn parse_gpu_ids(raw: &str) -> ModelResult<Vec<usize>> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "-1" {
        return Ok(Vec::new());
    }
    raw.split(',')
        .map(|id| {
            id.trim()
                .parse::<usize>()
                .map_err(|_| ModelError::Config(format!("invalid gpu id '{}'", id)))
        })
        .collect()
}

fn default_lr() -> f64 {
    0.0002
}

fn default_beta1() -> f64 {
    0.5
}

fn default_beta2() -> f64 {
    0.999
}

fn default_lambda_rec() -> f64 {
    10.0
}

fn default_lambda_adv() -> f64 {
    0.1
}
