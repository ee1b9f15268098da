//! Network capability consumed by the lifecycle, and the small convolutional
//! networks the built-in variants are assembled from.

use std::collections::BTreeMap;

use candle_core::{Module, Var};
use candle_nn::{Conv2d, Conv2dConfig, VarBuilder, VarMap};
use rand::Rng;

use crate::error::{ModelError, ModelResult};
use crate::tensor::{DType, StateDict, Tensor};

/// A trainable sub-network with exportable parameter state.
pub trait Network: Send {
    /// Short architecture name used in summaries.
    fn kind(&self) -> &str;

    /// Trainable variables by parameter name.
    fn vars(&self) -> &BTreeMap<String, Var>;

    /// Switch between training and evaluation numerics.
    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;

    fn all_vars(&self) -> Vec<Var> {
        self.vars().values().cloned().collect()
    }

    /// Detached copy of every parameter.
    fn state_dict(&self) -> ModelResult<StateDict> {
        self.vars()
            .iter()
            .map(|(name, var)| Ok((name.clone(), var.as_tensor().copy()?.detach())))
            .collect()
    }

    /// Replace every parameter from `state`.
    ///
    /// Strict: the key sets must be equal and every shape must match. Nothing
    /// is written unless the whole state is accepted.
    fn load_state_dict(&mut self, state: StateDict) -> ModelResult<()> {
        let vars = self.vars();

        let missing: Vec<String> = vars
            .keys()
            .filter(|name| !state.contains_key(*name))
            .cloned()
            .collect();
        let unexpected: Vec<String> = state
            .keys()
            .filter(|key| !vars.contains_key(*key))
            .cloned()
            .collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(ModelError::StateMismatch {
                missing,
                unexpected,
            });
        }

        for (name, var) in vars {
            let incoming = &state[name];
            if incoming.dims() != var.dims() {
                return Err(ModelError::shape_mismatch(
                    name.as_str(),
                    var.dims(),
                    incoming.dims(),
                ));
            }
        }

        for (name, var) in vars {
            let value = state[name].to_dtype(var.dtype())?.to_device(var.device())?;
            var.set(&value)?;
        }
        Ok(())
    }

    fn num_parameters(&self) -> usize {
        self.vars().values().map(|v| v.elem_count()).sum()
    }

    /// Structural summary, one line per parameter.
    fn summary(&self) -> String {
        let mut lines = vec![format!("{}(", self.kind())];
        for (name, var) in self.vars() {
            lines.push(format!("  {}: {:?}", name, var.dims()));
        }
        lines.push(")".to_string());
        lines.join("\n")
    }
}

const KERNEL_SIZE: usize = 3;
const LEAKY_SLOPE: f64 = 0.2;

/// Stack of same-size 3x3 convolutions with leaky-ReLU between layers.
///
/// `channels` lists the channel count at every boundary, so `[in, hidden, out]`
/// builds two layers named `conv0` and `conv1`.
pub struct ConvNet {
    kind: String,
    vars: BTreeMap<String, Var>,
    layers: Vec<Conv2d>,
    in_channels: usize,
    training: bool,
}

impl ConvNet {
    /// Build the layers through a fresh [`VarMap`], then draw every weight
    /// and bias from `rng` so a seed reproduces the initialization.
    pub fn new<R: Rng>(
        kind: &str,
        channels: &[usize],
        device: &candle_core::Device,
        rng: &mut R,
    ) -> ModelResult<Self> {
        if channels.len() < 2 {
            return Err(ModelError::invalid_state(format!(
                "{} needs at least an input and an output width",
                kind
            )));
        }
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let cfg = Conv2dConfig {
            padding: KERNEL_SIZE / 2,
            ..Default::default()
        };

        let mut layers = Vec::with_capacity(channels.len() - 1);
        for (i, pair) in channels.windows(2).enumerate() {
            let layer = candle_nn::conv2d(
                pair[0],
                pair[1],
                KERNEL_SIZE,
                cfg,
                vb.pp(format!("conv{}", i)),
            )?;
            layers.push(layer);
        }

        let vars: BTreeMap<String, Var> = {
            let data = varmap
                .data()
                .lock()
                .map_err(|_| ModelError::invalid_state("parameter map lock poisoned"))?;
            data.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        for (i, pair) in channels.windows(2).enumerate() {
            let fan_in = pair[0] * KERNEL_SIZE * KERNEL_SIZE;
            let bound = if fan_in > 0 {
                1.0 / (fan_in as f32).sqrt()
            } else {
                0.0
            };
            for param in ["weight", "bias"] {
                let name = format!("conv{}.{}", i, param);
                let var = vars.get(&name).ok_or_else(|| {
                    ModelError::invalid_state(format!("{} lacks parameter {}", kind, name))
                })?;
                let values: Vec<f32> = (0..var.elem_count())
                    .map(|_| if bound > 0.0 { rng.gen_range(-bound..bound) } else { 0.0 })
                    .collect();
                var.set(&Tensor::from_vec(values, var.dims(), device)?)?;
            }
        }

        Ok(Self {
            kind: kind.to_string(),
            vars,
            layers,
            in_channels: channels[0],
            training: true,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn forward(&self, input: &Tensor) -> ModelResult<Tensor> {
        let (n, c, h, w) = input.dims4()?;
        if c != self.in_channels {
            return Err(ModelError::shape_mismatch(
                format!("{} input", self.kind),
                &[n, self.in_channels, h, w],
                input.dims(),
            ));
        }
        let last = self.layers.len() - 1;
        let mut x = input.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x)?;
            if i < last {
                x = candle_nn::ops::leaky_relu(&x, LEAKY_SLOPE)?;
            }
        }
        Ok(x)
    }
}

impl Network for ConvNet {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn vars(&self) -> &BTreeMap<String, Var> {
        &self.vars
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
