//! Optimizer capability and the Adam adapter used by the built-in trainers.

use std::collections::HashMap;

use candle_core::backprop::GradStore;
use candle_core::Var;
use candle_nn::{AdamW, Optimizer as _, ParamsAdamW};

use crate::error::{ModelError, ModelResult};
use crate::tensor::StateDict;

/// Exportable optimizer state: per-parameter buffers plus scalar settings.
#[derive(Debug, Clone, Default)]
pub struct OptimizerState {
    pub tensors: StateDict,
    pub scalars: HashMap<String, String>,
}

/// Opaque parameter-update capability with a state serialization contract.
pub trait Optimizer: Send {
    /// Apply one update from `grads`. Variables without a gradient are left
    /// untouched.
    fn step(&mut self, grads: &GradStore) -> ModelResult<()>;

    fn lr(&self) -> f64;

    fn set_lr(&mut self, lr: f64);

    /// Learning rate the optimizer was created with; schedules scale this.
    fn initial_lr(&self) -> f64;

    fn state(&self) -> OptimizerState;

    fn load_state(&mut self, state: OptimizerState) -> ModelResult<()>;
}

/// [`AdamW`] without weight decay over a fixed set of variables.
///
/// The exported state carries the hyper-parameters and the step count. The
/// moment estimates are internal to `candle_nn` and restart from zero after
/// [`load_state`](Optimizer::load_state).
pub struct Adam {
    inner: AdamW,
    vars: Vec<Var>,
    initial_lr: f64,
    steps: u64,
}

impl Adam {
    pub fn new(vars: Vec<Var>, lr: f64, beta1: f64, beta2: f64) -> ModelResult<Self> {
        let params = ParamsAdamW {
            lr,
            beta1,
            beta2,
            weight_decay: 0.0,
            ..Default::default()
        };
        Ok(Self {
            inner: AdamW::new(vars.clone(), params)?,
            vars,
            initial_lr: lr,
            steps: 0,
        })
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn params(&self) -> &ParamsAdamW {
        self.inner.params()
    }
}

impl Optimizer for Adam {
    fn step(&mut self, grads: &GradStore) -> ModelResult<()> {
        self.inner.step(grads)?;
        self.steps += 1;
        Ok(())
    }

    fn lr(&self) -> f64 {
        self.inner.learning_rate()
    }

    fn set_lr(&mut self, lr: f64) {
        self.inner.set_learning_rate(lr);
    }

    fn initial_lr(&self) -> f64 {
        self.initial_lr
    }

    fn state(&self) -> OptimizerState {
        let params = self.inner.params();
        let scalars = [
            ("lr", params.lr.to_string()),
            ("initial_lr", self.initial_lr.to_string()),
            ("beta1", params.beta1.to_string()),
            ("beta2", params.beta2.to_string()),
            ("eps", params.eps.to_string()),
            ("step", self.steps.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        OptimizerState {
            tensors: StateDict::new(),
            scalars,
        }
    }

    fn load_state(&mut self, state: OptimizerState) -> ModelResult<()> {
        if let Some(key) = state.tensors.keys().next() {
            return Err(ModelError::invalid_state(format!(
                "unexpected optimizer buffer '{}'",
                key
            )));
        }
        let scalar = |key: &str| -> ModelResult<&str> {
            state
                .scalars
                .get(key)
                .map(String::as_str)
                .ok_or_else(|| ModelError::invalid_state(format!("optimizer state lacks '{}'", key)))
        };
        let float = |key: &str| -> ModelResult<f64> {
            scalar(key)?
                .parse()
                .map_err(|_| ModelError::invalid_state(format!("optimizer '{}' is not a number", key)))
        };

        let params = ParamsAdamW {
            lr: float("lr")?,
            beta1: float("beta1")?,
            beta2: float("beta2")?,
            eps: float("eps")?,
            weight_decay: 0.0,
        };
        let initial_lr = float("initial_lr")?;
        let steps: u64 = scalar("step")?
            .parse()
            .map_err(|_| ModelError::invalid_state("optimizer 'step' is not an integer"))?;

        self.inner = AdamW::new(self.vars.clone(), params)?;
        self.initial_lr = initial_lr;
        self.steps = steps;
        Ok(())
    }
}
