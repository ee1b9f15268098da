//! Learning-rate policies.
//!
//! A scheduler does not own its optimizer; the trainer owns both and hands
//! the optimizer to [`LrScheduler::step`] once per epoch.

use std::str::FromStr;

use crate::config::ModelOptions;
use crate::error::{ModelError, ModelResult};
use crate::training::optimizer::Optimizer;

const STEP_GAMMA: f64 = 0.1;
const PLATEAU_FACTOR: f64 = 0.2;
const PLATEAU_THRESHOLD: f64 = 0.01;
const PLATEAU_PATIENCE: usize = 5;
const PLATEAU_EPS: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrPolicy {
    Lambda,
    Step,
    Plateau,
}

impl FromStr for LrPolicy {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lambda" => Ok(LrPolicy::Lambda),
            "step" => Ok(LrPolicy::Step),
            "plateau" => Ok(LrPolicy::Plateau),
            other => Err(ModelError::UnsupportedPolicy(other.to_string())),
        }
    }
}

/// Linear decay multiplier: 1 for the first `niter` epochs (counted from
/// `epoch_count`), then falling by `1 / (niter_decay + 1)` per epoch.
pub fn lambda_rule(epoch: usize, epoch_count: usize, niter: usize, niter_decay: usize) -> f64 {
    let elapsed = (epoch + 1 + epoch_count) as i64 - niter as i64;
    1.0 - elapsed.max(0) as f64 / (niter_decay + 1) as f64
}

#[derive(Debug, Clone)]
pub struct LambdaLr {
    base_lr: f64,
    epoch_count: usize,
    niter: usize,
    niter_decay: usize,
}

impl LambdaLr {
    pub fn factor(&self, epoch: usize) -> f64 {
        lambda_rule(epoch, self.epoch_count, self.niter, self.niter_decay)
    }
}

#[derive(Debug, Clone)]
pub struct StepLr {
    base_lr: f64,
    step_size: usize,
    gamma: f64,
}

/// Reduce the rate by `factor` once a minimized metric has failed to improve
/// by more than the relative `threshold` for more than `patience` checks.
#[derive(Debug, Clone)]
pub struct ReduceOnPlateau {
    factor: f64,
    threshold: f64,
    patience: usize,
    min_lr: f64,
    best: f64,
    num_bad_epochs: usize,
}

impl ReduceOnPlateau {
    fn is_better(&self, metric: f64) -> bool {
        metric < self.best * (1.0 - self.threshold)
    }

    pub fn num_bad_epochs(&self) -> usize {
        self.num_bad_epochs
    }
}

#[derive(Debug, Clone)]
enum Policy {
    Lambda(LambdaLr),
    Step(StepLr),
    Plateau(ReduceOnPlateau),
}

/// Scheduling object produced by [`get_scheduler`].
#[derive(Debug, Clone)]
pub struct LrScheduler {
    policy: Policy,
    last_epoch: usize,
    current_lr: f64,
}

impl LrScheduler {
    pub fn policy(&self) -> LrPolicy {
        match self.policy {
            Policy::Lambda(_) => LrPolicy::Lambda,
            Policy::Step(_) => LrPolicy::Step,
            Policy::Plateau(_) => LrPolicy::Plateau,
        }
    }

    pub fn last_epoch(&self) -> usize {
        self.last_epoch
    }

    /// Rate written by the most recent step (or by construction).
    pub fn current_lr(&self) -> f64 {
        self.current_lr
    }

    /// Consecutive non-improving checks, for the plateau policy only.
    pub fn num_bad_epochs(&self) -> Option<usize> {
        match &self.policy {
            Policy::Plateau(p) => Some(p.num_bad_epochs()),
            _ => None,
        }
    }

    /// Advance one epoch and write the new rate into `optimizer`.
    ///
    /// `metric` is only read by the plateau policy; without one the check is
    /// skipped for this epoch.
    pub fn step(&mut self, optimizer: &mut dyn Optimizer, metric: Option<f64>) {
        self.last_epoch += 1;
        let epoch = self.last_epoch;
        match &mut self.policy {
            Policy::Lambda(p) => optimizer.set_lr(p.base_lr * p.factor(epoch)),
            Policy::Step(p) => {
                let decays = (epoch / p.step_size) as i32;
                optimizer.set_lr(p.base_lr * p.gamma.powi(decays));
            }
            Policy::Plateau(p) => {
                let Some(metric) = metric else {
                    tracing::warn!("plateau scheduler stepped without a metric");
                    self.current_lr = optimizer.lr();
                    return;
                };
                if p.is_better(metric) {
                    p.best = metric;
                    p.num_bad_epochs = 0;
                } else {
                    p.num_bad_epochs += 1;
                }
                if p.num_bad_epochs > p.patience {
                    let old_lr = optimizer.lr();
                    let new_lr = (old_lr * p.factor).max(p.min_lr);
                    if old_lr - new_lr > PLATEAU_EPS {
                        optimizer.set_lr(new_lr);
                        tracing::info!("reducing learning rate to {:.4e}", new_lr);
                    }
                    p.num_bad_epochs = 0;
                }
            }
        }
        self.current_lr = optimizer.lr();
        tracing::debug!("epoch {}: learning rate = {:.7}", epoch, self.current_lr);
    }
}

/// Build the scheduler named by `options.lr_policy` around `optimizer`.
///
/// Like the usual framework schedulers, construction already applies the
/// epoch-0 rate.
pub fn get_scheduler(
    optimizer: &mut dyn Optimizer,
    options: &ModelOptions,
) -> ModelResult<LrScheduler> {
    let base_lr = optimizer.initial_lr();
    let policy = match options.lr_policy.parse::<LrPolicy>()? {
        LrPolicy::Lambda => {
            let p = LambdaLr {
                base_lr,
                epoch_count: options.epoch_count,
                niter: options.niter,
                niter_decay: options.niter_decay,
            };
            optimizer.set_lr(base_lr * p.factor(0));
            Policy::Lambda(p)
        }
        LrPolicy::Step => {
            if options.lr_decay_iters == 0 {
                return Err(ModelError::Config(
                    "lr_decay_iters must be positive for the step policy".into(),
                ));
            }
            Policy::Step(StepLr {
                base_lr,
                step_size: options.lr_decay_iters,
                gamma: STEP_GAMMA,
            })
        }
        LrPolicy::Plateau => Policy::Plateau(ReduceOnPlateau {
            factor: PLATEAU_FACTOR,
            threshold: PLATEAU_THRESHOLD,
            patience: PLATEAU_PATIENCE,
            min_lr: 0.0,
            best: f64::INFINITY,
            num_bad_epochs: 0,
        }),
    };
    Ok(LrScheduler {
        policy,
        last_epoch: 0,
        current_lr: optimizer.lr(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::optimizer::Adam;

    fn options(policy: &str) -> ModelOptions {
        ModelOptions {
            lr_policy: policy.to_string(),
            epoch_count: 0,
            niter: 10,
            niter_decay: 5,
            lr_decay_iters: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_lambda_rule_values() {
        assert_eq!(lambda_rule(9, 0, 10, 5), 1.0);
        assert!((lambda_rule(10, 0, 10, 5) - (1.0 - 1.0 / 6.0)).abs() < 1e-12);
        assert!((lambda_rule(14, 0, 10, 5) - (1.0 / 6.0)).abs() < 1e-12);
        // resuming shifts the schedule
        assert!((lambda_rule(9, 1, 10, 5) - (1.0 - 1.0 / 6.0)).abs() < 1e-12);
    }

    #[test]
    fn test_lambda_scheduler() {
        let mut adam = Adam::new(Vec::new(), 0.2, 0.5, 0.999).unwrap();
        let mut scheduler = get_scheduler(&mut adam, &options("lambda")).unwrap();
        assert_eq!(scheduler.policy(), LrPolicy::Lambda);
        assert_eq!(adam.lr(), 0.2);

        for _ in 0..10 {
            scheduler.step(&mut adam, None);
        }
        assert_eq!(scheduler.last_epoch(), 10);
        assert!((adam.lr() - 0.2 * (1.0 - 1.0 / 6.0)).abs() < 1e-12);
        assert_eq!(scheduler.current_lr(), adam.lr());
    }

    #[test]
    fn test_step_scheduler() {
        let mut adam = Adam::new(Vec::new(), 1.0, 0.5, 0.999).unwrap();
        let mut scheduler = get_scheduler(&mut adam, &options("step")).unwrap();
        let mut rates = Vec::new();
        for _ in 0..6 {
            scheduler.step(&mut adam, None);
            rates.push(adam.lr());
        }
        assert_eq!(rates[0], 1.0);
        assert_eq!(rates[1], 1.0);
        assert!((rates[2] - 0.1).abs() < 1e-12);
        assert!((rates[5] - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_plateau_scheduler() {
        let mut adam = Adam::new(Vec::new(), 1.0, 0.5, 0.999).unwrap();
        let mut scheduler = get_scheduler(&mut adam, &options("plateau")).unwrap();

        scheduler.step(&mut adam, Some(1.0));
        // within the 1% threshold, so not an improvement
        for _ in 0..5 {
            scheduler.step(&mut adam, Some(0.995));
        }
        assert_eq!(adam.lr(), 1.0);

        assert_eq!(scheduler.num_bad_epochs(), Some(5));
        scheduler.step(&mut adam, Some(0.995));
        assert!((adam.lr() - 0.2).abs() < 1e-12);
        assert_eq!(scheduler.num_bad_epochs(), Some(0));

        scheduler.step(&mut adam, Some(0.5));
        assert!((adam.lr() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_policy() {
        let mut adam = Adam::new(Vec::new(), 1.0, 0.5, 0.999).unwrap();
        match get_scheduler(&mut adam, &options("not-a-policy")) {
            Err(ModelError::UnsupportedPolicy(name)) => assert_eq!(name, "not-a-policy"),
            other => panic!("expected UnsupportedPolicy, got {:?}", other.map(|s| s.policy())),
        }
    }
}
