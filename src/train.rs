//! Training configuration, progress reporting and the shared epoch loop.
//!
//! Every trainer in the crate (regression, network, GAN, dual SVM) follows one state
//! machine: `Uninitialized` until the first training call, `Training` while epochs run and
//! `Stopped` once `max_epoch` epochs completed or the run was cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use std::path::Path;

use tracing::{debug, info};

use crate::{Error, Parameters, Real, Result};

/// Shared flag for stopping a training run between epochs.
///
/// Clones observe the same flag, so one clone can be handed to another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Hyperparameters shared by every gradient-descent routine.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub learning_rate: Real,
    pub max_epoch: usize,
    /// Only read by the mini-batch routines.
    pub mini_batch_size: usize,
    /// Seed for sample selection and generated noise. `None` draws from entropy.
    pub seed: Option<u64>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub cancel: Option<CancelToken>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            max_epoch: 100,
            mini_batch_size: 32,
            seed: None,
            cancel: None,
        }
    }
}

impl TrainConfig {
    pub fn new(learning_rate: Real, max_epoch: usize) -> Self {
        Self {
            learning_rate,
            max_epoch,
            ..Self::default()
        }
    }

    pub fn with_mini_batch_size(mut self, mini_batch_size: usize) -> Self {
        self.mini_batch_size = mini_batch_size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be finite and > 0, got {}",
                self.learning_rate
            )));
        }
        if self.max_epoch == 0 {
            return Err(Error::InvalidConfig("max_epoch must be > 0".to_owned()));
        }
        if self.mini_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "mini_batch_size must be > 0".to_owned(),
            ));
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

#[cfg(feature = "serde")]
impl TrainConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: TrainConfig = serde_json::from_str(s)
            .map_err(|e| Error::InvalidConfig(format!("failed to parse train config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrainState {
    #[default]
    Uninitialized,
    Training,
    /// Terminal: the epoch budget is spent or the run was cancelled.
    Stopped,
}

/// Costs observed around one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    /// 1-based epoch number.
    pub epoch: usize,
    pub previous_cost: Real,
    pub cost: Real,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub epochs_run: usize,
    /// Cost before the first update.
    pub initial_cost: Real,
    pub final_cost: Real,
    /// Per-epoch costs, in order.
    pub history: Vec<Real>,
    pub cancelled: bool,
}

/// Observer called after every epoch. Training never depends on it.
pub trait Progress {
    fn on_epoch(&mut self, report: &EpochReport, params: &dyn Parameters);
}

impl<F> Progress for F
where
    F: FnMut(&EpochReport, &dyn Parameters),
{
    fn on_epoch(&mut self, report: &EpochReport, params: &dyn Parameters) {
        self(report, params)
    }
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl Progress for Silent {
    fn on_epoch(&mut self, _report: &EpochReport, _params: &dyn Parameters) {}
}

/// Logs each epoch through `tracing`: costs at `info`, parameters at `debug`.
#[derive(Debug, Clone, Copy)]
pub struct TracingProgress {
    /// Log every `every`-th epoch.
    pub every: usize,
}

impl Default for TracingProgress {
    fn default() -> Self {
        Self { every: 1 }
    }
}

impl Progress for TracingProgress {
    fn on_epoch(&mut self, report: &EpochReport, params: &dyn Parameters) {
        if !report.epoch.is_multiple_of(self.every.max(1)) {
            return;
        }
        info!(
            epoch = report.epoch,
            previous_cost = report.previous_cost,
            cost = report.cost,
            "epoch complete"
        );
        for layer in params.parameters() {
            debug!(
                layer = layer.index,
                weights = ?layer.weights,
                bias = ?layer.bias,
                "parameters"
            );
        }
    }
}

/// Drive `epoch` until `cfg.max_epoch` epochs ran or the run is cancelled.
///
/// `epoch` performs one epoch of updates and returns the cost before and after it.
pub(crate) fn run_epochs<M: Parameters>(
    model: &mut M,
    cfg: &TrainConfig,
    state: fn(&mut M) -> &mut TrainState,
    progress: &mut dyn Progress,
    mut epoch: impl FnMut(&mut M) -> Result<(Real, Real)>,
) -> Result<TrainReport> {
    cfg.validate()?;
    *state(model) = TrainState::Training;

    let mut report = TrainReport {
        epochs_run: 0,
        initial_cost: Real::NAN,
        final_cost: Real::NAN,
        history: Vec::new(),
        cancelled: false,
    };

    for n in 1..=cfg.max_epoch {
        if cfg.is_cancelled() {
            info!(epoch = n, "training cancelled");
            report.cancelled = true;
            break;
        }
        let (previous_cost, cost) = match epoch(model) {
            Ok(costs) => costs,
            Err(e) => {
                *state(model) = TrainState::Stopped;
                return Err(e);
            }
        };
        if n == 1 {
            report.initial_cost = previous_cost;
        }
        report.epochs_run = n;
        report.final_cost = cost;
        report.history.push(cost);

        progress.on_epoch(
            &EpochReport {
                epoch: n,
                previous_cost,
                cost,
            },
            &*model,
        );
    }

    *state(model) = TrainState::Stopped;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::LayerParameters;

    #[derive(Default)]
    struct Counter {
        value: Real,
        state: TrainState,
    }

    impl Parameters for Counter {
        fn parameters(&self) -> Vec<LayerParameters> {
            Vec::new()
        }

        fn restore(&mut self, _layers: &[LayerParameters]) -> Result<()> {
            Ok(())
        }
    }

    fn state(c: &mut Counter) -> &mut TrainState {
        &mut c.state
    }

    #[test]
    fn config_validation() {
        assert!(TrainConfig::default().validate().is_ok());
        assert!(TrainConfig::new(0.0, 10).validate().is_err());
        assert!(TrainConfig::new(0.1, 0).validate().is_err());
        assert!(
            TrainConfig::new(0.1, 10)
                .with_mini_batch_size(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn runs_exactly_max_epoch_epochs() {
        let mut model = Counter {
            value: 10.0,
            ..Counter::default()
        };
        let mut seen = Vec::new();
        let mut progress = |r: &EpochReport, _: &dyn Parameters| seen.push(r.epoch);

        let report = run_epochs(
            &mut model,
            &TrainConfig::new(0.5, 4),
            state,
            &mut progress,
            |m| {
                let before = m.value;
                m.value *= 0.5;
                Ok((before, m.value))
            },
        )
        .unwrap();

        assert_eq!(report.epochs_run, 4);
        assert_eq!(report.initial_cost, 10.0);
        assert_eq!(report.final_cost, 0.625);
        assert!(!report.cancelled);
        assert_eq!(model.state, TrainState::Stopped);
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn cancellation_stops_between_epochs() {
        let token = CancelToken::new();
        let cfg = TrainConfig::new(0.1, 100).with_cancel(token.clone());
        let mut model = Counter::default();

        let report = run_epochs(&mut model, &cfg, state, &mut Silent, |m| {
            m.value += 1.0;
            if m.value >= 3.0 {
                token.cancel();
            }
            Ok((0.0, m.value))
        })
        .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.epochs_run, 3);
        assert_eq!(model.state, TrainState::Stopped);
    }

    #[test]
    fn huge_epoch_budget_does_not_preallocate() {
        let token = CancelToken::new();
        token.cancel();
        let cfg = TrainConfig::new(0.1, usize::MAX).with_cancel(token);
        let mut model = Counter::default();

        let report = run_epochs(&mut model, &cfg, state, &mut Silent, |m| {
            Ok((m.value, m.value))
        })
        .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.epochs_run, 0);
        assert!(report.history.is_empty());
        assert_eq!(model.state, TrainState::Stopped);
    }

    #[test]
    fn failing_epoch_leaves_model_stopped() {
        let mut model = Counter::default();
        let result = run_epochs(
            &mut model,
            &TrainConfig::new(0.1, 5),
            state,
            &mut Silent,
            |m| {
                m.value += 1.0;
                if m.value >= 2.0 {
                    return Err(Error::SingularMatrix);
                }
                Ok((0.0, m.value))
            },
        );

        assert!(matches!(result, Err(Error::SingularMatrix)));
        assert_eq!(model.value, 2.0);
        assert_eq!(model.state, TrainState::Stopped);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_loads_from_json_with_defaults() {
        let cfg = TrainConfig::from_json_str(r#"{"learning_rate":0.05,"max_epoch":20}"#).unwrap();
        assert_eq!(cfg.learning_rate, 0.05);
        assert_eq!(cfg.max_epoch, 20);
        assert_eq!(cfg.mini_batch_size, 32);
        assert!(cfg.cancel.is_none());

        assert!(TrainConfig::from_json_str(r#"{"learning_rate":-1.0}"#).is_err());
    }
}
