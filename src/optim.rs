//! Optimizers for the layered network.
//!
//! Design notes:
//! - Optimizer *state* (momentum/Adam moments) lives outside the model.
//! - State is keyed by parameter slot (one slot per weight or bias buffer) and sized on
//!   first use, so the same state works for any stack of layers.

use crate::{Error, Real, Result};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
/// Update rule applied to each gradient.
pub enum Optimizer {
    /// Plain gradient descent: `param -= lr * grad`.
    #[default]
    Sgd,
    /// Gradient descent with momentum.
    Momentum { momentum: Real },
    /// Adam (bias-corrected).
    Adam { beta1: Real, beta2: Real, eps: Real },
}

impl Optimizer {
    /// Adam with the customary `beta1 = 0.9`, `beta2 = 0.999`, `eps = 1e-8`.
    pub fn adam() -> Self {
        Optimizer::Adam {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }

    /// Validate optimizer hyperparameters.
    pub fn validate(self) -> Result<()> {
        match self {
            Optimizer::Sgd => Ok(()),
            Optimizer::Momentum { momentum } => {
                if !(momentum.is_finite() && (0.0..1.0).contains(&momentum)) {
                    return Err(Error::InvalidConfig(format!(
                        "momentum must be finite and in [0,1), got {momentum}"
                    )));
                }
                Ok(())
            }
            Optimizer::Adam { beta1, beta2, eps } => {
                if !(beta1.is_finite() && (0.0..1.0).contains(&beta1)) {
                    return Err(Error::InvalidConfig(format!(
                        "adam beta1 must be finite and in [0,1), got {beta1}"
                    )));
                }
                if !(beta2.is_finite() && (0.0..1.0).contains(&beta2)) {
                    return Err(Error::InvalidConfig(format!(
                        "adam beta2 must be finite and in [0,1), got {beta2}"
                    )));
                }
                if !(eps.is_finite() && eps > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "adam eps must be finite and > 0, got {eps}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Allocate empty optimizer state.
    pub fn state(self) -> Result<OptimizerState> {
        self.validate()?;
        Ok(OptimizerState {
            optimizer: self,
            ..OptimizerState::default()
        })
    }
}

/// Owned optimizer state.
#[derive(Debug, Clone)]
pub struct OptimizerState {
    optimizer: Optimizer,
    t: u64,
    beta1_pow: Real,
    beta2_pow: Real,
    /// Momentum velocity, or Adam's first moment, per slot.
    first: Vec<Vec<Real>>,
    /// Adam's second moment, per slot.
    second: Vec<Vec<Real>>,
}

impl Default for OptimizerState {
    /// State for plain [`Optimizer::Sgd`].
    fn default() -> Self {
        Self {
            optimizer: Optimizer::Sgd,
            t: 0,
            beta1_pow: 1.0,
            beta2_pow: 1.0,
            first: Vec::new(),
            second: Vec::new(),
        }
    }
}

impl OptimizerState {
    #[inline]
    pub fn optimizer(&self) -> Optimizer {
        self.optimizer
    }

    /// Forget accumulated moments and the step count. Required whenever the parameter
    /// layout behind the slots changes.
    pub fn reset(&mut self) {
        self.t = 0;
        self.beta1_pow = 1.0;
        self.beta2_pow = 1.0;
        self.first.clear();
        self.second.clear();
    }

    /// Start a new update step. Call once before updating the slots of that step.
    pub fn begin_step(&mut self) {
        self.t += 1;
        if let Optimizer::Adam { beta1, beta2, .. } = self.optimizer {
            self.beta1_pow *= beta1;
            self.beta2_pow *= beta2;
        }
    }

    /// Apply the update rule to one parameter buffer.
    ///
    /// A slot whose length changed since its last use restarts from zero moments.
    ///
    /// Panics if `param` and `grad` lengths differ.
    pub fn update(&mut self, slot: usize, param: &mut [Real], grad: &[Real], lr: Real) {
        assert_eq!(
            param.len(),
            grad.len(),
            "param len {} does not match grad len {}",
            param.len(),
            grad.len()
        );

        match self.optimizer {
            Optimizer::Sgd => {
                for (p, &g) in param.iter_mut().zip(grad) {
                    *p -= lr * g;
                }
            }
            Optimizer::Momentum { momentum } => {
                let v = slot_buffer(&mut self.first, slot, param.len());
                for ((p, v), &g) in param.iter_mut().zip(v.iter_mut()).zip(grad) {
                    *v = momentum * *v + g;
                    *p -= lr * *v;
                }
            }
            Optimizer::Adam { beta1, beta2, eps } => {
                debug_assert!(self.t > 0, "begin_step must run before update");
                let corr1 = 1.0 - self.beta1_pow;
                let corr2 = 1.0 - self.beta2_pow;
                let m = slot_buffer(&mut self.first, slot, param.len());
                let v = slot_buffer(&mut self.second, slot, param.len());
                for (((p, m), v), &g) in param
                    .iter_mut()
                    .zip(m.iter_mut())
                    .zip(v.iter_mut())
                    .zip(grad)
                {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    let m_hat = *m / corr1;
                    let v_hat = *v / corr2;
                    *p -= lr * m_hat / (v_hat.sqrt() + eps);
                }
            }
        }
    }
}

fn slot_buffer(buffers: &mut Vec<Vec<Real>>, slot: usize, len: usize) -> &mut Vec<Real> {
    if buffers.len() <= slot {
        buffers.resize_with(slot + 1, Vec::new);
    }
    let buf = &mut buffers[slot];
    if buf.len() != len {
        buf.clear();
        buf.resize(len, 0.0);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimizer_validation_rejects_bad_hyperparams() {
        assert!(Optimizer::Momentum { momentum: 1.0 }.validate().is_err());
        assert!(Optimizer::Momentum { momentum: -0.1 }.validate().is_err());
        assert!(
            Optimizer::Adam {
                beta1: 1.0,
                beta2: 0.999,
                eps: 1e-8
            }
            .validate()
            .is_err()
        );
        assert!(
            Optimizer::Adam {
                beta1: 0.9,
                beta2: 0.999,
                eps: 0.0
            }
            .validate()
            .is_err()
        );
        assert!(Optimizer::adam().validate().is_ok());
    }

    #[test]
    fn momentum_updates_like_sgd_on_first_step() {
        let mut state = Optimizer::Momentum { momentum: 0.9 }.state().unwrap();
        let mut w = [1.0, 2.0];
        state.begin_step();
        state.update(0, &mut w, &[3.0, 4.0], 0.1);
        assert!((w[0] - (1.0 - 0.3)).abs() < 1e-12);
        assert!((w[1] - (2.0 - 0.4)).abs() < 1e-12);

        // Second step accumulates velocity.
        state.begin_step();
        state.update(0, &mut w, &[3.0, 4.0], 0.1);
        assert!((w[0] - (0.7 - 0.1 * (0.9 * 3.0 + 3.0))).abs() < 1e-12);
    }

    #[test]
    fn resized_slot_restarts_from_zero_velocity() {
        let mut state = Optimizer::Momentum { momentum: 0.9 }.state().unwrap();
        let mut w = [1.0, 2.0];
        state.begin_step();
        state.update(0, &mut w, &[1.0, 1.0], 0.1);

        let mut wider = [0.0; 3];
        state.begin_step();
        state.update(0, &mut wider, &[1.0, 1.0, 1.0], 0.1);
        // No velocity carried over: a plain SGD step.
        for v in wider {
            assert!((v + 0.1).abs() < 1e-12);
        }
    }

    #[test]
    fn reset_clears_adam_moments() {
        let mut state = Optimizer::adam().state().unwrap();
        let mut w = [1.0];
        state.begin_step();
        state.update(0, &mut w, &[2.0], 0.1);
        state.reset();

        let mut fresh = Optimizer::adam().state().unwrap();
        let (mut a, mut b) = ([0.5], [0.5]);
        state.begin_step();
        state.update(0, &mut a, &[-1.0], 0.1);
        fresh.begin_step();
        fresh.update(0, &mut b, &[-1.0], 0.1);
        assert_eq!(a, b);
    }

    #[test]
    fn adam_first_step_matches_expected_direction_for_unit_grad() {
        let mut state = Optimizer::Adam {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1.0,
        }
        .state()
        .unwrap();
        let mut w = [1.0];
        let mut b = [1.0];
        state.begin_step();
        state.update(0, &mut w, &[1.0], 0.1);
        state.update(1, &mut b, &[1.0], 0.1);

        // With eps=1.0 and unit grad, the first bias-corrected step has update ~= 1/(1+eps) = 0.5.
        assert!((w[0] - (1.0 - 0.1 * 0.5)).abs() < 1e-12);
        assert!((b[0] - (1.0 - 0.1 * 0.5)).abs() < 1e-12);
    }
}
