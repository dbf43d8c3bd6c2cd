//! Weight penalties.
//!
//! A [`Regularizer`] contributes three things to training: a penalty added to the
//! reported cost, a term added to every weight gradient, and (for weight clipping only)
//! a projection applied to the weights after each update.

use std::str::FromStr;

use crate::vector::sign;
use crate::{Error, Real, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Penalty {
    #[default]
    None,
    /// L2: `λ/2 · Σw²`.
    Ridge,
    /// L1: `λ · Σ|w|`.
    Lasso,
    /// `α` interpolates between L1 (`α = 1`) and L2 (`α = 0`).
    ElasticNet,
    /// Clamp every weight into `[lambda, alpha]` after each update.
    WeightClipping,
}

impl FromStr for Penalty {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let p = match s.to_ascii_lowercase().as_str() {
            "none" | "" => Penalty::None,
            "ridge" | "l2" => Penalty::Ridge,
            "lasso" | "l1" => Penalty::Lasso,
            "elasticnet" | "elastic_net" => Penalty::ElasticNet,
            "weightclipping" | "weight_clipping" => Penalty::WeightClipping,
            _ => return Err(Error::unknown("regularization", s)),
        };
        Ok(p)
    }
}

/// A penalty kind with its `lambda` and `alpha` hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Regularizer {
    pub penalty: Penalty,
    pub lambda: Real,
    pub alpha: Real,
}

impl Regularizer {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn ridge(lambda: Real) -> Self {
        Self {
            penalty: Penalty::Ridge,
            lambda,
            alpha: 0.0,
        }
    }

    pub fn lasso(lambda: Real) -> Self {
        Self {
            penalty: Penalty::Lasso,
            lambda,
            alpha: 0.0,
        }
    }

    pub fn elastic_net(lambda: Real, alpha: Real) -> Self {
        Self {
            penalty: Penalty::ElasticNet,
            lambda,
            alpha,
        }
    }

    /// Clip weights into `[lower, upper]`.
    pub fn weight_clipping(lower: Real, upper: Real) -> Self {
        Self {
            penalty: Penalty::WeightClipping,
            lambda: lower,
            alpha: upper,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.lambda.is_finite() && self.alpha.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "regularization lambda/alpha must be finite, got {}/{}",
                self.lambda, self.alpha
            )));
        }
        match self.penalty {
            Penalty::None => {}
            Penalty::Ridge | Penalty::Lasso => {
                if self.lambda < 0.0 {
                    return Err(Error::InvalidConfig(format!(
                        "regularization lambda must be >= 0, got {}",
                        self.lambda
                    )));
                }
            }
            Penalty::ElasticNet => {
                if self.lambda < 0.0 || !(0.0..=1.0).contains(&self.alpha) {
                    return Err(Error::InvalidConfig(format!(
                        "elastic net needs lambda >= 0 and alpha in [0,1], got {}/{}",
                        self.lambda, self.alpha
                    )));
                }
            }
            Penalty::WeightClipping => {
                if self.lambda > self.alpha {
                    return Err(Error::InvalidConfig(format!(
                        "weight clipping lower bound {} exceeds upper bound {}",
                        self.lambda, self.alpha
                    )));
                }
            }
        }
        Ok(())
    }

    /// Penalty added to the data cost.
    pub fn term(&self, weights: &[Real]) -> Real {
        let (l, a) = (self.lambda, self.alpha);
        match self.penalty {
            Penalty::None | Penalty::WeightClipping => 0.0,
            Penalty::Ridge => 0.5 * l * weights.iter().map(|w| w * w).sum::<Real>(),
            Penalty::Lasso => l * weights.iter().map(|w| w.abs()).sum::<Real>(),
            Penalty::ElasticNet => weights
                .iter()
                .map(|w| a * l * w.abs() + 0.5 * (1.0 - a) * l * w * w)
                .sum(),
        }
    }

    /// Add the penalty's derivative with respect to each weight to `grad`.
    pub fn add_gradient(&self, weights: &[Real], grad: &mut [Real]) {
        debug_assert_eq!(weights.len(), grad.len());
        let (l, a) = (self.lambda, self.alpha);
        let term: fn(Real, Real, Real) -> Real = match self.penalty {
            Penalty::None | Penalty::WeightClipping => return,
            Penalty::Ridge => |w, l, _| l * w,
            Penalty::Lasso => |w, l, _| l * sign(w),
            Penalty::ElasticNet => |w, l, a| a * l * sign(w) + (1.0 - a) * l * w,
        };
        for (g, &w) in grad.iter_mut().zip(weights) {
            *g += term(w, l, a);
        }
    }

    /// Post-update projection. Only weight clipping changes anything.
    pub fn project(&self, weights: &mut [Real]) {
        if self.penalty == Penalty::WeightClipping {
            for w in weights {
                *w = w.clamp(self.lambda, self.alpha);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ridge_term_and_gradient() {
        let r = Regularizer::ridge(0.5);
        let w = [2.0, -1.0];
        assert!((r.term(&w) - 0.25 * 5.0).abs() < 1e-12);
        let mut g = [0.0, 1.0];
        r.add_gradient(&w, &mut g);
        assert_eq!(g, [1.0, 0.5]);
    }

    #[test]
    fn elastic_net_blends_l1_and_l2() {
        let w = [3.0];
        let pure_l1 = Regularizer::elastic_net(1.0, 1.0);
        let pure_l2 = Regularizer::elastic_net(1.0, 0.0);
        assert_eq!(pure_l1.term(&w), Regularizer::lasso(1.0).term(&w));
        assert_eq!(pure_l2.term(&w), Regularizer::ridge(1.0).term(&w));
    }

    #[test]
    fn clipping_projects_but_does_not_penalize() {
        let r = Regularizer::weight_clipping(-0.01, 0.01);
        let mut w = [0.5, -0.5, 0.001];
        assert_eq!(r.term(&w), 0.0);
        r.project(&mut w);
        assert_eq!(w, [0.01, -0.01, 0.001]);
        assert!(Regularizer::weight_clipping(1.0, -1.0).validate().is_err());
    }

    #[test]
    fn penalty_names_parse() {
        assert_eq!("Ridge".parse::<Penalty>().unwrap(), Penalty::Ridge);
        assert!("l3".parse::<Penalty>().is_err());
    }
}
