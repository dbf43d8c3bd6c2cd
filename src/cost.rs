//! Cost functions.
//!
//! Each [`Cost`] maps a prediction/target pair to a scalar value and to the derivative of
//! that value with respect to the prediction, element-wise. For batched (matrix) targets
//! the sample count `n` is the number of rows.
//!
//! Derivatives are per-element and not divided by `n`; trainers apply the `1/n` factor when
//! forming the weight gradient.

use std::str::FromStr;

use crate::vector::sign;
use crate::{DenseBuffer, Error, Matrix, Real, Result, Vector};

/// Offset that keeps the logarithms in the log-likelihood costs finite.
const LOG_EPS: Real = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq)]
/// Supported cost functions.
pub enum Cost {
    /// Mean squared error, `Σ(ŷ - y)² / 2n`.
    Mse,
    /// Root mean squared error.
    Rmse,
    /// Mean absolute error.
    Mae,
    /// Mean bias error, `Σ(ŷ - y) / n`.
    Mbe,
    /// Binary log-loss. Predictions are probabilities.
    LogLoss,
    /// Categorical cross-entropy, `-Σ y ln ŷ`.
    CrossEntropy,
    /// Huber loss, quadratic inside `delta` and linear outside.
    Huber { delta: Real },
    /// Hinge loss for `±1` targets.
    Hinge,
    /// Wasserstein critic score, `-Σ y ŷ / n`.
    Wasserstein,
}

impl Cost {
    /// Validate a cost configuration.
    pub fn validate(self) -> Result<()> {
        if let Cost::Huber { delta } = self
            && !(delta.is_finite() && delta > 0.0)
        {
            return Err(Error::InvalidConfig(format!(
                "huber delta must be finite and > 0, got {delta}"
            )));
        }
        Ok(())
    }

    pub fn value(self, pred: &Vector, target: &Vector) -> Result<Real> {
        pred.conformable(target, "cost")?;
        Ok(self.eval(pred.as_slice(), target.as_slice(), pred.len()))
    }

    pub fn derivative(self, pred: &Vector, target: &Vector) -> Result<Vector> {
        pred.conformable(target, "cost_derivative")?;
        let mut out = Vector::new(pred.len());
        self.grad(
            pred.as_slice(),
            target.as_slice(),
            pred.len(),
            out.as_mut_slice(),
        );
        Ok(out)
    }

    pub fn value_matrix(self, pred: &Matrix, target: &Matrix) -> Result<Real> {
        pred.conformable(target, "cost")?;
        Ok(self.eval(pred.as_slice(), target.as_slice(), pred.rows()))
    }

    pub fn derivative_matrix(self, pred: &Matrix, target: &Matrix) -> Result<Matrix> {
        pred.conformable(target, "cost_derivative")?;
        let mut out = Matrix::new(pred.rows(), pred.cols());
        self.grad(
            pred.as_slice(),
            target.as_slice(),
            pred.rows(),
            out.as_mut_slice(),
        );
        Ok(out)
    }

    fn eval(self, pred: &[Real], target: &[Real], n: usize) -> Real {
        debug_assert_eq!(pred.len(), target.len());
        if pred.is_empty() {
            return 0.0;
        }
        let inv_n = 1.0 / n.max(1) as Real;
        let pairs = pred.iter().copied().zip(target.iter().copied());
        match self {
            Cost::Mse => 0.5 * squared_sum(pred, target) * inv_n,
            Cost::Rmse => (squared_sum(pred, target) * inv_n).sqrt(),
            Cost::Mae => pairs.map(|(p, y)| (p - y).abs()).sum::<Real>() * inv_n,
            Cost::Mbe => pairs.map(|(p, y)| p - y).sum::<Real>() * inv_n,
            Cost::LogLoss => {
                -pairs
                    .map(|(p, y)| y * (p + LOG_EPS).ln() + (1.0 - y) * (1.0 - p + LOG_EPS).ln())
                    .sum::<Real>()
                    * inv_n
            }
            Cost::CrossEntropy => -pairs.map(|(p, y)| y * (p + LOG_EPS).ln()).sum::<Real>(),
            Cost::Huber { delta } => pairs
                .map(|(p, y)| {
                    let e = (p - y).abs();
                    if e <= delta {
                        0.5 * e * e
                    } else {
                        delta * e - 0.5 * delta * delta
                    }
                })
                .sum(),
            Cost::Hinge => pairs.map(|(p, y)| (1.0 - y * p).max(0.0)).sum::<Real>() * inv_n,
            Cost::Wasserstein => -pairs.map(|(p, y)| y * p).sum::<Real>() * inv_n,
        }
    }

    fn grad(self, pred: &[Real], target: &[Real], n: usize, out: &mut [Real]) {
        debug_assert_eq!(pred.len(), target.len());
        debug_assert_eq!(pred.len(), out.len());
        let rmse_scale = match self {
            Cost::Rmse => {
                let rmse = (squared_sum(pred, target) / n.max(1) as Real).sqrt();
                if rmse > 0.0 { 1.0 / rmse } else { 0.0 }
            }
            _ => 0.0,
        };
        for ((o, &p), &y) in out.iter_mut().zip(pred).zip(target) {
            *o = match self {
                Cost::Mse => p - y,
                Cost::Rmse => rmse_scale * (p - y),
                Cost::Mae => sign(p - y),
                Cost::Mbe => 1.0,
                Cost::LogLoss => -y / (p + LOG_EPS) + (1.0 - y) / (1.0 - p + LOG_EPS),
                Cost::CrossEntropy => -y / (p + LOG_EPS),
                Cost::Huber { delta } => {
                    let e = p - y;
                    if e.abs() <= delta { e } else { delta * sign(e) }
                }
                Cost::Hinge => {
                    if y * p < 1.0 {
                        -y
                    } else {
                        0.0
                    }
                }
                Cost::Wasserstein => -y,
            };
        }
    }
}

impl FromStr for Cost {
    type Err = Error;

    /// Parse a cost name. `huber` uses `delta = 1`.
    fn from_str(s: &str) -> Result<Self> {
        let cost = match s.to_ascii_lowercase().as_str() {
            "mse" => Cost::Mse,
            "rmse" => Cost::Rmse,
            "mae" => Cost::Mae,
            "mbe" => Cost::Mbe,
            "logloss" | "log_loss" => Cost::LogLoss,
            "crossentropy" | "cross_entropy" => Cost::CrossEntropy,
            "huber" => Cost::Huber { delta: 1.0 },
            "hinge" => Cost::Hinge,
            "wasserstein" => Cost::Wasserstein,
            _ => return Err(Error::unknown("cost", s)),
        };
        Ok(cost)
    }
}

#[inline]
fn squared_sum(pred: &[Real], target: &[Real]) -> Real {
    pred.iter().zip(target).fold(0.0, |acc, (&p, &y)| {
        let d = p - y;
        d.mul_add(d, acc)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(xs: &[Real]) -> Vector {
        Vector::from(xs)
    }

    #[test]
    fn mse_is_half_mean_square() {
        let c = Cost::Mse.value(&v(&[1.0, 3.0]), &v(&[0.0, 1.0])).unwrap();
        assert!((c - (1.0 + 4.0) / 4.0).abs() < 1e-12);
        let d = Cost::Mse
            .derivative(&v(&[1.0, 3.0]), &v(&[0.0, 1.0]))
            .unwrap();
        assert_eq!(d.as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn shapes_must_agree() {
        assert!(matches!(
            Cost::Mae.value(&v(&[1.0]), &v(&[1.0, 2.0])),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn derivatives_match_central_differences() {
        let costs = [
            Cost::Mse,
            Cost::Rmse,
            Cost::LogLoss,
            Cost::CrossEntropy,
            Cost::Huber { delta: 0.5 },
            Cost::Wasserstein,
        ];
        let pred = [0.3, 0.8, 0.55];
        let target = [0.0, 1.0, 1.0];
        let h = 1e-6;
        for cost in costs {
            let mut grad = [0.0; 3];
            cost.grad(&pred, &target, 3, &mut grad);
            for i in 0..3 {
                let mut hi = pred;
                let mut lo = pred;
                hi[i] += h;
                lo[i] -= h;
                let numeric = (cost.eval(&hi, &target, 3) - cost.eval(&lo, &target, 3)) / (2.0 * h);
                // Costs averaged over `n` report per-element derivatives.
                let scale = match cost {
                    Cost::CrossEntropy | Cost::Huber { .. } => 1.0,
                    _ => 3.0,
                };
                assert!(
                    (numeric * scale - grad[i]).abs() < 1e-4,
                    "{cost:?}[{i}]: numeric {} vs analytic {}",
                    numeric * scale,
                    grad[i]
                );
            }
        }
    }

    #[test]
    fn hinge_is_zero_outside_the_margin() {
        let d = Cost::Hinge
            .derivative(&v(&[2.0, 0.2]), &v(&[1.0, -1.0]))
            .unwrap();
        assert_eq!(d.as_slice(), &[0.0, 1.0]);
    }

    #[test]
    fn matrix_costs_average_over_rows() {
        let p = Matrix::from_rows(&[vec![1.0, 1.0], vec![1.0, 1.0]]).unwrap();
        let y = Matrix::new(2, 2);
        assert!((Cost::Mse.value_matrix(&p, &y).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_cost_name_fails() {
        assert_eq!("MSE".parse::<Cost>().unwrap(), Cost::Mse);
        assert!("l3".parse::<Cost>().is_err());
        assert!(Cost::Huber { delta: 0.0 }.validate().is_err());
    }
}
