//! Metrics.
//!
//! Metrics are evaluation helpers (they do not participate in backprop).

use crate::{DenseBuffer, Real, Result, Vector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Supported evaluation metrics.
pub enum Metric {
    /// Fraction of predictions that round to their target.
    Accuracy,
    /// Mean squared error.
    Mse,
    /// Mean absolute error.
    Mae,
}

impl Metric {
    /// Evaluate predictions against targets; `0.0` for empty inputs.
    pub fn evaluate(self, y_hat: &Vector, y: &Vector) -> Result<Real> {
        y_hat.conformable(y, "metric")?;
        if y.is_empty() {
            return Ok(0.0);
        }
        let n = y.len() as Real;
        let pairs = y_hat.iter().zip(y.iter());
        let value = match self {
            Metric::Accuracy => pairs.filter(|&(p, t)| p.round() == *t).count() as Real / n,
            Metric::Mse => pairs.map(|(p, t)| (p - t) * (p - t)).sum::<Real>() / n,
            Metric::Mae => pairs.map(|(p, t)| (p - t).abs()).sum::<Real>() / n,
        };
        Ok(value)
    }
}

/// Fraction of predictions that round to their target.
pub fn score(y_hat: &Vector, y: &Vector) -> Result<Real> {
    Metric::Accuracy.evaluate(y_hat, y)
}
