//! Kernelized support-vector classifier trained in dual form.
//!
//! One Lagrange multiplier `alpha[i]` per training sample, a scalar bias and a
//! [`Kernel`]. The dual objective is
//!
//! ```text
//! J(alpha) = -sum(alpha) + 1/2 * alphaᵗ Q alpha,    Q[i][j] = y_i y_j K(x_i, x_j)
//! ```
//!
//! minimized by projected gradient descent: `alpha -= lr * (Q alpha - 1)`, then every
//! multiplier is clamped into `[0, C]`. Targets must be `-1` or `+1`.

use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::serde_model::expect_layers;
use crate::train::run_epochs;
use crate::{
    Dataset, DenseBuffer, Error, LayerParameters, Matrix, Metric, Parameters, Progress, Real,
    Result, TrainConfig, TrainReport, TrainState, Vector,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Kernel {
    /// `K(u, v) = u · v`.
    #[default]
    Linear,
}

impl Kernel {
    #[inline]
    pub fn apply(self, u: &[Real], v: &[Real]) -> Real {
        match self {
            Kernel::Linear => crate::vector::dot(u, v),
        }
    }

    /// `K[i][j] = K(a_i, b_j)` for every row pair.
    pub fn gram(self, a: &Matrix, b: &Matrix) -> Result<Matrix> {
        match self {
            Kernel::Linear => a.matmul_transpose(b),
        }
    }
}

impl FromStr for Kernel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Kernel::Linear),
            _ => Err(Error::unknown("kernel", s)),
        }
    }
}

/// How the bias is re-estimated from the margin support vectors (`0 < alpha < C`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BiasEstimate {
    /// Use the first margin support vector only.
    #[default]
    FirstSupportVector,
    /// Average the bias gradient over every margin support vector.
    MeanOverSupportVectors,
}

/// Clamp every multiplier into `[0, c]`.
pub fn alpha_projection(alpha: &mut Vector, c: Real) {
    alpha.map_in_place(|a| a.clamp(0.0, c));
}

/// Dual-form support-vector classifier.
#[derive(Debug, Clone)]
pub struct DualSvc {
    data: Dataset,
    c: Real,
    kernel: Kernel,
    bias_estimate: BiasEstimate,
    /// `K(x_i, x_j)` over the training set.
    gram: Matrix,
    /// `y_i y_j K(x_i, x_j)`.
    q: Matrix,
    alpha: Vector,
    bias: Real,
    z: Vector,
    y_hat: Vector,
    state: TrainState,
    rng: StdRng,
}

impl DualSvc {
    pub fn new(data: Dataset, c: Real, kernel: Kernel) -> Result<Self> {
        if !(c.is_finite() && c > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "C must be finite and > 0, got {c}"
            )));
        }
        if let Some(y) = data.targets().iter().find(|&&y| y != 1.0 && y != -1.0) {
            return Err(Error::InvalidData(format!(
                "svm targets must be -1 or +1, got {y}"
            )));
        }

        let gram = kernel.gram(data.inputs(), data.inputs())?;
        let q = data
            .targets()
            .outer_product(data.targets())
            .hadamard_product_new(&gram)?;
        let mut svc = Self {
            data,
            c,
            kernel,
            bias_estimate: BiasEstimate::default(),
            gram,
            q,
            alpha: Vector::default(),
            bias: 0.0,
            z: Vector::default(),
            y_hat: Vector::default(),
            state: TrainState::Uninitialized,
            rng: StdRng::from_entropy(),
        };
        svc.draw_parameters();
        Ok(svc)
    }

    /// Re-draw the initial multipliers and bias from a seeded generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self.draw_parameters();
        self
    }

    pub fn with_bias_estimate(mut self, bias_estimate: BiasEstimate) -> Self {
        self.bias_estimate = bias_estimate;
        self
    }

    fn draw_parameters(&mut self) {
        self.alpha = Vector::random_uniform(self.data.len(), 0.0, 1.0, &mut self.rng);
        alpha_projection(&mut self.alpha, self.c);
        self.bias = self.rng.gen_range(0.0..1.0);
    }

    #[inline]
    pub fn alpha(&self) -> &Vector {
        &self.alpha
    }

    #[inline]
    pub fn bias(&self) -> Real {
        self.bias
    }

    #[inline]
    pub fn c(&self) -> Real {
        self.c
    }

    #[inline]
    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    #[inline]
    pub fn state(&self) -> TrainState {
        self.state
    }

    /// Decision values from the last forward pass.
    #[inline]
    pub fn z(&self) -> &Vector {
        &self.z
    }

    fn state_mut(m: &mut Self) -> &mut TrainState {
        &mut m.state
    }

    /// `alpha ⊙ y`: the per-sample weight of each training point in the decision function.
    fn signed_alpha(&self) -> Result<Vector> {
        self.alpha.hadamard_product_new(self.data.targets())
    }

    /// Dual objective at the current multipliers.
    pub fn cost(&self) -> Result<Real> {
        let q_alpha = self.q.mat_vec(&self.alpha)?;
        Ok(-self.alpha.sum() + 0.5 * self.alpha.dot(&q_alpha)?)
    }

    /// Recompute decision values and labels over the training set.
    pub fn forward_pass(&mut self) -> Result<&Vector> {
        let mut z = self.gram.mat_vec(&self.signed_alpha()?)?;
        z.scalar_add(self.bias);
        self.y_hat = z.sign();
        self.z = z;
        Ok(&self.y_hat)
    }

    /// Update the bias from the margin support vectors. Returns `false` (bias unchanged)
    /// when there is none.
    fn update_bias(&mut self, lr: Real) -> Result<bool> {
        let margin: Vec<usize> = (0..self.alpha.len())
            .filter(|&i| self.alpha[i] > 0.0 && self.alpha[i] < self.c)
            .collect();
        if margin.is_empty() {
            warn!(c = self.c, "no margin support vector; bias left unchanged");
            return Ok(false);
        }

        let weights = self.signed_alpha()?;
        let y = self.data.targets();
        let gradient = |i: usize| {
            let f = crate::vector::dot(weights.as_slice(), self.gram.row(i));
            (1.0 - y[i] * f) / y[i]
        };
        let grad = match self.bias_estimate {
            BiasEstimate::FirstSupportVector => gradient(margin[0]),
            BiasEstimate::MeanOverSupportVectors => {
                margin.iter().map(|&i| gradient(i)).sum::<Real>() / margin.len() as Real
            }
        };
        self.bias -= lr * grad;
        Ok(true)
    }

    /// Projected gradient descent on the dual objective.
    pub fn gradient_descent(
        &mut self,
        cfg: &TrainConfig,
        progress: &mut dyn Progress,
    ) -> Result<TrainReport> {
        cfg.validate()?;
        self.forward_pass()?;
        let lr = cfg.learning_rate;
        debug!(n = self.data.len(), c = self.c, kernel = ?self.kernel, "dual svc training");

        run_epochs(self, cfg, Self::state_mut, progress, |m| {
            let previous = m.cost()?;
            let mut grad = m.q.mat_vec(&m.alpha)?;
            grad.scalar_add(-1.0);
            m.alpha.scaled_sub(lr, &grad)?;
            alpha_projection(&mut m.alpha, m.c);
            m.update_bias(lr)?;
            m.forward_pass()?;
            Ok((previous, m.cost()?))
        })
    }

    /// Decision values `sum_j alpha_j y_j K(x_j, x) + bias` for every row of `x`.
    pub fn decision_function(&self, x: &Matrix) -> Result<Vector> {
        let k = self.kernel.gram(x, self.data.inputs())?;
        let mut z = k.mat_vec(&self.signed_alpha()?)?;
        z.scalar_add(self.bias);
        Ok(z)
    }

    /// Predicted labels (`-1`, `0` or `+1`) for every row of `x`.
    pub fn model_set_test(&self, x: &Matrix) -> Result<Vector> {
        Ok(self.decision_function(x)?.sign())
    }

    /// Predicted label for a single sample.
    pub fn model_test(&self, x: &Vector) -> Result<Real> {
        if x.len() != self.data.input_dim() {
            return Err(Error::shape("model_test", self.data.input_dim(), x.len()));
        }
        let weights = self.signed_alpha()?;
        let z: Real = self
            .data
            .inputs()
            .iter_rows()
            .zip(weights.iter())
            .map(|(row, &w)| w * self.kernel.apply(row, x.as_slice()))
            .sum::<Real>()
            + self.bias;
        Ok(crate::vector::sign(z))
    }

    /// Fraction of training samples whose predicted label equals the target.
    pub fn score(&mut self) -> Result<Real> {
        self.forward_pass()?;
        Metric::Accuracy.evaluate(&self.y_hat, self.data.targets())
    }
}

impl Parameters for DualSvc {
    /// The multipliers as weights and the scalar bias.
    fn parameters(&self) -> Vec<LayerParameters> {
        vec![LayerParameters::from_vector(1, &self.alpha, self.bias)]
    }

    fn restore(&mut self, layers: &[LayerParameters]) -> Result<()> {
        expect_layers(layers, 1)?;
        let (alpha, bias) = layers[0].column()?;
        if alpha.len() != self.data.len() {
            return Err(Error::shape("restore", self.data.len(), alpha.len()));
        }
        self.alpha = alpha;
        alpha_projection(&mut self.alpha, self.c);
        self.bias = bias;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::Silent;

    fn separable() -> Dataset {
        Dataset::from_rows(
            &[
                vec![2.0, 2.0],
                vec![3.0, 2.5],
                vec![-2.0, -1.5],
                vec![-2.5, -3.0],
            ],
            &[1.0, 1.0, -1.0, -1.0],
        )
        .unwrap()
    }

    fn line() -> Dataset {
        Dataset::from_rows(&[vec![1.0], vec![2.0], vec![-1.0]], &[1.0, 1.0, -1.0]).unwrap()
    }

    fn with_alpha(svc: &mut DualSvc, alpha: Vec<Real>, bias: Real) {
        let params = LayerParameters::from_vector(1, &Vector::from(alpha), bias);
        svc.restore(&[params]).unwrap();
    }

    #[test]
    fn projection_clamps_any_magnitude() {
        let mut alpha = Vector::from(vec![-1e9, -0.5, 0.0, 0.3, 2.0, 1e12, Real::MAX]);
        alpha_projection(&mut alpha, 0.75);
        assert!(alpha.iter().all(|a| (0.0..=0.75).contains(a)));
        assert_eq!(alpha[3], 0.3);
    }

    #[test]
    fn unknown_kernel_is_an_error() {
        assert_eq!("Linear".parse::<Kernel>().unwrap(), Kernel::Linear);
        let err = "rbf".parse::<Kernel>().unwrap_err();
        assert!(matches!(err, Error::UnknownVariant { kind: "kernel", .. }));
    }

    #[test]
    fn targets_must_be_signed_labels() {
        let data = Dataset::from_rows(&[vec![1.0], vec![2.0]], &[0.0, 1.0]).unwrap();
        assert!(matches!(
            DualSvc::new(data, 1.0, Kernel::Linear),
            Err(Error::InvalidData(_))
        ));
        assert!(DualSvc::new(separable(), 0.0, Kernel::Linear).is_err());
    }

    #[test]
    fn training_keeps_alpha_bounded_and_cost_non_increasing() {
        let mut svc = DualSvc::new(separable(), 0.5, Kernel::Linear)
            .unwrap()
            .with_seed(3);
        let report = svc
            .gradient_descent(&TrainConfig::new(0.01, 200), &mut Silent)
            .unwrap();

        assert!(svc.alpha().iter().all(|a| (0.0..=0.5).contains(a)));
        let mut previous = report.initial_cost;
        for cost in &report.history {
            assert!(*cost <= previous + 1e-12, "{cost} > {previous}");
            previous = *cost;
        }
        assert_eq!(svc.state(), TrainState::Stopped);
    }

    #[test]
    fn bias_uses_first_margin_support_vector() {
        let mut svc = DualSvc::new(line(), 1.0, Kernel::Linear).unwrap();
        with_alpha(&mut svc, vec![0.5, 0.25, 1.0], 0.0);
        // f(x_0) = 2, so the gradient is (1 - 2) / 1 = -1.
        assert!(svc.update_bias(0.1).unwrap());
        assert!((svc.bias() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn bias_can_average_margin_support_vectors() {
        let mut svc = DualSvc::new(line(), 1.0, Kernel::Linear)
            .unwrap()
            .with_bias_estimate(BiasEstimate::MeanOverSupportVectors);
        with_alpha(&mut svc, vec![0.5, 0.25, 1.0], 0.0);
        // Gradients -1 and -3 at the two margin vectors.
        assert!(svc.update_bias(0.1).unwrap());
        assert!((svc.bias() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn bias_unchanged_without_margin_support_vector() {
        let mut svc = DualSvc::new(line(), 1.0, Kernel::Linear).unwrap();
        with_alpha(&mut svc, vec![0.0, 1.0, 1.0], 0.25);
        assert!(!svc.update_bias(0.1).unwrap());
        assert_eq!(svc.bias(), 0.25);
    }

    #[test]
    fn single_and_batch_predictions_agree() {
        let mut svc = DualSvc::new(separable(), 1.0, Kernel::Linear)
            .unwrap()
            .with_seed(8);
        svc.gradient_descent(&TrainConfig::new(0.01, 20), &mut Silent)
            .unwrap();

        let x = separable().inputs().clone();
        let batch = svc.model_set_test(&x).unwrap();
        for (i, label) in batch.iter().enumerate() {
            assert_eq!(svc.model_test(&x.row_vector(i)).unwrap(), *label);
            assert!([-1.0, 0.0, 1.0].contains(label));
        }
        let score = svc.score().unwrap();
        assert!((0.0..=1.0).contains(&score));
    }
}
