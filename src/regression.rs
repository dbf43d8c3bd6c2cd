//! Single-output regression models.
//!
//! Linear, logistic, probit and tanh regression all predict `ŷ = link(X · w + b)` and
//! differ only in the link [`Activation`] and the [`Cost`] being minimized, so one
//! [`Regression`] type covers them. Training routines:
//!
//! - [`Regression::gradient_descent`]: full batch per epoch.
//! - [`Regression::sgd`]: one uniformly drawn sample per epoch (with replacement).
//! - [`Regression::mbgd`]: contiguous mini-batches, remainder folded into the last one.
//! - [`Regression::newton_raphson`]: `w -= lr · (XᵗX)⁻¹ Xᵗ δ`.
//! - [`Regression::normal_equation`]: closed form for the linear link.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::serde_model::expect_layers;
use crate::train::run_epochs;
use crate::{
    Activation, Cost, Dataset, DenseBuffer, Error, LayerParameters, Matrix, Metric, Parameters,
    Penalty, Progress, Real, Regularizer, Result, TrainConfig, TrainReport, TrainState, Vector,
};

/// Link, cost and parameters: everything a descent step updates.
#[derive(Debug, Clone)]
struct Fit {
    activation: Activation,
    cost: Cost,
    regularizer: Regularizer,
    weights: Vector,
    bias: Real,
}

impl Fit {
    /// Pre-activation and prediction for a batch.
    fn predict(&self, x: &Matrix) -> Result<(Vector, Vector)> {
        let mut z = x.mat_vec(&self.weights)?;
        z.scalar_add(self.bias);
        let y_hat = self.activation.forward_vector(&z);
        Ok((z, y_hat))
    }

    fn cost(&self, y_hat: &Vector, y: &Vector) -> Result<Real> {
        Ok(self.cost.value(y_hat, y)? + self.regularizer.term(self.weights.as_slice()))
    }

    /// `δ = cost'(ŷ, y) ⊙ link'(z)`.
    fn delta(&self, x: &Matrix, y: &Vector) -> Result<Vector> {
        let (z, y_hat) = self.predict(x)?;
        let mut delta = self.cost.derivative(&y_hat, y)?;
        delta.hadamard_product(&self.activation.derivative_vector(&z))?;
        Ok(delta)
    }

    /// One gradient step on the batch `(x, y)`.
    fn step(&mut self, x: &Matrix, y: &Vector, lr: Real) -> Result<()> {
        let delta = self.delta(x, y)?;
        let mut grad = x.transpose_mat_vec(&delta)?;
        grad.scalar_multiply(1.0 / y.len() as Real);
        self.regularizer
            .add_gradient(self.weights.as_slice(), grad.as_mut_slice());

        self.weights.scaled_sub(lr, &grad)?;
        self.regularizer.project(self.weights.as_mut_slice());
        self.bias -= lr * delta.mean();
        Ok(())
    }

    /// One Newton-Raphson step given `(XᵗX)⁻¹`.
    fn newton_step(
        &mut self,
        x: &Matrix,
        y: &Vector,
        hessian_inv: &Matrix,
        lr: Real,
    ) -> Result<()> {
        let delta = self.delta(x, y)?;
        let direction = hessian_inv.mat_vec(&x.transpose_mat_vec(&delta)?)?;
        self.weights.scaled_sub(lr, &direction)?;
        self.regularizer.project(self.weights.as_mut_slice());
        self.bias -= lr * delta.mean();
        Ok(())
    }
}

/// A generalized linear model trained by gradient descent.
#[derive(Debug, Clone)]
pub struct Regression {
    data: Dataset,
    fit: Fit,
    z: Vector,
    y_hat: Vector,
    state: TrainState,
    rng: StdRng,
}

impl Regression {
    /// A model with the given link and cost. Weights and bias start in `U[0, 1)`.
    pub fn new(data: Dataset, activation: Activation, cost: Cost) -> Result<Self> {
        activation.validate()?;
        cost.validate()?;
        if activation == Activation::Softmax {
            return Err(Error::InvalidConfig(
                "softmax is not a single-output link".to_owned(),
            ));
        }
        let mut rng = StdRng::from_entropy();
        let (weights, bias) = draw_parameters(data.input_dim(), &mut rng);
        Ok(Self {
            data,
            fit: Fit {
                activation,
                cost,
                regularizer: Regularizer::none(),
                weights,
                bias,
            },
            z: Vector::default(),
            y_hat: Vector::default(),
            state: TrainState::Uninitialized,
            rng,
        })
    }

    /// Ordinary least squares: identity link, MSE.
    pub fn linear(data: Dataset) -> Result<Self> {
        Self::new(data, Activation::Linear, Cost::Mse)
    }

    /// Logistic link, log-loss.
    pub fn logistic(data: Dataset) -> Result<Self> {
        Self::new(data, Activation::Sigmoid, Cost::LogLoss)
    }

    /// Gaussian CDF link, MSE.
    pub fn probit(data: Dataset) -> Result<Self> {
        Self::new(data, Activation::GaussianCdf, Cost::Mse)
    }

    /// Hyperbolic tangent link, MSE.
    pub fn tanh(data: Dataset) -> Result<Self> {
        Self::new(data, Activation::Tanh, Cost::Mse)
    }

    pub fn with_regularizer(mut self, regularizer: Regularizer) -> Result<Self> {
        regularizer.validate()?;
        self.fit.regularizer = regularizer;
        Ok(self)
    }

    /// Re-draw the initial parameters from a seeded generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        let (weights, bias) = draw_parameters(self.data.input_dim(), &mut self.rng);
        self.fit.weights = weights;
        self.fit.bias = bias;
        self
    }

    #[inline]
    pub fn weights(&self) -> &Vector {
        &self.fit.weights
    }

    #[inline]
    pub fn bias(&self) -> Real {
        self.fit.bias
    }

    #[inline]
    pub fn state(&self) -> TrainState {
        self.state
    }

    #[inline]
    pub fn data(&self) -> &Dataset {
        &self.data
    }

    /// Predictions from the last forward pass.
    #[inline]
    pub fn y_hat(&self) -> &Vector {
        &self.y_hat
    }

    fn state_mut(m: &mut Self) -> &mut TrainState {
        &mut m.state
    }

    /// Recompute `z` and `ŷ` over the whole dataset.
    pub fn forward_pass(&mut self) -> Result<&Vector> {
        let (z, y_hat) = self.fit.predict(self.data.inputs())?;
        self.z = z;
        self.y_hat = y_hat;
        Ok(&self.y_hat)
    }

    /// Cost of the last forward pass, including the weight penalty.
    pub fn cost(&self) -> Result<Real> {
        self.fit.cost(&self.y_hat, self.data.targets())
    }

    fn begin(&mut self, cfg: &TrainConfig) -> Result<()> {
        cfg.validate()?;
        if let Some(seed) = cfg.seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.forward_pass()?;
        Ok(())
    }

    /// Full-batch gradient descent.
    pub fn gradient_descent(
        &mut self,
        cfg: &TrainConfig,
        progress: &mut dyn Progress,
    ) -> Result<TrainReport> {
        self.begin(cfg)?;
        let lr = cfg.learning_rate;
        run_epochs(self, cfg, Self::state_mut, progress, |m| {
            let previous = m.cost()?;
            m.fit.step(m.data.inputs(), m.data.targets(), lr)?;
            m.forward_pass()?;
            Ok((previous, m.cost()?))
        })
    }

    /// Stochastic gradient descent: one random sample per epoch.
    pub fn sgd(&mut self, cfg: &TrainConfig, progress: &mut dyn Progress) -> Result<TrainReport> {
        self.begin(cfg)?;
        let lr = cfg.learning_rate;
        run_epochs(self, cfg, Self::state_mut, progress, |m| {
            let previous = m.cost()?;
            let idx = m.data.random_index(&mut m.rng);
            let (row, target) = m.data.sample(idx);
            let x = Matrix::from_flat((1, row.len()), row.to_vec())?;
            m.fit.step(&x, &Vector::from(vec![target]), lr)?;
            m.forward_pass()?;
            Ok((previous, m.cost()?))
        })
    }

    /// Mini-batch gradient descent over contiguous batches of `cfg.mini_batch_size`.
    pub fn mbgd(&mut self, cfg: &TrainConfig, progress: &mut dyn Progress) -> Result<TrainReport> {
        self.begin(cfg)?;
        let batches = self.data.mini_batches(cfg.mini_batch_size)?;
        debug!(batches = batches.len(), "mini-batch gradient descent");
        let lr = cfg.learning_rate;
        run_epochs(self, cfg, Self::state_mut, progress, |m| {
            let previous = m.cost()?;
            for batch in &batches {
                m.fit.step(batch.inputs(), batch.targets(), lr)?;
            }
            m.forward_pass()?;
            Ok((previous, m.cost()?))
        })
    }

    /// Newton-Raphson: `w -= lr · (XᵗX)⁻¹ Xᵗ δ`, `b -= lr · mean(δ)`.
    ///
    /// Fails with [`Error::SingularMatrix`] when `XᵗX` cannot be inverted.
    pub fn newton_raphson(
        &mut self,
        cfg: &TrainConfig,
        progress: &mut dyn Progress,
    ) -> Result<TrainReport> {
        let x = self.data.inputs();
        let hessian_inv = x.transpose_matmul(x)?.inverse()?;
        self.begin(cfg)?;
        let lr = cfg.learning_rate;
        run_epochs(self, cfg, Self::state_mut, progress, |m| {
            let previous = m.cost()?;
            m.fit
                .newton_step(m.data.inputs(), m.data.targets(), &hessian_inv, lr)?;
            m.forward_pass()?;
            Ok((previous, m.cost()?))
        })
    }

    /// Closed-form least squares on centered data: `w = (XcᵗXc + λI)⁻¹ Xcᵗ yc`,
    /// `b = ȳ - x̄ · w`. `λ` is the ridge lambda when a ridge penalty is configured.
    ///
    /// Only defined for the linear link. Fails with [`Error::SingularMatrix`] when the
    /// system cannot be solved.
    pub fn normal_equation(&mut self) -> Result<()> {
        if self.fit.activation != Activation::Linear {
            return Err(Error::InvalidConfig(format!(
                "normal equation needs a linear link, got {:?}",
                self.fit.activation
            )));
        }
        let x_mean = self.data.inputs().column_means();
        let y_mean = self.data.targets().mean();

        let mut xc = self.data.inputs().clone();
        xc.sub_row_vector(&x_mean)?;
        let yc = self.data.targets().scalar_add_new(-y_mean);

        let mut gram = xc.transpose_matmul(&xc)?;
        if self.fit.regularizer.penalty == Penalty::Ridge {
            let mut ridge = Matrix::identity(gram.rows());
            ridge.scalar_multiply(self.fit.regularizer.lambda);
            gram.add(&ridge)?;
        }
        let weights = gram.inverse()?.mat_vec(&xc.transpose_mat_vec(&yc)?)?;
        self.fit.bias = y_mean - x_mean.dot(&weights)?;
        self.fit.weights = weights;

        self.forward_pass()?;
        self.state = TrainState::Stopped;
        info!(cost = self.cost()?, "normal equation solved");
        Ok(())
    }

    /// Predictions for every row of `x`.
    pub fn model_set_test(&self, x: &Matrix) -> Result<Vector> {
        Ok(self.fit.predict(x)?.1)
    }

    /// Prediction for a single sample.
    pub fn model_test(&self, x: &Vector) -> Result<Real> {
        let z = self.fit.weights.dot(x)? + self.fit.bias;
        Ok(self.fit.activation.apply(z))
    }

    /// Fraction of training samples whose rounded prediction equals the target.
    pub fn score(&self) -> Result<Real> {
        let y_hat = self.model_set_test(self.data.inputs())?;
        Metric::Accuracy.evaluate(&y_hat, self.data.targets())
    }
}

impl Parameters for Regression {
    fn parameters(&self) -> Vec<LayerParameters> {
        vec![LayerParameters::from_vector(
            1,
            &self.fit.weights,
            self.fit.bias,
        )]
    }

    fn restore(&mut self, layers: &[LayerParameters]) -> Result<()> {
        expect_layers(layers, 1)?;
        let (weights, bias) = layers[0].column()?;
        if weights.len() != self.data.input_dim() {
            return Err(Error::shape(
                "restore",
                self.data.input_dim(),
                weights.len(),
            ));
        }
        self.fit.weights = weights;
        self.fit.bias = bias;
        Ok(())
    }
}

fn draw_parameters<R: Rng + ?Sized>(n_features: usize, rng: &mut R) -> (Vector, Real) {
    let weights = Vector::random_uniform(n_features, 0.0, 1.0, rng);
    (weights, rng.gen_range(0.0..1.0))
}
