//! Hidden and output layers.
//!
//! A layer owns its input batch (rows = samples, columns = features), its parameters and
//! the intermediates backpropagation needs (`z`, `a`, `delta`).
//!
//! Parameters are derived lazily. A layer starts [`LayerState::Uninitialized`]; the first
//! [`forward_pass`](HiddenLayer::forward_pass) sizes the weights from the input's feature
//! count and draws them from the configured [`Init`]. Mutations that change a parameter
//! shape (feature count, width, init policy) drop the layer back to `Uninitialized`.
//! Feeding a new batch with the same feature count keeps the trained parameters.

use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tracing::debug;

use crate::vector::dot;
use crate::{Activation, Cost, DenseBuffer, Error, Matrix, Real, Regularizer, Result, Vector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Weight initialization policy.
///
/// `n` is the fan-in (feature count) and `m` the fan-out (layer width).
pub enum Init {
    /// `U[0, 1)`.
    #[default]
    Default,
    /// `N(0, sqrt(2 / (n + m)))`.
    XavierNormal,
    /// `U[-sqrt(6 / (n + m)), sqrt(6 / (n + m)))`.
    XavierUniform,
    /// `N(0, sqrt(2 / n))`.
    HeNormal,
    /// `U[-sqrt(6 / n), sqrt(6 / n))`.
    HeUniform,
    /// `N(0, sqrt(1 / n))`.
    LeCunNormal,
    /// `U[-sqrt(3 / n), sqrt(3 / n))`.
    LeCunUniform,
    /// `U[-1 / sqrt(n), 1 / sqrt(n))`.
    Uniform,
}

impl Init {
    /// Draw an `(fan_in, fan_out)` weight matrix.
    pub fn weights<R: Rng + ?Sized>(
        self,
        fan_in: usize,
        fan_out: usize,
        rng: &mut R,
    ) -> Result<Matrix> {
        if fan_in == 0 || fan_out == 0 {
            return Err(Error::InvalidConfig(format!(
                "weight shape must be non-empty, got ({fan_in}, {fan_out})"
            )));
        }
        let n = fan_in as Real;
        let m = fan_out as Real;
        let w = match self {
            Init::Default => Matrix::random_uniform(fan_in, fan_out, 0.0, 1.0, rng),
            Init::XavierNormal => normal(fan_in, fan_out, (2.0 / (n + m)).sqrt(), rng)?,
            Init::XavierUniform => symmetric(fan_in, fan_out, (6.0 / (n + m)).sqrt(), rng),
            Init::HeNormal => normal(fan_in, fan_out, (2.0 / n).sqrt(), rng)?,
            Init::HeUniform => symmetric(fan_in, fan_out, (6.0 / n).sqrt(), rng),
            Init::LeCunNormal => normal(fan_in, fan_out, (1.0 / n).sqrt(), rng)?,
            Init::LeCunUniform => symmetric(fan_in, fan_out, (3.0 / n).sqrt(), rng),
            Init::Uniform => symmetric(fan_in, fan_out, 1.0 / n.sqrt(), rng),
        };
        Ok(w)
    }
}

impl FromStr for Init {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let init = match s.to_ascii_lowercase().as_str() {
            "default" => Init::Default,
            "xaviernormal" | "xavier_normal" => Init::XavierNormal,
            "xavieruniform" | "xavier_uniform" => Init::XavierUniform,
            "henormal" | "he_normal" => Init::HeNormal,
            "heuniform" | "he_uniform" => Init::HeUniform,
            "lecunnormal" | "lecun_normal" => Init::LeCunNormal,
            "lecununiform" | "lecun_uniform" => Init::LeCunUniform,
            "uniform" => Init::Uniform,
            _ => return Err(Error::unknown("weight init", s)),
        };
        Ok(init)
    }
}

fn normal<R: Rng + ?Sized>(rows: usize, cols: usize, std: Real, rng: &mut R) -> Result<Matrix> {
    let dist = Normal::new(0.0, std)
        .map_err(|e| Error::InvalidConfig(format!("invalid weight distribution: {e}")))?;
    let data = (0..rows * cols).map(|_| dist.sample(rng)).collect();
    Ok(Matrix::from_vec(rows, cols, data))
}

fn symmetric<R: Rng + ?Sized>(rows: usize, cols: usize, bound: Real, rng: &mut R) -> Matrix {
    Matrix::random_uniform(rows, cols, -bound, bound, rng)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    /// Parameters must be (re)drawn before the next forward pass.
    Uninitialized,
    Ready,
}

/// Gradient of a hidden layer's cost with respect to its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerGradient {
    pub weights: Matrix,
    pub bias: Vector,
}

/// Gradient of an output layer's cost with respect to its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputGradient {
    pub weights: Vector,
    pub bias: Real,
}

/// A fully connected layer of `n_hidden` units: `a = activation(input · W + b)`.
///
/// `W` has shape `(n_features, n_hidden)` and `b` has length `n_hidden`.
#[derive(Debug, Clone)]
pub struct HiddenLayer {
    n_hidden: usize,
    activation: Activation,
    init: Init,
    regularizer: Regularizer,
    input: Matrix,
    weights: Matrix,
    bias: Vector,
    z: Matrix,
    a: Matrix,
    delta: Matrix,
    z_test: Vector,
    a_test: Vector,
    state: LayerState,
    rng: StdRng,
}

impl HiddenLayer {
    /// Bind a layer of width `n_hidden` to an initial input batch.
    pub fn new(n_hidden: usize, activation: Activation, input: Matrix) -> Result<Self> {
        if n_hidden == 0 {
            return Err(Error::InvalidConfig("layer width must be > 0".to_owned()));
        }
        activation.validate()?;

        Ok(Self {
            n_hidden,
            activation,
            init: Init::default(),
            regularizer: Regularizer::none(),
            input,
            weights: Matrix::default(),
            bias: Vector::default(),
            z: Matrix::default(),
            a: Matrix::default(),
            delta: Matrix::default(),
            z_test: Vector::default(),
            a_test: Vector::default(),
            state: LayerState::Uninitialized,
            rng: StdRng::from_entropy(),
        })
    }

    pub fn with_init(mut self, init: Init) -> Self {
        self.set_init(init);
        self
    }

    pub fn with_regularizer(mut self, regularizer: Regularizer) -> Result<Self> {
        self.set_regularizer(regularizer)?;
        Ok(self)
    }

    /// Seed the generator used for the (lazy) parameter draw.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    #[inline]
    pub fn n_hidden(&self) -> usize {
        self.n_hidden
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    #[inline]
    pub fn init(&self) -> Init {
        self.init
    }

    #[inline]
    pub fn regularizer(&self) -> Regularizer {
        self.regularizer
    }

    #[inline]
    pub fn state(&self) -> LayerState {
        self.state
    }

    #[inline]
    pub fn input(&self) -> &Matrix {
        &self.input
    }

    #[inline]
    pub fn weights(&self) -> &Matrix {
        &self.weights
    }

    #[inline]
    pub fn bias(&self) -> &Vector {
        &self.bias
    }

    #[inline]
    pub fn z(&self) -> &Matrix {
        &self.z
    }

    #[inline]
    pub fn a(&self) -> &Matrix {
        &self.a
    }

    #[inline]
    pub fn delta(&self) -> &Matrix {
        &self.delta
    }

    /// Replace the input batch. A different feature count invalidates the parameters.
    pub fn set_input(&mut self, input: Matrix) {
        if self.state == LayerState::Ready && input.cols() != self.weights.rows() {
            self.invalidate("input feature count changed");
        }
        self.input = input;
    }

    pub fn set_n_hidden(&mut self, n_hidden: usize) -> Result<()> {
        if n_hidden == 0 {
            return Err(Error::InvalidConfig("layer width must be > 0".to_owned()));
        }
        if n_hidden != self.n_hidden {
            self.n_hidden = n_hidden;
            self.invalidate("layer width changed");
        }
        Ok(())
    }

    pub fn set_init(&mut self, init: Init) {
        if init != self.init {
            self.init = init;
            self.invalidate("init policy changed");
        }
    }

    pub fn set_activation(&mut self, activation: Activation) -> Result<()> {
        activation.validate()?;
        self.activation = activation;
        Ok(())
    }

    pub fn set_regularizer(&mut self, regularizer: Regularizer) -> Result<()> {
        regularizer.validate()?;
        self.regularizer = regularizer;
        Ok(())
    }

    fn invalidate(&mut self, reason: &'static str) {
        if self.state == LayerState::Ready {
            debug!(reason, "hidden layer invalidated");
        }
        self.state = LayerState::Uninitialized;
    }

    /// Size and draw the parameters if they are not current. Idempotent.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state == LayerState::Ready {
            return Ok(());
        }
        let n_features = self.input.cols();
        if n_features == 0 {
            return Err(Error::InvalidData(
                "layer input has no feature columns".to_owned(),
            ));
        }
        self.weights = self
            .init
            .weights(n_features, self.n_hidden, &mut self.rng)?;
        self.bias = Vector::random_uniform(self.n_hidden, 0.0, 1.0, &mut self.rng);
        self.state = LayerState::Ready;
        debug!(
            n_features,
            n_hidden = self.n_hidden,
            init = ?self.init,
            "hidden layer initialized"
        );
        Ok(())
    }

    /// Install explicit parameters (e.g. loaded from disk) and mark the layer ready.
    pub fn set_parameters(&mut self, weights: Matrix, bias: Vector) -> Result<()> {
        if weights.cols() != self.n_hidden || weights.rows() == 0 {
            return Err(Error::shape(
                "set_parameters",
                ("_", self.n_hidden),
                weights.shape(),
            ));
        }
        if bias.len() != self.n_hidden {
            return Err(Error::shape("set_parameters", self.n_hidden, bias.len()));
        }
        self.weights = weights;
        self.bias = bias;
        self.state = LayerState::Ready;
        Ok(())
    }

    /// `z = input · W + b` (bias broadcast over rows), then `a = activation(z)`.
    pub fn forward_pass(&mut self) -> Result<&Matrix> {
        self.initialize()?;
        self.input.matmul_into(&self.weights, &mut self.z)?;
        self.z.add_row_vector(&self.bias)?;
        self.a = self.activation.forward_matrix(&self.z);
        Ok(&self.a)
    }

    /// Single-sample inference; leaves the batched `z`/`a` untouched.
    pub fn test(&mut self, x: &Vector) -> Result<&Vector> {
        self.initialize()?;
        self.z_test = self.weights.transpose_mat_vec(x)?;
        self.z_test.add(&self.bias)?;
        self.a_test = self.activation.forward_vector(&self.z_test);
        Ok(&self.a_test)
    }

    /// Store `delta = upstream ⊙ activation'(z)` and return the parameter gradient.
    ///
    /// `upstream` is the error signal with respect to this layer's activation, shaped like `z`.
    /// The weight gradient is `inputᵗ · delta` plus the regularization term; the bias
    /// gradient sums `delta` over samples.
    pub fn backward(&mut self, upstream: &Matrix) -> Result<LayerGradient> {
        let mut delta = self.activation.derivative_matrix(&self.z);
        delta.hadamard_product(upstream)?;
        self.delta = delta;

        let mut weights = self.input.transpose_matmul(&self.delta)?;
        self.regularizer
            .add_gradient(self.weights.as_slice(), weights.as_mut_slice());
        Ok(LayerGradient {
            weights,
            bias: self.delta.column_sums(),
        })
    }

    /// Error signal for whatever produced this layer's input: `delta · Wᵗ`.
    pub fn propagate_error(&self) -> Result<Matrix> {
        self.delta.matmul_transpose(&self.weights)
    }

    /// `param -= scale * grad`, then apply the regularizer's projection.
    pub fn descend(&mut self, grad: &LayerGradient, scale: Real) -> Result<()> {
        self.weights.scaled_sub(scale, &grad.weights)?;
        self.bias.scaled_sub(scale, &grad.bias)?;
        self.regularizer.project(self.weights.as_mut_slice());
        Ok(())
    }

    /// Clamp every weight into `[-limit, limit]`.
    pub fn clip_weights(&mut self, limit: Real) {
        self.weights.map_in_place(|w| w.clamp(-limit, limit));
    }

    pub(crate) fn parameters_mut(&mut self) -> (&mut [Real], &mut [Real]) {
        (self.weights.as_mut_slice(), self.bias.as_mut_slice())
    }

    pub(crate) fn project(&mut self) {
        self.regularizer.project(self.weights.as_mut_slice());
    }
}

/// The terminal single-unit layer: `ŷ = activation(input · w + b)`, scored by a [`Cost`].
#[derive(Debug, Clone)]
pub struct OutputLayer {
    activation: Activation,
    cost: Cost,
    init: Init,
    regularizer: Regularizer,
    input: Matrix,
    weights: Vector,
    bias: Real,
    z: Vector,
    a: Vector,
    delta: Vector,
    state: LayerState,
    rng: StdRng,
}

impl OutputLayer {
    pub fn new(activation: Activation, cost: Cost, input: Matrix) -> Result<Self> {
        activation.validate()?;
        cost.validate()?;
        if activation == Activation::Softmax {
            return Err(Error::InvalidConfig(
                "softmax needs more than one output unit; use MultiOutputLayer".to_owned(),
            ));
        }

        Ok(Self {
            activation,
            cost,
            init: Init::default(),
            regularizer: Regularizer::none(),
            input,
            weights: Vector::default(),
            bias: 0.0,
            z: Vector::default(),
            a: Vector::default(),
            delta: Vector::default(),
            state: LayerState::Uninitialized,
            rng: StdRng::from_entropy(),
        })
    }

    pub fn with_init(mut self, init: Init) -> Self {
        if init != self.init {
            self.init = init;
            self.state = LayerState::Uninitialized;
        }
        self
    }

    pub fn with_regularizer(mut self, regularizer: Regularizer) -> Result<Self> {
        regularizer.validate()?;
        self.regularizer = regularizer;
        Ok(self)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    #[inline]
    pub fn cost_kind(&self) -> Cost {
        self.cost
    }

    #[inline]
    pub fn regularizer(&self) -> Regularizer {
        self.regularizer
    }

    #[inline]
    pub fn state(&self) -> LayerState {
        self.state
    }

    #[inline]
    pub fn input(&self) -> &Matrix {
        &self.input
    }

    #[inline]
    pub fn weights(&self) -> &Vector {
        &self.weights
    }

    #[inline]
    pub fn bias(&self) -> Real {
        self.bias
    }

    #[inline]
    pub fn z(&self) -> &Vector {
        &self.z
    }

    #[inline]
    pub fn a(&self) -> &Vector {
        &self.a
    }

    #[inline]
    pub fn delta(&self) -> &Vector {
        &self.delta
    }

    pub fn set_input(&mut self, input: Matrix) {
        if self.state == LayerState::Ready && input.cols() != self.weights.len() {
            debug!("output layer invalidated: input feature count changed");
            self.state = LayerState::Uninitialized;
        }
        self.input = input;
    }

    pub fn initialize(&mut self) -> Result<()> {
        if self.state == LayerState::Ready {
            return Ok(());
        }
        let n_features = self.input.cols();
        if n_features == 0 {
            return Err(Error::InvalidData(
                "layer input has no feature columns".to_owned(),
            ));
        }
        self.weights = self.init.weights(n_features, 1, &mut self.rng)?.flatten();
        self.bias = self.rng.gen_range(0.0..1.0);
        self.state = LayerState::Ready;
        debug!(n_features, init = ?self.init, "output layer initialized");
        Ok(())
    }

    pub fn set_parameters(&mut self, weights: Vector, bias: Real) -> Result<()> {
        if weights.is_empty() {
            return Err(Error::InvalidData(
                "output weights must not be empty".to_owned(),
            ));
        }
        self.weights = weights;
        self.bias = bias;
        self.state = LayerState::Ready;
        Ok(())
    }

    /// `z = input · w + b`, then `ŷ = activation(z)`.
    pub fn forward_pass(&mut self) -> Result<&Vector> {
        self.initialize()?;
        self.z = self.input.mat_vec(&self.weights)?;
        self.z.scalar_add(self.bias);
        self.a = self.activation.forward_vector(&self.z);
        Ok(&self.a)
    }

    /// Single-sample prediction.
    pub fn test(&mut self, x: &Vector) -> Result<Real> {
        self.initialize()?;
        let z = self.weights.dot(x)? + self.bias;
        Ok(self.activation.apply(z))
    }

    /// Data cost of the last forward pass plus the weight penalty.
    pub fn cost(&self, target: &Vector) -> Result<Real> {
        Ok(self.cost.value(&self.a, target)? + self.regularizer.term(self.weights.as_slice()))
    }

    /// Store `delta = cost'(ŷ, y) ⊙ activation'(z)` and return the parameter gradient.
    pub fn backward(&mut self, target: &Vector) -> Result<OutputGradient> {
        let mut delta = self.cost.derivative(&self.a, target)?;
        delta.hadamard_product(&self.activation.derivative_vector(&self.z))?;
        self.delta = delta;

        let mut weights = self.input.transpose_mat_vec(&self.delta)?;
        self.regularizer
            .add_gradient(self.weights.as_slice(), weights.as_mut_slice());
        Ok(OutputGradient {
            weights,
            bias: self.delta.sum(),
        })
    }

    /// Error signal for the layer feeding this one: `delta ⊗ w`.
    pub fn propagate_error(&self) -> Matrix {
        self.delta.outer_product(&self.weights)
    }

    pub fn descend(&mut self, grad: &OutputGradient, scale: Real) -> Result<()> {
        self.weights.scaled_sub(scale, &grad.weights)?;
        self.bias -= scale * grad.bias;
        self.regularizer.project(self.weights.as_mut_slice());
        Ok(())
    }

    pub fn clip_weights(&mut self, limit: Real) {
        self.weights.map_in_place(|w| w.clamp(-limit, limit));
    }

    pub(crate) fn parameters_mut(&mut self) -> (&mut [Real], &mut Real) {
        (self.weights.as_mut_slice(), &mut self.bias)
    }

    pub(crate) fn project(&mut self) {
        self.regularizer.project(self.weights.as_mut_slice());
    }
}

/// The terminal layer of a multi-output network: `Ŷ = activation(input · W + b)` with one
/// column per output unit, scored against a target matrix.
///
/// Softmax is allowed here. Its backward pass applies the full per-row Jacobian, so
/// softmax with cross-entropy yields `delta = ŷ - y`.
#[derive(Debug, Clone)]
pub struct MultiOutputLayer {
    n_output: usize,
    activation: Activation,
    cost: Cost,
    init: Init,
    regularizer: Regularizer,
    input: Matrix,
    weights: Matrix,
    bias: Vector,
    z: Matrix,
    a: Matrix,
    delta: Matrix,
    z_test: Vector,
    a_test: Vector,
    state: LayerState,
    rng: StdRng,
}

impl MultiOutputLayer {
    pub fn new(n_output: usize, activation: Activation, cost: Cost, input: Matrix) -> Result<Self> {
        if n_output == 0 {
            return Err(Error::InvalidConfig("output width must be > 0".to_owned()));
        }
        activation.validate()?;
        cost.validate()?;
        if activation == Activation::Softmax && n_output < 2 {
            return Err(Error::InvalidConfig(
                "softmax needs more than one output unit".to_owned(),
            ));
        }

        Ok(Self {
            n_output,
            activation,
            cost,
            init: Init::default(),
            regularizer: Regularizer::none(),
            input,
            weights: Matrix::default(),
            bias: Vector::default(),
            z: Matrix::default(),
            a: Matrix::default(),
            delta: Matrix::default(),
            z_test: Vector::default(),
            a_test: Vector::default(),
            state: LayerState::Uninitialized,
            rng: StdRng::from_entropy(),
        })
    }

    pub fn with_init(mut self, init: Init) -> Self {
        if init != self.init {
            self.init = init;
            self.state = LayerState::Uninitialized;
        }
        self
    }

    pub fn with_regularizer(mut self, regularizer: Regularizer) -> Result<Self> {
        regularizer.validate()?;
        self.regularizer = regularizer;
        Ok(self)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    #[inline]
    pub fn n_output(&self) -> usize {
        self.n_output
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    #[inline]
    pub fn cost_kind(&self) -> Cost {
        self.cost
    }

    #[inline]
    pub fn regularizer(&self) -> Regularizer {
        self.regularizer
    }

    #[inline]
    pub fn state(&self) -> LayerState {
        self.state
    }

    #[inline]
    pub fn weights(&self) -> &Matrix {
        &self.weights
    }

    #[inline]
    pub fn bias(&self) -> &Vector {
        &self.bias
    }

    #[inline]
    pub fn a(&self) -> &Matrix {
        &self.a
    }

    #[inline]
    pub fn delta(&self) -> &Matrix {
        &self.delta
    }

    pub fn set_input(&mut self, input: Matrix) {
        if self.state == LayerState::Ready && input.cols() != self.weights.rows() {
            debug!("multi-output layer invalidated: input feature count changed");
            self.state = LayerState::Uninitialized;
        }
        self.input = input;
    }

    pub fn initialize(&mut self) -> Result<()> {
        if self.state == LayerState::Ready {
            return Ok(());
        }
        let n_features = self.input.cols();
        if n_features == 0 {
            return Err(Error::InvalidData(
                "layer input has no feature columns".to_owned(),
            ));
        }
        self.weights = self
            .init
            .weights(n_features, self.n_output, &mut self.rng)?;
        self.bias = Vector::random_uniform(self.n_output, 0.0, 1.0, &mut self.rng);
        self.state = LayerState::Ready;
        debug!(
            n_features,
            n_output = self.n_output,
            init = ?self.init,
            "multi-output layer initialized"
        );
        Ok(())
    }

    pub fn set_parameters(&mut self, weights: Matrix, bias: Vector) -> Result<()> {
        if weights.cols() != self.n_output || weights.rows() == 0 {
            return Err(Error::shape(
                "set_parameters",
                ("_", self.n_output),
                weights.shape(),
            ));
        }
        if bias.len() != self.n_output {
            return Err(Error::shape("set_parameters", self.n_output, bias.len()));
        }
        self.weights = weights;
        self.bias = bias;
        self.state = LayerState::Ready;
        Ok(())
    }

    pub fn forward_pass(&mut self) -> Result<&Matrix> {
        self.initialize()?;
        self.input.matmul_into(&self.weights, &mut self.z)?;
        self.z.add_row_vector(&self.bias)?;
        self.a = self.activation.forward_matrix(&self.z);
        Ok(&self.a)
    }

    /// Single-sample prediction, one value per output unit.
    pub fn test(&mut self, x: &Vector) -> Result<&Vector> {
        self.initialize()?;
        self.z_test = self.weights.transpose_mat_vec(x)?;
        self.z_test.add(&self.bias)?;
        self.a_test = self.activation.forward_vector(&self.z_test);
        Ok(&self.a_test)
    }

    /// Data cost of the last forward pass plus the weight penalty.
    pub fn cost(&self, target: &Matrix) -> Result<Real> {
        Ok(self.cost.value_matrix(&self.a, target)?
            + self.regularizer.term(self.weights.as_slice()))
    }

    /// Store the error signal at `z` and return the parameter gradient.
    pub fn backward(&mut self, target: &Matrix) -> Result<LayerGradient> {
        let upstream = self.cost.derivative_matrix(&self.a, target)?;
        self.delta = match self.activation {
            Activation::Softmax => softmax_backward(&self.a, &upstream),
            _ => {
                let mut delta = self.activation.derivative_matrix(&self.z);
                delta.hadamard_product(&upstream)?;
                delta
            }
        };

        let mut weights = self.input.transpose_matmul(&self.delta)?;
        self.regularizer
            .add_gradient(self.weights.as_slice(), weights.as_mut_slice());
        Ok(LayerGradient {
            weights,
            bias: self.delta.column_sums(),
        })
    }

    pub fn propagate_error(&self) -> Result<Matrix> {
        self.delta.matmul_transpose(&self.weights)
    }

    pub fn descend(&mut self, grad: &LayerGradient, scale: Real) -> Result<()> {
        self.weights.scaled_sub(scale, &grad.weights)?;
        self.bias.scaled_sub(scale, &grad.bias)?;
        self.regularizer.project(self.weights.as_mut_slice());
        Ok(())
    }

    pub(crate) fn parameters_mut(&mut self) -> (&mut [Real], &mut [Real]) {
        (self.weights.as_mut_slice(), self.bias.as_mut_slice())
    }

    pub(crate) fn project(&mut self) {
        self.regularizer.project(self.weights.as_mut_slice());
    }
}

/// `delta_j = s_j (g_j - Σ_k s_k g_k)` for every row, where `s` is the softmax output and
/// `g` the cost gradient with respect to it.
fn softmax_backward(s: &Matrix, upstream: &Matrix) -> Matrix {
    let mut delta = Matrix::new(s.rows(), s.cols());
    for r in 0..s.rows() {
        let (s_row, g_row) = (s.row(r), upstream.row(r));
        let inner = dot(s_row, g_row);
        for ((d, &sj), &gj) in delta.row_mut(r).iter_mut().zip(s_row).zip(g_row) {
            *d = sj * (gj - inner);
        }
    }
    delta
}

/// Run `layers` in order on `input` and return the last activation (`input` itself when
/// the stack is empty).
pub(crate) fn forward_stack(layers: &mut [HiddenLayer], input: Matrix) -> Result<Matrix> {
    let mut current = input;
    for layer in layers.iter_mut() {
        layer.set_input(current);
        current = layer.forward_pass()?.clone();
    }
    Ok(current)
}

/// Backpropagate `upstream` from the last layer to the first.
///
/// Returns the gradients in layer order together with the error signal for whatever fed
/// the first layer.
pub(crate) fn backward_stack(
    layers: &mut [HiddenLayer],
    upstream: Matrix,
) -> Result<(Vec<LayerGradient>, Matrix)> {
    let mut grads = Vec::with_capacity(layers.len());
    let mut upstream = upstream;
    for layer in layers.iter_mut().rev() {
        grads.push(layer.backward(&upstream)?);
        upstream = layer.propagate_error()?;
    }
    grads.reverse();
    Ok((grads, upstream))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Matrix {
        Matrix::from_rows(&[vec![0.5, -1.0, 2.0], vec![1.5, 0.0, -0.5]]).unwrap()
    }

    #[test]
    fn forward_pass_initializes_lazily() {
        let mut layer = HiddenLayer::new(4, Activation::Tanh, batch())
            .unwrap()
            .with_seed(1);
        assert_eq!(layer.state(), LayerState::Uninitialized);

        let a = layer.forward_pass().unwrap();
        assert_eq!(a.shape(), (2, 4));
        assert_eq!(layer.state(), LayerState::Ready);
        assert_eq!(layer.weights().shape(), (3, 4));
        assert_eq!(layer.bias().len(), 4);
        assert!(layer.bias().iter().all(|b| (0.0..1.0).contains(b)));
    }

    #[test]
    fn same_width_input_keeps_parameters() {
        let mut layer = HiddenLayer::new(2, Activation::Linear, batch())
            .unwrap()
            .with_seed(2);
        layer.forward_pass().unwrap();
        let w = layer.weights().clone();

        layer.set_input(batch().append_rows(&batch()).unwrap());
        assert_eq!(layer.state(), LayerState::Ready);
        layer.forward_pass().unwrap();
        assert_eq!(layer.weights(), &w);

        layer.set_input(Matrix::filled(2, 5, 1.0));
        assert_eq!(layer.state(), LayerState::Uninitialized);
        layer.forward_pass().unwrap();
        assert_eq!(layer.weights().shape(), (5, 2));
    }

    #[test]
    fn width_change_invalidates() {
        let mut layer = HiddenLayer::new(2, Activation::ReLU, batch()).unwrap();
        layer.forward_pass().unwrap();
        layer.set_n_hidden(3).unwrap();
        assert_eq!(layer.state(), LayerState::Uninitialized);
        assert_eq!(layer.forward_pass().unwrap().shape(), (2, 3));
    }

    #[test]
    fn empty_input_cannot_initialize() {
        let mut layer = HiddenLayer::new(2, Activation::ReLU, Matrix::default()).unwrap();
        assert!(matches!(layer.forward_pass(), Err(Error::InvalidData(_))));
    }

    #[test]
    fn single_sample_test_matches_batch_row() {
        let mut layer = HiddenLayer::new(3, Activation::Sigmoid, batch())
            .unwrap()
            .with_init(Init::XavierNormal)
            .with_seed(3);
        let a = layer.forward_pass().unwrap().clone();
        let row = batch().row_vector(1);
        let single = layer.test(&row).unwrap();
        for j in 0..3 {
            assert!((single[j] - a[(1, j)]).abs() < 1e-12);
        }
        // Batched buffers are untouched.
        assert_eq!(layer.a(), &a);
    }

    #[test]
    fn hidden_gradient_matches_finite_difference() {
        // Cost: 0.5 * Σ a², so upstream = a.
        let mut layer = HiddenLayer::new(2, Activation::Tanh, batch())
            .unwrap()
            .with_init(Init::XavierUniform)
            .with_seed(4);
        let a = layer.forward_pass().unwrap().clone();
        let grad = layer.backward(&a).unwrap();

        let cost = |layer: &mut HiddenLayer| -> Real {
            let a = layer.forward_pass().unwrap();
            0.5 * a.as_slice().iter().map(|v| v * v).sum::<Real>()
        };
        let h = 1e-6;
        let w0 = layer.weights().clone();
        let b0 = layer.bias().clone();
        for idx in 0..w0.len() {
            let mut w = w0.clone();
            w.as_mut_slice()[idx] += h;
            layer.set_parameters(w, b0.clone()).unwrap();
            let hi = cost(&mut layer);
            let mut w = w0.clone();
            w.as_mut_slice()[idx] -= h;
            layer.set_parameters(w, b0.clone()).unwrap();
            let lo = cost(&mut layer);
            let numeric = (hi - lo) / (2.0 * h);
            assert!((numeric - grad.weights.as_slice()[idx]).abs() < 1e-6);
        }
    }

    #[test]
    fn output_layer_delta_for_sigmoid_logloss_is_error() {
        let mut out = OutputLayer::new(Activation::Sigmoid, Cost::LogLoss, batch())
            .unwrap()
            .with_seed(5);
        let y_hat = out.forward_pass().unwrap().clone();
        let y = Vector::from(vec![1.0, 0.0]);
        out.backward(&y).unwrap();
        for i in 0..2 {
            assert!((out.delta()[i] - (y_hat[i] - y[i])).abs() < 1e-6);
        }
        assert_eq!(out.propagate_error().shape(), (2, 3));
    }

    #[test]
    fn output_layer_rejects_softmax() {
        assert!(OutputLayer::new(Activation::Softmax, Cost::CrossEntropy, batch()).is_err());
    }

    #[test]
    fn softmax_cross_entropy_delta_is_error() {
        let mut out = MultiOutputLayer::new(3, Activation::Softmax, Cost::CrossEntropy, batch())
            .unwrap()
            .with_init(Init::XavierUniform)
            .with_seed(6);
        let y_hat = out.forward_pass().unwrap().clone();
        let y = Matrix::from_rows(&[vec![0.0, 1.0, 0.0], vec![1.0, 0.0, 0.0]]).unwrap();
        let grad = out.backward(&y).unwrap();
        for r in 0..2 {
            for c in 0..3 {
                assert!((out.delta()[(r, c)] - (y_hat[(r, c)] - y[(r, c)])).abs() < 1e-6);
            }
        }
        assert_eq!(grad.weights.shape(), (3, 3));
        assert_eq!(out.propagate_error().unwrap().shape(), (2, 3));
    }

    #[test]
    fn multi_output_gradient_matches_finite_difference() {
        let y = Matrix::from_rows(&[vec![0.0, 0.0, 1.0], vec![0.0, 1.0, 0.0]]).unwrap();
        let mut out = MultiOutputLayer::new(3, Activation::Softmax, Cost::CrossEntropy, batch())
            .unwrap()
            .with_init(Init::XavierNormal)
            .with_seed(8);
        out.forward_pass().unwrap();
        let grad = out.backward(&y).unwrap();

        let h = 1e-6;
        let w0 = out.weights().clone();
        let b0 = out.bias().clone();
        for idx in 0..w0.len() {
            let mut cost_at = |delta: Real| {
                let mut w = w0.clone();
                w.as_mut_slice()[idx] += delta;
                out.set_parameters(w, b0.clone()).unwrap();
                out.forward_pass().unwrap();
                out.cost(&y).unwrap()
            };
            let numeric = (cost_at(h) - cost_at(-h)) / (2.0 * h);
            assert!((numeric - grad.weights.as_slice()[idx]).abs() < 1e-5);
        }
    }

    #[test]
    fn multi_output_softmax_needs_two_units() {
        assert!(
            MultiOutputLayer::new(1, Activation::Softmax, Cost::CrossEntropy, batch()).is_err()
        );
        assert!(MultiOutputLayer::new(0, Activation::Linear, Cost::Mse, batch()).is_err());
        let mut out = MultiOutputLayer::new(2, Activation::Sigmoid, Cost::LogLoss, batch())
            .unwrap()
            .with_seed(9);
        let a = out.forward_pass().unwrap().clone();
        let single = out.test(&batch().row_vector(0)).unwrap();
        for j in 0..2 {
            assert!((single[j] - a[(0, j)]).abs() < 1e-12);
        }
    }

    #[test]
    fn stack_helpers_chain_shapes() {
        let mut layers = vec![
            HiddenLayer::new(4, Activation::ReLU, batch()).unwrap(),
            HiddenLayer::new(2, Activation::Linear, Matrix::new(2, 4)).unwrap(),
        ];
        let out = forward_stack(&mut layers, batch()).unwrap();
        assert_eq!(out.shape(), (2, 2));

        let (grads, upstream) = backward_stack(&mut layers, Matrix::filled(2, 2, 1.0)).unwrap();
        assert_eq!(grads[0].weights.shape(), (3, 4));
        assert_eq!(grads[1].weights.shape(), (4, 2));
        assert_eq!(upstream.shape(), (2, 3));
    }

    #[test]
    fn init_names_parse() {
        assert_eq!("HeNormal".parse::<Init>().unwrap(), Init::HeNormal);
        assert!("orthogonal".parse::<Init>().is_err());
    }
}
