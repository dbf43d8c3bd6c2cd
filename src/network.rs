//! Feed-forward network: a stack of [`HiddenLayer`]s closed by one [`OutputLayer`].
//!
//! Training mirrors the regression routines (full batch, single random sample, contiguous
//! mini-batches) but backpropagates through every layer and hands the averaged gradients
//! to an [`Optimizer`].

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::debug;

use crate::layer::{backward_stack, forward_stack};
use crate::serde_model::expect_layers;
use crate::train::run_epochs;
use crate::{
    Activation, Cost, Dataset, DenseBuffer, Error, HiddenLayer, LayerParameters, LayerState,
    Matrix, Metric, Optimizer, OptimizerState, OutputLayer, Parameters, Progress, Real, Result,
    TrainConfig, TrainReport, TrainState, Vector,
};

/// Layers plus the optimizer state that updates them.
#[derive(Debug, Clone)]
struct Stack {
    hidden: Vec<HiddenLayer>,
    output: Option<OutputLayer>,
    optimizer: OptimizerState,
}

impl Stack {
    fn output_mut(&mut self) -> Result<&mut OutputLayer> {
        self.output
            .as_mut()
            .ok_or_else(|| Error::InvalidConfig("network has no output layer".to_owned()))
    }

    fn is_ready(&self) -> bool {
        self.hidden.iter().all(|l| l.state() == LayerState::Ready)
            && self
                .output
                .as_ref()
                .is_some_and(|o| o.state() == LayerState::Ready)
    }

    fn forward(&mut self, x: Matrix) -> Result<&Vector> {
        let a = forward_stack(&mut self.hidden, x)?;
        let output = self.output_mut()?;
        output.set_input(a);
        output.forward_pass()
    }

    fn cost(&self, y: &Vector) -> Result<Real> {
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("network has no output layer".to_owned()))?;
        let penalty: Real = self
            .hidden
            .iter()
            .map(|l| l.regularizer().term(l.weights().as_slice()))
            .sum();
        Ok(output.cost(y)? + penalty)
    }

    /// Forward `x`, backpropagate against `y` and apply one optimizer step with the
    /// gradients averaged over the batch.
    fn step(&mut self, x: Matrix, y: &Vector, lr: Real) -> Result<()> {
        self.forward(x)?;
        let inv_n = 1.0 / y.len().max(1) as Real;

        let output = self.output_mut()?;
        let mut out_grad = output.backward(y)?;
        let upstream = output.propagate_error();
        out_grad.weights.scalar_multiply(inv_n);
        out_grad.bias *= inv_n;

        let (mut grads, _) = backward_stack(&mut self.hidden, upstream)?;

        self.optimizer.begin_step();
        for (i, (layer, grad)) in self.hidden.iter_mut().zip(grads.iter_mut()).enumerate() {
            grad.weights.scalar_multiply(inv_n);
            grad.bias.scalar_multiply(inv_n);
            let (w, b) = layer.parameters_mut();
            self.optimizer.update(2 * i, w, grad.weights.as_slice(), lr);
            self.optimizer
                .update(2 * i + 1, b, grad.bias.as_slice(), lr);
            layer.project();
        }

        let slot = 2 * self.hidden.len();
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| Error::InvalidConfig("network has no output layer".to_owned()))?;
        let (w, b) = output.parameters_mut();
        self.optimizer
            .update(slot, w, out_grad.weights.as_slice(), lr);
        self.optimizer
            .update(slot + 1, std::slice::from_mut(b), &[out_grad.bias], lr);
        output.project();
        Ok(())
    }
}

/// A fully connected feed-forward network bound to a training set.
#[derive(Debug, Clone)]
pub struct Network {
    data: Dataset,
    stack: Stack,
    y_hat: Vector,
    state: TrainState,
    rng: StdRng,
}

impl Network {
    /// An empty network (no layers, plain SGD updates).
    pub fn new(data: Dataset) -> Self {
        Self {
            data,
            stack: Stack {
                hidden: Vec::new(),
                output: None,
                optimizer: OptimizerState::default(),
            },
            y_hat: Vector::default(),
            state: TrainState::Uninitialized,
            rng: StdRng::from_entropy(),
        }
    }

    /// Seed sample selection and the parameter draws of layers added afterwards.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Replace the update rule. Resets any accumulated optimizer state.
    pub fn with_optimizer(mut self, optimizer: Optimizer) -> Result<Self> {
        self.stack.optimizer = optimizer.state()?;
        Ok(self)
    }

    /// Append a hidden layer of `n_hidden` units.
    pub fn add_layer(&mut self, n_hidden: usize, activation: Activation) -> Result<()> {
        let layer = HiddenLayer::new(n_hidden, activation, Matrix::default())?
            .with_seed(self.rng.next_u64());
        self.push_layer(layer);
        Ok(())
    }

    /// Append a pre-configured hidden layer (custom init or regularizer).
    pub fn push_layer(&mut self, layer: HiddenLayer) {
        debug!(
            index = self.stack.hidden.len(),
            n_hidden = layer.n_hidden(),
            "hidden layer added"
        );
        self.stack.hidden.push(layer);
        self.structure_changed();
    }

    /// Remove and return the last hidden layer.
    pub fn remove_layer(&mut self) -> Option<HiddenLayer> {
        let layer = self.stack.hidden.pop();
        if layer.is_some() {
            self.structure_changed();
        }
        layer
    }

    /// Close the network with its single-unit output layer, replacing any previous one.
    pub fn add_output_layer(&mut self, activation: Activation, cost: Cost) -> Result<()> {
        let layer =
            OutputLayer::new(activation, cost, Matrix::default())?.with_seed(self.rng.next_u64());
        self.set_output_layer(layer);
        Ok(())
    }

    pub fn set_output_layer(&mut self, layer: OutputLayer) {
        self.stack.output = Some(layer);
        self.structure_changed();
    }

    /// Optimizer slots are indexed by layer position, so their moments go stale.
    fn structure_changed(&mut self) {
        self.stack.optimizer.reset();
        self.state = TrainState::Uninitialized;
    }

    #[inline]
    pub fn hidden_layers(&self) -> &[HiddenLayer] {
        &self.stack.hidden
    }

    #[inline]
    pub fn output_layer(&self) -> Option<&OutputLayer> {
        self.stack.output.as_ref()
    }

    #[inline]
    pub fn optimizer(&self) -> Optimizer {
        self.stack.optimizer.optimizer()
    }

    #[inline]
    pub fn state(&self) -> TrainState {
        self.state
    }

    #[inline]
    pub fn data(&self) -> &Dataset {
        &self.data
    }

    /// Predictions from the last forward pass over the training set.
    #[inline]
    pub fn y_hat(&self) -> &Vector {
        &self.y_hat
    }

    fn state_mut(m: &mut Self) -> &mut TrainState {
        &mut m.state
    }

    /// Forward the whole training set, initializing layers on first use.
    pub fn forward_pass(&mut self) -> Result<&Vector> {
        self.y_hat = self.stack.forward(self.data.inputs().clone())?.clone();
        Ok(&self.y_hat)
    }

    /// Cost of the last forward pass, including every layer's weight penalty.
    pub fn cost(&self) -> Result<Real> {
        self.stack.cost(self.data.targets())
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
            m.stack
                .step(m.data.inputs().clone(), m.data.targets(), lr)?;
            m.forward_pass()?;
            Ok((previous, m.cost()?))
        })
    }

    /// Stochastic gradient descent: one uniformly drawn sample per epoch.
    pub fn sgd(&mut self, cfg: &TrainConfig, progress: &mut dyn Progress) -> Result<TrainReport> {
        self.begin(cfg)?;
        let lr = cfg.learning_rate;
        run_epochs(self, cfg, Self::state_mut, progress, |m| {
            let previous = m.cost()?;
            let idx = m.data.random_index(&mut m.rng);
            let (row, target) = m.data.sample(idx);
            let x = Matrix::from_flat((1, row.len()), row.to_vec())?;
            m.stack.step(x, &Vector::from(vec![target]), lr)?;
            m.forward_pass()?;
            Ok((previous, m.cost()?))
        })
    }

    /// Mini-batch gradient descent over contiguous batches of `cfg.mini_batch_size`.
    pub fn mbgd(&mut self, cfg: &TrainConfig, progress: &mut dyn Progress) -> Result<TrainReport> {
        self.begin(cfg)?;
        let batches = self.data.mini_batches(cfg.mini_batch_size)?;
        let lr = cfg.learning_rate;
        run_epochs(self, cfg, Self::state_mut, progress, |m| {
            let previous = m.cost()?;
            for batch in &batches {
                m.stack.step(batch.inputs().clone(), batch.targets(), lr)?;
            }
            m.forward_pass()?;
            Ok((previous, m.cost()?))
        })
    }

    fn ensure_ready(&mut self) -> Result<()> {
        if !self.stack.is_ready() {
            self.forward_pass()?;
        }
        Ok(())
    }

    /// Predictions for every row of `x`.
    ///
    /// Overwrites the cached per-layer activations; the next training call recomputes them.
    pub fn model_set_test(&mut self, x: &Matrix) -> Result<Vector> {
        self.ensure_ready()?;
        Ok(self.stack.forward(x.clone())?.clone())
    }

    /// Prediction for a single sample. Leaves the batched activations untouched.
    pub fn model_test(&mut self, x: &Vector) -> Result<Real> {
        self.ensure_ready()?;
        let mut current = x.clone();
        for layer in &mut self.stack.hidden {
            current = layer.test(&current)?.clone();
        }
        self.stack.output_mut()?.test(&current)
    }

    /// Fraction of training samples whose rounded prediction equals the target.
    pub fn score(&mut self) -> Result<Real> {
        self.forward_pass()?;
        Metric::Accuracy.evaluate(&self.y_hat, self.data.targets())
    }
}

impl Parameters for Network {
    fn parameters(&self) -> Vec<LayerParameters> {
        let mut out: Vec<LayerParameters> = self
            .stack
            .hidden
            .iter()
            .enumerate()
            .map(|(i, l)| LayerParameters::from_hidden(i + 1, l))
            .collect();
        if let Some(output) = &self.stack.output {
            out.push(LayerParameters::from_output(out.len() + 1, output));
        }
        out
    }

    fn restore(&mut self, layers: &[LayerParameters]) -> Result<()> {
        expect_layers(layers, self.stack.hidden.len() + 1)?;
        let (hidden, last) = layers.split_at(self.stack.hidden.len());
        for (layer, params) in self.stack.hidden.iter_mut().zip(hidden) {
            layer.set_parameters(params.weight_matrix()?, params.bias_vector())?;
        }
        let (weights, bias) = last[0].column()?;
        self.stack.output_mut()?.set_parameters(weights, bias)?;
        self.state = TrainState::Uninitialized;
        Ok(())
    }
}
