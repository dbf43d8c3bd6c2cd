//! Feed-forward network closed by a [`MultiOutputLayer`]: one output column per unit and a
//! target matrix with the same shape as the predictions.
//!
//! This is the network to use for multi-class classification (softmax with cross-entropy
//! on one-hot targets) and for vector-valued regression. Training follows [`Network`]:
//! full batch, a single random sample or contiguous mini-batches per epoch, with the
//! gradients averaged over the batch and applied by an [`Optimizer`].
//!
//! [`Network`]: crate::Network

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::debug;

use crate::layer::{backward_stack, forward_stack};
use crate::serde_model::expect_layers;
use crate::train::run_epochs;
use crate::{
    Activation, Cost, DenseBuffer, Error, HiddenLayer, LayerParameters, LayerState, Matrix,
    MultiOutputLayer, Optimizer, OptimizerState, Parameters, Progress, Real, Result, TrainConfig,
    TrainReport, TrainState, Vector, batch_ranges,
};

#[derive(Debug, Clone)]
struct Stack {
    hidden: Vec<HiddenLayer>,
    output: Option<MultiOutputLayer>,
    optimizer: OptimizerState,
}

impl Stack {
    fn output_mut(&mut self) -> Result<&mut MultiOutputLayer> {
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

    fn forward(&mut self, x: Matrix) -> Result<&Matrix> {
        let a = forward_stack(&mut self.hidden, x)?;
        let output = self.output_mut()?;
        output.set_input(a);
        output.forward_pass()
    }

    fn cost(&self, y: &Matrix) -> Result<Real> {
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

    fn step(&mut self, x: Matrix, y: &Matrix, lr: Real) -> Result<()> {
        self.forward(x)?;
        let inv_n = 1.0 / y.rows().max(1) as Real;

        let output = self.output_mut()?;
        let mut out_grad = output.backward(y)?;
        let upstream = output.propagate_error()?;
        out_grad.weights.scalar_multiply(inv_n);
        out_grad.bias.scalar_multiply(inv_n);

        let (mut grads, _) = backward_stack(&mut self.hidden, upstream)?;
        grads.push(out_grad);

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
        let out_grad = &grads[self.hidden.len()];
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| Error::InvalidConfig("network has no output layer".to_owned()))?;
        let (w, b) = output.parameters_mut();
        self.optimizer
            .update(slot, w, out_grad.weights.as_slice(), lr);
        self.optimizer
            .update(slot + 1, b, out_grad.bias.as_slice(), lr);
        output.project();
        Ok(())
    }
}

/// A fully connected network with a multi-unit output, bound to `(inputs, targets)`.
#[derive(Debug, Clone)]
pub struct MultiOutputNetwork {
    inputs: Matrix,
    targets: Matrix,
    stack: Stack,
    y_hat: Matrix,
    state: TrainState,
    rng: StdRng,
}

impl MultiOutputNetwork {
    /// `targets` holds one row per input row and one column per output unit.
    pub fn new(inputs: Matrix, targets: Matrix) -> Result<Self> {
        if inputs.rows() == 0 || inputs.cols() == 0 {
            return Err(Error::InvalidData(
                "inputs must have at least one row and one column".to_owned(),
            ));
        }
        if targets.rows() != inputs.rows() || targets.cols() == 0 {
            return Err(Error::InvalidData(format!(
                "targets shape {:?} does not match input rows {}",
                targets.shape(),
                inputs.rows()
            )));
        }
        Ok(Self {
            inputs,
            targets,
            stack: Stack {
                hidden: Vec::new(),
                output: None,
                optimizer: OptimizerState::default(),
            },
            y_hat: Matrix::default(),
            state: TrainState::Uninitialized,
            rng: StdRng::from_entropy(),
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_optimizer(mut self, optimizer: Optimizer) -> Result<Self> {
        self.stack.optimizer = optimizer.state()?;
        Ok(self)
    }

    pub fn add_layer(&mut self, n_hidden: usize, activation: Activation) -> Result<()> {
        let layer = HiddenLayer::new(n_hidden, activation, Matrix::default())?
            .with_seed(self.rng.next_u64());
        self.push_layer(layer);
        Ok(())
    }

    pub fn push_layer(&mut self, layer: HiddenLayer) {
        debug!(
            index = self.stack.hidden.len(),
            n_hidden = layer.n_hidden(),
            "hidden layer added"
        );
        self.stack.hidden.push(layer);
        self.structure_changed();
    }

    pub fn remove_layer(&mut self) -> Option<HiddenLayer> {
        let layer = self.stack.hidden.pop();
        if layer.is_some() {
            self.structure_changed();
        }
        layer
    }

    /// Close the network with one output unit per target column.
    pub fn add_output_layer(&mut self, activation: Activation, cost: Cost) -> Result<()> {
        let layer =
            MultiOutputLayer::new(self.targets.cols(), activation, cost, Matrix::default())?
                .with_seed(self.rng.next_u64());
        self.set_output_layer(layer)
    }

    pub fn set_output_layer(&mut self, layer: MultiOutputLayer) -> Result<()> {
        if layer.n_output() != self.targets.cols() {
            return Err(Error::shape(
                "set_output_layer",
                self.targets.cols(),
                layer.n_output(),
            ));
        }
        self.stack.output = Some(layer);
        self.structure_changed();
        Ok(())
    }

    fn structure_changed(&mut self) {
        self.stack.optimizer.reset();
        self.state = TrainState::Uninitialized;
    }

    #[inline]
    pub fn hidden_layers(&self) -> &[HiddenLayer] {
        &self.stack.hidden
    }

    #[inline]
    pub fn output_layer(&self) -> Option<&MultiOutputLayer> {
        self.stack.output.as_ref()
    }

    #[inline]
    pub fn state(&self) -> TrainState {
        self.state
    }

    #[inline]
    pub fn inputs(&self) -> &Matrix {
        &self.inputs
    }

    #[inline]
    pub fn targets(&self) -> &Matrix {
        &self.targets
    }

    #[inline]
    pub fn y_hat(&self) -> &Matrix {
        &self.y_hat
    }

    fn state_mut(m: &mut Self) -> &mut TrainState {
        &mut m.state
    }

    pub fn forward_pass(&mut self) -> Result<&Matrix> {
        self.y_hat = self.stack.forward(self.inputs.clone())?.clone();
        Ok(&self.y_hat)
    }

    /// Cost of the last forward pass, including every layer's weight penalty.
    pub fn cost(&self) -> Result<Real> {
        self.stack.cost(&self.targets)
    }

    fn begin(&mut self, cfg: &TrainConfig) -> Result<()> {
        cfg.validate()?;
        if let Some(seed) = cfg.seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.forward_pass()?;
        Ok(())
    }

    pub fn gradient_descent(
        &mut self,
        cfg: &TrainConfig,
        progress: &mut dyn Progress,
    ) -> Result<TrainReport> {
        self.begin(cfg)?;
        let lr = cfg.learning_rate;
        run_epochs(self, cfg, Self::state_mut, progress, |m| {
            let previous = m.cost()?;
            m.stack.step(m.inputs.clone(), &m.targets, lr)?;
            m.forward_pass()?;
            Ok((previous, m.cost()?))
        })
    }

    pub fn sgd(&mut self, cfg: &TrainConfig, progress: &mut dyn Progress) -> Result<TrainReport> {
        self.begin(cfg)?;
        let lr = cfg.learning_rate;
        run_epochs(self, cfg, Self::state_mut, progress, |m| {
            let previous = m.cost()?;
            let idx = m.rng.gen_range(0..m.inputs.rows());
            let x = m.inputs.row_range(idx..idx + 1);
            let y = m.targets.row_range(idx..idx + 1);
            m.stack.step(x, &y, lr)?;
            m.forward_pass()?;
            Ok((previous, m.cost()?))
        })
    }

    pub fn mbgd(&mut self, cfg: &TrainConfig, progress: &mut dyn Progress) -> Result<TrainReport> {
        self.begin(cfg)?;
        let ranges = batch_ranges(self.inputs.rows(), cfg.mini_batch_size)?;
        let batches: Vec<(Matrix, Matrix)> = ranges
            .into_iter()
            .map(|r| (self.inputs.row_range(r.clone()), self.targets.row_range(r)))
            .collect();
        let lr = cfg.learning_rate;
        run_epochs(self, cfg, Self::state_mut, progress, |m| {
            let previous = m.cost()?;
            for (x, y) in &batches {
                m.stack.step(x.clone(), y, lr)?;
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

    /// Predictions for every row of `x`, one column per output unit.
    pub fn model_set_test(&mut self, x: &Matrix) -> Result<Matrix> {
        self.ensure_ready()?;
        Ok(self.stack.forward(x.clone())?.clone())
    }

    pub fn model_test(&mut self, x: &Vector) -> Result<Vector> {
        self.ensure_ready()?;
        let mut current = x.clone();
        for layer in &mut self.stack.hidden {
            current = layer.test(&current)?.clone();
        }
        Ok(self.stack.output_mut()?.test(&current)?.clone())
    }

    /// Fraction of training rows whose largest prediction sits in the same column as the
    /// largest target.
    pub fn score(&mut self) -> Result<Real> {
        self.forward_pass()?;
        let hits = self
            .y_hat
            .iter_rows()
            .zip(self.targets.iter_rows())
            .filter(|(p, t)| argmax(p) == argmax(t))
            .count();
        Ok(hits as Real / self.targets.rows() as Real)
    }
}

fn argmax(row: &[Real]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, Real::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 { (i, v) } else { best }
        })
        .0
}

impl Parameters for MultiOutputNetwork {
    fn parameters(&self) -> Vec<LayerParameters> {
        let mut out: Vec<LayerParameters> = self
            .stack
            .hidden
            .iter()
            .enumerate()
            .map(|(i, l)| LayerParameters::from_hidden(i + 1, l))
            .collect();
        if let Some(output) = &self.stack.output {
            out.push(LayerParameters::from_multi_output(out.len() + 1, output));
        }
        out
    }

    fn restore(&mut self, layers: &[LayerParameters]) -> Result<()> {
        expect_layers(layers, self.stack.hidden.len() + 1)?;
        let (hidden, last) = layers.split_at(self.stack.hidden.len());
        for (layer, params) in self.stack.hidden.iter_mut().zip(hidden) {
            layer.set_parameters(params.weight_matrix()?, params.bias_vector())?;
        }
        self.stack
            .output_mut()?
            .set_parameters(last[0].weight_matrix()?, last[0].bias_vector())?;
        self.state = TrainState::Uninitialized;
        Ok(())
    }
}
