//! Generative adversarial training (GAN and WGAN).
//!
//! The model owns two stacks of hidden layers. The generator maps latent noise to fake
//! samples; its last activation is the handoff buffer fed to the discriminator stack, which
//! is closed by the output layer. Layers are added in order and rebalanced so that the
//! generator always holds layers `0..=floor(count / 2)` of the full sequence.
//!
//! Each epoch runs the discriminator step (once for [`Adversary::Standard`],
//! `critic_iterations` times for [`Adversary::Wasserstein`]) and then one generator step
//! that backpropagates through the whole stack but only updates the generator.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::debug;

use crate::layer::{backward_stack, forward_stack};
use crate::serde_model::expect_layers;
use crate::train::run_epochs;
use crate::{
    Activation, Cost, DenseBuffer, Error, HiddenLayer, LayerParameters, Matrix, OutputLayer,
    Parameters, Progress, Real, Result, TrainConfig, TrainReport, TrainState, Vector,
};

/// Discriminator updates per generator update in a WGAN.
pub const CRITIC_ITERATIONS: usize = 5;

/// Which adversarial objective to train.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum Adversary {
    /// Sigmoid discriminator, log-loss, fake label `0`.
    #[default]
    Standard,
    /// Linear critic, Wasserstein loss, fake label `-1`.
    ///
    /// With `clip`, every critic weight is clamped into `[-clip, clip]` after each critic
    /// update.
    Wasserstein {
        critic_iterations: usize,
        clip: Option<Real>,
    },
}

impl Adversary {
    /// WGAN with [`CRITIC_ITERATIONS`] critic steps and no clipping.
    pub fn wasserstein() -> Self {
        Adversary::Wasserstein {
            critic_iterations: CRITIC_ITERATIONS,
            clip: None,
        }
    }

    pub fn validate(self) -> Result<()> {
        if let Adversary::Wasserstein {
            critic_iterations,
            clip,
        } = self
        {
            if critic_iterations == 0 {
                return Err(Error::InvalidConfig(
                    "critic_iterations must be > 0".to_owned(),
                ));
            }
            if let Some(c) = clip
                && !(c.is_finite() && c > 0.0)
            {
                return Err(Error::InvalidConfig(format!(
                    "critic clip must be finite and > 0, got {c}"
                )));
            }
        }
        Ok(())
    }

    fn fake_label(self) -> Real {
        match self {
            Adversary::Standard => 0.0,
            Adversary::Wasserstein { .. } => -1.0,
        }
    }

    fn critic_iterations(self) -> usize {
        match self {
            Adversary::Standard => 1,
            Adversary::Wasserstein {
                critic_iterations, ..
            } => critic_iterations,
        }
    }

    fn clip(self) -> Option<Real> {
        match self {
            Adversary::Standard => None,
            Adversary::Wasserstein { clip, .. } => clip,
        }
    }

    /// Terminal layer link and cost.
    fn head(self) -> (Activation, Cost) {
        match self {
            Adversary::Standard => (Activation::Sigmoid, Cost::LogLoss),
            Adversary::Wasserstein { .. } => (Activation::Linear, Cost::Wasserstein),
        }
    }
}

/// A generator/discriminator pair trained against a matrix of real samples.
#[derive(Debug, Clone)]
pub struct Gan {
    real: Matrix,
    latent_dim: usize,
    adversary: Adversary,
    generator: Vec<HiddenLayer>,
    discriminator: Vec<HiddenLayer>,
    output: Option<OutputLayer>,
    /// Last generator activation, fed to the discriminator.
    handoff: Matrix,
    cost: Real,
    state: TrainState,
    rng: StdRng,
}

impl Gan {
    /// `real` holds one real sample per row; the generator reads `latent_dim` noise columns.
    pub fn new(real: Matrix, latent_dim: usize, adversary: Adversary) -> Result<Self> {
        if real.is_empty() {
            return Err(Error::InvalidData("real sample set is empty".to_owned()));
        }
        if latent_dim == 0 {
            return Err(Error::InvalidConfig("latent_dim must be > 0".to_owned()));
        }
        adversary.validate()?;
        Ok(Self {
            real,
            latent_dim,
            adversary,
            generator: Vec::new(),
            discriminator: Vec::new(),
            output: None,
            handoff: Matrix::default(),
            cost: Real::NAN,
            state: TrainState::Uninitialized,
            rng: StdRng::from_entropy(),
        })
    }

    /// Seed noise generation and the parameter draws of layers added afterwards.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    #[inline]
    pub fn adversary(&self) -> Adversary {
        self.adversary
    }

    #[inline]
    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    #[inline]
    pub fn real(&self) -> &Matrix {
        &self.real
    }

    #[inline]
    pub fn generator(&self) -> &[HiddenLayer] {
        &self.generator
    }

    #[inline]
    pub fn discriminator(&self) -> &[HiddenLayer] {
        &self.discriminator
    }

    #[inline]
    pub fn output_layer(&self) -> Option<&OutputLayer> {
        self.output.as_ref()
    }

    #[inline]
    pub fn handoff(&self) -> &Matrix {
        &self.handoff
    }

    #[inline]
    pub fn state(&self) -> TrainState {
        self.state
    }

    fn state_mut(m: &mut Self) -> &mut TrainState {
        &mut m.state
    }

    /// Append a hidden layer to the end of the layer sequence.
    ///
    /// Use [`Gan::push_layer`] for a layer with its own init policy or regularizer.
    pub fn add_layer(&mut self, n_hidden: usize, activation: Activation) -> Result<()> {
        let layer = HiddenLayer::new(n_hidden, activation, Matrix::default())?
            .with_seed(self.rng.next_u64());
        self.push_layer(layer);
        Ok(())
    }

    pub fn push_layer(&mut self, layer: HiddenLayer) {
        self.discriminator.push(layer);
        self.rebalance();
    }

    /// Remove and return the last hidden layer of the sequence.
    pub fn remove_layer(&mut self) -> Option<HiddenLayer> {
        let layer = self.discriminator.pop().or_else(|| self.generator.pop());
        self.rebalance();
        layer
    }

    /// Close the discriminator with the terminal layer matching the adversary.
    pub fn add_output_layer(&mut self) -> Result<()> {
        let (activation, cost) = self.adversary.head();
        let layer =
            OutputLayer::new(activation, cost, Matrix::default())?.with_seed(self.rng.next_u64());
        self.push_output_layer(layer)
    }

    /// Close the discriminator with a pre-configured terminal layer (custom init or
    /// regularizer). Its activation and cost must match the adversary: sigmoid with
    /// log-loss for a standard GAN, linear with the Wasserstein cost for a WGAN.
    pub fn push_output_layer(&mut self, layer: OutputLayer) -> Result<()> {
        let head = self.adversary.head();
        if (layer.activation(), layer.cost_kind()) != head {
            return Err(Error::InvalidConfig(format!(
                "{:?} needs a {:?}/{:?} output layer, got {:?}/{:?}",
                self.adversary,
                head.0,
                head.1,
                layer.activation(),
                layer.cost_kind()
            )));
        }
        self.output = Some(layer);
        self.state = TrainState::Uninitialized;
        Ok(())
    }

    /// Move layers across the boundary so the generator holds `floor(count / 2) + 1`.
    fn rebalance(&mut self) {
        let count = self.generator.len() + self.discriminator.len();
        let target = (count / 2 + 1).min(count);
        while self.generator.len() < target {
            self.generator.push(self.discriminator.remove(0));
        }
        while self.generator.len() > target {
            if let Some(layer) = self.generator.pop() {
                self.discriminator.insert(0, layer);
            }
        }
        self.state = TrainState::Uninitialized;
        debug!(
            generator = self.generator.len(),
            discriminator = self.discriminator.len(),
            "layer stacks rebalanced"
        );
    }

    fn output_mut(&mut self) -> Result<&mut OutputLayer> {
        self.output
            .as_mut()
            .ok_or_else(|| Error::InvalidConfig("gan has no output layer".to_owned()))
    }

    fn noise(&mut self, n: usize) -> Matrix {
        Matrix::gaussian_noise(n, self.latent_dim, &mut self.rng)
    }

    /// Run the generator on `z` (one latent vector per row) and return its activation.
    pub fn model_set_test_generator(&mut self, z: &Matrix) -> Result<Matrix> {
        if self.generator.is_empty() {
            return Err(Error::InvalidConfig(
                "gan has no generator layers".to_owned(),
            ));
        }
        self.handoff = forward_stack(&mut self.generator, z.clone())?;
        Ok(self.handoff.clone())
    }

    /// Score every row of `x` with the discriminator.
    pub fn model_set_test_discriminator(&mut self, x: &Matrix) -> Result<Vector> {
        let a = forward_stack(&mut self.discriminator, x.clone())?;
        let output = self.output_mut()?;
        output.set_input(a);
        Ok(output.forward_pass()?.clone())
    }

    /// Draw `n` fake samples from fresh Gaussian noise.
    pub fn generate_example(&mut self, n: usize) -> Result<Matrix> {
        let z = self.noise(n);
        self.model_set_test_generator(&z)
    }

    /// Discriminator cost of `D(G(noise))` against all-real labels: what the generator
    /// minimizes. Includes the weight penalty of every layer.
    pub fn generator_cost(&mut self) -> Result<Real> {
        let n = self.real.rows();
        let fake = self.generate_example(n)?;
        self.model_set_test_discriminator(&fake)?;
        let penalty: Real = self
            .generator
            .iter()
            .chain(&self.discriminator)
            .map(|l| l.regularizer().term(l.weights().as_slice()))
            .sum();
        Ok(self.output_mut()?.cost(&Vector::ones(n))? + penalty)
    }

    /// One update of the discriminator stack and the output layer on fakes followed by
    /// reals.
    fn discriminator_step(&mut self, lr: Real) -> Result<()> {
        let n = self.real.rows();
        let fake = self.generate_example(n)?;
        let x = fake.append_rows(&self.real)?;
        let y = Vector::filled(n, self.adversary.fake_label()).concat(&Vector::ones(n));
        let scale = lr / y.len() as Real;

        self.model_set_test_discriminator(&x)?;
        let output = self.output_mut()?;
        let out_grad = output.backward(&y)?;
        let upstream = output.propagate_error();
        output.descend(&out_grad, scale)?;

        let (grads, _) = backward_stack(&mut self.discriminator, upstream)?;
        for (layer, grad) in self.discriminator.iter_mut().zip(&grads) {
            layer.descend(grad, scale)?;
        }

        if let Some(limit) = self.adversary.clip() {
            for layer in &mut self.discriminator {
                layer.clip_weights(limit);
            }
            self.output_mut()?.clip_weights(limit);
        }
        Ok(())
    }

    /// One update of the generator through a frozen discriminator.
    fn generator_step(&mut self, lr: Real) -> Result<()> {
        let n = self.real.rows();
        let fake = self.generate_example(n)?;
        self.model_set_test_discriminator(&fake)?;
        let scale = lr / n as Real;

        let output = self.output_mut()?;
        output.backward(&Vector::ones(n))?;
        let upstream = output.propagate_error();
        let (_, upstream) = backward_stack(&mut self.discriminator, upstream)?;
        let (grads, _) = backward_stack(&mut self.generator, upstream)?;
        for (layer, grad) in self.generator.iter_mut().zip(&grads) {
            layer.descend(grad, scale)?;
        }
        Ok(())
    }

    /// Alternate discriminator and generator updates for `cfg.max_epoch` epochs.
    ///
    /// The reported cost is [`Gan::generator_cost`] on fresh noise.
    pub fn gradient_descent(
        &mut self,
        cfg: &TrainConfig,
        progress: &mut dyn Progress,
    ) -> Result<TrainReport> {
        cfg.validate()?;
        if let Some(seed) = cfg.seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.cost = self.generator_cost()?;

        let lr = cfg.learning_rate;
        let critic_iterations = self.adversary.critic_iterations();
        run_epochs(self, cfg, Self::state_mut, progress, |m| {
            let previous = m.cost;
            for _ in 0..critic_iterations {
                m.discriminator_step(lr)?;
            }
            m.generator_step(lr)?;
            m.cost = m.generator_cost()?;
            Ok((previous, m.cost))
        })
    }
}

impl Parameters for Gan {
    /// Generator layers, then discriminator layers, then the output layer.
    fn parameters(&self) -> Vec<LayerParameters> {
        let mut out: Vec<LayerParameters> = self
            .generator
            .iter()
            .chain(&self.discriminator)
            .enumerate()
            .map(|(i, l)| LayerParameters::from_hidden(i + 1, l))
            .collect();
        if let Some(output) = &self.output {
            out.push(LayerParameters::from_output(out.len() + 1, output));
        }
        out
    }

    fn restore(&mut self, layers: &[LayerParameters]) -> Result<()> {
        let hidden = self.generator.len() + self.discriminator.len();
        expect_layers(layers, hidden + 1)?;
        for (layer, params) in self
            .generator
            .iter_mut()
            .chain(self.discriminator.iter_mut())
            .zip(layers)
        {
            layer.set_parameters(params.weight_matrix()?, params.bias_vector())?;
        }
        let (weights, bias) = layers[hidden].column()?;
        self.output_mut()?.set_parameters(weights, bias)?;
        Ok(())
    }
}
