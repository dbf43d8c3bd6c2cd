//! Network builder.
//!
//! `NetworkBuilder` makes the structure explicit (layer widths, activations, output link and
//! cost) and picks a default weight initializer for each activation:
//!
//! - `tanh` / `sigmoid` / `linear` / `softsign`: Xavier/Glorot (uniform)
//! - `relu` / `leaky relu` / `elu` / `gelu` / `swish`: He/Kaiming (normal)
//! - everything else: the uniform `[0, 1)` default

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::{
    Activation, Cost, Dataset, Error, HiddenLayer, Init, Matrix, Network, Optimizer, OutputLayer,
    Regularizer, Result,
};

#[derive(Debug, Clone, Copy)]
struct LayerSpec {
    n_hidden: usize,
    activation: Activation,
    init: Option<Init>,
}

#[derive(Debug, Clone)]
/// Builder for a [`Network`].
///
/// Example:
///
/// ```rust
/// use rust_mlpp::{Activation, Cost, Dataset, NetworkBuilder};
///
/// # fn main() -> rust_mlpp::Result<()> {
/// let data = Dataset::from_rows(&[vec![0.0], vec![1.0]], &[0.0, 1.0])?;
/// let net = NetworkBuilder::new(data)
///     .add_layer(8, Activation::ReLU)?
///     .output(Activation::Sigmoid, Cost::LogLoss)?
///     .build_with_seed(0)?;
/// assert_eq!(net.hidden_layers().len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct NetworkBuilder {
    data: Dataset,
    layers: Vec<LayerSpec>,
    output: Option<(Activation, Cost)>,
    regularizer: Regularizer,
    optimizer: Optimizer,
}

impl NetworkBuilder {
    /// Start building a network trained on `data`.
    pub fn new(data: Dataset) -> Self {
        Self {
            data,
            layers: Vec::new(),
            output: None,
            regularizer: Regularizer::none(),
            optimizer: Optimizer::Sgd,
        }
    }

    /// Convenience constructor from a list of hidden widths with matching activations.
    pub fn from_widths(
        data: Dataset,
        widths: &[usize],
        activations: &[Activation],
    ) -> Result<Self> {
        if activations.len() != widths.len() {
            return Err(Error::InvalidConfig(format!(
                "activations length {} does not match widths length {}",
                activations.len(),
                widths.len()
            )));
        }

        let mut b = Self::new(data);
        for (&n_hidden, &act) in widths.iter().zip(activations) {
            b = b.add_layer(n_hidden, act)?;
        }
        Ok(b)
    }

    /// Add a hidden layer with the default initializer for `activation`.
    pub fn add_layer(mut self, n_hidden: usize, activation: Activation) -> Result<Self> {
        if n_hidden == 0 {
            return Err(Error::InvalidConfig("layer width must be > 0".to_owned()));
        }
        activation.validate()?;

        self.layers.push(LayerSpec {
            n_hidden,
            activation,
            init: None,
        });
        Ok(self)
    }

    /// Override the initializer of the most recently added layer.
    pub fn init(mut self, init: Init) -> Result<Self> {
        let last = self
            .layers
            .last_mut()
            .ok_or_else(|| Error::InvalidConfig("init must follow add_layer".to_owned()))?;
        last.init = Some(init);
        Ok(self)
    }

    /// Set the single-unit output layer.
    pub fn output(mut self, activation: Activation, cost: Cost) -> Result<Self> {
        activation.validate()?;
        cost.validate()?;
        self.output = Some((activation, cost));
        Ok(self)
    }

    /// Penalty applied to every layer's weights.
    pub fn regularizer(mut self, regularizer: Regularizer) -> Result<Self> {
        regularizer.validate()?;
        self.regularizer = regularizer;
        Ok(self)
    }

    pub fn optimizer(mut self, optimizer: Optimizer) -> Result<Self> {
        optimizer.validate()?;
        self.optimizer = optimizer;
        Ok(self)
    }

    /// Build using a deterministic seed.
    pub fn build_with_seed(self, seed: u64) -> Result<Network> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.build_with_rng(&mut rng)
    }

    /// Build with seeds for every layer drawn from `rng`.
    pub fn build_with_rng<R: RngCore + ?Sized>(self, rng: &mut R) -> Result<Network> {
        let (activation, cost) = self
            .output
            .ok_or_else(|| Error::InvalidConfig("network must have an output layer".to_owned()))?;

        let mut net = Network::new(self.data)
            .with_seed(rng.next_u64())
            .with_optimizer(self.optimizer)?;
        for spec in self.layers {
            let init = spec
                .init
                .unwrap_or_else(|| default_init_for_activation(spec.activation));
            let layer = HiddenLayer::new(spec.n_hidden, spec.activation, Matrix::default())?
                .with_init(init)
                .with_regularizer(self.regularizer)?
                .with_seed(rng.next_u64());
            net.push_layer(layer);
        }

        let output = OutputLayer::new(activation, cost, Matrix::default())?
            .with_init(default_init_for_activation(activation))
            .with_regularizer(self.regularizer)?
            .with_seed(rng.next_u64());
        net.set_output_layer(output);
        Ok(net)
    }
}

#[inline]
fn default_init_for_activation(act: Activation) -> Init {
    match act {
        Activation::Tanh | Activation::Sigmoid | Activation::Linear | Activation::Softsign => {
            Init::XavierUniform
        }
        Activation::ReLU
        | Activation::LeakyReLU { .. }
        | Activation::Elu { .. }
        | Activation::Gelu
        | Activation::Swish => Init::HeNormal,
        _ => Init::Default,
    }
}
