//! Classical machine learning on dense buffers.
//!
//! `rust-mlpp` bundles a small linear-algebra core ([`Vector`], [`Matrix`], [`Tensor3`])
//! with the models built on it: regression templates, layered feed-forward networks (one
//! output unit, or several with matrix targets), a GAN/WGAN trainer and a kernelized dual
//! SVM.
//!
//! # Design goals
//!
//! - Closed enumerations: activations, costs, penalties, initializers and kernels are enums
//!   with exhaustive dispatch; parsing an unknown name is an [`Error::UnknownVariant`].
//! - Lazy layers: a layer sizes and draws its parameters on its first forward pass and
//!   only re-draws after a shape-affecting change ([`LayerState`]).
//! - Explicit failure: non-conformable shapes, singular systems and bad configuration
//!   surface as [`Error`] values instead of NaNs.
//! - Reproducible: every random draw goes through a seedable `StdRng`.
//!
//! # Buffers
//!
//! Element-wise operations come in three forms through [`DenseBuffer`]: in place
//! (`add`), returning a new buffer (`add_new`) and writing into a caller-owned buffer
//! (`add_into`). All of them reject non-conformable operands.
//!
//! # Training
//!
//! Every trainer runs the same epoch loop: `Uninitialized` until the first training call,
//! `Training` while epochs run, `Stopped` when `max_epoch` epochs completed or the
//! [`CancelToken`] fired. After each epoch a [`Progress`] sink sees the costs and the
//! current [`Parameters`].
//!
//! # Data layout and shapes
//!
//! - Scalars are [`Real`] (`f64`).
//! - Samples are rows; features are columns.
//! - Hidden layer weights have shape `(n_features, n_hidden)`.
//!
//! # MSRV
//!
//! This crate's minimum supported Rust version (MSRV) is specified in `Cargo.toml`.

//! # Quick start
//!
//! ```rust
//! use rust_mlpp::{Dataset, Regression, Silent, TrainConfig};
//!
//! # fn main() -> rust_mlpp::Result<()> {
//! let xs: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64 / 10.0]).collect();
//! let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x[0]).collect();
//! let data = Dataset::from_rows(&xs, &ys)?;
//!
//! let mut model = Regression::linear(data)?.with_seed(0);
//! let report = model.gradient_descent(&TrainConfig::new(0.1, 100), &mut Silent)?;
//! assert!(report.final_cost < report.initial_cost);
//! # Ok(())
//! # }
//! ```

//! # Layered networks
//!
//! ```rust
//! use rust_mlpp::{Activation, Cost, Dataset, NetworkBuilder, Optimizer, TracingProgress, TrainConfig};
//!
//! # fn main() -> rust_mlpp::Result<()> {
//! let xs = vec![
//!     vec![0.0, 0.0],
//!     vec![0.0, 1.0],
//!     vec![1.0, 0.0],
//!     vec![1.0, 1.0],
//! ];
//! let train = Dataset::from_rows(&xs, &[0.0, 1.0, 1.0, 0.0])?;
//!
//! let mut net = NetworkBuilder::new(train)
//!     .add_layer(8, Activation::Tanh)?
//!     .output(Activation::Sigmoid, Cost::LogLoss)?
//!     .optimizer(Optimizer::adam())?
//!     .build_with_seed(0)?;
//!
//! let cfg = TrainConfig::new(0.05, 50).with_seed(0);
//! let _report = net.gradient_descent(&cfg, &mut TracingProgress { every: 10 })?;
//! Ok(())
//! # }
//! ```

pub mod activation;
pub mod buffer;
pub mod builder;
pub mod convolution;
pub mod cost;
pub mod data;
pub mod error;
pub mod gan;
pub mod layer;
pub(crate) mod matmul;
pub mod matrix;
pub mod metrics;
pub mod multi_network;
pub mod network;
pub mod optim;
pub mod regression;
pub mod regularization;
pub mod serde_model;
pub mod stat;
pub mod svm;
pub mod tensor3;
pub mod train;
pub mod vector;

/// Scalar type of every buffer.
pub type Real = f64;

pub use activation::{Activation, softmax_jacobian};
pub use buffer::DenseBuffer;
pub use builder::NetworkBuilder;
pub use convolution::Pooling;
pub use cost::Cost;
pub use data::{Dataset, batch_ranges};
pub use error::{Error, Result};
pub use gan::{Adversary, CRITIC_ITERATIONS, Gan};
pub use layer::{
    HiddenLayer, Init, LayerGradient, LayerState, MultiOutputLayer, OutputGradient, OutputLayer,
};
pub use matrix::Matrix;
pub use metrics::{Metric, score};
pub use multi_network::MultiOutputNetwork;
pub use network::Network;
pub use optim::{Optimizer, OptimizerState};
pub use regression::Regression;
pub use regularization::{Penalty, Regularizer};
pub use serde_model::{LayerParameters, PARAMETER_FORMAT_VERSION, ParameterFile, Parameters};
pub use svm::{BiasEstimate, DualSvc, Kernel, alpha_projection};
pub use tensor3::Tensor3;
pub use train::{
    CancelToken, EpochReport, Progress, Silent, TracingProgress, TrainConfig, TrainReport,
    TrainState,
};
pub use vector::Vector;
