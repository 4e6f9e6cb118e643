//! A from-scratch feed-forward network for handwritten-digit classification.
//!
//! The network is a stack of affine layers with ReLU between them, trained with plain
//! mini-batch SGD on gradients computed by a hand-written backward pass. Every array is an
//! [`ndarray::Array2<f64>`] with one example per row.
//!
//! ```no_run
//! use digit_trainer::{Head, MnistData, Network, Normalization, Sgd, Trainer};
//! use ndarray_rand::rand::{SeedableRng, rngs::StdRng};
//!
//! # fn main() -> digit_trainer::Result<()> {
//! let data = MnistData::load("data", Normalization::default())?;
//! let mut rng = StdRng::seed_from_u64(0);
//! let network = Network::new_with_rng(&[784, 128, 64, 10], Head::LogSoftmax, &mut rng)?;
//! let mut trainer = Trainer::new(network, Sgd::new(0.003)?);
//! trainer.fit(&data.training_data, Some(&data.test_data), 5, 64, &mut rng)?;
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod config;
pub mod data;
pub mod error;
pub mod layer;
pub mod loss;
pub mod mnist;
pub mod network;
pub mod optim;
pub mod train;

pub use config::TrainConfig;
pub use data::{Batch, Dataset};
pub use error::{Error, Result};
pub use layer::{Linear, Parameter};
pub use loss::Loss;
pub use mnist::{MnistData, Normalization};
pub use network::{ForwardTrace, Head, Network};
pub use optim::Sgd;
pub use train::{EpochStats, Evaluation, Phase, Trainer};
