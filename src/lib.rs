//! Cesario: a from-scratch neural network training library
//!
//! Dense and convolutional networks with hand-derived backpropagation —
//! no autodiff, every gradient written out per layer. Named after Viola's
//! alias in *Twelfth Night*.
//!
//! # Modules
//!
//! - [`matrix`] - dense matrices with columns-as-observations batching
//! - [`activations`] - identity, sigmoid, relu, softmax
//! - [`losses`] - binary / categorical / sparse-categorical cross-entropy
//! - [`conv`] - convolution and pooling geometry engine (im2col)
//! - [`layers`] - input, dense, conv2d, maxpool2d, dropout, batchnorm
//! - [`optimizers`] - SGD+momentum, AdaGrad, RMSProp, Adam
//! - [`network`] - the layer stack: training, gradient checking, persistence
//! - [`dataset`] - IDX (MNIST) import and observation shuffling
//! - [`logger`] - CSV/console training metrics
//!
//! # Example
//!
//! ```rust,no_run
//! use cesario::{dataset, Layer, Network, Optimizer};
//!
//! let images = dataset::load_idx_images("train-images-idx3-ubyte").unwrap();
//! let labels = dataset::load_idx_labels_sparse("train-labels-idx1-ubyte").unwrap();
//!
//! let mut net = Network::new(vec![
//!     Layer::input_2d(28, 28, 1),
//!     Layer::conv2d(8, 3, 1, true, "relu"),
//!     Layer::max_pool2d(2, 2, false),
//!     Layer::dense(10, "softmax"),
//! ]);
//! net.configure(
//!     "sparse_categorical_crossentropy",
//!     Optimizer::adam(0.001, 0.9, 0.999),
//! );
//! net.train(&images, &labels, 10, 32, Some("training_log.csv")).unwrap();
//! net.save_model("mnist.bin").unwrap();
//! ```

pub mod activations;
pub mod conv;
pub mod dataset;
pub mod layers;
pub mod logger;
pub mod losses;
pub mod matrix;
pub mod network;
pub mod optimizers;

// Re-export main types for convenience
pub use activations::Activation;
pub use layers::{Layer, LayerKind, LayerSize, ParamId};
pub use logger::TrainingLogger;
pub use losses::Loss;
pub use matrix::Matrix;
pub use network::Network;
pub use optimizers::Optimizer;
