//! Neural Network Layers
//!
//! This module contains all the layer implementations for the network.
//! Each layer provides both forward and backward passes for training.
//!
//! ## Layers
//!
//! - **input**: shape declaration for the raw data, no parameters
//! - **dense**: fully connected affine transform plus activation
//! - **conv2d**: 2D convolution (im2col) plus per-filter bias and activation
//! - **maxpool2d**: spatial max pooling with argmax tracking
//! - **dropout**: inverted-dropout regularization
//! - **batchnorm**: per-feature batch normalization with running statistics
//!
//! ## Design Pattern
//!
//! Layers are variants of one [`Layer`] enum, each holding only its own
//! parameters and transient caches. The lifecycle is:
//!
//! ```rust,ignore
//! let mut layer = Layer::dense(64, "relu");
//! layer.init(Some(&predecessor), true);     // size + randomize parameters
//! let out = layer.forward(&input, true);    // caches whatever backward needs
//! let grad_in = layer.backward(&grad_out, &input);
//! ```
//!
//! `forward` may behave differently between training and inference (dropout
//! masks, batch-norm statistics). `backward` produces the parameter
//! gradients (readable via [`Layer::parameter_gradients`]) and returns the
//! gradient to hand to the preceding layer. Caches are overwritten on every
//! pass and are never persisted; only parameters round-trip through
//! [`Layer::save`]/[`Layer::load`].
//!
//! Each layer validates at `init` time that its predecessor's type is in
//! its allowed set (a dense layer can follow anything with output, a
//! pooling layer only a convolution, and so on). Violations are programmer
//! errors in the network topology and panic.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::activations::Activation;
use crate::matrix::Matrix;

pub mod batchnorm;
pub mod conv2d;
pub mod dense;
pub mod dropout;
pub mod input;
pub mod maxpool2d;

pub use batchnorm::BatchNormLayer;
pub use conv2d::Conv2dLayer;
pub use dense::DenseLayer;
pub use dropout::DropoutLayer;
pub use input::InputLayer;
pub use maxpool2d::MaxPool2dLayer;

/// Layer type tag, also the type code in the model file format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    Input,
    Dense,
    Conv2d,
    MaxPool2d,
    Dropout,
    BatchNorm,
}

impl LayerKind {
    /// Integer code used in the model file format.
    pub fn code(self) -> i32 {
        match self {
            LayerKind::Input => 0,
            LayerKind::Dense => 1,
            LayerKind::Conv2d => 2,
            LayerKind::MaxPool2d => 3,
            LayerKind::Dropout => 4,
            LayerKind::BatchNorm => 5,
        }
    }

    /// Inverse of [`LayerKind::code`]; an unknown code in a model file is a
    /// data error reported through the I/O path, so this returns `None`.
    pub fn from_code(code: i32) -> Option<LayerKind> {
        match code {
            0 => Some(LayerKind::Input),
            1 => Some(LayerKind::Dense),
            2 => Some(LayerKind::Conv2d),
            3 => Some(LayerKind::MaxPool2d),
            4 => Some(LayerKind::Dropout),
            5 => Some(LayerKind::BatchNorm),
            _ => None,
        }
    }
}

/// Output shape of a layer, per observation.
///
/// `size` is always the total feature count. Flat layers (dense, batch-norm)
/// only use `size`; spatial layers describe a `rows x cols` grid replicated
/// over `channels` feature maps, packed into matrix columns as
/// `observation * channels + channel`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSize {
    pub is_flat: bool,
    pub size: usize,
    pub rows: usize,
    pub cols: usize,
    pub channels: usize,
}

impl LayerSize {
    /// A flat feature vector of `size` entries per observation.
    pub fn flat(size: usize) -> LayerSize {
        LayerSize {
            is_flat: true,
            size,
            rows: size,
            cols: 1,
            channels: 1,
        }
    }

    /// A spatial `rows x cols x channels` volume per observation.
    pub fn spatial(rows: usize, cols: usize, channels: usize) -> LayerSize {
        LayerSize {
            is_flat: false,
            size: rows * cols * channels,
            rows,
            cols,
            channels,
        }
    }
}

/// Stable identity of one parameter tensor.
///
/// Assigned from a process-wide counter when a trainable layer is
/// constructed, and never reused. Optimizers key their per-tensor
/// accumulators (momentum, squared-gradient averages) on these IDs, so the
/// association survives moves of the owning layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(u64);

static NEXT_PARAM_ID: AtomicU64 = AtomicU64::new(0);

impl ParamId {
    /// Allocate a fresh, never-before-used ID.
    pub fn next() -> ParamId {
        ParamId(NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a layer learns about the layer before it during `init`.
#[derive(Clone, Copy, Debug)]
pub struct Predecessor {
    pub kind: LayerKind,
    pub size: LayerSize,
    /// The predecessor's activation. Batch-norm inherits this.
    pub activation: Activation,
}

/// One layer of the network.
///
/// Constructed with hyperparameters via the associated functions
/// ([`Layer::dense`], [`Layer::conv2d`], ...), then sized and initialized by
/// the network via [`Layer::init`].
pub enum Layer {
    Input(InputLayer),
    Dense(DenseLayer),
    Conv2d(Conv2dLayer),
    MaxPool2d(MaxPool2dLayer),
    Dropout(DropoutLayer),
    BatchNorm(BatchNormLayer),
}

impl Layer {
    /// Input layer for flat feature vectors (`size` features per observation).
    pub fn input_1d(size: usize) -> Layer {
        Layer::Input(InputLayer::new(LayerSize::flat(size)))
    }

    /// Input layer for spatial data (`rows x cols` pixels, `channels` maps).
    pub fn input_2d(rows: usize, cols: usize, channels: usize) -> Layer {
        Layer::Input(InputLayer::new(LayerSize::spatial(rows, cols, channels)))
    }

    /// Fully connected layer with `units` outputs.
    pub fn dense(units: usize, activation: &str) -> Layer {
        Layer::Dense(DenseLayer::new(units, Activation::from_name(activation)))
    }

    /// 2D convolution with `filters` square `kernel_size` kernels.
    pub fn conv2d(
        filters: usize,
        kernel_size: usize,
        stride: usize,
        padded: bool,
        activation: &str,
    ) -> Layer {
        Layer::Conv2d(Conv2dLayer::new(
            filters,
            kernel_size,
            stride,
            padded,
            Activation::from_name(activation),
        ))
    }

    /// Square max-pooling layer.
    pub fn max_pool2d(kernel_size: usize, stride: usize, padded: bool) -> Layer {
        Layer::MaxPool2d(MaxPool2dLayer::new(kernel_size, stride, padded))
    }

    /// Inverted dropout with drop probability `rate`.
    pub fn dropout(rate: f64) -> Layer {
        Layer::Dropout(DropoutLayer::new(rate))
    }

    /// Batch normalization with the given EMA momentum and variance floor.
    pub fn batch_norm(momentum: f64, epsilon: f64) -> Layer {
        Layer::BatchNorm(BatchNormLayer::new(momentum, epsilon))
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            Layer::Input(_) => LayerKind::Input,
            Layer::Dense(_) => LayerKind::Dense,
            Layer::Conv2d(_) => LayerKind::Conv2d,
            Layer::MaxPool2d(_) => LayerKind::MaxPool2d,
            Layer::Dropout(_) => LayerKind::Dropout,
            Layer::BatchNorm(_) => LayerKind::BatchNorm,
        }
    }

    /// Whether this layer carries parameters the optimizer should update.
    pub fn trainable(&self) -> bool {
        match self {
            Layer::Dense(l) => l.trainable,
            Layer::Conv2d(l) => l.trainable,
            Layer::BatchNorm(l) => l.trainable,
            _ => false,
        }
    }

    /// Output shape. Only meaningful after [`Layer::init`].
    pub fn output_size(&self) -> LayerSize {
        match self {
            Layer::Input(l) => l.output_size(),
            Layer::Dense(l) => l.output_size(),
            Layer::Conv2d(l) => l.output_size(),
            Layer::MaxPool2d(l) => l.output_size(),
            Layer::Dropout(l) => l.output_size(),
            Layer::BatchNorm(l) => l.output_size(),
        }
    }

    /// The activation a successor would inherit from this layer.
    pub fn activation(&self) -> Activation {
        match self {
            Layer::Dense(l) => l.activation,
            Layer::Conv2d(l) => l.activation,
            Layer::BatchNorm(l) => l.activation(),
            _ => Activation::Identity,
        }
    }

    /// Size this layer against its predecessor and set up its parameters.
    ///
    /// With `reset_parameters` the weights are freshly randomized; without
    /// it, existing parameter values are preserved and only derived state
    /// (geometries, gradient buffers) is rebuilt. The latter path is used
    /// after loading a model from disk.
    ///
    /// # Panics
    ///
    /// Panics when the predecessor's type or shape is incompatible with
    /// this layer.
    pub fn init(&mut self, previous: Option<&Predecessor>, reset_parameters: bool) {
        match self {
            Layer::Input(l) => l.init(previous),
            Layer::Dense(l) => l.init(required(previous, "Dense"), reset_parameters),
            Layer::Conv2d(l) => l.init(required(previous, "Conv2D"), reset_parameters),
            Layer::MaxPool2d(l) => l.init(required(previous, "MaxPool2D")),
            Layer::Dropout(l) => l.init(required(previous, "Dropout")),
            Layer::BatchNorm(l) => l.init(required(previous, "BatchNorm"), reset_parameters),
        }
    }

    /// Run the layer on `input` (columns = observations, spatial layers
    /// expect the `observation * channels + channel` packing).
    pub fn forward(&mut self, input: &Matrix, training: bool) -> Matrix {
        match self {
            Layer::Input(l) => l.forward(input),
            Layer::Dense(l) => l.forward(input),
            Layer::Conv2d(l) => l.forward(input),
            Layer::MaxPool2d(l) => l.forward(input),
            Layer::Dropout(l) => l.forward(input, training),
            Layer::BatchNorm(l) => l.forward(input, training),
        }
    }

    /// Backward pass. `grad` is the gradient w.r.t. this layer's output
    /// (from the successor, or the loss derivative for the last layer);
    /// `input` is the same matrix the matching [`Layer::forward`] call
    /// received. Returns the gradient w.r.t. `input`.
    pub fn backward(&mut self, grad: &Matrix, input: &Matrix) -> Matrix {
        match self {
            Layer::Input(_) => panic!("Input layer has no backward pass"),
            Layer::Dense(l) => l.backward(grad, input),
            Layer::Conv2d(l) => l.backward(grad, input),
            Layer::MaxPool2d(l) => l.backward(grad),
            Layer::Dropout(l) => l.backward(grad),
            Layer::BatchNorm(l) => l.backward(grad, input),
        }
    }

    /// Parameter tensors, `(weights, biases)`, for layers that have them.
    pub fn parameters(&self) -> Option<(&Matrix, &Matrix)> {
        match self {
            Layer::Dense(l) => Some((&l.weights, &l.biases)),
            Layer::Conv2d(l) => Some((&l.weights, &l.biases)),
            Layer::BatchNorm(l) => Some((&l.gamma, &l.beta)),
            _ => None,
        }
    }

    /// Parameter gradients with their stable IDs, as
    /// `((weight_id, weight_grad), (bias_id, bias_grad))`. Only meaningful
    /// after a backward pass.
    pub fn parameter_gradients(&self) -> Option<((ParamId, &Matrix), (ParamId, &Matrix))> {
        match self {
            Layer::Dense(l) => Some(((l.weight_id, &l.weight_grad), (l.bias_id, &l.bias_grad))),
            Layer::Conv2d(l) => Some(((l.weight_id, &l.weight_grad), (l.bias_id, &l.bias_grad))),
            Layer::BatchNorm(l) => Some(((l.gamma_id, &l.gamma_grad), (l.beta_id, &l.beta_grad))),
            _ => None,
        }
    }

    /// Overwrite the parameter tensors. Shapes must match exactly.
    pub fn set_weights_and_biases(&mut self, weights: &Matrix, biases: &Matrix) {
        let kind = self.kind();
        let (w, b) = self
            .parameters_mut()
            .unwrap_or_else(|| panic!("{:?} layer has no parameters to set", kind));
        assert!(
            w.rows == weights.rows && w.cols == weights.cols,
            "Weight shape mismatch: layer holds [{}, {}], got [{}, {}]",
            w.rows,
            w.cols,
            weights.rows,
            weights.cols
        );
        assert!(
            b.rows == biases.rows && b.cols == biases.cols,
            "Bias shape mismatch: layer holds [{}, {}], got [{}, {}]",
            b.rows,
            b.cols,
            biases.rows,
            biases.cols
        );
        *w = weights.clone();
        *b = biases.clone();
    }

    /// Add deltas to the parameter tensors. Shapes must match exactly.
    pub fn increment_weights_and_biases(&mut self, weight_delta: &Matrix, bias_delta: &Matrix) {
        let kind = self.kind();
        let (w, b) = self
            .parameters_mut()
            .unwrap_or_else(|| panic!("{:?} layer has no parameters to update", kind));
        *w = w.add(weight_delta);
        *b = b.add(bias_delta);
    }

    pub(crate) fn parameters_mut(&mut self) -> Option<(&mut Matrix, &mut Matrix)> {
        match self {
            Layer::Dense(l) => Some((&mut l.weights, &mut l.biases)),
            Layer::Conv2d(l) => Some((&mut l.weights, &mut l.biases)),
            Layer::BatchNorm(l) => Some((&mut l.gamma, &mut l.beta)),
            _ => None,
        }
    }

    /// Write this layer's persistent state (type code, trainable flag,
    /// hyperparameters, activation code, parameter tensors).
    pub fn save<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            Layer::Input(l) => l.save(writer),
            Layer::Dense(l) => l.save(writer),
            Layer::Conv2d(l) => l.save(writer),
            Layer::MaxPool2d(l) => l.save(writer),
            Layer::Dropout(l) => l.save(writer),
            Layer::BatchNorm(l) => l.save(writer),
        }
    }

    /// Read back a layer written by [`Layer::save`], dispatching on the
    /// leading type code. The loaded layer still needs [`Layer::init`] with
    /// `reset_parameters = false` to rebuild derived state.
    pub fn load<R: Read>(reader: &mut R) -> io::Result<Layer> {
        let code = read_i32(reader)?;
        let kind = LayerKind::from_code(code).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown layer type code in model file: {}", code),
            )
        })?;
        match kind {
            LayerKind::Input => Ok(Layer::Input(InputLayer::load(reader)?)),
            LayerKind::Dense => Ok(Layer::Dense(DenseLayer::load(reader)?)),
            LayerKind::Conv2d => Ok(Layer::Conv2d(Conv2dLayer::load(reader)?)),
            LayerKind::MaxPool2d => Ok(Layer::MaxPool2d(MaxPool2dLayer::load(reader)?)),
            LayerKind::Dropout => Ok(Layer::Dropout(DropoutLayer::load(reader)?)),
            LayerKind::BatchNorm => Ok(Layer::BatchNorm(BatchNormLayer::load(reader)?)),
        }
    }
}

fn required<'a>(previous: Option<&'a Predecessor>, name: &str) -> &'a Predecessor {
    match previous {
        Some(p) => p,
        None => panic!("A {} layer cannot be the first layer of a network", name),
    }
}

/// Fill a matrix with uniform draws from `(-limit, limit)`.
///
/// Dense and convolutional layers use the Glorot-style limit
/// `sqrt(6 / (fan_in + fan_out))`; batch-norm scales use `sqrt(2 / fan_in)`.
pub(crate) fn uniform_init(rows: usize, cols: usize, limit: f64) -> Matrix {
    use rand::Rng;
    use rand_distr::Uniform;
    let dist = Uniform::new(-limit, limit);
    let mut rng = rand::thread_rng();
    let data = (0..rows * cols).map(|_| rng.sample(dist)).collect();
    Matrix::from_vec(rows, cols, data)
}

// Binary encoding helpers shared by the layer save/load implementations.
// Everything is little-endian with no alignment padding.

pub(crate) fn write_i32<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn read_i32<R: Read>(r: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

/// Read an i32 that must be a valid non-negative size.
pub(crate) fn read_dim<R: Read>(r: &mut R) -> io::Result<usize> {
    let v = read_i32(r)?;
    usize::try_from(v).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Negative dimension in model file: {}", v),
        )
    })
}

pub(crate) fn write_bool<W: Write>(w: &mut W, v: bool) -> io::Result<()> {
    w.write_all(&[v as u8])
}

pub(crate) fn read_bool<R: Read>(r: &mut R) -> io::Result<bool> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0] != 0)
}

pub(crate) fn write_f64<W: Write>(w: &mut W, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub(crate) fn read_f64<R: Read>(r: &mut R) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

/// Write `[i32 rows][i32 cols][rows*cols f64]`.
pub(crate) fn write_matrix<W: Write>(w: &mut W, m: &Matrix) -> io::Result<()> {
    write_i32(w, m.rows as i32)?;
    write_i32(w, m.cols as i32)?;
    for &v in &m.data {
        write_f64(w, v)?;
    }
    Ok(())
}

pub(crate) fn read_matrix<R: Read>(r: &mut R) -> io::Result<Matrix> {
    let rows = read_dim(r)?;
    let cols = read_dim(r)?;
    let mut data = vec![0.0; rows * cols];
    for v in data.iter_mut() {
        *v = read_f64(r)?;
    }
    Ok(Matrix::from_vec(rows, cols, data))
}

/// Write `[i32 rows][rows f64]` for a column vector.
pub(crate) fn write_column<W: Write>(w: &mut W, m: &Matrix) -> io::Result<()> {
    assert!(m.cols == 1, "Expected a column vector, got [{}, {}]", m.rows, m.cols);
    write_i32(w, m.rows as i32)?;
    for &v in &m.data {
        write_f64(w, v)?;
    }
    Ok(())
}

pub(crate) fn read_column<R: Read>(r: &mut R) -> io::Result<Matrix> {
    let rows = read_dim(r)?;
    let mut data = vec![0.0; rows];
    for v in data.iter_mut() {
        *v = read_f64(r)?;
    }
    Ok(Matrix::from_vec(rows, 1, data))
}
