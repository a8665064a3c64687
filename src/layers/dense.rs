//! Dense (Fully Connected) Layer
//!
//! Computes `activation(W * x + b)` per observation column. A dense layer
//! can follow any layer that produces output; when the predecessor is
//! spatial (convolution or pooling), its `observation * channels + channel`
//! column packing is first flattened into one feature vector per
//! observation.
//!
//! ## Backward pass
//!
//! With `G` the gradient w.r.t. the activation output and `dZ` the gradient
//! after the activation Jacobian:
//!
//! ```text
//! dW = (1/n) * dZ * x^T        db = (1/n) * row_sum(dZ)
//! grad to predecessor = W^T * dZ
//! ```
//!
//! The `1/n` batch average lives here rather than in the loss derivative,
//! which is per-sample. The gradient handed back is left in the flat
//! layout; a spatial predecessor reshapes it itself.

use std::io::{self, Read, Write};

use super::{
    read_bool, read_column, read_i32, read_matrix, uniform_init, write_bool, write_column,
    write_i32, write_matrix, LayerKind, LayerSize, ParamId, Predecessor,
};
use crate::activations::Activation;
use crate::matrix::Matrix;

pub struct DenseLayer {
    pub units: usize,
    pub activation: Activation,
    pub trainable: bool,
    pub weights: Matrix,
    pub biases: Matrix,
    pub weight_grad: Matrix,
    pub bias_grad: Matrix,
    pub(crate) weight_id: ParamId,
    pub(crate) bias_id: ParamId,
    input_len: usize,
    input_is_flat: bool,
    input_channels: usize,
    logits: Matrix,
}

impl DenseLayer {
    pub fn new(units: usize, activation: Activation) -> DenseLayer {
        assert!(units > 0, "Dense layer must have at least one unit");
        DenseLayer {
            units,
            activation,
            trainable: true,
            weights: Matrix::zeros(0, 0),
            biases: Matrix::zeros(0, 0),
            weight_grad: Matrix::zeros(0, 0),
            bias_grad: Matrix::zeros(0, 0),
            weight_id: ParamId::next(),
            bias_id: ParamId::next(),
            input_len: 0,
            input_is_flat: true,
            input_channels: 1,
            logits: Matrix::zeros(0, 0),
        }
    }

    pub fn output_size(&self) -> LayerSize {
        LayerSize::flat(self.units)
    }

    pub fn init(&mut self, previous: &Predecessor, reset_parameters: bool) {
        assert!(
            matches!(
                previous.kind,
                LayerKind::Input | LayerKind::Dense | LayerKind::Conv2d | LayerKind::MaxPool2d
            ),
            "A Dense layer cannot follow a {:?} layer",
            previous.kind
        );
        self.input_len = previous.size.size;
        self.input_is_flat = previous.size.is_flat;
        self.input_channels = previous.size.channels;

        if reset_parameters {
            let limit = (6.0 / (self.input_len + self.units) as f64).sqrt();
            self.weights = uniform_init(self.units, self.input_len, limit);
            self.biases = Matrix::zeros(self.units, 1);
        } else {
            assert!(
                self.weights.rows == self.units && self.weights.cols == self.input_len,
                "Dense layer weights are [{}, {}] but the predecessor supplies {} features",
                self.weights.rows,
                self.weights.cols,
                self.input_len
            );
        }
        self.weight_grad = Matrix::zeros(self.units, self.input_len);
        self.bias_grad = Matrix::zeros(self.units, 1);
    }

    pub fn forward(&mut self, input: &Matrix) -> Matrix {
        let flat;
        let x = if self.input_is_flat {
            input
        } else {
            flat = input.flatten_observations(self.input_channels);
            &flat
        };
        assert_eq!(
            x.rows, self.input_len,
            "Dense layer expects {} input features, got {}",
            self.input_len, x.rows
        );
        self.logits = self.weights.matmul(x).add_column_broadcast(&self.biases);
        self.activation.forward(&self.logits)
    }

    pub fn backward(&mut self, grad: &Matrix, input: &Matrix) -> Matrix {
        let flat;
        let x = if self.input_is_flat {
            input
        } else {
            flat = input.flatten_observations(self.input_channels);
            &flat
        };
        let n = x.cols as f64;
        let d_logit = self.activation.backward(&self.logits, grad);
        self.weight_grad = d_logit.matmul(&x.transpose()).scale(1.0 / n);
        self.bias_grad = d_logit.row_sums().scale(1.0 / n);
        self.weights.transpose().matmul(&d_logit)
    }

    pub fn save<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_i32(w, LayerKind::Dense.code())?;
        write_bool(w, self.trainable)?;
        write_i32(w, self.activation.code())?;
        write_matrix(w, &self.weights)?;
        write_column(w, &self.biases)
    }

    pub fn load<R: Read>(r: &mut R) -> io::Result<DenseLayer> {
        let trainable = read_bool(r)?;
        let activation = Activation::from_code(read_i32(r)?);
        let weights = read_matrix(r)?;
        let biases = read_column(r)?;
        let mut layer = DenseLayer::new(weights.rows, activation);
        layer.trainable = trainable;
        layer.input_len = weights.cols;
        layer.weights = weights;
        layer.biases = biases;
        Ok(layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Predecessor;

    fn predecessor(size: LayerSize) -> Predecessor {
        Predecessor {
            kind: LayerKind::Input,
            size,
            activation: Activation::Identity,
        }
    }

    #[test]
    fn test_forward_affine_identity() {
        let mut layer = DenseLayer::new(2, Activation::Identity);
        layer.init(&predecessor(LayerSize::flat(3)), true);
        layer.set_parameters_for_test(
            Matrix::from_vec(2, 3, vec![1.0, 0.0, -1.0, 0.5, 0.5, 0.5]),
            Matrix::from_vec(2, 1, vec![1.0, -1.0]),
        );
        let x = Matrix::from_vec(3, 2, vec![1.0, 2.0, 0.0, 1.0, 3.0, 0.0]);
        let y = layer.forward(&x);
        // obs 0: [1*1 + 0*0 - 1*3 + 1, 0.5*(1+0+3) - 1] = [-1, 1]
        assert_eq!(y.get(0, 0), -1.0);
        assert_eq!(y.get(1, 0), 1.0);
        // obs 1: [2 - 0 + 1, 0.5*3 - 1] = [3, 0.5]
        assert_eq!(y.get(0, 1), 3.0);
        assert_eq!(y.get(1, 1), 0.5);
    }

    #[test]
    fn test_backward_averages_over_batch() {
        let mut layer = DenseLayer::new(1, Activation::Identity);
        layer.init(&predecessor(LayerSize::flat(2)), true);
        layer.set_parameters_for_test(
            Matrix::from_vec(1, 2, vec![2.0, -1.0]),
            Matrix::from_vec(1, 1, vec![0.0]),
        );
        let x = Matrix::from_vec(2, 2, vec![1.0, 3.0, 2.0, 4.0]);
        layer.forward(&x);
        let grad = Matrix::from_vec(1, 2, vec![1.0, 1.0]);
        let back = layer.backward(&grad, &x);

        // dW = (1/2) * [1, 1] * x^T = [(1+3)/2, (2+4)/2]
        assert_eq!(layer.weight_grad.data, vec![2.0, 3.0]);
        assert_eq!(layer.bias_grad.data, vec![1.0]);
        // back = W^T * dZ
        assert_eq!(back.get(0, 0), 2.0);
        assert_eq!(back.get(1, 0), -1.0);
    }

    #[test]
    fn test_flattens_spatial_predecessor() {
        let mut layer = DenseLayer::new(3, Activation::Identity);
        layer.init(&predecessor(LayerSize::spatial(2, 2, 2)), true);
        assert_eq!(layer.weights.cols, 8);
        // 2 observations of 2x2x2 data in the spatial packing
        let x = Matrix::from_vec(4, 4, (0..16).map(|i| i as f64).collect());
        let y = layer.forward(&x);
        assert_eq!(y.rows, 3);
        assert_eq!(y.cols, 2);
    }

    #[test]
    #[should_panic(expected = "cannot follow")]
    fn test_rejects_dropout_predecessor() {
        let mut layer = DenseLayer::new(2, Activation::Identity);
        layer.init(
            &Predecessor {
                kind: LayerKind::Dropout,
                size: LayerSize::flat(4),
                activation: Activation::Identity,
            },
            true,
        );
    }

    impl DenseLayer {
        fn set_parameters_for_test(&mut self, weights: Matrix, biases: Matrix) {
            self.weights = weights;
            self.biases = biases;
        }
    }
}
