//! Batch Normalization Layer
//!
//! Normalizes each feature across the batch to zero mean and unit variance,
//! then applies a learned per-feature scale and shift:
//!
//! ```text
//! x_hat = (x - mean) / sqrt(var + epsilon)
//! y     = gamma * x_hat + beta
//! ```
//!
//! Training uses the current batch's statistics and folds them into running
//! estimates via an exponential moving average; inference uses the running
//! estimates. The layer carries no activation of its own: it inherits the
//! activation of the dense layer before it and applies it after the scale
//! and shift, so `Dense(identity) -> BatchNorm` behaves like a normalized
//! dense layer.
//!
//! The backward pass differentiates through the batch statistics (mean and
//! variance depend on every observation), which yields the standard form
//!
//! ```text
//! dx = gamma / (n * std) * (n * dY - sum(dY) - x_hat * sum(dY * x_hat))
//! ```
//!
//! with the sums taken per feature across the batch.

use std::io::{self, Read, Write};

use super::{
    read_bool, read_column, read_f64, read_i32, read_matrix, uniform_init, write_bool,
    write_column, write_f64, write_i32, write_matrix, LayerKind, LayerSize, ParamId, Predecessor,
};
use crate::activations::Activation;
use crate::matrix::Matrix;

pub struct BatchNormLayer {
    pub momentum: f64,
    pub epsilon: f64,
    pub trainable: bool,
    pub gamma: Matrix,
    pub beta: Matrix,
    pub gamma_grad: Matrix,
    pub beta_grad: Matrix,
    pub running_mean: Matrix,
    pub running_var: Matrix,
    pub(crate) gamma_id: ParamId,
    pub(crate) beta_id: ParamId,
    features: usize,
    /// Inherited from the dense predecessor at init time.
    activation: Activation,
    normalized: Matrix,
    scaled: Matrix,
    batch_std: Matrix,
}

impl BatchNormLayer {
    pub fn new(momentum: f64, epsilon: f64) -> BatchNormLayer {
        assert!(
            momentum > 0.0 && momentum < 1.0,
            "Batch-norm momentum must be strictly between 0 and 1, got {}",
            momentum
        );
        assert!(epsilon > 0.0, "Batch-norm epsilon must be positive");
        BatchNormLayer {
            momentum,
            epsilon,
            trainable: true,
            gamma: Matrix::zeros(0, 0),
            beta: Matrix::zeros(0, 0),
            gamma_grad: Matrix::zeros(0, 0),
            beta_grad: Matrix::zeros(0, 0),
            running_mean: Matrix::zeros(0, 0),
            running_var: Matrix::zeros(0, 0),
            gamma_id: ParamId::next(),
            beta_id: ParamId::next(),
            features: 0,
            activation: Activation::Identity,
            normalized: Matrix::zeros(0, 0),
            scaled: Matrix::zeros(0, 0),
            batch_std: Matrix::zeros(0, 0),
        }
    }

    pub fn output_size(&self) -> LayerSize {
        LayerSize::flat(self.features)
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn init(&mut self, previous: &Predecessor, reset_parameters: bool) {
        assert!(
            previous.kind == LayerKind::Dense,
            "A BatchNorm layer can only follow a Dense layer, not {:?}",
            previous.kind
        );
        self.features = previous.size.size;
        self.activation = previous.activation;

        if reset_parameters {
            let limit = (2.0 / self.features as f64).sqrt();
            self.gamma = uniform_init(self.features, 1, limit);
            self.beta = Matrix::zeros(self.features, 1);
            self.running_mean = Matrix::zeros(self.features, 1);
            self.running_var = Matrix::filled(self.features, 1, 1.0);
        } else {
            assert!(
                self.gamma.rows == self.features,
                "Batch-norm scale has {} features but the predecessor supplies {}",
                self.gamma.rows,
                self.features
            );
        }
        self.gamma_grad = Matrix::zeros(self.features, 1);
        self.beta_grad = Matrix::zeros(self.features, 1);
    }

    pub fn forward(&mut self, input: &Matrix, training: bool) -> Matrix {
        assert_eq!(
            input.rows, self.features,
            "Batch-norm expects {} features, got {}",
            self.features, input.rows
        );
        let n = input.cols as f64;
        let mut normalized = Matrix::zeros(input.rows, input.cols);
        let mut std = Matrix::zeros(self.features, 1);

        for i in 0..self.features {
            let (mean, var) = if training {
                let mut mean = 0.0;
                for j in 0..input.cols {
                    mean += input.get(i, j);
                }
                mean /= n;
                let mut var = 0.0;
                for j in 0..input.cols {
                    let d = input.get(i, j) - mean;
                    var += d * d;
                }
                var /= n;

                let rm = self.momentum * self.running_mean.get(i, 0) + (1.0 - self.momentum) * mean;
                let rv = self.momentum * self.running_var.get(i, 0) + (1.0 - self.momentum) * var;
                self.running_mean.set(i, 0, rm);
                self.running_var.set(i, 0, rv);
                (mean, var)
            } else {
                (self.running_mean.get(i, 0), self.running_var.get(i, 0))
            };

            let s = (var + self.epsilon).sqrt();
            std.set(i, 0, s);
            for j in 0..input.cols {
                normalized.set(i, j, (input.get(i, j) - mean) / s);
            }
        }

        let mut scaled = Matrix::zeros(input.rows, input.cols);
        for i in 0..self.features {
            for j in 0..input.cols {
                scaled.set(
                    i,
                    j,
                    self.gamma.get(i, 0) * normalized.get(i, j) + self.beta.get(i, 0),
                );
            }
        }

        self.normalized = normalized;
        self.batch_std = std;
        let out = self.activation.forward(&scaled);
        self.scaled = scaled;
        out
    }

    pub fn backward(&mut self, grad: &Matrix, _input: &Matrix) -> Matrix {
        let n = grad.cols as f64;
        let d_y = self.activation.backward(&self.scaled, grad);

        let mut out = Matrix::zeros(grad.rows, grad.cols);
        for i in 0..self.features {
            let mut sum_dy = 0.0;
            let mut sum_dy_xhat = 0.0;
            for j in 0..grad.cols {
                sum_dy += d_y.get(i, j);
                sum_dy_xhat += d_y.get(i, j) * self.normalized.get(i, j);
            }
            self.gamma_grad.set(i, 0, sum_dy_xhat / n);
            self.beta_grad.set(i, 0, sum_dy / n);

            let coeff = self.gamma.get(i, 0) / (n * self.batch_std.get(i, 0));
            for j in 0..grad.cols {
                let v = n * d_y.get(i, j) - sum_dy - self.normalized.get(i, j) * sum_dy_xhat;
                out.set(i, j, coeff * v);
            }
        }
        out
    }

    pub fn save<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_i32(w, LayerKind::BatchNorm.code())?;
        write_bool(w, self.trainable)?;
        write_f64(w, self.momentum)?;
        write_f64(w, self.epsilon)?;
        write_column(w, &self.running_mean)?;
        write_column(w, &self.running_var)?;
        write_i32(w, self.activation.code())?;
        write_matrix(w, &self.gamma)?;
        write_column(w, &self.beta)
    }

    pub fn load<R: Read>(r: &mut R) -> io::Result<BatchNormLayer> {
        let trainable = read_bool(r)?;
        let momentum = read_f64(r)?;
        let epsilon = read_f64(r)?;
        let running_mean = read_column(r)?;
        let running_var = read_column(r)?;
        let activation = Activation::from_code(read_i32(r)?);
        let gamma = read_matrix(r)?;
        let beta = read_column(r)?;

        let mut layer = BatchNormLayer::new(momentum, epsilon);
        layer.trainable = trainable;
        layer.features = gamma.rows;
        layer.activation = activation;
        layer.running_mean = running_mean;
        layer.running_var = running_var;
        layer.gamma = gamma;
        layer.beta = beta;
        Ok(layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predecessor(size: usize, activation: Activation) -> Predecessor {
        Predecessor {
            kind: LayerKind::Dense,
            size: LayerSize::flat(size),
            activation,
        }
    }

    fn unit_layer(features: usize) -> BatchNormLayer {
        let mut layer = BatchNormLayer::new(0.9, 1e-8);
        layer.init(&predecessor(features, Activation::Identity), true);
        layer.gamma = Matrix::filled(features, 1, 1.0);
        layer.beta = Matrix::zeros(features, 1);
        layer
    }

    #[test]
    fn test_training_output_is_normalized() {
        let mut layer = unit_layer(2);
        let x = Matrix::from_vec(2, 4, vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0]);
        let y = layer.forward(&x, true);

        for i in 0..2 {
            let mean: f64 = (0..4).map(|j| y.get(i, j)).sum::<f64>() / 4.0;
            let var: f64 = (0..4).map(|j| (y.get(i, j) - mean).powi(2)).sum::<f64>() / 4.0;
            assert!(mean.abs() < 1e-10, "feature {} mean {}", i, mean);
            assert!((var - 1.0).abs() < 1e-6, "feature {} var {}", i, var);
        }
    }

    #[test]
    fn test_scale_and_shift_applied() {
        let mut layer = unit_layer(1);
        layer.gamma = Matrix::from_vec(1, 1, vec![3.0]);
        layer.beta = Matrix::from_vec(1, 1, vec![-1.0]);
        let x = Matrix::from_vec(1, 2, vec![0.0, 2.0]);
        let y = layer.forward(&x, true);
        // x_hat = [-1, 1], so y = 3 * x_hat - 1 = [-4, 2]
        assert!((y.get(0, 0) + 4.0).abs() < 1e-6);
        assert!((y.get(0, 1) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_running_statistics_converge() {
        let mut layer = unit_layer(1);
        let x = Matrix::from_vec(1, 4, vec![4.0, 6.0, 4.0, 6.0]); // mean 5, var 1
        for _ in 0..200 {
            layer.forward(&x, true);
        }
        assert!((layer.running_mean.get(0, 0) - 5.0).abs() < 1e-6);
        assert!((layer.running_var.get(0, 0) - 1.0).abs() < 1e-6);

        // Inference now normalizes with the converged statistics
        let y = layer.forward(&x, false);
        assert!((y.get(0, 0) + 1.0).abs() < 1e-4);
        assert!((y.get(0, 1) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_inherits_predecessor_activation() {
        let mut layer = BatchNormLayer::new(0.9, 1e-8);
        layer.init(&predecessor(1, Activation::Relu), true);
        layer.gamma = Matrix::filled(1, 1, 1.0);
        let x = Matrix::from_vec(1, 2, vec![-1.0, 1.0]);
        let y = layer.forward(&x, true);
        // The normalized values are [-1, 1]; relu clamps the negative one
        assert_eq!(y.get(0, 0), 0.0);
        assert!(y.get(0, 1) > 0.0);
    }

    #[test]
    fn test_backward_gradient_sums_to_zero() {
        // The gradient through the batch mean removes any constant
        // component: per feature, sum over the batch must vanish.
        let mut layer = unit_layer(2);
        let x = Matrix::from_vec(2, 3, vec![1.0, -0.5, 2.0, 0.3, 0.9, -1.2]);
        layer.forward(&x, true);
        let grad = Matrix::from_vec(2, 3, vec![0.2, -0.7, 1.1, 0.4, 0.4, -0.1]);
        let back = layer.backward(&grad, &x);
        for i in 0..2 {
            let sum: f64 = (0..3).map(|j| back.get(i, j)).sum();
            assert!(sum.abs() < 1e-10, "feature {} gradient sum {}", i, sum);
        }
    }

    #[test]
    #[should_panic(expected = "can only follow a Dense")]
    fn test_rejects_conv_predecessor() {
        let mut layer = BatchNormLayer::new(0.9, 1e-8);
        layer.init(
            &Predecessor {
                kind: LayerKind::Conv2d,
                size: LayerSize::spatial(4, 4, 2),
                activation: Activation::Relu,
            },
            true,
        );
    }
}
