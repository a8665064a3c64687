//! 2D Convolution Layer
//!
//! Correlates `filters` square kernels with the predecessor's feature maps
//! (im2col under the hood), adds one bias per filter, then applies the
//! activation. Input and output use the spatial column packing
//! (`observation * channels + channel`).
//!
//! ## Backward pass
//!
//! All three gradients are themselves correlations, each driven by its own
//! geometry derived from the forward one (see [`crate::conv`]):
//!
//! - **filters**: correlate each input channel with the stride-dilated
//!   output gradient of its observation
//! - **biases**: mean over observations of each filter's summed gradient map
//! - **input**: stride-1 correlation of the dilated gradient with the
//!   180-degree rotated filters under transposed padding, zero-extended to
//!   the full input size
//!
//! When the successor is flat (a dense layer), the incoming gradient
//! arrives in the flat layout and is reshaped back to the spatial packing
//! before the activation Jacobian is applied.

use std::io::{self, Read, Write};

use super::{
    read_bool, read_column, read_i32, read_matrix, uniform_init, write_bool, write_column,
    write_i32, write_matrix, LayerKind, LayerSize, ParamId, Predecessor,
};
use crate::activations::Activation;
use crate::conv::{convolve, dilate, rotate_filters, ConvGeometry};
use crate::matrix::Matrix;

pub struct Conv2dLayer {
    pub filters: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padded: bool,
    pub activation: Activation,
    pub trainable: bool,
    /// Flattened filters, `[filters, channels * kernel_size^2]`, rows
    /// channel-major to match the im2col patch layout.
    pub weights: Matrix,
    pub biases: Matrix,
    pub weight_grad: Matrix,
    pub bias_grad: Matrix,
    pub(crate) weight_id: ParamId,
    pub(crate) bias_id: ParamId,
    geometry: Option<ConvGeometry>,
    logits: Matrix,
}

impl Conv2dLayer {
    pub fn new(
        filters: usize,
        kernel_size: usize,
        stride: usize,
        padded: bool,
        activation: Activation,
    ) -> Conv2dLayer {
        assert!(filters > 0, "Conv2D layer must have at least one filter");
        assert!(
            kernel_size > 0 && stride > 0,
            "Conv2D kernel size and stride must be positive"
        );
        Conv2dLayer {
            filters,
            kernel_size,
            stride,
            padded,
            activation,
            trainable: true,
            weights: Matrix::zeros(0, 0),
            biases: Matrix::zeros(0, 0),
            weight_grad: Matrix::zeros(0, 0),
            bias_grad: Matrix::zeros(0, 0),
            weight_id: ParamId::next(),
            bias_id: ParamId::next(),
            geometry: None,
            logits: Matrix::zeros(0, 0),
        }
    }

    fn geometry(&self) -> &ConvGeometry {
        match &self.geometry {
            Some(g) => g,
            None => panic!("Conv2D layer used before network initialization"),
        }
    }

    pub fn output_size(&self) -> LayerSize {
        let g = self.geometry();
        LayerSize::spatial(g.output_rows, g.output_cols, g.kernel_count)
    }

    pub fn init(&mut self, previous: &Predecessor, reset_parameters: bool) {
        assert!(
            matches!(
                previous.kind,
                LayerKind::Input | LayerKind::Conv2d | LayerKind::MaxPool2d | LayerKind::Dropout
            ),
            "A Conv2D layer cannot follow a {:?} layer",
            previous.kind
        );
        assert!(
            !previous.size.is_flat,
            "A Conv2D layer needs a spatial predecessor, not a flat one"
        );

        let geometry = ConvGeometry::forward(
            previous.size.rows,
            previous.size.cols,
            previous.size.channels,
            self.filters,
            self.kernel_size,
            self.kernel_size,
            self.stride,
            self.padded,
        );
        let patch_len = geometry.patch_len();

        if reset_parameters {
            let fan_in = patch_len;
            let fan_out = self.filters * self.kernel_size * self.kernel_size;
            let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
            self.weights = uniform_init(self.filters, patch_len, limit);
            self.biases = Matrix::zeros(self.filters, 1);
        } else {
            assert!(
                self.weights.rows == self.filters && self.weights.cols == patch_len,
                "Conv2D filters are [{}, {}] but the predecessor needs [{}, {}]",
                self.weights.rows,
                self.weights.cols,
                self.filters,
                patch_len
            );
        }
        self.weight_grad = Matrix::zeros(self.filters, patch_len);
        self.bias_grad = Matrix::zeros(self.filters, 1);
        self.geometry = Some(geometry);
    }

    pub fn forward(&mut self, input: &Matrix) -> Matrix {
        let g = *self.geometry();
        self.logits = convolve(input, &g, &self.weights, Some(&self.biases));
        self.activation.forward(&self.logits)
    }

    pub fn backward(&mut self, grad: &Matrix, input: &Matrix) -> Matrix {
        let g = *self.geometry();
        let batch = input.cols / g.input_channels;

        // A flat successor hands the gradient back in the flat layout
        let reshaped;
        let grad = if grad.rows == g.output_len() {
            grad
        } else {
            reshaped = grad.unflatten_observations(g.output_len(), g.kernel_count);
            &reshaped
        };
        let d_logit = self.activation.backward(&self.logits, grad);

        self.accumulate_weight_grad(&d_logit, input, &g, batch);
        self.accumulate_bias_grad(&d_logit, &g, batch);
        self.input_grad(&d_logit, &g, batch)
    }

    /// Correlate each input channel with its observation's dilated output
    /// gradient and average over the batch.
    fn accumulate_weight_grad(
        &mut self,
        d_logit: &Matrix,
        input: &Matrix,
        g: &ConvGeometry,
        batch: usize,
    ) {
        let wg = g.weight_gradient();
        let kernel_area = g.kernel_rows * g.kernel_cols;
        let mut acc = Matrix::zeros(self.weights.rows, self.weights.cols);

        for b in 0..batch {
            let x = input.columns(b * g.input_channels, (b + 1) * g.input_channels);
            let grad_maps = d_logit.columns(b * g.kernel_count, (b + 1) * g.kernel_count);
            let kernels = dilate(&grad_maps, g.output_rows, g.output_cols, g.stride).transpose();
            // [kernel_area, channels * filters], column = channel * filters + filter
            let contribution = convolve(&x, &wg, &kernels, None);
            for c in 0..g.input_channels {
                for f in 0..g.kernel_count {
                    for p in 0..kernel_area {
                        let v = acc.get(f, c * kernel_area + p)
                            + contribution.get(p, c * g.kernel_count + f);
                        acc.set(f, c * kernel_area + p, v);
                    }
                }
            }
        }
        self.weight_grad = acc.scale(1.0 / batch as f64);
    }

    /// Per-filter mean over observations of the summed gradient map.
    fn accumulate_bias_grad(&mut self, d_logit: &Matrix, g: &ConvGeometry, batch: usize) {
        let mut acc = Matrix::zeros(g.kernel_count, 1);
        for b in 0..batch {
            for f in 0..g.kernel_count {
                let mut sum = 0.0;
                for p in 0..g.output_len() {
                    sum += d_logit.get(p, b * g.kernel_count + f);
                }
                acc.set(f, 0, acc.get(f, 0) + sum);
            }
        }
        self.bias_grad = acc.scale(1.0 / batch as f64);
    }

    /// Rotated-filter correlation of the dilated gradient, zero-extended to
    /// the full input shape (input positions the forward stride never
    /// visited receive no gradient).
    fn input_grad(&self, d_logit: &Matrix, g: &ConvGeometry, batch: usize) -> Matrix {
        let ig = g.input_gradient();
        let rotated = rotate_filters(
            &self.weights,
            g.input_channels,
            g.kernel_rows,
            g.kernel_cols,
        );
        let dilated = dilate(d_logit, g.output_rows, g.output_cols, g.stride);
        let covered = convolve(&dilated, &ig, &rotated, None);

        let mut out = Matrix::zeros(g.input_rows * g.input_cols, batch * g.input_channels);
        for i in 0..ig.output_rows {
            for j in 0..ig.output_cols {
                let src = i * ig.output_cols + j;
                let dst = i * g.input_cols + j;
                for col in 0..out.cols {
                    out.set(dst, col, covered.get(src, col));
                }
            }
        }
        out
    }

    pub fn save<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_i32(w, LayerKind::Conv2d.code())?;
        write_bool(w, self.trainable)?;
        write_i32(w, self.filters as i32)?;
        write_i32(w, self.kernel_size as i32)?;
        write_i32(w, self.stride as i32)?;
        write_bool(w, self.padded)?;
        write_i32(w, self.activation.code())?;
        write_matrix(w, &self.weights)?;
        write_column(w, &self.biases)
    }

    pub fn load<R: Read>(r: &mut R) -> io::Result<Conv2dLayer> {
        let trainable = read_bool(r)?;
        let filters = super::read_dim(r)?;
        let kernel_size = super::read_dim(r)?;
        let stride = super::read_dim(r)?;
        let padded = read_bool(r)?;
        let activation = Activation::from_code(read_i32(r)?);
        let weights = read_matrix(r)?;
        let biases = read_column(r)?;
        let mut layer = Conv2dLayer::new(filters, kernel_size, stride, padded, activation);
        layer.trainable = trainable;
        layer.weights = weights;
        layer.biases = biases;
        Ok(layer)
    }
}
