//! Max-Pooling Layer
//!
//! Downsamples each feature map by taking the maximum over square windows,
//! remembering where each maximum came from. The backward pass routes every
//! output gradient to exactly that position; all other inputs receive zero.
//! No trainable parameters and no activation.

use std::io::{self, Read, Write};

use super::{
    read_bool, read_dim, write_bool, write_i32, LayerKind, LayerSize, Predecessor,
};
use crate::activations::Activation;
use crate::conv::{max_pool, max_pool_backward, PoolGeometry};
use crate::matrix::Matrix;

pub struct MaxPool2dLayer {
    pub kernel_size: usize,
    pub stride: usize,
    pub padded: bool,
    geometry: Option<PoolGeometry>,
    /// Argmax spatial indices from the last forward call.
    indices: Vec<usize>,
    grad_cols: usize,
}

impl MaxPool2dLayer {
    pub fn new(kernel_size: usize, stride: usize, padded: bool) -> MaxPool2dLayer {
        assert!(
            kernel_size > 0 && stride > 0,
            "MaxPool2D kernel size and stride must be positive"
        );
        MaxPool2dLayer {
            kernel_size,
            stride,
            padded,
            geometry: None,
            indices: Vec::new(),
            grad_cols: 0,
        }
    }

    fn geometry(&self) -> &PoolGeometry {
        match &self.geometry {
            Some(g) => g,
            None => panic!("MaxPool2D layer used before network initialization"),
        }
    }

    pub fn output_size(&self) -> LayerSize {
        let g = self.geometry();
        LayerSize::spatial(g.output_rows, g.output_cols, g.channels)
    }

    pub fn init(&mut self, previous: &Predecessor) {
        assert!(
            previous.kind == LayerKind::Conv2d,
            "A MaxPool2D layer can only follow a Conv2D layer, not {:?}",
            previous.kind
        );
        self.geometry = Some(PoolGeometry::new(
            previous.size.rows,
            previous.size.cols,
            previous.size.channels,
            self.kernel_size,
            self.stride,
            self.padded,
        ));
    }

    pub fn forward(&mut self, input: &Matrix) -> Matrix {
        let g = *self.geometry();
        let (output, indices) = max_pool(input, &g);
        self.indices = indices;
        self.grad_cols = output.cols;
        output
    }

    pub fn backward(&mut self, grad: &Matrix) -> Matrix {
        let g = *self.geometry();
        // A flat successor hands the gradient back in the flat layout
        let reshaped;
        let grad = if grad.rows == g.output_len() {
            grad
        } else {
            reshaped = grad.unflatten_observations(g.output_len(), g.channels);
            &reshaped
        };
        assert_eq!(
            grad.cols, self.grad_cols,
            "MaxPool2D backward got {} gradient columns, forward produced {}",
            grad.cols, self.grad_cols
        );
        max_pool_backward(grad, &self.indices, &g)
    }

    pub fn save<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_i32(w, LayerKind::MaxPool2d.code())?;
        write_bool(w, false)?;
        write_i32(w, self.kernel_size as i32)?;
        write_i32(w, self.stride as i32)?;
        write_bool(w, self.padded)?;
        write_i32(w, Activation::Identity.code())?;
        // No parameters
        write_i32(w, 0)?;
        write_i32(w, 0)?;
        write_i32(w, 0)?;
        Ok(())
    }

    pub fn load<R: Read>(r: &mut R) -> io::Result<MaxPool2dLayer> {
        let _trainable = read_bool(r)?;
        let kernel_size = read_dim(r)?;
        let stride = read_dim(r)?;
        let padded = read_bool(r)?;
        let _activation = read_dim(r)?;
        let _wrows = read_dim(r)?;
        let _wcols = read_dim(r)?;
        let _brows = read_dim(r)?;
        Ok(MaxPool2dLayer::new(kernel_size, stride, padded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predecessor(rows: usize, cols: usize, channels: usize) -> Predecessor {
        Predecessor {
            kind: LayerKind::Conv2d,
            size: LayerSize::spatial(rows, cols, channels),
            activation: Activation::Relu,
        }
    }

    #[test]
    fn test_forward_then_backward_routes_to_argmax() {
        let mut layer = MaxPool2dLayer::new(2, 2, false);
        layer.init(&predecessor(4, 4, 1));

        let input = Matrix::from_vec(16, 1, (0..16).map(|i| i as f64).collect());
        let out = layer.forward(&input);
        // Bottom-right corner of each window wins for increasing data
        assert_eq!(out.data, vec![5.0, 7.0, 13.0, 15.0]);

        let grad = Matrix::from_vec(4, 1, vec![1.0, 2.0, 3.0, 4.0]);
        let back = layer.backward(&grad);
        assert_eq!(back.get(5, 0), 1.0);
        assert_eq!(back.get(7, 0), 2.0);
        assert_eq!(back.get(13, 0), 3.0);
        assert_eq!(back.get(15, 0), 4.0);
        let total: f64 = back.data.iter().sum();
        assert_eq!(total, 10.0);
    }

    #[test]
    fn test_backward_accepts_flat_successor_gradient() {
        let mut layer = MaxPool2dLayer::new(2, 2, false);
        layer.init(&predecessor(4, 4, 2));

        let input = Matrix::from_vec(16, 2, (0..32).map(|i| i as f64 * 0.5).collect());
        let out = layer.forward(&input);
        assert_eq!(out.rows, 4);
        assert_eq!(out.cols, 2); // 1 observation x 2 channels

        let flat = Matrix::filled(8, 1, 1.0); // [channels * positions, observations]
        let back = layer.backward(&flat);
        assert_eq!(back.rows, 16);
        assert_eq!(back.cols, 2);
    }

    #[test]
    #[should_panic(expected = "can only follow a Conv2D")]
    fn test_rejects_non_conv_predecessor() {
        let mut layer = MaxPool2dLayer::new(2, 2, false);
        layer.init(&Predecessor {
            kind: LayerKind::Input,
            size: LayerSize::spatial(4, 4, 1),
            activation: Activation::Identity,
        });
    }
}
