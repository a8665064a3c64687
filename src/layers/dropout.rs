//! Dropout Layer
//!
//! Dropout is a regularization technique that randomly zeros out activations
//! during training to prevent overfitting. During inference, it passes values
//! through unchanged.
//!
//! This is inverted dropout: survivors are rescaled by `1/(1-p)` at training
//! time so the expected activation matches inference, and the backward pass
//! reapplies the exact mask drawn by the matching forward call.

use std::io::{self, Read, Write};

use rand::Rng;

use super::{
    read_bool, read_dim, read_f64, write_bool, write_f64, write_i32, LayerKind, LayerSize,
    Predecessor,
};
use crate::activations::Activation;
use crate::matrix::Matrix;

pub struct DropoutLayer {
    pub rate: f64,
    size: LayerSize,
    /// Mask from the last training-phase forward: 0 for dropped entries,
    /// `1/(1-rate)` for survivors.
    mask: Matrix,
}

impl DropoutLayer {
    pub fn new(rate: f64) -> DropoutLayer {
        assert!(
            rate > 0.0 && rate < 1.0,
            "Dropout rate must be strictly between 0 and 1, got {}",
            rate
        );
        DropoutLayer {
            rate,
            size: LayerSize::flat(0),
            mask: Matrix::zeros(0, 0),
        }
    }

    pub fn output_size(&self) -> LayerSize {
        self.size
    }

    pub fn init(&mut self, previous: &Predecessor) {
        assert!(
            matches!(
                previous.kind,
                LayerKind::Dense | LayerKind::Conv2d | LayerKind::MaxPool2d
            ),
            "A Dropout layer cannot follow a {:?} layer",
            previous.kind
        );
        self.size = previous.size;
    }

    pub fn forward(&mut self, input: &Matrix, training: bool) -> Matrix {
        if !training {
            return input.clone();
        }
        let scale = 1.0 / (1.0 - self.rate);
        let mut rng = rand::thread_rng();
        let mask_data = (0..input.data.len())
            .map(|_| {
                if rng.gen_range(0.0..1.0) < self.rate {
                    0.0
                } else {
                    scale
                }
            })
            .collect();
        self.mask = Matrix::from_vec(input.rows, input.cols, mask_data);
        input.hadamard(&self.mask)
    }

    pub fn backward(&mut self, grad: &Matrix) -> Matrix {
        assert!(
            grad.rows == self.mask.rows && grad.cols == self.mask.cols,
            "Dropout backward shape [{}, {}] doesn't match the forward mask [{}, {}]",
            grad.rows,
            grad.cols,
            self.mask.rows,
            self.mask.cols
        );
        grad.hadamard(&self.mask)
    }

    pub fn save<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_i32(w, LayerKind::Dropout.code())?;
        write_bool(w, false)?;
        write_f64(w, self.rate)?;
        write_i32(w, Activation::Identity.code())?;
        // No parameters
        write_i32(w, 0)?;
        write_i32(w, 0)?;
        write_i32(w, 0)?;
        Ok(())
    }

    pub fn load<R: Read>(r: &mut R) -> io::Result<DropoutLayer> {
        let _trainable = read_bool(r)?;
        let rate = read_f64(r)?;
        let _activation = read_dim(r)?;
        let _wrows = read_dim(r)?;
        let _wcols = read_dim(r)?;
        let _brows = read_dim(r)?;
        Ok(DropoutLayer::new(rate))
    }
}
