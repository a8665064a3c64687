//! Input Layer
//!
//! A pure shape declaration: it tells the rest of the network what the raw
//! data looks like (flat feature vectors or a `rows x cols x channels`
//! volume) and passes the batch through unchanged after validating it.

use std::io::{self, Read, Write};

use super::{
    read_bool, read_dim, write_bool, write_i32, LayerKind, LayerSize, Predecessor,
};
use crate::activations::Activation;
use crate::matrix::Matrix;

pub struct InputLayer {
    size: LayerSize,
}

impl InputLayer {
    pub fn new(size: LayerSize) -> InputLayer {
        assert!(size.size > 0, "Input layer size must be positive");
        InputLayer { size }
    }

    pub fn output_size(&self) -> LayerSize {
        self.size
    }

    /// Input layers must come first; having a predecessor is a topology error.
    pub fn init(&mut self, previous: Option<&Predecessor>) {
        assert!(
            previous.is_none(),
            "An Input layer must be the first layer of the network"
        );
    }

    /// Validate the batch shape and pass it through.
    pub fn forward(&mut self, input: &Matrix) -> Matrix {
        if self.size.is_flat {
            assert_eq!(
                input.rows, self.size.size,
                "Input batch has {} features per observation, network expects {}",
                input.rows, self.size.size
            );
        } else {
            assert_eq!(
                input.rows,
                self.size.rows * self.size.cols,
                "Input batch has {} spatial positions, network expects {}x{}",
                input.rows,
                self.size.rows,
                self.size.cols
            );
            assert!(
                input.cols % self.size.channels == 0,
                "Input batch columns ({}) must be a multiple of {} channels",
                input.cols,
                self.size.channels
            );
        }
        input.clone()
    }

    pub fn save<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_i32(w, LayerKind::Input.code())?;
        write_bool(w, false)?;
        write_bool(w, self.size.is_flat)?;
        write_i32(w, self.size.rows as i32)?;
        write_i32(w, self.size.cols as i32)?;
        write_i32(w, self.size.channels as i32)?;
        write_i32(w, Activation::Identity.code())?;
        // No parameters
        write_i32(w, 0)?;
        write_i32(w, 0)?;
        write_i32(w, 0)?;
        Ok(())
    }

    pub fn load<R: Read>(r: &mut R) -> io::Result<InputLayer> {
        let _trainable = read_bool(r)?;
        let is_flat = read_bool(r)?;
        let rows = read_dim(r)?;
        let cols = read_dim(r)?;
        let channels = read_dim(r)?;
        let _activation = read_dim(r)?;
        let _wrows = read_dim(r)?;
        let _wcols = read_dim(r)?;
        let _brows = read_dim(r)?;
        let size = if is_flat {
            LayerSize::flat(rows * cols)
        } else {
            LayerSize::spatial(rows, cols, channels)
        };
        Ok(InputLayer::new(size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_is_passthrough() {
        let mut layer = InputLayer::new(LayerSize::flat(3));
        layer.init(None);
        let batch = Matrix::from_vec(3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(layer.forward(&batch), batch);
    }

    #[test]
    #[should_panic(expected = "network expects")]
    fn test_wrong_feature_count_panics() {
        let mut layer = InputLayer::new(LayerSize::flat(4));
        layer.forward(&Matrix::zeros(3, 2));
    }

    #[test]
    #[should_panic(expected = "multiple of")]
    fn test_spatial_channel_mismatch_panics() {
        let mut layer = InputLayer::new(LayerSize::spatial(2, 2, 3));
        layer.forward(&Matrix::zeros(4, 4)); // 4 columns, 3 channels
    }
}
