//! Convolution and Pooling Engine
//!
//! This module computes convolution geometry (output sizes and padding
//! splits) and executes the three correlation operations backpropagation
//! through a convolutional layer needs:
//!
//! 1. **Forward**: input patches x filter weights -> feature maps
//! 2. **Weight gradient**: input patches x output gradient -> filter gradients
//! 3. **Input gradient**: output gradient x rotated filters -> input gradient
//!
//! All three are strided correlations, but the roles of the batch, channel
//! and filter axes differ between them. Instead of mutating one shared
//! geometry struct to repurpose it (the channel count doubles as the batch
//! size during the weight-gradient pass), each operation gets its own
//! independently constructed [`ConvGeometry`], derived from the forward
//! geometry by [`ConvGeometry::weight_gradient`] and
//! [`ConvGeometry::input_gradient`].
//!
//! ## Execution
//!
//! Convolution is executed im2col-style: [`extract_patches`] gathers every
//! kernel window of the (implicitly zero-padded) input into a dense
//! `[output_positions, patch_len]` matrix, which is then multiplied by the
//! flattened filter matrix. Out-of-bounds positions read as zero, so padding
//! is never materialized.
//!
//! ## Backward identities
//!
//! - The filter gradient is a correlation of the input with the output
//!   gradient used as a kernel, dilated by the forward stride. Each input
//!   channel is treated as a separate single-channel observation — the
//!   weight-gradient geometry swaps the channel axis into the batch axis.
//! - The input gradient is a stride-1 correlation of the dilated output
//!   gradient with the filters flipped 180 degrees per channel
//!   ([`rotate_filters`]) under transposed padding (`kernel - 1 - pad` per
//!   side). This is the standard backprop-through-convolution identity.
//!
//! ## Matrix layout
//!
//! Inputs and outputs follow the library-wide packing: rows are flattened
//! spatial positions (`row * width + col`), columns are
//! `observation * channels + channel`.

use crate::matrix::Matrix;
use serde::{Deserialize, Serialize};

/// Split a total padding amount between the two sides of an axis.
///
/// Even totals split evenly; odd totals give the **first** side (top/left)
/// one more pixel than the second.
///
/// # Example
///
/// ```rust
/// use cesario::conv::padding_partitioning;
///
/// assert_eq!(padding_partitioning(4), (2, 2));
/// assert_eq!(padding_partitioning(3), (2, 1));
/// assert_eq!(padding_partitioning(0), (0, 0));
/// ```
pub fn padding_partitioning(total: usize) -> (usize, usize) {
    let second = total / 2;
    (total - second, second)
}

/// Geometry of one correlation operation.
///
/// A pure value struct: every field is fixed at construction. The layer code
/// builds one forward geometry at init time and derives the two backward
/// geometries from it; nothing is mutated in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvGeometry {
    pub input_rows: usize,
    pub input_cols: usize,
    pub input_channels: usize,
    pub kernel_rows: usize,
    pub kernel_cols: usize,
    pub kernel_count: usize,
    pub stride: usize,
    pub pad_top: usize,
    pub pad_bottom: usize,
    pub pad_left: usize,
    pub pad_right: usize,
    pub output_rows: usize,
    pub output_cols: usize,
}

impl ConvGeometry {
    /// Build the forward geometry for a convolution.
    ///
    /// Without padding the output size is `floor((input - kernel)/stride) + 1`
    /// per axis. With padding the output is `ceil(input / stride)` and the
    /// total padding `(output - 1) * stride + kernel - input` is split by
    /// [`padding_partitioning`].
    ///
    /// # Panics
    ///
    /// Panics on zero-sized dimensions, a zero stride, or a kernel larger
    /// than the (padded) input.
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        input_rows: usize,
        input_cols: usize,
        input_channels: usize,
        kernel_count: usize,
        kernel_rows: usize,
        kernel_cols: usize,
        stride: usize,
        padded: bool,
    ) -> ConvGeometry {
        assert!(
            input_rows > 0 && input_cols > 0 && input_channels > 0,
            "Convolution input dimensions must be positive"
        );
        assert!(
            kernel_rows > 0 && kernel_cols > 0 && kernel_count > 0 && stride > 0,
            "Kernel dimensions, kernel count and stride must be positive"
        );

        let (output_rows, pad_top, pad_bottom) =
            Self::axis_geometry(input_rows, kernel_rows, stride, padded);
        let (output_cols, pad_left, pad_right) =
            Self::axis_geometry(input_cols, kernel_cols, stride, padded);

        ConvGeometry {
            input_rows,
            input_cols,
            input_channels,
            kernel_rows,
            kernel_cols,
            kernel_count,
            stride,
            pad_top,
            pad_bottom,
            pad_left,
            pad_right,
            output_rows,
            output_cols,
        }
    }

    /// Output size and padding split along one axis.
    fn axis_geometry(input: usize, kernel: usize, stride: usize, padded: bool) -> (usize, usize, usize) {
        if padded {
            let output = input.div_ceil(stride);
            let covered = (output - 1) * stride + kernel;
            let total = covered.saturating_sub(input);
            let (first, second) = padding_partitioning(total);
            (output, first, second)
        } else {
            assert!(
                kernel <= input,
                "Kernel size {} exceeds unpadded input size {}",
                kernel,
                input
            );
            ((input - kernel) / stride + 1, 0, 0)
        }
    }

    /// Derive the geometry of the weight-gradient correlation.
    ///
    /// The input stays the forward input, but each of its channels becomes a
    /// separate single-channel observation, and the kernels are the output
    /// gradient maps dilated by the forward stride. The output is clamped to
    /// the forward kernel size: when the stride doesn't divide the input
    /// exactly, trailing input positions never contributed to the forward
    /// pass and produce no weight gradient.
    pub fn weight_gradient(&self) -> ConvGeometry {
        ConvGeometry {
            input_rows: self.input_rows,
            input_cols: self.input_cols,
            input_channels: 1,
            kernel_rows: dilated_extent(self.output_rows, self.stride),
            kernel_cols: dilated_extent(self.output_cols, self.stride),
            kernel_count: self.kernel_count,
            stride: 1,
            pad_top: self.pad_top,
            pad_bottom: self.pad_bottom,
            pad_left: self.pad_left,
            pad_right: self.pad_right,
            output_rows: self.kernel_rows,
            output_cols: self.kernel_cols,
        }
    }

    /// Derive the geometry of the input-gradient correlation.
    ///
    /// A stride-1 correlation of the dilated output gradient (channels =
    /// forward kernel count) with the rotated filters (one output channel
    /// per forward input channel), padded with `kernel - 1 - pad` per side —
    /// the transposed padding of the forward pass. The output covers the
    /// input positions the forward pass actually read; the caller
    /// zero-extends to the full input size.
    ///
    /// # Panics
    ///
    /// Panics if any forward padding side reaches the kernel size (cannot
    /// happen for geometries built by [`ConvGeometry::forward`]).
    pub fn input_gradient(&self) -> ConvGeometry {
        assert!(
            self.pad_top < self.kernel_rows
                && self.pad_bottom < self.kernel_rows
                && self.pad_left < self.kernel_cols
                && self.pad_right < self.kernel_cols,
            "Forward padding must stay below the kernel size"
        );
        let dilated_rows = dilated_extent(self.output_rows, self.stride);
        let dilated_cols = dilated_extent(self.output_cols, self.stride);
        let pad_top = self.kernel_rows - 1 - self.pad_top;
        let pad_bottom = self.kernel_rows - 1 - self.pad_bottom;
        let pad_left = self.kernel_cols - 1 - self.pad_left;
        let pad_right = self.kernel_cols - 1 - self.pad_right;
        ConvGeometry {
            input_rows: dilated_rows,
            input_cols: dilated_cols,
            input_channels: self.kernel_count,
            kernel_rows: self.kernel_rows,
            kernel_cols: self.kernel_cols,
            kernel_count: self.input_channels,
            stride: 1,
            pad_top,
            pad_bottom,
            pad_left,
            pad_right,
            output_rows: dilated_rows + pad_top + pad_bottom - self.kernel_rows + 1,
            output_cols: dilated_cols + pad_left + pad_right - self.kernel_cols + 1,
        }
    }

    /// Length of one flattened patch: `channels * kernel_rows * kernel_cols`.
    pub fn patch_len(&self) -> usize {
        self.input_channels * self.kernel_rows * self.kernel_cols
    }

    /// Number of output positions per feature map.
    pub fn output_len(&self) -> usize {
        self.output_rows * self.output_cols
    }
}

/// Spatial extent of a map dilated by `stride` (zeros inserted between
/// neighboring entries): `(size - 1) * stride + 1`.
fn dilated_extent(size: usize, stride: usize) -> usize {
    (size - 1) * stride + 1
}

/// im2col: gather every kernel window of one observation into a dense
/// `[output_positions, patch_len]` matrix.
///
/// Patch entries are channel-major: entry `c * kernel_rows * kernel_cols +
/// u * kernel_cols + v` holds input channel `c` at kernel offset `(u, v)`.
/// Positions that fall into the padding read as zero.
pub fn extract_patches(input: &Matrix, geometry: &ConvGeometry, observation: usize) -> Matrix {
    let channels = geometry.input_channels;
    let kernel_area = geometry.kernel_rows * geometry.kernel_cols;
    let mut patches = Matrix::zeros(geometry.output_len(), geometry.patch_len());

    for i in 0..geometry.output_rows {
        for j in 0..geometry.output_cols {
            let patch = i * geometry.output_cols + j;
            for c in 0..channels {
                let col = observation * channels + c;
                for u in 0..geometry.kernel_rows {
                    let src_r = (i * geometry.stride + u) as isize - geometry.pad_top as isize;
                    if src_r < 0 || src_r >= geometry.input_rows as isize {
                        continue;
                    }
                    for v in 0..geometry.kernel_cols {
                        let src_c =
                            (j * geometry.stride + v) as isize - geometry.pad_left as isize;
                        if src_c < 0 || src_c >= geometry.input_cols as isize {
                            continue;
                        }
                        let src_row = src_r as usize * geometry.input_cols + src_c as usize;
                        patches.set(
                            patch,
                            c * kernel_area + u * geometry.kernel_cols + v,
                            input.get(src_row, col),
                        );
                    }
                }
            }
        }
    }

    patches
}

/// Execute a correlation described by `geometry`.
///
/// - `input`: `[input_rows * input_cols, batch * input_channels]`
/// - `weights`: `[kernel_count, patch_len]`, rows flattened channel-major to
///   match [`extract_patches`]
/// - `biases`: optional `[kernel_count, 1]`, added to every output position
///
/// Returns `[output_rows * output_cols, batch * kernel_count]`.
///
/// # Panics
///
/// Panics if any shape disagrees with the geometry.
pub fn convolve(
    input: &Matrix,
    geometry: &ConvGeometry,
    weights: &Matrix,
    biases: Option<&Matrix>,
) -> Matrix {
    assert_eq!(
        input.rows,
        geometry.input_rows * geometry.input_cols,
        "Convolution input has {} rows, geometry expects {}x{}",
        input.rows,
        geometry.input_rows,
        geometry.input_cols
    );
    assert!(
        input.cols % geometry.input_channels == 0,
        "Convolution input columns ({}) must be a multiple of {} channels",
        input.cols,
        geometry.input_channels
    );
    assert!(
        weights.rows == geometry.kernel_count && weights.cols == geometry.patch_len(),
        "Filter matrix must be [{}, {}], got [{}, {}]",
        geometry.kernel_count,
        geometry.patch_len(),
        weights.rows,
        weights.cols
    );
    if let Some(b) = biases {
        assert!(
            b.rows == geometry.kernel_count && b.cols == 1,
            "Bias must be [{}, 1], got [{}, {}]",
            geometry.kernel_count,
            b.rows,
            b.cols
        );
    }

    let batch = input.cols / geometry.input_channels;
    let filters = geometry.kernel_count;
    let weights_t = weights.transpose();
    let mut output = Matrix::zeros(geometry.output_len(), batch * filters);

    for b in 0..batch {
        let patches = extract_patches(input, geometry, b);
        let block = patches.matmul(&weights_t); // [positions, filters]
        for p in 0..output.rows {
            for f in 0..filters {
                let mut v = block.get(p, f);
                if let Some(bias) = biases {
                    v += bias.get(f, 0);
                }
                output.set(p, b * filters + f, v);
            }
        }
    }

    output
}

/// Dilate feature maps by `stride`: insert `stride - 1` zeros between
/// neighboring entries along both spatial axes.
///
/// `maps` is `[output_rows * output_cols, columns]`; the result is
/// `[dilated_rows * dilated_cols, columns]` with the original values at
/// positions `(i * stride, j * stride)`.
pub fn dilate(maps: &Matrix, output_rows: usize, output_cols: usize, stride: usize) -> Matrix {
    assert_eq!(
        maps.rows,
        output_rows * output_cols,
        "Dilation input has {} rows, expected {}x{}",
        maps.rows,
        output_rows,
        output_cols
    );
    if stride == 1 {
        return maps.clone();
    }
    let dilated_rows = dilated_extent(output_rows, stride);
    let dilated_cols = dilated_extent(output_cols, stride);
    let mut out = Matrix::zeros(dilated_rows * dilated_cols, maps.cols);
    for i in 0..output_rows {
        for j in 0..output_cols {
            let src = i * output_cols + j;
            let dst = (i * stride) * dilated_cols + j * stride;
            for col in 0..maps.cols {
                out.set(dst, col, maps.get(src, col));
            }
        }
    }
    out
}

/// Flip each filter 180 degrees per channel and swap the filter and channel
/// axes.
///
/// The forward filter matrix is `[kernel_count, channels * kh * kw]`. The
/// result is `[channels, kernel_count * kh * kw]` where
///
/// ```text
/// out[c, f * kh * kw + u * kw + v] = in[f, c * kh * kw + (kh-1-u) * kw + (kw-1-v)]
/// ```
///
/// ready to drive the input-gradient correlation (its "channels" are the
/// forward filters, its "filters" are the forward input channels).
pub fn rotate_filters(
    weights: &Matrix,
    channels: usize,
    kernel_rows: usize,
    kernel_cols: usize,
) -> Matrix {
    let filters = weights.rows;
    let area = kernel_rows * kernel_cols;
    assert_eq!(
        weights.cols,
        channels * area,
        "Filter matrix has {} columns, expected {} channels x {}x{}",
        weights.cols,
        channels,
        kernel_rows,
        kernel_cols
    );
    let mut out = Matrix::zeros(channels, filters * area);
    for f in 0..filters {
        for c in 0..channels {
            for u in 0..kernel_rows {
                for v in 0..kernel_cols {
                    let src = c * area + (kernel_rows - 1 - u) * kernel_cols + (kernel_cols - 1 - v);
                    out.set(c, f * area + u * kernel_cols + v, weights.get(f, src));
                }
            }
        }
    }
    out
}

/// Geometry of one max-pooling operation.
///
/// Channels pass through pooling unchanged, so there is no filter axis; the
/// output keeps the input's channel count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolGeometry {
    pub input_rows: usize,
    pub input_cols: usize,
    pub channels: usize,
    pub kernel_rows: usize,
    pub kernel_cols: usize,
    pub stride: usize,
    pub pad_top: usize,
    pub pad_bottom: usize,
    pub pad_left: usize,
    pub pad_right: usize,
    pub output_rows: usize,
    pub output_cols: usize,
}

impl PoolGeometry {
    /// Build pooling geometry; same output-size and padding-split rules as
    /// [`ConvGeometry::forward`].
    pub fn new(
        input_rows: usize,
        input_cols: usize,
        channels: usize,
        kernel_size: usize,
        stride: usize,
        padded: bool,
    ) -> PoolGeometry {
        assert!(
            input_rows > 0 && input_cols > 0 && channels > 0,
            "Pooling input dimensions must be positive"
        );
        assert!(
            kernel_size > 0 && stride > 0,
            "Pooling kernel size and stride must be positive"
        );
        let (output_rows, pad_top, pad_bottom) =
            ConvGeometry::axis_geometry(input_rows, kernel_size, stride, padded);
        let (output_cols, pad_left, pad_right) =
            ConvGeometry::axis_geometry(input_cols, kernel_size, stride, padded);
        PoolGeometry {
            input_rows,
            input_cols,
            channels,
            kernel_rows: kernel_size,
            kernel_cols: kernel_size,
            stride,
            pad_top,
            pad_bottom,
            pad_left,
            pad_right,
            output_rows,
            output_cols,
        }
    }

    /// Number of output positions per channel.
    pub fn output_len(&self) -> usize {
        self.output_rows * self.output_cols
    }
}

/// Max-pooling forward pass with argmax tracking.
///
/// For each output position the kernel window is scanned row-major; the
/// maximum value and its flat spatial source index are recorded. Ties break
/// to the first occurrence (strictly-greater comparison). Padding positions
/// behave as `-inf` and are never selected.
///
/// Returns the pooled `[output_len, batch * channels]` matrix and the argmax
/// indices, one per output element, indexed `position * output.cols + column`.
pub fn max_pool(input: &Matrix, geometry: &PoolGeometry) -> (Matrix, Vec<usize>) {
    assert_eq!(
        input.rows,
        geometry.input_rows * geometry.input_cols,
        "Pooling input has {} rows, geometry expects {}x{}",
        input.rows,
        geometry.input_rows,
        geometry.input_cols
    );
    assert!(
        input.cols % geometry.channels == 0,
        "Pooling input columns ({}) must be a multiple of {} channels",
        input.cols,
        geometry.channels
    );

    let mut output = Matrix::zeros(geometry.output_len(), input.cols);
    let mut indices = vec![usize::MAX; output.rows * output.cols];

    for col in 0..input.cols {
        for i in 0..geometry.output_rows {
            for j in 0..geometry.output_cols {
                let mut best = f64::NEG_INFINITY;
                let mut best_idx = usize::MAX;
                for u in 0..geometry.kernel_rows {
                    let src_r = (i * geometry.stride + u) as isize - geometry.pad_top as isize;
                    if src_r < 0 || src_r >= geometry.input_rows as isize {
                        continue;
                    }
                    for v in 0..geometry.kernel_cols {
                        let src_c =
                            (j * geometry.stride + v) as isize - geometry.pad_left as isize;
                        if src_c < 0 || src_c >= geometry.input_cols as isize {
                            continue;
                        }
                        let src = src_r as usize * geometry.input_cols + src_c as usize;
                        let val = input.get(src, col);
                        if val > best {
                            best = val;
                            best_idx = src;
                        }
                    }
                }
                assert!(best_idx != usize::MAX, "Pooling window fell entirely into padding");
                let p = i * geometry.output_cols + j;
                output.set(p, col, best);
                indices[p * output.cols + col] = best_idx;
            }
        }
    }

    (output, indices)
}

/// Max-pooling backward pass: route each output gradient to the input
/// position recorded as that window's argmax. Overlapping windows accumulate.
pub fn max_pool_backward(grad: &Matrix, indices: &[usize], geometry: &PoolGeometry) -> Matrix {
    assert_eq!(
        grad.rows,
        geometry.output_len(),
        "Pooling gradient has {} rows, geometry expects {}",
        grad.rows,
        geometry.output_len()
    );
    assert_eq!(
        indices.len(),
        grad.rows * grad.cols,
        "Argmax index count doesn't match the gradient shape"
    );

    let mut out = Matrix::zeros(geometry.input_rows * geometry.input_cols, grad.cols);
    for p in 0..grad.rows {
        for col in 0..grad.cols {
            let src = indices[p * grad.cols + col];
            out.data[src * grad.cols + col] += grad.get(p, col);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct sliding-window convolution over an explicitly zero-padded
    /// input. Deliberately shares no code with the im2col path.
    fn naive_convolve(
        input: &Matrix,
        g: &ConvGeometry,
        weights: &Matrix,
        biases: Option<&Matrix>,
    ) -> Matrix {
        let batch = input.cols / g.input_channels;
        let padded_rows = g.input_rows + g.pad_top + g.pad_bottom;
        let padded_cols = g.input_cols + g.pad_left + g.pad_right;
        let area = g.kernel_rows * g.kernel_cols;
        let mut out = Matrix::zeros(g.output_len(), batch * g.kernel_count);

        for b in 0..batch {
            // Materialize the padded observation, one plane per channel
            let mut padded = vec![vec![0.0; padded_rows * padded_cols]; g.input_channels];
            for c in 0..g.input_channels {
                for r in 0..g.input_rows {
                    for q in 0..g.input_cols {
                        padded[c][(r + g.pad_top) * padded_cols + (q + g.pad_left)] =
                            input.get(r * g.input_cols + q, b * g.input_channels + c);
                    }
                }
            }
            for f in 0..g.kernel_count {
                for i in 0..g.output_rows {
                    for j in 0..g.output_cols {
                        let mut sum = biases.map_or(0.0, |bs| bs.get(f, 0));
                        for c in 0..g.input_channels {
                            for u in 0..g.kernel_rows {
                                for v in 0..g.kernel_cols {
                                    sum += weights.get(f, c * area + u * g.kernel_cols + v)
                                        * padded[c][(i * g.stride + u) * padded_cols
                                            + (j * g.stride + v)];
                                }
                            }
                        }
                        out.set(i * g.output_cols + j, b * g.kernel_count + f, sum);
                    }
                }
            }
        }
        out
    }

    fn arbitrary_matrix(rows: usize, cols: usize, seed: u64) -> Matrix {
        // Deterministic pseudo-random fill
        let mut state = seed;
        let data = (0..rows * cols)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) as f64 / (1u64 << 31) as f64) - 0.5
            })
            .collect();
        Matrix::from_vec(rows, cols, data)
    }

    #[test]
    fn test_padding_partitioning_split() {
        assert_eq!(padding_partitioning(0), (0, 0));
        assert_eq!(padding_partitioning(1), (1, 0));
        assert_eq!(padding_partitioning(2), (1, 1));
        assert_eq!(padding_partitioning(5), (3, 2));
    }

    #[test]
    fn test_forward_geometry_unpadded() {
        let g = ConvGeometry::forward(7, 5, 1, 1, 3, 2, 2, false);
        assert_eq!(g.output_rows, 3); // (7 - 3)/2 + 1
        assert_eq!(g.output_cols, 2); // (5 - 2)/2 + 1
        assert_eq!(g.pad_top + g.pad_bottom + g.pad_left + g.pad_right, 0);
    }

    #[test]
    fn test_forward_geometry_padded_covers_input() {
        let g = ConvGeometry::forward(5, 5, 1, 1, 3, 3, 2, true);
        assert_eq!(g.output_rows, 3); // ceil(5/2)
        // total pad = (3-1)*2 + 3 - 5 = 2, split 1/1
        assert_eq!((g.pad_top, g.pad_bottom), (1, 1));

        let g = ConvGeometry::forward(6, 6, 1, 1, 3, 3, 1, true);
        assert_eq!(g.output_rows, 6);
        // total pad = 5 + 3 - 6 = 2 -> 1/1
        assert_eq!((g.pad_top, g.pad_bottom), (1, 1));

        let g = ConvGeometry::forward(5, 5, 1, 1, 4, 4, 1, true);
        // total pad = 4 + 4 - 5 = 3 -> first side gets the ceiling
        assert_eq!((g.pad_top, g.pad_bottom), (2, 1));
    }

    #[test]
    fn test_im2col_matches_naive_convolution() {
        // (rows, cols, kh, kw, stride, padded, channels, filters, batch)
        let cases = [
            (5, 5, 3, 3, 1, false, 1, 1, 1),
            (5, 5, 3, 3, 1, true, 1, 1, 1),
            (6, 4, 3, 2, 1, false, 1, 2, 1), // non-square kernel
            (6, 4, 3, 2, 1, true, 1, 2, 2),
            (7, 7, 3, 3, 2, false, 1, 2, 1), // strided
            (7, 7, 3, 3, 2, true, 2, 3, 2),  // strided + padded + multi-channel
            (5, 6, 2, 2, 2, false, 3, 2, 3), // multi-channel, multi-observation
            (8, 8, 5, 5, 3, true, 2, 4, 2),
            (4, 4, 4, 4, 1, false, 1, 1, 1), // kernel == input
        ];

        for (idx, &(rows, cols, kh, kw, stride, padded, channels, filters, batch)) in
            cases.iter().enumerate()
        {
            let g = ConvGeometry::forward(rows, cols, channels, filters, kh, kw, stride, padded);
            let input = arbitrary_matrix(rows * cols, batch * channels, 7 + idx as u64);
            let weights = arbitrary_matrix(filters, g.patch_len(), 101 + idx as u64);
            let biases = arbitrary_matrix(filters, 1, 211 + idx as u64);

            let fast = convolve(&input, &g, &weights, Some(&biases));
            let slow = naive_convolve(&input, &g, &weights, Some(&biases));

            assert_eq!(fast.rows, slow.rows);
            assert_eq!(fast.cols, slow.cols);
            for (a, b) in fast.data.iter().zip(&slow.data) {
                assert!(
                    (a - b).abs() < 1e-12,
                    "case {}: im2col {} vs naive {}",
                    idx,
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_weight_gradient_geometry_roles() {
        let g = ConvGeometry::forward(6, 6, 3, 4, 3, 3, 1, false);
        let wg = g.weight_gradient();
        // Channels swap into the batch axis
        assert_eq!(wg.input_channels, 1);
        // The gradient map is the kernel
        assert_eq!(wg.kernel_rows, g.output_rows);
        assert_eq!(wg.kernel_cols, g.output_cols);
        // The output is the forward kernel
        assert_eq!(wg.output_rows, g.kernel_rows);
        assert_eq!(wg.output_cols, g.kernel_cols);
        assert_eq!(wg.stride, 1);
    }

    #[test]
    fn test_weight_gradient_geometry_dilates_with_stride() {
        let g = ConvGeometry::forward(7, 7, 1, 2, 3, 3, 2, false);
        let wg = g.weight_gradient();
        assert_eq!(wg.kernel_rows, (g.output_rows - 1) * 2 + 1);
        assert_eq!(wg.output_rows, 3);
    }

    #[test]
    fn test_input_gradient_geometry_transposed_padding() {
        let g = ConvGeometry::forward(5, 5, 2, 3, 3, 3, 1, true);
        let ig = g.input_gradient();
        assert_eq!(ig.input_channels, g.kernel_count);
        assert_eq!(ig.kernel_count, g.input_channels);
        assert_eq!(ig.pad_top, g.kernel_rows - 1 - g.pad_top);
        // Padded stride-1 geometry covers the input exactly
        assert_eq!(ig.output_rows, g.input_rows);
        assert_eq!(ig.output_cols, g.input_cols);
    }

    #[test]
    fn test_rotate_filters_flips_and_swaps_axes() {
        // 1 filter, 1 channel, 2x2 kernel [[1,2],[3,4]] -> [[4,3],[2,1]]
        let w = Matrix::from_vec(1, 4, vec![1.0, 2.0, 3.0, 4.0]);
        let r = rotate_filters(&w, 1, 2, 2);
        assert_eq!(r.data, vec![4.0, 3.0, 2.0, 1.0]);

        // 2 filters, 2 channels: check one entry's bookkeeping
        let w = Matrix::from_vec(2, 8, (0..16).map(|i| i as f64).collect());
        let r = rotate_filters(&w, 2, 2, 2);
        assert_eq!(r.rows, 2); // channels
        assert_eq!(r.cols, 8); // filters * area
        // out[c=1, f=0, u=0, v=0] = in[f=0, c=1, u=1, v=1] = w[0, 1*4 + 3] = 7
        assert_eq!(r.get(1, 0), 7.0);
    }

    #[test]
    fn test_dilate_inserts_zeros() {
        let m = Matrix::from_vec(4, 1, vec![1.0, 2.0, 3.0, 4.0]); // 2x2 map
        let d = dilate(&m, 2, 2, 2);
        assert_eq!(d.rows, 9); // 3x3
        assert_eq!(
            d.data,
            vec![1.0, 0.0, 2.0, 0.0, 0.0, 0.0, 3.0, 0.0, 4.0]
        );
    }

    #[test]
    fn test_max_pool_windows() {
        // 4x4 single-channel input, 2x2 pool, stride 2
        let input = Matrix::from_vec(
            16,
            1,
            vec![
                1.0, 3.0, 2.0, 4.0, //
                5.0, 6.0, 8.0, 7.0, //
                9.0, 2.0, 1.0, 0.0, //
                3.0, 4.0, 5.0, 6.0,
            ],
        );
        let g = PoolGeometry::new(4, 4, 1, 2, 2, false);
        let (out, indices) = max_pool(&input, &g);
        assert_eq!(out.data, vec![6.0, 8.0, 9.0, 6.0]);
        // 6 at (1,1) -> 5; 8 at (1,2) -> 6; 9 at (2,0) -> 8; 6 at (3,3) -> 15
        assert_eq!(indices, vec![5, 6, 8, 15]);
    }

    #[test]
    fn test_max_pool_ties_break_to_first_occurrence() {
        let input = Matrix::from_vec(4, 1, vec![2.0, 2.0, 2.0, 2.0]);
        let g = PoolGeometry::new(2, 2, 1, 2, 2, false);
        let (_, indices) = max_pool(&input, &g);
        assert_eq!(indices, vec![0]); // row-major scan, strictly-greater
    }

    #[test]
    fn test_max_pool_padding_never_selected() {
        // 3x3 input, 2x2 pool, stride 2, padded: output 2x2, one pad row/col
        let input = Matrix::from_vec(
            9,
            1,
            vec![-5.0, -1.0, -3.0, -2.0, -4.0, -6.0, -7.0, -8.0, -9.0],
        );
        let g = PoolGeometry::new(3, 3, 1, 2, 2, true);
        let (out, indices) = max_pool(&input, &g);
        // All values negative; padding (-inf) must never win
        assert_eq!(out.rows, 4);
        for (&v, &idx) in out.data.iter().zip(&indices) {
            assert!(v.is_finite());
            assert!(idx < 9);
        }
    }

    #[test]
    fn test_max_pool_backward_routes_one_nonzero_per_window() {
        let input = arbitrary_matrix(16, 2, 42);
        let g = PoolGeometry::new(4, 4, 1, 2, 2, false);
        let (out, indices) = max_pool(&input, &g);
        let unit = Matrix::filled(out.rows, out.cols, 1.0);
        let routed = max_pool_backward(&unit, &indices, &g);

        // Non-overlapping windows: exactly one nonzero per window per column
        for col in 0..2 {
            let nonzero = (0..16).filter(|&r| routed.get(r, col) != 0.0).count();
            assert_eq!(nonzero, 4);
            for p in 0..out.rows {
                let idx = indices[p * out.cols + col];
                assert_eq!(routed.get(idx, col), 1.0);
            }
        }
    }
}
