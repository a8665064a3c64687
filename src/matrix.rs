//! Dense Matrix Operations
//!
//! This module provides the 2D dense matrix type every other part of the
//! library computes on. A matrix stores `f64` values in row-major order.
//!
//! ## Batching Convention
//!
//! Throughout the library, **columns are observations**:
//!
//! ```text
//! Flat data (e.g. dense layer activations):
//!   rows    = features
//!   columns = observations
//!
//! Spatial data (e.g. conv layer activations):
//!   rows    = flattened spatial positions (row * width + col)
//!   columns = observation_index * channels + channel_index
//! ```
//!
//! So a conv layer producing 8 feature maps of 26x26 pixels for a batch of
//! 32 images yields a 676 x 256 matrix.
//!
//! ## Performance
//!
//! Matrix multiplication uses a cache-blocked algorithm with parallel row
//! processing via Rayon for large matrices, and a plain triple loop below a
//! work threshold where parallel overhead dominates. Element-wise operations
//! parallelize over the flat data.

use rayon::prelude::*;

/// A 2D matrix of `f64` values in row-major order.
///
/// # Fields
///
/// - `data`: flat storage, `data[r * cols + c]` is element (r, c)
/// - `rows`: number of rows
/// - `cols`: number of columns
///
/// # Example
///
/// ```rust
/// use cesario::Matrix;
///
/// let a = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
/// let b = Matrix::from_vec(3, 2, vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
/// let c = a.matmul(&b);
/// assert_eq!(c.rows, 2);
/// assert_eq!(c.cols, 2);
/// assert_eq!(c.get(0, 0), 4.0);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    /// Flat storage of all elements, row-major
    pub data: Vec<f64>,
    /// Number of rows
    pub rows: usize,
    /// Number of columns
    pub cols: usize,
}

impl Matrix {
    /// Create a matrix from a flat row-major vector.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(
            data.len(),
            rows * cols,
            "Data length ({}) doesn't match {}x{} matrix",
            data.len(),
            rows,
            cols
        );
        Self { data, rows, cols }
    }

    /// Create a matrix filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    /// Create a matrix filled with a constant value.
    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            data: vec![value; rows * cols],
            rows,
            cols,
        }
    }

    /// Element access.
    #[inline(always)]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        debug_assert!(row < self.rows && col < self.cols);
        self.data[row * self.cols + col]
    }

    /// Element mutation.
    #[inline(always)]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        debug_assert!(row < self.rows && col < self.cols);
        self.data[row * self.cols + col] = value;
    }

    /// Inner loop of the blocked matmul, written so LLVM can auto-vectorize.
    #[inline(always)]
    fn matmul_inner(a_val: f64, b: &[f64], result: &mut [f64]) {
        for (r, &b_val) in result.iter_mut().zip(b.iter()) {
            *r += a_val * b_val;
        }
    }

    /// Matrix multiplication.
    ///
    /// For `A @ B` where `A` is `[m, k]` and `B` is `[k, n]`:
    /// - Result shape: `[m, n]`
    /// - Each element `C[i,j] = sum(A[i,l] * B[l,j])` for all l
    ///
    /// # Performance
    ///
    /// - **Small matrices** (< 1K ops): sequential computation
    /// - **Large matrices** (>= 1K ops): parallel cache-blocked algorithm
    ///
    /// # Panics
    ///
    /// Panics if the inner dimensions don't match.
    pub fn matmul(&self, other: &Matrix) -> Matrix {
        assert_eq!(
            self.cols, other.rows,
            "Matrix dimensions incompatible: [{}, {}] @ [{}, {}]",
            self.rows, self.cols, other.rows, other.cols
        );

        let m = self.rows;
        let n = other.cols;
        let k = self.cols;

        // Work threshold balancing parallel overhead against gains
        if m * n * k >= 1_000 {
            return self.matmul_parallel_blocked(other, m, n, k);
        }

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for l in 0..k {
                let a_val = self.data[i * k + l];
                for j in 0..n {
                    result[i * n + j] += a_val * other.data[l * n + j];
                }
            }
        }

        Matrix::from_vec(m, n, result)
    }

    /// Parallel cache-blocked matrix multiplication.
    ///
    /// Processes data in 8x8 blocks that fit in L1 cache and distributes row
    /// blocks across CPU cores via Rayon. Inner loops access memory
    /// sequentially.
    fn matmul_parallel_blocked(&self, other: &Matrix, m: usize, n: usize, k: usize) -> Matrix {
        const BLOCK_SIZE: usize = 8;

        let mut result = vec![0.0; m * n];

        result
            .par_chunks_mut(BLOCK_SIZE * n)
            .enumerate()
            .for_each(|(block_i, result_block)| {
                let i_start = block_i * BLOCK_SIZE;
                let i_end = (i_start + BLOCK_SIZE).min(m);

                for j_start in (0..n).step_by(BLOCK_SIZE) {
                    let j_end = (j_start + BLOCK_SIZE).min(n);

                    for k_start in (0..k).step_by(BLOCK_SIZE) {
                        let k_end = (k_start + BLOCK_SIZE).min(k);

                        for i in i_start..i_end {
                            let row_offset = (i - i_start) * n;
                            for k_idx in k_start..k_end {
                                let a_val = self.data[i * k + k_idx];

                                Self::matmul_inner(
                                    a_val,
                                    &other.data[k_idx * n + j_start..k_idx * n + j_end],
                                    &mut result_block[row_offset + j_start..row_offset + j_end],
                                );
                            }
                        }
                    }
                }
            });

        Matrix::from_vec(m, n, result)
    }

    /// Transpose.
    pub fn transpose(&self) -> Matrix {
        let mut result = vec![0.0; self.rows * self.cols];
        for i in 0..self.rows {
            for j in 0..self.cols {
                result[j * self.rows + i] = self.data[i * self.cols + j];
            }
        }
        Matrix::from_vec(self.cols, self.rows, result)
    }

    /// Element-wise addition.
    ///
    /// # Panics
    ///
    /// Panics if the shapes differ.
    pub fn add(&self, other: &Matrix) -> Matrix {
        self.zip_with(other, "addition", |a, b| a + b)
    }

    /// Element-wise subtraction.
    pub fn sub(&self, other: &Matrix) -> Matrix {
        self.zip_with(other, "subtraction", |a, b| a - b)
    }

    /// Element-wise (Hadamard) product.
    pub fn hadamard(&self, other: &Matrix) -> Matrix {
        self.zip_with(other, "hadamard product", |a, b| a * b)
    }

    fn zip_with<F>(&self, other: &Matrix, op: &str, f: F) -> Matrix
    where
        F: Fn(f64, f64) -> f64 + Sync + Send,
    {
        assert!(
            self.rows == other.rows && self.cols == other.cols,
            "Shape mismatch for {}: [{}, {}] vs [{}, {}]",
            op,
            self.rows,
            self.cols,
            other.rows,
            other.cols
        );
        let result = self
            .data
            .par_iter()
            .zip(&other.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Matrix::from_vec(self.rows, self.cols, result)
    }

    /// Multiply all elements by a scalar.
    pub fn scale(&self, scalar: f64) -> Matrix {
        let result = self.data.par_iter().map(|&x| x * scalar).collect();
        Matrix::from_vec(self.rows, self.cols, result)
    }

    /// Apply a function to every element.
    pub fn map<F>(&self, f: F) -> Matrix
    where
        F: Fn(f64) -> f64 + Sync + Send,
    {
        let result = self.data.par_iter().map(|&x| f(x)).collect();
        Matrix::from_vec(self.rows, self.cols, result)
    }

    /// Add a column vector to every column (bias broadcast).
    ///
    /// `column` must be `[rows, 1]`.
    pub fn add_column_broadcast(&self, column: &Matrix) -> Matrix {
        assert!(
            column.rows == self.rows && column.cols == 1,
            "Broadcast column must be [{}, 1], got [{}, {}]",
            self.rows,
            column.rows,
            column.cols
        );
        let cols = self.cols;
        let result = self
            .data
            .par_iter()
            .enumerate()
            .map(|(i, &x)| x + column.data[i / cols])
            .collect();
        Matrix::from_vec(self.rows, self.cols, result)
    }

    /// Sum every row into a `[rows, 1]` column vector.
    pub fn row_sums(&self) -> Matrix {
        let sums: Vec<f64> = (0..self.rows)
            .map(|i| self.data[i * self.cols..(i + 1) * self.cols].iter().sum())
            .collect();
        Matrix::from_vec(self.rows, 1, sums)
    }

    /// L2 norm over all elements.
    pub fn norm(&self) -> f64 {
        self.data.par_iter().map(|&v| v * v).sum::<f64>().sqrt()
    }

    /// Copy a contiguous range of columns into a new matrix.
    pub fn columns(&self, start: usize, end: usize) -> Matrix {
        assert!(
            start <= end && end <= self.cols,
            "Column range {}..{} out of bounds for {} columns",
            start,
            end,
            self.cols
        );
        let width = end - start;
        let mut data = Vec::with_capacity(self.rows * width);
        for i in 0..self.rows {
            data.extend_from_slice(&self.data[i * self.cols + start..i * self.cols + end]);
        }
        Matrix::from_vec(self.rows, width, data)
    }

    /// Flatten a spatial batch into the flat per-observation layout.
    ///
    /// Input columns are packed `observation * channels + channel` with
    /// `rows` spatial positions. The result has one column per observation
    /// and `channels * rows` features, ordered channel-major:
    ///
    /// ```text
    /// out[channel * spatial + position, obs] = in[position, obs * channels + channel]
    /// ```
    pub fn flatten_observations(&self, channels: usize) -> Matrix {
        assert!(
            channels > 0 && self.cols % channels == 0,
            "Column count {} is not a multiple of {} channels",
            self.cols,
            channels
        );
        let spatial = self.rows;
        let batch = self.cols / channels;
        let mut out = Matrix::zeros(channels * spatial, batch);
        for p in 0..spatial {
            for b in 0..batch {
                for c in 0..channels {
                    out.data[(c * spatial + p) * batch + b] =
                        self.data[p * self.cols + b * channels + c];
                }
            }
        }
        out
    }

    /// Inverse of [`Matrix::flatten_observations`].
    ///
    /// Takes a flat `[channels * spatial, batch]` matrix and restores the
    /// spatial `[spatial, batch * channels]` column packing.
    pub fn unflatten_observations(&self, spatial: usize, channels: usize) -> Matrix {
        assert_eq!(
            self.rows,
            spatial * channels,
            "Cannot unflatten {} rows into {} positions x {} channels",
            self.rows,
            spatial,
            channels
        );
        let batch = self.cols;
        let mut out = Matrix::zeros(spatial, batch * channels);
        for p in 0..spatial {
            for b in 0..batch {
                for c in 0..channels {
                    out.data[p * out.cols + b * channels + c] =
                        self.data[(c * spatial + p) * batch + b];
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_small() {
        let a = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = Matrix::from_vec(3, 2, vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let c = a.matmul(&b);
        assert_eq!(c.data, vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_blocked_matches_naive() {
        // Large enough to trigger the parallel blocked path
        let m = 17;
        let k = 23;
        let n = 19;
        let a = Matrix::from_vec(m, k, (0..m * k).map(|i| (i % 7) as f64 - 3.0).collect());
        let b = Matrix::from_vec(k, n, (0..k * n).map(|i| (i % 5) as f64 * 0.5).collect());
        let c = a.matmul(&b);

        for i in 0..m {
            for j in 0..n {
                let mut expected = 0.0;
                for l in 0..k {
                    expected += a.get(i, l) * b.get(l, j);
                }
                assert!((c.get(i, j) - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_transpose() {
        let a = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let t = a.transpose();
        assert_eq!(t.rows, 3);
        assert_eq!(t.cols, 2);
        assert_eq!(t.get(0, 1), 4.0);
        assert_eq!(t.get(2, 0), 3.0);
    }

    #[test]
    fn test_add_column_broadcast() {
        let a = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let bias = Matrix::from_vec(2, 1, vec![10.0, 20.0]);
        let r = a.add_column_broadcast(&bias);
        assert_eq!(r.data, vec![11.0, 12.0, 13.0, 24.0, 25.0, 26.0]);
    }

    #[test]
    fn test_row_sums() {
        let a = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(a.row_sums().data, vec![6.0, 15.0]);
    }

    #[test]
    fn test_columns_slice() {
        let a = Matrix::from_vec(2, 4, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let b = a.columns(1, 3);
        assert_eq!(b.rows, 2);
        assert_eq!(b.cols, 2);
        assert_eq!(b.data, vec![2.0, 3.0, 6.0, 7.0]);
    }

    #[test]
    fn test_flatten_unflatten_round_trip() {
        // 2 spatial positions, 2 observations, 3 channels
        let spatial = 2;
        let channels = 3;
        let x = Matrix::from_vec(
            spatial,
            6,
            vec![
                1.0, 2.0, 3.0, 4.0, 5.0, 6.0, // position 0: obs0 c0..c2, obs1 c0..c2
                7.0, 8.0, 9.0, 10.0, 11.0, 12.0, // position 1
            ],
        );
        let flat = x.flatten_observations(channels);
        assert_eq!(flat.rows, channels * spatial);
        assert_eq!(flat.cols, 2);
        // Channel-major: feature (c=0, p=0) for obs 0 is x[0, 0]
        assert_eq!(flat.get(0, 0), 1.0);
        // feature (c=1, p=0) for obs 0 is x[0, 1]
        assert_eq!(flat.get(spatial, 0), 2.0);
        // feature (c=0, p=1) for obs 1 is x[1, 3]
        assert_eq!(flat.get(1, 1), 10.0);

        let back = flat.unflatten_observations(spatial, channels);
        assert_eq!(back, x);
    }

    #[test]
    #[should_panic(expected = "Matrix dimensions incompatible")]
    fn test_matmul_shape_mismatch_panics() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(2, 3);
        a.matmul(&b);
    }
}
