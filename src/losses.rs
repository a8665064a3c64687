//! Loss Functions
//!
//! Each loss computes a scalar cost from a prediction matrix and a label
//! matrix, plus the gradient of the cost w.r.t. the predictions that seeds
//! the backward pass.
//!
//! ## Normalization Convention
//!
//! `compute` averages over the batch (the `1/n` factor). `derivative`
//! returns **per-observation** gradients without the `1/n`; the layers fold
//! the batch average into their parameter gradients (`dW = (1/n) dLogit xᵗ`
//! and friends). Keeping the convention consistent across losses and layers
//! is what makes the numerical gradient check line up.
//!
//! ## Label Layouts
//!
//! - `BinaryCrossentropy`: one row of {0, 1} labels
//! - `CategoricalCrossentropy`: one-hot labels, one row per class
//! - `SparseCategoricalCrossentropy`: one row of integer class indices
//!
//! Labels are validated before use; malformed labels are a programmer error
//! and fatal.

use crate::matrix::Matrix;

/// Loss function selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Loss {
    BinaryCrossentropy,
    CategoricalCrossentropy,
    SparseCategoricalCrossentropy,
}

impl Loss {
    /// Look up a loss by name.
    ///
    /// # Panics
    ///
    /// Panics on an unknown name (configuration error, fatal).
    pub fn from_name(name: &str) -> Loss {
        match name {
            "binary_crossentropy" => Loss::BinaryCrossentropy,
            "categorical_crossentropy" => Loss::CategoricalCrossentropy,
            "sparse_categorical_crossentropy" => Loss::SparseCategoricalCrossentropy,
            other => panic!("Unknown loss function: {:?}", other),
        }
    }

    /// Validate that `labels` are well-formed for this loss against
    /// predictions with `class_rows` rows and `batch` columns.
    ///
    /// # Panics
    ///
    /// Panics on malformed labels.
    pub fn validate_labels(self, labels: &Matrix, class_rows: usize, batch: usize) {
        assert_eq!(
            labels.cols, batch,
            "Label batch size {} doesn't match prediction batch size {}",
            labels.cols, batch
        );
        match self {
            Loss::BinaryCrossentropy => {
                assert_eq!(labels.rows, 1, "Binary labels must be a single row");
                for i in 0..labels.cols {
                    let y = labels.get(0, i);
                    assert!(
                        y == 0.0 || y == 1.0,
                        "Binary label at column {} must be 0 or 1, got {}",
                        i,
                        y
                    );
                }
            }
            Loss::CategoricalCrossentropy => {
                assert_eq!(
                    labels.rows, class_rows,
                    "One-hot labels need {} rows, got {}",
                    class_rows, labels.rows
                );
                for j in 0..labels.cols {
                    let mut ones = 0usize;
                    for i in 0..labels.rows {
                        let y = labels.get(i, j);
                        assert!(
                            y == 0.0 || y == 1.0,
                            "One-hot label at ({}, {}) must be 0 or 1, got {}",
                            i,
                            j,
                            y
                        );
                        if y == 1.0 {
                            ones += 1;
                        }
                    }
                    assert_eq!(ones, 1, "Label column {} is not one-hot", j);
                }
            }
            Loss::SparseCategoricalCrossentropy => {
                assert_eq!(labels.rows, 1, "Sparse labels must be a single row");
                for i in 0..labels.cols {
                    let y = labels.get(0, i);
                    assert!(
                        y >= 0.0 && y.fract() == 0.0 && (y as usize) < class_rows,
                        "Sparse label at column {} must be an integer in 0..{}, got {}",
                        i,
                        class_rows,
                        y
                    );
                }
            }
        }
    }

    /// Average loss over the batch.
    pub fn compute(self, predictions: &Matrix, labels: &Matrix) -> f64 {
        self.validate_labels(labels, predictions.rows, predictions.cols);
        let n = predictions.cols as f64;
        match self {
            Loss::BinaryCrossentropy => {
                let mut sum = 0.0;
                for i in 0..predictions.cols {
                    let p = predictions.get(0, i);
                    let y = labels.get(0, i);
                    sum += y * p.ln() + (1.0 - y) * (1.0 - p).ln();
                }
                -sum / n
            }
            Loss::CategoricalCrossentropy => {
                let mut sum = 0.0;
                for j in 0..predictions.cols {
                    for i in 0..predictions.rows {
                        let y = labels.get(i, j);
                        if y != 0.0 {
                            sum += y * predictions.get(i, j).ln();
                        }
                    }
                }
                -sum / n
            }
            Loss::SparseCategoricalCrossentropy => {
                let mut sum = 0.0;
                for i in 0..predictions.cols {
                    let class = labels.get(0, i) as usize;
                    let p = predictions.get(class, i);
                    assert!(
                        p > 0.0,
                        "Predicted probability for the true class of observation {} is 0",
                        i
                    );
                    sum += p.ln();
                }
                -sum / n
            }
        }
    }

    /// Per-observation gradient of the cost w.r.t. the predictions.
    ///
    /// Does NOT include the `1/n` batch average; see the module docs.
    pub fn derivative(self, predictions: &Matrix, labels: &Matrix) -> Matrix {
        self.validate_labels(labels, predictions.rows, predictions.cols);
        match self {
            Loss::BinaryCrossentropy => {
                let mut grad = Matrix::zeros(predictions.rows, predictions.cols);
                for i in 0..predictions.cols {
                    let p = predictions.get(0, i);
                    let y = labels.get(0, i);
                    grad.set(0, i, -y / p + (1.0 - y) / (1.0 - p));
                }
                grad
            }
            Loss::CategoricalCrossentropy => {
                let mut grad = Matrix::zeros(predictions.rows, predictions.cols);
                for j in 0..predictions.cols {
                    for i in 0..predictions.rows {
                        let y = labels.get(i, j);
                        if y != 0.0 {
                            grad.set(i, j, -y / predictions.get(i, j));
                        }
                    }
                }
                grad
            }
            Loss::SparseCategoricalCrossentropy => {
                let mut grad = Matrix::zeros(predictions.rows, predictions.cols);
                for i in 0..predictions.cols {
                    let class = labels.get(0, i) as usize;
                    let p = predictions.get(class, i);
                    assert!(
                        p > 0.0,
                        "Predicted probability for the true class of observation {} is 0",
                        i
                    );
                    grad.set(class, i, -1.0 / p);
                }
                grad
            }
        }
    }

    /// Discretize raw network output into class predictions.
    ///
    /// Binary output is thresholded at 0.5; categorical/sparse variants take
    /// the arg-max row per column. The result is a single-row matrix.
    pub fn predict(self, output: &Matrix) -> Matrix {
        match self {
            Loss::BinaryCrossentropy => {
                let mut out = Matrix::zeros(1, output.cols);
                for i in 0..output.cols {
                    out.set(0, i, if output.get(0, i) >= 0.5 { 1.0 } else { 0.0 });
                }
                out
            }
            Loss::CategoricalCrossentropy | Loss::SparseCategoricalCrossentropy => {
                let mut out = Matrix::zeros(1, output.cols);
                for j in 0..output.cols {
                    let mut best = 0usize;
                    let mut best_val = output.get(0, j);
                    for i in 1..output.rows {
                        let v = output.get(i, j);
                        if v > best_val {
                            best_val = v;
                            best = i;
                        }
                    }
                    out.set(0, j, best as f64);
                }
                out
            }
        }
    }

    /// Number of observations whose discretized prediction matches the label.
    pub fn count_correct(self, output: &Matrix, labels: &Matrix) -> usize {
        self.validate_labels(labels, output.rows, output.cols);
        let predicted = self.predict(output);
        let mut correct = 0;
        for i in 0..output.cols {
            let truth = match self {
                Loss::BinaryCrossentropy | Loss::SparseCategoricalCrossentropy => labels.get(0, i),
                Loss::CategoricalCrossentropy => {
                    let mut class = 0usize;
                    for r in 0..labels.rows {
                        if labels.get(r, i) == 1.0 {
                            class = r;
                            break;
                        }
                    }
                    class as f64
                }
            };
            if predicted.get(0, i) == truth {
                correct += 1;
            }
        }
        correct
    }
}
