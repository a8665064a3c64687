//! Activation Functions
//!
//! Stateless forward/backward transforms applied to a layer's linear output
//! (the "logits"). Every activation is shape-preserving: the output has the
//! same dimensions as the input, and so does the gradient produced by the
//! backward pass.
//!
//! ## Contract
//!
//! ```text
//! forward(logits)                   -> activations   (same shape)
//! backward(logits, grad_from_next)  -> grad_to_pass  (same shape)
//! ```
//!
//! `backward` receives the logits from the matching forward call and the
//! gradient flowing back from the next layer, and multiplies in the
//! activation's Jacobian.
//!
//! ## Variants
//!
//! - **Identity**: passthrough both ways
//! - **Sigmoid**: `1/(1+exp(-x))`; backward is `s(x) * (1 - s(x)) * G`
//! - **Relu**: `max(x, 0)`; backward passes G where x > 0, zero elsewhere
//! - **Softmax**: `exp(x) / col_sum(exp(x))` per column (each column is one
//!   observation's logits); backward is the softmax Jacobian-vector product
//!   `a * (G - col_sum(a ⊙ G))`
//!
//! Softmax exponentiates the raw logits without subtracting the per-column
//! maximum, so very large logits can overflow to infinity.

use crate::matrix::Matrix;
use serde::{Deserialize, Serialize};

/// Activation function selector.
///
/// Constructed from a name via [`Activation::from_name`]; an unknown name is
/// a configuration error and panics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Identity,
    Sigmoid,
    Relu,
    Softmax,
}

impl Activation {
    /// Look up an activation by name.
    ///
    /// # Panics
    ///
    /// Panics on an unknown name. Network topology is programmer-supplied,
    /// so a bad name is fatal rather than recoverable.
    pub fn from_name(name: &str) -> Activation {
        match name {
            "identity" | "linear" => Activation::Identity,
            "sigmoid" => Activation::Sigmoid,
            "relu" => Activation::Relu,
            "softmax" => Activation::Softmax,
            other => panic!("Unknown activation function: {:?}", other),
        }
    }

    /// Integer code used in the model file format.
    pub fn code(self) -> i32 {
        match self {
            Activation::Identity => 0,
            Activation::Sigmoid => 1,
            Activation::Relu => 2,
            Activation::Softmax => 3,
        }
    }

    /// Inverse of [`Activation::code`], used when loading a model.
    pub fn from_code(code: i32) -> Activation {
        match code {
            0 => Activation::Identity,
            1 => Activation::Sigmoid,
            2 => Activation::Relu,
            3 => Activation::Softmax,
            other => panic!("Unknown activation code in model file: {}", other),
        }
    }

    /// Apply the activation to a logit matrix.
    pub fn forward(self, logits: &Matrix) -> Matrix {
        match self {
            Activation::Identity => logits.clone(),
            Activation::Sigmoid => logits.map(|x| 1.0 / (1.0 + (-x).exp())),
            Activation::Relu => logits.map(|x| x.max(0.0)),
            Activation::Softmax => {
                let exps = logits.map(|x| x.exp());
                let mut out = exps.clone();
                for j in 0..out.cols {
                    let mut sum = 0.0;
                    for i in 0..out.rows {
                        sum += exps.get(i, j);
                    }
                    for i in 0..out.rows {
                        out.set(i, j, exps.get(i, j) / sum);
                    }
                }
                out
            }
        }
    }

    /// Multiply the incoming gradient by the activation's Jacobian.
    ///
    /// `logits` must be the matrix passed to the matching [`Activation::forward`]
    /// call; `grad` is the gradient w.r.t. the activation output.
    pub fn backward(self, logits: &Matrix, grad: &Matrix) -> Matrix {
        assert!(
            logits.rows == grad.rows && logits.cols == grad.cols,
            "Activation backward shape mismatch: logits [{}, {}] vs gradient [{}, {}]",
            logits.rows,
            logits.cols,
            grad.rows,
            grad.cols
        );
        match self {
            Activation::Identity => grad.clone(),
            Activation::Sigmoid => {
                let s = self.forward(logits);
                s.map(|v| v * (1.0 - v)).hadamard(grad)
            }
            Activation::Relu => {
                let mut out = grad.clone();
                for (o, &x) in out.data.iter_mut().zip(&logits.data) {
                    if x <= 0.0 {
                        *o = 0.0;
                    }
                }
                out
            }
            Activation::Softmax => {
                // a * (G - col_sum(a ⊙ G)), the Jacobian-vector product
                let a = self.forward(logits);
                let weighted = a.hadamard(grad);
                let mut out = Matrix::zeros(grad.rows, grad.cols);
                for j in 0..grad.cols {
                    let mut dot = 0.0;
                    for i in 0..grad.rows {
                        dot += weighted.get(i, j);
                    }
                    for i in 0..grad.rows {
                        out.set(i, j, a.get(i, j) * (grad.get(i, j) - dot));
                    }
                }
                out
            }
        }
    }
}
