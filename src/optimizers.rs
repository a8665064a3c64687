//! Optimizers
//!
//! Gradient-descent update rules. Each optimizer turns a parameter gradient
//! into a *delta* the caller adds to the parameter tensor via
//! `increment_weights_and_biases`; the optimizer itself never touches layer
//! state.
//!
//! ## Accumulator keying
//!
//! Every rule except plain SGD carries per-tensor state (momentum buffers,
//! squared-gradient averages, Adam moments). That state is keyed by
//! [`ParamId`], the stable identity a parameter tensor receives when its
//! layer is constructed. Keys are independent of memory addresses, so
//! accumulators survive layers being moved, and two tensors of identical
//! shape can never alias each other's state.
//!
//! Accumulators are created lazily on first update, sized to the gradient.
//! If a tensor's shape changes between updates (a layer re-initialized
//! against a new predecessor), the stale accumulator is discarded and
//! restarted from zero.
//!
//! ## Update rules
//!
//! ```text
//! SGD:      v = momentum * v - lr * g               delta = v
//! AdaGrad:  a += g^2                                delta = -lr * g / (sqrt(a) + eps)
//! RMSProp:  a = decay * a + (1 - decay) * g^2       delta = -lr * g / (sqrt(a) + eps)
//! Adam:     m, v EMAs with bias correction          delta = -lr * m_hat / (sqrt(v_hat) + eps)
//! ```
//!
//! The `eps` floor keeps the divisions finite; there is no error path for a
//! zero denominator.

use std::collections::HashMap;

use crate::layers::ParamId;
use crate::matrix::Matrix;

/// Division floor for the adaptive rules.
const EPSILON: f64 = 1e-8;

/// Per-tensor Adam state: first and second moment EMAs plus the step count
/// driving bias correction.
pub struct AdamSlot {
    first: Matrix,
    second: Matrix,
    step: u64,
}

pub enum Optimizer {
    Sgd {
        learning_rate: f64,
        momentum: f64,
        velocity: HashMap<ParamId, Matrix>,
    },
    AdaGrad {
        learning_rate: f64,
        accumulator: HashMap<ParamId, Matrix>,
    },
    RmsProp {
        learning_rate: f64,
        decay: f64,
        accumulator: HashMap<ParamId, Matrix>,
    },
    Adam {
        learning_rate: f64,
        beta1: f64,
        beta2: f64,
        state: HashMap<ParamId, AdamSlot>,
    },
}

impl Optimizer {
    /// Stochastic gradient descent, optionally with heavy-ball momentum
    /// (`momentum = 0` gives the plain rule).
    pub fn sgd(learning_rate: f64, momentum: f64) -> Optimizer {
        assert!(learning_rate > 0.0, "Learning rate must be positive");
        assert!(
            (0.0..1.0).contains(&momentum),
            "Momentum must be in [0, 1), got {}",
            momentum
        );
        Optimizer::Sgd {
            learning_rate,
            momentum,
            velocity: HashMap::new(),
        }
    }

    pub fn adagrad(learning_rate: f64) -> Optimizer {
        assert!(learning_rate > 0.0, "Learning rate must be positive");
        Optimizer::AdaGrad {
            learning_rate,
            accumulator: HashMap::new(),
        }
    }

    pub fn rmsprop(learning_rate: f64, decay: f64) -> Optimizer {
        assert!(learning_rate > 0.0, "Learning rate must be positive");
        assert!(
            decay > 0.0 && decay < 1.0,
            "RMSProp decay must be strictly between 0 and 1, got {}",
            decay
        );
        Optimizer::RmsProp {
            learning_rate,
            decay,
            accumulator: HashMap::new(),
        }
    }

    pub fn adam(learning_rate: f64, beta1: f64, beta2: f64) -> Optimizer {
        assert!(learning_rate > 0.0, "Learning rate must be positive");
        assert!(
            beta1 > 0.0 && beta1 < 1.0 && beta2 > 0.0 && beta2 < 1.0,
            "Adam betas must be strictly between 0 and 1, got {} and {}",
            beta1,
            beta2
        );
        Optimizer::Adam {
            learning_rate,
            beta1,
            beta2,
            state: HashMap::new(),
        }
    }

    /// Compute the parameter delta for one tensor's gradient.
    ///
    /// The caller applies the returned matrix by addition; repeated calls
    /// with the same `id` advance that tensor's accumulator state.
    pub fn update(&mut self, id: ParamId, grad: &Matrix) -> Matrix {
        match self {
            Optimizer::Sgd {
                learning_rate,
                momentum,
                velocity,
            } => {
                if *momentum == 0.0 {
                    return grad.scale(-*learning_rate);
                }
                let v = sized_entry(velocity, id, grad);
                *v = v.scale(*momentum).sub(&grad.scale(*learning_rate));
                v.clone()
            }
            Optimizer::AdaGrad {
                learning_rate,
                accumulator,
            } => {
                let a = sized_entry(accumulator, id, grad);
                *a = a.add(&grad.hadamard(grad));
                scaled_by_rms(grad, a, *learning_rate)
            }
            Optimizer::RmsProp {
                learning_rate,
                decay,
                accumulator,
            } => {
                let a = sized_entry(accumulator, id, grad);
                *a = a
                    .scale(*decay)
                    .add(&grad.hadamard(grad).scale(1.0 - *decay));
                scaled_by_rms(grad, a, *learning_rate)
            }
            Optimizer::Adam {
                learning_rate,
                beta1,
                beta2,
                state,
            } => {
                let slot = state.entry(id).or_insert_with(|| AdamSlot {
                    first: Matrix::zeros(grad.rows, grad.cols),
                    second: Matrix::zeros(grad.rows, grad.cols),
                    step: 0,
                });
                if slot.first.rows != grad.rows || slot.first.cols != grad.cols {
                    slot.first = Matrix::zeros(grad.rows, grad.cols);
                    slot.second = Matrix::zeros(grad.rows, grad.cols);
                    slot.step = 0;
                }
                slot.step += 1;
                slot.first = slot
                    .first
                    .scale(*beta1)
                    .add(&grad.scale(1.0 - *beta1));
                slot.second = slot
                    .second
                    .scale(*beta2)
                    .add(&grad.hadamard(grad).scale(1.0 - *beta2));

                let correction1 = 1.0 - beta1.powi(slot.step as i32);
                let correction2 = 1.0 - beta2.powi(slot.step as i32);
                let lr = *learning_rate;
                let mut delta = Matrix::zeros(grad.rows, grad.cols);
                for idx in 0..delta.data.len() {
                    let m_hat = slot.first.data[idx] / correction1;
                    let v_hat = slot.second.data[idx] / correction2;
                    delta.data[idx] = -lr * m_hat / (v_hat.sqrt() + EPSILON);
                }
                delta
            }
        }
    }
}

/// Fetch this tensor's accumulator, creating it zeroed on first use and
/// re-zeroing it if the tensor's shape changed.
fn sized_entry<'a>(
    map: &'a mut HashMap<ParamId, Matrix>,
    id: ParamId,
    grad: &Matrix,
) -> &'a mut Matrix {
    let entry = map
        .entry(id)
        .or_insert_with(|| Matrix::zeros(grad.rows, grad.cols));
    if entry.rows != grad.rows || entry.cols != grad.cols {
        *entry = Matrix::zeros(grad.rows, grad.cols);
    }
    entry
}

fn scaled_by_rms(grad: &Matrix, accumulator: &Matrix, learning_rate: f64) -> Matrix {
    let mut delta = Matrix::zeros(grad.rows, grad.cols);
    for idx in 0..delta.data.len() {
        delta.data[idx] = -learning_rate * grad.data[idx] / (accumulator.data[idx].sqrt() + EPSILON);
    }
    delta
}
