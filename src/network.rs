//! Network Orchestrator
//!
//! [`Network`] owns an ordered stack of layers and drives everything the
//! library does with them: initialization against each predecessor,
//! forward/backward propagation, loss and accuracy evaluation, numerical
//! gradient checking, the training loop, and model persistence.
//!
//! ## Lifecycle
//!
//! ```rust,ignore
//! let mut net = Network::new(vec![
//!     Layer::input_2d(28, 28, 1),
//!     Layer::conv2d(8, 3, 1, true, "relu"),
//!     Layer::max_pool2d(2, 2, false),
//!     Layer::dense(10, "softmax"),
//! ]);
//! net.configure("sparse_categorical_crossentropy", Optimizer::adam(0.001, 0.9, 0.999));
//! net.train(&images, &labels, 10, 32, Some("log.csv"))?;
//! net.save_model("model.bin")?;
//! ```
//!
//! The constructor validates that the first layer is an input layer and
//! initializes every subsequent layer against its predecessor. A forward
//! pass stores each layer's output and marks the network forward-valid;
//! parameter updates invalidate that state, and evaluation helpers re-run
//! the forward pass (with a warning) when asked for metrics while stale.
//!
//! ## Gradient checking
//!
//! [`Network::check_gradients`] is the correctness oracle for every
//! backward implementation: it perturbs each parameter element by
//! `±epsilon`, re-runs the forward pass and loss, and compares the
//! central-difference estimate against the analytic gradient using the
//! norm-relative error `|a - n| / (|a| + |n|)`. Dropout layers re-draw
//! their masks on every forward call, so networks containing dropout
//! cannot be gradient-checked meaningfully.
//!
//! ## Model files
//!
//! `CESARIO_NET` magic, format version byte, a length-prefixed JSON
//! summary of the stack (human-readable provenance), a `u32` layer count,
//! then each layer's binary record. Loading rebuilds the layers from their
//! type codes and re-runs the init chain with `reset_parameters = false`,
//! which restores geometries and gradient buffers while preserving the
//! trained parameters.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};

use serde::{Deserialize, Serialize};

use crate::layers::{Layer, LayerKind, Predecessor};
use crate::logger::TrainingLogger;
use crate::losses::Loss;
use crate::matrix::Matrix;
use crate::optimizers::Optimizer;

const MODEL_MAGIC: &[u8; 11] = b"CESARIO_NET";
const FORMAT_VERSION: u8 = 1;

/// Human-readable stack summary stored inside the model file.
#[derive(Serialize, Deserialize)]
struct ModelHeader {
    layer_kinds: Vec<String>,
    layer_sizes: Vec<usize>,
}

pub struct Network {
    layers: Vec<Layer>,
    /// Per-layer outputs from the last forward pass; `outputs[0]` is the
    /// validated input batch.
    outputs: Vec<Matrix>,
    loss: Option<Loss>,
    optimizer: Option<Optimizer>,
    forward_valid: bool,
}

impl Network {
    /// Build a network from an ordered layer stack.
    ///
    /// # Panics
    ///
    /// Panics if the stack is empty, the first layer is not an input
    /// layer, any later layer is an input layer, or any adjacent pair is
    /// incompatible.
    pub fn new(layers: Vec<Layer>) -> Network {
        assert!(!layers.is_empty(), "A network needs at least one layer");
        assert!(
            layers[0].kind() == LayerKind::Input,
            "The first layer of a network must be an Input layer, got {:?}",
            layers[0].kind()
        );
        for layer in &layers[1..] {
            assert!(
                layer.kind() != LayerKind::Input,
                "Only the first layer of a network may be an Input layer"
            );
        }
        let mut network = Network {
            layers,
            outputs: Vec::new(),
            loss: None,
            optimizer: None,
            forward_valid: false,
        };
        network.init_chain(true);
        network
    }

    /// Run `init` down the stack, handing each layer its predecessor's
    /// kind, shape and activation.
    fn init_chain(&mut self, reset_parameters: bool) {
        let mut previous: Option<Predecessor> = None;
        for layer in &mut self.layers {
            layer.init(previous.as_ref(), reset_parameters);
            previous = Some(Predecessor {
                kind: layer.kind(),
                size: layer.output_size(),
                activation: layer.activation(),
            });
        }
    }

    /// Attach the loss function and optimizer. Must be called before
    /// training or evaluation.
    pub fn configure(&mut self, loss_name: &str, optimizer: Optimizer) {
        self.loss = Some(Loss::from_name(loss_name));
        self.optimizer = Some(optimizer);
    }

    fn loss_fn(&self) -> Loss {
        match self.loss {
            Some(l) => l,
            None => panic!("Network is not configured: call configure() with a loss first"),
        }
    }

    /// Run the batch through every layer, storing each output.
    pub fn forward_propagation(&mut self, batch: &Matrix, training: bool) {
        self.forward_valid = false;
        self.outputs.clear();
        let validated = self.layers[0].forward(batch, training);
        self.outputs.push(validated);
        for i in 1..self.layers.len() {
            let out = self.layers[i].forward(&self.outputs[i - 1], training);
            self.outputs.push(out);
        }
        self.forward_valid = true;
    }

    /// The last layer's output from the most recent forward pass.
    pub fn output(&self) -> &Matrix {
        assert!(
            self.forward_valid,
            "Network output requested before a forward pass"
        );
        self.outputs.last().unwrap_or_else(|| unreachable!())
    }

    /// Backward-propagate the loss gradient from the last layer to the
    /// first, leaving each trainable layer's parameter gradients filled in.
    pub fn backward_propagation(&mut self, labels: &Matrix) {
        assert!(
            self.forward_valid,
            "Backward propagation requires a completed forward pass"
        );
        let loss = self.loss_fn();
        let mut grad = loss.derivative(self.outputs.last().unwrap_or_else(|| unreachable!()), labels);
        for i in (1..self.layers.len()).rev() {
            grad = self.layers[i].backward(&grad, &self.outputs[i - 1]);
        }
    }

    /// Average loss over the batch, re-running the forward pass (with a
    /// warning) if the network state is stale.
    pub fn get_loss(&mut self, batch: &Matrix, labels: &Matrix) -> f64 {
        self.refresh_forward(batch);
        self.loss_fn().compute(self.output(), labels)
    }

    /// Fraction of observations whose discretized prediction matches the
    /// labels, re-running the forward pass (with a warning) if stale.
    pub fn get_accuracy(&mut self, batch: &Matrix, labels: &Matrix) -> f64 {
        self.refresh_forward(batch);
        let correct = self.loss_fn().count_correct(self.output(), labels);
        correct as f64 / labels.cols as f64
    }

    /// Discretized predictions for a batch (inference phase).
    pub fn predict(&mut self, batch: &Matrix) -> Matrix {
        self.forward_propagation(batch, false);
        self.loss_fn().predict(self.output())
    }

    fn refresh_forward(&mut self, batch: &Matrix) {
        if !self.forward_valid {
            eprintln!("Warning: network state is stale, re-running the forward pass");
            self.forward_propagation(batch, false);
        }
    }

    /// Verify every trainable layer's analytic gradients against central
    /// differences.
    ///
    /// For each parameter tensor the whole-tensor norm-relative error
    /// `|analytic - numeric| / (|analytic| + |numeric|)` must stay at or
    /// below `threshold` (1e-8 with `epsilon = 1e-5` is attainable for all
    /// layers in f64). Returns `true` when every tensor passes; failures
    /// are reported per layer on stderr.
    pub fn check_gradients(
        &mut self,
        batch: &Matrix,
        labels: &Matrix,
        epsilon: f64,
        threshold: f64,
    ) -> bool {
        self.forward_propagation(batch, true);
        self.backward_propagation(labels);

        let mut all_ok = true;
        for idx in 0..self.layers.len() {
            let (analytic_w, analytic_b) = match self.layers[idx].parameter_gradients() {
                Some(((_, wg), (_, bg))) => (wg.clone(), bg.clone()),
                None => continue,
            };
            let numeric_w = self.numeric_gradient(idx, true, batch, labels, epsilon);
            let numeric_b = self.numeric_gradient(idx, false, batch, labels, epsilon);

            for (name, analytic, numeric) in [
                ("weights", &analytic_w, &numeric_w),
                ("biases", &analytic_b, &numeric_b),
            ] {
                let denom = analytic.norm() + numeric.norm();
                let error = if denom == 0.0 {
                    0.0
                } else {
                    analytic.sub(numeric).norm() / denom
                };
                if error > threshold {
                    eprintln!(
                        "Gradient check failed for layer {} {}: relative error {:e}",
                        idx, name, error
                    );
                    all_ok = false;
                }
            }
        }
        all_ok
    }

    /// Central-difference gradient of the loss w.r.t. one parameter tensor.
    fn numeric_gradient(
        &mut self,
        layer_idx: usize,
        weights: bool,
        batch: &Matrix,
        labels: &Matrix,
        epsilon: f64,
    ) -> Matrix {
        let (rows, cols) = {
            let (w, b) = self.layers[layer_idx]
                .parameters()
                .unwrap_or_else(|| unreachable!());
            let t = if weights { w } else { b };
            (t.rows, t.cols)
        };
        let mut numeric = Matrix::zeros(rows, cols);
        for e in 0..rows * cols {
            let plus = self.perturbed_loss(layer_idx, weights, e, epsilon, batch, labels);
            let minus = self.perturbed_loss(layer_idx, weights, e, -epsilon, batch, labels);
            numeric.data[e] = (plus - minus) / (2.0 * epsilon);
        }
        numeric
    }

    fn perturbed_loss(
        &mut self,
        layer_idx: usize,
        weights: bool,
        element: usize,
        delta: f64,
        batch: &Matrix,
        labels: &Matrix,
    ) -> f64 {
        self.nudge(layer_idx, weights, element, delta);
        self.forward_propagation(batch, true);
        let value = self.loss_fn().compute(self.output(), labels);
        self.nudge(layer_idx, weights, element, -delta);
        value
    }

    fn nudge(&mut self, layer_idx: usize, weights: bool, element: usize, delta: f64) {
        let (w, b) = self.layers[layer_idx]
            .parameters_mut()
            .unwrap_or_else(|| unreachable!());
        let t = if weights { w } else { b };
        t.data[element] += delta;
    }

    /// Mini-batch training loop: forward, backward, optimizer update per
    /// trainable layer, repeated over `epochs` passes of the dataset.
    /// Per-epoch loss and accuracy over the full dataset go to the console
    /// and, if `log_path` is given, to a CSV file.
    pub fn train(
        &mut self,
        features: &Matrix,
        labels: &Matrix,
        epochs: usize,
        batch_size: usize,
        log_path: Option<&str>,
    ) -> io::Result<()> {
        assert!(epochs > 0 && batch_size > 0, "Epochs and batch size must be positive");
        assert!(
            self.optimizer.is_some(),
            "Network is not configured: call configure() with an optimizer first"
        );
        let channels = self.layers[0].output_size().channels;
        let observations = labels.cols;
        assert_eq!(
            features.cols,
            observations * channels,
            "Feature batch has {} columns, labels imply {} observations x {} channels",
            features.cols,
            observations,
            channels
        );

        let mut logger = TrainingLogger::new(log_path)?;
        for epoch in 1..=epochs {
            let mut start = 0;
            while start < observations {
                let end = (start + batch_size).min(observations);
                let batch = features.columns(start * channels, end * channels);
                let batch_labels = labels.columns(start, end);
                self.forward_propagation(&batch, true);
                self.backward_propagation(&batch_labels);
                self.apply_updates();
                start = end;
            }
            let loss = self.get_loss(features, labels);
            let accuracy = self.get_accuracy(features, labels);
            logger.log(epoch, loss, accuracy)?;
        }
        Ok(())
    }

    /// Feed every trainable layer's gradients through the optimizer and
    /// apply the returned deltas.
    fn apply_updates(&mut self) {
        let optimizer = match &mut self.optimizer {
            Some(o) => o,
            None => panic!("Network is not configured: call configure() with an optimizer first"),
        };
        for layer in &mut self.layers {
            if !layer.trainable() {
                continue;
            }
            let gradients = layer
                .parameter_gradients()
                .map(|((wid, wg), (bid, bg))| (wid, wg.clone(), bid, bg.clone()));
            if let Some((wid, wg, bid, bg)) = gradients {
                let weight_delta = optimizer.update(wid, &wg);
                let bias_delta = optimizer.update(bid, &bg);
                layer.increment_weights_and_biases(&weight_delta, &bias_delta);
            }
        }
        // Parameters moved; cached layer outputs no longer match them
        self.forward_valid = false;
    }

    /// Write the network to a binary model file.
    pub fn save_model(&self, path: &str) -> io::Result<()> {
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        w.write_all(MODEL_MAGIC)?;
        w.write_all(&[FORMAT_VERSION])?;

        let header = ModelHeader {
            layer_kinds: self.layers.iter().map(|l| format!("{:?}", l.kind())).collect(),
            layer_sizes: self.layers.iter().map(|l| l.output_size().size).collect(),
        };
        let header_json = serde_json::to_vec(&header)?;
        w.write_all(&(header_json.len() as u32).to_le_bytes())?;
        w.write_all(&header_json)?;

        w.write_all(&(self.layers.len() as u32).to_le_bytes())?;
        for layer in &self.layers {
            layer.save(&mut w)?;
        }
        w.flush()?;
        println!("Model saved to {} ({} layers)", path, self.layers.len());
        Ok(())
    }

    /// Read a model file back into a ready-to-use network.
    ///
    /// The loaded network has no loss or optimizer attached; call
    /// [`Network::configure`] again before training.
    pub fn load_model(path: &str) -> io::Result<Network> {
        let file = File::open(path)?;
        let mut r = BufReader::new(file);

        let mut magic = [0u8; 11];
        r.read_exact(&mut magic)?;
        if &magic != MODEL_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Not a model file: bad magic bytes in {}", path),
            ));
        }
        let mut version = [0u8; 1];
        r.read_exact(&mut version)?;
        if version[0] != FORMAT_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unsupported model format version {}", version[0]),
            ));
        }

        let mut len_buf = [0u8; 4];
        r.read_exact(&mut len_buf)?;
        let header_len = u32::from_le_bytes(len_buf) as usize;
        let mut header_json = vec![0u8; header_len];
        r.read_exact(&mut header_json)?;
        let _header: ModelHeader = serde_json::from_slice(&header_json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        r.read_exact(&mut len_buf)?;
        let layer_count = u32::from_le_bytes(len_buf) as usize;
        let mut layers = Vec::with_capacity(layer_count);
        for _ in 0..layer_count {
            layers.push(Layer::load(&mut r)?);
        }
        if layers.is_empty() || layers[0].kind() != LayerKind::Input {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Model file does not start with an Input layer",
            ));
        }

        let mut network = Network {
            layers,
            outputs: Vec::new(),
            loss: None,
            optimizer: None,
            forward_valid: false,
        };
        network.init_chain(false);
        println!("Model loaded from {} ({} layers)", path, network.layers.len());
        Ok(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic pseudo-random batch data.
    fn arbitrary(rows: usize, cols: usize, seed: u64) -> Matrix {
        let mut state = seed;
        let data = (0..rows * cols)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) as f64 / (1u64 << 31) as f64) - 0.5
            })
            .collect();
        Matrix::from_vec(rows, cols, data)
    }

    fn one_hot(classes: usize, picks: &[usize]) -> Matrix {
        let mut m = Matrix::zeros(classes, picks.len());
        for (j, &c) in picks.iter().enumerate() {
            m.set(c, j, 1.0);
        }
        m
    }

    #[test]
    fn test_gradients_match_central_differences_for_mlp() {
        let mut net = Network::new(vec![
            Layer::input_1d(4),
            Layer::dense(5, "sigmoid"),
            Layer::dense(3, "softmax"),
        ]);
        net.configure("categorical_crossentropy", Optimizer::sgd(0.1, 0.0));
        let batch = arbitrary(4, 6, 11);
        let labels = one_hot(3, &[0, 2, 1, 1, 0, 2]);
        assert!(net.check_gradients(&batch, &labels, 1e-5, 1e-8));
    }

    #[test]
    fn test_gradients_match_for_conv_network() {
        let mut net = Network::new(vec![
            Layer::input_2d(5, 5, 1),
            Layer::conv2d(2, 3, 1, false, "sigmoid"),
            Layer::dense(3, "softmax"),
        ]);
        net.configure("categorical_crossentropy", Optimizer::sgd(0.1, 0.0));
        let batch = arbitrary(25, 3, 23);
        let labels = one_hot(3, &[1, 0, 2]);
        assert!(net.check_gradients(&batch, &labels, 1e-5, 1e-8));
    }

    #[test]
    fn test_gradients_match_for_strided_padded_conv() {
        let mut net = Network::new(vec![
            Layer::input_2d(6, 6, 2),
            Layer::conv2d(3, 3, 2, true, "sigmoid"),
            Layer::dense(4, "softmax"),
        ]);
        net.configure("categorical_crossentropy", Optimizer::sgd(0.1, 0.0));
        let batch = arbitrary(36, 4, 37); // 2 observations x 2 channels
        let labels = one_hot(4, &[3, 0]);
        assert!(net.check_gradients(&batch, &labels, 1e-5, 1e-8));
    }

    #[test]
    fn test_gradients_flow_through_max_pooling() {
        let mut net = Network::new(vec![
            Layer::input_2d(6, 6, 1),
            Layer::conv2d(2, 3, 1, false, "sigmoid"),
            Layer::max_pool2d(2, 2, false),
            Layer::dense(3, "softmax"),
        ]);
        net.configure("categorical_crossentropy", Optimizer::sgd(0.1, 0.0));
        let batch = arbitrary(36, 2, 53);
        let labels = one_hot(3, &[2, 0]);
        assert!(net.check_gradients(&batch, &labels, 1e-5, 1e-8));
    }

    #[test]
    fn test_gradients_match_for_batch_norm() {
        let mut net = Network::new(vec![
            Layer::input_1d(3),
            Layer::dense(4, "softmax"),
            Layer::batch_norm(0.9, 1e-8),
        ]);
        // Batch-norm re-applies the inherited softmax after scale/shift,
        // so its output columns are still probability distributions
        net.configure("categorical_crossentropy", Optimizer::sgd(0.1, 0.0));
        let batch = arbitrary(3, 5, 71);
        let labels = one_hot(4, &[0, 3, 1, 2, 2]);
        assert!(net.check_gradients(&batch, &labels, 1e-5, 1e-8));
    }

    #[test]
    fn test_end_to_end_fixed_weights_loss_and_gradients() {
        // 3-input, 2-hidden relu, 3-output softmax with fixed parameters,
        // worked through by hand. The hidden logits are [1, -1], so relu
        // keeps only the first unit; the output logits [0, ln 2, ln 5]
        // give softmax probabilities [1/8, 1/4, 5/8].
        let mut net = Network::new(vec![
            Layer::input_1d(3),
            Layer::dense(2, "relu"),
            Layer::dense(3, "softmax"),
        ]);
        net.configure("sparse_categorical_crossentropy", Optimizer::sgd(0.1, 0.0));

        let ln2 = 2.0f64.ln();
        let ln5 = 5.0f64.ln();
        net.layers[1].set_weights_and_biases(
            &Matrix::from_vec(2, 3, vec![0.5, -0.25, 0.25, -1.0, 0.5, 0.5]),
            &Matrix::from_vec(2, 1, vec![0.25, -2.5]),
        );
        net.layers[2].set_weights_and_biases(
            &Matrix::from_vec(3, 2, vec![0.0, 0.3, ln2, -0.2, ln5, 0.1]),
            &Matrix::zeros(3, 1),
        );

        let x = Matrix::from_vec(3, 1, vec![1.0, 2.0, 3.0]);
        let y = Matrix::from_vec(1, 1, vec![2.0]);

        net.forward_propagation(&x, true);
        // True class 2 has probability 5/8: J = -ln(5/8) = ln 1.6
        let loss = net.get_loss(&x, &y);
        assert!((loss - 1.6f64.ln()).abs() < 1e-10, "loss {}", loss);

        net.backward_propagation(&y);

        // Output logit gradient is p - one_hot(2) = [1/8, 1/4, -3/8];
        // the hidden activation [1, 0] puts it all in the first weight column
        let ((_, w2_grad), (_, b2_grad)) = net.layers[2].parameter_gradients().unwrap();
        let expected_w2 = [0.125, 0.0, 0.25, 0.0, -0.375, 0.0];
        for (a, e) in w2_grad.data.iter().zip(expected_w2) {
            assert!((a - e).abs() < 1e-10, "w2 grad {} vs {}", a, e);
        }
        let expected_b2 = [0.125, 0.25, -0.375];
        for (a, e) in b2_grad.data.iter().zip(expected_b2) {
            assert!((a - e).abs() < 1e-10, "b2 grad {} vs {}", a, e);
        }

        // Gradient to the hidden layer is W2^T (p - y) =
        // [ln2/4 - 3 ln5/8, -0.05]; relu zeroes the second unit (its
        // logit was negative), and x = [1, 2, 3] spreads the rest
        let d = 0.25 * ln2 - 0.375 * ln5;
        let ((_, w1_grad), (_, b1_grad)) = net.layers[1].parameter_gradients().unwrap();
        let expected_w1 = [d, 2.0 * d, 3.0 * d, 0.0, 0.0, 0.0];
        for (a, e) in w1_grad.data.iter().zip(expected_w1) {
            assert!((a - e).abs() < 1e-10, "w1 grad {} vs {}", a, e);
        }
        let expected_b1 = [d, 0.0];
        for (a, e) in b1_grad.data.iter().zip(expected_b1) {
            assert!((a - e).abs() < 1e-10, "b1 grad {} vs {}", a, e);
        }
    }

    #[test]
    fn test_save_load_round_trip_reproduces_predictions() {
        let mut net = Network::new(vec![
            Layer::input_2d(5, 5, 1),
            Layer::conv2d(2, 2, 1, false, "relu"),
            Layer::dense(3, "softmax"),
        ]);
        net.configure("categorical_crossentropy", Optimizer::sgd(0.1, 0.0));
        let batch = arbitrary(25, 4, 99);
        net.forward_propagation(&batch, false);
        let before = net.output().clone();

        let path = std::env::temp_dir().join("cesario_round_trip.bin");
        let path_str = path.to_str().unwrap();
        net.save_model(path_str).unwrap();
        let mut restored = Network::load_model(path_str).unwrap();
        std::fs::remove_file(&path).ok();

        restored.forward_propagation(&batch, false);
        let after = restored.output();
        assert_eq!(before.rows, after.rows);
        assert_eq!(before.cols, after.cols);
        for (a, b) in before.data.iter().zip(&after.data) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_load_rejects_wrong_magic() {
        let path = std::env::temp_dir().join("cesario_bad_magic.bin");
        std::fs::write(&path, b"NOT_A_MODEL_FILE").unwrap();
        let err = match Network::load_model(path.to_str().unwrap()) {
            Ok(_) => panic!("loading a non-model file must fail"),
            Err(e) => e,
        };
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_stale_state_is_rerun_for_metrics() {
        let mut net = Network::new(vec![Layer::input_1d(2), Layer::dense(2, "softmax")]);
        net.configure("categorical_crossentropy", Optimizer::sgd(0.1, 0.0));
        let batch = arbitrary(2, 3, 5);
        let labels = one_hot(2, &[0, 1, 0]);
        // No forward pass yet: get_loss must re-run on its own
        let loss = net.get_loss(&batch, &labels);
        assert!(loss.is_finite());
    }

    #[test]
    fn test_training_reduces_loss() {
        // Two linearly separable blobs
        let mut features = Matrix::zeros(2, 8);
        let mut picks = Vec::new();
        for j in 0..8 {
            let class = j % 2;
            let offset = if class == 0 { -1.0 } else { 1.0 };
            features.set(0, j, offset + 0.1 * j as f64);
            features.set(1, j, offset - 0.05 * j as f64);
            picks.push(class);
        }
        let labels = one_hot(2, &picks);

        let mut net = Network::new(vec![
            Layer::input_1d(2),
            Layer::dense(4, "sigmoid"),
            Layer::dense(2, "softmax"),
        ]);
        net.configure("categorical_crossentropy", Optimizer::adam(0.01, 0.9, 0.999));
        let initial = net.get_loss(&features, &labels);
        net.train(&features, &labels, 200, 8, None).unwrap();
        let trained = net.get_loss(&features, &labels);
        assert!(
            trained < initial * 0.5,
            "loss went from {} to {}",
            initial,
            trained
        );
    }

    #[test]
    #[should_panic(expected = "must be an Input layer")]
    fn test_first_layer_must_be_input() {
        Network::new(vec![Layer::dense(3, "relu")]);
    }

    #[test]
    #[should_panic(expected = "may be an Input layer")]
    fn test_input_layer_only_first() {
        Network::new(vec![
            Layer::input_1d(4),
            Layer::dense(3, "relu"),
            Layer::input_1d(3),
        ]);
    }

    #[test]
    #[should_panic(expected = "not configured")]
    fn test_unconfigured_network_cannot_evaluate() {
        let mut net = Network::new(vec![Layer::input_1d(2), Layer::dense(2, "softmax")]);
        let batch = arbitrary(2, 2, 3);
        net.get_loss(&batch, &one_hot(2, &[0, 1]));
    }
}
