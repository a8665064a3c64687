//! Training Logger
//!
//! Tracks per-epoch training metrics and writes them to the console and,
//! optionally, to a CSV file for later analysis.
//!
//! ## CSV Format
//!
//! - `epoch`: epoch number (1-based)
//! - `elapsed_seconds`: time since the logger was created
//! - `loss`: training loss over the full dataset
//! - `accuracy`: fraction of correct predictions
//!
//! ## Example
//!
//! ```rust,no_run
//! use cesario::TrainingLogger;
//!
//! let mut logger = TrainingLogger::new(Some("training_log.csv"))
//!     .expect("Failed to create logger");
//! logger.log(1, 0.523, 0.871).expect("Failed to log");
//! ```

use std::fs::File;
use std::io::{self, Write};
use std::time::Instant;

pub struct TrainingLogger {
    log_file: Option<File>,
    start_time: Instant,
    last_log_time: Instant,
}

impl TrainingLogger {
    /// Create a logger, writing CSV headers if a path is given.
    pub fn new(log_path: Option<&str>) -> io::Result<TrainingLogger> {
        let log_file = match log_path {
            Some(path) => {
                let mut file = File::create(path)?;
                writeln!(file, "epoch,elapsed_seconds,loss,accuracy")?;
                Some(file)
            }
            None => None,
        };
        let now = Instant::now();
        Ok(TrainingLogger {
            log_file,
            start_time: now,
            last_log_time: now,
        })
    }

    /// Record one epoch's metrics.
    pub fn log(&mut self, epoch: usize, loss: f64, accuracy: f64) -> io::Result<()> {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let epoch_time = self.last_log_time.elapsed().as_secs_f64();
        self.last_log_time = Instant::now();

        println!(
            "Epoch {:>4} | loss {:>10.6} | accuracy {:>6.2}% | {:>6.1}s elapsed ({:.1}s/epoch)",
            epoch,
            loss,
            accuracy * 100.0,
            elapsed,
            epoch_time
        );

        if let Some(file) = &mut self.log_file {
            writeln!(file, "{},{:.3},{},{}", epoch, elapsed, loss, accuracy)?;
            file.flush()?;
        }
        Ok(())
    }
}
