//! Dataset Import
//!
//! Readers for the IDX binary format used by MNIST-style datasets: a
//! big-endian magic number, dimension counts, then raw `u8` payload.
//! Images become a `[pixels, observations]` matrix scaled to `[0, 1]`;
//! labels become either a one-hot `[classes, observations]` matrix or a
//! sparse `[1, observations]` row of class indices, matching what the loss
//! functions expect.
//!
//! Missing or malformed files are the library's one recoverable error
//! path: everything here returns `io::Result` instead of panicking.

use std::fs::File;
use std::io::{self, BufReader, Read};

use rand::seq::SliceRandom;

use crate::matrix::Matrix;

const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

fn read_u32_be<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn check_magic<R: Read>(r: &mut R, expected: u32, what: &str) -> io::Result<()> {
    let magic = read_u32_be(r)?;
    if magic != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Not an IDX {} file: magic {} (expected {})", what, magic, expected),
        ));
    }
    Ok(())
}

/// Load an IDX image file into a `[rows * cols, count]` matrix with pixel
/// values scaled from `[0, 255]` to `[0.0, 1.0]`.
pub fn load_idx_images(path: &str) -> io::Result<Matrix> {
    let mut r = BufReader::new(File::open(path)?);
    check_magic(&mut r, IMAGE_MAGIC, "image")?;
    let count = read_u32_be(&mut r)? as usize;
    let rows = read_u32_be(&mut r)? as usize;
    let cols = read_u32_be(&mut r)? as usize;

    let pixels = rows * cols;
    let mut raw = vec![0u8; count * pixels];
    r.read_exact(&mut raw)?;

    // IDX stores observations consecutively; our columns are observations
    let mut data = vec![0.0; pixels * count];
    for obs in 0..count {
        for p in 0..pixels {
            data[p * count + obs] = raw[obs * pixels + p] as f64 / 255.0;
        }
    }
    Ok(Matrix::from_vec(pixels, count, data))
}

fn load_raw_labels(path: &str) -> io::Result<Vec<u8>> {
    let mut r = BufReader::new(File::open(path)?);
    check_magic(&mut r, LABEL_MAGIC, "label")?;
    let count = read_u32_be(&mut r)? as usize;
    let mut raw = vec![0u8; count];
    r.read_exact(&mut raw)?;
    Ok(raw)
}

/// Load an IDX label file into a one-hot `[classes, count]` matrix.
pub fn load_idx_labels_one_hot(path: &str, classes: usize) -> io::Result<Matrix> {
    let raw = load_raw_labels(path)?;
    let mut m = Matrix::zeros(classes, raw.len());
    for (obs, &label) in raw.iter().enumerate() {
        if label as usize >= classes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Label {} out of range for {} classes", label, classes),
            ));
        }
        m.set(label as usize, obs, 1.0);
    }
    Ok(m)
}

/// Load an IDX label file into a sparse `[1, count]` row of class indices.
pub fn load_idx_labels_sparse(path: &str) -> io::Result<Matrix> {
    let raw = load_raw_labels(path)?;
    let data = raw.iter().map(|&l| l as f64).collect();
    Ok(Matrix::from_vec(1, raw.len(), data))
}

/// Apply one random permutation of the observations to features and labels
/// jointly.
///
/// `channels` is the input layer's channel count: spatial features pack
/// each observation into `channels` adjacent columns, and the whole group
/// moves together. Label columns are always one per observation.
pub fn shuffle_observations(features: &Matrix, labels: &Matrix, channels: usize) -> (Matrix, Matrix) {
    assert!(channels > 0, "Channel count must be positive");
    assert!(
        features.cols % channels == 0,
        "Feature columns ({}) must be a multiple of {} channels",
        features.cols,
        channels
    );
    let observations = features.cols / channels;
    assert_eq!(
        labels.cols, observations,
        "Labels have {} columns for {} observations",
        labels.cols, observations
    );

    let mut order: Vec<usize> = (0..observations).collect();
    order.shuffle(&mut rand::thread_rng());

    let mut shuffled_features = Matrix::zeros(features.rows, features.cols);
    let mut shuffled_labels = Matrix::zeros(labels.rows, labels.cols);
    for (dst, &src) in order.iter().enumerate() {
        for c in 0..channels {
            for row in 0..features.rows {
                shuffled_features.set(
                    row,
                    dst * channels + c,
                    features.get(row, src * channels + c),
                );
            }
        }
        for row in 0..labels.rows {
            shuffled_labels.set(row, dst, labels.get(row, src));
        }
    }
    (shuffled_features, shuffled_labels)
}
