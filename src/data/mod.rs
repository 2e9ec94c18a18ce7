//! Dataset containers, batching, and matrix file I/O.
//!
//! Matrices are stored one example per line, values separated by commas or
//! whitespace. Lines starting with `#` are ignored.

use std::fs;
use std::path::Path;

use ndarray::{Array2, ArrayView2, Axis, Slice};
use rand::Rng;

use crate::core::{GsnError, GsnResult};

/// Train split plus optional validation and test splits.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub train: Array2<f32>,
    pub valid: Option<Array2<f32>>,
    pub test: Option<Array2<f32>>,
}

impl Dataset {
    pub fn new(train: Array2<f32>) -> Self {
        Self {
            train,
            valid: None,
            test: None,
        }
    }

    pub fn with_valid(mut self, valid: Array2<f32>) -> Self {
        self.valid = Some(valid);
        self
    }

    pub fn with_test(mut self, test: Array2<f32>) -> Self {
        self.test = Some(test);
        self
    }

    /// Visible width shared by every split.
    ///
    /// # Errors
    /// - `ShapeMismatch` if a validation or test split has a different width
    pub fn input_size(&self) -> GsnResult<usize> {
        let width = self.train.ncols();
        for (name, split) in [("valid", &self.valid), ("test", &self.test)] {
            if let Some(split) = split {
                if split.ncols() != width {
                    return Err(GsnError::ShapeMismatch(format!(
                        "{name} split has {} columns, train has {width}",
                        split.ncols()
                    )));
                }
            }
        }
        Ok(width)
    }
}

/// Full batches of `batch_size` rows; a trailing partial batch is dropped.
///
/// Data with fewer rows than one batch comes back as a single batch.
pub fn batches(data: &Array2<f32>, batch_size: usize) -> Vec<ArrayView2<'_, f32>> {
    let n = data.nrows();
    if n == 0 || batch_size == 0 {
        return Vec::new();
    }
    if n < batch_size {
        return vec![data.view()];
    }
    data.axis_chunks_iter(Axis(0), batch_size)
        .filter(|chunk| chunk.nrows() == batch_size)
        .collect()
}

/// Read a numeric matrix, one row per line.
///
/// # Errors
/// - `Io` if the file cannot be read
/// - `ShapeMismatch` on an unparsable value or ragged rows
pub fn load_matrix(path: &Path) -> GsnResult<Array2<f32>> {
    let contents = fs::read_to_string(path)?;
    parse_matrix(&contents)
}

/// Parse the text format read by [`load_matrix`].
pub fn parse_matrix(contents: &str) -> GsnResult<Array2<f32>> {
    let mut flat = Vec::new();
    let mut rows = 0;
    let mut cols = None;

    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let before = flat.len();
        for token in line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            let value: f32 = token.parse().map_err(|_| {
                GsnError::ShapeMismatch(format!("line {}: bad value {token:?}", line_no + 1))
            })?;
            flat.push(value);
        }
        let width = flat.len() - before;
        match cols {
            None => cols = Some(width),
            Some(c) if c != width => {
                return Err(GsnError::ShapeMismatch(format!(
                    "line {}: {width} values, expected {c}",
                    line_no + 1
                )))
            }
            _ => {}
        }
        rows += 1;
    }

    Array2::from_shape_vec((rows, cols.unwrap_or(0)), flat)
        .map_err(|e| GsnError::ShapeMismatch(format!("could not build matrix: {e}")))
}

/// Write a matrix in the format read by [`load_matrix`], creating parent directories.
pub fn write_matrix(path: &Path, data: &Array2<f32>) -> GsnResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = String::with_capacity(data.len() * 8);
    for row in data.rows() {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(())
}

/// Split off the last `eval_fraction` of rows as an evaluation set.
///
/// Returns `(train, eval)`. The split is deterministic.
#[must_use]
pub fn train_eval_split(data: &Array2<f32>, eval_fraction: f32) -> (Array2<f32>, Array2<f32>) {
    let n = data.nrows();
    let eval_count = ((n as f32) * eval_fraction.clamp(0.0, 1.0)) as usize;
    let train_count = n - eval_count;

    let train = data.slice_axis(Axis(0), Slice::from(..train_count)).to_owned();
    let eval = data.slice_axis(Axis(0), Slice::from(train_count..)).to_owned();
    (train, eval)
}

/// Map each value to 1.0 if it is above `threshold`, else 0.0.
pub fn binarize(data: &Array2<f32>, threshold: f32) -> Array2<f32> {
    data.mapv(|v| if v > threshold { 1.0 } else { 0.0 })
}

/// Normalize data to a target range.
pub fn normalize(data: &mut Array2<f32>, min: f32, max: f32) {
    let data_min = data.iter().fold(f32::INFINITY, |a, &b| a.min(b));
    let data_max = data.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let range = data_max - data_min;

    if range == 0.0 || !range.is_finite() {
        return;
    }

    data.mapv_inplace(|v| min + ((v - data_min) / range) * (max - min));
}

/// Binary rows drawn around a few random prototypes, each bit flipped with
/// probability `flip_prob`.
pub fn synthetic_patterns<R: Rng + ?Sized>(
    rows: usize,
    width: usize,
    prototypes: usize,
    flip_prob: f32,
    rng: &mut R,
) -> Array2<f32> {
    let prototypes = prototypes.max(1);
    let protos: Vec<Vec<f32>> = (0..prototypes)
        .map(|_| {
            (0..width)
                .map(|_| if rng.gen::<f32>() < 0.5 { 1.0 } else { 0.0 })
                .collect()
        })
        .collect();

    let mut data = Array2::zeros((rows, width));
    for (r, mut row) in data.rows_mut().into_iter().enumerate() {
        let proto = &protos[r % prototypes];
        for (v, &p) in row.iter_mut().zip(proto) {
            *v = if rng.gen::<f32>() < flip_prob { 1.0 - p } else { p };
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_normalize() {
        let mut data = ndarray::arr2(&[[0.0, 1.0, 2.0, 3.0, 4.0]]);
        normalize(&mut data, -1.0, 1.0);

        assert!((data[[0, 0]] - (-1.0)).abs() < 1e-6);
        assert!((data[[0, 4]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_batches_drop_partial() {
        let data = Array2::<f32>::zeros((10, 3));
        let views = batches(&data, 4);
        assert_eq!(views.len(), 2);
        assert!(views.iter().all(|v| v.nrows() == 4));
    }

    #[test]
    fn test_batches_small_dataset_single_batch() {
        let data = Array2::<f32>::zeros((3, 2));
        let views = batches(&data, 100);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].nrows(), 3);
    }

    #[test]
    fn test_parse_matrix_mixed_separators() {
        let m = parse_matrix("# header\n1,0, 1\n0 1 0\n\n").unwrap();
        assert_eq!(m, ndarray::arr2(&[[1.0, 0.0, 1.0], [0.0, 1.0, 0.0]]));
    }

    #[test]
    fn test_parse_matrix_ragged_rejected() {
        assert!(matches!(
            parse_matrix("1,2,3\n4,5\n"),
            Err(GsnError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_write_then_load_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("m.csv");
        let m = ndarray::arr2(&[[0.25, 1.0], [0.0, 0.5]]);
        write_matrix(&path, &m).unwrap();
        assert_eq!(load_matrix(&path).unwrap(), m);
    }

    #[test]
    fn test_train_eval_split() {
        let data = Array2::from_shape_fn((10, 2), |(i, _)| i as f32);
        let (train, eval) = train_eval_split(&data, 0.2);
        assert_eq!(train.nrows(), 8);
        assert_eq!(eval.nrows(), 2);
        assert_eq!(eval[[0, 0]], 8.0);
    }

    #[test]
    fn test_binarize() {
        let data = ndarray::arr2(&[[0.2, 0.7], [0.5, 0.51]]);
        assert_eq!(binarize(&data, 0.5), ndarray::arr2(&[[0.0, 1.0], [0.0, 1.0]]));
    }

    #[test]
    fn test_synthetic_patterns_binary_and_seeded() {
        let a = synthetic_patterns(12, 6, 3, 0.1, &mut StdRng::seed_from_u64(5));
        let b = synthetic_patterns(12, 6, 3, 0.1, &mut StdRng::seed_from_u64(5));
        assert_eq!(a, b);
        assert!(a.iter().all(|&v| v == 0.0 || v == 1.0));
        let clean = synthetic_patterns(6, 6, 3, 0.0, &mut StdRng::seed_from_u64(6));
        assert_eq!(clean.row(0), clean.row(3));
    }

    #[test]
    fn test_dataset_width_check() {
        let ds = Dataset::new(Array2::zeros((4, 3))).with_valid(Array2::zeros((2, 5)));
        assert!(ds.input_size().is_err());
    }
}
