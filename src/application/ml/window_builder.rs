//! Sliding-window sample construction.
//!
//! A table of N rows and a window of W rows yields N - W samples. Sample `i`
//! flattens rows `[i, i + W)` row by row into one feature vector of `W * C` values
//! and is labelled with the direction of `close[i + W]` relative to `close[i + W - 1]`.

use crate::domain::errors::{MlError, MlResult};
use crate::domain::ml::{Direction, FeatureTable};
use ndarray::{Array2, Axis, s};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureWindowBuilder {
    window_size: usize,
}

impl FeatureWindowBuilder {
    pub fn new(window_size: usize) -> MlResult<Self> {
        if window_size == 0 {
            return Err(MlError::InvalidConfig {
                reason: "window_size must be at least 1".to_string(),
            });
        }
        Ok(Self { window_size })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Lazy view over every labelled window of `table`.
    ///
    /// Fails with `InsufficientData` when the table has no row after its first window.
    pub fn windows<'a>(&self, table: &'a FeatureTable) -> MlResult<Windows<'a>> {
        if table.len() <= self.window_size {
            return Err(MlError::InsufficientData {
                rows: table.len(),
                required: self.window_size + 1,
            });
        }
        Ok(Windows {
            table,
            window_size: self.window_size,
        })
    }

    /// Materializes all windows into a feature matrix and label vector.
    pub fn build_dataset(&self, table: &FeatureTable) -> MlResult<WindowedDataset> {
        let windows = self.windows(table)?;
        let n = windows.len();
        let width = self.window_size * table.column_count();

        let mut flat = Vec::with_capacity(n * width);
        let mut labels = Vec::with_capacity(n);
        for (features, label) in windows.iter() {
            flat.extend_from_slice(&features);
            labels.push(label);
        }

        let features = Array2::from_shape_vec((n, width), flat)
            .map_err(|e| MlError::shape(e.to_string()))?;
        Ok(WindowedDataset { features, labels })
    }

    /// Single unlabelled feature row from a table holding exactly one window.
    pub fn prediction_row(&self, table: &FeatureTable) -> MlResult<Array2<f64>> {
        if table.len() != self.window_size {
            return Err(MlError::shape(format!(
                "prediction input has {} rows, model window is {}",
                table.len(),
                self.window_size
            )));
        }
        let width = self.window_size * table.column_count();
        Array2::from_shape_vec((1, width), table.flatten_rows(0, self.window_size))
            .map_err(|e| MlError::shape(e.to_string()))
    }
}

/// Restartable sequence of `(feature_vector, label)` pairs; each `iter()` starts over.
#[derive(Debug, Clone, Copy)]
pub struct Windows<'a> {
    table: &'a FeatureTable,
    window_size: usize,
}

impl<'a> Windows<'a> {
    pub fn len(&self) -> usize {
        self.table.len() - self.window_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> WindowIter<'a> {
        WindowIter {
            table: self.table,
            window_size: self.window_size,
            next: 0,
            end: self.len(),
        }
    }
}

impl<'a> IntoIterator for Windows<'a> {
    type Item = (Vec<f64>, Direction);
    type IntoIter = WindowIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct WindowIter<'a> {
    table: &'a FeatureTable,
    window_size: usize,
    next: usize,
    end: usize,
}

impl Iterator for WindowIter<'_> {
    type Item = (Vec<f64>, Direction);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let i = self.next;
        self.next += 1;

        let last = i + self.window_size - 1;
        let features = self.table.flatten_rows(i, self.window_size);
        let label = Direction::from_closes(self.table.close_at(last), self.table.close_at(last + 1));
        Some((features, label))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for WindowIter<'_> {}

/// Windowed feature matrix (one sample per row) with its labels.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowedDataset {
    pub features: Array2<f64>,
    pub labels: Vec<Direction>,
}

impl WindowedDataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// (samples, features per sample)
    pub fn shape(&self) -> (usize, usize) {
        self.features.dim()
    }

    pub fn label_codes(&self) -> Vec<u32> {
        self.labels.iter().map(|l| l.code()).collect()
    }

    /// Chronological holdout: the last `ceil(n * test_fraction)` samples form the test set.
    pub fn split_chronological(
        &self,
        test_fraction: f64,
    ) -> MlResult<(WindowedDataset, WindowedDataset)> {
        let n = self.len();
        let n_test = (n as f64 * test_fraction).ceil() as usize;
        let n_train = n.saturating_sub(n_test);

        if n_train == 0 || n_test == 0 {
            return Err(MlError::InsufficientData {
                rows: n,
                required: min_samples_for_split(test_fraction).unwrap_or(usize::MAX),
            });
        }

        let train = WindowedDataset {
            features: self.features.slice(s![..n_train, ..]).to_owned(),
            labels: self.labels[..n_train].to_vec(),
        };
        let test = WindowedDataset {
            features: self.features.slice(s![n_train.., ..]).to_owned(),
            labels: self.labels[n_train..].to_vec(),
        };
        Ok((train, test))
    }

    pub fn column_count(&self) -> usize {
        self.features.len_of(Axis(1))
    }
}

/// Largest sample count considered when sizing a split; beyond it `f64` no longer
/// represents every integer.
const MAX_SPLIT_SAMPLES: f64 = (1u64 << 52) as f64;

/// Smallest sample count leaving at least one sample on each side of the split.
///
/// `None` when `test_fraction` is outside `(0, 1)` or so close to 1 that no
/// representable sample count keeps a training sample.
pub fn min_samples_for_split(test_fraction: f64) -> Option<usize> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return None;
    }
    // n - ceil(n * f) >= 1 holds from n >= 1 / (1 - f); rounding can shift it by a step.
    let estimate = (1.0 / (1.0 - test_fraction)).ceil();
    if !estimate.is_finite() || estimate > MAX_SPLIT_SAMPLES {
        return None;
    }
    let estimate = estimate as usize;

    (estimate.saturating_sub(2).max(2)..=estimate + 2).find(|&n| {
        let n_test = (n as f64 * test_fraction).ceil() as usize;
        n_test >= 1 && n > n_test
    })
}
