//! Interval Statistics Engine
//!
//! Pure functions over a sequence of speed samples. The controller calls
//! [`compute_statistics`] once per closed interval and once more over the
//! road's per-interval means to maintain the running "overall" record.
//!
//! # Index convention
//!
//! `min_index` and `max_index` are 1-based and point at the **last** position
//! holding the extremal value in the original (unsorted) input. `[5, 3, 5]`
//! therefore reports a max index of 3, not 1.
//!
//! # Degenerate inputs
//!
//! - Empty input is rejected with [`StatisticsError::Empty`].
//! - A single sample has no spread: both standard deviations are reported as
//!   zero, a warning is logged and [`Statistics::std_dev_undefined`] is set.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Errors raised by the individual statistics functions.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticsError {
    /// No samples were supplied
    #[error("Cannot compute statistics over an empty sample set")]
    Empty,

    /// Not enough samples for the requested measure
    #[error("Not enough data: need at least {needed} samples, got {actual}")]
    InsufficientData {
        /// Minimum sample count
        needed: usize,
        /// Samples supplied
        actual: usize,
    },
}

/// Extremal value and the 1-based position of its last occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extremum {
    /// The extremal value
    pub value: f64,
    /// 1-based position of its last occurrence
    pub index: usize,
}

/// Values tied for the highest frequency, ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeSet {
    values: Vec<f64>,
    frequency: usize,
}

impl ModeSet {
    /// Tied values in ascending order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// How many times each mode occurs in the input.
    pub fn frequency(&self) -> usize {
        self.frequency
    }

    /// Number of values in the set.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True only for empty input.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn reset(&mut self, value: f64, frequency: usize) {
        self.values.clear();
        self.values.push(value);
        self.frequency = frequency;
    }
}

/// Descriptive statistics for one sample sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Number of samples
    pub count: usize,
    /// Smallest sample
    pub min: f64,
    /// Largest sample
    pub max: f64,
    /// Arithmetic mean
    pub mean: f64,
    /// Standard deviation over N
    pub population_std_dev: f64,
    /// Standard deviation over N - 1
    pub sample_std_dev: f64,
    /// Most frequent values
    pub modes: ModeSet,
    /// 1-based index of the last occurrence of `min`
    pub min_index: usize,
    /// 1-based index of the last occurrence of `max`
    pub max_index: usize,
    /// Set when fewer than two samples were available and both standard
    /// deviations were forced to zero.
    pub std_dev_undefined: bool,
}

/// Arithmetic mean.
pub fn mean(data: &[f64]) -> Result<f64, StatisticsError> {
    if data.is_empty() {
        return Err(StatisticsError::Empty);
    }
    Ok(data.iter().sum::<f64>() / data.len() as f64)
}

/// Population standard deviation, `sqrt(Σ(x − mean)² / N)`.
pub fn population_std_dev(data: &[f64], mean: f64) -> Result<f64, StatisticsError> {
    require_spread(data)?;
    Ok((squared_deviations(data, mean) / data.len() as f64).sqrt())
}

/// Sample standard deviation, `sqrt(Σ(x − mean)² / (N − 1))`.
pub fn sample_std_dev(data: &[f64], mean: f64) -> Result<f64, StatisticsError> {
    require_spread(data)?;
    Ok((squared_deviations(data, mean) / (data.len() - 1) as f64).sqrt())
}

/// Smallest value, indexed at its last occurrence.
pub fn min(data: &[f64]) -> Option<Extremum> {
    last_extremum(data, |candidate, current| candidate < current)
}

/// Largest value, indexed at its last occurrence.
pub fn max(data: &[f64]) -> Option<Extremum> {
    last_extremum(data, |candidate, current| candidate > current)
}

/// All values tied for the highest frequency.
///
/// Works on a sorted copy; the caller's ordering is untouched.
pub fn modes(data: &[f64]) -> ModeSet {
    let mut modes = ModeSet::default();
    let mut sorted = data.to_vec();
    sort(&mut sorted);

    let Some(&first) = sorted.first() else {
        return modes;
    };

    let mut run_value = first;
    let mut run_length = 0;
    let mut longest = 0;

    for &value in &sorted {
        if value == run_value {
            run_length += 1;
            continue;
        }
        close_run(&mut modes, &mut longest, run_value, run_length);
        run_value = value;
        run_length = 1;
    }
    close_run(&mut modes, &mut longest, run_value, run_length);

    modes
}

fn close_run(modes: &mut ModeSet, longest: &mut usize, value: f64, length: usize) {
    if length > *longest {
        *longest = length;
        modes.reset(value, length);
    } else if length == *longest {
        modes.values.push(value);
    }
}

/// Build the full [`Statistics`] record for `data`.
///
/// Standard deviations degrade to zero (with a warning) for a single sample.
pub fn compute_statistics(data: &[f64]) -> Result<Statistics, StatisticsError> {
    let min = min(data).ok_or(StatisticsError::Empty)?;
    let max = max(data).ok_or(StatisticsError::Empty)?;
    let mean = mean(data)?;

    let (population_std_dev, sample_std_dev, std_dev_undefined) =
        match (population_std_dev(data, mean), sample_std_dev(data, mean)) {
            (Ok(population), Ok(sample)) => (population, sample, false),
            _ => {
                warn!(
                    samples = data.len(),
                    "Not enough data to compute standard deviation"
                );
                (0.0, 0.0, true)
            }
        };

    Ok(Statistics {
        count: data.len(),
        min: min.value,
        max: max.value,
        mean,
        population_std_dev,
        sample_std_dev,
        modes: modes(data),
        min_index: min.index,
        max_index: max.index,
        std_dev_undefined,
    })
}

/// In-place ascending quicksort (middle pivot, two-pointer partition).
pub(crate) fn sort(data: &mut [f64]) {
    if data.len() > 1 {
        partition_sort(data, 0, data.len() as isize - 1);
    }
}

fn partition_sort(data: &mut [f64], low: isize, high: isize) {
    let mut left = low;
    let mut right = high;
    let pivot = data[((low + high) / 2) as usize];

    while left <= right {
        while data[left as usize] < pivot {
            left += 1;
        }
        while data[right as usize] > pivot {
            right -= 1;
        }
        if left <= right {
            data.swap(left as usize, right as usize);
            left += 1;
            right -= 1;
        }
    }

    if low < right {
        partition_sort(data, low, right);
    }
    if left < high {
        partition_sort(data, left, high);
    }
}

fn require_spread(data: &[f64]) -> Result<(), StatisticsError> {
    if data.len() < 2 {
        return Err(StatisticsError::InsufficientData {
            needed: 2,
            actual: data.len(),
        });
    }
    Ok(())
}

fn squared_deviations(data: &[f64], mean: f64) -> f64 {
    data.iter().map(|x| (x - mean).powi(2)).sum()
}

// No early exit: every match overwrites the index, so the last one wins.
fn last_extremum(data: &[f64], better: impl Fn(f64, f64) -> bool) -> Option<Extremum> {
    let &first = data.first()?;
    let value = data
        .iter()
        .fold(first, |current, &x| if better(x, current) { x } else { current });

    let mut index = 0;
    for (position, &x) in data.iter().enumerate() {
        if x == value {
            index = position + 1;
        }
    }

    Some(Extremum { value, index })
}
