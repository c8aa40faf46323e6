// The "utils" module collects the small helpers shared by the trigger and waveform models:
// the polarity type, sample-level edge detection, Cartesian time translation and
// conversions out of configuration dictionaries.
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TimingError};

/// Polarity of a trigger edge or pulse level: rising / active-high (1) or falling / active-low (0).
///
/// Serialized as the integer `0` or `1`, matching the configuration dictionaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Polarity {
    Negative,
    Positive,
}

impl Polarity {
    /// Digital level a signal of this polarity is driven to when active.
    pub fn level(self) -> u8 {
        match self {
            Polarity::Negative => 0,
            Polarity::Positive => 1,
        }
    }

    pub fn opposite(self) -> Polarity {
        match self {
            Polarity::Negative => Polarity::Positive,
            Polarity::Positive => Polarity::Negative,
        }
    }

    /// Polarity whose active level is `level` (any non-zero level counts as high).
    pub fn from_level(level: u8) -> Polarity {
        if level == 0 {
            Polarity::Negative
        } else {
            Polarity::Positive
        }
    }
}

impl From<Polarity> for u8 {
    fn from(pol: Polarity) -> u8 {
        pol.level()
    }
}

impl TryFrom<u8> for Polarity {
    type Error = TimingError;
    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Polarity::Negative),
            1 => Ok(Polarity::Positive),
            other => Err(TimingError::InvalidPolarity(other)),
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// Sample indices at which `levels` changes *into* `level`.
///
/// The comparison is cyclic: sample 0 is compared against the last sample, as the
/// waveform is replayed on every trigger.
pub fn edges_into_level(levels: &Array1<u8>, level: u8) -> Vec<usize> {
    let n = levels.len();
    (0..n)
        .filter(|&i| {
            let prev = levels[(i + n - 1) % n];
            levels[i] == level && prev != level
        })
        .collect()
}

/// Maximal runs `[start, end)` of samples sitting at `level`.
pub fn level_runs(levels: &Array1<u8>, level: u8) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut run_start: Option<usize> = None;
    for (i, &cur) in levels.iter().enumerate() {
        match (cur == level, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                runs.push((start, i));
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        runs.push((start, levels.len()));
    }
    runs
}

/// Indices where the level differs from the previous sample (non-cyclic).
pub fn level_changes(levels: &Array1<u8>) -> Vec<usize> {
    (1..levels.len())
        .filter(|&i| levels[i] != levels[i - 1])
        .collect()
}

/// Packs `(start, end)` pairs into an `N x 2` array.
pub fn intervals_to_array(intervals: &[(f64, f64)]) -> Array2<f64> {
    let mut arr = Array2::zeros((intervals.len(), 2));
    for (i, &(start, end)) in intervals.iter().enumerate() {
        arr[[i, 0]] = start;
        arr[[i, 1]] = end;
    }
    arr
}

/// Cartesian sum: every local time translated by every previous-level time.
/// Previous-level times vary slowest.
pub fn translate_times(anchors: &Array1<f64>, local: &Array1<f64>) -> Array1<f64> {
    anchors
        .iter()
        .flat_map(|&t0| local.iter().map(move |&t| t0 + t))
        .collect()
}

/// Same as [`translate_times`] for `N x 2` interval arrays.
pub fn translate_intervals(anchors: &Array1<f64>, local: &Array2<f64>) -> Array2<f64> {
    let n_local = local.nrows();
    let mut out = Array2::zeros((anchors.len() * n_local, 2));
    for (i, &t0) in anchors.iter().enumerate() {
        for (j, row) in local.rows().into_iter().enumerate() {
            out[[i * n_local + j, 0]] = t0 + row[0];
            out[[i * n_local + j, 1]] = t0 + row[1];
        }
    }
    out
}

/// Number of samples spanned by `duration` at `samp_rate`, rounded to the nearest sample.
pub fn num_samples(duration: f64, samp_rate: f64) -> usize {
    (duration * samp_rate).round().max(0.0) as usize
}

// Conversions out of configuration dictionaries. `what` names the field for error messages.

pub fn value_as_f64(what: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| TimingError::invalid_value(what, format!("expected a number, got {}", value)))
}

pub fn value_as_non_negative(what: &str, value: &Value) -> Result<f64> {
    let val = value_as_f64(what, value)?;
    if val < 0.0 {
        return Err(TimingError::invalid_value(what, format!("{} is negative", val)));
    }
    Ok(val)
}

pub fn value_as_usize(what: &str, value: &Value) -> Result<usize> {
    value
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| {
            TimingError::invalid_value(what, format!("expected a non-negative integer, got {}", value))
        })
}

pub fn value_as_bool(what: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| TimingError::invalid_value(what, format!("expected a boolean, got {}", value)))
}

pub fn value_as_str<'a>(what: &str, value: &'a Value) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| TimingError::invalid_value(what, format!("expected a string, got {}", value)))
}

pub fn value_as_polarity(what: &str, value: &Value) -> Result<Polarity> {
    let raw = value
        .as_u64()
        .ok_or_else(|| TimingError::invalid_value(what, format!("expected 0 or 1, got {}", value)))?;
    Polarity::try_from(raw.min(u8::MAX as u64) as u8)
}

pub fn non_negative(what: &str, value: f64) -> Result<f64> {
    if value < 0.0 || value.is_nan() {
        return Err(TimingError::invalid_value(what, format!("{} must be non-negative", value)));
    }
    Ok(value)
}

// Utility class for time-tracking
pub struct TickTimer {
    pub milis: f64,
}

impl TickTimer {
    pub fn new() -> Self {
        Self { milis: now_milis() }
    }

    pub fn tick(&mut self) -> f64 {
        let milis = now_milis();
        let diff = milis - self.milis;
        self.milis = milis;
        diff
    }

    pub fn tick_log(&mut self, msg: &str) -> f64 {
        let diff = self.tick();
        log::debug!("{}: {:.3} ms", msg, diff);
        diff
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

fn now_milis() -> f64 {
    // A clock before the epoch only skews the debug timings
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_secs() as f64 * 1e3 + duration.subsec_nanos() as f64 / 1e6
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    #[test]
    fn cyclic_edges() {
        // Starts high and ends low: the wrap-around counts as a rising edge at 0
        let levels = array![1u8, 1, 0, 0, 1, 0];
        assert_eq!(edges_into_level(&levels, 1), vec![0, 4]);
        assert_eq!(edges_into_level(&levels, 0), vec![2, 5]);
        let flat = array![1u8, 1, 1];
        assert!(edges_into_level(&flat, 1).is_empty());
    }

    #[test]
    fn runs_are_half_open() {
        let levels = array![0u8, 1, 1, 0, 1];
        assert_eq!(level_runs(&levels, 1), vec![(1, 3), (4, 5)]);
        assert_eq!(level_runs(&levels, 0), vec![(0, 1), (3, 4)]);
        assert_eq!(level_changes(&levels), vec![1, 3, 4]);
    }

    #[test]
    fn cartesian_translation_order() {
        let anchors = array![0.0, 10.0];
        let local = array![1.0, 2.0, 3.0];
        assert_eq!(
            translate_times(&anchors, &local),
            array![1.0, 2.0, 3.0, 11.0, 12.0, 13.0]
        );
        let intervals = intervals_to_array(&[(1.0, 2.0)]);
        assert_eq!(
            translate_intervals(&anchors, &intervals),
            array![[1.0, 2.0], [11.0, 12.0]]
        );
    }

    #[test]
    fn polarity_from_json() {
        assert_eq!(
            value_as_polarity("pol", &serde_json::json!(0)).unwrap(),
            Polarity::Negative
        );
        assert!(value_as_polarity("pol", &serde_json::json!(2)).is_err());
        assert!(serde_json::from_str::<Polarity>("3").is_err());
        assert_eq!(serde_json::to_string(&Polarity::Positive).unwrap(), "1");
    }
}
