//! Trigger capabilities of the lab objects.
//!
//! A trigger *input* ([`TriggerInput`]) consumes edges of one polarity from at most one
//! source, referenced by its [`ObjectPath`]. A trigger *output* is anything implementing
//! [`TriggerSource`]: it reports its local edge times and gated intervals relative to the moment
//! it was itself triggered. Two kinds exist:
//!
//! - [`PulseOutput`]: a delay-generator channel with a single pulse of given delay, length and
//!   polarity.
//! - [`MarkerView`](crate::marker::MarkerView): a digital marker track riding on an AWG waveform.
//!
//! [`TriggerOutputView`] is the tagged view the lab registry hands out when a path resolves to
//! either kind.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::marker::MarkerView;
use crate::path::ObjectPath;
use crate::utils::*;

/// Edge times and gated intervals (`N x 2`, `[start, end]` per row) of a trigger output.
#[derive(Clone, Debug, PartialEq)]
pub struct TriggerTimes {
    pub edges: Array1<f64>,
    pub gated: Array2<f64>,
}

impl TriggerTimes {
    pub fn empty() -> Self {
        TriggerTimes {
            edges: Array1::zeros(0),
            gated: Array2::zeros((0, 2)),
        }
    }

    pub fn new(edges: Vec<f64>, gated: &[(f64, f64)]) -> Self {
        TriggerTimes {
            edges: Array1::from(edges),
            gated: intervals_to_array(gated),
        }
    }
}

pub trait TriggerSource {
    /// Local edge times (edges into `input_polarity`) and gated intervals (spans spent at
    /// `input_polarity`) as seen by a consumer triggering on `input_polarity`.
    fn get_trigger_times(&self, input_polarity: Polarity) -> Result<TriggerTimes>;

    /// The output read back as a single trigger pulse.
    fn trig_pulse_delay(&self) -> Result<f64>;
    fn trig_pulse_length(&self) -> Result<f64>;
    fn trig_polarity(&self) -> Result<Polarity>;
}

/// Single pulse of `length` seconds starting `delay` seconds after the trigger.
///
/// ```
/// use labtiming_backend::trigger::*;
/// use labtiming_backend::utils::Polarity;
///
/// let pulse = PulseOutput::new(50e-9, 400e-9, Polarity::Negative).unwrap();
/// // A rising-edge consumer fires when the active-low pulse ends
/// let times = pulse.get_trigger_times(Polarity::Positive).unwrap();
/// assert!((times.edges[0] - 450e-9).abs() < 1e-15);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PulseOutput {
    #[serde(rename = "TrigPulseDelay")]
    delay: f64,
    #[serde(rename = "TrigPulseLength")]
    length: f64,
    #[serde(rename = "TrigPolarity")]
    polarity: Polarity,
}

impl Default for PulseOutput {
    fn default() -> Self {
        PulseOutput {
            delay: 0.0,
            length: 10e-9,
            polarity: Polarity::Positive,
        }
    }
}

impl PulseOutput {
    pub fn new(delay: f64, length: f64, polarity: Polarity) -> Result<Self> {
        Ok(PulseOutput {
            delay: non_negative("TrigPulseDelay", delay)?,
            length: non_negative("TrigPulseLength", length)?,
            polarity,
        })
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }
    pub fn length(&self) -> f64 {
        self.length
    }
    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    pub fn set_delay(&mut self, delay: f64) -> Result<()> {
        self.delay = non_negative("TrigPulseDelay", delay)?;
        Ok(())
    }
    pub fn set_length(&mut self, length: f64) -> Result<()> {
        self.length = non_negative("TrigPulseLength", length)?;
        Ok(())
    }
    pub fn set_polarity(&mut self, polarity: Polarity) {
        self.polarity = polarity;
    }

    /// Checks values coming from a configuration dictionary.
    pub fn validate(&self) -> Result<()> {
        non_negative("TrigPulseDelay", self.delay)?;
        non_negative("TrigPulseLength", self.length)?;
        Ok(())
    }
}

/// Edge and gate of a single pulse seen from a consumer of `input_polarity`.
pub fn pulse_trigger_times(
    delay: f64,
    length: f64,
    polarity: Polarity,
    input_polarity: Polarity,
) -> TriggerTimes {
    if polarity == input_polarity {
        TriggerTimes::new(vec![delay], &[(delay, delay + length)])
    } else {
        TriggerTimes::new(vec![delay + length], &[(0.0, delay)])
    }
}

impl TriggerSource for PulseOutput {
    fn get_trigger_times(&self, input_polarity: Polarity) -> Result<TriggerTimes> {
        Ok(pulse_trigger_times(
            self.delay,
            self.length,
            self.polarity,
            input_polarity,
        ))
    }
    fn trig_pulse_delay(&self) -> Result<f64> {
        Ok(self.delay)
    }
    fn trig_pulse_length(&self) -> Result<f64> {
        Ok(self.length)
    }
    fn trig_polarity(&self) -> Result<Polarity> {
        Ok(self.polarity)
    }
}

/// Trigger input: optional source plus the edge polarity it fires on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerInput {
    #[serde(rename = "TriggerSource")]
    source: Option<ObjectPath>,
    #[serde(rename = "InputTriggerEdge")]
    edge: Polarity,
}

impl Default for TriggerInput {
    fn default() -> Self {
        TriggerInput {
            source: None,
            edge: Polarity::Positive,
        }
    }
}

impl TriggerInput {
    pub fn new(source: Option<ObjectPath>, edge: Polarity) -> Self {
        TriggerInput { source, edge }
    }
    pub fn source(&self) -> Option<&ObjectPath> {
        self.source.as_ref()
    }
    pub fn edge(&self) -> Polarity {
        self.edge
    }
    pub fn set_source(&mut self, source: Option<ObjectPath>) {
        self.source = source;
    }
    pub fn set_edge(&mut self, edge: Polarity) {
        self.edge = edge;
    }
}

/// Borrowed view of whatever trigger output a path resolved to.
pub enum TriggerOutputView<'a> {
    Pulse(&'a PulseOutput),
    Marker(MarkerView<'a>),
}

impl<'a> TriggerSource for TriggerOutputView<'a> {
    fn get_trigger_times(&self, input_polarity: Polarity) -> Result<TriggerTimes> {
        match self {
            TriggerOutputView::Pulse(pulse) => pulse.get_trigger_times(input_polarity),
            TriggerOutputView::Marker(marker) => marker.get_trigger_times(input_polarity),
        }
    }
    fn trig_pulse_delay(&self) -> Result<f64> {
        match self {
            TriggerOutputView::Pulse(pulse) => pulse.trig_pulse_delay(),
            TriggerOutputView::Marker(marker) => marker.trig_pulse_delay(),
        }
    }
    fn trig_pulse_length(&self) -> Result<f64> {
        match self {
            TriggerOutputView::Pulse(pulse) => pulse.trig_pulse_length(),
            TriggerOutputView::Marker(marker) => marker.trig_pulse_length(),
        }
    }
    fn trig_polarity(&self) -> Result<Polarity> {
        match self {
            TriggerOutputView::Pulse(pulse) => pulse.trig_polarity(),
            TriggerOutputView::Marker(marker) => marker.trig_polarity(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    #[test]
    fn pulse_same_polarity() {
        let pulse = PulseOutput::new(250e-9, 400e-9, Polarity::Positive).unwrap();
        let times = pulse.get_trigger_times(Polarity::Positive).unwrap();
        assert_eq!(times.edges, array![250e-9]);
        assert_eq!(times.gated, array![[250e-9, 250e-9 + 400e-9]]);
    }

    #[test]
    fn pulse_opposite_polarity() {
        // Negative consumer on a positive pulse: fires on the falling edge, gated before it rises
        let pulse = PulseOutput::new(250e-9, 400e-9, Polarity::Positive).unwrap();
        let times = pulse.get_trigger_times(Polarity::Negative).unwrap();
        assert_eq!(times.edges, array![250e-9 + 400e-9]);
        assert_eq!(times.gated, array![[0.0, 250e-9]]);
    }

    #[test]
    fn negative_durations_rejected() {
        assert!(PulseOutput::new(-1e-9, 0.0, Polarity::Positive).is_err());
        let mut pulse = PulseOutput::default();
        assert!(pulse.set_length(-1.0).is_err());
        assert_eq!(pulse.length(), 10e-9);
    }

    #[test]
    fn input_json_shape() {
        let input = TriggerInput::new(
            Some(ObjectPath::hal("DDG").child("A", crate::path::PathRole::TriggerOutput)),
            Polarity::Negative,
        );
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"TriggerSource": [["DDG", "HAL"], ["A", "TRIG"]], "InputTriggerEdge": 0})
        );
    }
}
