//! Digital marker tracks of AWG output channels.
//!
//! A [`Marker`] is in one of four modes ([`MarkerStatus`]):
//!
//! - `None`: the marker idles at its inactive level and never fires.
//! - `Arbitrary`: an explicit per-sample bit array, which must span the whole waveform.
//! - `Segments`: active while the listed waveform segments play.
//! - `Trigger`: a single pulse of given delay and length, like a delay-generator output.
//!
//! The marker alone does not know how long its waveform is; [`MarkerView`] pairs it with the
//! owning [`Waveform`] to materialize the bit array and answer trigger queries.

use ndarray::{s, Array1};
use serde::{Deserialize, Serialize};

use crate::device::replay;
use crate::error::{Result, TimingError};
use crate::path::PropertyLocks;
use crate::trigger::*;
use crate::utils::*;
use crate::waveform::Waveform;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerStatus {
    None,
    Arbitrary,
    Segments,
    Trigger,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Status")]
    status: MarkerStatus,
    #[serde(rename = "Polarity")]
    polarity: Polarity,
    #[serde(rename = "Arbitrary")]
    arbitrary: Vec<u8>,
    #[serde(rename = "Segments")]
    segments: Vec<String>,
    #[serde(rename = "TrigPulseDelay")]
    trig_delay: f64,
    #[serde(rename = "TrigPulseLength")]
    trig_length: f64,
}

impl Marker {
    pub fn new(name: &str) -> Self {
        Marker {
            name: name.to_string(),
            status: MarkerStatus::None,
            polarity: Polarity::Positive,
            arbitrary: Vec::new(),
            segments: Vec::new(),
            trig_delay: 0.0,
            trig_length: 10e-9,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn status(&self) -> MarkerStatus {
        self.status
    }
    pub fn polarity(&self) -> Polarity {
        self.polarity
    }
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
    pub fn arbitrary(&self) -> &[u8] {
        &self.arbitrary
    }

    pub fn set_markers_to_none(&mut self) {
        self.status = MarkerStatus::None;
    }

    pub fn set_markers_to_arbitrary(&mut self, bits: Vec<u8>) -> Result<()> {
        if let Some(bad) = bits.iter().find(|&&b| b > 1) {
            return Err(TimingError::invalid_value(
                format!("arbitrary pattern of {}", self.name),
                format!("marker samples must be 0 or 1, got {}", bad),
            ));
        }
        self.arbitrary = bits;
        self.status = MarkerStatus::Arbitrary;
        Ok(())
    }

    /// Marker active over the named segments. Names are checked against the waveform when the
    /// bit array is materialized.
    pub fn set_markers_to_segments(&mut self, segments: Vec<String>) {
        self.segments = segments;
        self.status = MarkerStatus::Segments;
    }

    pub fn set_markers_to_trigger(&mut self) {
        self.status = MarkerStatus::Trigger;
    }

    pub fn set_polarity(&mut self, polarity: Polarity) {
        self.polarity = polarity;
    }

    fn require_trigger_mode(&self) -> Result<()> {
        if self.status != MarkerStatus::Trigger {
            return Err(TimingError::MarkerNotInTriggerMode {
                marker: self.name.clone(),
            });
        }
        Ok(())
    }

    pub fn set_trig_pulse_delay(&mut self, delay: f64) -> Result<()> {
        self.require_trigger_mode()?;
        self.trig_delay = non_negative("TrigPulseDelay", delay)?;
        Ok(())
    }

    pub fn set_trig_pulse_length(&mut self, length: f64) -> Result<()> {
        self.require_trigger_mode()?;
        self.trig_length = non_negative("TrigPulseLength", length)?;
        Ok(())
    }

    /// Checks values coming from a configuration dictionary.
    pub fn validate(&self) -> Result<()> {
        non_negative("TrigPulseDelay", self.trig_delay)?;
        non_negative("TrigPulseLength", self.trig_length)?;
        if self.arbitrary.iter().any(|&b| b > 1) {
            return Err(TimingError::invalid_value(
                format!("arbitrary pattern of {}", self.name),
                "marker samples must be 0 or 1",
            ));
        }
        Ok(())
    }

    /// Takes over the state of `new`, except for the properties locked under `scope`.
    pub fn replay_from(&mut self, locks: &PropertyLocks, scope: &str, new: Marker) {
        replay(locks, scope, "Status", &mut self.status, new.status);
        replay(locks, scope, "TrigPolarity", &mut self.polarity, new.polarity);
        replay(locks, scope, "Arbitrary", &mut self.arbitrary, new.arbitrary);
        replay(locks, scope, "Segments", &mut self.segments, new.segments);
        replay(locks, scope, "TrigPulseDelay", &mut self.trig_delay, new.trig_delay);
        replay(locks, scope, "TrigPulseLength", &mut self.trig_length, new.trig_length);
    }

    /// Attaches the owning waveform.
    pub fn view<'a>(&'a self, waveform: &'a Waveform) -> MarkerView<'a> {
        MarkerView {
            marker: self,
            waveform,
        }
    }
}

/// A marker together with the waveform it plays alongside.
#[derive(Clone, Copy)]
pub struct MarkerView<'a> {
    marker: &'a Marker,
    waveform: &'a Waveform,
}

impl<'a> MarkerView<'a> {
    pub fn marker(&self) -> &Marker {
        self.marker
    }

    pub fn samp_rate(&self) -> f64 {
        self.waveform.samp_rate()
    }

    /// Per-sample levels over the whole waveform.
    pub fn bit_array(&self) -> Result<Array1<u8>> {
        let marker = self.marker;
        let num_samples = self.waveform.num_samples()?;
        let inactive = marker.polarity.opposite().level();
        match marker.status {
            MarkerStatus::None => Ok(Array1::from_elem(num_samples, inactive)),
            MarkerStatus::Trigger => {
                let fs = self.waveform.samp_rate();
                let start = num_samples_clamped(marker.trig_delay, fs, num_samples);
                let end = num_samples_clamped(marker.trig_delay + marker.trig_length, fs, num_samples);
                let mut bits = Array1::from_elem(num_samples, inactive);
                bits.slice_mut(s![start..end]).fill(marker.polarity.level());
                Ok(bits)
            }
            MarkerStatus::Segments => self
                .waveform
                .segment_bit_pattern(&marker.segments, marker.polarity),
            MarkerStatus::Arbitrary => {
                if marker.arbitrary.len() != num_samples {
                    return Err(TimingError::SampleCountMismatch {
                        device: self.waveform.name().to_string(),
                        marker_samples: marker.arbitrary.len(),
                        reference_samples: num_samples,
                    });
                }
                Ok(Array1::from(marker.arbitrary.clone()))
            }
        }
    }

    /// `(delay, length, polarity)` of the marker read as a single pulse.
    fn as_pulse(&self) -> Result<(f64, f64, Polarity)> {
        let marker = self.marker;
        if marker.status == MarkerStatus::Trigger {
            return Ok((marker.trig_delay, marker.trig_length, marker.polarity));
        }
        let bits = self.bit_array()?;
        let changes = level_changes(&bits);
        if changes.len() > 2 {
            return Err(TimingError::TooManyMarkerEdges {
                marker: marker.name.clone(),
                edges: changes.len(),
            });
        }
        let polarity = match bits.first() {
            Some(&level) if level != 0 => Polarity::Negative,
            _ => Polarity::Positive,
        };
        let fs = self.waveform.samp_rate();
        let (delay, length) = match changes.as_slice() {
            [] => (0.0, 0.0),
            [c0] => {
                let delay = *c0 as f64 / fs;
                (delay, bits.len() as f64 / fs - delay)
            }
            [c0, c1, ..] => (*c0 as f64 / fs, (c1 - c0) as f64 / fs),
        };
        Ok((delay, length, polarity))
    }
}

fn num_samples_clamped(time: f64, samp_rate: f64, max: usize) -> usize {
    num_samples(time, samp_rate).min(max)
}

impl<'a> TriggerSource for MarkerView<'a> {
    fn get_trigger_times(&self, input_polarity: Polarity) -> Result<TriggerTimes> {
        let marker = self.marker;
        match marker.status {
            MarkerStatus::None => Ok(TriggerTimes::empty()),
            MarkerStatus::Trigger => Ok(pulse_trigger_times(
                marker.trig_delay,
                marker.trig_length,
                marker.polarity,
                input_polarity,
            )),
            MarkerStatus::Segments | MarkerStatus::Arbitrary => {
                let bits = self.bit_array()?;
                let fs = self.waveform.samp_rate();
                let level = input_polarity.level();
                let edges = edges_into_level(&bits, level)
                    .into_iter()
                    .map(|i| i as f64 / fs)
                    .collect();
                let gated: Vec<(f64, f64)> = level_runs(&bits, level)
                    .into_iter()
                    .map(|(start, end)| (start as f64 / fs, end as f64 / fs))
                    .collect();
                Ok(TriggerTimes::new(edges, &gated))
            }
        }
    }

    fn trig_pulse_delay(&self) -> Result<f64> {
        self.as_pulse().map(|(delay, _, _)| delay)
    }
    fn trig_pulse_length(&self) -> Result<f64> {
        self.as_pulse().map(|(_, length, _)| length)
    }
    fn trig_polarity(&self) -> Result<Polarity> {
        self.as_pulse().map(|(_, _, polarity)| polarity)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::segment::WaveformSegment;

    // 10 samples at 1 GS/s: a(2) b(5) c(3)
    fn waveform() -> Waveform {
        let mut wfm = Waveform::new("Wfm1", 1e9);
        wfm.set_segments(vec![
            WaveformSegment::constant("a", 2e-9, 0.0).unwrap(),
            WaveformSegment::constant("b", 5e-9, 0.5).unwrap(),
            WaveformSegment::constant("c", 3e-9, 0.0).unwrap(),
        ])
        .unwrap();
        wfm
    }

    #[test]
    fn none_never_fires() {
        let wfm = waveform();
        let mkr = Marker::new("CH1_mkr1");
        let times = mkr.view(&wfm).get_trigger_times(Polarity::Positive).unwrap();
        assert_eq!(times, TriggerTimes::empty());
    }

    #[test]
    fn segments_mode() {
        let wfm = waveform();
        let mut mkr = Marker::new("CH1_mkr1");
        mkr.set_markers_to_segments(vec!["b".to_string()]);
        let view = mkr.view(&wfm);
        assert_eq!(view.bit_array().unwrap().to_vec(), vec![0, 0, 1, 1, 1, 1, 1, 0, 0, 0]);

        let rising = view.get_trigger_times(Polarity::Positive).unwrap();
        assert_eq!(rising.edges.to_vec(), vec![2.0 / 1e9]);
        assert_eq!(rising.gated.row(0).to_vec(), vec![2.0 / 1e9, 7.0 / 1e9]);
        let falling = view.get_trigger_times(Polarity::Negative).unwrap();
        assert_eq!(falling.edges.to_vec(), vec![7.0 / 1e9]);
        assert_eq!(falling.gated.nrows(), 2);

        mkr.set_markers_to_segments(vec!["z".to_string()]);
        assert!(matches!(
            mkr.view(&wfm).bit_array(),
            Err(TimingError::UnknownSegment { .. })
        ));
    }

    #[test]
    fn trigger_mode_behaves_as_pulse() {
        let wfm = waveform();
        let mut mkr = Marker::new("CH1_mkr1");
        assert!(matches!(
            mkr.set_trig_pulse_delay(1e-9),
            Err(TimingError::MarkerNotInTriggerMode { .. })
        ));
        mkr.set_markers_to_trigger();
        mkr.set_trig_pulse_delay(3e-9).unwrap();
        mkr.set_trig_pulse_length(4e-9).unwrap();
        mkr.set_polarity(Polarity::Negative);
        let view = mkr.view(&wfm);
        assert_eq!(view.bit_array().unwrap().to_vec(), vec![1, 1, 1, 0, 0, 0, 0, 1, 1, 1]);
        let times = view.get_trigger_times(Polarity::Positive).unwrap();
        assert_eq!(times.edges.to_vec(), vec![3e-9 + 4e-9]);
        assert_eq!(times.gated.row(0).to_vec(), vec![0.0, 3e-9]);
    }

    #[test]
    fn arbitrary_must_span_waveform() {
        let wfm = waveform();
        let mut mkr = Marker::new("CH1_mkr1");
        assert!(mkr.set_markers_to_arbitrary(vec![0, 2]).is_err());
        mkr.set_markers_to_arbitrary(vec![1, 0, 1]).unwrap();
        assert_eq!(mkr.status(), MarkerStatus::Arbitrary);
        match mkr.view(&wfm).bit_array() {
            Err(TimingError::SampleCountMismatch {
                marker_samples,
                reference_samples,
                ..
            }) => assert_eq!((marker_samples, reference_samples), (3, 10)),
            other => panic!("unexpected {:?}", other.map(|b| b.to_vec())),
        }
    }

    #[test]
    fn arbitrary_edges_are_cyclic() {
        let wfm = waveform();
        let mut mkr = Marker::new("CH1_mkr1");
        mkr.set_markers_to_arbitrary(vec![1, 1, 0, 0, 0, 0, 1, 1, 0, 0])
            .unwrap();
        let times = mkr.view(&wfm).get_trigger_times(Polarity::Positive).unwrap();
        assert_eq!(times.edges.to_vec(), vec![0.0, 6.0 / 1e9]);
    }

    #[test]
    fn reinterpret_as_pulse() {
        let wfm = waveform();
        let mut mkr = Marker::new("CH1_mkr1");

        // No changes
        mkr.set_markers_to_arbitrary(vec![0; 10]).unwrap();
        let view = mkr.view(&wfm);
        assert_eq!(view.trig_pulse_delay().unwrap(), 0.0);
        assert_eq!(view.trig_pulse_length().unwrap(), 0.0);
        assert_eq!(view.trig_polarity().unwrap(), Polarity::Positive);

        // One change: the pulse lasts until the end of the waveform
        mkr.set_markers_to_arbitrary(vec![1, 1, 1, 1, 0, 0, 0, 0, 0, 0])
            .unwrap();
        let view = mkr.view(&wfm);
        assert_eq!(view.trig_pulse_delay().unwrap(), 4.0 / 1e9);
        assert_eq!(view.trig_pulse_length().unwrap(), 10.0 / 1e9 - 4.0 / 1e9);
        assert_eq!(view.trig_polarity().unwrap(), Polarity::Negative);

        // Two changes
        mkr.set_markers_to_segments(vec!["b".to_string()]);
        let view = mkr.view(&wfm);
        assert_eq!(view.trig_pulse_delay().unwrap(), 2.0 / 1e9);
        assert_eq!(view.trig_pulse_length().unwrap(), 5.0 / 1e9);
        assert_eq!(view.trig_polarity().unwrap(), Polarity::Positive);

        // Three changes
        mkr.set_markers_to_arbitrary(vec![0, 1, 0, 1, 1, 1, 1, 1, 1, 1])
            .unwrap();
        assert!(matches!(
            mkr.view(&wfm).trig_pulse_delay(),
            Err(TimingError::TooManyMarkerEdges { edges: 3, .. })
        ));
    }
}
