//! Logical waveform descriptions and their mapping onto physical AWG channels and markers.
//!
//! An experiment describes its pulses on *logical* tracks: analog tracks are named segment lists
//! ([`WaveformGeneric::waveforms`]) and digital tracks are either "active over these segments of
//! that analog track" or a plain trigger pulse ([`DigitalSpec`]). A [`WaveformMapper`] says which
//! AWG plays each analog track and which markers play each digital track. Applying both is the job
//! of [`ExperimentConfiguration::update_waveforms`](crate::experiment::ExperimentConfiguration::update_waveforms).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::awg::WaveformAwg;
use crate::error::{Result, TimingError};
use crate::lab::Laboratory;
use crate::path::*;
use crate::segment::WaveformSegment;
use crate::trigger::TriggerOutputView;
use crate::utils::Polarity;

/// Logical track name to physical device (analog) or marker paths (digital).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WaveformMapper {
    waveforms: IndexMap<String, String>,
    digital: IndexMap<String, Vec<ObjectPath>>,
}

impl WaveformMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_waveform(&mut self, logical: &str, device: &str) {
        self.waveforms
            .insert(logical.to_string(), device.to_string());
    }

    pub fn add_digital(&mut self, logical: &str, marker: ObjectPath) {
        let markers = self.digital.entry(logical.to_string()).or_default();
        if !markers.contains(&marker) {
            markers.push(marker);
        }
    }

    pub fn waveforms(&self) -> &IndexMap<String, String> {
        &self.waveforms
    }
    pub fn digital(&self) -> &IndexMap<String, Vec<ObjectPath>> {
        &self.digital
    }

    pub fn waveform_device(&self, logical: &str) -> Result<&str> {
        self.waveforms
            .get(logical)
            .map(String::as_str)
            .ok_or_else(|| TimingError::UnmappedWaveform(logical.to_string()))
    }

    pub fn digital_markers(&self, logical: &str) -> Result<&[ObjectPath]> {
        self.digital
            .get(logical)
            .map(Vec::as_slice)
            .ok_or_else(|| TimingError::UnmappedDigital(logical.to_string()))
    }

    /// Checks that every mapped device is an AWG and every mapped marker exists.
    pub fn validate(&self, lab: &Laboratory) -> Result<()> {
        for device in self.waveforms.values() {
            lab.hal_as::<WaveformAwg>(device)?;
        }
        for marker in self.digital.values().flatten() {
            match lab.trigger_output(marker) {
                Ok(TriggerOutputView::Marker(_)) => {}
                _ => {
                    return Err(TimingError::NotFound {
                        kind: "Marker",
                        name: marker.to_string(),
                    })
                }
            }
        }
        Ok(())
    }
}

/// Definition of a logical digital track.
#[derive(Clone, Debug, PartialEq)]
pub enum DigitalSpec {
    /// Active while the listed segments of a logical analog track play
    Segments {
        waveform: String,
        segments: Vec<String>,
        polarity: Polarity,
    },
    /// Single pulse relative to the channel trigger
    Trigger {
        delay: f64,
        length: f64,
        polarity: Polarity,
    },
}

/// Logical description of every track of an experiment.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WaveformGeneric {
    pub waveforms: IndexMap<String, Vec<WaveformSegment>>,
    pub digital: IndexMap<String, DigitalSpec>,
}

impl WaveformGeneric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_waveform_segment(&mut self, waveform: &str, segment: WaveformSegment) {
        self.waveforms
            .entry(waveform.to_string())
            .or_default()
            .push(segment);
    }

    pub fn set_digital_segments(
        &mut self,
        digital: &str,
        waveform: &str,
        segments: &[&str],
        polarity: Polarity,
    ) {
        self.digital.insert(
            digital.to_string(),
            DigitalSpec::Segments {
                waveform: waveform.to_string(),
                segments: segments.iter().map(|s| s.to_string()).collect(),
                polarity,
            },
        );
    }

    pub fn set_digital_trigger(&mut self, digital: &str, delay: f64, length: f64, polarity: Polarity) {
        self.digital.insert(
            digital.to_string(),
            DigitalSpec::Trigger {
                delay,
                length,
                polarity,
            },
        );
    }
}

/// Request for a live handle on one segment property: `(name, waveform, segment, property)`.
#[derive(Clone, Debug, PartialEq)]
pub struct VariableRequest {
    pub name: String,
    pub waveform: String,
    pub segment: String,
    pub property: String,
}

impl VariableRequest {
    pub fn new(name: &str, waveform: &str, segment: &str, property: &str) -> Self {
        VariableRequest {
            name: name.to_string(),
            waveform: waveform.to_string(),
            segment: segment.to_string(),
            property: property.to_string(),
        }
    }
}

/// Named handle reading and writing one property through the lab registry.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyHandle {
    pub name: String,
    pub target: PropertyTarget,
}

impl PropertyHandle {
    pub fn get(&self, lab: &Laboratory) -> Result<Value> {
        lab.get_property(&self.target)
    }

    pub fn set(&self, lab: &mut Laboratory, value: &Value) -> Result<()> {
        lab.set_property(&self.target, value)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ddg::DelayGenerator;

    #[test]
    fn mapping_lookup_and_validation() {
        let mut lab = Laboratory::new();
        lab.add_hal(WaveformAwg::new("Wfm1", &["CH1"], 1e9, 2)).unwrap();
        lab.add_hal(DelayGenerator::new("DDG", &["A"])).unwrap();

        let mut mapper = WaveformMapper::new();
        mapper.add_waveform("qubit", "Wfm1");
        let mkr = ObjectPath::hal("Wfm1")
            .child("CH1", PathRole::Channel)
            .child("CH1_mkr1", PathRole::Marker);
        mapper.add_digital("gate", mkr.clone());
        mapper.add_digital("gate", mkr.clone());
        assert_eq!(mapper.digital_markers("gate").unwrap(), &[mkr]);
        assert_eq!(mapper.waveform_device("qubit").unwrap(), "Wfm1");
        assert!(matches!(
            mapper.waveform_device("cavity"),
            Err(TimingError::UnmappedWaveform(_))
        ));
        mapper.validate(&lab).unwrap();

        mapper.add_digital("gate", ObjectPath::hal("DDG").child("A", PathRole::TriggerOutput));
        assert!(matches!(
            mapper.validate(&lab),
            Err(TimingError::NotFound { .. })
        ));

        let mut mapper = WaveformMapper::new();
        mapper.add_waveform("qubit", "DDG");
        assert!(mapper.validate(&lab).is_err());
    }

    #[test]
    fn mapper_json_shape() {
        let mut mapper = WaveformMapper::new();
        mapper.add_waveform("qubit", "Wfm1");
        let json = serde_json::to_value(&mapper).unwrap();
        assert_eq!(json, serde_json::json!({"waveforms": {"qubit": "Wfm1"}, "digital": {}}));
    }
}
