// The "mw_source" module models a microwave source. In PulseModulated mode its output is gated by
// the level of its trigger input; in Continuous mode the input is ignored when drawing timings.
use std::any::Any;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::device::*;
use crate::diagram::{DiagramInfo, DiagramTrigger};
use crate::error::{Result, TimingError};
use crate::path::*;
use crate::trigger::*;
use crate::utils::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MwMode {
    Continuous,
    PulseModulated,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct MwSettings {
    #[serde(rename = "Mode")]
    mode: MwMode,
    #[serde(rename = "Frequency")]
    frequency: f64,
    #[serde(rename = "Power")]
    power: f64,
    #[serde(rename = "Phase")]
    phase: f64,
    #[serde(rename = "Output")]
    output: bool,
    #[serde(flatten)]
    input: TriggerInput,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MicrowaveSource {
    name: String,
    settings: MwSettings,
    locks: PropertyLocks,
}

impl MicrowaveSource {
    pub fn new(name: &str) -> Self {
        MicrowaveSource {
            name: name.to_string(),
            settings: MwSettings {
                mode: MwMode::Continuous,
                frequency: 1e9,
                power: -20.0,
                phase: 0.0,
                output: false,
                input: TriggerInput::default(),
            },
            locks: PropertyLocks::new(),
        }
    }

    pub fn mode(&self) -> MwMode {
        self.settings.mode
    }
    pub fn frequency(&self) -> f64 {
        self.settings.frequency
    }
    pub fn power(&self) -> f64 {
        self.settings.power
    }

    pub fn set_mode(&mut self, mode: MwMode) {
        self.settings.mode = mode;
    }
    pub fn set_frequency(&mut self, frequency: f64) -> Result<()> {
        self.settings.frequency = non_negative(&format!("Frequency of {}", self.name), frequency)?;
        Ok(())
    }
    pub fn set_power(&mut self, power: f64) {
        self.settings.power = power;
    }
    pub fn set_phase(&mut self, phase: f64) {
        self.settings.phase = phase;
    }
    pub fn set_output(&mut self, output: bool) {
        self.settings.output = output;
    }

    fn check_root(&self, path: &ObjectPath) -> Result<()> {
        if path.root_name() == self.name && path.tail().is_empty() {
            Ok(())
        } else {
            Err(TimingError::NotTriggerInput { path: path.clone() })
        }
    }
}

impl HalDevice for MicrowaveSource {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> HalKind {
        HalKind::MWSource
    }

    fn get_current_config(&self) -> Value {
        let s = &self.settings;
        json!({
            "Name": self.name,
            "Type": HalKind::MWSource.to_string(),
            "Mode": s.mode,
            "Frequency": s.frequency,
            "Power": s.power,
            "Phase": s.phase,
            "Output": s.output,
            "TriggerSource": s.input.source(),
            "InputTriggerEdge": s.input.edge(),
        })
    }

    fn check_config(&self, config: &Value) -> Result<()> {
        self.clone().set_current_config(config)
    }

    fn set_current_config(&mut self, config: &Value) -> Result<()> {
        check_config_type(&self.name, "MWSource", config)?;
        let new: MwSettings = serde_json::from_value(config.clone())?;
        non_negative("Frequency", new.frequency)?;
        let locks = &self.locks;
        let cur = &mut self.settings;
        replay(locks, "", "Mode", &mut cur.mode, new.mode);
        replay(locks, "", "Frequency", &mut cur.frequency, new.frequency);
        replay(locks, "", "Power", &mut cur.power, new.power);
        replay(locks, "", "Phase", &mut cur.phase, new.phase);
        replay(locks, "", "Output", &mut cur.output, new.output);
        let mut edge = cur.input.edge();
        replay(locks, "", "InputTriggerEdge", &mut edge, new.input.edge());
        cur.input.set_edge(edge);
        let mut source = cur.input.source().cloned();
        replay(locks, "", "TriggerSource", &mut source, new.input.source().cloned());
        cur.input.set_source(source);
        Ok(())
    }

    fn locks(&self) -> &PropertyLocks {
        &self.locks
    }
    fn locks_(&mut self) -> &mut PropertyLocks {
        &mut self.locks
    }

    fn get_property(&self, path: &ObjectPath, property: &str) -> Result<Value> {
        if !path.tail().is_empty() {
            return Err(unknown_object(path));
        }
        let s = &self.settings;
        match property {
            "Mode" => Ok(json!(s.mode)),
            "Frequency" => Ok(json!(s.frequency)),
            "Power" => Ok(json!(s.power)),
            "Phase" => Ok(json!(s.phase)),
            "Output" => Ok(json!(s.output)),
            "InputTriggerEdge" => Ok(json!(s.input.edge())),
            "TriggerSource" => Ok(json!(s.input.source())),
            _ => Err(unknown_property(path, property)),
        }
    }

    fn set_property(&mut self, path: &ObjectPath, property: &str, value: &Value) -> Result<()> {
        if !path.tail().is_empty() {
            return Err(unknown_object(path));
        }
        let what = format!("{}.{}", path, property);
        match property {
            "Mode" => self.set_mode(serde_json::from_value(value.clone())?),
            "Frequency" => self.set_frequency(value_as_f64(&what, value)?)?,
            "Power" => self.set_power(value_as_f64(&what, value)?),
            "Phase" => self.set_phase(value_as_f64(&what, value)?),
            "Output" => self.set_output(value_as_bool(&what, value)?),
            "InputTriggerEdge" => self
                .settings
                .input
                .set_edge(value_as_polarity(&what, value)?),
            "TriggerSource" => self
                .settings
                .input
                .set_source(serde_json::from_value(value.clone())?),
            _ => return Err(unknown_property(path, property)),
        }
        Ok(())
    }

    fn is_trigger_input_capable(&self) -> bool {
        true
    }

    fn trigger_input_path(&self, path: &ObjectPath) -> Result<ObjectPath> {
        self.check_root(path)?;
        Ok(self.path())
    }
    fn trigger_input(&self, path: &ObjectPath) -> Result<&TriggerInput> {
        self.check_root(path)?;
        Ok(&self.settings.input)
    }
    fn trigger_input_(&mut self, path: &ObjectPath) -> Result<&mut TriggerInput> {
        self.check_root(path)?;
        Ok(&mut self.settings.input)
    }
    fn trigger_inputs(&self) -> Vec<ObjectPath> {
        vec![self.path()]
    }

    fn diagram_info(&self, _path: &ObjectPath) -> Result<DiagramInfo> {
        if self.settings.mode == MwMode::PulseModulated && self.settings.input.source().is_some() {
            Ok(DiagramInfo::BlockShaded {
                trigger_type: DiagramTrigger::Gated,
                period: None,
            })
        } else {
            Ok(DiagramInfo::None)
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn gated_only_when_pulse_modulated_with_source() {
        let mut mw = MicrowaveSource::new("MW");
        let path = mw.path();
        assert_eq!(mw.diagram_info(&path).unwrap(), DiagramInfo::None);
        mw.set_mode(MwMode::PulseModulated);
        assert_eq!(mw.diagram_info(&path).unwrap(), DiagramInfo::None);
        mw.trigger_input_(&path)
            .unwrap()
            .set_source(Some(ObjectPath::hal("DDG").child("B", PathRole::TriggerOutput)));
        assert_eq!(
            mw.diagram_info(&path).unwrap(),
            DiagramInfo::BlockShaded {
                trigger_type: DiagramTrigger::Gated,
                period: None
            }
        );
    }

    #[test]
    fn mode_property() {
        let mut mw = MicrowaveSource::new("MW");
        let path = mw.path();
        mw.set_property(&path, "Mode", &json!("PulseModulated")).unwrap();
        assert_eq!(mw.mode(), MwMode::PulseModulated);
        assert!(mw.set_property(&path, "Mode", &json!("Chirped")).is_err());
        assert!(mw.set_property(&path, "Frequency", &json!(-1.0)).is_err());

        let saved = mw.get_current_config();
        let mut other = MicrowaveSource::new("MW");
        other.set_current_config(&saved).unwrap();
        assert_eq!(other, mw);
    }
}
