// The "ddg" module models a digital delay generator: the usual root of a trigger tree.
// Each named output (A, B, C, ...) emits one pulse per repetition with its own delay,
// length and polarity. The generator itself cannot be triggered.
use std::any::Any;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::device::*;
use crate::diagram::DiagramInfo;
use crate::error::{Result, TimingError};
use crate::path::*;
use crate::trigger::*;
use crate::utils::*;

#[derive(Clone, Debug, PartialEq)]
pub struct DelayGenerator {
    name: String,
    repetition_time: f64,
    outputs: IndexMap<String, PulseOutput>,
    locks: PropertyLocks,
}

#[derive(Serialize, Deserialize)]
struct DdgConfig {
    #[serde(rename = "RepetitionTime")]
    repetition_time: f64,
    #[serde(rename = "Outputs")]
    outputs: IndexMap<String, PulseOutput>,
}

impl DelayGenerator {
    /// Delay generator with the given output names, each with the default 10 ns positive pulse.
    pub fn new(name: &str, output_names: &[&str]) -> Self {
        DelayGenerator {
            name: name.to_string(),
            repetition_time: 1e-3,
            outputs: output_names
                .iter()
                .map(|out| (out.to_string(), PulseOutput::default()))
                .collect(),
            locks: PropertyLocks::new(),
        }
    }

    /// Path of an output, for use as a trigger source.
    pub fn output_path(&self, output: &str) -> ObjectPath {
        self.path().child(output, PathRole::TriggerOutput)
    }

    pub fn repetition_time(&self) -> f64 {
        self.repetition_time
    }

    pub fn set_repetition_time(&mut self, repetition_time: f64) -> Result<()> {
        if !(repetition_time > 0.0) {
            return Err(TimingError::invalid_value(
                format!("RepetitionTime of {}", self.name),
                "must be positive",
            ));
        }
        self.repetition_time = repetition_time;
        Ok(())
    }

    pub fn output(&self, output: &str) -> Result<&PulseOutput> {
        self.outputs.get(output).ok_or_else(|| TimingError::NotFound {
            kind: "Output",
            name: format!("{}/{}", self.name, output),
        })
    }

    pub fn output_(&mut self, output: &str) -> Result<&mut PulseOutput> {
        let name = &self.name;
        self.outputs
            .get_mut(output)
            .ok_or_else(|| TimingError::NotFound {
                kind: "Output",
                name: format!("{}/{}", name, output),
            })
    }

    /// Shortcut to configure an output in one call.
    pub fn set_output(
        &mut self,
        output: &str,
        delay: f64,
        length: f64,
        polarity: Polarity,
    ) -> Result<()> {
        *self.output_(output)? = PulseOutput::new(delay, length, polarity)?;
        Ok(())
    }

    fn output_of_path<'a>(&'a self, path: &ObjectPath) -> Option<&'a PulseOutput> {
        match path.tail() {
            [node] if node.role == PathRole::TriggerOutput => self.outputs.get(&node.name),
            _ => None,
        }
    }
}

impl HalDevice for DelayGenerator {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> HalKind {
        HalKind::DDG
    }
    fn layout(&self) -> Value {
        json!({ "Outputs": self.outputs.keys().collect::<Vec<_>>() })
    }

    fn get_current_config(&self) -> Value {
        json!({
            "Name": self.name,
            "Type": HalKind::DDG.to_string(),
            "RepetitionTime": self.repetition_time,
            "Outputs": self.outputs,
        })
    }

    fn check_config(&self, config: &Value) -> Result<()> {
        self.clone().set_current_config(config)
    }

    fn set_current_config(&mut self, config: &Value) -> Result<()> {
        check_config_type(&self.name, "DDG", config)?;
        let conf: DdgConfig = serde_json::from_value(config.clone())?;
        if !conf.outputs.keys().eq(self.outputs.keys()) {
            return Err(TimingError::invalid_value(
                format!("Outputs of {}", self.name),
                "configuration outputs do not match the generator's outputs",
            ));
        }
        if !(conf.repetition_time > 0.0) {
            return Err(TimingError::invalid_value("RepetitionTime", "must be positive"));
        }
        for pulse in conf.outputs.values() {
            pulse.validate()?;
        }

        let locks = &self.locks;
        replay(locks, "", "RepetitionTime", &mut self.repetition_time, conf.repetition_time);
        for (out_name, new) in conf.outputs {
            if let Some(pulse) = self.outputs.get_mut(&out_name) {
                let mut delay = pulse.delay();
                let mut length = pulse.length();
                let mut polarity = pulse.polarity();
                replay(locks, &out_name, "TrigPulseDelay", &mut delay, new.delay());
                replay(locks, &out_name, "TrigPulseLength", &mut length, new.length());
                replay(locks, &out_name, "TrigPolarity", &mut polarity, new.polarity());
                *pulse = PulseOutput::new(delay, length, polarity)?;
            }
        }
        Ok(())
    }

    fn locks(&self) -> &PropertyLocks {
        &self.locks
    }
    fn locks_(&mut self) -> &mut PropertyLocks {
        &mut self.locks
    }

    fn get_property(&self, path: &ObjectPath, property: &str) -> Result<Value> {
        if path.tail().is_empty() {
            return match property {
                "RepetitionTime" => Ok(json!(self.repetition_time)),
                _ => Err(unknown_property(path, property)),
            };
        }
        let pulse = self.output_of_path(path).ok_or_else(|| unknown_object(path))?;
        match property {
            "TrigPulseDelay" => Ok(json!(pulse.delay())),
            "TrigPulseLength" => Ok(json!(pulse.length())),
            "TrigPolarity" => Ok(json!(pulse.polarity())),
            _ => Err(unknown_property(path, property)),
        }
    }

    fn set_property(&mut self, path: &ObjectPath, property: &str, value: &Value) -> Result<()> {
        let what = format!("{}.{}", path, property);
        match path.tail() {
            [] => match property {
                "RepetitionTime" => self.set_repetition_time(value_as_f64(&what, value)?),
                _ => Err(unknown_property(path, property)),
            },
            [node] if node.role == PathRole::TriggerOutput => {
                let pulse = self
                    .outputs
                    .get_mut(&node.name)
                    .ok_or_else(|| unknown_object(path))?;
                match property {
                    "TrigPulseDelay" => pulse.set_delay(value_as_f64(&what, value)?),
                    "TrigPulseLength" => pulse.set_length(value_as_f64(&what, value)?),
                    "TrigPolarity" => {
                        pulse.set_polarity(value_as_polarity(&what, value)?);
                        Ok(())
                    }
                    _ => Err(unknown_property(path, property)),
                }
            }
            _ => Err(unknown_object(path)),
        }
    }

    fn trigger_output(&self, path: &ObjectPath) -> Result<TriggerOutputView<'_>> {
        self.output_of_path(path)
            .map(TriggerOutputView::Pulse)
            .ok_or_else(|| TimingError::NotTriggerOutput { path: path.clone() })
    }

    fn trigger_outputs(&self) -> Vec<ObjectPath> {
        self.outputs.keys().map(|out| self.output_path(out)).collect()
    }

    fn diagram_info(&self, path: &ObjectPath) -> Result<DiagramInfo> {
        let pulse = self.output_of_path(path).ok_or_else(|| unknown_object(path))?;
        let (active, idle) = (pulse.polarity().level(), pulse.polarity().opposite().level());
        Ok(DiagramInfo::DigitalEdges {
            data: vec![
                (0.0, idle),
                (pulse.delay(), active),
                (pulse.delay() + pulse.length(), idle),
            ],
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
