// The "volt_source" module models a DC voltage source. It takes no part in triggering and draws
// nothing in a timing diagram; it is carried so that configurations can snapshot and restore it.
use std::any::Any;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::device::*;
use crate::error::{Result, TimingError};
use crate::path::*;
use crate::utils::*;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct VoltSettings {
    #[serde(rename = "Voltage")]
    voltage: f64,
    #[serde(rename = "RampRate")]
    ramp_rate: f64,
    #[serde(rename = "Output")]
    output: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VoltageSource {
    name: String,
    settings: VoltSettings,
    locks: PropertyLocks,
}

impl VoltageSource {
    pub fn new(name: &str) -> Self {
        VoltageSource {
            name: name.to_string(),
            settings: VoltSettings {
                voltage: 0.0,
                ramp_rate: 1.0,
                output: false,
            },
            locks: PropertyLocks::new(),
        }
    }

    pub fn voltage(&self) -> f64 {
        self.settings.voltage
    }
    pub fn set_voltage(&mut self, voltage: f64) {
        self.settings.voltage = voltage;
    }
    pub fn set_ramp_rate(&mut self, ramp_rate: f64) -> Result<()> {
        if !(ramp_rate > 0.0) {
            return Err(TimingError::invalid_value(
                format!("RampRate of {}", self.name),
                "must be positive",
            ));
        }
        self.settings.ramp_rate = ramp_rate;
        Ok(())
    }
    pub fn set_output(&mut self, output: bool) {
        self.settings.output = output;
    }
}

impl HalDevice for VoltageSource {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> HalKind {
        HalKind::VoltSource
    }

    fn get_current_config(&self) -> Value {
        json!({
            "Name": self.name,
            "Type": HalKind::VoltSource.to_string(),
            "Voltage": self.settings.voltage,
            "RampRate": self.settings.ramp_rate,
            "Output": self.settings.output,
        })
    }

    fn check_config(&self, config: &Value) -> Result<()> {
        self.clone().set_current_config(config)
    }

    fn set_current_config(&mut self, config: &Value) -> Result<()> {
        check_config_type(&self.name, "VoltSource", config)?;
        let new: VoltSettings = serde_json::from_value(config.clone())?;
        let locks = &self.locks;
        let cur = &mut self.settings;
        replay(locks, "", "Voltage", &mut cur.voltage, new.voltage);
        replay(locks, "", "RampRate", &mut cur.ramp_rate, new.ramp_rate);
        replay(locks, "", "Output", &mut cur.output, new.output);
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
        match property {
            "Voltage" => Ok(json!(self.settings.voltage)),
            "RampRate" => Ok(json!(self.settings.ramp_rate)),
            "Output" => Ok(json!(self.settings.output)),
            _ => Err(unknown_property(path, property)),
        }
    }

    fn set_property(&mut self, path: &ObjectPath, property: &str, value: &Value) -> Result<()> {
        if !path.tail().is_empty() {
            return Err(unknown_object(path));
        }
        let what = format!("{}.{}", path, property);
        match property {
            "Voltage" => self.set_voltage(value_as_f64(&what, value)?),
            "RampRate" => self.set_ramp_rate(value_as_f64(&what, value)?)?,
            "Output" => self.set_output(value_as_bool(&what, value)?),
            _ => return Err(unknown_property(path, property)),
        }
        Ok(())
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
    use crate::diagram::DiagramInfo;

    #[test]
    fn no_trigger_capability() {
        let volt = VoltageSource::new("VSRC");
        assert!(!volt.is_trigger_input_capable());
        assert!(volt.trigger_input(&volt.path()).is_err());
        assert!(volt.diagram_objects().is_empty());
        assert_eq!(volt.diagram_info(&volt.path()).unwrap(), DiagramInfo::None);
    }

    #[test]
    fn voltage_replay() {
        let mut volt = VoltageSource::new("VSRC");
        volt.set_voltage(1.5);
        let saved = volt.get_current_config();
        volt.set_voltage(-0.5);
        assert!(volt.set_property(&volt.path(), "RampRate", &json!(0.0)).is_err());
        volt.set_current_config(&saved).unwrap();
        assert_eq!(volt.voltage(), 1.5);
    }
}
