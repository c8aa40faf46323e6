// The "processor" module holds the data processors an acquisition feeds. Their settings are opaque
// to timing: they are only snapshotted, restored and written by specifications.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::device::{check_config_type, replay};
use crate::error::{Result, TimingError};
use crate::path::*;

#[derive(Clone, Debug, PartialEq)]
pub struct Processor {
    name: String,
    settings: IndexMap<String, Value>,
    locks: PropertyLocks,
}

#[derive(Serialize, Deserialize)]
struct ProcessorConfig {
    #[serde(rename = "Settings")]
    settings: IndexMap<String, Value>,
}

impl Processor {
    pub fn new(name: &str) -> Self {
        Processor {
            name: name.to_string(),
            settings: IndexMap::new(),
            locks: PropertyLocks::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> ObjectPath {
        ObjectPath::processor(&self.name)
    }

    pub fn settings(&self) -> &IndexMap<String, Value> {
        &self.settings
    }

    pub fn get_property(&self, property: &str) -> Result<Value> {
        self.settings
            .get(property)
            .cloned()
            .ok_or_else(|| TimingError::UnknownProperty {
                path: self.path(),
                property: property.to_string(),
            })
    }

    /// Settings are free-form: writing an unknown key adds it.
    pub fn set_property(&mut self, property: &str, value: Value) {
        self.settings.insert(property.to_string(), value);
    }

    pub fn locks(&self) -> &PropertyLocks {
        &self.locks
    }
    pub fn locks_(&mut self) -> &mut PropertyLocks {
        &mut self.locks
    }

    pub fn get_current_config(&self) -> Value {
        json!({
            "Name": self.name,
            "Type": "Processor",
            "Settings": self.settings,
        })
    }

    /// Dry run of [`Processor::set_current_config`].
    pub fn check_config(&self, config: &Value) -> Result<()> {
        self.clone().set_current_config(config)
    }

    /// Replaces the settings, keeping the current value of locked keys.
    pub fn set_current_config(&mut self, config: &Value) -> Result<()> {
        check_config_type(&self.name, "Processor", config)?;
        let conf: ProcessorConfig = serde_json::from_value(config.clone())?;
        let mut settings = IndexMap::new();
        for (key, new) in conf.settings {
            let mut value = self.settings.get(&key).cloned().unwrap_or(Value::Null);
            replay(&self.locks, "", &key, &mut value, new);
            settings.insert(key, value);
        }
        // Locked keys missing from the replayed settings survive as they are
        for (key, value) in self.settings.iter() {
            if self.locks.is_locked("", key) && !settings.contains_key(key) {
                settings.insert(key.clone(), value.clone());
            }
        }
        self.settings = settings;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn settings_replay() {
        let mut proc = Processor::new("ddc");
        proc.set_property("IF", json!(25e6));
        proc.set_property("Decimation", json!(4));
        let saved = proc.get_current_config();

        proc.set_property("IF", json!(10e6));
        proc.set_property("Extra", json!(true));
        proc.locks_().lock("", "Decimation");
        proc.set_property("Decimation", json!(8));
        proc.set_current_config(&saved).unwrap();

        assert_eq!(proc.get_property("IF").unwrap(), json!(25e6));
        assert_eq!(proc.get_property("Decimation").unwrap(), json!(8));
        assert!(proc.get_property("Extra").is_err());
    }
}
