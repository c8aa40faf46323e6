//! Experiment specifications: named bundles of values that are written into device properties.
//!
//! An [`ExperimentSpecification`] holds entries, each a value and the property targets it is
//! written to. Specifications let one physical quantity (say, a readout frequency) live in one
//! place while several devices consume it. They are committed last when an experiment
//! configuration is initialised, so their values win over whatever the configuration snapshot
//! holds for the same properties.
//!
//! ```
//! use labtiming_backend::path::*;
//! use labtiming_backend::specification::ExperimentSpecification;
//! use serde_json::json;
//!
//! let mut spec = ExperimentSpecification::new("cavity");
//! spec.add("Frequency", json!(7.5e9)).unwrap();
//! spec.set_destination("Frequency", PropertyTarget::new(ObjectPath::hal("MW"), "Frequency")).unwrap();
//! assert_eq!(spec.get_targets().len(), 1);
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, TimingError};
use crate::path::PropertyTarget;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpecEntry {
    #[serde(rename = "Value")]
    pub value: Value,
    #[serde(rename = "Destinations")]
    pub destinations: Vec<PropertyTarget>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExperimentSpecification {
    name: String,
    entries: IndexMap<String, SpecEntry>,
}

#[derive(Deserialize)]
struct SpecConfig {
    #[serde(rename = "Entries")]
    entries: IndexMap<String, SpecEntry>,
}

impl ExperimentSpecification {
    pub fn new(name: &str) -> Self {
        ExperimentSpecification {
            name: name.to_string(),
            entries: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &IndexMap<String, SpecEntry> {
        &self.entries
    }

    fn entry_(&mut self, entry: &str) -> Result<&mut SpecEntry> {
        let name = &self.name;
        self.entries
            .get_mut(entry)
            .ok_or_else(|| TimingError::NotFound {
                kind: "Specification entry",
                name: format!("{}.{}", name, entry),
            })
    }

    /// Adds an entry with its default value and no destinations.
    pub fn add(&mut self, entry: &str, default_value: Value) -> Result<()> {
        if self.entries.contains_key(entry) {
            return Err(TimingError::invalid_value(
                format!("specification {}", self.name),
                format!("entry {} already exists", entry),
            ));
        }
        self.entries.insert(
            entry.to_string(),
            SpecEntry {
                value: default_value,
                destinations: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn value(&self, entry: &str) -> Result<&Value> {
        self.entries
            .get(entry)
            .map(|e| &e.value)
            .ok_or_else(|| TimingError::NotFound {
                kind: "Specification entry",
                name: format!("{}.{}", self.name, entry),
            })
    }

    pub fn set_value(&mut self, entry: &str, value: Value) -> Result<()> {
        self.entry_(entry)?.value = value;
        Ok(())
    }

    pub fn set_destination(&mut self, entry: &str, target: PropertyTarget) -> Result<()> {
        let e = self.entry_(entry)?;
        if !e.destinations.contains(&target) {
            e.destinations.push(target);
        }
        Ok(())
    }

    pub fn clear_destinations(&mut self, entry: &str) -> Result<()> {
        self.entry_(entry)?.destinations.clear();
        Ok(())
    }

    /// Every property this specification writes, without duplicates.
    pub fn get_targets(&self) -> Vec<PropertyTarget> {
        let mut targets: Vec<PropertyTarget> = Vec::new();
        for target in self.entries.values().flat_map(|e| e.destinations.iter()) {
            if !targets.contains(target) {
                targets.push(target.clone());
            }
        }
        targets
    }

    /// `(target, value)` pairs in entry order, as written by a commit.
    pub fn writes(&self) -> Vec<(PropertyTarget, Value)> {
        self.entries
            .values()
            .flat_map(|e| e.destinations.iter().map(|t| (t.clone(), e.value.clone())))
            .collect()
    }

    pub fn get_current_config(&self) -> Value {
        json!({
            "Name": self.name,
            "Type": "ExperimentSpecification",
            "Entries": self.entries,
        })
    }

    pub fn set_current_config(&mut self, config: &Value) -> Result<()> {
        crate::device::check_config_type(&self.name, "ExperimentSpecification", config)?;
        let conf: SpecConfig = serde_json::from_value(config.clone())?;
        self.entries = conf.entries;
        Ok(())
    }
}
