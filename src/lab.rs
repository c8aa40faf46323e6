//! The lab registry: every HAL, processor and specification of an experiment, by name.
//!
//! Objects never point at each other; they store [`ObjectPath`]s and [`PropertyTarget`]s which are
//! resolved here at the point of use. Registration is get-or-create: adding an object under a name
//! that is already taken returns the existing object when the two are compatible (same kind and
//! same construction layout) and fails with [`TimingError::IncompatibleHal`] otherwise. This lets
//! setup scripts be re-run against a live lab without duplicating or silently replacing devices.
//!
//! ```
//! use labtiming_backend::prelude::*;
//!
//! let mut lab = Laboratory::new();
//! lab.add_hal(DelayGenerator::new("DDG", &["A", "B", "C"])).unwrap();
//! lab.add_hal(Acquisition::new("ACQ")).unwrap();
//!
//! let ddg_a = ObjectPath::hal("DDG").child("A", PathRole::TriggerOutput);
//! lab.set_trigger_source(&ObjectPath::hal("ACQ"), Some(&ddg_a)).unwrap();
//!
//! // Re-registering with the same layout hands back the live object
//! let ddg = lab.add_hal(DelayGenerator::new("DDG", &["A", "B", "C"])).unwrap();
//! ddg.set_output("A", 50e-9, 400e-9, Polarity::Positive).unwrap();
//! let edges = lab.get_trigger_edges(&ObjectPath::hal("ACQ")).unwrap().edges;
//! assert_eq!(edges.to_vec(), vec![50e-9]);
//! ```

use indexmap::IndexMap;
use serde_json::Value;

use crate::device::HalDevice;
use crate::error::{Result, TimingError};
use crate::path::*;
use crate::processor::Processor;
use crate::resolver::{self, ResolvedTrigger};
use crate::specification::ExperimentSpecification;
use crate::trigger::*;
use crate::utils::Polarity;

#[derive(Default)]
pub struct Laboratory {
    hals: IndexMap<String, Box<dyn HalDevice>>,
    procs: IndexMap<String, Processor>,
    specs: IndexMap<String, ExperimentSpecification>,
}

impl Laboratory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `hal`, or returns the compatible HAL already registered under its name.
    pub fn add_hal<T: HalDevice>(&mut self, hal: T) -> Result<&mut T> {
        let name = hal.name().to_string();
        match self.hals.get(&name) {
            Some(existing) => {
                if existing.kind() != hal.kind() {
                    return Err(TimingError::IncompatibleHal {
                        name,
                        reason: format!(
                            "it is registered as a {} HAL, not a {} HAL",
                            existing.kind(),
                            hal.kind()
                        ),
                    });
                }
                if existing.layout() != hal.layout() {
                    return Err(TimingError::IncompatibleHal {
                        name,
                        reason: format!(
                            "it was created with layout {} instead of {}",
                            existing.layout(),
                            hal.layout()
                        ),
                    });
                }
                log::debug!("Reusing registered HAL {}", name);
            }
            None => {
                log::info!("Registering {} HAL {}", hal.kind(), name);
                self.hals.insert(name.clone(), Box::new(hal));
            }
        }
        self.hal_as_::<T>(&name)
    }

    pub fn hal(&self, name: &str) -> Result<&dyn HalDevice> {
        self.hals
            .get(name)
            .map(|hal| hal.as_ref())
            .ok_or_else(|| TimingError::NotFound {
                kind: "HAL",
                name: name.to_string(),
            })
    }

    pub fn hal_(&mut self, name: &str) -> Result<&mut dyn HalDevice> {
        match self.hals.get_mut(name) {
            Some(hal) => Ok(hal.as_mut()),
            None => Err(TimingError::NotFound {
                kind: "HAL",
                name: name.to_string(),
            }),
        }
    }

    /// Typed access to a registered HAL.
    pub fn hal_as<T: HalDevice>(&self, name: &str) -> Result<&T> {
        self.hal(name)?
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| TimingError::IncompatibleHal {
                name: name.to_string(),
                reason: format!("it is not a {}", std::any::type_name::<T>()),
            })
    }

    pub fn hal_as_<T: HalDevice>(&mut self, name: &str) -> Result<&mut T> {
        self.hal_(name)?
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| TimingError::IncompatibleHal {
                name: name.to_string(),
                reason: format!("it is not a {}", std::any::type_name::<T>()),
            })
    }

    pub fn has_hal(&self, name: &str) -> bool {
        self.hals.contains_key(name)
    }

    pub fn hal_names(&self) -> Vec<&str> {
        self.hals.keys().map(String::as_str).collect()
    }

    /// Registers `processor`, or returns the one already registered under its name.
    pub fn add_processor(&mut self, processor: Processor) -> &mut Processor {
        let name = processor.name().to_string();
        self.procs.entry(name).or_insert_with(|| {
            log::info!("Registering processor {}", processor.name());
            processor
        })
    }

    pub fn processor(&self, name: &str) -> Result<&Processor> {
        self.procs.get(name).ok_or_else(|| TimingError::NotFound {
            kind: "Processor",
            name: name.to_string(),
        })
    }

    pub fn processor_(&mut self, name: &str) -> Result<&mut Processor> {
        self.procs.get_mut(name).ok_or_else(|| TimingError::NotFound {
            kind: "Processor",
            name: name.to_string(),
        })
    }

    /// Registers `spec`, or returns the one already registered under its name.
    pub fn add_specification(&mut self, spec: ExperimentSpecification) -> &mut ExperimentSpecification {
        let name = spec.name().to_string();
        self.specs.entry(name).or_insert_with(|| {
            log::info!("Registering specification {}", spec.name());
            spec
        })
    }

    pub fn specification(&self, name: &str) -> Result<&ExperimentSpecification> {
        self.specs.get(name).ok_or_else(|| TimingError::NotFound {
            kind: "Specification",
            name: name.to_string(),
        })
    }

    pub fn specification_(&mut self, name: &str) -> Result<&mut ExperimentSpecification> {
        self.specs.get_mut(name).ok_or_else(|| TimingError::NotFound {
            kind: "Specification",
            name: name.to_string(),
        })
    }

    /// Path of the HAL or processor registered under `name`.
    pub fn resolve_name(&self, name: &str) -> Result<ObjectPath> {
        if self.hals.contains_key(name) {
            Ok(ObjectPath::hal(name))
        } else if self.procs.contains_key(name) {
            Ok(ObjectPath::processor(name))
        } else {
            Err(TimingError::NotFound {
                kind: "Object",
                name: name.to_string(),
            })
        }
    }

    pub fn get_property(&self, target: &PropertyTarget) -> Result<Value> {
        let path = &target.path;
        match path.root_role() {
            Some(PathRole::Hal) => self.hal(path.root_name())?.get_property(path, &target.property),
            Some(PathRole::Processor) if path.tail().is_empty() => {
                self.processor(path.root_name())?.get_property(&target.property)
            }
            _ => Err(TimingError::NotFound {
                kind: "Object",
                name: path.to_string(),
            }),
        }
    }

    pub fn set_property(&mut self, target: &PropertyTarget, value: &Value) -> Result<()> {
        let path = &target.path;
        match path.root_role() {
            Some(PathRole::Hal) => {
                self.hal_(path.root_name())?
                    .set_property(path, &target.property, value)
            }
            Some(PathRole::Processor) if path.tail().is_empty() => {
                self.processor_(path.root_name())?
                    .set_property(&target.property, value.clone());
                Ok(())
            }
            _ => Err(TimingError::NotFound {
                kind: "Object",
                name: path.to_string(),
            }),
        }
    }

    fn locks_of_(&mut self, path: &ObjectPath) -> Result<&mut PropertyLocks> {
        match path.root_role() {
            Some(PathRole::Hal) => Ok(self.hal_(path.root_name())?.locks_()),
            Some(PathRole::Processor) => Ok(self.processor_(path.root_name())?.locks_()),
            _ => Err(TimingError::NotFound {
                kind: "Object",
                name: path.to_string(),
            }),
        }
    }

    /// Keeps configuration replays from overwriting the target property.
    pub fn lock_property(&mut self, target: &PropertyTarget) -> Result<()> {
        let scope = target.path.scope();
        self.locks_of_(&target.path)?.lock(&scope, &target.property);
        Ok(())
    }

    pub fn unlock_property(&mut self, target: &PropertyTarget) -> Result<()> {
        let scope = target.path.scope();
        self.locks_of_(&target.path)?.unlock(&scope, &target.property);
        Ok(())
    }

    fn hal_of(&self, path: &ObjectPath) -> Option<&dyn HalDevice> {
        match path.root_role() {
            Some(PathRole::Hal) => self.hal(path.root_name()).ok(),
            _ => None,
        }
    }

    /// Trigger input a sink path is fired through (markers resolve to their channel's input).
    pub fn trigger_input_path(&self, sink: &ObjectPath) -> Result<ObjectPath> {
        self.hal_of(sink)
            .ok_or_else(|| TimingError::NotTriggerInput { path: sink.clone() })?
            .trigger_input_path(sink)
    }

    pub fn trigger_input(&self, sink: &ObjectPath) -> Result<&TriggerInput> {
        self.hal_of(sink)
            .ok_or_else(|| TimingError::NotTriggerInput { path: sink.clone() })?
            .trigger_input(sink)
    }

    pub fn trigger_output(&self, source: &ObjectPath) -> Result<TriggerOutputView<'_>> {
        self.hal_of(source)
            .ok_or_else(|| TimingError::NotTriggerOutput {
                path: source.clone(),
            })?
            .trigger_output(source)
    }

    fn trigger_input_(&mut self, sink: &ObjectPath) -> Result<&mut TriggerInput> {
        if sink.root_role() != Some(PathRole::Hal) || !self.has_hal(sink.root_name()) {
            return Err(TimingError::NotTriggerInput { path: sink.clone() });
        }
        self.hal_(sink.root_name())?.trigger_input_(sink)
    }

    /// Wires `sink` to be triggered by `source`; `None` disconnects it.
    pub fn set_trigger_source(
        &mut self,
        sink: &ObjectPath,
        source: Option<&ObjectPath>,
    ) -> Result<()> {
        if let Some(source) = source {
            self.trigger_output(source)?;
        }
        log::debug!(
            "Trigger source of {} set to {}",
            sink,
            source.map_or("nothing".to_string(), |s| s.to_string())
        );
        self.trigger_input_(sink)?.set_source(source.cloned());
        Ok(())
    }

    pub fn set_input_trigger_edge(&mut self, sink: &ObjectPath, edge: Polarity) -> Result<()> {
        self.trigger_input_(sink)?.set_edge(edge);
        Ok(())
    }

    /// Global trigger edges of `sink`, see [`resolver::resolve`].
    pub fn get_trigger_edges(&self, sink: &ObjectPath) -> Result<ResolvedTrigger> {
        resolver::resolve(self, sink)
    }

    /// Writes every value of the named specification into its destinations.
    pub fn commit_specification(&mut self, name: &str) -> Result<()> {
        let writes = self.specification(name)?.writes();
        log::debug!("Committing specification {} ({} writes)", name, writes.len());
        for (target, value) in writes.iter() {
            self.set_property(target, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::acq::Acquisition;
    use crate::awg::WaveformAwg;
    use crate::ddg::DelayGenerator;
    use serde_json::json;

    #[test]
    fn get_or_create() {
        let mut lab = Laboratory::new();
        lab.add_hal(DelayGenerator::new("DDG", &["A", "B"]))
            .unwrap()
            .set_repetition_time(2e-3)
            .unwrap();
        let again = lab.add_hal(DelayGenerator::new("DDG", &["A", "B"])).unwrap();
        assert_eq!(again.repetition_time(), 2e-3);

        assert!(matches!(
            lab.add_hal(DelayGenerator::new("DDG", &["A", "B", "C"])),
            Err(TimingError::IncompatibleHal { .. })
        ));
        assert!(matches!(
            lab.add_hal(Acquisition::new("DDG")),
            Err(TimingError::IncompatibleHal { .. })
        ));
        assert!(lab.hal_as::<Acquisition>("DDG").is_err());
        assert_eq!(lab.hal_names(), vec!["DDG"]);
    }

    #[test]
    fn processors_and_names() {
        let mut lab = Laboratory::new();
        lab.add_processor(Processor::new("ddc")).set_property("IF", json!(1e6));
        assert_eq!(
            lab.add_processor(Processor::new("ddc")).get_property("IF").unwrap(),
            json!(1e6)
        );
        assert_eq!(lab.resolve_name("ddc").unwrap(), ObjectPath::processor("ddc"));
        assert!(matches!(
            lab.resolve_name("nope"),
            Err(TimingError::NotFound { .. })
        ));
    }

    #[test]
    fn property_routing_and_locks() {
        let mut lab = Laboratory::new();
        lab.add_hal(DelayGenerator::new("DDG", &["A"])).unwrap();
        let target = PropertyTarget::new(
            ObjectPath::hal("DDG").child("A", PathRole::TriggerOutput),
            "TrigPulseLength",
        );
        lab.set_property(&target, &json!(30e-9)).unwrap();
        assert_eq!(lab.get_property(&target).unwrap(), json!(30e-9));
        lab.lock_property(&target).unwrap();
        assert!(lab.hal("DDG").unwrap().locks().is_locked("A", "TrigPulseLength"));
        lab.unlock_property(&target).unwrap();
        assert!(lab.hal("DDG").unwrap().locks().is_empty());
    }

    #[test]
    fn wiring_is_checked() {
        let mut lab = Laboratory::new();
        lab.add_hal(DelayGenerator::new("DDG", &["A"])).unwrap();
        lab.add_hal(WaveformAwg::new("Wfm1", &["CH1"], 1e9, 2)).unwrap();
        let ch1 = ObjectPath::hal("Wfm1").child("CH1", PathRole::Channel);
        // A channel is not a trigger output
        assert!(matches!(
            lab.set_trigger_source(&ch1, Some(&ch1)),
            Err(TimingError::NotTriggerOutput { .. })
        ));
        // A delay generator cannot be triggered
        let ddg_a = ObjectPath::hal("DDG").child("A", PathRole::TriggerOutput);
        assert!(matches!(
            lab.set_trigger_source(&ObjectPath::hal("DDG"), Some(&ddg_a)),
            Err(TimingError::NotTriggerInput { .. })
        ));
        lab.set_trigger_source(&ch1, Some(&ddg_a)).unwrap();
        assert_eq!(lab.trigger_input(&ch1).unwrap().source(), Some(&ddg_a));
    }
}
