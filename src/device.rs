//! Implements the common interface of the hardware abstraction layer (HAL) objects held by the
//! lab registry. See [`HalDevice`] for details.
//!
//! The models in this crate hold state only; they never talk to hardware. Every HAL:
//!
//! 1. Reports its whole state as a configuration dictionary ([`HalDevice::get_current_config`])
//!    and accepts one back ([`HalDevice::set_current_config`]). The replay is a full-state
//!    replace that skips properties locked in [`HalDevice::locks`].
//! 2. Exposes individual properties of itself or of its sub-objects (channels, outputs, markers,
//!    segments) addressed by the tail of an [`ObjectPath`].
//! 3. Optionally carries trigger inputs, trigger outputs, or both.
//!
//! ### Trigger capability
//! A HAL is *trigger-input capable* if it can be triggered at all. For such a HAL,
//! [`HalDevice::governing_input`] names the input that fires a given output, which is how the
//! resolver walks from a marker back to the channel playing it. HALs which are not input capable
//! (delay generators) are the roots of every trigger tree.
//!
//! ### Downcasting
//! The registry stores `Box<dyn HalDevice>`. Model-specific operations are reached by downcasting
//! through [`HalDevice::as_any`], see [`Laboratory::hal_as`](crate::lab::Laboratory::hal_as).

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diagram::DiagramInfo;
use crate::error::{Result, TimingError};
use crate::path::*;
use crate::trigger::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HalKind {
    DDG,
    AWG,
    ACQ,
    MWSource,
    VoltSource,
}

impl fmt::Display for HalKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                HalKind::DDG => "DDG",
                HalKind::AWG => "AWG",
                HalKind::ACQ => "ACQ",
                HalKind::MWSource => "MWSource",
                HalKind::VoltSource => "VoltSource",
            }
        )
    }
}

/// The `HalDevice` trait defines the operations the registry, the resolver and the experiment
/// configuration need from every HAL object.
///
/// # Trait Methods and Their Functionality:
///
/// - **Identity**: [`HalDevice::name`], [`HalDevice::kind`] and [`HalDevice::layout`]. The layout
///   captures the immutable structure fixed at construction (output names, channel and marker
///   counts); re-creating a HAL under an existing name is only allowed for an equal layout.
///
/// - **Configuration dictionaries**: [`HalDevice::get_current_config`] and
///   [`HalDevice::set_current_config`]. [`HalDevice::check_config`] runs the same replay on a copy
///   of the device, so a batch of dictionaries can be checked before any of them is applied.
///
/// - **Property access**: [`HalDevice::get_property`] and [`HalDevice::set_property`] with the path
///   of the addressed object. Direct property writes ignore locks; locks only guard replays.
///
/// - **Trigger capability**: the `trigger_*` methods default to "not capable".
///
/// - **Timing diagrams**: [`HalDevice::diagram_objects`] and [`HalDevice::diagram_info`].
pub trait HalDevice: Any {
    fn name(&self) -> &str;
    fn kind(&self) -> HalKind;
    fn layout(&self) -> Value {
        Value::Null
    }

    fn get_current_config(&self) -> Value;
    fn set_current_config(&mut self, config: &Value) -> Result<()>;
    /// Fails exactly when [`HalDevice::set_current_config`] would, without touching the device.
    fn check_config(&self, config: &Value) -> Result<()>;

    fn locks(&self) -> &PropertyLocks;
    fn locks_(&mut self) -> &mut PropertyLocks;

    fn get_property(&self, path: &ObjectPath, property: &str) -> Result<Value>;
    fn set_property(&mut self, path: &ObjectPath, property: &str, value: &Value) -> Result<()>;

    /// Shortcut to the path of the HAL itself
    fn path(&self) -> ObjectPath {
        ObjectPath::hal(self.name())
    }

    fn is_trigger_input_capable(&self) -> bool {
        false
    }

    /// Path of the trigger input that `path` is triggered through. Outputs of a triggered
    /// device map to the input that governs them; inputs map to themselves.
    fn trigger_input_path(&self, path: &ObjectPath) -> Result<ObjectPath> {
        Err(TimingError::NotTriggerInput { path: path.clone() })
    }
    fn trigger_input(&self, path: &ObjectPath) -> Result<&TriggerInput> {
        Err(TimingError::NotTriggerInput { path: path.clone() })
    }
    fn trigger_input_(&mut self, path: &ObjectPath) -> Result<&mut TriggerInput> {
        Err(TimingError::NotTriggerInput { path: path.clone() })
    }
    fn trigger_output(&self, path: &ObjectPath) -> Result<TriggerOutputView<'_>> {
        Err(TimingError::NotTriggerOutput { path: path.clone() })
    }

    /// The input that fires the output at `source`, `None` if the HAL is a trigger root.
    fn governing_input(&self, source: &ObjectPath) -> Option<ObjectPath> {
        if self.is_trigger_input_capable() {
            self.trigger_input_path(source).ok()
        } else {
            None
        }
    }

    fn trigger_inputs(&self) -> Vec<ObjectPath> {
        Vec::new()
    }
    fn trigger_outputs(&self) -> Vec<ObjectPath> {
        Vec::new()
    }

    /// Objects drawn as rows of a timing diagram.
    fn diagram_objects(&self) -> Vec<ObjectPath> {
        if self.is_trigger_input_capable() {
            self.trigger_inputs()
        } else {
            self.trigger_outputs()
        }
    }
    fn diagram_info(&self, path: &ObjectPath) -> Result<DiagramInfo> {
        let _ = path;
        Ok(DiagramInfo::None)
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Checks the `Type` entry of a configuration dictionary against the expected kind.
pub fn check_config_type(name: &str, expected: &str, config: &Value) -> Result<()> {
    let found = config.get("Type").and_then(Value::as_str).unwrap_or("");
    if found != expected {
        return Err(TimingError::ConfigTypeMismatch {
            name: name.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}

/// Writes `value` into `field` unless `(scope, property)` is locked.
pub fn replay<T>(locks: &PropertyLocks, scope: &str, property: &str, field: &mut T, value: T) {
    if locks.permits(scope, property) {
        *field = value;
    } else {
        log::debug!("Skipping locked property {} at '{}'", property, scope);
    }
}

pub(crate) fn unknown_property(path: &ObjectPath, property: &str) -> TimingError {
    TimingError::UnknownProperty {
        path: path.clone(),
        property: property.to_string(),
    }
}

/// Error for a path that names nothing inside the HAL.
pub(crate) fn unknown_object(path: &ObjectPath) -> TimingError {
    TimingError::NotFound {
        kind: "Object",
        name: path.to_string(),
    }
}
