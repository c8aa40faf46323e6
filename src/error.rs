//! Error type shared by every module of the crate.
//!
//! Every invariant violation is a hard stop: a wrong trigger time propagated into a physical
//! pulse sequence is worse than no pulse sequence at all, so nothing here is downgraded to a
//! default value.

use crate::path::ObjectPath;

#[derive(thiserror::Error, Debug)]
pub enum TimingError {
    #[error("There is a cyclic dependency on the trigger sources at {device}. Look carefully at the HAL objects in play.")]
    CyclicTriggerDependency { device: String },

    #[error("{path} is not a trigger input; that is, not a genuine digital trigger input")]
    NotTriggerInput { path: ObjectPath },

    #[error("{path} is not a trigger output")]
    NotTriggerOutput { path: ObjectPath },

    #[error("HAL \"{device}\" is a trigger dependency in the tree for \"{sink}\", but \"{device}\" is not listed in configuration {config}")]
    UndeclaredTriggerDependency {
        device: String,
        sink: String,
        config: String,
    },

    #[error("Marker pattern from reference segments has {marker_samples} samples while waveform {device} has {reference_samples}; the two waveforms must be the same size")]
    SampleCountMismatch {
        device: String,
        marker_samples: usize,
        reference_samples: usize,
    },

    #[error("Marker {marker} has {edges} changing edges which is too many to constitute a valid trigger")]
    TooManyMarkerEdges { marker: String, edges: usize },

    #[error("Timing diagram descriptor has invalid Type {0:?}")]
    UnknownDiagramType(String),

    #[error("Timing diagram descriptor for {object} is malformed: {reason}")]
    MalformedDiagram { object: String, reason: String },

    #[error("{kind} {name} has not been registered")]
    NotFound { kind: &'static str, name: String },

    #[error("{name} already exists and cannot be re-created: {reason}")]
    IncompatibleHal { name: String, reason: String },

    #[error("Cannot apply a configuration of type {found} to {name} of type {expected}")]
    ConfigTypeMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("{kind} {name} does not exist in configuration {config}")]
    NotInConfiguration {
        kind: &'static str,
        name: String,
        config: String,
    },

    #[error("Segment {segment} has not been added to waveform {waveform}")]
    UnknownSegment { waveform: String, segment: String },

    #[error("Segment {segment} appears more than once in waveform {waveform}")]
    DuplicateSegment { waveform: String, segment: String },

    #[error("Waveform {waveform} cannot lay out its elastic segments: {reason}")]
    InvalidElasticLayout { waveform: String, reason: String },

    #[error("Trigger polarity must be 0 or 1 for negative or positive edge/polarity, got {0}")]
    InvalidPolarity(u8),

    #[error("{path} has no property {property}")]
    UnknownProperty { path: ObjectPath, property: String },

    #[error("Invalid value for {what}: {reason}")]
    InvalidValue { what: String, reason: String },

    #[error("Cannot manipulate marker {marker} like a trigger pulse without being in Trigger mode")]
    MarkerNotInTriggerMode { marker: String },

    #[error("There is no mapping for waveform '{0}'")]
    UnmappedWaveform(String),

    #[error("There is no mapping for digital waveform '{0}'")]
    UnmappedDigital(String),

    #[error("The order of the markers on channel {channel} has changed in the configuration; expected {expected}, found {found}")]
    MarkerOrderChanged {
        channel: String,
        expected: String,
        found: String,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TimingError {
    pub fn invalid_value(what: impl Into<String>, reason: impl Into<String>) -> Self {
        TimingError::InvalidValue {
            what: what.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = TimingError> = std::result::Result<T, E>;
