//! Trigger-dependency resolution and timing computation for lab experiment configurations.
//!
//! The crate models the devices of a pulsed experiment (delay generators, AWG waveforms and their
//! markers, acquisition cards, microwave and voltage sources) as HAL objects held in a
//! [`Laboratory`](lab::Laboratory). Devices trigger one another through paths rather than
//! references, and [`resolver`] walks those paths to compute when every sink actually fires.
//! [`ExperimentConfiguration`](experiment::ExperimentConfiguration) groups devices into a
//! snapshot which can be saved, replayed with [`specification`] values applied last, and drawn as a
//! timing diagram.
//!
//! Python bindings are built with the `python` feature.

pub mod acq;
pub mod awg;
pub mod ddg;
pub mod device;
pub mod diagram;
pub mod error;
pub mod experiment;
pub mod lab;
pub mod mapping;
pub mod marker;
pub mod mw_source;
pub mod path;
pub mod processor;
pub mod resolver;
pub mod segment;
pub mod specification;
pub mod trigger;
pub mod utils;
pub mod volt_source;
pub mod waveform;

#[cfg(feature = "python")]
pub mod python;

pub use error::{Result, TimingError};

/// The types needed to wire up a lab and query it.
pub mod prelude {
    pub use crate::acq::Acquisition;
    pub use crate::awg::WaveformAwg;
    pub use crate::ddg::DelayGenerator;
    pub use crate::device::{HalDevice, HalKind};
    pub use crate::error::{Result, TimingError};
    pub use crate::experiment::ExperimentConfiguration;
    pub use crate::lab::Laboratory;
    pub use crate::mapping::*;
    pub use crate::marker::MarkerStatus;
    pub use crate::mw_source::{MicrowaveSource, MwMode};
    pub use crate::path::*;
    pub use crate::processor::Processor;
    pub use crate::resolver::ResolvedTrigger;
    pub use crate::segment::{SegmentShape, ShapeType, WaveformSegment};
    pub use crate::specification::ExperimentSpecification;
    pub use crate::utils::Polarity;
    pub use crate::volt_source::VoltageSource;
}
