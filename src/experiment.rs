//! The experiment module provides the highest level of abstraction: an [`ExperimentConfiguration`]
//! groups the lab objects taking part in one experiment and can capture, restore and inspect their
//! joint state.
//!
//! ## Overview
//!
//! A configuration is a set of participant HALs (optionally one of them the acquisition device),
//! the processors that acquisition feeds, a repetition time, a [`WaveformMapper`] and the names of
//! the [`ExperimentSpecification`](crate::specification::ExperimentSpecification)s that apply. The
//! objects themselves live in the [`Laboratory`]; the configuration only holds names and is handed
//! the lab for every operation, so several configurations can share one lab.
//!
//! ## Snapshots
//!
//! The joint state is captured as a snapshot dictionary:
//!
//! ```text
//! {
//!   "HALs": [<device config>, ...],
//!   "PROCs": [<processor config>, ...],
//!   "RepetitionTime": 1e-3,
//!   "WaveformMapping": {"waveforms": {...}, "digital": {...}},
//!   "SPECs": ["<spec name>", ...]
//! }
//! ```
//!
//! A snapshot is taken on construction and by [`ExperimentConfiguration::save`]. Devices can drift
//! afterwards (another configuration may reprogram them); [`ExperimentConfiguration::update`]
//! replays the snapshot and [`ExperimentConfiguration::init`] additionally commits the
//! specifications, with every property they target locked during the replay so the specification
//! values are the ones left standing.
//!
//! ## Navigating the Module
//!
//! - **Timing**: [`ExperimentConfiguration::get_trigger_edges`] and
//!   [`ExperimentConfiguration::timing_diagram`].
//! - **Waveforms**: [`ExperimentConfiguration::map_waveforms`] and
//!   [`ExperimentConfiguration::update_waveforms`].

use std::fmt;

use indexmap::IndexMap;
use ndarray::{array, Array2};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::acq::{processors_in_config, Acquisition};
use crate::awg::WaveformAwg;
use crate::device::HalDevice;
use crate::diagram::{layout_row, TimeUnit, TimingDiagram};
use crate::error::{Result, TimingError};
use crate::lab::Laboratory;
use crate::mapping::*;
use crate::path::*;
use crate::resolver::ResolvedTrigger;

/// Frozen joint state of a configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    #[serde(rename = "HALs")]
    pub hals: Vec<Value>,
    #[serde(rename = "PROCs")]
    pub procs: Vec<Value>,
    #[serde(rename = "RepetitionTime")]
    pub repetition_time: f64,
    #[serde(rename = "WaveformMapping")]
    pub waveform_mapping: WaveformMapper,
    #[serde(rename = "SPECs")]
    pub specs: Vec<String>,
}

fn config_name(config: &Value) -> &str {
    config.get("Name").and_then(Value::as_str).unwrap_or("")
}

/// Working copy of an AWG, cloned from the lab on first use.
fn stage_awg<'a>(
    staged: &'a mut IndexMap<String, WaveformAwg>,
    lab: &Laboratory,
    device: &str,
) -> Result<&'a mut WaveformAwg> {
    if !staged.contains_key(device) {
        let awg = lab.hal_as::<WaveformAwg>(device)?.clone();
        staged.insert(device.to_string(), awg);
    }
    staged.get_mut(device).ok_or_else(|| TimingError::NotFound {
        kind: "HAL",
        name: device.to_string(),
    })
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExperimentConfiguration {
    name: String,
    repetition_time: f64,
    hal_names: Vec<String>,
    acq_name: Option<String>,
    proc_names: Vec<String>,
    spec_names: Vec<String>,
    mapping: WaveformMapper,
    snapshot: ConfigSnapshot,
}

impl ExperimentConfiguration {
    /// Creates a configuration over registered HALs and specifications and captures its first
    /// snapshot. The acquisition device is added to the participants if not listed.
    pub fn new(
        name: &str,
        lab: &Laboratory,
        repetition_time: f64,
        hal_names: &[&str],
        acq_name: Option<&str>,
        spec_names: &[&str],
    ) -> Result<Self> {
        check_repetition_time(repetition_time)?;
        let mut hals: Vec<String> = Vec::new();
        for hal_name in hal_names.iter().chain(acq_name.iter()) {
            lab.hal(hal_name)?;
            if !hals.iter().any(|h| h == hal_name) {
                hals.push(hal_name.to_string());
            }
        }
        if let Some(acq) = acq_name {
            lab.hal_as::<Acquisition>(acq)?;
        }
        for spec in spec_names {
            lab.specification(spec)?;
        }
        let mut config = ExperimentConfiguration {
            name: name.to_string(),
            repetition_time,
            hal_names: hals,
            acq_name: acq_name.map(str::to_string),
            proc_names: Vec::new(),
            spec_names: spec_names.iter().map(|s| s.to_string()).collect(),
            mapping: WaveformMapper::new(),
            snapshot: ConfigSnapshot {
                hals: Vec::new(),
                procs: Vec::new(),
                repetition_time,
                waveform_mapping: WaveformMapper::new(),
                specs: Vec::new(),
            },
        };
        config.save(lab)?;
        Ok(config)
    }

    /// New configuration with the devices, mapping, specifications and snapshot of `other`,
    /// initialised right away.
    pub fn copy_from(name: &str, lab: &mut Laboratory, other: &ExperimentConfiguration) -> Result<Self> {
        let mut config = other.clone();
        config.name = name.to_string();
        config.init(lab)?;
        Ok(config)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn hal_names(&self) -> &[String] {
        &self.hal_names
    }
    pub fn acq_name(&self) -> Option<&str> {
        self.acq_name.as_deref()
    }
    pub fn proc_names(&self) -> &[String] {
        &self.proc_names
    }
    pub fn spec_names(&self) -> &[String] {
        &self.spec_names
    }
    pub fn mapping(&self) -> &WaveformMapper {
        &self.mapping
    }
    pub fn snapshot(&self) -> &ConfigSnapshot {
        &self.snapshot
    }

    pub fn repetition_time(&self) -> f64 {
        self.repetition_time
    }
    pub fn set_repetition_time(&mut self, repetition_time: f64) -> Result<()> {
        self.repetition_time = check_repetition_time(repetition_time)?;
        Ok(())
    }

    pub fn update_specs(&mut self, lab: &Laboratory, spec_names: &[&str]) -> Result<()> {
        for spec in spec_names {
            lab.specification(spec)?;
        }
        self.spec_names = spec_names.iter().map(|s| s.to_string()).collect();
        Ok(())
    }

    fn check_member(&self, kind: &'static str, name: &str, members: &[String]) -> Result<()> {
        if members.iter().any(|m| m == name) {
            Ok(())
        } else {
            Err(TimingError::NotInConfiguration {
                kind,
                name: name.to_string(),
                config: self.name.clone(),
            })
        }
    }

    /// Captures the current state of every participant into the snapshot.
    pub fn save(&mut self, lab: &Laboratory) -> Result<()> {
        self.proc_names = match &self.acq_name {
            Some(acq) => lab.hal_as::<Acquisition>(acq)?.processors(),
            None => Vec::new(),
        };
        let hals = self
            .hal_names
            .iter()
            .map(|name| Ok(lab.hal(name)?.get_current_config()))
            .collect::<Result<Vec<Value>>>()?;
        let procs = self
            .proc_names
            .iter()
            .map(|name| Ok(lab.processor(name)?.get_current_config()))
            .collect::<Result<Vec<Value>>>()?;
        self.snapshot = ConfigSnapshot {
            hals,
            procs,
            repetition_time: self.repetition_time,
            waveform_mapping: self.mapping.clone(),
            specs: self.spec_names.clone(),
        };
        log::info!("Saved configuration {}", self.name);
        Ok(())
    }

    /// The snapshot as a dictionary.
    pub fn get_config(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.snapshot)?)
    }

    /// Adopts a snapshot dictionary. Every HAL and processor it lists must belong to this
    /// configuration. With `commit_changes` the dictionaries are also replayed onto the devices;
    /// without it only the configuration's own fields are replaced.
    pub fn update_config(
        &mut self,
        lab: &mut Laboratory,
        config: &Value,
        commit_changes: bool,
    ) -> Result<()> {
        let snapshot: ConfigSnapshot = serde_json::from_value(config.clone())?;
        check_repetition_time(snapshot.repetition_time)?;
        for hal in snapshot.hals.iter() {
            self.check_member("HAL", config_name(hal), &self.hal_names)?;
        }
        let proc_names = snapshot
            .hals
            .iter()
            .find(|hal| Some(config_name(hal)) == self.acq_name.as_deref())
            .map(processors_in_config)
            .unwrap_or_default();
        for proc in snapshot.procs.iter() {
            self.check_member("PROC", config_name(proc), &proc_names)?;
        }
        for spec in snapshot.specs.iter() {
            lab.specification(spec)?;
        }

        if commit_changes {
            // Nothing is written until every dictionary has replayed cleanly on a copy
            snapshot.waveform_mapping.validate(lab)?;
            for hal in snapshot.hals.iter() {
                lab.hal(config_name(hal))?.check_config(hal)?;
            }
            for proc in snapshot.procs.iter() {
                lab.processor(config_name(proc))?.check_config(proc)?;
            }
            for hal in snapshot.hals.iter() {
                lab.hal_(config_name(hal))?.set_current_config(hal)?;
            }
            for proc in snapshot.procs.iter() {
                lab.processor_(config_name(proc))?.set_current_config(proc)?;
            }
            log::info!("Replayed configuration {} onto the lab", self.name);
        }

        self.repetition_time = snapshot.repetition_time;
        self.mapping = snapshot.waveform_mapping.clone();
        self.spec_names = snapshot.specs.clone();
        self.proc_names = proc_names;
        self.snapshot = snapshot;
        Ok(())
    }

    /// Replays the snapshot onto the devices.
    pub fn update(&mut self, lab: &mut Laboratory) -> Result<()> {
        let config = self.get_config()?;
        self.update_config(lab, &config, true)
    }

    /// Replays the snapshot with every specification target locked, then commits the
    /// specifications.
    pub fn init(&mut self, lab: &mut Laboratory) -> Result<()> {
        let mut targets: Vec<PropertyTarget> = Vec::new();
        for spec in self.spec_names.iter() {
            targets.extend(lab.specification(spec)?.get_targets());
        }

        let mut locked: Vec<PropertyTarget> = Vec::new();
        let mut result = Ok(());
        for target in targets {
            match lab.lock_property(&target) {
                Ok(()) => locked.push(target),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        if result.is_ok() {
            result = self.update(lab);
        }
        for target in locked.iter() {
            lab.unlock_property(target)?;
        }
        result?;

        for spec in self.spec_names.clone() {
            lab.commit_specification(&spec)?;
        }
        log::info!("Initialised configuration {}", self.name);
        Ok(())
    }

    /// Replaces the waveform mapping. Mapped devices and markers must exist.
    pub fn map_waveforms(&mut self, lab: &Laboratory, mapping: WaveformMapper) -> Result<()> {
        mapping.validate(lab)?;
        self.mapping = mapping;
        Ok(())
    }

    /// Programs the logical tracks of `generic` onto the mapped AWGs and markers, and returns a
    /// live handle for every variable request.
    ///
    /// The AWGs are reprogrammed as copies and written back together, so a failing track or
    /// request leaves every device as it was.
    pub fn update_waveforms(
        &self,
        lab: &mut Laboratory,
        generic: &WaveformGeneric,
        variable_requests: &[VariableRequest],
    ) -> Result<Vec<PropertyHandle>> {
        let mut staged: IndexMap<String, WaveformAwg> = IndexMap::new();
        for (logical, segments) in generic.waveforms.iter() {
            let device = self.mapping.waveform_device(logical)?;
            self.check_member("HAL", device, &self.hal_names)?;
            let awg = stage_awg(&mut staged, lab, device)?;
            awg.set_waveform_segments(segments.clone())?;
            awg.set_all_markers_to_none();
        }

        for (logical, spec) in generic.digital.iter() {
            for marker_path in self.mapping.digital_markers(logical)? {
                let device = marker_path.root_name();
                self.check_member("HAL", device, &self.hal_names)?;
                let marker_name = marker_path.leaf().map_or("", |node| node.name.as_str());
                match spec {
                    DigitalSpec::Segments {
                        waveform,
                        segments,
                        polarity,
                    } => {
                        let ref_device = self.mapping.waveform_device(waveform)?;
                        if ref_device == device {
                            stage_awg(&mut staged, lab, device)?.set_marker_segments(
                                marker_name,
                                segments.clone(),
                                *polarity,
                            )?;
                        } else {
                            let bits = stage_awg(&mut staged, lab, ref_device)?
                                .segment_bit_pattern(segments, *polarity)?;
                            let awg = stage_awg(&mut staged, lab, device)?;
                            let num_samples = awg.num_samples()?;
                            if bits.len() != num_samples {
                                return Err(TimingError::SampleCountMismatch {
                                    device: device.to_string(),
                                    marker_samples: bits.len(),
                                    reference_samples: num_samples,
                                });
                            }
                            let marker = awg.marker_(marker_name)?;
                            marker.set_polarity(*polarity);
                            marker.set_markers_to_arbitrary(bits)?;
                        }
                    }
                    DigitalSpec::Trigger {
                        delay,
                        length,
                        polarity,
                    } => {
                        let marker = stage_awg(&mut staged, lab, device)?.marker_(marker_name)?;
                        marker.set_markers_to_trigger();
                        marker.set_trig_pulse_delay(*delay)?;
                        marker.set_trig_pulse_length(*length)?;
                        marker.set_polarity(*polarity);
                    }
                }
            }
        }

        let mut handles = Vec::with_capacity(variable_requests.len());
        for request in variable_requests {
            let device = self.mapping.waveform_device(&request.waveform)?;
            let awg = match staged.get(device) {
                Some(awg) => awg,
                None => lab.hal_as::<WaveformAwg>(device)?,
            };
            awg.waveform().segment(&request.segment)?;
            let target = PropertyTarget::new(awg.segment_path(&request.segment), &request.property);
            awg.get_property(&target.path, &target.property)?;
            handles.push(PropertyHandle {
                name: request.name.clone(),
                target,
            });
        }

        for (device, awg) in staged {
            *lab.hal_as_::<WaveformAwg>(&device)? = awg;
        }
        Ok(handles)
    }

    /// Global trigger edges of `sink`.
    pub fn get_trigger_edges(&self, lab: &Laboratory, sink: &ObjectPath) -> Result<ResolvedTrigger> {
        lab.get_trigger_edges(sink)
    }

    /// As [`Self::get_trigger_edges`], additionally requiring every HAL in the trigger chain to be
    /// a participant of this configuration.
    pub fn check_trigger_dependencies(
        &self,
        lab: &Laboratory,
        sink: &ObjectPath,
    ) -> Result<ResolvedTrigger> {
        let resolved = lab.get_trigger_edges(sink)?;
        for link in resolved.chain.iter() {
            let device = link.source.root_name();
            if !self.hal_names.iter().any(|h| h == device) {
                return Err(TimingError::UndeclaredTriggerDependency {
                    device: device.to_string(),
                    sink: sink.to_string(),
                    config: self.name.clone(),
                });
            }
        }
        Ok(resolved)
    }

    /// Lays out a timing diagram row for every drawable object of every participant.
    ///
    /// Objects of triggered HALs are placed at their resolved trigger times; outputs of trigger
    /// roots are placed once, at `t = 0`.
    pub fn timing_diagram(&self, lab: &Laboratory) -> Result<TimingDiagram> {
        let unit = TimeUnit::for_repetition_time(self.repetition_time);
        let mut rows = Vec::new();
        for hal_name in self.hal_names.iter() {
            let hal = lab.hal(hal_name)?;
            for object in hal.diagram_objects() {
                let object_name = object.to_string();
                let info = hal.diagram_info(&object)?;
                let (edges, gated) = if hal.is_trigger_input_capable() {
                    let resolved = self.check_trigger_dependencies(lab, &object)?;
                    (resolved.edges, resolved.gated)
                } else {
                    (array![0.0], Array2::zeros((0, 2)))
                };
                rows.push(layout_row(&object_name, &info, &edges, &gated, unit)?);
            }
        }
        Ok(TimingDiagram {
            unit,
            end: self.repetition_time * unit.scale(),
            rows,
        })
    }
}

fn check_repetition_time(repetition_time: f64) -> Result<f64> {
    if !(repetition_time > 0.0) {
        return Err(TimingError::invalid_value(
            "RepetitionTime",
            format!("{} must be positive", repetition_time),
        ));
    }
    Ok(repetition_time)
}

impl fmt::Display for ExperimentConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration {}", self.name)?;
        writeln!(f, "  Repetition time: {} s", self.repetition_time)?;
        writeln!(f, "  HALs: {}", self.hal_names.join(", "))?;
        if let Some(acq) = &self.acq_name {
            writeln!(f, "  Acquisition: {}", acq)?;
        }
        if !self.proc_names.is_empty() {
            writeln!(f, "  Processors: {}", self.proc_names.join(", "))?;
        }
        if !self.spec_names.is_empty() {
            writeln!(f, "  Specifications: {}", self.spec_names.join(", "))?;
        }
        for (logical, device) in self.mapping.waveforms() {
            writeln!(f, "  Waveform {} -> {}", logical, device)?;
        }
        for (logical, markers) in self.mapping.digital() {
            let markers: Vec<String> = markers.iter().map(|m| m.to_string()).collect();
            writeln!(f, "  Digital {} -> {}", logical, markers.join(", "))?;
        }
        Ok(())
    }
}
