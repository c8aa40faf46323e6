//! Python bindings, built with the `python` feature.
//!
//! The bindings keep Rust types out of the Python API: object paths are passed as lists of
//! `(name, role)` tuples using the role tags of [`PathRole`] (`"HAL"`, `"CH"`, `"MKR"`, ...),
//! and property values and configuration dictionaries are passed as JSON text. Errors surface as
//! `ValueError`.
//!
//! ```python
//! from labtiming_backend import Laboratory
//!
//! lab = Laboratory()
//! lab.add_ddg("DDG", ["A", "B"])
//! lab.add_acq("ACQ")
//! lab.set_trigger_source([("ACQ", "HAL")], [("DDG", "HAL"), ("A", "TRIG")])
//! edges, gated = lab.get_trigger_edges([("ACQ", "HAL")])
//! ```

use indexmap::IndexMap;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use serde_json::{json, Value};

use crate::acq::Acquisition;
use crate::awg::WaveformAwg;
use crate::ddg::DelayGenerator;
use crate::error::{Result, TimingError};
use crate::experiment::ExperimentConfiguration;
use crate::lab::Laboratory;
use crate::mw_source::MicrowaveSource;
use crate::path::*;
use crate::processor::Processor;
use crate::resolver::ResolvedTrigger;
use crate::specification::ExperimentSpecification;
use crate::utils::value_as_polarity;
use crate::volt_source::VoltageSource;

type PyPath = Vec<(String, String)>;

impl From<TimingError> for PyErr {
    fn from(err: TimingError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

fn to_path(nodes: PyPath) -> Result<ObjectPath> {
    Ok(serde_json::from_value(json!(nodes))?)
}

fn parse_json(text: &str) -> Result<Value> {
    Ok(serde_json::from_str(text)?)
}

fn trigger_arrays(py: Python, resolved: &ResolvedTrigger) -> (PyObject, PyObject) {
    (
        numpy::PyArray::from_array(py, &resolved.edges).to_object(py),
        numpy::PyArray::from_array(py, &resolved.gated).to_object(py),
    )
}

fn config_<'a>(
    configs: &'a mut IndexMap<String, ExperimentConfiguration>,
    name: &str,
) -> Result<&'a mut ExperimentConfiguration> {
    configs.get_mut(name).ok_or_else(|| TimingError::NotFound {
        kind: "Configuration",
        name: name.to_string(),
    })
}

/// A lab registry together with the experiment configurations defined on it.
#[pyclass(name = "Laboratory", unsendable)]
pub struct PyLaboratory {
    lab: Laboratory,
    configs: IndexMap<String, ExperimentConfiguration>,
}

#[pymethods]
impl PyLaboratory {
    #[new]
    fn new() -> Self {
        PyLaboratory {
            lab: Laboratory::new(),
            configs: IndexMap::new(),
        }
    }

    // HAL REGISTRATION
    fn add_ddg(&mut self, name: &str, outputs: Vec<&str>) -> PyResult<()> {
        self.lab.add_hal(DelayGenerator::new(name, &outputs))?;
        Ok(())
    }

    fn add_awg(
        &mut self,
        name: &str,
        channels: Vec<&str>,
        samp_rate: f64,
        markers_per_channel: usize,
    ) -> PyResult<()> {
        self.lab
            .add_hal(WaveformAwg::new(name, &channels, samp_rate, markers_per_channel))?;
        Ok(())
    }

    fn add_acq(&mut self, name: &str) -> PyResult<()> {
        self.lab.add_hal(Acquisition::new(name))?;
        Ok(())
    }

    fn add_mw_source(&mut self, name: &str) -> PyResult<()> {
        self.lab.add_hal(MicrowaveSource::new(name))?;
        Ok(())
    }

    fn add_volt_source(&mut self, name: &str) -> PyResult<()> {
        self.lab.add_hal(VoltageSource::new(name))?;
        Ok(())
    }

    fn add_processor(&mut self, name: &str) {
        self.lab.add_processor(Processor::new(name));
    }

    fn add_specification(&mut self, name: &str) {
        self.lab.add_specification(ExperimentSpecification::new(name));
    }

    fn hal_names(&self) -> Vec<String> {
        self.lab.hal_names().iter().map(|s| s.to_string()).collect()
    }

    // PROPERTIES AND CONFIGURATIONS
    fn get_property(&self, path: PyPath, property: &str) -> PyResult<String> {
        let target = PropertyTarget::new(to_path(path)?, property);
        Ok(self.lab.get_property(&target)?.to_string())
    }

    fn set_property(&mut self, path: PyPath, property: &str, value: &str) -> PyResult<()> {
        let target = PropertyTarget::new(to_path(path)?, property);
        self.lab.set_property(&target, &parse_json(value)?)?;
        Ok(())
    }

    fn get_hal_config(&self, name: &str) -> PyResult<String> {
        Ok(self.lab.hal(name)?.get_current_config().to_string())
    }

    fn set_hal_config(&mut self, name: &str, config: &str) -> PyResult<()> {
        self.lab.hal_(name)?.set_current_config(&parse_json(config)?)?;
        Ok(())
    }

    fn add_spec_entry(&mut self, spec: &str, entry: &str, value: &str) -> PyResult<()> {
        self.lab
            .specification_(spec)?
            .add(entry, parse_json(value)?)?;
        Ok(())
    }

    fn set_spec_destination(
        &mut self,
        spec: &str,
        entry: &str,
        path: PyPath,
        property: &str,
    ) -> PyResult<()> {
        let target = PropertyTarget::new(to_path(path)?, property);
        self.lab.specification_(spec)?.set_destination(entry, target)?;
        Ok(())
    }

    // TRIGGERS
    fn set_trigger_source(&mut self, sink: PyPath, source: Option<PyPath>) -> PyResult<()> {
        let source = source.map(to_path).transpose()?;
        self.lab.set_trigger_source(&to_path(sink)?, source.as_ref())?;
        Ok(())
    }

    fn set_input_trigger_edge(&mut self, sink: PyPath, edge: u8) -> PyResult<()> {
        let edge = value_as_polarity("InputTriggerEdge", &json!(edge))?;
        self.lab.set_input_trigger_edge(&to_path(sink)?, edge)?;
        Ok(())
    }

    /// Returns `(edges, gated)` as numpy arrays of shapes `(N,)` and `(M, 2)`.
    fn get_trigger_edges(&self, sink: PyPath, py: Python) -> PyResult<(PyObject, PyObject)> {
        let resolved = self.lab.get_trigger_edges(&to_path(sink)?)?;
        Ok(trigger_arrays(py, &resolved))
    }

    // EXPERIMENT CONFIGURATIONS
    fn add_configuration(
        &mut self,
        name: &str,
        repetition_time: f64,
        hal_names: Vec<&str>,
        acq_name: Option<&str>,
        spec_names: Vec<&str>,
    ) -> PyResult<()> {
        let config = ExperimentConfiguration::new(
            name,
            &self.lab,
            repetition_time,
            &hal_names,
            acq_name,
            &spec_names,
        )?;
        self.configs.insert(name.to_string(), config);
        Ok(())
    }

    fn copy_configuration(&mut self, name: &str, other: &str) -> PyResult<()> {
        let other = config_(&mut self.configs, other)?.clone();
        let config = ExperimentConfiguration::copy_from(name, &mut self.lab, &other)?;
        self.configs.insert(name.to_string(), config);
        Ok(())
    }

    fn save_configuration(&mut self, name: &str) -> PyResult<()> {
        config_(&mut self.configs, name)?.save(&self.lab)?;
        Ok(())
    }

    fn update_configuration(&mut self, name: &str) -> PyResult<()> {
        config_(&mut self.configs, name)?.update(&mut self.lab)?;
        Ok(())
    }

    fn init_configuration(&mut self, name: &str) -> PyResult<()> {
        config_(&mut self.configs, name)?.init(&mut self.lab)?;
        Ok(())
    }

    fn get_configuration(&mut self, name: &str) -> PyResult<String> {
        Ok(config_(&mut self.configs, name)?.get_config()?.to_string())
    }

    fn set_configuration(&mut self, name: &str, config: &str, commit_changes: bool) -> PyResult<()> {
        let config = parse_json(config)?;
        config_(&mut self.configs, name)?.update_config(&mut self.lab, &config, commit_changes)?;
        Ok(())
    }

    fn configuration_trigger_edges(
        &mut self,
        name: &str,
        sink: PyPath,
        py: Python,
    ) -> PyResult<(PyObject, PyObject)> {
        let resolved =
            config_(&mut self.configs, name)?.check_trigger_dependencies(&self.lab, &to_path(sink)?)?;
        Ok(trigger_arrays(py, &resolved))
    }

    fn describe_configuration(&mut self, name: &str) -> PyResult<String> {
        Ok(config_(&mut self.configs, name)?.to_string())
    }
}

#[pymodule]
fn labtiming_backend(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyLaboratory>()?;
    Ok(())
}
