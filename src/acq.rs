// The "acq" module models an acquisition digitizer. It is triggered through a single input on the
// HAL itself and records NumSamples samples per trigger. The names of the data processors it feeds
// are what an experiment configuration settles its processor list from.
use std::any::Any;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::device::*;
use crate::diagram::{DiagramInfo, DiagramTrigger};
use crate::error::{Result, TimingError};
use crate::path::*;
use crate::trigger::*;
use crate::utils::*;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct AcqSettings {
    #[serde(rename = "NumSamples")]
    num_samples: usize,
    #[serde(rename = "NumSegments")]
    num_segments: usize,
    #[serde(rename = "NumRepetitions")]
    num_repetitions: usize,
    #[serde(rename = "SampleRate")]
    samp_rate: f64,
    #[serde(flatten)]
    input: TriggerInput,
    #[serde(rename = "Processor")]
    processor: Option<String>,
    #[serde(rename = "ExProcessors")]
    ex_processors: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Acquisition {
    name: String,
    settings: AcqSettings,
    locks: PropertyLocks,
}

impl Acquisition {
    pub fn new(name: &str) -> Self {
        Acquisition {
            name: name.to_string(),
            settings: AcqSettings {
                num_samples: 1024,
                num_segments: 1,
                num_repetitions: 1,
                samp_rate: 1e9,
                input: TriggerInput::default(),
                processor: None,
                ex_processors: Vec::new(),
            },
            locks: PropertyLocks::new(),
        }
    }

    pub fn num_samples(&self) -> usize {
        self.settings.num_samples
    }
    pub fn num_segments(&self) -> usize {
        self.settings.num_segments
    }
    pub fn num_repetitions(&self) -> usize {
        self.settings.num_repetitions
    }
    pub fn sample_rate(&self) -> f64 {
        self.settings.samp_rate
    }
    pub fn input(&self) -> &TriggerInput {
        &self.settings.input
    }

    pub fn set_num_samples(&mut self, num_samples: usize) {
        self.settings.num_samples = num_samples;
    }
    pub fn set_num_segments(&mut self, num_segments: usize) {
        self.settings.num_segments = num_segments;
    }
    pub fn set_num_repetitions(&mut self, num_repetitions: usize) {
        self.settings.num_repetitions = num_repetitions;
    }
    pub fn set_sample_rate(&mut self, samp_rate: f64) -> Result<()> {
        if !(samp_rate > 0.0) {
            return Err(TimingError::invalid_value(
                format!("SampleRate of {}", self.name),
                "must be positive",
            ));
        }
        self.settings.samp_rate = samp_rate;
        Ok(())
    }

    /// Acquisition window following each trigger.
    pub fn acquisition_time(&self) -> f64 {
        self.settings.num_samples as f64 / self.settings.samp_rate
    }

    pub fn set_data_processor(&mut self, processor: Option<&str>) {
        self.settings.processor = processor.map(str::to_string);
    }

    pub fn add_ex_processor(&mut self, processor: &str) {
        if !self.settings.ex_processors.iter().any(|p| p == processor) {
            self.settings.ex_processors.push(processor.to_string());
        }
    }

    pub fn clear_ex_processors(&mut self) {
        self.settings.ex_processors.clear();
    }

    /// Processors in use: the data processor followed by the extra processors.
    pub fn processors(&self) -> Vec<String> {
        self.settings
            .processor
            .iter()
            .chain(self.settings.ex_processors.iter())
            .cloned()
            .collect()
    }

    fn check_root(&self, path: &ObjectPath) -> Result<()> {
        if path.root_name() == self.name && path.tail().is_empty() {
            Ok(())
        } else {
            Err(TimingError::NotTriggerInput { path: path.clone() })
        }
    }
}

/// Processor names listed by an acquisition configuration dictionary.
pub fn processors_in_config(config: &Value) -> Vec<String> {
    let mut procs: Vec<String> = config
        .get("Processor")
        .and_then(Value::as_str)
        .map(|p| vec![p.to_string()])
        .unwrap_or_default();
    if let Some(extra) = config.get("ExProcessors").and_then(Value::as_array) {
        procs.extend(extra.iter().filter_map(Value::as_str).map(str::to_string));
    }
    procs
}

impl HalDevice for Acquisition {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> HalKind {
        HalKind::ACQ
    }

    fn get_current_config(&self) -> Value {
        let s = &self.settings;
        json!({
            "Name": self.name,
            "Type": HalKind::ACQ.to_string(),
            "NumSamples": s.num_samples,
            "NumSegments": s.num_segments,
            "NumRepetitions": s.num_repetitions,
            "SampleRate": s.samp_rate,
            "TriggerSource": s.input.source(),
            "InputTriggerEdge": s.input.edge(),
            "Processor": s.processor,
            "ExProcessors": s.ex_processors,
        })
    }

    fn check_config(&self, config: &Value) -> Result<()> {
        self.clone().set_current_config(config)
    }

    fn set_current_config(&mut self, config: &Value) -> Result<()> {
        check_config_type(&self.name, "ACQ", config)?;
        let new: AcqSettings = serde_json::from_value(config.clone())?;
        if !(new.samp_rate > 0.0) {
            return Err(TimingError::invalid_value("SampleRate", "must be positive"));
        }
        let locks = &self.locks;
        let cur = &mut self.settings;
        replay(locks, "", "NumSamples", &mut cur.num_samples, new.num_samples);
        replay(locks, "", "NumSegments", &mut cur.num_segments, new.num_segments);
        replay(locks, "", "NumRepetitions", &mut cur.num_repetitions, new.num_repetitions);
        replay(locks, "", "SampleRate", &mut cur.samp_rate, new.samp_rate);
        let mut edge = cur.input.edge();
        replay(locks, "", "InputTriggerEdge", &mut edge, new.input.edge());
        cur.input.set_edge(edge);
        let mut source = cur.input.source().cloned();
        replay(locks, "", "TriggerSource", &mut source, new.input.source().cloned());
        cur.input.set_source(source);
        replay(locks, "", "Processor", &mut cur.processor, new.processor);
        replay(locks, "", "ExProcessors", &mut cur.ex_processors, new.ex_processors);
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
        let s = &self.settings;
        match property {
            "NumSamples" => Ok(json!(s.num_samples)),
            "NumSegments" => Ok(json!(s.num_segments)),
            "NumRepetitions" => Ok(json!(s.num_repetitions)),
            "SampleRate" => Ok(json!(s.samp_rate)),
            "InputTriggerEdge" => Ok(json!(s.input.edge())),
            "TriggerSource" => Ok(json!(s.input.source())),
            "Processor" => Ok(json!(s.processor)),
            "ExProcessors" => Ok(json!(s.ex_processors)),
            _ => Err(unknown_property(path, property)),
        }
    }

    fn set_property(&mut self, path: &ObjectPath, property: &str, value: &Value) -> Result<()> {
        if !path.tail().is_empty() {
            return Err(unknown_object(path));
        }
        let what = format!("{}.{}", path, property);
        match property {
            "NumSamples" => self.set_num_samples(value_as_usize(&what, value)?),
            "NumSegments" => self.set_num_segments(value_as_usize(&what, value)?),
            "NumRepetitions" => self.set_num_repetitions(value_as_usize(&what, value)?),
            "SampleRate" => self.set_sample_rate(value_as_f64(&what, value)?)?,
            "InputTriggerEdge" => self
                .settings
                .input
                .set_edge(value_as_polarity(&what, value)?),
            "TriggerSource" => self
                .settings
                .input
                .set_source(serde_json::from_value(value.clone())?),
            "Processor" => self.settings.processor = serde_json::from_value(value.clone())?,
            "ExProcessors" => self.settings.ex_processors = serde_json::from_value(value.clone())?,
            _ => return Err(unknown_property(path, property)),
        }
        Ok(())
    }

    fn is_trigger_input_capable(&self) -> bool {
        true
    }

    fn trigger_input_path(&self, path: &ObjectPath) -> Result<ObjectPath> {
        self.check_root(path)?;
        Ok(self.path())
    }
    fn trigger_input(&self, path: &ObjectPath) -> Result<&TriggerInput> {
        self.check_root(path)?;
        Ok(&self.settings.input)
    }
    fn trigger_input_(&mut self, path: &ObjectPath) -> Result<&mut TriggerInput> {
        self.check_root(path)?;
        Ok(&mut self.settings.input)
    }
    fn trigger_inputs(&self) -> Vec<ObjectPath> {
        vec![self.path()]
    }

    fn diagram_info(&self, _path: &ObjectPath) -> Result<DiagramInfo> {
        Ok(DiagramInfo::BlockShaded {
            trigger_type: DiagramTrigger::Edge,
            period: Some(self.acquisition_time()),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
