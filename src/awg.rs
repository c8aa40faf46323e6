//! Models an arbitrary waveform generator (AWG) playing one segmented waveform on several
//! output channels.
//!
//! The waveform layout ([`Waveform`]) is shared by every channel of the AWG; each channel scales it
//! by its own amplitude and offset and is triggered through its own [`TriggerInput`]. Every
//! channel carries a fixed number of digital markers named `<channel>_mkr<n>`, counting from 1.
//!
//! Paths inside the AWG:
//!
//! | Object  | Path                                        |
//! |---------|---------------------------------------------|
//! | channel | `[(awg, HAL), (CH1, CH)]`                   |
//! | marker  | `[(awg, HAL), (CH1, CH), (CH1_mkr1, MKR)]`  |
//! | segment | `[(awg, HAL), (init, SEG)]`                 |
//!
//! A marker is fired whenever its channel is triggered, so the trigger input governing a marker
//! is the input of its channel.

use std::any::Any;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::device::*;
use crate::diagram::{AnalogueBlock, DiagramInfo};
use crate::error::{Result, TimingError};
use crate::marker::*;
use crate::path::*;
use crate::segment::WaveformSegment;
use crate::trigger::*;
use crate::utils::*;
use crate::waveform::Waveform;

const MAX_DIAGRAM_POINTS: usize = 50;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AwgChannel {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Amplitude")]
    amplitude: f64,
    #[serde(rename = "Offset")]
    offset: f64,
    #[serde(rename = "Output")]
    output: bool,
    #[serde(flatten)]
    input: TriggerInput,
    #[serde(rename = "Markers")]
    markers: Vec<Marker>,
}

impl AwgChannel {
    fn new(name: &str, num_markers: usize) -> Self {
        AwgChannel {
            name: name.to_string(),
            amplitude: 1.0,
            offset: 0.0,
            output: false,
            input: TriggerInput::default(),
            markers: (1..=num_markers)
                .map(|i| Marker::new(&format!("{}_mkr{}", name, i)))
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }
    pub fn offset(&self) -> f64 {
        self.offset
    }
    pub fn output(&self) -> bool {
        self.output
    }
    pub fn input(&self) -> &TriggerInput {
        &self.input
    }
    pub fn input_(&mut self) -> &mut TriggerInput {
        &mut self.input
    }
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn set_amplitude(&mut self, amplitude: f64) {
        self.amplitude = amplitude;
    }
    pub fn set_offset(&mut self, offset: f64) {
        self.offset = offset;
    }
    pub fn set_output(&mut self, output: bool) {
        self.output = output;
    }

    fn marker_names(&self) -> Vec<&str> {
        self.markers.iter().map(|m| m.name()).collect()
    }
}

#[derive(Deserialize)]
struct AwgConfig {
    #[serde(rename = "SampleRate")]
    samp_rate: f64,
    #[serde(rename = "TotalTime")]
    total_time: Option<f64>,
    #[serde(rename = "WaveformSegments")]
    segments: Vec<WaveformSegment>,
    #[serde(rename = "Channels")]
    channels: Vec<AwgChannel>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WaveformAwg {
    name: String,
    waveform: Waveform,
    channels: Vec<AwgChannel>,
    locks: PropertyLocks,
}

lazy_static! {
    static ref MARKER_NAME: Regex = Regex::new(r"^(?P<chan>.+)_mkr(?P<num>\d+)$").unwrap();
}

/// Splits a marker name such as `CH2_mkr1` into its channel name and marker number.
pub fn split_marker_name(marker: &str) -> Result<(String, usize)> {
    let caps = MARKER_NAME.captures(marker).ok_or_else(|| {
        TimingError::invalid_value(
            format!("marker name {}", marker),
            "expected <channel>_mkr<number>",
        )
    })?;
    let num = caps["num"].parse::<usize>().map_err(|e| {
        TimingError::invalid_value(format!("marker name {}", marker), e.to_string())
    })?;
    Ok((caps["chan"].to_string(), num))
}

impl WaveformAwg {
    pub fn new(name: &str, channel_names: &[&str], samp_rate: f64, markers_per_channel: usize) -> Self {
        WaveformAwg {
            name: name.to_string(),
            waveform: Waveform::new(name, samp_rate),
            channels: channel_names
                .iter()
                .map(|ch| AwgChannel::new(ch, markers_per_channel))
                .collect(),
            locks: PropertyLocks::new(),
        }
    }

    pub fn waveform(&self) -> &Waveform {
        &self.waveform
    }
    pub fn channels(&self) -> &[AwgChannel] {
        &self.channels
    }

    pub fn sample_rate(&self) -> f64 {
        self.waveform.samp_rate()
    }
    pub fn set_sample_rate(&mut self, samp_rate: f64) -> Result<()> {
        self.waveform.set_samp_rate(samp_rate)
    }
    pub fn set_total_time(&mut self, total_time: Option<f64>) -> Result<()> {
        if let Some(t) = total_time {
            non_negative(&format!("TotalTime of {}", self.name), t)?;
        }
        self.waveform.set_total_time(total_time);
        Ok(())
    }

    pub fn set_waveform_segments(&mut self, segments: Vec<WaveformSegment>) -> Result<()> {
        self.waveform.set_segments(segments)
    }
    pub fn add_segment(&mut self, segment: WaveformSegment) -> Result<()> {
        self.waveform.add_segment(segment)
    }

    pub fn num_samples(&self) -> Result<usize> {
        self.waveform.num_samples()
    }

    pub fn channel(&self, channel: &str) -> Result<&AwgChannel> {
        self.channels
            .iter()
            .find(|ch| ch.name == channel)
            .ok_or_else(|| TimingError::NotFound {
                kind: "Channel",
                name: format!("{}/{}", self.name, channel),
            })
    }

    pub fn channel_(&mut self, channel: &str) -> Result<&mut AwgChannel> {
        let name = &self.name;
        self.channels
            .iter_mut()
            .find(|ch| ch.name == channel)
            .ok_or_else(|| TimingError::NotFound {
                kind: "Channel",
                name: format!("{}/{}", name, channel),
            })
    }

    fn locate_marker(&self, marker: &str) -> Result<(usize, usize)> {
        let (chan, _) = split_marker_name(marker)?;
        let not_found = || TimingError::NotFound {
            kind: "Marker",
            name: format!("{}/{}", self.name, marker),
        };
        let ch_idx = self
            .channels
            .iter()
            .position(|ch| ch.name == chan)
            .ok_or_else(not_found)?;
        let mkr_idx = self.channels[ch_idx]
            .markers
            .iter()
            .position(|m| m.name() == marker)
            .ok_or_else(not_found)?;
        Ok((ch_idx, mkr_idx))
    }

    pub fn marker(&self, marker: &str) -> Result<&Marker> {
        let (ch, mkr) = self.locate_marker(marker)?;
        Ok(&self.channels[ch].markers[mkr])
    }

    pub fn marker_(&mut self, marker: &str) -> Result<&mut Marker> {
        let (ch, mkr) = self.locate_marker(marker)?;
        Ok(&mut self.channels[ch].markers[mkr])
    }

    pub fn marker_view(&self, marker: &str) -> Result<MarkerView<'_>> {
        Ok(self.marker(marker)?.view(&self.waveform))
    }

    pub fn channel_path(&self, channel: &str) -> ObjectPath {
        self.path().child(channel, PathRole::Channel)
    }

    /// Path of a marker, given by its full name (`CH1_mkr2`).
    pub fn marker_path(&self, marker: &str) -> Result<ObjectPath> {
        let (chan, _) = split_marker_name(marker)?;
        self.marker(marker)?;
        Ok(self.channel_path(&chan).child(marker, PathRole::Marker))
    }

    pub fn segment_path(&self, segment: &str) -> ObjectPath {
        self.path().child(segment, PathRole::Segment)
    }

    /// Silences every marker of every channel.
    pub fn set_all_markers_to_none(&mut self) {
        for ch in self.channels.iter_mut() {
            for mkr in ch.markers.iter_mut() {
                mkr.set_markers_to_none();
            }
        }
    }

    /// Puts a marker in Segments mode. Every segment must belong to this AWG's waveform.
    pub fn set_marker_segments(
        &mut self,
        marker: &str,
        segments: Vec<String>,
        polarity: Polarity,
    ) -> Result<()> {
        for segment in segments.iter() {
            self.waveform.segment(segment)?;
        }
        let mkr = self.marker_(marker)?;
        mkr.set_polarity(polarity);
        mkr.set_markers_to_segments(segments);
        Ok(())
    }

    /// Bit pattern active over the named segments of this AWG's waveform.
    pub fn segment_bit_pattern(&self, segments: &[String], polarity: Polarity) -> Result<Vec<u8>> {
        Ok(self
            .waveform
            .segment_bit_pattern(segments, polarity)?
            .to_vec())
    }

    fn channel_index(&self, node: &PathNode) -> Option<usize> {
        if node.role != PathRole::Channel {
            return None;
        }
        self.channels.iter().position(|ch| ch.name == node.name)
    }

    /// Channel and marker addressed by a path inside the AWG.
    fn resolve(&self, path: &ObjectPath) -> Option<AwgObject> {
        match path.tail() {
            [] => Some(AwgObject::Root),
            [node] if node.role == PathRole::Segment => Some(AwgObject::Segment(node.name.clone())),
            [chan] => self.channel_index(chan).map(AwgObject::Channel),
            [chan, mkr] if mkr.role == PathRole::Marker => {
                let ch = self.channel_index(chan)?;
                let m = self.channels[ch]
                    .markers
                    .iter()
                    .position(|m| m.name() == mkr.name)?;
                Some(AwgObject::Marker(ch, m))
            }
            _ => None,
        }
    }

    fn analogue_blocks(&self, channel: &AwgChannel) -> Result<Vec<AnalogueBlock>> {
        let durations = self.waveform.segment_durations()?;
        let lengths = self.waveform.segment_lengths()?;
        Ok(self
            .waveform
            .segments()
            .iter()
            .zip(durations.into_iter().zip(lengths))
            .map(|(seg, (duration, len))| {
                let num_points = len.clamp(2, MAX_DIAGRAM_POINTS);
                AnalogueBlock {
                    duration,
                    y_points: seg
                        .sample_points(duration, num_points)
                        .into_iter()
                        .map(|y| y * channel.amplitude + channel.offset)
                        .collect(),
                }
            })
            .collect())
    }
}

enum AwgObject {
    Root,
    Channel(usize),
    Marker(usize, usize),
    Segment(String),
}

impl HalDevice for WaveformAwg {
    fn name(&self) -> &str {
        &self.name
    }
    fn kind(&self) -> HalKind {
        HalKind::AWG
    }
    fn layout(&self) -> Value {
        let channels: Vec<Value> = self
            .channels
            .iter()
            .map(|ch| json!({"Name": ch.name, "Markers": ch.marker_names()}))
            .collect();
        json!({ "Channels": channels })
    }

    fn get_current_config(&self) -> Value {
        json!({
            "Name": self.name,
            "Type": HalKind::AWG.to_string(),
            "SampleRate": self.waveform.samp_rate(),
            "TotalTime": self.waveform.total_time(),
            "WaveformSegments": self.waveform.segments(),
            "Channels": self.channels,
        })
    }

    fn check_config(&self, config: &Value) -> Result<()> {
        self.clone().set_current_config(config)
    }

    fn set_current_config(&mut self, config: &Value) -> Result<()> {
        check_config_type(&self.name, "AWG", config)?;
        let conf: AwgConfig = serde_json::from_value(config.clone())?;

        let names: Vec<&str> = self.channels.iter().map(|ch| ch.name()).collect();
        let new_names: Vec<&str> = conf.channels.iter().map(|ch| ch.name()).collect();
        if names != new_names {
            return Err(TimingError::invalid_value(
                format!("Channels of {}", self.name),
                format!("expected {:?}, found {:?}", names, new_names),
            ));
        }
        for (ch, new_ch) in self.channels.iter().zip(conf.channels.iter()) {
            if ch.marker_names() != new_ch.marker_names() {
                return Err(TimingError::MarkerOrderChanged {
                    channel: ch.name.clone(),
                    expected: ch.marker_names().join(", "),
                    found: new_ch.marker_names().join(", "),
                });
            }
            for mkr in new_ch.markers.iter() {
                mkr.validate()?;
            }
        }
        // Validate the layout before touching anything
        let mut staged = self.waveform.clone();
        staged.set_samp_rate(conf.samp_rate)?;
        staged.set_segments(conf.segments.clone())?;

        let locks = &self.locks;
        let mut samp_rate = self.waveform.samp_rate();
        replay(locks, "", "SampleRate", &mut samp_rate, conf.samp_rate);
        self.waveform.set_samp_rate(samp_rate)?;
        let mut total_time = self.waveform.total_time();
        replay(locks, "", "TotalTime", &mut total_time, conf.total_time);
        self.waveform.set_total_time(total_time);
        let mut segments = self.waveform.segments().to_vec();
        replay(locks, "", "WaveformSegments", &mut segments, conf.segments);
        self.waveform.set_segments(segments)?;

        for (ch, new_ch) in self.channels.iter_mut().zip(conf.channels) {
            let scope = ch.name.clone();
            replay(locks, &scope, "Amplitude", &mut ch.amplitude, new_ch.amplitude);
            replay(locks, &scope, "Offset", &mut ch.offset, new_ch.offset);
            replay(locks, &scope, "Output", &mut ch.output, new_ch.output);
            let mut source = ch.input.source().cloned();
            replay(locks, &scope, "TriggerSource", &mut source, new_ch.input.source().cloned());
            ch.input.set_source(source);
            let mut edge = ch.input.edge();
            replay(locks, &scope, "InputTriggerEdge", &mut edge, new_ch.input.edge());
            ch.input.set_edge(edge);
            for (mkr, new_mkr) in ch.markers.iter_mut().zip(new_ch.markers) {
                let mkr_scope = format!("{}/{}", scope, mkr.name());
                mkr.replay_from(locks, &mkr_scope, new_mkr);
            }
        }
        Ok(())
    }

    fn locks(&self) -> &PropertyLocks {
        &self.locks
    }
    fn locks_(&mut self) -> &mut PropertyLocks {
        &mut self.locks
    }

    fn get_property(&self, path: &ObjectPath, property: &str) -> Result<Value> {
        match self.resolve(path).ok_or_else(|| unknown_object(path))? {
            AwgObject::Root => match property {
                "SampleRate" => Ok(json!(self.waveform.samp_rate())),
                "TotalTime" => Ok(json!(self.waveform.total_time())),
                _ => Err(unknown_property(path, property)),
            },
            AwgObject::Channel(idx) => {
                let ch = &self.channels[idx];
                match property {
                    "Amplitude" => Ok(json!(ch.amplitude)),
                    "Offset" => Ok(json!(ch.offset)),
                    "Output" => Ok(json!(ch.output)),
                    "InputTriggerEdge" => Ok(json!(ch.input.edge())),
                    "TriggerSource" => Ok(json!(ch.input.source())),
                    _ => Err(unknown_property(path, property)),
                }
            }
            AwgObject::Marker(ch, m) => {
                let view = self.channels[ch].markers[m].view(&self.waveform);
                match property {
                    "Status" => Ok(json!(view.marker().status())),
                    "TrigPulseDelay" => Ok(json!(view.trig_pulse_delay()?)),
                    "TrigPulseLength" => Ok(json!(view.trig_pulse_length()?)),
                    "TrigPolarity" => Ok(json!(view.trig_polarity()?)),
                    _ => Err(unknown_property(path, property)),
                }
            }
            AwgObject::Segment(seg) => self
                .waveform
                .segment(&seg)?
                .get_property(property)
                .ok_or_else(|| unknown_property(path, property)),
        }
    }

    fn set_property(&mut self, path: &ObjectPath, property: &str, value: &Value) -> Result<()> {
        let what = format!("{}.{}", path, property);
        match self.resolve(path).ok_or_else(|| unknown_object(path))? {
            AwgObject::Root => match property {
                "SampleRate" => self.set_sample_rate(value_as_f64(&what, value)?),
                "TotalTime" => match value {
                    Value::Null => self.set_total_time(None),
                    _ => self.set_total_time(Some(value_as_f64(&what, value)?)),
                },
                _ => Err(unknown_property(path, property)),
            },
            AwgObject::Channel(idx) => {
                let ch = &mut self.channels[idx];
                match property {
                    "Amplitude" => ch.amplitude = value_as_f64(&what, value)?,
                    "Offset" => ch.offset = value_as_f64(&what, value)?,
                    "Output" => ch.output = value_as_bool(&what, value)?,
                    "InputTriggerEdge" => ch.input.set_edge(value_as_polarity(&what, value)?),
                    "TriggerSource" => ch.input.set_source(serde_json::from_value(value.clone())?),
                    _ => return Err(unknown_property(path, property)),
                }
                Ok(())
            }
            AwgObject::Marker(ch, m) => {
                let mkr = &mut self.channels[ch].markers[m];
                match property {
                    "TrigPulseDelay" => mkr.set_trig_pulse_delay(value_as_f64(&what, value)?),
                    "TrigPulseLength" => mkr.set_trig_pulse_length(value_as_f64(&what, value)?),
                    "TrigPolarity" => {
                        mkr.set_polarity(value_as_polarity(&what, value)?);
                        Ok(())
                    }
                    _ => Err(unknown_property(path, property)),
                }
            }
            AwgObject::Segment(seg) => {
                if !self.waveform.segment_mut(&seg)?.set_property(property, value)? {
                    return Err(unknown_property(path, property));
                }
                Ok(())
            }
        }
    }

    fn is_trigger_input_capable(&self) -> bool {
        true
    }

    fn trigger_input_path(&self, path: &ObjectPath) -> Result<ObjectPath> {
        match self.resolve(path) {
            Some(AwgObject::Channel(idx)) | Some(AwgObject::Marker(idx, _)) => {
                Ok(self.channel_path(&self.channels[idx].name))
            }
            _ => Err(TimingError::NotTriggerInput { path: path.clone() }),
        }
    }

    fn trigger_input(&self, path: &ObjectPath) -> Result<&TriggerInput> {
        match self.resolve(path) {
            Some(AwgObject::Channel(idx)) | Some(AwgObject::Marker(idx, _)) => {
                Ok(&self.channels[idx].input)
            }
            _ => Err(TimingError::NotTriggerInput { path: path.clone() }),
        }
    }

    fn trigger_input_(&mut self, path: &ObjectPath) -> Result<&mut TriggerInput> {
        match self.resolve(path) {
            Some(AwgObject::Channel(idx)) | Some(AwgObject::Marker(idx, _)) => {
                Ok(&mut self.channels[idx].input)
            }
            _ => Err(TimingError::NotTriggerInput { path: path.clone() }),
        }
    }

    fn trigger_output(&self, path: &ObjectPath) -> Result<TriggerOutputView<'_>> {
        match self.resolve(path) {
            Some(AwgObject::Marker(ch, m)) => Ok(TriggerOutputView::Marker(
                self.channels[ch].markers[m].view(&self.waveform),
            )),
            _ => Err(TimingError::NotTriggerOutput { path: path.clone() }),
        }
    }

    fn trigger_inputs(&self) -> Vec<ObjectPath> {
        self.channels
            .iter()
            .map(|ch| self.channel_path(&ch.name))
            .collect()
    }

    fn trigger_outputs(&self) -> Vec<ObjectPath> {
        self.channels
            .iter()
            .flat_map(|ch| {
                let ch_path = self.channel_path(&ch.name);
                ch.markers
                    .iter()
                    .map(move |m| ch_path.child(m.name(), PathRole::Marker))
            })
            .collect()
    }

    /// Channels, each followed by its active markers.
    fn diagram_objects(&self) -> Vec<ObjectPath> {
        let mut objects = Vec::new();
        for ch in self.channels.iter() {
            let ch_path = self.channel_path(&ch.name);
            objects.push(ch_path.clone());
            objects.extend(
                ch.markers
                    .iter()
                    .filter(|m| m.status() != MarkerStatus::None)
                    .map(|m| ch_path.child(m.name(), PathRole::Marker)),
            );
        }
        objects
    }

    fn diagram_info(&self, path: &ObjectPath) -> Result<DiagramInfo> {
        match self.resolve(path).ok_or_else(|| unknown_object(path))? {
            AwgObject::Channel(idx) => {
                let data = self.analogue_blocks(&self.channels[idx])?;
                if data.is_empty() {
                    return Ok(DiagramInfo::None);
                }
                Ok(DiagramInfo::AnalogueSampled { data })
            }
            AwgObject::Marker(ch, m) => {
                let view = self.channels[ch].markers[m].view(&self.waveform);
                if view.marker().status() == MarkerStatus::None {
                    return Ok(DiagramInfo::None);
                }
                let bits = view.bit_array()?.to_vec();
                if bits.is_empty() {
                    return Ok(DiagramInfo::None);
                }
                Ok(DiagramInfo::DigitalSampled {
                    data: (bits, view.samp_rate()),
                })
            }
            _ => Ok(DiagramInfo::None),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
