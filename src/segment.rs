//! Provides definitions for the segments an AWG waveform is assembled from.
//!
//! ## Main Structures and Enumerations:
//!
//! - `ShapeType`: the sample shapes a segment can carry: `CONST`, `GAUSSIAN` and `SINE`.
//!
//! - `SegmentShape`: a shape type plus its argument dictionary (`ShapeArgs`). Offers checked
//!   constructors and in-place evaluation over a time array.
//!
//! - `SegmentDuration`: either a fixed duration in seconds or an elastic duration which fills
//!   the time left over in the waveform, shared with the other elastic segments by weight.
//!
//! - `WaveformSegment`: a named segment, the unit that markers reference by name.
//!
//! The module makes use of the `maplit` crate to enable easy creation of argument dictionaries.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;

use maplit::hashmap;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TimingError};
use crate::utils::*;

/// Type alias for shape arguments: a dictionary with key-value pairs of
/// string (argument name) and float (value)
pub type ShapeArgs = HashMap<String, f64>;

/// Enum type for the different segment shapes. Supported shapes: `CONST`, `GAUSSIAN`, `SINE`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShapeType {
    CONST,
    GAUSSIAN,
    SINE,
}
impl fmt::Display for ShapeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ShapeType::CONST => "CONST",
                ShapeType::GAUSSIAN => "GAUSSIAN",
                ShapeType::SINE => "SINE",
            }
        )
    }
}

impl ShapeType {
    fn required_keys(self) -> &'static [&'static str] {
        match self {
            ShapeType::CONST => &["value"],
            ShapeType::GAUSSIAN => &["amplitude"],
            ShapeType::SINE => &["freq"],
        }
    }

    fn optional_keys(self) -> &'static [(&'static str, f64)] {
        match self {
            ShapeType::CONST => &[],
            ShapeType::GAUSSIAN => &[("num_sd", 1.96)],
            ShapeType::SINE => &[("amplitude", 1.0), ("phase", 0.0), ("offset", 0.0)],
        }
    }
}

/// Shape of a waveform segment, consisting of type and arguments.
///
/// ## Implemented shape types and their expected fields:
/// 1. `ShapeType::CONST`:
///    - `value`
/// 2. `ShapeType::GAUSSIAN` (centred in the segment):
///    - `amplitude`
///    - `num_sd`: half-width of the segment in standard deviations. Default is `1.96`
/// 3. `ShapeType::SINE`:
///    - `freq`
///    - `amplitude`: Default is `1.0`
///    - `phase`: Default is `0.0`
///    - `offset`: Default is `0.0`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentShape {
    #[serde(rename = "Type")]
    pub shape_type: ShapeType,
    #[serde(rename = "Args")]
    pub args: ShapeArgs,
}

impl SegmentShape {
    /// Constructs a `SegmentShape`, checking that `args` holds the keys the type requires.
    ///
    /// ```
    /// use labtiming_backend::segment::*;
    ///
    /// let mut args = ShapeArgs::new();
    /// args.insert("value".to_string(), 0.25);
    /// assert!(SegmentShape::new(ShapeType::CONST, args).is_ok());
    /// assert!(SegmentShape::new(ShapeType::SINE, ShapeArgs::new()).is_err());
    /// ```
    pub fn new(shape_type: ShapeType, args: ShapeArgs) -> Result<Self> {
        for key in shape_type.required_keys() {
            if !args.contains_key(*key) {
                return Err(TimingError::invalid_value(
                    format!("{} shape", shape_type),
                    format!("expected to contain key {}", key),
                ));
            }
        }
        for key in args.keys() {
            if !Self::accepts_key(shape_type, key) {
                return Err(TimingError::invalid_value(
                    format!("{} shape", shape_type),
                    format!("unexpected key {}", key),
                ));
            }
        }
        Ok(SegmentShape { shape_type, args })
    }

    fn accepts_key(shape_type: ShapeType, key: &str) -> bool {
        shape_type.required_keys().contains(&key)
            || shape_type.optional_keys().iter().any(|(k, _)| *k == key)
    }

    pub fn new_const(value: f64) -> SegmentShape {
        SegmentShape {
            shape_type: ShapeType::CONST,
            args: hashmap! {String::from("value") => value},
        }
    }

    pub fn new_gaussian(amplitude: f64, num_sd: Option<f64>) -> SegmentShape {
        let mut args: ShapeArgs = hashmap! {"amplitude".to_string() => amplitude};
        if let Some(num_sd) = num_sd {
            args.insert("num_sd".to_string(), num_sd);
        }
        SegmentShape {
            shape_type: ShapeType::GAUSSIAN,
            args,
        }
    }

    pub fn new_sine(
        freq: f64,
        amplitude: Option<f64>,
        phase: Option<f64>,
        offset: Option<f64>,
    ) -> SegmentShape {
        let mut args: ShapeArgs = hashmap! {"freq".to_string() => freq};
        // For each optional argument, if specified, insert into dictionary
        [("amplitude", amplitude), ("phase", phase), ("offset", offset)]
            .iter()
            .for_each(|(key, opt_value)| {
                if let Some(value) = *opt_value {
                    args.insert(key.to_string(), value);
                }
            });
        SegmentShape {
            shape_type: ShapeType::SINE,
            args,
        }
    }

    /// Argument value, falling back to the type's default.
    pub fn arg(&self, key: &str) -> Option<f64> {
        self.args.get(key).copied().or_else(|| {
            self.shape_type
                .optional_keys()
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, default)| *default)
        })
    }

    pub fn set_arg(&mut self, key: &str, value: f64) -> Result<()> {
        if !Self::accepts_key(self.shape_type, key) {
            return Err(TimingError::invalid_value(
                format!("{} shape", self.shape_type),
                format!("unexpected key {}", key),
            ));
        }
        self.args.insert(key.to_string(), value);
        Ok(())
    }

    /// Evaluates the shape in-place over `t_arr`, holding times relative to the segment start,
    /// for a segment lasting `duration` seconds.
    pub fn eval_inplace(&self, t_arr: &mut ndarray::ArrayViewMut1<f64>, duration: f64) {
        // Required keys are checked on construction and deserialized shapes go through `validate`
        let arg = |key: &str| self.arg(key).unwrap_or(0.0);
        match self.shape_type {
            ShapeType::CONST => {
                t_arr.fill(arg("value"));
            }
            ShapeType::GAUSSIAN => {
                let amplitude = arg("amplitude");
                let num_sd = arg("num_sd");
                let centre = duration / 2.0;
                let sigma = if num_sd > 0.0 { centre / num_sd } else { 0.0 };
                t_arr.map_inplace(|t| {
                    *t = if sigma > 0.0 {
                        amplitude * (-0.5 * ((*t - centre) / sigma).powi(2)).exp()
                    } else {
                        amplitude
                    }
                });
            }
            ShapeType::SINE => {
                let freq = arg("freq");
                let amplitude = arg("amplitude");
                let offset = arg("offset");
                let phase = arg("phase");
                t_arr.map_inplace(|t| {
                    *t = (2.0 * PI * freq * (*t) + phase).sin() * amplitude + offset
                });
            }
        }
    }

    fn validate(&self) -> Result<()> {
        SegmentShape::new(self.shape_type, self.args.clone()).map(|_| ())
    }
}

impl fmt::Display for SegmentShape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut args = self
            .args
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<String>>();
        args.sort();
        write!(f, "[{}, {{{}}}]", self.shape_type, args.join(", "))
    }
}

/// Duration of a segment: fixed in seconds, or elastic with a relative weight.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum SegmentDuration {
    Fixed(f64),
    Elastic { weight: f64 },
}

impl SegmentDuration {
    pub fn is_elastic(&self) -> bool {
        matches!(self, SegmentDuration::Elastic { .. })
    }
}

/// Named segment of an AWG waveform. Names are unique within one waveform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaveformSegment {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Duration")]
    pub duration: SegmentDuration,
    #[serde(rename = "Shape")]
    pub shape: SegmentShape,
}

impl WaveformSegment {
    pub fn new(name: &str, duration: f64, shape: SegmentShape) -> Result<Self> {
        non_negative(&format!("duration of segment {}", name), duration)?;
        Ok(WaveformSegment {
            name: name.to_string(),
            duration: SegmentDuration::Fixed(duration),
            shape,
        })
    }

    /// Elastic segment with unit weight.
    pub fn elastic(name: &str, shape: SegmentShape) -> Self {
        WaveformSegment {
            name: name.to_string(),
            duration: SegmentDuration::Elastic { weight: 1.0 },
            shape,
        }
    }

    pub fn elastic_weighted(name: &str, weight: f64, shape: SegmentShape) -> Result<Self> {
        if !(weight > 0.0) {
            return Err(TimingError::invalid_value(
                format!("elastic weight of segment {}", name),
                "must be strictly positive",
            ));
        }
        Ok(WaveformSegment {
            name: name.to_string(),
            duration: SegmentDuration::Elastic { weight },
            shape,
        })
    }

    pub fn constant(name: &str, duration: f64, value: f64) -> Result<Self> {
        Self::new(name, duration, SegmentShape::new_const(value))
    }

    pub fn gaussian(name: &str, duration: f64, amplitude: f64) -> Result<Self> {
        Self::new(name, duration, SegmentShape::new_gaussian(amplitude, None))
    }

    pub fn is_elastic(&self) -> bool {
        self.duration.is_elastic()
    }

    pub fn get_property(&self, property: &str) -> Option<Value> {
        match property {
            "Duration" => match self.duration {
                SegmentDuration::Fixed(d) => Some(Value::from(d)),
                SegmentDuration::Elastic { .. } => Some(Value::from(-1.0)),
            },
            _ => self.shape.arg(property).map(Value::from),
        }
    }

    /// Writes `Duration` (a negative duration turns the segment elastic) or a shape argument.
    /// Returns `Ok(false)` if the property is unknown to this segment.
    pub fn set_property(&mut self, property: &str, value: &Value) -> Result<bool> {
        let what = format!("{}.{}", self.name, property);
        match property {
            "Duration" => {
                let duration = value_as_f64(&what, value)?;
                self.duration = if duration < 0.0 {
                    SegmentDuration::Elastic { weight: 1.0 }
                } else {
                    SegmentDuration::Fixed(duration)
                };
                Ok(true)
            }
            _ if SegmentShape::accepts_key(self.shape.shape_type, property) => {
                self.shape.set_arg(property, value_as_f64(&what, value)?)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Checks a segment coming from a configuration dictionary.
    pub fn validate(&self) -> Result<()> {
        match self.duration {
            SegmentDuration::Fixed(d) => {
                non_negative(&format!("duration of segment {}", self.name), d)?;
            }
            SegmentDuration::Elastic { weight } => {
                if !(weight > 0.0) {
                    return Err(TimingError::invalid_value(
                        format!("elastic weight of segment {}", self.name),
                        "must be strictly positive",
                    ));
                }
            }
        }
        self.shape.validate()
    }

    /// Samples the segment shape at `num_points` evenly spaced points over `duration`.
    pub fn sample_points(&self, duration: f64, num_points: usize) -> Vec<f64> {
        let mut t_arr = Array1::linspace(0.0, duration, num_points);
        self.shape.eval_inplace(&mut t_arr.view_mut(), duration);
        t_arr.to_vec()
    }
}

impl fmt::Display for WaveformSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.duration {
            SegmentDuration::Fixed(d) => write!(f, "Segment({}, {}, {})", self.name, d, self.shape),
            SegmentDuration::Elastic { weight } => {
                write!(f, "Segment({}, elastic x{}, {})", self.name, weight, self.shape)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn shape_defaults_and_validation() {
        let sine = SegmentShape::new_sine(10.0, None, None, Some(1.0));
        assert_eq!(sine.arg("amplitude"), Some(1.0));
        assert_eq!(sine.arg("offset"), Some(1.0));
        assert!(SegmentShape::new(ShapeType::CONST, hashmap! {"freq".to_string() => 1.0}).is_err());

        let mut konst = SegmentShape::new_const(0.5);
        assert!(konst.set_arg("phase", 0.1).is_err());
        konst.set_arg("value", 0.2).unwrap();
        assert_eq!(konst.arg("value"), Some(0.2));
    }

    #[test]
    fn gaussian_peaks_in_the_middle() {
        let seg = WaveformSegment::gaussian("init", 20e-9, 0.5).unwrap();
        let pts = seg.sample_points(20e-9, 21);
        assert!((pts[10] - 0.5).abs() < 1e-12);
        assert!(pts[0] < pts[5] && pts[5] < pts[10]);
        assert!((pts[0] - pts[20]).abs() < 1e-12);
    }

    #[test]
    fn duration_property() {
        let mut seg = WaveformSegment::constant("zero", 30e-9, 0.1).unwrap();
        assert_eq!(seg.get_property("Duration"), Some(Value::from(30e-9)));
        assert!(seg.set_property("Duration", &Value::from(-1)).unwrap());
        assert!(seg.is_elastic());
        assert!(!seg.set_property("Amplitude", &Value::from(1.0)).unwrap());
        assert!(WaveformSegment::constant("bad", -1e-9, 0.0).is_err());
    }

    #[test]
    fn segment_round_trips_through_json() {
        let seg = WaveformSegment::elastic("pad", SegmentShape::new_const(0.0));
        let json = serde_json::to_value(&seg).unwrap();
        let back: WaveformSegment = serde_json::from_value(json).unwrap();
        assert_eq!(back, seg);
        back.validate().unwrap();
    }
}
