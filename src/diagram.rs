//! Timing-diagram descriptors and a renderer-independent layout of them.
//!
//! Every object drawn in a timing diagram describes itself with a [`DiagramInfo`], a dictionary
//! tagged by `Type`:
//!
//! | `Type`            | Payload                                        |
//! |-------------------|------------------------------------------------|
//! | `None`            | nothing to draw                                |
//! | `BlockShaded`     | `TriggerType` (`Edge` or `Gated`), `Period`    |
//! | `DigitalSampled`  | `Data`: `(bits, sample_rate)`                  |
//! | `DigitalEdges`    | `Data`: `[(t, level), ...]`, starting at `t=0` |
//! | `AnalogueSampled` | `Data`: `[{Duration, yPoints}, ...]`           |
//!
//! [`layout_row`] turns a descriptor plus the trigger times of its object into shapes in the
//! time unit picked by [`TimeUnit::for_repetition_time`]. Drawing them is left to the caller.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TimingError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagramTrigger {
    Edge,
    Gated,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalogueBlock {
    #[serde(rename = "Duration")]
    pub duration: f64,
    #[serde(rename = "yPoints")]
    pub y_points: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum DiagramInfo {
    None,
    BlockShaded {
        #[serde(rename = "TriggerType")]
        trigger_type: DiagramTrigger,
        #[serde(rename = "Period", default, skip_serializing_if = "Option::is_none")]
        period: Option<f64>,
    },
    DigitalSampled {
        #[serde(rename = "Data")]
        data: (Vec<u8>, f64),
    },
    DigitalEdges {
        #[serde(rename = "Data")]
        data: Vec<(f64, u8)>,
    },
    AnalogueSampled {
        #[serde(rename = "Data")]
        data: Vec<AnalogueBlock>,
    },
}

const DIAGRAM_TYPES: [&str; 5] = [
    "None",
    "BlockShaded",
    "DigitalSampled",
    "DigitalEdges",
    "AnalogueSampled",
];

impl DiagramInfo {
    /// Parses and validates a descriptor dictionary of `object`.
    pub fn from_value(object: &str, value: &Value) -> Result<Self> {
        let type_name = value.get("Type").and_then(Value::as_str).unwrap_or("");
        if !DIAGRAM_TYPES.contains(&type_name) {
            return Err(TimingError::UnknownDiagramType(type_name.to_string()));
        }
        let info: DiagramInfo =
            serde_json::from_value(value.clone()).map_err(|e| TimingError::MalformedDiagram {
                object: object.to_string(),
                reason: e.to_string(),
            })?;
        info.validate(object)?;
        Ok(info)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn validate(&self, object: &str) -> Result<()> {
        let malformed = |reason: &str| {
            Err(TimingError::MalformedDiagram {
                object: object.to_string(),
                reason: reason.to_string(),
            })
        };
        match self {
            DiagramInfo::DigitalSampled { data: (bits, fs) } => {
                if bits.is_empty() {
                    return malformed("DigitalSampled data is empty");
                }
                if !(*fs > 0.0) {
                    return malformed("DigitalSampled sample rate must be positive");
                }
            }
            DiagramInfo::DigitalEdges { data } => match data.first() {
                None => return malformed("DigitalEdges data is empty"),
                Some((t, _)) if *t != 0.0 => {
                    return malformed("DigitalEdges data must start at t = 0")
                }
                _ => {}
            },
            DiagramInfo::BlockShaded {
                trigger_type: DiagramTrigger::Edge,
                period: None,
            } => return malformed("BlockShaded edge-triggered block needs a Period"),
            _ => {}
        }
        Ok(())
    }
}

/// Time unit of a diagram: the scale from seconds, and the width under which shapes are dropped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimeUnit {
    Ns,
    Us,
    Ms,
    S,
}

impl TimeUnit {
    pub fn for_repetition_time(repetition_time: f64) -> Self {
        if repetition_time < 2e-6 {
            TimeUnit::Ns
        } else if repetition_time < 2e-3 {
            TimeUnit::Us
        } else if repetition_time < 2.0 {
            TimeUnit::Ms
        } else {
            TimeUnit::S
        }
    }

    pub fn scale(self) -> f64 {
        match self {
            TimeUnit::Ns => 1e9,
            TimeUnit::Us => 1e6,
            TimeUnit::Ms => 1e3,
            TimeUnit::S => 1.0,
        }
    }

    pub fn tolerance(self) -> f64 {
        match self {
            TimeUnit::Ns => 0.2,
            TimeUnit::Us => 0.001,
            TimeUnit::Ms => 1e-6,
            TimeUnit::S => 1e-9,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimeUnit::Ns => "ns",
            TimeUnit::Us => "us",
            TimeUnit::Ms => "ms",
            TimeUnit::S => "s",
        }
    }
}

/// Shapes in diagram units.
#[derive(Clone, Debug, PartialEq)]
pub enum DiagramShape {
    Rectangle { start: f64, end: f64 },
    /// Step trace through `(t, level)` points
    DigitalTrace { points: Vec<(f64, f64)> },
    AnalogueTrace {
        start: f64,
        end: f64,
        y_points: Vec<f64>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct DiagramRow {
    pub name: String,
    pub trigger_times: Vec<f64>,
    pub shapes: Vec<DiagramShape>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimingDiagram {
    pub unit: TimeUnit,
    /// Repetition time in diagram units
    pub end: f64,
    pub rows: Vec<DiagramRow>,
}

/// Lays out one object's descriptor at every one of its trigger `edges`.
/// `gated` holds the object's global gated intervals, used by gated blocks.
/// The descriptor is validated first.
pub fn layout_row(
    name: &str,
    info: &DiagramInfo,
    edges: &Array1<f64>,
    gated: &Array2<f64>,
    unit: TimeUnit,
) -> Result<DiagramRow> {
    info.validate(name)?;
    let scale = unit.scale();
    let tol = unit.tolerance();
    let mut shapes = Vec::new();
    match info {
        DiagramInfo::None => {}
        DiagramInfo::BlockShaded {
            trigger_type: DiagramTrigger::Edge,
            period,
        } => {
            let period = period.unwrap_or(0.0) * scale;
            for &t in edges.iter() {
                if period >= tol {
                    shapes.push(DiagramShape::Rectangle {
                        start: t * scale,
                        end: t * scale + period,
                    });
                }
            }
        }
        DiagramInfo::BlockShaded {
            trigger_type: DiagramTrigger::Gated,
            ..
        } => {
            for row in gated.rows() {
                let (start, end) = (row[0] * scale, row[1] * scale);
                if end - start >= tol {
                    shapes.push(DiagramShape::Rectangle { start, end });
                }
            }
        }
        DiagramInfo::DigitalSampled { data: (bits, fs) } => {
            let step = scale / fs;
            for &t in edges.iter() {
                let t0 = t * scale;
                let mut points = vec![(t0, bits[0] as f64)];
                for i in 1..bits.len() {
                    if bits[i] != bits[i - 1] {
                        points.push((t0 + i as f64 * step, bits[i] as f64));
                    }
                }
                points.push((t0 + bits.len() as f64 * step, bits[bits.len() - 1] as f64));
                shapes.push(DiagramShape::DigitalTrace { points });
            }
        }
        DiagramInfo::DigitalEdges { data } => {
            for &t in edges.iter() {
                let t0 = t * scale;
                let mut points: Vec<(f64, f64)> = Vec::with_capacity(data.len());
                for &(dt, level) in data {
                    let point = (t0 + dt * scale, level as f64);
                    // Coincident edges collapse onto the later level
                    match points.last_mut() {
                        Some(last) if point.0 - last.0 < tol => *last = (last.0, point.1),
                        _ => points.push(point),
                    }
                }
                shapes.push(DiagramShape::DigitalTrace { points });
            }
        }
        DiagramInfo::AnalogueSampled { data } => {
            for &t in edges.iter() {
                let mut start = t * scale;
                for block in data {
                    let end = start + block.duration * scale;
                    if end - start >= tol {
                        shapes.push(DiagramShape::AnalogueTrace {
                            start,
                            end,
                            y_points: block.y_points.clone(),
                        });
                    }
                    start = end;
                }
            }
        }
    }
    Ok(DiagramRow {
        name: name.to_string(),
        trigger_times: edges.iter().map(|t| t * scale).collect(),
        shapes,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;
    use serde_json::json;

    #[test]
    fn parse_descriptors() {
        let info = DiagramInfo::from_value(
            "ACQ",
            &json!({"Type": "BlockShaded", "TriggerType": "Edge", "Period": 1e-6}),
        )
        .unwrap();
        assert_eq!(
            info,
            DiagramInfo::BlockShaded {
                trigger_type: DiagramTrigger::Edge,
                period: Some(1e-6)
            }
        );
        assert_eq!(
            DiagramInfo::from_value("x", &json!({"Type": "None"})).unwrap(),
            DiagramInfo::None
        );
        assert!(matches!(
            DiagramInfo::from_value("x", &json!({"Type": "Sparkles"})),
            Err(TimingError::UnknownDiagramType(t)) if t == "Sparkles"
        ));
        assert!(matches!(
            DiagramInfo::from_value("x", &json!({"Type": "DigitalSampled", "Data": [[], 1e9]})),
            Err(TimingError::MalformedDiagram { .. })
        ));
        assert!(matches!(
            DiagramInfo::from_value("x", &json!({"Type": "DigitalEdges", "Data": [[1e-9, 1]]})),
            Err(TimingError::MalformedDiagram { .. })
        ));
    }

    #[test]
    fn time_units() {
        assert_eq!(TimeUnit::for_repetition_time(1e-6), TimeUnit::Ns);
        assert_eq!(TimeUnit::for_repetition_time(2e-6), TimeUnit::Us);
        assert_eq!(TimeUnit::for_repetition_time(1e-3), TimeUnit::Us);
        assert_eq!(TimeUnit::for_repetition_time(0.5), TimeUnit::Ms);
        assert_eq!(TimeUnit::for_repetition_time(3.0), TimeUnit::S);
        assert_eq!(TimeUnit::Us.tolerance(), 0.001);
    }

    #[test]
    fn edge_block_at_every_trigger() {
        let info = DiagramInfo::BlockShaded {
            trigger_type: DiagramTrigger::Edge,
            period: Some(100e-9),
        };
        let row = layout_row(
            "ACQ",
            &info,
            &array![0.0, 500e-9],
            &Array2::zeros((0, 2)),
            TimeUnit::Ns,
        )
        .unwrap();
        assert_eq!(row.shapes.len(), 2);
        match &row.shapes[1] {
            DiagramShape::Rectangle { start, end } => {
                assert!((start - 500.0).abs() < 1e-9);
                assert!((end - 600.0).abs() < 1e-9);
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn digital_sampled_trace() {
        let info = DiagramInfo::DigitalSampled {
            data: (vec![0, 1, 1, 0], 1e9),
        };
        let row = layout_row("mkr", &info, &array![0.0], &Array2::zeros((0, 2)), TimeUnit::Ns)
            .unwrap();
        assert_eq!(
            row.shapes,
            vec![DiagramShape::DigitalTrace {
                points: vec![(0.0, 0.0), (1.0, 1.0), (3.0, 0.0), (4.0, 0.0)]
            }]
        );
    }

    #[test]
    fn malformed_descriptor_is_not_laid_out() {
        let empty = DiagramInfo::DigitalSampled {
            data: (Vec::new(), 1e9),
        };
        assert!(matches!(
            layout_row("mkr", &empty, &array![0.0], &Array2::zeros((0, 2)), TimeUnit::Ns),
            Err(TimingError::MalformedDiagram { .. })
        ));
        let no_edges = DiagramInfo::DigitalEdges { data: Vec::new() };
        assert!(layout_row("DDG/A", &no_edges, &array![0.0], &Array2::zeros((0, 2)), TimeUnit::Ns)
            .is_err());
    }

    #[test]
    fn descriptor_to_dictionary() {
        let info = DiagramInfo::BlockShaded {
            trigger_type: DiagramTrigger::Gated,
            period: None,
        };
        let value = info.to_value().unwrap();
        assert_eq!(value["Type"], json!("BlockShaded"));
        assert_eq!(DiagramInfo::from_value("MW", &value).unwrap(), info);
    }
}
