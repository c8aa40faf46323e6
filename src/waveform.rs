// The "waveform" module lays out the ordered segment list of one AWG waveform in samples.
// Fixed segments take `round(duration * samp_rate)` samples each; elastic segments share the
// samples left over up to the waveform's total time, proportionally to their weights.
use ndarray::Array1;

use crate::error::{Result, TimingError};
use crate::segment::*;
use crate::utils::*;

/// Ordered, name-unique segment list together with the timing it is played back with.
///
/// ```
/// use labtiming_backend::segment::*;
/// use labtiming_backend::waveform::Waveform;
///
/// let mut wfm = Waveform::new("Wfm1", 1e9);
/// wfm.set_total_time(Some(200e-9));
/// wfm.set_segments(vec![
///     WaveformSegment::constant("init", 20e-9, 0.5).unwrap(),
///     WaveformSegment::constant("zero1", 45e-9, 0.1).unwrap(),
///     WaveformSegment::elastic("pad", SegmentShape::new_const(0.0)),
///     WaveformSegment::constant("read", 77e-9, 0.0).unwrap(),
/// ]).unwrap();
/// assert_eq!(wfm.segment_lengths().unwrap(), vec![20, 45, 58, 77]);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Waveform {
    name: String,
    samp_rate: f64,
    total_time: Option<f64>,
    segments: Vec<WaveformSegment>,
}

impl Waveform {
    pub fn new(name: &str, samp_rate: f64) -> Self {
        Waveform {
            name: name.to_string(),
            samp_rate,
            total_time: None,
            segments: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn samp_rate(&self) -> f64 {
        self.samp_rate
    }
    pub fn total_time(&self) -> Option<f64> {
        self.total_time
    }
    pub fn segments(&self) -> &[WaveformSegment] {
        &self.segments
    }

    pub fn set_samp_rate(&mut self, samp_rate: f64) -> Result<()> {
        if !(samp_rate > 0.0) {
            return Err(TimingError::invalid_value(
                format!("sample rate of {}", self.name),
                format!("{} must be positive", samp_rate),
            ));
        }
        self.samp_rate = samp_rate;
        Ok(())
    }

    /// Total time the elastic segments stretch to; `None` leaves the waveform as long as its
    /// fixed segments.
    pub fn set_total_time(&mut self, total_time: Option<f64>) {
        self.total_time = total_time;
    }

    /// Replaces the segment list. Segment names must be unique.
    pub fn set_segments(&mut self, segments: Vec<WaveformSegment>) -> Result<()> {
        for (i, seg) in segments.iter().enumerate() {
            seg.validate()?;
            if segments[..i].iter().any(|other| other.name == seg.name) {
                return Err(TimingError::DuplicateSegment {
                    waveform: self.name.clone(),
                    segment: seg.name.clone(),
                });
            }
        }
        self.segments = segments;
        Ok(())
    }

    pub fn add_segment(&mut self, segment: WaveformSegment) -> Result<()> {
        let mut segments = self.segments.clone();
        segments.push(segment);
        self.set_segments(segments)
    }

    fn segment_index(&self, name: &str) -> Result<usize> {
        self.segments
            .iter()
            .position(|seg| seg.name == name)
            .ok_or_else(|| TimingError::UnknownSegment {
                waveform: self.name.clone(),
                segment: name.to_string(),
            })
    }

    pub fn segment(&self, name: &str) -> Result<&WaveformSegment> {
        let idx = self.segment_index(name)?;
        Ok(&self.segments[idx])
    }

    pub fn segment_mut(&mut self, name: &str) -> Result<&mut WaveformSegment> {
        let idx = self.segment_index(name)?;
        Ok(&mut self.segments[idx])
    }

    /// Sample count of every segment, in order.
    ///
    /// The leftover after the fixed segments is split by weight with `floor`; the last elastic
    /// segment absorbs the rounding remainder so the total is exactly `round(total_time * fs)`.
    pub fn segment_lengths(&self) -> Result<Vec<usize>> {
        let fixed = |seg: &WaveformSegment| match seg.duration {
            SegmentDuration::Fixed(d) => num_samples(d, self.samp_rate),
            SegmentDuration::Elastic { .. } => 0,
        };
        let mut lengths: Vec<usize> = self.segments.iter().map(fixed).collect();
        let elastic: Vec<(usize, f64)> = self
            .segments
            .iter()
            .enumerate()
            .filter_map(|(i, seg)| match seg.duration {
                SegmentDuration::Elastic { weight } => Some((i, weight)),
                SegmentDuration::Fixed(_) => None,
            })
            .collect();
        if elastic.is_empty() {
            return Ok(lengths);
        }

        let total_time = self.total_time.ok_or_else(|| TimingError::InvalidElasticLayout {
            waveform: self.name.clone(),
            reason: "elastic segments require the total time to be set".to_string(),
        })?;
        let total = num_samples(total_time, self.samp_rate);
        let fixed_sum: usize = lengths.iter().sum();
        if fixed_sum > total {
            return Err(TimingError::InvalidElasticLayout {
                waveform: self.name.clone(),
                reason: format!(
                    "fixed segments take {} samples, more than the {} samples of the total time",
                    fixed_sum, total
                ),
            });
        }
        let leftover = total - fixed_sum;
        let weight_sum: f64 = elastic.iter().map(|(_, w)| w).sum();
        let mut assigned = 0;
        for (k, &(idx, weight)) in elastic.iter().enumerate() {
            lengths[idx] = if k + 1 == elastic.len() {
                leftover - assigned
            } else {
                (leftover as f64 * weight / weight_sum).floor() as usize
            };
            assigned += lengths[idx];
        }
        Ok(lengths)
    }

    /// Resolved durations in seconds.
    pub fn segment_durations(&self) -> Result<Vec<f64>> {
        Ok(self
            .segment_lengths()?
            .into_iter()
            .map(|len| len as f64 / self.samp_rate)
            .collect())
    }

    pub fn num_samples(&self) -> Result<usize> {
        Ok(self.segment_lengths()?.iter().sum())
    }

    pub fn duration(&self) -> Result<f64> {
        Ok(self.num_samples()? as f64 / self.samp_rate)
    }

    /// Sample range `[start, end)` occupied by the named segment.
    pub fn segment_bounds(&self, name: &str) -> Result<(usize, usize)> {
        let idx = self.segment_index(name)?;
        let lengths = self.segment_lengths()?;
        let start: usize = lengths[..idx].iter().sum();
        Ok((start, start + lengths[idx]))
    }

    /// Bit array over the whole waveform: `polarity` on the listed segments, its opposite elsewhere.
    pub fn segment_bit_pattern(&self, segments: &[String], polarity: Polarity) -> Result<Array1<u8>> {
        let mut bits = Array1::from_elem(self.num_samples()?, polarity.opposite().level());
        for name in segments {
            let (start, end) = self.segment_bounds(name)?;
            bits.slice_mut(ndarray::s![start..end]).fill(polarity.level());
        }
        Ok(bits)
    }
}
