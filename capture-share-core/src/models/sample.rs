use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::processing::{format, level_meter};

/// Output sample format delivered to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    #[serde(rename = "float32")]
    Float32,
    #[serde(rename = "int16")]
    Int16,
}

/// Sample payload in the configured output format.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleData {
    Float32(Vec<f32>),
    Int16(Vec<i16>),
}

impl SampleData {
    pub fn len(&self) -> usize {
        match self {
            Self::Float32(v) => v.len(),
            Self::Int16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A raw buffer plus fields derived once at enrichment time, never
/// recomputed afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedSample {
    pub data: SampleData,
    pub sample_count: usize,
    /// `sample_count / channels`.
    pub frame_count: usize,
    /// `frame_count / sample_rate * 1000`.
    pub duration_ms: f64,
    pub rms: f32,
    pub peak: f32,
    pub timestamp: DateTime<Utc>,
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
    /// Emitting process, when the backend reports one.
    pub pid: Option<u32>,
}

impl EnrichedSample {
    /// Enrich a raw buffer, computing RMS and peak over it.
    pub fn from_raw(
        raw: &[f32],
        sample_format: SampleFormat,
        channels: u16,
        sample_rate: u32,
        pid: Option<u32>,
    ) -> Self {
        let rms = level_meter::rms(raw);
        let peak = level_meter::peak(raw);
        Self::with_levels(raw, sample_format, channels, sample_rate, pid, rms, peak)
    }

    /// Enrich a raw buffer with RMS and peak already computed (the gating
    /// path measures before deciding whether to enrich at all).
    pub fn with_levels(
        raw: &[f32],
        sample_format: SampleFormat,
        channels: u16,
        sample_rate: u32,
        pid: Option<u32>,
        rms: f32,
        peak: f32,
    ) -> Self {
        let sample_count = raw.len();
        let frame_count = sample_count / channels.max(1) as usize;
        let duration_ms = if sample_rate > 0 {
            frame_count as f64 / sample_rate as f64 * 1000.0
        } else {
            0.0
        };
        let data = match sample_format {
            SampleFormat::Float32 => SampleData::Float32(raw.to_vec()),
            SampleFormat::Int16 => SampleData::Int16(format::f32_to_i16_saturating(raw)),
        };
        Self {
            data,
            sample_count,
            frame_count,
            duration_ms,
            rms,
            peak,
            timestamp: Utc::now(),
            format: sample_format,
            channels,
            sample_rate,
            pid,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn derives_frame_count_duration_and_levels() {
        let raw = vec![0.5f32; 1024];
        let sample = EnrichedSample::from_raw(&raw, SampleFormat::Float32, 2, 48000, Some(200));

        assert_eq!(sample.sample_count, 1024);
        assert_eq!(sample.frame_count, 512);
        assert_relative_eq!(sample.duration_ms, 512.0 / 48.0, epsilon = 1e-9);
        assert_relative_eq!(sample.rms, 0.5, epsilon = 1e-6);
        assert_relative_eq!(sample.peak, 0.5, epsilon = 1e-6);
        assert_eq!(sample.pid, Some(200));
    }

    #[test]
    fn int16_format_converts_payload() {
        let raw = vec![0.0f32, 1.0, -1.0];
        let sample = EnrichedSample::from_raw(&raw, SampleFormat::Int16, 1, 48000, None);
        assert_eq!(sample.data, SampleData::Int16(vec![0, 32767, -32768]));
        assert_eq!(sample.sample_count, 3);
    }
}
