use serde::{Deserialize, Serialize};

use super::sample::SampleFormat;

/// Configuration for a capture. Built once per start call; never mutated
/// mid-capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
    /// Target sample rate in Hz (default: 48000).
    pub sample_rate: u32,

    /// Number of channels, 1 or 2 (default: 2).
    pub channels: u16,

    /// Backend buffer size in frames; `None` uses the backend default.
    pub buffer_size: Option<u32>,

    /// Exclude the cursor from display/window captures.
    pub exclude_cursor: bool,

    /// Minimum RMS amplitude; buffers below this are dropped before any
    /// downstream processing or delivery.
    pub min_volume: f32,

    /// Output sample format delivered to consumers.
    pub format: SampleFormat,
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if ![1, 2].contains(&self.channels) {
            return Err(format!("unsupported channel count: {}", self.channels));
        }
        if let Some(0) = self.buffer_size {
            return Err("buffer size must be positive when set".into());
        }
        if !(0.0..=1.0).contains(&self.min_volume) {
            return Err(format!("minVolume out of range: {}", self.min_volume));
        }
        Ok(())
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            buffer_size: None,
            exclude_cursor: false,
            min_volume: 0.0,
            format: SampleFormat::Float32,
        }
    }
}
