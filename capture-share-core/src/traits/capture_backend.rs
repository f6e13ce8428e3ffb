use std::sync::Arc;

use crate::models::target::{AppInfo, DisplayInfo, WindowInfo};

/// Metadata delivered alongside each raw buffer.
#[derive(Debug, Clone, Copy)]
pub struct BufferMeta {
    /// Actual sample rate of the delivered audio.
    pub sample_rate: u32,
    /// 1 = mono, 2 = stereo interleaved.
    pub channels: u16,
    /// Emitting process, when the backend can attribute the buffer.
    pub pid: Option<u32>,
}

/// Callback invoked once per raw buffer.
///
/// Fires on a backend-owned thread; invocations are not guaranteed to be
/// serialized, so implementations must treat each one independently.
pub type RawBufferCallback = Arc<dyn Fn(&[f32], &BufferMeta) + Send + Sync + 'static>;

/// Out-of-band lifecycle signals from the backend. A capture that dies
/// mid-stream has no synchronous return path; this is the only way it
/// becomes observable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    Stopped,
    Error(String),
}

pub type BackendEventCallback = Arc<dyn Fn(BackendEvent) + Send + Sync + 'static>;

/// Which optional backend entry points exist. The backend surface is
/// allowed to be partial across platform versions; window and display
/// variants must be detected, not assumed present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub window_capture: bool,
    pub display_capture: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            window_capture: true,
            display_capture: true,
        }
    }
}

/// Backend-facing capture configuration, stripped of engine-only fields
/// (gating threshold, output format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCaptureConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// `None` uses the backend default.
    pub buffer_size: Option<u32>,
    pub exclude_cursor: bool,
}

/// Native-facing identifier for a resolved target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeTarget {
    Processes(Vec<u32>),
    Window(u64),
    Display(u32),
}

/// Interface to the platform's native capture facility.
///
/// The facility supports a single active capture per process and reports
/// start success only as a boolean; no structured errors cross this
/// boundary. The engine owns the one allowed capture exclusively.
pub trait CaptureBackend: Send {
    fn capabilities(&self) -> BackendCapabilities;

    fn enumerate_applications(&self) -> Vec<AppInfo>;

    /// Only valid when `capabilities().window_capture` is set.
    fn enumerate_windows(&self) -> Vec<WindowInfo>;

    /// Only valid when `capabilities().display_capture` is set.
    fn enumerate_displays(&self) -> Vec<DisplayInfo>;

    /// Start the single native capture. Returns `false` on failure.
    ///
    /// `on_buffer` fires repeatedly until `stop_capture`; `on_event`
    /// reports asynchronous stop or death of the capture.
    fn start_capture(
        &mut self,
        target: &NativeTarget,
        config: &NativeCaptureConfig,
        on_buffer: RawBufferCallback,
        on_event: BackendEventCallback,
    ) -> bool;

    fn stop_capture(&mut self);

    fn is_capturing(&self) -> bool;
}
