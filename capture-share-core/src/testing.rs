//! Scripted in-memory backend for engine tests and downstream
//! integration tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::target::{AppInfo, DisplayInfo, WindowInfo};
use crate::traits::capture_backend::{
    BackendCapabilities, BackendEvent, BackendEventCallback, BufferMeta, CaptureBackend,
    NativeCaptureConfig, NativeTarget, RawBufferCallback,
};

#[derive(Default)]
struct ScriptedState {
    apps: Mutex<Vec<AppInfo>>,
    windows: Mutex<Vec<WindowInfo>>,
    displays: Mutex<Vec<DisplayInfo>>,
    capabilities: Mutex<Option<BackendCapabilities>>,
    refuse_start: AtomicBool,
    capturing: AtomicBool,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    on_buffer: Mutex<Option<RawBufferCallback>>,
    on_event: Mutex<Option<BackendEventCallback>>,
    last_target: Mutex<Option<NativeTarget>>,
    last_config: Mutex<Option<NativeCaptureConfig>>,
}

/// A `CaptureBackend` whose enumerations and start behavior are scripted
/// through a [`BackendHandle`], which also lets a test inject buffers and
/// lifecycle events as if they came from a native callback thread.
pub struct ScriptedBackend {
    state: Arc<ScriptedState>,
}

impl ScriptedBackend {
    pub fn new() -> (Self, BackendHandle) {
        let state = Arc::new(ScriptedState::default());
        (
            Self {
                state: Arc::clone(&state),
            },
            BackendHandle { state },
        )
    }
}

impl CaptureBackend for ScriptedBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.state.capabilities.lock().unwrap_or_default()
    }

    fn enumerate_applications(&self) -> Vec<AppInfo> {
        self.state.apps.lock().clone()
    }

    fn enumerate_windows(&self) -> Vec<WindowInfo> {
        self.state.windows.lock().clone()
    }

    fn enumerate_displays(&self) -> Vec<DisplayInfo> {
        self.state.displays.lock().clone()
    }

    fn start_capture(
        &mut self,
        target: &NativeTarget,
        config: &NativeCaptureConfig,
        on_buffer: RawBufferCallback,
        on_event: BackendEventCallback,
    ) -> bool {
        self.state.start_calls.fetch_add(1, Ordering::SeqCst);
        *self.state.last_target.lock() = Some(target.clone());
        *self.state.last_config.lock() = Some(config.clone());
        if self.state.refuse_start.load(Ordering::SeqCst) {
            return false;
        }
        *self.state.on_buffer.lock() = Some(on_buffer);
        *self.state.on_event.lock() = Some(on_event);
        self.state.capturing.store(true, Ordering::SeqCst);
        true
    }

    fn stop_capture(&mut self) {
        self.state.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.state.capturing.store(false, Ordering::SeqCst);
        *self.state.on_buffer.lock() = None;
        *self.state.on_event.lock() = None;
    }

    fn is_capturing(&self) -> bool {
        self.state.capturing.load(Ordering::SeqCst)
    }
}

/// Test-side handle to a [`ScriptedBackend`] that has been moved into an
/// engine.
#[derive(Clone)]
pub struct BackendHandle {
    state: Arc<ScriptedState>,
}

impl BackendHandle {
    pub fn set_apps(&self, apps: Vec<AppInfo>) {
        *self.state.apps.lock() = apps;
    }

    pub fn set_windows(&self, windows: Vec<WindowInfo>) {
        *self.state.windows.lock() = windows;
    }

    pub fn set_displays(&self, displays: Vec<DisplayInfo>) {
        *self.state.displays.lock() = displays;
    }

    pub fn set_capabilities(&self, capabilities: BackendCapabilities) {
        *self.state.capabilities.lock() = Some(capabilities);
    }

    pub fn set_refuse_start(&self, refuse: bool) {
        self.state.refuse_start.store(refuse, Ordering::SeqCst);
    }

    /// Deliver one raw buffer through the registered callback. Returns
    /// `false` when no capture is running.
    pub fn push_buffer(&self, samples: &[f32], meta: BufferMeta) -> bool {
        let callback = self.state.on_buffer.lock().clone();
        match callback {
            Some(callback) => {
                callback(samples, &meta);
                true
            }
            None => false,
        }
    }

    /// Clone of the registered buffer callback, for exercising delivery
    /// that races a stop.
    pub fn buffer_callback(&self) -> Option<RawBufferCallback> {
        self.state.on_buffer.lock().clone()
    }

    /// Deliver a lifecycle event through the registered callback.
    pub fn emit_event(&self, event: BackendEvent) -> bool {
        let callback = self.state.on_event.lock().clone();
        match callback {
            Some(callback) => {
                callback(event);
                true
            }
            None => false,
        }
    }

    pub fn start_calls(&self) -> usize {
        self.state.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.state.stop_calls.load(Ordering::SeqCst)
    }

    pub fn is_capturing(&self) -> bool {
        self.state.capturing.load(Ordering::SeqCst)
    }

    pub fn last_target(&self) -> Option<NativeTarget> {
        self.state.last_target.lock().clone()
    }

    pub fn last_config(&self) -> Option<NativeCaptureConfig> {
        self.state.last_config.lock().clone()
    }
}
