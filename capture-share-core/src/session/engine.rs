use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::models::config::CaptureConfig;
use crate::models::error::CaptureError;
use crate::models::sample::EnrichedSample;
use crate::models::state::EngineState;
use crate::models::target::{
    AppInfo, CaptureTarget, DisplayInfo, TargetFingerprint, TargetSelector, WindowInfo,
};
use crate::processing::level_meter;
use crate::session::activity::{ActivityCache, ProcessActivity};
use crate::session::resolver;
use crate::traits::capture_backend::{
    BackendEvent, BackendEventCallback, CaptureBackend, NativeCaptureConfig, NativeTarget,
    RawBufferCallback,
};
use crate::traits::engine_observer::EngineObserver;

/// State shared with the backend's callback thread.
struct EngineShared {
    state: Mutex<EngineState>,
    active: Mutex<Option<ActiveCapture>>,
    /// Cleared on stop so a late in-flight callback is dropped instead of
    /// reaching observers.
    accepting: AtomicBool,
    tracking: AtomicBool,
    activity: Mutex<ActivityCache>,
    observers: RwLock<Vec<Arc<dyn EngineObserver>>>,
}

struct ActiveCapture {
    target: CaptureTarget,
    config: CaptureConfig,
}

/// Owner of the one allowed native capture.
///
/// Serializes all start/stop traffic into the backend's single-capture
/// constraint and turns raw buffers into gated, enriched samples.
///
/// State machine: `Idle → Capturing → Idle`, with a terminal `Disposed`
/// reachable from either.
pub struct CaptureEngine<B: CaptureBackend> {
    backend: B,
    shared: Arc<EngineShared>,
}

impl<B: CaptureBackend> CaptureEngine<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            shared: Arc::new(EngineShared {
                state: Mutex::new(EngineState::Idle),
                active: Mutex::new(None),
                accepting: AtomicBool::new(false),
                tracking: AtomicBool::new(false),
                activity: Mutex::new(ActivityCache::default()),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Like `new`, with a custom activity-cache decay window.
    pub fn with_decay_window(backend: B, window: Duration) -> Self {
        let engine = Self::new(backend);
        *engine.shared.activity.lock() = ActivityCache::new(window);
        engine
    }

    pub fn add_observer(&self, observer: Arc<dyn EngineObserver>) {
        self.shared.observers.write().push(observer);
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.lock()
    }

    pub fn is_capturing(&self) -> bool {
        self.state().is_capturing()
    }

    /// The target the active capture was started with, if any.
    pub fn current_target(&self) -> Option<CaptureTarget> {
        self.shared.active.lock().as_ref().map(|a| a.target.clone())
    }

    pub fn current_config(&self) -> Option<CaptureConfig> {
        self.shared.active.lock().as_ref().map(|a| a.config.clone())
    }

    /// Enable or disable per-process activity tracking.
    pub fn set_activity_tracking(&self, enabled: bool) {
        self.shared.tracking.store(enabled, Ordering::SeqCst);
    }

    /// Recent per-process loudness, loudest first. Purges stale entries.
    pub fn activity_snapshot(&self) -> Vec<ProcessActivity> {
        self.shared.activity.lock().snapshot()
    }

    pub fn clear_activity(&self) {
        self.shared.activity.lock().clear();
    }

    pub fn list_applications(&self) -> Result<Vec<AppInfo>, CaptureError> {
        self.ensure_live()?;
        Ok(self.backend.enumerate_applications())
    }

    pub fn list_windows(&self) -> Result<Vec<WindowInfo>, CaptureError> {
        self.ensure_live()?;
        self.ensure_window_capability()?;
        Ok(self.backend.enumerate_windows())
    }

    pub fn list_displays(&self) -> Result<Vec<DisplayInfo>, CaptureError> {
        self.ensure_live()?;
        self.ensure_display_capability()?;
        Ok(self.backend.enumerate_displays())
    }

    /// Resolve a selector against the current enumeration snapshot without
    /// starting anything. Never touches an in-flight capture.
    pub fn resolve_target(&self, selector: &TargetSelector) -> Result<CaptureTarget, CaptureError> {
        self.ensure_live()?;
        match selector {
            TargetSelector::Application(sel) => {
                resolver::resolve_application(self.backend.enumerate_applications(), sel)
            }
            TargetSelector::Applications(sels) => {
                resolver::resolve_applications(self.backend.enumerate_applications(), sels)
            }
            TargetSelector::Window(id) => {
                self.ensure_window_capability()?;
                resolver::resolve_window(self.backend.enumerate_windows(), *id)
            }
            TargetSelector::Display(id) => {
                self.ensure_display_capability()?;
                resolver::resolve_display(self.backend.enumerate_displays(), *id)
            }
        }
    }

    /// Start capturing. Transitions: idle → capturing.
    ///
    /// Resolution and validation run before the backend is touched, so a
    /// bad request never disturbs anything. On backend refusal the engine
    /// stays idle and reports `CaptureFailed`.
    pub fn start(
        &mut self,
        selector: &TargetSelector,
        config: &CaptureConfig,
    ) -> Result<CaptureTarget, CaptureError> {
        match self.state() {
            EngineState::Disposed => return Err(self.emit_error(CaptureError::Disposed)),
            EngineState::Capturing => return Err(self.emit_error(CaptureError::AlreadyCapturing)),
            EngineState::Idle => {}
        }

        if let Err(message) = config.validate() {
            return Err(self.emit_error(CaptureError::InvalidArgument(message)));
        }

        let target = match self.resolve_target(selector) {
            Ok(target) => target,
            Err(err) => return Err(self.emit_error(err)),
        };

        let native_target = match target.fingerprint() {
            TargetFingerprint::Application(pid) => NativeTarget::Processes(vec![pid]),
            TargetFingerprint::MultiApplication(pids) => NativeTarget::Processes(pids),
            TargetFingerprint::Window(id) => NativeTarget::Window(id),
            TargetFingerprint::Display(id) => NativeTarget::Display(id),
        };
        let native_config = NativeCaptureConfig {
            sample_rate: config.sample_rate,
            channels: config.channels,
            buffer_size: config.buffer_size,
            exclude_cursor: config.exclude_cursor,
        };

        let on_buffer = self.buffer_callback(config, &target);
        let on_event = self.event_callback();

        self.shared.accepting.store(true, Ordering::SeqCst);
        if !self
            .backend
            .start_capture(&native_target, &native_config, on_buffer, on_event)
        {
            self.shared.accepting.store(false, Ordering::SeqCst);
            return Err(self.emit_error(CaptureError::CaptureFailed(
                "native backend failed to start".into(),
            )));
        }

        *self.shared.state.lock() = EngineState::Capturing;
        *self.shared.active.lock() = Some(ActiveCapture {
            target: target.clone(),
            config: config.clone(),
        });
        log::info!("capture started: {}", target.describe());
        Ok(target)
    }

    /// Stop capturing. A no-op when already idle; callers should not have
    /// to track state just to stop defensively.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        match self.state() {
            EngineState::Disposed => Err(self.emit_error(CaptureError::Disposed)),
            EngineState::Idle => Ok(()),
            EngineState::Capturing => {
                self.shared.accepting.store(false, Ordering::SeqCst);
                self.backend.stop_capture();
                *self.shared.state.lock() = EngineState::Idle;
                *self.shared.active.lock() = None;
                log::info!("capture stopped");
                Ok(())
            }
        }
    }

    /// Tear down the engine. Stops any active capture first; every
    /// subsequent call fails with `Disposed`. Idempotent.
    pub fn dispose(&mut self) {
        if self.state().is_disposed() {
            return;
        }
        if self.is_capturing() {
            let _ = self.stop();
        }
        *self.shared.state.lock() = EngineState::Disposed;
        log::info!("engine disposed");
    }

    // --- Internal helpers ---

    fn ensure_live(&self) -> Result<(), CaptureError> {
        if self.state().is_disposed() {
            Err(CaptureError::Disposed)
        } else {
            Ok(())
        }
    }

    fn ensure_window_capability(&self) -> Result<(), CaptureError> {
        if self.backend.capabilities().window_capture {
            Ok(())
        } else {
            Err(CaptureError::missing_capability("window capture"))
        }
    }

    fn ensure_display_capability(&self) -> Result<(), CaptureError> {
        if self.backend.capabilities().display_capture {
            Ok(())
        } else {
            Err(CaptureError::missing_capability("display capture"))
        }
    }

    fn emit_error(&self, err: CaptureError) -> CaptureError {
        for observer in self.shared.observers.read().iter() {
            observer.on_error(&err);
        }
        err
    }

    /// Sample pipeline, run once per backend callback invocation and
    /// always synchronously with respect to it: measure, gate, enrich,
    /// track, emit.
    fn buffer_callback(&self, config: &CaptureConfig, target: &CaptureTarget) -> RawBufferCallback {
        let shared = Arc::clone(&self.shared);
        let min_volume = config.min_volume;
        let format = config.format;
        let default_pid = target.primary_pid;

        Arc::new(move |raw, meta| {
            if !shared.accepting.load(Ordering::SeqCst) {
                return;
            }
            let rms = level_meter::rms(raw);
            // Silence below the threshold is invisible to all downstream
            // consumers: no event, no activity-cache update.
            if rms < min_volume {
                return;
            }
            let peak = level_meter::peak(raw);
            let pid = meta.pid.or(default_pid);
            let sample = EnrichedSample::with_levels(
                raw,
                format,
                meta.channels,
                meta.sample_rate,
                pid,
                rms,
                peak,
            );
            if shared.tracking.load(Ordering::SeqCst) {
                if let Some(pid) = pid {
                    shared.activity.lock().record(pid, rms);
                }
            }
            for observer in shared.observers.read().iter() {
                observer.on_sample(&sample);
            }
        })
    }

    fn event_callback(&self) -> BackendEventCallback {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |event| {
            // A signal racing a local stop or dispose has already been
            // handled; swap keeps this one-shot.
            if !shared.accepting.swap(false, Ordering::SeqCst) {
                return;
            }
            *shared.state.lock() = EngineState::Idle;
            *shared.active.lock() = None;
            match event {
                BackendEvent::Stopped => {
                    log::info!("native capture reported stop");
                    for observer in shared.observers.read().iter() {
                        observer.on_capture_stopped();
                    }
                }
                BackendEvent::Error(message) => {
                    let err = CaptureError::CaptureFailed(message);
                    log::warn!("native capture died: {err}");
                    for observer in shared.observers.read().iter() {
                        observer.on_error(&err);
                    }
                }
            }
        })
    }
}
