//! # capture-share-core
//!
//! Single-capture session engine.
//!
//! The platform allows exactly one native audio capture per process; this
//! crate owns it. A `CaptureEngine` resolves flexible target selectors
//! against live enumeration snapshots, serializes start/stop traffic into
//! the native single-capture constraint, and turns raw buffers into
//! volume-gated, enriched samples for its observers. Native backends
//! implement the `CaptureBackend` trait and plug into the generic engine.
//!
//! ## Architecture
//!
//! ```text
//! capture-share-core (this crate)
//! ├── traits/       ← CaptureBackend, EngineObserver
//! ├── models/       ← CaptureError, EngineState, CaptureConfig, CaptureTarget, EnrichedSample
//! ├── processing/   ← RMS/peak metering, f32 → i16 saturating conversion
//! ├── session/      ← CaptureEngine, target resolver, ActivityCache, LifecycleRegistry
//! └── testing/      ← ScriptedBackend for engine and downstream tests
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod testing;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::config::CaptureConfig;
pub use models::error::CaptureError;
pub use models::sample::{EnrichedSample, SampleData, SampleFormat};
pub use models::state::EngineState;
pub use models::target::{
    AppInfo, AppSelector, CaptureTarget, DisplayInfo, TargetFingerprint, TargetKind,
    TargetSelector, WindowInfo,
};
pub use session::activity::{ActivityCache, ProcessActivity};
pub use session::engine::CaptureEngine;
pub use session::registry::{LifecycleRegistry, Teardown};
pub use traits::capture_backend::{
    BackendCapabilities, BackendEvent, BackendEventCallback, BufferMeta, CaptureBackend,
    NativeCaptureConfig, NativeTarget, RawBufferCallback,
};
pub use traits::engine_observer::EngineObserver;
