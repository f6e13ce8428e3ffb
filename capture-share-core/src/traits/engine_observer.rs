use crate::models::error::CaptureError;
use crate::models::sample::EnrichedSample;

/// Passive observer of engine output.
///
/// `on_sample` is called from the backend's callback thread, synchronously
/// with buffer delivery; keep processing minimal. Implementations should
/// hand work off to their own loop if they need to block.
pub trait EngineObserver: Send + Sync {
    /// Exactly one call per gated-in buffer.
    fn on_sample(&self, sample: &EnrichedSample);

    /// Called for local misuse (in addition to the synchronous error
    /// return) and for asynchronous native failures (the only path).
    fn on_error(&self, error: &CaptureError);

    /// Called when the underlying capture reports a stop.
    fn on_capture_stopped(&self);
}
