use serde_json::{json, Value};
use thiserror::Error;

/// Errors that can occur during capture operations.
///
/// Every variant carries a stable machine-readable code (`code()`) and a
/// structured details record (`details()`) for wire serialization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// No capturable targets are visible at all. Treated as a permission
    /// problem, not an empty-result success.
    #[error("permission denied: no capturable applications visible")]
    PermissionDenied,

    /// Resolution failed against a non-empty candidate set.
    #[error("target not found: {requested}")]
    TargetNotFound {
        requested: String,
        available: Vec<String>,
    },

    /// A process id selector matched nothing.
    #[error("process not found: pid {pid}")]
    ProcessNotFound { pid: u32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A capture is already active; the existing capture is left untouched.
    #[error("a capture is already active")]
    AlreadyCapturing,

    /// The native backend refused to start, died mid-stream, or is missing
    /// a required capability.
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// Operation attempted after `dispose()`.
    #[error("engine has been disposed")]
    Disposed,
}

impl CaptureError {
    pub fn missing_capability(capability: &str) -> Self {
        Self::CaptureFailed(format!("backend is missing capability: {capability}"))
    }

    /// Stable machine-readable error code for the wire protocol.
    ///
    /// `Disposed` is a local lifecycle error with no dedicated wire code;
    /// it surfaces remotely as a capture failure.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "ERR_PERMISSION_DENIED",
            Self::TargetNotFound { .. } => "ERR_APP_NOT_FOUND",
            Self::ProcessNotFound { .. } => "ERR_PROCESS_NOT_FOUND",
            Self::InvalidArgument(_) => "ERR_INVALID_ARGUMENT",
            Self::AlreadyCapturing => "ERR_ALREADY_CAPTURING",
            Self::CaptureFailed(_) | Self::Disposed => "ERR_CAPTURE_FAILED",
        }
    }

    /// Structured details record: requested identifiers, candidates, and a
    /// remediation hint where one exists.
    pub fn details(&self) -> Value {
        match self {
            Self::PermissionDenied => json!({
                "hint": "grant the capture permission in system settings, then retry",
            }),
            Self::TargetNotFound {
                requested,
                available,
            } => json!({
                "requested": requested,
                "availableApps": available,
                "hint": "check the target name or pick one of the available applications",
            }),
            Self::ProcessNotFound { pid } => json!({
                "requestedPid": pid,
            }),
            Self::InvalidArgument(message) => json!({
                "argument": message,
            }),
            Self::AlreadyCapturing => json!({
                "hint": "stop the active capture before starting a new one",
            }),
            Self::CaptureFailed(reason) => json!({
                "reason": reason,
            }),
            Self::Disposed => json!({
                "reason": "engine has been disposed",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CaptureError::PermissionDenied.code(), "ERR_PERMISSION_DENIED");
        assert_eq!(
            CaptureError::TargetNotFound {
                requested: "x".into(),
                available: vec![]
            }
            .code(),
            "ERR_APP_NOT_FOUND"
        );
        assert_eq!(CaptureError::ProcessNotFound { pid: 1 }.code(), "ERR_PROCESS_NOT_FOUND");
        assert_eq!(
            CaptureError::InvalidArgument("x".into()).code(),
            "ERR_INVALID_ARGUMENT"
        );
        assert_eq!(CaptureError::AlreadyCapturing.code(), "ERR_ALREADY_CAPTURING");
        assert_eq!(
            CaptureError::CaptureFailed("x".into()).code(),
            "ERR_CAPTURE_FAILED"
        );
        assert_eq!(CaptureError::Disposed.code(), "ERR_CAPTURE_FAILED");
    }

    #[test]
    fn not_found_details_list_candidates() {
        let err = CaptureError::TargetNotFound {
            requested: "Musci Player".into(),
            available: vec!["Music Player".into(), "Example App".into()],
        };
        let details = err.details();
        assert_eq!(details["requested"], "Musci Player");
        assert_eq!(details["availableApps"][0], "Music Player");
    }
}
