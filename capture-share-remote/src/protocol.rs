//! Wire protocol between broker and clients.
//!
//! Messages travel as newline-delimited JSON objects of the shape
//! `{ type, requestId?, payload }`. Requests always carry a `requestId`;
//! `audio` and `event` messages are unsolicited and carry none. The
//! handshake reuses the response shape with the reserved request id
//! [`WELCOME_REQUEST_ID`].

use capture_share_core::models::config::CaptureConfig;
use capture_share_core::models::error::CaptureError;
use capture_share_core::models::sample::{EnrichedSample, SampleData, SampleFormat};
use capture_share_core::models::target::{
    AppInfo, AppSelector, CaptureTarget, DisplayInfo, TargetSelector, WindowInfo,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved request id of the handshake message sent on connect.
pub const WELCOME_REQUEST_ID: &str = "welcome";

pub const EVENT_CAPTURE_STOPPED: &str = "captureStopped";
pub const EVENT_CAPTURE_ERROR: &str = "captureError";
pub const EVENT_SESSION_ENDED: &str = "sessionEnded";

/// Client → broker messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum RequestMessage {
    ListApps {
        request_id: String,
    },
    ListWindows {
        request_id: String,
    },
    ListDisplays {
        request_id: String,
    },
    StartCapture {
        request_id: String,
        payload: StartCapturePayload,
    },
    StopCapture {
        request_id: String,
    },
    GetStatus {
        request_id: String,
    },
}

impl RequestMessage {
    pub fn request_id(&self) -> &str {
        match self {
            Self::ListApps { request_id }
            | Self::ListWindows { request_id }
            | Self::ListDisplays { request_id }
            | Self::StartCapture { request_id, .. }
            | Self::StopCapture { request_id }
            | Self::GetStatus { request_id } => request_id,
        }
    }
}

/// Broker → client messages. `Response`/`Error` echo the request id they
/// answer; `Audio`/`Event` are unsolicited broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Response { request_id: String, payload: Value },
    Error { request_id: String, payload: WireError },
    Audio { payload: AudioPayload },
    Event { payload: EventPayload },
}

/// Raw target identifier as it appears on the wire. Decoded into a
/// [`TargetSelector`] exactly once, at the protocol boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireTarget {
    Id(u64),
    Name(String),
    Fields(WireTargetFields),
    Many(Vec<WireTarget>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTargetFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireTargetType {
    #[serde(rename = "app")]
    App,
    #[serde(rename = "window")]
    Window,
    #[serde(rename = "display")]
    Display,
    #[serde(rename = "multi-app")]
    MultiApp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCapturePayload {
    pub target: WireTarget,
    pub target_type: WireTargetType,
    #[serde(default)]
    pub options: CaptureConfig,
}

impl WireTarget {
    fn app_selector(&self) -> Result<AppSelector, CaptureError> {
        match self {
            Self::Id(id) => u32::try_from(*id)
                .map(AppSelector::Pid)
                .map_err(|_| CaptureError::InvalidArgument(format!("pid out of range: {id}"))),
            Self::Name(name) => Ok(AppSelector::Name(name.clone())),
            Self::Fields(fields) => {
                if let Some(pid) = fields.pid {
                    Ok(AppSelector::Pid(pid))
                } else if let Some(bundle_id) = &fields.bundle_id {
                    Ok(AppSelector::BundleId(bundle_id.clone()))
                } else if let Some(name) = &fields.name {
                    Ok(AppSelector::Name(name.clone()))
                } else {
                    Err(CaptureError::InvalidArgument(
                        "application target must carry a pid, bundleId, or name".into(),
                    ))
                }
            }
            Self::Many(_) => Err(CaptureError::InvalidArgument(
                "expected a single application identifier, got a list".into(),
            )),
        }
    }

    fn numeric_id(&self, what: &str) -> Result<u64, CaptureError> {
        match self {
            Self::Id(id) => Ok(*id),
            Self::Name(text) => text.parse().map_err(|_| {
                CaptureError::InvalidArgument(format!("{what} id must be numeric, got {text:?}"))
            }),
            _ => Err(CaptureError::InvalidArgument(format!(
                "{what} target must be a numeric id"
            ))),
        }
    }
}

impl StartCapturePayload {
    /// Decode the raw wire target into a typed selector, honoring the
    /// declared `targetType`. Malformed combinations are
    /// `InvalidArgument`, never panics or guesses.
    pub fn selector(&self) -> Result<TargetSelector, CaptureError> {
        match self.target_type {
            WireTargetType::App => Ok(TargetSelector::Application(self.target.app_selector()?)),
            WireTargetType::Window => {
                Ok(TargetSelector::Window(self.target.numeric_id("window")?))
            }
            WireTargetType::Display => {
                let id = self.target.numeric_id("display")?;
                u32::try_from(id)
                    .map(TargetSelector::Display)
                    .map_err(|_| {
                        CaptureError::InvalidArgument(format!("display id out of range: {id}"))
                    })
            }
            WireTargetType::MultiApp => match &self.target {
                WireTarget::Many(items) => {
                    let selectors = items
                        .iter()
                        .map(WireTarget::app_selector)
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(TargetSelector::Applications(selectors))
                }
                single => Ok(TargetSelector::Applications(vec![single.app_selector()?])),
            },
        }
    }
}

/// Structured error as sent over the wire: stable machine-readable code,
/// human message, and a details record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl From<&CaptureError> for WireError {
    fn from(err: &CaptureError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            details: err.details(),
        }
    }
}

/// Broker-side view of the active session, shared in the welcome
/// handshake and status responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub target: CaptureTarget,
    pub member_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomePayload {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppsResponse {
    pub apps: Vec<AppInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowsResponse {
    pub windows: Vec<WindowInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplaysResponse {
    pub displays: Vec<DisplayInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// True when the request joined an already-running session instead of
    /// starting a fresh capture.
    #[serde(default)]
    pub joined: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResponse {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub capturing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSnapshot>,
}

/// Enriched sample as broadcast to session members. The raw buffer rides
/// as a flat numeric sequence in the configured output format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioPayload {
    pub session_id: String,
    pub samples: Vec<f64>,
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
    pub sample_count: usize,
    pub frame_count: usize,
    pub duration_ms: f64,
    pub rms: f32,
    pub peak: f32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl AudioPayload {
    pub fn from_sample(session_id: &str, sample: &EnrichedSample) -> Self {
        let samples = match &sample.data {
            SampleData::Float32(data) => data.iter().map(|&s| f64::from(s)).collect(),
            SampleData::Int16(data) => data.iter().map(|&s| f64::from(s)).collect(),
        };
        Self {
            session_id: session_id.to_string(),
            samples,
            format: sample.format,
            channels: sample.channels,
            sample_rate: sample.sample_rate,
            sample_count: sample.sample_count,
            frame_count: sample.frame_count,
            duration_ms: sample.duration_ms,
            rms: sample.rms,
            peak: sample.peak,
            timestamp: sample.timestamp,
            pid: sample.pid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ServerMessage {
    pub fn response<T: Serialize>(request_id: &str, payload: &T) -> Self {
        Self::Response {
            request_id: request_id.to_string(),
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    pub fn error(request_id: &str, err: &CaptureError) -> Self {
        Self::Error {
            request_id: request_id.to_string(),
            payload: WireError::from(err),
        }
    }

    pub fn event(payload: EventPayload) -> Self {
        Self::Event { payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape_is_stable() {
        let message = RequestMessage::StartCapture {
            request_id: "req-1".into(),
            payload: StartCapturePayload {
                target: WireTarget::Name("Music Player".into()),
                target_type: WireTargetType::App,
                options: CaptureConfig::default(),
            },
        };
        let json: Value = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "startCapture");
        assert_eq!(json["requestId"], "req-1");
        assert_eq!(json["payload"]["target"], "Music Player");
        assert_eq!(json["payload"]["targetType"], "app");
        assert_eq!(json["payload"]["options"]["sampleRate"], 48000);
    }

    #[test]
    fn requests_round_trip() {
        let line = r#"{"type":"listApps","requestId":"req-9"}"#;
        let message: RequestMessage = serde_json::from_str(line).unwrap();
        assert_eq!(message.request_id(), "req-9");
        assert_eq!(message, RequestMessage::ListApps { request_id: "req-9".into() });
    }

    #[test]
    fn start_payload_defaults_missing_options() {
        let payload: StartCapturePayload =
            serde_json::from_str(r#"{"target":200,"targetType":"app"}"#).unwrap();
        assert_eq!(payload.options, CaptureConfig::default());
        assert_eq!(
            payload.selector().unwrap(),
            TargetSelector::Application(AppSelector::Pid(200))
        );
    }

    #[test]
    fn selector_decodes_every_target_type() {
        let window: StartCapturePayload =
            serde_json::from_str(r#"{"target":"42","targetType":"window"}"#).unwrap();
        assert_eq!(window.selector().unwrap(), TargetSelector::Window(42));

        let display: StartCapturePayload =
            serde_json::from_str(r#"{"target":1,"targetType":"display"}"#).unwrap();
        assert_eq!(display.selector().unwrap(), TargetSelector::Display(1));

        let multi: StartCapturePayload = serde_json::from_str(
            r#"{"target":["Music Player",{"bundleId":"com.example"}],"targetType":"multi-app"}"#,
        )
        .unwrap();
        assert_eq!(
            multi.selector().unwrap(),
            TargetSelector::Applications(vec![
                AppSelector::Name("Music Player".into()),
                AppSelector::BundleId("com.example".into()),
            ])
        );
    }

    #[test]
    fn non_numeric_window_id_is_invalid_argument() {
        let payload: StartCapturePayload =
            serde_json::from_str(r#"{"target":"main window","targetType":"window"}"#).unwrap();
        let err = payload.selector().unwrap_err();
        assert!(matches!(err, CaptureError::InvalidArgument(_)));
    }

    #[test]
    fn empty_target_object_is_invalid_argument() {
        let payload: StartCapturePayload =
            serde_json::from_str(r#"{"target":{},"targetType":"app"}"#).unwrap();
        assert!(matches!(
            payload.selector().unwrap_err(),
            CaptureError::InvalidArgument(_)
        ));
    }

    #[test]
    fn wire_error_carries_stable_code_and_details() {
        let err = CaptureError::TargetNotFound {
            requested: "Spreadsheet".into(),
            available: vec!["Music Player".into()],
        };
        let wire = WireError::from(&err);
        assert_eq!(wire.code, "ERR_APP_NOT_FOUND");
        assert_eq!(wire.details["availableApps"][0], "Music Player");
    }

    #[test]
    fn audio_payload_flattens_int16_data() {
        let sample = EnrichedSample::from_raw(&[1.0, -1.0], SampleFormat::Int16, 1, 48000, Some(7));
        let payload = AudioPayload::from_sample("cap-1", &sample);
        assert_eq!(payload.samples, vec![32767.0, -32768.0]);
        assert_eq!(payload.session_id, "cap-1");
        assert_eq!(payload.pid, Some(7));
    }

    #[test]
    fn unsolicited_messages_have_no_request_id() {
        let message = ServerMessage::event(EventPayload {
            name: EVENT_CAPTURE_STOPPED.into(),
            session_id: Some("cap-1".into()),
            message: None,
            code: None,
        });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "event");
        assert!(json.get("requestId").is_none());
        assert_eq!(json["payload"]["name"], "captureStopped");
    }
}
