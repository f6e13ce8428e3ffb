//! # capture-share-remote
//!
//! Session broker and remote client for sharing one capture across many
//! consumers.
//!
//! The broker owns a single `CaptureEngine` and maps it onto logical
//! sessions: clients asking for the same target share one native capture,
//! a different target triggers stop-then-restart, and every enriched
//! sample fans out best-effort to the session's members. The client side
//! offers the same operations as correlated request/response calls over a
//! reconnecting connection.
//!
//! ## Architecture
//!
//! ```text
//! capture-share-remote (this crate)
//! ├── protocol/     ← wire messages, target decoding, error codes
//! ├── broker/       ← session broker event loop, join-vs-restart, broadcast
//! ├── net/          ← TCP accept loop, per-client reader/writer threads
//! └── client/       ← RemoteClient, request correlation, reconnect policy
//! ```

pub mod broker;
pub mod client;
pub mod net;
pub mod protocol;

pub use broker::{Broker, BrokerEvent, BrokerHandle, ClientId};
pub use client::{
    ClientConfig, ClientError, ClientNotification, ConnectionState, RemoteClient,
};
pub use net::{serve, spawn_server};
pub use protocol::{
    AudioPayload, EventPayload, RequestMessage, ServerMessage, SessionSnapshot,
    StartCapturePayload, StartResponse, StatusResponse, StopResponse, WireError, WireTarget,
    WireTargetType,
};
