//! Session broker: presents the single capture engine as N logical
//! sessions.
//!
//! The broker runs a single event loop fed by a channel. Transport
//! threads push connects, requests, and disconnects; the engine observer
//! pushes samples and lifecycle signals. All session state is mutated on
//! this one loop, so no request handling ever races another.

use std::collections::{HashMap, HashSet};

use capture_share_core::models::config::CaptureConfig;
use capture_share_core::models::error::CaptureError;
use capture_share_core::models::sample::EnrichedSample;
use capture_share_core::models::target::CaptureTarget;
use capture_share_core::session::engine::CaptureEngine;
use capture_share_core::session::registry::Teardown;
use capture_share_core::traits::capture_backend::CaptureBackend;
use capture_share_core::traits::engine_observer::EngineObserver;
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender, TrySendError};
use std::sync::Arc;

use crate::protocol::{
    AppsResponse, AudioPayload, DisplaysResponse, EventPayload, RequestMessage, ServerMessage,
    SessionSnapshot, StartCapturePayload, StartResponse, StatusResponse, StopResponse,
    WelcomePayload, WindowsResponse, EVENT_CAPTURE_ERROR, EVENT_CAPTURE_STOPPED,
    EVENT_SESSION_ENDED, WELCOME_REQUEST_ID,
};

pub type ClientId = String;

/// Everything the broker loop reacts to.
pub enum BrokerEvent {
    /// A transport accepted a connection; `outbox` carries serialized
    /// lines back to it.
    Connected {
        client_id: ClientId,
        outbox: Sender<String>,
    },
    Disconnected {
        client_id: ClientId,
    },
    Request {
        client_id: ClientId,
        message: RequestMessage,
    },
    /// A line that failed to parse as a request. Answered with an
    /// `ERR_INVALID_ARGUMENT` error, never dropped silently.
    Malformed {
        client_id: ClientId,
        request_id: Option<String>,
        detail: String,
    },
    Sample(EnrichedSample),
    CaptureStopped,
    CaptureError(CaptureError),
    Shutdown,
}

/// Engine observer that forwards into the broker loop.
struct EngineBridge {
    events: Sender<BrokerEvent>,
}

impl EngineObserver for EngineBridge {
    fn on_sample(&self, sample: &EnrichedSample) {
        let _ = self.events.send(BrokerEvent::Sample(sample.clone()));
    }

    fn on_error(&self, error: &CaptureError) {
        let _ = self.events.send(BrokerEvent::CaptureError(error.clone()));
    }

    fn on_capture_stopped(&self) {
        let _ = self.events.send(BrokerEvent::CaptureStopped);
    }
}

struct ClientConnection {
    outbox: Sender<String>,
}

/// One active capture shared by its member clients.
struct ActiveSession {
    id: String,
    target: CaptureTarget,
    members: HashSet<ClientId>,
}

pub struct Broker<B: CaptureBackend> {
    engine: CaptureEngine<B>,
    clients: HashMap<ClientId, ClientConnection>,
    session: Option<ActiveSession>,
    events: Receiver<BrokerEvent>,
    session_seq: u64,
    dropped_messages: u64,
}

/// Cloneable handle used to push events and to tear the broker down at
/// process shutdown.
#[derive(Clone)]
pub struct BrokerHandle {
    events: Sender<BrokerEvent>,
}

impl BrokerHandle {
    pub fn new(events: Sender<BrokerEvent>) -> Self {
        Self { events }
    }

    pub fn sender(&self) -> Sender<BrokerEvent> {
        self.events.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.events.send(BrokerEvent::Shutdown);
    }
}

impl Teardown for BrokerHandle {
    fn teardown(&self) {
        self.shutdown();
    }
}

impl<B: CaptureBackend> Broker<B> {
    pub fn new(backend: B) -> (Self, Sender<BrokerEvent>) {
        let (tx, rx) = unbounded();
        let engine = CaptureEngine::new(backend);
        engine.add_observer(Arc::new(EngineBridge { events: tx.clone() }));
        (
            Self {
                engine,
                clients: HashMap::new(),
                session: None,
                events: rx,
                session_seq: 0,
                dropped_messages: 0,
            },
            tx,
        )
    }

    /// Run the loop until a `Shutdown` event or all senders are gone.
    pub fn run(mut self) {
        loop {
            match self.events.recv() {
                Ok(event) => {
                    if !self.handle_event(event) {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        log::info!("broker loop exited");
    }

    /// One loop step. Returns `false` when the broker should stop.
    pub fn handle_event(&mut self, event: BrokerEvent) -> bool {
        match event {
            BrokerEvent::Connected { client_id, outbox } => self.handle_connected(client_id, outbox),
            BrokerEvent::Disconnected { client_id } => self.handle_disconnected(&client_id),
            BrokerEvent::Request { client_id, message } => self.handle_request(&client_id, message),
            BrokerEvent::Malformed {
                client_id,
                request_id,
                detail,
            } => {
                let request_id = request_id.as_deref().unwrap_or("unknown");
                log::warn!("malformed request from {client_id}: {detail}");
                self.send_to(
                    &client_id,
                    &ServerMessage::error(request_id, &CaptureError::InvalidArgument(detail)),
                );
            }
            BrokerEvent::Sample(sample) => self.broadcast_sample(&sample),
            BrokerEvent::CaptureStopped => {
                self.end_session(EVENT_CAPTURE_STOPPED, None);
            }
            BrokerEvent::CaptureError(err) => {
                // The engine reports request-scoped start failures here
                // too, and those were already answered on the request
                // path. A capture that actually died has reset the
                // engine to idle before this event arrives; while the
                // engine is still capturing, the active session is
                // healthy and the error belonged to some request.
                if self.session.is_some() && !self.engine.is_capturing() {
                    self.end_session(EVENT_CAPTURE_ERROR, Some(err));
                } else {
                    log::debug!("engine error outside the active capture: {err}");
                }
            }
            BrokerEvent::Shutdown => {
                log::info!("broker shutting down");
                if self.session.is_some() {
                    let _ = self.engine.stop();
                    self.end_session(EVENT_SESSION_ENDED, None);
                }
                self.engine.dispose();
                return false;
            }
        }
        true
    }

    pub fn dropped_messages(&self) -> u64 {
        self.dropped_messages
    }

    fn handle_connected(&mut self, client_id: ClientId, outbox: Sender<String>) {
        log::info!("client connected: {client_id}");
        self.clients
            .insert(client_id.clone(), ClientConnection { outbox });
        let welcome = WelcomePayload {
            client_id: client_id.clone(),
            session: self.snapshot(),
        };
        self.send_to(&client_id, &ServerMessage::response(WELCOME_REQUEST_ID, &welcome));
    }

    fn handle_disconnected(&mut self, client_id: &str) {
        log::info!("client disconnected: {client_id}");
        self.clients.remove(client_id);
        self.leave_session(client_id);
    }

    fn handle_request(&mut self, client_id: &str, message: RequestMessage) {
        match message {
            RequestMessage::ListApps { request_id } => {
                self.reply(client_id, &request_id, self.engine.list_applications().map(|apps| AppsResponse { apps }));
            }
            RequestMessage::ListWindows { request_id } => {
                self.reply(client_id, &request_id, self.engine.list_windows().map(|windows| WindowsResponse { windows }));
            }
            RequestMessage::ListDisplays { request_id } => {
                self.reply(client_id, &request_id, self.engine.list_displays().map(|displays| DisplaysResponse { displays }));
            }
            RequestMessage::StartCapture {
                request_id,
                payload,
            } => self.handle_start(client_id, &request_id, &payload),
            RequestMessage::StopCapture { request_id } => {
                self.leave_session(client_id);
                self.reply::<StopResponse>(client_id, &request_id, Ok(StopResponse { success: true }));
            }
            RequestMessage::GetStatus { request_id } => {
                let status = StatusResponse {
                    capturing: self.engine.is_capturing(),
                    session: self.snapshot(),
                };
                self.reply(client_id, &request_id, Ok(status));
            }
        }
    }

    /// Join-vs-restart decision for a start request.
    ///
    /// Same fingerprint as the active session: add the client as a
    /// member, never touching the native layer. Different fingerprint:
    /// stop, discard, then start fresh. No active session: start fresh.
    fn handle_start(&mut self, client_id: &str, request_id: &str, payload: &StartCapturePayload) {
        let selector = match payload.selector() {
            Ok(selector) => selector,
            Err(err) => {
                self.send_to(client_id, &ServerMessage::error(request_id, &err));
                return;
            }
        };

        if self.session.is_some() {
            let resolved = match self.engine.resolve_target(&selector) {
                Ok(resolved) => resolved,
                Err(err) => {
                    self.send_to(client_id, &ServerMessage::error(request_id, &err));
                    return;
                }
            };
            let matches = self
                .session
                .as_ref()
                .is_some_and(|s| s.target.fingerprint() == resolved.fingerprint());
            if matches {
                let session = self.session.as_mut().unwrap();
                session.members.insert(client_id.to_string());
                let response = StartResponse {
                    success: true,
                    session_id: Some(session.id.clone()),
                    joined: true,
                    message: Some(format!("joined capture of {}", session.target.describe())),
                };
                log::info!("client {client_id} joined session {}", session.id);
                self.reply(client_id, request_id, Ok(response));
                return;
            }
            // Switch is always stop-then-start, never concurrent.
            let ended = self.session.take().unwrap();
            let _ = self.engine.stop();
            self.notify_session_end(&ended, client_id, EVENT_SESSION_ENDED, None);
        }

        match self.engine.start(&selector, &payload.options) {
            Ok(target) => {
                let id = self.next_session_id();
                let mut members = HashSet::new();
                members.insert(client_id.to_string());
                log::info!("session {id} started: {}", target.describe());
                self.session = Some(ActiveSession {
                    id: id.clone(),
                    target,
                    members,
                });
                let response = StartResponse {
                    success: true,
                    session_id: Some(id),
                    joined: false,
                    message: None,
                };
                self.reply(client_id, request_id, Ok(response));
            }
            Err(err) => {
                // Failure is the requester's alone; nothing is broadcast.
                self.send_to(client_id, &ServerMessage::error(request_id, &err));
            }
        }
    }

    /// Remove a client from the active session; stops the engine and
    /// discards the session when the member set drains.
    fn leave_session(&mut self, client_id: &str) {
        let drained = match &mut self.session {
            Some(session) => {
                session.members.remove(client_id);
                session.members.is_empty()
            }
            None => false,
        };
        if drained {
            let session = self.session.take().unwrap();
            let _ = self.engine.stop();
            log::info!("session {} discarded: no members left", session.id);
        }
    }

    /// Discard the active session after the capture itself ended, telling
    /// every remaining member.
    fn end_session(&mut self, event_name: &str, err: Option<CaptureError>) {
        if let Some(session) = self.session.take() {
            self.notify_session_end(&session, "", event_name, err);
        }
    }

    fn notify_session_end(
        &mut self,
        session: &ActiveSession,
        except: &str,
        event_name: &str,
        err: Option<CaptureError>,
    ) {
        let payload = EventPayload {
            name: event_name.to_string(),
            session_id: Some(session.id.clone()),
            message: err.as_ref().map(|e| e.to_string()),
            code: err.as_ref().map(|e| e.code().to_string()),
        };
        let message = ServerMessage::event(payload);
        let members: Vec<ClientId> = session
            .members
            .iter()
            .filter(|m| m.as_str() != except)
            .cloned()
            .collect();
        for member in members {
            self.send_to(&member, &message);
        }
    }

    /// Fan the sample out to every member of the active session, in
    /// arrival order, best-effort.
    fn broadcast_sample(&mut self, sample: &EnrichedSample) {
        let Some(session) = &self.session else {
            return;
        };
        let payload = AudioPayload::from_sample(&session.id, sample);
        let message = ServerMessage::Audio { payload };
        let line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(err) => {
                log::error!("failed to serialize sample: {err}");
                return;
            }
        };
        let members: Vec<ClientId> = session.members.iter().cloned().collect();
        for member in members {
            self.send_line(&member, line.clone());
        }
    }

    fn snapshot(&self) -> Option<SessionSnapshot> {
        self.session.as_ref().map(|s| SessionSnapshot {
            session_id: s.id.clone(),
            target: s.target.clone(),
            member_count: s.members.len(),
        })
    }

    fn reply<T: serde::Serialize>(
        &mut self,
        client_id: &str,
        request_id: &str,
        result: Result<T, CaptureError>,
    ) {
        let message = match result {
            Ok(payload) => ServerMessage::response(request_id, &payload),
            Err(err) => ServerMessage::error(request_id, &err),
        };
        self.send_to(client_id, &message);
    }

    fn send_to(&mut self, client_id: &str, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(line) => self.send_line(client_id, line),
            Err(err) => log::error!("failed to serialize message: {err}"),
        }
    }

    /// Best-effort delivery: a full outbox drops the line rather than
    /// stalling the loop; a closed outbox is treated as a disconnect.
    fn send_line(&mut self, client_id: &str, line: String) {
        let Some(client) = self.clients.get(client_id) else {
            return;
        };
        match client.outbox.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped_messages += 1;
                log::debug!("outbox full for {client_id}, message dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.handle_disconnected(client_id);
            }
        }
    }

    fn next_session_id(&mut self) -> String {
        self.session_seq += 1;
        format!("cap-{:x}-{:x}", Utc::now().timestamp_millis(), self.session_seq)
    }

    /// Drain events the engine observer produced synchronously during a
    /// request, the way `run` would pick them up on its next iteration.
    #[cfg(test)]
    fn pump(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
        }
    }
}
