//! Remote client: the broker's logical operations over a connection that
//! may drop.
//!
//! Every outbound call is a correlated request: a pending entry with a
//! timeout is armed before the line is written, and exactly one of
//! response, error, timeout, or disconnect resolves it. A supervisor
//! thread owns the reader and the reconnect policy.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use capture_share_core::models::config::CaptureConfig;
use capture_share_core::models::target::{AppInfo, DisplayInfo, WindowInfo};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::{
    AppsResponse, AudioPayload, DisplaysResponse, EventPayload, RequestMessage, ServerMessage,
    SessionSnapshot, StartCapturePayload, StartResponse, StatusResponse, StopResponse,
    WelcomePayload, WindowsResponse, WireError, WireTarget, WireTargetType, EVENT_CAPTURE_ERROR,
    EVENT_CAPTURE_STOPPED, EVENT_SESSION_ENDED, WELCOME_REQUEST_ID,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("request timed out")]
    Timeout,
    #[error("client is disconnected")]
    Disconnected,
    #[error("i/o failure: {0}")]
    Io(String),
    #[error("server rejected the request: {0}")]
    Server(WireError),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Out-of-band traffic surfaced to the caller: broadcast audio, session
/// events, and connection lifecycle changes.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientNotification {
    Connected,
    Disconnected,
    Audio(AudioPayload),
    Event(EventPayload),
    /// Reconnection gave up after the configured maximum attempts.
    /// Terminal; emitted exactly once.
    ReconnectFailed,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub addr: String,
    pub request_timeout: Duration,
    pub reconnect: bool,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// Notification channel depth; audio past a slow consumer is dropped.
    pub notify_capacity: usize,
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            request_timeout: Duration::from_secs(10),
            reconnect: true,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
            notify_capacity: 256,
        }
    }
}

type PendingSender = Sender<Result<Value, ClientError>>;

struct ClientShared {
    config: ClientConfig,
    pending: Mutex<HashMap<String, PendingSender>>,
    next_request: AtomicU64,
    writer: Mutex<Option<TcpStream>>,
    state: Mutex<ConnectionState>,
    client_id: Mutex<Option<String>>,
    /// Session id mirrored from the last successful start, cleared when a
    /// session-ending broadcast arrives.
    session_id: Mutex<Option<String>>,
    /// Broker's session snapshot from the welcome handshake.
    welcome_session: Mutex<Option<SessionSnapshot>>,
    shutdown: AtomicBool,
    notify: Sender<ClientNotification>,
}

impl ClientShared {
    fn notify(&self, notification: ClientNotification) {
        if self.notify.try_send(notification).is_err() {
            log::debug!("notification dropped");
        }
    }

    fn fail_pending(&self, err: &ClientError) {
        let pending: Vec<PendingSender> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        for tx in pending {
            let _ = tx.send(Err(err.clone()));
        }
    }

    fn send_line(&self, message: &RequestMessage) -> Result<(), ClientError> {
        let line =
            serde_json::to_string(message).map_err(|e| ClientError::Protocol(e.to_string()))?;
        let guard = self.writer.lock();
        let Some(stream) = guard.as_ref() else {
            return Err(ClientError::Disconnected);
        };
        let mut stream = stream;
        stream
            .write_all(line.as_bytes())
            .and_then(|()| stream.write_all(b"\n"))
            .map_err(|e| ClientError::Io(e.to_string()))
    }
}

pub struct RemoteClient {
    shared: Arc<ClientShared>,
    notifications: Receiver<ClientNotification>,
    supervisor: Option<JoinHandle<()>>,
}

impl RemoteClient {
    /// Dial the broker and start the supervisor thread. Fails fast when
    /// the initial connection cannot be established.
    pub fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let stream =
            TcpStream::connect(&config.addr).map_err(|e| ClientError::Io(e.to_string()))?;
        let writer = stream
            .try_clone()
            .map_err(|e| ClientError::Io(e.to_string()))?;
        let (notify_tx, notify_rx) = bounded(config.notify_capacity);
        let shared = Arc::new(ClientShared {
            config,
            pending: Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(0),
            writer: Mutex::new(Some(writer)),
            state: Mutex::new(ConnectionState::Connected),
            client_id: Mutex::new(None),
            session_id: Mutex::new(None),
            welcome_session: Mutex::new(None),
            shutdown: AtomicBool::new(false),
            notify: notify_tx,
        });
        let supervisor = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("capture-client".into())
                .spawn(move || supervise(shared, stream))
                .map_err(|e| ClientError::Io(e.to_string()))?
        };
        Ok(Self {
            shared,
            notifications: notify_rx,
            supervisor: Some(supervisor),
        })
    }

    /// Broadcasts and lifecycle changes, in arrival order.
    pub fn notifications(&self) -> &Receiver<ClientNotification> {
        &self.notifications
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Broker-assigned id, known once the welcome handshake has arrived.
    pub fn client_id(&self) -> Option<String> {
        self.shared.client_id.lock().clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id.lock().clone()
    }

    /// Answered locally from the mirrored session id, no round trip.
    pub fn is_capturing(&self) -> bool {
        self.shared.session_id.lock().is_some()
    }

    /// Session already running on the broker when this client connected.
    pub fn welcome_session(&self) -> Option<SessionSnapshot> {
        self.shared.welcome_session.lock().clone()
    }

    pub fn list_apps(&self) -> Result<Vec<AppInfo>, ClientError> {
        let request_id = self.next_request_id();
        let payload = self.request(RequestMessage::ListApps { request_id })?;
        decode::<AppsResponse>(payload).map(|r| r.apps)
    }

    pub fn list_windows(&self) -> Result<Vec<WindowInfo>, ClientError> {
        let request_id = self.next_request_id();
        let payload = self.request(RequestMessage::ListWindows { request_id })?;
        decode::<WindowsResponse>(payload).map(|r| r.windows)
    }

    pub fn list_displays(&self) -> Result<Vec<DisplayInfo>, ClientError> {
        let request_id = self.next_request_id();
        let payload = self.request(RequestMessage::ListDisplays { request_id })?;
        decode::<DisplaysResponse>(payload).map(|r| r.displays)
    }

    pub fn start_capture(
        &self,
        target: WireTarget,
        target_type: WireTargetType,
        options: CaptureConfig,
    ) -> Result<StartResponse, ClientError> {
        let request_id = self.next_request_id();
        let payload = self.request(RequestMessage::StartCapture {
            request_id,
            payload: StartCapturePayload {
                target,
                target_type,
                options,
            },
        })?;
        let response = decode::<StartResponse>(payload)?;
        if response.success {
            *self.shared.session_id.lock() = response.session_id.clone();
        }
        Ok(response)
    }

    pub fn stop_capture(&self) -> Result<StopResponse, ClientError> {
        let request_id = self.next_request_id();
        let payload = self.request(RequestMessage::StopCapture { request_id })?;
        let response = decode::<StopResponse>(payload)?;
        *self.shared.session_id.lock() = None;
        Ok(response)
    }

    pub fn get_status(&self) -> Result<StatusResponse, ClientError> {
        let request_id = self.next_request_id();
        let payload = self.request(RequestMessage::GetStatus { request_id })?;
        decode(payload)
    }

    /// Disable reconnection, close the socket, and fail every pending
    /// request immediately instead of waiting out their timeouts.
    pub fn disconnect(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(stream) = self.shared.writer.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.shared.fail_pending(&ClientError::Disconnected);
        *self.shared.state.lock() = ConnectionState::Disconnected;
    }

    fn next_request_id(&self) -> String {
        format!(
            "req-{}",
            self.shared.next_request.fetch_add(1, Ordering::SeqCst) + 1
        )
    }

    /// Send one correlated request and wait for its single resolution.
    fn request(&self, message: RequestMessage) -> Result<Value, ClientError> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(ClientError::Disconnected);
        }
        let request_id = message.request_id().to_string();
        let (tx, rx) = bounded(1);
        self.shared.pending.lock().insert(request_id.clone(), tx);
        if let Err(err) = self.shared.send_line(&message) {
            self.shared.pending.lock().remove(&request_id);
            return Err(err);
        }
        match rx.recv_timeout(self.shared.config.request_timeout) {
            Ok(result) => result,
            Err(_) => {
                // Removing the entry makes any late response a no-op.
                self.shared.pending.lock().remove(&request_id);
                Err(ClientError::Timeout)
            }
        }
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        self.disconnect();
        if let Some(supervisor) = self.supervisor.take() {
            let _ = supervisor.join();
        }
    }
}

fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, ClientError> {
    serde_json::from_value(payload).map_err(|e| ClientError::Protocol(e.to_string()))
}

/// Reader plus reconnect loop; runs until shutdown or reconnect
/// exhaustion.
fn supervise(shared: Arc<ClientShared>, initial: TcpStream) {
    let mut stream = initial;
    loop {
        *shared.state.lock() = ConnectionState::Connected;
        run_reader(&shared, stream);
        *shared.writer.lock() = None;
        *shared.state.lock() = ConnectionState::Disconnected;
        // The broker dropped this client's membership with the
        // connection; a mirrored session id would now lie.
        *shared.session_id.lock() = None;
        *shared.welcome_session.lock() = None;
        shared.fail_pending(&ClientError::Disconnected);
        shared.notify(ClientNotification::Disconnected);
        if shared.shutdown.load(Ordering::SeqCst) || !shared.config.reconnect {
            return;
        }
        match reconnect(&shared) {
            Some(next) => stream = next,
            None => return,
        }
    }
}

fn run_reader(shared: &Arc<ClientShared>, stream: TcpStream) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let message: ServerMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("unparseable server message: {err}");
                continue;
            }
        };
        match message {
            ServerMessage::Response {
                request_id,
                payload,
            } => {
                if request_id == WELCOME_REQUEST_ID {
                    match serde_json::from_value::<WelcomePayload>(payload) {
                        Ok(welcome) => {
                            log::info!("connected as {}", welcome.client_id);
                            *shared.client_id.lock() = Some(welcome.client_id);
                            *shared.welcome_session.lock() = welcome.session;
                            shared.notify(ClientNotification::Connected);
                        }
                        Err(err) => log::warn!("bad welcome payload: {err}"),
                    }
                } else if let Some(tx) = shared.pending.lock().remove(&request_id) {
                    let _ = tx.send(Ok(payload));
                } else {
                    // Late response for a timed-out request.
                    log::debug!("response for unknown request {request_id}");
                }
            }
            ServerMessage::Error {
                request_id,
                payload,
            } => {
                if let Some(tx) = shared.pending.lock().remove(&request_id) {
                    let _ = tx.send(Err(ClientError::Server(payload)));
                } else {
                    log::debug!("error for unknown request {request_id}");
                }
            }
            ServerMessage::Audio { payload } => {
                shared.notify(ClientNotification::Audio(payload));
            }
            ServerMessage::Event { payload } => {
                if matches!(
                    payload.name.as_str(),
                    EVENT_SESSION_ENDED | EVENT_CAPTURE_STOPPED | EVENT_CAPTURE_ERROR
                ) {
                    *shared.session_id.lock() = None;
                }
                shared.notify(ClientNotification::Event(payload));
            }
        }
    }
}

/// Fixed-delay redial loop. Returns the new stream, or `None` once the
/// attempt budget is spent (after emitting `ReconnectFailed`).
fn reconnect(shared: &Arc<ClientShared>) -> Option<TcpStream> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        if attempts > shared.config.max_reconnect_attempts {
            log::error!(
                "giving up after {} reconnect attempts",
                shared.config.max_reconnect_attempts
            );
            shared.notify(ClientNotification::ReconnectFailed);
            return None;
        }
        thread::sleep(shared.config.reconnect_delay);
        if shared.shutdown.load(Ordering::SeqCst) {
            return None;
        }
        *shared.state.lock() = ConnectionState::Connecting;
        match TcpStream::connect(&shared.config.addr) {
            Ok(stream) => match stream.try_clone() {
                Ok(writer) => {
                    log::info!("reconnected after {attempts} attempt(s)");
                    *shared.writer.lock() = Some(writer);
                    return Some(stream);
                }
                Err(err) => {
                    log::warn!("reconnect attempt {attempts} failed: {err}");
                    *shared.state.lock() = ConnectionState::Disconnected;
                }
            },
            Err(err) => {
                log::warn!("reconnect attempt {attempts} failed: {err}");
                *shared.state.lock() = ConnectionState::Disconnected;
            }
        }
    }
}
