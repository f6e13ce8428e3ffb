//! TCP transport: newline-delimited JSON between broker and clients.
//!
//! Each connection gets a reader thread feeding the broker loop and a
//! writer thread draining a bounded outbox. The broker never blocks on a
//! socket; a slow client's outbox simply fills and drops.

use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::thread;

use capture_share_core::traits::capture_backend::CaptureBackend;
use crossbeam_channel::{bounded, Sender};
use serde_json::Value;
use uuid::Uuid;

use crate::broker::{Broker, BrokerEvent, BrokerHandle};
use crate::protocol::RequestMessage;

/// Per-client outbox depth. Roughly a second of audio at typical buffer
/// sizes; anything beyond that means the client is not keeping up.
pub const OUTBOX_CAPACITY: usize = 256;

/// Start the broker loop and the accept loop on their own threads.
pub fn spawn_server<B: CaptureBackend + 'static>(
    listener: TcpListener,
    backend: B,
) -> BrokerHandle {
    let (broker, events) = Broker::new(backend);
    thread::Builder::new()
        .name("capture-broker".into())
        .spawn(move || broker.run())
        .expect("failed to spawn broker thread");
    let accept_events = events.clone();
    thread::Builder::new()
        .name("capture-accept".into())
        .spawn(move || serve(listener, accept_events))
        .expect("failed to spawn accept thread");
    BrokerHandle::new(events)
}

/// Accept loop. Runs until the listener fails or the broker goes away.
pub fn serve(listener: TcpListener, events: Sender<BrokerEvent>) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                if !spawn_client(stream, events.clone()) {
                    break;
                }
            }
            Err(err) => {
                log::warn!("accept failed: {err}");
            }
        }
    }
    log::info!("accept loop exited");
}

/// Register one connection with the broker and spawn its reader and
/// writer threads. Returns `false` when the broker is gone.
fn spawn_client(stream: TcpStream, events: Sender<BrokerEvent>) -> bool {
    let client_id = Uuid::new_v4().to_string();
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            log::warn!("failed to clone stream for {peer}: {err}");
            return true;
        }
    };
    log::info!("accepted {peer} as client {client_id}");

    let (outbox_tx, outbox_rx) = bounded::<String>(OUTBOX_CAPACITY);
    if events
        .send(BrokerEvent::Connected {
            client_id: client_id.clone(),
            outbox: outbox_tx,
        })
        .is_err()
    {
        return false;
    }

    // Writer: drains until the broker drops the outbox or the socket dies.
    thread::spawn(move || {
        for line in outbox_rx {
            if writer
                .write_all(line.as_bytes())
                .and_then(|()| writer.write_all(b"\n"))
                .is_err()
            {
                break;
            }
        }
        let _ = writer.shutdown(Shutdown::Both);
    });

    // Reader: one broker event per line, then a disconnect on EOF.
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            let event = match serde_json::from_str::<RequestMessage>(&line) {
                Ok(message) => BrokerEvent::Request {
                    client_id: client_id.clone(),
                    message,
                },
                Err(err) => BrokerEvent::Malformed {
                    client_id: client_id.clone(),
                    request_id: extract_request_id(&line),
                    detail: err.to_string(),
                },
            };
            if events.send(event).is_err() {
                return;
            }
        }
        let _ = events.send(BrokerEvent::Disconnected { client_id });
    });
    true
}

/// Best-effort request id recovery from a line that failed to parse, so
/// the error response can still be correlated.
fn extract_request_id(line: &str) -> Option<String> {
    serde_json::from_str::<Value>(line)
        .ok()?
        .get("requestId")?
        .as_str()
        .map(String::from)
}
