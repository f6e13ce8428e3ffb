//! Full-stack tests: scripted backend, broker, TCP transport, and remote
//! clients in one process.

use std::net::TcpListener;
use std::time::{Duration, Instant};

use std::sync::Arc;

use capture_share_core::models::config::CaptureConfig;
use capture_share_core::models::target::AppInfo;
use capture_share_core::session::registry::{LifecycleRegistry, Teardown};
use capture_share_core::testing::{BackendHandle, ScriptedBackend};
use capture_share_core::traits::capture_backend::{BackendEvent, BufferMeta};
use capture_share_remote::client::{ClientConfig, ClientError, ClientNotification, RemoteClient};
use capture_share_remote::net::spawn_server;
use capture_share_remote::protocol::{WireTarget, WireTargetType, EVENT_SESSION_ENDED};

fn start_stack() -> (BackendHandle, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (backend, handle) = ScriptedBackend::new();
    handle.set_apps(vec![
        AppInfo {
            pid: 100,
            name: "Example App".into(),
            bundle_id: Some("com.example.app".into()),
        },
        AppInfo {
            pid: 200,
            name: "Music Player".into(),
            bundle_id: Some("com.example.music".into()),
        },
    ]);
    let _broker = spawn_server(listener, backend);
    (handle, addr)
}

fn connect(addr: &str) -> RemoteClient {
    let mut config = ClientConfig::new(addr);
    config.reconnect = false;
    config.request_timeout = Duration::from_secs(5);
    let client = RemoteClient::connect(config).unwrap();
    wait_for(&client, |n| *n == ClientNotification::Connected);
    client
}

fn wait_for<F: Fn(&ClientNotification) -> bool>(
    client: &RemoteClient,
    predicate: F,
) -> ClientNotification {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .expect("timed out waiting for notification");
        let notification = client
            .notifications()
            .recv_timeout(remaining)
            .expect("notification channel closed");
        if predicate(&notification) {
            return notification;
        }
    }
}

fn start_app(client: &RemoteClient, name: &str) -> capture_share_remote::StartResponse {
    client
        .start_capture(
            WireTarget::Name(name.into()),
            WireTargetType::App,
            CaptureConfig::default(),
        )
        .unwrap()
}

fn stereo_meta() -> BufferMeta {
    BufferMeta {
        sample_rate: 48000,
        channels: 2,
        pid: None,
    }
}

#[test]
fn welcome_then_listing() {
    let (_handle, addr) = start_stack();
    let client = connect(&addr);

    assert!(client.client_id().is_some());
    assert!(client.welcome_session().is_none());

    let apps = client.list_apps().unwrap();
    assert_eq!(apps.len(), 2);
    assert_eq!(apps[1].name, "Music Player");
}

#[test]
fn two_clients_share_one_native_capture() {
    let (handle, addr) = start_stack();
    let first = connect(&addr);
    let second = connect(&addr);

    let started = start_app(&first, "Music Player");
    assert!(!started.joined);

    let joined = second
        .start_capture(
            WireTarget::Id(200),
            WireTargetType::App,
            CaptureConfig::default(),
        )
        .unwrap();
    assert!(joined.joined);
    assert_eq!(joined.session_id, started.session_id);
    assert_eq!(handle.start_calls(), 1);

    handle.push_buffer(&vec![0.5f32; 1024], stereo_meta());
    for client in [&first, &second] {
        let notification = wait_for(client, |n| matches!(n, ClientNotification::Audio(_)));
        let ClientNotification::Audio(audio) = notification else {
            unreachable!()
        };
        assert_eq!(audio.frame_count, 512);
        assert_eq!(audio.pid, Some(200));
        assert_eq!(audio.session_id, started.session_id.clone().unwrap());
    }
}

#[test]
fn different_target_restarts_and_notifies_old_members() {
    let (handle, addr) = start_stack();
    let first = connect(&addr);
    let second = connect(&addr);

    start_app(&first, "Music Player");
    assert!(first.is_capturing());

    let switched = start_app(&second, "Example App");
    assert!(!switched.joined);
    assert_eq!(handle.stop_calls(), 1);
    assert_eq!(handle.start_calls(), 2);

    let notification = wait_for(&first, |n| {
        matches!(n, ClientNotification::Event(e) if e.name == EVENT_SESSION_ENDED)
    });
    let ClientNotification::Event(event) = notification else {
        unreachable!()
    };
    assert!(event.session_id.is_some());
    assert!(!first.is_capturing());
    assert!(second.is_capturing());
}

#[test]
fn stopped_target_can_be_restarted_under_a_new_session_id() {
    let (handle, addr) = start_stack();
    let client = connect(&addr);

    let first = start_app(&client, "Music Player");
    client.stop_capture().unwrap();
    assert!(!client.is_capturing());
    assert_eq!(handle.stop_calls(), 1);

    let second = start_app(&client, "Music Player");
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(handle.start_calls(), 2);
}

#[test]
fn late_client_sees_the_running_session_in_its_welcome() {
    let (_handle, addr) = start_stack();
    let early = connect(&addr);
    start_app(&early, "Music Player");

    let late = connect(&addr);
    let snapshot = late.welcome_session().unwrap();
    assert_eq!(snapshot.member_count, 1);
    assert_eq!(snapshot.target.primary_pid, Some(200));
}

#[test]
fn request_errors_carry_stable_codes() {
    let (_handle, addr) = start_stack();
    let client = connect(&addr);

    let err = client
        .start_capture(
            WireTarget::Name("main window".into()),
            WireTargetType::Window,
            CaptureConfig::default(),
        )
        .unwrap_err();
    let ClientError::Server(wire) = err else {
        panic!("expected a server error, got {err:?}");
    };
    assert_eq!(wire.code, "ERR_INVALID_ARGUMENT");

    let err = client
        .start_capture(
            WireTarget::Name("Spreadsheet".into()),
            WireTargetType::App,
            CaptureConfig::default(),
        )
        .unwrap_err();
    let ClientError::Server(wire) = err else {
        panic!("expected a server error, got {err:?}");
    };
    assert_eq!(wire.code, "ERR_APP_NOT_FOUND");
    assert!(wire.details["availableApps"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == "Music Player"));
}

#[test]
fn native_stop_clears_the_client_session_mirror() {
    let (handle, addr) = start_stack();
    let client = connect(&addr);
    start_app(&client, "Music Player");
    assert!(client.is_capturing());

    handle.emit_event(BackendEvent::Stopped);
    wait_for(&client, |n| matches!(n, ClientNotification::Event(_)));
    assert!(!client.is_capturing());

    let status = client.get_status().unwrap();
    assert!(!status.capturing);
    assert!(status.session.is_none());
}

#[test]
fn registry_shutdown_tears_the_broker_down() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (backend, handle) = ScriptedBackend::new();
    handle.set_apps(vec![AppInfo {
        pid: 200,
        name: "Music Player".into(),
        bundle_id: None,
    }]);
    let broker: Arc<dyn Teardown> = Arc::new(spawn_server(listener, backend));
    let registry = LifecycleRegistry::new();
    registry.register(Arc::downgrade(&broker));

    let client = connect(&addr);
    start_app(&client, "Music Player");

    registry.shutdown_all();
    let notification = wait_for(&client, |n| {
        matches!(n, ClientNotification::Event(e) if e.name == EVENT_SESSION_ENDED)
    });
    let ClientNotification::Event(event) = notification else {
        unreachable!()
    };
    assert!(event.session_id.is_some());
    assert_eq!(handle.stop_calls(), 1);
}

#[test]
fn volume_gate_applies_before_broadcast() {
    let (handle, addr) = start_stack();
    let client = connect(&addr);

    let mut options = CaptureConfig::default();
    options.min_volume = 0.1;
    client
        .start_capture(
            WireTarget::Name("Music Player".into()),
            WireTargetType::App,
            options,
        )
        .unwrap();

    handle.push_buffer(&vec![0.01f32; 512], stereo_meta());
    handle.push_buffer(&vec![0.8f32; 512], stereo_meta());

    let ClientNotification::Audio(audio) =
        wait_for(&client, |n| matches!(n, ClientNotification::Audio(_)))
    else {
        unreachable!()
    };
    // The quiet buffer was gated out; the loud one is the first thing
    // on the wire.
    assert!(audio.rms > 0.5);
}
