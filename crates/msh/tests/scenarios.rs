//! End-to-end client scenarios over loopback sockets with a mock backing process.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use msh::dispatcher::{
    NOT_PERMITTED_MESSAGE, START_ISSUED_MESSAGE, STOPPING_MESSAGE, UNKNOWN_REQUEST_MESSAGE,
};
use msh::shutdown::graceful_shutdown;
use msh::{Dispatcher, Lifecycle, Stats, Status};
use msh_config::MshConfig;
use msh_protocol::{ProtocolRead, ProtocolString, read_frame};
use msh_server_manager::{MockCall, MockProcessProvider, ServerEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);
const INFO_HANDSHAKE: [u8; 17] = [
    16, 0, 246, 5, 9, 49, 50, 55, 46, 48, 46, 48, 46, 49, 99, 211, 1,
];
const PING: [u8; 10] = [9, 1, 0, 0, 1, 142, 63, 20, 201, 7];

fn join_request() -> Vec<u8> {
    let mut bytes = vec![33, 0, 246, 5, 26];
    bytes.extend_from_slice(b"kubernetes.docker.internal");
    bytes.extend_from_slice(&[99, 211, 2]);
    bytes.extend_from_slice(&[11, 0, 9]);
    bytes.extend_from_slice(b"gekigek99");
    bytes
}

struct Harness {
    addr: String,
    lifecycle: Arc<Lifecycle>,
    mock: MockProcessProvider,
    _shutdown: broadcast::Sender<()>,
}

impl Harness {
    async fn start(config: MshConfig, mock: MockProcessProvider) -> Self {
        let config = Arc::new(config);
        let lifecycle = Lifecycle::new(config.clone(), Arc::new(mock.clone()));
        let stats = Arc::new(Stats::new(true));
        let dispatcher = Arc::new(Dispatcher::new(config, lifecycle.clone(), stats, None));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (shutdown, rx) = broadcast::channel(1);
        tokio::spawn(dispatcher.run(listener, rx));

        Self {
            addr,
            lifecycle,
            mock,
            _shutdown: shutdown,
        }
    }

    async fn connect(&self) -> TcpStream {
        TcpStream::connect(&self.addr).await.unwrap()
    }

    async fn bring_online(&self) {
        self.lifecycle.warm().await.unwrap();
        self.mock.emit(ServerEvent::Ready);
        assert!(
            self.lifecycle
                .wait_for_status(WAIT, |s| *s == Status::Online)
                .await
        );
    }
}

/// A loopback port nothing listens on.
fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn backend() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Accepts backend connections until one starts with `expected`; player
/// count probes also land on the backend and are skipped.
async fn accept_session(listener: &TcpListener, expected: &[u8]) -> TcpStream {
    timeout(WAIT, async {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; expected.len()];
            if stream.read_exact(&mut buf).await.is_ok() && buf == expected {
                return stream;
            }
        }
    })
    .await
    .expect("no proxied session reached the backend")
}

fn config(target_port: u16) -> MshConfig {
    MshConfig {
        target_port,
        idle_shutdown_seconds: 30,
        ..Default::default()
    }
}

/// Reads one `{"text": ...}` style packet and returns its JSON.
async fn read_json(stream: &mut TcpStream) -> serde_json::Value {
    let mut buf = BytesMut::new();
    let (id, body) = timeout(WAIT, read_frame(stream, &mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, 0);
    let (ProtocolString(json), _) = ProtocolString::read_from(&mut &body[..]).unwrap();
    serde_json::from_str(&json).unwrap()
}

async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let n = timeout(WAIT, stream.read(&mut buf)).await.unwrap().unwrap_or(0);
    assert_eq!(n, 0, "connection was not closed");
}

async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    check()
}

#[tokio::test]
async fn test_cold_start_info_probe() {
    let harness = Harness::start(config(closed_port()), MockProcessProvider::new()).await;
    let mut client = harness.connect().await;

    client.write_all(&INFO_HANDSHAKE).await.unwrap();
    client.write_all(&[1, 0]).await.unwrap();

    let status = read_json(&mut client).await;
    assert_eq!(
        status["description"]["text"],
        "Server is hibernating. Join to wake it up!"
    );
    assert_eq!(status["players"]["online"], 0);
    assert_eq!(status["players"]["max"], 0);
    assert_eq!(status["version"]["protocol"], 765);

    client.write_all(&PING).await.unwrap();
    let mut echo = [0u8; 10];
    timeout(WAIT, client.read_exact(&mut echo))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echo, PING);
    assert_closed(&mut client).await;

    assert_eq!(harness.lifecycle.status(), Status::Offline);
    assert_eq!(harness.mock.spawn_count(), 0);
}

#[tokio::test]
async fn test_cold_start_join() {
    let harness = Harness::start(config(closed_port()), MockProcessProvider::new()).await;
    let mut client = harness.connect().await;

    client.write_all(&join_request()).await.unwrap();

    let kick = read_json(&mut client).await;
    let text = kick["text"].as_str().unwrap();
    assert!(text.starts_with(START_ISSUED_MESSAGE), "{}", text);
    assert_closed(&mut client).await;

    assert_eq!(harness.lifecycle.status(), Status::Starting);
    assert_eq!(harness.mock.spawn_count(), 1);
    assert!(harness.lifecycle.idle_timer_pending().await);
}

#[tokio::test]
async fn test_info_while_starting_shows_starting_motd() {
    let harness = Harness::start(config(closed_port()), MockProcessProvider::new()).await;
    harness.lifecycle.warm().await.unwrap();

    let mut client = harness.connect().await;
    client.write_all(&INFO_HANDSHAKE).await.unwrap();

    let status = read_json(&mut client).await;
    assert_eq!(
        status["description"]["text"],
        "Server is starting. Please wait..."
    );
}

#[tokio::test]
async fn test_online_proxy_round_trip() {
    let (backend, port) = backend().await;
    let harness = Harness::start(config(port), MockProcessProvider::new()).await;
    harness.bring_online().await;
    assert!(harness.lifecycle.idle_timer_pending().await);

    let mut client = harness.connect().await;
    client.write_all(&join_request()).await.unwrap();

    // the classification bytes reach the backend first
    let mut server = accept_session(&backend, &join_request()).await;
    assert!(eventually(|| harness.lifecycle.active_sessions() == 1).await);

    server.write_all(b"welcome").await.unwrap();
    let mut reply = [0u8; 7];
    timeout(WAIT, client.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply, b"welcome");

    client.write_all(b"move").await.unwrap();
    let mut forwarded = [0u8; 4];
    timeout(WAIT, server.read_exact(&mut forwarded))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&forwarded, b"move");

    drop(client);
    assert!(eventually(|| harness.lifecycle.active_sessions() == 0).await);
    assert_closed(&mut server).await;
    assert!(harness.lifecycle.idle_timer_pending().await);
    assert_eq!(harness.lifecycle.status(), Status::Online);
}

#[tokio::test]
async fn test_idle_triggered_suspend() {
    let config = MshConfig {
        idle_shutdown_seconds: 1,
        suspend_allow: true,
        ..config(closed_port())
    };
    let harness = Harness::start(config, MockProcessProvider::new()).await;
    harness.bring_online().await;

    assert!(
        harness
            .lifecycle
            .wait_for_status(WAIT, |s| *s == Status::Suspended)
            .await
    );
    assert!(harness.mock.is_suspended());
    assert_eq!(harness.mock.count(&MockCall::SuspendTree), 1);
}

#[tokio::test]
async fn test_resume_on_next_request() {
    let (backend, port) = backend().await;
    let config = MshConfig {
        suspend_allow: true,
        ..config(port)
    };
    let harness = Harness::start(config, MockProcessProvider::new()).await;
    harness.bring_online().await;
    harness.lifecycle.freeze(false).await.unwrap();
    assert_eq!(harness.lifecycle.status(), Status::Suspended);

    let mut client = harness.connect().await;
    client.write_all(&INFO_HANDSHAKE).await.unwrap();

    let mut server = accept_session(&backend, &INFO_HANDSHAKE).await;
    assert_eq!(harness.lifecycle.status(), Status::Online);
    assert_eq!(harness.mock.count(&MockCall::ResumeTree), 1);

    server.write_all(&PING).await.unwrap();
    let mut reply = [0u8; 10];
    timeout(WAIT, client.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, PING);
    // server list pings are not player sessions
    assert_eq!(harness.lifecycle.active_sessions(), 0);
}

#[tokio::test]
async fn test_shutdown_with_clients_connected() {
    let (backend, port) = backend().await;
    let mock = MockProcessProvider::new().with_exit_on_command("stop");
    let harness = Harness::start(config(port), mock).await;
    harness.bring_online().await;

    let mut first = harness.connect().await;
    first.write_all(&join_request()).await.unwrap();
    let first_server = accept_session(&backend, &join_request()).await;
    let mut second = harness.connect().await;
    second.write_all(&join_request()).await.unwrap();
    let second_server = accept_session(&backend, &join_request()).await;
    assert!(eventually(|| harness.lifecycle.active_sessions() == 2).await);

    graceful_shutdown(&harness.lifecycle, 10).await;
    assert_eq!(harness.lifecycle.status(), Status::Offline);
    assert_eq!(harness.mock.count(&MockCall::Execute("stop".to_string())), 1);

    // the exiting server drops its sockets and both sessions drain
    drop(first_server);
    drop(second_server);
    assert_closed(&mut first).await;
    assert_closed(&mut second).await;
    assert!(eventually(|| harness.lifecycle.active_sessions() == 0).await);
}

#[tokio::test]
async fn test_unknown_request_is_rejected() {
    let harness = Harness::start(config(closed_port()), MockProcessProvider::new()).await;
    let mut client = harness.connect().await;

    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    client.shutdown().await.unwrap();

    let kick = read_json(&mut client).await;
    assert_eq!(kick["text"], UNKNOWN_REQUEST_MESSAGE);
}

#[tokio::test]
async fn test_whitelist_blocks_unknown_player() {
    let config = MshConfig {
        whitelist: vec!["Notch".to_string()],
        ..config(closed_port())
    };
    let harness = Harness::start(config, MockProcessProvider::new()).await;
    let mut client = harness.connect().await;

    client.write_all(&join_request()).await.unwrap();

    let kick = read_json(&mut client).await;
    assert_eq!(kick["text"], NOT_PERMITTED_MESSAGE);
    assert_eq!(harness.mock.spawn_count(), 0);
}

#[tokio::test]
async fn test_join_while_stopping_is_refused() {
    let harness = Harness::start(config(closed_port()), MockProcessProvider::new()).await;
    harness.bring_online().await;
    harness.mock.emit(ServerEvent::Stopping);
    assert!(
        harness
            .lifecycle
            .wait_for_status(WAIT, |s| *s == Status::Stopping)
            .await
    );

    let mut client = harness.connect().await;
    client.write_all(&join_request()).await.unwrap();

    let kick = read_json(&mut client).await;
    assert_eq!(kick["text"], STOPPING_MESSAGE);
}

#[tokio::test]
async fn test_major_error_is_shown_to_clients() {
    let harness = Harness::start(
        config(closed_port()),
        MockProcessProvider::new().with_spawn_failure("java: not found"),
    )
    .await;

    let mut client = harness.connect().await;
    client.write_all(&join_request()).await.unwrap();
    let kick = read_json(&mut client).await;
    assert_eq!(
        kick["text"],
        "An error occurred while warming the server: check the msh log"
    );

    let mut client = harness.connect().await;
    client.write_all(&INFO_HANDSHAKE).await.unwrap();
    let status = read_json(&mut client).await;
    assert_eq!(
        status["description"]["text"],
        "minecraft server failed to start: check the msh log"
    );
    assert_eq!(harness.mock.spawn_count(), 1);
}

#[tokio::test]
async fn test_unreachable_backend_kicks_client() {
    let harness = Harness::start(config(closed_port()), MockProcessProvider::new()).await;
    harness.bring_online().await;

    let mut client = harness.connect().await;
    client.write_all(&join_request()).await.unwrap();

    let kick = read_json(&mut client).await;
    assert!(kick["text"].as_str().unwrap().starts_with("can't connect to server"));
    assert_eq!(harness.lifecycle.status(), Status::Online);
}
