//! End-to-end tests for the native RCSP server over real TCP sockets

use rcs::RcsError;
use rcs::metrics::Metrics;
use rcs::protocol::{Request, Verb, parse_response};
use rcs::server::{Server, load_acceptor};
use rcs::storage::Store;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_util::sync::CancellationToken;

struct TestServer {
    server: Arc<Server>,
    addr: SocketAddr,
    task: JoinHandle<rcs::Result<()>>,
}

async fn start() -> TestServer {
    let server = Arc::new(Server::new(
        Arc::new(Store::new()),
        Arc::new(Metrics::new()),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(listener).await })
    };

    TestServer { server, addr, task }
}

async fn send<S>(stream: &mut S, message: &[u8]) -> Vec<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(message).await.unwrap();
    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await.unwrap();
    buf.truncate(n);
    buf
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// Client config trusting only the test CA
fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    let mut reader = BufReader::new(File::open(fixture("ca.pem")).unwrap());
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert.unwrap()).unwrap();
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

async fn wait_for_connections(server: &Server, expected: usize) {
    for _ in 0..200 {
        if server.connection_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {expected} connection(s), found {}",
        server.connection_count()
    );
}

#[tokio::test]
async fn test_set_get_length_close() {
    let ts = start().await;
    let mut client = TcpStream::connect(ts.addr).await.unwrap();

    assert_eq!(
        send(&mut client, b"RCSP/1.0 SET\r\nKEY: k1\r\nVALUE: 10\r\n").await,
        b"RCSP/1.0 SET OK\r\nKEY: k1\r\n"
    );
    assert_eq!(
        send(&mut client, b"RCSP/1.0 GET\r\nKEY: missing\r\n").await,
        b"RCSP/1.0 GET NOT_OK\r\nMESSAGE: Not found\r\nKEY: missing\r\n"
    );

    for i in 2..=5 {
        let request = Request::new(Verb::Set)
            .with_key(&format!("k{i}"))
            .with_value(b"v")
            .encode();
        let reply = send(&mut client, &request).await;
        let response = parse_response(&reply).unwrap();
        assert!(response.ok);
    }
    assert_eq!(
        send(&mut client, b"RCSP/1.0 LENGTH\r\n").await,
        b"RCSP/1.0 LENGTH OK\r\nVALUE: 5\r\n"
    );

    assert_eq!(
        send(&mut client, b"RCSP/1.0 CLOSE\r\n").await,
        b"RCSP/1.0 CLOSE OK\r\n"
    );
    let mut buf = [0u8; 16];
    assert_eq!(client.read(&mut buf).await.unwrap(), 0);

    wait_for_connections(&ts.server, 0).await;
    ts.server.close();
    ts.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_connection_survives_parse_errors() {
    let ts = start().await;
    let mut client = TcpStream::connect(ts.addr).await.unwrap();

    assert_eq!(
        send(&mut client, b"HELLO\r\n").await,
        b"RCSP/1.0 NOT_OK\r\nMESSAGE: Unknown protocol\r\n"
    );
    assert_eq!(
        send(&mut client, b"RCSP/1.0 FLUSHALL\r\n").await,
        b"RCSP/1.0 NOT_OK\r\nMESSAGE: Received invalid command\r\n"
    );
    assert_eq!(
        send(&mut client, b"RCSP/1.0 PING\r\n").await,
        b"RCSP/1.0 PING OK\r\nMESSAGE: PONG\r\n"
    );

    ts.server.close();
    ts.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_clients_share_one_store() {
    let ts = start().await;
    let mut writer = TcpStream::connect(ts.addr).await.unwrap();
    let mut reader = TcpStream::connect(ts.addr).await.unwrap();

    send(&mut writer, b"RCSP/1.0 SET\r\nKEY: shared\r\nVALUE: a\r\nb\r\n").await;
    assert_eq!(
        send(&mut reader, b"RCSP/1.0 GET\r\nKEY: shared\r\n").await,
        b"RCSP/1.0 GET OK\r\nKEY: shared\r\nVALUE: a\r\nb\r\n"
    );

    ts.server.close();
    ts.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_without_connections_is_immediate() {
    let ts = start().await;

    let started = Instant::now();
    ts.server
        .shutdown(&CancellationToken::new())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    // The accept loop ends once the listener is closed
    ts.task.await.unwrap().unwrap();
    assert!(TcpStream::connect(ts.addr).await.is_err());
}

#[tokio::test]
async fn test_shutdown_waits_for_clients() {
    let ts = start().await;
    let mut client = TcpStream::connect(ts.addr).await.unwrap();
    send(&mut client, b"RCSP/1.0 PING\r\n").await;
    wait_for_connections(&ts.server, 1).await;

    let shutdown = {
        let server = Arc::clone(&ts.server);
        tokio::spawn(async move { server.shutdown(&CancellationToken::new()).await })
    };

    // Still served while draining
    assert_eq!(
        send(&mut client, b"RCSP/1.0 LENGTH\r\n").await,
        b"RCSP/1.0 LENGTH OK\r\nVALUE: 0\r\n"
    );
    assert!(!shutdown.is_finished());

    send(&mut client, b"RCSP/1.0 CLOSE\r\n").await;
    shutdown.await.unwrap().unwrap();
    assert_eq!(ts.server.connection_count(), 0);
}

#[tokio::test]
async fn test_interrupted_shutdown_then_close() {
    let ts = start().await;
    let mut client = TcpStream::connect(ts.addr).await.unwrap();
    send(&mut client, b"RCSP/1.0 PING\r\n").await;
    wait_for_connections(&ts.server, 1).await;

    let deadline = CancellationToken::new();
    let trigger = deadline.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = ts.server.shutdown(&deadline).await.unwrap_err();
    assert!(matches!(err, RcsError::ShutdownInterrupted { remaining: 1 }));

    // Forced close terminates the idle client
    ts.server.close();
    let mut buf = [0u8; 16];
    let n = client.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0);
    wait_for_connections(&ts.server, 0).await;
}

#[tokio::test]
async fn test_tls_load_failure_does_not_bind() {
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);

    let server = Arc::new(Server::new(
        Arc::new(Store::new()),
        Arc::new(Metrics::new()),
    ));
    let err = server
        .listen_and_serve_tls(
            &addr.to_string(),
            Path::new("/nonexistent/cert.pem"),
            Path::new("/nonexistent/key.pem"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RcsError::Tls(_)));

    // The address is still free
    TcpListener::bind(addr).await.unwrap();
}

#[tokio::test]
async fn test_tls_round_trip() {
    let store = Arc::new(Store::new());
    let server = Arc::new(Server::new(Arc::clone(&store), Arc::new(Metrics::new())));
    let acceptor = load_acceptor(&fixture("server.pem"), &fixture("server.key")).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve_tls(listener, acceptor).await })
    };

    let tcp = TcpStream::connect(addr).await.unwrap();
    let domain = ServerName::try_from("localhost").unwrap();
    let mut client = tls_connector().connect(domain, tcp).await.unwrap();

    assert_eq!(
        send(&mut client, b"RCSP/1.0 PING\r\n").await,
        b"RCSP/1.0 PING OK\r\nMESSAGE: PONG\r\n"
    );
    assert_eq!(
        send(&mut client, b"RCSP/1.0 SET\r\nKEY: secure\r\nVALUE: 1\r\n").await,
        b"RCSP/1.0 SET OK\r\nKEY: secure\r\n"
    );
    assert_eq!(
        send(&mut client, b"RCSP/1.0 CLOSE\r\n").await,
        b"RCSP/1.0 CLOSE OK\r\n"
    );
    let mut buf = [0u8; 16];
    assert_eq!(client.read(&mut buf).await.unwrap_or(0), 0);

    wait_for_connections(&server, 0).await;
    assert_eq!(store.len(), 1);
    server.close();
    task.await.unwrap().unwrap();
}
