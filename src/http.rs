//! HTTP/JSON gateway over the shared store
//!
//! A deliberately small HTTP/1.1 server: one request per connection, answered with
//! `Connection: close`. Each route maps to exactly one store operation.

use crate::Result;
use crate::metrics::Metrics;
use crate::protocol::Verb;
use crate::server::backoff::{
    ACCEPT_RETRY_DELAY_MAX, ACCEPT_RETRY_DELAY_MIN, AcceptError, Backoff, classify_accept_error,
};
use crate::storage::Store;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

/// Time allowed to receive a complete request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_HEADER_LINES: usize = 64;
const MAX_BODY_SIZE: usize = 1024 * 1024;

const JSON: &str = "application/json; charset=UTF-8";
const PROMETHEUS: &str = "text/plain; version=0.0.4";

/// Rendered HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

/// JSON envelope shared by every route
#[derive(Debug, Default, Serialize)]
struct ApiResponse<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    ok: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SetBody {
    value: String,
}

/// HTTP gateway state
pub struct HttpGateway {
    store: Arc<Store>,
    metrics: Arc<Metrics>,
}

impl HttpGateway {
    pub fn new(store: Arc<Store>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// Bind `addr` and serve until `cancel` fires
    pub async fn listen_and_serve(
        self: &Arc<Self>,
        addr: &str,
        tls: Option<TlsAcceptor>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(
            tls = tls.is_some(),
            "HTTP gateway listening on {}",
            listener.local_addr()?
        );
        self.serve(listener, tls, cancel).await
    }

    /// Serve an already bound listener until `cancel` fires
    ///
    /// Once cancelled, no new connections are accepted. Requests already accepted run
    /// to completion, each bounded by the request timeout, before this returns.
    pub async fn serve(
        self: &Arc<Self>,
        listener: TcpListener,
        tls: Option<TlsAcceptor>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let in_flight = TaskTracker::new();
        let mut retry = Backoff::new(ACCEPT_RETRY_DELAY_MIN, ACCEPT_RETRY_DELAY_MAX);

        let result = loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                accepted = listener.accept() => accepted,
            };

            let e = match accepted {
                Ok((stream, peer)) => {
                    retry.reset();
                    self.spawn_connection(&in_flight, stream, peer, tls.clone());
                    continue;
                }
                Err(e) => e,
            };

            match classify_accept_error(&e) {
                AcceptError::Connection => error!("HTTP gateway accept error: {}", e),
                AcceptError::Exhausted => {
                    let delay = retry.next_interval();
                    error!("HTTP gateway accept error: {}; retrying in {:?}", e, delay);
                    tokio::select! {
                        _ = cancel.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                AcceptError::Fatal => {
                    error!("HTTP gateway listener failed: {}", e);
                    break Err(e.into());
                }
            }
        };
        drop(listener);

        in_flight.close();
        if !in_flight.is_empty() {
            info!(pending = in_flight.len(), "Waiting for in-flight HTTP requests");
        }
        in_flight.wait().await;

        info!("HTTP gateway stopped");
        result
    }

    fn spawn_connection(
        self: &Arc<Self>,
        in_flight: &TaskTracker,
        stream: TcpStream,
        peer: SocketAddr,
        tls: Option<TlsAcceptor>,
    ) {
        let gateway = Arc::clone(self);
        in_flight.spawn(async move {
            let exchange = async {
                match tls {
                    None => gateway.handle_connection(stream).await,
                    Some(acceptor) => {
                        let stream = acceptor.accept(stream).await?;
                        gateway.handle_connection(stream).await
                    }
                }
            };

            let result = tokio::time::timeout(REQUEST_TIMEOUT, exchange)
                .await
                .unwrap_or_else(|_| Err(io::ErrorKind::TimedOut.into()));

            if let Err(e) = result {
                debug!(peer = %peer, "HTTP connection error: {}", e);
            }
        });
    }

    /// Handle a single HTTP connection
    async fn handle_connection<S>(&self, stream: S) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(stream);

        let reply = match read_request(&mut reader).await? {
            Some((method, target, body)) => {
                debug!("HTTP {} {}", method, target);
                self.route(&method, &target, &body)
            }
            None => text_reply(400, "Bad Request"),
        };

        send_response(reader.get_mut(), &reply).await
    }

    /// Map a request onto a store operation
    pub fn route(&self, method: &str, target: &str, body: &[u8]) -> HttpReply {
        let path = target.split_once('?').map_or(target, |(path, _)| path);

        let (allowed, verb, key) = match path.strip_prefix('/') {
            Some("PURGE") => ("DELETE", Verb::Purge, None),
            Some("LENGTH") => ("GET", Verb::Length, None),
            Some("KEYS") => ("GET", Verb::Keys, None),
            Some("PING") => ("GET", Verb::Ping, None),
            Some("metrics") => {
                return if method == "GET" {
                    HttpReply {
                        status: 200,
                        content_type: PROMETHEUS,
                        body: self.metrics.gather(),
                    }
                } else {
                    text_reply(405, "Method Not Allowed")
                };
            }
            Some(rest) => match rest.split_once('/') {
                Some((name, key)) if !key.contains('/') => match name {
                    "SET" => ("PUT", Verb::Set, Some(percent_decode(key))),
                    "GET" => ("GET", Verb::Get, Some(percent_decode(key))),
                    "DELETE" => ("DELETE", Verb::Delete, Some(percent_decode(key))),
                    _ => return text_reply(404, "Not Found"),
                },
                _ => return text_reply(404, "Not Found"),
            },
            None => return text_reply(404, "Not Found"),
        };

        if method != allowed {
            return text_reply(405, "Method Not Allowed");
        }

        self.metrics.command(verb).inc();
        let command = verb.as_str();

        let key = match key.as_deref() {
            Some("") => return bad_request(command, "Key cannot be empty"),
            other => other,
        };

        match (verb, key) {
            (Verb::Set, Some(key)) => {
                let Ok(request) = serde_json::from_slice::<SetBody>(body) else {
                    return bad_request(command, "Failed to decode request body");
                };
                if request.value.is_empty() {
                    return bad_request(command, "Value cannot be empty");
                }
                self.store.set(key, request.value);
                json_reply(
                    200,
                    &ApiResponse {
                        command,
                        key: Some(key),
                        ok: true,
                        ..Default::default()
                    },
                )
            }
            (Verb::Get, Some(key)) => {
                let value = self.store.get(key);
                if value.is_some() {
                    self.metrics.get_hits.inc();
                } else {
                    self.metrics.get_misses.inc();
                }
                json_reply(
                    200,
                    &ApiResponse {
                        command,
                        key: Some(key),
                        ok: value.is_some(),
                        value: value
                            .map(|v| Value::String(String::from_utf8_lossy(&v).into_owned())),
                        ..Default::default()
                    },
                )
            }
            (Verb::Delete, Some(key)) => {
                self.store.delete(key);
                json_reply(
                    200,
                    &ApiResponse {
                        command,
                        key: Some(key),
                        ok: true,
                        ..Default::default()
                    },
                )
            }
            (Verb::Purge, _) => {
                self.store.purge();
                json_reply(
                    200,
                    &ApiResponse {
                        command,
                        ok: true,
                        ..Default::default()
                    },
                )
            }
            (Verb::Length, _) => json_reply(
                200,
                &ApiResponse {
                    command,
                    value: Some(Value::from(self.store.len())),
                    ok: true,
                    ..Default::default()
                },
            ),
            (Verb::Keys, _) => json_reply(
                200,
                &ApiResponse {
                    command,
                    value: Some(Value::from(self.store.keys())),
                    ok: true,
                    ..Default::default()
                },
            ),
            _ => json_reply(
                200,
                &ApiResponse {
                    command,
                    message: Some("PONG"),
                    ok: true,
                    ..Default::default()
                },
            ),
        }
    }
}

/// Read the request line, headers and body
///
/// Returns `None` when the request cannot be understood.
async fn read_request<R>(reader: &mut R) -> io::Result<Option<(String, String, Vec<u8>)>>
where
    R: AsyncBufRead + Unpin,
{
    // Parse simple HTTP request: "GET /path HTTP/1.1"
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Ok(None);
    };
    let (method, target) = (method.to_string(), target.to_string());

    let mut content_length = 0;
    for _ in 0..MAX_HEADER_LINES {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let line = line.trim_end();
        if line.is_empty() {
            if content_length > MAX_BODY_SIZE {
                return Ok(None);
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).await?;
            return Ok(Some((method, target, body)));
        }
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            let Ok(length) = value.trim().parse() else {
                return Ok(None);
            };
            content_length = length;
        }
    }

    Ok(None)
}

/// Send HTTP response
async fn send_response<W>(stream: &mut W, reply: &HttpReply) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let status_text = match reply.status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "Unknown",
    };

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        reply.status,
        status_text,
        reply.content_type,
        reply.body.len(),
        reply.body
    );

    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await
}

fn json_reply(status: u16, response: &ApiResponse<'_>) -> HttpReply {
    match serde_json::to_string(response) {
        Ok(body) => HttpReply {
            status,
            content_type: JSON,
            body,
        },
        Err(e) => {
            error!("Failed to encode response: {}", e);
            text_reply(500, "Internal Server Error")
        }
    }
}

fn bad_request(command: &str, message: &str) -> HttpReply {
    json_reply(
        400,
        &ApiResponse {
            command,
            message: Some(message),
            ok: false,
            ..Default::default()
        },
    )
}

fn text_reply(status: u16, body: &str) -> HttpReply {
    HttpReply {
        status,
        content_type: "text/plain",
        body: body.to_string(),
    }
}

/// Decode `%XX` escapes in a path segment; malformed escapes are kept as-is
fn percent_decode(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(byte) = bytes
                .get(i + 1..i + 3)
                .and_then(|hex| std::str::from_utf8(hex).ok())
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
        {
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
