//! Command handlers for RCSP verbs
//!
//! Each handler validates its fields, performs at most one store operation and writes
//! exactly one response.

use super::Server;
use crate::protocol::{Request, Response, ResponseWriter, Verb, parse_request};
use bytes::Bytes;
use std::time::Instant;
use tracing::debug;

const KEY_MISSING: &str = "Key is missing";
const VALUE_MISSING: &str = "Value is missing";
const UNEXPECTED_VALUE: &str = "Received unexpected value";
const INVALID_COMMAND: &str = "Received invalid command";
const NOT_FOUND: &str = "Not found";
const NO_KEYS: &str = "No keys";
const PONG: &str = "PONG";

/// What the connection loop does after a response is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Flow {
    Continue,
    Close,
}

type Handler = fn(&Server, &Request<'_>, &mut ResponseWriter) -> Flow;

/// Verb dispatch table
fn handler_for(verb: Verb) -> Handler {
    match verb {
        Verb::Set => handle_set,
        Verb::Get => handle_get,
        Verb::Delete => handle_delete,
        Verb::Purge => handle_purge,
        Verb::Length => handle_length,
        Verb::Keys => handle_keys,
        Verb::Ping => handle_ping,
        Verb::Close => handle_close,
    }
}

/// Parse one message and write its response
pub(super) fn execute(server: &Server, message: &[u8], response: &mut ResponseWriter) -> Flow {
    let request = match parse_request(message) {
        Ok(request) => request,
        Err(e) => {
            server.metrics.protocol_errors.inc();
            debug!("Failed to parse request: {}", e);
            response.write(&Response::protocol_error(e.client_message()));
            return Flow::Continue;
        }
    };

    let Some(verb) = request.verb else {
        server.metrics.invalid_commands.inc();
        response.write(&Response::protocol_error(INVALID_COMMAND));
        return Flow::Continue;
    };

    server.metrics.command(verb).inc();
    let start = Instant::now();
    let flow = handler_for(verb)(server, &request, response);
    server
        .metrics
        .cmd_latency
        .observe(start.elapsed().as_secs_f64());
    flow
}

/// Write a `NOT_OK` response, echoing the key when there is one
fn reject(response: &mut ResponseWriter, verb: Verb, message: &str, key: Option<&str>) -> Flow {
    let mut reply = Response::not_ok(verb).with_message(message);
    reply.key = key;
    response.write(&reply);
    Flow::Continue
}

/// Handle SET command
fn handle_set(server: &Server, request: &Request<'_>, response: &mut ResponseWriter) -> Flow {
    let Some(key) = request.key() else {
        return reject(response, Verb::Set, KEY_MISSING, None);
    };
    let Some(value) = request.value() else {
        return reject(response, Verb::Set, VALUE_MISSING, Some(key));
    };

    server.store.set(key, Bytes::copy_from_slice(value));
    response.write(&Response::ok(Verb::Set).with_key(key));
    Flow::Continue
}

/// Handle GET command
fn handle_get(server: &Server, request: &Request<'_>, response: &mut ResponseWriter) -> Flow {
    let Some(key) = request.key() else {
        return reject(response, Verb::Get, KEY_MISSING, None);
    };
    if request.value().is_some() {
        return reject(response, Verb::Get, UNEXPECTED_VALUE, Some(key));
    }

    match server.store.get(key) {
        Some(value) => {
            server.metrics.get_hits.inc();
            response.write(&Response::ok(Verb::Get).with_key(key).with_value(&value));
        }
        None => {
            server.metrics.get_misses.inc();
            response.write(
                &Response::not_ok(Verb::Get)
                    .with_message(NOT_FOUND)
                    .with_key(key),
            );
        }
    }
    Flow::Continue
}

/// Handle DELETE command (idempotent)
fn handle_delete(server: &Server, request: &Request<'_>, response: &mut ResponseWriter) -> Flow {
    let Some(key) = request.key() else {
        return reject(response, Verb::Delete, KEY_MISSING, None);
    };
    if request.value().is_some() {
        return reject(response, Verb::Delete, UNEXPECTED_VALUE, Some(key));
    }

    server.store.delete(key);
    response.write(&Response::ok(Verb::Delete).with_key(key));
    Flow::Continue
}

/// Handle PURGE command
fn handle_purge(server: &Server, _request: &Request<'_>, response: &mut ResponseWriter) -> Flow {
    server.store.purge();
    response.write(&Response::ok(Verb::Purge));
    Flow::Continue
}

/// Handle LENGTH command
fn handle_length(server: &Server, _request: &Request<'_>, response: &mut ResponseWriter) -> Flow {
    let mut itoa_buf = itoa::Buffer::new();
    let length = itoa_buf.format(server.store.len());
    response.write(&Response::ok(Verb::Length).with_value(length.as_bytes()));
    Flow::Continue
}

/// Handle KEYS command
///
/// An empty store answers `NOT_OK` with "No keys", unlike LENGTH which reports 0.
fn handle_keys(server: &Server, _request: &Request<'_>, response: &mut ResponseWriter) -> Flow {
    let keys = server.store.keys();
    if keys.is_empty() {
        response.write(&Response::not_ok(Verb::Keys).with_message(NO_KEYS));
    } else {
        let joined = keys.join(",");
        response.write(&Response::ok(Verb::Keys).with_value(joined.as_bytes()));
    }
    Flow::Continue
}

fn handle_ping(_server: &Server, _request: &Request<'_>, response: &mut ResponseWriter) -> Flow {
    response.write(&Response::ok(Verb::Ping).with_message(PONG));
    Flow::Continue
}

fn handle_close(_server: &Server, _request: &Request<'_>, response: &mut ResponseWriter) -> Flow {
    response.write(&Response::ok(Verb::Close));
    Flow::Close
}
