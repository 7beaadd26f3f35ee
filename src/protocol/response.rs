//! RCSP response builder

use crate::protocol::command::{
    CRLF, KEY_FIELD, MESSAGE_FIELD, PROTOCOL_TOKEN, VALUE_FIELD, Verb, put_field,
};
use bytes::{BufMut, BytesMut};

/// A single response message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<'a> {
    /// `None` only for protocol-level parse failures
    pub verb: Option<Verb>,
    pub ok: bool,
    pub message: Option<&'a str>,
    pub key: Option<&'a str>,
    pub value: Option<&'a [u8]>,
}

impl<'a> Response<'a> {
    pub fn ok(verb: Verb) -> Self {
        Self::status(Some(verb), true)
    }

    pub fn not_ok(verb: Verb) -> Self {
        Self::status(Some(verb), false)
    }

    /// Failure that could not be attributed to any verb
    pub fn protocol_error(message: &'a str) -> Self {
        Self::status(None, false).with_message(message)
    }

    fn status(verb: Option<Verb>, ok: bool) -> Self {
        Self {
            verb,
            ok,
            message: None,
            key: None,
            value: None,
        }
    }

    pub fn with_message(mut self, message: &'a str) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_key(mut self, key: &'a str) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_value(mut self, value: &'a [u8]) -> Self {
        self.value = Some(value);
        self
    }
}

/// Response writer for RCSP
pub struct ResponseWriter {
    buf: BytesMut,
}

impl ResponseWriter {
    /// Create a new response writer with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Take the buffer, leaving an empty buffer in its place
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }

    /// Serialize a response
    ///
    /// Header: `RCSP/1.0 [VERB] OK|NOT_OK`. Fields follow in the order MESSAGE, KEY,
    /// VALUE, each only when non-empty.
    pub fn write(&mut self, response: &Response<'_>) {
        self.buf.put_slice(PROTOCOL_TOKEN);
        if let Some(verb) = response.verb {
            self.buf.put_u8(b' ');
            self.buf.put_slice(verb.as_str().as_bytes());
        }
        let status: &[u8] = if response.ok { b" OK" } else { b" NOT_OK" };
        self.buf.put_slice(status);
        self.buf.put_slice(CRLF);

        if let Some(message) = response.message.filter(|m| !m.is_empty()) {
            put_field(&mut self.buf, MESSAGE_FIELD, message.as_bytes());
        }
        if let Some(key) = response.key.filter(|k| !k.is_empty()) {
            put_field(&mut self.buf, KEY_FIELD, key.as_bytes());
        }
        if let Some(value) = response.value.filter(|v| !v.is_empty()) {
            put_field(&mut self.buf, VALUE_FIELD, value);
        }
    }
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new(4096)
    }
}
