//! RCSP request types

use bytes::{BufMut, BytesMut};

/// Protocol token opening every header line (case-sensitive)
pub const PROTOCOL_TOKEN: &[u8] = b"RCSP/1.0";

/// Default upper bound on a single message read from the transport
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

pub(crate) const CRLF: &[u8] = b"\r\n";
pub(crate) const FIELD_SEPARATOR: &[u8] = b": ";
pub(crate) const KEY_FIELD: &[u8] = b"KEY";
pub(crate) const VALUE_FIELD: &[u8] = b"VALUE";
pub(crate) const MESSAGE_FIELD: &[u8] = b"MESSAGE";

/// RCSP verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Set,
    Get,
    Delete,
    Purge,
    Length,
    Keys,
    Ping,
    Close,
}

impl Verb {
    pub const ALL: [Verb; 8] = [
        Verb::Set,
        Verb::Get,
        Verb::Delete,
        Verb::Purge,
        Verb::Length,
        Verb::Keys,
        Verb::Ping,
        Verb::Close,
    ];

    /// Wire spelling of the verb
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Set => "SET",
            Verb::Get => "GET",
            Verb::Delete => "DELETE",
            Verb::Purge => "PURGE",
            Verb::Length => "LENGTH",
            Verb::Keys => "KEYS",
            Verb::Ping => "PING",
            Verb::Close => "CLOSE",
        }
    }

    /// Match a verb token exactly (verbs are case-sensitive)
    pub fn from_bytes(token: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|verb| verb.as_str().as_bytes() == token)
    }
}

/// Parsed RCSP request, borrowing from the message buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    /// `None` when the header names a verb outside the catalogue
    pub verb: Option<Verb>,
    pub key: Option<&'a str>,
    pub value: Option<&'a [u8]>,
}

impl<'a> Request<'a> {
    pub fn new(verb: Verb) -> Self {
        Self {
            verb: Some(verb),
            key: None,
            value: None,
        }
    }

    pub fn with_key(mut self, key: &'a str) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_value(mut self, value: &'a [u8]) -> Self {
        self.value = Some(value);
        self
    }

    /// Key, treating an empty field the same as an absent one
    pub fn key(&self) -> Option<&'a str> {
        self.key.filter(|k| !k.is_empty())
    }

    /// Value, treating an empty field the same as an absent one
    pub fn value(&self) -> Option<&'a [u8]> {
        self.value.filter(|v| !v.is_empty())
    }

    /// Serialize for sending to a server
    ///
    /// A value is only meaningful after a key; the grammar has no way to send a
    /// `VALUE` line on its own.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(
            32 + self.key.map_or(0, str::len) + self.value.map_or(0, <[u8]>::len),
        );
        buf.put_slice(PROTOCOL_TOKEN);
        if let Some(verb) = self.verb {
            buf.put_u8(b' ');
            buf.put_slice(verb.as_str().as_bytes());
        }
        buf.put_slice(CRLF);
        if let Some(key) = self.key {
            put_field(&mut buf, KEY_FIELD, key.as_bytes());
        }
        if let Some(value) = self.value {
            put_field(&mut buf, VALUE_FIELD, value);
        }
        buf
    }
}

pub(crate) fn put_field(buf: &mut BytesMut, name: &[u8], value: &[u8]) {
    buf.put_slice(name);
    buf.put_slice(FIELD_SEPARATOR);
    buf.put_slice(value);
    buf.put_slice(CRLF);
}
