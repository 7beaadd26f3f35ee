//! Hand-written RCSP parser
//!
//! A message is whatever one transport read delivered. Lines end in `\r\n`; a missing
//! terminator on the last line is tolerated. Requests are split into at most three
//! parts (header, key line, value line), so a value may itself contain `\r\n`.

use crate::ProtocolError;
use crate::protocol::command::{
    CRLF, FIELD_SEPARATOR, KEY_FIELD, MESSAGE_FIELD, PROTOCOL_TOKEN, Request, VALUE_FIELD, Verb,
};
use crate::protocol::response::Response;
use memchr::memmem;

/// Parse a client request
pub fn parse_request(msg: &[u8]) -> Result<Request<'_>, ProtocolError> {
    let body = msg.strip_suffix(CRLF).unwrap_or(msg);
    if body.is_empty() {
        return Err(ProtocolError::MalformedRequest);
    }

    let (header, rest) = split_line(body);
    let mut tokens = header.split(|&b| b == b' ');
    if tokens.next() != Some(PROTOCOL_TOKEN) {
        return Err(ProtocolError::UnknownProtocol);
    }
    let verb = match (tokens.next(), tokens.next()) {
        (Some(verb), None) if !verb.is_empty() => verb,
        _ => return Err(ProtocolError::MalformedRequest),
    };

    let mut request = Request {
        verb: Verb::from_bytes(verb),
        key: None,
        value: None,
    };

    let Some(rest) = rest else {
        return Ok(request);
    };
    let (key_line, value_line) = split_line(rest);

    let key = parse_field(key_line, KEY_FIELD, ProtocolError::InvalidKey)?;
    request.key = Some(std::str::from_utf8(key).map_err(|_| ProtocolError::InvalidKey)?);

    if let Some(value_line) = value_line {
        request.value = Some(parse_field(
            value_line,
            VALUE_FIELD,
            ProtocolError::InvalidValue,
        )?);
    }

    Ok(request)
}

/// Parse a server response
pub fn parse_response(msg: &[u8]) -> Result<Response<'_>, ProtocolError> {
    let body = msg.strip_suffix(CRLF).unwrap_or(msg);
    if body.is_empty() {
        return Err(ProtocolError::MalformedResponse);
    }

    let (header, mut rest) = split_line(body);
    let tokens: Vec<&[u8]> = header.split(|&b| b == b' ').collect();
    if tokens[0] != PROTOCOL_TOKEN {
        return Err(ProtocolError::UnknownProtocol);
    }

    let (verb, status) = match tokens.as_slice() {
        [_, status] => (None, *status),
        [_, verb, status] => (
            Some(Verb::from_bytes(verb).ok_or(ProtocolError::MalformedResponse)?),
            *status,
        ),
        _ => return Err(ProtocolError::MalformedResponse),
    };

    let ok = match status {
        b"OK" => true,
        b"NOT_OK" => false,
        _ => return Err(ProtocolError::MalformedResponse),
    };

    let mut response = Response {
        verb,
        ok,
        message: None,
        key: None,
        value: None,
    };

    while let Some(lines) = rest {
        let (line, next) = split_line(lines);
        rest = next;

        let (name, value) = split_field(line).ok_or(ProtocolError::MalformedResponse)?;
        if name.is_empty() || value.is_empty() {
            return Err(ProtocolError::MalformedResponse);
        }
        match name {
            MESSAGE_FIELD => response.message = Some(utf8(value)?),
            KEY_FIELD => response.key = Some(utf8(value)?),
            VALUE_FIELD => response.value = Some(value),
            _ => return Err(ProtocolError::MalformedResponse),
        }
    }

    Ok(response)
}

/// Split off the first line; the remainder is `None` when there is no terminator
#[inline]
fn split_line(buf: &[u8]) -> (&[u8], Option<&[u8]>) {
    match memmem::find(buf, CRLF) {
        Some(pos) => (&buf[..pos], Some(&buf[pos + CRLF.len()..])),
        None => (buf, None),
    }
}

/// Split `NAME: value` at the first separator
#[inline]
fn split_field(line: &[u8]) -> Option<(&[u8], &[u8])> {
    memmem::find(line, FIELD_SEPARATOR)
        .map(|pos| (&line[..pos], &line[pos + FIELD_SEPARATOR.len()..]))
}

/// Parse a request field line with an expected name
fn parse_field<'a>(
    line: &'a [u8],
    expected: &[u8],
    invalid: ProtocolError,
) -> Result<&'a [u8], ProtocolError> {
    let (name, value) = split_field(line).ok_or(invalid)?;
    if name != expected {
        return Err(ProtocolError::MalformedRequest);
    }
    Ok(value)
}

fn utf8(bytes: &[u8]) -> Result<&str, ProtocolError> {
    std::str::from_utf8(bytes).map_err(|_| ProtocolError::MalformedResponse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set() {
        let req = parse_request(b"RCSP/1.0 SET\r\nKEY: k1\r\nVALUE: 10\r\n").unwrap();
        assert_eq!(req.verb, Some(Verb::Set));
        assert_eq!(req.key, Some("k1"));
        assert_eq!(req.value, Some(&b"10"[..]));
    }

    #[test]
    fn test_parse_bare_verb() {
        let req = parse_request(b"RCSP/1.0 PURGE\r\n").unwrap();
        assert_eq!(req, Request::new(Verb::Purge));
    }

    #[test]
    fn test_parse_without_trailing_crlf() {
        let req = parse_request(b"RCSP/1.0 GET\r\nKEY: k1").unwrap();
        assert_eq!(req.verb, Some(Verb::Get));
        assert_eq!(req.key, Some("k1"));

        let req = parse_request(b"RCSP/1.0 PING").unwrap();
        assert_eq!(req.verb, Some(Verb::Ping));
    }

    #[test]
    fn test_parse_unknown_verb_is_not_an_error() {
        let req = parse_request(b"RCSP/1.0 FLUSH\r\n").unwrap();
        assert_eq!(req.verb, None);
    }

    #[test]
    fn test_parse_empty_fields() {
        let req = parse_request(b"RCSP/1.0 SET\r\nKEY: \r\nVALUE: \r\n").unwrap();
        assert_eq!(req.key, Some(""));
        assert_eq!(req.value, Some(&b""[..]));
        assert_eq!(req.key(), None);
        assert_eq!(req.value(), None);
    }

    #[test]
    fn test_parse_value_keeps_inner_crlf() {
        let req = parse_request(b"RCSP/1.0 SET\r\nKEY: k\r\nVALUE: a\r\nb\r\n").unwrap();
        assert_eq!(req.value, Some(&b"a\r\nb"[..]));
    }

    #[test]
    fn test_parse_value_keeps_separator() {
        let req = parse_request(b"RCSP/1.0 SET\r\nKEY: k\r\nVALUE: a: b\r\n").unwrap();
        assert_eq!(req.value, Some(&b"a: b"[..]));
    }

    #[test]
    fn test_parse_empty_message() {
        assert_eq!(parse_request(b""), Err(ProtocolError::MalformedRequest));
        assert_eq!(parse_request(b"\r\n"), Err(ProtocolError::MalformedRequest));
    }

    #[test]
    fn test_parse_unknown_protocol() {
        assert_eq!(
            parse_request(b"HTTP/1.1 GET\r\n"),
            Err(ProtocolError::UnknownProtocol)
        );
        // Protocol token is case-sensitive
        assert_eq!(
            parse_request(b"rcsp/1.0 GET\r\n"),
            Err(ProtocolError::UnknownProtocol)
        );
    }

    #[test]
    fn test_parse_broken_header() {
        assert_eq!(
            parse_request(b"RCSP/1.0\r\n"),
            Err(ProtocolError::MalformedRequest)
        );
        assert_eq!(
            parse_request(b"RCSP/1.0 GET extra\r\n"),
            Err(ProtocolError::MalformedRequest)
        );
        assert_eq!(
            parse_request(b"RCSP/1.0 \r\n"),
            Err(ProtocolError::MalformedRequest)
        );
    }

    #[test]
    fn test_parse_invalid_key() {
        assert_eq!(
            parse_request(b"RCSP/1.0 GET\r\nKEY k1\r\n"),
            Err(ProtocolError::InvalidKey)
        );
        assert_eq!(
            parse_request(b"RCSP/1.0 GET\r\nKEY: \xff\xfe\r\n"),
            Err(ProtocolError::InvalidKey)
        );
    }

    #[test]
    fn test_parse_wrong_field_name() {
        assert_eq!(
            parse_request(b"RCSP/1.0 GET\r\nVALUE: v\r\n"),
            Err(ProtocolError::MalformedRequest)
        );
        assert_eq!(
            parse_request(b"RCSP/1.0 SET\r\nKEY: k\r\nKEY: v\r\n"),
            Err(ProtocolError::MalformedRequest)
        );
    }

    #[test]
    fn test_parse_invalid_value() {
        assert_eq!(
            parse_request(b"RCSP/1.0 SET\r\nKEY: k\r\nVALUE\r\n"),
            Err(ProtocolError::InvalidValue)
        );
    }

    #[test]
    fn test_truncated_input_never_panics() {
        let full: &[u8] = b"RCSP/1.0 SET\r\nKEY: k1\r\nVALUE: 10\r\n";
        for end in 0..=full.len() {
            let _ = parse_request(&full[..end]);
        }
        let full: &[u8] = b"RCSP/1.0 GET NOT_OK\r\nMESSAGE: Not found\r\nKEY: missing\r\n";
        for end in 0..=full.len() {
            let _ = parse_response(&full[..end]);
        }
    }

    #[test]
    fn test_request_round_trip() {
        let requests = [
            Request::new(Verb::Set).with_key("k1").with_value(b"10"),
            Request::new(Verb::Get).with_key("user:42"),
            Request::new(Verb::Delete).with_key("a b c"),
            Request::new(Verb::Set)
                .with_key("json")
                .with_value(br#"{"a": [1, 2]}"#),
            Request::new(Verb::Keys),
            Request::new(Verb::Close),
        ];
        for req in requests {
            let encoded = req.encode();
            assert_eq!(parse_request(&encoded), Ok(req));
        }
    }

    #[test]
    fn test_parse_response_with_fields() {
        let resp =
            parse_response(b"RCSP/1.0 GET NOT_OK\r\nMESSAGE: Not found\r\nKEY: missing\r\n")
                .unwrap();
        assert_eq!(resp.verb, Some(Verb::Get));
        assert!(!resp.ok);
        assert_eq!(resp.message, Some("Not found"));
        assert_eq!(resp.key, Some("missing"));
        assert_eq!(resp.value, None);
    }

    #[test]
    fn test_parse_response_without_verb() {
        let resp = parse_response(b"RCSP/1.0 NOT_OK\r\nMESSAGE: Unknown protocol\r\n").unwrap();
        assert_eq!(resp.verb, None);
        assert!(!resp.ok);
        assert_eq!(resp.message, Some("Unknown protocol"));
    }

    #[test]
    fn test_parse_response_fields_any_order() {
        let resp = parse_response(b"RCSP/1.0 GET OK\r\nVALUE: 10\r\nKEY: k1\r\n").unwrap();
        assert_eq!(resp.key, Some("k1"));
        assert_eq!(resp.value, Some(&b"10"[..]));
    }

    #[test]
    fn test_parse_response_errors() {
        assert_eq!(parse_response(b""), Err(ProtocolError::MalformedResponse));
        assert_eq!(
            parse_response(b"RCSP/2.0 OK\r\n"),
            Err(ProtocolError::UnknownProtocol)
        );
        assert_eq!(
            parse_response(b"RCSP/1.0\r\n"),
            Err(ProtocolError::MalformedResponse)
        );
        assert_eq!(
            parse_response(b"RCSP/1.0 GET MAYBE\r\n"),
            Err(ProtocolError::MalformedResponse)
        );
        assert_eq!(
            parse_response(b"RCSP/1.0 GET OK\r\nEXTRA: x\r\n"),
            Err(ProtocolError::MalformedResponse)
        );
        assert_eq!(
            parse_response(b"RCSP/1.0 GET OK\r\nKEY: \r\n"),
            Err(ProtocolError::MalformedResponse)
        );
    }
}
