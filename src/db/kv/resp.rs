//! RESP (Redis Serialization Protocol) framing.
//!
//! Parsing is non-destructive: `RespParser::parse` only consumes bytes from the
//! buffer once a whole frame, nested arrays included, is available. A partial
//! frame leaves the buffer untouched so the caller can read more and retry.

use crate::db::types::decode_binary_value;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value as JsonValue;
use std::str;

/// Nesting deeper than this is treated as a protocol error.
const MAX_DEPTH: usize = 32;

/// RESP data types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple String (+OK\r\n)
    SimpleString(String),
    /// Error (-ERR message\r\n)
    Error(String),
    /// Integer (:123\r\n)
    Integer(i64),
    /// Bulk String ($5\r\nhello\r\n); None is the null bulk string
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...); None is the null array
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Self::BulkString(Some(data.into()))
    }

    /// A command frame: an array of bulk strings.
    pub fn command<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        Self::Array(Some(parts.into_iter().map(Self::bulk).collect()))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::SimpleString(s) if s == "OK")
    }

    /// Textual content of a simple or bulk string.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::SimpleString(s) => Some(s.clone()),
            Self::BulkString(Some(b)) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }
}

/// Parse error types
#[derive(Debug, thiserror::Error)]
pub enum RespParseError {
    #[error("Invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] str::Utf8Error),
    #[error("Invalid integer: {0}")]
    InvalidInteger(#[from] std::num::ParseIntError),
}

/// RESP parser for reading replies
pub struct RespParser;

impl RespParser {
    /// Parse one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed; `buf` is unchanged then.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespParseError> {
        match Self::parse_at(buf, 0, 0)? {
            Some((value, end)) => {
                buf.advance(end);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn parse_at(
        buf: &[u8],
        pos: usize,
        depth: usize,
    ) -> Result<Option<(RespValue, usize)>, RespParseError> {
        if depth > MAX_DEPTH {
            return Err(RespParseError::InvalidFormat(
                "nesting too deep".to_string(),
            ));
        }
        let Some(&marker) = buf.get(pos) else {
            return Ok(None);
        };
        let Some((line, next)) = Self::read_line(buf, pos + 1) else {
            return Ok(None);
        };

        match marker {
            b'+' => Ok(Some((
                RespValue::SimpleString(str::from_utf8(line)?.to_string()),
                next,
            ))),
            b'-' => Ok(Some((
                RespValue::Error(str::from_utf8(line)?.to_string()),
                next,
            ))),
            b':' => Ok(Some((RespValue::Integer(Self::parse_int(line)?), next))),
            b'$' => {
                let size = Self::parse_int(line)?;
                if size == -1 {
                    return Ok(Some((RespValue::BulkString(None), next)));
                }
                if size < 0 {
                    return Err(RespParseError::InvalidFormat(
                        "Invalid bulk string size".to_string(),
                    ));
                }
                let size = size as usize;
                let end = next + size;
                if buf.len() < end + 2 {
                    return Ok(None);
                }
                if &buf[end..end + 2] != b"\r\n" {
                    return Err(RespParseError::InvalidFormat(
                        "Missing \\r\\n after bulk string".to_string(),
                    ));
                }
                let data = Bytes::copy_from_slice(&buf[next..end]);
                Ok(Some((RespValue::BulkString(Some(data)), end + 2)))
            }
            b'*' => {
                let size = Self::parse_int(line)?;
                if size == -1 {
                    return Ok(Some((RespValue::Array(None), next)));
                }
                if size < 0 {
                    return Err(RespParseError::InvalidFormat(
                        "Invalid array size".to_string(),
                    ));
                }
                let mut cursor = next;
                let mut elements = Vec::with_capacity((size as usize).min(1024));
                for _ in 0..size {
                    match Self::parse_at(buf, cursor, depth + 1)? {
                        Some((element, end)) => {
                            elements.push(element);
                            cursor = end;
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some((RespValue::Array(Some(elements)), cursor)))
            }
            other => Err(RespParseError::InvalidFormat(format!(
                "Unknown RESP type: {}",
                other as char
            ))),
        }
    }

    fn parse_int(line: &[u8]) -> Result<i64, RespParseError> {
        Ok(str::from_utf8(line)?.parse()?)
    }

    /// Find the `\r\n`-terminated line starting at `from`.
    /// Returns the line content and the position just past the terminator.
    fn read_line(buf: &[u8], from: usize) -> Option<(&[u8], usize)> {
        let rest = buf.get(from..)?;
        rest.windows(2)
            .position(|w| w == b"\r\n")
            .map(|i| (&rest[..i], from + i + 2))
    }
}

/// RESP encoder for writing commands
pub struct RespEncoder;

impl RespEncoder {
    pub fn encode(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(&mut buf, value);
        buf.freeze()
    }

    /// Encode a RESP value into an existing buffer
    pub fn encode_into(buf: &mut BytesMut, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.put_u8(b'-');
                buf.extend_from_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.put_u8(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(Some(data)) => {
                buf.put_u8(b'$');
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(None) => buf.extend_from_slice(b"$-1\r\n"),
            RespValue::Array(Some(elements)) => {
                buf.put_u8(b'*');
                buf.extend_from_slice(elements.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                for element in elements {
                    Self::encode_into(buf, element);
                }
            }
            RespValue::Array(None) => buf.extend_from_slice(b"*-1\r\n"),
        }
    }
}

/// Convert a reply to JSON.
///
/// Bulk strings become text when `decode_text` is set and the bytes are valid
/// UTF-8, base64 otherwise. Nested error replies become `{"error": msg}`.
pub fn resp_to_json(value: RespValue, decode_text: bool) -> JsonValue {
    match value {
        RespValue::SimpleString(s) => JsonValue::String(s),
        RespValue::Error(e) => serde_json::json!({ "error": e }),
        RespValue::Integer(n) => JsonValue::Number(n.into()),
        RespValue::BulkString(Some(b)) => decode_binary_value(&b, decode_text),
        RespValue::BulkString(None) | RespValue::Array(None) => JsonValue::Null,
        RespValue::Array(Some(items)) => JsonValue::Array(
            items
                .into_iter()
                .map(|v| resp_to_json(v, decode_text))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars() {
        let mut buf = BytesMut::from("+OK\r\n-ERR unknown command\r\n:1000\r\n$-1\r\n");
        assert_eq!(
            RespParser::parse(&mut buf).unwrap(),
            Some(RespValue::SimpleString("OK".to_string()))
        );
        assert_eq!(
            RespParser::parse(&mut buf).unwrap(),
            Some(RespValue::Error("ERR unknown command".to_string()))
        );
        assert_eq!(
            RespParser::parse(&mut buf).unwrap(),
            Some(RespValue::Integer(1000))
        );
        assert_eq!(
            RespParser::parse(&mut buf).unwrap(),
            Some(RespValue::BulkString(None))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_parse_nested_array() {
        let mut buf = BytesMut::from("*2\r\n$1\r\n0\r\n*2\r\n$1\r\na\r\n$1\r\nb\r\n");
        let value = RespParser::parse(&mut buf).unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::Array(Some(vec![
                RespValue::bulk("0"),
                RespValue::Array(Some(vec![RespValue::bulk("a"), RespValue::bulk("b")])),
            ]))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frames_leave_buffer_intact() {
        for partial in ["", "+OK\r", "$5\r\nhel", "*2\r\n$5\r\nhello\r\n", "*2\r\n$5\r\nhello\r\n$5\r\nwor"] {
            let mut buf = BytesMut::from(partial);
            assert!(RespParser::parse(&mut buf).unwrap().is_none(), "{:?}", partial);
            assert_eq!(&buf[..], partial.as_bytes());
        }

        // Completing the frame afterwards parses it whole
        let mut buf = BytesMut::from("*2\r\n$5\r\nhello\r\n$5\r\nwor");
        assert!(RespParser::parse(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"ld\r\n");
        let value = RespParser::parse(&mut buf).unwrap().unwrap();
        assert_eq!(
            value,
            RespValue::Array(Some(vec![RespValue::bulk("hello"), RespValue::bulk("world")]))
        );
    }

    #[test]
    fn test_bulk_string_with_crlf_payload() {
        let mut buf = BytesMut::from("$4\r\na\r\nb\r\n");
        let value = RespParser::parse(&mut buf).unwrap().unwrap();
        assert_eq!(value, RespValue::bulk("a\r\nb"));
    }

    #[test]
    fn test_invalid_frames() {
        let mut buf = BytesMut::from("?what\r\n");
        assert!(RespParser::parse(&mut buf).is_err());
        let mut buf = BytesMut::from(":abc\r\n");
        assert!(RespParser::parse(&mut buf).is_err());
        let mut buf = BytesMut::from("$3\r\nabcXY");
        assert!(RespParser::parse(&mut buf).is_err());
    }

    #[test]
    fn test_encode_command() {
        let command = RespValue::command([Bytes::from("SET"), Bytes::from("key"), Bytes::from("value")]);
        let encoded = RespEncoder::encode(&command);
        assert_eq!(
            encoded,
            Bytes::from("*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n")
        );
    }

    #[test]
    fn test_resp_to_json() {
        let value = RespValue::Array(Some(vec![
            RespValue::bulk("text"),
            RespValue::Integer(3),
            RespValue::BulkString(None),
            RespValue::Error("WRONGTYPE".to_string()),
        ]));
        assert_eq!(
            resp_to_json(value, true),
            serde_json::json!(["text", 3, null, {"error": "WRONGTYPE"}])
        );
        assert_eq!(
            resp_to_json(RespValue::bulk("hi"), false),
            serde_json::json!("aGk=")
        );
    }
}
