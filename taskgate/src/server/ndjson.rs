//! NDJSON framing for the stdio transport.
//!
//! One JSON-RPC message per line. [`bounded_read_line`] pulls a raw line off
//! the reader without unbounded allocation and [`parse_message`] turns it
//! into a classified message.

use serde_json::Value;
use tokio::io::AsyncBufReadExt;

use taskgate_core::protocol::{
    JsonRpcClassifyError, JsonRpcId, JsonRpcMessageKind, classify_jsonrpc,
};

use crate::error::FramingError;

/// Maximum NDJSON message size (10 MB).
///
/// Lines over this limit are rejected before JSON parsing.
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Upper bound on skipping the rest of an oversized line.
const DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// A parsed line from the client.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub kind: JsonRpcMessageKind,
    /// The `params` field, if present.
    pub params: Option<Value>,
}

impl IncomingMessage {
    /// The id a reply must carry, if this message expects one.
    #[must_use]
    pub fn reply_id(&self) -> Option<&JsonRpcId> {
        match &self.kind {
            JsonRpcMessageKind::Request { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Parse a single NDJSON line.
///
/// # Errors
///
/// Returns [`FramingError`] for oversized, empty, or non-JSON lines, for
/// batches, and for objects that are not JSON-RPC 2.0 messages.
pub fn parse_message(line: &str) -> Result<IncomingMessage, FramingError> {
    if line.len() > MAX_MESSAGE_BYTES {
        return Err(FramingError::MessageTooLarge {
            max_bytes: MAX_MESSAGE_BYTES,
        });
    }

    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(FramingError::MalformedJson {
            reason: "empty message".to_string(),
        });
    }

    let mut value: Value =
        serde_json::from_str(trimmed).map_err(|e| FramingError::MalformedJson {
            reason: e.to_string(),
        })?;

    if value.is_array() {
        return Err(FramingError::UnsupportedBatch);
    }

    let kind = classify_jsonrpc(&value).map_err(|e| match e {
        JsonRpcClassifyError::InvalidVersion => {
            match value.get("jsonrpc").and_then(|v| v.as_str()) {
                Some(v) => FramingError::UnsupportedVersion {
                    version: v.to_string(),
                },
                None => FramingError::MissingVersion,
            }
        }
        JsonRpcClassifyError::InvalidId => FramingError::MalformedJson {
            reason: "invalid id field".to_string(),
        },
        JsonRpcClassifyError::Unclassifiable => FramingError::MalformedJson {
            reason: "message has neither id nor method".to_string(),
        },
    })?;

    let params = value.as_object_mut().and_then(|obj| obj.remove("params"));

    Ok(IncomingMessage { kind, params })
}

/// Read one line into `buf`, enforcing `max_bytes`.
///
/// Bytes are collected raw so multi-byte UTF-8 characters split across
/// internal buffer boundaries survive; the caller decodes the full line.
///
/// Returns `Ok(0)` at EOF. On `MessageTooLarge` the rest of the line has
/// been skipped and the reader sits at the start of the next one.
pub async fn bounded_read_line<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_bytes: usize,
) -> Result<usize, FramingError> {
    let mut total = 0usize;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(total);
        }

        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let to_consume = pos + 1;
                if total + to_consume > max_bytes {
                    reader.consume(to_consume);
                    return Err(FramingError::MessageTooLarge { max_bytes });
                }
                buf.extend_from_slice(&available[..to_consume]);
                total += to_consume;
                reader.consume(to_consume);
                return Ok(total);
            }
            None => {
                let len = available.len();
                if total + len > max_bytes {
                    reader.consume(len);
                    drain_until_newline(reader).await;
                    return Err(FramingError::MessageTooLarge { max_bytes });
                }
                buf.extend_from_slice(available);
                total += len;
                reader.consume(len);
            }
        }
    }
}

async fn drain_until_newline<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) {
    let drain = async {
        loop {
            match reader.fill_buf().await {
                Ok([]) => return,
                Ok(chunk) => {
                    if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
                        reader.consume(pos + 1);
                        return;
                    }
                    let len = chunk.len();
                    reader.consume(len);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "IO error while draining oversized message");
                    return;
                }
            }
        }
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        tracing::warn!(timeout = ?DRAIN_TIMEOUT, "Timed out draining oversized message");
    }
}

/// Decode a raw line read by [`bounded_read_line`].
pub fn decode_line(raw: Vec<u8>) -> Result<String, FramingError> {
    String::from_utf8(raw).map_err(|_| FramingError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn test_parse_request_extracts_params() {
        let line = r#"{"jsonrpc":"2.0","id":7,"method":"tasks/get","params":{"taskId":"t"}}"#;
        let msg = parse_message(line).unwrap();
        assert_eq!(
            msg.kind,
            JsonRpcMessageKind::Request {
                id: JsonRpcId::Number(7),
                method: "tasks/get".to_string(),
            }
        );
        assert_eq!(msg.reply_id(), Some(&JsonRpcId::Number(7)));
        assert_eq!(msg.params.unwrap()["taskId"], "t");
    }

    #[test]
    fn test_parse_notification_has_no_reply_id() {
        let msg = parse_message(r#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
        assert!(msg.reply_id().is_none());
        assert!(msg.params.is_none());
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        assert!(matches!(
            parse_message("   "),
            Err(FramingError::MalformedJson { .. })
        ));
        assert!(matches!(
            parse_message("{not json"),
            Err(FramingError::MalformedJson { .. })
        ));
        assert!(matches!(
            parse_message(r#"[{"jsonrpc":"2.0","id":1,"method":"ping"}]"#),
            Err(FramingError::UnsupportedBatch)
        ));
        assert!(matches!(
            parse_message(r#"{"id":1,"method":"ping"}"#),
            Err(FramingError::MissingVersion)
        ));
        assert!(matches!(
            parse_message(r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#),
            Err(FramingError::UnsupportedVersion { version }) if version == "1.0"
        ));
        assert!(matches!(
            parse_message(r#"{"jsonrpc":"2.0","id":{"x":1},"method":"ping"}"#),
            Err(FramingError::MalformedJson { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_oversized_before_parsing() {
        let line = "x".repeat(MAX_MESSAGE_BYTES + 1);
        assert!(matches!(
            parse_message(&line),
            Err(FramingError::MessageTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_bounded_read_line_splits_lines() {
        let mut reader = BufReader::new(&b"first\nsecond\nlast"[..]);
        let mut buf = Vec::new();

        assert_eq!(bounded_read_line(&mut reader, &mut buf, 64).await.unwrap(), 6);
        assert_eq!(buf, b"first\n");
        buf.clear();
        assert_eq!(bounded_read_line(&mut reader, &mut buf, 64).await.unwrap(), 7);
        buf.clear();
        assert_eq!(bounded_read_line(&mut reader, &mut buf, 64).await.unwrap(), 4);
        assert_eq!(buf, b"last");
        buf.clear();
        assert_eq!(bounded_read_line(&mut reader, &mut buf, 64).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped() {
        let input = format!("{}\nok\n", "y".repeat(100));
        let mut reader = BufReader::with_capacity(8, input.as_bytes());
        let mut buf = Vec::new();

        let err = bounded_read_line(&mut reader, &mut buf, 16).await.unwrap_err();
        assert!(matches!(err, FramingError::MessageTooLarge { max_bytes: 16 }));

        buf.clear();
        bounded_read_line(&mut reader, &mut buf, 16).await.unwrap();
        assert_eq!(buf, b"ok\n");
    }

    #[test]
    fn test_decode_line_rejects_invalid_utf8() {
        assert!(matches!(
            decode_line(vec![0xff, 0xfe]),
            Err(FramingError::InvalidUtf8)
        ));
        assert_eq!(decode_line(b"ok".to_vec()).unwrap(), "ok");
    }
}
