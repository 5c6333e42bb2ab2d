//! Inbound frame splitting.
//!
//! The server sometimes writes several JSON objects into one WebSocket frame
//! with no delimiter between them. [`parse_frame`] recovers each object.

use crate::WireMessage;

/// A frame that contained no parsable message at all.
#[derive(Debug, thiserror::Error)]
#[error("frame contains no parsable message: {0}")]
pub struct FrameError(#[from] serde_json::Error);

/// Split `frame` into its top-level `{...}` spans.
///
/// Braces inside JSON strings (including escaped quotes) are not counted, and
/// nesting depth is unbounded. Text between spans and an unterminated trailing
/// object are ignored.
pub fn split_objects(frame: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in frame.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    spans.push(&frame[start..=i]);
                }
            }
            _ => {}
        }
    }

    spans
}

/// Parse every message in a frame.
///
/// Spans that fail to parse are logged and skipped. When the frame holds no
/// span at all, the whole frame is parsed as a single document and that
/// failure is returned.
pub fn parse_frame(frame: &str) -> Result<Vec<WireMessage>, FrameError> {
    let spans = split_objects(frame);
    if spans.is_empty() {
        return Ok(vec![serde_json::from_str(frame)?]);
    }

    let messages = spans
        .into_iter()
        .filter_map(|span| match serde_json::from_str(span) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::warn!("Skipping unparsable message {}: {}", span, e);
                None
            }
        })
        .collect();
    Ok(messages)
}
