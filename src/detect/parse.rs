//! Model reply parsing.
//!
//! Replies are free-form text. The detection payload is taken to be everything
//! from the first `[` to the last `]` in the whole reply, so prose, markdown
//! fences or trailing commentary around the array are ignored. A `[` that
//! appears in prose before the real array is indistinguishable from the payload
//! and makes the reply malformed; that is accepted behavior.

use std::fmt;

use super::result::{Detection, NormalizedBox};

/// Why a model reply could not be turned into detections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The reply contains no `[ ... ]` region.
    NoJsonFound,
    /// The bracketed region is not an array of detections.
    MalformedJson(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::NoJsonFound => write!(f, "no valid JSON array found in the response"),
            ParseError::MalformedJson(detail) => {
                write!(f, "malformed detection JSON: {}", detail)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Slice of `raw` from the first `[` through the last `]`, inclusive.
pub fn extract_json_array(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

/// Parse a model reply into detections, preserving array order.
///
/// Decoding is strict JSON first; if that fails the payload is retried as
/// JSON5 so that trailing commas, single quotes, unquoted keys and comments
/// do not sink an otherwise usable answer. The lenient pass does not accept
/// `NaN` or `Infinity` literals as coordinates. Unknown fields are ignored by
/// both. The reported detail is always the strict decoder's.
pub fn parse_detections(raw: &str) -> Result<Vec<Detection>, ParseError> {
    let payload = extract_json_array(raw).ok_or(ParseError::NoJsonFound)?;

    match serde_json::from_str::<Vec<Detection>>(payload) {
        Ok(detections) => Ok(detections),
        Err(strict_err) => match json5::from_str::<Vec<Detection>>(payload) {
            Ok(detections) if detections.iter().all(|d| is_finite(&d.bbox)) => {
                log::debug!(
                    "reply accepted by lenient decoder after strict failure: {}",
                    strict_err
                );
                Ok(detections)
            }
            _ => Err(ParseError::MalformedJson(strict_err.to_string())),
        },
    }
}

fn is_finite(bbox: &NormalizedBox) -> bool {
    [bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max]
        .iter()
        .all(|v| v.is_finite())
}
