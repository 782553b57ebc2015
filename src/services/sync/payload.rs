use serde_json::Value;

use crate::error::{Result, SyncError};

/// Recover a JSON document from a raw transport frame.
///
/// The producer side may wrap the JSON body in binary framing, so this
/// scans for the first `{` and the last `}` and parses the enclosed
/// slice. It is a defensive fallback, not a framing parser; frames whose
/// body itself is malformed surface as `InvalidJson`.
pub fn recover_payload(raw: &[u8]) -> Result<Value> {
    let start = raw
        .iter()
        .position(|&b| b == b'{')
        .ok_or_else(|| SyncError::MalformedPayload("no opening brace in frame".into()))?;
    let end = raw
        .iter()
        .rposition(|&b| b == b'}')
        .ok_or_else(|| SyncError::MalformedPayload("no closing brace in frame".into()))?;

    if end < start {
        // Braces out of order leave no slice to parse.
        return Err(SyncError::InvalidJson("empty JSON slice".into()));
    }

    serde_json::from_slice(&raw[start..=end]).map_err(|e| SyncError::InvalidJson(e.to_string()))
}

/// Bounded, lossy rendering of a raw frame for log context.
pub fn frame_excerpt(raw: &[u8], max_len: usize) -> String {
    let text = String::from_utf8_lossy(raw);
    if text.len() <= max_len {
        text.into_owned()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < max_len)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &text[..cut])
    }
}
