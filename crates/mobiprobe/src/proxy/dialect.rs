//! Rewriting between the legacy JSON Wire dialect and W3C.
//!
//! Legacy servers answer `{status, sessionId, value}` with a numeric
//! `status`. W3C clients expect `{value: {...}}` with a string
//! `value.error`. Only two bodies are rewritten: the session-creation
//! answer and, once a session is known to be legacy, error answers.

use serde_json::{json, Value};

/// True for a legacy session-creation body (top-level `status` and `sessionId`)
#[must_use]
pub fn is_legacy_body(body: &Value) -> bool {
    body.get("status").is_some() && body.get("sessionId").is_some()
}

/// Rewrite a legacy session-creation body to the W3C shape.
///
/// Returns `None` when the body is not legacy.
#[must_use]
pub fn normalize_session_body(body: &Value) -> Option<Value> {
    if !is_legacy_body(body) {
        return None;
    }
    let capabilities = body.get("value").cloned().unwrap_or_else(|| json!({}));
    let session_id = body.get("sessionId").cloned().unwrap_or(Value::Null);
    Some(json!({
        "value": {
            "capabilities": capabilities,
            "sessionId": session_id,
        }
    }))
}

/// Session id from a W3C session-creation body
#[must_use]
pub fn session_id_of(body: &Value) -> Option<String> {
    body.get("value")?
        .get("sessionId")?
        .as_str()
        .map(str::to_string)
}

/// W3C error code for a legacy numeric status
#[must_use]
pub const fn legacy_error_code(status: i64) -> &'static str {
    match status {
        0 => "success",
        6 => "invalid session id",
        7 => "no such element",
        8 => "no such frame",
        9 => "unknown command",
        10 => "stale element reference",
        11 => "element not visible",
        12 => "invalid element state",
        15 => "element not selectable",
        17 => "javascript error",
        19 | 32 | 51 | 52 => "invalid selector",
        21 => "timeout",
        23 => "no such window",
        24 => "invalid cookie domain",
        25 => "unable to set cookie",
        26 => "unexpected alert open",
        27 => "no such alert",
        28 => "script timeout",
        29 => "invalid element coordinates",
        30 | 31 | 405 => "unsupported operation",
        33 => "session not created",
        34 => "move target out of bounds",
        60 => "element not interactable",
        61 => "invalid argument",
        62 => "no such cookie",
        63 => "unable to capture screen",
        64 => "element click intercepted",
        _ => "unknown error",
    }
}

/// Inject `value.error` into a legacy error body.
///
/// Returns `None` when the body cannot be translated; the caller then
/// passes the original through unchanged.
#[must_use]
pub fn translate_error_body(body: &[u8]) -> Option<Vec<u8>> {
    let mut parsed: Value = serde_json::from_slice(body).ok()?;
    let status = parsed.get("status")?.as_i64()?;
    let value = parsed.get_mut("value")?.as_object_mut()?;
    value.insert(
        "error".to_string(),
        Value::from(legacy_error_code(status)),
    );
    serde_json::to_vec(&parsed).ok()
}
