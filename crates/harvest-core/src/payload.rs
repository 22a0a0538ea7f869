//! Inbound push payloads.

use serde_json::Value;

/// Extract a destination URL from a push payload: a top-level `url` string,
/// else `data.url`. Blank strings count as absent.
pub fn parse_push_url(payload: &Value) -> Option<String> {
  let top = payload.get("url").and_then(Value::as_str);
  let nested = || {
    payload
      .get("data")
      .and_then(|data| data.get("url"))
      .and_then(Value::as_str)
  };
  top
    .filter(|s| !s.trim().is_empty())
    .or_else(|| nested().filter(|s| !s.trim().is_empty()))
    .map(str::to_owned)
}
