//! Attribution records and deep-link signals.
//!
//! Both arrive as loosely-typed key/value payloads. Values are narrowed to a
//! small closed set of scalars; composite JSON values are kept as their
//! compact JSON text so nothing the upstream service sent is lost.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key under which the attribution service reports install origin.
pub const STATUS_KEY: &str = "af_status";
/// Fallback status key used by some payload shapes.
pub const STATUS_KEY_FALLBACK: &str = "status";
/// Status value for installs with no paid or referral origin.
pub const ORGANIC: &str = "Organic";

// ─── Values ──────────────────────────────────────────────────────────────────

/// A single scalar attribution value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
  Null,
  Bool(bool),
  Number(serde_json::Number),
  String(String),
}

impl AttrValue {
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::String(s) => Some(s),
      _ => None,
    }
  }
}

impl From<serde_json::Value> for AttrValue {
  fn from(value: serde_json::Value) -> Self {
    use serde_json::Value;
    match value {
      Value::Null => Self::Null,
      Value::Bool(b) => Self::Bool(b),
      Value::Number(n) => Self::Number(n),
      Value::String(s) => Self::String(s),
      composite @ (Value::Array(_) | Value::Object(_)) => {
        Self::String(composite.to_string())
      }
    }
  }
}

impl From<&str> for AttrValue {
  fn from(value: &str) -> Self { Self::String(value.to_owned()) }
}

impl From<String> for AttrValue {
  fn from(value: String) -> Self { Self::String(value) }
}

impl From<bool> for AttrValue {
  fn from(value: bool) -> Self { Self::Bool(value) }
}

impl From<i64> for AttrValue {
  fn from(value: i64) -> Self { Self::Number(value.into()) }
}

impl From<AttrValue> for serde_json::Value {
  fn from(value: AttrValue) -> Self {
    match value {
      AttrValue::Null => Self::Null,
      AttrValue::Bool(b) => Self::Bool(b),
      AttrValue::Number(n) => Self::Number(n),
      AttrValue::String(s) => Self::String(s),
    }
  }
}

// ─── Maps ────────────────────────────────────────────────────────────────────

type AttrMap = BTreeMap<String, AttrValue>;

fn map_from_object(object: serde_json::Map<String, serde_json::Value>) -> AttrMap {
  object.into_iter().map(|(k, v)| (k, AttrValue::from(v))).collect()
}

/// Payload extracted from a resolved deep link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeepLinkSignal(AttrMap);

impl DeepLinkSignal {
  pub fn new() -> Self { Self::default() }

  pub fn from_object(object: serde_json::Map<String, serde_json::Value>) -> Self {
    Self(map_from_object(object))
  }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn get(&self, key: &str) -> Option<&AttrValue> { self.0.get(key) }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
    self.0.iter()
  }
}

impl<K: Into<String>, V: Into<AttrValue>> FromIterator<(K, V)> for DeepLinkSignal {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }
}

/// The normalised answer to "how did this install originate".
///
/// Immutable once built; merging produces a new record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributionRecord(AttrMap);

impl AttributionRecord {
  pub fn empty() -> Self { Self::default() }

  pub fn from_object(object: serde_json::Map<String, serde_json::Value>) -> Self {
    Self(map_from_object(object))
  }

  /// Return a new record with deep-link keys filling only the gaps.
  /// Keys already present in `self` always win.
  pub fn merged_with(&self, deep_link: &DeepLinkSignal) -> Self {
    let mut merged = self.0.clone();
    for (key, value) in deep_link.iter() {
      merged.entry(key.clone()).or_insert_with(|| value.clone());
    }
    Self(merged)
  }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn get(&self, key: &str) -> Option<&AttrValue> { self.0.get(key) }

  /// The install-origin status, if the record carries one.
  pub fn status(&self) -> Option<&str> {
    self
      .get(STATUS_KEY)
      .or_else(|| self.get(STATUS_KEY_FALLBACK))
      .and_then(AttrValue::as_str)
  }

  pub fn is_organic(&self) -> bool { self.status() == Some(ORGANIC) }

  /// Flatten into a JSON object, e.g. to seed a request body.
  pub fn to_json_object(&self) -> serde_json::Map<String, serde_json::Value> {
    self
      .0
      .iter()
      .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
      .collect()
  }
}

impl<K: Into<String>, V: Into<AttrValue>> FromIterator<(K, V)>
  for AttributionRecord
{
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }
}
