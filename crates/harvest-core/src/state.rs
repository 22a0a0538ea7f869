//! The `StateStore` trait, its key space, and the plain-text value codec.
//!
//! Durable state is a flat key/value map of strings. Typed access (flags,
//! timestamps, URLs) is layered on top through the `encode_*`/`decode_*`
//! helpers so every backend stores identical text.

use std::{
  collections::HashMap,
  convert::Infallible,
  future::Future,
  sync::Mutex,
};

use chrono::{DateTime, Utc};
use strum::{AsRefStr, EnumIter, EnumString};

use crate::{Error, Result};

// ─── Keys ────────────────────────────────────────────────────────────────────

/// Every durable key the engine reads or writes.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, EnumString, EnumIter,
)]
pub enum StateKey {
  #[strum(serialize = "hasRunPreviously")]
  HasRunBefore,
  #[strum(serialize = "app_state")]
  AppState,
  #[strum(serialize = "stored_path")]
  StoredDestination,
  #[strum(serialize = "perms_accepted")]
  PermissionGranted,
  #[strum(serialize = "perms_denied")]
  PermissionDenied,
  #[strum(serialize = "last_perm_request")]
  LastPermissionRequest,
  #[strum(serialize = "temp_url")]
  PendingTempUrl,
  #[strum(serialize = "push_token")]
  PushToken,
  #[strum(serialize = "trackingDataSent")]
  AttributionSent,
}

/// A single mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
  Set(StateKey, String),
  Remove(StateKey),
}

impl Write {
  pub fn flag(key: StateKey, value: bool) -> Self {
    Self::Set(key, encode_flag(value).to_owned())
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a durable key/value backend.
///
/// `apply` must be atomic: after a crash either every write in the batch is
/// visible or none is.
pub trait StateStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Read the raw text stored under `key`, or `None` if unset.
  fn get(
    &self,
    key: StateKey,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;

  /// Apply a batch of writes as one logical commit.
  fn apply(
    &self,
    writes: Vec<Write>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

// ─── In-memory backend ───────────────────────────────────────────────────────

/// A process-local store. Used when no durable backend is configured, and in
/// tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<StateKey, String>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  /// Seed a store with existing entries.
  pub fn with_entries(
    entries: impl IntoIterator<Item = (StateKey, String)>,
  ) -> Self {
    Self { entries: Mutex::new(entries.into_iter().collect()) }
  }

  /// Synchronous read, convenient for assertions.
  pub fn peek(&self, key: StateKey) -> Option<String> {
    self
      .entries
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .get(&key)
      .cloned()
  }
}

impl StateStore for MemoryStore {
  type Error = Infallible;

  async fn get(&self, key: StateKey) -> Result<Option<String>, Infallible> {
    Ok(self.peek(key))
  }

  async fn apply(&self, writes: Vec<Write>) -> Result<(), Infallible> {
    let mut entries = self
      .entries
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    for write in writes {
      match write {
        Write::Set(key, value) => {
          entries.insert(key, value);
        }
        Write::Remove(key) => {
          entries.remove(&key);
        }
      }
    }
    Ok(())
  }
}

// ─── Codec ───────────────────────────────────────────────────────────────────

pub fn encode_flag(value: bool) -> &'static str {
  if value { "true" } else { "false" }
}

pub fn decode_flag(s: &str) -> Result<bool> {
  match s {
    "true" | "1" => Ok(true),
    "false" | "0" => Ok(false),
    other => Err(Error::InvalidFlag(other.to_owned())),
  }
}

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn decode_key(s: &str) -> Result<StateKey> {
  s.parse().map_err(|_| Error::UnknownKey(s.to_owned()))
}
