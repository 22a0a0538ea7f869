//! Typed access to durable state.
//!
//! Store failures are never fatal: a failed read yields the in-memory default
//! and a failed write is dropped, both with a warning.

use std::{str::FromStr, sync::Arc};

use harvest_core::{
  evaluate::parse_destination,
  mode::AppState,
  permission::PermissionState,
  state::{StateKey, StateStore, Write, decode_dt, decode_flag, encode_dt},
};
use url::Url;

/// Typed facade over a shared [`StateStore`].
pub struct Prefs<S> {
  store: Arc<S>,
}

impl<S> Clone for Prefs<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: StateStore> Prefs<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  async fn read(&self, key: StateKey) -> Option<String> {
    match self.store.get(key).await {
      Ok(value) => value,
      Err(e) => {
        tracing::warn!(key = key.as_ref(), error = %e, "state read failed; using default");
        None
      }
    }
  }

  async fn write(&self, writes: Vec<Write>) {
    if let Err(e) = self.store.apply(writes).await {
      tracing::warn!(error = %e, "state write failed; dropping write");
    }
  }

  async fn flag(&self, key: StateKey) -> bool {
    let Some(raw) = self.read(key).await else { return false };
    decode_flag(&raw).unwrap_or_else(|e| {
      tracing::warn!(key = key.as_ref(), error = %e, "ignoring malformed flag");
      false
    })
  }

  // ── Run / app state ─────────────────────────────────────────────────────

  pub async fn has_run_before(&self) -> bool { self.flag(StateKey::HasRunBefore).await }

  pub async fn app_state(&self) -> Option<AppState> {
    let raw = self.read(StateKey::AppState).await?;
    match AppState::from_str(&raw) {
      Ok(state) => Some(state),
      Err(_) => {
        tracing::warn!(value = %raw, "unknown app state; treating as unset");
        None
      }
    }
  }

  /// The last destination committed by a successful decision, if it still
  /// parses.
  pub async fn stored_destination(&self) -> Option<Url> {
    let raw = self.read(StateKey::StoredDestination).await?;
    parse_destination(&raw)
  }

  /// Record a successful decision: destination, active state and the
  /// first-run flag land in one atomic batch.
  pub async fn commit_destination(&self, url: &Url) {
    self
      .write(vec![
        Write::Set(StateKey::StoredDestination, url.to_string()),
        Write::Set(StateKey::AppState, AppState::Active.as_ref().to_owned()),
        Write::flag(StateKey::HasRunBefore, true),
      ])
      .await;
  }

  /// Refresh only the cached destination, leaving the app state alone.
  pub async fn cache_destination(&self, url: &Url) {
    self
      .write(vec![Write::Set(StateKey::StoredDestination, url.to_string())])
      .await;
  }

  /// Make `Legacy` sticky for every later launch.
  pub async fn commit_legacy(&self) {
    self
      .write(vec![
        Write::Set(StateKey::AppState, AppState::Inactive.as_ref().to_owned()),
        Write::flag(StateKey::HasRunBefore, true),
      ])
      .await;
  }

  // ── Permission gate ─────────────────────────────────────────────────────

  pub async fn permission(&self) -> PermissionState {
    let last_request_at = match self.read(StateKey::LastPermissionRequest).await {
      Some(raw) => decode_dt(&raw)
        .inspect_err(|e| tracing::warn!(error = %e, "ignoring malformed permission timestamp"))
        .ok(),
      None => None,
    };
    PermissionState {
      granted: self.flag(StateKey::PermissionGranted).await,
      denied: self.flag(StateKey::PermissionDenied).await,
      last_request_at,
    }
  }

  pub async fn save_permission(&self, state: &PermissionState) {
    let mut writes = vec![
      Write::flag(StateKey::PermissionGranted, state.granted),
      Write::flag(StateKey::PermissionDenied, state.denied),
    ];
    writes.push(match state.last_request_at {
      Some(at) => Write::Set(StateKey::LastPermissionRequest, encode_dt(at)),
      None => Write::Remove(StateKey::LastPermissionRequest),
    });
    self.write(writes).await;
  }

  // ── Pending temp URL ────────────────────────────────────────────────────

  pub async fn pending_temp_url(&self) -> Option<String> {
    self.read(StateKey::PendingTempUrl).await
  }

  pub async fn set_pending_temp_url(&self, url: &str) {
    self
      .write(vec![Write::Set(StateKey::PendingTempUrl, url.to_owned())])
      .await;
  }

  pub async fn clear_pending_temp_url(&self) {
    self.write(vec![Write::Remove(StateKey::PendingTempUrl)]).await;
  }

  // ── Collaborator caches ─────────────────────────────────────────────────

  pub async fn push_token(&self) -> Option<String> {
    self.read(StateKey::PushToken).await.filter(|t| !t.is_empty())
  }

  pub async fn set_push_token(&self, token: &str) {
    self
      .write(vec![Write::Set(StateKey::PushToken, token.to_owned())])
      .await;
  }

  pub async fn attribution_sent(&self) -> bool {
    self.flag(StateKey::AttributionSent).await
  }

  pub async fn mark_attribution_sent(&self) {
    self
      .write(vec![Write::flag(StateKey::AttributionSent, true)])
      .await;
  }
}
