//! Signals into the engine and the handle collaborators hold.

use harvest_core::{
  attribution::{AttributionRecord, DeepLinkSignal},
  mode::Presentation,
  source::FetchError,
};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use url::Url;

use crate::{Error, Result};

// ─── Public signals ──────────────────────────────────────────────────────────

/// An external event the orchestrator reacts to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Signal {
  /// A (possibly empty) attribution record from the attribution collaborator.
  Attribution(AttributionRecord),
  /// Deep-link data resolved independently of the attribution record.
  DeepLink(DeepLinkSignal),
  ConnectivityLost,
  ConnectivityRestored,
  /// The user answered the system permission dialog.
  PermissionResponse { granted: bool },
  /// The user dismissed the permission prompt without answering.
  PermissionSkipped,
  /// A raw push-notification payload.
  PushPayload(serde_json::Value),
  /// A fresh push token from the messaging collaborator.
  PushToken(String),
}

// ─── Internal events ─────────────────────────────────────────────────────────

/// Everything that flows through the orchestrator's queue: external signals
/// plus completions of work it scheduled itself.
#[derive(Debug)]
pub(crate) enum Event {
  Signal(Signal),
  OrganicWaitElapsed { token: u64 },
  DateGateElapsed,
  TempUrlReady(String),
  AttributionFetched {
    epoch:  u64,
    result: Result<AttributionRecord, FetchError>,
  },
  DestinationFetched {
    epoch:  u64,
    result: Result<Url, FetchError>,
  },
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// A cloneable handle to a running orchestrator.
///
/// The orchestrator stops once every handle has been dropped and its own
/// scheduled work has drained.
#[derive(Clone)]
pub struct EngineHandle {
  events:       mpsc::UnboundedSender<Event>,
  presentation: watch::Receiver<Presentation>,
}

impl EngineHandle {
  pub(crate) fn new(
    events: mpsc::UnboundedSender<Event>,
    presentation: watch::Receiver<Presentation>,
  ) -> Self {
    Self { events, presentation }
  }

  /// Queue `signal` for the orchestrator. Never blocks.
  pub fn send(&self, signal: Signal) -> Result<()> {
    self
      .events
      .send(Event::Signal(signal))
      .map_err(|_| Error::Closed)
  }

  /// The most recently published presentation.
  pub fn current(&self) -> Presentation { self.presentation.borrow().clone() }

  /// A receiver notified on every presentation change.
  pub fn subscribe(&self) -> watch::Receiver<Presentation> {
    self.presentation.clone()
  }

  /// Wait until the published presentation satisfies `predicate`, returning
  /// it. Fails if the orchestrator stops first.
  pub async fn wait_for(
    &self,
    mut predicate: impl FnMut(&Presentation) -> bool,
  ) -> Result<Presentation> {
    let mut rx = self.subscribe();
    let seen = rx
      .wait_for(|p| predicate(p))
      .await
      .map_err(|_| Error::Closed)?;
    Ok(seen.clone())
  }
}
