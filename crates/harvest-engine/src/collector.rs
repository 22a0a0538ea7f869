//! Combines the attribution SDK's two callbacks into one record.
//!
//! Conversion data and deep-link data arrive independently and in either
//! order. The collector waits up to [`Timings::combine_window`] after
//! conversion data for a deep link, then sends a single merged
//! [`Signal::Attribution`]. At most one record is sent per process, and none
//! once a previous launch has already sent one.
//!
//! [`Timings::combine_window`]: crate::Timings::combine_window

use std::{sync::Arc, time::Duration};

use harvest_core::{
  attribution::{AttributionRecord, DeepLinkSignal},
  state::StateStore,
};
use tokio::{sync::Mutex, task::JoinHandle};

use crate::{EngineHandle, Signal, prefs::Prefs};

#[derive(Default)]
struct CollectorState {
  conversion: Option<AttributionRecord>,
  deep_link:  Option<DeepLinkSignal>,
  timer:      Option<JoinHandle<()>>,
  sent:       bool,
}

pub struct AttributionCollector<S> {
  state:  Arc<Mutex<CollectorState>>,
  prefs:  Prefs<S>,
  engine: EngineHandle,
  window: Duration,
}

impl<S> Clone for AttributionCollector<S> {
  fn clone(&self) -> Self {
    Self {
      state:  Arc::clone(&self.state),
      prefs:  self.prefs.clone(),
      engine: self.engine.clone(),
      window: self.window,
    }
  }
}

impl<S: StateStore + 'static> AttributionCollector<S> {
  /// `store` should be the same store the orchestrator was built with, so
  /// the "sent" flag is shared across launches.
  pub fn new(store: Arc<S>, engine: EngineHandle, window: Duration) -> Self {
    Self {
      state: Arc::default(),
      prefs: Prefs::new(store),
      engine,
      window,
    }
  }

  /// The SDK delivered conversion data.
  pub async fn on_conversion_success(&self, conversion: AttributionRecord) {
    tracing::info!(keys = conversion.len(), "conversion data received");
    let has_deep_link = {
      let mut state = self.state.lock().await;
      state.conversion = Some(conversion);
      if let Some(timer) = state.timer.take() {
        timer.abort();
      }
      let collector = self.clone();
      let window = self.window;
      state.timer = Some(tokio::spawn(async move {
        tokio::time::sleep(window).await;
        tracing::debug!("combine window elapsed");
        collector.flush().await;
      }));
      state.deep_link.is_some()
    };
    if has_deep_link {
      self.flush().await;
    }
  }

  /// The SDK could not produce conversion data; hand the engine an empty
  /// record so it can fall back.
  pub async fn on_conversion_failure(&self, reason: &str) {
    tracing::warn!(reason, "conversion data unavailable");
    {
      let mut state = self.state.lock().await;
      if state.sent {
        return;
      }
      state.sent = true;
      if let Some(timer) = state.timer.take() {
        timer.abort();
      }
    }
    self.forward(Signal::Attribution(AttributionRecord::empty()));
  }

  /// The SDK resolved a deep link.
  pub async fn on_deep_link(&self, link: DeepLinkSignal) {
    if self.prefs.attribution_sent().await {
      tracing::debug!("attribution already sent on an earlier launch; ignoring deep link");
      return;
    }
    tracing::info!(keys = link.len(), "deep link found");
    self.forward(Signal::DeepLink(link.clone()));

    let has_conversion = {
      let mut state = self.state.lock().await;
      state.deep_link = Some(link);
      if let Some(timer) = state.timer.take() {
        timer.abort();
      }
      state.conversion.is_some()
    };
    if has_conversion {
      self.flush().await;
    }
  }

  /// Send the combined record unless one has already gone out.
  async fn flush(&self) {
    let record = {
      let mut state = self.state.lock().await;
      if state.sent {
        return;
      }
      let Some(conversion) = state.conversion.as_ref() else { return };
      let record = match state.deep_link.as_ref() {
        Some(link) => conversion.merged_with(link),
        None => conversion.clone(),
      };
      state.sent = true;
      // May be the running timer itself; dropping detaches without aborting.
      state.timer = None;
      record
    };

    tracing::info!(keys = record.len(), "sending combined attribution");
    self.forward(Signal::Attribution(record));
    self.prefs.mark_attribution_sent().await;
  }

  fn forward(&self, signal: Signal) {
    if let Err(e) = self.engine.send(signal) {
      tracing::warn!(error = %e, "dropping attribution signal");
    }
  }
}
