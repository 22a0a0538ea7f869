//! The orchestrator: the single owner of resolution state.
//!
//! Every mutation happens inside [`Orchestrator::run`], one event at a time.
//! Network fetches and timers run as detached tasks that report back through
//! the same queue, so completions are serialised with external signals.
//!
//! At most one resolution sequence (attribution fetch → decision fetch →
//! cache fallback) is in flight. `in_flight` holds the epoch of that
//! sequence; any transition that supersedes it clears `in_flight`, which
//! turns a late completion into a stale one that can no longer publish.

use std::{future::Future, sync::Arc, time::Duration};

use harvest_core::{
  attribution::{AttributionRecord, DeepLinkSignal},
  evaluate::{Signals, evaluate, parse_destination},
  mode::{AppState, Mode, Presentation},
  payload::parse_push_url,
  source::{AttributionSource, DestinationSource, DeviceContext, FetchError},
  state::StateStore,
};
use tokio::sync::{mpsc, watch};
use url::Url;

use crate::{
  EngineConfig,
  clock::{Clock, SystemClock},
  handle::{EngineHandle, Event, Signal},
  prefs::Prefs,
};

// ─── Orchestrator ────────────────────────────────────────────────────────────

pub struct Orchestrator<S, A, D> {
  prefs:        Prefs<S>,
  attribution:  Arc<A>,
  destination:  Arc<D>,
  clock:        Arc<dyn Clock>,
  config:       EngineConfig,
  events:       mpsc::WeakUnboundedSender<Event>,
  inbox:        mpsc::UnboundedReceiver<Event>,
  presentation: watch::Sender<Presentation>,

  /// Latest attribution record, merged with any deep link seen so far.
  record:            AttributionRecord,
  deep_link:         DeepLinkSignal,
  /// Destination resolved during this session.
  current_url:       Option<Url>,
  epoch:             u64,
  in_flight:         Option<u64>,
  /// Token of the pending first-run organic wait, if any.
  organic_wait:      Option<u64>,
  date_gate_pending: bool,
}

impl<S, A, D> Orchestrator<S, A, D>
where
  S: StateStore + 'static,
  A: AttributionSource + 'static,
  D: DestinationSource + 'static,
{
  /// Build an orchestrator and the handle collaborators use to reach it.
  /// Nothing happens until [`run`](Self::run) is polled.
  pub fn new(
    store: Arc<S>,
    attribution: Arc<A>,
    destination: Arc<D>,
    config: EngineConfig,
  ) -> (Self, EngineHandle) {
    let (tx, inbox) = mpsc::unbounded_channel();
    let (presentation, presentation_rx) = watch::channel(Presentation::setup());
    let orchestrator = Self {
      prefs: Prefs::new(store),
      attribution,
      destination,
      clock: Arc::new(SystemClock),
      config,
      events: tx.downgrade(),
      inbox,
      presentation,
      record: AttributionRecord::empty(),
      deep_link: DeepLinkSignal::new(),
      current_url: None,
      epoch: 0,
      in_flight: None,
      organic_wait: None,
      date_gate_pending: false,
    };
    (orchestrator, EngineHandle::new(tx, presentation_rx))
  }

  /// Replace the wall clock used for the cutoff gate and permission cooldown.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Spawn the event loop on the current tokio runtime.
  pub fn spawn(self) -> tokio::task::JoinHandle<()> { tokio::spawn(self.run()) }

  /// Process events until every handle is dropped.
  pub async fn run(mut self) {
    tracing::debug!("orchestrator started");
    while let Some(event) = self.inbox.recv().await {
      self.handle(event).await;
    }
    tracing::debug!("orchestrator stopped");
  }

  async fn handle(&mut self, event: Event) {
    match event {
      Event::Signal(signal) => self.on_signal(signal).await,
      Event::OrganicWaitElapsed { token } => {
        if self.organic_wait == Some(token) {
          self.organic_wait = None;
          tracing::info!("no deep link arrived; fetching attribution");
          self.start_attribution_fetch().await;
        }
      }
      Event::DateGateElapsed => {
        self.date_gate_pending = false;
        tracing::info!(cutoff = %self.config.cutoff, "before cutoff; forcing legacy");
        self.activate_legacy().await;
      }
      Event::TempUrlReady(url) => self.on_temp_url_ready(url).await,
      Event::AttributionFetched { epoch, result } => {
        self.on_attribution_fetched(epoch, result).await
      }
      Event::DestinationFetched { epoch, result } => {
        self.on_destination_fetched(epoch, result).await
      }
    }
  }

  async fn on_signal(&mut self, signal: Signal) {
    match signal {
      Signal::Attribution(record) => {
        tracing::info!(keys = record.len(), "attribution record received");
        self.record = self.with_deep_link(record);
        self.assess().await;
      }
      Signal::DeepLink(link) => {
        tracing::info!(keys = link.len(), "deep link received");
        self.deep_link = link;
        let record = std::mem::take(&mut self.record);
        self.record = self.with_deep_link(record);
        if self.organic_wait.take().is_some() {
          self.start_attribution_fetch().await;
        }
      }
      Signal::ConnectivityLost => self.on_connectivity_lost().await,
      Signal::ConnectivityRestored => self.on_connectivity_restored().await,
      Signal::PermissionResponse { granted } => {
        let mut gate = self.prefs.permission().await;
        gate.record_response(granted);
        self.prefs.save_permission(&gate).await;
        tracing::info!(granted, "permission answered");
        self.continue_after_permission().await;
      }
      Signal::PermissionSkipped => {
        let mut gate = self.prefs.permission().await;
        gate.record_skip(self.clock.now());
        self.prefs.save_permission(&gate).await;
        tracing::info!("permission prompt skipped");
        self.continue_after_permission().await;
      }
      Signal::PushPayload(payload) => {
        let Some(url) = parse_push_url(&payload) else {
          tracing::debug!("push payload carries no url");
          return;
        };
        self.prefs.set_pending_temp_url(&url).await;
        let delay = self.config.timings.temp_url_delay;
        self.schedule(delay, Event::TempUrlReady(url));
      }
      Signal::PushToken(token) => self.prefs.set_push_token(&token).await,
    }
  }

  // ── Evaluation ────────────────────────────────────────────────────────────

  async fn assess(&mut self) {
    if self.gate_before_cutoff() {
      return;
    }

    let app_state = self.prefs.app_state().await;
    if app_state == Some(AppState::Inactive) {
      self.activate_legacy().await;
      return;
    }
    if self.in_flight.is_some() || self.organic_wait.is_some() {
      tracing::debug!("resolution already under way");
      return;
    }
    if self.record.is_empty() {
      self.fall_back_to_cache().await;
      return;
    }

    let is_first_run = !self.prefs.has_run_before().await;
    let pending = self.prefs.pending_temp_url().await;
    let mode = evaluate(&Signals {
      attribution: &self.record,
      app_state,
      is_first_run,
      current_url: self.current_url.as_ref(),
      pending_temp_url: pending.as_deref(),
    });
    tracing::debug!(%mode, is_first_run, "evaluated");

    match mode {
      Mode::Legacy => self.activate_legacy().await,
      Mode::Operational => {
        if let Some(url) = pending.as_deref().and_then(parse_destination) {
          self.show_pending(url).await;
        }
      }
      Mode::Setup | Mode::Disconnected => {
        if is_first_run && self.record.is_organic() {
          self.begin_organic_wait();
          return;
        }
        if self.current_url.is_some() {
          return;
        }
        if self.prefs.permission().await.should_prompt(self.clock.now()) {
          self.publish(Presentation::awaiting_permission(None));
        } else {
          self.request_destination().await;
        }
      }
    }
  }

  /// Before the cutoff every path leads to `Legacy` after the gate delay.
  /// Returns `true` when the gate is closed.
  fn gate_before_cutoff(&mut self) -> bool {
    if self.clock.now() >= self.config.cutoff {
      return false;
    }
    if !self.date_gate_pending {
      self.date_gate_pending = true;
      let delay = self.config.timings.date_gate_delay;
      self.schedule(delay, Event::DateGateElapsed);
    }
    true
  }

  fn begin_organic_wait(&mut self) {
    self.epoch += 1;
    let token = self.epoch;
    self.organic_wait = Some(token);
    tracing::info!("first organic launch; waiting for a deep link");
    let delay = self.config.timings.organic_wait;
    self.schedule(delay, Event::OrganicWaitElapsed { token });
  }

  async fn continue_after_permission(&mut self) {
    let prompting = self.presentation.borrow().permission_prompt;
    if !prompting {
      return;
    }
    match self.current_url.clone() {
      Some(url) => self.publish(Presentation::operational(url)),
      None => self.request_destination().await,
    }
  }

  // ── Resolution sequence ───────────────────────────────────────────────────

  async fn start_attribution_fetch(&mut self) {
    if self.in_flight.is_some() {
      return;
    }
    let epoch = self.next_epoch();
    let device = self.device().await;
    let deep_link = self.deep_link.clone();
    let source = Arc::clone(&self.attribution);
    self.run_detached(async move {
      let result = source.fetch_attribution(&device, &deep_link).await;
      Event::AttributionFetched { epoch, result }
    });
  }

  async fn on_attribution_fetched(
    &mut self,
    epoch: u64,
    result: Result<AttributionRecord, FetchError>,
  ) {
    if self.in_flight != Some(epoch) {
      tracing::debug!(epoch, "discarding stale attribution result");
      return;
    }
    match result {
      Ok(record) => {
        self.record = self.with_deep_link(record);
        if self.record.is_empty() {
          self.in_flight = None;
          tracing::info!("attribution lookup returned nothing");
          self.fall_back_to_cache().await;
        } else {
          self.spawn_destination_fetch(epoch).await;
        }
      }
      Err(e) => {
        self.in_flight = None;
        tracing::warn!(error = %e, "attribution lookup failed");
        self.activate_legacy().await;
      }
    }
  }

  async fn request_destination(&mut self) {
    if self.in_flight.is_some() {
      return;
    }
    let epoch = self.next_epoch();
    self.spawn_destination_fetch(epoch).await;
  }

  async fn spawn_destination_fetch(&mut self, epoch: u64) {
    let device = self.device().await;
    let record = self.record.clone();
    let source = Arc::clone(&self.destination);
    self.run_detached(async move {
      let result = source.fetch_destination(&record, &device).await;
      Event::DestinationFetched { epoch, result }
    });
  }

  async fn on_destination_fetched(&mut self, epoch: u64, result: Result<Url, FetchError>) {
    if self.in_flight != Some(epoch) {
      // Superseded: keep the cache fresh, but never publish or flip state.
      if let Ok(url) = result {
        tracing::debug!(epoch, %url, "stale decision; refreshing cache only");
        self.prefs.cache_destination(&url).await;
      }
      return;
    }
    self.in_flight = None;

    match result {
      Ok(url) => {
        tracing::info!(%url, "destination resolved");
        self.prefs.commit_destination(&url).await;
        self.current_url = Some(url.clone());
        if self.prefs.permission().await.should_prompt(self.clock.now()) {
          self.publish(Presentation::awaiting_permission(Some(url)));
        } else {
          self.publish(Presentation::operational(url));
        }
      }
      Err(e) => {
        tracing::warn!(error = %e, "decision fetch failed; trying cached destination");
        self.fall_back_to_cache().await;
      }
    }
  }

  async fn fall_back_to_cache(&mut self) {
    match self.prefs.stored_destination().await {
      Some(url) => {
        tracing::info!(%url, "using cached destination");
        self.current_url = Some(url.clone());
        self.publish(Presentation::operational(url));
      }
      None => self.activate_legacy().await,
    }
  }

  async fn activate_legacy(&mut self) {
    self.supersede();
    self.prefs.commit_legacy().await;
    self.current_url = None;
    self.publish(Presentation::legacy());
  }

  // ── Push URLs ─────────────────────────────────────────────────────────────

  async fn on_temp_url_ready(&mut self, announced: String) {
    let Some(pending) = self.prefs.pending_temp_url().await else {
      tracing::debug!(url = %announced, "temp url already consumed");
      return;
    };
    if self.gate_before_cutoff() {
      tracing::info!(url = %pending, "before cutoff; discarding temp url");
      self.prefs.clear_pending_temp_url().await;
      return;
    }
    match parse_destination(&pending) {
      Some(url) => {
        self.supersede();
        self.show_pending(url).await;
      }
      None => {
        tracing::warn!(url = %pending, "discarding unparseable temp url");
        self.prefs.clear_pending_temp_url().await;
      }
    }
  }

  /// Publish a pushed destination and consume it so it is shown once.
  async fn show_pending(&mut self, url: Url) {
    self.prefs.clear_pending_temp_url().await;
    self.current_url = Some(url.clone());
    self.publish(Presentation::operational(url));
  }

  // ── Connectivity ──────────────────────────────────────────────────────────

  async fn on_connectivity_lost(&mut self) {
    if self.prefs.app_state().await == Some(AppState::Active) {
      tracing::info!("connectivity lost during an active session");
      self.supersede();
      let current = self.presentation.borrow().clone();
      self.publish(Presentation { mode: Mode::Disconnected, permission_prompt: false, ..current });
    } else {
      tracing::info!("connectivity lost before activation; falling back to legacy");
      self.activate_legacy().await;
    }
  }

  async fn on_connectivity_restored(&mut self) {
    let mode = self.presentation.borrow().mode;
    if mode != Mode::Disconnected {
      return;
    }
    tracing::info!("connectivity restored");
    match self.current_url.clone() {
      Some(url) => self.publish(Presentation::operational(url)),
      None => self.assess().await,
    }
  }

  // ── Plumbing ──────────────────────────────────────────────────────────────

  /// Fill gaps in `record` from the latest deep link. An empty record stays
  /// empty: it means the attribution collaborator had nothing to report.
  fn with_deep_link(&self, record: AttributionRecord) -> AttributionRecord {
    if record.is_empty() {
      record
    } else {
      record.merged_with(&self.deep_link)
    }
  }

  fn next_epoch(&mut self) -> u64 {
    self.epoch += 1;
    self.in_flight = Some(self.epoch);
    self.epoch
  }

  /// Abandon any pending wait or in-flight sequence.
  fn supersede(&mut self) {
    if let Some(epoch) = self.in_flight.take() {
      tracing::debug!(epoch, "superseding in-flight resolution");
    }
    self.organic_wait = None;
  }

  async fn device(&self) -> DeviceContext {
    DeviceContext {
      push_token: self.prefs.push_token().await,
      ..self.config.device.clone()
    }
  }

  fn publish(&self, next: Presentation) {
    let changed = self.presentation.send_if_modified(|current| {
      if *current == next {
        return false;
      }
      *current = next.clone();
      true
    });
    if changed {
      tracing::info!(
        mode = %next.mode,
        destination = next.destination.as_ref().map(Url::as_str),
        permission_prompt = next.permission_prompt,
        "presentation changed"
      );
    }
  }

  /// Deliver `event` back to this orchestrator after `delay`.
  fn schedule(&self, delay: Duration, event: Event) {
    self.run_detached(async move {
      tokio::time::sleep(delay).await;
      event
    });
  }

  /// Run `work` off the event loop and queue its resulting event.
  fn run_detached(&self, work: impl Future<Output = Event> + Send + 'static) {
    let Some(events) = self.events.upgrade() else { return };
    tokio::spawn(async move {
      let event = work.await;
      // The orchestrator may have stopped meanwhile; nothing to deliver to.
      let _ = events.send(event);
    });
  }
}
