//! End-to-end orchestrator scenarios on a paused tokio clock, with fake
//! remote sources and an in-memory store.

use std::{
  future::Future,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};
use harvest_core::{
  attribution::{AttributionRecord, DeepLinkSignal},
  mode::{Mode, Presentation},
  source::{AttributionSource, DestinationSource, DeviceContext, FetchError},
  state::{MemoryStore, StateKey, encode_dt},
};
use serde_json::json;
use url::Url;

use crate::{
  AttributionCollector, EngineConfig, EngineHandle, Orchestrator, Signal,
  clock::Clock,
};

// ─── Fakes ───────────────────────────────────────────────────────────────────

struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
  fn at(now: DateTime<Utc>) -> Self { Self(Mutex::new(now)) }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> { *self.0.lock().unwrap() }
}

struct FakeAttribution {
  result: Result<AttributionRecord, FetchError>,
  delay:  Duration,
  calls:  AtomicUsize,
}

impl FakeAttribution {
  fn returning(result: Result<AttributionRecord, FetchError>) -> Self {
    Self { result, delay: Duration::ZERO, calls: AtomicUsize::new(0) }
  }

  fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

impl AttributionSource for FakeAttribution {
  fn fetch_attribution<'a>(
    &'a self,
    _device: &'a DeviceContext,
    deep_link: &'a DeepLinkSignal,
  ) -> impl Future<Output = Result<AttributionRecord, FetchError>> + Send + 'a {
    async move {
      self.calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(self.delay).await;
      self.result.clone().map(|record| record.merged_with(deep_link))
    }
  }
}

struct FakeDestination {
  result:  Result<Url, FetchError>,
  delay:   Duration,
  calls:   AtomicUsize,
  records: Mutex<Vec<AttributionRecord>>,
  devices: Mutex<Vec<DeviceContext>>,
}

impl FakeDestination {
  fn returning(result: Result<Url, FetchError>) -> Self {
    Self {
      result,
      delay: Duration::ZERO,
      calls: AtomicUsize::new(0),
      records: Mutex::default(),
      devices: Mutex::default(),
    }
  }

  fn delayed(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }

  fn last_record(&self) -> AttributionRecord {
    self.records.lock().unwrap().last().cloned().expect("no decision request")
  }

  fn last_device(&self) -> DeviceContext {
    self.devices.lock().unwrap().last().cloned().expect("no decision request")
  }
}

impl DestinationSource for FakeDestination {
  fn fetch_destination<'a>(
    &'a self,
    attribution: &'a AttributionRecord,
    device: &'a DeviceContext,
  ) -> impl Future<Output = Result<Url, FetchError>> + Send + 'a {
    async move {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.records.lock().unwrap().push(attribution.clone());
      self.devices.lock().unwrap().push(device.clone());
      tokio::time::sleep(self.delay).await;
      self.result.clone()
    }
  }
}

// ─── Harness ─────────────────────────────────────────────────────────────────

fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() }

fn url(s: &str) -> Url { Url::parse(s).unwrap() }

fn record(pairs: &[(&str, &str)]) -> AttributionRecord {
  pairs.iter().copied().collect()
}

fn non_organic() -> AttributionRecord {
  record(&[("af_status", "Non-organic"), ("campaign", "spring")])
}

fn organic() -> AttributionRecord { record(&[("af_status", "Organic")]) }

fn device() -> DeviceContext {
  DeviceContext {
    platform: "iOS".into(),
    tracking_id: "1700000000000-1234567".into(),
    bundle_id: "com.example.harvest".into(),
    firebase_project_id: None,
    store_id: "id123456789".into(),
    push_token: None,
    locale: "EN".into(),
  }
}

fn seeded(entries: &[(StateKey, &str)]) -> MemoryStore {
  MemoryStore::with_entries(entries.iter().map(|(k, v)| (*k, (*v).to_owned())))
}

/// Permission already answered, so resolution runs without a prompt.
fn granted() -> MemoryStore { seeded(&[(StateKey::PermissionGranted, "true")]) }

struct Harness {
  store:       Arc<MemoryStore>,
  attribution: Arc<FakeAttribution>,
  destination: Arc<FakeDestination>,
  handle:      EngineHandle,
}

impl Harness {
  fn start(
    store: MemoryStore,
    attribution: FakeAttribution,
    destination: FakeDestination,
  ) -> Self {
    Self::start_at(now(), store, attribution, destination)
  }

  fn start_at(
    at: DateTime<Utc>,
    store: MemoryStore,
    attribution: FakeAttribution,
    destination: FakeDestination,
  ) -> Self {
    let store = Arc::new(store);
    let attribution = Arc::new(attribution);
    let destination = Arc::new(destination);
    let (orchestrator, handle) = Orchestrator::new(
      Arc::clone(&store),
      Arc::clone(&attribution),
      Arc::clone(&destination),
      EngineConfig::new(device()),
    );
    orchestrator.with_clock(Arc::new(ManualClock::at(at))).spawn();
    Self { store, attribution, destination, handle }
  }

  fn collector(&self) -> AttributionCollector<MemoryStore> {
    AttributionCollector::new(
      Arc::clone(&self.store),
      self.handle.clone(),
      EngineConfig::new(device()).timings.combine_window,
    )
  }

  fn send(&self, signal: Signal) { self.handle.send(signal).unwrap(); }

  async fn expect(&self, predicate: impl FnMut(&Presentation) -> bool) -> Presentation {
    tokio::time::timeout(Duration::from_secs(120), self.handle.wait_for(predicate))
      .await
      .expect("presentation never reached")
      .unwrap()
  }

  async fn expect_mode(&self, mode: Mode) -> Presentation {
    self.expect(|p| p.mode == mode).await
  }

  fn stored(&self, key: StateKey) -> Option<String> { self.store.peek(key) }
}

/// Let every pending timer and fetch run to completion.
async fn settle() { tokio::time::sleep(Duration::from_secs(60)).await; }

fn ok_destination() -> FakeDestination {
  FakeDestination::returning(Ok(url("https://dest.test/home")))
}

fn unused_attribution() -> FakeAttribution {
  FakeAttribution::returning(Err(FetchError::Transport("not expected".into())))
}

// ─── Resolution ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn non_organic_install_resolves_destination() {
  let h = Harness::start(granted(), unused_attribution(), ok_destination());
  h.send(Signal::Attribution(non_organic()));

  let shown = h.expect_mode(Mode::Operational).await;
  assert_eq!(shown.destination, Some(url("https://dest.test/home")));
  assert_eq!(h.stored(StateKey::StoredDestination).as_deref(), Some("https://dest.test/home"));
  assert_eq!(h.stored(StateKey::AppState).as_deref(), Some("HarvestView"));
  assert_eq!(h.stored(StateKey::HasRunBefore).as_deref(), Some("true"));
  assert_eq!(h.destination.calls(), 1);
  assert_eq!(h.attribution.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn first_organic_launch_waits_before_fetching_attribution() {
  let fetched = record(&[("af_status", "Organic"), ("media_source", "search")]);
  let h = Harness::start(
    granted(),
    FakeAttribution::returning(Ok(fetched)),
    ok_destination(),
  );
  let started = tokio::time::Instant::now();
  h.send(Signal::Attribution(organic()));

  h.expect_mode(Mode::Operational).await;
  assert!(started.elapsed() >= Duration::from_secs(5));
  assert_eq!(h.attribution.calls(), 1);
  assert_eq!(
    h.destination.last_record().get("media_source").and_then(|v| v.as_str()),
    Some("search"),
  );
}

#[tokio::test(start_paused = true)]
async fn deep_link_cuts_the_organic_wait_short() {
  let h = Harness::start(
    granted(),
    FakeAttribution::returning(Ok(organic())),
    ok_destination(),
  );
  let started = tokio::time::Instant::now();
  h.send(Signal::Attribution(organic()));
  tokio::time::sleep(Duration::from_secs(1)).await;
  h.send(Signal::DeepLink([("deep_link_value", "promo")].into_iter().collect()));

  h.expect_mode(Mode::Operational).await;
  assert!(started.elapsed() < Duration::from_secs(5));
  assert_eq!(
    h.destination.last_record().get("deep_link_value").and_then(|v| v.as_str()),
    Some("promo"),
  );

  settle().await;
  assert_eq!(h.attribution.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_attribution_lookup_goes_legacy() {
  let h = Harness::start(
    granted(),
    FakeAttribution::returning(Ok(AttributionRecord::empty())),
    ok_destination(),
  );
  h.send(Signal::Attribution(organic()));

  h.expect_mode(Mode::Legacy).await;
  assert_eq!(h.stored(StateKey::AppState).as_deref(), Some("Inactive"));
  assert_eq!(h.destination.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_attribution_lookup_goes_legacy() {
  let h = Harness::start(
    granted(),
    FakeAttribution::returning(Err(FetchError::Transport("timeout".into()))),
    ok_destination(),
  );
  h.send(Signal::Attribution(organic()));

  h.expect_mode(Mode::Legacy).await;
  assert_eq!(h.destination.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_attribution_signal_without_cache_goes_legacy() {
  let h = Harness::start(granted(), unused_attribution(), ok_destination());
  h.send(Signal::Attribution(AttributionRecord::empty()));

  h.expect_mode(Mode::Legacy).await;
  assert_eq!(h.stored(StateKey::AppState).as_deref(), Some("Inactive"));
}

#[tokio::test(start_paused = true)]
async fn empty_attribution_signal_uses_cached_destination() {
  let h = Harness::start(
    seeded(&[
      (StateKey::HasRunBefore, "true"),
      (StateKey::AppState, "HarvestView"),
      (StateKey::StoredDestination, "https://cached.test/"),
    ]),
    unused_attribution(),
    ok_destination(),
  );
  h.send(Signal::Attribution(AttributionRecord::empty()));

  let shown = h.expect_mode(Mode::Operational).await;
  assert_eq!(shown.destination, Some(url("https://cached.test/")));
  assert_eq!(h.destination.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn decision_failure_falls_back_to_cached_destination() {
  let h = Harness::start(
    seeded(&[
      (StateKey::HasRunBefore, "true"),
      (StateKey::AppState, "HarvestView"),
      (StateKey::StoredDestination, "https://cached.test/"),
      (StateKey::PermissionDenied, "true"),
    ]),
    unused_attribution(),
    FakeDestination::returning(Err(FetchError::Transport("503".into()))),
  );
  h.send(Signal::Attribution(non_organic()));

  let shown = h.expect_mode(Mode::Operational).await;
  assert_eq!(shown.destination, Some(url("https://cached.test/")));
  assert_eq!(h.destination.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn decision_failure_without_cache_goes_legacy() {
  let h = Harness::start(
    granted(),
    unused_attribution(),
    FakeDestination::returning(Err(FetchError::Parse("ok=false".into()))),
  );
  h.send(Signal::Attribution(non_organic()));

  h.expect_mode(Mode::Legacy).await;
  assert_eq!(h.stored(StateKey::AppState).as_deref(), Some("Inactive"));
  assert_eq!(h.stored(StateKey::HasRunBefore).as_deref(), Some("true"));
}

#[tokio::test(start_paused = true)]
async fn inactive_state_is_sticky() {
  let h = Harness::start(
    seeded(&[(StateKey::AppState, "Inactive"), (StateKey::HasRunBefore, "true")]),
    unused_attribution(),
    ok_destination(),
  );
  h.send(Signal::Attribution(non_organic()));

  h.expect_mode(Mode::Legacy).await;
  settle().await;
  assert_eq!(h.destination.calls(), 0);
  assert_eq!(h.attribution.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn repeated_signals_share_one_resolution() {
  let h = Harness::start(
    granted(),
    unused_attribution(),
    ok_destination().delayed(Duration::from_secs(3)),
  );
  h.send(Signal::Attribution(non_organic()));
  h.send(Signal::Attribution(non_organic()));
  h.send(Signal::ConnectivityRestored);

  h.expect_mode(Mode::Operational).await;
  settle().await;
  assert_eq!(h.destination.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn late_decision_cannot_override_legacy() {
  let h = Harness::start(
    granted(),
    unused_attribution(),
    ok_destination().delayed(Duration::from_secs(3)),
  );
  h.send(Signal::Attribution(non_organic()));
  tokio::time::sleep(Duration::from_secs(1)).await;
  // No active session yet, so losing connectivity means legacy.
  h.send(Signal::ConnectivityLost);

  h.expect_mode(Mode::Legacy).await;
  settle().await;
  assert_eq!(h.handle.current(), Presentation::legacy());
  assert_eq!(h.stored(StateKey::AppState).as_deref(), Some("Inactive"));
  // The late answer still refreshes the cache.
  assert_eq!(h.stored(StateKey::StoredDestination).as_deref(), Some("https://dest.test/home"));
}

#[tokio::test(start_paused = true)]
async fn cutoff_gate_forces_legacy() {
  let before_cutoff = Utc.with_ymd_and_hms(2025, 12, 20, 23, 0, 0).unwrap();
  let h = Harness::start_at(before_cutoff, granted(), unused_attribution(), ok_destination());
  let started = tokio::time::Instant::now();
  h.send(Signal::Attribution(non_organic()));

  h.expect_mode(Mode::Legacy).await;
  assert!(started.elapsed() >= Duration::from_secs(1));
  settle().await;
  assert_eq!(h.destination.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cutoff_gate_also_holds_pushed_urls() {
  let before_cutoff = Utc.with_ymd_and_hms(2025, 12, 20, 23, 0, 0).unwrap();
  let h = Harness::start_at(before_cutoff, granted(), unused_attribution(), ok_destination());
  h.send(Signal::Attribution(non_organic()));
  h.expect_mode(Mode::Legacy).await;

  h.send(Signal::PushPayload(json!({ "url": "https://push.test/offer" })));
  settle().await;
  assert_eq!(h.handle.current(), Presentation::legacy());
  assert_eq!(h.stored(StateKey::PendingTempUrl), None);
  assert_eq!(h.stored(StateKey::AppState).as_deref(), Some("Inactive"));
}

// ─── Connectivity ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn connectivity_loss_during_session_disconnects_then_recovers() {
  let h = Harness::start(granted(), unused_attribution(), ok_destination());
  h.send(Signal::Attribution(non_organic()));
  h.expect_mode(Mode::Operational).await;

  h.send(Signal::ConnectivityLost);
  let offline = h.expect_mode(Mode::Disconnected).await;
  assert_eq!(offline.destination, Some(url("https://dest.test/home")));

  h.send(Signal::ConnectivityRestored);
  let back = h.expect_mode(Mode::Operational).await;
  assert_eq!(back.destination, Some(url("https://dest.test/home")));
  assert_eq!(h.destination.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn restore_outside_disconnected_is_ignored() {
  let h = Harness::start(granted(), unused_attribution(), ok_destination());
  h.send(Signal::ConnectivityRestored);
  settle().await;
  assert_eq!(h.handle.current(), Presentation::setup());
  assert_eq!(h.destination.calls(), 0);
}

// ─── Permission gate ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn fresh_install_prompts_before_deciding() {
  let h = Harness::start(MemoryStore::new(), unused_attribution(), ok_destination());
  h.send(Signal::Attribution(non_organic()));

  let prompt = h.expect(|p| p.permission_prompt).await;
  assert_eq!(prompt.mode, Mode::Setup);
  assert_eq!(prompt.destination, None);
  settle().await;
  assert_eq!(h.destination.calls(), 0);

  h.send(Signal::PermissionResponse { granted: true });
  h.expect_mode(Mode::Operational).await;
  assert_eq!(h.stored(StateKey::PermissionGranted).as_deref(), Some("true"));
  assert_eq!(h.destination.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn prompt_after_resolution_keeps_the_known_destination() {
  let h = Harness::start(
    MemoryStore::new(),
    FakeAttribution::returning(Ok(organic())),
    ok_destination(),
  );
  let started = tokio::time::Instant::now();
  h.send(Signal::Attribution(organic()));

  let prompt = h.expect(|p| p.permission_prompt).await;
  assert!(started.elapsed() >= Duration::from_secs(5));
  assert_eq!(prompt.mode, Mode::Setup);
  assert_eq!(prompt.destination, Some(url("https://dest.test/home")));

  h.send(Signal::PermissionResponse { granted: true });
  let shown = h.expect_mode(Mode::Operational).await;
  assert_eq!(shown.destination, Some(url("https://dest.test/home")));
  assert!(!shown.permission_prompt);

  settle().await;
  assert_eq!(h.destination.calls(), 1);
  assert_eq!(h.attribution.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn skipping_the_prompt_starts_the_cooldown() {
  let h = Harness::start(MemoryStore::new(), unused_attribution(), ok_destination());
  h.send(Signal::Attribution(non_organic()));
  h.expect(|p| p.permission_prompt).await;

  h.send(Signal::PermissionSkipped);
  h.expect_mode(Mode::Operational).await;
  assert_eq!(h.stored(StateKey::LastPermissionRequest), Some(encode_dt(now())));
  assert_eq!(h.stored(StateKey::PermissionGranted).as_deref(), Some("false"));
}

#[tokio::test(start_paused = true)]
async fn recent_skip_suppresses_the_prompt() {
  let yesterday = encode_dt(now() - chrono::Duration::days(1));
  let h = Harness::start(
    seeded(&[(StateKey::LastPermissionRequest, &yesterday)]),
    unused_attribution(),
    ok_destination(),
  );
  h.send(Signal::Attribution(non_organic()));

  let shown = h.expect_mode(Mode::Operational).await;
  assert!(!shown.permission_prompt);
}

#[tokio::test(start_paused = true)]
async fn answer_without_a_prompt_changes_nothing() {
  let h = Harness::start(granted(), unused_attribution(), ok_destination());
  h.send(Signal::PermissionResponse { granted: false });
  settle().await;
  assert_eq!(h.handle.current(), Presentation::setup());
  assert_eq!(h.destination.calls(), 0);
  assert_eq!(h.stored(StateKey::PermissionDenied).as_deref(), Some("true"));
}

// ─── Push intake ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn pushed_url_is_shown_even_from_legacy() {
  let h = Harness::start(
    seeded(&[(StateKey::AppState, "Inactive"), (StateKey::HasRunBefore, "true")]),
    unused_attribution(),
    ok_destination(),
  );
  h.send(Signal::Attribution(non_organic()));
  h.expect_mode(Mode::Legacy).await;

  let started = tokio::time::Instant::now();
  h.send(Signal::PushPayload(json!({ "data": { "url": "https://push.test/offer" } })));
  let shown = h.expect_mode(Mode::Operational).await;
  assert!(started.elapsed() >= Duration::from_secs(2));
  assert_eq!(shown.destination, Some(url("https://push.test/offer")));
  assert_eq!(h.stored(StateKey::PendingTempUrl), None);
}

#[tokio::test(start_paused = true)]
async fn pending_url_from_an_earlier_launch_is_shown_once() {
  let h = Harness::start(
    seeded(&[
      (StateKey::HasRunBefore, "true"),
      (StateKey::PermissionGranted, "true"),
      (StateKey::PendingTempUrl, "https://push.test/saved"),
    ]),
    unused_attribution(),
    ok_destination(),
  );
  h.send(Signal::Attribution(non_organic()));

  let shown = h.expect_mode(Mode::Operational).await;
  assert_eq!(shown.destination, Some(url("https://push.test/saved")));
  assert_eq!(h.stored(StateKey::PendingTempUrl), None);
  settle().await;
  assert_eq!(h.destination.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn push_token_is_sent_with_the_decision_request() {
  let h = Harness::start(granted(), unused_attribution(), ok_destination());
  h.send(Signal::PushToken("apns-token".into()));
  h.send(Signal::Attribution(non_organic()));

  h.expect_mode(Mode::Operational).await;
  assert_eq!(h.destination.last_device().push_token.as_deref(), Some("apns-token"));
  assert_eq!(h.stored(StateKey::PushToken).as_deref(), Some("apns-token"));
}

// ─── Attribution collector ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn collector_merges_conversion_with_deep_link() {
  let h = Harness::start(granted(), unused_attribution(), ok_destination());
  let collector = h.collector();
  let started = tokio::time::Instant::now();

  collector.on_conversion_success(non_organic()).await;
  collector
    .on_deep_link([("campaign", "from-link"), ("deep_link_value", "promo")].into_iter().collect())
    .await;

  h.expect_mode(Mode::Operational).await;
  assert!(started.elapsed() < Duration::from_secs(10));
  let sent = h.destination.last_record();
  assert_eq!(sent.get("campaign").and_then(|v| v.as_str()), Some("spring"));
  assert_eq!(sent.get("deep_link_value").and_then(|v| v.as_str()), Some("promo"));
  assert_eq!(h.stored(StateKey::AttributionSent).as_deref(), Some("true"));

  settle().await;
  assert_eq!(h.destination.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn collector_sends_conversion_alone_after_the_window() {
  let h = Harness::start(granted(), unused_attribution(), ok_destination());
  let collector = h.collector();
  let started = tokio::time::Instant::now();

  collector.on_conversion_success(non_organic()).await;

  h.expect_mode(Mode::Operational).await;
  assert!(started.elapsed() >= Duration::from_secs(10));
  assert_eq!(h.destination.last_record(), non_organic());
}

#[tokio::test(start_paused = true)]
async fn collector_ignores_deep_links_once_attribution_was_sent() {
  let h = Harness::start(
    seeded(&[
      (StateKey::PermissionGranted, "true"),
      (StateKey::AttributionSent, "true"),
    ]),
    unused_attribution(),
    ok_destination(),
  );
  let collector = h.collector();

  collector.on_deep_link([("deep_link_value", "promo")].into_iter().collect()).await;
  collector.on_conversion_success(non_organic()).await;

  h.expect_mode(Mode::Operational).await;
  assert_eq!(h.destination.last_record().get("deep_link_value"), None);
}

#[tokio::test(start_paused = true)]
async fn collector_reports_conversion_failure_as_empty() {
  let h = Harness::start(granted(), unused_attribution(), ok_destination());
  h.collector().on_conversion_failure("network unreachable").await;

  h.expect_mode(Mode::Legacy).await;
  assert_eq!(h.destination.calls(), 0);
}
