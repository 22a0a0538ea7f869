//! Engine configuration.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use harvest_core::source::DeviceContext;

/// Fixed delays used by the orchestrator and the attribution collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
  /// How long a first-run organic install waits for a deep link before
  /// fetching attribution itself.
  pub organic_wait:    Duration,
  /// Delay before the cutoff gate forces `Legacy`.
  pub date_gate_delay: Duration,
  /// Delay between receiving a push URL and offering it to the orchestrator.
  pub temp_url_delay:  Duration,
  /// How long the collector waits for a deep link after conversion data.
  pub combine_window:  Duration,
}

impl Default for Timings {
  fn default() -> Self {
    Self {
      organic_wait:    Duration::from_secs(5),
      date_gate_delay: Duration::from_secs(1),
      temp_url_delay:  Duration::from_secs(2),
      combine_window:  Duration::from_secs(10),
    }
  }
}

/// The instant before which every evaluation is forced to `Legacy`.
pub fn default_cutoff() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2025, 12, 21, 0, 0, 0)
    .single()
    .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Identifiers sent with every remote request. `push_token` is refreshed
  /// from durable state before each fetch.
  pub device:  DeviceContext,
  pub timings: Timings,
  pub cutoff:  DateTime<Utc>,
}

impl EngineConfig {
  pub fn new(device: DeviceContext) -> Self {
    Self { device, timings: Timings::default(), cutoff: default_cutoff() }
  }
}
