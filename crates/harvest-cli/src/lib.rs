//! Configuration and stdin protocol for the `harvestd` binary.

use std::{path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};
use harvest_core::{
  attribution::{AttributionRecord, DeepLinkSignal},
  source::DeviceContext,
};
use harvest_engine::{EngineConfig, Signal, Timings, config::default_cutoff};
use harvest_fetch::{AttributionConfig, DecisionConfig};
use serde::Deserialize;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Top-level settings, read from `config.toml` and `HARVEST_*` variables.
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
  #[serde(default = "default_store_path")]
  pub store_path:          PathBuf,
  pub attribution:         AttributionConfig,
  pub decision:            DecisionConfig,
  /// The attribution SDK's device id.
  pub tracking_id:         String,
  pub bundle_id:           String,
  #[serde(default)]
  pub firebase_project_id: Option<String>,
  /// Defaults to `id{app_id}`.
  #[serde(default)]
  pub store_id:            Option<String>,
  #[serde(default = "default_platform")]
  pub platform:            String,
  /// Defaults to the language part of `LANG`.
  #[serde(default)]
  pub locale:              Option<String>,
  #[serde(default = "default_cutoff")]
  pub cutoff:              DateTime<Utc>,
  #[serde(default)]
  pub timings:             TimingOverrides,
}

fn default_store_path() -> PathBuf { PathBuf::from("harvest.db") }

fn default_platform() -> String { "iOS".to_owned() }

/// Optional per-timer overrides, in whole seconds.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TimingOverrides {
  pub organic_wait_secs:    Option<u64>,
  pub date_gate_delay_secs: Option<u64>,
  pub temp_url_delay_secs:  Option<u64>,
  pub combine_window_secs:  Option<u64>,
}

impl TimingOverrides {
  pub fn apply(self, base: Timings) -> Timings {
    let or = |secs: Option<u64>, default: Duration| {
      secs.map(Duration::from_secs).unwrap_or(default)
    };
    Timings {
      organic_wait:    or(self.organic_wait_secs, base.organic_wait),
      date_gate_delay: or(self.date_gate_delay_secs, base.date_gate_delay),
      temp_url_delay:  or(self.temp_url_delay_secs, base.temp_url_delay),
      combine_window:  or(self.combine_window_secs, base.combine_window),
    }
  }
}

impl HarvestConfig {
  pub fn device(&self) -> DeviceContext {
    DeviceContext {
      platform:            self.platform.clone(),
      tracking_id:         self.tracking_id.clone(),
      bundle_id:           self.bundle_id.clone(),
      firebase_project_id: self.firebase_project_id.clone(),
      store_id:            self
        .store_id
        .clone()
        .unwrap_or_else(|| format!("id{}", self.attribution.app_id)),
      push_token:          None,
      locale:              self.locale.clone().unwrap_or_else(|| {
        locale_from_lang(std::env::var("LANG").ok().as_deref())
      }),
    }
  }

  pub fn engine_config(&self) -> EngineConfig {
    EngineConfig {
      device:  self.device(),
      timings: self.timings.apply(Timings::default()),
      cutoff:  self.cutoff,
    }
  }
}

/// Two-letter upper-case language code from a POSIX locale such as
/// `de_DE.UTF-8`. Falls back to `EN`.
pub fn locale_from_lang(lang: Option<&str>) -> String {
  lang
    .and_then(|lang| lang.get(..2))
    .filter(|code| code.chars().all(|c| c.is_ascii_alphabetic()))
    .map(str::to_ascii_uppercase)
    .unwrap_or_else(|| "EN".to_owned())
}

// ─── Stdin protocol ──────────────────────────────────────────────────────────

/// SDK callbacks routed through the attribution collector rather than
/// straight to the engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CollectorInput {
  Conversion(AttributionRecord),
  ConversionFailed(String),
  DeepLinkFound(DeepLinkSignal),
}

/// One line of newline-delimited JSON on stdin.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Input {
  Collector(CollectorInput),
  Signal(Signal),
}
