//! The notification-permission gate.
//!
//! Both a grant and a denial are terminal: the user is never asked again.
//! A skip only starts a cooldown.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Minimum time between two prompts after a skip (3 days).
pub const PROMPT_COOLDOWN: Duration = Duration::seconds(259_200);

/// Persisted permission answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionState {
  pub granted:         bool,
  pub denied:          bool,
  pub last_request_at: Option<DateTime<Utc>>,
}

impl PermissionState {
  /// Whether the prompt should be shown at `now`.
  pub fn should_prompt(&self, now: DateTime<Utc>) -> bool {
    if self.granted || self.denied {
      return false;
    }
    match self.last_request_at {
      Some(at) => now.signed_duration_since(at) >= PROMPT_COOLDOWN,
      None => true,
    }
  }

  /// The user dismissed the prompt without answering.
  pub fn record_skip(&mut self, now: DateTime<Utc>) {
    self.last_request_at = Some(now);
  }

  /// The user answered the system dialog.
  pub fn record_response(&mut self, granted: bool) {
    self.granted = granted;
    if !granted {
      self.denied = true;
    }
  }
}
