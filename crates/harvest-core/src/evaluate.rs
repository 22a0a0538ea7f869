//! The mode evaluator: a pure function from current signals to a target mode.

use url::Url;

use crate::{
  attribution::AttributionRecord,
  mode::{AppState, Mode},
};

/// Everything the evaluator looks at. Borrowed so callers can build it from
/// orchestrator state without cloning.
#[derive(Debug, Clone, Copy)]
pub struct Signals<'a> {
  pub attribution:      &'a AttributionRecord,
  pub app_state:        Option<AppState>,
  pub is_first_run:     bool,
  pub current_url:      Option<&'a Url>,
  pub pending_temp_url: Option<&'a str>,
}

/// Compute the target mode. Rule order is significant:
///
/// 1. empty attribution → `Legacy`
/// 2. sticky inactive app state → `Legacy`
/// 3. first run with organic status → `Setup` (wait for a deep link)
/// 4. valid pending temp URL and no current URL → `Operational`
/// 5. otherwise → `Setup` (fetch the server config)
pub fn evaluate(signals: &Signals<'_>) -> Mode {
  if signals.attribution.is_empty() {
    return Mode::Legacy;
  }
  if signals.app_state == Some(AppState::Inactive) {
    return Mode::Legacy;
  }
  if signals.is_first_run && signals.attribution.is_organic() {
    return Mode::Setup;
  }
  if signals.current_url.is_none()
    && signals.pending_temp_url.and_then(parse_destination).is_some()
  {
    return Mode::Operational;
  }
  Mode::Setup
}

/// Parse a destination URL, rejecting blank or relative strings.
pub fn parse_destination(raw: &str) -> Option<Url> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }
  Url::parse(trimmed).ok()
}
