//! Operating modes and the presentation snapshot published to the UI layer.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use url::Url;

/// The mutually exclusive operating modes the application can present.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
  /// Bootstrap phase while attribution and config resolution are in flight.
  #[default]
  Setup,
  /// A destination URL is known; the web-content host should display it.
  Operational,
  /// Resolution failed or was disabled; the native inventory UI renders.
  Legacy,
  /// Connectivity dropped during an operational session.
  Disconnected,
}

/// The persisted app-state marker. `None` in storage means "unset".
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString, Serialize, Deserialize,
)]
pub enum AppState {
  /// A destination was resolved at least once.
  #[strum(serialize = "HarvestView")]
  #[serde(rename = "HarvestView")]
  Active,
  /// Sticky legacy: every later launch goes straight to [`Mode::Legacy`].
  #[strum(serialize = "Inactive")]
  Inactive,
}

/// What the presentation layer should render right now.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Presentation {
  pub mode:              Mode,
  pub destination:       Option<Url>,
  /// `true` while the user is being asked for notification permission. The
  /// mode stays [`Mode::Setup`] and `destination` may already be known.
  pub permission_prompt: bool,
}

impl Presentation {
  pub fn setup() -> Self { Self::default() }

  pub fn operational(destination: Url) -> Self {
    Self {
      mode:              Mode::Operational,
      destination:       Some(destination),
      permission_prompt: false,
    }
  }

  pub fn legacy() -> Self {
    Self { mode: Mode::Legacy, destination: None, permission_prompt: false }
  }

  pub fn awaiting_permission(destination: Option<Url>) -> Self {
    Self { mode: Mode::Setup, destination, permission_prompt: true }
  }
}
