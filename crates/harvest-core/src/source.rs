//! Remote sources the engine resolves against, and the device context they
//! are given.
//!
//! Implemented over HTTP by `harvest-fetch`; the engine depends only on these
//! traits.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::attribution::{AttributionRecord, DeepLinkSignal};

/// The single failure a fetch surfaces to its caller. Fetches are never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// The request could not be constructed (missing identifiers, body
  /// serialisation failure).
  #[error("cannot build request: {0}")]
  Build(String),

  /// Network failure or a non-success HTTP status.
  #[error("transport error: {0}")]
  Transport(String),

  /// The response body was not in the expected shape.
  #[error("malformed response: {0}")]
  Parse(String),
}

/// Static and cached identifiers describing this install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
  /// Platform name reported as `os`.
  pub platform:            String,
  /// The attribution SDK's device id (`af_id`).
  pub tracking_id:         String,
  pub bundle_id:           String,
  pub firebase_project_id: Option<String>,
  pub store_id:            String,
  /// Cached push token, filled in from durable state before each fetch.
  pub push_token:          Option<String>,
  /// Two-letter upper-case language code.
  pub locale:              String,
}

/// One outbound install-attribution lookup.
pub trait AttributionSource: Send + Sync {
  /// Fetch the attribution record for this device, with `deep_link` keys
  /// filling only the gaps the service left.
  fn fetch_attribution<'a>(
    &'a self,
    device: &'a DeviceContext,
    deep_link: &'a DeepLinkSignal,
  ) -> impl Future<Output = Result<AttributionRecord, FetchError>> + Send + 'a;
}

/// One outbound destination decision.
pub trait DestinationSource: Send + Sync {
  /// Post `attribution` plus `device` to the decision endpoint and return the
  /// destination it grants.
  fn fetch_destination<'a>(
    &'a self,
    attribution: &'a AttributionRecord,
    device: &'a DeviceContext,
  ) -> impl Future<Output = Result<Url, FetchError>> + Send + 'a;
}
