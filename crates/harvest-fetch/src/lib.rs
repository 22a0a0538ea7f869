//! HTTP implementations of the engine's remote sources.
//!
//! Each client performs exactly one request per call and never retries; every
//! failure is reported as a single [`FetchError`] variant.

pub mod attribution;
pub mod decision;

use std::time::Duration;

use harvest_core::source::FetchError;
use reqwest::Client;

pub use attribution::{AttributionClient, AttributionConfig};
pub use decision::{DecisionClient, DecisionConfig};

/// Upper bound on a single request, connect through body.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn http_client() -> Result<Client, FetchError> {
  Client::builder()
    .timeout(REQUEST_TIMEOUT)
    .build()
    .map_err(|e| FetchError::Build(format!("failed to build HTTP client: {e}")))
}

fn transport(e: reqwest::Error) -> FetchError { FetchError::Transport(e.to_string()) }
