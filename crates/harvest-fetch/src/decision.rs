//! Remote destination decision.
//!
//! `POST {endpoint}` with the attribution record plus device context as a
//! flat JSON object; the server answers `{"ok": bool, "url": string}`.

use harvest_core::{
  attribution::AttributionRecord,
  evaluate::parse_destination,
  source::{DestinationSource, DeviceContext, FetchError},
};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::{http_client, transport};

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionConfig {
  /// Full URL of the decision endpoint, e.g. `https://example.com/config.php`.
  pub endpoint: String,
}

#[derive(Deserialize)]
struct DecisionResponse {
  ok:  bool,
  url: Option<String>,
}

/// One-shot destination fetcher.
#[derive(Clone)]
pub struct DecisionClient {
  client:   Client,
  endpoint: Url,
}

impl DecisionClient {
  pub fn new(config: DecisionConfig) -> Result<Self, FetchError> {
    let endpoint = Url::parse(&config.endpoint).map_err(|e| {
      FetchError::Build(format!("invalid decision endpoint {:?}: {e}", config.endpoint))
    })?;
    Ok(Self { client: http_client()?, endpoint })
  }
}

/// The request body: attribution fields first, then device context keys
/// (which overwrite any attribution key of the same name). Absent optional
/// values are omitted.
pub fn request_body(
  attribution: &AttributionRecord,
  device: &DeviceContext,
) -> serde_json::Map<String, serde_json::Value> {
  let mut body = attribution.to_json_object();
  let mut put = |key: &str, value: Option<&str>| {
    if let Some(value) = value {
      body.insert(key.to_owned(), serde_json::Value::String(value.to_owned()));
    } else {
      body.remove(key);
    }
  };
  put("os", Some(&device.platform));
  put("af_id", Some(&device.tracking_id));
  put("bundle_id", Some(&device.bundle_id));
  put("firebase_project_id", device.firebase_project_id.as_deref());
  put("store_id", Some(&device.store_id));
  put("push_token", device.push_token.as_deref());
  put("locale", Some(&device.locale));
  body
}

impl DestinationSource for DecisionClient {
  async fn fetch_destination(
    &self,
    attribution: &AttributionRecord,
    device: &DeviceContext,
  ) -> Result<Url, FetchError> {
    let body = serde_json::to_vec(&request_body(attribution, device))
      .map_err(|e| FetchError::Build(format!("serialising request body: {e}")))?;

    tracing::debug!(endpoint = %self.endpoint, "requesting destination decision");
    let resp = self
      .client
      .post(self.endpoint.clone())
      .header(reqwest::header::CONTENT_TYPE, "application/json")
      .body(body)
      .send()
      .await
      .map_err(transport)?;

    if !resp.status().is_success() {
      return Err(FetchError::Transport(format!(
        "POST {} → {}",
        self.endpoint.path(),
        resp.status()
      )));
    }

    let bytes = resp.bytes().await.map_err(transport)?;
    let decision: DecisionResponse = serde_json::from_slice(&bytes)
      .map_err(|e| FetchError::Parse(format!("decision body: {e}")))?;

    if !decision.ok {
      return Err(FetchError::Parse("decision declined (ok = false)".into()));
    }
    let raw = decision
      .url
      .ok_or_else(|| FetchError::Parse("decision has no url".into()))?;
    parse_destination(&raw)
      .ok_or_else(|| FetchError::Parse(format!("decision url is not a url: {raw:?}")))
  }
}
