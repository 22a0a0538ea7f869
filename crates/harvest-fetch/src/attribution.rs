//! Install-attribution lookup.
//!
//! `GET {base}/install_data/v4.0/id{app_id}?devkey={dev_key}&device_id={uid}`

use harvest_core::{
  attribution::{AttributionRecord, DeepLinkSignal},
  source::{AttributionSource, DeviceContext, FetchError},
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::{http_client, transport};

/// Static identifiers for the attribution service.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributionConfig {
  /// Scheme and host of the attribution service, e.g.
  /// `https://gcdsdk.appsflyer.com`.
  pub base_url: String,
  pub app_id:   String,
  pub dev_key:  String,
}

/// One-shot attribution fetcher.
///
/// Cheap to clone: the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct AttributionClient {
  client: Client,
  config: AttributionConfig,
}

impl AttributionClient {
  pub fn new(config: AttributionConfig) -> Result<Self, FetchError> {
    Ok(Self { client: http_client()?, config })
  }

  /// Build the lookup URL for `tracking_id`. Fails if any identifier is
  /// empty.
  pub fn request_url(&self, tracking_id: &str) -> Result<Url, FetchError> {
    let AttributionConfig { base_url, app_id, dev_key } = &self.config;
    if app_id.is_empty() || dev_key.is_empty() || tracking_id.is_empty() {
      return Err(FetchError::Build(
        "app id, dev key and tracking id are all required".into(),
      ));
    }

    let raw = format!(
      "{}/install_data/v4.0/id{app_id}",
      base_url.trim_end_matches('/')
    );
    let mut url = Url::parse(&raw)
      .map_err(|e| FetchError::Build(format!("invalid attribution url {raw:?}: {e}")))?;
    url
      .query_pairs_mut()
      .append_pair("devkey", dev_key)
      .append_pair("device_id", tracking_id);
    Ok(url)
  }
}

impl AttributionSource for AttributionClient {
  async fn fetch_attribution(
    &self,
    device: &DeviceContext,
    deep_link: &DeepLinkSignal,
  ) -> Result<AttributionRecord, FetchError> {
    let url = self.request_url(&device.tracking_id)?;
    tracing::debug!(app_id = %self.config.app_id, "requesting install attribution");

    let resp = self.client.get(url).send().await.map_err(transport)?;
    if resp.status() != StatusCode::OK {
      return Err(FetchError::Transport(format!(
        "attribution lookup → {}",
        resp.status()
      )));
    }

    let body = resp.bytes().await.map_err(transport)?;
    let value: serde_json::Value = serde_json::from_slice(&body)
      .map_err(|e| FetchError::Parse(format!("attribution body: {e}")))?;
    let serde_json::Value::Object(object) = value else {
      return Err(FetchError::Parse("attribution body is not an object".into()));
    };

    Ok(AttributionRecord::from_object(object).merged_with(deep_link))
  }
}
