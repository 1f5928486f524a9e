use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use tracing::{debug, warn};
use url::Url;

use super::api_types::{ApiBatchRequest, ApiBatchResponse, ApiLikeStatus, ApiToggleResponse};
use super::{CheckOptions, CounterService, RemoteStatus, ToggleResponse};
use crate::config::{Config, ServiceConfig};

/// Counter service client over HTTP/JSON.
#[derive(Clone)]
pub struct HttpCounterService {
  client: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl HttpCounterService {
  pub fn new(config: &ServiceConfig) -> Result<Self> {
    let base = Url::parse(&config.url)
      .map_err(|e| eyre!("Invalid counter service URL {}: {}", config.url, e))?;
    if base.cannot_be_a_base() {
      return Err(eyre!("Counter service URL {} cannot be a base", config.url));
    }

    let client = reqwest::Client::builder()
      .timeout(config.timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      token: Config::get_api_token(),
    })
  }

  /// Append path segments to the base URL, percent-encoding each one.
  fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  async fn fetch_status(&self, url: Url, entity_id: &str) -> Result<Option<RemoteStatus>> {
    let response = self
      .authorize(self.client.get(url))
      .send()
      .await
      .map_err(|e| eyre!("Failed to check like status for {}: {}", entity_id, e))?;

    if response.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }

    let body: ApiLikeStatus = response
      .error_for_status()
      .map_err(|e| eyre!("Like status for {} rejected: {}", entity_id, e))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse like status for {}: {}", entity_id, e))?;

    Ok(Some(body.into_status()))
  }

  fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }
}

#[async_trait]
impl CounterService for HttpCounterService {
  async fn check_status(
    &self,
    entity_id: &str,
    options: CheckOptions,
  ) -> Result<Option<RemoteStatus>> {
    let mut url = self.endpoint(&["likes", entity_id]);
    if options.force_refresh {
      url.query_pairs_mut().append_pair("force_refresh", "true");
    }

    let result = self.fetch_status(url, entity_id).await;

    if let Err(e) = &result {
      if options.silent {
        debug!(entity_id, error = %e, "status check failed");
      } else {
        warn!(entity_id, error = %e, "status check failed");
      }
    }
    result
  }

  async fn check_status_batch(&self, entity_ids: &[String]) -> Result<Vec<RemoteStatus>> {
    if entity_ids.is_empty() {
      return Ok(Vec::new());
    }

    let url = self.endpoint(&["likes", "batch"]);
    let response: ApiBatchResponse = self
      .authorize(self.client.post(url))
      .json(&ApiBatchRequest { entity_ids })
      .send()
      .await
      .map_err(|e| eyre!("Failed to check batch like status: {}", e))?
      .error_for_status()
      .map_err(|e| eyre!("Batch like status rejected: {}", e))?
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse batch like status: {}", e))?;

    Ok(
      response
        .statuses
        .into_iter()
        .map(ApiLikeStatus::into_status)
        .collect(),
    )
  }

  async fn toggle(&self, entity_id: &str) -> Result<ToggleResponse> {
    let url = self.endpoint(&["likes", entity_id, "toggle"]);
    let response = self
      .authorize(self.client.post(url))
      .send()
      .await
      .map_err(|e| eyre!("Failed to toggle like for {}: {}", entity_id, e))?;

    // Error bodies usually still carry {success: false, error}
    let status = response.status();
    match response.json::<ApiToggleResponse>().await {
      Ok(body) => Ok(body.into()),
      Err(e) if status.is_success() => {
        Err(eyre!("Failed to parse toggle response for {}: {}", entity_id, e))
      }
      Err(_) => Err(eyre!("Toggle for {} rejected with HTTP {}", entity_id, status)),
    }
  }
}
