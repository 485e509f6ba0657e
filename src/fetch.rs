//! HTTP access for the page agent. Strategies only see the `Fetcher` trait.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::constants::constants;
use crate::error::{CaptionError, CaptionResult};

#[async_trait]
pub trait Fetcher: Send + Sync {
  /// GET `url` and return the body as text.
  async fn get_text(&self, url: &str) -> CaptionResult<String>;

  /// POST a JSON body to `url` and return the decoded JSON response.
  async fn post_json(&self, url: &str, body: &serde_json::Value) -> CaptionResult<serde_json::Value>;
}

/// `reqwest`-backed fetcher sending browser-like headers.
#[derive(Clone)]
pub struct HttpFetcher {
  client: Client,
}

impl HttpFetcher {
  pub fn new() -> anyhow::Result<Self> {
    let c = constants();
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(reqwest::header::ACCEPT_LANGUAGE, c.accept_language.parse()?);
    let client = Client::builder()
      .user_agent(c.user_agent.as_str())
      .default_headers(headers)
      .timeout(Duration::from_millis(c.http_timeout_ms))
      .build()?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn get_text(&self, url: &str) -> CaptionResult<String> {
    debug!(url = %url, "fetch: GET");
    let response = self.client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
      return Err(CaptionError::FetchFailed(format!("GET {} returned {}", url, status)));
    }
    Ok(response.text().await?)
  }

  async fn post_json(&self, url: &str, body: &serde_json::Value) -> CaptionResult<serde_json::Value> {
    debug!(url = %url, "fetch: POST");
    let response = self.client.post(url).json(body).send().await?;
    let status = response.status();
    if !status.is_success() {
      return Err(CaptionError::FetchFailed(format!("POST {} returned {}", url, status)));
    }
    response.json().await.map_err(|e| CaptionError::fetch("invalid JSON response", e))
  }
}
