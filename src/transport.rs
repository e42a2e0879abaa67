//! Outbound network transport.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use url::Url;

use crate::config::NetworkConfig;
use crate::error::FetchError;
use crate::request::{Headers, RequestDescriptor};
use crate::response::Response;

/// Performs the actual network fetch for a descriptor.
///
/// Timeouts are applied by the caller, so implementations may take as long as
/// the underlying client does.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn fetch(&self, descriptor: &RequestDescriptor) -> Result<Response, FetchError>;
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Option<Url>,
}

impl HttpTransport {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let base_url = config
      .base_url
      .as_deref()
      .map(Url::parse)
      .transpose()
      .map_err(|e| eyre!("Invalid network.base_url: {}", e))?;

    let client = reqwest::Client::builder()
      .connect_timeout(config.timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  fn resolve_url(&self, raw: &str) -> Result<Url, FetchError> {
    let invalid = |reason: String| FetchError::InvalidUrl {
      url: raw.to_string(),
      reason,
    };

    match Url::parse(raw) {
      Ok(url) => Ok(url),
      Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base_url {
        Some(base) => base.join(raw).map_err(|e| invalid(e.to_string())),
        None => Err(invalid("relative url and no network.base_url".to_string())),
      },
      Err(e) => Err(invalid(e.to_string())),
    }
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn fetch(&self, descriptor: &RequestDescriptor) -> Result<Response, FetchError> {
    let url = self.resolve_url(descriptor.url())?;
    let method = Method::from_bytes(descriptor.method().as_bytes())
      .map_err(|_| FetchError::InvalidMethod(descriptor.method().to_string()))?;
    let is_head = method == Method::HEAD;

    let mut request = self.client.request(method, url);
    for (name, value) in descriptor.headers() {
      request = request.header(name.as_str(), value.as_str());
    }

    let response = request
      .send()
      .await
      .map_err(|e| FetchError::Transport(e.to_string()))?;

    let status = response.status().as_u16();
    let mut headers = Headers::new();
    for (name, value) in response.headers() {
      let Ok(value) = value.to_str() else {
        continue;
      };
      headers
        .entry(name.as_str().to_ascii_lowercase())
        .and_modify(|existing: &mut String| {
          existing.push_str(", ");
          existing.push_str(value);
        })
        .or_insert_with(|| value.to_string());
    }

    if !carries_body(is_head, status) {
      headers.remove("content-length");
    }

    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::Transport(format!("failed to read body: {}", e)))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

/// HEAD, 1xx, 204 and 304 responses may declare a length for a body they never send.
fn carries_body(is_head: bool, status: u16) -> bool {
  !(is_head || (100..200).contains(&status) || status == 204 || status == 304)
}
