//! Network boundary for the cache layer.
//!
//! The cache talks to the backend through the [`Transport`] trait so tests
//! can substitute a mock that counts requests. The real implementation,
//! [`HttpTransport`], sends JSON bodies with reqwest. Successful responses
//! arrive as `{ "data": T }` envelopes; unwrapping happens in the cache
//! layer, the transport returns the raw body.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use url::Url;

/// A boxed future, the shape transport implementations return.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Transport-level failure: HTTP error status or a connection problem.
///
/// Cloneable so it can live inside a cache entry and be handed to every
/// subscriber that wants to render the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
  /// HTTP status code, when the server answered at all.
  pub status: Option<u16>,
  pub message: String,
}

impl FetchError {
  pub fn transport(message: impl Into<String>) -> Self {
    Self {
      status: None,
      message: message.into(),
    }
  }

  pub fn http(status: u16, message: impl Into<String>) -> Self {
    Self {
      status: Some(status),
      message: message.into(),
    }
  }
}

impl std::fmt::Display for FetchError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.status {
      Some(code) => write!(f, "HTTP {}: {}", code, self.message),
      None => write!(f, "{}", self.message),
    }
  }
}

impl std::error::Error for FetchError {}

/// One request handed to a transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
  /// Endpoint path relative to the API base, e.g. `orders/search`.
  pub endpoint: String,
  /// JSON arguments; sent as the request body.
  pub args: Value,
}

/// Trait for network backends.
///
/// `query` is a read, `mutate` a write; both resolve to the raw JSON
/// response body or a [`FetchError`].
pub trait Transport: Send + Sync + 'static {
  fn query(&self, req: TransportRequest) -> BoxFuture<Result<Value, FetchError>>;

  fn mutate(&self, req: TransportRequest) -> BoxFuture<Result<Value, FetchError>>;
}

/// Successful response envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
  data: Value,
}

/// Unwrap a `{ "data": T }` envelope, returning the inner payload.
pub(crate) fn unwrap_envelope(body: Value) -> Result<Value, FetchError> {
  serde_json::from_value::<Envelope>(body)
    .map(|e| e.data)
    .map_err(|e| FetchError::transport(format!("malformed response envelope: {}", e)))
}

/// HTTP transport over reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  /// Create a transport rooted at `base_url`. The URL must end with a
  /// trailing slash for relative endpoint joins to behave.
  pub fn new(base_url: &str) -> Result<Self> {
    let normalized = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{}/", base_url)
    };
    let base_url =
      Url::parse(&normalized).map_err(|e| eyre!("Invalid base URL {}: {}", base_url, e))?;

    Ok(Self {
      client: reqwest::Client::new(),
      base_url,
    })
  }

  fn post_json(&self, req: TransportRequest) -> BoxFuture<Result<Value, FetchError>> {
    let client = self.client.clone();
    let url = self.base_url.join(&req.endpoint);

    Box::pin(async move {
      let url = url.map_err(|e| FetchError::transport(format!("invalid endpoint: {}", e)))?;

      let response = client
        .post(url)
        .json(&req.args)
        .send()
        .await
        .map_err(|e| FetchError::transport(e.to_string()))?;

      let status = response.status();
      if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::http(status.as_u16(), body));
      }

      response
        .json::<Value>()
        .await
        .map_err(|e| FetchError::transport(format!("invalid JSON response: {}", e)))
    })
  }
}

impl Transport for HttpTransport {
  fn query(&self, req: TransportRequest) -> BoxFuture<Result<Value, FetchError>> {
    self.post_json(req)
  }

  fn mutate(&self, req: TransportRequest) -> BoxFuture<Result<Value, FetchError>> {
    self.post_json(req)
  }
}
