//! Request and response descriptors.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SyncError, SyncResult};

/// One logical API call, relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
  /// Attach the bearer token and take part in refresh-and-retry.
  pub authenticated: bool,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      headers: Vec::new(),
      body: None,
      authenticated: true,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::GET, path)
  }

  pub fn post(path: impl Into<String>) -> Self {
    Self::new(Method::POST, path)
  }

  pub fn patch(path: impl Into<String>) -> Self {
    Self::new(Method::PATCH, path)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::DELETE, path)
  }

  /// Serialize `body` as the JSON request body.
  pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> SyncResult<Self> {
    let bytes = serde_json::to_vec(body)
      .map_err(|e| SyncError::Validation(format!("request body not serializable: {}", e)))?;
    self.body = Some(bytes);
    Ok(self)
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Skip the bearer token (sign-in, public endpoints).
  pub fn unauthenticated(mut self) -> Self {
    self.authenticated = false;
    self
  }
}

/// Fully resolved request handed to a transport.
#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl HttpRequest {
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// 204 or a body with nothing but whitespace.
  pub fn is_empty(&self) -> bool {
    self.status == 204 || self.body.iter().all(u8::is_ascii_whitespace)
  }
}

/// Response marker for endpoints that answer 204 / empty body.
///
/// Decodes from JSON `null`, which is what an empty body is decoded as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct NoContent;
