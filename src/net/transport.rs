//! HTTP transport seam.

use reqwest::header::CONTENT_TYPE;
use std::future::Future;
use std::time::Duration;

use super::request::{HttpRequest, HttpResponse};
use crate::error::{SyncError, SyncResult};

/// Executes a single HTTP exchange. Classification, auth and retries live in
/// the pipeline; a transport only reports what came back or why nothing did.
pub trait Transport: Send + Sync + 'static {
  fn execute(&self, request: HttpRequest) -> impl Future<Output = SyncResult<HttpResponse>> + Send;
}

/// `reqwest`-backed transport.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new(connect_timeout: Duration) -> SyncResult<Self> {
    let client = reqwest::Client::builder()
      .connect_timeout(connect_timeout)
      .user_agent(concat!("tripsync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| SyncError::Transport(format!("Failed to build HTTP client: {}", e)))?;
    Ok(Self { client })
  }
}

impl Transport for ReqwestTransport {
  async fn execute(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
    let mut builder = self.client.request(request.method, request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
      builder = builder.header(CONTENT_TYPE, "application/json").body(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| SyncError::Transport(e.to_string()))?;

    let status = response.status().as_u16();
    let body = response
      .bytes()
      .await
      .map_err(|e| SyncError::Transport(format!("Failed to read response body: {}", e)))?;

    Ok(HttpResponse {
      status,
      body: body.to_vec(),
    })
  }
}
