//! Request pipeline: offline gate, bearer auth, classification and one
//! refresh-and-retry cycle.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::refresh::RefreshCoordinator;
use super::request::{ApiRequest, HttpRequest, HttpResponse};
use super::transport::Transport;
use crate::error::{SyncError, SyncResult};
use crate::event::{EventBus, SyncEvent};
use crate::reachability::Reachability;
use crate::session::SessionStore;

/// Statuses that may mean "credential expired" and earn one refresh-and-retry.
const AUTH_RETRYABLE_STATUSES: [u16; 3] = [401, 403, 500];

/// Retries allowed after a successful refresh.
const MAX_AUTH_RETRIES: u32 = 1;

/// Timeouts applied to every logical call.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
  /// Bound on a single transport attempt.
  pub request: Duration,
  /// Bound on the whole call, including refresh and retry.
  pub resource: Duration,
}

impl Default for Timeouts {
  fn default() -> Self {
    Self {
      request: Duration::from_secs(30),
      resource: Duration::from_secs(60),
    }
  }
}

/// Issues API calls on behalf of every collection.
pub struct RequestPipeline<T: Transport> {
  transport: Arc<T>,
  sessions: Arc<SessionStore>,
  reachability: Arc<Reachability>,
  refresh: RefreshCoordinator<T>,
  events: EventBus,
  base_url: Url,
  timeouts: Timeouts,
}

impl<T: Transport> Clone for RequestPipeline<T> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      sessions: Arc::clone(&self.sessions),
      reachability: Arc::clone(&self.reachability),
      refresh: self.refresh.clone(),
      events: self.events.clone(),
      base_url: self.base_url.clone(),
      timeouts: self.timeouts,
    }
  }
}

impl<T: Transport> RequestPipeline<T> {
  pub fn new(
    transport: Arc<T>,
    sessions: Arc<SessionStore>,
    reachability: Arc<Reachability>,
    refresh: RefreshCoordinator<T>,
    events: EventBus,
    base_url: Url,
    timeouts: Timeouts,
  ) -> Self {
    Self {
      transport,
      sessions,
      reachability,
      refresh,
      events,
      base_url,
      timeouts,
    }
  }

  pub fn is_online(&self) -> bool {
    self.reachability.is_online()
  }

  /// Send `request` and decode the response as `R`.
  ///
  /// Use [`NoContent`](super::NoContent) for endpoints that answer 204.
  pub async fn send<R: DeserializeOwned>(&self, request: ApiRequest) -> SyncResult<R> {
    match tokio::time::timeout(self.timeouts.resource, self.send_once(&request)).await {
      Ok(result) => result,
      Err(_) => {
        warn!(method = %request.method, path = %request.path, "resource timeout exceeded");
        Err(SyncError::Transport(format!(
          "{} {} exceeded resource timeout",
          request.method, request.path
        )))
      }
    }
  }

  /// Like [`send`](Self::send), but gives up with `Cancelled` when `cancel` fires.
  pub async fn send_with_cancel<R: DeserializeOwned>(
    &self,
    request: ApiRequest,
    cancel: &CancellationToken,
  ) -> SyncResult<R> {
    tokio::select! {
      _ = cancel.cancelled() => Err(SyncError::Cancelled),
      result = self.send(request) => result,
    }
  }

  async fn send_once<R: DeserializeOwned>(&self, request: &ApiRequest) -> SyncResult<R> {
    let url = self
      .base_url
      .join(&request.path)
      .map_err(|e| SyncError::Validation(format!("invalid path '{}': {}", request.path, e)))?;

    let mut retries = 0;
    loop {
      if !self.reachability.is_online() {
        return Err(SyncError::NetworkUnavailable);
      }

      let response = self.attempt(self.resolve(request, &url)).await?;
      let outcome = decode_response::<R>(&response);

      match outcome {
        Ok(value) => return Ok(value),
        Err(err) if request.authenticated && is_auth_retryable(response.status, &err) => {
          if retries >= MAX_AUTH_RETRIES {
            warn!(
              method = %request.method,
              path = %request.path,
              status = response.status,
              "still unauthorized after refresh"
            );
            self.expire_session();
            return Err(SyncError::SessionExpired);
          }

          debug!(
            method = %request.method,
            path = %request.path,
            status = response.status,
            "auth-retryable failure, refreshing credentials"
          );
          self.refresh.refresh().await?;
          retries += 1;
        }
        Err(err) => return Err(err),
      }
    }
  }

  fn resolve(&self, request: &ApiRequest, url: &Url) -> HttpRequest {
    let mut headers = request.headers.clone();
    if request.authenticated {
      if let Some(token) = self.sessions.access_token() {
        headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
      }
    }
    HttpRequest {
      method: request.method.clone(),
      url: url.clone(),
      headers,
      body: request.body.clone(),
    }
  }

  async fn attempt(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
    let method = request.method.clone();
    let url = request.url.clone();
    match tokio::time::timeout(self.timeouts.request, self.transport.execute(request)).await {
      Ok(Ok(response)) => {
        debug!(%method, %url, status = response.status, "response received");
        Ok(response)
      }
      Ok(Err(err)) => {
        debug!(%method, %url, error = %err, "transport failure");
        Err(err)
      }
      Err(_) => Err(SyncError::Transport(format!("{} {} timed out", method, url))),
    }
  }

  fn expire_session(&self) {
    if let Err(err) = self.sessions.clear() {
      warn!(error = %err, "failed to clear expired session");
    }
    self.events.emit(SyncEvent::AuthExpired);
  }
}

/// Classify a response into a decoded value or an error.
fn decode_response<R: DeserializeOwned>(response: &HttpResponse) -> SyncResult<R> {
  if !response.is_success() {
    return Err(SyncError::Http(response.status));
  }

  let body: &[u8] = if response.is_empty() {
    b"null"
  } else {
    &response.body
  };

  serde_json::from_slice(body).map_err(|e| SyncError::Decode {
    status: response.status,
    message: e.to_string(),
  })
}

fn is_auth_retryable(status: u16, err: &SyncError) -> bool {
  AUTH_RETRYABLE_STATUSES.contains(&status)
    && matches!(err, SyncError::Http(_) | SyncError::Decode { .. })
}
