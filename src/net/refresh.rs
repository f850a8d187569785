//! Single-flight access token refresh.

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::request::HttpRequest;
use super::transport::Transport;
use crate::error::{SyncError, SyncResult};
use crate::event::{EventBus, SyncEvent};
use crate::reachability::Reachability;
use crate::session::{Session, SessionStore};

/// What a caller does when a refresh is already running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
  /// Join the running refresh and share its result.
  #[default]
  Await,
  /// Fail with `RefreshInProgress` without touching the network.
  FailFast,
}

/// Token pair returned by the sign-in and refresh endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
  pub access: String,
  #[serde(default)]
  pub refresh: Option<String>,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
  refresh: &'a str,
}

type RefreshFuture = Shared<BoxFuture<'static, SyncResult<Session>>>;

struct InFlight {
  generation: u64,
  future: WeakShared<BoxFuture<'static, SyncResult<Session>>>,
}

struct Inner<T> {
  transport: Arc<T>,
  sessions: Arc<SessionStore>,
  reachability: Arc<Reachability>,
  events: EventBus,
  refresh_url: Url,
  request_timeout: Duration,
  policy: RefreshPolicy,
  in_flight: Mutex<Option<InFlight>>,
  generations: AtomicU64,
}

fn lock_slot(slot: &Mutex<Option<InFlight>>) -> MutexGuard<'_, Option<InFlight>> {
  slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears the in-flight slot when the refresh future finishes or is dropped.
struct FlightGuard<T> {
  inner: Arc<Inner<T>>,
  generation: u64,
}

impl<T> Drop for FlightGuard<T> {
  fn drop(&mut self) {
    let mut slot = lock_slot(&self.inner.in_flight);
    if slot.as_ref().map(|f| f.generation) == Some(self.generation) {
      *slot = None;
    }
  }
}

/// Shares one token refresh between every request that needs it.
pub struct RefreshCoordinator<T: Transport> {
  inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for RefreshCoordinator<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Transport> RefreshCoordinator<T> {
  pub fn new(
    transport: Arc<T>,
    sessions: Arc<SessionStore>,
    reachability: Arc<Reachability>,
    events: EventBus,
    refresh_url: Url,
    request_timeout: Duration,
    policy: RefreshPolicy,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        transport,
        sessions,
        reachability,
        events,
        refresh_url,
        request_timeout,
        policy,
        in_flight: Mutex::new(None),
        generations: AtomicU64::new(0),
      }),
    }
  }

  pub fn policy(&self) -> RefreshPolicy {
    self.inner.policy
  }

  /// Whether a refresh call is currently outstanding.
  pub fn is_refreshing(&self) -> bool {
    // The upgraded handle must outlive the slot guard.
    let running = lock_slot(&self.inner.in_flight)
      .as_ref()
      .and_then(|f| f.future.upgrade());
    running.is_some()
  }

  /// Refresh the session, or join / reject against one already running.
  pub async fn refresh(&self) -> SyncResult<Session> {
    let (flight, joined): (RefreshFuture, bool) = {
      let mut slot = lock_slot(&self.inner.in_flight);
      match slot.as_ref().and_then(|f| f.future.upgrade()) {
        Some(running) => (running, true),
        None => {
          let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
          let inner = Arc::clone(&self.inner);
          let future = async move {
            let _guard = FlightGuard {
              inner: Arc::clone(&inner),
              generation,
            };
            inner.perform().await
          }
          .boxed()
          .shared();

          *slot = future.downgrade().map(|weak| InFlight {
            generation,
            future: weak,
          });
          (future, false)
        }
      }
    };

    if joined {
      if self.inner.policy == RefreshPolicy::FailFast {
        debug!("token refresh already in flight, failing fast");
        drop(flight);
        return Err(SyncError::RefreshInProgress);
      }
      debug!("joining in-flight token refresh");
    }

    flight.await
  }
}

impl<T: Transport> Inner<T> {
  async fn perform(&self) -> SyncResult<Session> {
    if !self.reachability.is_online() {
      return Err(SyncError::NetworkUnavailable);
    }

    let Some(refresh_token) = self.sessions.refresh_token() else {
      warn!("no refresh token available");
      self.expire();
      return Err(SyncError::SessionExpired);
    };

    info!("refreshing access token");
    let body = serde_json::to_vec(&RefreshBody {
      refresh: &refresh_token,
    })
    .map_err(|e| SyncError::Validation(e.to_string()))?;

    let request = HttpRequest {
      method: Method::POST,
      url: self.refresh_url.clone(),
      headers: Vec::new(),
      body: Some(body),
    };

    let outcome = match tokio::time::timeout(self.request_timeout, self.transport.execute(request))
      .await
    {
      Ok(result) => result,
      Err(_) => Err(SyncError::Transport("token refresh timed out".into())),
    };

    let tokens = outcome.and_then(|response| {
      if !response.is_success() {
        return Err(SyncError::Http(response.status));
      }
      serde_json::from_slice::<TokenPair>(&response.body).map_err(|e| SyncError::Decode {
        status: response.status,
        message: e.to_string(),
      })
    });

    match tokens {
      Ok(pair) => {
        let session = self.sessions.update_tokens(pair.access, pair.refresh)?;
        info!("access token refreshed");
        Ok(session)
      }
      Err(err) => {
        warn!(error = %err, "token refresh failed");
        self.expire();
        Err(SyncError::SessionExpired)
      }
    }
  }

  fn expire(&self) {
    if let Err(err) = self.sessions.clear() {
      warn!(error = %err, "failed to clear expired session");
    }
    self.events.emit(SyncEvent::AuthExpired);
  }
}
