//! Process-wide services, built once at startup and shared by handle.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{SyncError, SyncResult};
use crate::event::EventBus;
use crate::net::{RefreshCoordinator, RefreshPolicy, RequestPipeline, Timeouts, Transport};
use crate::reachability::Reachability;
use crate::session::SessionStore;
use crate::store::PersistentStore;
use crate::sync::{SyncEngine, TempIdAllocator};

/// Resolved settings for one API.
#[derive(Debug, Clone)]
pub struct SyncSettings {
  /// Must end with `/` so relative paths join under it
  pub base_url: Url,
  pub login_path: String,
  pub refresh_path: String,
  pub timeouts: Timeouts,
  pub refresh_policy: RefreshPolicy,
  pub cache_ttl: chrono::Duration,
  pub reconnect_debounce: Duration,
}

impl SyncSettings {
  /// Defaults for everything except the API location.
  pub fn for_base_url(base_url: &str) -> SyncResult<Self> {
    let mut base_url = Url::parse(base_url)
      .map_err(|e| SyncError::Validation(format!("invalid base URL '{}': {}", base_url, e)))?;
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    Ok(Self {
      base_url,
      login_path: "auth/token/".to_string(),
      refresh_path: "auth/token/refresh/".to_string(),
      timeouts: Timeouts::default(),
      refresh_policy: RefreshPolicy::default(),
      cache_ttl: chrono::Duration::seconds(300),
      reconnect_debounce: Duration::from_secs(5),
    })
  }

  pub fn refresh_url(&self) -> SyncResult<Url> {
    self.base_url.join(&self.refresh_path).map_err(|e| {
      SyncError::Validation(format!("invalid refresh path '{}': {}", self.refresh_path, e))
    })
  }
}

/// Owns the session, reachability, refresh coordinator and request pipeline
/// so every collection shares the same ones.
pub struct SyncContext<T: Transport> {
  pub settings: SyncSettings,
  pub store: Arc<dyn PersistentStore>,
  pub transport: Arc<T>,
  pub sessions: Arc<SessionStore>,
  pub reachability: Arc<Reachability>,
  pub events: EventBus,
  pub ids: Arc<TempIdAllocator>,
  pub refresh: RefreshCoordinator<T>,
  pub pipeline: RequestPipeline<T>,
}

impl<T: Transport> SyncContext<T> {
  pub fn new(
    settings: SyncSettings,
    store: Arc<dyn PersistentStore>,
    transport: Arc<T>,
    online: bool,
  ) -> SyncResult<Self> {
    let events = EventBus::default();
    let sessions = Arc::new(SessionStore::load(store.clone())?);
    let ids = Arc::new(TempIdAllocator::load(store.clone())?);
    let reachability = Arc::new(Reachability::new(online, events.clone()));

    let refresh = RefreshCoordinator::new(
      transport.clone(),
      sessions.clone(),
      reachability.clone(),
      events.clone(),
      settings.refresh_url()?,
      settings.timeouts.request,
      settings.refresh_policy,
    );
    let pipeline = RequestPipeline::new(
      transport.clone(),
      sessions.clone(),
      reachability.clone(),
      refresh.clone(),
      events.clone(),
      settings.base_url.clone(),
      settings.timeouts,
    );

    debug!(
      base_url = %settings.base_url,
      online,
      signed_in = sessions.is_signed_in(),
      "sync context ready"
    );

    Ok(Self {
      settings,
      store,
      transport,
      sessions,
      reachability,
      events,
      ids,
      refresh,
      pipeline,
    })
  }

  /// A reconnect engine following this context's reachability.
  pub fn engine(&self) -> SyncEngine {
    SyncEngine::new(self.reachability.clone(), self.settings.reconnect_debounce)
  }
}
