//! Credential holder for the signed-in user.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};
use crate::store::{PersistentStore, StoreError, StoreExt};

const SESSION_KEY: &str = "session";

/// Profile fields kept next to the tokens for offline display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
  #[serde(default)]
  pub first_name: String,
  #[serde(default)]
  pub last_name: String,
  #[serde(default)]
  pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
  pub access_token: String,
  pub refresh_token: Option<String>,
  #[serde(default)]
  pub profile: Profile,
}

/// Process-wide session, mirrored to the persistent store.
///
/// Readers always see both tokens from the same refresh; writers replace the
/// whole session under one lock.
pub struct SessionStore {
  store: Arc<dyn PersistentStore>,
  current: RwLock<Option<Session>>,
}

impl SessionStore {
  /// Load the persisted session, if any.
  pub fn load(store: Arc<dyn PersistentStore>) -> SyncResult<Self> {
    let current: Option<Session> = store.get_json(SESSION_KEY)?;
    debug!(signed_in = current.is_some(), "session loaded");
    Ok(Self {
      store,
      current: RwLock::new(current),
    })
  }

  pub fn get(&self) -> Option<Session> {
    self
      .current
      .read()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
      .clone()
  }

  pub fn access_token(&self) -> Option<String> {
    self.get().map(|s| s.access_token)
  }

  pub fn refresh_token(&self) -> Option<String> {
    self.get().and_then(|s| s.refresh_token)
  }

  pub fn is_signed_in(&self) -> bool {
    self.get().is_some()
  }

  /// Replace the session (sign-in).
  pub fn set(&self, session: Session) -> SyncResult<()> {
    let mut current = self.current.write().map_err(|_| StoreError::LockPoisoned)?;
    self.store.set_json(SESSION_KEY, &session)?;
    info!(username = %session.profile.username, "session stored");
    *current = Some(session);
    Ok(())
  }

  /// Swap both tokens in one step, keeping the profile. A missing rotated
  /// refresh token keeps the previous one.
  ///
  /// Fails with `SessionExpired` if the session was cleared in the meantime;
  /// only sign-in creates a session.
  pub fn update_tokens(
    &self,
    access_token: String,
    refresh_token: Option<String>,
  ) -> SyncResult<Session> {
    let mut current = self.current.write().map_err(|_| StoreError::LockPoisoned)?;
    let Some(previous) = current.as_ref() else {
      debug!("session cleared while refreshing, dropping new tokens");
      return Err(SyncError::SessionExpired);
    };
    let session = Session {
      access_token,
      refresh_token: refresh_token.or_else(|| previous.refresh_token.clone()),
      profile: previous.profile.clone(),
    };
    self.store.set_json(SESSION_KEY, &session)?;
    *current = Some(session.clone());
    Ok(session)
  }

  /// Drop the session (logout or expiry).
  pub fn clear(&self) -> SyncResult<()> {
    let mut current = self.current.write().map_err(|_| StoreError::LockPoisoned)?;
    self.store.delete(SESSION_KEY)?;
    if current.take().is_some() {
      info!("session cleared");
    }
    Ok(())
  }
}
