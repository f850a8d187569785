//! Error taxonomy shared by every layer of the sync core.

use crate::store::StoreError;

/// Failure of a logical sync operation.
///
/// `Clone` so that a single in-flight token refresh can hand the same outcome
/// to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
  /// Reachability reported offline; no network call was attempted.
  #[error("network unavailable")]
  NetworkUnavailable,

  /// DNS, connection, or timeout failure.
  #[error("transport error: {0}")]
  Transport(String),

  /// Non-2xx response that is not auth-retryable.
  #[error("HTTP error {0}")]
  Http(u16),

  /// The body did not match the expected shape.
  #[error("failed to decode response (HTTP {status}): {message}")]
  Decode { status: u16, message: String },

  /// Credentials could not be refreshed; the user must sign in again.
  #[error("session expired")]
  SessionExpired,

  /// Caller-supplied data rejected before any network call.
  #[error("validation failed: {0}")]
  Validation(String),

  /// Another token refresh is running and the fail-fast policy is active.
  #[error("token refresh already in progress")]
  RefreshInProgress,

  /// The caller cancelled the request.
  #[error("request cancelled")]
  Cancelled,

  #[error("storage error: {0}")]
  Storage(String),
}

impl SyncError {
  /// Errors that mean "the server was not reached", which defer a mutation to
  /// the pending queue instead of rolling it back.
  pub fn is_connectivity(&self) -> bool {
    matches!(self, SyncError::NetworkUnavailable | SyncError::Transport(_))
  }

  /// Errors after which replaying further operations is pointless.
  pub fn aborts_replay(&self) -> bool {
    matches!(
      self,
      SyncError::NetworkUnavailable | SyncError::SessionExpired | SyncError::Cancelled
    )
  }

  /// HTTP status carried by the error, if any.
  pub fn status(&self) -> Option<u16> {
    match self {
      SyncError::Http(code) => Some(*code),
      SyncError::Decode { status, .. } => Some(*status),
      _ => None,
    }
  }
}

impl From<StoreError> for SyncError {
  fn from(err: StoreError) -> Self {
    SyncError::Storage(err.to_string())
  }
}

pub type SyncResult<T> = Result<T, SyncError>;
