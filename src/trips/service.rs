//! The trip planner's collections, wired to one sync context.

use std::sync::Arc;
use tracing::info;

use super::api_types::{ApiLoginRequest, ApiLoginResponse};
use super::client::RestEndpoint;
use super::types::{Activity, PackingItem, Participant, Trip};
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::net::{ApiRequest, Transport};
use crate::session::{Profile, Session, SessionStore};
use crate::sync::{Collection, CollectionOptions, ReconnectHook};

/// Cache key of the signed-in user's trip list.
pub const MY_TRIPS: &str = "mine";

pub type TripCollection<T> = Collection<Trip, RestEndpoint<Trip, T>>;
pub type ActivityCollection<T> = Collection<Activity, RestEndpoint<Activity, T>>;
pub type ParticipantCollection<T> = Collection<Participant, RestEndpoint<Participant, T>>;
pub type PackingCollection<T> = Collection<PackingItem, RestEndpoint<PackingItem, T>>;

/// Every trip collection plus sign-in. Trips are keyed by [`MY_TRIPS`]; the
/// other collections are keyed by trip id.
pub struct TripsService<T: Transport> {
  pub trips: TripCollection<T>,
  pub activities: ActivityCollection<T>,
  pub participants: ParticipantCollection<T>,
  pub packing: PackingCollection<T>,
  context: Arc<SyncContext<T>>,
}

impl<T: Transport> TripsService<T> {
  pub fn new(context: Arc<SyncContext<T>>) -> Self {
    let options = CollectionOptions {
      ttl: context.settings.cache_ttl,
      ..CollectionOptions::default()
    };
    // Removing someone from a shared trip must not wait for a reconnect
    let online_only = CollectionOptions {
      offline_deletes: false,
      ..options
    };

    Self {
      trips: collection(&context, options),
      activities: collection(&context, options),
      participants: collection(&context, online_only),
      packing: collection(&context, options),
      context,
    }
  }

  pub fn sessions(&self) -> &Arc<SessionStore> {
    &self.context.sessions
  }

  /// Exchange credentials for a session and store it.
  pub async fn login(&self, username: &str, password: &str) -> SyncResult<Session> {
    if username.trim().is_empty() || password.is_empty() {
      return Err(SyncError::Validation(
        "username and password are required".into(),
      ));
    }

    let request = ApiRequest::post(self.context.settings.login_path.as_str())
      .json(&ApiLoginRequest { username, password })?
      .unauthenticated();
    let response: ApiLoginResponse = self.context.pipeline.send(request).await?;

    let session = Session {
      access_token: response.access,
      refresh_token: response.refresh,
      profile: response.user.map(Profile::from).unwrap_or_else(|| Profile {
        username: username.to_string(),
        ..Profile::default()
      }),
    };
    self.context.sessions.set(session.clone())?;
    info!(username, "signed in");
    Ok(session)
  }

  /// Forget the session and everything cached or queued for it.
  pub fn logout(&self) -> SyncResult<()> {
    self.context.sessions.clear()?;
    self.trips.clear_local()?;
    self.activities.clear_local()?;
    self.participants.clear_local()?;
    self.packing.clear_local()?;
    info!("signed out, local data cleared");
    Ok(())
  }

  /// Collections to run when connectivity returns.
  pub fn reconnect_hooks(&self) -> Vec<Arc<dyn ReconnectHook>> {
    vec![
      Arc::new(self.trips.clone()),
      Arc::new(self.activities.clone()),
      Arc::new(self.participants.clone()),
      Arc::new(self.packing.clone()),
    ]
  }
}

fn collection<R, T>(
  context: &SyncContext<T>,
  options: CollectionOptions,
) -> Collection<R, RestEndpoint<R, T>>
where
  R: super::client::WireRecord,
  T: Transport,
{
  Collection::new(
    Arc::new(RestEndpoint::new(context.pipeline.clone())),
    context.store.clone(),
    context.ids.clone(),
    context.reachability.clone(),
    context.events.clone(),
    options,
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::SyncSettings;
  use crate::net::{HttpRequest, HttpResponse};
  use crate::store::{MemoryStore, PersistentStore};
  use crate::testing::{json_response, signed_in_session, ScriptedTransport};
  use reqwest::Method;

  fn service(
    handler: impl Fn(&HttpRequest) -> SyncResult<HttpResponse> + Send + Sync + 'static,
  ) -> (TripsService<ScriptedTransport>, Arc<SyncContext<ScriptedTransport>>) {
    let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
    let context = Arc::new(
      SyncContext::new(
        SyncSettings::for_base_url("https://api.test/v1/").unwrap(),
        store,
        Arc::new(ScriptedTransport::new(handler)),
        true,
      )
      .unwrap(),
    );
    (TripsService::new(context.clone()), context)
  }

  #[tokio::test]
  async fn test_login_stores_session_with_profile() {
    let (trips, context) = service(|request| {
      assert_eq!(request.header("authorization"), None);
      Ok(json_response(
        200,
        serde_json::json!({
          "access": "a1",
          "refresh": "r1",
          "user": {"first_name": "Ada", "last_name": "Lovelace", "username": "ada"}
        }),
      ))
    });

    let session = trips.login("ada", "secret").await.unwrap();

    assert_eq!(session, signed_in_session());
    assert_eq!(context.sessions.get(), Some(signed_in_session()));
    let calls = context.transport.calls();
    assert_eq!(calls[0].url.path(), "/v1/auth/token/");
    let body: serde_json::Value = serde_json::from_slice(calls[0].body.as_ref().unwrap()).unwrap();
    assert_eq!(body["username"], "ada");
  }

  #[tokio::test]
  async fn test_login_requires_credentials() {
    let (trips, context) = service(|_| Ok(json_response(200, serde_json::json!({}))));
    let result = trips.login("ada", "").await;
    assert!(matches!(result, Err(SyncError::Validation(_))));
    assert!(context.transport.calls().is_empty());
  }

  #[tokio::test]
  async fn test_offline_packing_item_syncs_on_reconnect() {
    let (trips, context) = service(|request| {
      assert_eq!(request.url.path(), "/v1/trips/3/packing-items/");
      assert_eq!(request.method, Method::POST);
      Ok(json_response(
        201,
        serde_json::json!({"id": 57, "trip": 3, "name": "Sunscreen", "quantity": 1, "updated_at": null}),
      ))
    });
    context.sessions.set(signed_in_session()).unwrap();
    context.reachability.set_online(false);

    let draft = PackingItem::new(3, "Sunscreen", 1);
    let created = trips.packing.create("3", draft).await.unwrap();
    assert_eq!(created.id, -1);

    context.reachability.set_online(true);
    for hook in trips.reconnect_hooks() {
      hook.on_reconnect().await;
    }

    // Offline again so the read doesn't kick off a background fetch
    context.reachability.set_online(false);
    let items = trips.packing.read("3").unwrap().data;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, 57);
    assert_eq!(trips.packing.pending_count("3").unwrap(), 0);
  }

  #[tokio::test]
  async fn test_participant_delete_is_online_only() {
    let (trips, context) = service(|_| {
      Ok(json_response(
        200,
        serde_json::json!([{"id": 4, "trip": 3, "user": {"username": "grace"}, "updated_at": null}]),
      ))
    });
    context.sessions.set(signed_in_session()).unwrap();
    trips.participants.load("3").await.unwrap();
    context.reachability.set_online(false);

    let result = trips.participants.delete("3", 4).await;

    assert_eq!(result, Err(SyncError::NetworkUnavailable));
    assert_eq!(trips.participants.read("3").unwrap().data.len(), 1);
  }

  #[tokio::test]
  async fn test_logout_clears_session_and_queues() {
    let (trips, context) = service(|_| Ok(json_response(200, serde_json::json!({}))));
    context.sessions.set(signed_in_session()).unwrap();
    context.reachability.set_online(false);
    trips
      .packing
      .create("3", PackingItem::new(3, "Hat", 1))
      .await
      .unwrap();

    trips.logout().unwrap();

    assert!(!context.sessions.is_signed_in());
    assert_eq!(trips.packing.pending_count("3").unwrap(), 0);
    assert!(context.store.keys_with_prefix("pending:").unwrap().is_empty());
  }
}
