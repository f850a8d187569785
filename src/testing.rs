//! Fakes shared by the unit tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::cache::Record;
use crate::error::{SyncError, SyncResult};
use crate::event::EventBus;
use crate::net::{
  HttpRequest, HttpResponse, RefreshCoordinator, RefreshPolicy, RequestPipeline, Timeouts,
  Transport,
};
use crate::reachability::Reachability;
use crate::session::{Profile, Session, SessionStore};
use crate::store::{MemoryStore, PersistentStore};
use crate::sync::RemoteCollection;

/// Minimal record with one local-only field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
  pub id: i64,
  pub name: String,
  pub quantity: u32,
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub thumbnail: Option<Vec<u8>>,
}

impl Item {
  pub fn new(id: i64, name: &str) -> Self {
    Self {
      id,
      name: name.to_string(),
      quantity: 1,
      updated_at: None,
      thumbnail: None,
    }
  }
}

impl Record for Item {
  fn id(&self) -> i64 {
    self.id
  }

  fn set_id(&mut self, id: i64) {
    self.id = id;
  }

  fn updated_at(&self) -> Option<DateTime<Utc>> {
    self.updated_at
  }

  fn collection() -> &'static str {
    "item"
  }

  fn validate(&self) -> Result<(), String> {
    if self.name.trim().is_empty() {
      return Err("name must not be empty".into());
    }
    Ok(())
  }

  fn carry_local_fields(&mut self, previous: &Self) {
    if self.thumbnail.is_none() {
      self.thumbnail = previous.thumbnail.clone();
    }
  }
}

type Handler = dyn Fn(&HttpRequest) -> SyncResult<HttpResponse> + Send + Sync;

/// Transport answering from a closure and recording every request.
pub struct ScriptedTransport {
  handler: Box<Handler>,
  delay: Duration,
  calls: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
  pub fn new(
    handler: impl Fn(&HttpRequest) -> SyncResult<HttpResponse> + Send + Sync + 'static,
  ) -> Self {
    Self {
      handler: Box::new(handler),
      delay: Duration::ZERO,
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn calls(&self) -> Vec<HttpRequest> {
    self.calls.lock().unwrap().clone()
  }
}

impl Transport for ScriptedTransport {
  async fn execute(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
    self.calls.lock().unwrap().push(request.clone());
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    (self.handler)(&request)
  }
}

pub fn json_response(status: u16, body: serde_json::Value) -> HttpResponse {
  HttpResponse {
    status,
    body: serde_json::to_vec(&body).unwrap(),
  }
}

pub fn base_url() -> Url {
  Url::parse("https://api.test/v1/").unwrap()
}

pub fn signed_in_session() -> Session {
  Session {
    access_token: "a1".into(),
    refresh_token: Some("r1".into()),
    profile: Profile {
      first_name: "Ada".into(),
      last_name: "Lovelace".into(),
      username: "ada".into(),
    },
  }
}

/// Fully wired network stack over a [`ScriptedTransport`].
pub struct Harness {
  pub transport: Arc<ScriptedTransport>,
  pub store: Arc<dyn PersistentStore>,
  pub sessions: Arc<SessionStore>,
  pub reachability: Arc<Reachability>,
  pub events: EventBus,
  pub refresh: RefreshCoordinator<ScriptedTransport>,
  pub pipeline: RequestPipeline<ScriptedTransport>,
}

impl Harness {
  pub fn signed_in(transport: ScriptedTransport, policy: RefreshPolicy) -> Self {
    Self::build(transport, policy, Timeouts::default(), true)
  }

  pub fn signed_out(transport: ScriptedTransport, policy: RefreshPolicy) -> Self {
    Self::build(transport, policy, Timeouts::default(), false)
  }

  pub fn with_timeouts(transport: ScriptedTransport, timeouts: Timeouts) -> Self {
    Self::build(transport, RefreshPolicy::Await, timeouts, true)
  }

  fn build(
    transport: ScriptedTransport,
    policy: RefreshPolicy,
    timeouts: Timeouts,
    signed_in: bool,
  ) -> Self {
    let transport = Arc::new(transport);
    let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
    let sessions = Arc::new(SessionStore::load(store.clone()).unwrap());
    if signed_in {
      sessions.set(signed_in_session()).unwrap();
    }
    let events = EventBus::default();
    let reachability = Arc::new(Reachability::new(true, events.clone()));
    let refresh = RefreshCoordinator::new(
      transport.clone(),
      sessions.clone(),
      reachability.clone(),
      events.clone(),
      base_url().join("auth/token/refresh/").unwrap(),
      timeouts.request,
      policy,
    );
    let pipeline = RequestPipeline::new(
      transport.clone(),
      sessions.clone(),
      reachability.clone(),
      refresh.clone(),
      events.clone(),
      base_url(),
      timeouts,
    );

    Self {
      transport,
      store,
      sessions,
      reachability,
      events,
      refresh,
      pipeline,
    }
  }
}

/// In-memory server for [`Item`] collections. Assigns ids from `next_id`
/// upwards and records one line per call.
pub struct FakeRemote {
  records: Mutex<Vec<Item>>,
  next_id: AtomicI64,
  delay: Duration,
  failures: Mutex<HashMap<i64, SyncError>>,
  fetch_failure: Mutex<Option<SyncError>>,
  fetches: AtomicUsize,
  calls: Mutex<Vec<String>>,
}

impl FakeRemote {
  pub fn new(next_id: i64) -> Self {
    Self {
      records: Mutex::new(Vec::new()),
      next_id: AtomicI64::new(next_id),
      delay: Duration::ZERO,
      failures: Mutex::new(HashMap::new()),
      fetch_failure: Mutex::new(None),
      fetches: AtomicUsize::new(0),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn with_records(self, records: Vec<Item>) -> Self {
    *self.records.lock().unwrap() = records;
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  /// Make every call targeting `id` fail with `err`.
  pub fn fail_for(&self, id: i64, err: SyncError) {
    self.failures.lock().unwrap().insert(id, err);
  }

  pub fn heal(&self, id: i64) {
    self.failures.lock().unwrap().remove(&id);
  }

  pub fn fail_fetch(&self, err: Option<SyncError>) {
    *self.fetch_failure.lock().unwrap() = err;
  }

  pub fn records(&self) -> Vec<Item> {
    self.records.lock().unwrap().clone()
  }

  pub fn fetches(&self) -> usize {
    self.fetches.load(Ordering::SeqCst)
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  async fn enter(&self, call: String, target: i64) -> SyncResult<()> {
    self.calls.lock().unwrap().push(call);
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    match self.failures.lock().unwrap().get(&target) {
      Some(err) => Err(err.clone()),
      None => Ok(()),
    }
  }
}

impl RemoteCollection<Item> for FakeRemote {
  async fn fetch(&self, _key: &str) -> SyncResult<Vec<Item>> {
    self.fetches.fetch_add(1, Ordering::SeqCst);
    self.enter("fetch".into(), 0).await?;
    if let Some(err) = self.fetch_failure.lock().unwrap().clone() {
      return Err(err);
    }
    Ok(self.records())
  }

  async fn create(&self, _key: &str, record: &Item) -> SyncResult<Item> {
    self
      .enter(format!("create {}", record.name), record.id)
      .await?;
    let mut created = record.clone();
    created.id = self.next_id.fetch_add(1, Ordering::SeqCst);
    created.thumbnail = None;
    created.updated_at = Some(Utc::now());
    self.records.lock().unwrap().push(created.clone());
    Ok(created)
  }

  async fn update(&self, _key: &str, record: &Item) -> SyncResult<Item> {
    self.enter(format!("update {}", record.id), record.id).await?;
    let mut updated = record.clone();
    updated.thumbnail = None;
    updated.updated_at = Some(Utc::now());
    let mut records = self.records.lock().unwrap();
    match records.iter_mut().find(|r| r.id == record.id) {
      Some(existing) => *existing = updated.clone(),
      None => return Err(SyncError::Http(404)),
    }
    Ok(updated)
  }

  async fn delete(&self, _key: &str, id: i64) -> SyncResult<()> {
    self.enter(format!("delete {}", id), id).await?;
    let mut records = self.records.lock().unwrap();
    let before = records.len();
    records.retain(|r| r.id != id);
    if records.len() == before {
      return Err(SyncError::Http(404));
    }
    Ok(())
  }
}
