//! REST endpoints for the trip records.

use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;

use super::api_types::{
  ApiActivity, ApiActivityPayload, ApiPackingItem, ApiPackingItemPayload, ApiParticipant,
  ApiParticipantPayload, ApiTrip, ApiTripPayload,
};
use super::types::{Activity, PackingItem, Participant, Trip};
use crate::cache::Record;
use crate::error::SyncResult;
use crate::net::{ApiRequest, NoContent, RequestPipeline, Transport};
use crate::sync::RemoteCollection;

/// A record with a REST home and separate wire shapes.
pub trait WireRecord: Record {
  type Response: DeserializeOwned + Send + Into<Self>;
  type Payload: Serialize + Send + for<'a> From<&'a Self>;

  /// Collection path for `key`, relative to the API base URL, with a
  /// trailing slash.
  fn collection_path(key: &str) -> String;

  fn record_path(key: &str, id: i64) -> String {
    format!("{}{}/", Self::collection_path(key), id)
  }
}

impl WireRecord for Trip {
  type Response = ApiTrip;
  type Payload = ApiTripPayload;

  fn collection_path(_key: &str) -> String {
    "trips/".to_string()
  }
}

impl WireRecord for Activity {
  type Response = ApiActivity;
  type Payload = ApiActivityPayload;

  fn collection_path(trip: &str) -> String {
    format!("trips/{}/activities/", trip)
  }
}

impl WireRecord for Participant {
  type Response = ApiParticipant;
  type Payload = ApiParticipantPayload;

  fn collection_path(trip: &str) -> String {
    format!("trips/{}/participants/", trip)
  }
}

impl WireRecord for PackingItem {
  type Response = ApiPackingItem;
  type Payload = ApiPackingItemPayload;

  fn collection_path(trip: &str) -> String {
    format!("trips/{}/packing-items/", trip)
  }
}

/// [`RemoteCollection`] over the request pipeline.
pub struct RestEndpoint<R, T: Transport> {
  pipeline: RequestPipeline<T>,
  _record: PhantomData<fn() -> R>,
}

impl<R, T: Transport> RestEndpoint<R, T> {
  pub fn new(pipeline: RequestPipeline<T>) -> Self {
    Self {
      pipeline,
      _record: PhantomData,
    }
  }
}

impl<R: WireRecord, T: Transport> RemoteCollection<R> for RestEndpoint<R, T> {
  async fn fetch(&self, key: &str) -> SyncResult<Vec<R>> {
    let request = ApiRequest::get(R::collection_path(key));
    let records: Vec<R::Response> = self.pipeline.send(request).await?;
    Ok(records.into_iter().map(Into::into).collect())
  }

  async fn create(&self, key: &str, record: &R) -> SyncResult<R> {
    let request = ApiRequest::post(R::collection_path(key)).json(&R::Payload::from(record))?;
    let created: R::Response = self.pipeline.send(request).await?;
    Ok(created.into())
  }

  async fn update(&self, key: &str, record: &R) -> SyncResult<R> {
    let request =
      ApiRequest::patch(R::record_path(key, record.id())).json(&R::Payload::from(record))?;
    let updated: R::Response = self.pipeline.send(request).await?;
    Ok(updated.into())
  }

  async fn delete(&self, key: &str, id: i64) -> SyncResult<()> {
    let _: NoContent = self
      .pipeline
      .send(ApiRequest::delete(R::record_path(key, id)))
      .await?;
    Ok(())
  }
}
