//! Serde types matching the trip API's request and response bodies.
//!
//! These types are separate from domain types so local-only fields (cached
//! thumbnails) never reach the wire and server-only fields stay out of the
//! cache.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::types::{Activity, PackingItem, Participant, Trip};
use crate::session::Profile;

// ============================================================================
// Auth
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiLoginRequest<'a> {
  pub username: &'a str,
  pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ApiUser {
  #[serde(default)]
  pub first_name: String,
  #[serde(default)]
  pub last_name: String,
  pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiLoginResponse {
  pub access: String,
  pub refresh: Option<String>,
  pub user: Option<ApiUser>,
}

impl From<ApiUser> for Profile {
  fn from(user: ApiUser) -> Self {
    Profile {
      first_name: user.first_name,
      last_name: user.last_name,
      username: user.username,
    }
  }
}

// ============================================================================
// Trips
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiTrip {
  pub id: i64,
  pub name: String,
  pub destination: Option<String>,
  pub start_date: Option<NaiveDate>,
  pub end_date: Option<NaiveDate>,
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ApiTripPayload {
  pub name: String,
  pub destination: Option<String>,
  pub start_date: Option<NaiveDate>,
  pub end_date: Option<NaiveDate>,
}

impl From<ApiTrip> for Trip {
  fn from(api: ApiTrip) -> Self {
    Trip {
      id: api.id,
      name: api.name,
      destination: api.destination,
      start_date: api.start_date,
      end_date: api.end_date,
      updated_at: api.updated_at,
      thumbnail: None,
    }
  }
}

impl From<&Trip> for ApiTripPayload {
  fn from(trip: &Trip) -> Self {
    ApiTripPayload {
      name: trip.name.clone(),
      destination: trip.destination.clone(),
      start_date: trip.start_date,
      end_date: trip.end_date,
    }
  }
}

// ============================================================================
// Activities
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiActivity {
  pub id: i64,
  pub trip: i64,
  pub title: String,
  pub location: Option<String>,
  pub starts_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub notes: String,
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ApiActivityPayload {
  pub title: String,
  pub location: Option<String>,
  pub starts_at: Option<DateTime<Utc>>,
  pub notes: String,
}

impl From<ApiActivity> for Activity {
  fn from(api: ApiActivity) -> Self {
    Activity {
      id: api.id,
      trip_id: api.trip,
      title: api.title,
      location: api.location,
      starts_at: api.starts_at,
      notes: api.notes,
      updated_at: api.updated_at,
    }
  }
}

impl From<&Activity> for ApiActivityPayload {
  fn from(activity: &Activity) -> Self {
    ApiActivityPayload {
      title: activity.title.clone(),
      location: activity.location.clone(),
      starts_at: activity.starts_at,
      notes: activity.notes.clone(),
    }
  }
}

// ============================================================================
// Participants
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiParticipant {
  pub id: i64,
  pub trip: i64,
  pub user: ApiUser,
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ApiParticipantPayload {
  pub username: String,
}

impl From<ApiParticipant> for Participant {
  fn from(api: ApiParticipant) -> Self {
    let display_name = format!("{} {}", api.user.first_name, api.user.last_name)
      .trim()
      .to_string();
    Participant {
      id: api.id,
      trip_id: api.trip,
      username: api.user.username,
      display_name,
      updated_at: api.updated_at,
    }
  }
}

impl From<&Participant> for ApiParticipantPayload {
  fn from(participant: &Participant) -> Self {
    ApiParticipantPayload {
      username: participant.username.clone(),
    }
  }
}

// ============================================================================
// Packing items
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiPackingItem {
  pub id: i64,
  pub trip: i64,
  pub name: String,
  pub quantity: u32,
  #[serde(default, rename = "is_packed")]
  pub packed: bool,
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ApiPackingItemPayload {
  pub name: String,
  pub quantity: u32,
  #[serde(rename = "is_packed")]
  pub packed: bool,
}

impl From<ApiPackingItem> for PackingItem {
  fn from(api: ApiPackingItem) -> Self {
    PackingItem {
      id: api.id,
      trip_id: api.trip,
      name: api.name,
      quantity: api.quantity,
      packed: api.packed,
      updated_at: api.updated_at,
      thumbnail: None,
    }
  }
}

impl From<&PackingItem> for ApiPackingItemPayload {
  fn from(item: &PackingItem) -> Self {
    ApiPackingItemPayload {
      name: item.name.clone(),
      quantity: item.quantity,
      packed: item.packed,
    }
  }
}
