use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::Record;

/// A trip owned by or shared with the signed-in user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
  pub id: i64,
  pub name: String,
  pub destination: Option<String>,
  pub start_date: Option<NaiveDate>,
  pub end_date: Option<NaiveDate>,
  pub updated_at: Option<DateTime<Utc>>,
  /// Cover image bytes, cached locally only
  #[serde(default)]
  pub thumbnail: Option<Vec<u8>>,
}

impl Trip {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      id: 0,
      name: name.into(),
      destination: None,
      start_date: None,
      end_date: None,
      updated_at: None,
      thumbnail: None,
    }
  }
}

impl Record for Trip {
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
    "trip"
  }

  fn validate(&self) -> Result<(), String> {
    if self.name.trim().is_empty() {
      return Err("trip name must not be empty".into());
    }
    if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
      if end < start {
        return Err(format!("trip ends ({}) before it starts ({})", end, start));
      }
    }
    Ok(())
  }

  fn carry_local_fields(&mut self, previous: &Self) {
    if self.thumbnail.is_none() {
      self.thumbnail = previous.thumbnail.clone();
    }
  }
}

/// A scheduled activity within a trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
  pub id: i64,
  pub trip_id: i64,
  pub title: String,
  pub location: Option<String>,
  pub starts_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub notes: String,
  pub updated_at: Option<DateTime<Utc>>,
}

impl Record for Activity {
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
    "activity"
  }

  fn validate(&self) -> Result<(), String> {
    if self.title.trim().is_empty() {
      return Err("activity title must not be empty".into());
    }
    Ok(())
  }
}

/// A member of a shared trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
  pub id: i64,
  pub trip_id: i64,
  pub username: String,
  #[serde(default)]
  pub display_name: String,
  pub updated_at: Option<DateTime<Utc>>,
}

impl Record for Participant {
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
    "participant"
  }

  fn validate(&self) -> Result<(), String> {
    if self.username.trim().is_empty() {
      return Err("participant username must not be empty".into());
    }
    Ok(())
  }
}

/// One line of a trip's packing list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackingItem {
  pub id: i64,
  pub trip_id: i64,
  pub name: String,
  pub quantity: u32,
  #[serde(default)]
  pub packed: bool,
  pub updated_at: Option<DateTime<Utc>>,
  /// Photo of the item, cached locally only
  #[serde(default)]
  pub thumbnail: Option<Vec<u8>>,
}

impl PackingItem {
  pub fn new(trip_id: i64, name: impl Into<String>, quantity: u32) -> Self {
    Self {
      id: 0,
      trip_id,
      name: name.into(),
      quantity,
      packed: false,
      updated_at: None,
      thumbnail: None,
    }
  }
}

impl Record for PackingItem {
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
    "packing_item"
  }

  fn validate(&self) -> Result<(), String> {
    if self.name.trim().is_empty() {
      return Err("item name must not be empty".into());
    }
    if self.quantity == 0 {
      return Err(format!("quantity of '{}' must be at least 1", self.name));
    }
    Ok(())
  }

  fn carry_local_fields(&mut self, previous: &Self) {
    if self.thumbnail.is_none() {
      self.thumbnail = previous.thumbnail.clone();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_trip_date_order_is_validated() {
    let mut trip = Trip::new("Lisbon");
    trip.start_date = NaiveDate::from_ymd_opt(2024, 6, 10);
    trip.end_date = NaiveDate::from_ymd_opt(2024, 6, 1);
    assert!(trip.validate().is_err());

    trip.end_date = NaiveDate::from_ymd_opt(2024, 6, 12);
    assert!(trip.validate().is_ok());
  }

  #[test]
  fn test_packing_item_needs_quantity() {
    assert!(PackingItem::new(1, "Socks", 0).validate().is_err());
    assert!(PackingItem::new(1, " ", 1).validate().is_err());
    assert!(PackingItem::new(1, "Socks", 3).validate().is_ok());
  }

  #[test]
  fn test_thumbnail_survives_server_copy() {
    let mut cached = PackingItem::new(1, "Camera", 1);
    cached.thumbnail = Some(vec![0xff, 0xd8]);
    let mut server = PackingItem::new(1, "Camera", 1);

    server.carry_local_fields(&cached);
    assert_eq!(server.thumbnail, Some(vec![0xff, 0xd8]));
  }
}
