//! Trip planner records and their REST collections.

pub mod api_types;
mod client;
mod service;
mod types;

pub use client::{RestEndpoint, WireRecord};
pub use service::{
  ActivityCollection, PackingCollection, ParticipantCollection, TripCollection, TripsService,
  MY_TRIPS,
};
pub use types::{Activity, PackingItem, Participant, Trip};
