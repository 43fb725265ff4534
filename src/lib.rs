//! slotwise — an embeddable scheduling core.
//!
//! Turns recurring weekly availability rules plus existing bookings into
//! concrete bookable time slots, and guarantees that concurrent booking
//! attempts for the same business/time window resolve to exactly one winner.
//!
//! The transport layer (HTTP or otherwise) is the embedder's concern: hosts
//! construct an [`engine::Engine`] over an availability source, a service
//! catalog and a booking store, then call `list_available_slots` and
//! `create_booking` from their request handlers.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod wal;
