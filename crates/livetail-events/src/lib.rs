//! # livetail-events
//!
//! The event-store side of livetail:
//!
//! - [`Event`]: immutable broadcast payload
//! - [`Query`]: the client-supplied filter, with [`matches`] as the pure
//!   predicate the broadcast hub evaluates per event
//! - [`EventStore`]: save / query / get / aggregate, with [`MemoryStore`] as the
//!   in-process implementation

#![deny(unsafe_code)]

pub mod errors;
pub mod event;
pub mod query;
pub mod store;

pub use errors::{EventStoreError, Result};
pub use event::Event;
pub use query::{Comparison, ImportanceFilter, Query, matches};
pub use store::{AggregateField, EventStore, MemoryStore};
