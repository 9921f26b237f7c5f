//! # livetail-core
//!
//! Foundation types shared by every livetail crate:
//!
//! - [`ids::ClientId`]: the opaque, caller-stable identity that ties REST
//!   filter submissions to websocket connections
//! - [`logging`]: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;

pub use ids::ClientId;
