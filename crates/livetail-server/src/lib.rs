//! # livetail-server
//!
//! Streams stored events to connected websocket clients, each receiving only
//! the events its current filter selects.
//!
//! - [`hub`]: single-owner actor holding the `ClientId → session` registry
//! - [`websocket`]: per-connection reader and writer tasks
//! - [`rest`]: query endpoints whose queries double as streaming filters
//! - [`pipeline`]: update feed → store → hub
//! - [`server`]: Axum router, listener and lifecycle

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod pipeline;
pub mod rest;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{HubConfig, IdentityConfig, ServerConfig};
pub use errors::{HubError, ServerError};
pub use hub::monitor::HubEvent;
pub use hub::{HubHandle, RemovalReason};
pub use server::{AppState, LivetailServer};
pub use websocket::connection::{ClientSession, ConnectionId};
