//! WebSocket gateway: per-connection sessions and their reader/writer loops.

pub mod connection;
pub mod handler;
pub mod session;
