//! Capture subsystem: log buffer (4.A), capture store (4.B), and the
//! pending-query correlation engine (4.C).

pub mod connection_tracker;
pub mod log_buffer;
pub mod pending;
pub mod store;

pub use log_buffer::{AddEntriesReport, LogBuffer};
pub use pending::PendingQueryEngine;
pub use store::{CaptureStore, HealthSnapshot, NetworkFilter, WsFilter};
