#![warn(missing_docs)]

//! GeoSync management subsystem: operator HTTP API and process wiring for
//! the replication engine.

pub mod api;
pub mod config;

pub use api::SyncApi;
pub use config::MgmtConfig;
