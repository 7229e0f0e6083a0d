//! Live broadcast of agent telemetry over Server-Sent Events.
//!
//! - [`hub`]: client registry, broadcast router and heartbeat
//! - [`store`]: event store behind the stats and recent-events queries
//! - [`api`]: HTTP surface (stream, ingestion, queries)
//! - [`config`]: layered configuration

pub mod api;
pub mod config;
pub mod hub;
pub mod store;
