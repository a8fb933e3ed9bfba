//! taskgate host: serves the task service as NDJSON JSON-RPC over stdio,
//! with an optional admin HTTP port for health and metrics.

pub mod admin;
pub mod cli;
pub mod error;
pub mod serve;
pub mod server;
