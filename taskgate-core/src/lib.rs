//! taskgate core: tracking for long-running operations.
//!
//! A client starts an operation and immediately gets a task handle back. It
//! then polls or streams progress, answers questions the operation asks
//! mid-flight, and may cancel. The server keeps one consistent view of every
//! task under concurrent access.
//!
//! # Components
//!
//! - [`task`] - Task record, state machine, and errors
//! - [`registry`] - Concurrent `id → Task` map, the single source of truth
//! - [`broker`] - One-shot input rendezvous between executor and client
//! - [`executor`] - Operations, their context, and the per-task supervisor
//! - [`cancel`] - Cancellation coordinator
//! - [`reporter`] and [`events`] - Poll and push surfaces
//! - [`service`] - Facade tying the above together
//! - [`persist`] - Durable store interface and adapters
//! - [`config`], [`telemetry`], [`error`], [`protocol`] - Ambient stack
//!
//! This crate is transport-agnostic; the `taskgate` binary hosts it over
//! JSON-RPC on stdio.

pub mod broker;
pub mod cancel;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod operations;
pub mod persist;
pub mod protocol;
pub mod registry;
pub mod reporter;
pub mod service;
pub mod task;
pub mod telemetry;

pub use service::TaskService;
