//! Typed client protocol.
//!
//! - `methods.rs` - Method names and their params/results
//! - `jsonrpc.rs` - JSON-RPC 2.0 envelopes and classification
//!
//! Field names are camelCase on the wire; state names are snake_case.

mod jsonrpc;
mod methods;

pub use jsonrpc::*;
pub use methods::*;

/// Fresh id tying a client-visible error to its log line.
#[must_use]
pub fn correlation_id() -> String {
    nanoid::nanoid!(12)
}
