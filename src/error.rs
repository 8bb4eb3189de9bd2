//! Crate-wide error type.
//!
//! Structured per-call results (the `{ok, err}` shapes required for `eval`,
//! `heal_orphans`, `redistribute`, ...) are modeled as plain enums next
//! to their owning module. `FleetError` exists for the boundary cases that need a
//! real `std::error::Error` to propagate with `?`: subprocess I/O, malformed
//! event payloads, registry invariant violations hit during tests.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("circuit open")]
    CircuitOpen,

    #[error("rpc call timed out")]
    Timeout,

    #[error("host reported dead: {0}")]
    HostDead(String),

    #[error("rpc call raised an exception: {0}")]
    Exception(String),

    #[error("no healthy host available for placement")]
    NoHealthyHost,

    #[error("worker {0} is no longer idle")]
    NoLongerIdle(String),

    #[error("worker {0} not found")]
    WorkerNotFound(String),

    #[error("host {0} not found")]
    HostNotFound(String),

    #[error("worker {worker_id} is already bound to host {existing_host}")]
    AlreadyBound {
        worker_id: String,
        existing_host: String,
    },

    #[error("subprocess I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed event payload: {0}")]
    Json(#[from] serde_json::Error),
}
