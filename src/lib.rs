//! Fleet-control plane: a supervisory layer managing a fleet of long-running
//! editor-host processes and the logical worker bindings assigned to them.
//!
//! See the module-level docs on each module for the piece of the design it
//! owns: [`circuit_breaker`] and [`rpc_client`] for the RPC transport,
//! [`registry`] for host/worker bookkeeping, [`health`] for scoring,
//! [`heartbeat`] and [`supervisor`] for the polling loop, [`placement`] for
//! spawn selection, [`reaper`] for orphan healing, and [`redistributor`] for
//! load balancing across live hosts.

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod health;
pub mod heartbeat;
pub mod notifier;
pub mod placement;
pub mod reaper;
pub mod redistributor;
pub mod registry;
pub mod rpc_client;
pub mod supervisor;
pub mod types;
pub mod worker_store;
