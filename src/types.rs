//! Shared domain types: host/worker identifiers and the closed status enums.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;

pub type HostId = String;
pub type WorkerId = String;
pub type ProjectId = String;

/// Lifecycle status of a host record. Closed enum per the design notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Active,
    Stale,
    Error,
    Terminated,
}

/// Coarse health bucket derived from `health_score`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthLevel {
    pub fn of(health_score: i64) -> Self {
        if health_score >= 70 {
            HealthLevel::Healthy
        } else if health_score >= 30 {
            HealthLevel::Degraded
        } else {
            HealthLevel::Unhealthy
        }
    }
}

/// Worker lifecycle status, as carried on the worker record in the external
/// worker store. The reaper classifies orphans by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Initializing,
    Spawning,
    Starting,
    Working,
    Blocked,
    Error,
    Terminated,
}

impl WorkerStatus {
    pub fn is_rebindable(self) -> bool {
        matches!(
            self,
            WorkerStatus::Idle
                | WorkerStatus::Initializing
                | WorkerStatus::Spawning
                | WorkerStatus::Starting
        )
    }

    pub fn must_terminate(self) -> bool {
        matches!(self, WorkerStatus::Working | WorkerStatus::Blocked)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerStatus::Error | WorkerStatus::Terminated)
    }
}

/// A host record. Timestamps are process-local `Instant`s, since this core
/// persists no state across process restarts.
#[derive(Debug, Clone)]
pub struct HostRecord {
    pub host_id: HostId,
    pub status: HostStatus,
    pub health_score: i64,
    pub error_count: u32,
    pub heartbeat_at: Option<Instant>,
    pub workers: HashSet<WorkerId>,
    pub opts: HostOpts,
}

impl HostRecord {
    pub fn new(host_id: HostId, opts: HostOpts) -> Self {
        Self {
            host_id,
            status: HostStatus::Active,
            health_score: 100,
            error_count: 0,
            heartbeat_at: None,
            workers: HashSet::new(),
            opts,
        }
    }

    pub fn health_level(&self) -> HealthLevel {
        HealthLevel::of(self.health_score)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

/// Opaque per-host configuration (socket name, etc).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostOpts {
    pub socket_name: Option<String>,
}

/// A worker record, as cached from / backed by the external worker store.
/// `project_id` is carried here per the design notes' open-question
/// resolution: the registry keeps a per-worker project_id cache rather than
/// re-querying an external store on every placement decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub worker_id: WorkerId,
    pub status: WorkerStatus,
    pub project_id: Option<ProjectId>,
}
