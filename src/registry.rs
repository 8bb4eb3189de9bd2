//! Host registry.
//!
//! Single shared store of host records and worker->host bindings, guarded by
//! one `parking_lot::RwLock` so all operations are linearizable with respect
//! to concurrent readers, since the heartbeat loop and any external placement
//! callers all go through the same lock.

use crate::types::{HealthLevel, HostId, HostOpts, HostRecord, HostStatus, ProjectId, WorkerId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Instant;

/// Per-worker metadata the registry caches so placement/affinity scoring
/// never needs to round-trip the external worker store.
#[derive(Debug, Clone, Default)]
struct WorkerMeta {
    project_id: Option<ProjectId>,
}

struct Inner {
    hosts: HashMap<HostId, HostRecord>,
    worker_host: HashMap<WorkerId, HostId>,
    worker_meta: HashMap<WorkerId, WorkerMeta>,
}

pub struct HostRegistry {
    inner: RwLock<Inner>,
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                hosts: HashMap::new(),
                worker_host: HashMap::new(),
                worker_meta: HashMap::new(),
            }),
        }
    }

    /// Idempotent: creates an `active` host if absent, otherwise a no-op.
    pub fn register(&self, host_id: &HostId, opts: HostOpts) {
        let mut inner = self.inner.write();
        inner
            .hosts
            .entry(host_id.clone())
            .or_insert_with(|| HostRecord::new(host_id.clone(), opts));
    }

    pub fn get(&self, host_id: &str) -> Option<HostRecord> {
        self.inner.read().hosts.get(host_id).cloned()
    }

    pub fn get_all(&self) -> Vec<HostRecord> {
        self.inner.read().hosts.values().cloned().collect()
    }

    pub fn get_by_status(&self, status: HostStatus) -> Vec<HostRecord> {
        self.inner
            .read()
            .hosts
            .values()
            .filter(|h| h.status == status)
            .cloned()
            .collect()
    }

    pub fn host_of_worker(&self, worker_id: &str) -> Option<HostId> {
        self.inner.read().worker_host.get(worker_id).cloned()
    }

    /// Caches a worker's `project_id`, consulted by the placement selector's
    /// affinity scoring without touching the external worker store.
    pub fn set_worker_project(&self, worker_id: &WorkerId, project_id: Option<ProjectId>) {
        self.inner
            .write()
            .worker_meta
            .entry(worker_id.clone())
            .or_default()
            .project_id = project_id;
    }

    pub fn worker_project(&self, worker_id: &str) -> Option<ProjectId> {
        self.inner
            .read()
            .worker_meta
            .get(worker_id)
            .and_then(|m| m.project_id.clone())
    }

    /// Binds `worker_id` to `host_id`. Enforces the invariant that a
    /// worker appears in at most one host's `workers` set: any existing
    /// binding is removed first.
    pub fn bind(&self, host_id: &str, worker_id: &WorkerId) -> bool {
        let mut inner = self.inner.write();
        if !inner.hosts.contains_key(host_id) {
            return false;
        }
        if let Some(prev) = inner.worker_host.get(worker_id).cloned() {
            if prev == host_id {
                return true;
            }
            if let Some(prev_host) = inner.hosts.get_mut(&prev) {
                prev_host.workers.remove(worker_id);
            }
        }
        inner
            .hosts
            .get_mut(host_id)
            .expect("checked above")
            .workers
            .insert(worker_id.clone());
        inner
            .worker_host
            .insert(worker_id.clone(), host_id.to_string());
        true
    }

    pub fn unbind(&self, host_id: &str, worker_id: &str) -> bool {
        let mut inner = self.inner.write();
        let removed_from_host = inner
            .hosts
            .get_mut(host_id)
            .map(|h| h.workers.remove(worker_id))
            .unwrap_or(false);
        if inner.worker_host.get(worker_id).map(|h| h.as_str()) == Some(host_id) {
            inner.worker_host.remove(worker_id);
        }
        removed_from_host
    }

    pub fn heartbeat_success(&self, host_id: &str, new_health_score: i64, heartbeat_at: Instant) {
        let mut inner = self.inner.write();
        if let Some(host) = inner.hosts.get_mut(host_id) {
            host.error_count = 0;
            host.health_score = new_health_score.clamp(0, 100);
            host.heartbeat_at = Some(heartbeat_at);
            host.status = HostStatus::Active;
        }
    }

    pub fn heartbeat_failure(&self, host_id: &str, new_error_count: u32, new_health_score: i64, error_threshold: u32) {
        let mut inner = self.inner.write();
        if let Some(host) = inner.hosts.get_mut(host_id) {
            host.error_count = new_error_count;
            host.health_score = new_health_score.clamp(0, 100);
            if new_error_count >= error_threshold {
                host.status = HostStatus::Error;
            }
        }
    }

    pub fn mark_stale(&self, host_id: &str) {
        let mut inner = self.inner.write();
        if let Some(host) = inner.hosts.get_mut(host_id) {
            if host.status == HostStatus::Active {
                host.status = HostStatus::Stale;
            }
        }
    }

    /// Reports a host-death classification onto the registry. Used as the
    /// target of the RPC client's injected error sink.
    pub fn mark_error(&self, host_id: &str, _msg: &str, error_threshold: u32) {
        let mut inner = self.inner.write();
        if let Some(host) = inner.hosts.get_mut(host_id) {
            host.error_count += 1;
            if host.error_count >= error_threshold {
                host.status = HostStatus::Error;
            }
        }
    }

    pub fn mark_terminated(&self, host_id: &str) {
        let mut inner = self.inner.write();
        if let Some(host) = inner.hosts.get_mut(host_id) {
            host.status = HostStatus::Terminated;
        }
    }

    /// Marks any `active` host with no successful ping more recent than
    /// `stale_threshold` as `stale`. Returns the ids marked.
    pub fn cleanup_stale(&self, now: Instant, stale_threshold: std::time::Duration) -> Vec<HostId> {
        let mut inner = self.inner.write();
        let mut marked = Vec::new();
        for host in inner.hosts.values_mut() {
            if host.status != HostStatus::Active {
                continue;
            }
            let is_stale = match host.heartbeat_at {
                Some(last) => now.duration_since(last) >= stale_threshold,
                None => true,
            };
            if is_stale {
                host.status = HostStatus::Stale;
                marked.push(host.host_id.clone());
            }
        }
        marked
    }

    pub fn health_level(&self, host_id: &str) -> Option<HealthLevel> {
        self.get(host_id).map(|h| h.health_level())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent() {
        let reg = HostRegistry::new();
        reg.register(&"h1".to_string(), HostOpts::default());
        reg.register(&"h1".to_string(), HostOpts::default());
        assert_eq!(reg.get_all().len(), 1);
    }

    #[test]
    fn bind_enforces_single_host_invariant() {
        let reg = HostRegistry::new();
        reg.register(&"h1".to_string(), HostOpts::default());
        reg.register(&"h2".to_string(), HostOpts::default());
        assert!(reg.bind("h1", &"w1".to_string()));
        assert!(reg.bind("h2", &"w1".to_string()));
        assert_eq!(reg.host_of_worker("w1"), Some("h2".to_string()));
        assert!(!reg.get("h1").unwrap().workers.contains("w1"));
        assert!(reg.get("h2").unwrap().workers.contains("w1"));
    }

    #[test]
    fn heartbeat_failure_marks_error_at_threshold() {
        let reg = HostRegistry::new();
        reg.register(&"h1".to_string(), HostOpts::default());
        reg.heartbeat_failure("h1", 1, 83, 3);
        assert_eq!(reg.get("h1").unwrap().status, HostStatus::Active);
        reg.heartbeat_failure("h1", 3, 45, 3);
        assert_eq!(reg.get("h1").unwrap().status, HostStatus::Error);
    }

    #[test]
    fn cleanup_stale_marks_hosts_without_recent_heartbeat() {
        let reg = HostRegistry::new();
        reg.register(&"h1".to_string(), HostOpts::default());
        let marked = reg.cleanup_stale(Instant::now(), std::time::Duration::from_secs(120));
        assert_eq!(marked, vec!["h1".to_string()]);
        assert_eq!(reg.get("h1").unwrap().status, HostStatus::Stale);
    }
}
