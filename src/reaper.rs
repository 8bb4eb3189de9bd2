//! Auto-heal orphan reaper.

use crate::event_bus::EventBus;
use crate::placement::{select_host, SelectionReason};
use crate::registry::HostRegistry;
use crate::types::{HostId, HostStatus, ProjectId, WorkerId, WorkerStatus};
use crate::worker_store::{TaskStatus, WorkerStore};
use serde::Serialize;
use std::sync::Arc;

/// An orphan: a worker bound to a host whose status is dead.
#[derive(Debug, Clone)]
pub struct Orphan {
    pub worker_id: WorkerId,
    pub host_id: HostId,
    pub host_status: HostStatus,
    pub worker_status: WorkerStatus,
    pub project_id: Option<ProjectId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealAction {
    Rebind,
    Terminate,
    Skip,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealResult {
    pub worker_id: WorkerId,
    pub action: HealAction,
    pub success: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealReport {
    pub orphans_found: usize,
    pub healed: usize,
    pub failed: usize,
    pub results: Vec<HealResult>,
}

fn classify(worker_status: WorkerStatus) -> HealAction {
    if worker_status.is_rebindable() {
        HealAction::Rebind
    } else if worker_status.must_terminate() {
        HealAction::Terminate
    } else if worker_status.is_terminal() {
        HealAction::Skip
    } else {
        // Unknown status: conservative default.
        HealAction::Terminate
    }
}

/// Collects every worker bound to a non-`active` host.
pub fn find_orphans(registry: &HostRegistry) -> Vec<Orphan> {
    let mut orphans = Vec::new();
    for host in registry.get_all() {
        if host.status == HostStatus::Active {
            continue;
        }
        for worker_id in &host.workers {
            // Worker status is read from the cache; callers resolve it from the
            // worker store in `heal_orphans` before classifying.
            orphans.push(Orphan {
                worker_id: worker_id.clone(),
                host_id: host.host_id.clone(),
                host_status: host.status,
                worker_status: WorkerStatus::Idle, // placeholder, replaced below
                project_id: registry.worker_project(worker_id),
            });
        }
    }
    orphans
}

/// Runs the full auto-heal cycle: detect orphans, classify, rebind or
/// terminate, and emit a single `orphans_healed` diagnostic event.
pub async fn heal_orphans(
    registry: &HostRegistry,
    store: &dyn WorkerStore,
    event_bus: &dyn EventBus,
    max_workers_per_host: usize,
    default_host_id: &str,
) -> HealReport {
    let mut orphans = find_orphans(registry);
    for orphan in &mut orphans {
        if let Some(record) = store.get_worker(&orphan.worker_id).await {
            orphan.worker_status = record.status;
        }
    }

    let orphans_found = orphans.len();
    let mut results = Vec::with_capacity(orphans_found);

    for orphan in &orphans {
        let action = classify(orphan.worker_status);
        let result = match action {
            HealAction::Rebind => {
                rebind(registry, orphan, max_workers_per_host, default_host_id).await
            }
            HealAction::Terminate => terminate(registry, store, orphan).await,
            HealAction::Skip => {
                registry.unbind(&orphan.host_id, &orphan.worker_id);
                HealResult {
                    worker_id: orphan.worker_id.clone(),
                    action: HealAction::Skip,
                    success: true,
                    reason: None,
                }
            }
        };
        results.push(result);
    }

    let healed = results.iter().filter(|r| r.success).count();
    let failed = results.len() - healed;

    if orphans_found > 0 {
        event_bus.emit(
            "orphans_healed",
            serde_json::json!({
                "orphans_found": orphans_found,
                "healed": healed,
                "failed": failed,
                "results": results,
            }),
        );
    }

    HealReport {
        orphans_found,
        healed,
        failed,
        results,
    }
}

async fn rebind(
    registry: &HostRegistry,
    orphan: &Orphan,
    max_workers_per_host: usize,
    default_host_id: &str,
) -> HealResult {
    let selection = select_host(
        registry,
        orphan.project_id.as_ref(),
        max_workers_per_host,
        default_host_id,
    );

    if selection.reason == SelectionReason::Selected && selection.host_id != orphan.host_id {
        registry.unbind(&orphan.host_id, &orphan.worker_id);
        registry.bind(&selection.host_id, &orphan.worker_id);
        // worker store is not mutated on rebind
        HealResult {
            worker_id: orphan.worker_id.clone(),
            action: HealAction::Rebind,
            success: true,
            reason: None,
        }
    } else {
        HealResult {
            worker_id: orphan.worker_id.clone(),
            action: HealAction::Rebind,
            success: false,
            reason: Some("no_healthy_host".to_string()),
        }
    }
}

async fn terminate(registry: &HostRegistry, store: &dyn WorkerStore, orphan: &Orphan) -> HealResult {
    let dispatched = store
        .get_tasks_for_worker(&orphan.worker_id, TaskStatus::Dispatched)
        .await;
    for task in dispatched {
        store.fail_task(&task.task_id).await;
    }
    store.release_claims(&orphan.worker_id).await;
    registry.unbind(&orphan.host_id, &orphan.worker_id);
    store
        .update_worker_status(&orphan.worker_id, WorkerStatus::Terminated)
        .await;

    HealResult {
        worker_id: orphan.worker_id.clone(),
        action: HealAction::Terminate,
        success: true,
        reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::NullEventBus;
    use crate::types::HostOpts;
    use crate::worker_store::InMemoryWorkerStore;

    #[tokio::test]
    async fn scenario_orphan_reaper_classifies_and_heals() {
        let registry = HostRegistry::new();
        registry.register(&"h_dead".to_string(), HostOpts::default());
        registry.register(&"h_live".to_string(), HostOpts::default());
        registry.heartbeat_success("h_live", 95, std::time::Instant::now());

        registry.bind("h_dead", &"A".to_string());
        registry.bind("h_dead", &"B".to_string());
        registry.bind("h_dead", &"C".to_string());
        registry.mark_stale("h_dead");

        let store = Arc::new(InMemoryWorkerStore::new());
        store.insert_worker("A".to_string(), WorkerStatus::Idle, None);
        store.insert_worker("B".to_string(), WorkerStatus::Working, None);
        store.insert_worker("C".to_string(), WorkerStatus::Terminated, None);
        store.insert_task("t1", "B", TaskStatus::Dispatched);

        let event_bus = NullEventBus;
        let report = heal_orphans(&registry, store.as_ref(), &event_bus, 5, "server").await;

        assert_eq!(report.orphans_found, 3);
        assert_eq!(report.healed, 3);
        assert_eq!(report.failed, 0);

        assert_eq!(registry.host_of_worker("A"), Some("h_live".to_string()));
        assert_eq!(registry.host_of_worker("B"), None);
        assert_eq!(registry.host_of_worker("C"), None);

        let b = store.get_worker("B").await.unwrap();
        assert_eq!(b.status, WorkerStatus::Terminated);
        let t1 = store.get_tasks_for_worker("B", TaskStatus::Error).await;
        assert_eq!(t1.len(), 1);

        assert!(registry.get("h_dead").unwrap().workers.is_empty());
    }

    #[tokio::test]
    async fn rebind_leaves_binding_in_place_when_no_healthy_host() {
        let registry = HostRegistry::new();
        registry.register(&"h_dead".to_string(), HostOpts::default());
        registry.bind("h_dead", &"A".to_string());
        registry.mark_stale("h_dead");

        let store = Arc::new(InMemoryWorkerStore::new());
        store.insert_worker("A".to_string(), WorkerStatus::Idle, None);

        let event_bus = NullEventBus;
        let report = heal_orphans(&registry, store.as_ref(), &event_bus, 5, "server").await;

        assert_eq!(report.failed, 1);
        assert_eq!(registry.host_of_worker("A"), Some("h_dead".to_string()));
    }
}
