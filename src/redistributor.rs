//! Redistributor.
//!
//! Moves idle workers off live-but-stressed hosts. Never preempts working
//! workers; never churns (only plans migrations clearing the improvement
//! threshold, and caps how many execute per cycle).

use crate::event_bus::EventBus;
use crate::placement::score_host;
use crate::registry::HostRegistry;
use crate::types::{HealthLevel, HostId, HostRecord, HostStatus, WorkerId, WorkerStatus};
use crate::worker_store::WorkerStore;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct MigrationPlan {
    pub worker_id: WorkerId,
    pub source: HostId,
    pub target: HostId,
    pub improvement: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationFailure {
    NoLongerIdle,
    WorkerNotFound,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    pub worker_id: WorkerId,
    pub source: HostId,
    pub target: HostId,
    pub success: bool,
    pub failure: Option<MigrationFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedistributionReport {
    pub planned: usize,
    pub executed: usize,
    pub failed: usize,
    pub results: Vec<MigrationResult>,
}

/// An active host with at least one worker that is either degraded, or at/over
/// `overloaded_threshold` worker count.
pub fn is_overloaded(host: &HostRecord, overloaded_threshold: usize) -> bool {
    host.status == HostStatus::Active
        && host.worker_count() >= 1
        && (host.health_level() == HealthLevel::Degraded || host.worker_count() >= overloaded_threshold)
}

/// Builds the migration plan for this cycle: for each idle worker on an
/// overloaded source, find the best-improving target, keep only plans
/// clearing `redistribution_threshold`, sort by improvement descending, and
/// take at most `max_migrations_per_cycle`.
pub async fn plan_migrations(
    registry: &HostRegistry,
    store: &dyn WorkerStore,
    max_workers_per_host: usize,
    overloaded_threshold: usize,
    redistribution_threshold: i64,
    max_migrations_per_cycle: usize,
) -> Vec<MigrationPlan> {
    let hosts = registry.get_all();
    let sources: Vec<&HostRecord> = hosts
        .iter()
        .filter(|h| is_overloaded(h, overloaded_threshold))
        .collect();

    let mut candidates = Vec::new();

    for source in &sources {
        let source_score = score_host(registry, source, None, max_workers_per_host).score;
        let source_score = source_score.max(0);

        for worker_id in &source.workers {
            let Some(worker) = store.get_worker(worker_id).await else {
                continue;
            };
            if worker.status != WorkerStatus::Idle {
                continue;
            }

            let mut best: Option<(HostId, i64)> = None;
            for target in &hosts {
                if target.host_id == source.host_id {
                    continue;
                }
                let scored = score_host(registry, target, worker.project_id.as_ref(), max_workers_per_host);
                if scored.disqualified_reason.is_some() {
                    continue;
                }
                if best.as_ref().map(|(_, s)| scored.score > *s).unwrap_or(true) {
                    best = Some((target.host_id.clone(), scored.score));
                }
            }

            if let Some((target_id, target_score)) = best {
                let improvement = target_score - source_score;
                if improvement >= redistribution_threshold {
                    candidates.push(MigrationPlan {
                        worker_id: worker_id.clone(),
                        source: source.host_id.clone(),
                        target: target_id,
                        improvement,
                    });
                }
            }
        }
    }

    candidates.sort_by(|a, b| b.improvement.cmp(&a.improvement));
    candidates.truncate(max_migrations_per_cycle);
    candidates
}

/// Executes a planned migration set, re-checking idleness as a race guard
/// and emitting a single `workers_redistributed` event for the whole cycle.
pub async fn redistribute(
    registry: &HostRegistry,
    store: &dyn WorkerStore,
    event_bus: &dyn EventBus,
    max_workers_per_host: usize,
    overloaded_threshold: usize,
    redistribution_threshold: i64,
    max_migrations_per_cycle: usize,
) -> RedistributionReport {
    let plans = plan_migrations(
        registry,
        store,
        max_workers_per_host,
        overloaded_threshold,
        redistribution_threshold,
        max_migrations_per_cycle,
    )
    .await;

    execute_migrations(registry, store, event_bus, &plans).await
}

/// Executes a precomputed migration plan set. Split out from `redistribute`
/// so callers (and tests) can re-check worker state between planning and
/// execution without re-running the planner.
pub async fn execute_migrations(
    registry: &HostRegistry,
    store: &dyn WorkerStore,
    event_bus: &dyn EventBus,
    plans: &[MigrationPlan],
) -> RedistributionReport {
    let planned = plans.len();
    let mut results = Vec::with_capacity(planned);

    for plan in &plans {
        let result = match store.get_worker(&plan.worker_id).await {
            None => MigrationResult {
                worker_id: plan.worker_id.clone(),
                source: plan.source.clone(),
                target: plan.target.clone(),
                success: false,
                failure: Some(MigrationFailure::WorkerNotFound),
            },
            Some(worker) if worker.status != WorkerStatus::Idle => MigrationResult {
                worker_id: plan.worker_id.clone(),
                source: plan.source.clone(),
                target: plan.target.clone(),
                success: false,
                failure: Some(MigrationFailure::NoLongerIdle),
            },
            Some(_) => {
                registry.unbind(&plan.source, &plan.worker_id);
                registry.bind(&plan.target, &plan.worker_id);
                MigrationResult {
                    worker_id: plan.worker_id.clone(),
                    source: plan.source.clone(),
                    target: plan.target.clone(),
                    success: true,
                    failure: None,
                }
            }
        };
        results.push(result);
    }

    let executed = results.iter().filter(|r| r.success).count();
    let failed = results.len() - executed;

    if planned > 0 {
        event_bus.emit(
            "workers_redistributed",
            serde_json::json!({
                "planned": planned,
                "executed": executed,
                "failed": failed,
                "results": results,
            }),
        );
    }

    RedistributionReport {
        planned,
        executed,
        failed,
        results,
    }
}
