//! Heartbeat loop.
//!
//! Each tick pings every active host (falling back to the default host if
//! none are registered), updates health via the scorer, and, every cleanup
//! interval, runs stale detection, the auto-heal reaper, and the
//! redistributor in that order.

use crate::config::FleetConfig;
use crate::event_bus::EventBus;
use crate::health;
use crate::reaper::{self, HealReport};
use crate::redistributor::{self, RedistributionReport};
use crate::registry::HostRegistry;
use crate::rpc_client::{EvalOutcome, EvalReason, SubprocessRpcClient};
use crate::types::{HostOpts, HostStatus};
use crate::worker_store::WorkerStore;
use std::sync::Arc;
use std::time::Instant;

/// One heartbeat probe against a single host.
pub async fn heartbeat_one(registry: &HostRegistry, rpc: &SubprocessRpcClient, config: &FleetConfig, host_id: &str) {
    let host = registry.get(host_id);
    let (prev_score, prev_error_count, workers) = match &host {
        Some(h) => (h.health_score, h.error_count, h.worker_count()),
        None => (100, 0, 0),
    };

    let socket = if host_id == config.default_host_id {
        None
    } else {
        Some(host_id)
    };
    let outcome = rpc
        .eval(socket, "t", config.heartbeat_timeout.as_millis() as u64)
        .await;

    match outcome {
        EvalOutcome::Ok { elapsed_ms, .. } => {
            let new_score = health::next_health_score(
                Some(elapsed_ms),
                0,
                workers,
                prev_score,
                prev_error_count,
                true,
            );
            registry.heartbeat_success(host_id, new_score, Instant::now());
            tracing::info!(host_id, elapsed_ms, new_score, "heartbeat succeeded");
        }
        EvalOutcome::Err { reason, .. } => {
            let new_error_count = prev_error_count + 1;
            let new_score =
                health::next_health_score(None, new_error_count, workers, prev_score, prev_error_count, false);
            registry.heartbeat_failure(host_id, new_error_count, new_score, config.error_threshold);
            tracing::warn!(host_id, ?reason, new_error_count, new_score, "heartbeat failed");
            if matches!(reason, EvalReason::HostDead(_)) {
                tracing::warn!(host_id, "host reported dead during heartbeat");
            }
        }
    }
}

/// Result of one full tick, including cleanup-interval work when it ran.
#[derive(Debug, Default)]
pub struct TickReport {
    pub pinged: usize,
    pub stale_marked: Vec<String>,
    pub heal: Option<HealReport>,
    pub redistribution: Option<RedistributionReport>,
}

/// Runs a single heartbeat tick: ping every active host (or the default host
/// if none registered), and, when `run_cleanup` is true, mark
/// stale hosts then invoke the reaper and redistributor on that snapshot,
/// in that order.
pub async fn tick(
    registry: &HostRegistry,
    rpc: &SubprocessRpcClient,
    store: &dyn WorkerStore,
    event_bus: &dyn EventBus,
    config: &FleetConfig,
    run_cleanup: bool,
) -> TickReport {
    let mut active = registry.get_by_status(HostStatus::Active);
    if active.is_empty() {
        registry.register(&config.default_host_id, HostOpts::default());
        active = registry.get_by_status(HostStatus::Active);
    }

    for host in &active {
        heartbeat_one(registry, rpc, config, &host.host_id).await;
    }

    let mut report = TickReport {
        pinged: active.len(),
        ..Default::default()
    };

    if run_cleanup {
        let stale = registry.cleanup_stale(Instant::now(), config.stale_threshold);
        for host_id in &stale {
            tracing::warn!(host_id, "host marked stale");
        }
        report.stale_marked = stale;

        report.heal = Some(
            reaper::heal_orphans(
                registry,
                store,
                event_bus,
                config.max_workers_per_host,
                &config.default_host_id,
            )
            .await,
        );

        report.redistribution = Some(
            redistributor::redistribute(
                registry,
                store,
                event_bus,
                config.max_workers_per_host,
                config.overloaded_threshold,
                config.redistribution_threshold,
                config.max_migrations_per_cycle,
            )
            .await,
        );
    }

    report
}

pub type SharedRpc = Arc<SubprocessRpcClient>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::event_bus::NullEventBus;
    use crate::rpc_client::HostErrorSink;
    use crate::worker_store::InMemoryWorkerStore;
    use std::time::Duration;

    #[tokio::test]
    async fn tick_bootstraps_default_host_when_fleet_empty() {
        let registry = HostRegistry::new();
        let breaker = Arc::new(CircuitBreaker::new(
            Duration::from_millis(1000),
            Duration::from_secs(60),
        ));
        let sink: HostErrorSink = Arc::new(|_, _| {});
        let rpc = SubprocessRpcClient::new(
            breaker,
            "/nonexistent/emacsclient-binary-xyz".to_string(),
            "server".to_string(),
            sink,
            Arc::new(crate::notifier::NullNotifier),
        );
        let store = InMemoryWorkerStore::new();
        let event_bus = NullEventBus;
        let config = FleetConfig::default();

        let report = tick(&registry, &rpc, &store, &event_bus, &config, false).await;
        assert_eq!(report.pinged, 1);
        assert!(registry.get(&config.default_host_id).is_some());
    }
}
