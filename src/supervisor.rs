//! Supervisor.
//!
//! Owns the heartbeat loop's background task. Start/stop are idempotent: a
//! second `start` while running is a no-op, and `stop` is cooperative, it
//! flips a flag and interrupts the inter-tick sleep, and the loop exits at
//! its next check of the flag.

use crate::config::FleetConfig;
use crate::event_bus::EventBus;
use crate::heartbeat;
use crate::registry::HostRegistry;
use crate::rpc_client::SubprocessRpcClient;
use crate::worker_store::WorkerStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Mutex};
use tokio::task::JoinHandle;

pub struct Supervisor {
    registry: Arc<HostRegistry>,
    rpc: Arc<SubprocessRpcClient>,
    store: Arc<dyn WorkerStore>,
    event_bus: Arc<dyn EventBus>,
    config: FleetConfig,
    running: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<HostRegistry>,
        rpc: Arc<SubprocessRpcClient>,
        store: Arc<dyn WorkerStore>,
        event_bus: Arc<dyn EventBus>,
        config: FleetConfig,
    ) -> Self {
        Self {
            registry,
            rpc,
            store,
            event_bus,
            config,
            running: Arc::new(AtomicBool::new(false)),
            stop_signal: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// No-op if already running.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let registry = Arc::clone(&self.registry);
        let rpc = Arc::clone(&self.rpc);
        let store = Arc::clone(&self.store);
        let event_bus = Arc::clone(&self.event_bus);
        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let stop_signal = Arc::clone(&self.stop_signal);

        let task = tokio::spawn(async move {
            let mut since_cleanup = config.cleanup_interval;
            while running.load(Ordering::SeqCst) {
                let run_cleanup = since_cleanup >= config.cleanup_interval;

                // Every I/O call a tick makes is already converted to a
                // structured result at its boundary, so a single host's
                // failure cannot abort the tick and there is nothing further
                // to catch here.
                heartbeat::tick(
                    &registry,
                    &rpc,
                    store.as_ref(),
                    event_bus.as_ref(),
                    &config,
                    run_cleanup,
                )
                .await;

                since_cleanup = if run_cleanup {
                    std::time::Duration::ZERO
                } else {
                    since_cleanup + config.heartbeat_interval
                };

                tokio::select! {
                    _ = tokio::time::sleep(config.heartbeat_interval) => {}
                    _ = stop_signal.notified() => break,
                }
            }
        });

        *self.handle.lock().await = Some(task);
    }

    /// No-op if already stopped. Cooperative: interrupts the sleep and waits
    /// for the loop to observe the flag and exit.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stop_signal.notify_waiters();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    pub fn rpc(&self) -> &SubprocessRpcClient {
        &self.rpc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreaker;
    use crate::event_bus::NullEventBus;
    use crate::rpc_client::HostErrorSink;
    use crate::worker_store::InMemoryWorkerStore;
    use std::time::Duration;

    fn supervisor() -> Supervisor {
        let registry = Arc::new(HostRegistry::new());
        let breaker = Arc::new(CircuitBreaker::new(
            Duration::from_millis(1000),
            Duration::from_secs(60),
        ));
        let sink: HostErrorSink = Arc::new(|_, _| {});
        let rpc = Arc::new(SubprocessRpcClient::new(
            breaker,
            "/nonexistent/emacsclient-binary-xyz".to_string(),
            "server".to_string(),
            sink,
            Arc::new(crate::notifier::NullNotifier),
        ));
        let store: Arc<dyn WorkerStore> = Arc::new(InMemoryWorkerStore::new());
        let event_bus: Arc<dyn EventBus> = Arc::new(NullEventBus);
        let mut config = FleetConfig::default();
        config.heartbeat_interval = Duration::from_millis(20);
        config.cleanup_interval = Duration::from_millis(20);
        Supervisor::new(registry, rpc, store, event_bus, config)
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let sup = supervisor();
        sup.start().await;
        sup.start().await;
        assert!(sup.is_running());
        sup.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let sup = supervisor();
        sup.start().await;
        sup.stop().await;
        sup.stop().await;
        assert!(!sup.is_running());
    }
}
