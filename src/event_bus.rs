//! Event bus (external collaborator, best-effort).
//!
//! Failures to emit must never propagate. Production wiring logs the
//! event through `tracing`; tests use `NullEventBus`.

pub trait EventBus: Send + Sync {
    fn emit(&self, event_name: &str, payload: serde_json::Value);
}

pub struct TracingEventBus;

impl EventBus for TracingEventBus {
    fn emit(&self, event_name: &str, payload: serde_json::Value) {
        tracing::info!(event = event_name, payload = %payload, "event emitted");
    }
}

#[derive(Default)]
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn emit(&self, _event_name: &str, _payload: serde_json::Value) {}
}
