use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use fleetctl::circuit_breaker::CircuitBreaker;
use fleetctl::config::FleetConfig;
use fleetctl::event_bus::{EventBus, TracingEventBus};
use fleetctl::notifier::{DesktopNotifier, Notifier};
use fleetctl::reaper;
use fleetctl::redistributor;
use fleetctl::registry::HostRegistry;
use fleetctl::rpc_client::{HostErrorSink, SubprocessRpcClient};
use fleetctl::supervisor::Supervisor;
use fleetctl::types::HostOpts;
use fleetctl::worker_store::{InMemoryWorkerStore, WorkerStore};
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
struct AppState {
    registry: Arc<HostRegistry>,
    rpc: Arc<SubprocessRpcClient>,
    store: Arc<dyn WorkerStore>,
    event_bus: Arc<dyn EventBus>,
    config: Arc<FleetConfig>,
    supervisor: Arc<Supervisor>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleetctl=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting fleet supervisor");

    let config = FleetConfig::default();
    tracing::info!(
        default_host_id = %config.default_host_id,
        emacsclient = %config.emacsclient_path,
        "loaded configuration"
    );

    let registry = Arc::new(HostRegistry::new());
    registry.register(&config.default_host_id, HostOpts::default());

    let breaker = Arc::new(CircuitBreaker::new(config.initial_backoff, config.max_backoff));

    let error_sink_registry = Arc::clone(&registry);
    let error_threshold = config.error_threshold;
    let on_host_error: HostErrorSink = Arc::new(move |host_id: &str, msg: &str| {
        error_sink_registry.mark_error(host_id, msg, error_threshold);
    });

    let notifier: Arc<dyn Notifier> = Arc::new(DesktopNotifier);

    let rpc = Arc::new(SubprocessRpcClient::new(
        Arc::clone(&breaker),
        config.emacsclient_path.clone(),
        config.default_host_id.clone(),
        on_host_error,
        Arc::clone(&notifier),
    ));

    let store: Arc<dyn WorkerStore> = Arc::new(InMemoryWorkerStore::new());
    let event_bus: Arc<dyn EventBus> = Arc::new(TracingEventBus);

    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&registry),
        Arc::clone(&rpc),
        Arc::clone(&store),
        Arc::clone(&event_bus),
        config.clone(),
    ));
    supervisor.start().await;

    let state = AppState {
        registry,
        rpc,
        store,
        event_bus,
        config: Arc::new(config),
        supervisor,
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_check))
        .route("/heal", post(heal_orphans_handler))
        .route("/redistribute", post(redistribute_handler))
        .route("/circuit/reset", post(reset_circuit_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080")
        .await
        .expect("Failed to bind to port 8080");

    tracing::info!("Listening on http://0.0.0.0:8080");

    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[derive(Serialize)]
struct HostView {
    host_id: String,
    status: fleetctl::types::HostStatus,
    health_score: i64,
    error_count: u32,
    worker_count: usize,
}

#[derive(Serialize)]
struct CircuitView {
    state: String,
    backoff_ms: u64,
    crash_count: u64,
    last_tag: Option<String>,
}

/// `GET /status`: fleet snapshot and circuit-breaker state, covering the
/// whole host registry.
async fn status_check(State(state): State<AppState>) -> impl IntoResponse {
    let hosts: Vec<HostView> = state
        .registry
        .get_all()
        .into_iter()
        .map(|h| HostView {
            host_id: h.host_id,
            status: h.status,
            health_score: h.health_score,
            error_count: h.error_count,
            worker_count: h.worker_count(),
        })
        .collect();

    let snap = state.rpc.circuit_state();
    let circuit = CircuitView {
        state: format!("{:?}", snap.state),
        backoff_ms: snap.backoff_ms,
        crash_count: snap.crash_count,
        last_tag: snap.last_tag,
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "hosts": hosts,
            "circuit": circuit,
            "supervisor_running": state.supervisor.is_running(),
        })),
    )
}

/// `POST /heal`: manual mirror of the automatic per-cleanup-interval reaper
/// invocation.
async fn heal_orphans_handler(State(state): State<AppState>) -> impl IntoResponse {
    let report = reaper::heal_orphans(
        &state.registry,
        state.store.as_ref(),
        state.event_bus.as_ref(),
        state.config.max_workers_per_host,
        &state.config.default_host_id,
    )
    .await;
    (StatusCode::OK, Json(report))
}

/// `POST /redistribute`: manual mirror of the automatic redistributor pass.
async fn redistribute_handler(State(state): State<AppState>) -> impl IntoResponse {
    let report = redistributor::redistribute(
        &state.registry,
        state.store.as_ref(),
        state.event_bus.as_ref(),
        state.config.max_workers_per_host,
        state.config.overloaded_threshold,
        state.config.redistribution_threshold,
        state.config.max_migrations_per_cycle,
    )
    .await;
    (StatusCode::OK, Json(report))
}

/// `POST /circuit/reset`: manual mirror of `reset_circuit`.
async fn reset_circuit_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.rpc.reset_circuit();
    (StatusCode::OK, "circuit reset")
}
