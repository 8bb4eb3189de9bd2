//! Environment-derived configuration for the fleet supervisor.
//!
//! Defaults match the literal constants named throughout the design; every value
//! can be overridden at startup via environment variables so operators can tune
//! cadence and thresholds without a recompile.

use std::time::Duration;

/// Default host id / socket name when `EMACS_SOCKET_NAME` is unset.
pub const DEFAULT_HOST_ID: &str = "server";

/// Default RPC subprocess binary when `EMACSCLIENT` is unset.
pub const DEFAULT_EMACSCLIENT: &str = "emacsclient";

#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Default host id, from `EMACS_SOCKET_NAME`.
    pub default_host_id: String,
    /// Path to the RPC subprocess binary, from `EMACSCLIENT`.
    pub emacsclient_path: String,

    /// Interval between heartbeat ticks.
    pub heartbeat_interval: Duration,
    /// Interval between stale-detection / reaper / redistributor cleanup passes.
    pub cleanup_interval: Duration,
    /// Hard ceiling on any single RPC call.
    pub max_timeout: Duration,
    /// Timeout used for the heartbeat's own no-op ping.
    pub heartbeat_timeout: Duration,

    /// Initial circuit-breaker backoff after a trip from `closed`/`half_open`.
    pub initial_backoff: Duration,
    /// Circuit-breaker backoff ceiling.
    pub max_backoff: Duration,

    /// Consecutive heartbeat failures before a host is marked `error`.
    pub error_threshold: u32,
    /// Max workers a single host may be assigned before it is `at_capacity`.
    pub max_workers_per_host: usize,
    /// Worker-count threshold that alone marks a host `overloaded`.
    pub overloaded_threshold: usize,
    /// Minimum score improvement required to plan a migration.
    pub redistribution_threshold: i64,
    /// Max migrations executed per redistributor cycle.
    pub max_migrations_per_cycle: usize,

    /// How long a host may go without a successful heartbeat before `cleanup_stale`
    /// marks it `stale`.
    pub stale_threshold: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            default_host_id: std::env::var("EMACS_SOCKET_NAME")
                .unwrap_or_else(|_| DEFAULT_HOST_ID.to_string()),
            emacsclient_path: std::env::var("EMACSCLIENT")
                .unwrap_or_else(|_| DEFAULT_EMACSCLIENT.to_string()),

            heartbeat_interval: env_duration_secs("FLEETCTL_HEARTBEAT_INTERVAL_SECS", 30),
            cleanup_interval: env_duration_secs("FLEETCTL_CLEANUP_INTERVAL_SECS", 120),
            max_timeout: Duration::from_millis(env_u64("FLEETCTL_MAX_TIMEOUT_MS", 30_000)),
            heartbeat_timeout: Duration::from_millis(env_u64(
                "FLEETCTL_HEARTBEAT_TIMEOUT_MS",
                3_000,
            )),

            initial_backoff: Duration::from_millis(env_u64(
                "FLEETCTL_INITIAL_BACKOFF_MS",
                1_000,
            )),
            max_backoff: Duration::from_millis(env_u64("FLEETCTL_MAX_BACKOFF_MS", 60_000)),

            error_threshold: env_u32("FLEETCTL_ERROR_THRESHOLD", 3),
            max_workers_per_host: env_usize("FLEETCTL_MAX_WORKERS_PER_HOST", 5),
            overloaded_threshold: env_usize("FLEETCTL_OVERLOADED_THRESHOLD", 4),
            redistribution_threshold: env_i64("FLEETCTL_REDISTRIBUTION_THRESHOLD", 20),
            max_migrations_per_cycle: env_usize("FLEETCTL_MAX_MIGRATIONS_PER_CYCLE", 2),

            stale_threshold: env_duration_secs("FLEETCTL_STALE_THRESHOLD_SECS", 120),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_u64(key, default_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = FleetConfig::default();
        assert_eq!(cfg.default_host_id, DEFAULT_HOST_ID.to_string());
        assert_eq!(cfg.max_timeout, Duration::from_secs(30));
        assert_eq!(cfg.initial_backoff, Duration::from_secs(1));
        assert_eq!(cfg.max_backoff, Duration::from_secs(60));
        assert_eq!(cfg.max_workers_per_host, 5);
        assert_eq!(cfg.overloaded_threshold, 4);
        assert_eq!(cfg.redistribution_threshold, 20);
        assert_eq!(cfg.max_migrations_per_cycle, 2);
    }
}
