//! Subprocess RPC client.
//!
//! Consults the circuit breaker before every subprocess spawn: the guard
//! check happening first is what prevents a dead host from producing one
//! subprocess per call. Classifies non-zero exits against a
//! host-death pattern table and reports host-death to an injected sink
//! (`HostErrorSink`), breaking the dependency cycle onto the host registry
//! instead of lazily requiring it at module load.

use crate::circuit_breaker::{CircuitBreaker, CircuitSnapshot, Guard};
use crate::error::FleetError;
use crate::notifier::{Icon, Notifier, Urgency};
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;

/// Hard ceiling on any single RPC call.
pub const MAX_TIMEOUT_MS: u64 = 30_000;

/// Reason an `eval` call failed to produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalReason {
    Timeout,
    CircuitOpen,
    HostDead(String),
    Exception(String),
}

#[derive(Debug, Clone)]
pub enum EvalOutcome {
    Ok { result: String, elapsed_ms: u64 },
    Err { reason: EvalReason, elapsed_ms: u64 },
}

impl EvalOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, EvalOutcome::Ok { .. })
    }

    pub fn elapsed_ms(&self) -> u64 {
        match self {
            EvalOutcome::Ok { elapsed_ms, .. } => *elapsed_ms,
            EvalOutcome::Err { elapsed_ms, .. } => *elapsed_ms,
        }
    }
}

/// Host-death pattern table: case-insensitive regex -> diagnostic tag.
static HOST_DEATH_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (ci(r"can't find socket"), "socket_not_found"),
        (ci(r"no such file or directory"), "socket_missing"),
        (ci(r"connection refused"), "connection_refused"),
        (ci(r"connection reset"), "connection_reset"),
        (ci(r"server did not respond"), "server_unresponsive"),
        (ci(r"socket.*not available"), "socket_unavailable"),
    ]
});

fn ci(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){pattern}")).expect("static host-death pattern is valid regex")
}

fn classify_stderr(stderr: &str) -> Option<&'static str> {
    HOST_DEATH_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(stderr))
        .map(|(_, tag)| *tag)
}

/// Strips one layer of surrounding double-quotes from `stdout`, if present on
/// both ends.
fn unwrap_quotes(s: &str) -> &str {
    let trimmed = s.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    }
}

/// Sink invoked when a call classifies as host-death, reporting the error to
/// the host registry without the RPC client depending on it directly.
pub type HostErrorSink = Arc<dyn Fn(&str, &str) + Send + Sync>;

pub struct SubprocessRpcClient {
    breaker: Arc<CircuitBreaker>,
    emacsclient_path: String,
    default_host_id: String,
    on_host_error: HostErrorSink,
    notifier: Arc<dyn Notifier>,
}

impl SubprocessRpcClient {
    pub fn new(
        breaker: Arc<CircuitBreaker>,
        emacsclient_path: String,
        default_host_id: String,
        on_host_error: HostErrorSink,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            breaker,
            emacsclient_path,
            default_host_id,
            on_host_error,
            notifier,
        }
    }

    pub fn circuit_state(&self) -> CircuitSnapshot {
        self.breaker.snapshot()
    }

    pub fn reset_circuit(&self) {
        self.breaker.reset();
    }

    /// Evaluate `code` on the host addressed by `socket_name` (`None` omits
    /// the `-s` flag, falling back to `emacsclient`'s own environment
    /// resolution).
    pub async fn eval(&self, socket_name: Option<&str>, code: &str, timeout_ms: u64) -> EvalOutcome {
        let timeout_ms = timeout_ms.clamp(0, MAX_TIMEOUT_MS);
        let now = Instant::now();

        let guard = self.breaker.guard(now);
        let probe = match guard {
            Guard::Blocked => {
                return EvalOutcome::Err {
                    reason: EvalReason::CircuitOpen,
                    elapsed_ms: 0,
                };
            }
            Guard::Proceed { probe } => probe,
        };

        let mut cmd = Command::new(&self.emacsclient_path);
        if let Some(socket) = socket_name {
            cmd.arg("-s").arg(socket);
        }
        cmd.arg("--eval").arg(code);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let elapsed_ms = now.elapsed().as_millis() as u64;
                let err = FleetError::from(e);
                return self.finish_err(
                    socket_name,
                    probe,
                    EvalReason::Exception(err.to_string()),
                    elapsed_ms,
                    now,
                );
            }
        };

        let wait = timeout(Duration::from_millis(timeout_ms), child.wait_with_output()).await;
        let elapsed_ms = now.elapsed().as_millis() as u64;

        let output = match wait {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                let err = FleetError::from(e);
                return self.finish_err(
                    socket_name,
                    probe,
                    EvalReason::Exception(err.to_string()),
                    elapsed_ms,
                    now,
                );
            }
            Err(_elapsed) => {
                return self.finish_err(socket_name, probe, EvalReason::Timeout, elapsed_ms, now);
            }
        };

        if output.status.success() {
            self.breaker.record_success(probe);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let result = unwrap_quotes(&stdout).to_string();
            EvalOutcome::Ok { result, elapsed_ms }
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let reason = match classify_stderr(&stderr) {
                Some(tag) => EvalReason::HostDead(tag.to_string()),
                None => EvalReason::Exception(stderr),
            };
            self.finish_err(socket_name, probe, reason, elapsed_ms, now)
        }
    }

    fn finish_err(
        &self,
        socket_name: Option<&str>,
        was_probe: bool,
        reason: EvalReason,
        elapsed_ms: u64,
        now: Instant,
    ) -> EvalOutcome {
        match &reason {
            EvalReason::HostDead(tag) => {
                self.breaker.trip(
                    Some(tag.clone()),
                    format!("[{tag}] host-death pattern matched"),
                    now,
                );
                let host_id = socket_name.unwrap_or(&self.default_host_id);
                (self.on_host_error)(host_id, &format!("[{tag}] host-death pattern matched"));
                self.notifier.notify(
                    "Host unreachable",
                    &format!("{host_id} tripped the circuit breaker: {tag}"),
                    Urgency::Critical,
                    Icon::Error,
                    5_000,
                );
            }
            EvalReason::Timeout | EvalReason::Exception(_) if was_probe => {
                self.breaker.trip(
                    None,
                    format!("{reason:?}"),
                    now,
                );
                let host_id = socket_name.unwrap_or(&self.default_host_id);
                self.notifier.notify(
                    "Host probe failed",
                    &format!("{host_id} failed its half-open recovery probe"),
                    Urgency::Critical,
                    Icon::Warning,
                    5_000,
                );
            }
            _ => {}
        }
        EvalOutcome::Err { reason, elapsed_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_stderr_patterns() {
        assert_eq!(classify_stderr("emacsclient: can't find socket"), Some("socket_not_found"));
        assert_eq!(classify_stderr("No such file or directory"), Some("socket_missing"));
        assert_eq!(classify_stderr("Connection refused"), Some("connection_refused"));
        assert_eq!(classify_stderr("connection reset by peer"), Some("connection_reset"));
        assert_eq!(
            classify_stderr("*ERROR*: Server did not respond"),
            Some("server_unresponsive")
        );
        assert_eq!(classify_stderr("socket foo not available"), Some("socket_unavailable"));
        assert_eq!(classify_stderr("something unrelated blew up"), None);
    }

    #[test]
    fn unwraps_one_layer_of_quotes() {
        assert_eq!(unwrap_quotes("\"hello\""), "hello");
        assert_eq!(unwrap_quotes("hello"), "hello");
        assert_eq!(unwrap_quotes("\"\""), "");
        assert_eq!(unwrap_quotes("\"a\"b\""), "a\"b");
    }

    #[tokio::test]
    async fn circuit_open_short_circuits_without_spawning() {
        let breaker = Arc::new(CircuitBreaker::new(
            Duration::from_secs(1000),
            Duration::from_secs(60),
        ));
        breaker.trip(Some("x".into()), "x".into(), Instant::now());
        let sink: HostErrorSink = Arc::new(|_, _| {});
        let client = SubprocessRpcClient::new(
            breaker,
            "/nonexistent/emacsclient-binary-xyz".to_string(),
            "server".to_string(),
            sink,
            Arc::new(crate::notifier::NullNotifier),
        );
        let outcome = client.eval(None, "t", 3000).await;
        match outcome {
            EvalOutcome::Err { reason, elapsed_ms } => {
                assert_eq!(reason, EvalReason::CircuitOpen);
                assert_eq!(elapsed_ms, 0);
            }
            _ => panic!("expected circuit_open"),
        }
    }

    #[tokio::test]
    async fn spawn_failure_classifies_as_exception() {
        let breaker = Arc::new(CircuitBreaker::new(
            Duration::from_millis(1000),
            Duration::from_secs(60),
        ));
        let sink: HostErrorSink = Arc::new(|_, _| {});
        let client = SubprocessRpcClient::new(
            breaker,
            "/nonexistent/emacsclient-binary-xyz".to_string(),
            "server".to_string(),
            sink,
            Arc::new(crate::notifier::NullNotifier),
        );
        let outcome = client.eval(None, "t", 3000).await;
        match outcome {
            EvalOutcome::Err { reason, .. } => assert!(matches!(reason, EvalReason::Exception(_))),
            _ => panic!("expected exception"),
        }
    }
}
