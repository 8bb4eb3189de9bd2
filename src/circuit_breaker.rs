//! Process-wide circuit breaker.
//!
//! Three states with exponential backoff and single-probe recovery. State
//! transitions on the `open -> half_open` edge are done with a CAS on an
//! `AtomicU8` so exactly one concurrent caller wins the probe slot; losers
//! observe `circuit_open` without spawning anything.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            CLOSED => CircuitState::Closed,
            OPEN => CircuitState::Open,
            HALF_OPEN => CircuitState::HalfOpen,
            _ => unreachable!("invalid circuit breaker state tag"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub tripped_at: Option<Instant>,
    pub backoff_ms: u64,
    pub crash_count: u64,
    pub last_error: Option<String>,
    pub last_tag: Option<String>,
    pub recovery_at: Option<Instant>,
}

#[derive(Debug)]
struct CircuitMeta {
    tripped_at: Option<Instant>,
    backoff_ms: u64,
    crash_count: u64,
    last_error: Option<String>,
    last_tag: Option<String>,
    recovery_at: Option<Instant>,
}

/// Outcome of consulting the breaker before a subprocess spawn.
pub enum Guard {
    /// Caller may proceed. `probe` is true only for the single winner of the
    /// `open -> half_open` race.
    Proceed { probe: bool },
    /// Breaker is open and backoff has not elapsed, or this caller lost the
    /// probe race. No subprocess should be spawned.
    Blocked,
}

pub struct CircuitBreaker {
    state: AtomicU8,
    meta: Mutex<CircuitMeta>,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl CircuitBreaker {
    pub fn new(initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            state: AtomicU8::new(CLOSED),
            meta: Mutex::new(CircuitMeta {
                tripped_at: None,
                backoff_ms: initial_backoff.as_millis() as u64,
                crash_count: 0,
                last_error: None,
                last_tag: None,
                recovery_at: None,
            }),
            initial_backoff_ms: initial_backoff.as_millis() as u64,
            max_backoff_ms: max_backoff.as_millis() as u64,
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let meta = self.meta.lock();
        CircuitSnapshot {
            state: self.state.load(Ordering::SeqCst).into(),
            tripped_at: meta.tripped_at,
            backoff_ms: meta.backoff_ms,
            crash_count: meta.crash_count,
            last_error: meta.last_error.clone(),
            last_tag: meta.last_tag.clone(),
            recovery_at: meta.recovery_at,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.load(Ordering::SeqCst).into()
    }

    /// Resets the breaker to `closed` with backoff at its initial value.
    /// Test/ops-only, does not reset the monotone `crash_count`.
    pub fn reset(&self) {
        self.state.store(CLOSED, Ordering::SeqCst);
        let mut meta = self.meta.lock();
        meta.backoff_ms = self.initial_backoff_ms;
        meta.tripped_at = None;
        meta.recovery_at = Some(Instant::now());
    }

    /// Consult the breaker before spawning a subprocess.
    pub fn guard(&self, now: Instant) -> Guard {
        loop {
            let current = self.state.load(Ordering::SeqCst);
            match current {
                CLOSED | HALF_OPEN => return Guard::Proceed { probe: false },
                OPEN => {
                    let elapsed_ok = {
                        let meta = self.meta.lock();
                        match meta.tripped_at {
                            Some(tripped_at) => {
                                now.duration_since(tripped_at).as_millis() as u64
                                    >= meta.backoff_ms
                            }
                            None => true,
                        }
                    };
                    if !elapsed_ok {
                        return Guard::Blocked;
                    }
                    match self.state.compare_exchange(
                        OPEN,
                        HALF_OPEN,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    ) {
                        Ok(_) => return Guard::Proceed { probe: true },
                        Err(_) => return Guard::Blocked,
                    }
                }
                _ => unreachable!("invalid circuit breaker state tag"),
            }
        }
    }

    /// Call succeeded. If it was a half-open probe, closes the circuit and
    /// resets backoff to its initial value.
    pub fn record_success(&self, was_probe: bool) {
        if was_probe {
            self.state.store(CLOSED, Ordering::SeqCst);
            let mut meta = self.meta.lock();
            meta.backoff_ms = self.initial_backoff_ms;
            meta.recovery_at = Some(Instant::now());
        }
    }

    /// Trip the breaker. Doubles backoff (capped) if already open, otherwise
    /// resets to the initial backoff.
    pub fn trip(&self, tag: Option<String>, error: String, now: Instant) {
        let prior = self.state.swap(OPEN, Ordering::SeqCst);
        let mut meta = self.meta.lock();
        meta.backoff_ms = if prior == OPEN {
            (meta.backoff_ms.saturating_mul(2)).min(self.max_backoff_ms)
        } else {
            self.initial_backoff_ms
        };
        meta.tripped_at = Some(now);
        meta.crash_count += 1;
        meta.last_error = Some(error);
        meta.last_tag = tag;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(Duration::from_millis(1000), Duration::from_millis(60_000))
    }

    #[test]
    fn starts_closed_and_proceeds() {
        let b = breaker();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(matches!(b.guard(Instant::now()), Guard::Proceed { probe: false }));
    }

    #[test]
    fn trip_opens_with_initial_backoff() {
        let b = breaker();
        b.trip(Some("connection_refused".into()), "refused".into(), Instant::now());
        assert_eq!(b.state(), CircuitState::Open);
        let snap = b.snapshot();
        assert_eq!(snap.backoff_ms, 1000);
        assert_eq!(snap.crash_count, 1);
    }

    #[test]
    fn blocked_before_backoff_elapses() {
        let b = breaker();
        let t0 = Instant::now();
        b.trip(Some("connection_refused".into()), "refused".into(), t0);
        assert!(matches!(b.guard(t0), Guard::Blocked));
    }

    #[test]
    fn half_open_probe_wins_and_closes_on_success() {
        let b = breaker();
        let t0 = Instant::now();
        b.trip(Some("connection_refused".into()), "refused".into(), t0);
        let later = t0 + Duration::from_millis(1500);
        match b.guard(later) {
            Guard::Proceed { probe } => assert!(probe),
            Guard::Blocked => panic!("expected probe to proceed"),
        }
        assert_eq!(b.state(), CircuitState::HalfOpen);
        b.record_success(true);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().backoff_ms, 1000);
    }

    #[test]
    fn half_open_probe_failure_reopens_with_backoff_reset_to_initial() {
        let b = breaker();
        let t0 = Instant::now();
        b.trip(Some("connection_refused".into()), "refused".into(), t0);
        let later = t0 + Duration::from_millis(1500);
        assert!(matches!(b.guard(later), Guard::Proceed { probe: true }));
        b.trip(Some("connection_refused".into()), "refused again".into(), later);
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.snapshot().backoff_ms, 1000);
        assert_eq!(b.snapshot().crash_count, 2);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let b = breaker();
        let mut now = Instant::now();
        for _ in 0..20 {
            b.trip(Some("connection_refused".into()), "refused".into(), now);
            now += Duration::from_millis(1);
        }
        assert_eq!(b.snapshot().backoff_ms, 60_000);
        assert_eq!(b.snapshot().crash_count, 20);
    }

    #[test]
    fn crash_count_survives_recovery() {
        let b = breaker();
        let t0 = Instant::now();
        b.trip(Some("x".into()), "x".into(), t0);
        let later = t0 + Duration::from_millis(2000);
        assert!(matches!(b.guard(later), Guard::Proceed { probe: true }));
        b.record_success(true);
        assert_eq!(b.snapshot().crash_count, 1);
    }

    #[test]
    fn manual_reset_restores_closed_without_erasing_crash_count() {
        let b = breaker();
        b.trip(Some("x".into()), "x".into(), Instant::now());
        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().backoff_ms, 1000);
        assert_eq!(b.snapshot().crash_count, 1);
    }
}
