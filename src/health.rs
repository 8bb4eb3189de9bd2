//! Health scorer. Pure functions over numbers; no I/O.

/// `ms ≤ 500` -> 0, `ms ≥ 2000` -> -40, linear in between; `None` (failure) -> -40.
pub fn latency_penalty(ms: Option<u64>) -> i64 {
    match ms {
        None => -40,
        Some(ms) if ms <= 500 => 0,
        Some(ms) if ms >= 2000 => -40,
        Some(ms) => {
            let frac = (ms - 500) as f64 / 1500.0;
            -(frac * 40.0).round() as i64
        }
    }
}

/// `-min(50, 15*n)`.
pub fn error_penalty(n: u32) -> i64 {
    -((15 * n as i64).min(50))
}

/// `-2*max(0, workers - 1)`, the first worker is free.
pub fn load_penalty(workers: usize) -> i64 {
    let over = workers.saturating_sub(1) as i64;
    -2 * over.max(0)
}

/// `clamp(100 + latency + error + load, 0, 100)`.
pub fn raw_score(latency_ms: Option<u64>, error_count: u32, workers: usize) -> i64 {
    let score = 100 + latency_penalty(latency_ms) + error_penalty(error_count) + load_penalty(workers);
    score.clamp(0, 100)
}

/// EWMA smoothing with `alpha = 0.3`. Ties (`x.5`) round down (`83.5 -> 83`),
/// so this uses `ceil(x - 0.5)` rather than `f64::round`'s
/// round-half-away-from-zero, which would send that exact case to 84 instead.
pub fn ewma_blend(raw: i64, prev: i64) -> i64 {
    let blended = 0.3 * raw as f64 + 0.7 * prev as f64;
    (blended - 0.5).ceil() as i64
}

/// Computes the new health score for a single measurement, applying the EWMA
/// blend and, on success after prior errors, the +5 recovery bonus,
/// clamped to the `[0,100]` invariant.
pub fn next_health_score(
    latency_ms: Option<u64>,
    error_count: u32,
    workers: usize,
    prev_score: i64,
    prev_error_count: u32,
    succeeded: bool,
) -> i64 {
    let raw = raw_score(latency_ms, error_count, workers);
    let mut blended = ewma_blend(raw, prev_score);
    if succeeded && prev_error_count > 0 {
        blended += 5;
    }
    blended.clamp(0, 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_penalty_boundaries() {
        assert_eq!(latency_penalty(Some(0)), 0);
        assert_eq!(latency_penalty(Some(500)), 0);
        assert_eq!(latency_penalty(Some(2000)), -40);
        assert_eq!(latency_penalty(Some(5000)), -40);
        assert_eq!(latency_penalty(None), -40);
    }

    #[test]
    fn error_penalty_caps_at_50() {
        assert_eq!(error_penalty(0), 0);
        assert_eq!(error_penalty(1), -15);
        assert_eq!(error_penalty(3), -45);
        assert_eq!(error_penalty(10), -50);
    }

    #[test]
    fn load_penalty_first_worker_is_free() {
        assert_eq!(load_penalty(0), 0);
        assert_eq!(load_penalty(1), 0);
        assert_eq!(load_penalty(2), -2);
        assert_eq!(load_penalty(5), -8);
    }

    #[test]
    fn scenario_single_success_at_150ms() {
        // score 100, single successful ping at 150ms -> raw 100, EWMA 100.
        let score = next_health_score(Some(150), 0, 0, 100, 0, true);
        assert_eq!(score, 100);
    }

    #[test]
    fn scenario_single_failure() {
        // raw = 100 - 40 - 15 = 45, EWMA = 0.3*45 + 0.7*100 = 83.5 -> 83.
        let raw = raw_score(None, 1, 0);
        assert_eq!(raw, 45);
        let score = next_health_score(None, 1, 0, 100, 0, false);
        assert_eq!(score, 83);
    }

    #[test]
    fn recovery_bonus_applies_only_after_prior_errors_and_success() {
        let score = next_health_score(Some(100), 0, 0, 50, 2, true);
        // raw=100, ewma = 0.3*100+0.7*50 = 65, +5 = 70
        assert_eq!(score, 70);

        let no_bonus = next_health_score(Some(100), 0, 0, 50, 0, true);
        assert_eq!(no_bonus, 65);
    }

    #[test]
    fn clamped_to_one_hundred_even_with_bonus() {
        let score = next_health_score(Some(100), 0, 0, 98, 1, true);
        assert!(score <= 100);
    }
}
