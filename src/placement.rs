//! Placement selector.

use crate::registry::HostRegistry;
use crate::types::{HealthLevel, HostId, HostRecord, HostStatus, ProjectId};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ScoredHost {
    pub host_id: HostId,
    pub score: i64,
    pub disqualified_reason: Option<DisqualifyReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisqualifyReason {
    NotActive,
    AtCapacity,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    NoHosts,
    AllDisqualified,
    Selected,
}

#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub host_id: HostId,
    pub reason: SelectionReason,
    pub scored: Vec<ScoredHost>,
}

/// Affinity bonus: 10 if >= 3 of this host's workers share `project_id`, 5 if
/// >= 1, else 0. Zero when `project_id` is `None`.
pub fn affinity_bonus(registry: &HostRegistry, host: &HostRecord, project_id: Option<&ProjectId>) -> i64 {
    let Some(project_id) = project_id else {
        return 0;
    };
    let matching = host
        .workers
        .iter()
        .filter(|w| registry.worker_project(w).as_deref() == Some(project_id.as_str()))
        .count();
    if matching >= 3 {
        10
    } else if matching >= 1 {
        5
    } else {
        0
    }
}

/// Scores a single host, or disqualifies it. `max_workers_per_host`
/// and the caller-supplied affinity bonus implement the placement formula.
pub fn score_host(
    registry: &HostRegistry,
    host: &HostRecord,
    project_id: Option<&ProjectId>,
    max_workers_per_host: usize,
) -> ScoredHost {
    if host.status != HostStatus::Active {
        return ScoredHost {
            host_id: host.host_id.clone(),
            score: -1,
            disqualified_reason: Some(DisqualifyReason::NotActive),
        };
    }
    if host.worker_count() >= max_workers_per_host {
        return ScoredHost {
            host_id: host.host_id.clone(),
            score: -1,
            disqualified_reason: Some(DisqualifyReason::AtCapacity),
        };
    }
    if host.health_level() == HealthLevel::Unhealthy {
        return ScoredHost {
            host_id: host.host_id.clone(),
            score: -1,
            disqualified_reason: Some(DisqualifyReason::Unhealthy),
        };
    }

    let capacity_bonus = (max_workers_per_host as i64 - host.worker_count() as i64) * 10;
    let affinity = affinity_bonus(registry, host, project_id);
    ScoredHost {
        host_id: host.host_id.clone(),
        score: host.health_score + capacity_bonus + affinity,
        disqualified_reason: None,
    }
}

/// Scores the whole fleet and picks the best host for a new worker spawn.
/// Falls back to `default_host_id` when the fleet is empty or every
/// host is disqualified.
pub fn select_host(
    registry: &HostRegistry,
    project_id: Option<&ProjectId>,
    max_workers_per_host: usize,
    default_host_id: &str,
) -> Selection {
    let hosts = registry.get_all();
    if hosts.is_empty() {
        return Selection {
            host_id: default_host_id.to_string(),
            reason: SelectionReason::NoHosts,
            scored: Vec::new(),
        };
    }

    let mut scored: Vec<ScoredHost> = hosts
        .iter()
        .map(|h| score_host(registry, h, project_id, max_workers_per_host))
        .collect();
    scored.sort_by(|a, b| a.host_id.cmp(&b.host_id));

    // `scored` is sorted by host_id; ties in score are broken by picking the
    // first qualified host in that order.
    let best_score = scored
        .iter()
        .filter(|s| s.disqualified_reason.is_none())
        .map(|s| s.score)
        .max();
    let best = best_score.and_then(|max_score| {
        scored
            .iter()
            .find(|s| s.disqualified_reason.is_none() && s.score == max_score)
    });

    match best {
        Some(best) => Selection {
            host_id: best.host_id.clone(),
            reason: SelectionReason::Selected,
            scored,
        },
        None => Selection {
            host_id: default_host_id.to_string(),
            reason: SelectionReason::AllDisqualified,
            scored,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HostOpts;

    #[test]
    fn scenario_placement_prefers_idle_high_health_host() {
        // h1 health 90, 0 workers; h2 health 85, 4 workers.
        let reg = HostRegistry::new();
        reg.register(&"h1".to_string(), HostOpts::default());
        reg.register(&"h2".to_string(), HostOpts::default());
        reg.heartbeat_success("h1", 90, std::time::Instant::now());
        reg.heartbeat_success("h2", 85, std::time::Instant::now());
        for i in 0..4 {
            reg.bind("h2", &format!("w{i}"));
        }

        let h1 = reg.get("h1").unwrap();
        let h2 = reg.get("h2").unwrap();
        let s1 = score_host(&reg, &h1, None, 5);
        let s2 = score_host(&reg, &h2, None, 5);
        assert_eq!(s1.score, 140);
        assert_eq!(s2.score, 95);

        let selection = select_host(&reg, None, 5, "server");
        assert_eq!(selection.host_id, "h1");
        assert_eq!(selection.reason, SelectionReason::Selected);
    }

    #[test]
    fn empty_fleet_falls_back_to_default() {
        let reg = HostRegistry::new();
        let selection = select_host(&reg, None, 5, "server");
        assert_eq!(selection.host_id, "server");
        assert_eq!(selection.reason, SelectionReason::NoHosts);
    }

    #[test]
    fn all_disqualified_falls_back_to_default() {
        let reg = HostRegistry::new();
        reg.register(&"h1".to_string(), HostOpts::default());
        reg.heartbeat_failure("h1", 3, 10, 3);
        let selection = select_host(&reg, None, 5, "server");
        assert_eq!(selection.host_id, "server");
        assert_eq!(selection.reason, SelectionReason::AllDisqualified);
    }

    #[test]
    fn affinity_bonus_tiers() {
        let reg = HostRegistry::new();
        reg.register(&"h1".to_string(), HostOpts::default());
        reg.bind("h1", &"w1".to_string());
        reg.set_worker_project(&"w1".to_string(), Some("proj".to_string()));
        let host = reg.get("h1").unwrap();
        assert_eq!(affinity_bonus(&reg, &host, Some(&"proj".to_string())), 5);

        reg.bind("h1", &"w2".to_string());
        reg.bind("h1", &"w3".to_string());
        reg.set_worker_project(&"w2".to_string(), Some("proj".to_string()));
        reg.set_worker_project(&"w3".to_string(), Some("proj".to_string()));
        let host = reg.get("h1").unwrap();
        assert_eq!(affinity_bonus(&reg, &host, Some(&"proj".to_string())), 10);

        assert_eq!(affinity_bonus(&reg, &host, None), 0);
    }
}
