// Health-checked, version-ranked, response-time-sorted pick of a primary +
// N-1 secondaries. Grounded on
// `infrastructure/service_discovery.rs`'s `ServiceInstance`/`HealthStatus`/
// `LoadBalancer::select_service` shape; the resource-score heuristics there
// are replaced with the spec's deterministic version-then-latency ranking
// plus a decision trace for observability.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::peer_client::PeerClient;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct SemVer {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SemVer {
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().splitn(3, '.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next().unwrap_or("0").parse().ok()?;
        Some(Self { major, minor, patch })
    }

    pub fn same_major_minor(&self, other: &SemVer) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize)]
struct ScoredCandidate {
    endpoint: String,
    version: SemVer,
    latency: Duration,
}

/// One stage of the selection pipeline, with the surviving endpoint set
/// after that stage.
#[derive(Debug, Clone, Serialize)]
pub struct TraceStage {
    pub stage: &'static str,
    pub surviving: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionTrace {
    pub stages: Vec<TraceStage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectionResult {

    pub primary: String,
    pub secondaries: Vec<String>,
    pub trace: DecisionTrace,
}

#[derive(Clone)]
pub struct ServiceSelector {
    peer_client: PeerClient,
    expected_version: SemVer,
}

impl ServiceSelector {
    pub fn new(peer_client: PeerClient, expected_version: &str) -> Self {
        let expected_version = SemVer::parse(expected_version)
            .unwrap_or(SemVer { major: 0, minor: 1, patch: 0 });
        Self { peer_client, expected_version }
    }

    /// Selects a primary + `replica_count - 1` secondaries from
    /// `candidates`, optionally narrowed by an allow-list and/or deny-list,
    /// and optionally sync-checked for a specific wallet before the health
    /// check.
    #[instrument(skip(self, candidates, allow_list, deny_list))]
    pub async fn select(
        &self,
        candidates: Vec<Candidate>,
        allow_list: Option<&[String]>,
        deny_list: Option<&[String]>,
        sync_check_wallet: Option<&str>,
        replica_count: usize,
    ) -> AppResult<SelectionResult> {
        let mut trace = Vec::new();
        let mut pool: Vec<String> = candidates.into_iter().map(|c| c.endpoint).collect();
        pool.sort();
        trace.push(TraceStage { stage: "get_all", surviving: pool.clone() });

        if let Some(allow) = allow_list {
            pool.retain(|e| allow.contains(e));
        }
        trace.push(TraceStage { stage: "filter_allow", surviving: pool.clone() });

        if let Some(deny) = deny_list {
            pool.retain(|e| !deny.contains(e));
        }
        trace.push(TraceStage { stage: "filter_deny", surviving: pool.clone() });

        if let Some(wallet) = sync_check_wallet {
            let mut survivors = Vec::new();
            for endpoint in &pool {
                match self.peer_client.check_sync_status(endpoint, wallet).await {
                    // First-time: behind and not yet configured. Acceptable.
                    Ok(None) => survivors.push(endpoint.clone()),
                    // Existing and not behind (we only know "exists"; a
                    // clock value is reported, never negative).
                    Ok(Some(status)) if status.clock_value >= 0 => survivors.push(endpoint.clone()),
                    Ok(Some(_)) => warn!("{endpoint} reported a behind sync status for {wallet}"),
                    Err(e) => warn!("sync-check failed for {endpoint}: {e}"),
                }
            }
            pool = survivors;
        }
        trace.push(TraceStage { stage: "filter_sync", surviving: pool.clone() });

        let scored = self.health_check_all(&pool).await;
        let healthy_endpoints: Vec<String> = scored.iter().map(|s| s.endpoint.clone()).collect();
        trace.push(TraceStage { stage: "filter_health", surviving: healthy_endpoints });

        let mut ranked = scored;
        // Highest version first, then lowest latency; ties broken on
        // endpoint string so selection is reproducible.
        ranked.sort_by(|a, b| {
            b.version
                .cmp(&a.version)
                .then(a.latency.cmp(&b.latency))
                .then(a.endpoint.cmp(&b.endpoint))
        });

        if ranked.is_empty() {
            return Err(AppError::NoPrimaryAvailable(format!(
                "no healthy candidate survived selection; trace: {:?}",
                trace
            )));
        }

        let primary = ranked[0].endpoint.clone();
        let secondaries: Vec<String> = ranked
            .iter()
            .skip(1)
            .take(replica_count.saturating_sub(1))
            .map(|c| c.endpoint.clone())
            .collect();

        trace.push(TraceStage {
            stage: "select",
            surviving: std::iter::once(primary.clone()).chain(secondaries.clone()).collect(),
        });

        info!(primary = %primary, secondaries = ?secondaries, "selected replica set");
        Ok(SelectionResult { primary, secondaries, trace: DecisionTrace { stages: trace } })
    }

    async fn health_check_all(&self, pool: &[String]) -> Vec<ScoredCandidate> {
        let checks = pool.iter().map(|endpoint| {
            let endpoint = endpoint.clone();
            let peer_client = self.peer_client.clone();
            async move {
                let started = Instant::now();
                let result = peer_client.check_health(&endpoint).await;
                let latency = started.elapsed();
                (endpoint, result, latency)
            }
        });

        let results = futures::future::join_all(checks).await;

        let mut scored = Vec::new();
        for (endpoint, result, latency) in results {
            match result {
                Ok(health) => match SemVer::parse(&health.version) {
                    Some(version) if version.same_major_minor(&self.expected_version) => {
                        scored.push(ScoredCandidate { endpoint, version, latency });
                    }
                    Some(version) => warn!(
                        "{endpoint} version {:?} mismatches expected {:?}",
                        version, self.expected_version
                    ),
                    None => warn!("{endpoint} returned unparseable version {}", health.version),
                },
                Err(e) => warn!("health check failed for {endpoint}: {e}"),
            }
        }
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semver_parses_and_compares_major_minor() {
        let a = SemVer::parse("1.2.1").unwrap();
        let b = SemVer::parse("1.2.0").unwrap();
        assert!(a.same_major_minor(&b));
        assert!(a > b);
        let c = SemVer::parse("1.1.9").unwrap();
        assert!(!a.same_major_minor(&c));
    }
}
