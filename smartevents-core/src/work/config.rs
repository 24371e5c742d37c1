use std::time::Duration;

use serde::{Deserialize, Serialize};
use smartevents_model::OwnerId;

/// Knobs for the work manager and its tickers.
///
/// All fields carry defaults so deployments only need to override what they
/// tune.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkConfig {
    /// Identity of this process in the ledger. Generated when absent.
    pub worker_id: Option<String>,
    /// Cadence of the dispatch tick (ms).
    pub dispatch_interval_ms: u64,
    /// Cadence of the orphan rebalancing tick (ms).
    pub rebalance_interval_ms: u64,
    /// Work untouched for longer than this is adopted by the rebalancer.
    pub orphan_lease_secs: u64,
    /// Fire a dispatch as soon as new work is scheduled instead of waiting
    /// for the next tick.
    pub dispatch_on_schedule: bool,
    /// Give up on a resource after this many dispatch attempts and mark it
    /// failed. `None` retries until the downstream system recovers.
    pub max_attempts: Option<u32>,
    /// How long shutdown waits for running ticks and fired dispatches to
    /// finish (ms).
    pub shutdown_grace_ms: u64,
}

impl Default for WorkConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            dispatch_interval_ms: 5_000,
            rebalance_interval_ms: 5 * 60 * 1_000,
            orphan_lease_secs: 5 * 60,
            dispatch_on_schedule: true,
            max_attempts: None,
            shutdown_grace_ms: 30_000,
        }
    }
}

impl WorkConfig {
    /// Dispatch tick period.
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    /// Rebalance tick period.
    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_millis(self.rebalance_interval_ms)
    }

    /// Orphan lease as a signed duration, saturating at the largest
    /// representable span.
    pub fn orphan_lease(&self) -> chrono::Duration {
        i64::try_from(self.orphan_lease_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Upper bound on how long shutdown waits for running work.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Resolves the owner identity for this process.
    pub fn owner_id(&self) -> OwnerId {
        match self.worker_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => OwnerId::new(id),
            _ => OwnerId::generate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_polling_cadence() {
        let config = WorkConfig::default();
        assert_eq!(config.dispatch_interval(), Duration::from_secs(5));
        assert_eq!(config.rebalance_interval(), Duration::from_secs(300));
        assert_eq!(config.orphan_lease(), chrono::Duration::minutes(5));
        assert!(config.max_attempts.is_none());
    }

    #[test]
    fn blank_worker_id_generates_identity() {
        let config = WorkConfig {
            worker_id: Some("  ".into()),
            ..WorkConfig::default()
        };
        assert!(config.owner_id().as_str().starts_with("manager-"));

        let named = WorkConfig {
            worker_id: Some("manager-0".into()),
            ..WorkConfig::default()
        };
        assert_eq!(named.owner_id(), OwnerId::new("manager-0"));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: WorkConfig =
            serde_json::from_str(r#"{"dispatch_interval_ms": 1000}"#).unwrap();
        assert_eq!(config.dispatch_interval_ms, 1_000);
        assert_eq!(config.orphan_lease_secs, 300);
    }

    #[test]
    fn oversized_lease_saturates() {
        for secs in [1_000_000_000_000_000, u64::MAX] {
            let config = WorkConfig {
                orphan_lease_secs: secs,
                ..WorkConfig::default()
            };
            assert_eq!(config.orphan_lease(), chrono::Duration::MAX);
        }
    }
}
