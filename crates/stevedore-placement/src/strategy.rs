//! Placement strategy chain.
//!
//! Each strategy is a pure filter over an ordered list of candidate
//! hosts. Strategies compose: each receives the output of the previous
//! one, may drop or reorder hosts, and never mutates shared state.
//! An empty chain is the identity function.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use stevedore_core::HostId;

use crate::request::PlacementRequest;

/// Read-only snapshot of a host offered to the strategy chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCandidate {
    pub id: HostId,
    pub labels: HashMap<String, String>,
    pub container_count: u32,
}

/// Predicate signature for [`PlacementStrategy::Predicate`].
pub type CandidatePredicate =
    Arc<dyn Fn(&HostCandidate, &PlacementRequest) -> bool + Send + Sync>;

/// One link in the placement filter chain.
#[derive(Clone)]
pub enum PlacementStrategy {
    /// Keep only hosts where label `key` equals `value`.
    LabelAffinity { key: String, value: String },
    /// Drop hosts where label `key` equals `value`.
    LabelAntiAffinity { key: String, value: String },
    /// Reject hosts at or above `limit` containers.
    MaxContainers { limit: u32 },
    /// Arbitrary caller-supplied predicate; a host is kept when the
    /// predicate returns true.
    Predicate(CandidatePredicate),
}

impl PlacementStrategy {
    /// Convenience constructor for a predicate strategy.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&HostCandidate, &PlacementRequest) -> bool + Send + Sync + 'static,
    {
        PlacementStrategy::Predicate(Arc::new(f))
    }

    /// Apply this strategy to an ordered candidate list, preserving the
    /// order of the hosts it keeps.
    pub fn filter(
        &self,
        candidates: Vec<HostCandidate>,
        request: &PlacementRequest,
    ) -> Vec<HostCandidate> {
        match self {
            PlacementStrategy::LabelAffinity { key, value } => candidates
                .into_iter()
                .filter(|c| c.labels.get(key).is_some_and(|v| v == value))
                .collect(),
            PlacementStrategy::LabelAntiAffinity { key, value } => candidates
                .into_iter()
                .filter(|c| !c.labels.get(key).is_some_and(|v| v == value))
                .collect(),
            PlacementStrategy::MaxContainers { limit } => candidates
                .into_iter()
                .filter(|c| c.container_count < *limit)
                .collect(),
            PlacementStrategy::Predicate(pred) => candidates
                .into_iter()
                .filter(|c| pred(c, request))
                .collect(),
        }
    }
}

impl fmt::Debug for PlacementStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementStrategy::LabelAffinity { key, value } => f
                .debug_struct("LabelAffinity")
                .field("key", key)
                .field("value", value)
                .finish(),
            PlacementStrategy::LabelAntiAffinity { key, value } => f
                .debug_struct("LabelAntiAffinity")
                .field("key", key)
                .field("value", value)
                .finish(),
            PlacementStrategy::MaxContainers { limit } => f
                .debug_struct("MaxContainers")
                .field("limit", limit)
                .finish(),
            PlacementStrategy::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Run a strategy chain over the candidate list.
///
/// Strategies are evaluated in slice order; the scheduler passes its
/// infrastructure-wide strategies first, then the request's own.
pub fn filter_candidates(
    strategies: &[PlacementStrategy],
    mut candidates: Vec<HostCandidate>,
    request: &PlacementRequest,
) -> Vec<HostCandidate> {
    for strategy in strategies {
        candidates = strategy.filter(candidates, request);
        debug!(
            strategy = ?strategy,
            remaining = candidates.len(),
            app = %request.app_id,
            "applied placement strategy"
        );
    }
    candidates
}
