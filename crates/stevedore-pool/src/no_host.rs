//! No-host policies — what a placement request does when no host
//! currently qualifies.
//!
//! The strategy is pool-scoped: one instance is configured per scheduler
//! and shared by every request that strikes out, so `Backoff`'s attempt
//! counter deliberately counts across requests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tracing::{debug, trace};

use stevedore_core::HostInfo;

use crate::error::PoolError;
use crate::resizer::PoolResizer;

/// What the scheduler's retry loop should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoHostOutcome {
    /// A freshly provisioned host; place on it directly without
    /// re-filtering.
    Host(HostInfo),
    /// Re-evaluate the placement strategies and try again.
    Retry,
    /// Stop; the request fails with no capacity.
    GiveUp,
}

/// Policy invoked when the placement chain returns no hosts.
///
/// Closed set of variants; the scheduler's retry loop is the only
/// caller, and this is the only retry logic in the system.
#[derive(Debug)]
pub enum NoHostStrategy {
    /// Always give up. Suitable when capacity is managed entirely
    /// outside the scheduler.
    FailFast,
    /// Sleep `interval` and retry, up to `max_attempts` invocations
    /// (`None` = retry forever). Suitable when an external autoscaler is
    /// expected to grow the pool.
    Backoff {
        interval: Duration,
        max_attempts: Option<u32>,
        attempts: AtomicU32,
    },
    /// Grow the pool by one host and place on it. Suitable when no
    /// autoscaler is in play, or the autoscaler should follow the
    /// scheduler's lead.
    ExpandPool,
}

impl NoHostStrategy {
    pub fn backoff(interval: Duration, max_attempts: Option<u32>) -> Self {
        NoHostStrategy::Backoff {
            interval,
            max_attempts,
            attempts: AtomicU32::new(0),
        }
    }

    /// Handle a no-host condition.
    ///
    /// `ExpandPool` escalates a provisioning failure as an error (after
    /// the resizer has restored autoscaler state); the other variants
    /// never fail.
    pub async fn handle(&self, resizer: &PoolResizer) -> Result<NoHostOutcome, PoolError> {
        match self {
            NoHostStrategy::FailFast => {
                debug!("no hosts available, failing fast");
                Ok(NoHostOutcome::GiveUp)
            }
            NoHostStrategy::Backoff {
                interval,
                max_attempts,
                attempts,
            } => {
                trace!(interval_ms = interval.as_millis() as u64, "backing off, waiting for a host");
                tokio::time::sleep(*interval).await;
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                match max_attempts {
                    Some(max) if attempt > *max => {
                        debug!(attempt, max, "backoff attempts exhausted");
                        Ok(NoHostOutcome::GiveUp)
                    }
                    _ => Ok(NoHostOutcome::Retry),
                }
            }
            NoHostStrategy::ExpandPool => {
                let host = resizer.expand_by_one().await?;
                debug!(host = %host.id, "expanded pool with new host");
                Ok(NoHostOutcome::Host(host))
            }
        }
    }
}
