//! Scheduler error types.

use thiserror::Error;

use stevedore_core::{ContainerId, HostId, ImageName};
use stevedore_pool::PoolError;

/// Errors surfaced by `obtain` and `release`.
///
/// Every `obtain` either returns a container or one of these; there are
/// no partial or ambiguous outcomes.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Placement exhausted and the no-host strategy gave up.
    #[error("no hosts available for placement")]
    NoCapacity,

    /// A host did not reach RUNNING within the configured wait.
    #[error("host {0} did not become ready in time")]
    HostNotReady(HostId),

    /// Waiting on another request's image build exceeded the bound.
    #[error("timed out waiting for image {0} to build")]
    BuildTimeout(ImageName),

    /// The underlying build call failed; all current waiters see this
    /// and the ticket is cleared so a later request may retry.
    #[error("build of image {image} failed: {reason}")]
    BuildFailed { image: ImageName, reason: String },

    /// `release` was called for a container this scheduler is not
    /// tracking.
    #[error("container {0} is not currently allocated")]
    NotAllocated(ContainerId),

    /// The pool could not be resized.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Container runtime driver failure.
    #[error("runtime error: {0}")]
    Runtime(#[from] anyhow::Error),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
