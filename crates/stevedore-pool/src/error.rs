//! Pool error types.

use thiserror::Error;

/// Errors from pool resize operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool could not provision a new host: {0}")]
    ProvisioningFailed(#[source] anyhow::Error),
}
