//! stevedore-pool — elastic host pool management.
//!
//! Wraps the external `ElasticHostPool` behind a [`PoolResizer`] that
//! knows how to grow the pool (one expansion in flight at a time, with
//! the external autoscaler suspended) and which hosts to reclaim when
//! shrinking. The [`NoHostStrategy`] variants decide what a placement
//! request does when no host currently qualifies.

pub mod error;
pub mod no_host;
pub mod resizer;

pub use error::PoolError;
pub use no_host::{NoHostOutcome, NoHostStrategy};
pub use resizer::PoolResizer;
