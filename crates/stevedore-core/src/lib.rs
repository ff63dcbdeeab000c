//! stevedore-core — shared types for the stevedore scheduler.
//!
//! Defines the domain model (hosts, containers, images), the scheduler
//! configuration, and the traits implemented by external collaborators:
//! the container runtime driver, the elastic host pool, and an optional
//! autoscaler policy.

pub mod config;
pub mod driver;
pub mod sequence;
pub mod types;

pub use config::SchedulerConfig;
pub use driver::{AutoscalerPolicy, ContainerRuntime, ElasticHostPool};
pub use sequence::SequenceGenerator;
pub use types::*;
