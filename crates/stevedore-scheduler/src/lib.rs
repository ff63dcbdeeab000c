//! stevedore-scheduler — container placement and provisioning.
//!
//! The [`ClusterScheduler`] is the entry point: callers `obtain` a
//! container for an application and `release` it when done. Underneath:
//!
//! - [`scheduler`] holds the membership table and runs the placement
//!   loop, consulting the strategy chain and the no-host policy.
//! - [`allocator`] creates and destroys containers on one host.
//! - [`image`] coordinates image builds so each (host, image) pair is
//!   built at most once, with concurrent requests sharing one build.
//! - [`host`] is the live per-host record: lifecycle state, container
//!   set, image map.
//!
//! Locking is two-tier. The scheduler-wide lock covers membership
//! bookkeeping only; each host has its own lock serializing builds and
//! creations on it. Neither is ever held across a runtime driver call
//! that can block on the network, except the per-host lock around
//! container creation, which is exactly the serialization the host
//! needs.

pub mod allocator;
pub mod error;
pub mod host;
pub mod image;
pub mod scheduler;

pub use allocator::HostAllocator;
pub use error::{SchedulerError, SchedulerResult};
pub use host::Host;
pub use image::ImageBuildCoordinator;
pub use scheduler::ClusterScheduler;
