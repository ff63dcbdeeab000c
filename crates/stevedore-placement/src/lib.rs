//! stevedore-placement — host selection for new containers.
//!
//! Two pure algorithms live here:
//!
//! - The [`PlacementStrategy`] chain: a side-effect-free filter pipeline
//!   narrowing the set of candidate hosts for one placement request.
//! - [`node_placement`]: the balancing algorithms deciding where the pool
//!   grows and which empty hosts to reclaim when it shrinks.
//!
//! Neither touches scheduler state; both take snapshots in and return
//! decisions out.

pub mod node_placement;
pub mod request;
pub mod strategy;

pub use node_placement::{HostFootprint, hosts_to_remove, zones_for_additions};
pub use request::PlacementRequest;
pub use strategy::{HostCandidate, PlacementStrategy, filter_candidates};
