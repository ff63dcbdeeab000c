//! Placement request — what the caller wants placed, and where it may go.

use stevedore_core::{BuildSpec, ResourceSpec};

use crate::strategy::PlacementStrategy;

/// Descriptor for one `obtain` call: the application being placed, the
/// image it runs, its resource needs, and any request-supplied placement
/// strategies (applied after the infrastructure-wide ones).
///
/// Immutable; construct a fresh request per `obtain` call.
#[derive(Debug, Clone)]
pub struct PlacementRequest {
    pub app_id: String,
    pub build: BuildSpec,
    pub resources: ResourceSpec,
    pub strategies: Vec<PlacementStrategy>,
}

impl PlacementRequest {
    pub fn new(app_id: impl Into<String>, build: BuildSpec) -> Self {
        Self {
            app_id: app_id.into(),
            build,
            resources: ResourceSpec::default(),
            strategies: Vec::new(),
        }
    }

    pub fn with_resources(mut self, resources: ResourceSpec) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_strategy(mut self, strategy: PlacementStrategy) -> Self {
        self.strategies.push(strategy);
        self
    }
}
