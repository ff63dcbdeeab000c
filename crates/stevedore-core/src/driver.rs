//! Traits implemented by external collaborators.
//!
//! The scheduler is a library: it does not talk to Docker or a cloud API
//! itself. Image builds, container lifecycle, host provisioning, and
//! autoscaler policy are all behind these traits, treated as blocking,
//! fallible remote calls.

use async_trait::async_trait;

use crate::types::{
    BuildSpec, ContainerHandle, HostId, HostInfo, ImageId, ResourceSpec,
};

/// Container runtime driver: builds images and runs containers on a host.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build the image described by `spec` on `host`.
    ///
    /// Slow; the scheduler guarantees this is never called while holding
    /// a host or scheduler lock, and at most once concurrently per
    /// (host, image-name) pair.
    async fn build_image(&self, host: &HostId, spec: &BuildSpec) -> anyhow::Result<ImageId>;

    /// Create and start a container from a built image.
    async fn create_container(
        &self,
        host: &HostId,
        image: &ImageId,
        resources: &ResourceSpec,
    ) -> anyhow::Result<ContainerHandle>;

    /// Stop a running container.
    async fn stop_container(&self, host: &HostId, handle: &ContainerHandle)
    -> anyhow::Result<()>;

    /// Remove a stopped container.
    async fn remove_container(
        &self,
        host: &HostId,
        handle: &ContainerHandle,
    ) -> anyhow::Result<()>;
}

/// The elastic pool of hosts underneath the scheduler.
#[async_trait]
pub trait ElasticHostPool: Send + Sync {
    /// Provision `n` more hosts. Returns once they are usable.
    async fn add_hosts(&self, n: usize) -> anyhow::Result<Vec<HostInfo>>;

    /// Provision `n` more hosts in `zone`. Pools that do not place by
    /// zone fall back to plain `add_hosts`.
    async fn add_hosts_in_zone(&self, zone: &str, n: usize) -> anyhow::Result<Vec<HostInfo>> {
        let _ = zone;
        self.add_hosts(n).await
    }

    /// Decommission one host.
    async fn remove_host(&self, host: &HostId) -> anyhow::Result<()>;

    /// Current pool size.
    async fn current_size(&self) -> usize;

    /// Current pool membership.
    async fn members(&self) -> Vec<HostInfo>;
}

/// An external autoscaler watching the host pool.
///
/// Suspended while the scheduler resizes the pool itself, so the two
/// never fight over the pool size.
#[async_trait]
pub trait AutoscalerPolicy: Send + Sync {
    async fn suspend(&self);
    async fn resume(&self);
    /// Raise (or lower) the minimum pool size the policy will maintain.
    async fn set_minimum_size(&self, n: usize);
}
