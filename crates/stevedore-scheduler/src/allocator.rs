//! Per-host allocation.
//!
//! A [`HostAllocator`] serializes every mutating operation against one
//! host, so image builds and container creations on that host cannot
//! race each other's state. It never retries; the scheduler's outer
//! loop owns all retry logic.

use std::sync::Arc;

use tracing::{debug, info, warn};

use stevedore_core::{
    ContainerRecord, ContainerRuntime, ContainerState, SchedulerConfig,
};
use stevedore_placement::PlacementRequest;

use crate::error::SchedulerResult;
use crate::host::{Host, Reservation};
use crate::image::ImageBuildCoordinator;

/// Creates and destroys containers on one host.
#[derive(Clone)]
pub struct HostAllocator {
    host: Arc<Host>,
    runtime: Arc<dyn ContainerRuntime>,
    builds: ImageBuildCoordinator,
    config: SchedulerConfig,
}

impl HostAllocator {
    pub fn new(
        host: Arc<Host>,
        runtime: Arc<dyn ContainerRuntime>,
        config: SchedulerConfig,
    ) -> Self {
        let builds = ImageBuildCoordinator::new(runtime.clone(), config.build_wait);
        Self {
            host,
            runtime,
            builds,
            config,
        }
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    /// Containers currently on this host, in-flight creations included.
    pub fn current_load(&self) -> usize {
        self.host.container_count()
    }

    /// Create a container for `request` in the reserved slot.
    ///
    /// Waits (bounded) for the host to reach RUNNING, resolves the image
    /// through the build coordinator, then creates the container under
    /// the per-host lock. A failure at any point releases the
    /// reservation and leaves the host unchanged.
    pub(crate) async fn obtain(
        &self,
        reservation: Reservation,
        request: &PlacementRequest,
    ) -> SchedulerResult<ContainerRecord> {
        match self.try_obtain(&reservation, request).await {
            Ok(record) => {
                reservation.commit();
                Ok(record)
            }
            Err(e) => {
                reservation.release().await;
                Err(e)
            }
        }
    }

    async fn try_obtain(
        &self,
        reservation: &Reservation,
        request: &PlacementRequest,
    ) -> SchedulerResult<ContainerRecord> {
        self.host
            .wait_until_running(self.config.host_ready_wait)
            .await?;

        // May block on another request's build; runs with no lock held.
        let image_id = self.builds.ensure_image(&self.host, &request.build).await?;

        // Creation is serialized per host by the lock. The container
        // record is CREATING until the runtime call returns.
        let _guard = self.host.lock().await;
        let mut record = ContainerRecord {
            id: reservation.container_id().clone(),
            host: self.host.id().clone(),
            app_id: request.app_id.clone(),
            image_name: request.build.image_name.clone(),
            image_id: image_id.clone(),
            handle: stevedore_core::ContainerHandle(String::new()),
            state: ContainerState::Creating,
        };
        info!(
            container = %record.id,
            image = %image_id,
            host = %self.host.id(),
            "starting container"
        );
        record.handle = self
            .runtime
            .create_container(self.host.id(), &image_id, &request.resources)
            .await?;
        record.state = ContainerState::Running;
        Ok(record)
    }

    /// Stop and remove a container.
    ///
    /// Idempotent: a container that is already gone is a logged no-op.
    /// Runtime teardown errors are logged, not propagated; the record is
    /// removed from the host either way.
    pub async fn release(&self, record: &ContainerRecord) -> SchedulerResult<()> {
        let mut guard = self.host.lock().await;
        if !guard.has_container(&record.id) {
            debug!(
                container = %record.id,
                host = %self.host.id(),
                "container not found for release, nothing to do"
            );
            return Ok(());
        }

        info!(container = %record.id, host = %self.host.id(), "releasing container");
        if let Err(e) = self.runtime.stop_container(self.host.id(), &record.handle).await {
            warn!(container = %record.id, error = %e, "error stopping container");
        }
        if let Err(e) = self
            .runtime
            .remove_container(self.host.id(), &record.handle)
            .await
        {
            warn!(container = %record.id, error = %e, "error removing container");
        }
        guard.remove_container(&record.id);
        Ok(())
    }
}
