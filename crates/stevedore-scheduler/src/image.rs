//! Image build coordination.
//!
//! At most one build per (host, image-name) pair is ever in flight.
//! The first request for an unbuilt image creates a ticket and runs the
//! build; every later request waits on the ticket. Builds run with no
//! lock held so other hosts and containers stay schedulable.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use stevedore_core::{BuildSpec, ContainerRuntime, ImageId};

use crate::error::{SchedulerError, SchedulerResult};
use crate::host::Host;

/// Progress of one image build.
#[derive(Debug, Clone)]
pub(crate) enum BuildState {
    Pending,
    Done(ImageId),
    Failed(String),
}

impl BuildState {
    fn is_resolved(&self) -> bool {
        !matches!(self, BuildState::Pending)
    }
}

/// Latch for an in-flight build: one builder resolves it, any number of
/// waiters observe the resolution. Removed from the host's ticket table
/// when the build completes, so a failed build can be retried.
pub(crate) struct BuildTicket {
    tx: watch::Sender<BuildState>,
}

impl BuildTicket {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(BuildState::Pending);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<BuildState> {
        self.tx.subscribe()
    }

    pub fn resolve(&self, state: BuildState) {
        self.tx.send_replace(state);
    }
}

/// Ensures each named image is built at most once per host.
#[derive(Clone)]
pub struct ImageBuildCoordinator {
    runtime: Arc<dyn ContainerRuntime>,
    build_wait: Duration,
}

impl ImageBuildCoordinator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, build_wait: Duration) -> Self {
        Self {
            runtime,
            build_wait,
        }
    }

    /// Resolve `spec.image_name` to a built image id on `host`.
    ///
    /// Returns the recorded id when the host already has the image.
    /// Otherwise either joins an in-flight build (bounded wait,
    /// `BuildTimeout` on expiry, `BuildFailed` when the builder fails)
    /// or runs the build itself. The build executes on a spawned task,
    /// so a cancelled caller still resolves the ticket for its waiters.
    pub async fn ensure_image(
        &self,
        host: &Arc<Host>,
        spec: &BuildSpec,
    ) -> SchedulerResult<ImageId> {
        let name = &spec.image_name;

        let waiter = {
            let mut guard = host.lock().await;
            if let Some(id) = guard.image(name) {
                debug!(image = %name, host = %host.id(), id = %id, "image already built");
                return Ok(id);
            }
            match guard.ticket(name) {
                Some(ticket) => Some(ticket.subscribe()),
                None => {
                    guard.create_ticket(name.clone());
                    None
                }
            }
        };

        match waiter {
            Some(rx) => self.wait_for_build(host, spec, rx).await,
            None => self.run_build(host, spec).await,
        }
    }

    /// Join another request's build.
    async fn wait_for_build(
        &self,
        host: &Arc<Host>,
        spec: &BuildSpec,
        mut rx: watch::Receiver<BuildState>,
    ) -> SchedulerResult<ImageId> {
        let name = &spec.image_name;
        debug!(image = %name, host = %host.id(), "waiting on in-flight build");

        let resolved =
            tokio::time::timeout(self.build_wait, rx.wait_for(BuildState::is_resolved)).await;
        match resolved {
            Err(_) => Err(SchedulerError::BuildTimeout(name.clone())),
            Ok(Err(_)) => Err(SchedulerError::BuildFailed {
                image: name.clone(),
                reason: "build abandoned before completing".to_string(),
            }),
            Ok(Ok(state)) => match state.clone() {
                BuildState::Done(id) => Ok(id),
                BuildState::Failed(reason) => Err(SchedulerError::BuildFailed {
                    image: name.clone(),
                    reason,
                }),
                // wait_for only returns resolved states.
                BuildState::Pending => Err(SchedulerError::BuildFailed {
                    image: name.clone(),
                    reason: "ticket resolved without a result".to_string(),
                }),
            },
        }
    }

    /// Run the build this request owns the ticket for.
    ///
    /// The build itself holds no locks; the result is recorded and the
    /// ticket resolved under the host lock afterwards. On failure the
    /// ticket is removed so a later request may retry.
    async fn run_build(&self, host: &Arc<Host>, spec: &BuildSpec) -> SchedulerResult<ImageId> {
        let name = spec.image_name.clone();
        info!(image = %name, host = %host.id(), "building image");

        let runtime = self.runtime.clone();
        let host = host.clone();
        let spec = spec.clone();
        let task = tokio::spawn(async move {
            let result = runtime.build_image(host.id(), &spec).await;
            let mut guard = host.lock().await;
            let ticket = guard.take_ticket(&spec.image_name);
            match result {
                Ok(id) => {
                    guard.record_image(spec.image_name.clone(), id.clone());
                    if let Some(ticket) = ticket {
                        ticket.resolve(BuildState::Done(id.clone()));
                    }
                    info!(image = %spec.image_name, host = %host.id(), id = %id, "image built");
                    Ok(id)
                }
                Err(e) => {
                    let reason = e.to_string();
                    if let Some(ticket) = ticket {
                        ticket.resolve(BuildState::Failed(reason.clone()));
                    }
                    warn!(image = %spec.image_name, host = %host.id(), error = %reason, "image build failed");
                    Err(reason)
                }
            }
        });

        match task.await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(reason)) => Err(SchedulerError::BuildFailed {
                image: name,
                reason,
            }),
            Err(join) => Err(SchedulerError::BuildFailed {
                image: name,
                reason: format!("build task failed: {join}"),
            }),
        }
    }
}
