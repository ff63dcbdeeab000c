//! Live host records.
//!
//! A [`Host`] is the scheduler's view of one pool member: lifecycle
//! state, the set of containers it holds (including reservations for
//! containers still being created), and the image map. All of it sits
//! behind the per-host lock; the container count is mirrored in an
//! atomic so placement filtering never has to take that lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::debug;

use stevedore_core::{ContainerId, HostId, HostInfo, HostState, ImageId, ImageName, ZONE_LABEL};
use stevedore_placement::{HostCandidate, HostFootprint};

use crate::error::{SchedulerError, SchedulerResult};
use crate::image::BuildTicket;

/// State behind the per-host lock.
#[derive(Default)]
pub(crate) struct HostInner {
    containers: HashSet<ContainerId>,
    images: HashMap<ImageName, ImageId>,
    tickets: HashMap<ImageName, BuildTicket>,
}

/// One host in the pool.
pub struct Host {
    id: HostId,
    labels: HashMap<String, String>,
    created_at: u64,
    state: watch::Sender<HostState>,
    /// Mirror of `inner.containers.len()`, maintained by [`HostGuard`].
    count: AtomicUsize,
    inner: Mutex<HostInner>,
}

impl Host {
    pub fn new(info: HostInfo, state: HostState) -> Arc<Self> {
        let (state_tx, _) = watch::channel(state);
        Arc::new(Self {
            id: info.id,
            labels: info.labels,
            created_at: info.created_at,
            state: state_tx,
            count: AtomicUsize::new(0),
            inner: Mutex::new(HostInner::default()),
        })
    }

    pub fn id(&self) -> &HostId {
        &self.id
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn state(&self) -> HostState {
        *self.state.borrow()
    }

    pub fn set_state(&self, state: HostState) {
        self.state.send_replace(state);
    }

    /// Containers on this host, reservations included. Lock-free.
    pub fn container_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Block until the host reaches RUNNING, bounded by `wait`.
    pub async fn wait_until_running(&self, wait: Duration) -> SchedulerResult<()> {
        if self.state().is_running() {
            return Ok(());
        }
        let mut rx = self.state.subscribe();
        let ready = tokio::time::timeout(wait, rx.wait_for(|s| s.is_running())).await;
        match ready {
            Ok(Ok(_)) => Ok(()),
            // Timed out, or the host record was torn down while waiting.
            _ => Err(SchedulerError::HostNotReady(self.id.clone())),
        }
    }

    /// Acquire the per-host lock.
    pub(crate) async fn lock(&self) -> HostGuard<'_> {
        HostGuard {
            inner: self.inner.lock().await,
            count: &self.count,
        }
    }

    /// Reserve a container slot for `id`.
    ///
    /// The reservation counts toward the host's load immediately, so
    /// concurrent placements see in-flight creations. It is undone on
    /// drop unless committed.
    pub(crate) async fn reserve(self: &Arc<Self>, id: &ContainerId) -> Reservation {
        self.lock().await.insert_container(id.clone());
        Reservation {
            host: self.clone(),
            id: id.clone(),
            committed: false,
        }
    }

    /// Snapshot for the placement strategy chain.
    pub fn candidate(&self) -> HostCandidate {
        HostCandidate {
            id: self.id.clone(),
            labels: self.labels.clone(),
            container_count: self.container_count() as u32,
        }
    }

    /// Snapshot for the pool add/remove balancing algorithms.
    pub fn footprint(&self) -> HostFootprint {
        HostFootprint {
            id: self.id.clone(),
            zone: self.labels.get(ZONE_LABEL).cloned(),
            container_count: self.container_count() as u32,
            created_at: self.created_at,
        }
    }
}

/// Guard over a host's mutable state; keeps the atomic container count
/// in sync with the container set.
pub(crate) struct HostGuard<'a> {
    inner: MutexGuard<'a, HostInner>,
    count: &'a AtomicUsize,
}

impl HostGuard<'_> {
    pub fn insert_container(&mut self, id: ContainerId) {
        self.inner.containers.insert(id);
        self.count.store(self.inner.containers.len(), Ordering::SeqCst);
    }

    pub fn remove_container(&mut self, id: &ContainerId) -> bool {
        let removed = self.inner.containers.remove(id);
        self.count.store(self.inner.containers.len(), Ordering::SeqCst);
        removed
    }

    pub fn has_container(&self, id: &ContainerId) -> bool {
        self.inner.containers.contains(id)
    }

    pub fn image(&self, name: &ImageName) -> Option<ImageId> {
        self.inner.images.get(name).cloned()
    }

    pub fn record_image(&mut self, name: ImageName, id: ImageId) {
        self.inner.images.insert(name, id);
    }

    pub fn ticket(&self, name: &ImageName) -> Option<&BuildTicket> {
        self.inner.tickets.get(name)
    }

    pub fn create_ticket(&mut self, name: ImageName) {
        self.inner.tickets.insert(name, BuildTicket::new());
    }

    pub fn take_ticket(&mut self, name: &ImageName) -> Option<BuildTicket> {
        self.inner.tickets.remove(name)
    }
}

/// A container slot held on a host while creation is in flight.
///
/// Dropping an uncommitted reservation releases the slot, including
/// when the owning `obtain` future is cancelled mid-creation.
pub(crate) struct Reservation {
    host: Arc<Host>,
    id: ContainerId,
    committed: bool,
}

impl Reservation {
    pub fn container_id(&self) -> &ContainerId {
        &self.id
    }

    /// Keep the slot: creation succeeded.
    pub fn commit(mut self) {
        self.committed = true;
    }

    /// Give the slot back now, rather than on drop.
    pub async fn release(mut self) {
        self.committed = true;
        self.host.lock().await.remove_container(&self.id);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.committed {
            let host = self.host.clone();
            let id = self.id.clone();
            tokio::spawn(async move {
                host.lock().await.remove_container(&id);
                debug!(container = %id, host = %host.id(), "reservation rolled back");
            });
        }
    }
}
