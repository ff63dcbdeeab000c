//! Cluster scheduler — the `obtain`/`release` entry point.
//!
//! `obtain` picks a host through the placement strategy chain, hands
//! creation to that host's allocator, and falls back to the configured
//! no-host strategy when nothing qualifies. `release` tears a container
//! down and may reclaim the host it leaves empty. The membership table
//! (hosts and the containers placed on them) sits behind one
//! scheduler-wide lock held only for short bookkeeping; builds and
//! provisioning calls always run outside it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use stevedore_core::{
    AutoscalerPolicy, ContainerId, ContainerRecord, ContainerRuntime, ElasticHostPool,
    HostId, HostInfo, HostState, SchedulerConfig, SequenceGenerator,
};
use stevedore_placement::{
    HostFootprint, PlacementRequest, PlacementStrategy, filter_candidates, hosts_to_remove,
};
use stevedore_pool::{NoHostOutcome, NoHostStrategy, PoolResizer};

use crate::allocator::HostAllocator;
use crate::error::{SchedulerError, SchedulerResult};
use crate::host::Host;

/// Membership table: pool hosts and the containers placed on them.
#[derive(Default)]
struct SchedulerState {
    hosts: HashMap<HostId, HostAllocator>,
    containers: HashMap<ContainerId, ContainerRecord>,
}

/// Top-level container placement scheduler for one host pool.
///
/// Safe to call concurrently from many tasks, for the same or different
/// applications. Cancelling an `obtain` call releases any held locks
/// and rolls back its container reservation; an image build the call
/// started still completes so other waiters are not stranded.
pub struct ClusterScheduler {
    runtime: Arc<dyn ContainerRuntime>,
    resizer: PoolResizer,
    no_host: NoHostStrategy,
    /// Infrastructure-wide strategies, applied before any
    /// request-supplied ones.
    strategies: Vec<PlacementStrategy>,
    config: SchedulerConfig,
    seq: SequenceGenerator,
    state: Mutex<SchedulerState>,
}

impl ClusterScheduler {
    /// Create a scheduler over `pool`, using `runtime` for image and
    /// container operations. Defaults: fail-fast no-host strategy, no
    /// placement strategies, no autoscaler.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        pool: Arc<dyn ElasticHostPool>,
        config: SchedulerConfig,
    ) -> Self {
        let resizer = PoolResizer::new(pool, None);
        Self {
            runtime,
            resizer,
            no_host: NoHostStrategy::FailFast,
            strategies: Vec::new(),
            config,
            seq: SequenceGenerator::new(),
            state: Mutex::new(SchedulerState::default()),
        }
    }

    /// Attach an external autoscaler policy, suspended around pool
    /// resizes the scheduler performs itself.
    pub fn with_autoscaler(mut self, autoscaler: Arc<dyn AutoscalerPolicy>) -> Self {
        self.resizer = self.resizer.with_autoscaler(autoscaler);
        self
    }

    /// Zones new hosts are provisioned into when the pool expands.
    /// Empty leaves placement to the pool itself.
    pub fn with_zones(mut self, zones: Vec<String>) -> Self {
        self.resizer = self.resizer.with_zones(zones);
        self
    }

    /// Set the policy for requests that find no qualifying host.
    pub fn with_no_host_strategy(mut self, strategy: NoHostStrategy) -> Self {
        self.no_host = strategy;
        self
    }

    /// Append an infrastructure-wide placement strategy.
    pub fn with_strategy(mut self, strategy: PlacementStrategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Register every current pool member as a RUNNING host.
    pub async fn adopt_pool_members(&self) {
        for info in self.resizer.members().await {
            let mut state = self.state.lock().await;
            if !state.hosts.contains_key(&info.id) {
                let allocator = self.new_allocator(info, HostState::Running);
                info!(host = %allocator.host().id(), "host joined pool");
                state.hosts.insert(allocator.host().id().clone(), allocator);
            }
        }
    }

    /// Add one host to the membership table.
    pub async fn register_host(&self, info: HostInfo, state: HostState) -> Arc<Host> {
        let allocator = self.new_allocator(info, state);
        let host = allocator.host().clone();
        let mut table = self.state.lock().await;
        table.hosts.insert(host.id().clone(), allocator);
        info!(host = %host.id(), state = ?host.state(), "host joined pool");
        host
    }

    /// Mark a PROVISIONING host as RUNNING, waking any waiting obtains.
    pub async fn mark_host_running(&self, id: &HostId) -> bool {
        let state = self.state.lock().await;
        match state.hosts.get(id) {
            Some(allocator) => {
                allocator.host().set_state(HostState::Running);
                true
            }
            None => false,
        }
    }

    /// Obtain a container for `request` somewhere in the pool.
    ///
    /// Loops: filter candidates; if one qualifies, place on the first;
    /// otherwise consult the no-host strategy, which yields a fresh
    /// host, a retry, or gives up (`NoCapacity`). This loop and the
    /// strategy's own backoff are the only retry logic — a host
    /// allocator failure propagates immediately.
    pub async fn obtain(&self, request: PlacementRequest) -> SchedulerResult<ContainerRecord> {
        let id = self.seq.next_container_id();
        loop {
            // Selection and reservation are atomic under the scheduler
            // lock, so concurrent requests see each other's in-flight
            // creations when capacity strategies count containers.
            let selected = {
                let state = self.state.lock().await;
                match Self::filter_hosts(&state, &self.strategies, &request).into_iter().next() {
                    Some(allocator) => {
                        let reservation = allocator.host().reserve(&id).await;
                        Some((allocator, reservation))
                    }
                    None => None,
                }
            };

            let (allocator, reservation) = match selected {
                Some(pick) => pick,
                None => match self.no_host.handle(&self.resizer).await? {
                    NoHostOutcome::Host(info) => {
                        // Place directly on the new host, no re-filtering.
                        // Publish and reserve under one scheduler lock
                        // hold, so a concurrent shrink never sees the new
                        // host with zero containers.
                        let allocator = self.new_allocator(info, HostState::Running);
                        let mut state = self.state.lock().await;
                        info!(host = %allocator.host().id(), "host joined pool");
                        state
                            .hosts
                            .insert(allocator.host().id().clone(), allocator.clone());
                        let reservation = allocator.host().reserve(&id).await;
                        drop(state);
                        (allocator, reservation)
                    }
                    NoHostOutcome::Retry => continue,
                    NoHostOutcome::GiveUp => {
                        debug!(app = %request.app_id, "placement exhausted, giving up");
                        return Err(SchedulerError::NoCapacity);
                    }
                },
            };

            debug!(
                container = %id,
                host = %allocator.host().id(),
                app = %request.app_id,
                "obtaining container"
            );
            let record = allocator.obtain(reservation, &request).await?;

            // Publish the membership edge only after creation succeeded.
            let mut state = self.state.lock().await;
            state.containers.insert(record.id.clone(), record.clone());
            info!(
                container = %record.id,
                host = %record.host,
                app = %request.app_id,
                "container placed"
            );
            return Ok(record);
        }
    }

    /// Release a container previously returned by `obtain`.
    ///
    /// Fails with `NotAllocated` for a container this scheduler is not
    /// tracking. When the container was the last one on its host and
    /// empty hosts are reclaimable, shrinks the pool by one host —
    /// never below one.
    pub async fn release(&self, id: &ContainerId) -> SchedulerResult<()> {
        let (record, allocator) = {
            let mut state = self.state.lock().await;
            let record = state
                .containers
                .remove(id)
                .ok_or_else(|| SchedulerError::NotAllocated(id.clone()))?;
            let allocator = state.hosts.get(&record.host).cloned();
            (record, allocator)
        };

        let Some(allocator) = allocator else {
            // Host already reclaimed; the edge is gone, nothing to stop.
            warn!(container = %record.id, host = %record.host, "host not found for release");
            return Ok(());
        };

        allocator.release(&record).await?;

        if self.config.remove_empty_hosts && allocator.current_load() == 0 {
            debug!(host = %allocator.host().id(), "host is empty");
            self.shrink_by_one().await;
        }
        Ok(())
    }

    /// Hosts that currently qualify for `request`, in preference order.
    ///
    /// RUNNING hosts only, infrastructure strategies first, then the
    /// request's own; strategy output order is preserved. Empty when
    /// none qualify.
    pub async fn try_obtain_host_location(&self, request: &PlacementRequest) -> Vec<HostId> {
        let state = self.state.lock().await;
        Self::filter_hosts(&state, &self.strategies, request)
            .into_iter()
            .map(|a| a.host().id().clone())
            .collect()
    }

    pub async fn host_count(&self) -> usize {
        self.state.lock().await.hosts.len()
    }

    pub async fn container_count(&self) -> usize {
        self.state.lock().await.containers.len()
    }

    pub async fn is_allocated(&self, id: &ContainerId) -> bool {
        self.state.lock().await.containers.contains_key(id)
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn new_allocator(&self, info: HostInfo, state: HostState) -> HostAllocator {
        HostAllocator::new(
            Host::new(info, state),
            self.runtime.clone(),
            self.config.clone(),
        )
    }

    /// Candidate hosts for `request`: RUNNING, oldest first, narrowed by
    /// the strategy chain.
    fn filter_hosts(
        state: &SchedulerState,
        infrastructure: &[PlacementStrategy],
        request: &PlacementRequest,
    ) -> Vec<HostAllocator> {
        let mut running: Vec<&HostAllocator> = state
            .hosts
            .values()
            .filter(|a| a.host().state().is_running())
            .collect();
        running.sort_by(|a, b| {
            (a.host().created_at(), a.host().id())
                .cmp(&(b.host().created_at(), b.host().id()))
        });

        let candidates = running.iter().map(|a| a.host().candidate()).collect();
        let candidates = filter_candidates(infrastructure, candidates, request);
        let candidates = filter_candidates(&request.strategies, candidates, request);

        candidates
            .into_iter()
            .filter_map(|c| state.hosts.get(&c.id).cloned())
            .collect()
    }

    /// Reclaim one empty host, if the removal strategy finds one and at
    /// least one host would remain.
    async fn shrink_by_one(&self) {
        // Pick and unpublish under the lock; talk to the pool outside it.
        let victim = {
            let mut state = self.state.lock().await;
            if state.hosts.len() <= 1 {
                debug!("not shrinking: last host stays");
                return;
            }
            let footprints: Vec<HostFootprint> = state
                .hosts
                .values()
                .map(|a| a.host().footprint())
                .collect();
            match hosts_to_remove(&footprints, 1).into_iter().next() {
                Some(id) => state.hosts.remove(&id).map(|allocator| {
                    allocator.host().set_state(HostState::Stopping);
                    allocator
                }),
                None => None,
            }
        };

        let Some(allocator) = victim else {
            return;
        };
        let host = allocator.host();
        info!(host = %host.id(), "removing empty host");
        let removed = self.resizer.shrink(&[host.footprint()], 1).await;
        if removed.is_empty() {
            warn!(host = %host.id(), "pool did not release host");
        }
        host.set_state(HostState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use stevedore_core::{
        BuildSpec, ContainerHandle, ImageId, ResourceSpec,
    };

    struct FakeRuntime {
        creations: AtomicUsize,
        fail_create: bool,
    }

    impl FakeRuntime {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                creations: AtomicUsize::new(0),
                fail_create: false,
            })
        }

        fn failing_create() -> Arc<Self> {
            Arc::new(Self {
                creations: AtomicUsize::new(0),
                fail_create: true,
            })
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn build_image(
            &self,
            _host: &HostId,
            spec: &BuildSpec,
        ) -> anyhow::Result<ImageId> {
            Ok(ImageId(format!("sha256:{}", spec.image_name)))
        }

        async fn create_container(
            &self,
            host: &HostId,
            _image: &ImageId,
            _resources: &ResourceSpec,
        ) -> anyhow::Result<ContainerHandle> {
            if self.fail_create {
                anyhow::bail!("daemon refused");
            }
            let n = self.creations.fetch_add(1, Ordering::SeqCst);
            Ok(ContainerHandle(format!("{host}/ctr-{n}")))
        }

        async fn stop_container(
            &self,
            _host: &HostId,
            _handle: &ContainerHandle,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn remove_container(
            &self,
            _host: &HostId,
            _handle: &ContainerHandle,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct StaticPool {
        hosts: std::sync::Mutex<Vec<HostInfo>>,
    }

    impl StaticPool {
        fn with_hosts(n: usize) -> Arc<Self> {
            Arc::new(Self {
                hosts: std::sync::Mutex::new(
                    (1..=n)
                        .map(|i| HostInfo {
                            id: HostId(format!("host-{i}")),
                            labels: HashMap::new(),
                            created_at: i as u64,
                        })
                        .collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl ElasticHostPool for StaticPool {
        async fn add_hosts(&self, n: usize) -> anyhow::Result<Vec<HostInfo>> {
            let mut hosts = self.hosts.lock().unwrap();
            let start = hosts.len() + 1;
            let added: Vec<HostInfo> = (start..start + n)
                .map(|i| HostInfo {
                    id: HostId(format!("host-{i}")),
                    labels: HashMap::new(),
                    created_at: i as u64,
                })
                .collect();
            hosts.extend(added.clone());
            Ok(added)
        }

        async fn remove_host(&self, host: &HostId) -> anyhow::Result<()> {
            self.hosts.lock().unwrap().retain(|h| &h.id != host);
            Ok(())
        }

        async fn current_size(&self) -> usize {
            self.hosts.lock().unwrap().len()
        }

        async fn members(&self) -> Vec<HostInfo> {
            self.hosts.lock().unwrap().clone()
        }
    }

    fn request() -> PlacementRequest {
        PlacementRequest::new("app-1", BuildSpec::for_image("app:v1"))
    }

    #[tokio::test]
    async fn scheduler_starts_empty() {
        let scheduler = ClusterScheduler::new(
            FakeRuntime::new(),
            StaticPool::with_hosts(0),
            SchedulerConfig::default(),
        );
        assert_eq!(scheduler.host_count().await, 0);
        assert_eq!(scheduler.container_count().await, 0);
    }

    #[tokio::test]
    async fn adopt_pool_members_registers_running_hosts() {
        let scheduler = ClusterScheduler::new(
            FakeRuntime::new(),
            StaticPool::with_hosts(3),
            SchedulerConfig::default(),
        );
        scheduler.adopt_pool_members().await;
        assert_eq!(scheduler.host_count().await, 3);

        // Idempotent.
        scheduler.adopt_pool_members().await;
        assert_eq!(scheduler.host_count().await, 3);
    }

    #[tokio::test]
    async fn obtain_places_on_a_running_host() {
        let scheduler = ClusterScheduler::new(
            FakeRuntime::new(),
            StaticPool::with_hosts(1),
            SchedulerConfig::default(),
        );
        scheduler.adopt_pool_members().await;

        let container = scheduler.obtain(request()).await.unwrap();
        assert_eq!(container.host, HostId::from("host-1"));
        assert!(scheduler.is_allocated(&container.id).await);
        assert_eq!(scheduler.container_count().await, 1);
    }

    #[tokio::test]
    async fn obtain_fails_with_no_capacity_when_pool_is_empty() {
        let scheduler = ClusterScheduler::new(
            FakeRuntime::new(),
            StaticPool::with_hosts(0),
            SchedulerConfig::default(),
        );
        let result = scheduler.obtain(request()).await;
        assert!(matches!(result, Err(SchedulerError::NoCapacity)));
    }

    #[tokio::test]
    async fn provisioning_hosts_are_not_candidates() {
        let scheduler = ClusterScheduler::new(
            FakeRuntime::new(),
            StaticPool::with_hosts(0),
            SchedulerConfig::default(),
        );
        scheduler
            .register_host(
                HostInfo {
                    id: HostId::from("cold"),
                    labels: HashMap::new(),
                    created_at: 1,
                },
                HostState::Provisioning,
            )
            .await;

        assert!(scheduler.try_obtain_host_location(&request()).await.is_empty());
        scheduler.mark_host_running(&HostId::from("cold")).await;
        assert_eq!(
            scheduler.try_obtain_host_location(&request()).await,
            vec![HostId::from("cold")]
        );
    }

    #[tokio::test]
    async fn candidates_are_ordered_oldest_first() {
        let scheduler = ClusterScheduler::new(
            FakeRuntime::new(),
            StaticPool::with_hosts(3),
            SchedulerConfig::default(),
        );
        scheduler.adopt_pool_members().await;
        let order = scheduler.try_obtain_host_location(&request()).await;
        assert_eq!(
            order,
            vec![
                HostId::from("host-1"),
                HostId::from("host-2"),
                HostId::from("host-3")
            ]
        );
    }

    #[tokio::test]
    async fn failed_creation_leaves_no_state_behind() {
        let scheduler = ClusterScheduler::new(
            FakeRuntime::failing_create(),
            StaticPool::with_hosts(1),
            SchedulerConfig::default(),
        );
        scheduler.adopt_pool_members().await;

        let result = scheduler.obtain(request()).await;
        assert!(matches!(result, Err(SchedulerError::Runtime(_))));
        assert_eq!(scheduler.container_count().await, 0);
        // The reservation was rolled back too.
        assert!(scheduler.try_obtain_host_location(&request()).await.len() == 1);
    }

    #[tokio::test]
    async fn release_unknown_container_fails() {
        let scheduler = ClusterScheduler::new(
            FakeRuntime::new(),
            StaticPool::with_hosts(1),
            SchedulerConfig::default(),
        );
        let result = scheduler.release(&ContainerId::from("ghost")).await;
        assert!(matches!(result, Err(SchedulerError::NotAllocated(_))));
    }

    #[tokio::test]
    async fn release_removes_the_membership_edge() {
        let scheduler = ClusterScheduler::new(
            FakeRuntime::new(),
            StaticPool::with_hosts(1),
            SchedulerConfig::default(),
        );
        scheduler.adopt_pool_members().await;

        let container = scheduler.obtain(request()).await.unwrap();
        scheduler.release(&container.id).await.unwrap();
        assert!(!scheduler.is_allocated(&container.id).await);
        assert_eq!(scheduler.container_count().await, 0);

        // Second release: the edge is gone.
        let again = scheduler.release(&container.id).await;
        assert!(matches!(again, Err(SchedulerError::NotAllocated(_))));
    }

    #[tokio::test]
    async fn infrastructure_strategies_apply_before_request_strategies() {
        let pool = StaticPool::with_hosts(2);
        let scheduler = ClusterScheduler::new(
            FakeRuntime::new(),
            pool,
            SchedulerConfig::default(),
        )
        .with_strategy(PlacementStrategy::predicate(|c, _| {
            c.id != HostId::from("host-1")
        }));
        scheduler.adopt_pool_members().await;

        let container = scheduler.obtain(request()).await.unwrap();
        assert_eq!(container.host, HostId::from("host-2"));
    }

    #[tokio::test]
    async fn last_host_is_never_reclaimed() {
        let mut config = SchedulerConfig::default();
        config.remove_empty_hosts = true;
        let pool = StaticPool::with_hosts(1);
        let scheduler =
            ClusterScheduler::new(FakeRuntime::new(), pool.clone(), config);
        scheduler.adopt_pool_members().await;

        let container = scheduler.obtain(request()).await.unwrap();
        scheduler.release(&container.id).await.unwrap();

        assert_eq!(scheduler.host_count().await, 1);
        assert_eq!(pool.current_size().await, 1);
    }

    #[tokio::test]
    async fn empty_host_is_reclaimed_when_configured() {
        let mut config = SchedulerConfig::default();
        config.remove_empty_hosts = true;
        let pool = StaticPool::with_hosts(2);
        let scheduler =
            ClusterScheduler::new(FakeRuntime::new(), pool.clone(), config);
        scheduler.adopt_pool_members().await;

        let container = scheduler.obtain(request()).await.unwrap();
        scheduler.release(&container.id).await.unwrap();

        assert_eq!(scheduler.host_count().await, 1);
        assert_eq!(pool.current_size().await, 1);
    }

    #[tokio::test]
    async fn empty_hosts_stay_without_the_config_flag() {
        let pool = StaticPool::with_hosts(2);
        let scheduler = ClusterScheduler::new(
            FakeRuntime::new(),
            pool.clone(),
            SchedulerConfig::default(),
        );
        scheduler.adopt_pool_members().await;

        let container = scheduler.obtain(request()).await.unwrap();
        scheduler.release(&container.id).await.unwrap();

        assert_eq!(scheduler.host_count().await, 2);
        assert_eq!(pool.current_size().await, 2);
    }
}
