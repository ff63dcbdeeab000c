//! Pool resizer — grow and shrink the elastic host pool.

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use stevedore_core::{AutoscalerPolicy, ElasticHostPool, HostId, HostInfo, ZONE_LABEL};
use stevedore_placement::{HostFootprint, hosts_to_remove, zones_for_additions};

use crate::error::PoolError;

/// Wraps the elastic host pool plus an optional external autoscaler.
///
/// Growth and shrink go through here so the autoscaler is suspended while
/// the scheduler resizes the pool itself, and so only one expansion is in
/// flight at a time.
pub struct PoolResizer {
    pool: Arc<dyn ElasticHostPool>,
    autoscaler: Option<Arc<dyn AutoscalerPolicy>>,
    /// Zones new hosts may be provisioned into; empty leaves placement
    /// to the pool itself.
    zones: Vec<String>,
    /// Single-slot permit serializing pool expansions.
    expansion_permit: Semaphore,
}

impl PoolResizer {
    pub fn new(
        pool: Arc<dyn ElasticHostPool>,
        autoscaler: Option<Arc<dyn AutoscalerPolicy>>,
    ) -> Self {
        Self {
            pool,
            autoscaler,
            zones: Vec::new(),
            expansion_permit: Semaphore::new(1),
        }
    }

    pub fn with_autoscaler(mut self, autoscaler: Arc<dyn AutoscalerPolicy>) -> Self {
        self.autoscaler = Some(autoscaler);
        self
    }

    pub fn with_zones(mut self, zones: Vec<String>) -> Self {
        self.zones = zones;
        self
    }

    /// Provision `n` more hosts. New hosts start empty; no rebalancing of
    /// existing containers happens here.
    pub async fn add_hosts(&self, n: usize) -> Result<Vec<HostInfo>, PoolError> {
        self.pool
            .add_hosts(n)
            .await
            .map_err(PoolError::ProvisioningFailed)
    }

    pub async fn current_size(&self) -> usize {
        self.pool.current_size().await
    }

    pub async fn members(&self) -> Vec<HostInfo> {
        self.pool.members().await
    }

    /// Grow the pool by exactly one host.
    ///
    /// Takes the expansion permit, suspends the autoscaler so it does not
    /// see the resize as drift, provisions the host, raises the
    /// autoscaler minimum to the new pool size, then resumes it. On
    /// failure the autoscaler is still resumed before the error
    /// propagates.
    pub async fn expand_by_one(&self) -> Result<HostInfo, PoolError> {
        let _permit = self
            .expansion_permit
            .acquire()
            .await
            .map_err(|e| PoolError::ProvisioningFailed(anyhow!(e)))?;

        if let Some(autoscaler) = &self.autoscaler {
            autoscaler.suspend().await;
        }

        let result = match self.zone_for_next_host().await {
            Some(zone) => {
                info!(zone = %zone, "provisioning new host");
                self.pool.add_hosts_in_zone(&zone, 1).await
            }
            None => {
                info!("provisioning new host");
                self.pool.add_hosts(1).await
            }
        };

        let outcome = match result {
            Ok(mut hosts) if hosts.len() == 1 => {
                let host = hosts.remove(0);
                if let Some(autoscaler) = &self.autoscaler {
                    let size = self.pool.current_size().await;
                    info!(minimum = size, "updating autoscaler minimum pool size");
                    autoscaler.set_minimum_size(size).await;
                }
                Ok(host)
            }
            Ok(hosts) => Err(PoolError::ProvisioningFailed(anyhow!(
                "pool returned {} hosts for a single-host expansion",
                hosts.len()
            ))),
            Err(e) => Err(PoolError::ProvisioningFailed(e)),
        };

        if let Some(autoscaler) = &self.autoscaler {
            autoscaler.resume().await;
        }
        outcome
    }

    /// Zone for the next provisioned host, least populated first.
    /// `None` when no zones are configured.
    async fn zone_for_next_host(&self) -> Option<String> {
        if self.zones.is_empty() {
            return None;
        }
        let members: Vec<HostFootprint> = self
            .pool
            .members()
            .await
            .into_iter()
            .map(|h| HostFootprint {
                zone: h.labels.get(ZONE_LABEL).cloned(),
                id: h.id,
                container_count: 0,
                created_at: h.created_at,
            })
            .collect();
        zones_for_additions(&members, &self.zones, 1).into_iter().next()
    }

    /// Reclaim up to `n` empty hosts, chosen by the balancing removal
    /// algorithm. Returns the hosts actually removed; a removal error on
    /// one host is logged and does not abort the rest.
    pub async fn shrink(&self, members: &[HostFootprint], n: usize) -> Vec<HostId> {
        let picks = hosts_to_remove(members, n);
        let mut removed = Vec::with_capacity(picks.len());
        for id in picks {
            match self.pool.remove_host(&id).await {
                Ok(()) => {
                    info!(host = %id, "host released from pool");
                    removed.push(id);
                }
                Err(e) => {
                    warn!(host = %id, error = %e, "error stopping host");
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fake pool recording calls; can be told to fail provisioning.
    struct FakePool {
        hosts: Mutex<Vec<HostInfo>>,
        fail_add: bool,
        next_id: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakePool {
        fn new() -> Self {
            Self {
                hosts: Mutex::new(Vec::new()),
                fail_add: false,
                next_id: AtomicUsize::new(1),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail_add: true,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl ElasticHostPool for FakePool {
        async fn add_hosts(&self, n: usize) -> anyhow::Result<Vec<HostInfo>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_add {
                anyhow::bail!("quota exceeded");
            }
            let mut added = Vec::new();
            for _ in 0..n {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let info = HostInfo {
                    id: HostId(format!("host-{id}")),
                    labels: HashMap::new(),
                    created_at: id as u64,
                };
                self.hosts.lock().unwrap().push(info.clone());
                added.push(info);
            }
            Ok(added)
        }

        async fn add_hosts_in_zone(&self, zone: &str, n: usize) -> anyhow::Result<Vec<HostInfo>> {
            if self.fail_add {
                anyhow::bail!("quota exceeded");
            }
            let mut added = Vec::new();
            for _ in 0..n {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let info = HostInfo {
                    id: HostId(format!("host-{id}")),
                    labels: HashMap::from([(ZONE_LABEL.to_string(), zone.to_string())]),
                    created_at: id as u64,
                };
                self.hosts.lock().unwrap().push(info.clone());
                added.push(info);
            }
            Ok(added)
        }

        async fn remove_host(&self, host: &HostId) -> anyhow::Result<()> {
            let mut hosts = self.hosts.lock().unwrap();
            let before = hosts.len();
            hosts.retain(|h| &h.id != host);
            if hosts.len() == before {
                anyhow::bail!("host {host} not in pool");
            }
            Ok(())
        }

        async fn current_size(&self) -> usize {
            self.hosts.lock().unwrap().len()
        }

        async fn members(&self) -> Vec<HostInfo> {
            self.hosts.lock().unwrap().clone()
        }
    }

    /// Fake autoscaler recording the order of calls.
    #[derive(Default)]
    struct FakeAutoscaler {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AutoscalerPolicy for FakeAutoscaler {
        async fn suspend(&self) {
            self.calls.lock().unwrap().push("suspend".into());
        }
        async fn resume(&self) {
            self.calls.lock().unwrap().push("resume".into());
        }
        async fn set_minimum_size(&self, n: usize) {
            self.calls.lock().unwrap().push(format!("min={n}"));
        }
    }

    #[tokio::test]
    async fn expand_adds_one_host_and_updates_autoscaler() {
        let pool = Arc::new(FakePool::new());
        let autoscaler = Arc::new(FakeAutoscaler::default());
        let resizer = PoolResizer::new(pool.clone(), Some(autoscaler.clone()));

        let host = resizer.expand_by_one().await.unwrap();
        assert_eq!(host.id, HostId::from("host-1"));
        assert_eq!(pool.current_size().await, 1);

        let calls = autoscaler.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["suspend", "min=1", "resume"]);
    }

    #[tokio::test]
    async fn expand_failure_still_resumes_autoscaler() {
        let pool = Arc::new(FakePool::failing());
        let autoscaler = Arc::new(FakeAutoscaler::default());
        let resizer = PoolResizer::new(pool, Some(autoscaler.clone()));

        let result = resizer.expand_by_one().await;
        assert!(matches!(result, Err(PoolError::ProvisioningFailed(_))));

        let calls = autoscaler.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["suspend", "resume"]);
    }

    #[tokio::test]
    async fn expansions_are_serialized_by_the_permit() {
        let pool = Arc::new(FakePool::new());
        let resizer = Arc::new(PoolResizer::new(pool.clone(), None));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let resizer = resizer.clone();
            tasks.push(tokio::spawn(async move { resizer.expand_by_one().await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(pool.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(pool.current_size().await, 4);
    }

    #[tokio::test]
    async fn expansion_targets_the_least_populated_zone() {
        let pool = Arc::new(FakePool::new());
        pool.add_hosts_in_zone("eu", 2).await.unwrap();
        let resizer = PoolResizer::new(pool.clone(), None)
            .with_zones(vec!["eu".to_string(), "us".to_string()]);

        let host = resizer.expand_by_one().await.unwrap();
        assert_eq!(host.labels.get(ZONE_LABEL).map(String::as_str), Some("us"));
        assert_eq!(pool.current_size().await, 3);
    }

    #[tokio::test]
    async fn expansion_without_zones_leaves_placement_to_the_pool() {
        let pool = Arc::new(FakePool::new());
        let resizer = PoolResizer::new(pool, None);
        let host = resizer.expand_by_one().await.unwrap();
        assert!(host.labels.is_empty());
    }

    #[tokio::test]
    async fn expand_without_autoscaler() {
        let pool = Arc::new(FakePool::new());
        let resizer = PoolResizer::new(pool, None);
        let host = resizer.expand_by_one().await.unwrap();
        assert_eq!(host.id, HostId::from("host-1"));
    }

    #[tokio::test]
    async fn shrink_removes_chosen_empty_hosts() {
        let pool = Arc::new(FakePool::new());
        let resizer = PoolResizer::new(pool.clone(), None);
        resizer.add_hosts(3).await.unwrap();

        let members: Vec<HostFootprint> = pool
            .members()
            .await
            .into_iter()
            .map(|h| HostFootprint {
                id: h.id,
                zone: None,
                container_count: 0,
                created_at: h.created_at,
            })
            .collect();

        let removed = resizer.shrink(&members, 1).await;
        // Newest host goes first.
        assert_eq!(removed, vec![HostId::from("host-3")]);
        assert_eq!(pool.current_size().await, 2);
    }

    #[tokio::test]
    async fn shrink_skips_hosts_the_pool_no_longer_knows() {
        let pool = Arc::new(FakePool::new());
        let resizer = PoolResizer::new(pool.clone(), None);
        resizer.add_hosts(1).await.unwrap();

        let members = vec![HostFootprint {
            id: HostId::from("host-gone"),
            zone: None,
            container_count: 0,
            created_at: 99,
        }];
        let removed = resizer.shrink(&members, 1).await;
        assert!(removed.is_empty());
        assert_eq!(pool.current_size().await, 1);
    }
}
