//! Load Balancer
//!
//! Picks an instance for new work, tracks per-instance load, probes health and
//! handles failover. All decisions read the mirror; the snapshot cache only
//! accelerates single-instance reads and holds the round-robin cursors.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use butler_client::ClientProvider;
use butler_core::domain::instance::{HealthStatus, Instance};
use butler_core::dto::cluster::{ClusterSummary, HealthCheckResult, SelectionStrategy};
use chrono::Utc;
use futures::future::join_all;
use rand::Rng;
use uuid::Uuid;

use crate::cache::{self, SnapshotCache};
use crate::repository::{Mirror, StoreError, StoreResult};

/// Lifetime of a round-robin cursor
const ROUND_ROBIN_TTL: Duration = Duration::from_secs(3600);

/// Instance selection, load accounting and health probing
pub struct LoadBalancer {
    mirror: Arc<dyn Mirror>,
    cache: Arc<dyn SnapshotCache>,
    clients: Arc<dyn ClientProvider>,
    snapshot_ttl: Duration,
    probe_timeout: Duration,
}

impl LoadBalancer {
    pub fn new(
        mirror: Arc<dyn Mirror>,
        cache: Arc<dyn SnapshotCache>,
        clients: Arc<dyn ClientProvider>,
        snapshot_ttl: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            mirror,
            cache,
            clients,
            snapshot_ttl,
            probe_timeout,
        }
    }

    // =============================================================================
    // Selection
    // =============================================================================

    /// Pick an instance with the given strategy
    pub async fn select(
        &self,
        strategy: SelectionStrategy,
        cluster: Option<&str>,
    ) -> StoreResult<Option<Instance>> {
        match strategy {
            SelectionStrategy::LeastLoad => self.optimal_instance(cluster).await,
            SelectionStrategy::RoundRobin => self.round_robin_instance(cluster).await,
            SelectionStrategy::Weighted => self.weighted_instance(cluster).await,
            SelectionStrategy::PrimaryBackup => self.primary_backup_instance(cluster).await,
        }
    }

    /// Active healthy instances, least loaded first, higher priority breaking ties
    pub async fn healthy_instances(&self, cluster: Option<&str>) -> StoreResult<Vec<Instance>> {
        self.mirror.list_healthy_instances(cluster).await
    }

    /// The least loaded healthy instance
    pub async fn optimal_instance(&self, cluster: Option<&str>) -> StoreResult<Option<Instance>> {
        let selected = self.healthy_instances(cluster).await?.into_iter().next();
        if selected.is_none() {
            tracing::warn!("No healthy instances available (cluster: {:?})", cluster);
        }
        Ok(selected)
    }

    /// Rotate through the healthy pool with a per-cluster cursor
    pub async fn round_robin_instance(
        &self,
        cluster: Option<&str>,
    ) -> StoreResult<Option<Instance>> {
        let mut pool = self.healthy_instances(cluster).await?;
        if pool.is_empty() {
            tracing::warn!("No healthy instances for round-robin (cluster: {:?})", cluster);
            return Ok(None);
        }

        let key = cache::round_robin_key(cluster);
        let last = self
            .cache
            .get(&key)
            .await
            .and_then(|raw| raw.parse::<usize>().ok());
        let next = next_round_robin_index(last, pool.len());

        self.cache.set(&key, next.to_string(), ROUND_ROBIN_TTL).await;
        Ok(Some(pool.swap_remove(next)))
    }

    /// Random draw weighted by priority
    ///
    /// Falls back to round-robin when every priority is zero.
    pub async fn weighted_instance(&self, cluster: Option<&str>) -> StoreResult<Option<Instance>> {
        let pool = self.healthy_instances(cluster).await?;
        if pool.is_empty() {
            tracing::warn!("No healthy instances for weighted selection (cluster: {:?})", cluster);
            return Ok(None);
        }

        let total = total_weight(&pool);
        if total == 0 {
            return self.round_robin_instance(cluster).await;
        }

        let draw = rand::thread_rng().gen_range(0..total);
        Ok(pick_weighted(&pool, draw).cloned())
    }

    /// The healthy primary of a cluster
    pub async fn primary_instance(&self, cluster: &str) -> StoreResult<Option<Instance>> {
        Ok(self
            .healthy_instances(Some(cluster))
            .await?
            .into_iter()
            .find(|instance| instance.is_primary))
    }

    /// The healthy primary if there is one, otherwise the best healthy backup
    pub async fn primary_backup_instance(
        &self,
        cluster: Option<&str>,
    ) -> StoreResult<Option<Instance>> {
        let pool = self.healthy_instances(cluster).await?;
        if let Some(primary) = pool.iter().find(|instance| instance.is_primary) {
            return Ok(Some(primary.clone()));
        }

        let backup = best_backup(pool.iter());
        if backup.is_none() {
            tracing::warn!("No healthy primary or backup (cluster: {:?})", cluster);
        }
        Ok(backup.cloned())
    }

    // =============================================================================
    // Load Accounting
    // =============================================================================

    pub async fn increment_load(&self, id: Uuid) -> StoreResult<Instance> {
        self.adjust_load(id, 1).await
    }

    pub async fn decrement_load(&self, id: Uuid) -> StoreResult<Instance> {
        self.adjust_load(id, -1).await
    }

    async fn adjust_load(&self, id: Uuid, delta: i32) -> StoreResult<Instance> {
        let instance = self
            .mirror
            .adjust_load(id, delta)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "Instance",
                id,
            })?;

        tracing::debug!(
            "Load of {} is now {} ({:+})",
            instance.name, instance.current_load, delta
        );
        self.refresh_snapshot(&instance).await;
        Ok(instance)
    }

    // =============================================================================
    // Snapshots
    // =============================================================================

    /// Read-through lookup of one instance
    pub async fn instance(&self, id: Uuid) -> StoreResult<Option<Instance>> {
        let key = cache::instance_key(id);
        if let Some(instance) = cache::get_json::<Instance>(self.cache.as_ref(), &key).await {
            return Ok(Some(instance));
        }

        let instance = self.mirror.find_instance(id).await?;
        if let Some(instance) = &instance {
            self.refresh_snapshot(instance).await;
        }
        Ok(instance)
    }

    pub async fn refresh_snapshot(&self, instance: &Instance) {
        cache::set_json(
            self.cache.as_ref(),
            &cache::instance_key(instance.id),
            instance,
            self.snapshot_ttl,
        )
        .await;
    }

    pub async fn evict_snapshot(&self, id: Uuid) {
        self.cache.delete(&cache::instance_key(id)).await;
    }

    // =============================================================================
    // Health & Failover
    // =============================================================================

    /// Probe every active instance concurrently and record the classification
    pub async fn perform_health_checks(&self) -> StoreResult<Vec<HealthCheckResult>> {
        let instances = self.mirror.list_active_instances().await?;
        tracing::debug!("Running health checks on {} instance(s)", instances.len());

        let probes = instances.iter().map(|instance| self.probe(instance));
        let results = join_all(probes).await;

        for result in &results {
            if let Err(e) = self
                .mirror
                .update_health(result.instance_id, result.status, Some(result.checked_at))
                .await
            {
                tracing::warn!("Failed to record health of {}: {}", result.name, e);
            }
            self.evict_snapshot(result.instance_id).await;
        }

        let healthy = results
            .iter()
            .filter(|r| r.status == HealthStatus::Healthy)
            .count();
        tracing::info!(
            "Health checks completed: {}/{} healthy",
            healthy,
            results.len()
        );
        Ok(results)
    }

    async fn probe(&self, instance: &Instance) -> HealthCheckResult {
        let status = match self.clients.client(instance) {
            Ok(client) => {
                let url = instance.health_url();
                match tokio::time::timeout(self.probe_timeout, client.probe(&url)).await {
                    Ok(Ok(code)) => classify(code),
                    Ok(Err(e)) => {
                        tracing::debug!("Health probe of {} failed: {}", instance.name, e);
                        HealthStatus::Unhealthy
                    }
                    Err(_) => {
                        tracing::debug!(
                            "Health probe of {} timed out after {:?}",
                            instance.name, self.probe_timeout
                        );
                        HealthStatus::Unhealthy
                    }
                }
            }
            Err(e) => {
                tracing::warn!("No client for {}: {}", instance.name, e);
                HealthStatus::Unhealthy
            }
        };

        if status != instance.health_status {
            tracing::info!(
                "Instance {} is now {} (was {})",
                instance.name, status, instance.health_status
            );
        }

        HealthCheckResult {
            instance_id: instance.id,
            name: instance.name.clone(),
            status,
            checked_at: Utc::now(),
        }
    }

    /// Mark `current` unhealthy and return the best healthy backup of the cluster
    ///
    /// The backup is not promoted; that is left to the caller.
    pub async fn failover_to_primary(
        &self,
        cluster: &str,
        current: Uuid,
    ) -> StoreResult<Option<Instance>> {
        if !self
            .mirror
            .update_health(current, HealthStatus::Unhealthy, None)
            .await?
        {
            return Err(StoreError::NotFound {
                entity: "Instance",
                id: current,
            });
        }
        self.evict_snapshot(current).await;
        tracing::warn!("Instance {} marked unhealthy, failing over in cluster {}", current, cluster);

        let pool = self.healthy_instances(Some(cluster)).await?;
        let backup = best_backup(pool.iter().filter(|instance| instance.id != current)).cloned();

        match &backup {
            Some(backup) => tracing::info!("Failover target for cluster {}: {}", cluster, backup.name),
            None => tracing::warn!("No healthy backup available in cluster {}", cluster),
        }
        Ok(backup)
    }

    // =============================================================================
    // Clusters
    // =============================================================================

    /// Active instances grouped by cluster, clusters sorted by name and members
    /// by priority descending
    pub async fn all_clusters(&self) -> StoreResult<Vec<ClusterSummary>> {
        let mut clusters: BTreeMap<String, Vec<Instance>> = BTreeMap::new();
        for instance in self.mirror.list_active_instances().await? {
            clusters
                .entry(instance.cluster().to_string())
                .or_default()
                .push(instance);
        }

        Ok(clusters
            .into_iter()
            .map(|(cluster_id, mut members)| {
                members.sort_by(|a, b| b.priority.cmp(&a.priority));
                ClusterSummary::new(cluster_id, &members)
            })
            .collect())
    }
}

fn classify(status: u16) -> HealthStatus {
    if (200..300).contains(&status) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

/// Cursor after `last` in a pool of `len` instances; the first call starts at 0
fn next_round_robin_index(last: Option<usize>, len: usize) -> usize {
    match last {
        Some(last) => (last + 1) % len,
        None => 0,
    }
}

fn total_weight(pool: &[Instance]) -> i64 {
    pool.iter()
        .map(|instance| i64::from(instance.priority.max(0)))
        .sum()
}

/// Walk the pool accumulating priorities until the sum exceeds `draw`
fn pick_weighted(pool: &[Instance], draw: i64) -> Option<&Instance> {
    let mut cumulative = 0;
    pool.iter().find(|instance| {
        cumulative += i64::from(instance.priority.max(0));
        draw < cumulative
    })
}

/// Highest-priority non-primary instance, lower load breaking ties
fn best_backup<'a>(pool: impl Iterator<Item = &'a Instance>) -> Option<&'a Instance> {
    pool.filter(|instance| !instance.is_primary).min_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.current_load.cmp(&b.current_load))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::repository::MemoryMirror;
    use crate::testing::{FakeMaster, FakeProvider, instance};

    struct Harness {
        mirror: Arc<MemoryMirror>,
        provider: Arc<FakeProvider>,
        cache: Arc<MemoryCache>,
        balancer: LoadBalancer,
    }

    fn harness() -> Harness {
        let mirror = Arc::new(MemoryMirror::new());
        let provider = Arc::new(FakeProvider::new());
        let cache = Arc::new(MemoryCache::new());
        let balancer = LoadBalancer::new(
            mirror.clone(),
            cache.clone(),
            provider.clone(),
            Duration::from_secs(300),
            Duration::from_secs(5),
        );
        Harness {
            mirror,
            provider,
            cache,
            balancer,
        }
    }

    async fn add(h: &Harness, name: &str, load: i32, priority: i32) -> Instance {
        let mut i = instance(name);
        i.current_load = load;
        i.priority = priority;
        h.mirror.create_instance(&i).await.unwrap();
        i
    }

    #[tokio::test]
    async fn test_least_load_selection() {
        let h = harness();
        add(&h, "a", 3, 0).await;
        add(&h, "b", 1, 0).await;
        add(&h, "c", 5, 0).await;

        let selected = h.balancer.optimal_instance(None).await.unwrap().unwrap();
        assert_eq!(selected.name, "b");
    }

    #[tokio::test]
    async fn test_least_load_tie_breaks_on_priority() {
        let h = harness();
        add(&h, "low", 2, 1).await;
        add(&h, "high", 2, 9).await;

        let selected = h
            .balancer
            .select(SelectionStrategy::LeastLoad, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.name, "high");
    }

    #[tokio::test]
    async fn test_empty_pool_returns_none() {
        let h = harness();
        let mut down = instance("down");
        down.health_status = HealthStatus::Unhealthy;
        h.mirror.create_instance(&down).await.unwrap();

        for strategy in [
            SelectionStrategy::LeastLoad,
            SelectionStrategy::RoundRobin,
            SelectionStrategy::Weighted,
            SelectionStrategy::PrimaryBackup,
        ] {
            assert!(h.balancer.select(strategy, None).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_round_robin_wraps_around() {
        let h = harness();
        add(&h, "a", 0, 3).await;
        add(&h, "b", 0, 2).await;
        add(&h, "c", 0, 1).await;

        let mut picked = Vec::new();
        for _ in 0..5 {
            let i = h.balancer.round_robin_instance(None).await.unwrap().unwrap();
            picked.push(i.name);
        }
        assert_eq!(picked, vec!["a", "b", "c", "a", "b"]);
        assert_eq!(
            h.cache.get("butler:balancer:default:index").await.as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn test_round_robin_cursor_survives_pool_shrink() {
        let h = harness();
        h.cache
            .set("butler:balancer:default:index", "7".to_string(), ROUND_ROBIN_TTL)
            .await;
        add(&h, "a", 0, 2).await;
        add(&h, "b", 0, 1).await;

        let picked = h.balancer.round_robin_instance(None).await.unwrap().unwrap();
        assert_eq!(picked.name, "a");
    }

    #[test]
    fn test_round_robin_index() {
        assert_eq!(next_round_robin_index(None, 3), 0);
        assert_eq!(next_round_robin_index(Some(0), 3), 1);
        assert_eq!(next_round_robin_index(Some(2), 3), 0);
        assert_eq!(next_round_robin_index(Some(5), 2), 0);
    }

    #[test]
    fn test_pick_weighted_is_proportional() {
        let mut light = instance("light");
        light.priority = 1;
        let mut heavy = instance("heavy");
        heavy.priority = 3;
        let pool = vec![light, heavy];

        assert_eq!(total_weight(&pool), 4);
        let names: Vec<&str> = (0..4)
            .map(|draw| pick_weighted(&pool, draw).unwrap().name.as_str())
            .collect();
        assert_eq!(names, vec!["light", "heavy", "heavy", "heavy"]);
    }

    #[tokio::test]
    async fn test_weighted_distribution() {
        let h = harness();
        add(&h, "light", 0, 1).await;
        add(&h, "heavy", 0, 3).await;

        let mut heavy = 0;
        let mut light = 0;
        for _ in 0..4000 {
            match h.balancer.weighted_instance(None).await.unwrap().unwrap().name.as_str() {
                "heavy" => heavy += 1,
                _ => light += 1,
            }
        }
        let ratio = heavy as f64 / light as f64;
        assert!((2.5..3.5).contains(&ratio), "ratio was {ratio}");
    }

    #[tokio::test]
    async fn test_weighted_zero_priorities_fall_back_to_round_robin() {
        let h = harness();
        add(&h, "a", 0, 0).await;
        add(&h, "b", 0, 0).await;

        let first = h.balancer.weighted_instance(None).await.unwrap().unwrap();
        let second = h.balancer.weighted_instance(None).await.unwrap().unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_primary_backup_selection() {
        let h = harness();
        let mut primary = instance("primary");
        primary.is_primary = true;
        primary.current_load = 50;
        h.mirror.create_instance(&primary).await.unwrap();
        add(&h, "backup", 0, 5).await;

        let selected = h
            .balancer
            .select(SelectionStrategy::PrimaryBackup, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.name, "primary");
        assert_eq!(
            h.balancer.primary_instance("default").await.unwrap().unwrap().id,
            primary.id
        );

        h.mirror
            .update_health(primary.id, HealthStatus::Unhealthy, None)
            .await
            .unwrap();
        let selected = h
            .balancer
            .select(SelectionStrategy::PrimaryBackup, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selected.name, "backup");
    }

    #[tokio::test]
    async fn test_failover_returns_backup() {
        let h = harness();
        let mut primary = instance("primary");
        primary.is_primary = true;
        primary.cluster_id = Some("build".to_string());
        h.mirror.create_instance(&primary).await.unwrap();
        for (name, priority) in [("backup-low", 1), ("backup-high", 7)] {
            let mut i = instance(name);
            i.cluster_id = Some("build".to_string());
            i.priority = priority;
            h.mirror.create_instance(&i).await.unwrap();
        }
        add(&h, "elsewhere", 0, 100).await;

        let backup = h
            .balancer
            .failover_to_primary("build", primary.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(backup.name, "backup-high");
        assert!(!backup.is_primary);

        let primary = h.mirror.find_instance(primary.id).await.unwrap().unwrap();
        assert_eq!(primary.health_status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_failover_unknown_instance() {
        let h = harness();
        let err = h
            .balancer
            .failover_to_primary("default", Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_load_counters_refresh_snapshot() {
        let h = harness();
        let ci = add(&h, "ci", 0, 0).await;

        h.balancer.increment_load(ci.id).await.unwrap();
        h.balancer.increment_load(ci.id).await.unwrap();
        let after = h.balancer.decrement_load(ci.id).await.unwrap();
        assert_eq!(after.current_load, 1);

        let cached: Instance = cache::get_json(h.cache.as_ref(), &cache::instance_key(ci.id))
            .await
            .unwrap();
        assert_eq!(cached.current_load, 1);

        // Not clamped at zero
        h.balancer.decrement_load(ci.id).await.unwrap();
        let after = h.balancer.decrement_load(ci.id).await.unwrap();
        assert_eq!(after.current_load, -1);

        let err = h.balancer.increment_load(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_instance_read_through() {
        let h = harness();
        let ci = add(&h, "ci", 0, 0).await;

        assert!(h.cache.is_empty());
        let first = h.balancer.instance(ci.id).await.unwrap().unwrap();
        assert_eq!(first.id, ci.id);
        assert_eq!(h.cache.len(), 1);

        // Served from the snapshot even after the row is gone
        h.mirror.delete_instance(ci.id).await.unwrap();
        assert!(h.balancer.instance(ci.id).await.unwrap().is_some());

        h.balancer.evict_snapshot(ci.id).await;
        assert!(h.balancer.instance(ci.id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_classification() {
        let h = harness();
        let up = instance("up");
        let degraded = instance("degraded");
        let mut down = instance("down");
        down.health_status = HealthStatus::Unknown;
        let slow = instance("slow");
        let orphan = instance("orphan");
        for i in [&up, &degraded, &down, &slow, &orphan] {
            h.mirror.create_instance(i).await.unwrap();
        }

        h.provider.serve(&up, FakeMaster::default());
        h.provider.serve(
            &degraded,
            FakeMaster {
                probe_status: Some(503),
                ..Default::default()
            },
        );
        h.provider.serve(
            &down,
            FakeMaster {
                unreachable: true,
                ..Default::default()
            },
        );
        h.provider.serve(
            &slow,
            FakeMaster {
                probe_delay: Some(Duration::from_secs(30)),
                ..Default::default()
            },
        );

        let results = h.balancer.perform_health_checks().await.unwrap();
        assert_eq!(results.len(), 5);

        let status_of = |id: Uuid| results.iter().find(|r| r.instance_id == id).unwrap().status;
        assert_eq!(status_of(up.id), HealthStatus::Healthy);
        assert_eq!(status_of(degraded.id), HealthStatus::Degraded);
        assert_eq!(status_of(down.id), HealthStatus::Unhealthy);
        assert_eq!(status_of(slow.id), HealthStatus::Unhealthy);
        assert_eq!(status_of(orphan.id), HealthStatus::Unhealthy);

        let stored = h.mirror.find_instance(degraded.id).await.unwrap().unwrap();
        assert_eq!(stored.health_status, HealthStatus::Degraded);
        assert!(stored.last_health_check.is_some());

        let healthy = h.balancer.healthy_instances(None).await.unwrap();
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].id, up.id);
    }

    #[tokio::test]
    async fn test_all_clusters_grouping() {
        let h = harness();
        let mut west = instance("west-1");
        west.cluster_id = Some("west".to_string());
        west.current_load = 4;
        h.mirror.create_instance(&west).await.unwrap();
        add(&h, "default-low", 1, 1).await;
        add(&h, "default-high", 2, 9).await;
        let mut inactive = instance("retired");
        inactive.is_active = false;
        h.mirror.create_instance(&inactive).await.unwrap();

        let clusters = h.balancer.all_clusters().await.unwrap();
        let ids: Vec<&str> = clusters.iter().map(|c| c.cluster_id.as_str()).collect();
        assert_eq!(ids, vec!["default", "west"]);

        let default = &clusters[0];
        assert_eq!(default.total_instances, 2);
        assert_eq!(default.instances[0].name, "default-high");
        assert_eq!(default.total_load, 3);
        assert_eq!(clusters[1].total_capacity, 100);
    }
}
