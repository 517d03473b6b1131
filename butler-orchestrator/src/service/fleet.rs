//! Fleet Service
//!
//! Facade over the mirror, the load balancer and the sync engine. Every
//! administrative and routing operation the API exposes goes through here.

use std::sync::Arc;
use std::time::Duration;

use butler_client::{ClientError, ClientProvider};
use butler_core::domain::build::{Build, BuildStatus};
use butler_core::domain::instance::{HealthStatus, Instance};
use butler_core::domain::job::Job;
use butler_core::dto::cluster::{ClusterSummary, HealthCheckResult, SelectionStrategy};
use butler_core::dto::instance::{
    ConnectionInfo, InstanceStats, RegisterInstance, TestConnection, UpdateInstance,
};
use butler_core::dto::sync::{SyncOutcome, SyncStatus};
use butler_core::remote::ExecutorCounts;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::SnapshotCache;
use crate::config::Config;
use crate::repository::{Mirror, StoreError};
use crate::service::balancer::LoadBalancer;
use crate::service::sync::{SyncConfig, SyncEngine};

/// Service error type
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    /// Connectivity probe failed during registration or a connection test
    #[error("{0}")]
    Unreachable(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl From<StoreError> for FleetError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => FleetError::NotFound(format!("{entity} {id}")),
            StoreError::Conflict(msg) => FleetError::Conflict(msg),
            other => FleetError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;

/// The fleet of registered masters
pub struct Fleet {
    mirror: Arc<dyn Mirror>,
    clients: Arc<dyn ClientProvider>,
    balancer: LoadBalancer,
    sync: Arc<SyncEngine>,
    probe_timeout: Duration,
}

impl Fleet {
    pub fn new(
        mirror: Arc<dyn Mirror>,
        cache: Arc<dyn SnapshotCache>,
        clients: Arc<dyn ClientProvider>,
        config: &Config,
    ) -> Self {
        let balancer = LoadBalancer::new(
            Arc::clone(&mirror),
            cache,
            Arc::clone(&clients),
            config.snapshot_ttl,
            config.probe_timeout,
        );
        let sync = Arc::new(SyncEngine::new(
            Arc::clone(&mirror),
            Arc::clone(&clients),
            SyncConfig::from(config),
        ));

        Self {
            mirror,
            clients,
            balancer,
            sync,
            probe_timeout: config.probe_timeout,
        }
    }

    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    // =============================================================================
    // Routing
    // =============================================================================

    /// Pick an instance for new work
    pub async fn select_instance(
        &self,
        strategy: SelectionStrategy,
        cluster: Option<&str>,
    ) -> Result<Option<Instance>> {
        Ok(self.balancer.select(strategy, cluster).await?)
    }

    pub async fn increment_load(&self, id: Uuid) -> Result<Instance> {
        Ok(self.balancer.increment_load(id).await?)
    }

    pub async fn decrement_load(&self, id: Uuid) -> Result<Instance> {
        Ok(self.balancer.decrement_load(id).await?)
    }

    // =============================================================================
    // Instance Administration
    // =============================================================================

    pub async fn list_instances(&self) -> Result<Vec<Instance>> {
        Ok(self.mirror.list_instances().await?)
    }

    pub async fn get_instance(&self, id: Uuid) -> Result<Instance> {
        self.balancer
            .instance(id)
            .await?
            .ok_or_else(|| FleetError::NotFound(format!("Instance {id}")))
    }

    /// Register a new master after a live connectivity probe
    ///
    /// The probe just succeeded, so the instance is stored as healthy.
    pub async fn register_instance(&self, req: RegisterInstance) -> Result<Instance> {
        validate_register_request(&req)?;

        let now = Utc::now();
        let mut instance = Instance {
            id: Uuid::new_v4(),
            name: req.name.trim().to_string(),
            description: non_empty(req.description),
            url: req.url.trim().to_string(),
            load_balancer_url: non_empty(req.load_balancer_url),
            health_check_url: non_empty(req.health_check_url),
            username: req.username,
            api_token: req.api_token,
            is_active: true,
            is_primary: req.is_primary,
            cluster_id: non_empty(req.cluster_id),
            priority: req.priority,
            current_load: 0,
            max_connections: req.max_connections,
            health_status: HealthStatus::Unknown,
            last_health_check: None,
            last_sync_at: None,
            created_at: now,
            updated_at: now,
        };

        let version = self
            .probe_master(
                instance.effective_base_url(),
                &instance.username,
                &instance.api_token,
            )
            .await?;

        instance.health_status = HealthStatus::Healthy;
        instance.last_health_check = Some(Utc::now());
        self.mirror.create_instance(&instance).await?;
        if instance.is_primary {
            self.evict_demoted_primaries(&instance).await?;
        }

        tracing::info!(
            "Instance registered: {} ({}) version {}",
            instance.name,
            instance.id,
            version.as_deref().unwrap_or("unknown")
        );
        Ok(instance)
    }

    /// Apply a partial update to an instance's administrative fields
    pub async fn update_instance(&self, id: Uuid, patch: UpdateInstance) -> Result<Instance> {
        validate_update_request(&patch)?;

        let mut instance = self
            .mirror
            .find_instance(id)
            .await?
            .ok_or_else(|| FleetError::NotFound(format!("Instance {id}")))?;

        let reconnect = patch.changes_connection();
        apply_update(&mut instance, patch);
        instance.updated_at = Utc::now();

        self.mirror.update_instance(&instance).await?;

        if reconnect {
            self.clients.remove(id);
        }
        self.balancer.evict_snapshot(id).await;
        if instance.is_primary {
            self.evict_demoted_primaries(&instance).await?;
        }

        tracing::info!("Instance updated: {} ({})", instance.name, id);
        self.mirror
            .find_instance(id)
            .await?
            .ok_or_else(|| FleetError::NotFound(format!("Instance {id}")))
    }

    /// Delete an instance with its mirrored jobs and builds
    pub async fn remove_instance(&self, id: Uuid) -> Result<()> {
        if !self.mirror.delete_instance(id).await? {
            return Err(FleetError::NotFound(format!("Instance {id}")));
        }

        self.clients.remove(id);
        self.balancer.evict_snapshot(id).await;

        tracing::info!("Instance deleted: {}", id);
        Ok(())
    }

    /// Drop cached snapshots of the cluster peers of a new primary
    ///
    /// The mirror demotes the previous primary as part of the write, so its
    /// cached `is_primary` flag is stale.
    async fn evict_demoted_primaries(&self, primary: &Instance) -> Result<()> {
        for peer in self.mirror.list_instances().await? {
            if peer.id != primary.id && peer.cluster() == primary.cluster() {
                self.balancer.evict_snapshot(peer.id).await;
            }
        }
        Ok(())
    }

    /// Probe a master without registering it
    pub async fn test_connection(&self, req: TestConnection) -> Result<ConnectionInfo> {
        if !is_http_url(&req.url) {
            return Err(FleetError::Validation(
                "URL must start with http:// or https://".to_string(),
            ));
        }

        let version = self
            .probe_master(req.url.trim(), &req.username, &req.api_token)
            .await?
            .unwrap_or_else(|| "unknown".to_string());

        Ok(ConnectionInfo {
            message: format!("Connected to CI master version {version}"),
            version,
        })
    }

    /// Fetch system info within the probe timeout, returning the reported version
    async fn probe_master(
        &self,
        url: &str,
        username: &str,
        api_token: &str,
    ) -> Result<Option<String>> {
        let client = self.clients.connect(url, username, api_token)?;

        match tokio::time::timeout(self.probe_timeout, client.get_system_info()).await {
            Ok(Ok(info)) => Ok(info.version),
            Ok(Err(e)) => {
                tracing::warn!("Connectivity probe of {} failed: {}", url, e);
                Err(FleetError::Unreachable(format!(
                    "Cannot connect to CI master at {url}: {e}"
                )))
            }
            Err(_) => {
                tracing::warn!("Connectivity probe of {} timed out", url);
                Err(FleetError::Unreachable(format!(
                    "Cannot connect to CI master at {url}: no answer within {:?}",
                    self.probe_timeout
                )))
            }
        }
    }

    // =============================================================================
    // Health & Clusters
    // =============================================================================

    pub async fn perform_health_checks(&self) -> Result<Vec<HealthCheckResult>> {
        Ok(self.balancer.perform_health_checks().await?)
    }

    /// Mark `current` unhealthy and return the backup to route to
    pub async fn failover(&self, cluster: &str, current: Uuid) -> Result<Option<Instance>> {
        Ok(self.balancer.failover_to_primary(cluster, current).await?)
    }

    pub async fn list_clusters(&self) -> Result<Vec<ClusterSummary>> {
        Ok(self.balancer.all_clusters().await?)
    }

    /// Utilization and inventory of one instance
    ///
    /// Executor counts are fetched live; an unreachable master reports zero.
    pub async fn instance_stats(&self, id: Uuid) -> Result<InstanceStats> {
        let instance = self
            .mirror
            .find_instance(id)
            .await?
            .ok_or_else(|| FleetError::NotFound(format!("Instance {id}")))?;

        let jobs = self.mirror.list_jobs(id).await?;
        let active_jobs = jobs
            .iter()
            .filter(|job| job.last_build_status == BuildStatus::Running)
            .count();

        let executors = self.executor_counts(&instance).await;

        Ok(InstanceStats {
            instance_id: instance.id,
            name: instance.name.clone(),
            current_load: instance.current_load,
            max_connections: instance.max_connections,
            utilization_percent: instance.utilization_percent(),
            health_status: instance.health_status,
            last_health_check: instance.last_health_check,
            total_jobs: jobs.len(),
            active_jobs,
            total_executors: executors.total,
            idle_executors: executors.idle,
            busy_executors: executors.busy(),
            executor_utilization: executors.utilization_percent(),
        })
    }

    async fn executor_counts(&self, instance: &Instance) -> ExecutorCounts {
        let client = match self.clients.client(instance) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("No client for {}: {}", instance.name, e);
                return ExecutorCounts::default();
            }
        };

        match tokio::time::timeout(self.probe_timeout, client.get_executors()).await {
            Ok(Ok(computers)) => ExecutorCounts::from_computers(&computers),
            Ok(Err(e)) => {
                tracing::warn!("Failed to fetch executors of {}: {}", instance.name, e);
                ExecutorCounts::default()
            }
            Err(_) => {
                tracing::warn!("Executor query of {} timed out", instance.name);
                ExecutorCounts::default()
            }
        }
    }

    // =============================================================================
    // Mirror Queries & Sync
    // =============================================================================

    pub async fn list_jobs(&self, instance_id: Uuid) -> Result<Vec<Job>> {
        if self.mirror.find_instance(instance_id).await?.is_none() {
            return Err(FleetError::NotFound(format!("Instance {instance_id}")));
        }
        Ok(self.mirror.list_jobs(instance_id).await?)
    }

    pub async fn list_builds(&self, job_id: Uuid) -> Result<Vec<Build>> {
        Ok(self.mirror.list_builds(job_id).await?)
    }

    pub async fn trigger_sync(&self) -> SyncOutcome {
        self.sync.trigger_sync().await
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }
}

// =============================================================================
// Validation
// =============================================================================

fn is_http_url(url: &str) -> bool {
    let url = url.trim();
    url.starts_with("http://") || url.starts_with("https://")
}

/// Treat blank optional strings as absent
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(FleetError::Validation(
            "Instance name cannot be empty".to_string(),
        ));
    }

    if name.len() > 255 {
        return Err(FleetError::Validation(
            "Instance name is too long (max 255 characters)".to_string(),
        ));
    }

    Ok(())
}

fn validate_capacity(priority: Option<i32>, max_connections: Option<i32>) -> Result<()> {
    if priority.is_some_and(|p| p < 0) {
        return Err(FleetError::Validation(
            "Priority cannot be negative".to_string(),
        ));
    }

    if max_connections.is_some_and(|m| m < 1) {
        return Err(FleetError::Validation(
            "max_connections must be at least 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_register_request(req: &RegisterInstance) -> Result<()> {
    validate_name(&req.name)?;

    if !is_http_url(&req.url) {
        return Err(FleetError::Validation(
            "URL must start with http:// or https://".to_string(),
        ));
    }

    if let Some(lb) = req.load_balancer_url.as_deref() {
        if !lb.trim().is_empty() && !is_http_url(lb) {
            return Err(FleetError::Validation(
                "Load balancer URL must start with http:// or https://".to_string(),
            ));
        }
    }

    if req.username.trim().is_empty() || req.api_token.trim().is_empty() {
        return Err(FleetError::Validation(
            "Username and API token are required".to_string(),
        ));
    }

    validate_capacity(Some(req.priority), Some(req.max_connections))
}

fn validate_update_request(patch: &UpdateInstance) -> Result<()> {
    if let Some(name) = patch.name.as_deref() {
        validate_name(name)?;
    }

    if patch.url.as_deref().is_some_and(|url| !is_http_url(url)) {
        return Err(FleetError::Validation(
            "URL must start with http:// or https://".to_string(),
        ));
    }

    if patch
        .username
        .as_deref()
        .is_some_and(|u| u.trim().is_empty())
        || patch
            .api_token
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
    {
        return Err(FleetError::Validation(
            "Username and API token cannot be blank".to_string(),
        ));
    }

    validate_capacity(patch.priority, patch.max_connections)
}

/// Copy the fields present in `patch`; blank optional strings clear the field
fn apply_update(instance: &mut Instance, patch: UpdateInstance) {
    if let Some(name) = patch.name {
        instance.name = name.trim().to_string();
    }
    if let Some(url) = patch.url {
        instance.url = url.trim().to_string();
    }
    if let Some(username) = patch.username {
        instance.username = username;
    }
    if let Some(api_token) = patch.api_token {
        instance.api_token = api_token;
    }
    if patch.description.is_some() {
        instance.description = non_empty(patch.description);
    }
    if patch.load_balancer_url.is_some() {
        instance.load_balancer_url = non_empty(patch.load_balancer_url);
    }
    if patch.health_check_url.is_some() {
        instance.health_check_url = non_empty(patch.health_check_url);
    }
    if patch.cluster_id.is_some() {
        instance.cluster_id = non_empty(patch.cluster_id);
    }
    if let Some(is_active) = patch.is_active {
        instance.is_active = is_active;
    }
    if let Some(is_primary) = patch.is_primary {
        instance.is_primary = is_primary;
    }
    if let Some(priority) = patch.priority {
        instance.priority = priority;
    }
    if let Some(max_connections) = patch.max_connections {
        instance.max_connections = max_connections;
    }
}
