//! In-memory mirror
//!
//! Satisfies the [`Mirror`] contract without a database. Used by the test
//! suites and for embedding the fleet without Postgres.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use butler_core::domain::build::Build;
use butler_core::domain::instance::{HealthStatus, Instance};
use butler_core::domain::job::Job;
use butler_core::dto::job::{BuildUpsert, JobUpsert};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Mirror, StoreError, StoreResult};

#[derive(Debug, Default)]
struct State {
    instances: HashMap<Uuid, Instance>,
    jobs: HashMap<Uuid, Job>,
    builds: HashMap<Uuid, Build>,
}

impl State {
    fn demote_primaries(&mut self, cluster: &str, keep: Uuid) {
        let now = Utc::now();
        for other in self.instances.values_mut() {
            if other.id != keep && other.is_primary && other.cluster() == cluster {
                other.is_primary = false;
                other.updated_at = now;
            }
        }
    }

    fn name_taken(&self, name: &str, except: Uuid) -> bool {
        self.instances
            .values()
            .any(|other| other.id != except && other.name == name)
    }
}

/// Mirror backed by `HashMap`s behind a mutex
#[derive(Debug, Default)]
pub struct MemoryMirror {
    state: Mutex<State>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of builds stored across all jobs
    pub fn build_count(&self) -> usize {
        self.state().builds.len()
    }
}

#[async_trait]
impl Mirror for MemoryMirror {
    async fn list_instances(&self) -> StoreResult<Vec<Instance>> {
        let mut instances: Vec<Instance> = self.state().instances.values().cloned().collect();
        instances.sort_by_key(|i| i.created_at);
        Ok(instances)
    }

    async fn list_active_instances(&self) -> StoreResult<Vec<Instance>> {
        let mut instances: Vec<Instance> = self
            .state()
            .instances
            .values()
            .filter(|i| i.is_active)
            .cloned()
            .collect();
        instances.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(instances)
    }

    async fn list_healthy_instances(&self, cluster: Option<&str>) -> StoreResult<Vec<Instance>> {
        let mut instances: Vec<Instance> = self
            .state()
            .instances
            .values()
            .filter(|i| i.is_active && i.is_healthy())
            .filter(|i| cluster.is_none_or(|c| i.cluster() == c))
            .cloned()
            .collect();
        instances.sort_by(|a, b| {
            a.current_load
                .cmp(&b.current_load)
                .then_with(|| b.priority.cmp(&a.priority))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(instances)
    }

    async fn find_instance(&self, id: Uuid) -> StoreResult<Option<Instance>> {
        Ok(self.state().instances.get(&id).cloned())
    }

    async fn create_instance(&self, instance: &Instance) -> StoreResult<()> {
        let mut state = self.state();

        if state.instances.contains_key(&instance.id) || state.name_taken(&instance.name, instance.id) {
            return Err(StoreError::Conflict(format!(
                "instance name {} already exists",
                instance.name
            )));
        }
        if instance.is_primary {
            state.demote_primaries(instance.cluster(), instance.id);
        }

        state.instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn update_instance(&self, instance: &Instance) -> StoreResult<()> {
        let mut state = self.state();

        if !state.instances.contains_key(&instance.id) {
            return Err(StoreError::NotFound {
                entity: "Instance",
                id: instance.id,
            });
        }
        if state.name_taken(&instance.name, instance.id) {
            return Err(StoreError::Conflict(format!(
                "instance name {} already exists",
                instance.name
            )));
        }
        if instance.is_primary {
            state.demote_primaries(instance.cluster(), instance.id);
        }

        if let Some(stored) = state.instances.get_mut(&instance.id) {
            stored.name = instance.name.clone();
            stored.description = instance.description.clone();
            stored.url = instance.url.clone();
            stored.load_balancer_url = instance.load_balancer_url.clone();
            stored.health_check_url = instance.health_check_url.clone();
            stored.username = instance.username.clone();
            stored.api_token = instance.api_token.clone();
            stored.is_active = instance.is_active;
            stored.is_primary = instance.is_primary;
            stored.cluster_id = instance.cluster_id.clone();
            stored.priority = instance.priority;
            stored.max_connections = instance.max_connections;
            stored.updated_at = instance.updated_at;
        }
        Ok(())
    }

    async fn delete_instance(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state();
        if state.instances.remove(&id).is_none() {
            return Ok(false);
        }

        let job_ids: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|job| job.instance_id == id)
            .map(|job| job.id)
            .collect();
        state.jobs.retain(|_, job| job.instance_id != id);
        state.builds.retain(|_, build| !job_ids.contains(&build.job_id));
        Ok(true)
    }

    async fn adjust_load(&self, id: Uuid, delta: i32) -> StoreResult<Option<Instance>> {
        let mut state = self.state();
        Ok(state.instances.get_mut(&id).map(|instance| {
            instance.current_load += delta;
            instance.updated_at = Utc::now();
            instance.clone()
        }))
    }

    async fn update_health(
        &self,
        id: Uuid,
        status: HealthStatus,
        checked_at: Option<DateTime<Utc>>,
    ) -> StoreResult<bool> {
        let mut state = self.state();
        let Some(instance) = state.instances.get_mut(&id) else {
            return Ok(false);
        };

        instance.health_status = status;
        if checked_at.is_some() {
            instance.last_health_check = checked_at;
        }
        instance.updated_at = Utc::now();
        Ok(true)
    }

    async fn touch_last_sync(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(instance) = self.state().instances.get_mut(&id) {
            instance.last_sync_at = Some(at);
        }
        Ok(())
    }

    async fn upsert_job(&self, instance_id: Uuid, job: &JobUpsert) -> StoreResult<Job> {
        let mut state = self.state();
        let now = Utc::now();

        let existing = state
            .jobs
            .values()
            .find(|j| j.instance_id == instance_id && j.name == job.name)
            .map(|j| (j.id, j.created_at));
        let (id, created_at) = existing.unwrap_or_else(|| (Uuid::new_v4(), now));

        let stored = Job {
            id,
            instance_id,
            name: job.name.clone(),
            display_name: job.display_name.clone(),
            url: job.url.clone(),
            job_type: job.job_type,
            color: job.color.clone(),
            description: job.description.clone(),
            buildable: job.buildable,
            in_queue: job.in_queue,
            last_build_number: job.last_build_number,
            last_build_status: job.last_build_status,
            last_build_time: job.last_build_time,
            health_score: job.health_score,
            created_at,
            updated_at: now,
        };
        state.jobs.insert(id, stored.clone());
        Ok(stored)
    }

    async fn list_jobs(&self, instance_id: Uuid) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .state()
            .jobs
            .values()
            .filter(|job| job.instance_id == instance_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(jobs)
    }

    async fn upsert_build(&self, job_id: Uuid, build: &BuildUpsert) -> StoreResult<Build> {
        let mut state = self.state();
        let now = Utc::now();

        let existing = state
            .builds
            .values()
            .find(|b| b.job_id == job_id && b.build_number == build.build_number)
            .map(|b| (b.id, b.created_at));
        let (id, created_at) = existing.unwrap_or_else(|| (Uuid::new_v4(), now));

        let stored = Build {
            id,
            job_id,
            build_number: build.build_number,
            status: build.status,
            url: build.url.clone(),
            duration: build.duration,
            timestamp: build.timestamp,
            created_at,
            updated_at: now,
        };
        state.builds.insert(id, stored.clone());
        Ok(stored)
    }

    async fn list_builds(&self, job_id: Uuid) -> StoreResult<Vec<Build>> {
        let mut builds: Vec<Build> = self
            .state()
            .builds
            .values()
            .filter(|build| build.job_id == job_id)
            .cloned()
            .collect();
        builds.sort_by(|a, b| b.build_number.cmp(&a.build_number));
        Ok(builds)
    }
}
