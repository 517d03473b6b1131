//! Sync Engine
//!
//! Periodically reconciles the job and build state of every active instance
//! into the mirror. At most one pass is in flight at a time: a pass requested
//! while another runs is skipped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use butler_client::{ClientError, ClientProvider, MasterApi};
use butler_core::domain::instance::Instance;
use butler_core::dto::job::{BuildUpsert, JobUpsert};
use butler_core::dto::sync::{SyncOutcome, SyncReport, SyncStatus};
use butler_core::remote::RemoteJobSummary;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::Config;
use crate::repository::{Mirror, StoreError};

/// Failure of one job or one instance within a pass
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Tunables of the sync engine
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub interval: Duration,
    /// Builds fetched per job on a regular pass
    pub build_window: usize,
    /// Builds fetched per job when an instance has a sync gap
    pub backfill_window: usize,
    /// Age of `last_sync_at` past which an instance counts as having a gap
    pub gap_threshold: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SyncConfig {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.sync_interval,
            build_window: config.build_window,
            backfill_window: config.backfill_window,
            gap_threshold: config.sync_gap_threshold(),
        }
    }
}

struct Timer {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Clears the syncing flag when a pass ends, including on panic
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Reconciles remote masters into the mirror
pub struct SyncEngine {
    mirror: Arc<dyn Mirror>,
    clients: Arc<dyn ClientProvider>,
    config: SyncConfig,
    syncing: AtomicBool,
    timer: Mutex<Option<Timer>>,
}

impl SyncEngine {
    pub fn new(
        mirror: Arc<dyn Mirror>,
        clients: Arc<dyn ClientProvider>,
        config: SyncConfig,
    ) -> Self {
        Self {
            mirror,
            clients,
            config,
            syncing: AtomicBool::new(false),
            timer: Mutex::new(None),
        }
    }

    /// Arm the periodic timer; the first pass runs immediately
    ///
    /// Returns `false` when the timer was already armed.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() {
            return false;
        }

        let (shutdown, mut stopped) = watch::channel(false);
        let engine = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut interval = time::interval(engine.config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                // A stop request wins over a tick that came due during a long pass
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = interval.tick() => {}
                }

                // Run outside select! so stopping never cancels an in-flight pass
                if let SyncOutcome::Skipped = engine.trigger_sync().await {
                    tracing::debug!("Periodic sync skipped, previous pass still running");
                }

                if *stopped.borrow() {
                    break;
                }
            }

            tracing::debug!("Sync timer stopped");
        });

        tracing::info!("Sync engine started (interval: {:?})", self.config.interval);
        *timer = Some(Timer { shutdown, task });
        true
    }

    /// Disarm the timer and wait for an in-flight pass to finish
    pub async fn stop(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(timer) = timer {
            let _ = timer.shutdown.send(true);
            if let Err(e) = timer.task.await {
                tracing::warn!("Sync timer task ended abnormally: {}", e);
            }
            tracing::info!("Sync engine stopped");
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SyncStatus {
        let running = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|timer| !timer.task.is_finished());

        SyncStatus {
            running,
            is_syncing: self.is_syncing(),
            interval_ms: self.config.interval.as_millis() as u64,
        }
    }

    /// Run one pass now, unless one is already in flight
    pub async fn trigger_sync(&self) -> SyncOutcome {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!("Sync already in progress, skipping");
            return SyncOutcome::Skipped;
        }
        let _guard = SyncingGuard(&self.syncing);

        SyncOutcome::Completed(self.run_pass().await)
    }

    async fn run_pass(&self) -> SyncReport {
        let started = Instant::now();
        let mut report = SyncReport::default();

        let instances = match self.mirror.list_active_instances().await {
            Ok(instances) => instances,
            Err(e) => {
                tracing::error!("Failed to load active instances: {}", e);
                report.duration_ms = started.elapsed().as_millis() as u64;
                return report;
            }
        };

        if instances.is_empty() {
            tracing::warn!("No active instances to sync");
        }

        for instance in &instances {
            match self.sync_instance(instance, &mut report).await {
                Ok(()) => report.instances_synced += 1,
                Err(e) => {
                    report.instances_failed += 1;
                    tracing::error!("Failed to sync instance {}: {}", instance.name, e);
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Sync pass finished in {}ms: {} instance(s) synced, {} failed, {} job(s), {} build(s), {} job failure(s)",
            report.duration_ms,
            report.instances_synced,
            report.instances_failed,
            report.jobs_synced,
            report.builds_synced,
            report.jobs_failed
        );
        report
    }

    async fn sync_instance(
        &self,
        instance: &Instance,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let client = self.clients.client(instance)?;
        let window = self.build_window(instance, Utc::now());

        let jobs = client.get_jobs().await?;
        tracing::debug!(
            "Syncing {} job(s) from {} (build window {})",
            jobs.len(),
            instance.name,
            window
        );

        for summary in &jobs {
            match self
                .sync_job(client.as_ref(), instance, summary, window, report)
                .await
            {
                Ok(()) => report.jobs_synced += 1,
                Err(e) => {
                    report.jobs_failed += 1;
                    tracing::warn!(
                        "Failed to sync job {} on {}: {}",
                        summary.name, instance.name, e
                    );
                }
            }
        }

        self.mirror.touch_last_sync(instance.id, Utc::now()).await?;
        Ok(())
    }

    async fn sync_job(
        &self,
        client: &dyn MasterApi,
        instance: &Instance,
        summary: &RemoteJobSummary,
        window: usize,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let detail = client.get_job(&summary.name).await?;
        let job = self
            .mirror
            .upsert_job(instance.id, &JobUpsert::from_remote(summary, &detail))
            .await?;

        if summary.last_build.is_none() {
            return Ok(());
        }

        let builds = match client.get_builds(&summary.name, window).await {
            Ok(builds) => builds,
            Err(e) => {
                tracing::warn!(
                    "Failed to fetch builds of {} on {}: {}",
                    summary.name, instance.name, e
                );
                return Ok(());
            }
        };

        for build in &builds {
            match self
                .mirror
                .upsert_build(job.id, &BuildUpsert::from(build))
                .await
            {
                Ok(_) => report.builds_synced += 1,
                Err(e) => tracing::warn!(
                    "Failed to store build {} of {}: {}",
                    build.number, summary.name, e
                ),
            }
        }

        Ok(())
    }

    /// Number of builds to fetch per job for this instance
    ///
    /// Never-synced instances and instances whose last sync is older than the
    /// gap threshold get the backfill window.
    fn build_window(&self, instance: &Instance, now: DateTime<Utc>) -> usize {
        let has_gap = match instance.last_sync_at {
            None => true,
            Some(last) => chrono::Duration::from_std(self.config.gap_threshold)
                .map(|gap| now - last > gap)
                .unwrap_or(false),
        };

        if has_gap {
            self.config.backfill_window
        } else {
            self.config.build_window
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryMirror;
    use crate::testing::{FakeMaster, FakeProvider, instance, remote_build, remote_job};
    use butler_core::domain::build::BuildStatus;
    use butler_core::remote::RemoteJobDetail;
    use std::collections::{HashMap, HashSet};
    use tokio::sync::Notify;

    struct Harness {
        mirror: Arc<MemoryMirror>,
        provider: Arc<FakeProvider>,
        engine: Arc<SyncEngine>,
    }

    fn harness() -> Harness {
        let mirror = Arc::new(MemoryMirror::new());
        let provider = Arc::new(FakeProvider::new());
        let engine = Arc::new(SyncEngine::new(
            mirror.clone(),
            provider.clone(),
            SyncConfig::default(),
        ));
        Harness {
            mirror,
            provider,
            engine,
        }
    }

    fn api_master() -> FakeMaster {
        FakeMaster {
            jobs: vec![
                remote_job("api", "red_anime", Some(12)),
                remote_job("docs", "blue", None),
            ],
            details: HashMap::from([(
                "api".to_string(),
                RemoteJobDetail {
                    class: Some("org.jenkinsci.plugins.workflow.job.WorkflowJob".to_string()),
                    display_name: Some("API".to_string()),
                    ..Default::default()
                },
            )]),
            builds: HashMap::from([(
                "api".to_string(),
                vec![remote_build(12, None), remote_build(11, Some("FAILURE"))],
            )]),
            ..Default::default()
        }
    }

    fn completed(outcome: SyncOutcome) -> SyncReport {
        match outcome {
            SyncOutcome::Completed(report) => report,
            SyncOutcome::Skipped => panic!("expected a completed pass"),
        }
    }

    #[tokio::test]
    async fn test_pass_mirrors_jobs_and_builds() {
        let h = harness();
        let ci = instance("ci");
        h.mirror.create_instance(&ci).await.unwrap();
        h.provider.serve(&ci, api_master());

        let report = completed(h.engine.trigger_sync().await);
        assert_eq!(report.instances_synced, 1);
        assert_eq!(report.jobs_synced, 2);
        assert_eq!(report.builds_synced, 2);

        let jobs = h.mirror.list_jobs(ci.id).await.unwrap();
        let api = jobs.iter().find(|j| j.name == "api").unwrap();
        assert_eq!(api.display_name, "API");
        assert_eq!(api.last_build_status, BuildStatus::Running);
        assert_eq!(api.last_build_number, 12);

        let builds = h.mirror.list_builds(api.id).await.unwrap();
        assert_eq!(builds[0].status, BuildStatus::Running);
        assert_eq!(builds[1].status, BuildStatus::Failure);

        let ci = h.mirror.find_instance(ci.id).await.unwrap().unwrap();
        assert!(ci.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_repeated_passes_are_idempotent() {
        let h = harness();
        let ci = instance("ci");
        h.mirror.create_instance(&ci).await.unwrap();
        h.provider.serve(&ci, api_master());

        completed(h.engine.trigger_sync().await);
        let first = h.mirror.list_jobs(ci.id).await.unwrap();
        completed(h.engine.trigger_sync().await);
        let second = h.mirror.list_jobs(ci.id).await.unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.created_at, b.created_at);
            assert_eq!(a.last_build_status, b.last_build_status);
        }
        assert_eq!(h.mirror.build_count(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let h = harness();
        let flaky = instance("flaky");
        let down = instance("down");
        let healthy = instance("healthy");
        for i in [&flaky, &down, &healthy] {
            h.mirror.create_instance(i).await.unwrap();
        }

        h.provider.serve(
            &flaky,
            FakeMaster {
                jobs: vec![remote_job("ok", "blue", None), remote_job("bad", "red", None)],
                failing_details: HashSet::from(["bad".to_string()]),
                ..Default::default()
            },
        );
        h.provider.serve(
            &down,
            FakeMaster {
                fail_jobs: true,
                ..Default::default()
            },
        );
        h.provider.serve(&healthy, api_master());

        let report = completed(h.engine.trigger_sync().await);
        assert_eq!(report.instances_synced, 2);
        assert_eq!(report.instances_failed, 1);
        assert_eq!(report.jobs_synced, 3);
        assert_eq!(report.jobs_failed, 1);

        let flaky_jobs = h.mirror.list_jobs(flaky.id).await.unwrap();
        assert_eq!(flaky_jobs.len(), 1);
        assert_eq!(flaky_jobs[0].name, "ok");
        assert_eq!(h.mirror.list_jobs(healthy.id).await.unwrap().len(), 2);

        let flaky = h.mirror.find_instance(flaky.id).await.unwrap().unwrap();
        assert!(flaky.last_sync_at.is_some());
        let down = h.mirror.find_instance(down.id).await.unwrap().unwrap();
        assert!(down.last_sync_at.is_none());
    }

    #[tokio::test]
    async fn test_inactive_instances_are_not_synced() {
        let h = harness();
        let mut ci = instance("ci");
        ci.is_active = false;
        h.mirror.create_instance(&ci).await.unwrap();
        let master = h.provider.serve(&ci, api_master());

        let report = completed(h.engine.trigger_sync().await);
        assert_eq!(report, SyncReport { duration_ms: report.duration_ms, ..Default::default() });
        assert!(master.build_requests().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_skipped() {
        let h = harness();
        let ci = instance("ci");
        h.mirror.create_instance(&ci).await.unwrap();
        let gate = Arc::new(Notify::new());
        h.provider.serve(
            &ci,
            FakeMaster {
                gate: Some(gate.clone()),
                ..api_master()
            },
        );

        assert!(!h.engine.is_syncing());
        let engine = h.engine.clone();
        let first = tokio::spawn(async move { engine.trigger_sync().await });

        while !h.engine.is_syncing() {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.engine.trigger_sync().await, SyncOutcome::Skipped);
        assert!(h.engine.status().is_syncing);

        gate.notify_one();
        let report = completed(first.await.unwrap());
        assert_eq!(report.jobs_synced, 2);
        assert!(!h.engine.is_syncing());
    }

    #[tokio::test]
    async fn test_build_window_widens_after_gap() {
        let h = harness();
        let mut ci = instance("ci");
        ci.last_sync_at = None;
        h.mirror.create_instance(&ci).await.unwrap();
        let master = h.provider.serve(&ci, api_master());

        completed(h.engine.trigger_sync().await);
        completed(h.engine.trigger_sync().await);

        assert_eq!(
            master.build_requests(),
            vec![("api".to_string(), 50), ("api".to_string(), 5)]
        );
    }

    #[test]
    fn test_build_window_selection() {
        let h = harness();
        let now = Utc::now();
        let mut ci = instance("ci");

        ci.last_sync_at = Some(now - chrono::Duration::seconds(30));
        assert_eq!(h.engine.build_window(&ci, now), 5);

        ci.last_sync_at = Some(now - chrono::Duration::seconds(301));
        assert_eq!(h.engine.build_window(&ci, now), 50);

        ci.last_sync_at = None;
        assert_eq!(h.engine.build_window(&ci, now), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_pass_runs_no_further_pass() {
        let h = harness();
        let mut ci = instance("ci");
        ci.last_sync_at = Some(Utc::now());
        h.mirror.create_instance(&ci).await.unwrap();
        let gate = Arc::new(Notify::new());
        let master = h.provider.serve(
            &ci,
            FakeMaster {
                gate: Some(gate.clone()),
                ..api_master()
            },
        );

        assert!(h.engine.start());
        while !h.engine.is_syncing() {
            tokio::task::yield_now().await;
        }

        // The pass outlives the interval, so the next tick is already due
        time::advance(Duration::from_secs(35)).await;

        let engine = h.engine.clone();
        let stopping = tokio::spawn(async move { engine.stop().await });
        tokio::task::yield_now().await;
        gate.notify_one();

        time::timeout(Duration::from_secs(5), stopping)
            .await
            .expect("stop should return once the running pass ends")
            .unwrap();
        assert_eq!(master.build_requests().len(), 1);
        assert!(!h.engine.status().running);
        assert!(!h.engine.is_syncing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_runs_immediately_and_stops() {
        let h = harness();
        let mut ci = instance("ci");
        ci.last_sync_at = Some(Utc::now());
        h.mirror.create_instance(&ci).await.unwrap();
        let master = h.provider.serve(&ci, api_master());

        assert!(h.engine.start());
        assert!(!h.engine.start());
        assert!(h.engine.status().running);
        assert_eq!(h.engine.status().interval_ms, 30_000);

        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(master.build_requests().len(), 1);

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(master.build_requests().len(), 2);

        h.engine.stop().await;
        assert!(!h.engine.status().running);

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(master.build_requests().len(), 2);
    }
}
