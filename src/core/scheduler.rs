//! Periodic per-(asset, interval) ingestion scheduler

use crate::core::lock::{ExclusivityLock, LockPayload};
use crate::error::{IngestError, SchedulerError};
use crate::jobs::context::JobContext;
use crate::jobs::handlers;
use crate::jobs::types::{epoch_seconds, iso_z, JobRecord, JobSpec, JobState, JobStatus};
use crate::models::Interval;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(6);
const MIN_SCHEDULE_SECONDS: u64 = 15;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub assets: Vec<String>,
    pub intervals: Vec<Interval>,
    /// Cadence overrides keyed by interval code.
    pub schedule_overrides: HashMap<String, u64>,
    pub lock_path: PathBuf,
    pub shutdown_timeout: Duration,
}

impl SchedulerConfig {
    pub fn new(assets: Vec<String>, intervals: Vec<Interval>, lock_path: impl Into<PathBuf>) -> Self {
        Self {
            assets,
            intervals,
            schedule_overrides: HashMap::new(),
            lock_path: lock_path.into(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn job_specs(&self) -> Vec<JobSpec> {
        let mut specs = Vec::with_capacity(self.assets.len() * self.intervals.len());
        for asset in &self.assets {
            for interval in &self.intervals {
                let spec = JobSpec::new(asset.clone(), *interval);
                if !specs.contains(&spec) {
                    specs.push(spec);
                }
            }
        }
        specs
    }
}

/// Cadence for an interval: the configured override, else half the step
/// clamped to at least 15 seconds.
pub fn schedule_seconds_for(interval: Interval, overrides: &HashMap<String, u64>) -> u64 {
    if let Some(seconds) = overrides.get(interval.code()) {
        return (*seconds).max(1);
    }
    let step = interval.seconds().max(1) as u64;
    MIN_SCHEDULE_SECONDS.max((step / 2).min(step))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMeta {
    pub pid: i64,
    pub started_at: f64,
    pub started_at_iso: Option<String>,
    pub assets: Vec<String>,
    pub intervals: Vec<String>,
}

/// Point-in-time view of the scheduler, consumed by readiness checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub jobs: usize,
    pub lock_path: Option<String>,
    pub uptime_s: Option<i64>,
    pub meta: Option<StatusMeta>,
    pub per_job: BTreeMap<String, JobStatus>,
}

#[derive(Default)]
struct StateInner {
    running: bool,
    lock_path: Option<PathBuf>,
    meta: Option<LockPayload>,
    records: BTreeMap<String, JobRecord>,
    guards: HashMap<String, Arc<Mutex<()>>>,
    cancel: CancellationToken,
}

/// Scheduler-owned state shared with job tasks and handles.
pub struct SchedulerState {
    inner: RwLock<StateInner>,
    ctx: Arc<JobContext>,
}

impl SchedulerState {
    fn new(ctx: Arc<JobContext>) -> Self {
        Self {
            inner: RwLock::new(StateInner::default()),
            ctx,
        }
    }

    /// Apply `f` to a job's record, returning its result when the job exists.
    pub async fn update_record<R>(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut JobRecord) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.write().await;
        inner.records.get_mut(job_id).map(f)
    }

    pub async fn is_running(&self) -> bool {
        let inner = self.inner.read().await;
        inner.running && !inner.cancel.is_cancelled()
    }

    pub async fn status(&self) -> SchedulerStatus {
        let inner = self.inner.read().await;
        let running = inner.running && !inner.cancel.is_cancelled();

        let meta = inner.meta.as_ref().map(|payload| StatusMeta {
            pid: payload.pid,
            started_at: payload.started_at,
            started_at_iso: Utc
                .timestamp_millis_opt((payload.started_at * 1000.0) as i64)
                .single()
                .map(iso_z),
            assets: payload.assets.clone(),
            intervals: payload.intervals.clone(),
        });
        let uptime_s = meta
            .as_ref()
            .map(|m| (epoch_seconds(Utc::now()) - m.started_at).max(0.0) as i64);

        SchedulerStatus {
            running,
            jobs: inner.records.len(),
            lock_path: inner
                .lock_path
                .as_ref()
                .map(|p| p.display().to_string()),
            uptime_s,
            meta,
            per_job: inner
                .records
                .iter()
                .map(|(id, record)| (id.clone(), record.status()))
                .collect(),
        }
    }

    async fn guard_for(&self, job_id: &str) -> Option<(JobSpec, Arc<Mutex<()>>, CancellationToken)> {
        let inner = self.inner.read().await;
        let record = inner.records.get(job_id)?;
        let guard = inner.guards.get(job_id)?;
        Some((record.spec.clone(), guard.clone(), inner.cancel.clone()))
    }

    /// Run one job immediately, serialized with its scheduled runs.
    pub async fn run_job_now(&self, job_id: &str) -> Result<Result<u64, IngestError>, SchedulerError> {
        if !self.is_running().await {
            return Err(SchedulerError::NotRunning);
        }
        let (spec, guard, cancel) = self
            .guard_for(job_id)
            .await
            .ok_or_else(|| SchedulerError::UnknownJob(job_id.to_string()))?;

        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(SchedulerError::NotRunning),
            permit = guard.lock() => permit,
        };
        Ok(handlers::run_ingest_job(&self.ctx, &spec, self).await)
    }
}

/// Typed accessor handed to anything that needs scheduler status.
#[derive(Clone)]
pub struct SchedulerHandle {
    state: Arc<SchedulerState>,
}

impl SchedulerHandle {
    pub async fn status(&self) -> SchedulerStatus {
        self.state.status().await
    }

    pub async fn is_running(&self) -> bool {
        self.state.is_running().await
    }

    pub async fn run_job_now(&self, job_id: &str) -> Result<Result<u64, IngestError>, SchedulerError> {
        self.state.run_job_now(job_id).await
    }
}

/// Owns one periodic task per (asset, interval) job.
pub struct JobScheduler {
    config: SchedulerConfig,
    lock: ExclusivityLock,
    state: Arc<SchedulerState>,
    tasks: Mutex<Option<JoinSet<()>>>,
}

impl JobScheduler {
    pub fn new(config: SchedulerConfig, ctx: Arc<JobContext>) -> Self {
        Self {
            lock: ExclusivityLock::new(config.lock_path.clone()),
            config,
            state: Arc::new(SchedulerState::new(ctx)),
            tasks: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            state: self.state.clone(),
        }
    }

    /// Start every job. `Ok(None)` means another live process holds the lock.
    pub async fn start(&self) -> Result<Option<SchedulerHandle>, SchedulerError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() && self.state.is_running().await {
            warn!("Scheduler already started in this process");
            return Ok(Some(self.handle()));
        }

        let specs = self.config.job_specs();
        if specs.is_empty() {
            return Err(SchedulerError::NoJobs);
        }

        let payload = LockPayload::for_current_process(
            self.config.assets.clone(),
            self.config
                .intervals
                .iter()
                .map(|i| i.code().to_string())
                .collect(),
        );

        if !self.lock.acquire(&payload)? {
            let owner = self.lock.owner_pid();
            if owner == Some(payload.pid) {
                warn!(path = %self.lock.path().display(), "Scheduler lock matches current pid; proceeding");
            } else {
                warn!(
                    path = %self.lock.path().display(),
                    owner_pid = ?owner,
                    "Scheduler lock held by another process; not starting a second scheduler"
                );
                return Ok(None);
            }
        }

        let cancel = CancellationToken::new();
        let mut jobs = Vec::with_capacity(specs.len());
        {
            let mut inner = self.state.inner.write().await;
            inner.records.clear();
            inner.guards.clear();
            for spec in specs {
                let schedule_s = schedule_seconds_for(spec.interval, &self.config.schedule_overrides);
                let guard = Arc::new(Mutex::new(()));
                inner
                    .records
                    .insert(spec.job_id.clone(), JobRecord::new(spec.clone(), schedule_s));
                inner.guards.insert(spec.job_id.clone(), guard.clone());
                jobs.push((spec, schedule_s, guard));
            }
            inner.running = true;
            inner.lock_path = Some(self.config.lock_path.clone());
            inner.meta = Some(payload);
            inner.cancel = cancel.clone();
        }

        let mut set = JoinSet::new();
        for (spec, schedule_s, guard) in jobs {
            set.spawn(job_loop(
                spec,
                Duration::from_secs(schedule_s),
                self.state.clone(),
                guard,
                cancel.clone(),
            ));
        }

        info!(jobs = set.len(), "Candle scheduler started");
        *tasks = Some(set);
        Ok(Some(self.handle()))
    }

    /// Cancel every job, wait out the grace period, then abort stragglers and release the lock.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut tasks = self.tasks.lock().await;
        let Some(mut set) = tasks.take() else {
            return Ok(());
        };

        self.state.inner.read().await.cancel.cancel();

        let drained = tokio::time::timeout(self.config.shutdown_timeout, drain(&mut set)).await;
        if drained.is_err() {
            warn!(
                remaining = set.len(),
                timeout_s = self.config.shutdown_timeout.as_secs_f64(),
                "Shutdown grace period elapsed; aborting job tasks"
            );
            set.abort_all();
            drain(&mut set).await;
        }

        {
            let mut inner = self.state.inner.write().await;
            inner.records.clear();
            inner.guards.clear();
            inner.running = false;
            inner.lock_path = None;
            inner.meta = None;
        }

        self.lock.release()?;
        info!("Candle scheduler stopped");
        Ok(())
    }

    pub async fn run_job_now(&self, job_id: &str) -> Result<Result<u64, IngestError>, SchedulerError> {
        self.state.run_job_now(job_id).await
    }
}

async fn drain(set: &mut JoinSet<()>) {
    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                error!(error = %e, "Job task panicked");
            }
        }
    }
}

async fn job_loop(
    spec: JobSpec,
    schedule: Duration,
    state: Arc<SchedulerState>,
    guard: Arc<Mutex<()>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(schedule);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let _permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = guard.lock() => permit,
        };

        // Failures are already recorded on the job
        let _ = handlers::run_ingest_job(&state.ctx, &spec, &state).await;
    }

    state
        .update_record(&spec.job_id, |record| record.state = JobState::Stopped)
        .await;
}
