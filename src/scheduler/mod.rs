//! Scheduler orchestrator
//!
//! Owns the single in-process set of registered jobs: fixed system jobs
//! plus one dynamic job per enabled Schedule row. Jobs are keyed by stable
//! string ids; `refresh_dynamic_schedules` diffs the Schedule table against
//! the registered set without disturbing unchanged jobs. A per-job running
//! flag forbids overlapping fires of the same job — a late fire is dropped
//! and logged, never queued.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::context::{self, RequestContext};
use crate::cron::CronSpec;
use crate::db::PgStores;
use crate::error::CoreResult;
use crate::logging;
use crate::pending::PendingCommandTracker;
use crate::reconnect::ReconnectSupervisor;
use crate::settings::SettingsBridge;
use crate::snapshot::SnapshotService;
use crate::sweep::SweepRunner;
use crate::throttle::ThrottleGovernor;

/// Tick resolution of the scheduling loop.
const TICK: StdDuration = StdDuration::from_secs(1);

/// Persisted log retention, days.
const LOG_RETENTION_DAYS: i64 = 30;

/// Always-on jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemJob {
    /// Hourly: force-close 24h-old pending commands, purge retention.
    CleanupPendingCommands,
    /// Hourly: capture completion snapshots.
    CaptureSnapshots,
    /// Daily: prune old snapshots.
    PruneSnapshots,
    /// Every 30 s: reconnect supervisor pass.
    ReconnectTick,
    /// Daily: prune persisted log entries (when persistence is enabled).
    LogPrune,
    /// Every 5 s: expire elapsed throttle pauses, persist governor state.
    ThrottleWindowReset,
}

impl SystemJob {
    fn job_id(&self) -> &'static str {
        match self {
            Self::CleanupPendingCommands => "system:cleanup_pending_commands",
            Self::CaptureSnapshots => "system:capture_snapshots",
            Self::PruneSnapshots => "system:prune_snapshots",
            Self::ReconnectTick => "system:reconnect_tick",
            Self::LogPrune => "system:log_prune",
            Self::ThrottleWindowReset => "system:throttle_window_reset",
        }
    }

    fn interval(&self) -> Duration {
        match self {
            Self::CleanupPendingCommands => Duration::hours(1),
            Self::CaptureSnapshots => Duration::hours(1),
            Self::PruneSnapshots => Duration::days(1),
            Self::ReconnectTick => Duration::seconds(30),
            Self::LogPrune => Duration::days(1),
            Self::ThrottleWindowReset => Duration::seconds(5),
        }
    }
}

#[derive(Debug, Clone)]
enum JobKind {
    System(SystemJob),
    Sweep { schedule_id: i64 },
}

enum JobTrigger {
    Interval(Duration),
    Cron(CronSpec),
}

struct Job {
    kind: JobKind,
    trigger: JobTrigger,
    next_fire: DateTime<Utc>,
    running: Arc<AtomicBool>,
    /// Change detection for refresh: cron expression + timezone.
    fingerprint: String,
}

/// Everything the orchestrator drives.
pub struct OrchestratorDeps {
    pub pool: PgPool,
    pub stores: Arc<PgStores>,
    pub governor: Arc<ThrottleGovernor>,
    pub settings: Arc<SettingsBridge>,
    pub runner: Arc<SweepRunner>,
    pub tracker: Arc<PendingCommandTracker>,
    pub reconnect: Arc<ReconnectSupervisor>,
    pub snapshots: Arc<SnapshotService>,
}

pub struct Orchestrator {
    deps: OrchestratorDeps,
    jobs: Mutex<HashMap<String, Job>>,
    started: AtomicBool,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self {
            deps,
            jobs: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Register system jobs, load dynamic schedules, run catch-up, and
    /// spawn the tick loop. Idempotent: a second call is a no-op.
    pub async fn start(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> CoreResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("orchestrator already started");
            return Ok(());
        }

        let now = Utc::now();
        {
            let mut jobs = self.jobs.lock().expect("job map lock");
            for system in [
                SystemJob::CleanupPendingCommands,
                SystemJob::CaptureSnapshots,
                SystemJob::PruneSnapshots,
                SystemJob::ReconnectTick,
                SystemJob::LogPrune,
                SystemJob::ThrottleWindowReset,
            ] {
                jobs.insert(
                    system.job_id().to_string(),
                    Job {
                        kind: JobKind::System(system),
                        next_fire: now + system.interval(),
                        trigger: JobTrigger::Interval(system.interval()),
                        running: Arc::new(AtomicBool::new(false)),
                        fingerprint: String::new(),
                    },
                );
            }
        }

        self.refresh_dynamic_schedules().await?;
        self.run_catch_up(shutdown.clone()).await?;

        // One immediate supervisor pass so broken connectors do not wait a
        // full tick after restart.
        if let Err(e) = self.deps.reconnect.tick().await {
            warn!(error = %e, "startup reconnect pass failed");
        }

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.tick_loop(shutdown).await;
        });

        info!("scheduler orchestrator started");
        Ok(())
    }

    /// Diff the Schedule table against registered jobs: add new, remove
    /// deleted/disabled, rebind changed, leave the rest alone.
    pub async fn refresh_dynamic_schedules(&self) -> CoreResult<()> {
        let schedules = self.deps.stores.schedules.list_enabled().await?;
        let now = Utc::now();

        let mut jobs = self.jobs.lock().expect("job map lock");

        let wanted: HashSet<String> = schedules.iter().map(|s| s.job_id()).collect();
        jobs.retain(|id, job| {
            if matches!(job.kind, JobKind::Sweep { .. }) && !wanted.contains(id) {
                info!(job_id = %id, "unregistering removed schedule");
                false
            } else {
                true
            }
        });

        for schedule in schedules {
            let spec = match schedule.cron_spec() {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(schedule_id = schedule.id, error = %e, "skipping unparseable schedule");
                    continue;
                }
            };
            let fingerprint = format!("{}|{}", schedule.cron_expression, schedule.timezone);
            let id = schedule.job_id();

            match jobs.get_mut(&id) {
                Some(job) if job.fingerprint == fingerprint => {}
                Some(job) => {
                    debug!(job_id = %id, "rebinding changed schedule");
                    job.next_fire = spec.next_after(now).unwrap_or(now + Duration::days(3650));
                    job.trigger = JobTrigger::Cron(spec);
                    job.fingerprint = fingerprint;
                }
                None => {
                    let next_fire = spec.next_after(now).unwrap_or(now + Duration::days(3650));
                    jobs.insert(
                        id,
                        Job {
                            kind: JobKind::Sweep {
                                schedule_id: schedule.id,
                            },
                            next_fire,
                            trigger: JobTrigger::Cron(spec),
                            running: Arc::new(AtomicBool::new(false)),
                            fingerprint,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// At most one synthetic fire per schedule whose occurrences were
    /// missed while the process was down; `last_run_at` advances to the
    /// most recent missed occurrence.
    async fn run_catch_up(&self, shutdown: watch::Receiver<bool>) -> CoreResult<()> {
        let now = Utc::now();
        for schedule in self.deps.stores.schedules.list_enabled().await? {
            let Some(last_run) = schedule.last_run_at else {
                continue;
            };
            let spec = match schedule.cron_spec() {
                Ok(spec) => spec,
                Err(_) => continue,
            };
            let Some(missed) = spec.catch_up(last_run, now) else {
                continue;
            };

            info!(
                schedule_id = schedule.id,
                missed = %missed,
                "running catch-up sweep"
            );
            // The synthetic lastRunAt is the missed occurrence itself; the
            // catch-up run does not re-stamp it.
            self.deps
                .stores
                .schedules
                .record_run(schedule.id, missed, spec.next_after(now))
                .await?;

            let running = {
                let jobs = self.jobs.lock().expect("job map lock");
                jobs.get(&schedule.job_id()).map(|j| Arc::clone(&j.running))
            };
            let Some(running) = running else {
                continue;
            };
            if running.swap(true, Ordering::SeqCst) {
                continue;
            }

            let runner = Arc::clone(&self.deps.runner);
            let cancel = shutdown.clone();
            let ctx = RequestContext::scheduler(schedule.job_id());
            let schedule_id = schedule.id;
            context::spawn_with_context(ctx, async move {
                if let Err(e) = runner.run_schedule(&schedule, cancel).await {
                    warn!(schedule_id, error = %e, "catch-up sweep failed");
                }
                running.store(false, Ordering::SeqCst);
            });
        }
        Ok(())
    }

    async fn tick_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(TICK) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }

            let now = Utc::now();
            let due: Vec<String> = {
                let mut jobs = self.jobs.lock().expect("job map lock");
                let mut due = Vec::new();
                for (id, job) in jobs.iter_mut() {
                    if job.next_fire > now {
                        continue;
                    }
                    // Advance the fire time before running so a slow job
                    // never double-fires.
                    job.next_fire = match &job.trigger {
                        JobTrigger::Interval(interval) => now + *interval,
                        JobTrigger::Cron(spec) => {
                            spec.next_after(now).unwrap_or(now + Duration::days(3650))
                        }
                    };
                    due.push(id.clone());
                }
                due
            };

            for id in due {
                self.fire_job(&id, shutdown.clone());
            }
        }
        info!("scheduler orchestrator stopped");
    }

    /// Spawn one job run, guarded by the per-job reentrancy flag.
    fn fire_job(self: &Arc<Self>, job_id: &str, shutdown: watch::Receiver<bool>) {
        let (kind, running) = {
            let jobs = self.jobs.lock().expect("job map lock");
            let Some(job) = jobs.get(job_id) else {
                return;
            };
            (job.kind.clone(), Arc::clone(&job.running))
        };

        if running.swap(true, Ordering::SeqCst) {
            warn!(job_id, "previous run still active; dropping this fire");
            logging::record(
                logging::LogLevel::Warn,
                format!("schedule fire dropped, previous run still active: {job_id}"),
                serde_json::json!({ "job_id": job_id }),
            );
            return;
        }

        let orchestrator = Arc::clone(self);
        let job_id = job_id.to_string();
        let ctx = RequestContext::scheduler(job_id.clone());
        context::spawn_with_context(ctx, async move {
            if let Err(e) = orchestrator.run_job(&kind, shutdown).await {
                warn!(job_id = %job_id, error = %e, "job run failed");
                logging::record(
                    logging::LogLevel::Warn,
                    format!("job failed: {job_id}: {e}"),
                    serde_json::json!({ "job_id": job_id }),
                );
            }
            running.store(false, Ordering::SeqCst);
        });
    }

    async fn run_job(&self, kind: &JobKind, shutdown: watch::Receiver<bool>) -> CoreResult<()> {
        match kind {
            JobKind::Sweep { schedule_id } => {
                // Weak reference: the row may have been deleted since
                // registration.
                let Some(schedule) = self.deps.stores.schedules.get(*schedule_id).await? else {
                    debug!(schedule_id, "schedule vanished; skipping run");
                    return Ok(());
                };
                if !schedule.enabled {
                    return Ok(());
                }
                let fired_at = Utc::now();
                let report = self.deps.runner.run_schedule(&schedule, shutdown).await;
                let next = schedule
                    .cron_spec()
                    .ok()
                    .and_then(|spec| spec.next_after(Utc::now()));
                self.deps
                    .stores
                    .schedules
                    .record_run(*schedule_id, fired_at, next)
                    .await?;
                report.map(|_| ())
            }
            JobKind::System(SystemJob::CleanupPendingCommands) => {
                self.deps.tracker.cleanup_timeouts().await
            }
            JobKind::System(SystemJob::CaptureSnapshots) => self.deps.snapshots.capture_all().await,
            JobKind::System(SystemJob::PruneSnapshots) => self.deps.snapshots.prune().await,
            JobKind::System(SystemJob::ReconnectTick) => self.deps.reconnect.tick().await,
            JobKind::System(SystemJob::LogPrune) => {
                if self.deps.settings.log_persistence_enabled().await? {
                    let cutoff = Utc::now() - Duration::days(LOG_RETENTION_DAYS);
                    logging::writer::prune_before(&self.deps.pool, cutoff).await?;
                }
                Ok(())
            }
            JobKind::System(SystemJob::ThrottleWindowReset) => {
                let now = Utc::now();
                self.deps.governor.tick(now);
                for (connector_id, state) in self.deps.governor.snapshot() {
                    self.deps
                        .stores
                        .throttle_states
                        .upsert(connector_id, &state)
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// Registered job ids, for introspection and tests.
    pub fn registered_jobs(&self) -> Vec<String> {
        self.jobs
            .lock()
            .map(|jobs| jobs.keys().cloned().collect())
            .unwrap_or_default()
    }
}
