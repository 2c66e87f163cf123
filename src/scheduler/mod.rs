// In-process job scheduler. One driver task per job sleeps until the next fire time,
// applies coalesce / misfire-grace / max-instances, and runs the job through the
// ledger wrapper. Next-run bookkeeping lives in scheduler_jobs so a restart resumes
// the schedule.

mod trigger;

pub use trigger::{DueTimes, Trigger};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::models::JobState;
use crate::store::Store;
use crate::tasks::{Task, TaskContext, run_tracked};

/// Per-job firing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Concurrent runs allowed; a firing beyond this is skipped.
    pub max_instances: usize,
    /// Collapse several missed fire times into a single run.
    pub coalesce: bool,
    /// A fire time later than this is dropped as a misfire.
    pub misfire_grace: Duration,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_instances: 1,
            coalesce: true,
            misfire_grace: Duration::from_secs(30),
        }
    }
}

struct Job {
    task: Arc<dyn Task>,
    trigger: Trigger,
    options: JobOptions,
}

pub struct Scheduler {
    store: Arc<Store>,
    shutdown_grace: Duration,
    jobs: Vec<Job>,
    stop: CancellationToken,
    abort: CancellationToken,
    drivers: JoinSet<()>,
    started: bool,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, shutdown_grace: Duration) -> Self {
        Self {
            store,
            shutdown_grace,
            jobs: Vec::new(),
            stop: CancellationToken::new(),
            abort: CancellationToken::new(),
            drivers: JoinSet::new(),
            started: false,
        }
    }

    /// Registers `task` under its name, replacing any job already registered with that name.
    pub fn schedule(
        &mut self,
        task: Arc<dyn Task>,
        trigger: Trigger,
        options: JobOptions,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(!self.started, "cannot schedule {} after start", task.name());
        anyhow::ensure!(
            options.max_instances > 0,
            "max_instances must be > 0 for {}",
            task.name()
        );
        let name = task.name();
        self.jobs.retain(|j| j.task.name() != name);
        self.jobs.push(Job {
            task,
            trigger,
            options,
        });
        Ok(())
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|j| j.task.name()).collect()
    }

    /// Restores (or resets) each job's persisted state and spawns its driver.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.started, "scheduler already started");
        let now = Utc::now();
        for job in std::mem::take(&mut self.jobs) {
            let state = self.initial_state(&job, now).await?;
            self.store.save_job_state(&state).await?;
            info!(
                job = job.task.name(),
                trigger = %state.trigger,
                next_run_at = %state.next_run_at,
                "job scheduled"
            );
            self.drivers.spawn(drive(
                self.store.clone(),
                job,
                state,
                self.stop.clone(),
                self.abort.clone(),
            ));
        }
        self.started = true;
        Ok(())
    }

    async fn initial_state(&self, job: &Job, now: DateTime<Utc>) -> anyhow::Result<JobState> {
        let name = job.task.name();
        let descriptor = job.trigger.descriptor();
        let stored = self.store.load_job_state(name).await?;
        if let Some(state) = &stored
            && state.trigger == descriptor
        {
            info!(job = name, next_run_at = %state.next_run_at, "resuming persisted schedule");
            return Ok(state.clone());
        }
        if let Some(state) = &stored {
            info!(job = name, old = %state.trigger, new = %descriptor, "trigger changed; schedule reset");
        }
        let next_run_at = job
            .trigger
            .first_after(now)
            .ok_or_else(|| anyhow::anyhow!("trigger for {} never fires", name))?;
        Ok(JobState {
            job_name: name.to_string(),
            trigger: descriptor,
            next_run_at,
            last_run_at: stored.and_then(|s| s.last_run_at),
        })
    }

    /// Graceful shutdown: no new firings, in-flight runs get `shutdown_grace` to finish
    /// before they are cancelled (and recorded as failed).
    pub async fn stop(&mut self) {
        self.stop.cancel();
        let grace = self.shutdown_grace;
        if tokio::time::timeout(grace, join_all(&mut self.drivers))
            .await
            .is_err()
        {
            warn!(
                grace_secs = grace.as_secs_f64(),
                "runs still in flight after shutdown grace; cancelling"
            );
            self.abort.cancel();
            join_all(&mut self.drivers).await;
        }
        info!("scheduler stopped");
    }
}

async fn join_all(set: &mut JoinSet<()>) {
    while let Some(res) = set.join_next().await {
        if let Err(e) = res {
            error!(error = %e, "scheduler task ended abnormally");
        }
    }
}

#[instrument(skip_all, fields(job = job.task.name()))]
async fn drive(
    store: Arc<Store>,
    job: Job,
    mut state: JobState,
    stop: CancellationToken,
    abort: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(job.options.max_instances));
    let mut running: JoinSet<()> = JoinSet::new();

    loop {
        let wait = (state.next_run_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = stop.cancelled() => break,
            Some(res) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = res {
                    error!(error = %e, "job run ended abnormally");
                }
                continue;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let now = Utc::now();
        let DueTimes { due, next } = job.trigger.due_times(state.next_run_at, now);
        if due.is_empty() {
            continue;
        }
        let fires = if job.options.coalesce && due.len() > 1 {
            debug!(missed = due.len() - 1, "coalescing missed fire times");
            vec![due[due.len() - 1]]
        } else {
            due
        };

        let mut fired = false;
        for scheduled in fires {
            let late = (now - scheduled).to_std().unwrap_or(Duration::ZERO);
            if late > job.options.misfire_grace {
                warn!(
                    scheduled = %scheduled,
                    late_secs = late.as_secs_f64(),
                    "run time missed by more than misfire grace; skipped"
                );
                continue;
            }
            let Ok(permit) = permits.clone().try_acquire_owned() else {
                warn!(
                    scheduled = %scheduled,
                    max_instances = job.options.max_instances,
                    "maximum number of running instances reached; run skipped"
                );
                continue;
            };
            fired = true;
            let store = store.clone();
            let task = job.task.clone();
            let ctx = TaskContext::new(stop.clone());
            let abort = abort.clone();
            running.spawn(async move {
                let _permit = permit;
                if let Err(e) = run_tracked(&store, task.as_ref(), &ctx, &abort).await {
                    error!(error = %e, "run not recorded in ledger");
                }
            });
        }

        if fired {
            state.last_run_at = Some(now);
        }
        let exhausted = next.is_none();
        if let Some(next) = next {
            state.next_run_at = next;
        }
        if let Err(e) = store.save_job_state(&state).await {
            warn!(error = %e, "could not persist job state");
        }
        if exhausted {
            info!("trigger has no further fire times; job retired");
            break;
        }
    }

    join_all(&mut running).await;
    debug!("job driver stopped");
}
