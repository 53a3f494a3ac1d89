//! # Job Scheduler
//!
//! Host for capture jobs: one-shot runs and named periodic schedules.
//!
//! Periodic schedules are unique by name. Enqueuing a name that is already
//! scheduled either replaces the existing schedule (its pending and running
//! executions are cancelled) or keeps it, per [`ConflictPolicy`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome code a job reports back to its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failure,
}

/// Unit of schedulable work.
#[async_trait]
pub trait Job: Send + Sync {
    /// Run once. Must stop promptly once `cancel` fires.
    async fn run(&self, cancel: CancellationToken) -> JobOutcome;
}

/// What to do when a periodic schedule with the same name exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Cancel the existing schedule and install the new one
    #[default]
    Replace,
    /// Leave the existing schedule untouched
    Keep,
}

/// Description of an installed periodic schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleHandle {
    pub name: String,
    pub interval: Duration,
    /// Bumped every time a schedule is installed under any name
    pub generation: u64,
}

struct Entry {
    handle: ScheduleHandle,
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Tokio-backed job host.
pub struct Scheduler {
    schedules: Mutex<HashMap<String, Entry>>,
    shutdown: CancellationToken,
    generation: Mutex<u64>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            schedules: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            generation: Mutex::new(0),
        }
    }

    /// Run `job` once, as soon as possible.
    pub fn schedule_immediate(&self, job: Arc<dyn Job>) -> JoinHandle<JobOutcome> {
        let cancel = self.shutdown.child_token();
        debug!("Enqueued one-time job");
        tokio::spawn(async move {
            let outcome = job.run(cancel).await;
            debug!("One-time job finished: {:?}", outcome);
            outcome
        })
    }

    /// Run `job` every `interval` under the unique `name`.
    ///
    /// The first execution happens one interval after enqueue. Executions of
    /// one schedule never overlap; a tick that falls due while the previous
    /// execution is still running is delayed.
    pub fn schedule_periodic(
        &self,
        name: &str,
        job: Arc<dyn Job>,
        interval: Duration,
        policy: ConflictPolicy,
    ) -> ScheduleHandle {
        let mut schedules = self.lock();

        if let Some(existing) = schedules.get(name) {
            match policy {
                ConflictPolicy::Keep => {
                    debug!("Keeping existing schedule {}", name);
                    return existing.handle.clone();
                }
                ConflictPolicy::Replace => {
                    existing.token.cancel();
                    info!("Replacing schedule {}", name);
                }
            }
        }

        let handle = ScheduleHandle {
            name: name.to_string(),
            interval,
            generation: self.next_generation(),
        };
        let token = self.shutdown.child_token();
        let task = tokio::spawn(run_periodic(name.to_string(), job, interval, token.clone()));

        info!("Scheduled {} every {:?}", name, interval);
        schedules.insert(
            name.to_string(),
            Entry {
                handle: handle.clone(),
                token,
                task,
            },
        );
        handle
    }

    /// Cancel the schedule called `name`. Returns whether one existed.
    pub fn cancel(&self, name: &str) -> bool {
        match self.lock().remove(name) {
            Some(entry) => {
                entry.token.cancel();
                info!("Cancelled schedule {}", name);
                true
            }
            None => false,
        }
    }

    /// Currently installed periodic schedules, sorted by name.
    pub fn active_schedules(&self) -> Vec<ScheduleHandle> {
        let mut handles: Vec<_> = self
            .lock()
            .values()
            .filter(|entry| !entry.task.is_finished())
            .map(|entry| entry.handle.clone())
            .collect();
        handles.sort_by(|a, b| a.name.cmp(&b.name));
        handles
    }

    /// Cancel everything and wait for periodic tasks to wind down.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let entries: Vec<Entry> = self.lock().drain().map(|(_, entry)| entry).collect();
        for entry in entries {
            let _ = entry.task.await;
        }
        info!("Scheduler stopped");
    }

    fn next_generation(&self) -> u64 {
        let mut generation = self.generation.lock().unwrap_or_else(|e| e.into_inner());
        *generation += 1;
        *generation
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.schedules.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn run_periodic(name: String, job: Arc<dyn Job>, period: Duration, token: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Schedule {} stopped", name);
                return;
            }
            _ = ticker.tick() => {}
        }

        let outcome = job.run(token.child_token()).await;
        debug!("Periodic job {} finished: {:?}", name, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingJob {
        runs: AtomicUsize,
    }

    impl CountingJob {
        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Job for CountingJob {
        async fn run(&self, _cancel: CancellationToken) -> JobOutcome {
            self.runs.fetch_add(1, Ordering::SeqCst);
            JobOutcome::Success
        }
    }

    /// Job that blocks until cancelled
    #[derive(Default)]
    struct BlockingJob {
        cancelled: AtomicUsize,
    }

    #[async_trait]
    impl Job for BlockingJob {
        async fn run(&self, cancel: CancellationToken) -> JobOutcome {
            cancel.cancelled().await;
            self.cancelled.fetch_add(1, Ordering::SeqCst);
            JobOutcome::Failure
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_immediate_runs_once() {
        let scheduler = Scheduler::new();
        let job = Arc::new(CountingJob::default());

        let outcome = scheduler.schedule_immediate(job.clone()).await.unwrap();

        assert_eq!(outcome, JobOutcome::Success);
        assert_eq!(job.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_first_run_after_one_interval() {
        let scheduler = Scheduler::new();
        let job = Arc::new(CountingJob::default());
        scheduler.schedule_periodic("work", job.clone(), secs(300), ConflictPolicy::Replace);

        tokio::time::sleep(Duration::from_secs(299)).await;
        settle().await;
        assert_eq!(job.runs(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(job.runs(), 1);

        tokio::time::sleep(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(job.runs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_leaves_single_schedule_with_new_interval() {
        let scheduler = Scheduler::new();
        let old = Arc::new(CountingJob::default());
        let new = Arc::new(CountingJob::default());

        let first =
            scheduler.schedule_periodic("work", old.clone(), secs(60), ConflictPolicy::Replace);
        let second =
            scheduler.schedule_periodic("work", new.clone(), secs(600), ConflictPolicy::Replace);
        assert!(second.generation > first.generation);

        settle().await;
        let active = scheduler.active_schedules();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].interval, Duration::from_secs(600));

        tokio::time::sleep(Duration::from_secs(601)).await;
        settle().await;
        assert_eq!(old.runs(), 0);
        assert_eq!(new.runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_cancels_running_execution() {
        let scheduler = Scheduler::new();
        let blocking = Arc::new(BlockingJob::default());
        scheduler.schedule_periodic("work", blocking.clone(), secs(60), ConflictPolicy::Replace);

        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(blocking.cancelled.load(Ordering::SeqCst), 0);

        scheduler.schedule_periodic(
            "work",
            Arc::new(CountingJob::default()),
            Duration::from_secs(60),
            ConflictPolicy::Replace,
        );
        settle().await;
        assert_eq!(blocking.cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_policy_preserves_existing() {
        let scheduler = Scheduler::new();
        let job = Arc::new(CountingJob::default());
        let first =
            scheduler.schedule_periodic("work", job.clone(), secs(60), ConflictPolicy::Replace);
        let kept = scheduler.schedule_periodic(
            "work",
            Arc::new(CountingJob::default()),
            Duration::from_secs(5),
            ConflictPolicy::Keep,
        );

        assert_eq!(first, kept);
        assert_eq!(scheduler.active_schedules(), vec![first]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_shutdown() {
        let scheduler = Scheduler::new();
        let job = Arc::new(CountingJob::default());
        scheduler.schedule_periodic("a", job.clone(), secs(60), ConflictPolicy::Replace);
        scheduler.schedule_periodic("b", job.clone(), secs(60), ConflictPolicy::Replace);

        assert!(scheduler.cancel("a"));
        assert!(!scheduler.cancel("a"));
        settle().await;
        let names: Vec<_> = scheduler.active_schedules().into_iter().map(|h| h.name).collect();
        assert_eq!(names, vec!["b".to_string()]);

        scheduler.shutdown().await;
        assert!(scheduler.active_schedules().is_empty());

        tokio::time::sleep(Duration::from_secs(600)).await;
        settle().await;
        assert_eq!(job.runs(), 0);
    }
}
