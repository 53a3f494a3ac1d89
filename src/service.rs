//! # Tracker Service
//!
//! Installs the capture schedule from the remote configuration.
//!
//! Two entry points mirror how tracking gets (re)armed:
//! - [`TrackerService::start`]: interactive start, one immediate capture plus
//!   the periodic schedule
//! - [`TrackerService::reconfigure`]: boot or reload, periodic schedule only
//!
//! Both only schedule when the configuration is present and the signed-in
//! identity is tracked.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::log_window::LogWindow;
use crate::scheduler::{ConflictPolicy, Job, ScheduleHandle, Scheduler};
use crate::sensors::IdentityProvider;
use crate::tracking::ConfigClient;

/// Why nothing was scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotScheduled {
    NoConfiguration,
    SignedOut,
    NotTracked(String),
}

impl std::fmt::Display for NotScheduled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotScheduled::NoConfiguration => write!(f, "no tracking configuration found"),
            NotScheduled::SignedOut => write!(f, "nobody is signed in"),
            NotScheduled::NotTracked(identity) => write!(f, "{} is not tracked", identity),
        }
    }
}

pub struct TrackerService {
    config: ConfigClient,
    identity: Arc<dyn IdentityProvider>,
    scheduler: Arc<Scheduler>,
    job: Arc<dyn Job>,
    job_name: String,
    log: Arc<LogWindow>,
}

impl TrackerService {
    pub fn new(
        config: ConfigClient,
        identity: Arc<dyn IdentityProvider>,
        scheduler: Arc<Scheduler>,
        job: Arc<dyn Job>,
        job_name: &str,
        log: Arc<LogWindow>,
    ) -> Self {
        Self {
            config,
            identity,
            scheduler,
            job,
            job_name: job_name.to_string(),
            log,
        }
    }

    /// Capture now and every configured interval from now on.
    pub async fn start(&self) -> Result<ScheduleHandle, NotScheduled> {
        self.install(true).await
    }

    /// Re-read the configuration and (re)install only the periodic schedule.
    pub async fn reconfigure(&self) -> Result<ScheduleHandle, NotScheduled> {
        self.install(false).await
    }

    async fn install(&self, run_now: bool) -> Result<ScheduleHandle, NotScheduled> {
        let result = self.check().await;
        let interval_minutes = match result {
            Ok(minutes) => minutes,
            Err(reason) => {
                info!("Tracking not scheduled: {}", reason);
                self.log.record(format!("Tracking not scheduled: {}", reason));
                return Err(reason);
            }
        };

        if run_now {
            self.scheduler.schedule_immediate(self.job.clone());
            self.log.record("Location capture requested");
        }

        let interval = Duration::from_secs(u64::from(interval_minutes) * 60);
        let handle = self.scheduler.schedule_periodic(
            &self.job_name,
            self.job.clone(),
            interval,
            ConflictPolicy::Replace,
        );
        self.log.record(format!(
            "Location tracking scheduled every {} minutes",
            interval_minutes
        ));
        Ok(handle)
    }

    /// Interval to schedule at, or why not to schedule.
    async fn check(&self) -> Result<u32, NotScheduled> {
        // Nobody signed in means no config read at all
        let identity = self
            .identity
            .current_identity()
            .await
            .ok_or(NotScheduled::SignedOut)?;
        let config = self.config.fetch().await.ok_or(NotScheduled::NoConfiguration)?;
        if !config.is_tracked(&identity) {
            return Err(NotScheduled::NotTracked(identity));
        }
        Ok(config.interval_minutes)
    }
}
