//! # Capture Attempt
//!
//! One execution of the tracking job: gate → acquire → write.
//!
//! ```text
//! Idle ──trigger──▶ Evaluating ──proceed──▶ Acquiring ──fix──▶ Writing ──ok──▶ Succeeded
//!                       │                       │                  │
//!                       └──abort──▶ Failed ◀────┴──no fix──────────┴──error
//! ```
//!
//! Every suspension point observes the attempt's cancellation token; there
//! is no in-process retry, the next periodic tick is the only retry.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::gate::{self, AbortReason, GateDecision, GateInputs};
use crate::cancel::OrCancelExt;
use crate::clock::Clock;
use crate::log_window::LogWindow;
use crate::scheduler::{Job, JobOutcome};
use crate::sensors::{
    ActivitySignal, BatterySource, IdentityProvider, LocationAcquirer, Permission,
    PermissionProvider,
};
use crate::telemetry::{CaptureSample, TelemetryClient};
use crate::tracking::ConfigClient;

/// Attempt lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Evaluating,
    Acquiring,
    Writing,
    Succeeded,
    Failed,
}

impl AttemptState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: AttemptState) -> bool {
        use AttemptState::*;
        matches!(
            (self, next),
            (Idle, Evaluating)
                | (Evaluating, Failed)
                | (Evaluating, Acquiring)
                | (Acquiring, Failed)
                | (Acquiring, Writing)
                | (Writing, Succeeded)
                | (Writing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptState::Succeeded | AttemptState::Failed)
    }
}

/// Why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// Gate refused (expected, non-exceptional)
    Gate(AbortReason),
    /// Battery or position provider gave nothing usable
    Acquisition,
    /// Telemetry append failed
    Store(String),
    /// The attempt was cancelled by its host
    Cancelled,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Gate(reason) => write!(f, "{}", reason),
            AttemptFailure::Acquisition => write!(f, "no location fix"),
            AttemptFailure::Store(cause) => write!(f, "store write failed: {}", cause),
            AttemptFailure::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(AttemptFailure),
}

impl AttemptOutcome {
    /// Outcome code reported to the scheduler
    pub fn job_outcome(&self) -> JobOutcome {
        match self {
            AttemptOutcome::Succeeded => JobOutcome::Success,
            AttemptOutcome::Failed(_) => JobOutcome::Failure,
        }
    }
}

/// Holds the activity indicator for the lifetime of an attempt.
struct ActivityGuard<'a>(&'a dyn ActivitySignal);

impl<'a> ActivityGuard<'a> {
    fn begin(signal: &'a dyn ActivitySignal) -> Self {
        signal.begin();
        Self(signal)
    }
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// State tracker for a single execution.
struct Attempt<'a> {
    state: AttemptState,
    log: &'a LogWindow,
}

impl Attempt<'_> {
    fn advance(&mut self, next: AttemptState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("Attempt {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn note(&self, message: String) {
        info!("{}", message);
        self.log.record(message);
    }

    fn fail(&mut self, failure: AttemptFailure) -> AttemptOutcome {
        self.advance(AttemptState::Failed);
        match &failure {
            AttemptFailure::Gate(_) | AttemptFailure::Cancelled => {
                self.note(format!("Capture skipped: {}", failure))
            }
            _ => {
                warn!("Capture failed: {}", failure);
                self.log.record(format!("Capture failed: {}", failure));
            }
        }
        AttemptOutcome::Failed(failure)
    }
}

/// Everything a capture attempt talks to.
pub struct CaptureWorker {
    pub identity: Arc<dyn IdentityProvider>,
    pub permissions: Arc<dyn PermissionProvider>,
    pub battery: Arc<dyn BatterySource>,
    pub acquirer: LocationAcquirer,
    pub config: ConfigClient,
    pub telemetry: TelemetryClient,
    pub activity: Arc<dyn ActivitySignal>,
    pub clock: Arc<dyn Clock>,
    pub log: Arc<LogWindow>,
}

impl CaptureWorker {
    /// Run one attempt to a terminal state.
    pub async fn run_attempt(&self, cancel: &CancellationToken) -> AttemptOutcome {
        let _active = ActivityGuard::begin(self.activity.as_ref());
        let mut attempt = Attempt {
            state: AttemptState::Idle,
            log: &self.log,
        };

        attempt.advance(AttemptState::Evaluating);
        attempt.note("Location capture started".to_string());

        let battery = match self.battery.battery_percent().or_cancel(cancel).await {
            Err(_) => return attempt.fail(AttemptFailure::Cancelled),
            Ok(Ok(percent)) => percent,
            Ok(Err(e)) => {
                warn!("Battery level unavailable: {}", e);
                return attempt.fail(AttemptFailure::Acquisition);
            }
        };

        let identity = match self.identity.current_identity().or_cancel(cancel).await {
            Ok(identity) => identity,
            Err(_) => return attempt.fail(AttemptFailure::Cancelled),
        };

        // The remote config only matters once the local checks pass
        let config = if gate::needs_config(battery, identity.as_deref()) {
            match self.config.fetch().or_cancel(cancel).await {
                Ok(config) => config,
                Err(_) => return attempt.fail(AttemptFailure::Cancelled),
            }
        } else {
            None
        };

        let decision = gate::evaluate(&GateInputs {
            battery_percent: battery,
            identity: identity.as_deref(),
            config: config.as_ref(),
            location_permission: self.permissions.has_permission(Permission::FineLocation),
        });

        let identity = match (decision, identity) {
            (GateDecision::Proceed, Some(identity)) => identity,
            (GateDecision::Abort(reason), identity) => {
                let who = identity.as_deref().unwrap_or("<signed out>");
                debug!("Gate refused {} at {}% battery", who, battery);
                return attempt.fail(AttemptFailure::Gate(reason));
            }
            (GateDecision::Proceed, None) => {
                return attempt.fail(AttemptFailure::Gate(AbortReason::NotAuthenticated))
            }
        };

        attempt.advance(AttemptState::Acquiring);
        let Some(position) = self.acquirer.acquire(cancel).await else {
            if cancel.is_cancelled() {
                return attempt.fail(AttemptFailure::Cancelled);
            }
            return attempt.fail(AttemptFailure::Acquisition);
        };

        attempt.advance(AttemptState::Writing);
        let sample = CaptureSample {
            timestamp: self.clock.now(),
            identity,
            latitude: position.latitude,
            longitude: position.longitude,
            battery_percent: battery,
        };

        match self.telemetry.append(&sample).or_cancel(cancel).await {
            Err(_) => attempt.fail(AttemptFailure::Cancelled),
            Ok(Err(e)) => attempt.fail(AttemptFailure::Store(e.to_string())),
            Ok(Ok(())) => {
                attempt.advance(AttemptState::Succeeded);
                attempt.note(format!(
                    "Location saved for {} ({:.5}, {:.5}, {}%)",
                    sample.identity, sample.latitude, sample.longitude, sample.battery_percent
                ));
                AttemptOutcome::Succeeded
            }
        }
    }
}

#[async_trait]
impl Job for CaptureWorker {
    async fn run(&self, cancel: CancellationToken) -> JobOutcome {
        self.run_attempt(&cancel).await.job_outcome()
    }
}
