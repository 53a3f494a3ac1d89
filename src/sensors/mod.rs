//! # Sensors and Host Collaborators
//!
//! Trait seams for everything a capture attempt reads from its host:
//! signed-in identity, location permission, battery level, position fix and
//! the ongoing "tracking active" indicator.
//!
//! This module handles:
//! - The collaborator traits and their device-backed implementations ([`device`])
//! - A gpsd client for single-shot position fixes ([`gpsd`])
//! - The [`LocationAcquirer`], a cancellable best-effort position fetch

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

pub mod device;
pub mod gpsd;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// Permissions the tracker checks before capturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    FineLocation,
}

/// Source of the signed-in identity.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current identity, `None` when nobody is signed in.
    async fn current_identity(&self) -> Option<String>;
}

/// Source of permission grants.
#[cfg_attr(test, mockall::automock)]
pub trait PermissionProvider: Send + Sync {
    fn has_permission(&self, permission: Permission) -> bool;
}

/// Source of the battery charge level.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatterySource: Send + Sync {
    /// Charge level, 0..=100.
    async fn battery_percent(&self) -> Result<u8>;
}

/// Provider of a single high-accuracy position fix.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Resolve one fix. Implementations must stop work once `cancel` fires.
    async fn current_position(&self, cancel: CancellationToken) -> Result<Position>;
}

/// User-visible "tracking active" indicator held while an attempt runs.
pub trait ActivitySignal: Send + Sync {
    fn begin(&self);
    fn end(&self);
}

/// Single-shot, best-effort position fetch.
pub struct LocationAcquirer {
    source: Arc<dyn PositionSource>,
    timeout: Duration,
}

impl LocationAcquirer {
    pub fn new(source: Arc<dyn PositionSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    /// Fetch one position fix.
    ///
    /// Resolves to `None` on provider failure, timeout or cancellation. The
    /// in-flight provider request runs under a child of `cancel`, which is
    /// cancelled whenever the fetch ends without a fix.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<Position> {
        let request = cancel.child_token();
        info!("Requesting current location");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                request.cancel();
                debug!("Location request cancelled");
                return None;
            }
            result = tokio::time::timeout(
                self.timeout,
                self.source.current_position(request.clone()),
            ) => result,
        };

        match result {
            Ok(Ok(position)) => {
                info!(
                    "Location received: {:.6}, {:.6}",
                    position.latitude, position.longitude
                );
                Some(position)
            }
            Ok(Err(e)) => {
                request.cancel();
                warn!("Failed to get location: {}", e);
                None
            }
            Err(_) => {
                request.cancel();
                warn!("Location request timed out after {:?}", self.timeout);
                None
            }
        }
    }
}
