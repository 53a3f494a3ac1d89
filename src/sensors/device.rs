//! Device-backed collaborator implementations for a Linux host.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    ActivitySignal, BatterySource, IdentityProvider, Permission, PermissionProvider, Position,
    PositionSource,
};
use crate::error::{Result, TrackerError};

/// Default sysfs power supply class directory
pub const DEFAULT_POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

/// Identity taken from local configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    identity: Option<String>,
}

impl StaticIdentity {
    /// Blank identities count as signed out
    pub fn new(identity: Option<String>) -> Self {
        Self {
            identity: identity.filter(|id| !id.trim().is_empty()),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_identity(&self) -> Option<String> {
        self.identity.clone()
    }
}

/// Permission grants taken from local configuration.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermissions {
    pub fine_location: bool,
}

impl PermissionProvider for StaticPermissions {
    fn has_permission(&self, permission: Permission) -> bool {
        match permission {
            Permission::FineLocation => self.fine_location,
        }
    }
}

/// Battery level read from the first `Battery`-type supply under sysfs.
#[derive(Debug, Clone)]
pub struct SysfsBattery {
    dir: PathBuf,
}

impl SysfsBattery {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl BatterySource for SysfsBattery {
    async fn battery_percent(&self) -> Result<u8> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut supplies = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            supplies.push(entry.path());
        }
        // Deterministic choice when several batteries are present
        supplies.sort();

        for supply in supplies {
            let kind = match fs::read_to_string(supply.join("type")).await {
                Ok(kind) => kind,
                Err(_) => continue,
            };
            if kind.trim() != "Battery" {
                continue;
            }

            let capacity = fs::read_to_string(supply.join("capacity")).await?;
            let percent: u8 = capacity.trim().parse().map_err(|_| {
                TrackerError::Acquisition(format!(
                    "Unreadable capacity {:?} in {}",
                    capacity.trim(),
                    supply.display()
                ))
            })?;
            debug!("Battery {} at {}%", supply.display(), percent);
            return Ok(percent.min(100));
        }

        Err(TrackerError::Acquisition(format!(
            "No battery found under {}",
            self.dir.display()
        )))
    }
}

/// Constant battery level, for hosts on mains power.
#[derive(Debug, Clone, Copy)]
pub struct FixedBattery(pub u8);

#[async_trait]
impl BatterySource for FixedBattery {
    async fn battery_percent(&self) -> Result<u8> {
        Ok(self.0.min(100))
    }
}

/// Constant position, for stationary hosts.
#[derive(Debug, Clone, Copy)]
pub struct FixedPosition(pub Position);

#[async_trait]
impl PositionSource for FixedPosition {
    async fn current_position(&self, cancel: CancellationToken) -> Result<Position> {
        if cancel.is_cancelled() {
            return Err(TrackerError::Acquisition("request cancelled".to_string()));
        }
        Ok(self.0)
    }
}

/// Activity indicator surfaced through the tracing log.
#[derive(Debug, Default)]
pub struct LoggedActivity {
    active: AtomicUsize,
}

impl LoggedActivity {
    /// Number of attempts currently holding the indicator
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl ActivitySignal for LoggedActivity {
    fn begin(&self) {
        if self.active.fetch_add(1, Ordering::SeqCst) == 0 {
            info!("Location tracking active");
        }
    }

    fn end(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            info!("Location tracking idle");
        }
    }
}
