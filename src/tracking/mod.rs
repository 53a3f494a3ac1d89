//! # Tracking Configuration
//!
//! Remote configuration kept in the first partition of the store:
//!
//! ```text
//! | A         | B     |
//! |-----------|-------|
//! | 10        |       |   <- interval in minutes
//! | a@x.com   | TRUE  |   <- one row per identity
//! | b@x.com   | FALSE |
//! ```
//!
//! Fetched fresh on every capture attempt; never cached.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::store::{CellRange, PartitionedLog};

/// Interval used when the first cell is missing or not a positive integer
pub const DEFAULT_INTERVAL_MINUTES: u32 = 5;

/// Parsed remote configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingConfig {
    /// Minutes between periodic capture attempts (always > 0)
    pub interval_minutes: u32,
    /// Identity → enabled flag
    pub tracked_identities: HashMap<String, bool>,
}

impl TrackingConfig {
    /// Build from the raw rows of the config range.
    ///
    /// Returns `None` for an empty result set. The first row's first cell is
    /// the interval; every later row with at least two cells is an
    /// `(identity, flag)` pair, later duplicates overwriting earlier ones.
    pub fn from_rows(rows: &[Vec<String>]) -> Option<Self> {
        let (first, rest) = rows.split_first()?;

        let interval_minutes = first
            .first()
            .and_then(|cell| cell.trim().parse::<u32>().ok())
            .filter(|minutes| *minutes > 0)
            .unwrap_or(DEFAULT_INTERVAL_MINUTES);

        let tracked_identities = rest
            .iter()
            .filter(|row| row.len() >= 2)
            .map(|row| (row[0].clone(), parse_flag(&row[1])))
            .collect();

        Some(Self {
            interval_minutes,
            tracked_identities,
        })
    }

    /// True only when `identity` is listed with an enabled flag.
    pub fn is_tracked(&self, identity: &str) -> bool {
        self.tracked_identities.get(identity) == Some(&true)
    }
}

/// `"true"` in any letter case is enabled; everything else is disabled.
fn parse_flag(cell: &str) -> bool {
    cell.trim().eq_ignore_ascii_case("true")
}

/// Reads [`TrackingConfig`] from the store's configuration partition.
pub struct ConfigClient {
    store: Arc<dyn PartitionedLog>,
    partition: String,
    range: CellRange,
}

impl ConfigClient {
    pub fn new(store: Arc<dyn PartitionedLog>, partition: &str, range: CellRange) -> Self {
        Self {
            store,
            partition: partition.to_string(),
            range,
        }
    }

    /// Name of the configuration partition
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Fetch and parse the current configuration.
    ///
    /// Never fails: transport and parse errors are logged and reported as
    /// `None`, which callers treat as "do not track".
    pub async fn fetch(&self) -> Option<TrackingConfig> {
        debug!("Reading configuration from {}!{}", self.partition, self.range);

        let rows = match self.store.read_range(&self.partition, &self.range).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Error reading configuration: {}", e);
                return None;
            }
        };

        match TrackingConfig::from_rows(&rows) {
            Some(config) => {
                info!(
                    "Configuration read: interval {} min, {} identities",
                    config.interval_minutes,
                    config.tracked_identities.len()
                );
                Some(config)
            }
            None => {
                info!("No configuration found in {}", self.partition);
                None
            }
        }
    }
}
