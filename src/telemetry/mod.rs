//! # Telemetry Module
//!
//! Appends capture samples to per-identity partitions with rotation.
//!
//! This module handles:
//! - Lazily creating one partition per identity on first write
//! - Bounding each partition to a fixed row cap (oldest row evicted first)
//! - Formatting samples as `[timestamp, latitude, longitude, battery]` rows
//! - Reading back the latest sample of an identity (map viewer query)

use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{format_timestamp, parse_timestamp};
use crate::error::Result;
use crate::store::{CellRange, PartitionInfo, PartitionedLog};

/// Row cap per partition
pub const DEFAULT_MAX_ROWS: usize = 1000;

/// One timestamped location/battery reading for one identity.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSample {
    pub timestamp: NaiveDateTime,
    pub identity: String,
    pub latitude: f64,
    pub longitude: f64,
    /// 0..=100
    pub battery_percent: u8,
}

impl CaptureSample {
    /// Row layout written to the store
    pub fn to_row(&self) -> Vec<String> {
        vec![
            format_timestamp(self.timestamp),
            self.latitude.to_string(),
            self.longitude.to_string(),
            self.battery_percent.to_string(),
        ]
    }

    /// Parse a stored row back into a sample. Returns `None` for rows that
    /// do not carry all four fields.
    pub fn from_row(identity: &str, row: &[String]) -> Option<Self> {
        let [timestamp, latitude, longitude, battery, ..] = row else {
            return None;
        };
        Some(Self {
            timestamp: parse_timestamp(timestamp.trim())?,
            identity: identity.to_string(),
            latitude: latitude.trim().parse().ok()?,
            longitude: longitude.trim().parse().ok()?,
            battery_percent: battery.trim().trim_end_matches('%').parse().ok()?,
        })
    }
}

/// Writes capture samples into the store.
pub struct TelemetryClient {
    store: Arc<dyn PartitionedLog>,
    max_rows: usize,
    config_partition: String,
}

impl TelemetryClient {
    /// Create a client.
    ///
    /// # Arguments
    ///
    /// * `store` - Backing store
    /// * `max_rows` - Row cap per identity partition (must be > 0)
    /// * `config_partition` - Name of the configuration partition, excluded
    ///   from [`TelemetryClient::tracked_partitions`]
    pub fn new(store: Arc<dyn PartitionedLog>, max_rows: usize, config_partition: &str) -> Self {
        Self {
            store,
            max_rows: max_rows.max(1),
            config_partition: config_partition.to_string(),
        }
    }

    /// Append one sample to the partition named after `sample.identity`.
    ///
    /// Steps run in order and the first failure aborts the rest:
    /// 1. ensure the partition exists
    /// 2. read its row count
    /// 3. at or above the cap, delete row 0 (the oldest row)
    /// 4. append the sample row
    ///
    /// Steps are not atomic together: an eviction stays committed even if
    /// the append then fails, and concurrent writers can race the cap.
    pub async fn append(&self, sample: &CaptureSample) -> Result<()> {
        let identity = sample.identity.as_str();
        debug!("Writing sample for {}", identity);

        let partition = self.ensure_partition(identity).await?;

        let rows = self.store.row_count(partition.id).await?;
        if rows >= self.max_rows {
            // Row 0 is evicted as-is, header or not
            self.store.delete_rows(partition.id, 0, 1).await?;
            info!("Deleted first row from partition {} ({} rows)", identity, rows);
        }

        self.store.append_row(identity, &sample.to_row()).await?;
        debug!("Sample written for {}", identity);
        Ok(())
    }

    /// Find the partition called `name`, creating it when missing.
    ///
    /// A create that loses a race with another writer is resolved by
    /// listing again before giving up.
    pub async fn ensure_partition(&self, name: &str) -> Result<PartitionInfo> {
        if let Some(found) = self.find_partition(name).await? {
            return Ok(found);
        }

        info!("Creating new partition: {}", name);
        match self.store.create_partition(name).await {
            Ok(created) => Ok(created),
            Err(create_err) => match self.find_partition(name).await? {
                Some(found) => {
                    warn!("Partition {} appeared concurrently: {}", name, create_err);
                    Ok(found)
                }
                None => Err(create_err),
            },
        }
    }

    /// Most recent sample stored for `identity`, if any.
    pub async fn latest(&self, identity: &str) -> Result<Option<CaptureSample>> {
        if self.find_partition(identity).await?.is_none() {
            return Ok(None);
        }
        let rows = self
            .store
            .read_range(identity, &CellRange::columns(0, 3))
            .await?;
        Ok(rows
            .last()
            .and_then(|row| CaptureSample::from_row(identity, row)))
    }

    /// Names of every telemetry partition (everything but the config partition).
    pub async fn tracked_partitions(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .list_partitions()
            .await?
            .into_iter()
            .map(|p| p.title)
            .filter(|title| *title != self.config_partition)
            .collect())
    }

    async fn find_partition(&self, name: &str) -> Result<Option<PartitionInfo>> {
        Ok(self
            .store
            .list_partitions()
            .await?
            .into_iter()
            .find(|p| p.title == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    fn sample(identity: &str, minute: u32, battery: u8) -> CaptureSample {
        CaptureSample {
            timestamp: parse_timestamp(&format!("2024-05-01 12:{:02}:00", minute)).unwrap(),
            identity: identity.to_string(),
            latitude: 37.7749,
            longitude: -122.4194,
            battery_percent: battery,
        }
    }

    fn numbered_rows(count: usize) -> Vec<Vec<String>> {
        (0..count).map(|i| vec![format!("row-{}", i)]).collect()
    }

    #[test]
    fn test_row_layout() {
        let row = sample("a@x.com", 5, 80).to_row();
        assert_eq!(row, vec!["2024-05-01 12:05:00", "37.7749", "-122.4194", "80"]);
    }

    #[test]
    fn test_from_row_rejects_partial_rows() {
        let row: Vec<String> = vec!["2024-05-01 12:05:00".into(), "1.0".into()];
        assert_eq!(CaptureSample::from_row("a", &row), None);
    }

    #[tokio::test]
    async fn test_first_write_creates_partition() {
        let store = Arc::new(MemoryStore::new());
        let client = TelemetryClient::new(store.clone(), DEFAULT_MAX_ROWS, "Sheet1");

        client.append(&sample("a@x.com", 0, 90)).await.unwrap();

        let rows = store.rows("a@x.com").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], "2024-05-01 12:00:00");
    }

    #[tokio::test]
    async fn test_full_partition_evicts_oldest() {
        let store = Arc::new(MemoryStore::new());
        store.seed("a@x.com", numbered_rows(1000));
        let client = TelemetryClient::new(store.clone(), DEFAULT_MAX_ROWS, "Sheet1");

        let new = sample("a@x.com", 30, 55);
        client.append(&new).await.unwrap();

        let rows = store.rows("a@x.com").unwrap();
        assert_eq!(rows.len(), 1000);
        assert_eq!(rows[0], vec!["row-1".to_string()]);
        assert!(!rows.contains(&vec!["row-0".to_string()]));
        assert_eq!(rows.last().unwrap(), &new.to_row());
    }

    #[tokio::test]
    async fn test_below_cap_does_not_evict() {
        let store = Arc::new(MemoryStore::new());
        store.seed("a@x.com", numbered_rows(999));
        let client = TelemetryClient::new(store.clone(), DEFAULT_MAX_ROWS, "Sheet1");

        client.append(&sample("a@x.com", 1, 50)).await.unwrap();

        let rows = store.rows("a@x.com").unwrap();
        assert_eq!(rows.len(), 1000);
        assert_eq!(rows[0], vec!["row-0".to_string()]);
    }

    #[tokio::test]
    async fn test_over_cap_evicts_exactly_one() {
        let store = Arc::new(MemoryStore::new());
        store.seed("a@x.com", numbered_rows(5));
        let client = TelemetryClient::new(store.clone(), 3, "Sheet1");

        client.append(&sample("a@x.com", 1, 50)).await.unwrap();

        assert_eq!(store.rows("a@x.com").unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_latest_returns_last_row() {
        let store = Arc::new(MemoryStore::new());
        let client = TelemetryClient::new(store, DEFAULT_MAX_ROWS, "Sheet1");

        assert_eq!(client.latest("a@x.com").await.unwrap(), None);

        client.append(&sample("a@x.com", 1, 70)).await.unwrap();
        client.append(&sample("a@x.com", 2, 65)).await.unwrap();

        let latest = client.latest("a@x.com").await.unwrap().unwrap();
        assert_eq!(latest, sample("a@x.com", 2, 65));
    }

    #[tokio::test]
    async fn test_tracked_partitions_skip_config() {
        let store = Arc::new(MemoryStore::new());
        store.seed("Sheet1", vec![vec!["10".to_string()]]);
        let client = TelemetryClient::new(store, DEFAULT_MAX_ROWS, "Sheet1");
        client.append(&sample("b@x.com", 1, 70)).await.unwrap();
        client.append(&sample("a@x.com", 1, 70)).await.unwrap();

        assert_eq!(
            client.tracked_partitions().await.unwrap(),
            vec!["b@x.com".to_string(), "a@x.com".to_string()]
        );
    }

    /// Store whose create always fails after a rival writer created the partition
    struct RacingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl PartitionedLog for RacingStore {
        async fn list_partitions(&self) -> Result<Vec<PartitionInfo>> {
            self.inner.list_partitions().await
        }
        async fn create_partition(&self, name: &str) -> Result<PartitionInfo> {
            self.inner.create_partition(name).await?;
            Err(TrackerError::Store("already exists".to_string()))
        }
        async fn row_count(&self, id: u64) -> Result<usize> {
            self.inner.row_count(id).await
        }
        async fn delete_rows(&self, id: u64, start: usize, end: usize) -> Result<()> {
            self.inner.delete_rows(id, start, end).await
        }
        async fn append_row(&self, partition: &str, values: &[String]) -> Result<()> {
            self.inner.append_row(partition, values).await
        }
        async fn read_range(&self, partition: &str, range: &CellRange) -> Result<Vec<Vec<String>>> {
            self.inner.read_range(partition, range).await
        }
    }

    #[tokio::test]
    async fn test_create_race_resolved_by_relist() {
        let store = Arc::new(RacingStore {
            inner: MemoryStore::new(),
        });
        let client = TelemetryClient::new(store.clone(), DEFAULT_MAX_ROWS, "Sheet1");

        client.append(&sample("a@x.com", 0, 90)).await.unwrap();
        assert_eq!(store.inner.rows("a@x.com").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_failure_aborts_append() {
        struct ReadOnly;

        #[async_trait]
        impl PartitionedLog for ReadOnly {
            async fn list_partitions(&self) -> Result<Vec<PartitionInfo>> {
                Ok(Vec::new())
            }
            async fn create_partition(&self, _: &str) -> Result<PartitionInfo> {
                Err(TrackerError::Store("quota exceeded".to_string()))
            }
            async fn row_count(&self, _: u64) -> Result<usize> {
                unreachable!("append must stop after a failed create")
            }
            async fn delete_rows(&self, _: u64, _: usize, _: usize) -> Result<()> {
                unreachable!("append must stop after a failed create")
            }
            async fn append_row(&self, _: &str, _: &[String]) -> Result<()> {
                unreachable!("append must stop after a failed create")
            }
            async fn read_range(&self, _: &str, _: &CellRange) -> Result<Vec<Vec<String>>> {
                Ok(Vec::new())
            }
        }

        let client = TelemetryClient::new(Arc::new(ReadOnly), DEFAULT_MAX_ROWS, "Sheet1");
        let err = client.append(&sample("a@x.com", 0, 90)).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }
}
