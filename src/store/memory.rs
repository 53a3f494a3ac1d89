//! In-memory [`PartitionedLog`], used for dry runs and as the test fake.

use async_trait::async_trait;
use std::sync::Mutex;
use tracing::debug;

use super::{CellRange, PartitionInfo, PartitionedLog};
use crate::error::{Result, TrackerError};

#[derive(Debug)]
struct Partition {
    info: PartitionInfo,
    rows: Vec<Vec<String>>,
}

#[derive(Debug, Default)]
struct State {
    partitions: Vec<Partition>,
    next_id: u64,
}

/// Store that keeps every partition in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a partition pre-filled with `rows`, returning its id.
    pub fn seed(&self, name: &str, rows: Vec<Vec<String>>) -> u64 {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.partitions.push(Partition {
            info: PartitionInfo {
                id,
                title: name.to_string(),
            },
            rows,
        });
        id
    }

    /// Copy of a partition's rows, or `None` if it does not exist.
    pub fn rows(&self, name: &str) -> Option<Vec<Vec<String>>> {
        let state = self.lock();
        state
            .partitions
            .iter()
            .find(|p| p.title() == name)
            .map(|p| p.rows.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means a test thread panicked mid-operation
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Partition {
    fn title(&self) -> &str {
        &self.info.title
    }

    fn id(&self) -> u64 {
        self.info.id
    }
}

fn not_found(what: impl std::fmt::Display) -> TrackerError {
    TrackerError::Store(format!("Partition not found: {}", what))
}

#[async_trait]
impl PartitionedLog for MemoryStore {
    async fn list_partitions(&self) -> Result<Vec<PartitionInfo>> {
        Ok(self
            .lock()
            .partitions
            .iter()
            .map(|p| p.info.clone())
            .collect())
    }

    async fn create_partition(&self, name: &str) -> Result<PartitionInfo> {
        let mut state = self.lock();
        if state.partitions.iter().any(|p| p.title() == name) {
            return Err(TrackerError::Store(format!(
                "A partition with the name \"{}\" already exists",
                name
            )));
        }
        let info = PartitionInfo {
            id: state.next_id,
            title: name.to_string(),
        };
        state.next_id += 1;
        state.partitions.push(Partition {
            info: info.clone(),
            rows: Vec::new(),
        });
        debug!("Created in-memory partition {} ({})", name, info.id);
        Ok(info)
    }

    async fn row_count(&self, partition_id: u64) -> Result<usize> {
        self.lock()
            .partitions
            .iter()
            .find(|p| p.id() == partition_id)
            .map(|p| p.rows.len())
            .ok_or_else(|| not_found(partition_id))
    }

    async fn delete_rows(&self, partition_id: u64, start: usize, end: usize) -> Result<()> {
        let mut state = self.lock();
        let partition = state
            .partitions
            .iter_mut()
            .find(|p| p.id() == partition_id)
            .ok_or_else(|| not_found(partition_id))?;

        let end = end.min(partition.rows.len());
        if start < end {
            partition.rows.drain(start..end);
        }
        Ok(())
    }

    async fn append_row(&self, partition: &str, values: &[String]) -> Result<()> {
        let mut state = self.lock();
        let target = state
            .partitions
            .iter_mut()
            .find(|p| p.title() == partition)
            .ok_or_else(|| not_found(partition))?;
        target.rows.push(values.to_vec());
        Ok(())
    }

    async fn read_range(&self, partition: &str, range: &CellRange) -> Result<Vec<Vec<String>>> {
        let state = self.lock();
        let source = state
            .partitions
            .iter()
            .find(|p| p.title() == partition)
            .ok_or_else(|| not_found(partition))?;
        Ok(range.slice(&source.rows))
    }
}
