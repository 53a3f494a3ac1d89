//! JSON-lines [`PartitionedLog`] on the local filesystem.
//!
//! Layout under the data directory:
//!
//! ```text
//! data/
//! ├── partitions.json   manifest: next id + (id, title) per partition
//! ├── 0.jsonl           one JSON array of cell strings per line
//! └── 1.jsonl
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{CellRange, PartitionInfo, PartitionedLog};
use crate::error::{Result, TrackerError};

const MANIFEST_FILE: &str = "partitions.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    next_id: u64,
    partitions: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    id: u64,
    title: String,
}

/// Store that keeps partitions as JSON-lines files in a directory.
///
/// All operations of one `FileStore` are serialized; separate processes
/// sharing a directory are not coordinated.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        info!("File store opened at {}", dir.display());
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn partition_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}.jsonl", id))
    }

    async fn load_manifest(&self) -> Result<Manifest> {
        match fs::read_to_string(self.dir.join(MANIFEST_FILE)).await {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        let text = serde_json::to_string_pretty(manifest)?;
        fs::write(self.dir.join(MANIFEST_FILE), text).await?;
        Ok(())
    }

    async fn resolve(&self, title: &str) -> Result<u64> {
        self.load_manifest()
            .await?
            .partitions
            .iter()
            .find(|p| p.title == title)
            .map(|p| p.id)
            .ok_or_else(|| TrackerError::Store(format!("Partition not found: {}", title)))
    }

    async fn read_rows(&self, id: u64) -> Result<Vec<Vec<String>>> {
        let text = match fs::read_to_string(self.partition_path(id)).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TrackerError::Store(format!("Partition not found: {}", id)))
            }
            Err(e) => return Err(e.into()),
        };

        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(TrackerError::from))
            .collect()
    }

    async fn write_rows(&self, id: u64, rows: &[Vec<String>]) -> Result<()> {
        let mut text = String::new();
        for row in rows {
            text.push_str(&serde_json::to_string(row)?);
            text.push('\n');
        }
        fs::write(self.partition_path(id), text).await?;
        Ok(())
    }
}

#[async_trait]
impl PartitionedLog for FileStore {
    async fn list_partitions(&self) -> Result<Vec<PartitionInfo>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .load_manifest()
            .await?
            .partitions
            .into_iter()
            .map(|p| PartitionInfo {
                id: p.id,
                title: p.title,
            })
            .collect())
    }

    async fn create_partition(&self, name: &str) -> Result<PartitionInfo> {
        let _guard = self.lock.lock().await;
        let mut manifest = self.load_manifest().await?;
        if manifest.partitions.iter().any(|p| p.title == name) {
            return Err(TrackerError::Store(format!(
                "A partition with the name \"{}\" already exists",
                name
            )));
        }

        let id = manifest.next_id;
        manifest.next_id += 1;
        manifest.partitions.push(ManifestEntry {
            id,
            title: name.to_string(),
        });

        self.write_rows(id, &[]).await?;
        self.save_manifest(&manifest).await?;
        debug!("Created partition file {} for {}", self.partition_path(id).display(), name);

        Ok(PartitionInfo {
            id,
            title: name.to_string(),
        })
    }

    async fn row_count(&self, partition_id: u64) -> Result<usize> {
        let _guard = self.lock.lock().await;
        Ok(self.read_rows(partition_id).await?.len())
    }

    async fn delete_rows(&self, partition_id: u64, start: usize, end: usize) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut rows = self.read_rows(partition_id).await?;
        let end = end.min(rows.len());
        if start < end {
            rows.drain(start..end);
            self.write_rows(partition_id, &rows).await?;
        }
        Ok(())
    }

    async fn append_row(&self, partition: &str, values: &[String]) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        let _guard = self.lock.lock().await;
        let id = self.resolve(partition).await?;
        let mut line = serde_json::to_string(values)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(self.partition_path(id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_range(&self, partition: &str, range: &CellRange) -> Result<Vec<Vec<String>>> {
        let _guard = self.lock.lock().await;
        let id = self.resolve(partition).await?;
        Ok(range.slice(&self.read_rows(id).await?))
    }
}
