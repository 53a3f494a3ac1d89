//! # Log Window
//!
//! Process-wide operational log keeping only the last hour of entries.
//!
//! Every mutation appends, purges entries older than the window, publishes
//! the resulting snapshot to subscribers and overwrites the durable mirror,
//! all under one lock. The mirror is a text file with one
//! `"<yyyy-MM-dd HH:mm:ss> <message>"` line per entry, oldest first.

use chrono::Duration;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::sync::watch;
use tracing::warn;

use crate::clock::{format_timestamp, parse_timestamp, Clock, TIMESTAMP_LEN};
use crate::error::{Result, TrackerError};

/// Retention window in seconds
pub const RETENTION_SECS: i64 = 60 * 60;

static GLOBAL: OnceLock<Arc<LogWindow>> = OnceLock::new();

/// One operational log line. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// `yyyy-MM-dd HH:mm:ss` as written; may be unparseable for loaded lines
    pub timestamp: String,
    pub message: String,
}

impl LogEntry {
    /// Parse a durable mirror line.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPersisted` for lines shorter than the timestamp plus
    /// its separator.
    pub fn parse_line(line: &str) -> Result<Self> {
        let malformed = || TrackerError::MalformedPersisted(line.to_string());
        if line.len() <= TIMESTAMP_LEN {
            return Err(malformed());
        }
        let timestamp = line.get(..TIMESTAMP_LEN).ok_or_else(malformed)?;
        let message = line.get(TIMESTAMP_LEN + 1..).ok_or_else(malformed)?;
        Ok(Self {
            timestamp: timestamp.to_string(),
            message: message.to_string(),
        })
    }

    /// Line as stored in the durable mirror
    pub fn to_line(&self) -> String {
        format!("{} {}", self.timestamp, self.message)
    }

    /// Line as shown in a log viewer
    pub fn display_line(&self) -> String {
        format!("{}: {}", self.timestamp, self.message)
    }
}

/// Time-windowed log buffer with a durable mirror.
pub struct LogWindow {
    entries: Mutex<Vec<LogEntry>>,
    mirror: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    updates: watch::Sender<Vec<LogEntry>>,
}

impl std::fmt::Debug for LogWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWindow")
            .field("mirror", &self.mirror)
            .finish_non_exhaustive()
    }
}

impl LogWindow {
    /// Window without a durable mirror.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::with_entries(Vec::new(), None, clock)
    }

    /// Restore the window from its durable mirror.
    ///
    /// A missing mirror starts an empty window; malformed lines are skipped.
    /// Entries that are already outside the window are purged.
    pub fn load<P: AsRef<Path>>(mirror: P, clock: Arc<dyn Clock>) -> Self {
        let mirror = mirror.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&mirror) {
            Ok(text) => text
                .lines()
                .filter_map(|line| LogEntry::parse_line(line).ok())
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Failed to read log mirror {}: {}", mirror.display(), e);
                Vec::new()
            }
        };
        Self::with_entries(entries, Some(mirror), clock)
    }

    fn with_entries(
        mut entries: Vec<LogEntry>,
        mirror: Option<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        purge(&mut entries, clock.as_ref());
        let (updates, _) = watch::channel(entries.clone());
        Self {
            entries: Mutex::new(entries),
            mirror,
            clock,
            updates,
        }
    }

    /// Append a message stamped with the current time.
    ///
    /// Line breaks in `message` are flattened to spaces so every entry stays
    /// one mirror line. The mirror is rewritten synchronously under the
    /// entry lock; it holds at most an hour of entries.
    pub fn record(&self, message: impl Into<String>) {
        let message = flatten_lines(message.into());
        let mut entries = self.lock();
        entries.push(LogEntry {
            timestamp: format_timestamp(self.clock.now()),
            message,
        });
        purge(&mut entries, self.clock.as_ref());

        self.updates.send_replace(entries.clone());
        if let Some(mirror) = &self.mirror {
            if let Err(e) = write_mirror(mirror, &entries) {
                warn!("Failed to write log mirror {}: {}", mirror.display(), e);
            }
        }
    }

    /// Current entries, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    /// Receiver notified with a fresh snapshot after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<Vec<LogEntry>> {
        self.updates.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn flatten_lines(message: String) -> String {
    if message.contains(['\r', '\n']) {
        message.replace("\r\n", " ").replace(['\r', '\n'], " ")
    } else {
        message
    }
}

/// Drop entries older than the retention window. Unparseable timestamps
/// count as older than the window.
fn purge(entries: &mut Vec<LogEntry>, clock: &dyn Clock) {
    let cutoff = clock.now() - Duration::seconds(RETENTION_SECS);
    entries.retain(|entry| parse_timestamp(&entry.timestamp).is_some_and(|at| at >= cutoff));
}

fn write_mirror(path: &Path, entries: &[LogEntry]) -> std::io::Result<()> {
    let text = entries
        .iter()
        .map(LogEntry::to_line)
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(path, text)
}

/// Install the process-wide window. The first installed window wins and is
/// returned on every later call.
pub fn install(window: LogWindow) -> Arc<LogWindow> {
    GLOBAL.get_or_init(|| Arc::new(window)).clone()
}

/// The process-wide window, if one was installed.
pub fn global() -> Option<Arc<LogWindow>> {
    GLOBAL.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::mocks::ManualClock;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn messages(window: &LogWindow) -> Vec<String> {
        window.snapshot().into_iter().map(|e| e.message).collect()
    }

    #[test]
    fn test_parse_line() {
        let entry = LogEntry::parse_line("2024-05-01 12:00:00 Worker started").unwrap();
        assert_eq!(entry.timestamp, "2024-05-01 12:00:00");
        assert_eq!(entry.message, "Worker started");
        assert_eq!(entry.to_line(), "2024-05-01 12:00:00 Worker started");
        assert_eq!(entry.display_line(), "2024-05-01 12:00:00: Worker started");
    }

    #[test]
    fn test_short_lines_are_malformed() {
        assert!(matches!(
            LogEntry::parse_line("2024-05-01 12:00:00"),
            Err(TrackerError::MalformedPersisted(_))
        ));
        assert!(LogEntry::parse_line("").is_err());
        // Exactly timestamp + separator is a valid, empty message
        assert_eq!(LogEntry::parse_line("2024-05-01 12:00:00 ").unwrap().message, "");
    }

    #[test]
    fn test_only_last_hour_survives_mutation() {
        let clock = ManualClock::at("2024-05-01 10:00:00");
        let window = LogWindow::in_memory(Arc::new(clock.clone()));

        window.record("ninety minutes ago");
        clock.advance(Duration::minutes(60));
        window.record("thirty minutes ago");
        clock.advance(Duration::minutes(30));
        window.record("now");

        assert_eq!(messages(&window), vec!["thirty minutes ago", "now"]);
    }

    #[test]
    fn test_entry_exactly_one_hour_old_is_kept() {
        let clock = ManualClock::at("2024-05-01 10:00:00");
        let window = LogWindow::in_memory(Arc::new(clock.clone()));

        window.record("edge");
        clock.advance(Duration::minutes(60));
        window.record("now");

        assert_eq!(messages(&window), vec!["edge", "now"]);
    }

    #[test]
    fn test_mirror_overwritten_with_current_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs.txt");
        let clock = ManualClock::at("2024-05-01 10:00:00");
        let window = LogWindow::load(&path, Arc::new(clock.clone()));

        window.record("first");
        clock.advance(Duration::minutes(61));
        window.record("second");

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "2024-05-01 11:01:00 second");
    }

    #[test]
    fn test_reload_reproduces_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs.txt");
        let clock = ManualClock::at("2024-05-01 10:00:00");

        let written = {
            let window = LogWindow::load(&path, Arc::new(clock.clone()));
            for i in 0..5 {
                window.record(format!("entry {}", i));
                clock.advance(Duration::minutes(10));
            }
            window.snapshot()
        };

        let reloaded = LogWindow::load(&path, Arc::new(clock.clone()));
        assert_eq!(reloaded.snapshot(), written);

        // Later reload drops what aged out in between
        clock.advance(Duration::minutes(25));
        let aged = LogWindow::load(&path, Arc::new(clock));
        assert_eq!(aged.snapshot(), written[2..].to_vec());
    }

    #[test]
    fn test_load_skips_malformed_and_unparseable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs.txt");
        std::fs::write(
            &path,
            "short\n2024-05-01 09:59:00 kept\n\
             not-a-timestamp-xx dropped\n2024-05-01 08:00:00 too old",
        )
        .unwrap();

        let clock = ManualClock::at("2024-05-01 10:00:00");
        let window = LogWindow::load(&path, Arc::new(clock));
        assert_eq!(messages(&window), vec!["kept"]);
    }

    #[test]
    fn test_multiline_message_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs.txt");
        let clock = ManualClock::at("2024-05-01 10:00:00");

        let written = {
            let window = LogWindow::load(&path, Arc::new(clock.clone()));
            window.record(
                "Capture failed: store write failed: values.append failed with \
                 400 Bad Request: {\n  \"error\": {\r\n    \"code\": 400\n  }\n}",
            );
            window.record("next");
            window.snapshot()
        };

        assert_eq!(written.len(), 2);
        assert!(!written[0].message.contains(['\r', '\n']));
        assert!(written[0].message.ends_with("\"code\": 400   } }"));
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);

        let reloaded = LogWindow::load(&path, Arc::new(clock));
        assert_eq!(reloaded.snapshot(), written);
    }

    #[test]
    fn test_subscribers_see_every_mutation() {
        let clock = ManualClock::at("2024-05-01 10:00:00");
        let window = LogWindow::in_memory(Arc::new(clock));
        let mut updates = window.subscribe();

        window.record("hello");
        assert!(updates.has_changed().unwrap());
        let seen = updates.borrow_and_update().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message, "hello");
    }

    #[test]
    fn test_global_install_is_first_wins() {
        let clock = ManualClock::at("2024-05-01 10:00:00");
        let first = install(LogWindow::in_memory(Arc::new(clock.clone())));
        let second = install(LogWindow::in_memory(Arc::new(clock)));
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &global().unwrap()));
    }
}
