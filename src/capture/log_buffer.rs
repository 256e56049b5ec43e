//! 4.A Log buffer: an ordered ring of console log entries with file-backed
//! persistence.

use crate::types::{LogEntry, MAX_LOG_ENTRY_BYTES};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

struct Inner {
    entries: Vec<LogEntry>,
    added_at: Vec<DateTime<Utc>>,
}

pub struct LogBuffer {
    inner: RwLock<Inner>,
    max_entries: usize,
    file_path: PathBuf,
}

#[derive(Debug, Default)]
pub struct AddEntriesReport {
    pub received: usize,
    pub rejected: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize, file_path: PathBuf) -> Arc<Self> {
        let buf = Arc::new(Self {
            inner: RwLock::new(Inner {
                entries: Vec::new(),
                added_at: Vec::new(),
            }),
            max_entries,
            file_path,
        });
        buf.load_from_disk();
        buf
    }

    /// Tolerant NDJSON loader: malformed lines are skipped, not fatal.
    fn load_from_disk(&self) {
        let text = match std::fs::read_to_string(&self.file_path) {
            Ok(t) => t,
            Err(_) => return,
        };
        let mut inner = self.inner.write();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => {
                    inner.added_at.push(Utc::now());
                    inner.entries.push(entry);
                }
                Err(e) => {
                    warn!(error = %e, "skipping malformed log line on load");
                }
            }
        }
    }

    /// Validate and append `batch` in order, with FIFO rotation at
    /// `max_entries`, then rewrite the backing file atomically. Returns the
    /// number of valid (received) entries; rejects are counted separately.
    /// Save failures are logged, not raised.
    pub fn add_entries(&self, batch: Vec<LogEntry>) -> AddEntriesReport {
        let mut report = AddEntriesReport::default();
        let mut inner = self.inner.write();
        for entry in batch {
            if entry.is_valid() && entry.serialized_len() <= MAX_LOG_ENTRY_BYTES {
                inner.entries.push(entry);
                inner.added_at.push(Utc::now());
                report.received += 1;
            } else {
                report.rejected += 1;
            }
        }
        if inner.entries.len() > self.max_entries {
            let drop_count = inner.entries.len() - self.max_entries;
            inner.entries.drain(0..drop_count);
            inner.added_at.drain(0..drop_count);
        }
        self.save_locked(&inner.entries);
        report
    }

    fn save_locked(&self, entries: &[LogEntry]) {
        if let Some(parent) = self.file_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, "failed to create log directory");
                return;
            }
        }
        let mut buf = String::new();
        for entry in entries {
            match serde_json::to_string(entry) {
                Ok(line) => {
                    buf.push_str(&line);
                    buf.push('\n');
                }
                Err(e) => warn!(error = %e, "failed to serialize log entry"),
            }
        }
        let tmp_path = tmp_path_for(&self.file_path);
        if let Err(e) = std::fs::write(&tmp_path, buf) {
            warn!(error = %e, "failed to write log buffer temp file");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp_path, &self.file_path) {
            warn!(error = %e, "failed to atomically rename log buffer file");
        }
    }

    /// Newest-first when `limit` is applied; `since` filters entries with a
    /// valid RFC3339 timestamp at or after the given instant, skipping
    /// entries with missing/invalid timestamps.
    pub fn entries(&self, limit: Option<usize>, since: Option<DateTime<Utc>>) -> Vec<LogEntry> {
        let inner = self.inner.read();
        let mut result: Vec<LogEntry> = inner
            .entries
            .iter()
            .filter(|e| match (&since, e.ts()) {
                (None, _) => true,
                (Some(since), Some(ts)) => DateTime::parse_from_rfc3339(ts)
                    .map(|t| t.with_timezone(&Utc) >= *since)
                    .unwrap_or(false),
                (Some(_), None) => false,
            })
            .cloned()
            .collect();
        result.reverse();
        if let Some(limit) = limit {
            result.truncate(limit);
        }
        result
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.added_at.clear();
        if let Err(e) = std::fs::write(&self.file_path, "") {
            warn!(error = %e, "failed to truncate log buffer file on clear");
        }
    }

    /// All entries paired with their ingest wall-clock time, oldest first —
    /// used by the diff engine to split on a checkpoint instant.
    pub fn entries_with_time(&self) -> Vec<(DateTime<Utc>, LogEntry)> {
        let inner = self.inner.read();
        inner
            .added_at
            .iter()
            .cloned()
            .zip(inner.entries.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(level: &str, message: &str) -> LogEntry {
        let serde_json::Value::Object(fields) = json!({"level": level, "message": message})
        else {
            unreachable!()
        };
        LogEntry { fields }
    }

    #[test]
    fn valid_and_invalid_entries_counted_separately() {
        let dir = tempfile::tempdir().unwrap();
        let buf = LogBuffer::new(10, dir.path().join("log.ndjson"));
        let report = buf.add_entries(vec![entry("error", "e1"), entry("invalid", "e2")]);
        assert_eq!(report.received, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn fifo_rotation_on_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let buf = LogBuffer::new(2, dir.path().join("log.ndjson"));
        buf.add_entries(vec![entry("info", "a")]);
        buf.add_entries(vec![entry("info", "b")]);
        buf.add_entries(vec![entry("info", "c")]);
        assert_eq!(buf.len(), 2);
        let all = buf.entries(None, None);
        // newest-first
        assert_eq!(all[0].message(), Some("c"));
        assert_eq!(all[1].message(), Some("b"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.ndjson");
        {
            let buf = LogBuffer::new(10, path.clone());
            buf.add_entries(vec![entry("error", "e1"), entry("warn", "e2")]);
        }
        let buf2 = LogBuffer::new(10, path);
        assert_eq!(buf2.len(), 2);
    }

    #[test]
    fn malformed_line_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.ndjson");
        std::fs::write(&path, "{not json}\n{\"level\":\"error\",\"message\":\"ok\"}\n").unwrap();
        let buf = LogBuffer::new(10, path);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn clear_drops_entries_and_truncates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.ndjson");
        let buf = LogBuffer::new(10, path.clone());
        buf.add_entries(vec![entry("error", "e1")]);
        buf.clear();
        assert_eq!(buf.len(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
