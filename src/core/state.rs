// src/core/state.rs — File sinks for external observability
//
// Snapshots (fusion trace, live latest, summary, memory) are written
// atomically via temp file + rename. Logs are line-delimited JSON; the live
// log is truncated to its last `max_lines` after each append.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::Attempt;

/// Atomically write `value` as pretty JSON (temp file + rename).
pub fn write_snapshot<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".into());
    let tmp = path.with_file_name(format!(".{}.tmp", name));

    let mut f = std::fs::File::create(&tmp)?;
    f.write_all(json.as_bytes())?;
    f.flush()?;
    f.sync_all()?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a JSON snapshot. Missing or malformed files read as `None`.
pub fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Ignoring malformed {}: {}", path.display(), e);
            None
        }
    }
}

/// Append one JSON line.
pub fn append_line<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let line = serde_json::to_string(value)?;
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(f, "{}", line)?;
    Ok(())
}

/// Append one JSON line, then keep only the last `max_lines` lines.
pub fn append_bounded<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    max_lines: usize,
) -> anyhow::Result<()> {
    append_line(path, value)?;
    truncate_to_last(path, max_lines.max(1))
}

/// Keep only the last `keep` lines of `path`.
fn truncate_to_last(path: &Path, keep: usize) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)?;
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= keep {
        return Ok(());
    }
    let new_content = lines[lines.len() - keep..].join("\n") + "\n";
    let tmp = path.with_extension("jsonl.tmp");
    std::fs::write(&tmp, new_content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read the last `limit` parseable lines.
pub fn read_tail<T: DeserializeOwned>(path: &Path, limit: usize) -> Vec<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(limit);

    lines[start..]
        .iter()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

/// Append-only attempt log shared by concurrent issue workers.
pub struct AttemptLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AttemptLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort: failures are logged, never propagated.
    pub fn append(&self, attempt: &Attempt) {
        let Ok(_guard) = self.lock.lock() else {
            return;
        };
        if let Err(e) = append_line(&self.path, attempt) {
            tracing::debug!("Failed to append attempt log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Candidate, Domain, IssueRecord, IssueState, Meta};
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        line: usize,
    }

    #[test]
    fn test_snapshot_roundtrip_and_no_temp_left() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("latest.json");
        write_snapshot(&path, &Row { line: 3 }).unwrap();
        write_snapshot(&path, &Row { line: 4 }).unwrap();

        let read: Option<Row> = read_snapshot(&path);
        assert_eq!(read, Some(Row { line: 4 }));
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_malformed_snapshot_reads_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let read: Option<Row> = read_snapshot(&path);
        assert!(read.is_none());
    }

    #[test]
    fn test_append_bounded_keeps_last_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("live.jsonl");
        for i in 0..25 {
            append_bounded(&path, &Row { line: i }, 10).unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 10);

        let rows: Vec<Row> = read_tail(&path, 100);
        assert_eq!(rows.first(), Some(&Row { line: 15 }));
        assert_eq!(rows.last(), Some(&Row { line: 24 }));
    }

    #[test]
    fn test_read_tail_missing_file() {
        let rows: Vec<Row> = read_tail(Path::new("/nonexistent/fusionloop.jsonl"), 5);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_attempt_log_appends() {
        let dir = TempDir::new().unwrap();
        let log = AttemptLog::new(dir.path().join("attempts.jsonl"));
        let d = Domain::default();
        let truth = IssueRecord {
            index: 0,
            label: "1".into(),
            draw: Candidate::new([1, 2, 3, 4, 5, 6], 1, &d).unwrap(),
        };
        let mut state = IssueState::new(0);
        for _ in 0..3 {
            let a = state.record("stride", truth.draw.clone(), &truth, Meta::new());
            log.append(&a);
        }
        let rows: Vec<Attempt> = read_tail(log.path(), 10);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].ordinal, 3);
    }
}
