//! Append-only JSON-lines log of executed snippets.
//!
//! Each line is `{"seq", "timestamp", "session", "code", "result"}`. The
//! sequence number continues from the highest one already in the file, so
//! it stays monotonic across restarts.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use scopebox_lua::{ExecutionResult, ExecutionSink, SessionId};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Log file name inside the log directory.
pub const EXEC_LOG_FILE: &str = "executions.jsonl";

/// One log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub session: Option<SessionId>,
    pub code: String,
    pub result: ExecutionResult,
}

#[derive(Deserialize)]
struct SeqOnly {
    seq: u64,
}

struct LogState {
    file: File,
    last_seq: u64,
}

/// [`ExecutionSink`] writing to `<dir>/executions.jsonl`.
pub struct ExecutionLog {
    path: PathBuf,
    state: Mutex<LogState>,
}

impl ExecutionLog {
    /// Opens (creating if needed) the log in `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the directory or file cannot be created or read.
    pub fn open(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(EXEC_LOG_FILE);
        let last_seq = if path.exists() { scan_last_seq(&path)? } else { 0 };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), last_seq, "Opened execution log");
        Ok(Self {
            path,
            state: Mutex::new(LogState { file, last_seq }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sequence number of the most recent entry (0 when empty).
    pub fn last_seq(&self) -> u64 {
        self.state.lock().last_seq
    }

    fn append(&self, session: Option<SessionId>, code: &str, result: &ExecutionResult) -> io::Result<u64> {
        let mut state = self.state.lock();
        let entry = LogEntry {
            seq: state.last_seq + 1,
            timestamp: Utc::now(),
            session,
            code: code.to_string(),
            result: result.clone(),
        };
        let mut line = serde_json::to_string(&entry).map_err(io::Error::other)?;
        line.push('\n');
        state.file.write_all(line.as_bytes())?;
        state.file.flush()?;
        state.last_seq = entry.seq;
        Ok(entry.seq)
    }
}

impl ExecutionSink for ExecutionLog {
    fn record(&self, session: Option<SessionId>, code: &str, result: &ExecutionResult) {
        if let Err(e) = self.append(session, code, result) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to append execution log");
        }
    }
}

impl std::fmt::Debug for ExecutionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Highest `seq` in an existing log. Unparseable lines are skipped.
fn scan_last_seq(path: &Path) -> io::Result<u64> {
    let reader = BufReader::new(File::open(path)?);
    let mut last = 0;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SeqOnly>(&line) {
            Ok(entry) => last = last.max(entry.seq),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping malformed execution log line"),
        }
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopebox_lua::ErrorKind;
    use tempfile::TempDir;

    fn read_entries(path: &Path) -> Vec<LogEntry> {
        std::fs::read_to_string(path)
            .expect("read log")
            .lines()
            .map(|l| serde_json::from_str(l).expect("valid entry"))
            .collect()
    }

    #[test]
    fn appends_numbered_entries() {
        let temp = TempDir::new().expect("temp dir");
        let log = ExecutionLog::open(temp.path()).expect("open log");
        let session = SessionId::new();

        log.record(None, "1 + 1", &ExecutionResult::success("2\n".into(), Some("2".into())));
        log.record(
            Some(session),
            "boom()",
            &ExecutionResult::failure(ErrorKind::RuntimeError, "attempt to call a nil value", String::new()),
        );

        let entries = read_entries(log.path());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[0].session, None);
        assert_eq!(entries[0].result.last_value.as_deref(), Some("2"));
        assert_eq!(entries[1].seq, 2);
        assert_eq!(entries[1].session, Some(session));
        assert_eq!(entries[1].result.error_kind, Some(ErrorKind::RuntimeError));
    }

    #[test]
    fn sequence_continues_after_reopen() {
        let temp = TempDir::new().expect("temp dir");
        {
            let log = ExecutionLog::open(temp.path()).expect("open log");
            log.record(None, "a = 1", &ExecutionResult::success(String::new(), None));
            log.record(None, "a = 2", &ExecutionResult::success(String::new(), None));
        }

        let log = ExecutionLog::open(temp.path()).expect("reopen log");
        assert_eq!(log.last_seq(), 2);
        log.record(None, "a = 3", &ExecutionResult::success(String::new(), None));

        let seqs: Vec<u64> = read_entries(log.path()).iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn malformed_lines_do_not_reset_sequence() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join(EXEC_LOG_FILE);
        std::fs::write(&path, "{\"seq\": 41}\nnot json\n\n").expect("seed log");

        let log = ExecutionLog::open(temp.path()).expect("open log");
        assert_eq!(log.last_seq(), 41);
    }

    #[test]
    fn creates_missing_directory() {
        let temp = TempDir::new().expect("temp dir");
        let dir = temp.path().join("nested").join("logs");
        let log = ExecutionLog::open(&dir).expect("open log");
        assert!(log.path().starts_with(&dir));
        assert_eq!(log.last_seq(), 0);
    }
}
