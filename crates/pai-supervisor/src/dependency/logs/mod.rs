//! Fan-in sink for supervised process output
//!
//! Every captured line goes to two consumers: a size-rotated file on disk,
//! so a crash still leaves a trail, and a bounded in-memory buffer that the
//! UI polls through [`LogSink::snapshot`] or [`LogSink::lines_since`].

pub mod rotating_file;

pub use rotating_file::{read_rotated_logs, RotatingLogFile};

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::warn;

/// File name of the persisted log inside the log directory
pub const DEFAULT_LOG_FILE_NAME: &str = "pai_log.txt";

/// Size cap of the active log file before it rolls over
pub const DEFAULT_MAX_LOG_BYTES: u64 = 5 * 1024 * 1024;

/// Number of rolled-over files kept next to the active one
pub const DEFAULT_LOG_BACKUPS: usize = 3;

/// Lines kept in memory for the UI
pub const DEFAULT_BUFFER_LINES: usize = 5000;

/// Service name used for the supervisor's own status lines
pub const SUPERVISOR_SOURCE: &str = "supervisor";

/// One captured line
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LogLine {
    /// Strictly increasing across the sink
    pub seq: u64,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl LogLine {
    /// On-disk representation, without the trailing newline
    pub fn to_file_line(&self) -> String {
        format_line(&self.timestamp, &self.service, &self.text)
    }
}

fn format_line(timestamp: &DateTime<Utc>, service: &str, text: &str) -> String {
    format!(
        "{} [{}] {}",
        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        service,
        text
    )
}

/// Persistence settings for a [`LogSink`]
#[derive(Debug, Clone)]
pub struct LogFileConfig {
    pub path: PathBuf,
    pub max_bytes: u64,
    pub backups: usize,
}

impl LogFileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_bytes: DEFAULT_MAX_LOG_BYTES,
            backups: DEFAULT_LOG_BACKUPS,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_backups(mut self, backups: usize) -> Self {
        self.backups = backups;
        self
    }
}

struct LogBuffer {
    lines: VecDeque<LogLine>,
    next_seq: u64,
    max_lines: usize,
}

impl LogBuffer {
    fn push(&mut self, service: &str, timestamp: DateTime<Utc>, text: String) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        if self.lines.len() == self.max_lines {
            self.lines.pop_front();
        }
        self.lines.push_back(LogLine {
            seq,
            service: service.to_string(),
            timestamp,
            text,
        });

        seq
    }
}

/// Shared sink for output of every supervised process
pub struct LogSink {
    buffer: Mutex<LogBuffer>,
    file: Option<Mutex<RotatingLogFile>>,
    persist_failed: AtomicBool,
}

impl LogSink {
    /// Memory-only sink
    pub fn in_memory(max_lines: usize) -> Self {
        Self {
            buffer: Mutex::new(LogBuffer {
                lines: VecDeque::with_capacity(max_lines.min(1024)),
                next_seq: 0,
                max_lines: max_lines.max(1),
            }),
            file: None,
            persist_failed: AtomicBool::new(false),
        }
    }

    /// Sink that also persists to a rotating file
    pub fn with_file(max_lines: usize, config: &LogFileConfig) -> anyhow::Result<Self> {
        let file = RotatingLogFile::open(&config.path, config.max_bytes, config.backups)?;
        Ok(Self {
            file: Some(Mutex::new(file)),
            ..Self::in_memory(max_lines)
        })
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.file
            .as_ref()
            .map(|file| lock(file).path().to_path_buf())
    }

    /// Persist then buffer one line; this is what reader loops call
    pub fn record(&self, service: &str, text: &str) {
        let timestamp = Utc::now();
        let text = text.trim_end_matches(['\r', '\n']);
        self.persist_at(&timestamp, service, text);
        self.append_at(service, timestamp, text.to_string());
    }

    /// Add a line to the in-memory buffer only, returning its sequence number
    pub fn append(&self, service: &str, text: &str) -> u64 {
        self.append_at(service, Utc::now(), text.to_string())
    }

    /// Write one whole line to the persisted log, synchronously
    pub fn persist(&self, service: &str, text: &str) {
        self.persist_at(&Utc::now(), service, text);
    }

    fn append_at(&self, service: &str, timestamp: DateTime<Utc>, text: String) -> u64 {
        lock(&self.buffer).push(service, timestamp, text)
    }

    fn persist_at(&self, timestamp: &DateTime<Utc>, service: &str, text: &str) {
        let Some(file) = &self.file else { return };

        let line = format_line(timestamp, service, text);
        let result = lock(file).write_line(&line);

        if let Err(e) = result {
            // Report once; the in-memory buffer keeps working
            if !self.persist_failed.swap(true, Ordering::Relaxed) {
                warn!(error = %e, "Failed to persist log line");
            }
        }
    }

    /// Point-in-time copy of the buffered lines, oldest first
    pub fn snapshot(&self) -> Vec<LogLine> {
        lock(&self.buffer).lines.iter().cloned().collect()
    }

    /// Lines with a sequence number greater than `after`, for incremental polling
    pub fn lines_since(&self, after: Option<u64>) -> Vec<LogLine> {
        let buffer = lock(&self.buffer);
        match after {
            None => buffer.lines.iter().cloned().collect(),
            Some(after) => buffer
                .lines
                .iter()
                .filter(|line| line.seq > after)
                .cloned()
                .collect(),
        }
    }

    /// Buffered lines rendered as one text block for a status surface
    pub fn text_snapshot(&self) -> String {
        self.snapshot()
            .iter()
            .map(|line| format!("[{}] {}", line.service, line.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        lock(&self.buffer).lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        if let Some(file) = &self.file {
            lock(file).flush()?;
        }
        Ok(())
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::in_memory(DEFAULT_BUFFER_LINES)
    }
}

/// A poisoned lock only means a writer panicked mid-push; the data is still usable
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
