//! Event logging for ferry publication runs.
//!
//! Events are buffered in memory and flushed to an append-only JSONL file,
//! one JSON object per line. Re-running ferry for the same tag appends to
//! the same file, so the log is a full history of every attempt.
//!
//! # Example
//!
//! ```
//! use ferry_events::EventLog;
//! use ferry_types::EventType;
//!
//! let mut log = EventLog::new();
//! log.record_now(EventType::RunStarted { target_count: 2 }, "all");
//! assert_eq!(log.len(), 1);
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use ferry_types::{EventType, PublishEvent};

/// Default events file name
pub const EVENTS_FILE: &str = "events.jsonl";

/// Target label used for run-level events.
pub const RUN_SCOPE: &str = "all";

/// Get the events file path for a state directory
pub fn events_path(state_dir: &Path) -> PathBuf {
    state_dir.join(EVENTS_FILE)
}

/// Append-only event log for publication runs.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<PublishEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, event: PublishEvent) {
        self.events.push(event);
    }

    /// Record an event stamped with the current time.
    pub fn record_now(&mut self, event_type: EventType, target: &str) {
        self.record(PublishEvent {
            timestamp: Utc::now(),
            event_type,
            target: target.to_string(),
        });
    }

    /// Append all buffered events to `path` in JSONL format.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;

        let mut writer = BufWriter::new(file);
        for event in &self.events {
            let line = serde_json::to_string(event).context("failed to serialize event to JSON")?;
            writeln!(writer, "{line}").context("failed to write event line")?;
        }
        writer.flush().context("failed to flush events file")?;

        Ok(())
    }

    /// Append buffered events to `path` and clear the buffer.
    pub fn flush_to(&mut self, path: &Path) -> Result<()> {
        self.write_to_file(path)?;
        self.events.clear();
        Ok(())
    }

    /// Read all events from a JSONL file. A missing file is an empty log.
    pub fn read_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let file = File::open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| {
                format!("failed to read line from events file {}", path.display())
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let event: PublishEvent = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse event JSON from line: {line}"))?;
            events.push(event);
        }

        Ok(Self { events })
    }

    pub fn events_for_target(&self, target: &str) -> Vec<&PublishEvent> {
        self.events.iter().filter(|e| e.target == target).collect()
    }

    pub fn all_events(&self) -> &[PublishEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
