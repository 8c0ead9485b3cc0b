//! Ingest progress reporting.
//!
//! Reports observable progress during `passdb ingest` so operators see which
//! entry is being read and how many unique credentials have landed so far.
//! Progress is emitted on **stderr** so the stdout summary stays clean.

use std::io::Write;

use crate::models::IngestCounts;

/// A single progress event for ingest.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Started reading lines from an archive entry.
    EntryStarted { entry: String },
    /// Another `progress_every` unique records were added.
    Added { entry: String, added: u64 },
    /// An entry was not ingested (undecodable, or already done on `--resume`).
    EntrySkipped { entry: String, reason: String },
    /// Every line of an entry has been accounted for.
    EntryFinished { entry: String, counts: IngestCounts },
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the ingestion driver.
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "ingest dump.txt  1,000 unique entries added".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::EntryStarted { entry } => format!("ingest {}  reading...\n", entry),
            ProgressEvent::Added { entry, added } => format!(
                "ingest {}  {} unique entries added\n",
                entry,
                format_number(*added)
            ),
            ProgressEvent::EntrySkipped { entry, reason } => {
                format!("ingest {}  skipped: {}\n", entry, reason)
            }
            ProgressEvent::EntryFinished { entry, counts } => format!(
                "ingest {}  done  {} added, {} duplicate, {} malformed\n",
                entry,
                format_number(counts.added),
                format_number(counts.duplicate),
                format_number(counts.malformed)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::EntryStarted { entry } => serde_json::json!({
                "event": "progress",
                "entry": entry,
                "phase": "reading"
            }),
            ProgressEvent::Added { entry, added } => serde_json::json!({
                "event": "progress",
                "entry": entry,
                "phase": "adding",
                "added": added
            }),
            ProgressEvent::EntrySkipped { entry, reason } => serde_json::json!({
                "event": "progress",
                "entry": entry,
                "phase": "skipped",
                "reason": reason
            }),
            ProgressEvent::EntryFinished { entry, counts } => serde_json::json!({
                "event": "progress",
                "entry": entry,
                "phase": "done",
                "counts": counts
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode. Caller passes it to the ingestor.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}': expected human, json, or off",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn progress_mode_parses() {
        assert_eq!("json".parse::<ProgressMode>().unwrap(), ProgressMode::Json);
        assert!("loud".parse::<ProgressMode>().is_err());
    }
}
