//! Correction progress reporting.
//!
//! Reports observable progress while a file is being corrected so users see
//! how many low-confidence tokens were found and how far the batches got.
//! Progress is emitted on **stderr**; logs go through `tracing`.

use std::io::Write;
use std::str::FromStr;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// File parsed; `to_fix` items fall below the threshold.
    Parsed {
        file: String,
        lines: u64,
        to_fix: u64,
    },
    /// Batch `batch` of `batches` finished; `done` of `total` items handled.
    Batch {
        file: String,
        batch: u64,
        batches: u64,
        done: u64,
        total: u64,
        secs: f64,
    },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "boards.txt  batch 3/12  150 / 583 tokens  (4.2s)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Parsed {
                file,
                lines,
                to_fix,
            } => format!(
                "{}  parsed {} lines, {} low-confidence\n",
                file,
                format_number(*lines),
                format_number(*to_fix)
            ),
            ProgressEvent::Batch {
                file,
                batch,
                batches,
                done,
                total,
                secs,
            } => format!(
                "{}  batch {}/{}  {} / {} tokens  ({:.1}s)\n",
                file,
                batch,
                batches,
                format_number(*done),
                format_number(*total),
                secs
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Parsed {
                file,
                lines,
                to_fix,
            } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "parsed",
                "lines": lines,
                "to_fix": to_fix
            }),
            ProgressEvent::Batch {
                file,
                batch,
                batches,
                done,
                total,
                secs,
            } => serde_json::json!({
                "event": "progress",
                "file": file,
                "phase": "batch",
                "batch": batch,
                "batches": batches,
                "n": done,
                "total": total,
                "secs": secs
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
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

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "invalid progress mode '{}': expected off, human, or json",
                other
            )),
        }
    }
}
