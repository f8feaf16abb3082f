//! Sync progress reporting.
//!
//! Progress is emitted on **stderr** so stdout stays parseable for scripts.

use std::io::Write;

use crate::gaps::ItemRange;

/// Which walk an event belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WalkDirection {
    /// Below the lowest stored number, walking down to 1.
    Older,
    /// Above the highest stored number (or the full archive), towards latest.
    Newer,
    /// An interior hole, walked upward.
    Repair,
}

impl WalkDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalkDirection::Older => "older",
            WalkDirection::Newer => "newer",
            WalkDirection::Repair => "repair",
        }
    }
}

/// A single progress event for sync.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// The remote latest number is known.
    Latest { number: u32 },
    /// The latest lookup failed; the forward walk is skipped this run.
    LatestUnavailable,
    /// A walk is about to start.
    WalkStarted {
        direction: WalkDirection,
        range: ItemRange,
    },
    /// One step of a walk finished.
    Fetched {
        direction: WalkDirection,
        number: u32,
        found: bool,
        done: u32,
        total: u32,
    },
    /// A batch reached the store.
    BatchCommitted { count: usize },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync older  1,234 / 2,000  #766".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Latest { number } => format!("sync  latest is #{}\n", number),
            SyncProgressEvent::LatestUnavailable => {
                "sync  latest unavailable, skipping newer items\n".to_string()
            }
            SyncProgressEvent::WalkStarted { direction, range } => {
                format!("sync {}  walking {}\n", direction.as_str(), range)
            }
            SyncProgressEvent::Fetched {
                direction,
                number,
                found,
                done,
                total,
            } => format!(
                "sync {}  {} / {}  #{}{}\n",
                direction.as_str(),
                format_number(u64::from(*done)),
                format_number(u64::from(*total)),
                number,
                if *found { "" } else { " (absent)" }
            ),
            SyncProgressEvent::BatchCommitted { count } => {
                format!("sync  saved {} item(s)\n", format_number(*count as u64))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Latest { number } => serde_json::json!({
                "event": "latest",
                "number": number
            }),
            SyncProgressEvent::LatestUnavailable => serde_json::json!({
                "event": "latest_unavailable"
            }),
            SyncProgressEvent::WalkStarted { direction, range } => serde_json::json!({
                "event": "walk",
                "direction": direction.as_str(),
                "start": range.start,
                "end": range.end
            }),
            SyncProgressEvent::Fetched {
                direction,
                number,
                found,
                done,
                total,
            } => serde_json::json!({
                "event": "progress",
                "direction": direction.as_str(),
                "number": number,
                "found": found,
                "n": done,
                "total": total
            }),
            SyncProgressEvent::BatchCommitted { count } => serde_json::json!({
                "event": "committed",
                "count": count
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

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
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
    /// Parse `auto|off|human|json`; `auto` is human on a TTY, otherwise off.
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "auto" => Ok(Self::default_for_tty()),
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!(
                "Unknown progress mode: '{}'. Use auto, off, human, or json.",
                other
            ),
        }
    }

    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
