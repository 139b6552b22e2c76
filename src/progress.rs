//! Ingest progress reporting.
//!
//! Reports observable progress during `seedctl ingest` so users see which
//! file is being processed and how many remain. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// What happened to one input file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FileOutcome {
    /// Records were read and written (or would have been, in dry-run).
    Processed { records: u64 },
    /// Same content was already ingested for this batch.
    Skipped,
    /// File could not be read or parsed; the run continues.
    Malformed,
}

impl FileOutcome {
    fn label(&self) -> &'static str {
        match self {
            FileOutcome::Processed { .. } => "processed",
            FileOutcome::Skipped => "skipped",
            FileOutcome::Malformed => "malformed",
        }
    }
}

/// A single progress event for ingest.
#[derive(Clone, Debug)]
pub enum IngestProgressEvent {
    /// Run started with `total` candidate files.
    Started { batch: String, total: u64 },
    /// File `n` of `total` finished.
    File {
        batch: String,
        n: u64,
        total: u64,
        path: String,
        outcome: FileOutcome,
    },
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the ingest engine.
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest b1  3 / 1,200 files  a.json  processed (42 records)".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Started { batch, total } => {
                format!("ingest {}  {} files\n", batch, format_number(*total))
            }
            IngestProgressEvent::File {
                batch,
                n,
                total,
                path,
                outcome,
            } => {
                let detail = match outcome {
                    FileOutcome::Processed { records } => {
                        format!("processed ({} records)", format_number(*records))
                    }
                    other => other.label().to_string(),
                };
                format!(
                    "ingest {}  {} / {} files  {}  {}\n",
                    batch,
                    format_number(*n),
                    format_number(*total),
                    path,
                    detail
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = event_json(&event);
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

fn event_json(event: &IngestProgressEvent) -> serde_json::Value {
    match event {
        IngestProgressEvent::Started { batch, total } => serde_json::json!({
            "event": "started",
            "batch": batch,
            "total": total
        }),
        IngestProgressEvent::File {
            batch,
            n,
            total,
            path,
            outcome,
        } => {
            let mut obj = serde_json::json!({
                "event": "file",
                "batch": batch,
                "n": n,
                "total": total,
                "path": path,
                "outcome": outcome.label()
            });
            if let FileOutcome::Processed { records } = outcome {
                obj["records"] = serde_json::json!(records);
            }
            obj
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
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
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
