//! Indexing progress reporting.
//!
//! A [`Session`](crate::session::Session) reports what it is doing while a
//! document is being indexed so `askdoc ask` can show how far embedding has
//! got. Progress is emitted on **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;
use std::sync::Arc;

/// A single progress event for one indexing run.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexProgressEvent {
    /// Text was normalized and split; embedding is about to start.
    Chunked { filename: String, chunks: u64 },
    /// `n` of `total` chunks have embeddings.
    Embedding {
        filename: String,
        n: u64,
        total: u64,
    },
    /// The index was swapped in and the document is queryable.
    Ready { filename: String, chunks: u64 },
    /// Indexing stopped; the session is in the failed state.
    Failed { filename: String, reason: String },
}

/// Reports indexing progress. Implementations write to stderr (human or JSON).
pub trait IndexProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress on stderr: "index report.pdf  embedding  64 / 120 chunks".
pub struct StderrProgress;

impl IndexProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Chunked { filename, chunks } => {
                format!("index {}  chunked  {} chunks\n", filename, format_number(*chunks))
            }
            IndexProgressEvent::Embedding { filename, n, total } => format!(
                "index {}  embedding  {} / {} chunks\n",
                filename,
                format_number(*n),
                format_number(*total)
            ),
            IndexProgressEvent::Ready { filename, chunks } => {
                format!("index {}  ready  {} chunks\n", filename, format_number(*chunks))
            }
            IndexProgressEvent::Failed { filename, reason } => {
                format!("index {}  failed  {}\n", filename, reason)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &IndexProgressEvent) -> serde_json::Value {
        match event {
            IndexProgressEvent::Chunked { filename, chunks } => serde_json::json!({
                "event": "progress",
                "file": filename,
                "phase": "chunked",
                "chunks": chunks
            }),
            IndexProgressEvent::Embedding { filename, n, total } => serde_json::json!({
                "event": "progress",
                "file": filename,
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            IndexProgressEvent::Ready { filename, chunks } => serde_json::json!({
                "event": "progress",
                "file": filename,
                "phase": "ready",
                "chunks": chunks
            }),
            IndexProgressEvent::Failed { filename, reason } => serde_json::json!({
                "event": "progress",
                "file": filename,
                "phase": "failed",
                "reason": reason
            }),
        }
    }
}

impl IndexProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IndexProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
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

    pub fn reporter(&self) -> Arc<dyn IndexProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
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
    fn json_event_shape() {
        let v = JsonProgress::to_json(&IndexProgressEvent::Embedding {
            filename: "a.pdf".to_string(),
            n: 3,
            total: 9,
        });
        assert_eq!(v["phase"], "embedding");
        assert_eq!(v["n"], 3);
        assert_eq!(v["total"], 9);
        assert_eq!(v["file"], "a.pdf");
    }
}
