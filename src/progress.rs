//! Index build progress.
//!
//! Building an index over a few hundred papers means thousands of embedding
//! calls, so the build reports where it is. Progress goes to **stderr** so
//! stdout stays clean for answers and `stats --json`.

use std::io::Write;

/// A single progress event emitted while an index is built.
#[derive(Clone, Debug, PartialEq)]
pub enum BuildProgressEvent {
    /// Walking the data directory. Total unknown.
    Loading { data_dir: String },
    /// Documents are loaded and chunked.
    Chunked { documents: u64, chunks: u64 },
    /// `n` of `total` chunks embedded.
    Embedding { n: u64, total: u64 },
    /// Writing the snapshot to the persistence directory.
    Persisting { path: String },
}

pub trait BuildProgressReporter: Send + Sync {
    fn report(&self, event: BuildProgressEvent);
}

/// Human-friendly progress: "index  embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl BuildProgressReporter for StderrProgress {
    fn report(&self, event: BuildProgressEvent) {
        let line = match &event {
            BuildProgressEvent::Loading { data_dir } => {
                format!("index  loading documents from {}...\n", data_dir)
            }
            BuildProgressEvent::Chunked { documents, chunks } => format!(
                "index  {} documents, {} chunks\n",
                format_number(*documents),
                format_number(*chunks)
            ),
            BuildProgressEvent::Embedding { n, total } => format!(
                "index  embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            BuildProgressEvent::Persisting { path } => {
                format!("index  persisting to {}\n", path)
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl BuildProgressReporter for JsonProgress {
    fn report(&self, event: BuildProgressEvent) {
        let obj = match &event {
            BuildProgressEvent::Loading { data_dir } => serde_json::json!({
                "event": "progress",
                "phase": "loading",
                "data_dir": data_dir
            }),
            BuildProgressEvent::Chunked { documents, chunks } => serde_json::json!({
                "event": "progress",
                "phase": "chunked",
                "documents": documents,
                "chunks": chunks
            }),
            BuildProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            BuildProgressEvent::Persisting { path } => serde_json::json!({
                "event": "progress",
                "phase": "persisting",
                "path": path
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl BuildProgressReporter for NoProgress {
    fn report(&self, _event: BuildProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn BuildProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
