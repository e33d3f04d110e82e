//! Index statistics and their terminal rendering.
//!
//! [`IndexStats`] is what `ra stats` prints (as text or `--json`) and what
//! `/stats` shows inside a chat session.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;
use std::path::PathBuf;

/// Snapshot of the index manager's state.
///
/// Count fields are `None` while no index is loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub loaded: bool,
    pub document_count: Option<usize>,
    pub chunk_count: Option<usize>,
    pub embedding_model: Option<String>,
    pub dims: Option<usize>,
    pub created_at: Option<DateTime<Utc>>,
    pub data_dir: PathBuf,
    pub persist_dir: PathBuf,
    /// Whether the persist directory exists on disk.
    pub persisted: bool,
    pub snapshot_bytes: Option<u64>,
}

impl IndexStats {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Research Assistant Index Stats");
        let _ = writeln!(out, "==============================");
        let _ = writeln!(out);
        let _ = writeln!(out, "  Papers:      {}", self.data_dir.display());
        let _ = writeln!(out, "  Storage:     {}", self.persist_dir.display());
        match (self.persisted, self.snapshot_bytes) {
            (true, Some(bytes)) => {
                let _ = writeln!(out, "  Snapshot:    {}", format_bytes(bytes));
            }
            _ => {
                let _ = writeln!(out, "  Snapshot:    none");
            }
        }
        let _ = writeln!(out);

        if !self.loaded {
            let _ = writeln!(out, "  Index:       not loaded");
            return out;
        }

        let _ = writeln!(
            out,
            "  Documents:   {}",
            self.document_count.unwrap_or_default()
        );
        let _ = writeln!(out, "  Chunks:      {}", self.chunk_count.unwrap_or_default());
        if let Some(model) = &self.embedding_model {
            let _ = writeln!(
                out,
                "  Embeddings:  {} ({} dims)",
                model,
                self.dims.unwrap_or_default()
            );
        }
        if let Some(created_at) = self.created_at {
            let _ = writeln!(out, "  Built:       {}", format_relative(created_at, Utc::now()));
        }
        out
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// "3 hours ago" for recent times, a date otherwise.
fn format_relative(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - then).num_seconds();
    let plural = |n: i64, unit: &str| format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" });

    match delta {
        d if d < 0 => then.format("%Y-%m-%d %H:%M").to_string(),
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => plural(d / 60, "min"),
        d if d < 86400 => plural(d / 3600, "hour"),
        d if d < 86400 * 30 => plural(d / 86400, "day"),
        _ => then.format("%Y-%m-%d %H:%M").to_string(),
    }
}
