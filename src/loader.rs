//! Corpus loader: turns the configured document directory into [`Document`]s.
//!
//! Walks the directory, applies include/exclude globs, and extracts text:
//! PDFs yield one document per page, DOCX and plain-text files one document
//! each. Files that are too large, fail to extract, or contain no text are
//! skipped with a warning instead of aborting the load.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::LoaderConfig;
use crate::error::AssistantError;
use crate::extract;
use crate::models::{
    Document, META_CONTENT_TYPE, META_FILE_NAME, META_FILE_PATH, META_PAGE_LABEL,
};

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/target/**",
    "**/node_modules/**",
    "**/.*",
];

/// Fail with a configuration error unless `data_dir` exists and has entries.
pub fn ensure_corpus_dir(data_dir: &Path) -> std::result::Result<(), AssistantError> {
    if !data_dir.is_dir() {
        return Err(AssistantError::configuration(format!(
            "data directory '{}' not found",
            data_dir.display()
        )));
    }
    let mut entries = std::fs::read_dir(data_dir).map_err(|e| {
        AssistantError::configuration(format!(
            "cannot read data directory '{}': {}",
            data_dir.display(),
            e
        ))
    })?;
    if entries.next().is_none() {
        return Err(AssistantError::configuration(format!(
            "no files found in '{}'",
            data_dir.display()
        )));
    }
    Ok(())
}

/// Load every matching document under `root`, in path order.
pub fn load_documents(root: &Path, config: &LoaderConfig) -> Result<Vec<Document>> {
    let include_set = build_globset(config.include_globs.iter().map(String::as_str))?;
    let exclude_set = build_globset(
        DEFAULT_EXCLUDES
            .iter()
            .copied()
            .chain(config.exclude_globs.iter().map(String::as_str)),
    )?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry.with_context(|| format!("walking {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let rel = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        if exclude_set.is_match(&rel) || !include_set.is_match(&rel) {
            debug!(file = %rel, "skipping file not matched by loader globs");
            continue;
        }
        files.push((path.to_path_buf(), rel));
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));

    let mut documents = Vec::new();
    for (path, rel) in files {
        match load_file(&path, &rel, config.max_file_bytes) {
            Ok(docs) if docs.is_empty() => warn!(file = %rel, "no text extracted, skipping"),
            Ok(docs) => {
                debug!(file = %rel, documents = docs.len(), "loaded");
                documents.extend(docs);
            }
            Err(e) => warn!(file = %rel, error = %format!("{:#}", e), "skipping unreadable file"),
        }
    }
    Ok(documents)
}

fn load_file(path: &Path, rel: &str, max_bytes: u64) -> Result<Vec<Document>> {
    let size = std::fs::metadata(path)?.len();
    if size > max_bytes {
        anyhow::bail!("file is {} bytes, limit is {}", size, max_bytes);
    }

    let content_type = extract::content_type_for_path(path);
    let pages = if extract::is_binary(content_type) {
        let bytes = std::fs::read(path)?;
        extract::extract_pages(&bytes, content_type)?
    } else {
        vec![std::fs::read_to_string(path)?]
    };
    let paged = content_type == extract::MIME_PDF;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| rel.to_string());

    let docs = pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| {
            let page = paged.then(|| (i + 1).to_string());
            let mut metadata = BTreeMap::new();
            metadata.insert(META_FILE_NAME.to_string(), file_name.clone());
            metadata.insert(META_FILE_PATH.to_string(), rel.to_string());
            metadata.insert(META_CONTENT_TYPE.to_string(), content_type.to_string());
            if let Some(ref p) = page {
                metadata.insert(META_PAGE_LABEL.to_string(), p.clone());
            }
            Document {
                id: document_id(rel, page.as_deref()),
                text: normalize_whitespace(&text),
                metadata,
            }
        })
        .collect();
    Ok(docs)
}

fn document_id(rel: &str, page: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rel.as_bytes());
    if let Some(p) = page {
        hasher.update(b"#");
        hasher.update(p.as_bytes());
    }
    format!("{:x}", hasher.finalize())[..32].to_string()
}

/// Collapse the runs of blank lines PDF extraction produces into paragraph
/// breaks, and strip trailing spaces.
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(line);
        blank_run = 0;
    }
    out
}

fn build_globset<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}
