//! Core data models.
//!
//! These types flow from the corpus loader through index construction to
//! the query service and the conversation history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata keys attached to documents and inherited by their chunks.
pub const META_FILE_NAME: &str = "file_name";
pub const META_FILE_PATH: &str = "file_path";
pub const META_PAGE_LABEL: &str = "page_label";
pub const META_CONTENT_TYPE: &str = "content_type";

/// A unit of loaded text: a whole file, or one page of a PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    pub fn file_name(&self) -> Option<&str> {
        self.metadata.get(META_FILE_NAME).map(String::as_str)
    }

    pub fn page_label(&self) -> Option<&str> {
        self.metadata.get(META_PAGE_LABEL).map(String::as_str)
    }
}

/// A chunk of a document's text, embedded for retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
    pub metadata: BTreeMap<String, String>,
}

/// A retrieved chunk cited as context for an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Cosine similarity between the question and the chunk.
    pub score: f32,
    pub text: String,
    pub metadata: Option<BTreeMap<String, String>>,
}

impl Source {
    /// A short label such as `paper.pdf p. 3`.
    pub fn label(&self) -> String {
        let meta = match &self.metadata {
            Some(m) => m,
            None => return "unknown source".to_string(),
        };
        let name = meta
            .get(META_FILE_NAME)
            .map(String::as_str)
            .unwrap_or("unknown source");
        match meta.get(META_PAGE_LABEL) {
            Some(page) => format!("{} p. {}", name, page),
            None => name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    /// Only assistant turns carry sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: None,
        }
    }

    pub fn assistant(content: impl Into<String>, sources: Vec<Source>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources: Some(sources),
        }
    }
}

/// Per-query generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    pub model: String,
    pub temperature: f32,
    pub top_k: usize,
    pub streaming: bool,
}

impl QueryParams {
    pub fn from_config(llm: &crate::config::LlmConfig) -> Self {
        Self {
            model: llm.default_model.clone(),
            temperature: llm.temperature,
            top_k: llm.top_k,
            streaming: llm.streaming,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_label_with_page() {
        let mut meta = BTreeMap::new();
        meta.insert(META_FILE_NAME.to_string(), "stroop.pdf".to_string());
        meta.insert(META_PAGE_LABEL.to_string(), "4".to_string());
        let src = Source {
            score: 0.9,
            text: "x".into(),
            metadata: Some(meta),
        };
        assert_eq!(src.label(), "stroop.pdf p. 4");
    }

    #[test]
    fn source_label_without_metadata() {
        let src = Source {
            score: 0.1,
            text: "x".into(),
            metadata: None,
        };
        assert_eq!(src.label(), "unknown source");
    }

    #[test]
    fn user_turn_has_no_sources() {
        let t = ChatTurn::user("hi");
        assert_eq!(t.role, Role::User);
        assert!(t.sources.is_none());
        let json = serde_json::to_string(&t).unwrap();
        assert!(!json.contains("sources"));
    }
}
