//! Retrieval-augmented question answering.
//!
//! For each question the [`QueryService`]:
//! 1. embeds the question,
//! 2. retrieves the `top_k` most similar chunks from the current index,
//! 3. places them in a question-answering prompt,
//! 4. asks the [`Generator`] for an answer, streamed or complete.
//!
//! The retrieved chunks come back as [`Source`]s alongside the answer so
//! callers can cite them.

use anyhow::anyhow;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::config::MAX_TOP_K;
use crate::error::{AssistantError, Result};
use crate::llm::{FragmentStream, GenerationRequest, Generator};
use crate::manager::IndexManager;
use crate::models::{QueryParams, Source, META_FILE_NAME, META_PAGE_LABEL};

const CONTEXT_SEPARATOR: &str = "---------------------";

/// The answer to a query, in the shape the generator produced it.
pub enum Answer {
    Complete(String),
    /// Fragments in order; their concatenation is the full answer.
    Streaming(FragmentStream),
}

impl fmt::Debug for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Complete(text) => f.debug_tuple("Complete").field(text).finish(),
            Answer::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

#[derive(Debug)]
pub struct QueryResult {
    pub answer: Answer,
    /// Best match first; never longer than the requested `top_k`.
    pub sources: Vec<Source>,
}

pub struct QueryService {
    manager: Arc<IndexManager>,
    generator: Arc<dyn Generator>,
}

impl QueryService {
    pub fn new(manager: Arc<IndexManager>, generator: Arc<dyn Generator>) -> Self {
        Self { manager, generator }
    }

    pub fn manager(&self) -> &Arc<IndexManager> {
        &self.manager
    }

    pub async fn query(&self, question: &str, params: &QueryParams) -> Result<QueryResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AssistantError::configuration("question is empty"));
        }
        validate_params(params)?;
        let index = self.manager.current()?;

        let query_vector = self.manager.embedder().embed_query(question).await?;
        if query_vector.len() != index.dims() {
            return Err(AssistantError::persistence(anyhow!(
                "index was built with {}-dimensional embeddings ({}) but '{}' returns {}; \
                 rebuild the index (/rebuild or `ra rebuild`)",
                index.dims(),
                index.embedding_model(),
                self.manager.embedder().model_name(),
                query_vector.len()
            )));
        }
        let sources = index.search(&query_vector, params.top_k);
        debug!(
            top_k = params.top_k,
            retrieved = sources.len(),
            best = sources.first().map(|s| s.score),
            "retrieved context"
        );

        let request = GenerationRequest {
            model: params.model.clone(),
            temperature: params.temperature,
            prompt: build_prompt(question, &sources),
        };

        let answer = if params.streaming && self.generator.supports_streaming() {
            Answer::Streaming(self.generator.stream(&request).await?)
        } else {
            Answer::Complete(self.generator.complete(&request).await?)
        };

        Ok(QueryResult { answer, sources })
    }
}

/// Check per-query parameters. The model name is not checked here; any
/// non-empty identifier is forwarded to the generator.
pub fn validate_params(params: &QueryParams) -> Result<()> {
    if params.model.trim().is_empty() {
        return Err(AssistantError::configuration("model must not be empty"));
    }
    if !(0.0..=1.0).contains(&params.temperature) {
        return Err(AssistantError::configuration(format!(
            "temperature must be between 0.0 and 1.0, got {}",
            params.temperature
        )));
    }
    if !(1..=MAX_TOP_K).contains(&params.top_k) {
        return Err(AssistantError::configuration(format!(
            "top_k must be between 1 and {}, got {}",
            MAX_TOP_K, params.top_k
        )));
    }
    Ok(())
}

/// The question-answering prompt: retrieved context between separator lines,
/// each chunk headed by where it came from, then the question.
pub fn build_prompt(question: &str, sources: &[Source]) -> String {
    let context = sources
        .iter()
        .map(|source| {
            let mut header = String::new();
            if let Some(meta) = &source.metadata {
                if let Some(name) = meta.get(META_FILE_NAME) {
                    header.push_str(&format!("file_name: {}\n", name));
                }
                if let Some(page) = meta.get(META_PAGE_LABEL) {
                    header.push_str(&format!("page_label: {}\n", page));
                }
            }
            if header.is_empty() {
                source.text.clone()
            } else {
                format!("{}\n{}", header, source.text)
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Context information is below.\n\
         {sep}\n\
         {context}\n\
         {sep}\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {question}\n\
         Answer: ",
        sep = CONTEXT_SEPARATOR,
        context = context,
        question = question,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn params() -> QueryParams {
        QueryParams {
            model: "gpt-4".to_string(),
            temperature: 0.1,
            top_k: 3,
            streaming: false,
        }
    }

    #[test]
    fn accepts_boundary_parameters() {
        let mut p = params();
        p.temperature = 0.0;
        p.top_k = 1;
        assert!(validate_params(&p).is_ok());
        p.temperature = 1.0;
        p.top_k = MAX_TOP_K;
        assert!(validate_params(&p).is_ok());
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        let mut p = params();
        p.temperature = 1.01;
        assert!(matches!(
            validate_params(&p),
            Err(AssistantError::Configuration(_))
        ));

        let mut p = params();
        p.top_k = 0;
        assert!(validate_params(&p).is_err());
        p.top_k = MAX_TOP_K + 1;
        assert!(validate_params(&p).is_err());

        let mut p = params();
        p.model = " ".to_string();
        assert!(validate_params(&p).is_err());
    }

    #[test]
    fn prompt_contains_context_and_question() {
        let mut meta = BTreeMap::new();
        meta.insert(META_FILE_NAME.to_string(), "stroop.pdf".to_string());
        meta.insert(META_PAGE_LABEL.to_string(), "3".to_string());
        let sources = vec![
            Source {
                score: 0.9,
                text: "Naming the ink color is slower when the word conflicts.".to_string(),
                metadata: Some(meta),
            },
            Source {
                score: 0.5,
                text: "Plain chunk.".to_string(),
                metadata: None,
            },
        ];
        let prompt = build_prompt("What is the Stroop effect?", &sources);

        assert!(prompt.starts_with("Context information is below.\n---------------------\n"));
        assert!(prompt.contains("file_name: stroop.pdf\npage_label: 3\n\nNaming the ink"));
        assert!(prompt.contains("slower when the word conflicts.\n\nPlain chunk.\n---------------------\n"));
        assert!(prompt.contains("not prior knowledge"));
        assert!(prompt.ends_with("Query: What is the Stroop effect?\nAnswer: "));
    }

    #[test]
    fn answer_debug_hides_stream() {
        let answer = Answer::Streaming(Box::pin(futures::stream::empty::<Result<String>>()));
        assert_eq!(format!("{:?}", answer), "Streaming(..)");
        assert_eq!(
            format!("{:?}", Answer::Complete("x".to_string())),
            "Complete(\"x\")"
        );
    }
}
