//! A conversation: ordered chat turns plus the settings used to answer them.
//!
//! History is append-only. [`Conversation::submit`] records the user turn
//! first and the assistant turn only once the answer is complete, so a
//! failed or interrupted answer leaves exactly one new turn behind.

use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{AssistantError, Result};
use crate::index::VectorIndex;
use crate::manager::IndexManager;
use crate::models::{ChatTurn, QueryParams, Source};
use crate::query::{validate_params, Answer, QueryService};
use crate::stats::IndexStats;

pub struct Conversation {
    service: QueryService,
    models: Vec<String>,
    params: QueryParams,
    history: Vec<ChatTurn>,
}

impl Conversation {
    /// Start an empty conversation with the configured default settings.
    pub fn new(service: QueryService, llm: &LlmConfig) -> Self {
        Self {
            service,
            models: llm.models.clone(),
            params: QueryParams::from_config(llm),
            history: Vec::new(),
        }
    }

    /// Ask `question`, passing each answer fragment to `on_fragment` as it
    /// arrives, and return the recorded assistant turn.
    ///
    /// A complete (non-streamed) answer is passed to `on_fragment` once.
    pub async fn submit<F>(&mut self, question: &str, mut on_fragment: F) -> Result<&ChatTurn>
    where
        F: FnMut(&str),
    {
        self.history.push(ChatTurn::user(question));

        let result = self.service.query(question, &self.params).await?;
        let text = match result.answer {
            Answer::Complete(text) => {
                on_fragment(&text);
                text
            }
            Answer::Streaming(mut fragments) => {
                let mut text = String::new();
                while let Some(fragment) = fragments.next().await {
                    let fragment = fragment.map_err(|e| {
                        warn!(received = text.len(), error = %e, "answer stream failed");
                        e
                    })?;
                    on_fragment(&fragment);
                    text.push_str(&fragment);
                }
                text
            }
        };
        debug!(chars = text.len(), sources = result.sources.len(), "answer complete");

        self.history.push(ChatTurn::assistant(text, result.sources));
        let turn = self
            .history
            .last()
            .ok_or_else(|| AssistantError::state("conversation history is empty"))?;
        Ok(turn)
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Sources of the most recent assistant turn.
    pub fn last_sources(&self) -> Option<&[Source]> {
        self.history
            .iter()
            .rev()
            .find_map(|turn| turn.sources.as_deref())
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Select one of the configured models.
    pub fn set_model(&mut self, model: &str) -> Result<()> {
        if !self.models.iter().any(|m| m == model) {
            return Err(AssistantError::configuration(format!(
                "unknown model '{}'; choose one of: {}",
                model,
                self.models.join(", ")
            )));
        }
        self.params.model = model.to_string();
        Ok(())
    }

    pub fn set_temperature(&mut self, temperature: f32) -> Result<()> {
        self.update(|p| p.temperature = temperature)
    }

    pub fn set_top_k(&mut self, top_k: usize) -> Result<()> {
        self.update(|p| p.top_k = top_k)
    }

    pub fn set_streaming(&mut self, streaming: bool) {
        self.params.streaming = streaming;
    }

    /// Load the persisted index, or build it if there is none.
    pub async fn load_index(&self) -> Result<Arc<VectorIndex>> {
        self.manager().load_or_create().await
    }

    pub async fn rebuild_index(&self) -> Result<Arc<VectorIndex>> {
        self.manager().rebuild().await
    }

    pub fn index_stats(&self) -> IndexStats {
        self.manager().stats()
    }

    fn manager(&self) -> &IndexManager {
        self.service.manager()
    }

    /// Apply `change` only if the result is still a valid parameter set.
    fn update(&mut self, change: impl FnOnce(&mut QueryParams)) -> Result<()> {
        let mut next = self.params.clone();
        change(&mut next);
        validate_params(&next)?;
        self.params = next;
        Ok(())
    }
}
