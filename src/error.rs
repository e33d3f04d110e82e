//! Error taxonomy surfaced at the interaction boundary.

use thiserror::Error;

/// Errors returned by the index manager, query service, and conversation.
///
/// Every variant is recoverable from the user's point of view: the session
/// renders the message and the same action can be retried.
#[derive(Debug, Error)]
pub enum AssistantError {
    /// Missing or empty document directory, or an invalid parameter.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation needed a loaded index and none is loaded.
    #[error("index not loaded: {0}")]
    State(String),

    /// The embedding or completion service failed.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// The persisted index is corrupt, unreadable, or could not be written.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl AssistantError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Wrap an error chain from an HTTP client, keeping every cause.
    pub fn external(err: impl Into<anyhow::Error>) -> Self {
        Self::ExternalService(format!("{:#}", err.into()))
    }

    pub fn persistence(err: impl Into<anyhow::Error>) -> Self {
        Self::Persistence(format!("{:#}", err.into()))
    }
}

pub type Result<T> = std::result::Result<T, AssistantError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn external_keeps_context_chain() {
        let inner: anyhow::Result<()> = Err(anyhow::anyhow!("connection refused"));
        let err = inner.context("embedding request").unwrap_err();
        let msg = AssistantError::external(err).to_string();
        assert!(msg.contains("embedding request"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn display_names_the_category() {
        let err = AssistantError::state("call load_or_create first");
        assert_eq!(
            err.to_string(),
            "index not loaded: call load_or_create first"
        );
    }
}
