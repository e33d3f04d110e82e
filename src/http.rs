//! Shared HTTP retry loop for the embedding and LLM backends.
//!
//! - HTTP 429 and 5xx are retried
//! - other 4xx fail immediately
//! - network errors are retried
//! - backoff is 1s, 2s, 4s, ... capped at 32s

use anyhow::{anyhow, bail, Result};
use std::time::Duration;
use tracing::warn;

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(5))
}

/// Send the request built by `build` until it succeeds or retries run out.
///
/// `build` is called once per attempt because a `RequestBuilder` is consumed
/// by `send`.
pub(crate) async fn send_with_retry<F>(
    service: &str,
    max_retries: u32,
    mut build: F,
) -> Result<reqwest::Response>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff(attempt);
            warn!(
                service,
                attempt,
                delay_secs = delay.as_secs(),
                "retrying after transient error"
            );
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("{} error {}: {}", service, status, body_text));
                    continue;
                }
                bail!("{} error {}: {}", service, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} connection error: {}", service, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} request failed after retries", service)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(4), Duration::from_secs(8));
        assert_eq!(backoff(6), Duration::from_secs(32));
        assert_eq!(backoff(9), Duration::from_secs(32));
    }
}
