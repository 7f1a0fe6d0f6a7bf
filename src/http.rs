//! Blocking JSON-over-HTTP calls to model providers.
//!
//! Both the embedding and generation providers talk to remote APIs with the
//! same retry policy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry; timeouts → fail immediately as [`RagError::Timeout`]
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{from_transport, RagError, Result, Stage};

/// Connection settings for one provider endpoint.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    /// Human-readable provider name used in error messages.
    pub provider: &'static str,
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub stage: Stage,
}

fn stage_error(stage: Stage, message: String) -> RagError {
    match stage {
        Stage::Generation => RagError::Generation { message },
        _ => RagError::Embedding { message },
    }
}

/// POST `body` to the endpoint and return the parsed JSON response.
pub(crate) fn post_json(endpoint: &Endpoint, body: &serde_json::Value) -> Result<serde_json::Value> {
    let client = reqwest::blocking::Client::builder()
        .timeout(endpoint.timeout)
        .build()
        .map_err(|e| RagError::configuration(format!("building HTTP client: {}", e)))?;

    let mut last_err = None;

    for attempt in 0..=endpoint.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(provider = endpoint.provider, attempt, ?delay, "retrying provider call");
            std::thread::sleep(delay);
        }

        let mut request = client
            .post(&endpoint.url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &endpoint.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send() {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .map_err(|e| from_transport(endpoint.stage, endpoint.provider, e));
                }

                let body_text = response.text().unwrap_or_default();
                let message = format!("{} API error {}: {}", endpoint.provider, status, body_text);

                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(provider = endpoint.provider, %status, attempt, "transient provider error");
                    last_err = Some(stage_error(endpoint.stage, message));
                    continue;
                }

                return Err(stage_error(endpoint.stage, message));
            }
            Err(e) if e.is_timeout() => {
                return Err(from_transport(endpoint.stage, endpoint.provider, e));
            }
            Err(e) => {
                warn!(provider = endpoint.provider, error = %e, attempt, "provider connection failed");
                last_err = Some(from_transport(endpoint.stage, endpoint.provider, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        stage_error(
            endpoint.stage,
            format!("{} call failed after retries", endpoint.provider),
        )
    }))
}

/// Join an API base URL and a path without doubling the slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Read a provider API key from the named environment variable.
///
/// A missing or blank key is a configuration error, raised before any
/// request is attempted.
pub(crate) fn api_key_from_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(RagError::configuration(format!(
            "{} environment variable not set",
            var
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_handles_slashes() {
        assert_eq!(
            join_url("https://api.openai.com/", "/v1/embeddings"),
            "https://api.openai.com/v1/embeddings"
        );
        assert_eq!(join_url("http://localhost:11434", "api/embed"), "http://localhost:11434/api/embed");
    }

    #[test]
    fn missing_key_is_configuration_error() {
        let err = api_key_from_env("TENANT_RAG_TEST_KEY_THAT_IS_NEVER_SET").unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }
}
