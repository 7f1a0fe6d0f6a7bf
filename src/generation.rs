//! Answer generation from retrieved context.
//!
//! A [`Generator`] is a chat-completion model. [`generate`] builds the
//! prompt (retrieved records first, then the question) and hands it to
//! the model. Two remote implementations are provided:
//! - **[`OpenAIChat`]**: `POST {url}/v1/chat/completions`
//! - **[`OllamaChat`]**: `POST {url}/api/chat` with streaming disabled
//!
//! Both share the embedding providers' retry and timeout policy; see
//! [`crate::http`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::GenerationConfig;
use crate::error::{RagError, Result, Stage};
use crate::http::{api_key_from_env, join_url, post_json, Endpoint};
use crate::models::ScoredRecord;

const SYSTEM_TEMPLATE: &str = "Use the following pieces of context to answer the user's question. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

const CONTEXT_SEPARATOR: &str = "----------------";

/// Chat role, serialized the way both chat APIs expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// A chat-completion language model.
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    /// Complete a conversation, returning the assistant's reply.
    fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Build the chat messages for `query` over `context`.
///
/// The system message carries the instructions followed by the context
/// records, best match first; the query follows as the user message.
pub fn build_messages(query: &str, context: &[ScoredRecord]) -> Vec<ChatMessage> {
    let joined = context
        .iter()
        .map(|c| c.record.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    vec![
        ChatMessage {
            role: Role::System,
            content: format!("{}\n{}\n{}", SYSTEM_TEMPLATE, CONTEXT_SEPARATOR, joined),
        },
        ChatMessage {
            role: Role::User,
            content: query.to_string(),
        },
    ]
}

/// Rewrite a query so the model answers with one reference URL.
pub fn reference_link_query(query: &str) -> String {
    format!(
        "Find the reference link that best matches the following request: {}\n\
         Return only the single URL, with no other text. \
         If the context does not contain a matching URL, reply with NONE.",
        query.trim()
    )
}

/// Generate an answer to `query` conditioned on `context`.
pub fn generate(generator: &dyn Generator, query: &str, context: &[ScoredRecord]) -> Result<String> {
    let messages = build_messages(query, context);
    let answer = generator.complete(&messages)?;
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(RagError::generation(format!(
            "{} returned an empty completion",
            generator.model_name()
        )));
    }
    Ok(answer.to_string())
}

// ============ OpenAI ============

pub struct OpenAIChat {
    model: String,
    temperature: f64,
    max_tokens: Option<u32>,
    endpoint: Endpoint,
}

impl OpenAIChat {
    /// Reads the API key from the environment variable named by
    /// `generation.api_key_env`.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let key = api_key_from_env(&config.api_key_env)?;
        Ok(Self::with_api_key(config, key))
    }

    pub fn with_api_key(config: &GenerationConfig, api_key: impl Into<String>) -> Self {
        let base = config.url.as_deref().unwrap_or("https://api.openai.com");
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            endpoint: Endpoint {
                provider: "OpenAI",
                url: join_url(base, "/v1/chat/completions"),
                api_key: Some(api_key.into()),
                timeout: Duration::from_secs(config.timeout_secs),
                max_retries: config.max_retries,
                stage: Stage::Generation,
            },
        }
    }
}

impl Generator for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        let json = post_json(&self.endpoint, &body)?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| RagError::generation("Invalid OpenAI response: missing message content"))
    }
}

// ============ Ollama ============

pub struct OllamaChat {
    model: String,
    temperature: f64,
    max_tokens: Option<u32>,
    endpoint: Endpoint,
}

impl OllamaChat {
    pub fn new(config: &GenerationConfig) -> Self {
        let base = config.url.as_deref().unwrap_or("http://localhost:11434");
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            endpoint: Endpoint {
                provider: "Ollama",
                url: join_url(base, "/api/chat"),
                api_key: None,
                timeout: Duration::from_secs(config.timeout_secs),
                max_retries: config.max_retries,
                stage: Stage::Generation,
            },
        }
    }
}

impl Generator for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let mut options = serde_json::json!({ "temperature": self.temperature });
        if let Some(max_tokens) = self.max_tokens {
            options["num_predict"] = serde_json::json!(max_tokens);
        }
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": options,
        });
        let json = post_json(&self.endpoint, &body)?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| RagError::generation("Invalid Ollama response: missing message content"))
    }
}

/// Create the configured [`Generator`].
///
/// # Errors
///
/// [`RagError::Configuration`] for an unknown provider or a missing API key.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config))),
        other => Err(RagError::configuration(format!(
            "Unknown generation provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentRecord, RecordOrigin};
    use std::sync::Mutex;

    struct Recorder {
        reply: String,
        seen: Mutex<Vec<ChatMessage>>,
    }

    impl Generator for Recorder {
        fn model_name(&self) -> &str {
            "recorder"
        }
        fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            self.seen.lock().unwrap().extend_from_slice(messages);
            Ok(self.reply.clone())
        }
    }

    fn scored(text: &str, score: f32) -> ScoredRecord {
        ScoredRecord {
            record: DocumentRecord::new(
                text,
                RecordOrigin {
                    source: "p.csv".into(),
                    sheet: None,
                    row: 2,
                },
            ),
            score,
        }
    }

    #[test]
    fn context_precedes_query() {
        let messages = build_messages("what is the price?", &[scored("price: 4", 0.9)]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("price: 4"));
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "what is the price?");
    }

    #[test]
    fn context_keeps_retrieval_order() {
        let messages = build_messages("q", &[scored("first", 0.9), scored("second", 0.5)]);
        let content = &messages[0].content;
        let first = content.find("first").unwrap();
        let second = content.find("second").unwrap();
        assert!(first < second);
    }

    #[test]
    fn reference_template_asks_for_single_url() {
        let q = reference_link_query("  tent pegs ");
        assert!(q.contains("tent pegs"));
        assert!(q.contains("single URL"));
        assert!(q.contains("no other text"));
    }

    #[test]
    fn generate_trims_and_rejects_empty() {
        let g = Recorder {
            reply: "  forty two \n".into(),
            seen: Mutex::new(Vec::new()),
        };
        assert_eq!(generate(&g, "q", &[]).unwrap(), "forty two");

        let empty = Recorder {
            reply: "   ".into(),
            seen: Mutex::new(Vec::new()),
        };
        assert_eq!(generate(&empty, "q", &[]).unwrap_err().kind(), "generation_error");
    }

    #[test]
    fn messages_serialize_for_chat_apis() {
        let json = serde_json::to_value(&build_messages("q", &[])).unwrap();
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[1]["role"], "user");
    }

    #[test]
    fn missing_key_is_configuration_error() {
        let config = GenerationConfig {
            api_key_env: "TENANT_RAG_CHAT_KEY_UNSET".into(),
            ..GenerationConfig::default()
        };
        let err = create_generator(&config).err().unwrap();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[test]
    fn ollama_needs_no_key() {
        let config = GenerationConfig {
            provider: "ollama".into(),
            ..GenerationConfig::default()
        };
        assert!(create_generator(&config).is_ok());
    }
}
