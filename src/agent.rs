//! LLM agent module for article summarisation.
//!
//! Talks to a chat-completion style endpoint with reqwest. The pipeline only
//! sees the `Summarizer` trait, so tests and alternative providers plug in
//! without touching the delivery path.

use crate::config::{Config, SummarizerConfig};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("refusing to summarise empty text")]
    EmptyInput,
    #[error("LLM request failed: {0}")]
    RequestFailed(String),
    #[error("failed to parse response: {0}")]
    ParseError(String),
    #[error("configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        AgentError::RequestFailed(e.to_string())
    }
}

/// Produces a short natural-language summary of some text.
///
/// The result carries no length guarantee; callers chunk it before sending.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String, AgentError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Summariser backed by an OpenAI-compatible chat-completion endpoint
pub struct ChatCompletionAgent {
    client: Client,
    api_key: String,
    settings: SummarizerConfig,
}

impl ChatCompletionAgent {
    pub fn new(settings: SummarizerConfig, api_key: impl Into<String>) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            settings,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AgentError> {
        let api_key = config.api_key()?;
        Self::new(config.summarizer.clone(), api_key)
    }

    fn request<'a>(&'a self, text: &str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.settings.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(text),
                },
            ],
            max_tokens: self.settings.max_tokens,
        }
    }
}

#[async_trait]
impl Summarizer for ChatCompletionAgent {
    async fn summarize(&self, text: &str) -> Result<String, AgentError> {
        if text.trim().is_empty() {
            return Err(AgentError::EmptyInput);
        }
        debug!(chars = text.chars().count(), "summarising text");

        let response = self
            .client
            .post(&self.settings.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request(text))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AgentError::RequestFailed(format!("HTTP {}: {}", status, body)));
        }

        parse_completion(&body)
    }
}

fn user_prompt(text: &str) -> String {
    format!("Here's a news article: {}. Can you summarize it for me?", text)
}

/// Pull the first choice's message content out of a completion body
fn parse_completion(body: &str) -> Result<String, AgentError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| AgentError::ParseError(format!("{}: {}", e, body)))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| AgentError::ParseError("completion has no message content".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> ChatCompletionAgent {
        ChatCompletionAgent::new(SummarizerConfig::default(), "sk-test").unwrap()
    }

    #[test]
    fn request_carries_system_and_user_turns() {
        let agent = agent();
        let value = serde_json::to_value(agent.request("Rust is fast")).unwrap();

        assert_eq!(value["model"], "gpt-3.5-turbo-16k");
        assert_eq!(value["max_tokens"], 300);
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(
            value["messages"][1]["content"],
            "Here's a news article: Rust is fast. Can you summarize it for me?"
        );
    }

    #[test]
    fn completion_content_is_trimmed() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  short summary \n"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "short summary");
    }

    #[test]
    fn missing_choices_is_a_parse_error() {
        assert!(matches!(
            parse_completion(r#"{"choices":[]}"#),
            Err(AgentError::ParseError(_))
        ));
        assert!(matches!(
            parse_completion("not json"),
            Err(AgentError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_a_request() {
        let result = agent().summarize("   ").await;
        assert!(matches!(result, Err(AgentError::EmptyInput)));
    }
}
