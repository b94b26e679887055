//! Optional OpenAI chat completions client behind `/ask` and mention chat.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::BotError;

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest question `/ask` accepts.
pub const MAX_QUESTION_CHARS: usize = 1000;
/// Longest message answered in mention chat.
pub const MAX_CHAT_CHARS: usize = 500;

/// Conversation styles, each with its own system prompt and budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persona {
    /// A direct question via `/ask`.
    Assistant,
    /// Short casual replies to mentions in chat-enabled servers.
    Casual,
}

impl Persona {
    fn system_prompt(self) -> &'static str {
        match self {
            Self::Assistant => {
                "You are Nova, a cute and helpful Discord bot with a kawaii personality! \
                 You should be friendly, enthusiastic, and use cute expressions occasionally. \
                 Use emojis sparingly but appropriately. Keep responses concise but helpful. \
                 You love helping people and making them smile! 🌸"
            }
            Self::Casual => {
                "You are Nova, a cute and helpful Discord bot! \
                 You're chatting casually in a Discord server. Be friendly, helpful, and kawaii! \
                 Keep responses short (under 200 characters) since this is casual chat. \
                 Use emojis occasionally but don't overdo it. You love helping and making friends! 🌸"
            }
        }
    }

    fn max_tokens(self) -> u32 {
        match self {
            Self::Assistant => 500,
            Self::Casual => 150,
        }
    }

    fn temperature(self) -> f32 {
        match self {
            Self::Assistant => 0.8,
            Self::Casual => 0.9,
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct ChatClient {
    http: Client,
    api_key: Option<String>,
    model: String,
}

impl ChatClient {
    pub fn new(http: Client, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            api_key,
            model: model.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn complete(&self, persona: Persona, prompt: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(BotError::Unavailable("AI chat"))?;

        let body = build_request(&self.model, persona, prompt);
        debug!("🤖 Asking {} ({} chars)", self.model, prompt.chars().count());

        let response = self
            .http
            .post(COMPLETIONS_URL)
            .bearer_auth(api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .context("OpenAI request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!("OpenAI returned {}: {}", status, detail);
            anyhow::bail!("OpenAI returned {}", status);
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .context("unexpected OpenAI response")?;
        first_answer(parsed)
    }
}

fn build_request<'a>(model: &'a str, persona: Persona, prompt: &'a str) -> CompletionRequest<'a> {
    CompletionRequest {
        model,
        messages: vec![
            Message {
                role: "system",
                content: persona.system_prompt(),
            },
            Message {
                role: "user",
                content: prompt,
            },
        ],
        max_tokens: persona.max_tokens(),
        temperature: persona.temperature(),
    }
}

fn first_answer(response: CompletionResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .context("OpenAI returned an empty answer")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_without_key_is_unavailable() {
        let client = ChatClient::new(Client::new(), None, "gpt-3.5-turbo");
        assert!(!client.is_available());

        let err = client.complete(Persona::Assistant, "hi").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<BotError>(),
            Some(&BotError::Unavailable("AI chat"))
        );
    }

    #[test]
    fn test_request_body() {
        let body = serde_json::to_value(build_request("gpt-4o", Persona::Casual, "hello")).unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 150);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "hello"}));
    }

    #[test]
    fn test_first_answer() {
        let response: CompletionResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "  Hi there! 🌸 "}}]
        }))
        .unwrap();
        assert_eq!(first_answer(response).unwrap(), "Hi there! 🌸");

        let empty: CompletionResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(first_answer(empty).is_err());
    }
}
