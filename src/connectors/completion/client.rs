use super::sse;
use super::{CompletionConnector, CompletionStream};
use crate::configuration::CompletionSettings;
use crate::connectors::ConnectorError;
use crate::models::{ChatMessage, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const TITLE_PROMPT: &str = "Generate a short title for a conversation that starts with the \
following user message. Reply with the title only: at most six words, no quotes, no \
trailing punctuation.";

const MAX_TITLE_CHARS: usize = 80;
const FALLBACK_TITLE_CHARS: usize = 50;

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a ChatMessage> for WireMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        let role = match message.role {
            Role::User => "user",
            Role::Agent => "assistant",
        };
        WireMessage {
            role,
            content: &message.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client, OpenRouter by default.
pub struct OpenRouterClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    title_model: String,
}

impl OpenRouterClient {
    pub fn new(settings: &CompletionSettings) -> Result<Self, ConnectorError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|err| ConnectorError::Internal(err.to_string()))?;

        Ok(Self {
            http_client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            title_model: settings.title_model.clone(),
        })
    }

    fn post(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let request = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .json(body);
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response, ConnectorError> {
        let response = self.post(body).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        tracing::error!(%status, body = %text, "Completion request rejected");
        Err(ConnectorError::from_status(status, text))
    }
}

#[async_trait]
impl CompletionConnector for OpenRouterClient {
    #[tracing::instrument(name = "Stream completion", skip(self, history), fields(turns = history.len()))]
    async fn stream_completion(
        &self,
        model: &str,
        history: &[ChatMessage],
    ) -> Result<CompletionStream, ConnectorError> {
        let messages: Vec<WireMessage> = history.iter().map(WireMessage::from).collect();
        let body = json!({
            "model": model,
            "messages": messages,
            "stream": true,
        });

        let response = self.send(&body).await?;
        let events = sse_stream::SseStream::from_byte_stream(response.bytes_stream());
        Ok(sse::into_deltas(events))
    }

    #[tracing::instrument(name = "Generate conversation title", skip(self, user_message))]
    async fn generate_title(&self, user_message: &str) -> Result<String, ConnectorError> {
        let body = json!({
            "model": self.title_model,
            "messages": [
                { "role": "system", "content": TITLE_PROMPT },
                { "role": "user", "content": user_message },
            ],
            "stream": false,
        });

        let response: CompletionResponse = self.send(&body).await?.json().await?;
        let raw = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        clean_title(&raw).ok_or_else(|| ConnectorError::InvalidResponse("empty title".to_string()))
    }
}

fn clean_title(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
    let line = line.strip_prefix("Title:").unwrap_or(line);
    let title = line
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '*' || c == '#')
        .trim()
        .trim_end_matches('.');

    if title.is_empty() {
        return None;
    }
    Some(title.chars().take(MAX_TITLE_CHARS).collect())
}

/// Title derived from the message itself when the model cannot provide one.
pub fn fallback_title(user_message: &str) -> String {
    let collapsed = user_message.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= FALLBACK_TITLE_CHARS {
        return collapsed;
    }
    let mut title: String = collapsed.chars().take(FALLBACK_TITLE_CHARS).collect();
    if let Some(cut) = title.rfind(' ') {
        title.truncate(cut);
    }
    format!("{}...", title)
}
