use super::{CompletionConnector, CompletionStream};
use crate::connectors::ConnectorError;
use crate::models::ChatMessage;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Mutex;

/// Streams canned chunks and records every history it was asked to complete.
pub struct MockCompletionConnector {
    pub chunks: Vec<String>,
    pub title: Result<String, ConnectorError>,
    /// Returned instead of a stream
    pub start_error: Option<ConnectorError>,
    /// Yielded after the chunks
    pub stream_error: Option<ConnectorError>,
    pub(crate) calls: Mutex<Vec<(String, Vec<ChatMessage>)>>,
}

impl Default for MockCompletionConnector {
    fn default() -> Self {
        Self {
            chunks: vec!["Hello".to_string(), ", ".to_string(), "world".to_string()],
            title: Ok("Greeting".to_string()),
            start_error: None,
            stream_error: None,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockCompletionConnector {
    pub fn with_chunks(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    /// (model, history) pairs in call order.
    pub fn calls(&self) -> Vec<(String, Vec<ChatMessage>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionConnector for MockCompletionConnector {
    async fn stream_completion(
        &self,
        model: &str,
        history: &[ChatMessage],
    ) -> Result<CompletionStream, ConnectorError> {
        self.calls
            .lock()
            .unwrap()
            .push((model.to_string(), history.to_vec()));

        if let Some(err) = self.start_error.clone() {
            return Err(err);
        }

        let mut items: Vec<Result<String, ConnectorError>> =
            self.chunks.iter().cloned().map(Ok).collect();
        if let Some(err) = self.stream_error.clone() {
            items.push(Err(err));
        }
        Ok(futures::stream::iter(items).boxed())
    }

    async fn generate_title(&self, _user_message: &str) -> Result<String, ConnectorError> {
        self.title.clone()
    }
}
