//! Completion connector: streams model output for a conversation history.

use crate::configuration::CompletionSettings;
use crate::connectors::ConnectorError;
use crate::models::ChatMessage;
use actix_web::web;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

pub mod client;
#[cfg(test)]
pub mod mock;
pub mod sse;

pub use client::{fallback_title, OpenRouterClient};
#[cfg(test)]
pub use mock::MockCompletionConnector;

/// Raw text chunks as the upstream produces them. The stream ends after the
/// first error.
pub type CompletionStream = BoxStream<'static, Result<String, ConnectorError>>;

#[async_trait]
pub trait CompletionConnector: Send + Sync {
    /// Start a streamed completion over `history`, oldest turn first.
    async fn stream_completion(
        &self,
        model: &str,
        history: &[ChatMessage],
    ) -> Result<CompletionStream, ConnectorError>;

    /// Ask the model for a short title describing `user_message`.
    async fn generate_title(&self, user_message: &str) -> Result<String, ConnectorError>;
}

/// Build the completion connector for the application
///
/// ```ignore
/// let completion = connectors::init_completion(&settings.completion)?;
/// App::new().app_data(completion)
/// ```
pub fn init(
    settings: &CompletionSettings,
) -> Result<web::Data<Arc<dyn CompletionConnector>>, ConnectorError> {
    if settings.api_key.is_none() {
        tracing::warn!("OPENROUTER_API_KEY is not set, completion requests will be unauthenticated");
    }
    tracing::info!(
        base_url = %settings.base_url,
        default_model = %settings.default_model,
        "Initializing completion connector"
    );

    let connector: Arc<dyn CompletionConnector> = Arc::new(OpenRouterClient::new(settings)?);
    Ok(web::Data::new(connector))
}
