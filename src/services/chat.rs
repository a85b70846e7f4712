use crate::connectors::{completion::fallback_title, CompletionConnector, CompletionStream, ConnectorError};
use crate::models::{ChatMessage, Conversation, Message, Role};
use crate::services::{ConversationStore, HistoryCache};
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Incorrect inputs")]
    InvalidInput(String),
    #[error("Conversation not found")]
    NotFound,
    #[error("Storage error: {0}")]
    Store(String),
    #[error(transparent)]
    Upstream(#[from] ConnectorError),
}

impl ResponseError for ChatError {
    fn status_code(&self) -> StatusCode {
        match self {
            // clients expect 411 for malformed input
            Self::InvalidInput(_) => StatusCode::LENGTH_REQUIRED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream(err) => err.status_code(),
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            Self::Upstream(err) => err.error_response(),
            Self::Store(_) => HttpResponse::build(self.status_code())
                .json(json!({ "message": "Internal error" })),
            _ => HttpResponse::build(self.status_code()).json(json!({ "message": self.to_string() })),
        }
    }
}

/// History a chat request continues from.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatContext {
    pub conversation_id: Uuid,
    pub is_new: bool,
    pub history: Vec<ChatMessage>,
}

/// Resolve the conversation a request continues. Without an id a fresh
/// UUIDv7 is assigned; otherwise the cached history is used, hydrated from
/// persisted messages on a miss. Conversations owned by someone else are
/// reported as missing.
#[tracing::instrument(name = "Load conversation history.", skip(cache, store))]
pub async fn load_history(
    cache: &HistoryCache,
    store: &dyn ConversationStore,
    user_id: &str,
    conversation_id: Option<Uuid>,
) -> Result<ChatContext, ChatError> {
    let conversation_id = match conversation_id {
        Some(id) => id,
        None => {
            return Ok(ChatContext {
                conversation_id: Uuid::now_v7(),
                is_new: true,
                history: Vec::new(),
            })
        }
    };

    if let Some(cached) = cache.get(conversation_id).await {
        if cached.owner != user_id {
            return Err(ChatError::NotFound);
        }
        tracing::debug!(turns = cached.messages.len(), "History cache hit");
        return Ok(ChatContext {
            conversation_id,
            is_new: false,
            history: cached.messages,
        });
    }

    let conversation = store
        .fetch_conversation(conversation_id)
        .await
        .map_err(ChatError::Store)?
        .filter(|conversation| conversation.user_id == user_id)
        .ok_or(ChatError::NotFound)?;

    let persisted: Vec<ChatMessage> = store
        .fetch_messages(conversation.id)
        .await
        .map_err(ChatError::Store)?
        .iter()
        .map(ChatMessage::from)
        .collect();
    tracing::debug!(turns = persisted.len(), "History hydrated from database");

    let cached = cache.seed(conversation.id, user_id, persisted).await;
    Ok(ChatContext {
        conversation_id,
        is_new: false,
        history: cached.messages,
    })
}

/// One finished request/reply pair waiting to be recorded.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub user_id: String,
    pub is_new: bool,
    pub user_message: Message,
    pub agent_message: Message,
}

/// Record a finished exchange: cache first, then a generated title for new
/// conversations, then both messages in one transaction. A conversation
/// that left the cache while streaming is not re-cached here; the next
/// request rehydrates it from the database. A failed write drops the cache
/// entry for the same reason.
#[tracing::instrument(
    name = "Complete exchange.",
    skip_all,
    fields(conversation_id = %exchange.user_message.conversation_id)
)]
pub async fn complete_exchange(
    cache: &HistoryCache,
    store: &dyn ConversationStore,
    connector: &dyn CompletionConnector,
    exchange: Exchange,
) -> Result<(), ChatError> {
    let conversation_id = exchange.user_message.conversation_id;

    let user_turn = ChatMessage::from(&exchange.user_message);
    let agent_turn = ChatMessage::from(&exchange.agent_message);
    if exchange.is_new {
        cache
            .seed(conversation_id, &exchange.user_id, vec![user_turn, agent_turn])
            .await;
    } else if !cache
        .append_exchange(conversation_id, user_turn, agent_turn)
        .await
    {
        tracing::debug!("History left the cache while streaming");
    }

    let new_conversation = if exchange.is_new {
        let title = match connector.generate_title(&exchange.user_message.content).await {
            Ok(title) => title,
            Err(err) => {
                tracing::warn!(error = %err, "Title generation failed, using message prefix");
                fallback_title(&exchange.user_message.content)
            }
        };
        Some(Conversation::new(conversation_id, exchange.user_id.clone(), title))
    } else {
        None
    };

    let saved = store
        .save_exchange(
            new_conversation,
            conversation_id,
            vec![exchange.user_message, exchange.agent_message],
        )
        .await;

    if let Err(err) = saved {
        cache.invalidate(conversation_id).await;
        return Err(ChatError::Store(err));
    }
    Ok(())
}

/// Shared handles the background relay needs once the handler returned.
pub struct Relay {
    pub cache: Arc<HistoryCache>,
    pub store: Arc<dyn ConversationStore>,
    pub connector: Arc<dyn CompletionConnector>,
}

impl Relay {
    /// Forward upstream chunks to `sender` while collecting the reply, then
    /// record the exchange. The sender is dropped, closing the response
    /// body, only after the exchange was recorded. A client that goes away
    /// does not stop the exchange; an upstream error discards it.
    pub async fn run(
        self,
        mut upstream: CompletionStream,
        sender: mpsc::Sender<web::Bytes>,
        user_id: String,
        is_new: bool,
        user_message: Message,
    ) {
        let mut reply = String::new();
        let mut client_connected = true;

        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(text) => {
                    reply.push_str(&text);
                    if client_connected && sender.send(web::Bytes::from(text)).await.is_err() {
                        tracing::info!("Client disconnected, finishing exchange in background");
                        client_connected = false;
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "Completion stream failed, exchange discarded");
                    return;
                }
            }
        }

        tracing::debug!(reply_len = reply.len(), "Completion finished");
        let agent_message = Message::new(user_message.conversation_id, Role::Agent, reply);
        let exchange = Exchange {
            user_id,
            is_new,
            user_message,
            agent_message,
        };

        if let Err(err) = complete_exchange(
            &self.cache,
            self.store.as_ref(),
            self.connector.as_ref(),
            exchange,
        )
        .await
        {
            tracing::error!(error = %err, "Failed to record exchange");
        }
        drop(sender);
    }
}
