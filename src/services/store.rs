//! Conversation persistence behind a trait, so routes can run against the
//! database or an in-memory store.

use crate::db;
use crate::models::{Conversation, Message};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Most recently updated first.
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, String>;

    async fn fetch_conversation(&self, id: Uuid) -> Result<Option<Conversation>, String>;

    /// Creation order.
    async fn fetch_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, String>;

    /// Persist one exchange atomically. `new_conversation` is inserted first
    /// when present; otherwise the existing conversation's `updated_at` moves.
    async fn save_exchange(
        &self,
        new_conversation: Option<Conversation>,
        conversation_id: Uuid,
        messages: Vec<Message>,
    ) -> Result<(), String>;

    /// `false` when nothing owned by `user_id` matched.
    async fn delete_conversation(&self, id: Uuid, user_id: &str) -> Result<bool, String>;
}

pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, String> {
        db::conversation::fetch_by_user(&self.pool, user_id).await
    }

    async fn fetch_conversation(&self, id: Uuid) -> Result<Option<Conversation>, String> {
        db::conversation::fetch(&self.pool, id).await
    }

    async fn fetch_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, String> {
        db::message::fetch_by_conversation(&self.pool, conversation_id).await
    }

    #[tracing::instrument(name = "Save exchange.", skip(self, new_conversation, messages))]
    async fn save_exchange(
        &self,
        new_conversation: Option<Conversation>,
        conversation_id: Uuid,
        messages: Vec<Message>,
    ) -> Result<(), String> {
        let mut tx = self.pool.begin().await.map_err(|err| {
            tracing::error!("Failed to begin transaction: {:?}", err);
            "Could not open transaction".to_string()
        })?;

        match new_conversation {
            Some(conversation) => db::conversation::insert(&mut tx, &conversation).await?,
            None => db::conversation::touch(&mut tx, conversation_id).await?,
        }
        if !messages.is_empty() {
            db::message::insert_many(&mut tx, &messages).await?;
        }

        tx.commit().await.map_err(|err| {
            tracing::error!("Failed to commit exchange: {:?}", err);
            "Could not commit transaction".to_string()
        })
    }

    async fn delete_conversation(&self, id: Uuid, user_id: &str) -> Result<bool, String> {
        db::conversation::delete(&self.pool, id, user_id).await
    }
}
