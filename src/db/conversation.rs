use crate::models;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::Instrument;
use uuid::Uuid;

pub async fn fetch(pool: &PgPool, id: Uuid) -> Result<Option<models::Conversation>, String> {
    let query_span = tracing::info_span!("Fetch conversation by id.");
    sqlx::query_as::<_, models::Conversation>(
        r#"
        SELECT id, user_id, title, created_at, updated_at
        FROM conversations
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to fetch conversation, error: {:?}", err);
        "Could not fetch data".to_string()
    })
}

pub async fn fetch_by_user(
    pool: &PgPool,
    user_id: &str,
) -> Result<Vec<models::Conversation>, String> {
    let query_span = tracing::info_span!("Fetch conversations by user id.");
    sqlx::query_as::<_, models::Conversation>(
        r#"
        SELECT id, user_id, title, created_at, updated_at
        FROM conversations
        WHERE user_id = $1
        ORDER BY updated_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to fetch conversations, error: {:?}", err);
        "Could not fetch data".to_string()
    })
}

pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    conversation: &models::Conversation,
) -> Result<(), String> {
    let query_span = tracing::info_span!("Saving new conversation into the database");
    sqlx::query(
        r#"
        INSERT INTO conversations (id, user_id, title, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(conversation.id)
    .bind(&conversation.user_id)
    .bind(&conversation.title)
    .bind(conversation.created_at)
    .bind(conversation.updated_at)
    .execute(&mut **tx)
    .instrument(query_span)
    .await
    .map(|_| ())
    .map_err(|err| {
        tracing::error!("Failed to insert conversation: {:?}", err);
        "Failed to insert".to_string()
    })
}

pub async fn touch(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<(), String> {
    let query_span = tracing::info_span!("Touch conversation.");
    sqlx::query(r#"UPDATE conversations SET updated_at = NOW() WHERE id = $1"#)
        .bind(id)
        .execute(&mut **tx)
        .instrument(query_span)
        .await
        .map(|_| ())
        .map_err(|err| {
            tracing::error!("Failed to update conversation timestamp: {:?}", err);
            "Failed to update".to_string()
        })
}

/// Messages go with the conversation through `ON DELETE CASCADE`.
pub async fn delete(pool: &PgPool, id: Uuid, user_id: &str) -> Result<bool, String> {
    let query_span = tracing::info_span!("Delete conversation.");
    sqlx::query(r#"DELETE FROM conversations WHERE id = $1 AND user_id = $2"#)
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .instrument(query_span)
        .await
        .map(|result| result.rows_affected() > 0)
        .map_err(|err| {
            tracing::error!("Failed to delete conversation: {:?}", err);
            "Failed to delete".to_string()
        })
}
