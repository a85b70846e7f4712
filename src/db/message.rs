use crate::models;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::Instrument;
use uuid::Uuid;

pub async fn fetch_by_conversation(
    pool: &PgPool,
    conversation_id: Uuid,
) -> Result<Vec<models::Message>, String> {
    let query_span = tracing::info_span!("Fetch messages by conversation id.");
    sqlx::query_as::<_, models::Message>(
        r#"
        SELECT id, conversation_id, role, content, created_at
        FROM messages
        WHERE conversation_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to fetch messages, error: {:?}", err);
        "Could not fetch data".to_string()
    })
}

pub async fn insert_many(
    tx: &mut Transaction<'_, Postgres>,
    messages: &[models::Message],
) -> Result<(), String> {
    let query_span = tracing::info_span!("Saving messages into the database");
    let mut builder = sqlx::QueryBuilder::<Postgres>::new(
        "INSERT INTO messages (id, conversation_id, role, content, created_at) ",
    );
    builder.push_values(messages, |mut row, message| {
        row.push_bind(message.id)
            .push_bind(message.conversation_id)
            .push_bind(message.role)
            .push_bind(&message.content)
            .push_bind(message.created_at);
    });

    builder
        .build()
        .execute(&mut **tx)
        .instrument(query_span)
        .await
        .map(|_| ())
        .map_err(|err| {
            tracing::error!("Failed to insert messages: {:?}", err);
            "Failed to insert".to_string()
        })
}
