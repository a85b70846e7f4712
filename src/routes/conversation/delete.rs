use crate::helpers::JsonResponse;
use crate::models;
use crate::services::{ConversationStore, HistoryCache};
use actix_web::{delete, web, Responder, Result};
use std::sync::Arc;
use uuid::Uuid;

/// DELETE /conversations/{id}
/// Removes the conversation, its messages and its cached history.
#[tracing::instrument(name = "Delete conversation.", skip(user, store, cache), fields(user_id = %user.id))]
#[delete("/{id}")]
pub async fn delete_handler(
    path: web::Path<Uuid>,
    user: web::ReqData<Arc<models::User>>,
    store: web::Data<Arc<dyn ConversationStore>>,
    cache: web::Data<HistoryCache>,
) -> Result<impl Responder> {
    let id = path.into_inner();
    let deleted = store
        .delete_conversation(id, &user.id)
        .await
        .map_err(|err| JsonResponse::<()>::build().internal_server_error(err))?;

    if !deleted {
        return Err(JsonResponse::<()>::build().not_found("Conversation not found"));
    }

    cache.invalidate(id).await;
    Ok(JsonResponse::<()>::build().ok("Deleted"))
}
