use crate::helpers::JsonResponse;
use crate::models;
use crate::services::ConversationStore;
use actix_web::{get, web, Responder, Result};
use std::sync::Arc;
use uuid::Uuid;

/// GET /conversations
/// Conversations of the logged-in user, most recently updated first.
#[tracing::instrument(name = "List conversations.", skip(user, store), fields(user_id = %user.id))]
#[get("")]
pub async fn list_handler(
    user: web::ReqData<Arc<models::User>>,
    store: web::Data<Arc<dyn ConversationStore>>,
) -> Result<impl Responder> {
    store
        .list_conversations(&user.id)
        .await
        .map(|conversations| JsonResponse::build().set_list(conversations).ok("OK"))
        .map_err(|err| JsonResponse::<models::Conversation>::build().internal_server_error(err))
}

/// GET /conversations/{id}
/// One conversation with its messages in creation order.
#[tracing::instrument(name = "Get conversation.", skip(user, store), fields(user_id = %user.id))]
#[get("/{id}")]
pub async fn item_handler(
    path: web::Path<Uuid>,
    user: web::ReqData<Arc<models::User>>,
    store: web::Data<Arc<dyn ConversationStore>>,
) -> Result<impl Responder> {
    let id = path.into_inner();
    let conversation = store
        .fetch_conversation(id)
        .await
        .map_err(|err| JsonResponse::<()>::build().internal_server_error(err))?
        .filter(|conversation| conversation.user_id == user.id)
        .ok_or_else(|| JsonResponse::<()>::build().not_found("Conversation not found"))?;

    let messages = store
        .fetch_messages(conversation.id)
        .await
        .map_err(|err| JsonResponse::<()>::build().internal_server_error(err))?;

    Ok(JsonResponse::build()
        .set_item(models::ConversationWithMessages::new(conversation, messages))
        .ok("OK"))
}
