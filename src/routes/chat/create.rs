use crate::configuration::Settings;
use crate::connectors::CompletionConnector;
use crate::forms;
use crate::models::{self, ChatMessage, Message, Role};
use crate::services::{chat, ChatError, ConversationStore, HistoryCache, Relay};
use actix_web::http::header;
use actix_web::{post, web, HttpResponse};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";

/// Chunks buffered between the upstream reader and a slow client.
const RELAY_BUFFER: usize = 64;

/// Buffer the request body, rejecting it as invalid input once it outgrows
/// any acceptable chat request.
async fn read_body(mut payload: web::Payload) -> Result<web::BytesMut, ChatError> {
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|err| ChatError::InvalidInput(err.to_string()))?;
        if body.len() + chunk.len() > forms::chat::MAX_BODY_BYTES {
            return Err(ChatError::InvalidInput("request body too large".to_string()));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// POST /chat
/// Continues (or starts) a conversation and streams the model reply back as
/// raw text. The exchange is cached and persisted once the reply is complete.
#[tracing::instrument(
    name = "Chat.",
    skip(user, payload, store, connector, cache, settings),
    fields(user_id = %user.id)
)]
#[post("")]
pub async fn create_handler(
    user: web::ReqData<Arc<models::User>>,
    payload: web::Payload,
    store: web::Data<Arc<dyn ConversationStore>>,
    connector: web::Data<Arc<dyn CompletionConnector>>,
    cache: web::Data<HistoryCache>,
    settings: web::Data<Settings>,
) -> Result<HttpResponse, ChatError> {
    let body = read_body(payload).await.map_err(|err| {
        tracing::info!(error = ?err, "Rejected chat body");
        err
    })?;
    let form = forms::CreateChat::parse(&body).map_err(|err| {
        tracing::info!(error = %err, "Rejected chat payload");
        ChatError::InvalidInput(err)
    })?;

    let model = form
        .model
        .clone()
        .unwrap_or_else(|| settings.completion.default_model.clone());
    if !settings.completion.is_supported(&model) {
        tracing::info!(%model, "Rejected unsupported model");
        return Err(ChatError::InvalidInput(format!("unsupported model {model}")));
    }

    let context = chat::load_history(
        cache.get_ref(),
        store.get_ref().as_ref(),
        &user.id,
        form.conversation_id,
    )
    .await?;

    let user_message = Message::new(context.conversation_id, Role::User, form.message);
    let mut history = context.history;
    history.push(ChatMessage::from(&user_message));

    let upstream = connector.stream_completion(&model, &history).await?;

    let (sender, receiver) = mpsc::channel::<web::Bytes>(RELAY_BUFFER);
    let relay = Relay {
        cache: cache.into_inner(),
        store: store.get_ref().clone(),
        connector: connector.get_ref().clone(),
    };
    let span = tracing::info_span!(
        "Relay completion.",
        conversation_id = %context.conversation_id,
        %model
    );
    actix_web::rt::spawn(
        relay
            .run(
                upstream,
                sender,
                user.id.clone(),
                context.is_new,
                user_message,
            )
            .instrument(span),
    );

    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((CONVERSATION_ID_HEADER, context.conversation_id.to_string()))
        .streaming(ReceiverStream::new(receiver).map(Ok::<_, Infallible>)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::Settings;
    use crate::connectors::completion::MockCompletionConnector;
    use crate::connectors::ConnectorError;
    use crate::models::Conversation;
    use crate::services::store::mock::MemoryConversationStore;
    use actix_web::dev::Service;
    use actix_web::{http::StatusCode, test, App, HttpMessage};
    use std::time::Duration;
    use uuid::Uuid;

    struct Harness {
        store: Arc<MemoryConversationStore>,
        connector: Arc<MockCompletionConnector>,
        cache: web::Data<HistoryCache>,
    }

    impl Harness {
        fn new(connector: MockCompletionConnector) -> Self {
            Self {
                store: Arc::new(MemoryConversationStore::default()),
                connector: Arc::new(connector),
                cache: web::Data::new(HistoryCache::new(100, 0, Duration::ZERO)),
            }
        }

        async fn post(&self, user_id: &str, body: &str) -> (StatusCode, Option<String>, String) {
            let store: Arc<dyn ConversationStore> = self.store.clone();
            let connector: Arc<dyn CompletionConnector> = self.connector.clone();
            let user = Arc::new(models::User {
                id: user_id.to_string(),
                ..Default::default()
            });

            let app = test::init_service(
                App::new()
                    .wrap_fn(move |req, srv| {
                        req.extensions_mut().insert(user.clone());
                        srv.call(req)
                    })
                    .app_data(web::Data::new(store))
                    .app_data(web::Data::new(connector))
                    .app_data(self.cache.clone())
                    .app_data(web::Data::new(Settings::for_tests("http://127.0.0.1:1/me")))
                    .service(web::scope("/chat").service(create_handler)),
            )
            .await;

            let req = test::TestRequest::post()
                .uri("/chat")
                .insert_header((header::CONTENT_TYPE, "application/json"))
                .set_payload(body.to_string())
                .to_request();
            let resp = test::call_service(&app, req).await;

            let status = resp.status();
            let conversation_id = resp
                .headers()
                .get(CONVERSATION_ID_HEADER)
                .map(|value| value.to_str().unwrap().to_string());
            let body = test::read_body(resp).await;
            (status, conversation_id, String::from_utf8(body.to_vec()).unwrap())
        }
    }

    #[actix_web::test]
    async fn invalid_payload_is_rejected_with_411() {
        let harness = Harness::new(MockCompletionConnector::default());

        for body in [
            "not json",
            r#"{"model": "openai/gpt-4o"}"#,
            r#"{"message": ""}"#,
            r#"{"message": "hi", "conversationId": "not-a-uuid"}"#,
            r#"{"message": "hi", "model": "unknown/model"}"#,
        ] {
            let (status, _, body) = harness.post("alice", body).await;
            assert_eq!(status, StatusCode::LENGTH_REQUIRED);
            let json: serde_json::Value = serde_json::from_str(&body).unwrap();
            assert_eq!(json["message"], "Incorrect inputs");
        }
        assert!(harness.connector.calls().is_empty());
    }

    #[actix_web::test]
    async fn oversized_body_is_rejected_with_411() {
        let harness = Harness::new(MockCompletionConnector::default());

        for size in [forms::chat::MAX_BODY_BYTES + 1, 300 * 1024] {
            let body = serde_json::json!({ "message": "a".repeat(size) }).to_string();
            let (status, _, body) = harness.post("alice", &body).await;
            assert_eq!(status, StatusCode::LENGTH_REQUIRED);
            let json: serde_json::Value = serde_json::from_str(&body).unwrap();
            assert_eq!(json["message"], "Incorrect inputs");
        }

        // a message over the character cap that still fits the body limit
        let body = serde_json::json!({
            "message": "a".repeat(forms::chat::MAX_MESSAGE_LENGTH + 1)
        })
        .to_string();
        let (status, _, _) = harness.post("alice", &body).await;
        assert_eq!(status, StatusCode::LENGTH_REQUIRED);
        assert!(harness.connector.calls().is_empty());
    }

    #[actix_web::test]
    async fn new_conversation_is_assigned_id_and_persisted_with_title() {
        let harness = Harness::new(MockCompletionConnector::default());

        let (status, conversation_id, body) = harness.post("alice", r#"{"message": "hi"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Hello, world");

        let id: Uuid = conversation_id.unwrap().parse().unwrap();
        let conversations = harness.store.conversations();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].id, id);
        assert_eq!(conversations[0].user_id, "alice");
        assert_eq!(conversations[0].title, "Greeting");

        let messages = harness.store.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!((messages[0].role, messages[0].content.as_str()), (Role::User, "hi"));
        assert_eq!(
            (messages[1].role, messages[1].content.as_str()),
            (Role::Agent, "Hello, world")
        );

        let calls = harness.connector.calls();
        let (model, history) = &calls[0];
        assert_eq!(model, "openai/gpt-4o-mini");
        assert_eq!(history, &vec![ChatMessage::user("hi")]);
    }

    #[actix_web::test]
    async fn history_is_persisted_messages_plus_new_message() {
        let harness = Harness::new(MockCompletionConnector::with_chunks(&["ok"]));
        let conversation = Conversation::new(Uuid::now_v7(), "alice".into(), "Old".into());
        let id = conversation.id;
        harness.store.insert_conversation(conversation);
        let persisted = [
            Message::new(id, Role::User, "q1".into()),
            Message::new(id, Role::Agent, "a1".into()),
            Message::new(id, Role::User, "q2".into()),
            Message::new(id, Role::Agent, "a2".into()),
        ];
        // stored out of order; creation order must win
        for message in persisted.iter().rev() {
            harness.store.insert_message(message.clone());
        }

        let body = format!(r#"{{"conversationId": "{id}", "message": "q3"}}"#);
        let (status, conversation_id, _) = harness.post("alice", &body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(conversation_id, Some(id.to_string()));

        let mut expected: Vec<ChatMessage> = persisted.iter().map(ChatMessage::from).collect();
        expected.push(ChatMessage::user("q3"));
        assert_eq!(harness.connector.calls()[0].1, expected);

        // second turn is served from the cache and includes the first reply
        let body = format!(r#"{{"conversationId": "{id}", "message": "q4"}}"#);
        harness.post("alice", &body).await;
        expected.push(ChatMessage::agent("ok"));
        expected.push(ChatMessage::user("q4"));
        assert_eq!(harness.connector.calls()[1].1, expected);

        assert_eq!(harness.store.conversations().len(), 1);
        assert_eq!(harness.store.messages().len(), 8);
    }

    #[actix_web::test]
    async fn foreign_conversation_is_not_found() {
        let harness = Harness::new(MockCompletionConnector::default());
        let conversation = Conversation::new(Uuid::now_v7(), "alice".into(), "Mine".into());
        let id = conversation.id;
        harness.store.insert_conversation(conversation);

        let body = format!(r#"{{"conversationId": "{id}", "message": "peek"}}"#);
        let (status, _, _) = harness.post("mallory", &body).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(harness.connector.calls().is_empty());
    }

    #[actix_web::test]
    async fn upstream_failure_before_streaming_maps_to_gateway_error() {
        let harness = Harness::new(MockCompletionConnector {
            start_error: Some(ConnectorError::RateLimited("quota".into())),
            ..Default::default()
        });

        let (status, _, _) = harness.post("alice", r#"{"message": "hi"}"#).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(harness.store.conversations().is_empty());
    }

    #[actix_web::test]
    async fn streaming_response_headers() {
        let harness = Harness::new(MockCompletionConnector::default());
        let store: Arc<dyn ConversationStore> = harness.store.clone();
        let connector: Arc<dyn CompletionConnector> = harness.connector.clone();

        let app = test::init_service(
            App::new()
                .wrap_fn(|req, srv| {
                    req.extensions_mut().insert(Arc::new(models::User {
                        id: "alice".into(),
                        ..Default::default()
                    }));
                    srv.call(req)
                })
                .app_data(web::Data::new(store))
                .app_data(web::Data::new(connector))
                .app_data(harness.cache.clone())
                .app_data(web::Data::new(Settings::for_tests("http://127.0.0.1:1/me")))
                .service(web::scope("/chat").service(create_handler)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/chat")
            .set_payload(r#"{"message": "hi"}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;

        let headers = resp.headers();
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "text/event-stream");
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-cache");
        assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        test::read_body(resp).await;
    }
}
