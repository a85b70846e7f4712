use crate::configuration::Settings;
use crate::connectors;
use crate::middleware;
use crate::routes;
use crate::services::{ConversationStore, HistoryCache, PgConversationStore};
use actix_cors::Cors;
use actix_web::{dev::Server, web, App, HttpServer};
use sqlx::{Pool, Postgres};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tracing_actix_web::TracingLogger;

pub async fn run(
    listener: TcpListener,
    pg_pool: Pool<Postgres>,
    settings: Settings,
) -> Result<Server, std::io::Error> {
    let store: Arc<dyn ConversationStore> = Arc::new(PgConversationStore::new(pg_pool));
    let store = web::Data::new(store);

    let completion = connectors::init_completion(&settings.completion)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;

    // one cache for every worker
    let history_cache = web::Data::new(HistoryCache::from_settings(&settings.cache));
    tracing::info!(
        max_conversations = settings.cache.max_conversations,
        max_messages = settings.cache.max_messages,
        idle_ttl_secs = settings.cache.idle_ttl_secs,
        "History cache configured"
    );

    let oauth_http_client = reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
    let oauth_http_client = web::Data::new(oauth_http_client);

    let token_cache = web::Data::new(middleware::authentication::TokenCache::new(
        Duration::from_secs(60),
    ));

    let settings = web::Data::new(settings);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::authentication::Manager::new())
            .wrap(Cors::permissive())
            .wrap(TracingLogger::default())
            .app_data(oauth_http_client.clone())
            .app_data(token_cache.clone())
            .service(web::scope("/health_check").service(routes::health_check))
            .service(
                web::scope("/conversations")
                    .service(routes::conversation::list_handler)
                    .service(routes::conversation::item_handler)
                    .service(routes::conversation::delete_handler),
            )
            .service(web::scope("/chat").service(routes::chat::create_handler))
            .app_data(store.clone())
            .app_data(completion.clone())
            .app_data(history_cache.clone())
            .app_data(settings.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
