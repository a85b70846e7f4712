use parley::configuration::{get_configuration, DatabaseSettings};
use serde_json::json;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use std::net::TcpListener;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_TOKEN: &str = "test-token";
pub const TEST_USER_ID: &str = "test_user_id";

pub struct TestApp {
    pub address: String,
    pub db_pool: PgPool,
    pub completion_server: MockServer,
    pub auth_server: MockServer,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn post_chat(&self, body: serde_json::Value) -> reqwest::Response {
        reqwest::Client::new()
            .post(self.url("/chat"))
            .bearer_auth(TEST_TOKEN)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(self.url(path))
            .bearer_auth(TEST_TOKEN)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Bodies of the streamed completion requests the server made, in order.
    pub async fn completion_requests(&self) -> Vec<serde_json::Value> {
        self.completion_server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|request| serde_json::from_slice::<serde_json::Value>(&request.body).ok())
            .filter(|body| body["stream"] == json!(true))
            .collect()
    }
}

pub fn sse_body(chunks: &[&str]) -> String {
    let mut body = String::from(": OPENROUTER PROCESSING\n\n");
    for chunk in chunks {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": chunk}}]})
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

pub async fn mount_completion(server: &MockServer, chunks: &[&str], title: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body(chunks), "text/event-stream"),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": title}}]
        })))
        .mount(server)
        .await;
}

async fn mount_auth(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", format!("Bearer {}", TEST_TOKEN).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user": {
                "_id": TEST_USER_ID,
                "first_name": "Test",
                "last_name": "User",
                "email": "test@example.com",
                "email_confirmed": true
            }
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(10)
        .mount(server)
        .await;
}

/// Server backed by a fresh database. `None` when PostgreSQL is not reachable.
pub async fn spawn_app() -> Option<TestApp> {
    let mut configuration = get_configuration().expect("Failed to get configuration");

    let auth_server = MockServer::start().await;
    mount_auth(&auth_server).await;
    configuration.auth_url = format!("{}/me", auth_server.uri());

    let completion_server = MockServer::start().await;
    configuration.completion.base_url = completion_server.uri();
    configuration.completion.api_key = Some("test-key".to_string());

    configuration.database.database_name = uuid::Uuid::new_v4().to_string();
    let connection_pool = match configure_database(&configuration.database).await {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("Skipping tests: failed to connect to postgres: {}", err);
            return None;
        }
    };

    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let server = parley::startup::run(listener, connection_pool.clone(), configuration)
        .await
        .expect("Failed to bind address.");
    let _ = tokio::spawn(server);

    Some(TestApp {
        address,
        db_pool: connection_pool,
        completion_server,
        auth_server,
    })
}

pub async fn configure_database(config: &DatabaseSettings) -> Result<PgPool, sqlx::Error> {
    let mut connection = PgConnection::connect(&config.connection_string_without_db()).await?;

    connection
        .execute(format!(r#"CREATE DATABASE "{}""#, config.database_name).as_str())
        .await?;

    let connection_pool = PgPool::connect(&config.connection_string()).await?;

    sqlx::migrate!("./migrations").run(&connection_pool).await?;

    Ok(connection_pool)
}
