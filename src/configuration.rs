use serde;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub app_port: u16,
    pub app_host: String,
    pub auth_url: String,
    pub completion: CompletionSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database_name: String,
}

/// OpenAI-compatible completion endpoint (OpenRouter by default).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CompletionSettings {
    /// Base URL without the `/chat/completions` suffix
    pub base_url: String,
    /// Model used when the chat request does not name one
    pub default_model: String,
    /// Model used for conversation titles
    pub title_model: String,
    /// Models a chat request may ask for
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "CompletionSettings::default_timeout")]
    pub timeout_secs: u64,
    /// Loaded from OPENROUTER_API_KEY
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl CompletionSettings {
    fn default_timeout() -> u64 {
        120
    }

    pub fn is_supported(&self, model: &str) -> bool {
        model == self.default_model || self.models.iter().any(|m| m == model)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CacheSettings {
    pub max_conversations: usize,
    pub max_messages: usize,
    pub idle_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_conversations: 1000,
            max_messages: 200,
            idle_ttl_secs: 3600,
        }
    }
}

impl DatabaseSettings {
    // Connection string: postgresql://<username>:<password>@<host>:<port>/<database_name>
    pub fn connection_string(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name,
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port,
        )
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // configuration.yaml first, then PARLEY__SECTION__KEY overrides
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration"))
        .add_source(
            config::Environment::with_prefix("PARLEY")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    let mut config: Settings = settings.try_deserialize()?;

    config.completion.api_key = std::env::var("OPENROUTER_API_KEY").ok();

    Ok(config)
}

#[cfg(test)]
impl Settings {
    pub(crate) fn for_tests(auth_url: &str) -> Self {
        Settings {
            database: DatabaseSettings {
                username: "postgres".to_string(),
                password: "postgres".to_string(),
                host: "localhost".to_string(),
                port: 5432,
                database_name: "parley".to_string(),
            },
            app_port: 0,
            app_host: "127.0.0.1".to_string(),
            auth_url: auth_url.to_string(),
            completion: CompletionSettings {
                base_url: "http://127.0.0.1:1".to_string(),
                default_model: "openai/gpt-4o-mini".to_string(),
                title_model: "openai/gpt-4o-mini".to_string(),
                models: vec!["openai/gpt-4o".to_string()],
                timeout_secs: 5,
                api_key: None,
            },
            cache: CacheSettings::default(),
        }
    }
}
