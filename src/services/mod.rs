pub mod chat;
pub mod history_cache;
pub mod store;

pub use chat::{ChatContext, ChatError, Exchange, Relay};
pub use history_cache::{CachedHistory, HistoryCache};
pub use store::{ConversationStore, PgConversationStore};
