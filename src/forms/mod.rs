pub mod chat;
pub mod user;

pub use chat::*;
pub use user::*;
