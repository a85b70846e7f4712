pub mod chat;
pub mod conversation;
pub mod health_checks;

pub use health_checks::*;
