mod conversation;
mod message;
pub mod user;

pub use conversation::*;
pub use message::*;
pub use user::*;
