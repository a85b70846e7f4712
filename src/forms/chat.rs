use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use uuid::Uuid;

/// Characters allowed in one chat message.
pub const MAX_MESSAGE_LENGTH: usize = 10_000;

/// Upper bound on a chat request body: a maximal message with every
/// character escaped as a surrogate pair, plus room for the other fields.
pub const MAX_BODY_BYTES: usize = MAX_MESSAGE_LENGTH * 12 + 4096;

#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateChat {
    pub conversation_id: Option<Uuid>,
    #[validate(min_length = 1)]
    pub message: String,
    #[validate(min_length = 1)]
    #[validate(max_length = 256)]
    pub model: Option<String>,
}

impl CreateChat {
    /// Parse and validate a raw request body. Any failure collapses into a
    /// single message since the caller only reports "Incorrect inputs".
    pub fn parse(body: &[u8]) -> Result<Self, String> {
        let form: CreateChat = serde_json::from_slice(body).map_err(|err| err.to_string())?;
        form.validate().map_err(|err| err.to_string())?;
        if form.message.trim().is_empty() {
            return Err("message is blank".to_string());
        }
        if form.message.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(format!("message exceeds {} characters", MAX_MESSAGE_LENGTH));
        }
        Ok(form)
    }
}
