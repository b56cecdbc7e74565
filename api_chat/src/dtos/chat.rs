use rag::assistant::ChatMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest chat title derived from the opening message, in characters.
pub const TITLE_MAX_CHARS: usize = 80;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub id: Uuid,
    pub messages: Vec<IncomingMessage>,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub chat_id: Uuid,
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatIdQuery {
    pub id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    #[serde(rename = "newName")]
    pub new_name: String,
}

impl ChatRequest {
    pub fn last_user_message(&self) -> Option<&IncomingMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user" && !m.content.trim().is_empty())
    }

    /// Conversation as sent by the client, limited to user and assistant turns.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter_map(|m| match m.role.as_str() {
                "user" => Some(ChatMessage::user(&m.content)),
                "assistant" => Some(ChatMessage::assistant(&m.content)),
                _ => None,
            })
            .collect()
    }
}

pub fn chat_title(message: &str) -> String {
    message.trim().chars().take(TITLE_MAX_CHARS).collect()
}
