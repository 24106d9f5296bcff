use serde::{ Serialize, Deserialize };

use super::chat::{ ChatMessage, Notification };

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "chat")] Chat {
        content: String,
    },
    #[serde(rename = "history")]
    History,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "response")] Response {
        message: ChatMessage,
    },
    #[serde(rename = "history")] History {
        messages: Vec<ChatMessage>,
    },
    #[serde(rename = "error")] Error {
        notification: Notification,
    },
    #[serde(rename = "processing")]
    Processing,
}
