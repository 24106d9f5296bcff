use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use log::error;
use redis::{ Client, AsyncCommands };
use serde::{ Serialize, Deserialize };
use uuid::Uuid;

use crate::auth::UserIdentity;
use crate::history::{ MessageStore, StoreError };
use crate::models::chat::{ ChatMessage, Role };

#[derive(Serialize, Deserialize)]
struct StoredMessage {
    id: String,
    role: Role,
    content: String,
    created_at: DateTime<Utc>,
}

/// Decodes LRANGE output, keeping list order. RPUSH order is the
/// conversation order even if the wall clock stepped back between appends.
fn decode_entries(json_entries: &[String]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(json_entries.len());
    for json_entry in json_entries {
        match serde_json::from_str::<StoredMessage>(json_entry) {
            Ok(msg) => {
                messages.push(ChatMessage {
                    id: msg.id,
                    role: msg.role,
                    content: msg.content,
                    created_at: msg.created_at,
                });
            }
            Err(e) => {
                error!("Error parsing history entry: {}", e);
            }
        }
    }
    messages
}

/// One Redis list per user, oldest message at the head.
pub struct RedisMessageStore {
    client: Client,
    key_prefix: String,
}

impl RedisMessageStore {
    pub fn new(host: &str, key_prefix: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(host)?,
            key_prefix: key_prefix.to_string(),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn key(&self, user: &UserIdentity) -> String {
        format!("{}{}", self.key_prefix, user.user_id)
    }
}

#[async_trait]
impl MessageStore for RedisMessageStore {
    async fn list(&self, user: &UserIdentity) -> Result<Vec<ChatMessage>, StoreError> {
        let mut conn = self.get_connection().await?;
        let json_entries: Vec<String> = conn.lrange(self.key(user), 0, -1).await?;
        Ok(decode_entries(&json_entries))
    }

    async fn append(
        &self,
        user: &UserIdentity,
        role: Role,
        content: &str
    ) -> Result<ChatMessage, StoreError> {
        let mut conn = self.get_connection().await?;

        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };

        let json_msg = serde_json::to_string(&message)?;
        let _: i64 = conn.rpush(self.key(user), &json_msg).await?;

        Ok(ChatMessage {
            id: message.id,
            role: message.role,
            content: message.content,
            created_at: message.created_at,
        })
    }
}
