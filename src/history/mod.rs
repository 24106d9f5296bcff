mod memory;
mod redis;
mod supabase;

pub use memory::MemoryMessageStore;
pub use self::redis::RedisMessageStore;
pub use supabase::SupabaseMessageStore;

use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;
use crate::auth::UserIdentity;
use crate::cli::Args;
use crate::models::chat::{ ChatMessage, Role };

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message store unreachable: {0}")]
    Transport(String),
    #[error("message store rejected the request ({status}): {message}")]
    Rejected {
        status: u16,
        message: String,
    },
    #[error("message store returned an unreadable record: {0}")]
    Decode(String),
}

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        StoreError::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else {
            StoreError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

/// Append-only message history keyed by user.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Every message of `user`, oldest first.
    async fn list(&self, user: &UserIdentity) -> Result<Vec<ChatMessage>, StoreError>;

    /// Persists one message and returns it with its store-assigned id and timestamp.
    async fn append(
        &self,
        user: &UserIdentity,
        role: Role,
        content: &str
    ) -> Result<ChatMessage, StoreError>;
}

pub fn create_message_store(
    args: &Args
) -> Result<Arc<dyn MessageStore>, Box<dyn Error + Send + Sync>> {
    match args.store_type.to_lowercase().as_str() {
        "memory" => Ok(Arc::new(MemoryMessageStore::default())),
        "redis" => {
            let store = RedisMessageStore::new(&args.store_host, &args.store_redis_prefix)?;
            Ok(Arc::new(store))
        }
        "supabase" => {
            let url = args.supabase_url
                .as_deref()
                .ok_or("SUPABASE_URL is required when STORE_TYPE=supabase")?;
            let store = SupabaseMessageStore::new(url, &args.supabase_anon_key, &args.supabase_table)?;
            Ok(Arc::new(store))
        }
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported message store type: {}", args.store_type)
                    )
                )
            ),
    }
}

pub fn initialize_message_store(
    args: &Args
) -> Result<Arc<dyn MessageStore>, Box<dyn Error + Send + Sync>> {
    match args.store_type.to_lowercase().as_str() {
        "redis" => info!("Chat history will be stored in: redis at {}", args.store_host),
        "supabase" =>
            info!(
                "Chat history will be stored in: supabase table '{}' at {}",
                args.supabase_table,
                args.supabase_url.as_deref().unwrap_or("<unset>")
            ),
        other => info!("Chat history will be stored in: {}", other),
    }
    create_message_store(args)
}

/// Stable sort by creation time so equal timestamps keep insertion order.
pub(crate) fn sort_chronologically(messages: &mut [ChatMessage]) {
    messages.sort_by_key(|m| m.created_at);
}
