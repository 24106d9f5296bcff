use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::UserIdentity;
use crate::history::{ MessageStore, StoreError };
use crate::models::chat::{ ChatMessage, Role };

#[derive(Default)]
pub struct MemoryMessageStore {
    rows: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn list(&self, user: &UserIdentity) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self.rows.read().await.get(&user.user_id).cloned().unwrap_or_default())
    }

    async fn append(
        &self,
        user: &UserIdentity,
        role: Role,
        content: &str
    ) -> Result<ChatMessage, StoreError> {
        let mut rows = self.rows.write().await;
        let history = rows.entry(user.user_id.clone()).or_default();

        // Clock steps backwards must not reorder the history.
        let now = Utc::now();
        let created_at = match history.last() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        };

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.to_string(),
            created_at,
        };
        history.push(message.clone());
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserIdentity {
        UserIdentity { user_id: id.into(), access_token: None }
    }

    #[tokio::test]
    async fn list_returns_appends_in_creation_order() {
        let store = MemoryMessageStore::default();
        let alice = user("alice");
        let contents = ["uno", "dos", "tres", "cuatro"];
        for (i, content) in contents.iter().enumerate() {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            let stored = store.append(&alice, role, content).await.unwrap();
            assert_eq!(stored.content, *content);
            assert_eq!(stored.role, role);
        }

        let listed = store.list(&alice).await.unwrap();
        assert_eq!(
            listed.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            contents.to_vec()
        );
        assert!(listed.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn histories_are_isolated_per_user() {
        let store = MemoryMessageStore::default();
        store.append(&user("alice"), Role::User, "hola").await.unwrap();

        assert!(store.list(&user("bob")).await.unwrap().is_empty());
        assert_eq!(store.list(&user("alice")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn appended_messages_get_distinct_ids() {
        let store = MemoryMessageStore::default();
        let a = store.append(&user("alice"), Role::User, "a").await.unwrap();
        let b = store.append(&user("alice"), Role::User, "a").await.unwrap();
        assert_ne!(a.id, b.id);
    }
}
