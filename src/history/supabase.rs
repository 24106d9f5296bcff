use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use log::warn;
use reqwest::{ Client as HttpClient, RequestBuilder, Response };
use serde::{ Deserialize, Serialize };
use serde_json::Value;
use url::Url;

use crate::auth::UserIdentity;
use crate::history::{ sort_chronologically, MessageStore, StoreError };
use crate::models::chat::{ ChatMessage, Role };

/// Messages table behind Supabase's PostgREST endpoint (`/rest/v1/<table>`).
pub struct SupabaseMessageStore {
    http: HttpClient,
    table_url: Url,
    anon_key: String,
}

#[derive(Serialize)]
struct NewRow<'a> {
    user_id: &'a str,
    role: Role,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessageRow {
    id: Value,
    role: Role,
    content: String,
    created_at: DateTime<Utc>,
}

impl From<MessageRow> for ChatMessage {
    fn from(row: MessageRow) -> Self {
        let id = match row.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        ChatMessage {
            id,
            role: row.role,
            content: row.content,
            created_at: row.created_at,
        }
    }
}

impl SupabaseMessageStore {
    pub fn new(url: &str, anon_key: &str, table: &str) -> Result<Self, StoreError> {
        let mut base = Url::parse(url).map_err(|e| StoreError::Transport(format!("bad store URL: {}", e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let table_url = base
            .join(&format!("rest/v1/{}", table))
            .map_err(|e| StoreError::Transport(format!("bad store URL: {}", e)))?;
        Ok(Self {
            http: HttpClient::builder().build()?,
            table_url,
            anon_key: anon_key.to_string(),
        })
    }

    // Row-level security keys off the caller's JWT; the anon key stands in when
    // there is none.
    fn authorize(&self, request: RequestBuilder, user: &UserIdentity) -> RequestBuilder {
        let token = user.access_token.as_deref().unwrap_or(&self.anon_key);
        request.header("apikey", &self.anon_key).bearer_auth(token)
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        warn!("Supabase store rejected request ({}): {}", status, message);
        Err(StoreError::Rejected { status: status.as_u16(), message })
    }
}

#[async_trait]
impl MessageStore for SupabaseMessageStore {
    async fn list(&self, user: &UserIdentity) -> Result<Vec<ChatMessage>, StoreError> {
        let mut url = self.table_url.clone();
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("user_id", &format!("eq.{}", user.user_id))
            .append_pair("order", "created_at.asc");

        let response = self.authorize(self.http.get(url), user).send().await?;
        let rows: Vec<MessageRow> = Self::check(response).await?.json().await?;

        let mut messages: Vec<ChatMessage> = rows.into_iter().map(ChatMessage::from).collect();
        sort_chronologically(&mut messages);
        Ok(messages)
    }

    async fn append(
        &self,
        user: &UserIdentity,
        role: Role,
        content: &str
    ) -> Result<ChatMessage, StoreError> {
        let row = NewRow { user_id: &user.user_id, role, content };
        let request = self.http
            .post(self.table_url.clone())
            .header("Prefer", "return=representation")
            .json(&row);

        let response = self.authorize(request, user).send().await?;
        let mut rows: Vec<MessageRow> = Self::check(response).await?.json().await?;
        if rows.is_empty() {
            return Err(StoreError::Decode("insert returned no row".into()));
        }
        Ok(rows.swap_remove(0).into())
    }
}
