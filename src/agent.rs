use crate::auth::UserIdentity;
use crate::credential::CredentialStore;
use crate::history::{ MessageStore, StoreError };
use crate::llm::chat::{ ChatTurn, ProviderSet };
use crate::llm::UpstreamError;
use crate::models::chat::{ ChatMessage, Notification, Role };

use log::{ debug, info, warn, error };
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{ Arc, RwLock as StdRwLock };
use thiserror::Error;
use tokio::sync::{ Mutex, RwLock };

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no API key configured")]
    MissingCredential,
    #[error("no authenticated user")]
    MissingUser,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not load messages: {0}")]
    Load(#[source] StoreError),
    #[error("could not save message: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("a message is already being sent")]
    Busy,
    #[error("message is empty")]
    EmptyMessage,
}

impl ChatError {
    /// What the user gets to see; details stay in the log.
    pub fn notification(&self) -> Notification {
        match self {
            ChatError::Config(ConfigError::MissingCredential) =>
                Notification::error("Por favor, configura tu API Key primero"),
            ChatError::Config(ConfigError::MissingUser) =>
                Notification::error("Usuario no autenticado"),
            ChatError::Load(_) => Notification::error("No se pudieron cargar los mensajes"),
            ChatError::Store(_) => Notification::error("No se pudo guardar el mensaje"),
            ChatError::Upstream(_) =>
                Notification::error(
                    "No se pudo obtener respuesta del asistente. Verifica tu API Key."
                ),
            ChatError::Busy =>
                Notification::error("Espera a que termine la respuesta en curso"),
            ChatError::EmptyMessage => Notification::error("El mensaje está vacío"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SendState {
    Idle,
    Sending,
    Failed,
}

/// Shared collaborators every conversation needs.
#[derive(Clone)]
pub struct AgentContext {
    pub store: Arc<dyn MessageStore>,
    pub providers: Arc<ProviderSet>,
    pub credentials: Arc<CredentialStore>,
}

/// Runs the turns of one user's conversation and keeps its in-memory history.
pub struct ChatAgent {
    context: AgentContext,
    user: StdRwLock<Option<UserIdentity>>,
    messages: RwLock<Vec<ChatMessage>>,
    state: StdRwLock<SendState>,
    in_flight: Mutex<()>,
}

impl ChatAgent {
    pub fn new(context: AgentContext, user: Option<UserIdentity>) -> Self {
        Self {
            context,
            user: StdRwLock::new(user),
            messages: RwLock::new(Vec::new()),
            state: StdRwLock::new(SendState::Idle),
            in_flight: Mutex::new(()),
        }
    }

    pub fn identity(&self) -> Option<UserIdentity> {
        self.user.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Swaps in a fresher access token for the same user.
    pub fn set_identity(&self, user: Option<UserIdentity>) {
        *self.user.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = user;
    }

    pub fn state(&self) -> SendState {
        *self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_loading(&self) -> bool {
        self.state() == SendState::Sending
    }

    fn set_state(&self, state: SendState) {
        *self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.read().await.clone()
    }

    /// Replaces the in-memory history with the stored one. On failure the
    /// previous list is kept, and while a send is outstanding the refresh is
    /// skipped since the in-memory list is already ahead of the store.
    pub async fn load(&self) -> Result<(), ChatError> {
        let user = self.identity().ok_or(ConfigError::MissingUser)?;
        let _guard = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Send in progress for user {}; keeping the current list", user.user_id);
                return Ok(());
            }
        };
        match self.context.store.list(&user).await {
            Ok(history) => {
                info!("Loaded {} messages for user {}", history.len(), user.user_id);
                *self.messages.write().await = history;
                Ok(())
            }
            Err(e) => {
                error!("Error loading messages for user {}: {}", user.user_id, e);
                Err(ChatError::Load(e))
            }
        }
    }

    /// One user turn: store the message, reload history, ask the provider and
    /// store its reply. Returns the stored assistant message.
    ///
    /// Nothing is rolled back on failure; a stored user message stays stored.
    pub async fn send_message(&self, content: &str) -> Result<ChatMessage, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let user = self.identity().ok_or(ConfigError::MissingUser)?;
        let credential = self.context.credentials.get().ok_or(ConfigError::MissingCredential)?;

        let _guard = self.in_flight.try_lock().map_err(|_| {
            warn!("Rejected concurrent send for user {}", user.user_id);
            ChatError::Busy
        })?;
        self.set_state(SendState::Sending);

        let result = self.exchange(&user, &credential, content).await;
        match &result {
            Ok(_) => self.set_state(SendState::Idle),
            Err(e) => {
                error!("Error sending message for user {}: {}", user.user_id, e);
                self.set_state(SendState::Failed);
            }
        }
        result
    }

    async fn exchange(
        &self,
        user: &UserIdentity,
        credential: &crate::credential::Credential,
        content: &str
    ) -> Result<ChatMessage, ChatError> {
        let stored_user = self.context.store.append(user, Role::User, content).await?;
        self.messages.write().await.push(stored_user.clone());

        // Other sessions of the same user may have written in the meantime.
        let history = self.context.store.list(user).await?;
        *self.messages.write().await = history.clone();

        let turns: Vec<ChatTurn> = history
            .iter()
            .filter(|m| m.id != stored_user.id)
            .map(ChatTurn::from)
            .collect();

        let provider = self.context.providers.select(credential.provider);
        let reply = provider.complete(&turns, content, credential).await?;

        let stored_reply = self.context.store.append(user, Role::Assistant, &reply).await?;
        self.messages.write().await.push(stored_reply.clone());
        Ok(stored_reply)
    }
}

/// Lazily created conversation per authenticated user.
pub struct AgentRegistry {
    context: AgentContext,
    agents: Mutex<HashMap<String, Arc<ChatAgent>>>,
}

impl AgentRegistry {
    pub fn new(context: AgentContext) -> Self {
        Self {
            context,
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// The user's agent, with the caller's token taking over for later store calls.
    pub async fn agent_for(&self, identity: &UserIdentity) -> Arc<ChatAgent> {
        let mut agents = self.agents.lock().await;
        match agents.get(&identity.user_id) {
            Some(agent) => {
                agent.set_identity(Some(identity.clone()));
                agent.clone()
            }
            None => {
                info!("Starting conversation for user {}", identity.user_id);
                let agent = Arc::new(ChatAgent::new(self.context.clone(), Some(identity.clone())));
                agents.insert(identity.user_id.clone(), agent.clone());
                agent
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;
    use crate::history::MemoryMessageStore;
    use crate::llm::chat::{ testing, ChatProvider };
    use crate::llm::chat::openai::OpenAIChatClient;
    use crate::llm::chat::gemini::GeminiChatClient;
    use crate::llm::LlmProvider;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use serde_json::json;
    use tokio::sync::Notify;

    fn alice() -> UserIdentity {
        UserIdentity { user_id: "alice".into(), access_token: None }
    }

    fn providers_at(base_url: &str) -> Arc<ProviderSet> {
        Arc::new(
            ProviderSet::new(
                Arc::new(OpenAIChatClient::new(None, Some(base_url.to_string())).unwrap()),
                Arc::new(GeminiChatClient::new(None, Some(base_url.to_string())).unwrap())
            )
        )
    }

    fn context(store: Arc<dyn MessageStore>, providers: Arc<ProviderSet>, key: Option<&str>) -> AgentContext {
        let credentials = Arc::new(CredentialStore::in_memory());
        if let Some(key) = key {
            credentials.set(key, Some(LlmProvider::OpenAI)).unwrap();
        }
        AgentContext { store, providers, credentials }
    }

    fn openai_reply(text: &str) -> serde_json::Value {
        json!({ "choices": [{ "message": { "role": "assistant", "content": text } }] })
    }

    #[tokio::test]
    async fn missing_credential_touches_neither_network_nor_store() {
        let upstream = testing::spawn(StatusCode::OK, openai_reply("nunca")).await;
        let store = Arc::new(MemoryMessageStore::default());
        let agent = ChatAgent::new(context(store.clone(), providers_at(&upstream.base_url), None), Some(alice()));

        let err = agent.send_message("¿Qué es un contrato?").await.unwrap_err();
        assert!(matches!(err, ChatError::Config(ConfigError::MissingCredential)));
        assert_eq!(err.notification().description, "Por favor, configura tu API Key primero");
        assert_eq!(upstream.hits(), 0);
        assert!(store.list(&alice()).await.unwrap().is_empty());
        assert_eq!(agent.state(), SendState::Idle);
    }

    #[tokio::test]
    async fn missing_user_is_a_config_error() {
        let upstream = testing::spawn(StatusCode::OK, openai_reply("nunca")).await;
        let store = Arc::new(MemoryMessageStore::default());
        let agent = ChatAgent::new(context(store, providers_at(&upstream.base_url), Some("sk-test")), None);

        let err = agent.send_message("Hola").await.unwrap_err();
        assert!(matches!(err, ChatError::Config(ConfigError::MissingUser)));
        assert_eq!(upstream.hits(), 0);
    }

    #[tokio::test]
    async fn successful_turn_stores_user_then_assistant() {
        let upstream = testing::spawn(StatusCode::OK, openai_reply("¡Hola! ¿En qué puedo ayudarte?")).await;
        let store = Arc::new(MemoryMessageStore::default());
        let agent = ChatAgent::new(
            context(store.clone(), providers_at(&upstream.base_url), Some("sk-test")),
            Some(alice())
        );
        agent.load().await.unwrap();
        let before = agent.messages().await.len();

        let reply = agent.send_message("Hola").await.unwrap();
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.content, "¡Hola! ¿En qué puedo ayudarte?");

        let rows = store.list(&alice()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].role, rows[0].content.as_str()), (Role::User, "Hola"));
        assert_eq!((rows[1].role, rows[1].content.as_str()), (Role::Assistant, reply.content.as_str()));

        let messages = agent.messages().await;
        assert_eq!(messages.len(), before + 2);
        assert_eq!(messages[before].role, Role::User);
        assert_eq!(messages[before + 1].role, Role::Assistant);
        assert_eq!(agent.state(), SendState::Idle);
        assert!(!agent.is_loading());
        assert_eq!(upstream.hits(), 1);
    }

    #[tokio::test]
    async fn history_is_sent_without_duplicating_the_new_turn() {
        let upstream = testing::spawn(StatusCode::OK, openai_reply("respuesta")).await;
        let store = Arc::new(MemoryMessageStore::default());
        let agent = ChatAgent::new(
            context(store.clone(), providers_at(&upstream.base_url), Some("sk-test")),
            Some(alice())
        );

        agent.send_message("primera").await.unwrap();
        agent.send_message("  segunda  ").await.unwrap();

        let body = upstream.last_request().unwrap().body;
        let sent: Vec<(String, String)> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| (m["role"].as_str().unwrap().to_string(), m["content"].as_str().unwrap().to_string()))
            .collect();
        assert_eq!(
            sent[1..].to_vec(),
            vec![
                ("user".to_string(), "primera".to_string()),
                ("assistant".to_string(), "respuesta".to_string()),
                ("user".to_string(), "segunda".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn upstream_rejection_keeps_only_the_user_message() {
        let upstream = testing::spawn(StatusCode::UNAUTHORIZED, json!({ "error": "invalid key" })).await;
        let store = Arc::new(MemoryMessageStore::default());
        let agent = ChatAgent::new(
            context(store.clone(), providers_at(&upstream.base_url), Some("sk-bad")),
            Some(alice())
        );
        let before = agent.messages().await.len();

        let err = agent.send_message("Hola").await.unwrap_err();
        assert!(matches!(err, ChatError::Upstream(UpstreamError::Status(401))));
        assert_eq!(
            err.notification().description,
            "No se pudo obtener respuesta del asistente. Verifica tu API Key."
        );

        let rows = store.list(&alice()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].role, Role::User);
        assert_eq!(agent.messages().await.len(), before + 1);
        assert_eq!(agent.state(), SendState::Failed);
    }

    #[tokio::test]
    async fn server_error_never_appends_an_assistant_message() {
        let upstream = testing::spawn(StatusCode::INTERNAL_SERVER_ERROR, json!({})).await;
        let store = Arc::new(MemoryMessageStore::default());
        let agent = ChatAgent::new(
            context(store.clone(), providers_at(&upstream.base_url), Some("sk-test")),
            Some(alice())
        );

        let err = agent.send_message("Hola").await.unwrap_err();
        assert!(matches!(err, ChatError::Upstream(UpstreamError::Status(500))));
        let rows = store.list(&alice()).await.unwrap();
        assert!(rows.iter().all(|m| m.role == Role::User));
        assert_eq!(agent.state(), SendState::Failed);
    }

    #[tokio::test]
    async fn blank_content_is_rejected_up_front() {
        let upstream = testing::spawn(StatusCode::OK, openai_reply("x")).await;
        let store = Arc::new(MemoryMessageStore::default());
        let agent = ChatAgent::new(
            context(store.clone(), providers_at(&upstream.base_url), Some("sk-test")),
            Some(alice())
        );

        assert!(matches!(agent.send_message("   \n").await, Err(ChatError::EmptyMessage)));
        assert_eq!(upstream.hits(), 0);
        assert!(store.list(&alice()).await.unwrap().is_empty());
    }

    struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        async fn list(&self, _user: &UserIdentity) -> Result<Vec<ChatMessage>, StoreError> {
            Err(StoreError::Transport("connection refused".into()))
        }

        async fn append(
            &self,
            _user: &UserIdentity,
            _role: Role,
            _content: &str
        ) -> Result<ChatMessage, StoreError> {
            Err(StoreError::Rejected { status: 401, message: "JWT expired".into() })
        }
    }

    #[tokio::test]
    async fn store_failure_fails_the_turn_before_the_upstream_call() {
        let upstream = testing::spawn(StatusCode::OK, openai_reply("x")).await;
        let agent = ChatAgent::new(
            context(Arc::new(FailingStore), providers_at(&upstream.base_url), Some("sk-test")),
            Some(alice())
        );

        let err = agent.send_message("Hola").await.unwrap_err();
        assert!(matches!(err, ChatError::Store(StoreError::Rejected { status: 401, .. })));
        assert_eq!(err.notification().description, "No se pudo guardar el mensaje");
        assert_eq!(upstream.hits(), 0);
        assert_eq!(agent.state(), SendState::Failed);
    }

    #[tokio::test]
    async fn failed_load_keeps_previous_messages() {
        let upstream = testing::spawn(StatusCode::OK, openai_reply("respuesta")).await;
        let memory = Arc::new(MemoryMessageStore::default());
        let agent = ChatAgent::new(
            context(memory, providers_at(&upstream.base_url), Some("sk-test")),
            Some(alice())
        );
        agent.send_message("Hola").await.unwrap();
        let kept = agent.messages().await;

        let broken = ChatAgent::new(
            context(Arc::new(FailingStore), providers_at(&upstream.base_url), Some("sk-test")),
            Some(alice())
        );
        *broken.messages.write().await = kept.clone();
        let err = broken.load().await.unwrap_err();
        assert!(matches!(err, ChatError::Load(_)));
        assert_eq!(err.notification().description, "No se pudieron cargar los mensajes");
        assert_eq!(broken.messages().await, kept);
    }

    /// Blocks inside `complete` until released.
    struct GatedProvider {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ChatProvider for GatedProvider {
        async fn complete(
            &self,
            _history: &[ChatTurn],
            _prompt: &str,
            _credential: &Credential
        ) -> Result<String, UpstreamError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok("listo".into())
        }

        fn provider(&self) -> LlmProvider {
            LlmProvider::OpenAI
        }

        fn model(&self) -> &str {
            "gated"
        }
    }

    #[tokio::test]
    async fn second_send_while_one_is_outstanding_is_busy() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let gated: Arc<dyn ChatProvider> = Arc::new(GatedProvider {
            entered: entered.clone(),
            release: release.clone(),
        });
        let providers = Arc::new(ProviderSet::new(gated.clone(), gated));
        let store = Arc::new(MemoryMessageStore::default());
        let agent = Arc::new(
            ChatAgent::new(context(store.clone(), providers, Some("sk-test")), Some(alice()))
        );

        let first = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.send_message("primera").await })
        };
        entered.notified().await;
        assert!(agent.is_loading());

        let err = agent.send_message("segunda").await.unwrap_err();
        assert!(matches!(err, ChatError::Busy));

        release.notify_one();
        let reply = first.await.unwrap().unwrap();
        assert_eq!(reply.content, "listo");
        assert_eq!(agent.state(), SendState::Idle);

        let rows = store.list(&alice()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].content, "primera");
    }

    #[tokio::test]
    async fn load_during_a_send_keeps_the_reply() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let gated: Arc<dyn ChatProvider> = Arc::new(GatedProvider {
            entered: entered.clone(),
            release: release.clone(),
        });
        let providers = Arc::new(ProviderSet::new(gated.clone(), gated));
        let store = Arc::new(MemoryMessageStore::default());
        let agent = Arc::new(
            ChatAgent::new(context(store.clone(), providers, Some("sk-test")), Some(alice()))
        );

        let sending = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.send_message("Hola").await })
        };
        entered.notified().await;

        agent.load().await.unwrap();
        assert_eq!(agent.messages().await.len(), 1);

        release.notify_one();
        let reply = sending.await.unwrap().unwrap();

        let messages = agent.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages.last().map(|m| m.id.as_str()), Some(reply.id.as_str()));

        agent.load().await.unwrap();
        assert_eq!(agent.messages().await, store.list(&alice()).await.unwrap());
    }

    #[tokio::test]
    async fn registry_reuses_the_agent_and_refreshes_the_token() {
        let upstream = testing::spawn(StatusCode::OK, openai_reply("x")).await;
        let registry = AgentRegistry::new(
            context(Arc::new(MemoryMessageStore::default()), providers_at(&upstream.base_url), None)
        );

        let first = registry.agent_for(&UserIdentity { user_id: "alice".into(), access_token: Some("t1".into()) }).await;
        let second = registry.agent_for(&UserIdentity { user_id: "alice".into(), access_token: Some("t2".into()) }).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.identity().unwrap().access_token.as_deref(), Some("t2"));

        let other = registry.agent_for(&UserIdentity { user_id: "bob".into(), access_token: None }).await;
        assert!(!Arc::ptr_eq(&first, &other));
    }
}
