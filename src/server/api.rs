use crate::agent::{ ChatError, ConfigError, SendState };
use crate::auth::{ AuthError, UserIdentity };
use crate::cli::Args;
use crate::llm::LlmProvider;
use crate::models::chat::{ ChatMessage, Notification };
use super::AppState;
use std::error::Error;
use std::net::SocketAddr;
use axum::{
    routing::{ get, post },
    Router,
    Json,
    extract::State,
    response::{ IntoResponse, Response },
    http::{ HeaderMap, StatusCode, header::AUTHORIZATION },
};
use serde::{ Deserialize, Serialize };
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, warn, error };

/// An error as the client sees it: a status and a notification to display.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    notification: Notification,
}

impl ApiError {
    fn new(status: StatusCode, notification: Notification) -> Self {
        Self { status, notification }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    notification: Notification,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { success: false, notification: self.notification })).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let status = match &err {
            ChatError::Config(ConfigError::MissingCredential) => StatusCode::PRECONDITION_FAILED,
            ChatError::Config(ConfigError::MissingUser) => StatusCode::UNAUTHORIZED,
            ChatError::Busy => StatusCode::CONFLICT,
            ChatError::EmptyMessage => StatusCode::BAD_REQUEST,
            ChatError::Load(_) | ChatError::Store(_) | ChatError::Upstream(_) => StatusCode::BAD_GATEWAY,
        };
        ApiError::new(status, err.notification())
    }
}

fn auth_status(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        AuthError::InvalidCredentials | AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
        AuthError::AlreadyRegistered => StatusCode::CONFLICT,
        AuthError::Rejected { status, .. } =>
            StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
        AuthError::Transport(_) => StatusCode::BAD_GATEWAY,
    }
}

#[derive(Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct CredentialRequest {
    pub api_key: String,
    pub provider: Option<String>,
}

#[derive(Serialize)]
struct CredentialStatus {
    configured: bool,
    provider: Option<LlmProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification: Option<Notification>,
}

#[derive(Deserialize)]
pub struct SendRequest {
    pub content: String,
}

#[derive(Serialize)]
struct ConversationView {
    messages: Vec<ChatMessage>,
    is_loading: bool,
    state: SendState,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply: Option<ChatMessage>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/auth/signup", post(sign_up_handler))
        .route("/api/auth/login", post(login_handler))
        .route("/api/auth/logout", post(logout_handler))
        .route(
            "/api/credential",
            get(get_credential_handler).put(put_credential_handler).delete(delete_credential_handler)
        )
        .route("/api/messages", get(list_messages_handler).post(send_message_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_http_server(
    addr: &str,
    state: AppState,
    args: Args
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = addr.parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);

    let app = router(state);

    if args.enable_tls {
        let (cert_path, key_path) = match (&args.tls_cert_path, &args.tls_key_path) {
            (Some(cert), Some(key)) => (cert.clone(), key.clone()),
            _ => {
                error!("--enable-tls was set but the certificate/key paths are incomplete.");
                return Err("TLS enabled without cert/key".into());
            }
        };
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            cert_path,
            key_path
        ).await?;

        tokio::spawn(async move {
            let result = axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await;

            if let Err(e) = result {
                error!("HTTPS server error: {}", e);
            }
        });

        info!("HTTPS server started with TLS enabled");
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
            e
        })?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                error!("HTTP server error: {}", e);
            }
        });

        info!("HTTP server started");
    }

    Ok(())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserIdentity, ApiError> {
    let token = bearer_token(headers).ok_or_else(|| ChatError::from(ConfigError::MissingUser))?;
    state.auth.verify(token).await.map_err(|e| {
        warn!("Rejected bearer token: {}", e);
        ApiError::from(ChatError::from(ConfigError::MissingUser))
    })
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn sign_up_handler(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>
) -> Result<Response, ApiError> {
    if let Some(confirm) = &req.confirm_password {
        if confirm != &req.password {
            return Err(
                ApiError::new(StatusCode::BAD_REQUEST, Notification::error("Las contraseñas no coinciden"))
            );
        }
    }

    match state.auth.sign_up(&req.email, &req.password).await {
        Ok(Some(session)) => Ok((StatusCode::CREATED, Json(session)).into_response()),
        Ok(None) =>
            Ok(
                (
                    StatusCode::ACCEPTED,
                    Json(
                        Notification::info("Registro exitoso", "Revisa tu email para confirmar tu cuenta")
                    ),
                ).into_response()
            ),
        Err(e) => {
            error!("Sign-up failed: {}", e);
            Err(ApiError::new(auth_status(&e), Notification::error_titled("Error de registro", e.to_string())))
        }
    }
}

async fn login_handler(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>
) -> Result<Response, ApiError> {
    match state.auth.sign_in(&req.email, &req.password).await {
        Ok(session) => Ok(Json(session).into_response()),
        Err(e) => {
            warn!("Sign-in failed: {}", e);
            Err(
                ApiError::new(
                    auth_status(&e),
                    Notification::error_titled("Error de inicio de sesión", e.to_string())
                )
            )
        }
    }
}

async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap
) -> Result<StatusCode, ApiError> {
    if let Some(token) = bearer_token(&headers) {
        if let Err(e) = state.auth.sign_out(token).await {
            warn!("Sign-out failed: {}", e);
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn get_credential_handler(
    State(state): State<AppState>,
    headers: HeaderMap
) -> Result<Response, ApiError> {
    authenticate(&state, &headers).await?;
    let current = state.credentials.get();
    Ok(
        Json(CredentialStatus {
            configured: current.is_some(),
            provider: current.map(|c| c.provider),
            notification: None,
        }).into_response()
    )
}

async fn put_credential_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CredentialRequest>
) -> Result<Response, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let api_key = req.api_key.trim();
    if api_key.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, Notification::error("La API Key no puede estar vacía")));
    }
    let provider = match req.provider.as_deref() {
        Some(tag) =>
            Some(
                tag
                    .parse::<LlmProvider>()
                    .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, Notification::error(e.to_string())))?
            ),
        None => None,
    };

    let credential = state.credentials.set(api_key, provider).map_err(|e| {
        error!("Failed to persist API key: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, Notification::error("No se pudo guardar la API Key"))
    })?;
    info!("User {} configured a {} API key", identity.user_id, credential.provider.as_str());

    Ok(
        Json(CredentialStatus {
            configured: true,
            provider: Some(credential.provider),
            notification: Some(
                Notification::info(
                    "API Key configurada",
                    format!("Usando {}", credential.provider.display_name())
                )
            ),
        }).into_response()
    )
}

async fn delete_credential_handler(
    State(state): State<AppState>,
    headers: HeaderMap
) -> Result<StatusCode, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    state.credentials.clear().map_err(|e| {
        error!("Failed to clear API key: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, Notification::error("No se pudo borrar la API Key"))
    })?;
    info!("User {} cleared the API key", identity.user_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn list_messages_handler(
    State(state): State<AppState>,
    headers: HeaderMap
) -> Result<Response, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let agent = state.registry.agent_for(&identity).await;

    agent.load().await?;

    Ok(
        Json(ConversationView {
            messages: agent.messages().await,
            is_loading: agent.is_loading(),
            state: agent.state(),
            reply: None,
        }).into_response()
    )
}

async fn send_message_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SendRequest>
) -> Result<Response, ApiError> {
    let identity = authenticate(&state, &headers).await?;
    let agent = state.registry.agent_for(&identity).await;

    let reply = agent.send_message(&req.content).await?;

    Ok(
        Json(ConversationView {
            messages: agent.messages().await,
            is_loading: agent.is_loading(),
            state: agent.state(),
            reply: Some(reply),
        }).into_response()
    )
}
