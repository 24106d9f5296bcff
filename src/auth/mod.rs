mod local;
mod supabase;

pub use local::LocalAuthProvider;
pub use supabase::SupabaseAuthProvider;

use crate::cli::Args;
use async_trait::async_trait;
use log::info;
use serde::{ Deserialize, Serialize };
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;

/// Who is talking to the service. The access token is forwarded to backends that
/// enforce row-level access.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: String,
    pub access_token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub access_token: String,
}

impl Session {
    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            user_id: self.user_id.clone(),
            access_token: Some(self.access_token.clone()),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Invalid login credentials")]
    InvalidCredentials,
    #[error("User already registered")]
    AlreadyRegistered,
    #[error("session is missing or expired")]
    Unauthorized,
    #[error("{message}")]
    Rejected {
        status: u16,
        message: String,
    },
    #[error("auth provider unreachable: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Transport(err.to_string())
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// `Ok(None)` means the account exists but must be confirmed before a session
    /// is issued.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn verify(&self, access_token: &str) -> Result<UserIdentity, AuthError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;
}

pub fn create_auth_provider(
    args: &Args
) -> Result<Arc<dyn AuthProvider>, Box<dyn Error + Send + Sync>> {
    match args.auth_type.to_lowercase().as_str() {
        "local" => {
            info!("Using in-process authentication");
            Ok(Arc::new(LocalAuthProvider::new(args.auth_secret.clone())))
        }
        "supabase" => {
            let url = args.supabase_url
                .as_deref()
                .ok_or("SUPABASE_URL is required when AUTH_TYPE=supabase")?;
            info!("Using Supabase authentication at {}", url);
            Ok(Arc::new(SupabaseAuthProvider::new(url, &args.supabase_anon_key)?))
        }
        other => Err(format!("Unsupported auth type: {}", other).into()),
    }
}
