use super::{ AuthError, AuthProvider, Session, UserIdentity };
use async_trait::async_trait;
use hmac::{ Hmac, Mac };
use log::{ info, warn };
use sha2::Sha256;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const MIN_PASSWORD_LEN: usize = 6;

struct LocalUser {
    id: String,
    salt: String,
    password_hash: String,
}

/// Accounts and sessions held in process memory, for local runs and tests.
/// Passwords are stored as HMAC-SHA256(secret, salt || password).
pub struct LocalAuthProvider {
    secret: String,
    users: RwLock<HashMap<String, LocalUser>>,
    sessions: RwLock<HashMap<String, (String, String)>>,
}

impl LocalAuthProvider {
    pub fn new(secret: Option<String>) -> Self {
        let secret = secret.filter(|s| !s.is_empty()).unwrap_or_else(|| {
            warn!("AUTH_SECRET not set; generated a per-process secret");
            Uuid::new_v4().to_string()
        });
        Self {
            secret,
            users: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn mac(&self, salt: &str, password: &str) -> Result<HmacSha256, AuthError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).map_err(|e|
            AuthError::InvalidInput(format!("unusable auth secret: {}", e))
        )?;
        mac.update(salt.as_bytes());
        mac.update(password.as_bytes());
        Ok(mac)
    }

    async fn open_session(&self, user_id: &str, email: &str) -> Session {
        let token = Uuid::new_v4().simple().to_string();
        self.sessions
            .write().await
            .insert(token.clone(), (user_id.to_string(), email.to_string()));
        Session {
            user_id: user_id.to_string(),
            email: email.to_string(),
            access_token: token,
        }
    }
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AuthError::InvalidInput("Unable to validate email address: invalid format".into())),
    }
}

#[async_trait]
impl AuthProvider for LocalAuthProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, AuthError> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(
                AuthError::InvalidInput(
                    format!("Password should be at least {} characters.", MIN_PASSWORD_LEN)
                )
            );
        }

        let salt = Uuid::new_v4().simple().to_string();
        let password_hash = hex::encode(self.mac(&salt, password)?.finalize().into_bytes());
        let id = Uuid::new_v4().to_string();

        {
            let mut users = self.users.write().await;
            if users.contains_key(&email) {
                return Err(AuthError::AlreadyRegistered);
            }
            users.insert(email.clone(), LocalUser { id: id.clone(), salt, password_hash });
        }
        info!("Registered local user {}", id);

        Ok(Some(self.open_session(&id, &email).await))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;
        let user_id = {
            let users = self.users.read().await;
            let user = users.get(&email).ok_or(AuthError::InvalidCredentials)?;
            let expected = hex::decode(&user.password_hash).map_err(|_| AuthError::InvalidCredentials)?;
            self.mac(&user.salt, password)?
                .verify_slice(&expected)
                .map_err(|_| AuthError::InvalidCredentials)?;
            user.id.clone()
        };
        Ok(self.open_session(&user_id, &email).await)
    }

    async fn verify(&self, access_token: &str) -> Result<UserIdentity, AuthError> {
        let sessions = self.sessions.read().await;
        let (user_id, _) = sessions.get(access_token).ok_or(AuthError::Unauthorized)?;
        Ok(UserIdentity {
            user_id: user_id.clone(),
            access_token: Some(access_token.to_string()),
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        self.sessions.write().await.remove(access_token);
        Ok(())
    }
}
