use super::{ AuthError, AuthProvider, Session, UserIdentity };
use async_trait::async_trait;
use log::{ info, warn };
use reqwest::{ Client as HttpClient, Response, StatusCode };
use serde::{ Deserialize, Serialize };
use std::error::Error;
use url::Url;

/// Supabase GoTrue client (`/auth/v1/*`).
pub struct SupabaseAuthProvider {
    http: HttpClient,
    base: Url,
    anon_key: String,
}

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct GoTrueUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

// Sign-up answers with a session when auto-confirm is on, or with the bare user
// object when the address still has to be confirmed.
#[derive(Deserialize)]
struct GoTrueSession {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    user: Option<GoTrueUser>,
}

#[derive(Deserialize, Default)]
struct GoTrueError {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

impl SupabaseAuthProvider {
    pub fn new(url: &str, anon_key: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let mut base = Url::parse(url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: HttpClient::builder().build()?,
            base,
            anon_key: anon_key.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        self.base.join(path).map_err(|e| AuthError::InvalidInput(format!("bad auth URL: {}", e)))
    }

    async fn rejection(response: Response) -> AuthError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let parsed: GoTrueError = serde_json::from_str(&body).unwrap_or_default();
        let message = parsed.error_description
            .or(parsed.msg)
            .or(parsed.message)
            .or(parsed.error)
            .unwrap_or_else(|| format!("auth provider returned status {}", status));
        warn!("Supabase auth rejected request ({}): {}", status, message);
        AuthError::Rejected { status, message }
    }

    fn session_from(payload: GoTrueSession, email: &str) -> Option<Session> {
        let token = payload.access_token?;
        let user = payload.user?;
        Some(Session {
            user_id: user.id,
            email: user.email.unwrap_or_else(|| email.to_string()),
            access_token: token,
        })
    }
}

#[async_trait]
impl AuthProvider for SupabaseAuthProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, AuthError> {
        let response = self.http
            .post(self.endpoint("auth/v1/signup")?)
            .header("apikey", &self.anon_key)
            .json(&(PasswordGrant { email, password }))
            .send().await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let payload: GoTrueSession = response.json().await?;
        let session = Self::session_from(payload, email);
        if session.is_none() {
            info!("Sign-up for {} awaits email confirmation", email);
        }
        Ok(session)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let response = self.http
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&(PasswordGrant { email, password }))
            .send().await?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                return Err(AuthError::InvalidCredentials);
            }
            _ => {
                return Err(Self::rejection(response).await);
            }
        }
        let payload: GoTrueSession = response.json().await?;
        Self::session_from(payload, email).ok_or_else(|| AuthError::Rejected {
            status: 200,
            message: "auth provider returned no session".into(),
        })
    }

    async fn verify(&self, access_token: &str) -> Result<UserIdentity, AuthError> {
        let response = self.http
            .get(self.endpoint("auth/v1/user")?)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send().await?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AuthError::Unauthorized);
            }
            _ => {
                return Err(Self::rejection(response).await);
            }
        }
        let user: GoTrueUser = response.json().await?;
        Ok(UserIdentity {
            user_id: user.id,
            access_token: Some(access_token.to_string()),
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        let response = self.http
            .post(self.endpoint("auth/v1/logout")?)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send().await?;
        if response.status().is_success() || response.status() == StatusCode::UNAUTHORIZED {
            Ok(())
        } else {
            Err(Self::rejection(response).await)
        }
    }
}
