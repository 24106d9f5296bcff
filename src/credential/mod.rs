mod file;
mod memory;

pub use file::FileCredentialPort;
pub use memory::MemoryCredentialPort;

use crate::cli::Args;
use crate::llm::LlmProvider;
use log::info;
use std::fmt;
use std::sync::{ Arc, RwLock };
use thiserror::Error;

/// Storage entry holding the API key.
pub const API_KEY_ENTRY: &str = "user_api_key";
/// Storage entry holding the provider tag.
pub const PROVIDER_ENTRY: &str = "llm_provider";

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub api_key: String,
    pub provider: LlmProvider,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &"<redacted>")
            .field("provider", &self.provider)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential storage IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential storage format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Where the active credential is persisted between runs.
pub trait CredentialPort: Send + Sync {
    fn load(&self) -> Result<Option<Credential>, CredentialError>;
    fn save(&self, credential: &Credential) -> Result<(), CredentialError>;
    fn remove(&self) -> Result<(), CredentialError>;
}

/// Zero or one credential for the whole service, cached in memory over a port.
pub struct CredentialStore {
    port: Arc<dyn CredentialPort>,
    current: RwLock<Option<Credential>>,
}

impl CredentialStore {
    pub fn load(port: Arc<dyn CredentialPort>) -> Result<Self, CredentialError> {
        let current = port.load()?;
        Ok(Self {
            port,
            current: RwLock::new(current),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            port: Arc::new(MemoryCredentialPort::default()),
            current: RwLock::new(None),
        }
    }

    pub fn get(&self) -> Option<Credential> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Stores the key verbatim, replacing whatever was there. A missing provider
    /// means OpenAI.
    pub fn set(
        &self,
        api_key: impl Into<String>,
        provider: Option<LlmProvider>
    ) -> Result<Credential, CredentialError> {
        let credential = Credential {
            api_key: api_key.into(),
            provider: provider.unwrap_or_default(),
        };
        let mut current = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.port.save(&credential)?;
        *current = Some(credential.clone());
        info!("API key configured for provider {}", credential.provider);
        Ok(credential)
    }

    pub fn clear(&self) -> Result<(), CredentialError> {
        let mut current = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.port.remove()?;
        *current = None;
        info!("API key cleared");
        Ok(())
    }
}

pub fn initialize_credential_store(
    args: &Args
) -> Result<Arc<CredentialStore>, CredentialError> {
    let port: Arc<dyn CredentialPort> = match &args.credential_file {
        Some(path) => {
            info!("API key will be persisted in: {}", path);
            Arc::new(FileCredentialPort::new(path))
        }
        None => {
            info!("No credential file configured; API key is kept in memory only");
            Arc::new(MemoryCredentialPort::default())
        }
    };
    let store = CredentialStore::load(port)?;
    if let Some(credential) = store.get() {
        info!("Loaded stored API key for provider {}", credential.provider);
    }
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_returns_the_same_key() {
        let store = CredentialStore::in_memory();
        for key in ["sk-test", "  spaced key  ", "AIza-ñ"] {
            store.set(key, None).unwrap();
            let credential = store.get().unwrap();
            assert_eq!(credential.api_key, key);
            assert_eq!(credential.provider, LlmProvider::OpenAI);
        }
    }

    #[test]
    fn clear_makes_the_credential_absent() {
        let store = CredentialStore::in_memory();
        store.set("sk-test", Some(LlmProvider::Gemini)).unwrap();
        store.clear().unwrap();
        assert!(store.get().is_none());
    }

    #[test]
    fn set_overwrites_previous_credential() {
        let store = CredentialStore::in_memory();
        store.set("first", Some(LlmProvider::Gemini)).unwrap();
        store.set("second", None).unwrap();
        let credential = store.get().unwrap();
        assert_eq!(credential.api_key, "second");
        assert_eq!(credential.provider, LlmProvider::OpenAI);
    }

    #[test]
    fn load_reads_what_the_port_already_holds() {
        let port = Arc::new(MemoryCredentialPort::default());
        port.save(&Credential { api_key: "persisted".into(), provider: LlmProvider::Gemini }).unwrap();

        let store = CredentialStore::load(port.clone()).unwrap();
        assert_eq!(store.get().unwrap().api_key, "persisted");

        store.clear().unwrap();
        assert!(port.load().unwrap().is_none());
    }

    #[test]
    fn debug_output_hides_the_key() {
        let credential = Credential { api_key: "sk-secret".into(), provider: LlmProvider::OpenAI };
        assert!(!format!("{:?}", credential).contains("sk-secret"));
    }
}
