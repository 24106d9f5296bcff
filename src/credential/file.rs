use super::{ Credential, CredentialError, CredentialPort, API_KEY_ENTRY, PROVIDER_ENTRY };
use crate::llm::LlmProvider;
use log::warn;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Persists the credential as a flat JSON object of two string entries.
pub struct FileCredentialPort {
    path: PathBuf,
}

impl FileCredentialPort {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialPort for FileCredentialPort {
    fn load(&self) -> Result<Option<Credential>, CredentialError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(e) => {
                return Err(e.into());
            }
        };
        let entries: BTreeMap<String, String> = serde_json::from_str(&raw)?;

        let api_key = match entries.get(API_KEY_ENTRY) {
            Some(key) => key.clone(),
            None => {
                return Ok(None);
            }
        };
        let provider = match entries.get(PROVIDER_ENTRY) {
            Some(tag) =>
                tag.parse::<LlmProvider>().unwrap_or_else(|e| {
                    warn!("{} in {}; falling back to openai", e, self.path.display());
                    LlmProvider::OpenAI
                }),
            None => LlmProvider::OpenAI,
        };

        Ok(Some(Credential { api_key, provider }))
    }

    fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut entries = BTreeMap::new();
        entries.insert(API_KEY_ENTRY, credential.api_key.as_str());
        entries.insert(PROVIDER_ENTRY, credential.provider.as_str());
        fs::write(&self.path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }

    fn remove(&self) -> Result<(), CredentialError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
