use super::{ Credential, CredentialError, CredentialPort };
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryCredentialPort {
    slot: Mutex<Option<Credential>>,
}

impl CredentialPort for MemoryCredentialPort {
    fn load(&self) -> Result<Option<Credential>, CredentialError> {
        Ok(self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone())
    }

    fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        *self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(credential.clone());
        Ok(())
    }

    fn remove(&self) -> Result<(), CredentialError> {
        *self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}
