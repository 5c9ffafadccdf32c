//! Session-scoped secret storage shared by the interceptor and credential capture.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Error type for secret store operations
#[derive(Debug)]
pub enum SecretStoreError {
    /// The store is unavailable (for example, a lock was poisoned)
    Unavailable(String),
}

impl std::fmt::Display for SecretStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretStoreError::Unavailable(e) => write!(f, "Secret store unavailable: {}", e),
        }
    }
}

impl std::error::Error for SecretStoreError {}

/// Keyed string store
pub trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SecretStoreError>;

    fn set(&self, key: &str, value: String) -> Result<(), SecretStoreError>;

    fn remove(&self, key: &str) -> Result<Option<String>, SecretStoreError>;

    fn clear(&self) -> Result<(), SecretStoreError>;
}

/// In-memory store living for one session; nothing is persisted
#[derive(Debug, Default)]
pub struct SessionStore {
    values: RwLock<HashMap<String, String>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh store ready to be shared
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl SecretStore for SessionStore {
    fn get(&self, key: &str) -> Result<Option<String>, SecretStoreError> {
        let values = self.values.read().map_err(poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), SecretStoreError> {
        let mut values = self.values.write().map_err(poisoned)?;
        values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<Option<String>, SecretStoreError> {
        let mut values = self.values.write().map_err(poisoned)?;
        Ok(values.remove(key))
    }

    fn clear(&self) -> Result<(), SecretStoreError> {
        let mut values = self.values.write().map_err(poisoned)?;
        values.clear();
        Ok(())
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> SecretStoreError {
    SecretStoreError::Unavailable(e.to_string())
}

/// Ends a session by clearing its store when dropped
pub struct Session {
    store: Arc<dyn SecretStore>,
}

impl Session {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn SecretStore> {
        self.store.clone()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        log::debug!("Session ended, clearing secret store");
        if let Err(e) = self.store.clear() {
            log::warn!("Failed to clear secret store: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_remove() {
        let store = SessionStore::new();
        assert_eq!(store.get("token").unwrap(), None);

        store.set("token", "abc".to_string()).unwrap();
        assert_eq!(store.get("token").unwrap().as_deref(), Some("abc"));

        store.set("token", "def".to_string()).unwrap();
        assert_eq!(store.get("token").unwrap().as_deref(), Some("def"));

        assert_eq!(store.remove("token").unwrap().as_deref(), Some("def"));
        assert_eq!(store.get("token").unwrap(), None);
    }

    #[test]
    fn test_session_clears_on_drop() {
        let store = SessionStore::shared();
        store.set("a", "1".to_string()).unwrap();
        store.set("b", "2".to_string()).unwrap();

        let session = Session::new(store.clone());
        session.store().set("c", "3".to_string()).unwrap();
        drop(session);

        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("c").unwrap(), None);
    }
}
