use std::sync::Arc;

use pgpvault_core::{KEY_NAMESPACE, Storage, StorageError, StoredKeyRecord};

/// Persists key records under a fixed namespace of a [`Storage`].
#[derive(Clone)]
pub struct KeyStore {
    storage: Arc<dyn Storage>,
    namespace: String,
}

impl KeyStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_namespace(storage, KEY_NAMESPACE)
    }

    pub fn with_namespace(storage: Arc<dyn Storage>, namespace: impl Into<String>) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn storage_key(&self, name: &str) -> String {
        format!("{}{}", self.namespace, name)
    }

    /// Writes the record, replacing any existing one of the same name.
    pub fn put(&self, name: &str, record: &StoredKeyRecord) -> Result<(), StorageError> {
        let key = self.storage_key(name);
        self.storage.put(&key, &record.to_json()?)
    }

    pub fn get(&self, name: &str) -> Result<Option<StoredKeyRecord>, StorageError> {
        let key = self.storage_key(name);
        match self.storage.get(&key)? {
            Some(bytes) => StoredKeyRecord::from_json(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn delete(&self, name: &str) -> Result<(), StorageError> {
        self.storage.delete(&self.storage_key(name))
    }

    pub fn list(&self) -> Result<Vec<String>, StorageError> {
        self.storage.list(&self.namespace)
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
