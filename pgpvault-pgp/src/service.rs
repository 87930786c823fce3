use std::sync::Arc;

use pgpvault_core::{
    CreateKeyRequest, DEFAULT_KEY_BITS, KEY_NAMESPACE, KeyInfo, KeySource, Storage,
    StoredKeyRecord, VaultError, validate_key_name,
};

use crate::codec;
use crate::gateway::KeyStore;
use crate::generate::generate;
use crate::import::import_for_storage;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Storage prefix for key records.
    pub namespace: String,
    /// Modulus size used when a generate request does not name one.
    pub default_key_bits: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            namespace: KEY_NAMESPACE.to_string(),
            default_key_bits: DEFAULT_KEY_BITS,
        }
    }
}

/// Named key lifecycle: create (generate or import), read, delete, list.
#[derive(Debug, Clone)]
pub struct KeyService {
    store: KeyStore,
    config: ServiceConfig,
}

impl KeyService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_config(storage, ServiceConfig::default())
    }

    pub fn with_config(storage: Arc<dyn Storage>, config: ServiceConfig) -> Self {
        Self {
            store: KeyStore::with_namespace(storage, config.namespace.clone()),
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Creates or replaces the key stored under `name`. Nothing is written
    /// unless key material was produced and serialized.
    pub fn create(&self, name: &str, request: CreateKeyRequest) -> Result<(), VaultError> {
        validate_key_name(name)?;
        let (entity, serialized, generated) = match request.source {
            KeySource::Generate { identity, key_bits } => {
                let entity = generate(&identity, key_bits)?;
                let serialized = codec::encode_private_freshly_generated(&entity)?;
                (entity, serialized, true)
            }
            KeySource::Import { armored } => {
                let (entity, serialized) = import_for_storage(&armored)?;
                (entity, serialized, false)
            }
        };

        self.store.put(
            name,
            &StoredKeyRecord {
                serialized_key: serialized,
                exportable: request.exportable,
            },
        )?;
        tracing::info!(
            name,
            generated,
            exportable = request.exportable,
            fingerprint = %entity.fingerprint(),
            "key stored"
        );
        Ok(())
    }

    /// Public view of a stored key, or `None` if no key has that name.
    pub fn read(&self, name: &str) -> Result<Option<KeyInfo>, VaultError> {
        validate_key_name(name)?;
        let Some(record) = self.store.get(name)? else {
            return Ok(None);
        };
        let entity = codec::decode(&record.serialized_key)?;
        Ok(Some(KeyInfo {
            fingerprint: entity.fingerprint(),
            public_key: codec::encode_public_armor(&entity)?,
            exportable: record.exportable,
        }))
    }

    /// Removes the key; deleting a missing key succeeds.
    pub fn delete(&self, name: &str) -> Result<(), VaultError> {
        validate_key_name(name)?;
        self.store.delete(name)?;
        tracing::info!(name, "key deleted");
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<String>, VaultError> {
        Ok(self.store.list()?)
    }
}
