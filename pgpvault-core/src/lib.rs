//! Types shared by every pgpvault crate: the stored record format, caller
//! request shapes, the error taxonomy and the storage collaborators.

pub mod error;
pub mod storage;
mod types;

pub use error::{CodecError, StorageError, ValidationError, VaultError};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use types::{
    CreateKeyRequest, DEFAULT_KEY_BITS, IdentityDescriptor, KEY_NAMESPACE, KeyInfo, KeySource,
    MIN_KEY_BITS, StoredKeyRecord, validate_key_name,
};
