use thiserror::Error;

/// Failures of the entity codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed key ring: {0}")]
    MalformedKeyRing(String),
    #[error("no private key has been found")]
    NoPrivateKeyPresent,
    #[error("serialize failed: {0}")]
    Serialize(String),
    #[error("openpgp operation failed: {0}")]
    Crypto(String),
}

/// Caller input that violates a precondition. These are reported back to the
/// caller as error responses and never treated as faults.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("keys < 2048 bits are unsafe and not supported (got {bits})")]
    KeyTooSmall { bits: usize },
    #[error("the key value is required for imported keys")]
    EmptyKeyInput,
    #[error("invalid armored key: {0}")]
    InvalidArmor(String),
    #[error("the key could not be serialized, is a private key present?")]
    NoPrivateKeyPresent,
    #[error("{field} must not contain any of \"()<>\\0\"")]
    InvalidIdentity { field: &'static str },
    #[error("invalid key name: {0:?}")]
    InvalidKeyName(String),
    #[error("invalid value for field {field}: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("unknown field: {0}")]
    UnknownField(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),
    #[error("insecure storage home: {0}")]
    InvalidHome(String),
    #[error("corrupt record {key}: {reason}")]
    CorruptRecord { key: String, reason: String },
    #[error("cannot encode record: {0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl VaultError {
    /// Whether the failure was caused by the caller's input rather than by
    /// storage or stored data.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, VaultError::Validation(_))
    }
}
