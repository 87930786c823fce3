use serde::{Deserialize, Serialize};

use crate::error::{StorageError, ValidationError};

/// Smallest RSA modulus accepted for generated keys.
pub const MIN_KEY_BITS: usize = 2048;

pub const DEFAULT_KEY_BITS: usize = 2048;

/// Storage prefix separating key records from anything else sharing the store.
pub const KEY_NAMESPACE: &str = "key/";

const FORBIDDEN_IDENTITY_CHARS: [char; 5] = ['(', ')', '<', '>', '\0'];

/// Name, comment and email used to build the user ID of a generated key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityDescriptor {
    pub real_name: String,
    pub email: String,
    pub comment: String,
}

impl IdentityDescriptor {
    pub fn new(
        real_name: impl Into<String>,
        comment: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            real_name: real_name.into(),
            email: email.into(),
            comment: comment.into(),
        }
    }

    /// Rejects the characters that delimit user ID fields.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("real_name", &self.real_name),
            ("comment", &self.comment),
            ("email", &self.email),
        ] {
            if value.contains(FORBIDDEN_IDENTITY_CHARS) {
                return Err(ValidationError::InvalidIdentity { field });
            }
        }
        Ok(())
    }

    /// Renders `Name (comment) <email>`, leaving out empty parts.
    pub fn user_id(&self) -> String {
        let mut out = self.real_name.clone();
        if !self.comment.is_empty() {
            out.push_str(" (");
            out.push_str(&self.comment);
            out.push(')');
        }
        if !self.real_name.is_empty() && !self.email.is_empty() {
            out.push(' ');
        }
        if !self.email.is_empty() {
            out.push('<');
            out.push_str(&self.email);
            out.push('>');
        }
        out
    }
}

/// Checks a caller-assigned key name: word characters, with `-` and `.`
/// allowed anywhere but the first and last position.
pub fn validate_key_name(name: &str) -> Result<(), ValidationError> {
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let valid = match (name.chars().next(), name.chars().last()) {
        (Some(first), Some(last)) => {
            is_word(first)
                && is_word(last)
                && name.chars().all(|c| is_word(c) || c == '-' || c == '.')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidKeyName(name.to_string()))
    }
}

/// What a stored name maps to. The key bytes are the canonical binary form
/// produced by the entity codec and are opaque to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKeyRecord {
    #[serde(rename = "SerializedKey", with = "base64_bytes")]
    pub serialized_key: Vec<u8>,
    #[serde(rename = "Exportable", default)]
    pub exportable: bool,
}

impl StoredKeyRecord {
    pub fn to_json(&self) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(self).map_err(|err| StorageError::Encode(err.to_string()))
    }

    pub fn from_json(key: &str, bytes: &[u8]) -> Result<Self, StorageError> {
        serde_json::from_slice(bytes).map_err(|err| StorageError::CorruptRecord {
            key: key.to_string(),
            reason: err.to_string(),
        })
    }
}

/// Public view of a stored key as returned by a read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub fingerprint: String,
    pub public_key: String,
    pub exportable: bool,
}

/// Where the key material of a new record comes from.
#[derive(Debug, Clone)]
pub enum KeySource {
    Generate {
        identity: IdentityDescriptor,
        key_bits: usize,
    },
    Import {
        armored: String,
    },
}

#[derive(Debug, Clone)]
pub struct CreateKeyRequest {
    pub source: KeySource,
    pub exportable: bool,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
