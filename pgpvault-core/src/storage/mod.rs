//! Storage collaborators.
//!
//! The key service only needs a flat string-keyed byte store. Keys use `/` as
//! a namespace separator and `list` returns the suffixes found directly under
//! a prefix, in lexicographic order.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::error::StorageError;

pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    /// Removing a key that does not exist succeeds.
    fn delete(&self, key: &str) -> Result<(), StorageError>;
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        (**self).delete(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        (**self).list(prefix)
    }
}

/// Splits a storage key into path segments, rejecting anything that could
/// escape the namespace. Segments may not start with a dot so that hidden
/// and temporary files never collide with stored keys.
pub(crate) fn key_segments(key: &str) -> Result<Vec<&str>, StorageError> {
    if key.is_empty() || key.starts_with('/') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    let segments: Vec<&str> = key.split('/').collect();
    for segment in &segments {
        if segment.is_empty() || segment.starts_with('.') || segment.contains('\0') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_segments_rejects_traversal() {
        assert_eq!(key_segments("key/a").expect("valid"), vec!["key", "a"]);
        for bad in [
            "",
            "/key/a",
            "key//a",
            "key/../a",
            "key/./a",
            "key/a/",
            "key/a\0",
            "key/.hidden",
        ] {
            assert!(key_segments(bad).is_err(), "expected {bad:?} rejected");
        }
    }
}
