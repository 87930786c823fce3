use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{Storage, key_segments};
use crate::error::StorageError;

/// Ordered in-process store. Useful for tests and for hosts that bring their
/// own persistence around the service.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Vec<u8>>>, StorageError> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Io("memory storage lock poisoned".to_string()))
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        key_segments(key)?;
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        key_segments(key)?;
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        key_segments(key)?;
        self.lock()?.remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.lock()?;
        let mut out: Vec<String> = Vec::new();
        for key in entries.keys() {
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            // Nested keys show up once, as their first segment plus a slash.
            let item = match rest.find('/') {
                Some(idx) => &rest[..=idx],
                None => rest,
            };
            if out.last().map(String::as_str) != Some(item) {
                out.push(item.to_string());
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_put_delete() {
        let storage = MemoryStorage::new();
        assert!(storage.get("key/a").expect("get").is_none());
        storage.put("key/a", b"one").expect("put");
        assert_eq!(storage.get("key/a").expect("get"), Some(b"one".to_vec()));
        storage.put("key/a", b"two").expect("overwrite");
        assert_eq!(storage.get("key/a").expect("get"), Some(b"two".to_vec()));
        storage.delete("key/a").expect("delete");
        storage.delete("key/a").expect("delete again");
        assert!(storage.is_empty().expect("is_empty"));
    }

    #[test]
    fn poisoned_lock_is_an_error() {
        let storage = std::sync::Arc::new(MemoryStorage::new());
        storage.put("key/a", b"one").expect("put");
        let poisoner = std::sync::Arc::clone(&storage);
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.entries.lock().expect("lock");
            panic!("poison the lock");
        })
        .join();
        assert!(joined.is_err());

        assert!(matches!(storage.len(), Err(StorageError::Io(_))));
        assert!(matches!(storage.is_empty(), Err(StorageError::Io(_))));
        assert!(matches!(storage.get("key/a"), Err(StorageError::Io(_))));
    }

    #[test]
    fn list_returns_sorted_suffixes_under_prefix() {
        let storage = MemoryStorage::new();
        storage.put("key/b", b"").expect("put");
        storage.put("key/a", b"").expect("put");
        storage.put("other/c", b"").expect("put");
        storage.put("key/dir/x", b"").expect("put");
        storage.put("key/dir/y", b"").expect("put");
        assert_eq!(
            storage.list("key/").expect("list"),
            vec!["a".to_string(), "b".to_string(), "dir/".to_string()]
        );
        assert!(storage.list("missing/").expect("list").is_empty());
    }
}
