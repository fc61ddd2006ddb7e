//! Key/value persistence and the session records kept in it.

use serde::{Serialize, de::DeserializeOwned};
use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use crate::adapter::AdapterId;

/// prefix of every key this crate writes to [`Storage`]
pub const STORAGE_KEY_PREFIX: &str = "bitcoin-connector";

/// default key of the last connected adapter id
pub const DEFAULT_SESSION_KEY: &str = "bitcoin-connector:Connector:previousConnectWallet";

/// String key/value storage, the browser's `localStorage` for example.
///
/// Implementations log their own failures; a failed write is treated as if
/// the value was never persisted.
pub trait Storage {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RefCell<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
    }

    fn remove(&self, key: &str) {
        self.entries.borrow_mut().remove(key);
    }
}

/// Remembers which adapter was last connected successfully.
#[derive(Clone)]
pub struct SessionStore {
    storage: Rc<dyn Storage>,
    key: String,
}

impl SessionStore {
    pub fn new(storage: Rc<dyn Storage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn last_connected(&self) -> Option<AdapterId> {
        self.storage
            .get(&self.key)
            .filter(|id| !id.is_empty())
            .map(AdapterId::from)
    }

    pub fn remember(&self, adapter_id: &AdapterId) {
        self.storage.set(&self.key, adapter_id.as_str());
    }

    pub fn forget(&self) {
        self.storage.remove(&self.key);
    }
}

/// Addresses granted by a wallet that cannot list them again without
/// prompting the user.
///
/// The value is kept in memory and mirrored as JSON in [`Storage`] so that a
/// page reload keeps the session. A stored value that does not decode is
/// dropped.
pub struct AddressCache<T> {
    storage: Rc<dyn Storage>,
    key: String,
    memory: RefCell<Option<T>>,
}

impl<T> AddressCache<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    pub fn new(storage: Rc<dyn Storage>, adapter_id: &str) -> Self {
        Self {
            storage,
            key: format!("{STORAGE_KEY_PREFIX}:{adapter_id}:connectedAddress"),
            memory: RefCell::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn load(&self) -> Option<T> {
        if let Some(value) = self.memory.borrow().as_ref() {
            return Some(value.clone());
        }

        let raw = self.storage.get(&self.key)?;
        match serde_json::from_str::<T>(&raw) {
            Ok(value) => {
                *self.memory.borrow_mut() = Some(value.clone());
                Some(value)
            }
            Err(error) => {
                tracing::warn!(key = %self.key, %error, "dropping malformed cached addresses");
                self.storage.remove(&self.key);
                None
            }
        }
    }

    pub fn store(&self, value: T) {
        match serde_json::to_string(&value) {
            Ok(raw) => self.storage.set(&self.key, &raw),
            Err(error) => {
                tracing::warn!(key = %self.key, %error, "couldn't persist cached addresses")
            }
        }
        *self.memory.borrow_mut() = Some(value);
    }

    pub fn clear(&self) {
        self.memory.borrow_mut().take();
        self.storage.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Granted {
        addresses: Vec<String>,
    }

    #[test]
    fn session_store_round_trip() {
        let storage = Rc::new(MemoryStorage::new());
        let store = SessionStore::new(storage.clone(), DEFAULT_SESSION_KEY);

        assert_eq!(store.last_connected(), None);
        store.remember(&AdapterId::from("unisat"));
        assert_eq!(
            storage.get(DEFAULT_SESSION_KEY).as_deref(),
            Some("unisat")
        );
        assert_eq!(store.last_connected(), Some(AdapterId::from("unisat")));

        store.forget();
        assert!(storage.is_empty());
    }

    #[test]
    fn address_cache_survives_reload() {
        let storage = Rc::new(MemoryStorage::new());
        let value = Granted {
            addresses: vec!["bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".to_owned()],
        };

        AddressCache::new(storage.clone(), "magiceden.bitcoin").store(value.clone());
        assert_eq!(
            storage
                .get("bitcoin-connector:magiceden.bitcoin:connectedAddress")
                .map(|raw| serde_json::from_str::<Granted>(&raw).unwrap()),
            Some(value.clone())
        );

        let reloaded = AddressCache::<Granted>::new(storage.clone(), "magiceden.bitcoin");
        assert_eq!(reloaded.load(), Some(value));

        reloaded.clear();
        assert_eq!(reloaded.load(), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn malformed_cache_is_dropped() {
        let storage = Rc::new(MemoryStorage::new());
        let cache = AddressCache::<Granted>::new(storage.clone(), "leather");
        storage.set(cache.key(), "{\"addresses\": 42}");

        assert_eq!(cache.load(), None);
        assert_eq!(storage.get(cache.key()), None);
    }
}
