//! Volatile storage for sessions that need no resumption.

use std::collections::HashMap;

use parking_lot::Mutex;

use mqtt3_protocol::Result;

use super::{Store, StoreKey};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<u32, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn persist(&self, key: StoreKey, value: &[u8]) -> Result<()> {
        self.entries.lock().insert(key.raw(), value.to_vec());
        Ok(())
    }

    fn load(&self, key: StoreKey) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(&key.raw()).cloned())
    }

    fn delete(&self, key: StoreKey) -> Result<()> {
        self.entries.lock().remove(&key.raw());
        Ok(())
    }

    fn list(&self) -> Result<Vec<StoreKey>> {
        Ok(self
            .entries
            .lock()
            .keys()
            .filter_map(|&raw| StoreKey::from_raw(raw))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_load_delete() {
        let store = MemoryStore::new();
        let key = StoreKey::local(3);

        assert_eq!(store.load(key).unwrap(), None);
        store.persist(key, b"payload").unwrap();
        assert_eq!(store.load(key).unwrap().as_deref(), Some(&b"payload"[..]));

        store.persist(key, b"replaced").unwrap();
        assert_eq!(store.load(key).unwrap().as_deref(), Some(&b"replaced"[..]));

        store.delete(key).unwrap();
        assert_eq!(store.load(key).unwrap(), None);
    }

    #[test]
    fn test_list() {
        let store = MemoryStore::new();
        store.persist(StoreKey::local(1), b"a").unwrap();
        store.persist(StoreKey::remote(2), b"b").unwrap();

        let mut keys = store.list().unwrap();
        keys.sort();
        assert_eq!(keys, vec![StoreKey::remote(2), StoreKey::local(1)]);
    }
}
