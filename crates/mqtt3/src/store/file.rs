//! Directory-backed storage, one file per inflight record.
//!
//! Writes go to a temporary sibling first, are synced, and then renamed over
//! the final name, so a record is either fully present or absent after a
//! crash.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use mqtt3_protocol::{MqttError, Result};

use super::{Store, StoreKey};

#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (and creates, if needed) the storage directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| MqttError::Store(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn path(&self, key: StoreKey) -> PathBuf {
        self.dir.join(key.raw().to_string())
    }
}

impl Store for FileStore {
    fn persist(&self, key: StoreKey, value: &[u8]) -> Result<()> {
        let path = self.path(key);
        let temp = self.dir.join(format!("{}.tmp", key.raw()));

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(value)?;
            file.sync_all()?;
            fs::rename(&temp, &path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&temp);
            MqttError::Store(format!("persist {}: {e}", path.display()))
        })
    }

    fn load(&self, key: StoreKey) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match fs::read(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MqttError::Store(format!("load {}: {e}", path.display()))),
        }
    }

    fn delete(&self, key: StoreKey) -> Result<()> {
        let path = self.path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MqttError::Store(format!("delete {}: {e}", path.display()))),
        }
    }

    fn list(&self) -> Result<Vec<StoreKey>> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| MqttError::Store(format!("list {}: {e}", self.dir.display())))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| MqttError::Store(format!("list {}: {e}", self.dir.display())))?;
            // leftover temporaries and foreign files are not records
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let Ok(raw) = name.parse::<u32>() else {
                continue;
            };
            if let Some(key) = StoreKey::from_raw(raw) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let key = StoreKey::local(9);

        assert_eq!(store.load(key).unwrap(), None);
        store.persist(key, b"frame bytes").unwrap();
        assert_eq!(
            store.load(key).unwrap().as_deref(),
            Some(&b"frame bytes"[..])
        );

        store.delete(key).unwrap();
        assert_eq!(store.load(key).unwrap(), None);
        store.delete(key).unwrap(); // idempotent
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let key = StoreKey::local(1);

        store.persist(key, b"publish").unwrap();
        store.persist(key, b"pubrel").unwrap();
        assert_eq!(store.load(key).unwrap().as_deref(), Some(&b"pubrel"[..]));
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = StoreKey::local(7);
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.persist(key, b"inflight").unwrap();
        }

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.list().unwrap(), vec![key]);
        assert_eq!(store.load(key).unwrap().as_deref(), Some(&b"inflight"[..]));
    }

    #[test]
    fn test_list_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.persist(StoreKey::remote(2), b"x").unwrap();
        fs::write(dir.path().join("README"), b"not a record").unwrap();
        fs::write(dir.path().join("99.tmp"), b"leftover").unwrap();

        assert_eq!(store.list().unwrap(), vec![StoreKey::remote(2)]);
    }
}
