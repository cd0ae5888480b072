//! Durable key/value storage for session state.
//!
//! The session bridge keeps its bearer token under [`API_TOKEN_KEY`]; the
//! identity provider keeps the signed-in principal next to it.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::ClientError;

/// Storage key of the current bearer token.
pub const API_TOKEN_KEY: &str = "api_token";

/// String storage that survives for the lifetime of a session.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), ClientError>;
    fn remove(&self, key: &str) -> Result<(), ClientError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        lock(&self.entries)?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ClientError> {
        lock(&self.entries)?.remove(key);
        Ok(())
    }
}

/// Store backed by a JSON object on disk.
///
/// Every mutation rewrites the whole file through a sibling temp file and a
/// rename, so readers never observe a half-written document.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Opens the store at `path`, starting empty when the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                ClientError::storage(format!("corrupt session file {:?}: {err}", path))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(ClientError::storage(format!(
                    "failed to read session file {:?}: {err}",
                    path
                )));
            }
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                ClientError::storage(format!(
                    "failed to create session directory {:?}: {err}",
                    parent
                ))
            })?;
        }

        let bytes = serde_json::to_vec_pretty(entries)
            .map_err(|err| ClientError::storage(format!("failed to encode session: {err}")))?;

        let tmp_path = self.path.with_extension("tmp");
        let mut out = File::create(&tmp_path).map_err(|err| {
            ClientError::storage(format!(
                "failed to create temporary session file {:?}: {err}",
                tmp_path
            ))
        })?;
        out.write_all(&bytes)
            .and_then(|_| out.flush())
            .map_err(|err| {
                ClientError::storage(format!(
                    "failed writing session file {:?}: {err}",
                    tmp_path
                ))
            })?;

        fs::rename(&tmp_path, &self.path).map_err(|err| {
            ClientError::storage(format!(
                "failed to move session file from {:?} to {:?}: {err}",
                tmp_path, self.path
            ))
        })
    }
}

impl TokenStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        let mut entries = lock(&self.entries)?;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), ClientError> {
        let mut entries = lock(&self.entries)?;
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&entries)
    }
}

fn lock(
    entries: &Mutex<BTreeMap<String, String>>,
) -> Result<MutexGuard<'_, BTreeMap<String, String>>, ClientError> {
    entries
        .lock()
        .map_err(|_| ClientError::storage("session store lock poisoned"))
}

#[cfg(test)]
mod tests {
    use super::{FileStore, MemoryStore, TokenStore, API_TOKEN_KEY};

    #[test]
    fn memory_store_overwrites_and_removes() {
        let store = MemoryStore::new();
        store.set(API_TOKEN_KEY, "tok1").unwrap();
        store.set(API_TOKEN_KEY, "tok2").unwrap();
        assert_eq!(store.get(API_TOKEN_KEY).as_deref(), Some("tok2"));

        store.remove(API_TOKEN_KEY).unwrap();
        assert_eq!(store.get(API_TOKEN_KEY), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get(API_TOKEN_KEY), None);
        store.set(API_TOKEN_KEY, "tok1").unwrap();
        store.set("firebase_uid", "uid-1").unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get(API_TOKEN_KEY).as_deref(), Some("tok1"));
        assert_eq!(reopened.get("firebase_uid").as_deref(), Some("uid-1"));

        reopened.remove(API_TOKEN_KEY).unwrap();
        let again = FileStore::open(&path).unwrap();
        assert_eq!(again.get(API_TOKEN_KEY), None);
        assert_eq!(again.get("firebase_uid").as_deref(), Some("uid-1"));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = FileStore::open(&path).unwrap_err();
        assert!(err.to_string().contains("corrupt session file"));
    }
}
