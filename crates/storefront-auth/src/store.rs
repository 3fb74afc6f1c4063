//! Credential storage
//!
//! A synchronous, process-wide key-value store holding the access credential,
//! the refresh credential and a cached user profile blob. `FileStore` keeps the
//! values in a JSON file so a session survives restarts; every write goes
//! through an atomic temp-file + rename so a crash never leaves a torn file.
//!
//! `CredentialStore` is the typed facade the rest of the crate uses. It applies
//! the one validation rule the store has: credentials are trimmed, and an empty
//! credential reads back as absent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use common::Secret;
use tracing::{debug, info};

use crate::constants::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY};
use crate::error::{Error, Result};

/// Durable synchronous key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.remove(key);
        Ok(())
    }
}

/// JSON-file backed store.
///
/// The whole map is held in memory behind a Mutex; reads never touch the disk.
/// Mutations rewrite the file while the lock is held, so concurrent writers are
/// serialized.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`.
    ///
    /// A missing file is created as `{}` (no session yet).
    pub fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::Store(format!("reading session file: {e}")))?;
            let values: HashMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::Store(format!("parsing session file: {e}")))?;
            info!(path = %path.display(), keys = values.len(), "loaded session file");
            values
        } else {
            info!(path = %path.display(), "session file not found, starting signed out");
            let values = HashMap::new();
            if let Some(dir) = path.parent()
                && !dir.as_os_str().is_empty()
            {
                std::fs::create_dir_all(dir)
                    .map_err(|e| Error::Store(format!("creating session directory: {e}")))?;
            }
            write_atomic(&path, &values)?;
            values
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.insert(key.to_owned(), value.to_owned());
        debug!(key, "stored value");
        write_atomic(&self.path, &state)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.remove(key).is_some() {
            debug!(key, "removed value");
            write_atomic(&self.path, &state)?;
        }
        Ok(())
    }
}

/// Write the map to `path` atomically with 0600 permissions.
fn write_atomic(path: &Path, data: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Store(format!("serializing session: {e}")))?;

    let tmp_path = temp_path(path)?;

    std::fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| Error::Store(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&tmp_path, perms)
            .map_err(|e| Error::Store(format!("setting session file permissions: {e}")))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| Error::Store(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted session");
    Ok(())
}

/// Sibling temp file named after the target, so stores sharing a directory
/// never write to the same temp file.
fn temp_path(path: &Path) -> Result<PathBuf> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Store("session path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Store("session path has no file name".into()))?;

    Ok(dir.join(format!(
        ".{}.tmp.{}",
        file_name.to_string_lossy(),
        std::process::id()
    )))
}

/// Typed access to the session keys.
///
/// Cheap to clone; every clone shares the same backing store.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self { inner }
    }

    /// Store backed by a fresh `MemoryStore`.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Current access credential, if present and non-blank.
    pub fn access_token(&self) -> Option<Secret<String>> {
        self.inner
            .get(ACCESS_TOKEN_KEY)
            .and_then(|raw| Secret::non_empty(&raw))
    }

    /// Current refresh credential, if present and non-blank.
    pub fn refresh_token(&self) -> Option<Secret<String>> {
        self.inner
            .get(REFRESH_TOKEN_KEY)
            .and_then(|raw| Secret::non_empty(&raw))
    }

    pub fn set_access_token(&self, token: &Secret<String>) -> Result<()> {
        self.inner.set(ACCESS_TOKEN_KEY, token.expose())
    }

    pub fn set_refresh_token(&self, token: &Secret<String>) -> Result<()> {
        self.inner.set(REFRESH_TOKEN_KEY, token.expose())
    }

    /// Raw cached user profile blob.
    pub fn user(&self) -> Option<String> {
        self.inner.get(USER_KEY)
    }

    pub fn set_user(&self, user: &serde_json::Value) -> Result<()> {
        self.inner.set(USER_KEY, &user.to_string())
    }

    /// Persist a freshly established session.
    ///
    /// A missing refresh credential leaves any stored one untouched; the
    /// backend may be delivering it through the cookie channel instead.
    pub fn store_session(
        &self,
        access: &Secret<String>,
        refresh: Option<&Secret<String>>,
        user: Option<&serde_json::Value>,
    ) -> Result<()> {
        self.set_access_token(access)?;
        if let Some(refresh) = refresh {
            self.set_refresh_token(refresh)?;
        }
        if let Some(user) = user {
            self.set_user(user)?;
        }
        Ok(())
    }

    /// Remove the given keys. Every key is attempted; the first error wins.
    pub fn clear(&self, keys: &[&str]) -> Result<()> {
        let mut first_error = None;
        for key in keys {
            if let Err(e) = self.inner.remove(key)
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Remove the access credential, refresh credential and cached profile.
    pub fn clear_session(&self) -> Result<()> {
        self.clear(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY])
    }

    /// Whether none of the session keys are present.
    pub fn is_empty(&self) -> bool {
        [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY]
            .iter()
            .all(|key| self.inner.get(key).is_none())
    }
}
