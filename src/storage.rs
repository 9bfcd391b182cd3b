/// Flow state persistence with pluggable storage
use crate::error::{FlowError, Result};
use crate::state::FlowState;
use fs2::FileExt;
use keyring::Entry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// Storage interface for saved flow states
///
/// Keys identify a configured request or session; the format of the key is
/// owned by the caller.
pub trait StateStorage: Send + Sync {
    /// Save a flow state, replacing any previous one under `key`
    fn save_state(&self, key: &str, state: &FlowState) -> Result<()>;

    /// Load a flow state by key
    fn load_state(&self, key: &str) -> Result<Option<FlowState>>;

    /// Delete a flow state
    fn delete_state(&self, key: &str) -> Result<()>;
}

/// In-memory storage implementation
///
/// Suitable for testing and for hosts that persist sessions themselves.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    states: Arc<RwLock<HashMap<String, FlowState>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStorage for MemoryStorage {
    fn save_state(&self, key: &str, state: &FlowState) -> Result<()> {
        self.states.write().insert(key.to_string(), state.clone());
        Ok(())
    }

    fn load_state(&self, key: &str) -> Result<Option<FlowState>> {
        Ok(self.states.read().get(key).cloned())
    }

    fn delete_state(&self, key: &str) -> Result<()> {
        self.states.write().remove(key);
        Ok(())
    }
}

/// File-based storage implementation using XDG conventions
///
/// Each key is stored as a pretty-printed JSON file. Writes hold an exclusive
/// file lock so two processes saving the same key do not interleave.
#[derive(Debug, Clone)]
pub struct FileStorage {
    base_path: PathBuf,
}

impl FileStorage {
    /// Create a file storage for an application
    ///
    /// Uses `$XDG_DATA_HOME/<app_name>` when set, otherwise the platform data
    /// directory.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use codeflow::storage::FileStorage;
    ///
    /// let storage = FileStorage::new("my-rest-client").unwrap();
    /// ```
    pub fn new(app_name: &str) -> Result<Self> {
        let base_dir = if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
            PathBuf::from(xdg_data)
        } else {
            dirs::data_dir()
                .ok_or_else(|| FlowError::StorageError("Could not determine data directory".into()))?
        };

        Self::with_path(base_dir.join(app_name))
    }

    /// Create a file storage rooted at `path`
    pub fn with_path(path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&path).map_err(|e| {
            FlowError::StorageError(format!("Failed to create storage directory: {}", e))
        })?;

        Ok(Self { base_path: path })
    }

    fn state_path(&self, key: &str) -> PathBuf {
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.base_path.join(format!("flow_{}.json", safe_key))
    }
}

impl StateStorage for FileStorage {
    fn save_state(&self, key: &str, state: &FlowState) -> Result<()> {
        let content = state.to_json()?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.state_path(key))?;

        file.lock_exclusive()?;
        let written = file
            .set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(content.as_bytes()))
            .and_then(|_| file.flush());
        let _ = file.unlock();

        written.map_err(|e| FlowError::StorageError(format!("Failed to write state file: {}", e)))
    }

    fn load_state(&self, key: &str) -> Result<Option<FlowState>> {
        let path = self.state_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let mut file = fs::File::open(&path)?;
        file.lock_shared()?;
        let mut content = String::new();
        let read = file.read_to_string(&mut content);
        let _ = file.unlock();
        read.map_err(|e| FlowError::StorageError(format!("Failed to read state file: {}", e)))?;

        FlowState::from_json(&content).map(Some)
    }

    fn delete_state(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.state_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Secure storage using the OS credential manager
///
/// Flow states carry client secrets and tokens, so the whole state is kept in
/// the platform keyring (Keychain, Credential Manager, kernel keyutils).
#[derive(Debug, Clone)]
pub struct SecureStorage {
    service: String,
}

impl SecureStorage {
    pub fn new(app_name: &str) -> Self {
        Self {
            service: format!("codeflow-{}", app_name),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key)
            .map_err(|e| FlowError::StorageError(format!("Failed to create keyring entry: {}", e)))
    }
}

impl StateStorage for SecureStorage {
    fn save_state(&self, key: &str, state: &FlowState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        self.entry(key)?
            .set_password(&json)
            .map_err(|e| FlowError::StorageError(format!("Failed to save state to keyring: {}", e)))
    }

    fn load_state(&self, key: &str) -> Result<Option<FlowState>> {
        match self.entry(key)?.get_password() {
            Ok(json) => FlowState::from_json(&json).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(FlowError::StorageError(format!(
                "Failed to retrieve state from keyring: {}",
                e
            ))),
        }
    }

    fn delete_state(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(FlowError::StorageError(format!(
                "Failed to delete state from keyring: {}",
                e
            ))),
        }
    }
}
