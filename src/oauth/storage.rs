//! OAuth Token Storage
//!
//! Persists the single OAuth token of this installation so it survives
//! restarts. The OS keychain is preferred; a private JSON file is the
//! fallback.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::Token;
use crate::config::{StorageBackend, StorageConfig};
use crate::{Error, Result};

/// Keychain service name
pub const KEYRING_SERVICE: &str = "mission-control";
/// Keychain account holding the token
pub const KEYRING_USER: &str = "hubspot-token";

/// Durable home of the one token
///
/// Each call is atomic with respect to other callers.
pub trait TokenStore: Send + Sync {
    /// Persist the token, replacing any previous one
    fn save(&self, token: &Token) -> Result<()>;

    /// Load the token, `None` if nothing is stored
    fn load(&self) -> Result<Option<Token>>;

    /// Forget the token; deleting nothing is not an error
    fn delete(&self) -> Result<()>;

    /// Backend name for status output
    fn name(&self) -> &'static str;
}

/// Pick the store described by the configuration
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn TokenStore>> {
    let file = || -> Result<Arc<dyn TokenStore>> {
        let store = match &config.path {
            Some(path) => FileTokenStore::new(path.clone()),
            None => FileTokenStore::default_location()?,
        };
        Ok(Arc::new(store))
    };

    match config.backend {
        StorageBackend::File => file(),
        StorageBackend::Keyring => keyring_store(),
        StorageBackend::Auto => match keyring_store() {
            Ok(store) if probe(store.as_ref()) => Ok(store),
            Ok(_) => {
                warn!("OS keychain is not usable, storing the token in a file");
                file()
            }
            Err(e) => {
                debug!(error = %e, "OS keychain unavailable");
                file()
            }
        },
    }
}

#[cfg(feature = "keyring")]
fn keyring_store() -> Result<Arc<dyn TokenStore>> {
    Ok(Arc::new(KeyringTokenStore::new()))
}

#[cfg(not(feature = "keyring"))]
fn keyring_store() -> Result<Arc<dyn TokenStore>> {
    Err(Error::Storage(
        "built without OS keychain support (feature `keyring`)".to_string(),
    ))
}

/// Whether the store answers a read at all (a headless Linux box has no secret service)
fn probe(store: &dyn TokenStore) -> bool {
    match store.load() {
        Ok(_) => true,
        Err(e) => {
            debug!(backend = store.name(), error = %e, "Token store probe failed");
            false
        }
    }
}

/// Token stored as a JSON file readable only by the owner
pub struct FileTokenStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTokenStore {
    /// Create a store at the given file path
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Store in the default location (`~/.config/mission-control/token.json`)
    pub fn default_location() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .ok_or_else(|| Error::Storage("Cannot determine home directory".to_string()))?;

        Ok(Self::new(config_dir.join("mission-control").join("token.json")))
    }

    /// File path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_dir(&self) -> Result<()> {
        let Some(dir) = self.path.parent() else {
            return Ok(());
        };
        if dir.as_os_str().is_empty() || dir.exists() {
            return Ok(());
        }

        fs::create_dir_all(dir)
            .map_err(|e| Error::Storage(format!("Failed to create {}: {e}", dir.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(|e| {
                Error::Storage(format!("Failed to restrict {}: {e}", dir.display()))
            })?;
        }

        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn save(&self, token: &Token) -> Result<()> {
        let _guard = self.lock.lock();
        self.ensure_dir()?;

        let content = serde_json::to_vec_pretty(token)?;

        // Write beside the target and rename so readers never see half a file.
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let written = options.open(&tmp_path).and_then(|mut file| {
            file.write_all(&content)?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|()| fs::rename(&tmp_path, &self.path)) {
            let _ = fs::remove_file(&tmp_path);
            return Err(Error::Storage(format!(
                "Failed to write token file {}: {e}",
                self.path.display()
            )));
        }

        info!(path = %self.path.display(), "Saved OAuth token");
        Ok(())
    }

    fn load(&self) -> Result<Option<Token>> {
        let _guard = self.lock.lock();

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored token found");
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Failed to read token file {}: {e}",
                    self.path.display()
                )));
            }
        };

        let token: Token = serde_json::from_str(&content).map_err(|e| {
            Error::Storage(format!(
                "Failed to parse token file {}: {e}",
                self.path.display()
            ))
        })?;

        debug!(expires_in = ?token.time_until_expiry(), "Loaded token");
        Ok(Some(token))
    }

    fn delete(&self) -> Result<()> {
        let _guard = self.lock.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Deleted OAuth token");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!(
                "Failed to delete token file {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Token stored as one JSON secret in the OS keychain
#[cfg(feature = "keyring")]
pub struct KeyringTokenStore {
    service: String,
    user: String,
}

#[cfg(feature = "keyring")]
impl KeyringTokenStore {
    /// Store under the default service/account
    #[must_use]
    pub fn new() -> Self {
        Self::with_entry(KEYRING_SERVICE, KEYRING_USER)
    }

    /// Store under a custom service/account
    #[must_use]
    pub fn with_entry(service: &str, user: &str) -> Self {
        Self {
            service: service.to_string(),
            user: user.to_string(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.user)
            .map_err(|e| Error::Storage(format!("Failed to open keychain entry: {e}")))
    }
}

#[cfg(feature = "keyring")]
impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "keyring")]
impl TokenStore for KeyringTokenStore {
    fn save(&self, token: &Token) -> Result<()> {
        let secret = serde_json::to_string(token)?;
        self.entry()?
            .set_password(&secret)
            .map_err(|e| Error::Storage(format!("Failed to store token in keychain: {e}")))?;
        info!(service = %self.service, "Saved OAuth token to keychain");
        Ok(())
    }

    fn load(&self) -> Result<Option<Token>> {
        match self.entry()?.get_password() {
            Ok(secret) => {
                let token = serde_json::from_str(&secret).map_err(|e| {
                    Error::Storage(format!("Failed to parse token from keychain: {e}"))
                })?;
                Ok(Some(token))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::Storage(format!(
                "Failed to read token from keychain: {e}"
            ))),
        }
    }

    fn delete(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::Storage(format!(
                "Failed to delete token from keychain: {e}"
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "keyring"
    }
}

/// In-process store
#[derive(Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<Token>>,
}

impl MemoryTokenStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with a token
    #[must_use]
    pub fn with_token(token: Token) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn save(&self, token: &Token) -> Result<()> {
        *self.token.lock() = Some(token.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<Token>> {
        Ok(self.token.lock().clone())
    }

    fn delete(&self) -> Result<()> {
        self.token.lock().take();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn file_store_round_trip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested").join("token.json"));

        assert!(store.load().unwrap().is_none());

        let token = Token::issued("AT1".into(), "RT1".into(), 3600);
        store.save(&token).unwrap();
        assert_eq!(store.load().unwrap(), Some(token));

        store.delete().unwrap();
        assert!(store.load().unwrap().is_none());
        store.delete().unwrap();
    }

    #[test]
    fn file_store_replaces_previous_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));

        store.save(&Token::issued("AT1".into(), "RT1".into(), 3600)).unwrap();
        store.save(&Token::issued("AT2".into(), "RT2".into(), 3600)).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.access_token, "AT2");
        assert!(!dir.path().join("token.json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let token_dir = dir.path().join("mission-control");
        let store = FileTokenStore::new(token_dir.join("token.json"));
        store.save(&Token::issued("AT".into(), "RT".into(), 60)).unwrap();

        let file_mode = fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        let dir_mode = fs::metadata(&token_dir).unwrap().permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(&path, "not json").unwrap();

        let store = FileTokenStore::new(path);
        assert!(matches!(store.load(), Err(Error::Storage(_))));
    }

    #[test]
    fn memory_store_behaves_like_a_store() {
        let store = MemoryTokenStore::new();
        assert!(store.load().unwrap().is_none());
        store.save(&Token::issued("AT".into(), "RT".into(), 60)).unwrap();
        assert!(store.load().unwrap().is_some());
        store.delete().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn open_store_honours_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::File,
            path: Some(dir.path().join("token.json")),
        };
        let store = open_store(&config).unwrap();
        assert_eq!(store.name(), "file");
    }
}
