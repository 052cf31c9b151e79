//! Persistence of the client identity and last-used server

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::ServerAddress;

/// What the client remembers between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    /// Stable client identifier sent in every handshake
    pub client_id: String,
    /// Server of the last successful connect
    #[serde(default)]
    pub last_server: Option<ServerAddress>,
}

impl ClientIdentity {
    /// Identity with a fresh random client id
    #[must_use]
    pub fn generate() -> Self {
        let id: u64 = rand::thread_rng().r#gen();
        Self {
            client_id: format!("monitor-{id:016x}"),
            last_server: None,
        }
    }
}

/// Abstract storage interface for the client identity
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Load the stored identity, if any
    ///
    /// # Errors
    ///
    /// Returns error if the backing store cannot be read
    async fn load(&self) -> Result<Option<ClientIdentity>, StorageError>;

    /// Save the identity
    ///
    /// # Errors
    ///
    /// Returns error if storage fails
    async fn save(&mut self, identity: &ClientIdentity) -> Result<(), StorageError>;

    /// Forget the stored identity
    ///
    /// # Errors
    ///
    /// Returns error if removal fails
    async fn clear(&mut self) -> Result<(), StorageError>;
}

/// Load the stored identity, generating and saving one on first use
///
/// # Errors
///
/// Returns error if the store cannot be read or written
pub async fn load_or_create(store: &mut dyn IdentityStore) -> Result<ClientIdentity, StorageError> {
    if let Some(identity) = store.load().await? {
        return Ok(identity);
    }
    let identity = ClientIdentity::generate();
    tracing::info!(client_id = %identity.client_id, "Generated client identity");
    store.save(&identity).await?;
    Ok(identity)
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data is not a valid identity
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// In-memory identity storage (non-persistent)
#[derive(Debug, Default)]
pub struct MemoryStore {
    identity: Option<ClientIdentity>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `identity`
    #[must_use]
    pub fn with_identity(identity: ClientIdentity) -> Self {
        Self {
            identity: Some(identity),
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn load(&self) -> Result<Option<ClientIdentity>, StorageError> {
        Ok(self.identity.clone())
    }

    async fn save(&mut self, identity: &ClientIdentity) -> Result<(), StorageError> {
        self.identity = Some(identity.clone());
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), StorageError> {
        self.identity = None;
        Ok(())
    }
}

/// JSON file identity storage
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store at `path`, creating its directory
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(Self { path })
    }

    /// File backing this store
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IdentityStore for FileStore {
    async fn load(&self) -> Result<Option<ClientIdentity>, StorageError> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&self.path).await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    async fn save(&mut self, identity: &ClientIdentity) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(identity)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), StorageError> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
