//! Document store: raw uploaded bytes under `<root>/<conversation>/<name>`.
//!
//! Names are plain file names only. Anything with a path separator, a `..`
//! component or nothing at all is rejected before it reaches the filesystem.

use afina_core::error::FileError;
use afina_core::message::ConversationId;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

/// Metadata for a stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
}

/// Check that `name` is a plain file name.
pub fn validate_name(name: &str) -> Result<&str, FileError> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.contains("..");
    if invalid {
        return Err(FileError::InvalidName(name.to_string()));
    }
    Ok(name)
}

/// Backing store for uploaded documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Raw bytes of a document, or `None` when it does not exist.
    async fn resolve(
        &self,
        conversation: &ConversationId,
        name: &str,
    ) -> Result<Option<Vec<u8>>, FileError>;

    /// Store a document, replacing any previous one with the same name.
    async fn save(
        &self,
        conversation: &ConversationId,
        name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, FileError>;

    /// Documents of a conversation, sorted by name.
    async fn list(&self, conversation: &ConversationId) -> Result<Vec<StoredFile>, FileError>;

    /// Remove a document. Missing documents are [`FileError::NotFound`].
    async fn delete(&self, conversation: &ConversationId, name: &str) -> Result<(), FileError>;
}

/// Filesystem-backed store.
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn conversation_dir(&self, conversation: &ConversationId) -> Result<PathBuf, FileError> {
        Ok(self.root.join(validate_name(conversation.as_str())?))
    }

    fn file_path(&self, conversation: &ConversationId, name: &str) -> Result<PathBuf, FileError> {
        Ok(self.conversation_dir(conversation)?.join(validate_name(name)?))
    }
}

fn storage_err(e: std::io::Error) -> FileError {
    FileError::Storage(e.to_string())
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn resolve(
        &self,
        conversation: &ConversationId,
        name: &str,
    ) -> Result<Option<Vec<u8>>, FileError> {
        let path = self.file_path(conversation, name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            // A directory with that name is not a document
            Err(_) if path.is_dir() => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn save(
        &self,
        conversation: &ConversationId,
        name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, FileError> {
        let path = self.file_path(conversation, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(storage_err)?;
        }
        tokio::fs::write(&path, bytes).await.map_err(storage_err)?;
        debug!(conversation_id = %conversation, file = name, size = bytes.len(), "Stored document");
        Ok(StoredFile {
            name: name.to_string(),
            size: bytes.len() as u64,
        })
    }

    async fn list(&self, conversation: &ConversationId) -> Result<Vec<StoredFile>, FileError> {
        let dir = self.conversation_dir(conversation)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(storage_err)? {
            let meta = entry.metadata().await.map_err(storage_err)?;
            if !meta.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                files.push(StoredFile {
                    name: name.to_string(),
                    size: meta.len(),
                });
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn delete(&self, conversation: &ConversationId, name: &str) -> Result<(), FileError> {
        let path = self.file_path(conversation, name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FileError::NotFound(name.to_string()))
            }
            Err(e) => Err(storage_err(e)),
        }
    }
}

/// In-memory store, for embedding and tests.
#[derive(Default)]
pub struct MemoryDocumentStore {
    files: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn resolve(
        &self,
        conversation: &ConversationId,
        name: &str,
    ) -> Result<Option<Vec<u8>>, FileError> {
        validate_name(name)?;
        let files = self.files.read().await;
        Ok(files
            .get(&(conversation.as_str().to_string(), name.to_string()))
            .cloned())
    }

    async fn save(
        &self,
        conversation: &ConversationId,
        name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, FileError> {
        validate_name(conversation.as_str())?;
        validate_name(name)?;
        self.files.write().await.insert(
            (conversation.as_str().to_string(), name.to_string()),
            bytes.to_vec(),
        );
        Ok(StoredFile {
            name: name.to_string(),
            size: bytes.len() as u64,
        })
    }

    async fn list(&self, conversation: &ConversationId) -> Result<Vec<StoredFile>, FileError> {
        let files = self.files.read().await;
        Ok(files
            .iter()
            .filter(|((conv, _), _)| conv == conversation.as_str())
            .map(|((_, name), bytes)| StoredFile {
                name: name.clone(),
                size: bytes.len() as u64,
            })
            .collect())
    }

    async fn delete(&self, conversation: &ConversationId, name: &str) -> Result<(), FileError> {
        self.files
            .write()
            .await
            .remove(&(conversation.as_str().to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| FileError::NotFound(name.to_string()))
    }
}
