//! FileCache: keeps a conversation's extracted file text in step with the
//! document store.
//!
//! Change detection is by SHA-256 of the raw bytes. Unchanged files reuse the
//! text extracted on an earlier turn; only new or modified files are parsed.

use afina_core::message::ConversationId;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::extract::{Extractor, extract_blocking};
use crate::store::{DocumentStore, validate_name};

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Result of reconciling referenced file names against the store.
///
/// `contents` and `hashes` cover exactly the names resolved this turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub contents: BTreeMap<String, String>,
    pub hashes: BTreeMap<String, String>,
    pub changed: bool,
}

pub struct FileCache {
    store: Arc<dyn DocumentStore>,
    extractor: Arc<dyn Extractor>,
}

impl FileCache {
    pub fn new(store: Arc<dyn DocumentStore>, extractor: Arc<dyn Extractor>) -> Self {
        Self { store, extractor }
    }

    /// The backing store (read-only from the engine's side).
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Resolve `filenames` for `conversation` and diff them against the
    /// previous turn's hashes.
    ///
    /// Missing files, invalid names and store errors are skipped.
    pub async fn reconcile(
        &self,
        conversation: &ConversationId,
        filenames: &[String],
        prior_hashes: &BTreeMap<String, String>,
        prior_contents: &BTreeMap<String, String>,
    ) -> Reconciled {
        let mut contents = BTreeMap::new();
        let mut hashes = BTreeMap::new();
        let mut changed = false;

        for name in filenames {
            if hashes.contains_key(name) || validate_name(name).is_err() {
                continue;
            }

            let bytes = match self.store.resolve(conversation, name).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    debug!(conversation_id = %conversation, file = %name, "Referenced file not found");
                    continue;
                }
                Err(e) => {
                    warn!(conversation_id = %conversation, file = %name, error = %e, "Failed to read file");
                    continue;
                }
            };

            let hash = sha256_hex(&bytes);
            let reusable = prior_hashes.get(name) == Some(&hash);
            if !reusable {
                changed = true;
            }

            let text = match prior_contents.get(name) {
                Some(text) if reusable => text.clone(),
                _ => extract_blocking(self.extractor.clone(), name.clone(), bytes).await,
            };

            contents.insert(name.clone(), text);
            hashes.insert(name.clone(), hash);
        }

        // Deletions count as changes
        if !prior_hashes.keys().eq(hashes.keys()) {
            changed = true;
        }

        debug!(
            conversation_id = %conversation,
            files = hashes.len(),
            changed,
            "Reconciled referenced files"
        );

        Reconciled {
            contents,
            hashes,
            changed,
        }
    }
}
