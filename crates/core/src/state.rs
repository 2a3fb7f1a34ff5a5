//! Per-conversation state.
//!
//! One [`ConversationState`] exists per conversation id for the lifetime of
//! the process. It is single-writer: the runtime serializes turns for the
//! same id and only commits a turn's working copy once the turn finished.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::message::{ConversationId, Message};

/// Snapshot of the most recent document analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// The user question that triggered the analysis
    pub question: String,

    /// Bounded prefix of the prompt that produced the report
    pub prompt_snapshot: String,

    /// The model's markdown answer
    pub answer_markdown: String,

    /// The file index the analysis ran over
    pub source_files: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,
}

/// Durable state of one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: ConversationId,

    /// Ordered messages (model-context order)
    pub messages: Vec<Message>,

    /// filename -> extracted text
    pub file_index: BTreeMap<String, String>,

    /// filename -> sha256 of the raw bytes; same keys as `file_index`
    pub file_hashes: BTreeMap<String, String>,

    /// Most recent analysis, replaced wholesale by the next one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_report: Option<Report>,

    /// Set after asking the user to confirm running an analysis
    #[serde(default)]
    pub clarification_pending: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    /// Create an empty state for a conversation.
    pub fn new(id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            file_index: BTreeMap::new(),
            file_hashes: BTreeMap::new(),
            last_report: None,
            clarification_pending: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Replace both file maps at once.
    ///
    /// Callers hand over the complete result of a reconcile; the maps are
    /// never merged so files removed between turns cannot linger.
    pub fn replace_files(
        &mut self,
        index: BTreeMap<String, String>,
        hashes: BTreeMap<String, String>,
    ) {
        debug_assert!(index.keys().eq(hashes.keys()));
        self.file_index = index;
        self.file_hashes = hashes;
        self.updated_at = Utc::now();
    }

    /// Whether any file content is currently attached.
    pub fn has_files(&self) -> bool {
        !self.file_index.is_empty()
    }

    /// Overwrite the last report and clear any pending clarification.
    pub fn store_report(&mut self, report: Report) {
        self.last_report = Some(report);
        self.clarification_pending = false;
        self.updated_at = Utc::now();
    }
}
