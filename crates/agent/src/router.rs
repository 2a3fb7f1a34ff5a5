//! Picks the branch a turn takes.
//!
//! Order matters: files are reconciled first, a pending clarification is
//! resolved before any fresh classification, and only then is the message
//! classified.

use afina_core::state::ConversationState;
use afina_files::FileCache;
use std::sync::Arc;
use tracing::{debug, info};

use crate::intent::{Intent, IntentClassifier};

/// Shown when an analysis is requested but nothing is attached.
pub const NO_FILES_MESSAGE: &str =
    "Не вижу загруженных файлов для анализа. Загрузите отчёт и повторите запрос.";

/// Shown when the user asks about a report that does not exist yet.
pub const ASK_RUN_ANALYSIS_MESSAGE: &str =
    "Предыдущего анализа в этом чате ещё нет. Запустить анализ загруженных документов?";

/// Where the turn goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Analyze,
    AskPrevReport,
    General,
    /// Ask whether to run an analysis; the turn ends
    Clarify,
    /// Reply with a fixed message; the turn ends
    EndWithMessage(String),
}

impl RouteDecision {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::AskPrevReport => "ask_prev_report",
            Self::General => "general",
            Self::Clarify => "clarify",
            Self::EndWithMessage(_) => "end_with_message",
        }
    }
}

pub struct Router {
    classifier: IntentClassifier,
    files: Arc<FileCache>,
}

impl Router {
    pub fn new(classifier: IntentClassifier, files: Arc<FileCache>) -> Self {
        Self { classifier, files }
    }

    /// Route one user message, updating the file maps and the
    /// clarification flag in `state`.
    pub async fn route(
        &self,
        state: &mut ConversationState,
        filenames: &[String],
        user_text: &str,
    ) -> RouteDecision {
        let reconciled = self
            .files
            .reconcile(&state.id, filenames, &state.file_hashes, &state.file_index)
            .await;
        if reconciled.changed {
            info!(
                conversation_id = %state.id,
                files = reconciled.hashes.len(),
                "Attached files changed"
            );
            state.replace_files(reconciled.contents, reconciled.hashes);
        }

        if state.clarification_pending {
            if self.classifier.is_affirmative(user_text).await {
                if !state.has_files() {
                    return RouteDecision::EndWithMessage(NO_FILES_MESSAGE.into());
                }
                // store_report clears the flag once the analysis lands
                return RouteDecision::Analyze;
            }
            debug!(conversation_id = %state.id, "Clarification declined, classifying afresh");
        }

        match self.classifier.classify(user_text).await {
            Intent::Analyze if state.has_files() => RouteDecision::Analyze,
            Intent::Analyze => RouteDecision::EndWithMessage(NO_FILES_MESSAGE.into()),
            Intent::AskPrevReport if state.last_report.is_some() => RouteDecision::AskPrevReport,
            Intent::AskPrevReport => {
                state.clarification_pending = true;
                RouteDecision::Clarify
            }
            Intent::General => RouteDecision::General,
        }
    }
}
