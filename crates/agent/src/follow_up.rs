//! Questions about the most recent report.

use afina_config::LimitsConfig;
use afina_core::error::ProviderError;
use afina_core::message::{Message, Role};
use afina_core::state::Report;
use tracing::info;

use crate::analysis::clip;
use crate::model::ModelClient;

const SYSTEM_FOLLOW_UP: &str = "\
You answer follow-up questions about a document review you produced earlier. \
Use only the report excerpt and the conversation below. \
If the report does not contain the requested information, say so plainly instead of guessing. \
Answer in the user's language.";

/// The last `n` messages the caller actually saw, oldest first.
///
/// Tool traffic and empty messages are skipped.
pub fn recent_history(messages: &[Message], n: usize) -> Vec<&Message> {
    let mut recent: Vec<&Message> = messages
        .iter()
        .rev()
        .filter(|m| m.displayable && !m.content.trim().is_empty())
        .take(n)
        .collect();
    recent.reverse();
    recent
}

#[derive(Debug, Clone)]
pub struct FollowUpStage {
    client: ModelClient,
    history: usize,
    excerpt_chars: usize,
}

impl FollowUpStage {
    pub fn new(client: ModelClient, limits: &LimitsConfig) -> Self {
        Self {
            client,
            history: limits.follow_up_history,
            excerpt_chars: limits.report_excerpt_chars,
        }
    }

    pub fn history_len(&self) -> usize {
        self.history
    }

    pub fn build_prompt(&self, recent: &[&Message], report: &Report, question: &str) -> String {
        let history = recent
            .iter()
            .map(|m| {
                let who = if m.role == Role::User { "User" } else { "Assistant" };
                format!("{who}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Recent conversation:\n{history}\n\n\
             Review request: {}\n\n\
             Report excerpt:\n{}\n\n\
             Question: {question}",
            report.question,
            clip(&report.answer_markdown, self.excerpt_chars),
        )
    }

    /// Answer `question` from the stored report. One non-streaming call.
    pub async fn answer(
        &self,
        recent: &[&Message],
        report: &Report,
        question: &str,
    ) -> Result<String, ProviderError> {
        let prompt = self.build_prompt(recent, report, question);
        info!(history = recent.len(), model = self.client.model(), "Answering from previous report");

        let request = self
            .client
            .request(vec![Message::system(SYSTEM_FOLLOW_UP), Message::user(prompt)]);
        Ok(self.client.complete(request).await?.message.content)
    }
}
