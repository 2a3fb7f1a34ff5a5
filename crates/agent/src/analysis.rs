//! Document review against a fixed rubric.

use afina_config::LimitsConfig;
use afina_core::error::ProviderError;
use afina_core::message::Message;
use std::collections::BTreeMap;
use tracing::info;

use crate::model::ModelClient;

const TRUNCATION_MARKER: &str = "\n...[truncated]";

const SYSTEM_ANALYST: &str = "\
You are a model validation expert reviewing model documentation. \
Base every finding strictly on the documents provided; do not invent facts. \
If a document contains a placeholder such as [skip error: name], say that the file could not be read. \
Answer in the language of the user's request.";

const RUBRIC: &str = "\
Check the documents against these criteria:
1. Are the model quality metrics documented (which metrics, on which samples, with values)?
2. Are the model's limitations documented (applicability boundaries, known weaknesses, data restrictions)?
3. Is the business rationale documented (the business problem, expected effect, how the model will be used)?

Reply with a markdown table with exactly these columns:
| Criterion | Yes/No | Explanation | Where in the documents |
One row per criterion. The last column names the file and section or quote.
After the table add a short list of recommendations.";

/// Keep at most `max` characters, marking the cut.
pub(crate) fn clip(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

fn prefix_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

/// Result of one analysis call.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutput {
    pub markdown: String,
    pub prompt_snapshot: String,
}

#[derive(Debug, Clone)]
pub struct AnalysisStage {
    client: ModelClient,
    max_files: usize,
    max_chars_per_file: usize,
    snapshot_chars: usize,
}

impl AnalysisStage {
    pub fn new(client: ModelClient, limits: &LimitsConfig) -> Self {
        Self {
            client,
            max_files: limits.max_files,
            max_chars_per_file: limits.max_chars_per_file,
            snapshot_chars: limits.prompt_snapshot_chars,
        }
    }

    /// The user part of the prompt: the documents, the request and the rubric.
    pub fn build_prompt(&self, files: &BTreeMap<String, String>, question: &str) -> String {
        let mut prompt = String::from("Documents:\n\n");
        for (name, text) in files.iter().take(self.max_files) {
            prompt.push_str(&format!(
                "<FILE name=\"{name}\">\n{}\n</FILE>\n\n",
                clip(text, self.max_chars_per_file)
            ));
        }
        let omitted = files.len().saturating_sub(self.max_files);
        if omitted > 0 {
            prompt.push_str(&format!("[{omitted} more file(s) omitted]\n\n"));
        }
        prompt.push_str(&format!("User request: {question}\n\n{RUBRIC}"));
        prompt
    }

    /// Run the review. One non-streaming call; the reply is the report.
    pub async fn analyze(
        &self,
        files: &BTreeMap<String, String>,
        question: &str,
    ) -> Result<AnalysisOutput, ProviderError> {
        let user = self.build_prompt(files, question);
        let prompt_snapshot = format!(
            "[SYSTEM]\n{SYSTEM_ANALYST}\n\n[USER]\n{}",
            prefix_chars(&user, self.snapshot_chars)
        );

        info!(files = files.len(), model = self.client.model(), "Running document analysis");
        let request = self
            .client
            .request(vec![Message::system(SYSTEM_ANALYST), Message::user(user)]);
        let response = self.client.complete(request).await?;

        Ok(AnalysisOutput {
            markdown: response.message.content,
            prompt_snapshot,
        })
    }
}
