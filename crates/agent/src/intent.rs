//! Intent and confirmation classification.
//!
//! Both calls use JSON mode. Neither ever fails the turn: a failed call or an
//! unparseable reply degrades to `General` (intent) or to a keyword match
//! (confirmation).

use afina_core::message::Message;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::ModelClient;

/// What the user wants from this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    /// Run a review of the attached documents
    Analyze,
    /// Ask about the previous review
    AskPrevReport,
    /// Anything else
    General,
}

impl Intent {
    fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "ANALYZE" => Some(Self::Analyze),
            "ASK_PREV_REPORT" => Some(Self::AskPrevReport),
            "GENERAL" => Some(Self::General),
            _ => None,
        }
    }
}

const INTENT_PROMPT: &str = "\
You route messages in a document-review assistant. Classify the user's message into exactly one intent:
- ANALYZE: the user asks to analyze, review or check the uploaded documents (model reports, model cards, validation reports).
- ASK_PREV_REPORT: the user asks about the results of an analysis that was already done (\"what did you find\", \"what about the metrics in the review\").
- GENERAL: anything else, including small talk and general questions.
Reply with a JSON object only: {\"intent\": \"ANALYZE\" | \"ASK_PREV_REPORT\" | \"GENERAL\"}.";

const CONFIRM_PROMPT: &str = "\
The assistant asked the user whether to run an analysis of the uploaded documents. \
Decide whether the user's reply is an agreement.
Reply with a JSON object only: {\"yes\": true} or {\"yes\": false}.";

/// Whole-word tokens that count as agreement when the model cannot decide.
const AFFIRMATIVE_TOKENS: &[&str] = &["да", "ок", "хорошо", "запускай", "давай", "go", "ok", "yes"];

/// Parse a JSON object from a model reply, tolerating a markdown fence.
pub(crate) fn parse_json_object(raw: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    match serde_json::from_str::<serde_json::Value>(body.trim()) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Keyword fallback for confirmations.
pub fn keyword_affirmative(text: &str) -> bool {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| AFFIRMATIVE_TOKENS.contains(&word))
}

/// Classifies user messages with the router model.
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    client: ModelClient,
}

impl IntentClassifier {
    pub fn new(client: ModelClient) -> Self {
        Self { client }
    }

    /// Classify `text`. Never fails; anything unclear is `General`.
    pub async fn classify(&self, text: &str) -> Intent {
        if text.trim().is_empty() {
            return Intent::General;
        }

        let request = self
            .client
            .request(vec![Message::system(INTENT_PROMPT), Message::user(text)])
            .json_object();

        let raw = match self.client.complete(request).await {
            Ok(response) => response.message.content,
            Err(e) => {
                warn!(error = %e, "Intent classification failed, defaulting to GENERAL");
                return Intent::General;
            }
        };

        let intent = parse_json_object(&raw)
            .and_then(|obj| obj.get("intent").and_then(|v| v.as_str()).and_then(Intent::from_label));

        match intent {
            Some(intent) => {
                debug!(?intent, "Classified intent");
                intent
            }
            None => {
                warn!(reply = %raw, "Unrecognized intent reply, defaulting to GENERAL");
                Intent::General
            }
        }
    }

    /// Whether `text` agrees to the pending analysis offer.
    ///
    /// A failed call or a reply without a boolean `yes` falls back to
    /// [`keyword_affirmative`].
    pub async fn is_affirmative(&self, text: &str) -> bool {
        let request = self
            .client
            .request(vec![Message::system(CONFIRM_PROMPT), Message::user(text)])
            .json_object();

        let verdict = match self.client.complete(request).await {
            Ok(response) => parse_json_object(&response.message.content)
                .and_then(|obj| obj.get("yes").and_then(|v| v.as_bool())),
            Err(e) => {
                warn!(error = %e, "Confirmation check failed, using keyword fallback");
                None
            }
        };

        verdict.unwrap_or_else(|| keyword_affirmative(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Reply, ScriptedProvider, text};
    use afina_core::error::ProviderError;
    use afina_core::provider::ResponseFormat;

    fn classifier(replies: Vec<Reply>) -> (IntentClassifier, std::sync::Arc<ScriptedProvider>) {
        let provider = ScriptedProvider::new(replies);
        let client = ModelClient::new(provider.clone(), "router-model", 0.0);
        (IntentClassifier::new(client), provider)
    }

    fn network_failure() -> Reply {
        Reply::Fail(ProviderError::Network("connection refused".into()))
    }

    #[tokio::test]
    async fn classify_reads_intent_label() {
        let (c, provider) = classifier(vec![text(r#"{"intent": "ANALYZE"}"#)]);
        assert_eq!(c.classify("проанализируй отчёт").await, Intent::Analyze);

        let request = &provider.requests()[0];
        assert_eq!(request.response_format, Some(ResponseFormat::JsonObject));
        assert_eq!(request.model, "router-model");
    }

    #[tokio::test]
    async fn classify_accepts_fenced_json() {
        let (c, _) = classifier(vec![text("```json\n{\"intent\": \"ask_prev_report\"}\n```")]);
        assert_eq!(c.classify("что было в прошлом анализе?").await, Intent::AskPrevReport);
    }

    #[tokio::test]
    async fn classify_degrades_to_general() {
        let (c, provider) = classifier(vec![
            text("not json at all"),
            text(r#"{"intent": "SUMMARIZE"}"#),
            network_failure(),
        ]);
        assert_eq!(c.classify("a").await, Intent::General);
        assert_eq!(c.classify("b").await, Intent::General);
        assert_eq!(c.classify("c").await, Intent::General);

        // Empty input never reaches the model
        assert_eq!(c.classify("   ").await, Intent::General);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn affirmative_uses_model_verdict() {
        let (c, _) = classifier(vec![text(r#"{"yes": true}"#), text(r#"{"yes": false}"#)]);
        assert!(c.is_affirmative("конечно").await);
        // The model wins over the keyword list
        assert!(!c.is_affirmative("ok, but not now").await);
    }

    #[tokio::test]
    async fn affirmative_falls_back_to_keywords() {
        let (c, _) = classifier(vec![network_failure(), text(r#"{"answer": "sure"}"#), text("{}")]);
        assert!(c.is_affirmative("Да").await);
        assert!(c.is_affirmative("ok!").await);
        assert!(!c.is_affirmative("нет, спасибо").await);
    }

    #[test]
    fn keywords_match_whole_words_only() {
        assert!(keyword_affirmative("давай, запускай"));
        assert!(keyword_affirmative("GO"));
        assert!(!keyword_affirmative("дата"));
        assert!(!keyword_affirmative("google it"));
        assert!(!keyword_affirmative(""));
    }

    #[test]
    fn parse_json_object_rejects_non_objects() {
        assert!(parse_json_object("[1, 2]").is_none());
        assert!(parse_json_object("").is_none());
        assert!(parse_json_object(r#"{"a": 1}"#).is_some());
    }
}
