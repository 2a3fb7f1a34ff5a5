//! The general-purpose assistant stage.
//!
//! Builds a bounded, sanitized context from the conversation, streams the
//! reply token by token and collects any tool-call requests.

use afina_core::error::Error;
use afina_core::message::{Message, MessageToolCall, Role};
use afina_core::provider::ToolDefinition;
use std::collections::HashSet;
use tracing::debug;

use crate::graph::Stage;
use crate::model::ModelClient;
use crate::stream_event::{EventSink, StageEvent};

pub const SYSTEM_GENERAL: &str = "\
You are Afina, an assistant for reviewing model documentation. Be concise. \
Use the search_web tool when the user asks you to search the web or when you are not sure of a fact. \
Answer in the user's language.";

/// The last `n` messages of the conversation.
pub fn context_window(messages: &[Message], n: usize) -> &[Message] {
    &messages[messages.len().saturating_sub(n)..]
}

/// Drop unpaired tool traffic from a window.
///
/// An assistant message with tool calls is kept only if the messages right
/// after it answer every one of its call ids. Tool results whose call was not
/// kept are dropped. System messages are never carried over.
pub fn sanitize(window: &[Message]) -> Vec<Message> {
    let mut out = Vec::with_capacity(window.len());
    let mut i = 0;

    while i < window.len() {
        let msg = &window[i];
        match msg.role {
            Role::System | Role::Tool => {
                i += 1;
            }
            Role::Assistant if msg.has_tool_calls() => {
                let mut end = i + 1;
                while end < window.len() && window[end].role == Role::Tool {
                    end += 1;
                }
                let answered: HashSet<&str> = window[i + 1..end]
                    .iter()
                    .filter_map(|m| m.tool_call_id.as_deref())
                    .collect();
                let call_ids: HashSet<&str> = msg.tool_calls.iter().map(|c| c.id.as_str()).collect();

                if call_ids.iter().all(|id| answered.contains(id)) {
                    out.push(msg.clone());
                    out.extend(
                        window[i + 1..end]
                            .iter()
                            .filter(|m| m.tool_call_id.as_deref().is_some_and(|id| call_ids.contains(id)))
                            .cloned(),
                    );
                }
                i = end;
            }
            Role::User | Role::Assistant => {
                out.push(msg.clone());
                i += 1;
            }
        }
    }

    out
}

/// One assistant reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantTurn {
    pub text: String,
    pub tool_calls: Vec<MessageToolCall>,
    /// Whether any text was forwarded as tokens
    pub streamed: bool,
}

/// The tool-using assistant.
#[derive(Debug, Clone)]
pub struct AssistantStage {
    client: ModelClient,
    window: usize,
}

impl AssistantStage {
    pub fn new(client: ModelClient, window: usize) -> Self {
        Self { client, window }
    }

    /// Messages sent to the model for `history`.
    pub fn build_messages(&self, history: &[Message]) -> Vec<Message> {
        let mut messages = vec![Message::system(SYSTEM_GENERAL)];
        messages.extend(sanitize(context_window(history, self.window)));
        messages
    }

    /// Stream one reply, forwarding text tokens to `sink` under `step`.
    pub async fn assist(
        &self,
        history: &[Message],
        tools: Vec<ToolDefinition>,
        sink: &EventSink,
        step: usize,
    ) -> Result<AssistantTurn, Error> {
        let messages = self.build_messages(history);
        debug!(
            messages = messages.len(),
            tools = tools.len(),
            model = self.client.model(),
            "Invoking assistant"
        );

        let request = self.client.request(messages).with_tools(tools);
        let mut rx = self.client.stream(request).await?;
        let mut turn = AssistantTurn::default();

        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            if let Some(content) = chunk.content
                && !content.is_empty()
            {
                turn.text.push_str(&content);
                turn.streamed = true;
                sink.send(StageEvent::token(step, Stage::General, content)).await?;
            }
            turn.tool_calls.extend(chunk.tool_calls);
            if chunk.done {
                break;
            }
        }

        Ok(turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_event::EventKind;
    use crate::test_helpers::{Reply, ScriptedProvider, search_call, text};
    use tokio::sync::mpsc;

    fn call(id: &str) -> MessageToolCall {
        search_call(id, "rust")
    }

    #[test]
    fn window_takes_the_tail() {
        let messages: Vec<Message> = (0..5).map(|i| Message::user(i.to_string())).collect();
        let window = context_window(&messages, 2);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "3");
        assert_eq!(context_window(&messages, 50).len(), 5);
    }

    #[test]
    fn complete_pairs_are_kept_in_order() {
        let window = vec![
            Message::user("search please"),
            Message::assistant_with_tools("", vec![call("a"), call("b")]),
            Message::tool_result("a", "hit a"),
            Message::tool_result("b", "hit b"),
            Message::assistant("done"),
        ];
        let clean = sanitize(&window);
        let roles: Vec<Role> = clean.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
        );
        assert_eq!(clean[2].tool_call_id.as_deref(), Some("a"));
    }

    #[test]
    fn call_without_results_is_dropped() {
        let window = vec![
            Message::user("q"),
            Message::assistant_with_tools("", vec![call("a"), call("b")]),
            Message::tool_result("a", "hit a"),
            Message::user("next"),
        ];
        let clean = sanitize(&window);
        assert_eq!(clean.len(), 2);
        assert!(clean.iter().all(|m| m.role == Role::User));
    }

    #[test]
    fn orphan_results_at_window_edge_are_dropped() {
        let mut history = vec![
            Message::user("q"),
            Message::assistant_with_tools("", vec![call("a")]),
            Message::tool_result("a", "hit"),
            Message::assistant("answer"),
        ];
        history.push(Message::user("thanks"));

        // The call itself falls outside the window
        let clean = sanitize(context_window(&history, 3));
        let contents: Vec<&str> = clean.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["answer", "thanks"]);
    }

    #[test]
    fn system_messages_are_stripped() {
        let window = vec![Message::system("old prompt"), Message::user("hi")];
        assert_eq!(sanitize(&window).len(), 1);
    }

    #[tokio::test]
    async fn assist_streams_tokens() {
        let provider = ScriptedProvider::new(vec![text("Hello there friend")]);
        let stage = AssistantStage::new(ModelClient::new(provider.clone(), "m", 0.0), 20);
        let (tx, mut rx) = mpsc::channel(16);
        let sink = EventSink::new(tx);

        let turn = stage
            .assist(&[Message::user("hi")], Vec::new(), &sink, 3)
            .await
            .unwrap();
        drop(sink);

        assert_eq!(turn.text, "Hello there friend");
        assert!(turn.streamed);
        assert!(turn.tool_calls.is_empty());

        let mut tokens = Vec::new();
        while let Some(event) = rx.recv().await {
            assert_eq!(event.step, 3);
            if let EventKind::Token(t) = event.kind {
                tokens.push(t);
            }
        }
        assert_eq!(tokens.concat(), "Hello there friend");

        let request = &provider.requests()[0];
        assert!(request.stream);
        assert_eq!(request.messages[0].role, Role::System);
    }

    #[tokio::test]
    async fn assist_collects_tool_calls() {
        let provider = ScriptedProvider::new(vec![Reply::ToolCalls(vec![call("c1")])]);
        let stage = AssistantStage::new(ModelClient::new(provider, "m", 0.0), 20);
        let (tx, _rx) = mpsc::channel(16);

        let turn = stage
            .assist(&[Message::user("find it")], Vec::new(), &EventSink::new(tx), 1)
            .await
            .unwrap();
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "search_web");
        assert!(!turn.streamed);
    }
}
