//! Conversation registry and turn execution.
//!
//! Each conversation has its own async mutex, so turns for one id queue up
//! while different conversations run concurrently. A turn works on a clone
//! of the state and only writes it back once the engine reached `End` and
//! the caller is still listening.

use afina_config::AppConfig;
use afina_core::event::{DomainEvent, EventBus};
use afina_core::message::ConversationId;
use afina_core::state::ConversationState;
use afina_files::FileCache;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::graph::GraphEngine;
use crate::stream_event::{EventSink, Frame, pump};

const STAGE_EVENT_BUFFER: usize = 64;
const FRAME_BUFFER: usize = 64;

type Slot = Arc<Mutex<ConversationState>>;

pub struct ChatRuntime {
    engine: GraphEngine,
    conversations: Mutex<HashMap<ConversationId, Slot>>,
    event_bus: Arc<EventBus>,
    files: Arc<FileCache>,
}

impl ChatRuntime {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            engine: GraphEngine::new(&ctx),
            conversations: Mutex::new(HashMap::new()),
            event_bus: ctx.event_bus,
            files: ctx.files,
        }
    }

    pub fn from_config(config: &AppConfig) -> afina_core::Result<Self> {
        Ok(Self::new(EngineContext::from_config(config)?))
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// The file cache, whose store also backs uploads.
    pub fn files(&self) -> &Arc<FileCache> {
        &self.files
    }

    async fn slot(&self, id: &ConversationId) -> Slot {
        let mut conversations = self.conversations.lock().await;
        conversations
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationState::new(id.clone()))))
            .clone()
    }

    /// Committed state of a conversation, waiting for any running turn.
    pub async fn snapshot(&self, id: &ConversationId) -> Option<ConversationState> {
        let slot = self.conversations.lock().await.get(id).cloned()?;
        let state = slot.lock().await;
        Some(state.clone())
    }

    /// Start a turn and return its frame stream.
    ///
    /// The stream always ends with one `done` frame, carrying `error` when
    /// the turn failed. Dropping the receiver abandons the turn.
    pub fn process_turn(
        self: &Arc<Self>,
        id: ConversationId,
        user_text: String,
        filenames: Vec<String>,
    ) -> mpsc::Receiver<Frame> {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_BUFFER);
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            runtime.run_turn(id, user_text, filenames, frame_tx).await;
        });
        frame_rx
    }

    async fn run_turn(
        &self,
        id: ConversationId,
        user_text: String,
        filenames: Vec<String>,
        frames: mpsc::Sender<Frame>,
    ) {
        let slot = self.slot(&id).await;
        let mut committed = slot.lock().await;
        let mut working = committed.clone();

        info!(conversation_id = %id, files = filenames.len(), "Turn started");
        self.event_bus.publish(DomainEvent::TurnStarted {
            conversation_id: id.to_string(),
            files: filenames.len(),
            timestamp: Utc::now(),
        });

        let (event_tx, event_rx) = mpsc::channel(STAGE_EVENT_BUFFER);
        let forwarder = tokio::spawn(pump(event_rx, frames.clone()));
        let sink = EventSink::new(event_tx);

        let result = self
            .engine
            .run_turn(&mut working, &user_text, &filenames, &sink)
            .await;
        drop(sink);
        let listening = forwarder.await.unwrap_or(false) && !frames.is_closed();

        match result {
            Ok(summary) if listening => {
                *committed = working;
                info!(
                    conversation_id = %id,
                    route = summary.route,
                    steps = summary.steps,
                    tool_rounds = summary.tool_rounds,
                    "Turn completed"
                );
                self.event_bus.publish(DomainEvent::TurnCompleted {
                    conversation_id: id.to_string(),
                    steps: summary.steps,
                    tool_rounds: summary.tool_rounds,
                    timestamp: Utc::now(),
                });
                let _ = frames.send(Frame::done()).await;
            }
            Ok(_) => {
                warn!(conversation_id = %id, "Caller went away; turn discarded");
                self.publish_failure(&id, "caller disconnected");
            }
            Err(e) => {
                warn!(conversation_id = %id, error = %e, "Turn failed; nothing committed");
                self.publish_failure(&id, &e.to_string());
                let _ = frames.send(Frame::failed(e.to_string())).await;
            }
        }
    }

    fn publish_failure(&self, id: &ConversationId, message: &str) {
        self.event_bus.publish(DomainEvent::TurnFailed {
            conversation_id: id.to_string(),
            error_message: message.to_string(),
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{Harness, Reply, text};
    use afina_core::error::ProviderError;
    use afina_core::message::Role;
    use afina_files::DocumentStore;

    fn intent(label: &str) -> Reply {
        text(&format!(r#"{{"intent": "{label}"}}"#))
    }

    async fn collect(mut rx: mpsc::Receiver<Frame>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn turn_ends_with_single_done_frame() {
        let h = Harness::new(vec![intent("GENERAL")], vec![text("hello there")], vec![]);
        let runtime = Arc::new(ChatRuntime::new(h.context()));
        let id = ConversationId::from("c1");

        let frames = collect(runtime.process_turn(id.clone(), "hi".into(), vec![])).await;
        let (last, body) = frames.split_last().unwrap();
        assert_eq!(*last, Frame::done());
        assert!(body.iter().all(|f| !f.done));
        assert_eq!(body.iter().map(|f| f.content.as_str()).collect::<String>(), "hello there");

        let state = runtime.snapshot(&id).await.unwrap();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn failed_turn_commits_nothing() {
        let h = Harness::new(
            vec![intent("GENERAL"), intent("GENERAL")],
            vec![
                text("first answer"),
                Reply::Fail(ProviderError::Network("reset".into())),
            ],
            vec![],
        );
        let runtime = Arc::new(ChatRuntime::new(h.context()));
        let id = ConversationId::from("c1");

        collect(runtime.process_turn(id.clone(), "one".into(), vec![])).await;
        let frames = collect(runtime.process_turn(id.clone(), "two".into(), vec![])).await;

        assert_eq!(frames.len(), 1);
        assert!(frames[0].done);
        assert!(frames[0].error.as_deref().unwrap().contains("reset"));

        let state = runtime.snapshot(&id).await.unwrap();
        let contents: Vec<&str> = state.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "first answer"]);
    }

    #[tokio::test]
    async fn clarification_flag_survives_between_turns() {
        let h = Harness::new(
            vec![intent("ASK_PREV_REPORT"), text(r#"{"yes": true}"#)],
            vec![],
            vec![],
        );
        let runtime = Arc::new(ChatRuntime::new(h.context()));
        let id = ConversationId::from("c1");

        let frames = collect(runtime.process_turn(id.clone(), "что в прошлом анализе?".into(), vec![])).await;
        assert_eq!(frames.len(), 2);
        assert!(runtime.snapshot(&id).await.unwrap().clarification_pending);

        collect(runtime.process_turn(id.clone(), "да".into(), vec![])).await;
        assert!(runtime.snapshot(&id).await.unwrap().clarification_pending);
    }

    #[tokio::test]
    async fn dropped_receiver_commits_nothing() {
        let h = Harness::new(vec![intent("GENERAL")], vec![text("a long streamed answer")], vec![]);
        let runtime = Arc::new(ChatRuntime::new(h.context()));
        let mut events = runtime.event_bus().subscribe();
        let id = ConversationId::from("c1");

        drop(runtime.process_turn(id.clone(), "hi".into(), vec![]));

        loop {
            let event = events.recv().await.unwrap();
            if let DomainEvent::TurnFailed { .. } = event.as_ref() {
                break;
            }
            assert!(!matches!(event.as_ref(), DomainEvent::TurnCompleted { .. }));
        }
        let state = runtime.snapshot(&id).await.unwrap();
        assert!(state.messages.is_empty());
    }

    #[tokio::test]
    async fn concurrent_conversations_keep_their_own_files() {
        let h = Harness::new(
            vec![intent("GENERAL"), intent("GENERAL")],
            vec![text("ok"), text("ok")],
            vec![],
        );
        let a = ConversationId::from("alpha");
        let b = ConversationId::from("beta");
        h.store.save(&a, "a.txt", b"alpha doc").await.unwrap();
        h.store.save(&b, "b.txt", b"beta doc").await.unwrap();
        let runtime = Arc::new(ChatRuntime::new(h.context()));

        let (fa, fb) = tokio::join!(
            collect(runtime.process_turn(a.clone(), "hi".into(), vec!["a.txt".into(), "b.txt".into()])),
            collect(runtime.process_turn(b.clone(), "hi".into(), vec!["b.txt".into(), "a.txt".into()])),
        );
        assert!(fa.last().unwrap().done && fa.last().unwrap().error.is_none());
        assert!(fb.last().unwrap().done && fb.last().unwrap().error.is_none());

        let sa = runtime.snapshot(&a).await.unwrap();
        let sb = runtime.snapshot(&b).await.unwrap();
        assert_eq!(sa.file_index.keys().collect::<Vec<_>>(), vec!["a.txt"]);
        assert_eq!(sb.file_index.keys().collect::<Vec<_>>(), vec!["b.txt"]);
        assert_eq!(sa.file_index["a.txt"], "alpha doc");
        assert!(!sa.file_hashes.contains_key("b.txt"));
    }

    #[tokio::test]
    async fn turns_for_one_conversation_are_serialized() {
        let h = Harness::new(
            vec![intent("GENERAL"), intent("GENERAL")],
            vec![text("first"), text("second")],
            vec![],
        );
        let runtime = Arc::new(ChatRuntime::new(h.context()));
        let id = ConversationId::from("c1");

        let first = runtime.process_turn(id.clone(), "one".into(), vec![]);
        let second = runtime.process_turn(id.clone(), "two".into(), vec![]);
        let (_, _) = tokio::join!(collect(first), collect(second));

        let state = runtime.snapshot(&id).await.unwrap();
        let roles: Vec<Role> = state.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn turn_lifecycle_events_are_published() {
        let h = Harness::new(vec![intent("GENERAL")], vec![text("ok")], vec![]);
        let runtime = Arc::new(ChatRuntime::new(h.context()));
        let mut events = runtime.event_bus().subscribe();

        collect(runtime.process_turn(ConversationId::from("c1"), "hi".into(), vec![])).await;

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.event_type());
        }
        assert_eq!(kinds, vec!["turn_started", "route_selected", "turn_completed"]);
    }
}
