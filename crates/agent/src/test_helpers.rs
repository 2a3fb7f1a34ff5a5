//! Shared test helpers: a scripted provider and engine wiring with stubs.

use afina_core::error::ProviderError;
use afina_core::event::EventBus;
use afina_core::message::{Message, MessageToolCall};
use afina_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk,
};
use afina_core::tool::ToolRegistry;
use afina_files::{DefaultExtractor, FileCache, MemoryDocumentStore};
use afina_tools::{FailureKind, SearchBackend, SearchFailure, SearchHit, WebSearchTool};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use afina_config::LimitsConfig;

use crate::context::EngineContext;
use crate::model::ModelClient;

/// One scripted provider reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    ToolCalls(Vec<MessageToolCall>),
    Fail(ProviderError),
}

pub fn text(s: &str) -> Reply {
    Reply::Text(s.to_string())
}

/// A provider that answers from a queue and records every request.
///
/// When the queue runs dry it fails the call instead of panicking, so a test
/// that over-calls sees a turn failure rather than a dead task.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next(&self, request: ProviderRequest) -> Result<Reply, ProviderError> {
        self.requests.lock().unwrap().push(request);
        match self.replies.lock().unwrap().pop_front() {
            Some(Reply::Fail(e)) => Err(e),
            Some(reply) => Ok(reply),
            None => Err(ProviderError::NotConfigured("script exhausted".into())),
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let message = match self.next(request)? {
            Reply::Text(t) => Message::assistant(t),
            Reply::ToolCalls(calls) => Message::assistant_with_tools("", calls),
            Reply::Fail(e) => return Err(e),
        };
        Ok(ProviderResponse {
            message,
            usage: None,
            model: "scripted-model".into(),
        })
    }

    /// Streams text word by word, then a final chunk with any tool calls.
    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let reply = self.next(request)?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        tokio::spawn(async move {
            let (content, tool_calls) = match reply {
                Reply::Text(t) => (t, Vec::new()),
                Reply::ToolCalls(calls) => (String::new(), calls),
                Reply::Fail(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            for (i, word) in content.split(' ').enumerate() {
                let piece = if i == 0 { word.to_string() } else { format!(" {word}") };
                if tx
                    .send(Ok(StreamChunk {
                        content: Some(piece),
                        ..Default::default()
                    }))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = tx
                .send(Ok(StreamChunk {
                    tool_calls,
                    done: true,
                    ..Default::default()
                }))
                .await;
        });
        Ok(rx)
    }
}

pub fn search_call(id: &str, query: &str) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: "search_web".into(),
        arguments: serde_json::json!({ "query": query }).to_string(),
    }
}

/// Search backend with a fixed outcome that counts calls.
pub struct StubSearch {
    outcome: Result<Vec<SearchHit>, SearchFailure>,
    calls: Mutex<usize>,
}

impl StubSearch {
    pub fn ok(hits: Vec<SearchHit>) -> Arc<Self> {
        Arc::new(Self {
            outcome: Ok(hits),
            calls: Mutex::new(0),
        })
    }

    pub fn network_error() -> Arc<Self> {
        Arc::new(Self {
            outcome: Err(SearchFailure::new(FailureKind::Network, "connection reset")),
            calls: Mutex::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl SearchBackend for StubSearch {
    fn name(&self) -> &str {
        "stub"
    }

    async fn search(&self, _query: &str, _max: usize) -> Result<Vec<SearchHit>, SearchFailure> {
        *self.calls.lock().unwrap() += 1;
        self.outcome.clone()
    }
}

/// Engine wiring with one scripted provider per model role.
pub struct Harness {
    pub router: Arc<ScriptedProvider>,
    pub assistant: Arc<ScriptedProvider>,
    pub analyst: Arc<ScriptedProvider>,
    pub search: Arc<StubSearch>,
    pub store: Arc<MemoryDocumentStore>,
}

impl Harness {
    pub fn new(router: Vec<Reply>, assistant: Vec<Reply>, analyst: Vec<Reply>) -> Self {
        Self {
            router: ScriptedProvider::new(router),
            assistant: ScriptedProvider::new(assistant),
            analyst: ScriptedProvider::new(analyst),
            search: StubSearch::ok(Vec::new()),
            store: Arc::new(MemoryDocumentStore::new()),
        }
    }

    pub fn with_search(mut self, search: Arc<StubSearch>) -> Self {
        self.search = search;
        self
    }

    pub fn context(&self) -> EngineContext {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(WebSearchTool::new(self.search.clone(), 5)));
        EngineContext {
            router: ModelClient::new(self.router.clone(), "router-model", 0.0),
            assistant: ModelClient::new(self.assistant.clone(), "assistant-model", 0.0),
            analyst: ModelClient::new(self.analyst.clone(), "analyst-model", 0.0),
            tools: Arc::new(tools),
            files: Arc::new(FileCache::new(self.store.clone(), Arc::new(DefaultExtractor))),
            limits: LimitsConfig::default(),
            event_bus: Arc::new(EventBus::default()),
        }
    }
}
