//! Stage events and the frames the caller sees.
//!
//! Stages push [`StageEvent`]s into a bounded channel as work happens. The
//! [`FrameEmitter`] turns them into `{content, done}` frames: only displayable
//! text is forwarded, and a step that already streamed tokens is not repeated
//! as a full block.

use afina_core::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::mpsc;

use crate::graph::Stage;

/// What happened inside a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Partial text from a streaming call
    Token(String),
    /// A complete text block from a non-streaming call
    Output(String),
    /// The assistant asked for a tool
    ToolCall { name: String, arguments: String },
    /// A tool finished
    ToolResult { name: String, success: bool },
    /// The router picked a branch
    Route(String),
}

/// An event emitted by a stage during one engine step.
#[derive(Debug, Clone, PartialEq)]
pub struct StageEvent {
    pub step: usize,
    pub stage: Stage,
    pub displayable: bool,
    pub kind: EventKind,
}

impl StageEvent {
    pub fn token(step: usize, stage: Stage, text: impl Into<String>) -> Self {
        Self {
            step,
            stage,
            displayable: true,
            kind: EventKind::Token(text.into()),
        }
    }

    pub fn output(step: usize, stage: Stage, text: impl Into<String>) -> Self {
        Self {
            step,
            stage,
            displayable: true,
            kind: EventKind::Output(text.into()),
        }
    }

    /// An internal notice (tool or routing chatter), never shown.
    pub fn notice(step: usize, stage: Stage, kind: EventKind) -> Self {
        Self {
            step,
            stage,
            displayable: false,
            kind,
        }
    }
}

/// One unit of the streamed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub content: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Frame {
    pub fn chunk(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: false,
            error: None,
        }
    }

    /// The terminal frame of a successful turn.
    pub fn done() -> Self {
        Self {
            content: String::new(),
            done: true,
            error: None,
        }
    }

    /// The terminal frame of a failed turn.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            done: true,
            error: Some(message.into()),
        }
    }
}

/// Sending half used by the engine and its stages.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StageEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<StageEvent>) -> Self {
        Self { tx }
    }

    /// Hand an event to the emitter. Fails once the caller has gone away.
    pub async fn send(&self, event: StageEvent) -> Result<(), EngineError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| EngineError::Cancelled("frame receiver dropped".into()))
    }
}

/// Filters stage events into frames.
#[derive(Debug, Default)]
pub struct FrameEmitter {
    streamed_steps: HashSet<usize>,
}

impl FrameEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The frame for `event`, if it should be shown at all.
    pub fn accept(&mut self, event: StageEvent) -> Option<Frame> {
        if !event.displayable {
            return None;
        }
        match event.kind {
            EventKind::Token(text) => {
                if text.is_empty() {
                    return None;
                }
                self.streamed_steps.insert(event.step);
                Some(Frame::chunk(text))
            }
            EventKind::Output(text) => {
                if text.is_empty() || self.streamed_steps.contains(&event.step) {
                    return None;
                }
                Some(Frame::chunk(text))
            }
            EventKind::ToolCall { .. } | EventKind::ToolResult { .. } | EventKind::Route(_) => None,
        }
    }
}

/// Forward events to frames until the engine drops its sink.
///
/// Returns `false` if the frame receiver closed first. Returning drops
/// `events`, so the engine's next send fails and the turn is abandoned.
pub async fn pump(mut events: mpsc::Receiver<StageEvent>, frames: mpsc::Sender<Frame>) -> bool {
    let mut emitter = FrameEmitter::new();
    while let Some(event) = events.recv().await {
        if let Some(frame) = emitter.accept(event)
            && frames.send(frame).await.is_err()
        {
            return false;
        }
    }
    !frames.is_closed()
}
