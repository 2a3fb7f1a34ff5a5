//! The Afina chat graph.
//!
//! Every turn walks a small state machine:
//!
//! 1. **Route**: reconcile attached files, resolve a pending clarification,
//!    then classify the message
//! 2. **Analyze**: review the documents against a fixed rubric and store the
//!    report
//! 3. **AskPrevReport**: answer from the stored report
//! 4. **General**: the tool-using assistant, looping through **Tools** until
//!    it answers in text or runs out of tool rounds
//!
//! Stage output reaches the caller as a stream of `{content, done}` frames.

pub mod analysis;
pub mod assistant;
pub mod context;
pub mod follow_up;
pub mod graph;
pub mod intent;
pub mod model;
pub mod router;
pub mod runtime;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use analysis::{AnalysisOutput, AnalysisStage};
pub use assistant::{AssistantStage, AssistantTurn, sanitize};
pub use context::EngineContext;
pub use follow_up::FollowUpStage;
pub use graph::{GraphEngine, Signal, Stage, TurnSummary, transition};
pub use intent::{Intent, IntentClassifier};
pub use model::ModelClient;
pub use router::{RouteDecision, Router};
pub use runtime::ChatRuntime;
pub use stream_event::{EventKind, EventSink, Frame, FrameEmitter, StageEvent};
