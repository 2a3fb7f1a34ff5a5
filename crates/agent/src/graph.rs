//! The per-turn state machine.
//!
//! ```text
//! Route ─┬─> Analyze ───────> End
//!        ├─> AskPrevReport ─> End
//!        ├─> General ─┬─────> End
//!        │      ^     v
//!        │      └── Tools
//!        └──────────────────> End
//! ```
//!
//! Transitions come from [`transition`]; any (stage, signal) pair not listed
//! there is an engine error.

use afina_core::error::{EngineError, Error, ToolError};
use afina_core::event::{DomainEvent, EventBus};
use afina_core::message::{ConversationId, Message, MessageToolCall};
use afina_core::state::{ConversationState, Report};
use afina_core::tool::{CallFingerprint, ToolCall, ToolRegistry};
use afina_tools::{FailureKind, sentinel};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::analysis::AnalysisStage;
use crate::assistant::AssistantStage;
use crate::context::EngineContext;
use crate::follow_up::{FollowUpStage, recent_history};
use crate::intent::IntentClassifier;
use crate::router::{ASK_RUN_ANALYSIS_MESSAGE, RouteDecision, Router};
use crate::stream_event::{EventKind, EventSink, StageEvent};

/// A node of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Route,
    Analyze,
    AskPrevReport,
    General,
    Tools,
    End,
}

/// What a stage reports when it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Analyze,
    AskPrevReport,
    General,
    Finish,
    ToolCalls,
    ToolsDone,
}

/// The transition table.
pub fn transition(stage: Stage, signal: Signal) -> Result<Stage, EngineError> {
    use Signal as S;
    use Stage::*;

    match (stage, signal) {
        (Route, S::Analyze) => Ok(Analyze),
        (Route, S::AskPrevReport) => Ok(AskPrevReport),
        (Route, S::General) => Ok(General),
        (Route, S::Finish) => Ok(End),
        (Analyze, S::Finish) => Ok(End),
        (AskPrevReport, S::Finish) => Ok(End),
        (General, S::ToolCalls) => Ok(Tools),
        (General, S::Finish) => Ok(End),
        (Tools, S::ToolsDone) => Ok(General),
        (stage, signal) => Err(EngineError::InvalidTransition {
            stage: format!("{stage:?}"),
            signal: format!("{signal:?}"),
        }),
    }
}

/// Counters for a finished turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSummary {
    pub steps: usize,
    pub tool_rounds: usize,
    pub route: &'static str,
}

pub struct GraphEngine {
    router: Router,
    analysis: AnalysisStage,
    follow_up: FollowUpStage,
    assistant: AssistantStage,
    tools: Arc<ToolRegistry>,
    max_tool_rounds: usize,
    event_bus: Arc<EventBus>,
}

impl GraphEngine {
    pub fn new(ctx: &EngineContext) -> Self {
        Self {
            router: Router::new(IntentClassifier::new(ctx.router.clone()), ctx.files.clone()),
            analysis: AnalysisStage::new(ctx.analyst.clone(), &ctx.limits),
            follow_up: FollowUpStage::new(ctx.assistant.clone(), &ctx.limits),
            assistant: AssistantStage::new(ctx.assistant.clone(), ctx.limits.context_window),
            tools: ctx.tools.clone(),
            max_tool_rounds: ctx.limits.max_tool_rounds,
            event_bus: ctx.event_bus.clone(),
        }
    }

    /// Run one turn against `state`.
    ///
    /// `state` is the caller's working copy; on error it may be half-updated
    /// and must be discarded.
    pub async fn run_turn(
        &self,
        state: &mut ConversationState,
        user_text: &str,
        filenames: &[String],
        sink: &EventSink,
    ) -> Result<TurnSummary, Error> {
        state.push(Message::user(user_text));

        let mut stage = Stage::Route;
        let mut steps = 0;
        let mut tool_rounds = 0;
        let mut route = "";
        let mut pending_calls: Vec<MessageToolCall> = Vec::new();
        let mut executed: HashMap<CallFingerprint, String> = HashMap::new();

        while stage != Stage::End {
            steps += 1;
            debug!(conversation_id = %state.id, ?stage, step = steps, "Entering stage");

            let signal = match stage {
                Stage::Route => {
                    let decision = self.router.route(state, filenames, user_text).await;
                    route = decision.label();
                    info!(conversation_id = %state.id, route, "Route selected");
                    self.event_bus.publish(DomainEvent::RouteSelected {
                        conversation_id: state.id.to_string(),
                        route: route.to_string(),
                        timestamp: Utc::now(),
                    });
                    sink.send(StageEvent::notice(steps, stage, EventKind::Route(route.into())))
                        .await?;

                    match decision {
                        RouteDecision::Analyze => Signal::Analyze,
                        RouteDecision::AskPrevReport => Signal::AskPrevReport,
                        RouteDecision::General => Signal::General,
                        RouteDecision::Clarify => {
                            self.reply(state, sink, steps, stage, ASK_RUN_ANALYSIS_MESSAGE).await?;
                            Signal::Finish
                        }
                        RouteDecision::EndWithMessage(message) => {
                            self.reply(state, sink, steps, stage, &message).await?;
                            Signal::Finish
                        }
                    }
                }

                Stage::Analyze => {
                    let output = self.analysis.analyze(&state.file_index, user_text).await?;
                    let source_files = state.file_index.clone();
                    let file_count = source_files.len();
                    state.store_report(Report {
                        question: user_text.to_string(),
                        prompt_snapshot: output.prompt_snapshot,
                        answer_markdown: output.markdown.clone(),
                        source_files,
                        created_at: Utc::now(),
                    });
                    self.event_bus.publish(DomainEvent::ReportStored {
                        conversation_id: state.id.to_string(),
                        source_files: file_count,
                        timestamp: Utc::now(),
                    });
                    self.reply(state, sink, steps, stage, &output.markdown).await?;
                    Signal::Finish
                }

                Stage::AskPrevReport => {
                    let report = state
                        .last_report
                        .as_ref()
                        .ok_or_else(|| EngineError::MissingState("last_report".into()))?;
                    // The current message is the last one; history is what came before
                    let earlier = &state.messages[..state.messages.len().saturating_sub(1)];
                    let recent = recent_history(earlier, self.follow_up.history_len());
                    let answer = self.follow_up.answer(&recent, report, user_text).await?;
                    self.reply(state, sink, steps, stage, &answer).await?;
                    Signal::Finish
                }

                Stage::General => {
                    let offer_tools = tool_rounds < self.max_tool_rounds && !self.tools.is_empty();
                    let definitions = if offer_tools {
                        self.tools.definitions()
                    } else {
                        Vec::new()
                    };

                    let turn = self
                        .assistant
                        .assist(&state.messages, definitions, sink, steps)
                        .await?;

                    if offer_tools && !turn.tool_calls.is_empty() {
                        for call in &turn.tool_calls {
                            sink.send(StageEvent::notice(
                                steps,
                                stage,
                                EventKind::ToolCall {
                                    name: call.name.clone(),
                                    arguments: call.arguments.clone(),
                                },
                            ))
                            .await?;
                        }
                        state.push(Message::assistant_with_tools(turn.text, turn.tool_calls.clone()));
                        pending_calls = turn.tool_calls;
                        Signal::ToolCalls
                    } else {
                        if !turn.tool_calls.is_empty() {
                            warn!(
                                conversation_id = %state.id,
                                calls = turn.tool_calls.len(),
                                "Ignoring tool calls made without tools on offer"
                            );
                        }
                        if !turn.streamed {
                            sink.send(StageEvent::output(steps, stage, turn.text.clone())).await?;
                        }
                        state.push(Message::assistant(turn.text));
                        Signal::Finish
                    }
                }

                Stage::Tools => {
                    tool_rounds += 1;
                    for call in std::mem::take(&mut pending_calls) {
                        let (output, success) =
                            self.execute_tool(&state.id, &call, &mut executed).await;
                        sink.send(StageEvent::notice(
                            steps,
                            stage,
                            EventKind::ToolResult {
                                name: call.name.clone(),
                                success,
                            },
                        ))
                        .await?;
                        state.push(Message::tool_result(call.id, output));
                    }
                    Signal::ToolsDone
                }

                Stage::End => Signal::Finish,
            };

            stage = transition(stage, signal)?;
        }

        Ok(TurnSummary {
            steps,
            tool_rounds,
            route,
        })
    }

    /// Append a displayable assistant reply and emit it as one block.
    async fn reply(
        &self,
        state: &mut ConversationState,
        sink: &EventSink,
        step: usize,
        stage: Stage,
        text: &str,
    ) -> Result<(), EngineError> {
        state.push(Message::assistant(text));
        sink.send(StageEvent::output(step, stage, text)).await
    }

    /// Run one tool call. Never fails: problems become a sentinel line.
    ///
    /// A call identical to one already made this turn (same name, same
    /// arguments) gets the earlier output without running again.
    async fn execute_tool(
        &self,
        conversation: &ConversationId,
        call: &MessageToolCall,
        executed: &mut HashMap<CallFingerprint, String>,
    ) -> (String, bool) {
        let parsed = ToolCall::parse(call);
        let key = match &parsed {
            Ok(tool_call) => tool_call.fingerprint(),
            Err(_) => CallFingerprint::raw(call),
        };

        if let Some(output) = executed.get(&key) {
            debug!(conversation_id = %conversation, tool = %call.name, "Replaying identical tool call");
            return (output.clone(), true);
        }

        let started = Instant::now();
        let (output, success) = match parsed {
            _ if self.tools.get(&call.name).is_none() => {
                (sentinel(FailureKind::UnknownTool, &call.name), false)
            }
            Err(ToolError::InvalidArguments(detail)) => {
                (sentinel(FailureKind::InvalidArguments, &detail), false)
            }
            Err(e) => (sentinel(FailureKind::InvalidArguments, &e.to_string()), false),
            Ok(tool_call) => match self.tools.execute(&tool_call).await {
                Ok(result) => (result.output, result.success),
                Err(e) => (sentinel(FailureKind::Provider, &e.to_string()), false),
            },
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        info!(
            conversation_id = %conversation,
            tool = %call.name,
            success,
            duration_ms,
            "Tool executed"
        );
        self.event_bus.publish(DomainEvent::ToolExecuted {
            conversation_id: conversation.to_string(),
            tool_name: call.name.clone(),
            success,
            duration_ms,
            timestamp: Utc::now(),
        });

        executed.insert(key, output.clone());
        (output, success)
    }
}
