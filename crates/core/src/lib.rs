//! # Afina Core
//!
//! Domain types, traits, and error definitions for the Afina chat engine.
//! This crate has **no framework dependencies**: it defines the domain model
//! that the provider, tool, file and agent crates implement against.
//!
//! ## Layout
//!
//! - [`message`]: role-tagged messages and tool-call records
//! - [`state`]: per-conversation state (messages, file cache maps, last report)
//! - [`provider`]: the completion capability as a trait
//! - [`tool`]: callable tools and their registry
//! - [`event`]: domain events published while turns run
//! - [`error`]: error taxonomy shared by every crate

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod state;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{EngineError, Error, FileError, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{ConversationId, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ResponseFormat, StreamChunk};
pub use state::{ConversationState, Report};
pub use tool::{CallFingerprint, Tool, ToolCall, ToolRegistry, ToolResult};
