//! Tools the assistant stage can call, and the registry that runs them.
//!
//! A model asks for a tool as a [`MessageToolCall`] whose arguments are a raw
//! JSON string. [`ToolCall::parse`] turns that into a typed call, and
//! [`ToolCall::fingerprint`] identifies repeated requests within a turn.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ToolError;
use crate::message::MessageToolCall;
use crate::provider::ToolDefinition;

/// A parsed tool request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Matches the model's `tool_call.id`
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Identity of a call for replay: tool name plus canonical arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallFingerprint {
    name: String,
    arguments: String,
}

impl ToolCall {
    /// Parse the raw arguments of a model-issued call.
    pub fn parse(call: &MessageToolCall) -> Result<Self, ToolError> {
        let arguments = serde_json::from_str(&call.arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        Ok(Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        })
    }

    /// Same name and same arguments give the same fingerprint, regardless
    /// of key order or whitespace in the original JSON.
    pub fn fingerprint(&self) -> CallFingerprint {
        CallFingerprint {
            name: self.name.clone(),
            arguments: canonical_json(&self.arguments),
        }
    }
}

impl CallFingerprint {
    /// Fingerprint for a call whose arguments did not parse.
    pub fn raw(call: &MessageToolCall) -> Self {
        Self {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        }
    }
}

fn canonical_json(value: &serde_json::Value) -> String {
    fn sorted(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), sorted(v)))
                    .collect::<BTreeMap<_, _>>()
                    .into_iter()
                    .collect(),
            ),
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sorted).collect())
            }
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

/// Outcome of a tool execution. Failures the model should see are carried
/// in `output` with `success = false`, not raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Filled in by [`ToolRegistry::execute`]
    pub call_id: String,
    pub success: bool,
    /// Text handed back to the model
    pub output: String,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            success: false,
            output: output.into(),
        }
    }
}

/// A capability offered to the assistant stage.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model calls it by, e.g. `search_web`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Tools by name. Iteration is ordered, so the definitions sent to the
/// model are stable across requests.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous one with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Run a call. The returned result carries the call's id.
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;
        let mut result = tool.execute(call.arguments.clone()).await?;
        result.call_id = call.id.clone();
        Ok(result)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
