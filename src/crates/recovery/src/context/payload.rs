//! Typed payloads stored in the context store

use crate::router::RoutingHistory;
use crate::{RecoveryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Artifacts of an image build
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildContext {
    pub image_ref: String,
    pub image_id: Option<String>,
    pub dockerfile_path: Option<PathBuf>,
    pub build_context: Option<PathBuf>,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
}

/// Summary prepared for the AI orchestrator after a tool run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiContext {
    pub tool_name: String,
    pub operation_type: String,
    pub success: bool,
    pub error_type: Option<String>,
    #[serde(default)]
    pub root_causes: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// "high", "medium" or "low"
    pub fix_probability: Option<String>,
}

/// Free-form state a tool publishes about itself
///
/// The error router reads `auto_fix_available` and `severity` from `values`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolContext {
    pub tool_name: String,
    #[serde(default)]
    pub values: serde_json::Map<String, serde_json::Value>,
}

impl ToolContext {
    /// Empty context for `tool_name`
    pub fn new(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            values: serde_json::Map::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

/// Consolidated description of a failed tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub session_id: String,
    pub source_tool: String,
    pub error_type: String,
    pub error_code: String,
    pub error_message: String,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub shared_context: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub execution_trace: Vec<String>,
}

/// Closed set of things tools may share
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ContextPayload {
    Build(BuildContext),
    Ai(AiContext),
    Tool(ToolContext),
    Error(ErrorContext),
    Routing(RoutingHistory),
    /// Opaque tool data; must be a JSON object
    Json(serde_json::Value),
}

impl ContextPayload {
    /// Variant name, as used in the `kind` tag
    pub fn kind_name(&self) -> &'static str {
        match self {
            ContextPayload::Build(_) => "build",
            ContextPayload::Ai(_) => "ai",
            ContextPayload::Tool(_) => "tool",
            ContextPayload::Error(_) => "error",
            ContextPayload::Routing(_) => "routing",
            ContextPayload::Json(_) => "json",
        }
    }

    /// Boundary checks applied before a payload is stored
    pub fn validate(&self) -> Result<()> {
        match self {
            ContextPayload::Build(build) if build.image_ref.trim().is_empty() => Err(
                RecoveryError::InvalidContext("build context requires an image_ref".to_string()),
            ),
            ContextPayload::Ai(ai) if ai.tool_name.trim().is_empty() => Err(
                RecoveryError::InvalidContext("AI context requires a tool_name".to_string()),
            ),
            ContextPayload::Tool(tool) if tool.tool_name.trim().is_empty() => Err(
                RecoveryError::InvalidContext("tool context requires a tool_name".to_string()),
            ),
            ContextPayload::Error(err) if err.source_tool.trim().is_empty() => Err(
                RecoveryError::InvalidContext("error context requires a source_tool".to_string()),
            ),
            ContextPayload::Json(value) if !value.is_object() => Err(RecoveryError::InvalidContext(
                "JSON payloads must be objects".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Key/value view used when the payload enriches an error context
    pub fn as_map(&self) -> Option<serde_json::Map<String, serde_json::Value>> {
        match self {
            ContextPayload::Tool(tool) => Some(tool.values.clone()),
            ContextPayload::Json(serde_json::Value::Object(map)) => Some(map.clone()),
            _ => None,
        }
    }
}

impl From<BuildContext> for ContextPayload {
    fn from(value: BuildContext) -> Self {
        ContextPayload::Build(value)
    }
}

impl From<AiContext> for ContextPayload {
    fn from(value: AiContext) -> Self {
        ContextPayload::Ai(value)
    }
}

impl From<ToolContext> for ContextPayload {
    fn from(value: ToolContext) -> Self {
        ContextPayload::Tool(value)
    }
}

impl From<ErrorContext> for ContextPayload {
    fn from(value: ErrorContext) -> Self {
        ContextPayload::Error(value)
    }
}

impl From<RoutingHistory> for ContextPayload {
    fn from(value: RoutingHistory) -> Self {
        ContextPayload::Routing(value)
    }
}
