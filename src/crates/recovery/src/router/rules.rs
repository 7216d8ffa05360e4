//! Routing rules, decisions and rule evaluation

use crate::context::ErrorContext;
use crate::{RecoveryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// What the caller should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingAction {
    Route,
    Retry,
    Fail,
    Ignore,
}

/// Retry schedule suggested by a routing decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_type: String,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default)]
    pub retryable_errors: Vec<String>,
}

/// Outcome of evaluating a failure against the routing table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub action: RoutingAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub transform_data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context_updates: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify_tools: Vec<String>,
    pub save_checkpoint: bool,
    pub decision_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternative_flow: Option<String>,
}

impl RoutingDecision {
    /// Decision with no target, policy or data
    pub fn new(action: RoutingAction, reason: impl Into<String>) -> Self {
        Self {
            action,
            target_tool: None,
            retry_policy: None,
            transform_data: Map::new(),
            context_updates: Map::new(),
            notify_tools: Vec::new(),
            save_checkpoint: false,
            decision_reason: reason.into(),
            alternative_flow: None,
        }
    }

    /// Route to `tool`
    pub fn route(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut decision = Self::new(RoutingAction::Route, reason);
        decision.target_tool = Some(tool.into());
        decision
    }

    /// Input adjustment for the target tool
    pub fn with_transform(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.transform_data.insert(key.into(), value.into());
        self
    }

    /// Value to publish in the session context
    pub fn with_context_update(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context_updates.insert(key.into(), value.into());
        self
    }

    /// Named flow to switch to instead of a single tool
    pub fn with_alternative_flow(mut self, flow: impl Into<String>) -> Self {
        self.alternative_flow = Some(flow.into());
        self
    }
}

/// Extra requirements a rule places on the failure
///
/// Shared-context checks only apply when the source tool published a
/// `tool_<name>` context; without one they pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConditions {
    /// Match only while the failure's retry count is at most this
    pub retry_count: Option<u32>,
    /// Require `auto_fix_available` in the shared context
    pub auto_fix: Option<bool>,
    /// Require the shared context's `severity` to equal this
    pub severity: Option<String>,
}

impl RoutingConditions {
    /// No condition set
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// One entry of the routing table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRoutingRule {
    /// Empty matches any source tool
    #[serde(default)]
    pub from_tool: String,
    #[serde(default)]
    pub error_types: Vec<String>,
    #[serde(default)]
    pub error_codes: Vec<String>,
    pub to_tool: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "RoutingConditions::is_empty")]
    pub conditions: RoutingConditions,
    #[serde(default)]
    pub description: String,
}

impl FailureRoutingRule {
    /// Rule with priority 0 and no filters
    pub fn new(from_tool: impl Into<String>, to_tool: impl Into<String>) -> Self {
        Self {
            from_tool: from_tool.into(),
            error_types: Vec::new(),
            error_codes: Vec::new(),
            to_tool: to_tool.into(),
            priority: 0,
            conditions: RoutingConditions::default(),
            description: String::new(),
        }
    }

    /// Match only these error types (any of them)
    pub fn with_error_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.error_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_error_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.error_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Extra conditions checked after types and codes
    pub fn with_conditions(mut self, conditions: RoutingConditions) -> Self {
        self.conditions = conditions;
        self
    }

    /// Lower values win when several rules match
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether this rule applies to the failure
    pub fn matches(&self, error: &ErrorContext) -> bool {
        if !self.from_tool.is_empty() && self.from_tool != error.source_tool {
            return false;
        }

        if !self.error_types.is_empty()
            && !self
                .error_types
                .iter()
                .any(|t| *t == error.error_type || error.error_message.contains(t.as_str()))
        {
            return false;
        }

        if !self.error_codes.is_empty() && !self.error_codes.iter().any(|c| *c == error.error_code) {
            return false;
        }

        conditions_hold(&self.conditions, error)
    }
}

fn conditions_hold(conditions: &RoutingConditions, error: &ErrorContext) -> bool {
    if let Some(max_retries) = conditions.retry_count {
        if error.retry_count > max_retries {
            return false;
        }
    }

    let Some(shared) = error.shared_context.as_ref() else {
        return true;
    };

    if conditions.auto_fix == Some(true) && !shared.contains_key("auto_fix_available") {
        return false;
    }

    if let Some(required) = conditions.severity.as_deref() {
        if let Some(actual) = shared.get("severity").and_then(Value::as_str) {
            if actual != required {
                return false;
            }
        }
    }

    true
}

/// Decision used when no rule matches
pub fn default_decision(error: &ErrorContext) -> RoutingDecision {
    if error.retry_count < 3 {
        let mut decision =
            RoutingDecision::new(RoutingAction::Retry, "Default retry policy for unmatched errors");
        decision.retry_policy = Some(RetryPolicy {
            max_attempts: 3,
            backoff_type: "exponential".to_string(),
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            retryable_errors: Vec::new(),
        });
        decision.save_checkpoint = true;
        decision
    } else {
        let mut decision = RoutingDecision::new(RoutingAction::Fail, "Maximum retry attempts reached");
        decision.save_checkpoint = true;
        decision
    }
}

/// Built-in routing table for the container pipeline
pub fn default_rules() -> Vec<FailureRoutingRule> {
    vec![
        FailureRoutingRule::new("build_image", "analyze_repository")
            .with_error_types(["dockerfile_syntax", "dockerfile"])
            .with_conditions(RoutingConditions {
                retry_count: Some(3),
                ..Default::default()
            })
            .with_priority(10)
            .with_description("Dockerfile problems are sent back to repository analysis"),
        FailureRoutingRule::new("scan_security", "build_image")
            .with_error_types(["vulnerability", "base image"])
            .with_priority(20)
            .with_description("Vulnerable base images trigger a rebuild"),
        FailureRoutingRule::new("deploy_kubernetes", "generate_manifests")
            .with_error_types(["validation", "resource"])
            .with_priority(30)
            .with_description("Manifest validation failures regenerate manifests"),
    ]
}

#[derive(Debug, Deserialize)]
struct RoutingTable {
    #[serde(default)]
    rules: Vec<FailureRoutingRule>,
}

/// Read a `rules:` list from a YAML file
///
/// ```yaml
/// rules:
///   - from_tool: push_image
///     error_types: [authentication]
///     to_tool: registry_login
///     conditions:
///       retry_count: 2
/// ```
pub fn load_rules(path: impl AsRef<Path>) -> Result<Vec<FailureRoutingRule>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        RecoveryError::Config(format!("failed to read routing rules {}: {}", path.display(), e))
    })?;
    let table: RoutingTable = serde_yaml::from_str(&content)?;
    if let Some(rule) = table.rules.iter().find(|r| r.to_tool.trim().is_empty()) {
        return Err(RecoveryError::Config(format!(
            "routing rule from {:?} has an empty to_tool",
            rule.from_tool
        )));
    }
    Ok(table.rules)
}

/// A saved routing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRecord {
    pub decision_id: String,
    pub decision: RoutingDecision,
    pub error_context: ErrorContext,
    pub timestamp: DateTime<Utc>,
}

/// Routing decisions saved for a session, oldest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingHistory {
    pub records: Vec<RoutingRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn error(source: &str, error_type: &str, message: &str) -> ErrorContext {
        ErrorContext {
            session_id: "s".to_string(),
            source_tool: source.to_string(),
            error_type: error_type.to_string(),
            error_code: String::new(),
            error_message: message.to_string(),
            retry_count: 0,
            timestamp: Utc::now(),
            shared_context: None,
            execution_trace: vec![source.to_string()],
        }
    }

    #[test]
    fn test_from_tool_must_match_when_set() {
        let rule = FailureRoutingRule::new("build_image", "analyze_repository");
        assert!(rule.matches(&error("build_image", "x", "")));
        assert!(!rule.matches(&error("push_image", "x", "")));

        let any = FailureRoutingRule::new("", "fallback");
        assert!(any.matches(&error("push_image", "x", "")));
    }

    #[test]
    fn test_error_type_matches_type_or_message() {
        let rule = FailureRoutingRule::new("", "t").with_error_types(["dockerfile"]);
        assert!(rule.matches(&error("build_image", "dockerfile", "boom")));
        assert!(rule.matches(&error("build_image", "other", "bad dockerfile line 3")));
        assert!(!rule.matches(&error("build_image", "other", "boom")));
    }

    #[test]
    fn test_error_codes() {
        let rule = FailureRoutingRule::new("", "t").with_error_codes(["E42"]);
        let mut err = error("a", "x", "y");
        assert!(!rule.matches(&err));
        err.error_code = "E42".to_string();
        assert!(rule.matches(&err));
    }

    #[test]
    fn test_retry_count_condition() {
        let rule = FailureRoutingRule::new("", "t").with_conditions(RoutingConditions {
            retry_count: Some(2),
            ..Default::default()
        });
        let mut err = error("a", "x", "y");
        err.retry_count = 2;
        assert!(rule.matches(&err));
        err.retry_count = 3;
        assert!(!rule.matches(&err));
    }

    #[test]
    fn test_shared_context_conditions() {
        let rule = FailureRoutingRule::new("", "t").with_conditions(RoutingConditions {
            auto_fix: Some(true),
            severity: Some("high".to_string()),
            ..Default::default()
        });

        let mut err = error("a", "x", "y");
        assert!(rule.matches(&err), "no shared context means nothing to contradict");

        err.shared_context = json!({"severity": "high"}).as_object().cloned();
        assert!(!rule.matches(&err), "auto_fix_available missing");

        err.shared_context = json!({"severity": "low", "auto_fix_available": true})
            .as_object()
            .cloned();
        assert!(!rule.matches(&err), "severity differs");

        err.shared_context = json!({"severity": "high", "auto_fix_available": true})
            .as_object()
            .cloned();
        assert!(rule.matches(&err));
    }

    #[test]
    fn test_default_decision() {
        let mut err = error("a", "x", "y");
        let decision = default_decision(&err);
        assert_eq!(decision.action, RoutingAction::Retry);
        assert_eq!(decision.retry_policy.as_ref().unwrap().max_attempts, 3);

        err.retry_count = 3;
        assert_eq!(default_decision(&err).action, RoutingAction::Fail);
    }

    #[test]
    fn test_load_rules_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "rules:\n  - from_tool: push_image\n    error_types: [authentication]\n    to_tool: registry_login\n    conditions:\n      retry_count: 2\n"
        )
        .unwrap();

        let rules = load_rules(file.path()).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].to_tool, "registry_login");
        assert_eq!(rules[0].conditions.retry_count, Some(2));
        assert_eq!(rules[0].priority, 0);
    }

    #[test]
    fn test_load_rules_rejects_empty_target() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rules:\n  - from_tool: a\n    to_tool: \"\"\n").unwrap();
        assert!(matches!(load_rules(file.path()), Err(RecoveryError::Config(_))));
    }

    #[test]
    fn test_decision_serialization_skips_empty_fields() {
        let decision = RoutingDecision::route("build_image", "because");
        let value = serde_json::to_value(&decision).unwrap();
        assert_eq!(value["action"], "route");
        assert!(value.get("transform_data").is_none());
        assert!(value.get("retry_policy").is_none());
    }
}
