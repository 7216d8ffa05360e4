//! Error router
//!
//! Picks the next pipeline stage after a tool failure. Among the rules that
//! match, the one with the lowest `priority` value wins, declared order
//! breaking ties; a handler registered for the rule's `(from_tool, to_tool)`
//! pair may refine the decision. Decisions are
//! kept in the [`ContextStore`] so later stages can see how they got there.

mod rules;

pub use rules::{
    default_decision, default_rules, load_rules, FailureRoutingRule, RetryPolicy, RoutingAction,
    RoutingConditions, RoutingDecision, RoutingHistory, RoutingRecord,
};

use crate::cancel::CallContext;
use crate::context::{ContextPayload, ContextStore, ErrorContext};
use crate::{RecoveryError, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Context type holding a session's routing history
pub const ROUTING_CONTEXT: &str = "error_routing";

/// Context type holding the latest decision's context updates
pub const ROUTING_UPDATES_CONTEXT: &str = "routing_updates";

const MAX_HISTORY: usize = 50;

/// Refines the decision of a matched rule; `None` leaves it untouched
pub type ErrorHandler = Arc<dyn Fn(&ErrorContext) -> Option<RoutingDecision> + Send + Sync>;

/// Failure report handed to [`ErrorRouter::route_error`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteErrorConfig {
    pub session_id: String,
    pub source_tool: String,
    pub error_type: String,
    pub error_code: String,
    pub error_message: String,
    pub retry_count: u32,
}

impl RouteErrorConfig {
    /// Report for a failure of `source_tool` in `session_id`
    pub fn new(session_id: impl Into<String>, source_tool: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            source_tool: source_tool.into(),
            ..Default::default()
        }
    }

    /// Error type as reported by the tool
    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    /// Error code as reported by the tool
    pub fn with_error_code(mut self, error_code: impl Into<String>) -> Self {
        self.error_code = error_code.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    /// Retries already spent on this failure
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// Result of routing one failure
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingOutcome {
    /// A rule matched
    Routed(RoutingDecision),
    /// Nothing matched; `fallback` is the default retry/fail policy
    NoRoute { fallback: RoutingDecision },
}

impl RoutingOutcome {
    /// The routed decision or the fallback
    pub fn decision(&self) -> &RoutingDecision {
        match self {
            RoutingOutcome::Routed(decision) => decision,
            RoutingOutcome::NoRoute { fallback } => fallback,
        }
    }

    /// True when a rule matched
    pub fn is_routed(&self) -> bool {
        matches!(self, RoutingOutcome::Routed(_))
    }

    /// Next tool, only when a rule matched
    pub fn target_tool(&self) -> Option<&str> {
        match self {
            RoutingOutcome::Routed(decision) => decision.target_tool.as_deref(),
            RoutingOutcome::NoRoute { .. } => None,
        }
    }
}

/// Lowest `priority` value among the matching rules; the sort is stable, so
/// declared order decides between equal priorities.
fn select_rule(rules: &[FailureRoutingRule], error: &ErrorContext) -> Option<FailureRoutingRule> {
    let mut matching: Vec<&FailureRoutingRule> = rules.iter().filter(|rule| rule.matches(error)).collect();
    matching.sort_by_key(|rule| rule.priority);
    matching.first().map(|rule| (*rule).clone())
}

/// Routes tool failures to the next pipeline stage
pub struct ErrorRouter {
    store: Arc<ContextStore>,
    rules: RwLock<Vec<FailureRoutingRule>>,
    handlers: RwLock<HashMap<(String, String), ErrorHandler>>,
    /// Serializes the read-modify-write of routing histories
    history_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ErrorRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRouter")
            .field("rules", &self.rules.read().len())
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}

impl ErrorRouter {
    /// Router with an empty table
    pub fn new(store: Arc<ContextStore>) -> Self {
        Self {
            store,
            rules: RwLock::new(Vec::new()),
            handlers: RwLock::new(HashMap::new()),
            history_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Router with the built-in container pipeline rules and handlers
    pub fn with_defaults(store: Arc<ContextStore>) -> Self {
        let router = Self::from_rules(store, default_rules());
        router.register_default_handlers();
        router
    }

    /// Router with the given rules and no handlers
    pub fn from_rules(store: Arc<ContextStore>, rules: Vec<FailureRoutingRule>) -> Self {
        let router = Self::new(store);
        *router.rules.write() = rules;
        router
    }

    /// Append a rule; among equal priorities it ranks after the existing ones
    pub fn register_rule(&self, rule: FailureRoutingRule) {
        info!(
            from_tool = %rule.from_tool,
            to_tool = %rule.to_tool,
            priority = rule.priority,
            "Registered routing rule"
        );
        self.rules.write().push(rule);
    }

    /// Register (or replace) the handler for a rule's tool pair
    pub fn register_handler<F>(&self, from_tool: impl Into<String>, to_tool: impl Into<String>, handler: F)
    where
        F: Fn(&ErrorContext) -> Option<RoutingDecision> + Send + Sync + 'static,
    {
        let key = (from_tool.into(), to_tool.into());
        debug!(from_tool = %key.0, to_tool = %key.1, "Registered routing handler");
        self.handlers.write().insert(key, Arc::new(handler));
    }

    /// Append rules read from a YAML file
    pub fn load_rules(&self, path: impl AsRef<std::path::Path>) -> Result<usize> {
        let loaded = load_rules(path)?;
        let count = loaded.len();
        self.rules.write().extend(loaded);
        Ok(count)
    }

    /// Snapshot of the rule table in declared order
    pub fn rules(&self) -> Vec<FailureRoutingRule> {
        self.rules.read().clone()
    }

    /// Decide what to do about a failed tool call
    pub async fn route_error(&self, ctx: &CallContext, config: RouteErrorConfig) -> Result<RoutingOutcome> {
        if config.session_id.trim().is_empty() {
            return Err(RecoveryError::InvalidContext(
                "route_error requires a session_id".to_string(),
            ));
        }
        if config.source_tool.trim().is_empty() {
            return Err(RecoveryError::InvalidContext(
                "route_error requires a source_tool".to_string(),
            ));
        }

        let mut error = ErrorContext {
            session_id: config.session_id,
            source_tool: config.source_tool,
            error_type: config.error_type,
            error_code: config.error_code,
            error_message: config.error_message,
            retry_count: config.retry_count,
            timestamp: Utc::now(),
            shared_context: None,
            execution_trace: Vec::new(),
        };
        error.execution_trace.push(error.source_tool.clone());
        error.shared_context = self.tool_context(ctx, &error).await;

        info!(
            session_id = %error.session_id,
            source_tool = %error.source_tool,
            error_type = %error.error_type,
            retry_count = error.retry_count,
            "Routing error"
        );

        let matched = select_rule(&self.rules.read(), &error);
        let Some(rule) = matched else {
            let fallback = default_decision(&error);
            debug!(
                session_id = %error.session_id,
                action = ?fallback.action,
                "No routing rule matched"
            );
            return Ok(RoutingOutcome::NoRoute { fallback });
        };

        let decision = self.apply_rule(&error, &rule);
        info!(
            session_id = %error.session_id,
            source_tool = %error.source_tool,
            target_tool = decision.target_tool.as_deref().unwrap_or(""),
            action = ?decision.action,
            reason = %decision.decision_reason,
            "Error routed"
        );

        self.save_decision(ctx, &error, &decision).await;
        Ok(RoutingOutcome::Routed(decision))
    }

    /// Decisions saved for a session, oldest first
    pub async fn get_routing_history(&self, ctx: &CallContext, session_id: &str) -> Result<Vec<RoutingRecord>> {
        match self.store.get_shared_context(ctx, session_id, ROUTING_CONTEXT).await? {
            ContextPayload::Routing(history) => Ok(history.records),
            other => Err(RecoveryError::InvalidContext(format!(
                "{} holds a {} payload, expected routing",
                ROUTING_CONTEXT,
                other.kind_name()
            ))),
        }
    }

    async fn tool_context(&self, ctx: &CallContext, error: &ErrorContext) -> Option<Map<String, Value>> {
        let context_type = format!("tool_{}", error.source_tool);
        match self.store.get_shared_context(ctx, &error.session_id, &context_type).await {
            Ok(payload) => payload.as_map(),
            Err(e) if e.is_recoverable() => None,
            Err(e) => {
                warn!(
                    session_id = %error.session_id,
                    context_type = %context_type,
                    error = %e,
                    "Failed to read tool context"
                );
                None
            }
        }
    }

    fn apply_rule(&self, error: &ErrorContext, rule: &FailureRoutingRule) -> RoutingDecision {
        let reason = if rule.description.is_empty() {
            format!("Routing {} failure to {}", rule.from_tool, rule.to_tool)
        } else {
            rule.description.clone()
        };
        let mut decision = RoutingDecision::route(rule.to_tool.clone(), reason);
        decision.save_checkpoint = true;
        decision.context_updates.insert(
            "previous_error".to_string(),
            json!({
                "tool": error.source_tool,
                "error_code": error.error_code,
                "error_type": error.error_type,
                "message": error.error_message,
                "timestamp": error.timestamp,
            }),
        );

        let handler = self
            .handlers
            .read()
            .get(&(rule.from_tool.clone(), rule.to_tool.clone()))
            .cloned();
        if let Some(custom) = handler.and_then(|handler| handler(error)) {
            decision.action = custom.action;
            if custom.target_tool.is_some() {
                decision.target_tool = custom.target_tool;
            }
            if custom.retry_policy.is_some() {
                decision.retry_policy = custom.retry_policy;
            }
            if custom.alternative_flow.is_some() {
                decision.alternative_flow = custom.alternative_flow;
            }
            if !custom.decision_reason.is_empty() {
                decision.decision_reason = custom.decision_reason;
            }
            decision.transform_data.extend(custom.transform_data);
            decision.context_updates.extend(custom.context_updates);
            decision.notify_tools.extend(custom.notify_tools);
        }

        decision.context_updates.insert(
            "routing_metadata".to_string(),
            json!({
                "rule_priority": rule.priority,
                "rule_from_tool": rule.from_tool,
                "rule_to_tool": rule.to_tool,
                "routed_at": Utc::now(),
            }),
        );
        decision
    }

    async fn save_decision(&self, ctx: &CallContext, error: &ErrorContext, decision: &RoutingDecision) {
        let session_id = error.session_id.as_str();
        let _guard = self.history_lock.lock().await;
        let mut history = match self.store.get_shared_context(ctx, session_id, ROUTING_CONTEXT).await {
            Ok(ContextPayload::Routing(history)) => history,
            _ => RoutingHistory::default(),
        };
        history.records.push(RoutingRecord {
            decision_id: format!("routing_{}", uuid::Uuid::new_v4()),
            decision: decision.clone(),
            error_context: error.clone(),
            timestamp: Utc::now(),
        });
        if history.records.len() > MAX_HISTORY {
            let excess = history.records.len() - MAX_HISTORY;
            history.records.drain(..excess);
        }

        if let Err(e) = self
            .store
            .share_context(ctx, session_id, ROUTING_CONTEXT, history)
            .await
        {
            warn!(session_id = session_id, error = %e, "Failed to save routing decision");
        }

        if !decision.context_updates.is_empty() {
            let updates = Value::Object(decision.context_updates.clone());
            if let Err(e) = self
                .store
                .share_context(ctx, session_id, ROUTING_UPDATES_CONTEXT, ContextPayload::Json(updates))
                .await
            {
                warn!(session_id = session_id, error = %e, "Failed to save routing context updates");
            }
        }
    }

    fn register_default_handlers(&self) {
        self.register_handler("build_image", "analyze_repository", |error| {
            let dockerfile_path = error
                .shared_context
                .as_ref()
                .and_then(|shared| shared.get("dockerfile_path"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(
                RoutingDecision::route("analyze_repository", "Routing to analyzer for Dockerfile fix")
                    .with_transform("analyze_mode", "fix_dockerfile")
                    .with_transform("dockerfile_path", dockerfile_path)
                    .with_transform("error_details", error.error_message.clone())
                    .with_context_update("fix_requested", true)
                    .with_context_update("fix_type", "dockerfile"),
            )
        });

        self.register_handler("scan_security", "build_image", |error| {
            if !error.error_message.contains("base image") {
                return None;
            }
            Some(
                RoutingDecision::route("build_image", "Routing to build for base image update")
                    .with_transform("update_base_image", true)
                    .with_transform("security_patches", true)
                    .with_context_update("security_fix", true),
            )
        });

        self.register_handler("deploy_kubernetes", "generate_manifests", |error| {
            let message = error.error_message.as_str();
            if !message.contains("validation") && !message.contains("resource") {
                return None;
            }
            Some(
                RoutingDecision::route(
                    "generate_manifests",
                    "Routing to regenerate manifests for validation fix",
                )
                .with_transform("fix_validation", true)
                .with_transform("error_details", error.error_message.clone())
                .with_alternative_flow("regenerate_and_deploy"),
            )
        });
    }
}
