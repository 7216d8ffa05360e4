//! Recovery strategy registry
//!
//! Strategies are registered by name. On failure every strategy whose
//! [`RecoveryStrategy::can_handle`] accepts the error is tried, highest
//! [`RecoveryStrategy::priority`] first (ties by name), until one succeeds.
//! If none does, an optional [`AiAnalyzer`] is asked for suggestions.

mod dockerfile;
mod strategies;

pub use strategies::{
    DependencyRecovery, DiskSpaceRecovery, DockerfileRecovery, NetworkRecovery, PermissionRecovery,
};

use crate::cancel::CallContext;
use crate::classifier::FailureAnalysis;
use crate::config::RecoveryConfig;
use crate::error::OperationError;
use crate::executor::Operation;
use crate::{RecoveryError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A pluggable fix for one failure category
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn can_handle(&self, err: &OperationError, analysis: &FailureAnalysis) -> bool;

    /// Repair what can be repaired and re-run the operation once
    async fn recover(
        &self,
        ctx: &CallContext,
        err: &OperationError,
        analysis: &FailureAnalysis,
        operation: &mut Operation,
    ) -> Result<()>;

    /// Higher runs first
    fn priority(&self) -> i32;
}

/// Last-resort analysis when no strategy succeeds
#[async_trait]
pub trait AiAnalyzer: Send + Sync {
    async fn analyze(&self, ctx: &CallContext, prompt: &str) -> Result<serde_json::Value>;
}

#[derive(Default)]
/// Named recovery strategies plus an optional AI fallback
pub struct RecoveryStrategyRegistry {
    strategies: RwLock<HashMap<String, Arc<dyn RecoveryStrategy>>>,
    analyzer: Option<Arc<dyn AiAnalyzer>>,
}

impl std::fmt::Debug for RecoveryStrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryStrategyRegistry")
            .field("strategies", &self.strategy_names())
            .field("analyzer", &self.analyzer.is_some())
            .finish()
    }
}

impl RecoveryStrategyRegistry {
    /// Empty registry without an analyzer
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the five built-in strategies
    pub fn with_default_strategies(config: &RecoveryConfig) -> Self {
        let registry = Self::new();
        registry.register_strategy("network", NetworkRecovery::new(config));
        registry.register_strategy("permission", PermissionRecovery::new());
        registry.register_strategy("dockerfile", DockerfileRecovery::new());
        registry.register_strategy("dependency", DependencyRecovery::new());
        registry.register_strategy("space", DiskSpaceRecovery::new());
        registry
    }

    /// Ask `analyzer` when every strategy fails
    pub fn with_analyzer(mut self, analyzer: Arc<dyn AiAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Register a strategy, replacing any with the same name
    pub fn register_strategy(&self, name: impl Into<String>, strategy: impl RecoveryStrategy + 'static) {
        self.register_shared(name, Arc::new(strategy));
    }

    /// Like [`RecoveryStrategyRegistry::register_strategy`] for an already shared strategy
    pub fn register_shared(&self, name: impl Into<String>, strategy: Arc<dyn RecoveryStrategy>) {
        let name = name.into();
        debug!(strategy = %name, priority = strategy.priority(), "Registered recovery strategy");
        self.strategies.write().insert(name, strategy);
    }

    /// Remove a strategy; false when it was not registered
    pub fn remove_strategy(&self, name: &str) -> bool {
        self.strategies.write().remove(name).is_some()
    }

    /// Whether `name` is registered
    pub fn has_strategy(&self, name: &str) -> bool {
        self.strategies.read().contains_key(name)
    }

    /// Registered names, sorted
    pub fn strategy_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Applicable strategies in the order they will be tried
    fn candidates(
        &self,
        err: &OperationError,
        analysis: &FailureAnalysis,
    ) -> Vec<(String, Arc<dyn RecoveryStrategy>)> {
        let mut candidates: Vec<_> = self
            .strategies
            .read()
            .iter()
            .filter(|(_, strategy)| strategy.can_handle(err, analysis))
            .map(|(name, strategy)| (name.clone(), strategy.clone()))
            .collect();
        candidates.sort_by(|(a_name, a), (b_name, b)| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a_name.cmp(b_name))
        });
        candidates
    }

    /// Try the applicable strategies in order, then the analyzer
    pub async fn recover_from_error(
        &self,
        ctx: &CallContext,
        err: &OperationError,
        analysis: &FailureAnalysis,
        operation: &mut Operation,
    ) -> Result<()> {
        info!(
            operation = %operation.name(),
            failure_type = %analysis.failure_type,
            failure_stage = %analysis.failure_stage,
            "Attempting to recover from error"
        );

        for (name, strategy) in self.candidates(err, analysis) {
            if ctx.is_cancelled() {
                return Err(RecoveryError::Cancelled {
                    operation: operation.name().to_string(),
                });
            }
            info!(strategy = %name, priority = strategy.priority(), "Attempting recovery strategy");
            match strategy.recover(ctx, err, analysis, operation).await {
                Ok(()) => {
                    info!(strategy = %name, operation = %operation.name(), "Recovery successful");
                    return Ok(());
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => warn!(strategy = %name, error = %e, "Recovery strategy failed"),
            }
        }

        let Some(analyzer) = self.analyzer.as_ref() else {
            error!(operation = %operation.name(), error = %err, "No recovery strategy succeeded");
            return Err(RecoveryError::RecoveryExhausted { source: err.clone() });
        };

        let context = json!({
            "error": err.to_string(),
            "failure_analysis": analysis,
            "operation_info": operation.get_operation_info(),
            "suggested_fixes": analysis.suggested_fixes,
        });
        let prompt = format!("Analyze this build error and suggest fixes: {}", context);

        info!(operation = %operation.name(), "Attempting AI-driven recovery");
        match analyzer.analyze(ctx, &prompt).await {
            Ok(response) => {
                info!(ai_response = %response, "Received AI recovery suggestions");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "AI analysis failed");
                Err(match e {
                    RecoveryError::Analyzer(_) | RecoveryError::Cancelled { .. } => e,
                    other => RecoveryError::Analyzer(other.to_string()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{self, FailureType};
    use crate::executor::OperationKind;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockStrategy {
        handles: bool,
        succeeds: bool,
        priority: i32,
        calls: Arc<AtomicUsize>,
        order: Option<(Arc<Mutex<Vec<String>>>, String)>,
    }

    impl MockStrategy {
        fn new(handles: bool, succeeds: bool, priority: i32) -> Self {
            Self {
                handles,
                succeeds,
                priority,
                calls: Arc::new(AtomicUsize::new(0)),
                order: None,
            }
        }

        fn recording(mut self, log: Arc<Mutex<Vec<String>>>, name: &str) -> Self {
            self.order = Some((log, name.to_string()));
            self
        }
    }

    #[async_trait]
    impl RecoveryStrategy for MockStrategy {
        fn can_handle(&self, _err: &OperationError, _analysis: &FailureAnalysis) -> bool {
            self.handles
        }

        async fn recover(
            &self,
            _ctx: &CallContext,
            _err: &OperationError,
            _analysis: &FailureAnalysis,
            _operation: &mut Operation,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some((log, name)) = &self.order {
                log.lock().push(name.clone());
            }
            if self.succeeds {
                Ok(())
            } else {
                Err(RecoveryError::StrategyFailed {
                    strategy: "mock".to_string(),
                    reason: "not today".to_string(),
                })
            }
        }

        fn priority(&self) -> i32 {
            self.priority
        }
    }

    struct MockAnalyzer {
        calls: Arc<AtomicUsize>,
        prompts: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl AiAnalyzer for MockAnalyzer {
        async fn analyze(&self, _ctx: &CallContext, prompt: &str) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().push(prompt.to_string());
            if self.fail {
                Err(RecoveryError::Analyzer("model unavailable".to_string()))
            } else {
                Ok(json!({"fixes": ["use a mirror"]}))
            }
        }
    }

    fn failing() -> (OperationError, FailureAnalysis, Operation) {
        let err = OperationError::new("exit status 1");
        let analysis = classifier::analyze(&err);
        let op = Operation::new(OperationKind::Build, "app:latest");
        (err, analysis, op)
    }

    #[tokio::test]
    async fn test_first_handling_strategy_succeeds_without_analyzer_call() {
        let analyzer_calls = Arc::new(AtomicUsize::new(0));
        let registry = RecoveryStrategyRegistry::new().with_analyzer(Arc::new(MockAnalyzer {
            calls: analyzer_calls.clone(),
            prompts: Arc::default(),
            fail: false,
        }));
        let skipped = MockStrategy::new(false, true, 100);
        let skipped_calls = skipped.calls.clone();
        registry.register_strategy("skipped", skipped);
        registry.register_strategy("handler", MockStrategy::new(true, true, 10));

        let (err, analysis, mut op) = failing();
        registry
            .recover_from_error(&CallContext::new(), &err, &analysis, &mut op)
            .await
            .unwrap();

        assert_eq!(skipped_calls.load(Ordering::SeqCst), 0);
        assert_eq!(analyzer_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_strategies_run_by_descending_priority_then_name() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = RecoveryStrategyRegistry::new();
        registry.register_strategy("low", MockStrategy::new(true, false, 10).recording(log.clone(), "low"));
        registry.register_strategy("high", MockStrategy::new(true, false, 90).recording(log.clone(), "high"));
        registry.register_strategy("b-mid", MockStrategy::new(true, false, 50).recording(log.clone(), "b-mid"));
        registry.register_strategy("a-mid", MockStrategy::new(true, false, 50).recording(log.clone(), "a-mid"));

        let (err, analysis, mut op) = failing();
        let result = registry
            .recover_from_error(&CallContext::new(), &err, &analysis, &mut op)
            .await;

        assert!(matches!(result, Err(RecoveryError::RecoveryExhausted { .. })));
        assert_eq!(*log.lock(), vec!["high", "a-mid", "b-mid", "low"]);
    }

    #[tokio::test]
    async fn test_exhausted_without_analyzer() {
        let registry = RecoveryStrategyRegistry::new();
        let (err, analysis, mut op) = failing();

        let result = registry
            .recover_from_error(&CallContext::new(), &err, &analysis, &mut op)
            .await;
        let message = result.unwrap_err().to_string();
        assert!(message.contains("unable to recover from error"));
        assert!(message.contains("exit status 1"));
    }

    #[tokio::test]
    async fn test_analyzer_receives_prompt_when_strategies_fail() {
        let calls = Arc::new(AtomicUsize::new(0));
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let registry = RecoveryStrategyRegistry::new().with_analyzer(Arc::new(MockAnalyzer {
            calls: calls.clone(),
            prompts: prompts.clone(),
            fail: false,
        }));
        registry.register_strategy("broken", MockStrategy::new(true, false, 50));

        let (err, analysis, mut op) = failing();
        registry
            .recover_from_error(&CallContext::new(), &err, &analysis, &mut op)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let prompt = prompts.lock()[0].clone();
        assert!(prompt.starts_with("Analyze this build error and suggest fixes: "));
        let payload: serde_json::Value =
            serde_json::from_str(prompt.trim_start_matches("Analyze this build error and suggest fixes: "))
                .unwrap();
        assert_eq!(payload["error"], "exit status 1");
        assert_eq!(payload["failure_analysis"]["failure_type"], "command_failure");
        assert_eq!(payload["operation_info"]["name"], "app:latest");
        assert!(payload["suggested_fixes"].is_array());
    }

    #[tokio::test]
    async fn test_analyzer_error_surfaces() {
        let registry = RecoveryStrategyRegistry::new().with_analyzer(Arc::new(MockAnalyzer {
            calls: Arc::default(),
            prompts: Arc::default(),
            fail: true,
        }));
        let (err, analysis, mut op) = failing();

        let result = registry
            .recover_from_error(&CallContext::new(), &err, &analysis, &mut op)
            .await;
        assert!(matches!(result, Err(RecoveryError::Analyzer(_))));
    }

    #[test]
    fn test_register_remove_has() {
        let registry = RecoveryStrategyRegistry::with_default_strategies(&RecoveryConfig::default());
        assert_eq!(
            registry.strategy_names(),
            vec!["dependency", "dockerfile", "network", "permission", "space"]
        );
        assert!(registry.has_strategy("network"));
        assert!(registry.remove_strategy("network"));
        assert!(!registry.remove_strategy("network"));
        assert!(!registry.has_strategy("network"));
    }

    #[test]
    fn test_default_candidates_follow_failure_type() {
        let registry = RecoveryStrategyRegistry::with_default_strategies(&RecoveryConfig::default());
        let err = OperationError::with_kind("no space left on device", FailureType::DiskSpace);
        let analysis = classifier::analyze(&err);

        let names: Vec<String> = registry
            .candidates(&err, &analysis)
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["space"]);
    }
}
