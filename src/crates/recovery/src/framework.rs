//! Wiring of the store, registry and router behind one handle

use crate::cancel::CallContext;
use crate::config::{ConfigBuilder, FrameworkConfig};
use crate::context::ContextStore;
use crate::executor::{Operation, OperationKind};
use crate::logging::timed;
use crate::recovery::{AiAnalyzer, RecoveryStrategyRegistry};
use crate::router::ErrorRouter;
use crate::{RecoveryError, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Owns the long-lived pieces of the framework
///
/// Build one per server. The context store is shared with the router, so
/// routing decisions land in the same sessions tools write to.
#[derive(Debug)]
pub struct Framework {
    config: FrameworkConfig,
    store: Arc<ContextStore>,
    registry: RecoveryStrategyRegistry,
    router: ErrorRouter,
}

impl Framework {
    /// Validate `config` and start the context store janitor
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: FrameworkConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(ContextStore::new(&config.context));
        let registry = if config.recovery.enable_default_strategies {
            RecoveryStrategyRegistry::with_default_strategies(&config.recovery)
        } else {
            RecoveryStrategyRegistry::new()
        };
        let router = ErrorRouter::with_defaults(store.clone());

        info!(
            retry_attempts = config.executor.retry_attempts,
            strategies = registry.strategy_names().len(),
            routing_rules = router.rules().len(),
            "Recovery framework initialized"
        );

        Ok(Self {
            config,
            store,
            registry,
            router,
        })
    }

    /// Consult `analyzer` when no strategy recovers a failure
    pub fn with_analyzer(mut self, analyzer: Arc<dyn AiAnalyzer>) -> Self {
        self.registry = self.registry.with_analyzer(analyzer);
        self
    }

    /// Validated configuration the framework was built with
    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    /// Context store shared with the router
    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    /// Strategy registry used by [`Framework::run_with_recovery`]
    pub fn registry(&self) -> &RecoveryStrategyRegistry {
        &self.registry
    }

    /// Error router writing into [`Framework::store`]
    pub fn router(&self) -> &ErrorRouter {
        &self.router
    }

    /// A new operation carrying the configured retry and timeout defaults
    pub fn operation(&self, kind: OperationKind, name: impl Into<String>) -> Operation {
        Operation::from_config(kind, name, &self.config.executor)
    }

    /// Execute `operation`; if it fails, analyze the failure and try to recover
    pub async fn run_with_recovery(&self, ctx: &CallContext, operation: &mut Operation) -> Result<()> {
        let err = match operation.execute(ctx).await {
            Ok(()) => return Ok(()),
            Err(RecoveryError::OperationFailed { source, .. }) => source,
            Err(other) => return Err(other),
        };

        let analysis = operation.get_failure_analysis(&err);
        warn!(
            operation = %operation.name(),
            failure_type = %analysis.failure_type,
            reason = %analysis.reason,
            "Operation failed, starting recovery"
        );
        timed(
            "recover_from_error",
            self.registry.recover_from_error(ctx, &err, &analysis, operation),
        )
        .await
    }

    /// Stop the context store janitor
    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OperationError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fast_config() -> FrameworkConfig {
        let mut config = FrameworkConfig::default();
        config.executor.backoff_step_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let mut config = FrameworkConfig::default();
        config.executor.retry_attempts = 0;
        assert!(matches!(Framework::new(config), Err(RecoveryError::Config(_))));
    }

    #[tokio::test]
    async fn test_defaults_wired() {
        let framework = Framework::new(FrameworkConfig::default()).unwrap();
        assert_eq!(framework.registry().strategy_names().len(), 5);
        assert_eq!(framework.router().rules().len(), 3);

        let op = framework.operation(OperationKind::Push, "registry/app:1");
        assert_eq!(op.retry_attempts(), 3);
        assert_eq!(op.timeout(), Duration::from_secs(900));
        framework.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_default_strategies_can_be_disabled() {
        let mut config = FrameworkConfig::default();
        config.recovery.enable_default_strategies = false;
        let framework = Framework::new(config).unwrap();
        assert!(framework.registry().strategy_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_recovery_retries_through_strategy() {
        let framework = Framework::new(fast_config()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        // Fails until the network strategy turns off the build cache.
        let mut op = framework
            .operation(OperationKind::Build, "app:latest")
            .with_execute(move |attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if attempt.settings.no_cache {
                        Ok(())
                    } else {
                        Err(OperationError::new("network is unreachable"))
                    }
                }
            });

        framework
            .run_with_recovery(&CallContext::new(), &mut op)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_run_with_recovery_passes_through_config_errors() {
        let framework = Framework::new(fast_config()).unwrap();
        let mut op = framework.operation(OperationKind::Tag, "app:1");

        let result = framework.run_with_recovery(&CallContext::new(), &mut op).await;
        assert!(matches!(result, Err(RecoveryError::MissingExecuteFn { .. })));
    }
}
