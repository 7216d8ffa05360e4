//! Operation execution with per-attempt timeout, linear backoff and retry checks
//!
//! An [`Operation`] wraps a caller-supplied async closure (the actual Docker
//! call) with a retry policy. [`Operation::execute`] runs it up to
//! `retry_attempts` times:
//!
//! - every attempt is bounded by the operation's `timeout`
//! - between attempts the executor sleeps `attempt * backoff_step`
//!   (never after the last attempt)
//! - [`Operation::can_retry`] stops the loop early for permanent failures
//! - cancelling the [`CallContext`] aborts the in-flight attempt immediately
//!
//! # Example
//!
//! ```rust,ignore
//! use recovery::{CallContext, Operation, OperationKind};
//!
//! let mut op = Operation::new(OperationKind::Pull, "nginx:1.25")
//!     .with_execute(|attempt| async move {
//!         docker.pull("nginx:1.25").await.map_err(|e| e.to_string().into())
//!     });
//! op.execute(&CallContext::new().with_tool("pull_image")).await?;
//! ```

use crate::cancel::CallContext;
use crate::classifier::{self, FailureAnalysis};
use crate::config::ExecutorConfig;
use crate::error::OperationError;
use crate::{RecoveryError, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Text that marks a failure as permanent
const FATAL_PATTERNS: &[&str] = &[
    "permission denied",
    "authentication required",
    "invalid",
    "syntax error",
    "malformed",
    "not found",
];

/// Text that marks a failure as transient
const RETRYABLE_PATTERNS: &[&str] = &[
    "timeout",
    "network",
    "connection refused",
    "temporary failure",
    "rate limit",
    "too many requests",
    "service unavailable",
];

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type ActionFn =
    Arc<dyn Fn(AttemptContext) -> BoxFuture<std::result::Result<(), OperationError>> + Send + Sync>;

/// Kind of external action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Pull,
    Push,
    Tag,
    Build,
}

impl OperationKind {
    /// Lowercase name used in logs and operation info
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Pull => "pull",
            OperationKind::Push => "push",
            OperationKind::Tag => "tag",
            OperationKind::Build => "build",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable build inputs that recovery strategies adjust between attempts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSettings {
    pub build_args: BTreeMap<String, String>,
    pub no_cache: bool,
    pub dockerfile_path: Option<PathBuf>,
    pub build_context: Option<PathBuf>,
    pub workspace_dir: Option<PathBuf>,
}

impl BuildSettings {
    /// Set or replace a `--build-arg`
    pub fn set_build_arg(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.build_args.insert(key.into(), value.into());
    }

    /// Directory new Dockerfile variants are written to
    ///
    /// The build context when known, otherwise the Dockerfile's own directory.
    pub fn output_dir(&self) -> Option<PathBuf> {
        self.build_context.clone().or_else(|| {
            self.dockerfile_path
                .as_ref()
                .and_then(|p| p.parent().map(PathBuf::from))
        })
    }
}

/// What an execute or prepare closure receives on each call
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub operation: String,
    pub kind: OperationKind,
    pub attempt: u32,
    pub settings: BuildSettings,
    pub call: CallContext,
}

/// A fallible external action with its retry policy
pub struct Operation {
    kind: OperationKind,
    name: String,
    retry_attempts: u32,
    timeout: Duration,
    backoff_step: Duration,
    execute_fn: Option<ActionFn>,
    prepare_fn: Option<ActionFn>,
    attempt: u32,
    last_error: Option<OperationError>,
    settings: BuildSettings,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("retry_attempts", &self.retry_attempts)
            .field("timeout", &self.timeout)
            .field("attempt", &self.attempt)
            .field("last_error", &self.last_error)
            .field("has_execute_fn", &self.execute_fn.is_some())
            .field("has_prepare_fn", &self.prepare_fn.is_some())
            .finish()
    }
}

fn box_action<F, Fut>(f: F) -> ActionFn
where
    F: Fn(AttemptContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), OperationError>> + Send + 'static,
{
    Arc::new(
        move |ctx: AttemptContext| -> BoxFuture<std::result::Result<(), OperationError>> {
            Box::pin(f(ctx))
        },
    )
}

impl Operation {
    /// Operation with the stock executor defaults for its kind
    pub fn new(kind: OperationKind, name: impl Into<String>) -> Self {
        Self::from_config(kind, name, &ExecutorConfig::default())
    }

    /// Operation using the attempts, backoff and per-kind timeout from `config`
    pub fn from_config(kind: OperationKind, name: impl Into<String>, config: &ExecutorConfig) -> Self {
        Self {
            kind,
            name: name.into(),
            retry_attempts: config.retry_attempts,
            timeout: config.timeout_for(kind),
            backoff_step: config.backoff_step(),
            execute_fn: None,
            prepare_fn: None,
            attempt: 0,
            last_error: None,
            settings: BuildSettings::default(),
        }
    }

    /// Maximum number of attempts; 0 still runs once
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sleep `attempt * step` between attempts
    pub fn with_backoff_step(mut self, step: Duration) -> Self {
        self.backoff_step = step;
        self
    }

    /// The external call itself
    pub fn with_execute<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AttemptContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), OperationError>> + Send + 'static,
    {
        self.execute_fn = Some(box_action(f));
        self
    }

    /// Idempotent cleanup run by [`Operation::prepare_for_retry`]
    pub fn with_prepare<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(AttemptContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), OperationError>> + Send + 'static,
    {
        self.prepare_fn = Some(box_action(f));
        self
    }

    /// Replace all build settings
    pub fn with_settings(mut self, settings: BuildSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Dockerfile the build starts from
    pub fn with_dockerfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.dockerfile_path = Some(path.into());
        self
    }

    /// Build context directory; rewritten Dockerfiles are written here
    pub fn with_build_context(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.build_context = Some(path.into());
        self
    }

    /// Scratch directory the disk space strategy may clean
    pub fn with_workspace_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.workspace_dir = Some(path.into());
        self
    }

    /// Kind of external action
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Name used in logs and errors, usually the image reference
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured maximum number of attempts
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// Per-attempt timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Attempt number of the most recent call, 0 before the first
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Failure of the most recent attempt, cleared by [`Operation::prepare_for_retry`]
    pub fn last_error(&self) -> Option<&OperationError> {
        self.last_error.as_ref()
    }

    /// Build inputs passed to every attempt
    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Mutable build inputs, adjusted by recovery strategies
    pub fn settings_mut(&mut self) -> &mut BuildSettings {
        &mut self.settings
    }

    /// Run the operation with retries
    ///
    /// Returns on the first success. Otherwise fails with
    /// [`RecoveryError::OperationFailed`] carrying the attempt count and the
    /// last cause, or with [`RecoveryError::Cancelled`] as soon as the call
    /// context is cancelled.
    pub async fn execute(&mut self, ctx: &CallContext) -> Result<()> {
        let action = self.require_execute_fn()?;
        let max_attempts = self.retry_attempts.max(1);

        for attempt in 1..=max_attempts {
            if ctx.is_cancelled() {
                return Err(self.cancelled());
            }
            self.attempt = attempt;

            debug!(
                operation = %self.name,
                kind = %self.kind,
                attempt = attempt,
                max_attempts = max_attempts,
                "Executing operation attempt"
            );

            let err = match self.run(&action, ctx).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!(
                            operation = %self.name,
                            attempt = attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(());
                }
                Err(err) => err,
            };

            if ctx.is_cancelled() {
                warn!(operation = %self.name, attempt = attempt, "Operation cancelled");
                return Err(self.cancelled());
            }

            self.last_error = Some(err.clone());

            if !self.can_retry(&err) {
                error!(
                    operation = %self.name,
                    attempt = attempt,
                    error = %err,
                    "Operation failed with non-retryable error"
                );
                return Err(RecoveryError::OperationFailed {
                    operation: self.name.clone(),
                    attempts: attempt,
                    source: err,
                });
            }

            if attempt < max_attempts {
                let delay = self.backoff_step * attempt;
                warn!(
                    operation = %self.name,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation attempt failed, retrying"
                );

                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return Err(self.cancelled()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let source = self
            .last_error
            .clone()
            .unwrap_or_else(|| OperationError::new("operation failed"));
        error!(
            operation = %self.name,
            attempts = max_attempts,
            error = %source,
            "Operation failed after all attempts"
        );
        Err(RecoveryError::OperationFailed {
            operation: self.name.clone(),
            attempts: max_attempts,
            source,
        })
    }

    /// Run the execute closure exactly once under the operation timeout
    ///
    /// Used by recovery strategies to re-run a repaired operation. Does not
    /// advance the attempt counter.
    pub async fn execute_once(&mut self, ctx: &CallContext) -> Result<()> {
        let action = self.require_execute_fn()?;
        match self.run(&action, ctx).await {
            Ok(()) => Ok(()),
            Err(_) if ctx.is_cancelled() => Err(self.cancelled()),
            Err(err) => {
                self.last_error = Some(err.clone());
                Err(RecoveryError::OperationFailed {
                    operation: self.name.clone(),
                    attempts: self.attempt.max(1),
                    source: err,
                })
            }
        }
    }

    /// Whether a failure is worth another attempt
    pub fn can_retry(&self, err: &OperationError) -> bool {
        if let Some(kind) = err.kind() {
            if kind.retry_recommended() {
                return true;
            }
            if kind.is_permanent() {
                return false;
            }
        }

        let text = err.message().to_lowercase();
        if FATAL_PATTERNS.iter().any(|p| text.contains(p)) {
            return false;
        }
        if RETRYABLE_PATTERNS.iter().any(|p| text.contains(p)) {
            return true;
        }

        self.attempt < self.retry_attempts
    }

    /// Clear the last failure and run the prepare hook before a re-run
    pub async fn prepare_for_retry(&mut self, ctx: &CallContext, last_attempt: u32) -> Result<()> {
        self.last_error = None;
        info!(
            operation = %self.name,
            last_attempt = last_attempt,
            "Preparing operation for retry"
        );

        let Some(prepare) = self.prepare_fn.clone() else {
            return Ok(());
        };
        match self.run(&prepare, ctx).await {
            Ok(()) => Ok(()),
            Err(_) if ctx.is_cancelled() => Err(self.cancelled()),
            Err(source) => Err(RecoveryError::PrepareFailed {
                operation: self.name.clone(),
                source,
            }),
        }
    }

    /// Classify `err`; see [`classifier::analyze`]
    pub fn get_failure_analysis(&self, err: &OperationError) -> FailureAnalysis {
        classifier::analyze(err)
    }

    /// Snapshot of the operation for logs and AI prompts
    pub fn get_operation_info(&self) -> serde_json::Value {
        let path = |p: &Option<PathBuf>| p.as_ref().map(|p| p.display().to_string());
        json!({
            "kind": self.kind,
            "name": self.name,
            "attempt": self.attempt,
            "retry_attempts": self.retry_attempts,
            "timeout_secs": self.timeout.as_secs(),
            "last_error": self.last_error.as_ref().map(|e| e.to_string()),
            "dockerfile_path": path(&self.settings.dockerfile_path),
            "build_context": path(&self.settings.build_context),
            "workspace_dir": path(&self.settings.workspace_dir),
            "build_args": self.settings.build_args,
            "no_cache": self.settings.no_cache,
        })
    }

    fn require_execute_fn(&self) -> Result<ActionFn> {
        self.execute_fn.clone().ok_or_else(|| {
            error!(operation = %self.name, "No execute function configured");
            RecoveryError::MissingExecuteFn {
                operation: self.name.clone(),
            }
        })
    }

    fn cancelled(&self) -> RecoveryError {
        RecoveryError::Cancelled {
            operation: self.name.clone(),
        }
    }

    async fn run(
        &self,
        action: &ActionFn,
        ctx: &CallContext,
    ) -> std::result::Result<(), OperationError> {
        let attempt_ctx = AttemptContext {
            operation: self.name.clone(),
            kind: self.kind,
            attempt: self.attempt.max(1),
            settings: self.settings.clone(),
            call: ctx.clone(),
        };
        let call = action(attempt_ctx);

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(OperationError::cancelled()),
            result = tokio::time::timeout(self.timeout, call) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(OperationError::timeout(self.timeout)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSignal;
    use crate::classifier::FailureType;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_op(
        attempts: u32,
        message: &'static str,
    ) -> (Operation, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let op = Operation::new(OperationKind::Pull, "test-image")
            .with_retry_attempts(attempts)
            .with_execute(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(OperationError::new(message))
                }
            });
        (op, calls)
    }

    #[tokio::test]
    async fn test_missing_execute_fn_is_fatal() {
        let mut op = Operation::new(OperationKind::Tag, "untagged");
        let err = op.execute(&CallContext::new()).await.unwrap_err();
        assert!(matches!(err, RecoveryError::MissingExecuteFn { .. }));
        assert_eq!(op.attempt(), 0);
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut op = Operation::new(OperationKind::Push, "registry/app:1").with_execute(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        op.execute(&CallContext::new()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(op.attempt(), 1);
        assert!(op.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_uses_all_attempts() {
        let (mut op, calls) = counting_op(3, "dial tcp: connection refused");
        let err = op.execute(&CallContext::new()).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("3 attempts"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_without_trailing_sleep() {
        let (mut op, _) = counting_op(3, "network unreachable");
        let start = tokio::time::Instant::now();
        let _ = op.execute(&CallContext::new()).await;

        // 1s after attempt 1, 2s after attempt 2, nothing after attempt 3
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_stops_immediately() {
        let (mut op, calls) = counting_op(3, "open /root/.docker/config.json: permission denied");
        let err = op.execute(&CallContext::new()).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.to_string().contains("1 attempts"));
        assert!(op.last_error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_failure_is_bounded() {
        let (mut op, calls) = counting_op(3, "registry hiccup");
        let err = op.execute(&CallContext::new()).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, RecoveryError::OperationFailed { attempts: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retryable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut op = Operation::new(OperationKind::Pull, "slow")
            .with_retry_attempts(2)
            .with_timeout(Duration::from_secs(1))
            .with_execute(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            });

        let err = op.execute(&CallContext::new()).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(err.to_string().contains("timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_in_flight_attempt() {
        let cancel = CancelSignal::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut op = Operation::new(OperationKind::Build, "app")
            .with_retry_attempts(5)
            .with_execute(move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    std::future::pending::<()>().await;
                    Ok(())
                }
            });

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let ctx = CallContext::new().with_cancel(cancel);
        let err = op.execute(&ctx).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff() {
        let cancel = CancelSignal::new();
        let (op, calls) = counting_op(3, "service unavailable");
        let mut op = op.with_backoff_step(Duration::from_secs(30));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let err = op
            .execute(&CallContext::new().with_cancel(cancel))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_can_retry_patterns() {
        let mut op = Operation::new(OperationKind::Pull, "x").with_retry_attempts(3);
        op.attempt = 1;

        assert!(!op.can_retry(&OperationError::new("Permission denied")));
        assert!(!op.can_retry(&OperationError::new("manifest for foo:bar not found")));
        assert!(!op.can_retry(&OperationError::new("invalid reference format")));
        assert!(op.can_retry(&OperationError::new("TLS handshake timeout")));
        assert!(op.can_retry(&OperationError::new("429 Too Many Requests")));

        // fatal text wins over retryable text
        assert!(!op.can_retry(&OperationError::new("network timeout: host not found")));
    }

    #[test]
    fn test_can_retry_unclassified_depends_on_attempt() {
        let mut op = Operation::new(OperationKind::Pull, "x").with_retry_attempts(3);
        let err = OperationError::new("unexpected EOF");

        op.attempt = 2;
        assert!(op.can_retry(&err));
        op.attempt = 3;
        assert!(!op.can_retry(&err));
    }

    #[test]
    fn test_can_retry_prefers_explicit_kind() {
        let mut op = Operation::new(OperationKind::Pull, "x");
        op.attempt = 1;

        let err = OperationError::with_kind("invalid upstream reply", FailureType::Network);
        assert!(op.can_retry(&err));

        let err = OperationError::with_kind("connection refused", FailureType::Authentication);
        assert!(!op.can_retry(&err));

        // command failures fall through to the text rules
        let err = OperationError::with_kind("rate limit hit", FailureType::CommandFailure);
        assert!(op.can_retry(&err));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepare_for_retry_resets_and_runs_hook() {
        let prepared = Arc::new(AtomicUsize::new(0));
        let hook = prepared.clone();
        let (op, _) = counting_op(1, "boom");
        let mut op = op.with_prepare(move |_| {
            let hook = hook.clone();
            async move {
                hook.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let ctx = CallContext::new();
        let _ = op.execute(&ctx).await;
        assert!(op.last_error().is_some());

        op.prepare_for_retry(&ctx, 1).await.unwrap();
        assert!(op.last_error().is_none());
        assert_eq!(prepared.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prepare_failure_is_reported() {
        let mut op = Operation::new(OperationKind::Tag, "x")
            .with_prepare(|_| async { Err(OperationError::new("cleanup failed")) });
        let err = op.prepare_for_retry(&CallContext::new(), 1).await.unwrap_err();
        assert!(matches!(err, RecoveryError::PrepareFailed { .. }));
    }

    #[tokio::test]
    async fn test_execute_once_sees_updated_settings() {
        let mut op = Operation::new(OperationKind::Build, "app").with_execute(|attempt| async move {
            if attempt.settings.no_cache {
                Ok(())
            } else {
                Err(OperationError::new("stale cache layer"))
            }
        });

        let ctx = CallContext::new();
        assert!(op.execute_once(&ctx).await.is_err());
        op.settings_mut().no_cache = true;
        op.execute_once(&ctx).await.unwrap();
    }

    #[test]
    fn test_operation_info_snapshot() {
        let mut op = Operation::new(OperationKind::Build, "app:dev")
            .with_dockerfile("/work/Dockerfile")
            .with_build_context("/work");
        op.settings_mut().set_build_arg("DOCKER_BUILDKIT", "1");

        let info = op.get_operation_info();
        assert_eq!(info["kind"], "build");
        assert_eq!(info["name"], "app:dev");
        assert_eq!(info["timeout_secs"], 1800);
        assert_eq!(info["dockerfile_path"], "/work/Dockerfile");
        assert_eq!(info["build_args"]["DOCKER_BUILDKIT"], "1");
        assert!(info["last_error"].is_null());
    }

    proptest! {
        #[test]
        fn prop_permission_denied_is_never_retried(
            prefix in "[a-zA-Z0-9 :/._-]{0,24}",
            suffix in "[a-zA-Z0-9 :/._-]{0,24}",
            retries in 1u32..10,
            attempt in 0u32..10,
        ) {
            let mut op = Operation::new(OperationKind::Pull, "x").with_retry_attempts(retries);
            op.attempt = attempt;
            let err = OperationError::new(format!("{}permission denied{}", prefix, suffix));
            prop_assert!(!op.can_retry(&err));
        }

        #[test]
        fn prop_connection_refused_is_retried_while_attempts_remain(
            prefix in "[a-z0-9:/._-]{0,16}",
            suffix in "[a-z0-9:/._-]{0,16}",
            (retries, attempt) in (2u32..10).prop_flat_map(|r| (Just(r), 0..r)),
        ) {
            let text = format!("{}connection refused{}", prefix, suffix);
            prop_assume!(!FATAL_PATTERNS.iter().any(|p| text.contains(p)));

            let mut op = Operation::new(OperationKind::Push, "x").with_retry_attempts(retries);
            op.attempt = attempt;
            prop_assert!(op.can_retry(&OperationError::new(text)));
        }
    }

    #[test]
    fn test_output_dir_falls_back_to_dockerfile_parent() {
        let settings = BuildSettings {
            dockerfile_path: Some(PathBuf::from("/src/app/Dockerfile")),
            ..Default::default()
        };
        assert_eq!(settings.output_dir(), Some(PathBuf::from("/src/app")));
    }
}
