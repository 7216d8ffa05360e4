//! # Recovery - Operation Retry & Failure Recovery
//!
//! Retry, classification and repair for the container operations of an MCP
//! tooling server (image pull, push, tag and build).
//!
//! ## Features
//!
//! - **Operation executor** - per-attempt timeouts, linear backoff, retryability checks
//! - **Failure classifier** - maps raw error text to a failure category and build stage
//! - **Recovery strategies** - pluggable fixes tried by priority, with an optional AI fallback
//! - **Context store** - TTL-scoped, session-keyed hand-off between pipeline stages
//! - **Error router** - declarative rules choosing the next stage after a failure
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use recovery::{CallContext, Framework, FrameworkConfig, OperationKind};
//!
//! # async fn example() -> recovery::Result<()> {
//! let framework = Framework::new(FrameworkConfig::load(None)?)?;
//! let ctx = CallContext::new().with_tool("build_image").with_session("session-1");
//!
//! let mut op = framework
//!     .operation(OperationKind::Build, "registry.local/app:1.0")
//!     .with_dockerfile("./Dockerfile")
//!     .with_execute(|attempt| async move {
//!         // call the Docker API with attempt.settings here
//!         Ok(())
//!     });
//!
//! framework.run_with_recovery(&ctx, &mut op).await?;
//! framework.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod classifier;
pub mod config;
pub mod context;
pub mod executor;
pub mod framework;
pub mod logging;
pub mod recovery;
pub mod router;

// Error types and utilities
mod error;

pub use cancel::{CallContext, CancelSignal};
pub use classifier::{analyze, analyze_text, classify, FailureAnalysis, FailureStage, FailureType};
pub use config::{ConfigBuilder, ContextConfig, ExecutorConfig, FrameworkConfig, RecoveryConfig};
pub use context::{
    AiContext, BuildContext, ContextPayload, ContextStore, ErrorContext, SharedContext, ToolContext,
};
pub use executor::{AttemptContext, BuildSettings, Operation, OperationKind};
pub use framework::Framework;
pub use recovery::{AiAnalyzer, RecoveryStrategy, RecoveryStrategyRegistry};
pub use router::{
    ErrorRouter, FailureRoutingRule, RetryPolicy, RouteErrorConfig, RoutingAction,
    RoutingConditions, RoutingDecision, RoutingOutcome, RoutingRecord,
};

pub use error::{format_error_chain, root_cause, OperationError, RecoveryError, Result};
