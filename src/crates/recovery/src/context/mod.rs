//! TTL-scoped context store shared between pipeline stages
//!
//! Entries are keyed by session id and context type. Each (session, type)
//! pair holds at most one live [`SharedContext`]; writing again replaces it.
//!
//! Expiry is enforced twice:
//! - lazily on read: an expired entry is deleted and reported as
//!   [`RecoveryError::ContextExpired`], later reads get
//!   [`RecoveryError::ContextNotFound`]
//! - periodically by a janitor task that sweeps expired entries and empty
//!   sessions every `sweep_interval`
//!
//! All state sits behind one `tokio::sync::RwLock`: lookups share it, writes
//! and sweeps take it exclusively.

mod payload;

pub use payload::{AiContext, BuildContext, ContextPayload, ErrorContext, ToolContext};

use crate::cancel::{CallContext, CancelSignal};
use crate::config::ContextConfig;
use crate::{RecoveryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A stored payload with its provenance and lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedContext {
    pub session_id: String,
    pub context_type: String,
    pub data: ContextPayload,
    pub created_at: DateTime<Utc>,
    pub created_by_tool: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SharedContext {
    /// Whether the TTL had elapsed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

type Sessions = HashMap<String, HashMap<String, SharedContext>>;

/// Session-scoped store with TTL eviction
pub struct ContextStore {
    sessions: Arc<RwLock<Sessions>>,
    default_ttl: Duration,
    shutdown: CancelSignal,
    janitor: parking_lot::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("default_ttl", &self.default_ttl)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl ContextStore {
    /// Create the store and start its janitor
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: &ContextConfig) -> Self {
        let sessions: Arc<RwLock<Sessions>> = Arc::default();
        let shutdown = CancelSignal::new();
        let janitor = tokio::spawn(run_janitor(
            sessions.clone(),
            config.sweep_interval(),
            shutdown.clone(),
        ));

        Self {
            sessions,
            default_ttl: config.default_ttl(),
            shutdown,
            janitor: parking_lot::Mutex::new(Some(janitor)),
            closed: AtomicBool::new(false),
        }
    }

    /// TTL applied by [`ContextStore::share_context`]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Store `data`, replacing any entry for the same session and type
    pub async fn share_context(
        &self,
        ctx: &CallContext,
        session_id: &str,
        context_type: &str,
        data: impl Into<ContextPayload>,
    ) -> Result<()> {
        self.share_context_with_ttl(ctx, session_id, context_type, data, self.default_ttl)
            .await
    }

    /// Store `data` with an explicit TTL
    pub async fn share_context_with_ttl(
        &self,
        ctx: &CallContext,
        session_id: &str,
        context_type: &str,
        data: impl Into<ContextPayload>,
        ttl: Duration,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RecoveryError::StoreClosed);
        }
        if session_id.trim().is_empty() {
            return Err(RecoveryError::InvalidContext("session id is empty".to_string()));
        }
        if context_type.trim().is_empty() {
            return Err(RecoveryError::InvalidContext("context type is empty".to_string()));
        }
        let data = data.into();
        data.validate()?;

        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| RecoveryError::InvalidContext(format!("ttl out of range: {:?}", ttl)))?;
        let mut metadata = HashMap::new();
        metadata.insert("payload_kind".to_string(), data.kind_name().into());

        let entry = SharedContext {
            session_id: session_id.to_string(),
            context_type: context_type.to_string(),
            data,
            created_at: now,
            created_by_tool: ctx.tool_or_unknown().to_string(),
            expires_at,
            metadata,
        };

        debug!(
            session_id = session_id,
            context_type = context_type,
            created_by_tool = %entry.created_by_tool,
            expires_at = %entry.expires_at,
            "Sharing context"
        );

        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .insert(context_type.to_string(), entry);
        Ok(())
    }

    /// The payload stored for a session and type
    pub async fn get_shared_context(
        &self,
        ctx: &CallContext,
        session_id: &str,
        context_type: &str,
    ) -> Result<ContextPayload> {
        self.get_entry(ctx, session_id, context_type)
            .await
            .map(|entry| entry.data)
    }

    /// The full entry, including provenance and expiry
    pub async fn get_entry(
        &self,
        _ctx: &CallContext,
        session_id: &str,
        context_type: &str,
    ) -> Result<SharedContext> {
        let now = Utc::now();
        let not_found = || RecoveryError::ContextNotFound {
            session_id: session_id.to_string(),
            context_type: context_type.to_string(),
        };

        let expired_at = {
            let sessions = self.sessions.read().await;
            let entry = sessions
                .get(session_id)
                .and_then(|types| types.get(context_type))
                .ok_or_else(not_found)?;
            if !entry.is_expired_at(now) {
                return Ok(entry.clone());
            }
            entry.expires_at
        };

        // Expired: drop the read lock and delete under the write lock.
        let mut sessions = self.sessions.write().await;
        if let Some(types) = sessions.get_mut(session_id) {
            if let Some(entry) = types.get(context_type) {
                if !entry.is_expired_at(now) {
                    // replaced by a fresh write in between
                    return Ok(entry.clone());
                }
                types.remove(context_type);
            }
            if types.is_empty() {
                sessions.remove(session_id);
            }
        }

        debug!(
            session_id = session_id,
            context_type = context_type,
            expired_at = %expired_at,
            "Shared context expired"
        );
        Err(RecoveryError::ContextExpired {
            session_id: session_id.to_string(),
            context_type: context_type.to_string(),
            expired_at,
        })
    }

    /// Drop every entry of a session; clearing an unknown session is a no-op
    pub async fn clear_context(&self, ctx: &CallContext, session_id: &str) -> Result<()> {
        let removed = self.sessions.write().await.remove(session_id);
        info!(
            session_id = session_id,
            tool = ctx.tool_or_unknown(),
            entries = removed.map(|types| types.len()).unwrap_or(0),
            "Cleared shared context"
        );
        Ok(())
    }

    /// Run one janitor pass now; returns the number of entries removed
    pub async fn sweep_expired(&self) -> usize {
        sweep(&self.sessions, Utc::now()).await
    }

    /// Number of sessions holding at least one entry
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Stop the janitor and wait for it to exit. Further writes fail.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.cancel();

        let handle = self.janitor.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Context janitor ended abnormally");
            }
        }
        info!("Context store closed");
        Ok(())
    }
}

impl Drop for ContextStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn sweep(sessions: &RwLock<Sessions>, now: DateTime<Utc>) -> usize {
    let mut sessions = sessions.write().await;
    let mut removed = 0;
    sessions.retain(|_, types| {
        let before = types.len();
        types.retain(|_, entry| !entry.is_expired_at(now));
        removed += before - types.len();
        !types.is_empty()
    });
    removed
}

async fn run_janitor(sessions: Arc<RwLock<Sessions>>, every: Duration, shutdown: CancelSignal) {
    let mut ticker = tokio::time::interval(every);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let removed = sweep(&sessions, Utc::now()).await;
                if removed > 0 {
                    debug!(removed = removed, "Janitor evicted expired contexts");
                }
            }
        }
    }
    debug!("Context janitor stopped");
}
