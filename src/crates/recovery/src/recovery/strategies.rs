//! Built-in recovery strategies
//!
//! Each strategy adjusts the operation's [`BuildSettings`] (build args,
//! cache flag, Dockerfile variant), resets it with `prepare_for_retry` and
//! re-runs it exactly once.

use super::dockerfile;
use super::RecoveryStrategy;
use crate::cancel::CallContext;
use crate::classifier::{FailureAnalysis, FailureType};
use crate::config::RecoveryConfig;
use crate::error::OperationError;
use crate::executor::{BuildSettings, Operation};
use crate::logging::{redact_credentials, LogGuard};
use crate::{RecoveryError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const BUILDKIT_ARGS: &[(&str, &str)] = &[("DOCKER_BUILDKIT", "1"), ("BUILDKIT_INLINE_CACHE", "1")];

fn strategy_failed(strategy: &str, reason: impl Into<String>) -> RecoveryError {
    RecoveryError::StrategyFailed {
        strategy: strategy.to_string(),
        reason: reason.into(),
    }
}

/// Reset the operation and give it one more attempt
async fn retry_once(ctx: &CallContext, operation: &mut Operation) -> Result<()> {
    let last_attempt = operation.attempt();
    operation.prepare_for_retry(ctx, last_attempt).await?;
    operation.execute_once(ctx).await
}

fn required_dockerfile(strategy: &str, settings: &BuildSettings) -> Result<PathBuf> {
    settings
        .dockerfile_path
        .clone()
        .ok_or_else(|| strategy_failed(strategy, "no Dockerfile configured"))
}

async fn read_dockerfile(strategy: &str, path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| strategy_failed(strategy, format!("failed to read {}: {}", path.display(), e)))
}

/// Write a rewritten Dockerfile next to the build inputs and point the build at it
async fn write_variant(
    strategy: &str,
    settings: &mut BuildSettings,
    file_name: &str,
    content: &str,
) -> Result<PathBuf> {
    let dir = settings
        .output_dir()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."));
    let path = dir.join(file_name);
    tokio::fs::write(&path, content)
        .await
        .map_err(|e| strategy_failed(strategy, format!("failed to write {}: {}", path.display(), e)))?;
    settings.dockerfile_path = Some(path.clone());
    Ok(path)
}

/// Proxy, DNS and cache settings for network failures
#[derive(Debug, Clone)]
pub struct NetworkRecovery {
    http_proxy: Option<String>,
    corporate_dns: Option<String>,
    dns_servers: Vec<String>,
}

impl NetworkRecovery {
    /// Take proxy and DNS settings from `config`
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            http_proxy: config.http_proxy.clone(),
            corporate_dns: config.corporate_dns.clone(),
            dns_servers: config.dns_servers.clone(),
        }
    }

    fn apply(&self, settings: &mut BuildSettings) {
        if let Some(proxy) = &self.http_proxy {
            info!(proxy = %redact_credentials(proxy), "Building through proxy");
            for key in ["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy"] {
                settings.set_build_arg(key, proxy.clone());
            }
        }
        if !self.dns_servers.is_empty() {
            settings.set_build_arg("DNS_SERVERS", self.dns_servers.join(","));
        }
        if let Some(dns) = &self.corporate_dns {
            settings.set_build_arg("CORPORATE_DNS", dns.clone());
        }
        settings.no_cache = true;
    }
}

#[async_trait]
impl RecoveryStrategy for NetworkRecovery {
    fn can_handle(&self, _err: &OperationError, analysis: &FailureAnalysis) -> bool {
        analysis.failure_type == FailureType::Network
    }

    async fn recover(
        &self,
        ctx: &CallContext,
        _err: &OperationError,
        _analysis: &FailureAnalysis,
        operation: &mut Operation,
    ) -> Result<()> {
        let _guard = LogGuard::new("network recovery");
        self.apply(operation.settings_mut());
        info!(
            operation = %operation.name(),
            proxy = self.http_proxy.is_some(),
            "Network recovery configuration applied"
        );
        retry_once(ctx, operation).await
    }

    fn priority(&self) -> i32 {
        80
    }
}

/// Script and directory permissions plus a root-friendly Dockerfile
#[derive(Debug, Clone, Default)]
pub struct PermissionRecovery;

impl PermissionRecovery {
    /// Stateless; equivalent to `default()`
    pub fn new() -> Self {
        Self
    }
}

/// Make directories and scripts under `root` executable; `.git` is skipped.
/// Returns the number of paths changed.
#[cfg(unix)]
fn fix_context_permissions(root: &Path) -> usize {
    use std::os::unix::fs::PermissionsExt;

    let executable = || std::fs::Permissions::from_mode(0o755);
    let mut changed = 0;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to read build context directory");
                continue;
            }
        };
        if std::fs::set_permissions(&dir, executable()).is_ok() {
            changed += 1;
        }

        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == ".git" {
                continue;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && (name.ends_with(".sh") || name.contains("script")) {
                match std::fs::set_permissions(&path, executable()) {
                    Ok(()) => changed += 1,
                    Err(e) => warn!(file = %path.display(), error = %e, "Failed to fix script permissions"),
                }
            }
        }
    }
    changed
}

#[cfg(not(unix))]
fn fix_context_permissions(root: &Path) -> usize {
    debug!(root = %root.display(), "Permission fixes are only applied on unix");
    0
}

#[async_trait]
impl RecoveryStrategy for PermissionRecovery {
    fn can_handle(&self, _err: &OperationError, analysis: &FailureAnalysis) -> bool {
        analysis.failure_type == FailureType::Permission
    }

    async fn recover(
        &self,
        ctx: &CallContext,
        _err: &OperationError,
        _analysis: &FailureAnalysis,
        operation: &mut Operation,
    ) -> Result<()> {
        let _guard = LogGuard::new("permission recovery");

        if let Some(root) = operation.settings().build_context.clone() {
            let changed = tokio::task::spawn_blocking(move || fix_context_permissions(&root))
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Permission fix task failed");
                    0
                });
            debug!(changed = changed, "Build context permissions adjusted");
        }

        if let Some(path) = operation.settings().dockerfile_path.clone() {
            let content = read_dockerfile("permission", &path).await?;
            let fixed = dockerfile::permission_fixed(&content);
            let variant =
                write_variant("permission", operation.settings_mut(), "Dockerfile.permission-fix", &fixed)
                    .await?;
            info!(dockerfile = %variant.display(), "Using permission-fixed Dockerfile");
        }

        let settings = operation.settings_mut();
        for (key, value) in BUILDKIT_ARGS {
            settings.set_build_arg(*key, *value);
        }

        retry_once(ctx, operation).await
    }

    fn priority(&self) -> i32 {
        90
    }
}

/// Syntax, deprecation, path and base-image fixes
#[derive(Debug, Clone, Default)]
pub struct DockerfileRecovery;

impl DockerfileRecovery {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RecoveryStrategy for DockerfileRecovery {
    fn can_handle(&self, _err: &OperationError, analysis: &FailureAnalysis) -> bool {
        analysis.failure_type == FailureType::DockerfileSyntax
    }

    async fn recover(
        &self,
        ctx: &CallContext,
        _err: &OperationError,
        _analysis: &FailureAnalysis,
        operation: &mut Operation,
    ) -> Result<()> {
        let _guard = LogGuard::new("dockerfile recovery");
        let path = required_dockerfile("dockerfile", operation.settings())?;
        let content = read_dockerfile("dockerfile", &path).await?;

        let fixed = dockerfile::fix_syntax(&content);
        let fixed = dockerfile::update_deprecated(&fixed);
        let fixed = dockerfile::fix_copy_sources(&fixed);
        let fixed = dockerfile::fix_base_images(&fixed);

        let variant =
            write_variant("dockerfile", operation.settings_mut(), "Dockerfile.syntax-fix", &fixed).await?;
        info!(
            original = %path.display(),
            fixed = %variant.display(),
            "Dockerfile recovery applied"
        );

        retry_once(ctx, operation).await
    }

    fn priority(&self) -> i32 {
        95
    }
}

const DEPENDENCY_ARGS: &[(&str, &str)] = &[
    ("DEBIAN_FRONTEND", "noninteractive"),
    ("PIP_DEFAULT_TIMEOUT", "100"),
    ("NPM_CONFIG_FETCH_RETRIES", "5"),
    ("NPM_CONFIG_FETCH_RETRY_MINTIMEOUT", "20000"),
];

/// Package-manager hardening and pinning of the packages named in the error
#[derive(Debug, Clone, Default)]
pub struct DependencyRecovery;

impl DependencyRecovery {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RecoveryStrategy for DependencyRecovery {
    fn can_handle(&self, _err: &OperationError, analysis: &FailureAnalysis) -> bool {
        analysis.failure_type == FailureType::Dependency
    }

    async fn recover(
        &self,
        ctx: &CallContext,
        err: &OperationError,
        _analysis: &FailureAnalysis,
        operation: &mut Operation,
    ) -> Result<()> {
        let _guard = LogGuard::new("dependency recovery");
        let path = required_dockerfile("dependency", operation.settings())?;
        let content = read_dockerfile("dependency", &path).await?;

        let packages = dockerfile::extract_package_names(err.message());
        let fixed = dockerfile::fix_package_managers(&content);
        let fixed = dockerfile::add_install_retries(&fixed);
        let fixed = dockerfile::add_package_sources(&fixed);
        let fixed = dockerfile::pin_packages(&fixed, &packages);

        let settings = operation.settings_mut();
        let variant = write_variant("dependency", settings, "Dockerfile.dependency-fix", &fixed).await?;
        for (key, value) in DEPENDENCY_ARGS {
            settings.set_build_arg(*key, *value);
        }
        info!(
            dockerfile = %variant.display(),
            packages = ?packages,
            "Dependency recovery applied"
        );

        retry_once(ctx, operation).await
    }

    fn priority(&self) -> i32 {
        85
    }
}

const TEMP_SUFFIXES: &[&str] = &[".tmp", ".temp"];

/// Workspace cleanup and a smaller-footprint Dockerfile
#[derive(Debug, Clone, Default)]
pub struct DiskSpaceRecovery;

impl DiskSpaceRecovery {
    pub fn new() -> Self {
        Self
    }
}

/// Delete temporary files directly under `dir`; returns bytes freed
async fn clean_workspace(dir: &Path) -> u64 {
    let mut freed = 0;
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(workspace = %dir.display(), error = %e, "Failed to read workspace");
            return 0;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !TEMP_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            continue;
        }
        let size = match entry.metadata().await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => continue,
        };
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => freed += size,
            Err(e) => warn!(file = %entry.path().display(), error = %e, "Failed to remove temporary file"),
        }
    }
    freed
}

#[async_trait]
impl RecoveryStrategy for DiskSpaceRecovery {
    fn can_handle(&self, _err: &OperationError, analysis: &FailureAnalysis) -> bool {
        analysis.failure_type == FailureType::DiskSpace
    }

    async fn recover(
        &self,
        ctx: &CallContext,
        _err: &OperationError,
        _analysis: &FailureAnalysis,
        operation: &mut Operation,
    ) -> Result<()> {
        let _guard = LogGuard::new("disk space recovery");

        if let Some(workspace) = operation.settings().workspace_dir.clone() {
            let freed = clean_workspace(&workspace).await;
            info!(workspace = %workspace.display(), freed_bytes = freed, "Workspace cleaned");
        }

        if let Some(path) = operation.settings().dockerfile_path.clone() {
            match read_dockerfile("space", &path).await {
                Ok(content) => {
                    let optimized = dockerfile::optimize_for_space(&content);
                    let variant =
                        write_variant("space", operation.settings_mut(), "Dockerfile.space-optimized", &optimized)
                            .await?;
                    info!(dockerfile = %variant.display(), "Using space-optimized Dockerfile");
                }
                Err(e) => warn!(error = %e, "Skipping Dockerfile optimization"),
            }
        }

        let settings = operation.settings_mut();
        settings.no_cache = false;
        for (key, value) in BUILDKIT_ARGS {
            settings.set_build_arg(*key, *value);
        }

        retry_once(ctx, operation).await
    }

    fn priority(&self) -> i32 {
        100
    }
}
