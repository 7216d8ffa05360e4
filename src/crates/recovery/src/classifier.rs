//! Failure classification
//!
//! Maps an error to a failure type and a failure stage using ordered
//! first-match pattern tables, then attaches the category's guidance lists.
//! Nothing here performs I/O and nothing here can fail: text that matches no
//! pattern degrades to [`FailureType::Unknown`] / [`FailureStage::Unknown`].

use crate::error::OperationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    Network,
    Permission,
    FileMissing,
    DiskSpace,
    DockerfileSyntax,
    CommandFailure,
    Dependency,
    Authentication,
    Unknown,
}

impl FailureType {
    /// Snake-case name, as serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::Network => "network",
            FailureType::Permission => "permission",
            FailureType::FileMissing => "file_missing",
            FailureType::DiskSpace => "disk_space",
            FailureType::DockerfileSyntax => "dockerfile_syntax",
            FailureType::CommandFailure => "command_failure",
            FailureType::Dependency => "dependency",
            FailureType::Authentication => "authentication",
            FailureType::Unknown => "unknown",
        }
    }

    /// Categories worth retrying without changing anything.
    pub fn retry_recommended(&self) -> bool {
        matches!(self, FailureType::Network | FailureType::DiskSpace)
    }

    /// Categories that never succeed on a plain retry.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FailureType::Permission
                | FailureType::Authentication
                | FailureType::DockerfileSyntax
                | FailureType::FileMissing
        )
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage the failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    ImagePull,
    FileCopy,
    CommandExecution,
    BuildProcess,
    DockerfileParsing,
    Unknown,
}

impl FailureStage {
    /// Snake-case name, as serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::ImagePull => "image_pull",
            FailureStage::FileCopy => "file_copy",
            FailureStage::CommandExecution => "command_execution",
            FailureStage::BuildProcess => "build_process",
            FailureStage::DockerfileParsing => "dockerfile_parsing",
            FailureStage::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const TYPE_PATTERNS: &[(FailureType, &[&str])] = &[
    (FailureType::FileMissing, &["no such file", "not found"]),
    (FailureType::Permission, &["permission denied", "access denied"]),
    (FailureType::Network, &["network", "timeout", "connection"]),
    (FailureType::DiskSpace, &["space", "disk full"]),
    (FailureType::DockerfileSyntax, &["syntax", "invalid"]),
    (
        FailureType::CommandFailure,
        &["exit status", "returned a non-zero code"],
    ),
    (FailureType::Dependency, &["dependency", "package"]),
    (FailureType::Authentication, &["authentication", "unauthorized"]),
];

const STAGE_PATTERNS: &[(FailureStage, &[&str])] = &[
    (FailureStage::ImagePull, &["pull", "download"]),
    (FailureStage::FileCopy, &["copy", "add"]),
    (FailureStage::CommandExecution, &["run", "execute"]),
    (FailureStage::BuildProcess, &["build"]),
    (FailureStage::DockerfileParsing, &["dockerfile"]),
];

const GENERIC_FIXES: &[&str] = &[
    "Review the complete error output for the failing step",
    "Retry the operation after verifying its inputs",
];

/// Structured, side-effect free description of a failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureAnalysis {
    pub failure_type: FailureType,
    pub failure_stage: FailureStage,
    pub reason: String,
    pub root_causes: Vec<String>,
    pub suggested_fixes: Vec<String>,
    pub alternative_strategies: Vec<String>,
    pub security_implications: Vec<String>,
    pub retry_recommended: bool,
}

fn first_match<T: Copy>(text: &str, table: &[(T, &[&str])], default: T) -> T {
    table
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| text.contains(p)))
        .map(|(category, _)| *category)
        .unwrap_or(default)
}

/// Classify raw error text into a failure type and stage
pub fn classify(err_text: &str) -> (FailureType, FailureStage) {
    let lower = err_text.to_lowercase();
    (
        first_match(&lower, TYPE_PATTERNS, FailureType::Unknown),
        first_match(&lower, STAGE_PATTERNS, FailureStage::Unknown),
    )
}

/// Build the full analysis for an operation error
///
/// An explicit kind on the error wins over the text patterns; the stage is
/// always derived from the text.
pub fn analyze(err: &OperationError) -> FailureAnalysis {
    let (text_type, stage) = classify(err.message());
    let failure_type = err.kind().unwrap_or(text_type);
    build_analysis(failure_type, stage, err.message())
}

/// Analysis for text that did not come from an [`OperationError`]
pub fn analyze_text(err_text: &str) -> FailureAnalysis {
    let (failure_type, stage) = classify(err_text);
    build_analysis(failure_type, stage, err_text)
}

fn build_analysis(failure_type: FailureType, stage: FailureStage, reason: &str) -> FailureAnalysis {
    let mut suggested_fixes = owned(fixes_for(failure_type));
    if suggested_fixes.is_empty() {
        suggested_fixes = owned(GENERIC_FIXES);
    }

    FailureAnalysis {
        failure_type,
        failure_stage: stage,
        reason: reason.to_string(),
        root_causes: owned(causes_for(failure_type)),
        suggested_fixes,
        alternative_strategies: owned(alternatives_for(failure_type)),
        security_implications: owned(security_for(failure_type)),
        retry_recommended: failure_type.retry_recommended(),
    }
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn causes_for(failure_type: FailureType) -> &'static [&'static str] {
    match failure_type {
        FailureType::FileMissing => &["Required file or directory is missing from build context"],
        FailureType::Permission => &["Insufficient permissions to access files or execute commands"],
        FailureType::Network => &["Network connectivity issues preventing package downloads"],
        FailureType::CommandFailure => &["Command in Dockerfile failed during execution"],
        FailureType::DiskSpace => &["Insufficient disk space or storage quota exceeded"],
        _ => &[],
    }
}

fn fixes_for(failure_type: FailureType) -> &'static [&'static str] {
    match failure_type {
        FailureType::FileMissing => &["Ensure all required files are in the build context"],
        FailureType::Permission => &["Update file permissions or run as root user"],
        FailureType::Network => &["Retry with network configuration or use alternative mirrors"],
        FailureType::DiskSpace => &["Clean up build cache and temporary files"],
        _ => &[],
    }
}

fn alternatives_for(failure_type: FailureType) -> &'static [&'static str] {
    match failure_type {
        FailureType::Network => &["Use multi-stage builds to cache dependencies separately"],
        FailureType::Permission => &["Configure build to work without root privileges"],
        FailureType::DiskSpace => &["Use alpine images and multi-stage builds to minimize size"],
        _ => &[],
    }
}

fn security_for(failure_type: FailureType) -> &'static [&'static str] {
    match failure_type {
        FailureType::Permission => &[
            "Running as root may introduce security risks",
            "Consider using least privilege principle",
        ],
        FailureType::Network => &[
            "Network failures might expose build to insecure fallbacks",
            "Ensure package sources are verified and trusted",
        ],
        FailureType::Authentication => &[
            "Authentication failures may indicate credential exposure",
            "Review credential management practices",
        ],
        _ => &[],
    }
}
