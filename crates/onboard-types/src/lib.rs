//! Shared types, errors, rule model, and run context for the rule onboarding pipeline.
//!
//! This crate provides the foundational types used across all other onboarding crates:
//! - `OnboardError` — unified error taxonomy for the bridges, stores, and providers
//! - `StageError` — the error sentinel that stands in for a rule descriptor once a stage fails
//! - `RuleDescriptor` / `ValidatedRule` / `RulePayload` — the rule as it moves through the stages
//! - `RunContext` — strongly-typed per-run state threaded through the stages
//! - `Outcome` — result of executing one stage

pub mod context;
pub mod model;

pub use context::{
    DeploymentStatus, RawRuleDetails, RunContext, StageResult, Turn, TurnRole,
    CONFIGURE_RULE_REQUEST_PAYLOAD, DEPLOYMENT_STATUS, RAW_RULE_DETAILS, VALIDATED_RULE_DETAILS,
};
pub use model::{
    AttributeCheck, BaselineSource, RuleDescriptor, RuleDetails, RulePayload, RuleType,
    ValidatedRule, TABLE_LEVEL_COLUMNS,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error type for all onboarding subsystems.
#[derive(Debug, thiserror::Error)]
pub enum OnboardError {
    // === LLM Provider Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {target} timed out after {timeout_ms}ms")]
    RequestTimeout { target: String, timeout_ms: u64 },

    // === Tool Bridge Errors ===
    #[error("Tool '{tool}' error: {message}")]
    ToolError { tool: String, message: String },

    #[error("Tool '{tool}' is not available on the tool server")]
    ToolNotFound { tool: String },

    // === Session Errors ===
    #[error("Session store error: {0}")]
    SessionError(String),

    #[error("Session '{session_id}' already exists")]
    SessionExists { session_id: String },

    // === Pipeline Errors ===
    #[error("Stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl OnboardError {
    /// Returns `true` if the error is a request that ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, OnboardError::RequestTimeout { .. })
    }

    /// Maps the error to an HTTP status code for server mode.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            OnboardError::AuthError { .. } => Some(401),
            OnboardError::ProviderError { status, .. } if *status != 0 => Some(*status),
            OnboardError::RequestTimeout { .. } => Some(504),
            OnboardError::ToolNotFound { .. } => Some(502),
            OnboardError::SessionExists { .. } => Some(409),
            OnboardError::ConfigError(_) => Some(500),
            OnboardError::InvalidRequest(_) => Some(400),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, OnboardError>`.
pub type Result<T> = std::result::Result<T, OnboardError>;

// ---------------------------------------------------------------------------
// StageError — the error sentinel
// ---------------------------------------------------------------------------

/// Stage-specific prefix carried by every error sentinel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    GenerationError,
    DeploymentError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::GenerationError => "GENERATION_ERROR",
            ErrorCode::DeploymentError => "DEPLOYMENT_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure value stored in a context slot in place of a rule.
///
/// Downstream stages treat its presence as the signal to halt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct StageError {
    pub code: ErrorCode,
    pub message: String,
}

impl StageError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::ValidationError,
            message: message.into(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::GenerationError,
            message: message.into(),
        }
    }

    pub fn deployment(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::DeploymentError,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// StageStatus — outcome status of a pipeline stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Skipped,
    Fail,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Success => "success",
            StageStatus::Skipped => "skipped",
            StageStatus::Fail => "fail",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// OutputChunk — text a stage emits toward the caller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// Internal progress note; logged, never shown to the user.
    Progress,
    /// Benign user-visible notice (e.g. nothing to deploy).
    Notice,
    /// User-visible terminal message of the whole run.
    Final,
    /// User-visible failure raised after validation (assembly or deployment).
    Failure,
    /// Validation gate halt; ends the user-visible stream.
    ValidationError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub kind: ChunkKind,
    pub text: String,
}

impl OutputChunk {
    pub fn new(kind: ChunkKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn is_user_visible(&self) -> bool {
        !matches!(self.kind, ChunkKind::Progress)
    }
}

// ---------------------------------------------------------------------------
// Outcome — result of executing a stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: StageStatus,
    pub output: Option<OutputChunk>,
    pub notes: String,
    pub failure_reason: Option<String>,
}

impl Outcome {
    /// Create a successful outcome with the given notes.
    pub fn success(notes: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Success,
            output: None,
            notes: notes.into(),
            failure_reason: None,
        }
    }

    /// Create a skipped outcome: the stage had nothing to do and wrote nothing.
    pub fn skipped(notes: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skipped,
            output: None,
            notes: notes.into(),
            failure_reason: None,
        }
    }

    /// Create a failed outcome with the given reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Fail,
            output: None,
            notes: String::new(),
            failure_reason: Some(reason.into()),
        }
    }

    /// Attach the chunk this stage emits.
    pub fn with_output(mut self, kind: ChunkKind, text: impl Into<String>) -> Self {
        self.output = Some(OutputChunk::new(kind, text));
        self
    }
}
