//! Per-run pipeline state.
//!
//! Each run owns one [`RunContext`]. Stages read the slot written by their
//! predecessor and write their own; every write is recorded so callers can
//! see which stages produced output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{RulePayload, ValidatedRule};
use crate::StageError;

pub const RAW_RULE_DETAILS: &str = "raw_rule_details";
pub const VALIDATED_RULE_DETAILS: &str = "validated_rule_details";
pub const CONFIGURE_RULE_REQUEST_PAYLOAD: &str = "configure_rule_request_payload";
pub const DEPLOYMENT_STATUS: &str = "deployment_status";

/// A context slot that may hold the error sentinel instead of a value.
pub type StageResult<T> = std::result::Result<T, StageError>;

// ---------------------------------------------------------------------------
// RawRuleDetails
// ---------------------------------------------------------------------------

/// Interpreter output before parsing: either structured JSON or free text
/// that still has to be unwrapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawRuleDetails {
    Text(String),
    Structured(serde_json::Value),
}

// ---------------------------------------------------------------------------
// DeploymentStatus
// ---------------------------------------------------------------------------

/// Success marker written once the deployment tool accepted the rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub rule_name: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Conversation turns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Strongly-typed state for one pipeline run.
///
/// The four slots mirror the stable context keys. A slot is either unset,
/// a value, or (for the validated rule and the payload) an error sentinel.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub session_id: String,
    pub run_id: uuid::Uuid,
    pub started_at: DateTime<Utc>,
    pub user_message: String,
    pub history: Vec<Turn>,
    raw_rule_details: Option<RawRuleDetails>,
    validated_rule_details: Option<StageResult<ValidatedRule>>,
    configure_rule_request_payload: Option<StageResult<RulePayload>>,
    deployment_status: Option<DeploymentStatus>,
    writes: Vec<&'static str>,
}

impl RunContext {
    pub fn new(session_id: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            run_id: uuid::Uuid::new_v4(),
            started_at: Utc::now(),
            user_message: user_message.into(),
            history: Vec::new(),
            raw_rule_details: None,
            validated_rule_details: None,
            configure_rule_request_payload: None,
            deployment_status: None,
            writes: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }

    pub fn raw_rule_details(&self) -> Option<&RawRuleDetails> {
        self.raw_rule_details.as_ref()
    }

    pub fn set_raw_rule_details(&mut self, value: RawRuleDetails) {
        self.raw_rule_details = Some(value);
        self.writes.push(RAW_RULE_DETAILS);
    }

    pub fn validated_rule_details(&self) -> Option<&StageResult<ValidatedRule>> {
        self.validated_rule_details.as_ref()
    }

    pub fn set_validated_rule_details(&mut self, value: StageResult<ValidatedRule>) {
        self.validated_rule_details = Some(value);
        self.writes.push(VALIDATED_RULE_DETAILS);
    }

    pub fn configure_rule_request_payload(&self) -> Option<&StageResult<RulePayload>> {
        self.configure_rule_request_payload.as_ref()
    }

    pub fn set_configure_rule_request_payload(&mut self, value: StageResult<RulePayload>) {
        self.configure_rule_request_payload = Some(value);
        self.writes.push(CONFIGURE_RULE_REQUEST_PAYLOAD);
    }

    pub fn deployment_status(&self) -> Option<&DeploymentStatus> {
        self.deployment_status.as_ref()
    }

    pub fn set_deployment_status(&mut self, value: DeploymentStatus) {
        self.deployment_status = Some(value);
        self.writes.push(DEPLOYMENT_STATUS);
    }

    /// Keys written so far, in write order.
    pub fn writes(&self) -> &[&'static str] {
        &self.writes
    }

    /// JSON view of the slots keyed by their stable names. Error sentinels
    /// are rendered as their prefixed message text.
    pub fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        fn slot<T: Serialize>(value: &StageResult<T>) -> serde_json::Value {
            match value {
                Ok(v) => serde_json::to_value(v).unwrap_or(serde_json::Value::Null),
                Err(e) => serde_json::Value::String(e.to_string()),
            }
        }

        let mut map = serde_json::Map::new();
        if let Some(raw) = &self.raw_rule_details {
            map.insert(
                RAW_RULE_DETAILS.into(),
                serde_json::to_value(raw).unwrap_or(serde_json::Value::Null),
            );
        }
        if let Some(v) = &self.validated_rule_details {
            map.insert(VALIDATED_RULE_DETAILS.into(), slot(v));
        }
        if let Some(v) = &self.configure_rule_request_payload {
            map.insert(CONFIGURE_RULE_REQUEST_PAYLOAD.into(), slot(v));
        }
        if let Some(v) = &self.deployment_status {
            map.insert(
                DEPLOYMENT_STATUS.into(),
                serde_json::to_value(v).unwrap_or(serde_json::Value::Null),
            );
        }
        map
    }
}
