//! Deployment bridge: submit the assembled payload to the rule service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use onboard_tools::{ToolOutput, Toolset};
use onboard_types::{
    ChunkKind, DeploymentStatus, OnboardError, Outcome, Result, RulePayload, RunContext,
    StageError,
};

use crate::events::{EventEmitter, PipelineEvent};
use crate::stage::Stage;

/// Capability that persists a rule configuration remotely.
#[async_trait]
pub trait RuleDeployer: Send + Sync {
    /// Returns the service's confirmation message.
    async fn deploy(&self, payload: &RulePayload) -> Result<String>;
}

// ---------------------------------------------------------------------------
// ToolsetDeployer
// ---------------------------------------------------------------------------

/// [`RuleDeployer`] backed by a named tool on a tool server.
pub struct ToolsetDeployer {
    toolset: Arc<dyn Toolset>,
    tool_name: String,
    timeout: Duration,
}

impl ToolsetDeployer {
    pub fn new(toolset: Arc<dyn Toolset>, tool_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            toolset,
            tool_name: tool_name.into(),
            timeout,
        }
    }

    async fn call(&self, payload: &RulePayload) -> Result<ToolOutput> {
        let tool = self
            .toolset
            .get_tool(&self.tool_name)
            .await?
            .ok_or_else(|| OnboardError::ToolNotFound {
                tool: self.tool_name.clone(),
            })?;
        tool.call(json!({ "request": payload })).await
    }
}

#[async_trait]
impl RuleDeployer for ToolsetDeployer {
    async fn deploy(&self, payload: &RulePayload) -> Result<String> {
        tracing::info!(rule_name = %payload.rule_name, tool = %self.tool_name, "Submitting rule for deployment");

        let output = tokio::time::timeout(self.timeout, self.call(payload))
            .await
            .map_err(|_| OnboardError::RequestTimeout {
                target: self.tool_name.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            })??;

        interpret_output(&self.tool_name, &output)
    }
}

/// A flagged error, or an `error` field in the body, is a failure. Otherwise
/// the confirmation is the body's `message`, or its raw text.
fn interpret_output(tool: &str, output: &ToolOutput) -> Result<String> {
    let text = output.text();
    if output.is_error {
        return Err(OnboardError::ToolError {
            tool: tool.to_string(),
            message: if text.trim().is_empty() {
                "the tool reported an error without details".to_string()
            } else {
                text
            },
        });
    }

    let body = output
        .structured_content
        .clone()
        .or_else(|| serde_json::from_str::<serde_json::Value>(&text).ok());

    if let Some(body) = &body {
        if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
            return Err(OnboardError::ToolError {
                tool: tool.to_string(),
                message: err.as_str().map(String::from).unwrap_or_else(|| err.to_string()),
            });
        }
        if let Some(message) = body.get("message").and_then(|m| m.as_str()) {
            return Ok(message.to_string());
        }
    }

    if text.trim().is_empty() {
        Ok("rule configured".to_string())
    } else {
        Ok(text)
    }
}

fn failure_detail(err: &OnboardError) -> String {
    match err {
        OnboardError::ToolError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// DeploymentBridge
// ---------------------------------------------------------------------------

pub struct DeploymentBridge {
    deployer: Arc<dyn RuleDeployer>,
    events: Option<EventEmitter>,
}

impl DeploymentBridge {
    pub fn new(deployer: Arc<dyn RuleDeployer>) -> Self {
        Self {
            deployer,
            events: None,
        }
    }

    fn announce(&self, ctx: &RunContext, rule_name: &str, success: bool) {
        if let Some(events) = &self.events {
            events.emit(PipelineEvent::DeploymentFinished {
                run_id: ctx.run_id.to_string(),
                rule_name: rule_name.to_string(),
                success,
            });
        }
    }
}

#[async_trait]
impl Stage for DeploymentBridge {
    fn name(&self) -> &str {
        "deployment_bridge"
    }

    fn attach_events(&mut self, events: &EventEmitter) {
        self.events = Some(events.clone());
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<Outcome> {
        let payload = match ctx.configure_rule_request_payload() {
            None => {
                tracing::info!(session_id = %ctx.session_id, "No payload present; deployment skipped");
                return Ok(Outcome::skipped("no payload").with_output(
                    ChunkKind::Notice,
                    "Deployment skipped: no rule configuration payload was produced.",
                ));
            }
            Some(Err(sentinel)) => {
                let text = sentinel.to_string();
                return Ok(Outcome::fail(text.clone())
                    .with_output(ChunkKind::Failure, format!("❌ Deployment failed: {text}")));
            }
            Some(Ok(payload)) => payload.clone(),
        };

        // Every failure past this point becomes a chat message, never an Err.
        let result = self.deployer.deploy(&payload).await;
        self.announce(ctx, &payload.rule_name, result.is_ok());
        match result {
            Ok(message) => {
                tracing::info!(session_id = %ctx.session_id, rule_name = %payload.rule_name, "Rule deployed");
                let text = format!(
                    "✅ Rule '{}' deployed successfully: {}",
                    payload.rule_name, message
                );
                ctx.set_deployment_status(DeploymentStatus {
                    rule_name: payload.rule_name,
                    message,
                });
                Ok(Outcome::success("deployed").with_output(ChunkKind::Final, text))
            }
            Err(err) => {
                let detail = failure_detail(&err);
                tracing::error!(
                    session_id = %ctx.session_id,
                    rule_name = %payload.rule_name,
                    error = %err,
                    "Deployment failed"
                );
                let reason = StageError::deployment(detail.clone()).to_string();
                Ok(Outcome::fail(reason).with_output(
                    ChunkKind::Failure,
                    format!(
                        "❌ Deployment of rule '{}' failed: {}",
                        payload.rule_name, detail
                    ),
                ))
            }
        }
    }
}
