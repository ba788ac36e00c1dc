//! Payload assembler: projects a validated rule onto the deployment request.

use async_trait::async_trait;

use onboard_types::{
    ChunkKind, Outcome, Result, RulePayload, RunContext, StageError, ValidatedRule,
};

use crate::stage::Stage;

/// Project the five deployment fields, dropping everything else.
///
/// Fails only on structurally unusable input; business rules are the gate's job.
pub fn assemble(rule: &ValidatedRule) -> std::result::Result<RulePayload, StageError> {
    if rule.rule_name.trim().is_empty() {
        return Err(StageError::generation("validated rule has no rule_name"));
    }
    if rule.connectivity_id.trim().is_empty() {
        return Err(StageError::generation("validated rule has no connectivity_id"));
    }
    if rule.attributes.is_empty() {
        return Err(StageError::generation(format!(
            "validated rule '{}' has no attributes",
            rule.rule_name
        )));
    }

    Ok(RulePayload {
        rule_name: rule.rule_name.clone(),
        db_name: rule.db_name.clone(),
        dataset_name: rule.dataset_name.clone(),
        connectivity_id: rule.connectivity_id.clone(),
        attributes: rule.attributes.clone(),
    })
}

pub struct PayloadAssembler;

#[async_trait]
impl Stage for PayloadAssembler {
    fn name(&self) -> &str {
        "payload_assembler"
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<Outcome> {
        let rule = match ctx.validated_rule_details() {
            Some(Ok(rule)) => rule.clone(),
            Some(Err(_)) => return Ok(Outcome::skipped("validation failed; nothing to assemble")),
            None => return Ok(Outcome::skipped("no validated rule; nothing to assemble")),
        };

        match assemble(&rule) {
            Ok(payload) => {
                tracing::debug!(session_id = %ctx.session_id, rule_name = %payload.rule_name, "Payload assembled");
                ctx.set_configure_rule_request_payload(Ok(payload));
                Ok(Outcome::success("payload assembled")
                    .with_output(ChunkKind::Progress, "Assembled the rule configuration payload."))
            }
            Err(err) => {
                let text = err.to_string();
                tracing::warn!(session_id = %ctx.session_id, error = %text, "Payload assembly failed");
                ctx.set_configure_rule_request_payload(Err(err));
                Ok(Outcome::fail(text.clone()).with_output(ChunkKind::Progress, text))
            }
        }
    }
}
