//! Interpretation stage: free text in, raw rule details out.
//!
//! The interpreter itself is a capability behind [`RuleInterpreter`]; this
//! module only adapts it to the stage contract and supplies two
//! implementations (LLM-backed and a fixed demo descriptor).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use onboard_llm::{LlmClient, Message, Request, ResponseFormat};
use onboard_types::{ChunkKind, Outcome, RawRuleDetails, Result, RunContext, Turn, TurnRole};

use crate::stage::Stage;

/// Capability that turns a user request into raw rule details.
#[async_trait]
pub trait RuleInterpreter: Send + Sync {
    async fn interpret(&self, message: &str, history: &[Turn]) -> Result<RawRuleDetails>;
}

// ---------------------------------------------------------------------------
// LlmInterpreter
// ---------------------------------------------------------------------------

const FEW_SHOT_EXAMPLES: &str = r#"Example 1:
User: I need to make sure the average price in sales table of customer schema in AWSRepo is between 10 and 100.
Assistant:
{
  "rule_name": "avg_price_check",
  "db_name": "customer",
  "dataset_name": "sales",
  "repository_name": "AWSRepo",
  "attributes": [
    {
      "column_name": "price",
      "rule_type": "MEAN",
      "baseline_source": "CONFIG",
      "rule_details": {"baseline_value": 10.0, "threshold_value": 100.0}
    }
  ]
}

Example 2:
User: Check if the row count for the customer schema orders table in AWSRepo changes by more than 5% from the previous run.
Assistant:
{
  "rule_name": "order_count_check",
  "db_name": "customer",
  "dataset_name": "orders",
  "repository_name": "AWSRepo",
  "attributes": [
    {
      "column_name": "RECORD_COUNT",
      "rule_type": "RECORD_COUNT",
      "baseline_source": "PREVIOUS",
      "rule_details": {"baseline_value": 1.0, "threshold_value": 5.0}
    }
  ]
}"#;

const DESCRIPTOR_SCHEMA: &str = r#"{
  "type": "object",
  "required": ["rule_name", "db_name", "dataset_name", "repository_name", "attributes"],
  "properties": {
    "rule_name": {"type": "string"},
    "db_name": {"type": "string"},
    "dataset_name": {"type": "string"},
    "repository_name": {"type": ["string", "null"]},
    "attributes": {
      "type": "array",
      "minItems": 1,
      "items": {
        "type": "object",
        "required": ["column_name", "rule_type", "rule_details"],
        "properties": {
          "column_name": {"type": "string"},
          "rule_type": {"enum": ["MEAN", "SUM", "RECORD_COUNT", "STALE_COUNT", "STALE_CONTEXT", "NULL_COUNT", "MEAN_VARIANCE", "MEDIAN_VARIANCE"]},
          "baseline_source": {"enum": ["CONFIG", "PREVIOUS"]},
          "rule_details": {
            "type": "object",
            "required": ["baseline_value"],
            "properties": {
              "baseline_value": {"type": "number"},
              "threshold_value": {"type": ["number", "null"]}
            }
          }
        }
      }
    }
  }
}"#;

fn system_instruction() -> String {
    format!(
        "You are a Data Quality Assistant. Extract exactly one data-quality rule from the \
         user's request and answer with a single JSON object matching this schema:\n{}\n\n\
         Use the reserved column names RECORD_COUNT, STALE_COUNT or STALE_CONTEXT for \
         table-level checks. Leave repository_name null if the user did not name one. \
         Set baseline_source to PREVIOUS when the check compares against the previous run, \
         otherwise CONFIG. For RECORD_COUNT, STALE_COUNT and STALE_CONTEXT with a PREVIOUS \
         baseline, and for every MEAN_VARIANCE check, baseline_value is 1.0.\n\n{}",
        DESCRIPTOR_SCHEMA, FEW_SHOT_EXAMPLES
    )
}

/// Interpreter that asks an LLM for the descriptor as JSON text.
pub struct LlmInterpreter {
    client: Arc<LlmClient>,
    model: String,
}

impl LlmInterpreter {
    pub fn new(client: Arc<LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    fn build_request(&self, message: &str, history: &[Turn]) -> Request {
        let mut messages = vec![Message::system(system_instruction())];
        messages.extend(history.iter().map(|turn| match turn.role {
            TurnRole::User => Message::user(&turn.text),
            TurnRole::Assistant => Message::assistant(&turn.text),
        }));
        messages.push(Message::user(message));

        Request::new(&self.model, messages)
            .with_response_format(ResponseFormat::Json)
            .with_temperature(0.0)
    }
}

#[async_trait]
impl RuleInterpreter for LlmInterpreter {
    async fn interpret(&self, message: &str, history: &[Turn]) -> Result<RawRuleDetails> {
        let request = self.build_request(message, history);
        let response = self.client.complete(&request).await?;
        Ok(RawRuleDetails::Text(response.text))
    }
}

// ---------------------------------------------------------------------------
// StaticInterpreter
// ---------------------------------------------------------------------------

/// Interpreter that ignores the request and returns a fixed descriptor.
/// Used for demos and offline runs without an API key.
#[derive(Debug, Clone, Default)]
pub struct StaticInterpreter;

impl StaticInterpreter {
    pub fn descriptor() -> serde_json::Value {
        json!({
            "rule_name": "CUSTOMER_SALES_STALE_COUNT_RULE",
            "db_name": "customer",
            "dataset_name": "sales",
            "repository_name": "AWSRepo",
            "attributes": [
                {
                    "column_name": "STALE",
                    "rule_type": "STALE_COUNT",
                    "baseline_source": "PREVIOUS",
                    "rule_details": {"baseline_value": 1.0, "threshold_value": 100.0}
                }
            ]
        })
    }
}

#[async_trait]
impl RuleInterpreter for StaticInterpreter {
    async fn interpret(&self, _message: &str, _history: &[Turn]) -> Result<RawRuleDetails> {
        Ok(RawRuleDetails::Structured(Self::descriptor()))
    }
}

// ---------------------------------------------------------------------------
// ExtractionStage
// ---------------------------------------------------------------------------

pub struct ExtractionStage {
    interpreter: Arc<dyn RuleInterpreter>,
}

impl ExtractionStage {
    pub fn new(interpreter: Arc<dyn RuleInterpreter>) -> Self {
        Self { interpreter }
    }
}

#[async_trait]
impl Stage for ExtractionStage {
    fn name(&self) -> &str {
        "rule_extraction"
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<Outcome> {
        match self
            .interpreter
            .interpret(&ctx.user_message, &ctx.history)
            .await
        {
            Ok(raw) => {
                ctx.set_raw_rule_details(raw);
                Ok(Outcome::success("rule details extracted")
                    .with_output(ChunkKind::Progress, "Extracted rule details from the request."))
            }
            Err(e) => {
                // No retry: the gate reports the missing slot.
                tracing::warn!(session_id = %ctx.session_id, error = %e, "Rule interpretation failed");
                Ok(Outcome::fail(format!("interpretation failed: {e}")))
            }
        }
    }
}
