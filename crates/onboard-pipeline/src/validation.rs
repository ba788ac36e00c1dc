//! Validation gate: parse the raw rule details, resolve the repository, and
//! enforce the baseline business rules.
//!
//! Every halt writes a `VALIDATION_ERROR` sentinel to `validated_rule_details`
//! and emits it as a [`ChunkKind::ValidationError`] chunk; later stages see
//! the sentinel and stay silent.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use onboard_types::{
    AttributeCheck, BaselineSource, ChunkKind, Outcome, RawRuleDetails, Result, RuleDescriptor,
    RuleType, RunContext, StageError,
};

use crate::lookup::{LookupError, ReferenceLookup};
use crate::stage::Stage;

/// The baseline a ratio-style check must carry.
const RATIO_BASELINE: f64 = 1.0;

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").ok())
        .as_ref()
}

/// Pull the JSON object out of interpreter text: a fenced block if there is
/// one, otherwise the span from the first `{` to the last `}`.
fn extract_json(text: &str) -> Option<&str> {
    let inner = fence_regex()
        .and_then(|re| re.captures(text))
        .and_then(|c| c.get(1))
        .map_or(text, |m| m.as_str());

    let start = inner.find('{')?;
    let end = inner.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&inner[start..=end])
}

/// Parse raw rule details into a descriptor. The error is user-facing text.
pub fn parse_descriptor(raw: &RawRuleDetails) -> std::result::Result<RuleDescriptor, String> {
    let value = match raw {
        RawRuleDetails::Structured(serde_json::Value::String(text)) | RawRuleDetails::Text(text) => {
            let json = extract_json(text)
                .ok_or_else(|| "Could not find a JSON rule definition in the extracted rule details.".to_string())?;
            serde_json::from_str::<serde_json::Value>(json)
                .map_err(|e| format!("Extracted rule details are not valid JSON: {e}"))?
        }
        RawRuleDetails::Structured(value) => value.clone(),
    };

    if !value.is_object() {
        return Err("Extracted rule details must be a JSON object.".to_string());
    }
    serde_json::from_value(value).map_err(|e| format!("Extracted rule details are malformed: {e}"))
}

/// A descriptor needs a name and at least one attribute check to be deployable.
pub fn check_completeness(descriptor: &RuleDescriptor) -> std::result::Result<(), String> {
    if descriptor.rule_name.trim().is_empty() {
        return Err("rule_name is missing from the rule details. Please name the rule.".to_string());
    }
    if descriptor.attributes.is_empty() {
        return Err(format!(
            "Rule '{}' defines no attributes. Please describe at least one check to perform.",
            descriptor.rule_name
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Business rules
// ---------------------------------------------------------------------------

/// Check every attribute against the baseline rules. Stops at the first
/// violation and returns its user-facing message.
pub fn check_business_rules(attributes: &[AttributeCheck]) -> std::result::Result<(), String> {
    for attr in attributes {
        let baseline = attr.rule_details.baseline_value;
        if baseline == RATIO_BASELINE {
            continue;
        }

        if attr.rule_type.is_table_level() && attr.baseline_source == BaselineSource::Previous {
            return Err(format!(
                "For rule_type {} with baseline_source PREVIOUS, baseline value must be {:.1} (got {}).",
                attr.rule_type, RATIO_BASELINE, baseline
            ));
        }
        if attr.rule_type == RuleType::MeanVariance {
            return Err(format!(
                "For rule_type {}, baseline value must be {:.1} (got {}).",
                attr.rule_type, RATIO_BASELINE, baseline
            ));
        }
    }
    Ok(())
}

fn lookup_message(repository: &str, err: &LookupError) -> String {
    match err {
        LookupError::NotFound { .. } => format!(
            "Repository '{repository}' was not found. Please check the repository name and try again."
        ),
        LookupError::Timeout { timeout_ms } => format!(
            "Lookup of repository '{repository}' failed due to a timeout after {timeout_ms}ms."
        ),
        LookupError::Transport(detail) => {
            format!("Lookup of repository '{repository}' failed: {detail}")
        }
        LookupError::MissingConnectivityId { .. } => {
            format!("Could not retrieve connectivity id for repository '{repository}'.")
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationGate
// ---------------------------------------------------------------------------

pub struct ValidationGate {
    lookup: Arc<dyn ReferenceLookup>,
}

impl ValidationGate {
    pub fn new(lookup: Arc<dyn ReferenceLookup>) -> Self {
        Self { lookup }
    }

    fn halt(ctx: &mut RunContext, message: impl Into<String>) -> Outcome {
        let err = StageError::validation(message);
        let text = err.to_string();
        tracing::warn!(session_id = %ctx.session_id, stage = "validation_gate", error = %text, "Validation halted");
        ctx.set_validated_rule_details(Err(err));
        Outcome::fail(text.clone()).with_output(ChunkKind::ValidationError, text)
    }
}

#[async_trait]
impl Stage for ValidationGate {
    fn name(&self) -> &str {
        "validation_gate"
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<Outcome> {
        let Some(raw) = ctx.raw_rule_details().cloned() else {
            return Ok(Self::halt(
                ctx,
                "No rule details were extracted from the request. Please describe the rule again.",
            ));
        };

        let descriptor = match parse_descriptor(&raw) {
            Ok(d) => d,
            Err(msg) => return Ok(Self::halt(ctx, msg)),
        };

        let Some(repository) = descriptor.repository().map(String::from) else {
            return Ok(Self::halt(
                ctx,
                "repository_name is missing from the rule details. Please specify the repository \
                 (repository_name) that holds the dataset.",
            ));
        };

        if let Err(msg) = check_completeness(&descriptor) {
            return Ok(Self::halt(ctx, msg));
        }

        let connectivity_id = match self.lookup.connectivity_id(&repository).await {
            Ok(id) => id,
            Err(e) => return Ok(Self::halt(ctx, lookup_message(&repository, &e))),
        };

        if let Err(msg) = check_business_rules(&descriptor.attributes) {
            return Ok(Self::halt(ctx, msg));
        }

        let validated = descriptor.into_validated(connectivity_id);
        tracing::info!(
            session_id = %ctx.session_id,
            rule_name = %validated.rule_name,
            repository = %repository,
            connectivity_id = %validated.connectivity_id,
            "Rule validated"
        );
        let note = format!(
            "Rule '{}' validated; repository '{}' resolved to connectivity id '{}'.",
            validated.rule_name, repository, validated.connectivity_id
        );
        ctx.set_validated_rule_details(Ok(validated));
        Ok(Outcome::success(note.clone()).with_output(ChunkKind::Progress, note))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onboard_types::{RuleDetails, StageStatus, VALIDATED_RULE_DETAILS};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedLookup {
        result: std::result::Result<String, LookupError>,
        calls: Arc<AtomicUsize>,
    }

    impl FixedLookup {
        fn ok(id: &str) -> Self {
            Self {
                result: Ok(id.into()),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn err(e: LookupError) -> Self {
            Self {
                result: Err(e),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl ReferenceLookup for FixedLookup {
        async fn connectivity_id(&self, _repository_name: &str) -> std::result::Result<String, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn attr(rule_type: RuleType, source: BaselineSource, baseline: f64) -> AttributeCheck {
        AttributeCheck {
            column_name: "price".into(),
            rule_type,
            baseline_source: source,
            rule_details: RuleDetails {
                baseline_value: baseline,
                threshold_value: None,
            },
        }
    }

    fn mean_attr() -> serde_json::Value {
        json!({
            "column_name": "price",
            "rule_type": "MEAN",
            "rule_details": {"baseline_value": 10.0, "threshold_value": 100.0}
        })
    }

    fn ctx_with(raw: RawRuleDetails) -> RunContext {
        let mut ctx = RunContext::new("s-1", "onboard");
        ctx.set_raw_rule_details(raw);
        ctx
    }

    fn sentinel(ctx: &RunContext) -> String {
        match ctx.validated_rule_details() {
            Some(Err(e)) => e.to_string(),
            other => panic!("expected sentinel, got {other:?}"),
        }
    }

    #[test]
    fn extracts_fenced_and_bare_json() {
        let fenced = "Here you go:\n```json\n{\"rule_name\": \"r\"}\n```\nThanks";
        assert_eq!(extract_json(fenced), Some("{\"rule_name\": \"r\"}"));

        let bare = "Sure! {\"a\": {\"b\": 1}} done";
        assert_eq!(extract_json(bare), Some("{\"a\": {\"b\": 1}}"));

        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn parse_rejects_non_object_and_garbage() {
        assert!(parse_descriptor(&RawRuleDetails::Structured(json!([1, 2]))).is_err());
        let err = parse_descriptor(&RawRuleDetails::Text("{not json}".into())).unwrap_err();
        assert!(err.contains("not valid JSON"));
    }

    #[test]
    fn parse_accepts_text_wrapped_in_structured_string() {
        let raw = RawRuleDetails::Structured(json!("```json\n{\"rule_name\": \"r\", \"repository_name\": \"AWSRepo\"}\n```"));
        let d = parse_descriptor(&raw).unwrap();
        assert_eq!(d.repository(), Some("AWSRepo"));
    }

    #[test]
    fn parse_accepts_null_baseline_source() {
        let raw = RawRuleDetails::Text(
            "{\"rule_name\": \"r\", \"repository_name\": \"AWSRepo\", \"attributes\": [\
             {\"column_name\": \"RECORD_COUNT\", \"rule_type\": \"record_count\", \
             \"baseline_source\": null, \"rule_details\": {\"baseline_value\": 500}}]}"
                .into(),
        );
        let d = parse_descriptor(&raw).unwrap();
        assert_eq!(d.attributes[0].baseline_source, BaselineSource::Config);
        assert!(check_business_rules(&d.attributes).is_ok());
    }

    #[test]
    fn business_rules_table_level_previous_requires_unit_baseline() {
        let err = check_business_rules(&[attr(RuleType::StaleCount, BaselineSource::Previous, 5.0)])
            .unwrap_err();
        assert!(err.contains("STALE_COUNT"));
        assert!(err.contains("1.0"));

        // CONFIG baselines are free
        assert!(check_business_rules(&[attr(RuleType::RecordCount, BaselineSource::Config, 500.0)]).is_ok());
        assert!(check_business_rules(&[attr(RuleType::StaleContext, BaselineSource::Previous, 1.0)]).is_ok());
    }

    #[test]
    fn business_rules_mean_variance_any_source() {
        let err = check_business_rules(&[attr(RuleType::MeanVariance, BaselineSource::Config, 2.0)])
            .unwrap_err();
        assert!(err.contains("MEAN_VARIANCE"));
        assert!(check_business_rules(&[attr(RuleType::MedianVariance, BaselineSource::Config, 2.0)]).is_ok());
    }

    #[test]
    fn business_rules_report_first_violation() {
        let err = check_business_rules(&[
            attr(RuleType::Mean, BaselineSource::Config, 10.0),
            attr(RuleType::RecordCount, BaselineSource::Previous, 3.0),
            attr(RuleType::MeanVariance, BaselineSource::Config, 4.0),
        ])
        .unwrap_err();
        assert!(err.contains("RECORD_COUNT"));
    }

    #[tokio::test]
    async fn missing_raw_details_halts() {
        let gate = ValidationGate::new(Arc::new(FixedLookup::ok("conn-42")));
        let mut ctx = RunContext::new("s-1", "onboard");

        let outcome = gate.run(&mut ctx).await.unwrap();
        assert_eq!(outcome.status, StageStatus::Fail);
        assert!(sentinel(&ctx).starts_with("VALIDATION_ERROR: No rule details"));
    }

    #[tokio::test]
    async fn missing_repository_halts_without_lookup() {
        let lookup = FixedLookup::ok("conn-42");
        let calls = lookup.calls.clone();
        let gate = ValidationGate::new(Arc::new(lookup));
        let mut ctx = ctx_with(RawRuleDetails::Structured(json!({
            "rule_name": "r",
            "repository_name": "  ",
            "attributes": []
        })));

        let outcome = gate.run(&mut ctx).await.unwrap();
        let chunk = outcome.output.unwrap();
        assert_eq!(chunk.kind, ChunkKind::ValidationError);
        assert!(chunk.text.contains("repository_name"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.writes().last(), Some(&VALIDATED_RULE_DETAILS));
    }

    #[tokio::test]
    async fn incomplete_descriptor_halts_before_lookup() {
        let lookup = FixedLookup::ok("conn-42");
        let calls = lookup.calls.clone();
        let gate = ValidationGate::new(Arc::new(lookup));

        let mut ctx = ctx_with(RawRuleDetails::Structured(json!({"repository_name": "AWSRepo"})));
        let outcome = gate.run(&mut ctx).await.unwrap();
        assert_eq!(outcome.status, StageStatus::Fail);
        assert_eq!(outcome.output.unwrap().kind, ChunkKind::ValidationError);
        assert!(sentinel(&ctx).starts_with("VALIDATION_ERROR: rule_name is missing"));

        let mut ctx = ctx_with(RawRuleDetails::Structured(json!({
            "rule_name": "r",
            "repository_name": "AWSRepo",
            "attributes": []
        })));
        gate.run(&mut ctx).await.unwrap();
        assert!(sentinel(&ctx).contains("no attributes"));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lookup_timeout_mentions_timeout() {
        let gate = ValidationGate::new(Arc::new(FixedLookup::err(LookupError::Timeout {
            timeout_ms: 10_000,
        })));
        let mut ctx = ctx_with(RawRuleDetails::Structured(json!({
            "rule_name": "r",
            "repository_name": "AWSRepo",
            "attributes": [mean_attr()]
        })));

        gate.run(&mut ctx).await.unwrap();
        assert!(sentinel(&ctx).contains("timeout"));
    }

    #[tokio::test]
    async fn lookup_transport_failure_is_wrapped() {
        let gate = ValidationGate::new(Arc::new(FixedLookup::err(LookupError::Transport(
            "connection refused".into(),
        ))));
        let mut ctx = ctx_with(RawRuleDetails::Structured(json!({
            "rule_name": "r",
            "repository_name": "AWSRepo",
            "attributes": [mean_attr()]
        })));

        gate.run(&mut ctx).await.unwrap();
        let msg = sentinel(&ctx);
        assert!(msg.contains("AWSRepo"));
        assert!(msg.contains("connection refused"));
    }

    #[tokio::test]
    async fn missing_connectivity_id_halts() {
        let gate = ValidationGate::new(Arc::new(FixedLookup::err(
            LookupError::MissingConnectivityId {
                repository: "AWSRepo".into(),
            },
        )));
        let mut ctx = ctx_with(RawRuleDetails::Structured(json!({
            "rule_name": "r",
            "repository_name": "AWSRepo",
            "attributes": [mean_attr()]
        })));

        gate.run(&mut ctx).await.unwrap();
        assert!(sentinel(&ctx).contains("Could not retrieve connectivity id"));
    }

    #[tokio::test]
    async fn success_swaps_repository_for_connectivity_id() {
        let gate = ValidationGate::new(Arc::new(FixedLookup::ok("conn-42")));
        let mut ctx = ctx_with(RawRuleDetails::Text(
            "```json\n{\"rule_name\": \"avg_price_check\", \"db_name\": \"customer\", \
             \"dataset_name\": \"sales\", \"repository_name\": \"AWSRepo\", \"attributes\": [\
             {\"column_name\": \"price\", \"rule_type\": \"MEAN\", \
             \"rule_details\": {\"baseline_value\": 10, \"threshold_value\": 100}}]}\n```"
                .into(),
        ));

        let outcome = gate.run(&mut ctx).await.unwrap();
        assert_eq!(outcome.status, StageStatus::Success);
        assert!(!outcome.output.unwrap().is_user_visible());

        let validated = ctx.validated_rule_details().unwrap().as_ref().unwrap();
        assert_eq!(validated.connectivity_id, "conn-42");
        let snapshot = ctx.snapshot();
        let value = &snapshot[VALIDATED_RULE_DETAILS];
        assert!(value.get("repository_name").is_none());
        assert_eq!(value["connectivity_id"], "conn-42");
    }
}
