//! End-to-end runs of the onboarding pipeline against in-process fakes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use onboard_pipeline::{
    InMemorySessionStore, LookupError, OnboardRequest, OnboardingService, PipelineController,
    PipelineEvent, ReferenceLookup, RuleDeployer, RuleInterpreter, SessionStore, StaticInterpreter,
    ToolsetDeployer, ToolsetLookup,
};
use onboard_tools::{RemoteTool, ToolDefinition, ToolOutput, ToolRegistry};
use onboard_types::{
    ChunkKind, OnboardError, OutputChunk, RawRuleDetails, Result, RulePayload, RunContext,
    StageStatus, Turn, CONFIGURE_RULE_REQUEST_PAYLOAD, DEPLOYMENT_STATUS, RAW_RULE_DETAILS,
    VALIDATED_RULE_DETAILS,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FixedInterpreter(serde_json::Value);

#[async_trait]
impl RuleInterpreter for FixedInterpreter {
    async fn interpret(&self, _message: &str, _history: &[Turn]) -> Result<RawRuleDetails> {
        Ok(RawRuleDetails::Structured(self.0.clone()))
    }
}

/// Lookup service knowing only `AWSRepo`; `SlowRepo` never answers in time.
#[derive(Default)]
struct FakeLookup {
    calls: AtomicUsize,
}

#[async_trait]
impl ReferenceLookup for FakeLookup {
    async fn connectivity_id(&self, repository_name: &str) -> std::result::Result<String, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match repository_name {
            "AWSRepo" => Ok("conn-42".into()),
            "SlowRepo" => Err(LookupError::Timeout { timeout_ms: 10_000 }),
            other => Err(LookupError::NotFound {
                repository: other.into(),
            }),
        }
    }
}

struct FakeDeployer {
    reply: std::result::Result<String, String>,
    payloads: Mutex<Vec<RulePayload>>,
}

impl FakeDeployer {
    fn ok() -> Self {
        Self {
            reply: Ok("Rule configured".into()),
            payloads: Mutex::new(Vec::new()),
        }
    }

    fn failing(detail: &str) -> Self {
        Self {
            reply: Err(detail.into()),
            payloads: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RuleDeployer for FakeDeployer {
    async fn deploy(&self, payload: &RulePayload) -> Result<String> {
        self.payloads.lock().unwrap().push(payload.clone());
        self.reply.clone().map_err(|message| OnboardError::ToolError {
            tool: "onboard_rule".into(),
            message,
        })
    }
}

fn descriptor(repository: Option<&str>, attributes: serde_json::Value) -> serde_json::Value {
    json!({
        "rule_name": "avg_price_check",
        "db_name": "customer",
        "dataset_name": "sales",
        "repository_name": repository,
        "attributes": attributes,
        "comment": "not part of the payload"
    })
}

fn mean_attr() -> serde_json::Value {
    json!([{
        "column_name": "price",
        "rule_type": "MEAN",
        "baseline_source": "CONFIG",
        "rule_details": {"baseline_value": 10, "threshold_value": 100}
    }])
}

struct Harness {
    controller: PipelineController,
    lookup: Arc<FakeLookup>,
    deployer: Arc<FakeDeployer>,
}

fn harness(descriptor: serde_json::Value, deployer: FakeDeployer) -> Harness {
    let lookup = Arc::new(FakeLookup::default());
    let deployer = Arc::new(deployer);
    let controller = PipelineController::onboarding(
        Arc::new(FixedInterpreter(descriptor)),
        lookup.clone(),
        deployer.clone(),
    );
    Harness {
        controller,
        lookup,
        deployer,
    }
}

async fn run(h: &Harness) -> (RunContext, Vec<OutputChunk>, onboard_pipeline::PipelineResult) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut ctx = RunContext::new("session-1", "onboard a rule");
    let result = h.controller.run(&mut ctx, &tx).await.unwrap();
    drop(tx);
    let mut chunks = Vec::new();
    while let Some(c) = rx.recv().await {
        chunks.push(c);
    }
    (ctx, chunks, result)
}

fn sentinel(ctx: &RunContext) -> String {
    match ctx.validated_rule_details() {
        Some(Err(e)) => e.to_string(),
        other => panic!("expected error sentinel, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// End-to-end runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn known_repository_resolves_and_rule_deploys() {
    let h = harness(descriptor(Some("AWSRepo"), mean_attr()), FakeDeployer::ok());
    let (ctx, chunks, result) = run(&h).await;

    let validated = ctx.validated_rule_details().unwrap().as_ref().unwrap();
    assert_eq!(validated.connectivity_id, "conn-42");
    let snapshot = ctx.snapshot();
    assert!(snapshot[VALIDATED_RULE_DETAILS].get("repository_name").is_none());

    let payload = &h.deployer.payloads.lock().unwrap()[0];
    assert_eq!(payload.connectivity_id, "conn-42");
    assert_eq!(payload.attributes[0].rule_details.threshold_value, Some(100.0));

    let last = chunks.last().unwrap();
    assert_eq!(last.kind, ChunkKind::Final);
    assert_eq!(
        last.text,
        "✅ Rule 'avg_price_check' deployed successfully: Rule configured"
    );
    assert_eq!(
        ctx.writes(),
        [
            RAW_RULE_DETAILS,
            VALIDATED_RULE_DETAILS,
            CONFIGURE_RULE_REQUEST_PAYLOAD,
            DEPLOYMENT_STATUS
        ]
    );
    assert_eq!(result.outcome("deployment_bridge").unwrap().status, StageStatus::Success);
}

#[tokio::test]
async fn unknown_repository_is_not_found() {
    let h = harness(descriptor(Some("NonExistentRepo"), mean_attr()), FakeDeployer::ok());
    let (ctx, _, _) = run(&h).await;

    let msg = sentinel(&ctx);
    assert!(msg.starts_with("VALIDATION_ERROR: "));
    assert!(msg.contains("not found"));
    assert!(msg.contains("NonExistentRepo"));
    assert!(h.deployer.payloads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn stale_count_previous_needs_unit_baseline() {
    let attrs = json!([{
        "column_name": "STALE_COUNT",
        "rule_type": "STALE_COUNT",
        "baseline_source": "PREVIOUS",
        "rule_details": {"baseline_value": 5.0, "threshold_value": null}
    }]);
    let h = harness(descriptor(Some("AWSRepo"), attrs), FakeDeployer::ok());
    let (ctx, _, _) = run(&h).await;

    let msg = sentinel(&ctx);
    assert!(msg.contains("STALE_COUNT"));
    assert!(msg.contains("1.0"));
}

#[tokio::test]
async fn lookup_timeout_halts_validation() {
    let h = harness(descriptor(Some("SlowRepo"), mean_attr()), FakeDeployer::ok());
    let (ctx, _, _) = run(&h).await;
    assert!(sentinel(&ctx).contains("timeout"));
}

#[tokio::test]
async fn deployment_error_is_reported() {
    let h = harness(
        descriptor(Some("AWSRepo"), mean_attr()),
        FakeDeployer::failing("schema mismatch"),
    );
    let (ctx, chunks, _) = run(&h).await;

    let last = chunks.last().unwrap();
    assert_eq!(last.kind, ChunkKind::Failure);
    assert!(last.text.contains("schema mismatch"));
    assert!(ctx.deployment_status().is_none());
    assert!(!ctx.snapshot().contains_key(DEPLOYMENT_STATUS));
}

// ---------------------------------------------------------------------------
// Invariants over many inputs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_repository_always_mentions_repository_name() {
    for repo in [None, Some(""), Some("   ")] {
        let h = harness(descriptor(repo, mean_attr()), FakeDeployer::ok());
        let (ctx, _, _) = run(&h).await;
        assert!(sentinel(&ctx).contains("repository_name"), "repo = {repo:?}");
        assert_eq!(h.lookup.calls.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn table_level_previous_non_unit_baseline_names_rule_type() {
    for rule_type in ["RECORD_COUNT", "STALE_COUNT", "STALE_CONTEXT"] {
        for baseline in [0.0, 0.5, 2.0, 100.0] {
            let attrs = json!([
                {
                    "column_name": "price",
                    "rule_type": "MEAN",
                    "rule_details": {"baseline_value": 3.0}
                },
                {
                    "column_name": rule_type,
                    "rule_type": rule_type,
                    "baseline_source": "PREVIOUS",
                    "rule_details": {"baseline_value": baseline}
                }
            ]);
            let h = harness(descriptor(Some("AWSRepo"), attrs), FakeDeployer::ok());
            let (ctx, _, _) = run(&h).await;
            assert!(sentinel(&ctx).contains(rule_type), "{rule_type} / {baseline}");
        }
    }
}

#[tokio::test]
async fn validated_rule_has_connectivity_id_and_no_repository() {
    let attrs = json!([
        {"column_name": "RECORD_COUNT", "rule_type": "RECORD_COUNT", "baseline_source": "PREVIOUS",
         "rule_details": {"baseline_value": 1.0, "threshold_value": 5.0}},
        {"column_name": "amount", "rule_type": "MEAN_VARIANCE",
         "rule_details": {"baseline_value": 1.0}}
    ]);
    let h = harness(descriptor(Some("AWSRepo"), attrs), FakeDeployer::ok());
    let (ctx, _, _) = run(&h).await;

    let snapshot = ctx.snapshot();
    let validated = snapshot[VALIDATED_RULE_DETAILS].as_object().unwrap();
    assert!(validated.contains_key("connectivity_id"));
    assert!(!validated.contains_key("repository_name"));
}

#[tokio::test]
async fn payload_is_a_stable_five_field_projection() {
    let h = harness(descriptor(Some("AWSRepo"), mean_attr()), FakeDeployer::ok());
    let (first, _, _) = run(&h).await;
    let (second, _, _) = run(&h).await;

    let a = serde_json::to_vec(&first.snapshot()[CONFIGURE_RULE_REQUEST_PAYLOAD]).unwrap();
    let b = serde_json::to_vec(&second.snapshot()[CONFIGURE_RULE_REQUEST_PAYLOAD]).unwrap();
    assert_eq!(a, b);

    let payload = first.snapshot()[CONFIGURE_RULE_REQUEST_PAYLOAD].clone();
    let mut keys: Vec<String> = payload.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(
        keys,
        ["attributes", "connectivity_id", "dataset_name", "db_name", "rule_name"]
    );
}

#[tokio::test]
async fn validation_failure_stops_all_later_writes() {
    let attrs = json!([{
        "column_name": "amount",
        "rule_type": "MEAN_VARIANCE",
        "rule_details": {"baseline_value": 3.0}
    }]);
    let h = harness(descriptor(Some("AWSRepo"), attrs), FakeDeployer::ok());
    let mut events = h.controller.events().subscribe();
    let (ctx, chunks, result) = run(&h).await;

    assert_eq!(ctx.writes(), [RAW_RULE_DETAILS, VALIDATED_RULE_DETAILS]);
    assert!(h.deployer.payloads.lock().unwrap().is_empty());
    assert_eq!(
        result.outcome("payload_assembler").unwrap().status,
        StageStatus::Skipped
    );
    assert!(chunks.iter().any(|c| c.kind == ChunkKind::ValidationError));

    let mut saw_validation_failed = false;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::ValidationFailed { message, .. } = event {
            assert!(message.contains("MEAN_VARIANCE"));
            saw_validation_failed = true;
        }
    }
    assert!(saw_validation_failed);
}

// ---------------------------------------------------------------------------
// Streaming entry point with tool-backed bridges
// ---------------------------------------------------------------------------

struct ToolFake {
    name: &'static str,
    handler: fn(&serde_json::Value) -> ToolOutput,
}

#[async_trait]
impl RemoteTool for ToolFake {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.into(),
            description: String::new(),
            input_schema: json!({"type": "object"}),
        }
    }

    async fn call(&self, arguments: serde_json::Value) -> Result<ToolOutput> {
        Ok((self.handler)(&arguments))
    }
}

fn tool_server() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(ToolFake {
        name: "get_connectivity_id_by_repository_name",
        handler: |args| match args["repository_name"].as_str() {
            Some("AWSRepo") => ToolOutput::structured(json!({"connectivity_id": "conn-42"})),
            _ => ToolOutput::error(r#"{"detail": "Not Found"}"#),
        },
    });
    registry.register(ToolFake {
        name: "onboard_rule",
        handler: |args| {
            let name = args["request"]["rule_name"].as_str().unwrap_or_default();
            ToolOutput::structured(json!({"message": format!("Rule {name} configured")}))
        },
    });
    Arc::new(registry)
}

fn tool_service(interpreter: Arc<dyn RuleInterpreter>, store: Arc<InMemorySessionStore>) -> OnboardingService {
    let tools = tool_server();
    let controller = PipelineController::onboarding(
        interpreter,
        Arc::new(ToolsetLookup::new(
            tools.clone(),
            "get_connectivity_id_by_repository_name",
            Duration::from_secs(1),
        )),
        Arc::new(ToolsetDeployer::new(tools, "onboard_rule", Duration::from_secs(1))),
    );
    OnboardingService::new(Arc::new(controller), store)
}

#[tokio::test]
async fn stream_static_rule_through_tool_bridges() {
    let store = Arc::new(InMemorySessionStore::new());
    let svc = tool_service(Arc::new(StaticInterpreter), store.clone());

    let chunks: Vec<String> = svc
        .stream(OnboardRequest {
            message: "onboard the stale count rule".into(),
            session_id: "s-42".into(),
        })
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(
        chunks,
        vec![
            "✅ Rule 'CUSTOMER_SALES_STALE_COUNT_RULE' deployed successfully: \
             Rule CUSTOMER_SALES_STALE_COUNT_RULE configured"
                .to_string()
        ]
    );
}

#[tokio::test]
async fn stream_ends_on_validation_error() {
    let store = Arc::new(InMemorySessionStore::new());
    let svc = tool_service(
        Arc::new(FixedInterpreter(descriptor(Some("NonExistentRepo"), mean_attr()))),
        store.clone(),
    );

    let chunks: Vec<String> = svc
        .stream(OnboardRequest {
            message: "onboard".into(),
            session_id: "s-43".into(),
        })
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].starts_with("❌ Repository 'NonExistentRepo' was not found"));

    // The session is saved once the background run finishes.
    for _ in 0..50 {
        if let Some(s) = store
            .get("dq_rule_onboarding_app", "2323ad05035", "s-43")
            .await
            .unwrap()
        {
            if !s.state.is_empty() {
                assert!(s.state[VALIDATED_RULE_DETAILS]
                    .as_str()
                    .unwrap()
                    .starts_with("VALIDATION_ERROR: "));
                assert!(!s.state.contains_key(CONFIGURE_RULE_REQUEST_PAYLOAD));
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session state was never saved");
}

#[tokio::test]
async fn incomplete_descriptor_is_a_validation_error() {
    let h = harness(json!({"repository_name": "AWSRepo"}), FakeDeployer::ok());
    let (ctx, chunks, result) = run(&h).await;

    assert!(sentinel(&ctx).starts_with("VALIDATION_ERROR: rule_name is missing"));
    assert_eq!(h.lookup.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        result.outcome("payload_assembler").unwrap().status,
        StageStatus::Skipped
    );
    assert!(ctx.configure_rule_request_payload().is_none());
    assert!(h.deployer.payloads.lock().unwrap().is_empty());
    assert_eq!(chunks[1].kind, ChunkKind::ValidationError);
}

#[tokio::test]
async fn stream_ends_on_incomplete_descriptor() {
    let svc = tool_service(
        Arc::new(FixedInterpreter(descriptor(Some("AWSRepo"), json!([])))),
        Arc::new(InMemorySessionStore::new()),
    );

    let chunks: Vec<String> = svc
        .stream(OnboardRequest {
            message: "onboard".into(),
            session_id: "s-44".into(),
        })
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(
        chunks,
        vec![
            "❌ Rule 'avg_price_check' defines no attributes. \
             Please describe at least one check to perform."
                .to_string()
        ]
    );
}
