//! Pipeline controller: runs the stages in fixed order over one context.
//!
//! The controller never branches on stage results. Each stage decides for
//! itself whether the context lets it do work; the controller only sequences,
//! forwards output chunks, and records outcomes.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use onboard_types::{ChunkKind, OutputChunk, Outcome, Result, RunContext};

use crate::assembler::PayloadAssembler;
use crate::deployment::{DeploymentBridge, RuleDeployer};
use crate::events::{EventEmitter, PipelineEvent};
use crate::extraction::{ExtractionStage, RuleInterpreter};
use crate::lookup::ReferenceLookup;
use crate::stage::Stage;
use crate::validation::ValidationGate;

/// Result of one completed run.
#[derive(Debug)]
pub struct PipelineResult {
    /// `(stage name, outcome)` in execution order.
    pub outcomes: Vec<(String, Outcome)>,
    pub final_context: serde_json::Map<String, serde_json::Value>,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn outcome(&self, stage: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == stage)
            .map(|(_, o)| o)
    }
}

pub struct PipelineController {
    stages: Vec<Box<dyn Stage>>,
    events: EventEmitter,
}

impl PipelineController {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages: Vec::new(),
            events: EventEmitter::default(),
        }
        .with_stages(stages)
    }

    fn with_stages(mut self, mut stages: Vec<Box<dyn Stage>>) -> Self {
        for stage in stages.iter_mut() {
            stage.attach_events(&self.events);
        }
        self.stages = stages;
        self
    }

    /// The standard four-stage onboarding pipeline.
    pub fn onboarding(
        interpreter: Arc<dyn RuleInterpreter>,
        lookup: Arc<dyn ReferenceLookup>,
        deployer: Arc<dyn RuleDeployer>,
    ) -> Self {
        Self::new(vec![
            Box::new(ExtractionStage::new(interpreter)),
            Box::new(ValidationGate::new(lookup)),
            Box::new(PayloadAssembler),
            Box::new(DeploymentBridge::new(deployer)),
        ])
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        let stages = std::mem::take(&mut self.stages);
        self.with_stages(stages)
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// Run every stage in order against `ctx`, sending each stage's chunk to
    /// `out`. A closed receiver does not stop the run.
    pub async fn run(
        &self,
        ctx: &mut RunContext,
        out: &mpsc::UnboundedSender<OutputChunk>,
    ) -> Result<PipelineResult> {
        let started = Instant::now();
        let run_id = ctx.run_id.to_string();
        tracing::info!(session_id = %ctx.session_id, run_id = %run_id, "Pipeline run started");
        self.events.emit(PipelineEvent::RunStarted {
            session_id: ctx.session_id.clone(),
            run_id: run_id.clone(),
            stage_count: self.stages.len(),
        });

        let mut outcomes = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let name = stage.name().to_string();
            let stage_start = Instant::now();
            self.events.emit(PipelineEvent::StageStarted {
                run_id: run_id.clone(),
                stage: name.clone(),
            });

            let outcome = stage.run(ctx).await?;
            let duration_ms = stage_start.elapsed().as_millis() as u64;
            tracing::info!(
                session_id = %ctx.session_id,
                stage = %name,
                status = %outcome.status,
                duration_ms,
                "Stage completed"
            );

            if let Some(chunk) = &outcome.output {
                self.emit_chunk(&run_id, &name, chunk);
                let _ = out.send(chunk.clone());
            }
            self.events.emit(PipelineEvent::StageCompleted {
                run_id: run_id.clone(),
                stage: name.clone(),
                status: outcome.status.to_string(),
                duration_ms,
            });
            outcomes.push((name, outcome));
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        self.events.emit(PipelineEvent::RunCompleted {
            session_id: ctx.session_id.clone(),
            run_id,
            stages: outcomes.iter().map(|(n, _)| n.clone()).collect(),
            duration_ms,
        });

        Ok(PipelineResult {
            outcomes,
            final_context: ctx.snapshot(),
            duration_ms,
        })
    }

    fn emit_chunk(&self, run_id: &str, stage: &str, chunk: &OutputChunk) {
        self.events.emit(PipelineEvent::StageMessage {
            run_id: run_id.to_string(),
            stage: stage.to_string(),
            visible: chunk.is_user_visible(),
            text: chunk.text.clone(),
        });
        if chunk.kind == ChunkKind::ValidationError {
            self.events.emit(PipelineEvent::ValidationFailed {
                run_id: run_id.to_string(),
                message: chunk.text.clone(),
            });
        }
    }
}
