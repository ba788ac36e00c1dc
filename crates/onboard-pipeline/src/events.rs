//! Pipeline event system for observability.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! observers (the CLI's verbose mode, tests) can follow a run without
//! coupling to the controller.

use serde::{Deserialize, Serialize};

/// Events emitted during a pipeline run. Every event carries the `run_id`
/// of the run that produced it, so concurrent runs can share one emitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    RunStarted {
        session_id: String,
        run_id: String,
        stage_count: usize,
    },
    RunCompleted {
        session_id: String,
        run_id: String,
        stages: Vec<String>,
        duration_ms: u64,
    },
    StageStarted {
        run_id: String,
        stage: String,
    },
    StageCompleted {
        run_id: String,
        stage: String,
        status: String,
        duration_ms: u64,
    },
    StageMessage {
        run_id: String,
        stage: String,
        visible: bool,
        text: String,
    },
    ValidationFailed {
        run_id: String,
        message: String,
    },
    DeploymentFinished {
        run_id: String,
        rule_name: String,
        success: bool,
    },
}

impl PipelineEvent {
    pub fn run_id(&self) -> &str {
        match self {
            PipelineEvent::RunStarted { run_id, .. }
            | PipelineEvent::RunCompleted { run_id, .. }
            | PipelineEvent::StageStarted { run_id, .. }
            | PipelineEvent::StageCompleted { run_id, .. }
            | PipelineEvent::StageMessage { run_id, .. }
            | PipelineEvent::ValidationFailed { run_id, .. }
            | PipelineEvent::DeploymentFinished { run_id, .. } => run_id,
        }
    }
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers. Dropped if nobody listens.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(PipelineEvent::StageStarted {
            run_id: "run-1".into(),
            stage: "validation_gate".into(),
        });

        match rx.recv().await.unwrap() {
            PipelineEvent::StageStarted { run_id, stage } => {
                assert_eq!(run_id, "run-1");
                assert_eq!(stage, "validation_gate");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let emitter = EventEmitter::new(16);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.emit(PipelineEvent::ValidationFailed {
            run_id: "run-1".into(),
            message: "VALIDATION_ERROR: repository_name is missing".into(),
        });

        let json1 = serde_json::to_string(&rx1.recv().await.unwrap()).unwrap();
        let json2 = serde_json::to_string(&rx2.recv().await.unwrap()).unwrap();
        assert_eq!(json1, json2);
    }

    #[test]
    fn every_event_exposes_its_run() {
        let event = PipelineEvent::StageCompleted {
            run_id: "run-7".into(),
            stage: "payload_assembler".into(),
            status: "skipped".into(),
            duration_ms: 0,
        };
        assert_eq!(event.run_id(), "run-7");
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(PipelineEvent::DeploymentFinished {
            run_id: "run-1".into(),
            rule_name: "r".into(),
            success: false,
        });
    }
}
