//! Rule onboarding pipeline: extraction, validation, assembly, and deployment
//! stages run in fixed order over one typed context per run.

pub mod assembler;
pub mod controller;
pub mod deployment;
pub mod events;
pub mod extraction;
pub mod lookup;
pub mod service;
pub mod session;
pub mod stage;
pub mod validation;

pub use assembler::PayloadAssembler;
pub use controller::{PipelineController, PipelineResult};
pub use deployment::{DeploymentBridge, RuleDeployer, ToolsetDeployer};
pub use events::{EventEmitter, PipelineEvent};
pub use extraction::{ExtractionStage, LlmInterpreter, RuleInterpreter, StaticInterpreter};
pub use lookup::{LookupError, ReferenceLookup, ToolsetLookup};
pub use service::{OnboardRequest, OnboardingService};
pub use session::{InMemorySessionStore, Session, SessionStore, SqliteSessionStore};
pub use stage::Stage;
pub use validation::{check_business_rules, check_completeness, parse_descriptor, ValidationGate};
