//! Stage trait implemented by every step of the onboarding pipeline.

use async_trait::async_trait;

use onboard_types::{Outcome, Result, RunContext};

use crate::events::EventEmitter;

#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable stage name used in logs and events.
    fn name(&self) -> &str;

    /// Read the predecessor's slot from `ctx`, write this stage's slot.
    ///
    /// `Err` is reserved for faults outside the rule itself; rule failures are
    /// written to the context as error sentinels and reported via the outcome.
    async fn run(&self, ctx: &mut RunContext) -> Result<Outcome>;

    /// Called by the controller with its emitter. Stages that publish their
    /// own events keep a clone.
    fn attach_events(&mut self, _events: &EventEmitter) {}
}
