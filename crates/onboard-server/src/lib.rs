//! Front end for the rule onboarding pipeline: configuration, wiring,
//! logging setup, and the HTTP surface.

pub mod config;
pub mod http;
pub mod logging;

pub use config::{build_service, InterpreterMode, OnboardConfig};
pub use http::router;
