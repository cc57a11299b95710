//! Commonly used types for convenient import.
//!
//! `use relay_telemetry::prelude::*;` pulls in everything a handler
//! or component module typically needs.

pub use crate::{LogConfig, LogFormat, LogTarget, RequestContext, RequestGuard, TelemetryError, TelemetryResult};
pub use crate::{setup_default_logging, setup_logging};
