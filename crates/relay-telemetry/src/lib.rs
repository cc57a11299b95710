//! Relay Telemetry — logging and request-context tracing for the
//! relay gateway.
//!
//! This crate provides:
//! - Configurable `tracing-subscriber` setup (pretty or JSON)
//! - [`RequestContext`], the `{component, worldId, credentialPrefix,
//!   correlationId, kind}` span every handler enters (spec.md §7)
//!
//! # Example
//!
//! ```rust,no_run
//! use relay_telemetry::{LogConfig, LogFormat, setup_logging, RequestContext};
//!
//! # fn main() -> Result<(), relay_telemetry::TelemetryError> {
//! let config = LogConfig::new("info").with_format(LogFormat::Json);
//! setup_logging(&config)?;
//!
//! let ctx = RequestContext::new("router").with_world_id("w1");
//! let _guard = ctx.enter();
//! tracing::info!("routing request");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::{RequestContext, RequestGuard};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
