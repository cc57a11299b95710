//! Relay Config — environment and config-file resolution.
//!
//! Resolution order, highest precedence last: built-in defaults, an
//! optional TOML file, then environment variables (spec.md §6
//! "Environment inputs"). This mirrors the teacher's layered
//! defaults → file → env config pipeline.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]

mod deadlines;
mod error;
mod quota;
mod settings;

pub use deadlines::OperationDeadlines;
pub use error::{ConfigError, ConfigResult};
pub use quota::{QuotaLimits, QuotaTable, Tier};
pub use settings::{RelaySettings, UserStoreKind};
