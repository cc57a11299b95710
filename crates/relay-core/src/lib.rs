//! Relay Core — shared types for the relay gateway.
//!
//! This crate provides the identifiers, message envelope, and error
//! taxonomy shared by every other relay crate:
//! - World/credential/replica identifiers and correlation IDs
//! - The tagged [`RelayMessage`] envelope and its [`ReplyKind`] table
//! - [`RelayError`], the single error type every HTTP handler maps to
//!   a status code
//! - UTC calendar-day helpers used by the daily quota rollover

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod error;
pub mod ids;
pub mod message;
pub mod time;

pub use error::{RelayError, RelayResult};
pub use ids::{Credential, CorrelationId, ReplicaId, WorldId};
pub use message::{RelayMessage, ReplyKind};
pub use time::today_utc;
