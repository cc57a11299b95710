//! Relay Gateway — the multi-tenant relay bridging HTTP callers to
//! persistently-connected world sockets.
//!
//! This crate provides a daemon built from the components spec.md §4
//! names:
//! - Component A: the coordination store (via `relay-store`)
//! - Component B: cryptographic handshake (via `relay-crypto`)
//! - Component C: [`registry::ClientRegistry`], the live socket table
//! - Component D: [`pending::PendingRegistry`], correlation-id waiters
//! - Component E: [`auth::AuthService`], credential resolution/quota
//! - Component F: [`router::RequestRouter`], local dispatch and
//!   cross-replica forwarding
//! - Component G: [`session`], the headless-login handshake and
//!   browser-driven session controller
//! - Component H: [`http`], the axum surface binding all of the above
//! - Component I: [`jobs`], scheduled maintenance
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_gateway::http::state::AppState;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = relay_config::RelaySettings::resolve(None)?;
//!     // ... wire up AppState, then relay_gateway::http::build_router(state)
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod auth;
pub mod connection;
pub mod http;
pub mod jobs;
pub mod pending;
pub mod registry;
pub mod router;
pub mod sanitize;
pub mod script_filter;
pub mod session;

pub use auth::{AuthService, MemoryUserStore, PostgresUserStore, UserRecord, UserStore};
pub use http::build_router;
pub use http::state::AppState;
pub use pending::PendingRegistry;
pub use registry::ClientRegistry;
pub use router::RequestRouter;
pub use session::{HandshakeStore, SessionController};
