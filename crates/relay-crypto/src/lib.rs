//! Relay Crypto — handshake cryptography for the headless session
//! controller (spec.md §4.G).
//!
//! The handshake lets a caller ship a password to the relay without
//! revealing it in transit: the relay mints a 2048-bit RSA keypair and
//! hands the caller the public half; the caller encrypts
//! `{password, nonce}` with RSA-OAEP and the relay decrypts it with
//! the private half it kept in memory.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]

mod error;
mod handshake;

pub use error::{CryptoError, CryptoResult};
pub use handshake::{HandshakeKeyPair, RedeemedPayload, random_nonce, random_token};
