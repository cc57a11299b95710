//! Cryptographic error types for the handshake.

use thiserror::Error;

/// Errors produced by the handshake's cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// RSA key generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// PEM encoding/decoding of a key failed.
    #[error("key encoding failed: {0}")]
    KeyEncoding(String),

    /// Base64 decoding of the encrypted payload failed.
    #[error("invalid base64 payload")]
    InvalidBase64,

    /// RSA-OAEP decryption failed (wrong key, corrupt ciphertext).
    #[error("decryption failed")]
    DecryptionFailed,

    /// The decrypted bytes were not valid JSON for the expected shape.
    #[error("payload is not valid JSON: {0}")]
    InvalidPayload(String),

    /// The nonce in the decrypted payload didn't match the one issued.
    #[error("nonce mismatch")]
    NonceMismatch,
}

/// Result type for handshake cryptography.
pub type CryptoResult<T> = Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_stable() {
        assert_eq!(CryptoError::InvalidBase64.to_string(), "invalid base64 payload");
        assert_eq!(CryptoError::DecryptionFailed.to_string(), "decryption failed");
        assert_eq!(CryptoError::NonceMismatch.to_string(), "nonce mismatch");
    }
}
