//! RSA-OAEP handshake keypair and redemption decryption.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};

const RSA_KEY_BITS: usize = 2048;

/// A freshly-minted handshake keypair.
///
/// The private key is kept in server memory (or the coordination
/// store) for the 5-minute handshake lifetime and never leaves it —
/// only [`HandshakeKeyPair::public_key_pem`] is handed to the caller.
pub struct HandshakeKeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl HandshakeKeyPair {
    /// Generate a new 2048-bit RSA keypair.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyGeneration`] if the system RNG or key
    /// generation fails.
    pub fn generate() -> CryptoResult<Self> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self { private_key, public_key })
    }

    /// PEM-encode the public half, sent to the caller in step 1.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyEncoding`] on encode failure.
    pub fn public_key_pem(&self) -> CryptoResult<String> {
        self.public_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))
    }

    /// PEM-encode the private half, for storage in the coordination
    /// store so any replica can mint/redeem a handshake.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyEncoding`] on encode failure.
    pub fn private_key_pem(&self) -> CryptoResult<Zeroizing<String>> {
        let pem = self
            .private_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
        Ok(Zeroizing::new(pem.to_string()))
    }

    /// Rebuild a keypair from a stored PEM private key (cross-replica
    /// redemption, or redeeming after a process restart within the
    /// 5-minute window).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyEncoding`] if the PEM is malformed.
    pub fn from_private_pem(pem: &str) -> CryptoResult<Self> {
        let private_key =
            RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self { private_key, public_key })
    }

    /// Decrypt the caller's base64 RSA-OAEP payload and parse it as
    /// `{password, nonce}`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidBase64`] if the payload isn't
    /// valid base64, [`CryptoError::DecryptionFailed`] if RSA-OAEP
    /// decryption fails, or [`CryptoError::InvalidPayload`] if the
    /// decrypted bytes aren't the expected JSON shape.
    pub fn decrypt_redemption(&self, encrypted_payload_b64: &str) -> CryptoResult<RedeemedPayload> {
        let ciphertext = BASE64
            .decode(encrypted_payload_b64)
            .map_err(|_| CryptoError::InvalidBase64)?;
        let plaintext = self
            .private_key
            .decrypt(Oaep::new::<Sha256>(), &ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        serde_json::from_slice(&plaintext).map_err(|e| CryptoError::InvalidPayload(e.to_string()))
    }
}

/// The decrypted `{password, nonce}` redemption payload.
#[derive(Debug, Deserialize)]
pub struct RedeemedPayload {
    /// The plaintext password.
    pub password: String,
    /// The nonce that must match the one issued at mint time.
    pub nonce: String,
}

impl RedeemedPayload {
    /// Verify the decrypted nonce matches the one issued at mint time.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NonceMismatch`] on mismatch.
    pub fn verify_nonce(&self, expected: &str) -> CryptoResult<()> {
        if self.nonce == expected {
            Ok(())
        } else {
            Err(CryptoError::NonceMismatch)
        }
    }
}

/// A random 32-byte hex handshake token.
#[must_use]
pub fn random_token() -> String {
    random_hex(32)
}

/// A random 16-byte hex nonce.
#[must_use]
pub fn random_nonce() -> String {
    random_hex(16)
}

fn random_hex(n_bytes: usize) -> String {
    let mut s = String::with_capacity(n_bytes * 2);
    for _ in 0..n_bytes {
        s.push_str(&format!("{:02x}", fastrand::u8(..)));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_pem_is_well_formed() {
        let kp = HandshakeKeyPair::generate().unwrap();
        let pem = kp.public_key_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN RSA PUBLIC KEY-----"));
    }

    #[test]
    fn round_trip_private_key_through_pem() {
        let kp = HandshakeKeyPair::generate().unwrap();
        let pem = kp.private_key_pem().unwrap();
        let restored = HandshakeKeyPair::from_private_pem(pem.as_str()).unwrap();
        assert_eq!(
            restored.public_key_pem().unwrap(),
            kp.public_key_pem().unwrap()
        );
    }

    #[test]
    fn decrypt_redemption_round_trips_and_checks_nonce() {
        let kp = HandshakeKeyPair::generate().unwrap();
        let nonce = random_nonce();
        let plaintext = serde_json::json!({"password": "hunter2", "nonce": nonce}).to_string();

        let mut rng = rand::thread_rng();
        let ciphertext = kp
            .public_key
            .encrypt(&mut rng, Oaep::new::<Sha256>(), plaintext.as_bytes())
            .unwrap();
        let b64 = BASE64.encode(ciphertext);

        let redeemed = kp.decrypt_redemption(&b64).unwrap();
        assert_eq!(redeemed.password, "hunter2");
        redeemed.verify_nonce(&nonce).unwrap();
        assert!(redeemed.verify_nonce("wrong").is_err());
    }

    #[test]
    fn decrypt_redemption_rejects_garbage_base64() {
        let kp = HandshakeKeyPair::generate().unwrap();
        assert!(matches!(
            kp.decrypt_redemption("not base64!!!"),
            Err(CryptoError::InvalidBase64)
        ));
    }

    #[test]
    fn token_and_nonce_are_distinct_lengths() {
        assert_eq!(random_token().len(), 64);
        assert_eq!(random_nonce().len(), 32);
    }
}
