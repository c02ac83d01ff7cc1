//! # Key Ring
//!
//! The node's signing identity. Protocol code only ever sees hex strings.

use crate::signatures::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
use crate::CryptoError;

/// Signing identity of a node.
pub struct KeyRing {
    signing: Ed25519KeyPair,
}

impl KeyRing {
    /// Generate a random identity.
    pub fn generate() -> Self {
        Self {
            signing: Ed25519KeyPair::generate(),
        }
    }

    /// Restore an identity from its seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing: Ed25519KeyPair::from_seed(seed),
        }
    }

    /// Hex encoded public signing key.
    pub fn pub_key_hex(&self) -> String {
        self.signing.public_key().to_hex()
    }

    /// Sign `message`, hex encoded.
    pub fn sign_hex(&self, message: &[u8]) -> String {
        self.signing.sign(message).to_hex()
    }
}

/// Verify a hex encoded signature against a hex encoded public key.
pub fn verify_hex_signature(
    pub_key_hex: &str,
    message: &[u8],
    signature_hex: &str,
) -> Result<(), CryptoError> {
    let public_key = Ed25519PublicKey::from_hex(pub_key_hex)?;
    let signature = Ed25519Signature::from_hex(signature_hex)?;
    public_key.verify(message, &signature)
}
