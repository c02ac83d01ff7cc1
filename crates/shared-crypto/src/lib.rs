//! # Shared Crypto
//!
//! Ed25519 keys used to sign the canonical trade contract and to identify
//! peers. Keys and signatures travel hex encoded inside protocol messages.
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `signatures` | Ed25519 | Raw keys and signatures |
//! | `keyring` | Ed25519 | Node identity, hex encoded contract signing |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod keyring;
pub mod signatures;

// Re-exports
pub use errors::CryptoError;
pub use keyring::{verify_hex_signature, KeyRing};
pub use signatures::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
