//! # portal-crypto
//!
//! Cryptographic primitives for verification links.
//!
//! ## Modules
//!
//! - [`blake3`] - Domain-separated BLAKE3 hashing and the registered context strings
//! - [`token`] - Generation, parsing and digesting of single-use token secrets

pub mod blake3;
pub mod token;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Submitted token text is not a well-formed secret.
    #[error("malformed token: {0}")]
    MalformedToken(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
