//! Single-use token secrets.
//!
//! A secret is 32 bytes from the OS CSPRNG, carried in links as 64 lowercase
//! hex characters. Only its digest is ever persisted; the plaintext exists
//! in memory between issuance and the outgoing email, zeroized on drop.

use portal_types::{TOKEN_HEX_LEN, TOKEN_SECRET_BYTES};
use zeroize::Zeroizing;

use crate::blake3::{self, contexts};
use crate::{CryptoError, Result};

/// Persisted form of a token.
pub type TokenDigest = [u8; 32];

/// A token secret in plaintext.
pub struct TokenSecret {
    bytes: Zeroizing<[u8; TOKEN_SECRET_BYTES]>,
}

impl TokenSecret {
    /// Generate a fresh 256-bit secret.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; TOKEN_SECRET_BYTES]);
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes[..]);
        Self { bytes }
    }

    /// Parse a submitted token. Accepts upper or lower case hex.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.len() != TOKEN_HEX_LEN {
            return Err(CryptoError::MalformedToken(format!(
                "expected {TOKEN_HEX_LEN} hex characters, got {}",
                text.len()
            )));
        }
        let mut bytes = Zeroizing::new([0u8; TOKEN_SECRET_BYTES]);
        hex::decode_to_slice(text, &mut bytes[..])
            .map_err(|e| CryptoError::MalformedToken(e.to_string()))?;
        Ok(Self { bytes })
    }

    /// Hex form embedded in the verification link.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.bytes[..]))
    }

    /// Digest stored and looked up in place of the plaintext.
    pub fn digest(&self) -> TokenDigest {
        blake3::derive_key(contexts::VERIFICATION_TOKEN, &self.bytes[..])
    }
}

impl std::fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenSecret(..)")
    }
}

/// Short hex prefix of a digest, safe for logs.
pub fn digest_prefix(digest: &TokenDigest) -> String {
    hex::encode(&digest[..4])
}
