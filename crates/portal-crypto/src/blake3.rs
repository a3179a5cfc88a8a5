//! Domain-separated BLAKE3 hashing.
//!
//! Only the key derivation mode is used: [`derive_key`] produces token
//! digests and message ids.
//!
//! ## Context Strings
//!
//! Every derivation uses one of the registered context strings below.
//! Digests computed under different contexts never collide, so a token
//! minted for one table cannot be replayed against another.

/// Registered BLAKE3 context strings.
pub mod contexts {
    pub const VERIFICATION_TOKEN: &str = "Portal v1 verification-token";
    pub const MESSAGE_ID: &str = "Portal v1 message-id";

    /// All registered context strings. Used for validation.
    pub const ALL_CONTEXTS: &[&str] = &[VERIFICATION_TOKEN, MESSAGE_ID];
}

/// Derive a key using BLAKE3's built-in key derivation mode.
///
/// # Arguments
///
/// * `context` - A registered context string (must start with "Portal v1 ")
/// * `key_material` - The input key material
pub fn derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    debug_assert!(is_registered_context(context), "unregistered context {context}");
    let mut out = [0u8; 32];
    let mut hasher = ::blake3::Hasher::new_derive_key(context);
    hasher.update(key_material);
    let hash = hasher.finalize();
    out.copy_from_slice(hash.as_bytes());
    out
}

/// Verify that a context string is registered.
pub fn is_registered_context(context: &str) -> bool {
    contexts::ALL_CONTEXTS.contains(&context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_prefix() {
        for ctx in contexts::ALL_CONTEXTS {
            assert!(
                ctx.starts_with("Portal v1 "),
                "Context string '{ctx}' has wrong prefix"
            );
        }
    }

    #[test]
    fn test_derive_key_deterministic() {
        let key1 = derive_key(contexts::VERIFICATION_TOKEN, &[0u8; 32]);
        let key2 = derive_key(contexts::VERIFICATION_TOKEN, &[0u8; 32]);
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_derive_key_different_contexts() {
        let key1 = derive_key(contexts::VERIFICATION_TOKEN, &[0u8; 32]);
        let key2 = derive_key(contexts::MESSAGE_ID, &[0u8; 32]);
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_derive_key_differs_from_plain_hash() {
        assert_ne!(
            derive_key(contexts::VERIFICATION_TOKEN, b"x"),
            *::blake3::hash(b"x").as_bytes()
        );
    }

    #[test]
    fn test_is_registered_context() {
        assert!(is_registered_context("Portal v1 verification-token"));
        assert!(!is_registered_context("Portal v1 made-up-context"));
    }
}
