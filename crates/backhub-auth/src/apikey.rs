//! Node API key generation, hashing, and registration codes.
//!
//! Keys carry 256 bits of entropy and are stored only as SHA-256 hex
//! digests; the plaintext is shown to the enrolling node exactly once.
//! Verification compares digests in constant time.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Length of the generated registration code.
pub const REGISTRATION_CODE_LEN: usize = 5;

/// Base-32 alphabet for registration codes. Crockford-style: no I, L, O
/// or U, so codes survive being read over the phone.
const CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// The result of generating a new node API key.
pub struct GeneratedApiKey {
    /// The plaintext key (delivered to the node exactly once, never stored).
    pub plaintext: String,
    /// The SHA-256 hex digest of the plaintext key (stored in the database).
    pub hash: String,
}

/// Generate a new random node API key.
///
/// 32 random bytes, base64url-encoded: 256 bits of entropy.
pub fn generate_api_key() -> GeneratedApiKey {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    let plaintext = URL_SAFE_NO_PAD.encode(raw);
    let hash = hash_api_key(&plaintext);
    GeneratedApiKey { plaintext, hash }
}

/// Compute the SHA-256 hex digest of an API key.
///
/// Used both at key creation (to store the hash) and at authentication
/// (to look up the presenting node).
pub fn hash_api_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex_encode(&digest)
}

/// Constant-time comparison of a presented key against a stored digest.
pub fn verify_api_key(presented: &str, stored_hash: &str) -> bool {
    let presented_hash = hash_api_key(presented);
    presented_hash
        .as_bytes()
        .ct_eq(stored_hash.as_bytes())
        .into()
}

/// Generate a 5-character base-32 registration code.
pub fn generate_registration_code() -> String {
    let mut rng = OsRng;
    (0..REGISTRATION_CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Encode bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_has_enough_entropy() {
        let key = generate_api_key();
        // 32 bytes base64url without padding is 43 characters.
        assert_eq!(key.plaintext.len(), 43);
    }

    #[test]
    fn generated_key_hash_is_sha256_hex() {
        let key = generate_api_key();
        assert_eq!(key.hash.len(), 64, "SHA-256 hex digest should be 64 chars");
        assert!(key.hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_matches_regeneration() {
        let key = generate_api_key();
        assert_eq!(key.hash, hash_api_key(&key.plaintext));
    }

    #[test]
    fn different_keys_produce_different_hashes() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(a.plaintext, b.plaintext);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn verify_accepts_correct_key() {
        let key = generate_api_key();
        assert!(verify_api_key(&key.plaintext, &key.hash));
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let key = generate_api_key();
        assert!(!verify_api_key("not-the-key", &key.hash));
    }

    #[test]
    fn registration_code_shape() {
        let code = generate_registration_code();
        assert_eq!(code.len(), REGISTRATION_CODE_LEN);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn registration_codes_vary() {
        let codes: std::collections::HashSet<String> =
            (0..64).map(|_| generate_registration_code()).collect();
        assert!(codes.len() > 1);
    }
}
