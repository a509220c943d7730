use rand::{Rng, RngCore};

use crate::CryptoError;

/// Alphabet for invitation codes. Omits 0/O and 1/I so codes survive being
/// read aloud or copied by hand.
pub const INVITE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const INVITE_CODE_LEN: usize = 8;

/// Generate a random 256-bit key.
pub fn generate_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    key
}

/// Encode a key as lowercase hex, the format `ENCRYPTION_KEY` expects.
pub fn key_to_hex(key: &[u8; 32]) -> String {
    hex::encode(key)
}

/// Decode a 64-character hex key.
pub fn parse_hex_key(encoded: &str) -> Result<[u8; 32], CryptoError> {
    let encoded = encoded.trim();
    if encoded.len() != 64 {
        return Err(CryptoError::InvalidKey(format!(
            "expected 64 hex characters, got {}",
            encoded.len()
        )));
    }
    let bytes = hex::decode(encoded).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("invalid key length".into()))
}

pub fn generate_invite_code() -> String {
    let mut rng = rand::rng();
    (0..INVITE_CODE_LEN)
        .map(|_| INVITE_ALPHABET[rng.random_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}

/// Canonical (uppercase) form of a user-typed invitation code, or `None`
/// if it cannot be one of ours.
pub fn normalize_invite_code(input: &str) -> Option<String> {
    let code = input.trim().to_ascii_uppercase();
    if code.len() == INVITE_CODE_LEN && code.bytes().all(|b| INVITE_ALPHABET.contains(&b)) {
        Some(code)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_key_roundtrip() {
        let key = generate_key();
        assert_eq!(parse_hex_key(&key_to_hex(&key)).unwrap(), key);
    }

    #[test]
    fn short_or_non_hex_keys_are_rejected() {
        assert!(parse_hex_key("abcd").is_err());
        assert!(parse_hex_key(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn invite_codes_use_the_alphabet() {
        for _ in 0..50 {
            let code = generate_invite_code();
            assert_eq!(code.len(), INVITE_CODE_LEN);
            assert_eq!(normalize_invite_code(&code).as_deref(), Some(code.as_str()));
        }
    }

    #[test]
    fn invite_code_input_is_case_insensitive() {
        assert_eq!(normalize_invite_code(" abcd2345 ").as_deref(), Some("ABCD2345"));
        assert_eq!(normalize_invite_code("ABCD0123"), None);
        assert_eq!(normalize_invite_code("ABC"), None);
    }
}
