use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::CryptoError;
use crate::encrypt::{EncryptedField, FieldCipher, derive_subkey};

const COUNTRY_PREFIX: &str = "+82";
const MOBILE_PREFIXES: &[&str] = &["10", "11", "16", "17", "18", "19"];

/// Canonical form of a Korean mobile number: `+82` followed by the national
/// number without its trunk `0`, e.g. `010-1234-5678` -> `+821012345678`.
pub fn normalize_phone(input: &str) -> Result<String, CryptoError> {
    let trimmed = input.trim();
    if trimmed
        .chars()
        .any(|c| !(c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')' | '.')))
    {
        return Err(CryptoError::InvalidPhone("unexpected character".into()));
    }

    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    let national = if trimmed.starts_with('+') {
        digits
            .strip_prefix("82")
            .ok_or_else(|| CryptoError::InvalidPhone("only +82 numbers are supported".into()))?
    } else if let Some(rest) = digits.strip_prefix('0') {
        rest
    } else if let Some(rest) = digits.strip_prefix("82") {
        rest
    } else {
        return Err(CryptoError::InvalidPhone("missing trunk or country prefix".into()));
    };
    // "+82 010-..." keeps the trunk zero after the country code
    let national = national.strip_prefix('0').unwrap_or(national);

    if !(9..=10).contains(&national.len()) {
        return Err(CryptoError::InvalidPhone(format!(
            "expected 9 or 10 national digits, got {}",
            national.len()
        )));
    }
    if !MOBILE_PREFIXES.iter().any(|p| national.starts_with(p)) {
        return Err(CryptoError::InvalidPhone("not a mobile number".into()));
    }

    Ok(format!("{}{}", COUNTRY_PREFIX, national))
}

/// Display form with the middle digits hidden: `+821012345678` -> `010-****-5678`.
pub fn mask_phone(canonical: &str) -> String {
    let Some(national) = canonical.strip_prefix(COUNTRY_PREFIX) else {
        return "***".to_string();
    };
    let domestic = format!("0{}", national);
    if domestic.len() < 10 || !domestic.is_ascii() {
        return "***".to_string();
    }
    let hidden = domestic.len() - 7;
    format!(
        "{}-{}-{}",
        &domestic[..3],
        "*".repeat(hidden),
        &domestic[domestic.len() - 4..]
    )
}

#[derive(Debug, Clone)]
pub struct SealedPhone {
    pub field: EncryptedField,
    /// Keyed digest of the canonical number, stored in an indexed column.
    pub lookup: String,
}

/// Encrypts phone numbers for storage and derives the deterministic digest
/// used to find a user by phone without decrypting every row.
#[derive(Clone)]
pub struct PhoneVault {
    cipher: FieldCipher,
    lookup_key: [u8; 32],
}

impl PhoneVault {
    pub fn new(master_key: [u8; 32]) -> Self {
        Self {
            cipher: FieldCipher::new(master_key),
            lookup_key: derive_subkey(&master_key, b"mundapdari/phone-lookup"),
        }
    }

    /// Normalizes, encrypts and digests a user-supplied number.
    pub fn seal(&self, raw: &str) -> Result<SealedPhone, CryptoError> {
        let canonical = normalize_phone(raw)?;
        Ok(SealedPhone {
            field: self.cipher.encrypt_str(&canonical),
            lookup: self.digest(&canonical),
        })
    }

    pub fn lookup_digest(&self, raw: &str) -> Result<String, CryptoError> {
        Ok(self.digest(&normalize_phone(raw)?))
    }

    /// Returns the canonical number.
    pub fn open(&self, field: &EncryptedField) -> Result<String, CryptoError> {
        self.cipher.decrypt_str(field)
    }

    fn digest(&self, canonical: &str) -> String {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&self.lookup_key)
            .expect("HMAC accepts keys of any length");
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}
