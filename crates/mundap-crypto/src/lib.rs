/// Mundapdari Crypto Library
///
/// Field-level encryption for personal data at rest (AES-256-CBC with a
/// random IV per value, authenticated with HMAC-SHA256), the keyed phone
/// digest used for lookups, and invitation code generation.

pub mod encrypt;
pub mod keys;
pub mod phone;

use thiserror::Error;

pub use encrypt::{EncryptedField, FieldCipher};
pub use phone::{PhoneVault, SealedPhone, mask_phone, normalize_phone};

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("integrity check failed")]
    Integrity,

    #[error("decryption failed")]
    Decryption,
}
