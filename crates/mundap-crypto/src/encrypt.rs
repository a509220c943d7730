use aes::Aes256;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const IV_LEN: usize = 16;
const TAG_LEN: usize = 32;
const BLOCK_LEN: usize = 16;

/// A value as it is stored: `ciphertext` is base64 of the CBC output
/// followed by its HMAC tag, `iv` is hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedField {
    pub ciphertext: String,
    pub iv: String,
}

/// AES-256-CBC with a fresh IV per call. The master key encrypts directly;
/// the MAC key is derived from it so one `ENCRYPTION_KEY` drives both.
#[derive(Clone)]
pub struct FieldCipher {
    enc_key: [u8; 32],
    mac_key: [u8; 32],
}

impl FieldCipher {
    pub fn new(master_key: [u8; 32]) -> Self {
        Self {
            mac_key: derive_subkey(&master_key, b"mundapdari/field-mac"),
            enc_key: master_key,
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> EncryptedField {
        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);

        let mut sealed =
            Aes256CbcEnc::new(&self.enc_key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        let tag = self.tag(&iv, &sealed);
        sealed.extend_from_slice(&tag);

        EncryptedField {
            ciphertext: BASE64.encode(&sealed),
            iv: hex::encode(iv),
        }
    }

    pub fn decrypt(&self, field: &EncryptedField) -> Result<Vec<u8>, CryptoError> {
        let iv: [u8; IV_LEN] = hex::decode(&field.iv)
            .map_err(|e| CryptoError::Malformed(format!("iv: {}", e)))?
            .try_into()
            .map_err(|_| CryptoError::Malformed("iv must be 16 bytes".into()))?;

        let sealed = BASE64
            .decode(&field.ciphertext)
            .map_err(|e| CryptoError::Malformed(format!("ciphertext: {}", e)))?;
        if sealed.len() < BLOCK_LEN + TAG_LEN || (sealed.len() - TAG_LEN) % BLOCK_LEN != 0 {
            return Err(CryptoError::Malformed("ciphertext has invalid length".into()));
        }
        let (body, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let mut mac = self.mac();
        mac.update(&iv);
        mac.update(body);
        mac.verify_slice(tag).map_err(|_| CryptoError::Integrity)?;

        Aes256CbcDec::new(&self.enc_key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(body)
            .map_err(|_| CryptoError::Decryption)
    }

    pub fn encrypt_str(&self, plaintext: &str) -> EncryptedField {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_str(&self, field: &EncryptedField) -> Result<String, CryptoError> {
        String::from_utf8(self.decrypt(field)?).map_err(|_| CryptoError::Decryption)
    }

    fn mac(&self) -> HmacSha256 {
        <HmacSha256 as Mac>::new_from_slice(&self.mac_key).expect("HMAC accepts keys of any length")
    }

    fn tag(&self, iv: &[u8], body: &[u8]) -> [u8; TAG_LEN] {
        let mut mac = self.mac();
        mac.update(iv);
        mac.update(body);
        mac.finalize().into_bytes().into()
    }
}

/// HKDF-SHA256 expansion of the master key under a purpose label.
pub(crate) fn derive_subkey(master_key: &[u8; 32], info: &[u8]) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(None, master_key);
    let mut okm = [0u8; 32];
    hkdf.expand(info, &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    okm
}
