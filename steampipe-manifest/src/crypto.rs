//! Filename decryption for manifests with encrypted file paths.
//!
//! Encrypted filenames travel base64-encoded. The first AES block of the
//! decoded ciphertext is the ECB-encrypted IV; the remainder is the
//! AES-256-CBC body with PKCS7 padding.

use aes::Aes256;
use aes::cipher::{BlockDecryptMut, KeyInit, KeyIvInit, block_padding::Pkcs7};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::{Error, Result};

/// Symmetric key bound to one depot, used to decrypt manifest filenames.
#[derive(Clone, PartialEq, Eq)]
pub struct DepotKey([u8; 32]);

impl DepotKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Self(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let raw = hex::decode(s.trim()).map_err(|e| Error::InvalidKey(e.to_string()))?;
        Self::from_slice(&raw)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for DepotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log key material
        f.write_str("DepotKey(..)")
    }
}

/// Decrypt a single base64-encoded encrypted filename.
///
/// Trailing NULs and whitespace from the fixed-width plaintext are stripped.
pub fn decrypt_filename(encrypted: &str, key: &DepotKey) -> Result<String> {
    let raw = BASE64
        .decode(encrypted.trim_end_matches(['\0', '\n', ' ']))
        .map_err(|e| Error::DecryptionFailed(format!("invalid base64: {e}")))?;
    let plain = decrypt_message(&raw, key)?;
    let name = String::from_utf8(plain)?;
    Ok(name.trim_end_matches(['\0', '\n', ' ']).to_string())
}

/// Decrypt an ECB-prefixed-IV + CBC-body message.
pub fn decrypt_message(data: &[u8], key: &DepotKey) -> Result<Vec<u8>> {
    if data.len() < 32 || data.len() % 16 != 0 {
        return Err(Error::DecryptionFailed(format!(
            "ciphertext length {} is not a whole number of blocks",
            data.len()
        )));
    }

    let mut iv = [0u8; 16];
    iv.copy_from_slice(&data[..16]);
    let mut ecb = ecb::Decryptor::<Aes256>::new_from_slice(&key.0)
        .map_err(|e| Error::InvalidKey(e.to_string()))?;
    ecb.decrypt_block_mut((&mut iv).into());

    let cbc = cbc::Decryptor::<Aes256>::new_from_slices(&key.0, &iv)
        .map_err(|e| Error::InvalidKey(e.to_string()))?;
    let mut body = data[16..].to_vec();
    let plain = cbc
        .decrypt_padded_mut::<Pkcs7>(&mut body)
        .map_err(|e| Error::DecryptionFailed(format!("bad padding: {e}")))?;
    Ok(plain.to_vec())
}

#[cfg(test)]
pub(crate) fn encrypt_filename(name: &str, key: &DepotKey, iv: [u8; 16]) -> String {
    BASE64.encode(encrypt_message(name.as_bytes(), key, iv))
}

#[cfg(test)]
pub(crate) fn encrypt_message(plain: &[u8], key: &DepotKey, iv: [u8; 16]) -> Vec<u8> {
    use aes::cipher::BlockEncryptMut;

    let mut out = Vec::with_capacity(16 + plain.len() + 16);

    let mut iv_block = iv;
    let mut ecb = ecb::Encryptor::<Aes256>::new_from_slice(&key.0).unwrap();
    ecb.encrypt_block_mut((&mut iv_block).into());
    out.extend_from_slice(&iv_block);

    let cbc = cbc::Encryptor::<Aes256>::new_from_slices(&key.0, &iv).unwrap();
    let mut buf = vec![0u8; (plain.len() / 16 + 1) * 16];
    buf[..plain.len()].copy_from_slice(plain);
    let ct_len = cbc
        .encrypt_padded_mut::<Pkcs7>(&mut buf, plain.len())
        .unwrap()
        .len();
    out.extend_from_slice(&buf[..ct_len]);
    out
}
