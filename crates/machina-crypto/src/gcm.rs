//! AES-256-GCM with a 128-bit IV
//!
//! Layout produced by `seal_in_place` (IV stored separately by the caller):
//! ```text
//! [N bytes: ciphertext][16 bytes: tag]
//! ```
//! The additional data is fixed per cipher instance and replaced on `rekey`.

use aes::Aes256;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{AesGcm, Nonce};

use crate::error::CryptoError;
use crate::{IV_SIZE, KEY_SIZE, TAG_SIZE};

type Aes256Gcm128 = AesGcm<Aes256, U16>;

/// AES-256-GCM bound to one data key and one additional-data value.
pub struct AesGcmCipher {
    cipher: Aes256Gcm128,
    aad: Vec<u8>,
}

impl AesGcmCipher {
    pub fn new(key: &[u8; KEY_SIZE], aad: &[u8]) -> Self {
        Self {
            cipher: Aes256Gcm128::new(key.into()),
            aad: aad.to_vec(),
        }
    }

    /// Switch to a new key and additional data (key rotation).
    pub fn rekey(&mut self, key: &[u8; KEY_SIZE], aad: &[u8]) {
        self.cipher = Aes256Gcm128::new(key.into());
        self.aad.clear();
        self.aad.extend_from_slice(aad);
    }

    pub fn aad(&self) -> &[u8] {
        &self.aad
    }

    /// Encrypt `buf` in place and append the tag.
    pub fn seal_in_place(&self, iv: &[u8; IV_SIZE], buf: &mut Vec<u8>) -> Result<(), CryptoError> {
        self.cipher
            .encrypt_in_place(Nonce::<U16>::from_slice(iv), &self.aad, buf)
            .map_err(|_| CryptoError::EncryptionFailure)
    }

    /// Verify and strip the trailing tag, decrypting `buf` in place.
    pub fn open_in_place(&self, iv: &[u8; IV_SIZE], buf: &mut Vec<u8>) -> Result<(), CryptoError> {
        if buf.len() < TAG_SIZE {
            return Err(CryptoError::CiphertextTooShort {
                minimum: TAG_SIZE,
                actual: buf.len(),
            });
        }
        self.cipher
            .decrypt_in_place(Nonce::<U16>::from_slice(iv), &self.aad, buf)
            .map_err(|_| CryptoError::AuthenticationFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{generate_iv, generate_key_bytes};

    #[test]
    fn test_seal_open_roundtrip() {
        let key = generate_key_bytes();
        let cipher = AesGcmCipher::new(&key, b"KEY-1");
        let iv = generate_iv();

        let mut buf = b"hello, protected block".to_vec();
        cipher.seal_in_place(&iv, &mut buf).unwrap();
        assert_eq!(buf.len(), 22 + TAG_SIZE);

        cipher.open_in_place(&iv, &mut buf).unwrap();
        assert_eq!(buf, b"hello, protected block");
    }

    #[test]
    fn test_seal_empty() {
        let cipher = AesGcmCipher::new(&[3u8; KEY_SIZE], b"");
        let iv = generate_iv();
        let mut buf = Vec::new();
        cipher.seal_in_place(&iv, &mut buf).unwrap();
        assert_eq!(buf.len(), TAG_SIZE);
        cipher.open_in_place(&iv, &mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = generate_key_bytes();
        let iv = generate_iv();
        let mut buf = b"secret".to_vec();
        AesGcmCipher::new(&key, b"KEY-1")
            .seal_in_place(&iv, &mut buf)
            .unwrap();

        let result = AesGcmCipher::new(&key, b"KEY-2").open_in_place(&iv, &mut buf);
        assert_eq!(result, Err(CryptoError::AuthenticationFailure));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let cipher = AesGcmCipher::new(&[5u8; KEY_SIZE], b"id");
        let iv = generate_iv();
        let mut buf = b"secret data".to_vec();
        cipher.seal_in_place(&iv, &mut buf).unwrap();
        buf[0] ^= 0xFF;
        assert_eq!(
            cipher.open_in_place(&iv, &mut buf),
            Err(CryptoError::AuthenticationFailure)
        );
    }

    #[test]
    fn test_rekey_switches_key_and_aad() {
        let iv = generate_iv();
        let mut cipher = AesGcmCipher::new(&[1u8; KEY_SIZE], b"A");
        cipher.rekey(&[2u8; KEY_SIZE], b"B");
        assert_eq!(cipher.aad(), b"B");

        let mut buf = b"rotated".to_vec();
        cipher.seal_in_place(&iv, &mut buf).unwrap();
        AesGcmCipher::new(&[2u8; KEY_SIZE], b"B")
            .open_in_place(&iv, &mut buf)
            .unwrap();
        assert_eq!(buf, b"rotated");
    }

    #[test]
    fn test_short_input_rejected() {
        let cipher = AesGcmCipher::new(&[1u8; KEY_SIZE], b"");
        let mut buf = vec![0u8; TAG_SIZE - 1];
        assert!(matches!(
            cipher.open_in_place(&generate_iv(), &mut buf),
            Err(CryptoError::CiphertextTooShort { .. })
        ));
    }
}
