//! AES-256-CTR keystream cipher (legacy 1.1 file blocks)
//!
//! CTR mode provides confidentiality only. Each block carries its own random
//! IV; the counter starts at the IV and runs big-endian over all 128 bits.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use zeroize::Zeroize;

use crate::{IV_SIZE, KEY_SIZE};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// AES-256-CTR bound to one data key. Zeroized on drop.
pub struct AesCtrCipher {
    key: [u8; KEY_SIZE],
}

impl AesCtrCipher {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self { key: *key }
    }

    /// Encrypt `buf` in place under `iv`.
    pub fn encrypt_in_place(&self, iv: &[u8; IV_SIZE], buf: &mut [u8]) {
        self.apply_keystream(iv, buf);
    }

    /// Decrypt `buf` in place under `iv`.
    pub fn decrypt_in_place(&self, iv: &[u8; IV_SIZE], buf: &mut [u8]) {
        self.apply_keystream(iv, buf);
    }

    fn apply_keystream(&self, iv: &[u8; IV_SIZE], buf: &mut [u8]) {
        let mut cipher = Aes256Ctr::new((&self.key).into(), iv.into());
        cipher.apply_keystream(buf);
    }
}

impl Drop for AesCtrCipher {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
