use rand::RngCore;

use crate::{IV_SIZE, KEY_SIZE};

/// Generate a random 128-bit IV for one block.
pub fn generate_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// Generate random 256-bit key material.
pub fn generate_key_bytes() -> [u8; KEY_SIZE] {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
