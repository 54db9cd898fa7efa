//! Generic 1.2: fixed-size AES-256-GCM frames.
//!
//! ```text
//! [iv: 16][ciphertext][tag: 16]
//! ```
//! Every frame but the last is exactly `max_cipher_block_size` bytes. The
//! GCM additional data is the key id, fixed for the whole session.

use std::io::{Read, Write};

use machina_crypto::{generate_iv, AesGcmCipher, IV_SIZE, TAG_SIZE};

use super::{read_full, Block};
use crate::error::{FileCipherError, Result};

/// Plaintext bytes carried by a full frame.
pub fn plain_size(max_cipher_block_size: usize) -> usize {
    max_cipher_block_size - IV_SIZE - TAG_SIZE
}

pub struct Encoder {
    cipher: AesGcmCipher,
    plain_size: usize,
    frames: u64,
    body: Vec<u8>,
}

impl Encoder {
    pub fn new(key: &[u8; 32], key_id: &str, max_cipher_block_size: usize) -> Self {
        Encoder {
            cipher: AesGcmCipher::new(key, key_id.as_bytes()),
            plain_size: plain_size(max_cipher_block_size),
            frames: 0,
            body: Vec::with_capacity(max_cipher_block_size),
        }
    }

    pub fn plain_block_size(&self) -> usize {
        self.plain_size
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn write_frame<W: Write + ?Sized>(&mut self, plain: &[u8], sink: &mut W) -> Result<()> {
        let iv = generate_iv();
        self.body.clear();
        self.body.extend_from_slice(plain);
        self.cipher.seal_in_place(&iv, &mut self.body)?;

        sink.write_all(&iv)?;
        sink.write_all(&self.body)?;
        tracing::trace!(
            frame = self.frames,
            bytes = IV_SIZE + self.body.len(),
            "wrote 1.2 frame"
        );
        self.frames += 1;
        Ok(())
    }
}

pub struct Decoder {
    cipher: Option<AesGcmCipher>,
    frames: u64,
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new(key: Option<&[u8; 32]>, key_id: &str, max_cipher_block_size: usize) -> Self {
        Decoder {
            cipher: key.map(|k| AesGcmCipher::new(k, key_id.as_bytes())),
            frames: 0,
            buf: vec![0u8; max_cipher_block_size],
        }
    }

    pub fn frame_size(&self) -> usize {
        self.buf.len()
    }

    pub fn frames_read(&self) -> u64 {
        self.frames
    }

    pub fn read_block<R: Read + ?Sized>(&mut self, source: &mut R) -> Result<Option<Block>> {
        let n = read_full(source, &mut self.buf)?;
        if n == 0 {
            return Ok(None);
        }
        let index = self.frames;
        if n < IV_SIZE + TAG_SIZE {
            return Err(FileCipherError::MalformedFrame {
                frame: index,
                reason: format!("{n} byte frame is shorter than IV and tag"),
            });
        }

        self.frames += 1;
        let Some(cipher) = &self.cipher else {
            return Ok(Some(Block::Unavailable {
                frame: index,
                cipher_len: n,
            }));
        };

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&self.buf[..IV_SIZE]);
        let mut body = self.buf[IV_SIZE..n].to_vec();
        cipher.open_in_place(&iv, &mut body)?;
        tracing::trace!(frame = index, bytes = body.len(), "read 1.2 frame");
        Ok(Some(Block::Plaintext(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use machina_crypto::CryptoError;
    use std::io::Cursor;

    const KEY: [u8; 32] = [0x22; 32];

    #[test]
    fn test_single_block_overhead() {
        let mut enc = Encoder::new(&KEY, "K1", 1024);
        let mut out = Vec::new();
        enc.write_frame(&[b'A'; 40], &mut out).unwrap();
        assert_eq!(out.len(), 16 + 40 + 16);
    }

    #[test]
    fn test_full_frame_is_max_size() {
        let mut enc = Encoder::new(&KEY, "K1", 100);
        assert_eq!(enc.plain_block_size(), 68);
        let mut out = Vec::new();
        enc.write_frame(&[0u8; 68], &mut out).unwrap();
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn test_roundtrip() {
        let mut enc = Encoder::new(&KEY, "K1", 100);
        let mut out = Vec::new();
        enc.write_frame(&[5u8; 68], &mut out).unwrap();
        enc.write_frame(b"end", &mut out).unwrap();

        let mut dec = Decoder::new(Some(&KEY), "K1", 100);
        let mut src = Cursor::new(out);
        assert_eq!(
            dec.read_block(&mut src).unwrap(),
            Some(Block::Plaintext(vec![5u8; 68]))
        );
        assert_eq!(
            dec.read_block(&mut src).unwrap(),
            Some(Block::Plaintext(b"end".to_vec()))
        );
        assert_eq!(dec.read_block(&mut src).unwrap(), None);
        assert_eq!(dec.frames_read(), 2);
    }

    #[test]
    fn test_key_id_is_authenticated() {
        let mut enc = Encoder::new(&KEY, "K1", 100);
        let mut out = Vec::new();
        enc.write_frame(b"bound to K1", &mut out).unwrap();

        let mut dec = Decoder::new(Some(&KEY), "K2", 100);
        let err = dec.read_block(&mut Cursor::new(out)).unwrap_err();
        assert!(matches!(
            err,
            FileCipherError::Crypto(CryptoError::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let mut enc = Encoder::new(&KEY, "K1", 100);
        let mut out = Vec::new();
        enc.write_frame(b"payload", &mut out).unwrap();
        out[IV_SIZE] ^= 0x01;

        let mut dec = Decoder::new(Some(&KEY), "K1", 100);
        assert!(matches!(
            dec.read_block(&mut Cursor::new(out)),
            Err(FileCipherError::Crypto(_))
        ));
    }

    #[test]
    fn test_short_trailing_frame() {
        let mut dec = Decoder::new(Some(&KEY), "K1", 100);
        let err = dec.read_block(&mut Cursor::new(vec![0u8; 20])).unwrap_err();
        assert!(matches!(err, FileCipherError::MalformedFrame { frame: 0, .. }));
    }
}
