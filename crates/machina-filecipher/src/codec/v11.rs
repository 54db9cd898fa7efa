//! Generic 1.1: AES-256-CTR, base64 text inside a sentinel-wrapped frame.
//!
//! ```text
//! [0x02][base64(iv(16) || ctr(plaintext))][0x03]
//! ```
//! A full frame spans `frame_size(max)` bytes and its payload length is a
//! multiple of 3, so the base64 text never carries padding. Only the final
//! frame of a stream may be shorter (and padded).

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use machina_crypto::{generate_iv, AesCtrCipher, IV_SIZE};

use super::{read_full, Block};
use crate::error::{FileCipherError, Result};

pub const HEADER_SENTINEL: u8 = 0x02;
pub const FOOTER_SENTINEL: u8 = 0x03;

/// Bytes in a full frame, sentinels included.
pub fn frame_size(max_cipher_block_size: usize) -> usize {
    2 + 4 * ((max_cipher_block_size - 2) / 4)
}

/// Plaintext bytes carried by a full frame.
pub fn plain_size(max_cipher_block_size: usize) -> usize {
    3 * ((max_cipher_block_size - 2) / 4) - IV_SIZE
}

pub struct Encoder {
    cipher: AesCtrCipher,
    plain_size: usize,
    frames: u64,
    payload: Vec<u8>,
    frame: Vec<u8>,
}

impl Encoder {
    pub fn new(key: &[u8; 32], max_cipher_block_size: usize) -> Self {
        let frame_size = frame_size(max_cipher_block_size);
        Encoder {
            cipher: AesCtrCipher::new(key),
            plain_size: plain_size(max_cipher_block_size),
            frames: 0,
            payload: Vec::with_capacity(frame_size),
            frame: Vec::with_capacity(frame_size),
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
        self.payload.clear();
        self.payload.extend_from_slice(&iv);
        self.payload.extend_from_slice(plain);
        self.cipher.encrypt_in_place(&iv, &mut self.payload[IV_SIZE..]);

        self.frame.clear();
        self.frame.push(HEADER_SENTINEL);
        let mut text = String::with_capacity(self.frame.capacity());
        STANDARD.encode_string(&self.payload, &mut text);
        self.frame.extend_from_slice(text.as_bytes());
        self.frame.push(FOOTER_SENTINEL);

        sink.write_all(&self.frame)?;
        tracing::trace!(frame = self.frames, bytes = self.frame.len(), "wrote 1.1 frame");
        self.frames += 1;
        Ok(())
    }
}

pub struct Decoder {
    /// `None` in probe mode
    cipher: Option<AesCtrCipher>,
    frames: u64,
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new(key: Option<&[u8; 32]>, max_cipher_block_size: usize) -> Self {
        Decoder {
            cipher: key.map(AesCtrCipher::new),
            frames: 0,
            buf: vec![0u8; frame_size(max_cipher_block_size)],
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
        let frame = &self.buf[..n];
        let index = self.frames;
        let malformed = |reason: String| FileCipherError::MalformedFrame {
            frame: index,
            reason,
        };

        if n < 2 {
            return Err(malformed(format!("{n} byte frame cannot hold both sentinels")));
        }
        if frame[0] != HEADER_SENTINEL {
            return Err(malformed(format!(
                "expected header sentinel 0x{HEADER_SENTINEL:02x}, found 0x{:02x}",
                frame[0]
            )));
        }
        if frame[n - 1] != FOOTER_SENTINEL {
            return Err(malformed(format!(
                "expected footer sentinel 0x{FOOTER_SENTINEL:02x}, found 0x{:02x}",
                frame[n - 1]
            )));
        }

        let mut payload = STANDARD
            .decode(&frame[1..n - 1])
            .map_err(|e| malformed(format!("invalid base64 payload: {e}")))?;
        if payload.len() < IV_SIZE {
            return Err(malformed(format!(
                "payload of {} bytes is shorter than the IV",
                payload.len()
            )));
        }

        self.frames += 1;
        let Some(cipher) = &self.cipher else {
            return Ok(Some(Block::Unavailable {
                frame: index,
                cipher_len: payload.len(),
            }));
        };

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&payload[..IV_SIZE]);
        cipher.decrypt_in_place(&iv, &mut payload[IV_SIZE..]);
        payload.drain(..IV_SIZE);
        tracing::trace!(frame = index, bytes = payload.len(), "read 1.1 frame");
        Ok(Some(Block::Plaintext(payload)))
    }
}
