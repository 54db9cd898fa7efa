//! Generic 1.3: length-prefixed AES-256-GCM frames with key rotation.
//!
//! ```text
//! [len: i32 BE][iv: 16][ciphertext][tag: 16]        frames 0 .. metaSize-1
//! {"tag":"<next key id>"}\r\n\r\n                     rotation header
//! [len: i32 BE][iv: 16][ciphertext][tag: 16]        frames metaSize .. 2*metaSize-1
//! ...
//! ```
//! Rotation happens before frame `i` whenever `i > 0 && i % metaSize == 0`.
//! The writer creates a fresh key, the reader fetches the named one. Both
//! are blocking key-service calls made in the middle of the stream; a
//! pre-warmed `CachingKeyService` keeps them off the network.

use std::io::{Read, Write};
use std::sync::Arc;

use machina_core::{Key, KeyAttributes, Metadata};
use machina_crypto::{generate_iv, AesGcmCipher, IV_SIZE, TAG_SIZE};
use machina_keys::KeyService;

use super::{read_full, Block};
use crate::error::{FileCipherError, Result};
use crate::header::{RotationHeader, RotationParams};

const LEN_SIZE: usize = 4;
const OVERHEAD: usize = IV_SIZE + TAG_SIZE;

fn is_rotation_boundary(frame: u64, meta_size: u32) -> bool {
    frame > 0 && frame % u64::from(meta_size) == 0
}

pub struct Encoder {
    cipher: AesGcmCipher,
    keys: Arc<dyn KeyService>,
    key_attributes: KeyAttributes,
    metadata: Metadata,
    params: RotationParams,
    frames: u64,
    rotated: Vec<String>,
    body: Vec<u8>,
}

impl Encoder {
    pub fn new(
        key: &Key,
        keys: Arc<dyn KeyService>,
        key_attributes: KeyAttributes,
        metadata: Metadata,
        params: RotationParams,
    ) -> Self {
        Encoder {
            cipher: AesGcmCipher::new(key.as_bytes(), key.id().as_bytes()),
            keys,
            key_attributes,
            metadata,
            params,
            frames: 0,
            rotated: Vec::new(),
            body: Vec::with_capacity(params.block_size + TAG_SIZE),
        }
    }

    pub fn plain_block_size(&self) -> usize {
        self.params.block_size
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Ids of the keys introduced by rotation headers, in stream order.
    pub fn rotated_keys(&self) -> &[String] {
        &self.rotated
    }

    pub fn write_frame<W: Write + ?Sized>(&mut self, plain: &[u8], sink: &mut W) -> Result<()> {
        if is_rotation_boundary(self.frames, self.params.meta_size) {
            self.rotate(sink)?;
        }

        let iv = generate_iv();
        self.body.clear();
        self.body.extend_from_slice(plain);
        self.cipher.seal_in_place(&iv, &mut self.body)?;

        let len = i32::try_from(IV_SIZE + self.body.len()).map_err(|_| {
            FileCipherError::MalformedFrame {
                frame: self.frames,
                reason: format!("{} byte frame exceeds i32 length", IV_SIZE + self.body.len()),
            }
        })?;
        sink.write_all(&len.to_be_bytes())?;
        sink.write_all(&iv)?;
        sink.write_all(&self.body)?;
        tracing::trace!(
            frame = self.frames,
            bytes = LEN_SIZE + IV_SIZE + self.body.len(),
            "wrote 1.3 frame"
        );
        self.frames += 1;
        Ok(())
    }

    fn rotate<W: Write + ?Sized>(&mut self, sink: &mut W) -> Result<()> {
        let key = self
            .keys
            .create_key(&self.key_attributes, &self.metadata)?;
        let header = RotationHeader::new(key.id()).to_bytes()?;
        sink.write_all(&header)?;
        self.cipher.rekey(key.as_bytes(), key.id().as_bytes());
        tracing::debug!(key_id = key.id(), frame = self.frames, "rotated encryption key");
        self.rotated.push(key.id().to_string());
        Ok(())
    }
}

pub struct Decoder {
    /// `None` in probe mode, together with `keys`
    cipher: Option<AesGcmCipher>,
    keys: Option<Arc<dyn KeyService>>,
    metadata: Metadata,
    params: RotationParams,
    max_header_size: usize,
    frames: u64,
    key_ids: Vec<String>,
}

impl Decoder {
    pub fn new(
        initial_key_id: &str,
        key: Option<&Key>,
        keys: Option<Arc<dyn KeyService>>,
        metadata: Metadata,
        params: RotationParams,
        max_header_size: usize,
    ) -> Self {
        Decoder {
            cipher: key.map(|k| AesGcmCipher::new(k.as_bytes(), k.id().as_bytes())),
            keys,
            metadata,
            params,
            max_header_size,
            frames: 0,
            key_ids: vec![initial_key_id.to_string()],
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.params
            .block_size
            .saturating_add(LEN_SIZE + OVERHEAD)
    }

    pub fn frames_read(&self) -> u64 {
        self.frames
    }

    /// Key ids seen so far: the header tag, then one per rotation header.
    pub fn key_ids(&self) -> &[String] {
        &self.key_ids
    }

    pub fn read_block<R: Read + ?Sized>(&mut self, source: &mut R) -> Result<Option<Block>> {
        let index = self.frames;
        let mut rotated = false;
        if is_rotation_boundary(index, self.params.meta_size) {
            match RotationHeader::read_from(source, self.max_header_size)? {
                Some(header) => {
                    self.rotate(header.tag)?;
                    rotated = true;
                }
                None => return Ok(None),
            }
        }

        let mut len_buf = [0u8; LEN_SIZE];
        match read_full(source, &mut len_buf)? {
            0 if !rotated => return Ok(None),
            LEN_SIZE => {}
            _ => {
                return Err(FileCipherError::UnexpectedEof {
                    context: "1.3 frame length",
                })
            }
        }

        let declared = i32::from_be_bytes(len_buf);
        let max = self.params.block_size.checked_add(OVERHEAD).ok_or_else(|| {
            FileCipherError::MalformedFrame {
                frame: index,
                reason: format!("block size {} has no valid frame length", self.params.block_size),
            }
        })?;
        let len = match usize::try_from(declared) {
            Ok(len) if (OVERHEAD..=max).contains(&len) => len,
            _ => {
                return Err(FileCipherError::MalformedFrame {
                    frame: index,
                    reason: format!("declared length {declared} outside {OVERHEAD}..={max}"),
                })
            }
        };

        // Grows only as bytes arrive, so a lying prefix cannot force a large allocation.
        let mut frame = Vec::with_capacity(len.min(64 * 1024));
        (&mut *source).take(len as u64).read_to_end(&mut frame)?;
        if frame.len() < len {
            return Err(FileCipherError::TruncatedFrame {
                frame: index,
                expected: len,
                actual: frame.len(),
            });
        }

        self.frames += 1;
        let Some(cipher) = &self.cipher else {
            return Ok(Some(Block::Unavailable {
                frame: index,
                cipher_len: len,
            }));
        };

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&frame[..IV_SIZE]);
        frame.drain(..IV_SIZE);
        cipher.open_in_place(&iv, &mut frame)?;
        tracing::trace!(frame = index, bytes = frame.len(), "read 1.3 frame");
        Ok(Some(Block::Plaintext(frame)))
    }

    fn rotate(&mut self, tag: String) -> Result<()> {
        match (&self.keys, &mut self.cipher) {
            (Some(keys), Some(cipher)) => {
                let key = keys.fetch_key(&tag, &self.metadata)?;
                cipher.rekey(key.as_bytes(), key.id().as_bytes());
                tracing::debug!(key_id = %tag, frame = self.frames, "rotated decryption key");
            }
            _ => tracing::debug!(
                key_id = %tag,
                frame = self.frames,
                "skipping rotation key fetch in probe mode"
            ),
        }
        self.key_ids.push(tag);
        Ok(())
    }
}
