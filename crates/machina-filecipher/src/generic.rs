//! Generic file cipher sessions.
//!
//! `GenericOutput` writes the JSON header, then buffers plaintext until it
//! has a full block and hands it to the encoder selected for the configured
//! version. `GenericInput` reads the header, picks the decoder named by its
//! `version`, and yields one block per call.
//!
//! Sessions are one-shot: `init` once, any number of `update`/`read_block`
//! calls, then `finish`. Dropping a session does not finish it.

use std::io::{self, Read, Write};
use std::sync::Arc;

use machina_core::config::FileCipherConfig;
use machina_core::{DecryptAttributes, EncryptAttributes, FileInfo, Key};
use machina_keys::KeyService;

use crate::codec::{v11, v12, v13, Block, Decoder, Encoder};
use crate::error::{FileCipherError, Result};
use crate::header::{GenericHeader, GenericVersion, RotationParams};

/// Lifecycle shared by every session type.
pub(crate) enum SessionState<T> {
    Uninit,
    Ready(T),
    Finished,
}

impl<T> SessionState<T> {
    pub(crate) fn ensure_uninit(&self) -> Result<()> {
        match self {
            SessionState::Uninit => Ok(()),
            SessionState::Ready(_) => Err(FileCipherError::AlreadyInitialized),
            SessionState::Finished => Err(FileCipherError::AlreadyFinalized),
        }
    }

    pub(crate) fn ready_mut(&mut self) -> Result<&mut T> {
        match self {
            SessionState::Uninit => Err(FileCipherError::NotInitialized),
            SessionState::Ready(inner) => Ok(inner),
            SessionState::Finished => Err(FileCipherError::AlreadyFinalized),
        }
    }

    pub(crate) fn ready(&self) -> Result<&T> {
        match self {
            SessionState::Uninit => Err(FileCipherError::NotInitialized),
            SessionState::Ready(inner) => Ok(inner),
            SessionState::Finished => Err(FileCipherError::AlreadyFinalized),
        }
    }
}

/// Decrypted bytes not yet handed to a `Read` caller.
#[derive(Debug, Default)]
pub(crate) struct PlainCursor {
    buf: Vec<u8>,
    pos: usize,
}

impl PlainCursor {
    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub(crate) fn set(&mut self, buf: Vec<u8>) {
        self.buf = buf;
        self.pos = 0;
    }

    pub(crate) fn copy_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    /// Everything left, leaving the cursor empty.
    pub(crate) fn take_rest(&mut self) -> Vec<u8> {
        let mut buf = std::mem::take(&mut self.buf);
        buf.drain(..self.pos);
        self.pos = 0;
        buf
    }
}

/// Drive a block source through `Read`.
pub(crate) fn read_via_blocks<F>(
    cursor: &mut PlainCursor,
    out: &mut [u8],
    mut next: F,
) -> io::Result<usize>
where
    F: FnMut() -> Result<Option<Block>>,
{
    if out.is_empty() {
        return Ok(0);
    }
    while cursor.is_empty() {
        match next()? {
            Some(Block::Plaintext(buf)) => cursor.set(buf),
            Some(Block::Unavailable { frame, .. }) => {
                tracing::warn!(frame, "read on a session opened without a key service");
                return Err(FileCipherError::PlaintextUnavailable.into());
            }
            None => return Ok(0),
        }
    }
    Ok(cursor.copy_into(out))
}

pub struct GenericOutput<W> {
    sink: W,
    keys: Arc<dyn KeyService>,
    config: FileCipherConfig,
    version: GenericVersion,
    resource_length: Option<u64>,
    state: SessionState<Encoder>,
    header: Option<GenericHeader>,
    pending: Vec<u8>,
}

impl<W: Write> GenericOutput<W> {
    /// Encrypt into `sink` using the version named in `config`.
    pub fn new(sink: W, keys: Arc<dyn KeyService>, config: &FileCipherConfig) -> Result<Self> {
        config.validate()?;
        let version = config.version.parse()?;
        Ok(GenericOutput {
            sink,
            keys,
            config: config.clone(),
            version,
            resource_length: None,
            state: SessionState::Uninit,
            header: None,
            pending: Vec::new(),
        })
    }

    pub fn with_version(mut self, version: GenericVersion) -> Self {
        self.version = version;
        self
    }

    /// Expected plaintext length, used to size the block buffer.
    pub fn with_resource_length(mut self, len: u64) -> Self {
        self.resource_length = Some(len);
        self
    }

    pub fn version(&self) -> GenericVersion {
        self.version
    }

    /// Resolve the key and write the header.
    ///
    /// A key already held by `attrs` is used as is; otherwise one is created
    /// with `attrs.key_attributes` and recorded in `attrs`.
    pub fn init(&mut self, attrs: &mut EncryptAttributes) -> Result<()> {
        self.state.ensure_uninit()?;

        let key: Key = match attrs.key() {
            Some(key) => key.clone(),
            None => {
                let key = self.keys.create_key(&attrs.key_attributes, &attrs.metadata)?;
                attrs.set_key(key.clone())?;
                key
            }
        };

        let max = self.config.max_cipher_block_size;
        let mut header = GenericHeader::new(self.version, key.id(), self.keys.server());
        let encoder = match self.version {
            GenericVersion::V1_1 => Encoder::V1_1(v11::Encoder::new(key.as_bytes(), max)),
            GenericVersion::V1_2 => Encoder::V1_2(v12::Encoder::new(key.as_bytes(), key.id(), max)),
            GenericVersion::V1_3 => {
                let params = RotationParams {
                    block_size: v12::plain_size(max),
                    meta_size: self.config.meta_size,
                };
                header = header.with_rotation(params);
                Encoder::V1_3(v13::Encoder::new(
                    &key,
                    Arc::clone(&self.keys),
                    attrs.key_attributes.clone(),
                    attrs.metadata.clone(),
                    params,
                ))
            }
        };
        header.write_to(&mut self.sink)?;

        let block = encoder.plain_block_size();
        let hint = self
            .resource_length
            .map_or(block, |len| usize::try_from(len).unwrap_or(block).min(block));
        self.pending = Vec::with_capacity(hint);

        tracing::debug!(
            key_id = key.id(),
            version = %self.version,
            block,
            "initialized generic encryption"
        );
        self.header = Some(header);
        self.state = SessionState::Ready(encoder);
        Ok(())
    }

    /// Encrypt `data`, writing every block that fills up.
    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        let encoder = self.state.ready_mut()?;
        let block = encoder.plain_block_size();
        let mut rest = data;
        while !rest.is_empty() {
            if self.pending.is_empty() && rest.len() >= block {
                encoder.write_frame(&rest[..block], &mut self.sink)?;
                rest = &rest[block..];
                continue;
            }
            let take = (block - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == block {
                encoder.write_frame(&self.pending, &mut self.sink)?;
                self.pending.clear();
            }
        }
        Ok(())
    }

    /// Write the trailing partial block and flush the sink.
    pub fn finish(&mut self) -> Result<()> {
        let encoder = self.state.ready_mut()?;
        if !self.pending.is_empty() {
            encoder.write_frame(&self.pending, &mut self.sink)?;
            self.pending.clear();
        }
        self.sink.flush()?;
        tracing::debug!(frames = encoder.frames_written(), "finished generic encryption");
        self.state = SessionState::Finished;
        Ok(())
    }

    pub fn header(&self) -> Option<&GenericHeader> {
        self.header.as_ref()
    }

    pub fn file_info(&self) -> Option<FileInfo> {
        self.header.as_ref().map(GenericHeader::file_info)
    }

    /// Key ids introduced by 1.3 rotation headers so far.
    pub fn rotated_keys(&self) -> &[String] {
        match &self.state {
            SessionState::Ready(Encoder::V1_3(e)) => e.rotated_keys(),
            _ => &[],
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write> Write for GenericOutput<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

pub struct GenericInput<R> {
    source: R,
    /// `None` in probe mode
    keys: Option<Arc<dyn KeyService>>,
    config: FileCipherConfig,
    state: SessionState<Decoder>,
    header: Option<GenericHeader>,
    pending: PlainCursor,
    at_end: bool,
}

impl<R: Read> GenericInput<R> {
    pub fn new(source: R, keys: Arc<dyn KeyService>, config: &FileCipherConfig) -> Result<Self> {
        Self::build(source, Some(keys), config)
    }

    /// Open without a key service: headers and frames are parsed, plaintext
    /// is reported as unavailable.
    pub fn probe(source: R, config: &FileCipherConfig) -> Result<Self> {
        Self::build(source, None, config)
    }

    fn build(
        source: R,
        keys: Option<Arc<dyn KeyService>>,
        config: &FileCipherConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(GenericInput {
            source,
            keys,
            config: config.clone(),
            state: SessionState::Uninit,
            header: None,
            pending: PlainCursor::default(),
            at_end: false,
        })
    }

    pub fn is_probe(&self) -> bool {
        self.keys.is_none()
    }

    /// Parse the header, fetch its key and select the decoder.
    pub fn init(&mut self, attrs: &mut DecryptAttributes) -> Result<FileInfo> {
        self.state.ensure_uninit()?;

        let header = GenericHeader::read_from(&mut self.source, self.config.max_header_size)?;
        let key = match &self.keys {
            Some(keys) => Some(match attrs.key() {
                Some(key) if key.id() == header.tag => key.clone(),
                _ => {
                    let key = keys.fetch_key(&header.tag, &attrs.metadata)?;
                    attrs.set_key(key.clone())?;
                    key
                }
            }),
            None => None,
        };

        let max = self.config.max_cipher_block_size;
        let key_bytes = key.as_ref().map(Key::as_bytes);
        let decoder = match header.version {
            GenericVersion::V1_1 => Decoder::V1_1(v11::Decoder::new(key_bytes, max)),
            GenericVersion::V1_2 => Decoder::V1_2(v12::Decoder::new(key_bytes, &header.tag, max)),
            GenericVersion::V1_3 => {
                let params = header.rotation.ok_or(FileCipherError::MissingField("blockSize"))?;
                Decoder::V1_3(v13::Decoder::new(
                    &header.tag,
                    key.as_ref(),
                    self.keys.clone(),
                    attrs.metadata.clone(),
                    params,
                    self.config.max_header_size,
                ))
            }
        };

        tracing::debug!(
            key_id = %header.tag,
            version = %header.version,
            probe = self.keys.is_none(),
            "initialized generic decryption"
        );
        let info = header.file_info();
        self.header = Some(header);
        self.state = SessionState::Ready(decoder);
        Ok(info)
    }

    /// Next decoded block, or `None` once the stream ends.
    pub fn read_block(&mut self) -> Result<Option<Block>> {
        let decoder = self.state.ready_mut()?;
        if !self.pending.is_empty() {
            return Ok(Some(Block::Plaintext(self.pending.take_rest())));
        }
        let block = decoder.read_block(&mut self.source)?;
        self.at_end = block.is_none();
        Ok(block)
    }

    /// True once a read has reached the clean end of the stream.
    pub fn at_end(&self) -> bool {
        self.at_end
    }

    /// End the session.
    ///
    /// Stopping before the end of the stream is allowed: frames left unread
    /// are not validated, and a warning is logged.
    pub fn finish(&mut self) -> Result<()> {
        let decoder = self.state.ready()?;
        if !self.at_end {
            tracing::warn!(
                frames = decoder.frames_read(),
                "finished generic decryption before the end of the stream"
            );
        }
        tracing::debug!(frames = decoder.frames_read(), "finished generic decryption");
        self.state = SessionState::Finished;
        Ok(())
    }

    pub fn header(&self) -> Option<&GenericHeader> {
        self.header.as_ref()
    }

    pub fn file_info(&self) -> Option<FileInfo> {
        self.header.as_ref().map(GenericHeader::file_info)
    }

    /// Source bytes one frame can span; valid after `init`.
    pub fn max_frame_size(&self) -> Result<usize> {
        Ok(self.state.ready()?.max_frame_size())
    }

    pub fn get_ref(&self) -> &R {
        &self.source
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.source
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}

impl<R: Read> Read for GenericInput<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let decoder = self.state.ready_mut()?;
        let source = &mut self.source;
        let at_end = &mut self.at_end;
        read_via_blocks(&mut self.pending, out, || {
            let block = decoder.read_block(&mut *source)?;
            *at_end = block.is_none();
            Ok(block)
        })
    }
}
