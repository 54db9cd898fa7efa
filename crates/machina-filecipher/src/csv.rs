//! CSV 1.0: a generic 1.2 stream repackaged as base64 text lines.
//!
//! ```text
//! <cover page bytes>
//! "
//! IONIC CSV 1.0
//! base64(embedded generic 1.2 header)
//! base64(width_raw ciphertext bytes)       repeated
//! base64(< width_raw ciphertext bytes)     only when bytes remain
//! IONIC_DATA_END
//! "
//! ```
//! Every line ends with `\r\n`; readers also accept `\n`. The whole body sits
//! inside one quoted field, so spreadsheet tools show just the cover page.
//!
//! The embedded generic session reads and writes a [`ByteQueue`], which
//! reconciles its cipher block size with the text line width.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use machina_core::config::FileCipherConfig;
use machina_core::{DecryptAttributes, EncryptAttributes, FileInfo};
use machina_keys::KeyService;

use crate::codec::Block;
use crate::error::{FileCipherError, Result};
use crate::generic::{read_via_blocks, GenericInput, GenericOutput, PlainCursor, SessionState};
use crate::header::{GenericVersion, HEADER_TOKENS};
use crate::queue::ByteQueue;
use crate::scanner::{find_token, TokenScanner};

pub const FAMILY_CSV: &str = "csv";
pub const CSV_VERSION: &str = "1.0";

pub const BANNER: &[u8] = b"IONIC CSV 1.0";
pub const DATA_END: &[u8] = b"IONIC_DATA_END";
pub const QUOTE: &[u8] = b"\"";
pub const EOL: &[u8] = b"\r\n";

const BANNER_TOKENS: &[&[u8]] = &[b"IONIC CSV 1.0\r\n", b"IONIC CSV 1.0\n"];

const DEFAULT_COVER_PAGE: &[u8] = b"Machina protected data\r\n\
Open this file with a Machina-enabled application to view its contents.\r\n";

/// Supplies the bytes written ahead of the CSV banner.
pub trait CoverPage: Send + Sync {
    fn cover_page(&self) -> Result<Vec<u8>>;
}

/// A cover page fixed at construction.
#[derive(Debug, Clone)]
pub struct StaticCoverPage {
    bytes: Vec<u8>,
}

impl StaticCoverPage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        StaticCoverPage {
            bytes: bytes.into(),
        }
    }
}

impl Default for StaticCoverPage {
    fn default() -> Self {
        Self::new(DEFAULT_COVER_PAGE)
    }
}

impl CoverPage for StaticCoverPage {
    fn cover_page(&self) -> Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}

fn csv_file_info(generic: FileInfo) -> FileInfo {
    FileInfo {
        cipher_family: FAMILY_CSV.into(),
        cipher_version: CSV_VERSION.into(),
        ..generic
    }
}

pub struct CsvOutput<W> {
    sink: W,
    inner: GenericOutput<ByteQueue>,
    cover: Arc<dyn CoverPage>,
    width_raw: usize,
    state: SessionState<()>,
    lines: u64,
    text: String,
}

impl<W: Write> CsvOutput<W> {
    pub fn new(sink: W, keys: Arc<dyn KeyService>, config: &FileCipherConfig) -> Result<Self> {
        // the embedded stream is always 1.2, whatever generic version is configured
        let embedded = FileCipherConfig {
            version: GenericVersion::V1_2.as_str().into(),
            ..config.clone()
        };
        let inner = GenericOutput::new(ByteQueue::new(), keys, &embedded)?;
        Ok(CsvOutput {
            sink,
            inner,
            cover: Arc::new(StaticCoverPage::default()),
            width_raw: config.csv_width_raw,
            state: SessionState::Uninit,
            lines: 0,
            text: String::new(),
        })
    }

    pub fn with_cover_page(mut self, cover: Arc<dyn CoverPage>) -> Self {
        self.cover = cover;
        self
    }

    /// Write the cover page, banner and embedded header line.
    pub fn init(&mut self, attrs: &mut EncryptAttributes) -> Result<()> {
        self.state.ensure_uninit()?;

        let cover = self.cover.cover_page()?;
        self.sink.write_all(&cover)?;
        self.sink.write_all(QUOTE)?;
        self.sink.write_all(EOL)?;
        self.sink.write_all(BANNER)?;
        self.sink.write_all(EOL)?;

        self.inner.init(attrs)?;
        let header = self.inner.get_mut().remove(usize::MAX);
        self.write_line(&header)?;

        tracing::debug!(width_raw = self.width_raw, "initialized csv encryption");
        self.state = SessionState::Ready(());
        Ok(())
    }

    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        self.state.ready()?;
        self.inner.update(data)?;
        self.emit_full_lines()
    }

    /// Flush the embedded session, the short last line, and the trailer.
    pub fn finish(&mut self) -> Result<()> {
        self.state.ready()?;
        self.inner.finish()?;
        self.emit_full_lines()?;
        let rest = self.inner.get_mut().remove(usize::MAX);
        if !rest.is_empty() {
            self.write_line(&rest)?;
        }
        self.sink.write_all(DATA_END)?;
        self.sink.write_all(EOL)?;
        self.sink.write_all(QUOTE)?;
        self.sink.write_all(EOL)?;
        self.sink.flush()?;

        tracing::debug!(lines = self.lines, "finished csv encryption");
        self.state = SessionState::Finished;
        Ok(())
    }

    pub fn file_info(&self) -> Option<FileInfo> {
        self.inner.file_info().map(csv_file_info)
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

    fn emit_full_lines(&mut self) -> Result<()> {
        while self.inner.get_ref().available() >= self.width_raw {
            let raw = self.inner.get_mut().remove(self.width_raw);
            self.write_line(&raw)?;
        }
        Ok(())
    }

    fn write_line(&mut self, raw: &[u8]) -> Result<()> {
        self.text.clear();
        STANDARD.encode_string(raw, &mut self.text);
        self.sink.write_all(self.text.as_bytes())?;
        self.sink.write_all(EOL)?;
        self.lines += 1;
        Ok(())
    }
}

impl<W: Write> Write for CsvOutput<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Uninit,
    /// Decoding lines until the embedded generic header is complete
    AwaitingHeader,
    /// Feeding decoded lines to the embedded generic session
    Streaming,
    Finished,
}

pub struct CsvInput<R> {
    source: BufReader<R>,
    inner: GenericInput<ByteQueue>,
    config: FileCipherConfig,
    state: ReadState,
    data_end: bool,
    line_no: u64,
    line_cap: usize,
    pending: PlainCursor,
}

impl<R: Read> CsvInput<R> {
    pub fn new(source: R, keys: Arc<dyn KeyService>, config: &FileCipherConfig) -> Result<Self> {
        let inner = GenericInput::new(ByteQueue::new(), keys, config)?;
        Ok(Self::build(source, inner, config))
    }

    /// Open without a key service; see [`GenericInput::probe`].
    pub fn probe(source: R, config: &FileCipherConfig) -> Result<Self> {
        let inner = GenericInput::probe(ByteQueue::new(), config)?;
        Ok(Self::build(source, inner, config))
    }

    fn build(source: R, inner: GenericInput<ByteQueue>, config: &FileCipherConfig) -> Self {
        let widest = config.csv_width_raw.max(config.max_header_size);
        CsvInput {
            source: BufReader::new(source),
            inner,
            config: config.clone(),
            state: ReadState::Uninit,
            data_end: false,
            line_no: 0,
            line_cap: 4 * (widest / 3 + 1) + EOL.len(),
            pending: PlainCursor::default(),
        }
    }

    /// Find the banner, then decode lines until the embedded header parses.
    pub fn init(&mut self, attrs: &mut DecryptAttributes) -> Result<FileInfo> {
        match self.state {
            ReadState::Uninit => {}
            ReadState::AwaitingHeader | ReadState::Streaming => {
                return Err(FileCipherError::AlreadyInitialized)
            }
            ReadState::Finished => return Err(FileCipherError::AlreadyFinalized),
        }

        TokenScanner::new(BANNER_TOKENS, self.config.csv_max_cover_size, "csv banner")
            .scan(&mut self.source)?
            .ok_or(FileCipherError::UnexpectedEof {
                context: "csv banner",
            })?;
        self.state = ReadState::AwaitingHeader;

        while find_token(self.inner.get_mut().peek(), HEADER_TOKENS).is_none() {
            if self.inner.get_ref().available() > self.config.max_header_size {
                return Err(FileCipherError::NoHeaderFound {
                    limit: self.config.max_header_size,
                });
            }
            let line = match self.next_line()? {
                Some(line) if line.as_slice() != DATA_END => line,
                _ => {
                    return Err(FileCipherError::UnexpectedEof {
                        context: "embedded generic header",
                    })
                }
            };
            let raw = self.decode_line(&line)?;
            self.inner.get_mut().add(&raw);
        }

        let info = self.inner.init(attrs)?;
        if info.cipher_version != GenericVersion::V1_2.as_str() {
            return Err(FileCipherError::UnsupportedVersion {
                family: FAMILY_CSV.into(),
                version: format!("{CSV_VERSION} embedding generic {}", info.cipher_version),
            });
        }

        tracing::debug!(key_id = %info.key_id, "initialized csv decryption");
        self.state = ReadState::Streaming;
        Ok(csv_file_info(info))
    }

    /// Next decoded block, or `None` after the end marker.
    pub fn read_block(&mut self) -> Result<Option<Block>> {
        match self.state {
            ReadState::Uninit | ReadState::AwaitingHeader => {
                return Err(FileCipherError::NotInitialized)
            }
            ReadState::Finished => return Err(FileCipherError::AlreadyFinalized),
            ReadState::Streaming => {}
        }
        if !self.pending.is_empty() {
            return Ok(Some(Block::Plaintext(self.pending.take_rest())));
        }

        let need = self.inner.max_frame_size()?;
        while !self.data_end && self.inner.get_ref().available() < need {
            match self.next_line()? {
                None => {
                    return Err(FileCipherError::UnexpectedEof {
                        context: "csv end marker",
                    })
                }
                Some(line) if line.as_slice() == DATA_END => {
                    self.data_end = true;
                    self.discard_trailer()?;
                }
                Some(line) => {
                    let raw = self.decode_line(&line)?;
                    self.inner.get_mut().add(&raw);
                }
            }
        }
        self.inner.read_block()
    }

    pub fn finish(&mut self) -> Result<()> {
        match self.state {
            ReadState::Uninit => return Err(FileCipherError::NotInitialized),
            ReadState::Finished => return Err(FileCipherError::AlreadyFinalized),
            ReadState::Streaming => self.inner.finish()?,
            ReadState::AwaitingHeader => {}
        }
        tracing::debug!(lines = self.line_no, "finished csv decryption");
        self.state = ReadState::Finished;
        Ok(())
    }

    pub fn file_info(&self) -> Option<FileInfo> {
        self.inner.file_info().map(csv_file_info)
    }

    pub fn into_inner(self) -> R {
        self.source.into_inner()
    }

    /// One line without its terminator; `None` at EOF.
    fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        let n = (&mut self.source)
            .take(self.line_cap as u64 + 1)
            .read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        } else if line.len() > self.line_cap {
            return Err(FileCipherError::MalformedFrame {
                frame: self.line_no,
                reason: format!("csv line longer than {} bytes", self.line_cap),
            });
        }
        Ok(Some(line))
    }

    fn decode_line(&self, line: &[u8]) -> Result<Vec<u8>> {
        STANDARD
            .decode(line)
            .map_err(|e| FileCipherError::MalformedFrame {
                frame: self.line_no,
                reason: format!("csv line is not base64: {e}"),
            })
    }

    fn discard_trailer(&mut self) -> Result<()> {
        let trailer = io::copy(&mut self.source, &mut io::sink())?;
        if trailer as usize > QUOTE.len() + EOL.len() {
            tracing::warn!(bytes = trailer, "discarded bytes after csv end marker");
        }
        Ok(())
    }
}

impl<R: Read> Read for CsvInput<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut pending = std::mem::take(&mut self.pending);
        let result = read_via_blocks(&mut pending, out, || self.read_block());
        self.pending = pending;
        result
    }
}
