//! Whole-stream and whole-file helpers over the session types.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::Arc;

use machina_core::config::FileCipherConfig;
use machina_core::{DecryptAttributes, EncryptAttributes, FileInfo};
use machina_keys::KeyService;

use crate::codec::Block;
use crate::csv::{CoverPage, CsvInput, CsvOutput, StaticCoverPage, FAMILY_CSV};
use crate::error::{FileCipherError, Result};
use crate::generic::{GenericInput, GenericOutput};
use crate::header::{GenericVersion, FAMILY_GENERIC};

const COPY_BUF_SIZE: usize = 64 * 1024;

/// A file cipher family with one-call encrypt, decrypt and inspect.
pub trait FileCipher {
    /// Family name recorded in `FileInfo::cipher_family`.
    fn family(&self) -> &'static str;

    fn encrypt_stream(
        &self,
        source: &mut dyn Read,
        sink: &mut dyn Write,
        attrs: &mut EncryptAttributes,
    ) -> Result<()>;

    fn decrypt_stream(
        &self,
        source: &mut dyn Read,
        sink: &mut dyn Write,
        attrs: &mut DecryptAttributes,
    ) -> Result<FileInfo>;

    /// Inspect a header without a key. Input with no recognisable header is
    /// reported as unencrypted rather than as an error.
    fn file_info_stream(&self, source: &mut dyn Read) -> Result<FileInfo>;

    fn encrypt_bytes(&self, plain: &[u8], attrs: &mut EncryptAttributes) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(plain.len() + plain.len() / 2 + 512);
        self.encrypt_stream(&mut &plain[..], &mut out, attrs)?;
        Ok(out)
    }

    fn decrypt_bytes(&self, cipher: &[u8], attrs: &mut DecryptAttributes) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(cipher.len());
        self.decrypt_stream(&mut &cipher[..], &mut out, attrs)?;
        Ok(out)
    }

    fn encrypt_file(&self, src: &Path, dst: &Path, attrs: &mut EncryptAttributes) -> Result<()> {
        let mut source = BufReader::new(File::open(src)?);
        let mut sink = BufWriter::new(File::create(dst)?);
        self.encrypt_stream(&mut source, &mut sink, attrs)?;
        sink.flush()?;
        Ok(())
    }

    fn decrypt_file(
        &self,
        src: &Path,
        dst: &Path,
        attrs: &mut DecryptAttributes,
    ) -> Result<FileInfo> {
        let mut source = BufReader::new(File::open(src)?);
        let mut sink = BufWriter::new(File::create(dst)?);
        let info = self.decrypt_stream(&mut source, &mut sink, attrs)?;
        sink.flush()?;
        Ok(info)
    }

    fn file_info(&self, path: &Path) -> Result<FileInfo> {
        let mut source = BufReader::new(File::open(path)?);
        self.file_info_stream(&mut source)
    }
}

/// Feed `source` to `update` until EOF.
fn pump<F>(source: &mut dyn Read, mut update: F) -> Result<()>
where
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        update(&buf[..n])?;
    }
}

/// Write every block from `next` to `sink`.
fn drain<F>(sink: &mut dyn Write, mut next: F) -> Result<()>
where
    F: FnMut() -> Result<Option<Block>>,
{
    while let Some(block) = next()? {
        match block {
            Block::Plaintext(plain) => sink.write_all(&plain)?,
            Block::Unavailable { .. } => return Err(FileCipherError::PlaintextUnavailable),
        }
    }
    sink.flush()?;
    Ok(())
}

/// Header errors that mean "not one of ours" when probing.
fn is_unrecognised(err: &FileCipherError) -> bool {
    matches!(
        err,
        FileCipherError::NoHeaderFound { .. }
            | FileCipherError::UnexpectedEof { .. }
            | FileCipherError::MalformedHeader(_)
    )
}

/// Generic 1.1/1.2/1.3. Encrypts with the configured version; decrypts
/// whichever version the header names.
pub struct GenericFileCipher {
    keys: Arc<dyn KeyService>,
    config: FileCipherConfig,
}

impl GenericFileCipher {
    pub fn new(keys: Arc<dyn KeyService>, config: FileCipherConfig) -> Result<Self> {
        config.validate()?;
        config.version.parse::<GenericVersion>()?;
        Ok(GenericFileCipher { keys, config })
    }

    pub fn config(&self) -> &FileCipherConfig {
        &self.config
    }
}

impl FileCipher for GenericFileCipher {
    fn family(&self) -> &'static str {
        FAMILY_GENERIC
    }

    fn encrypt_stream(
        &self,
        source: &mut dyn Read,
        sink: &mut dyn Write,
        attrs: &mut EncryptAttributes,
    ) -> Result<()> {
        let mut output = GenericOutput::new(sink, Arc::clone(&self.keys), &self.config)?;
        output.init(attrs)?;
        pump(source, |chunk| output.update(chunk))?;
        output.finish()
    }

    fn decrypt_stream(
        &self,
        source: &mut dyn Read,
        sink: &mut dyn Write,
        attrs: &mut DecryptAttributes,
    ) -> Result<FileInfo> {
        let mut input = GenericInput::new(source, Arc::clone(&self.keys), &self.config)?;
        let info = input.init(attrs)?;
        drain(sink, || input.read_block())?;
        input.finish()?;
        Ok(info)
    }

    fn file_info_stream(&self, source: &mut dyn Read) -> Result<FileInfo> {
        let mut input = GenericInput::probe(source, &self.config)?;
        match input.init(&mut DecryptAttributes::new()) {
            Ok(info) => Ok(info),
            Err(e) if is_unrecognised(&e) => {
                tracing::debug!("no generic header: {e}");
                Ok(FileInfo::unencrypted())
            }
            Err(e) => Err(e),
        }
    }
}

/// CSV 1.0 over an embedded generic 1.2 stream.
pub struct CsvFileCipher {
    keys: Arc<dyn KeyService>,
    config: FileCipherConfig,
    cover: Arc<dyn CoverPage>,
}

impl CsvFileCipher {
    pub fn new(keys: Arc<dyn KeyService>, config: FileCipherConfig) -> Result<Self> {
        config.validate()?;
        Ok(CsvFileCipher {
            keys,
            config,
            cover: Arc::new(StaticCoverPage::default()),
        })
    }

    pub fn with_cover_page(mut self, cover: Arc<dyn CoverPage>) -> Self {
        self.cover = cover;
        self
    }
}

impl FileCipher for CsvFileCipher {
    fn family(&self) -> &'static str {
        FAMILY_CSV
    }

    fn encrypt_stream(
        &self,
        source: &mut dyn Read,
        sink: &mut dyn Write,
        attrs: &mut EncryptAttributes,
    ) -> Result<()> {
        let mut output = CsvOutput::new(sink, Arc::clone(&self.keys), &self.config)?
            .with_cover_page(Arc::clone(&self.cover));
        output.init(attrs)?;
        pump(source, |chunk| output.update(chunk))?;
        output.finish()
    }

    fn decrypt_stream(
        &self,
        source: &mut dyn Read,
        sink: &mut dyn Write,
        attrs: &mut DecryptAttributes,
    ) -> Result<FileInfo> {
        let mut input = CsvInput::new(source, Arc::clone(&self.keys), &self.config)?;
        let info = input.init(attrs)?;
        drain(sink, || input.read_block())?;
        input.finish()?;
        Ok(info)
    }

    fn file_info_stream(&self, source: &mut dyn Read) -> Result<FileInfo> {
        let mut input = CsvInput::probe(source, &self.config)?;
        match input.init(&mut DecryptAttributes::new()) {
            Ok(info) => Ok(info),
            Err(e) if is_unrecognised(&e) => {
                tracing::debug!("no csv header: {e}");
                Ok(FileInfo::unencrypted())
            }
            Err(e) => Err(e),
        }
    }
}
