//! Per-version block codecs.
//!
//! The version string is resolved once, when the header is parsed or
//! written. After that the session holds an [`Encoder`] or [`Decoder`]
//! variant that owns its cipher, scratch buffer and frame counter.

pub mod v11;
pub mod v12;
pub mod v13;

use std::io::{ErrorKind, Read, Write};

use crate::error::Result;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// Authenticated (1.2/1.3) or decrypted (1.1) plaintext
    Plaintext(Vec<u8>),
    /// A well-formed frame read without a key. Carries no data.
    Unavailable {
        frame: u64,
        /// Ciphertext bytes in the frame, IV and tag included
        cipher_len: usize,
    },
}

pub enum Encoder {
    V1_1(v11::Encoder),
    V1_2(v12::Encoder),
    V1_3(v13::Encoder),
}

impl Encoder {
    /// Plaintext bytes carried by one full frame.
    pub fn plain_block_size(&self) -> usize {
        match self {
            Encoder::V1_1(e) => e.plain_block_size(),
            Encoder::V1_2(e) => e.plain_block_size(),
            Encoder::V1_3(e) => e.plain_block_size(),
        }
    }

    /// Encrypt `plain` (at most one block) and write it as one frame.
    pub fn write_frame<W: Write + ?Sized>(&mut self, plain: &[u8], sink: &mut W) -> Result<()> {
        debug_assert!(plain.len() <= self.plain_block_size());
        match self {
            Encoder::V1_1(e) => e.write_frame(plain, sink),
            Encoder::V1_2(e) => e.write_frame(plain, sink),
            Encoder::V1_3(e) => e.write_frame(plain, sink),
        }
    }

    pub fn frames_written(&self) -> u64 {
        match self {
            Encoder::V1_1(e) => e.frames_written(),
            Encoder::V1_2(e) => e.frames_written(),
            Encoder::V1_3(e) => e.frames_written(),
        }
    }
}

pub enum Decoder {
    V1_1(v11::Decoder),
    V1_2(v12::Decoder),
    V1_3(v13::Decoder),
}

impl Decoder {
    /// Read the next frame. `Ok(None)` at a clean end of stream.
    pub fn read_block<R: Read + ?Sized>(&mut self, source: &mut R) -> Result<Option<Block>> {
        match self {
            Decoder::V1_1(d) => d.read_block(source),
            Decoder::V1_2(d) => d.read_block(source),
            Decoder::V1_3(d) => d.read_block(source),
        }
    }

    /// Largest number of source bytes a single frame can occupy.
    pub fn max_frame_size(&self) -> usize {
        match self {
            Decoder::V1_1(d) => d.frame_size(),
            Decoder::V1_2(d) => d.frame_size(),
            Decoder::V1_3(d) => d.max_frame_size(),
        }
    }

    pub fn frames_read(&self) -> u64 {
        match self {
            Decoder::V1_1(d) => d.frames_read(),
            Decoder::V1_2(d) => d.frames_read(),
            Decoder::V1_3(d) => d.frames_read(),
        }
    }
}

/// Fill `buf` from `source`, stopping early only at EOF. Returns bytes read.
pub(crate) fn read_full<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out at most `step` bytes per read.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            let n = self.step.min(out.len()).min(self.data.len());
            out[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn read_full_assembles_short_reads() {
        let mut src = Trickle {
            data: b"abcdefghij",
            step: 3,
        };
        let mut buf = [0u8; 8];
        assert_eq!(read_full(&mut src, &mut buf).unwrap(), 8);
        assert_eq!(&buf, b"abcdefgh");
        assert_eq!(read_full(&mut src, &mut buf).unwrap(), 2);
        assert_eq!(read_full(&mut src, &mut buf).unwrap(), 0);
    }
}
