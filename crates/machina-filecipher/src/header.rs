//! Streaming header codec.
//!
//! Generic files open with a compact JSON object followed by a blank line:
//! ```text
//! {"family":"generic","version":"1.3","tag":"MK0001","server":"https://...",
//!  "blockSize":1048544,"metaSize":256}\r\n\r\n
//! ```
//! Version 1.3 rotation headers use the same convention with only a `tag`.
//! Readers accept `\n\n` as well as `\r\n\r\n`.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use machina_core::FileInfo;
use serde::{Deserialize, Serialize};

use crate::error::{FileCipherError, Result};
use crate::scanner::TokenScanner;

pub const FAMILY_GENERIC: &str = "generic";

/// Delimiter written after every header
pub const HEADER_DELIMITER: &[u8] = b"\r\n\r\n";

/// Delimiters accepted when reading
pub const HEADER_TOKENS: &[&[u8]] = &[b"\r\n\r\n", b"\n\n"];

/// IV plus GCM tag carried by every 1.3 frame
const FRAME_OVERHEAD: usize = 32;

/// Largest frame a 1.3 length prefix can declare
const MAX_FRAME_LEN: usize = i32::MAX as usize;

/// Generic wire format version, fixed once the header is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericVersion {
    /// Sentinel-wrapped base64 AES-CTR frames
    V1_1,
    /// Fixed-size AES-GCM frames
    V1_2,
    /// Length-prefixed AES-GCM frames with periodic key rotation
    V1_3,
}

impl GenericVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenericVersion::V1_1 => "1.1",
            GenericVersion::V1_2 => "1.2",
            GenericVersion::V1_3 => "1.3",
        }
    }
}

impl fmt::Display for GenericVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenericVersion {
    type Err = FileCipherError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1.1" => Ok(GenericVersion::V1_1),
            "1.2" => Ok(GenericVersion::V1_2),
            "1.3" => Ok(GenericVersion::V1_3),
            other => Err(FileCipherError::UnsupportedVersion {
                family: FAMILY_GENERIC.into(),
                version: other.into(),
            }),
        }
    }
}

/// Wire representation; every field optional so validation can name what is missing.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawHeader {
    #[serde(skip_serializing_if = "Option::is_none")]
    family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server: Option<String>,
    #[serde(rename = "blockSize", skip_serializing_if = "Option::is_none")]
    block_size: Option<u64>,
    #[serde(rename = "metaSize", skip_serializing_if = "Option::is_none")]
    meta_size: Option<u32>,
}

/// Key rotation parameters carried by 1.3 headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationParams {
    /// Maximum plaintext bytes per frame
    pub block_size: usize,
    /// Frames per key
    pub meta_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericHeader {
    pub family: String,
    pub version: GenericVersion,
    /// Id of the key protecting the first frames
    pub tag: String,
    pub server: String,
    /// Present exactly when `version` is 1.3
    pub rotation: Option<RotationParams>,
}

impl GenericHeader {
    pub fn new(version: GenericVersion, tag: impl Into<String>, server: impl Into<String>) -> Self {
        GenericHeader {
            family: FAMILY_GENERIC.into(),
            version,
            tag: tag.into(),
            server: server.into(),
            rotation: None,
        }
    }

    pub fn with_rotation(mut self, params: RotationParams) -> Self {
        self.rotation = Some(params);
        self
    }

    /// Serialized header, delimiter included.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let raw = RawHeader {
            family: Some(self.family.clone()),
            version: Some(self.version.as_str().into()),
            tag: Some(self.tag.clone()),
            server: Some(self.server.clone()),
            block_size: self.rotation.map(|r| r.block_size as u64),
            meta_size: self.rotation.map(|r| r.meta_size),
        };
        let mut out = serde_json::to_vec(&raw)
            .map_err(|e| FileCipherError::MalformedHeader(format!("serializing: {e}")))?;
        out.extend_from_slice(HEADER_DELIMITER);
        Ok(out)
    }

    pub fn write_to<W: Write + ?Sized>(&self, sink: &mut W) -> Result<()> {
        sink.write_all(&self.to_bytes()?)?;
        Ok(())
    }

    /// Parse header text (delimiter already stripped).
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: RawHeader = serde_json::from_slice(bytes)
            .map_err(|e| FileCipherError::MalformedHeader(format!("invalid JSON: {e}")))?;

        let family = raw.family.unwrap_or_else(|| FAMILY_GENERIC.into());
        let version_str = raw.version.ok_or(FileCipherError::MissingField("version"))?;
        if family != FAMILY_GENERIC {
            return Err(FileCipherError::UnsupportedVersion {
                family,
                version: version_str,
            });
        }
        let version: GenericVersion = version_str.parse()?;

        let tag = raw
            .tag
            .filter(|t| !t.is_empty())
            .ok_or(FileCipherError::MissingField("tag"))?;

        let rotation = match version {
            GenericVersion::V1_3 => {
                let block_size = raw
                    .block_size
                    .ok_or(FileCipherError::MissingField("blockSize"))?;
                let meta_size = raw
                    .meta_size
                    .ok_or(FileCipherError::MissingField("metaSize"))?;
                if block_size == 0 || meta_size == 0 {
                    return Err(FileCipherError::MalformedHeader(format!(
                        "blockSize and metaSize must be non-zero (got {block_size}, {meta_size})"
                    )));
                }
                // a full frame (IV, ciphertext, tag) must fit the i32 length prefix
                let block_size = usize::try_from(block_size)
                    .ok()
                    .filter(|b| b.checked_add(FRAME_OVERHEAD).is_some_and(|f| f <= MAX_FRAME_LEN))
                    .ok_or_else(|| {
                        FileCipherError::MalformedHeader(format!(
                            "blockSize {block_size} out of range"
                        ))
                    })?;
                Some(RotationParams {
                    block_size,
                    meta_size,
                })
            }
            _ => None,
        };

        Ok(GenericHeader {
            family,
            version,
            tag,
            server: raw.server.unwrap_or_default(),
            rotation,
        })
    }

    /// Scan and parse a header from the front of `source`.
    pub fn read_from<R: Read + ?Sized>(source: &mut R, limit: usize) -> Result<Self> {
        let scanned = TokenScanner::new(HEADER_TOKENS, limit, "generic header")
            .scan(source)?
            .ok_or(FileCipherError::UnexpectedEof {
                context: "generic header",
            })?;
        Self::parse(&scanned.bytes)
    }

    pub fn file_info(&self) -> FileInfo {
        FileInfo {
            is_encrypted: true,
            cipher_family: self.family.clone(),
            cipher_version: self.version.as_str().into(),
            key_id: self.tag.clone(),
            server: self.server.clone(),
        }
    }
}

/// Announces the key protecting the next `metaSize` frames of a 1.3 stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationHeader {
    pub tag: String,
}

impl RotationHeader {
    pub fn new(tag: impl Into<String>) -> Self {
        RotationHeader { tag: tag.into() }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let raw = RawHeader {
            tag: Some(self.tag.clone()),
            ..RawHeader::default()
        };
        let mut out = serde_json::to_vec(&raw)
            .map_err(|e| FileCipherError::MalformedHeader(format!("serializing: {e}")))?;
        out.extend_from_slice(HEADER_DELIMITER);
        Ok(out)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let raw: RawHeader = serde_json::from_slice(bytes).map_err(|e| {
            FileCipherError::MalformedHeader(format!("invalid rotation header JSON: {e}"))
        })?;
        let tag = raw
            .tag
            .filter(|t| !t.is_empty())
            .ok_or(FileCipherError::MissingField("tag"))?;
        Ok(RotationHeader { tag })
    }

    /// Scan a rotation header. `Ok(None)` means the stream ended cleanly.
    pub fn read_from<R: Read + ?Sized>(source: &mut R, limit: usize) -> Result<Option<Self>> {
        match TokenScanner::new(HEADER_TOKENS, limit, "rotation header").scan(source)? {
            Some(scanned) => Self::parse(&scanned.bytes).map(Some),
            None => Ok(None),
        }
    }
}
