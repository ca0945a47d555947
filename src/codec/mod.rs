//! Compression collaborator: gzip and XZ as opaque byte transforms.
//!
//! md1img payloads are either stored verbatim or wrapped in a complete gzip
//! or XZ stream.  The container itself carries no codec field; the format is
//! recognised purely from the payload's leading magic bytes.

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;
use thiserror::Error;

pub const GZ_MAGIC: [u8; 2] = [0x1F, 0x8B];
pub const XZ_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];

// ── CompressionFormat ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompressionFormat {
    #[default]
    None,
    Gzip,
    Xz,
}

impl CompressionFormat {
    /// Classify a payload by its leading magic bytes.
    pub fn detect(data: &[u8]) -> Self {
        if data.starts_with(&GZ_MAGIC) {
            CompressionFormat::Gzip
        } else if data.starts_with(&XZ_MAGIC) {
            CompressionFormat::Xz
        } else {
            CompressionFormat::None
        }
    }

    /// Format implied by a `.gz` / `.xz` file-name suffix (case-insensitive).
    pub fn from_suffix(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".gz") {
            Some(CompressionFormat::Gzip)
        } else if lower.ends_with(".xz") {
            Some(CompressionFormat::Xz)
        } else {
            None
        }
    }

    pub fn extension(self) -> Option<&'static str> {
        match self {
            CompressionFormat::None => None,
            CompressionFormat::Gzip => Some("gz"),
            CompressionFormat::Xz   => Some("xz"),
        }
    }

    /// Human-readable name, as shown by `list`.
    pub fn name(self) -> &'static str {
        match self {
            CompressionFormat::None => "none",
            CompressionFormat::Gzip => "gzip",
            CompressionFormat::Xz   => "xz",
        }
    }

    /// Parse a user-supplied name.  Accepts the aliases the config file allows.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" | "RAW"  => Some(CompressionFormat::None),
            "GZ" | "GZIP"   => Some(CompressionFormat::Gzip),
            "XZ" | "LZMA"   => Some(CompressionFormat::Xz),
            _               => None,
        }
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for CompressionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| {
            format!("Invalid compression format: {s}. Valid formats: NONE, GZIP, XZ")
        })
    }
}

impl TryFrom<String> for CompressionFormat {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<CompressionFormat> for String {
    fn from(c: CompressionFormat) -> Self {
        c.name().to_ascii_uppercase()
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn format(&self) -> CompressionFormat;
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn format(&self) -> CompressionFormat { CompressionFormat::None }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>   { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
}

/// gzip at maximum compression; decoding accepts multi-member streams.
pub struct GzipCodec;
impl Codec for GzipCodec {
    fn format(&self) -> CompressionFormat { CompressionFormat::Gzip }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::best());
        enc.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        MultiGzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(format!("Error decompressing gzip data: {e}")))?;
        Ok(out)
    }
}

pub struct XzCodec;
impl Codec for XzCodec {
    fn format(&self) -> CompressionFormat { CompressionFormat::Xz }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::xz_compress(&mut io::Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        Ok(out)
    }
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::xz_decompress(&mut io::Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Decompression(format!("Error decompressing LZMA data: {e}")))?;
        Ok(out)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

pub fn get_codec(format: CompressionFormat) -> Box<dyn Codec> {
    match format {
        CompressionFormat::None => Box::new(NoneCodec),
        CompressionFormat::Gzip => Box::new(GzipCodec),
        CompressionFormat::Xz   => Box::new(XzCodec),
    }
}
