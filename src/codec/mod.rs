//! Block codec registry.
//!
//! # Identity rules
//! Every codec is identified by a single byte written at offset 4 of the
//! container header.  A reader is opened for one expected codec and MUST
//! reject containers carrying any other id; there is no negotiation.
//!
//! # Block contract
//! Codecs work on independent blocks of at most [`BLOCK_UNIT`] raw bytes and
//! never allocate on the hot path: callers hand in a destination slice and
//! get back the number of bytes produced.  A block of raw input is always at
//! least [`MIN_BLOCK`] bytes long.
//!
//! [`BLOCK_UNIT`]: crate::block::BLOCK_UNIT
//! [`MIN_BLOCK`]: crate::block::MIN_BLOCK

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── CodecId enum ─────────────────────────────────────────────────────────────

/// Runtime codec discriminant.  The discriminant is the on-disk id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CodecId {
    /// LZ4 block format — the default; fastest to write and read back.
    Lz4  = b'L',
    /// Zstandard single-frame blocks — better ratio for large IR dumps.
    Zstd = b'Z',
}

impl CodecId {
    /// Byte written into the header.
    #[inline]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Resolve a header byte to a CodecId.
    /// Returns `None` if the id is not recognised by this build.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            b'L' => Some(CodecId::Lz4),
            b'Z' => Some(CodecId::Zstd),
            _    => None,
        }
    }

    /// Human-readable name (for diagnostics only — never parsed from disk).
    pub fn name(self) -> &'static str {
        match self {
            CodecId::Lz4  => "lz4",
            CodecId::Zstd => "zstd",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "lz4"  => Some(CodecId::Lz4),
            "zstd" => Some(CodecId::Zstd),
            _      => None,
        }
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Decompression error: {0}")]
    Decompression(String),
    /// The codec reported success but produced a size outside `(0, limit)`.
    #[error("Compressed block size {size} outside (0, {limit})")]
    BadBlockSize { size: usize, limit: usize },
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait BlockCodec: Send + Sync {
    fn codec_id(&self) -> CodecId;

    /// Worst-case compressed size of `len` input bytes; `compress_into`
    /// needs a destination at least this large.
    fn max_compressed_len(&self, len: usize) -> usize;

    /// Compress `src` into `dst`, returning the compressed length.
    fn compress_into(&self, src: &[u8], dst: &mut [u8], level: i32) -> Result<usize, CodecError>;

    /// Decompress `src` into `dst`, returning the decompressed length.
    /// `dst.len()` is the capacity; exceeding it is an error, never a truncation.
    fn decompress_into(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecError>;
}

// ── Built-in codec implementations ──────────────────────────────────────────

pub struct Lz4Codec;
impl BlockCodec for Lz4Codec {
    fn codec_id(&self) -> CodecId { CodecId::Lz4 }
    fn max_compressed_len(&self, len: usize) -> usize {
        lz4_flex::block::get_maximum_output_size(len)
    }
    fn compress_into(&self, src: &[u8], dst: &mut [u8], _: i32) -> Result<usize, CodecError> {
        lz4_flex::block::compress_into(src, dst)
            .map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress_into(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecError> {
        lz4_flex::block::decompress_into(src, dst)
            .map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

pub struct ZstdCodec;
impl BlockCodec for ZstdCodec {
    fn codec_id(&self) -> CodecId { CodecId::Zstd }
    fn max_compressed_len(&self, len: usize) -> usize {
        zstd::zstd_safe::compress_bound(len)
    }
    fn compress_into(&self, src: &[u8], dst: &mut [u8], level: i32) -> Result<usize, CodecError> {
        zstd::bulk::compress_to_buffer(src, dst, level)
            .map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress_into(&self, src: &[u8], dst: &mut [u8]) -> Result<usize, CodecError> {
        zstd::bulk::decompress_to_buffer(src, dst)
            .map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Resolve a CodecId to a built-in codec.
pub fn get_codec(id: CodecId) -> Box<dyn BlockCodec> {
    match id {
        CodecId::Lz4  => Box::new(Lz4Codec),
        CodecId::Zstd => Box::new(ZstdCodec),
    }
}
