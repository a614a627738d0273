//! Error taxonomy for container handles.
//!
//! Every variant names the artifact it concerns.  Lower layers carry their
//! own error enums ([`CodecError`], [`FrameError`], [`DecodeError`]) which are
//! attached here with the artifact name once they reach a handle.
//!
//! Nothing in this crate retries: a corrupt container or a failed syscall is
//! returned to the caller, who is expected to abandon the operation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::block::FrameError;
use crate::codec::CodecError;
use crate::primitive::DecodeError;

pub type Result<T, E = ContainerError> = std::result::Result<T, E>;

/// Coarse classification of a [`ContainerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bytes on disk are not a valid container for these options.
    Format,
    /// Content decoded cleanly but the integrity check failed.
    Checksum,
    /// Open/read/write/seek failure or a handle whose transport is gone.
    Resource,
    /// The compressor broke its contract.
    Internal,
}

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("{name}: not a container or written by an incompatible version (magic {found:02x?})")]
    BadMagic { name: String, found: [u8; 4] },

    #[error("{name} was created with unexpected compression algorithm {found:#04x} (expected {expected:#04x})")]
    UnexpectedCodec { name: String, found: u8, expected: u8 },

    #[error("{name} was created with unexpected checksum algorithm {found} (expected {expected})")]
    UnexpectedChecksum { name: String, found: u8, expected: u8 },

    #[error("{name}: unknown compression algorithm {id:#04x}")]
    UnknownCodec { name: String, id: u8 },

    #[error("{name} is truncated: {reason}")]
    Truncated { name: String, reason: String },

    #[error("{name} has invalid compression format: {source}")]
    CorruptBlock {
        name: String,
        #[source]
        source: FrameError,
    },

    #[error("{name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: DecodeError,
    },

    #[error("{name}: {total} decompressed bytes do not fit the 32-bit length field")]
    Oversize { name: String, total: u64 },

    #[error("{name}: incorrect checksum {computed:08x}, expected {expected:08x}")]
    ChecksumMismatch { name: String, computed: u32, expected: u32 },

    #[error("{name}: {op}: {source}")]
    Io {
        name: String,
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{name}: handle was released by registry shutdown")]
    Released { name: String },

    #[error("invalid library unit name {unit:?} under {root}")]
    InvalidUnit { root: PathBuf, unit: String },

    #[error("{name}: compressor failed: {source}")]
    Compressor {
        name: String,
        #[source]
        source: CodecError,
    },
}

impl ContainerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContainerError::BadMagic { .. }
            | ContainerError::UnexpectedCodec { .. }
            | ContainerError::UnexpectedChecksum { .. }
            | ContainerError::UnknownCodec { .. }
            | ContainerError::Truncated { .. }
            | ContainerError::CorruptBlock { .. }
            | ContainerError::Decode { .. }
            | ContainerError::Oversize { .. } => ErrorKind::Format,
            ContainerError::ChecksumMismatch { .. } => ErrorKind::Checksum,
            ContainerError::Io { .. }
            | ContainerError::Released { .. }
            | ContainerError::InvalidUnit { .. } => ErrorKind::Resource,
            ContainerError::Compressor { .. } => ErrorKind::Internal,
        }
    }

    pub(crate) fn io(name: &str, op: &'static str, source: io::Error) -> Self {
        ContainerError::Io { name: name.to_owned(), op, source }
    }
}
