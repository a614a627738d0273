//! The 16-byte logical container header.
//!
//! ```text
//! 0..4    magic "LPAK"
//! 4       compression algorithm id   (CodecId)
//! 5       checksum algorithm id      (ChecksumAlgo)
//! 6..8    reserved, zero
//! 8..12   total decompressed length  (u32 BE)
//! 12..16  checksum                   (u32 BE)
//! ```
//!
//! Bytes 8..16 are the *trailer*.  A writer emits them zeroed up front and
//! fills them in at close: in place for seekable targets, appended after the
//! last block for streams.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::io::{self, Read};

use crate::checksum::ChecksumAlgo;
use crate::codec::CodecId;
use crate::error::{ContainerError, Result};

pub const MAGIC: &[u8; 4] = b"LPAK";
pub const HEADER_SIZE: usize = 16;
pub const TRAILER_OFFSET: u64 = 8;
pub const TRAILER_LEN: usize = 8;

/// Length and checksum, the part of the header only known at close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Trailer {
    pub length:   u32,
    pub checksum: u32,
}

impl Trailer {
    pub fn to_bytes(self) -> [u8; TRAILER_LEN] {
        let mut out = [0u8; TRAILER_LEN];
        BigEndian::write_u32(&mut out[..4], self.length);
        BigEndian::write_u32(&mut out[4..], self.checksum);
        out
    }

    pub fn from_bytes(bytes: &[u8; TRAILER_LEN]) -> Self {
        Self {
            length:   BigEndian::read_u32(&bytes[..4]),
            checksum: BigEndian::read_u32(&bytes[4..]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic:       [u8; 4],
    pub codec_id:    u8,
    pub checksum_id: u8,
    pub reserved:    u16,
    pub trailer:     Trailer,
}

impl Header {
    /// Provisional header for a new container: trailer zeroed.
    pub fn new(codec: CodecId, checksum: ChecksumAlgo) -> Self {
        Self {
            magic:       *MAGIC,
            codec_id:    codec.id(),
            checksum_id: checksum.id(),
            reserved:    0,
            trailer:     Trailer::default(),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&self.magic);
        out[4] = self.codec_id;
        out[5] = self.checksum_id;
        BigEndian::write_u16(&mut out[6..8], self.reserved);
        out[8..].copy_from_slice(&self.trailer.to_bytes());
        out
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        let codec_id = reader.read_u8()?;
        let checksum_id = reader.read_u8()?;
        let reserved = reader.read_u16::<BigEndian>()?;
        let length = reader.read_u32::<BigEndian>()?;
        let checksum = reader.read_u32::<BigEndian>()?;
        Ok(Self {
            magic,
            codec_id,
            checksum_id,
            reserved,
            trailer: Trailer { length, checksum },
        })
    }

    /// Check magic, codec and checksum algorithm, in that order.
    pub fn validate(&self, name: &str, codec: CodecId, checksum: ChecksumAlgo) -> Result<()> {
        if &self.magic != MAGIC {
            return Err(ContainerError::BadMagic { name: name.to_owned(), found: self.magic });
        }
        if self.codec_id != codec.id() {
            if self.codec().is_none() {
                return Err(ContainerError::UnknownCodec { name: name.to_owned(), id: self.codec_id });
            }
            return Err(ContainerError::UnexpectedCodec {
                name:     name.to_owned(),
                found:    self.codec_id,
                expected: codec.id(),
            });
        }
        if self.checksum_id != checksum.id() {
            return Err(ContainerError::UnexpectedChecksum {
                name:     name.to_owned(),
                found:    self.checksum_id,
                expected: checksum.id(),
            });
        }
        Ok(())
    }

    pub fn codec(&self) -> Option<CodecId> {
        CodecId::from_id(self.codec_id)
    }

    pub fn checksum_algo(&self) -> Option<ChecksumAlgo> {
        ChecksumAlgo::from_id(self.checksum_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn layout_is_fixed() {
        let mut h = Header::new(CodecId::Lz4, ChecksumAlgo::Adler32);
        h.trailer = Trailer { length: 0x0102_0304, checksum: 0xa0b0_c0d0 };
        let bytes = h.to_bytes();
        assert_eq!(&bytes, b"LPAKL\x01\x00\x00\x01\x02\x03\x04\xa0\xb0\xc0\xd0");

        assert_eq!(Header::read(&bytes[..]).unwrap(), h);
    }

    #[test]
    fn validation_order_and_kinds() {
        let good = Header::new(CodecId::Lz4, ChecksumAlgo::Adler32);
        good.validate("u", CodecId::Lz4, ChecksumAlgo::Adler32).unwrap();

        let mut bad = good;
        bad.magic = *b"NOPE";
        bad.codec_id = 0;
        let err = bad.validate("u", CodecId::Lz4, ChecksumAlgo::Adler32).unwrap_err();
        assert!(matches!(err, ContainerError::BadMagic { .. }));
        assert_eq!(err.kind(), ErrorKind::Format);

        let err = good.validate("u", CodecId::Zstd, ChecksumAlgo::Adler32).unwrap_err();
        assert!(matches!(err, ContainerError::UnexpectedCodec { found: b'L', expected: b'Z', .. }));

        let mut alien = good;
        alien.codec_id = b'?';
        let err = alien.validate("u", CodecId::Lz4, ChecksumAlgo::Adler32).unwrap_err();
        assert!(matches!(err, ContainerError::UnknownCodec { id: b'?', .. }));

        let err = good.validate("u", CodecId::Lz4, ChecksumAlgo::None).unwrap_err();
        assert!(matches!(err, ContainerError::UnexpectedChecksum { found: 1, expected: 0, .. }));
    }

    #[test]
    fn short_header_is_eof() {
        let err = Header::read(&b"LPAK"[..]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
