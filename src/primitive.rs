//! Primitive value encodings shared by writer and reader.
//!
//! * unsigned integers: little-endian base-128, high bit = "more follows",
//!   at most [`MAX_VARINT_LEN`] bytes for a `u64`;
//! * signed integers: zigzag mapped onto the unsigned form;
//! * fixed-width integers and `f64`: little-endian regardless of host;
//! * raw blobs: verbatim.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

pub const MAX_VARINT_LEN: usize = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("read past end of decompressed data: wanted {wanted} bytes at offset {offset}, {available} available")]
    UnexpectedEnd { offset: usize, wanted: usize, available: usize },
    #[error("unterminated varint at offset {offset}")]
    VarintOverflow { offset: usize },
}

/// Encode `val` as a varint into `out`, returning the bytes used.
pub fn encode_uint(mut val: u64, out: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut n = 0;
    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        if val != 0 {
            byte |= 0x80;
        }
        out[n] = byte;
        n += 1;
        if val == 0 {
            return n;
        }
    }
}

#[inline]
pub fn zigzag_encode(val: i64) -> u64 {
    ((val << 1) ^ (val >> 63)) as u64
}

#[inline]
pub fn zigzag_decode(val: u64) -> i64 {
    ((val >> 1) as i64) ^ -((val & 1) as i64)
}

/// Bounds-checked cursor over a decoded buffer.
#[derive(Debug, Clone)]
pub struct ReadCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ReadCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos: pos.min(buf.len()) }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::UnexpectedEnd {
                offset:    self.pos,
                wanted:    n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn get_uint(&mut self) -> Result<u64, DecodeError> {
        let start = self.pos;
        let mut val = 0u64;
        for group in 0..MAX_VARINT_LEN {
            let byte = self.take(1)?[0];
            val |= ((byte & 0x7f) as u64) << (7 * group);
            if byte & 0x80 == 0 {
                return Ok(val);
            }
        }
        Err(DecodeError::VarintOverflow { offset: start })
    }

    pub fn get_int(&mut self) -> Result<i64, DecodeError> {
        self.get_uint().map(zigzag_decode)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.take(2).map(LittleEndian::read_u16)
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.take(4).map(LittleEndian::read_u32)
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.take(8).map(LittleEndian::read_u64)
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        self.read_u64().map(f64::from_bits)
    }
}
