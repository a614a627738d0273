//! Block framing: the compressed body of a container.
//!
//! The body is a run of frames, each `[len: u32 BE][len compressed bytes]`.
//! A frame holds at most [`BLOCK_UNIT`] raw bytes, which leaves a 1/16
//! reserve inside [`SPILL_CAPACITY`] for incompressible input.  A final
//! block shorter than [`MIN_BLOCK`] is zero-padded before compression; the
//! padding is neither counted in the header length nor checksummed, so a
//! reader never sees it.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use crate::checksum::Checksum;
use crate::codec::{BlockCodec, CodecError};

pub const SPILL_CAPACITY: usize = 65536;
pub const BLOCK_UNIT: usize = SPILL_CAPACITY - SPILL_CAPACITY / 16;
pub const MIN_BLOCK: usize = 16;
pub const FRAME_PREFIX: usize = 4;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame at offset {offset}: length prefix extends past end of data")]
    PrefixOutOfBounds { offset: usize },
    #[error("frame at offset {offset}: compressed length {len} outside 1..={limit}")]
    Oversized { offset: usize, len: usize, limit: usize },
    #[error("frame at offset {offset}: {len} compressed bytes but only {available} remain")]
    OutOfBounds { offset: usize, len: usize, available: usize },
    #[error("frame at offset {offset}: {source}")]
    Codec {
        offset: usize,
        #[source]
        source: CodecError,
    },
    #[error("data ends after {produced} of {expected} decompressed bytes")]
    Truncated { produced: usize, expected: usize },
}

// ── Write side ───────────────────────────────────────────────────────────────

/// Accumulates raw bytes and turns them into frames.
pub struct BlockWriter {
    codec:   Box<dyn BlockCodec>,
    level:   i32,
    pending: Vec<u8>,
    /// Prefix + compressed bytes of the most recently sealed block.  Sized
    /// for the codec's worst case; frames must still stay under
    /// [`SPILL_CAPACITY`].
    frame:   Vec<u8>,
    total:   u64,
    blocks:  u64,
}

impl BlockWriter {
    pub fn new(codec: Box<dyn BlockCodec>, level: i32) -> Self {
        let scratch = codec.max_compressed_len(BLOCK_UNIT).max(SPILL_CAPACITY);
        Self {
            codec,
            level,
            pending: Vec::with_capacity(SPILL_CAPACITY),
            frame:   vec![0u8; FRAME_PREFIX + scratch],
            total:   0,
            blocks:  0,
        }
    }

    /// Would appending `more` bytes overflow the current block?
    pub fn needs_flush(&self, more: usize) -> bool {
        debug_assert!(more <= BLOCK_UNIT);
        self.pending.len() + more > BLOCK_UNIT
    }

    /// Append bytes to the pending block.  Callers check [`needs_flush`] first.
    ///
    /// [`needs_flush`]: BlockWriter::needs_flush
    pub fn push(&mut self, bytes: &[u8]) {
        debug_assert!(self.pending.len() + bytes.len() <= BLOCK_UNIT);
        self.pending.extend_from_slice(bytes);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Real (unpadded) bytes sealed so far.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    /// Compress the pending bytes into a frame and return it.
    ///
    /// Runs even when nothing is pending, producing a frame of padding.
    pub fn seal(&mut self, checksum: &mut Checksum) -> Result<&[u8], CodecError> {
        let real = self.pending.len();
        checksum.update(&self.pending);
        if real < MIN_BLOCK {
            self.pending.resize(MIN_BLOCK, 0);
        }

        let out = &mut self.frame[FRAME_PREFIX..];
        let size = self.codec.compress_into(&self.pending, out, self.level)?;
        if size == 0 || size >= SPILL_CAPACITY {
            return Err(CodecError::BadBlockSize { size, limit: SPILL_CAPACITY });
        }
        BigEndian::write_u32(&mut self.frame[..FRAME_PREFIX], size as u32);

        tracing::trace!(raw = real, compressed = size, block = self.blocks, "sealed block");
        self.total += real as u64;
        self.blocks += 1;
        self.pending.clear();
        Ok(&self.frame[..FRAME_PREFIX + size])
    }
}

// ── Read side ────────────────────────────────────────────────────────────────

/// Decode frames from `payload` until `out` is full.
///
/// Each frame's decompressed bytes are checksummed and copied into the next
/// region of `out`; bytes beyond `out.len()` (padding) are dropped.  Trailing
/// data after the last needed frame is ignored.  Returns the frames consumed.
pub fn decode_blocks(
    payload:  &[u8],
    out:      &mut [u8],
    codec:    &dyn BlockCodec,
    checksum: &mut Checksum,
) -> Result<u64, FrameError> {
    let mut scratch = vec![0u8; SPILL_CAPACITY];
    let mut src = 0usize;
    let mut dst = 0usize;
    let mut frames = 0u64;

    while dst < out.len() {
        let (offset, len) = next_frame(payload, src).map_err(|e| match e {
            FrameError::PrefixOutOfBounds { .. } if src == payload.len() => {
                FrameError::Truncated { produced: dst, expected: out.len() }
            }
            other => other,
        })?;

        let n = codec
            .decompress_into(&payload[offset..offset + len], &mut scratch)
            .map_err(|source| FrameError::Codec { offset: src, source })?;

        let take = n.min(out.len() - dst);
        out[dst..dst + take].copy_from_slice(&scratch[..take]);
        checksum.update(&out[dst..dst + take]);

        dst += take;
        src = offset + len;
        frames += 1;
    }
    Ok(frames)
}

/// Upper bound on the raw bytes `payload_len` compressed bytes can carry:
/// every frame needs at least a prefix and one body byte, and holds at most
/// one block unit.
pub fn max_decoded_len(payload_len: usize) -> u64 {
    (payload_len / (FRAME_PREFIX + 1)) as u64 * BLOCK_UNIT as u64
}

/// Location of one frame inside a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Offset of the length prefix.
    pub offset:         usize,
    pub compressed_len: usize,
}

/// List every frame in `payload`, stopping at its end.
pub fn scan_frames(payload: &[u8]) -> Result<Vec<FrameInfo>, FrameError> {
    let mut frames = Vec::new();
    let mut src = 0usize;
    while src < payload.len() {
        let (body, len) = next_frame(payload, src)?;
        frames.push(FrameInfo { offset: src, compressed_len: len });
        src = body + len;
    }
    Ok(frames)
}

/// Bounds-check the frame at `src`; returns `(body offset, compressed len)`.
fn next_frame(payload: &[u8], src: usize) -> Result<(usize, usize), FrameError> {
    let prefix = payload
        .get(src..src + FRAME_PREFIX)
        .ok_or(FrameError::PrefixOutOfBounds { offset: src })?;
    let len = BigEndian::read_u32(prefix) as usize;
    if len == 0 || len > SPILL_CAPACITY {
        return Err(FrameError::Oversized { offset: src, len, limit: SPILL_CAPACITY });
    }
    let body = src + FRAME_PREFIX;
    let available = payload.len() - body;
    if len > available {
        return Err(FrameError::OutOfBounds { offset: src, len, available });
    }
    Ok((body, len))
}
