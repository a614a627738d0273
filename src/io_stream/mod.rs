//! Container handles — writer and reader.
//!
//! # Writer
//! [`ContainerWriter`] writes a provisional header with the length/checksum
//! trailer zeroed, then accepts primitive values.  Values accumulate in a
//! pending block which is compressed and framed whenever the next value
//! would push it past the block unit; a value never straddles two blocks.
//! [`ContainerWriter::close`] flushes the last block (always, even when
//! empty), then writes the trailer: patched in at offset 8 for seekable
//! targets, appended after the last frame for streams.  Only a closed writer
//! leaves a valid container behind; a writer dropped before `close` deletes
//! its target file.
//!
//! # Reader
//! [`ContainerReader`] validates the header, loads the whole physical image
//! (memory-mapped for files, slurped for streams, in which case the trailer
//! is recovered from the last 8 bytes), and decodes every frame up front
//! into one flat buffer.  Primitive reads walk that buffer with a checked
//! cursor.  [`ContainerReader::close`] verifies the checksum.
//!
//! # Endianness
//! Header and frame prefixes are big-endian; primitive values are
//! little-endian.  See `header.rs` and `primitive.rs`.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};

use byteorder::{ByteOrder, LittleEndian};

use crate::block::{decode_blocks, max_decoded_len, BlockWriter, FrameError, BLOCK_UNIT};
use crate::checksum::Checksum;
use crate::codec::get_codec;
use crate::config::ContainerOptions;
use crate::error::{ContainerError, Result};
use crate::header::{Header, Trailer, HEADER_SIZE, TRAILER_LEN, TRAILER_OFFSET};
use crate::primitive::{encode_uint, zigzag_encode, DecodeError, ReadCursor, MAX_VARINT_LEN};
use crate::registry::{HandleId, Mode, Registry};
use crate::transport::{map_file, slot, slurp, Release, Sink, Slot, Source};

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct ContainerWriter {
    name:     String,
    path:     Option<PathBuf>,
    sink:     Slot<Sink>,
    seekable: bool,
    options:  ContainerOptions,
    blocks:   BlockWriter,
    checksum: Checksum,
    registry: Arc<Registry>,
    id:       HandleId,
    finished: bool,
}

impl ContainerWriter {
    /// Create (or truncate) the container at `path`.
    pub fn create<P: AsRef<Path>>(
        path:     P,
        options:  ContainerOptions,
        registry: &Arc<Registry>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let file = File::create(path).map_err(|e| ContainerError::io(&name, "create", e))?;
        let sink = Sink::from_file(file).map_err(|e| ContainerError::io(&name, "fstat", e))?;
        Self::start(sink, name, Some(path.to_owned()), options, registry)
    }

    /// Write a container into an already open sink.  `name` is used in
    /// diagnostics only; nothing is deleted on failure.
    pub fn new(
        sink:     Sink,
        name:     impl Into<String>,
        options:  ContainerOptions,
        registry: &Arc<Registry>,
    ) -> Result<Self> {
        Self::start(sink, name.into(), None, options, registry)
    }

    fn start(
        sink:     Sink,
        name:     String,
        path:     Option<PathBuf>,
        options:  ContainerOptions,
        registry: &Arc<Registry>,
    ) -> Result<Self> {
        let seekable = sink.is_seekable();
        let sink = slot(sink);
        let resource: Arc<dyn Release> = sink.clone();
        let id = registry.register(&name, Mode::Write, path.clone(), Arc::downgrade(&resource));

        let writer = Self {
            name,
            path,
            sink,
            seekable,
            options,
            blocks:   BlockWriter::new(get_codec(options.codec), options.level),
            checksum: Checksum::new(options.checksum),
            registry: Arc::clone(registry),
            id,
            finished: false,
        };

        // From here on a failure drops `writer`, which discards the target.
        let header = Header::new(options.codec, options.checksum).to_bytes();
        Self::emit(&writer.sink, &writer.name, &header)?;
        tracing::debug!(
            name = %writer.name,
            %id,
            codec = options.codec.name(),
            checksum = options.checksum.name(),
            seekable,
            "container opened for writing"
        );
        Ok(writer)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn options(&self) -> &ContainerOptions {
        &self.options
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Blocks already compressed and written.
    pub fn blocks_written(&self) -> u64 {
        self.blocks.blocks()
    }

    /// Raw bytes accepted so far, pending ones included.
    pub fn bytes_written(&self) -> u64 {
        self.blocks.total() + self.blocks.pending() as u64
    }

    fn emit(sink: &Slot<Sink>, name: &str, bytes: &[u8]) -> Result<()> {
        let mut guard = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let sink = guard
            .as_mut()
            .ok_or_else(|| ContainerError::Released { name: name.to_owned() })?;
        sink.writer()
            .write_all(bytes)
            .map_err(|e| ContainerError::io(name, "write", e))
    }

    fn flush_block(&mut self) -> Result<()> {
        let frame = self
            .blocks
            .seal(&mut self.checksum)
            .map_err(|source| ContainerError::Compressor { name: self.name.clone(), source })?;
        Self::emit(&self.sink, &self.name, frame)
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        if self.blocks.needs_flush(bytes.len()) {
            self.flush_block()?;
        }
        self.blocks.push(bytes);
        Ok(())
    }

    pub fn put_uint(&mut self, val: u64) -> Result<()> {
        let mut enc = [0u8; MAX_VARINT_LEN];
        let n = encode_uint(val, &mut enc);
        self.put(&enc[..n])
    }

    pub fn put_int(&mut self, val: i64) -> Result<()> {
        self.put_uint(zigzag_encode(val))
    }

    pub fn write_u8(&mut self, val: u8) -> Result<()> {
        self.put(&[val])
    }

    pub fn write_u16(&mut self, val: u16) -> Result<()> {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, val);
        self.put(&buf)
    }

    pub fn write_u32(&mut self, val: u32) -> Result<()> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, val);
        self.put(&buf)
    }

    pub fn write_u64(&mut self, val: u64) -> Result<()> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, val);
        self.put(&buf)
    }

    pub fn write_f64(&mut self, val: f64) -> Result<()> {
        self.write_u64(val.to_bits())
    }

    /// Copy `data` verbatim.  A blob tops up the current block before
    /// spilling into fresh ones, so only the final block can end up shorter
    /// than the padding minimum.
    pub fn write_raw(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let room = BLOCK_UNIT - self.blocks.pending();
            if room == 0 {
                self.flush_block()?;
                continue;
            }
            let (head, rest) = data.split_at(room.min(data.len()));
            self.blocks.push(head);
            data = rest;
        }
        Ok(())
    }

    /// Flush the final block, write the trailer and release the target.
    ///
    /// Returns the checksum recorded in the container.
    pub fn close(mut self) -> Result<u32> {
        self.flush_block()?;

        let total = self.blocks.total();
        let length = u32::try_from(total)
            .map_err(|_| ContainerError::Oversize { name: self.name.clone(), total })?;
        let checksum = self.checksum.finish();
        let trailer = Trailer { length, checksum }.to_bytes();

        let sink = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| ContainerError::Released { name: self.name.clone() })?;
        finalize(sink, &trailer).map_err(|(op, e)| ContainerError::io(&self.name, op, e))?;

        self.registry.deregister(self.id);
        self.finished = true;
        tracing::debug!(
            name = %self.name,
            length,
            checksum = format_args!("{checksum:08x}"),
            blocks = self.blocks.blocks(),
            "container closed"
        );
        Ok(checksum)
    }
}

fn finalize(sink: Sink, trailer: &[u8; TRAILER_LEN]) -> std::result::Result<(), (&'static str, io::Error)> {
    match sink {
        Sink::Seekable(mut file) => {
            file.seek(SeekFrom::Start(TRAILER_OFFSET)).map_err(|e| ("seek", e))?;
            file.write_all(trailer).map_err(|e| ("write", e))?;
            file.flush().map_err(|e| ("flush", e))
        }
        // Nothing already written can be revisited: append instead.
        Sink::Stream(mut stream) => {
            stream.write_all(trailer).map_err(|e| ("write", e))?;
            stream.flush().map_err(|e| ("flush", e))
        }
    }
}

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let swept = !self.registry.deregister(self.id);
        self.sink.release();
        // A registry sweep has already dealt with the target.
        if swept {
            return;
        }
        if let Some(path) = &self.path {
            tracing::warn!(name = %self.name, "discarding unfinished container");
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(name = %self.name, error = %e, "could not remove unfinished container"),
            }
        }
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct ContainerReader {
    name:     String,
    source:   Slot<Source>,
    seekable: bool,
    header:   Header,
    data:     Vec<u8>,
    pos:      usize,
    blocks:   u64,
    checksum: Checksum,
    registry: Arc<Registry>,
    id:       HandleId,
}

impl ContainerReader {
    /// Open and fully decode the container at `path`.
    pub fn open<P: AsRef<Path>>(
        path:     P,
        options:  ContainerOptions,
        registry: &Arc<Registry>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let file = File::open(path).map_err(|e| ContainerError::io(&name, "open", e))?;
        let source = Source::from_file(file).map_err(|e| ContainerError::io(&name, "fstat", e))?;
        Self::new(source, name, options, registry)
    }

    /// Decode a container from an already open source.
    pub fn new(
        source:   Source,
        name:     impl Into<String>,
        options:  ContainerOptions,
        registry: &Arc<Registry>,
    ) -> Result<Self> {
        let name = name.into();
        let seekable = source.is_seekable();
        let source = slot(source);
        let resource: Arc<dyn Release> = source.clone();
        let id = registry.register(&name, Mode::Read, None, Arc::downgrade(&resource));

        let mut reader = Self {
            name,
            source,
            seekable,
            header:   Header::new(options.codec, options.checksum),
            data:     Vec::new(),
            pos:      0,
            blocks:   0,
            checksum: Checksum::new(options.checksum),
            registry: Arc::clone(registry),
            id,
        };
        reader.load(options)?;
        tracing::debug!(
            name = %reader.name,
            %id,
            length = reader.data.len(),
            blocks = reader.blocks,
            seekable,
            "container opened for reading"
        );
        Ok(reader)
    }

    fn load(&mut self, options: ContainerOptions) -> Result<()> {
        let name = self.name.as_str();
        let mut guard = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        let source = guard
            .as_mut()
            .ok_or_else(|| ContainerError::Released { name: name.to_owned() })?;

        let mut raw = [0u8; HEADER_SIZE];
        source.reader().read_exact(&mut raw).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => ContainerError::Truncated {
                name:   name.to_owned(),
                reason: format!("fewer than {HEADER_SIZE} header bytes"),
            },
            _ => ContainerError::io(name, "read", e),
        })?;
        let mut header = Header::read(&raw[..]).map_err(|e| ContainerError::io(name, "read", e))?;
        header.validate(name, options.codec, options.checksum)?;

        let (image, end) = match source {
            Source::Stream(stream) => {
                let image = slurp(&raw, stream.as_mut()).map_err(|e| ContainerError::io(name, "read", e))?;
                if image.len() < HEADER_SIZE + TRAILER_LEN {
                    return Err(ContainerError::Truncated {
                        name:   name.to_owned(),
                        reason: "stream ends before its trailer".to_owned(),
                    });
                }
                let end = image.len() - TRAILER_LEN;
                let mut tail = [0u8; TRAILER_LEN];
                tail.copy_from_slice(&image[end..]);
                header.trailer = Trailer::from_bytes(&tail);
                (image, end)
            }
            Source::Seekable(file) => {
                let image = map_file(file).map_err(|e| ContainerError::io(name, "mmap", e))?;
                let end = image.len();
                if end < HEADER_SIZE {
                    return Err(ContainerError::Truncated {
                        name:   name.to_owned(),
                        reason: "file shrank below its header".to_owned(),
                    });
                }
                (image, end)
            }
        };

        let payload = &image[HEADER_SIZE..end];
        let length = header.trailer.length as usize;
        if length as u64 > max_decoded_len(payload.len()) {
            return Err(ContainerError::Truncated {
                name:   name.to_owned(),
                reason: format!("{length} bytes declared but only {} compressed bytes present", payload.len()),
            });
        }

        let codec = get_codec(options.codec);
        let mut data = vec![0u8; length];
        let blocks = decode_blocks(payload, &mut data, codec.as_ref(), &mut self.checksum)
            .map_err(|source| match source {
                FrameError::Truncated { .. } => ContainerError::Truncated {
                    name:   name.to_owned(),
                    reason: source.to_string(),
                },
                source => ContainerError::CorruptBlock { name: name.to_owned(), source },
            })?;

        self.header = header;
        self.data = data;
        self.blocks = blocks;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    /// Decompressed length declared by the container.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// The whole decoded content, independent of the cursor.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    pub fn blocks_decoded(&self) -> u64 {
        self.blocks
    }

    pub fn expected_checksum(&self) -> u32 {
        self.header.trailer.checksum
    }

    fn decode<T>(
        &mut self,
        f: impl FnOnce(&mut ReadCursor<'_>) -> std::result::Result<T, DecodeError>,
    ) -> Result<T> {
        let mut cursor = ReadCursor::at(&self.data, self.pos);
        let value = f(&mut cursor)
            .map_err(|source| ContainerError::Decode { name: self.name.clone(), source })?;
        self.pos = cursor.position();
        Ok(value)
    }

    pub fn get_uint(&mut self) -> Result<u64> {
        self.decode(|c| c.get_uint())
    }

    pub fn get_int(&mut self) -> Result<i64> {
        self.decode(|c| c.get_int())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.decode(|c| c.read_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.decode(|c| c.read_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.decode(|c| c.read_u32())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.decode(|c| c.read_u64())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.decode(|c| c.read_f64())
    }

    /// Borrow the next `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&[u8]> {
        let start = self.pos;
        self.decode(|c| c.take(n).map(|_| ()))?;
        Ok(&self.data[start..start + n])
    }

    /// Fill `buf` with the next raw bytes.
    pub fn read_raw(&mut self, buf: &mut [u8]) -> Result<()> {
        let bytes = self.read_bytes(buf.len())?;
        buf.copy_from_slice(bytes);
        Ok(())
    }

    /// Verify the checksum and release the source.
    ///
    /// Returns the checksum computed while decoding.
    pub fn close(self) -> Result<u32> {
        let computed = self.checksum.finish();
        let expected = self.header.trailer.checksum;
        if computed != expected {
            return Err(ContainerError::ChecksumMismatch { name: self.name.clone(), computed, expected });
        }
        tracing::debug!(name = %self.name, checksum = format_args!("{computed:08x}"), "container verified");
        Ok(computed)
    }
}

impl Drop for ContainerReader {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
        self.source.release();
    }
}
