//! Where container bytes go to and come from.
//!
//! A transport is either *seekable* (a regular file: the writer patches the
//! trailer in place, the reader maps the file) or a *stream* (pipe, FIFO,
//! socket, stdout, anything else: the writer appends the trailer, the reader
//! slurps everything and takes the trailer from the end).
//!
//! Each side decides from its own handle.  Nothing about the transport is
//! recorded in the container, so a stream must be read back as a stream.

use std::fs::File;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

use memmap2::Mmap;

/// Destination of a container being written.
pub enum Sink {
    Seekable(File),
    Stream(Box<dyn Write + Send>),
}

impl Sink {
    /// Classify an open file: regular files are seekable, everything else
    /// (FIFOs, character devices, sockets) is treated as a stream.
    pub fn from_file(file: File) -> io::Result<Self> {
        if file.metadata()?.is_file() {
            Ok(Sink::Seekable(file))
        } else {
            Ok(Sink::Stream(Box::new(file)))
        }
    }

    pub fn stream<W: Write + Send + 'static>(writer: W) -> Self {
        Sink::Stream(Box::new(writer))
    }

    pub fn is_seekable(&self) -> bool {
        matches!(self, Sink::Seekable(_))
    }

    pub fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::Seekable(f) => f,
            Sink::Stream(w)   => w.as_mut(),
        }
    }
}

/// Origin of a container being read.
pub enum Source {
    Seekable(File),
    Stream(Box<dyn Read + Send>),
}

impl Source {
    /// Same classification as [`Sink::from_file`].
    pub fn from_file(file: File) -> io::Result<Self> {
        if file.metadata()?.is_file() {
            Ok(Source::Seekable(file))
        } else {
            Ok(Source::Stream(Box::new(file)))
        }
    }

    pub fn stream<R: Read + Send + 'static>(reader: R) -> Self {
        Source::Stream(Box::new(reader))
    }

    pub fn is_seekable(&self) -> bool {
        matches!(self, Source::Seekable(_))
    }

    pub fn reader(&mut self) -> &mut dyn Read {
        match self {
            Source::Seekable(f) => f,
            Source::Stream(r)   => r.as_mut(),
        }
    }
}

/// The whole physical image of a container, header included.
pub enum Image {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl std::ops::Deref for Image {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Image::Mapped(m) => m,
            Image::Owned(v)  => v,
        }
    }
}

/// Initial capacity for slurping a stream.
pub const SLURP_INITIAL: usize = 16 * 1024;

/// Map a regular file in full.
pub fn map_file(file: &File) -> io::Result<Image> {
    // SAFETY: the mapping is read-only and dropped before the handle is
    // closed; a concurrent truncation by another process is outside the
    // single-writer contract.
    let map = unsafe { Mmap::map(file)? };
    Ok(Image::Mapped(map))
}

/// Read a stream to its end, prefixed by bytes already consumed from it.
pub fn slurp(prefix: &[u8], reader: &mut dyn Read) -> io::Result<Image> {
    let mut buf = Vec::with_capacity(SLURP_INITIAL.max(prefix.len()));
    buf.extend_from_slice(prefix);
    // `read_to_end` grows the buffer geometrically.
    reader.read_to_end(&mut buf)?;
    Ok(Image::Owned(buf))
}

/// Transport slot shared between a handle and the registry.
///
/// The handle holds the only strong reference; the registry keeps a `Weak`
/// so that shutdown can release the OS resource of a handle still in use.
pub type Slot<T> = Arc<Mutex<Option<T>>>;

pub fn slot<T>(value: T) -> Slot<T> {
    Arc::new(Mutex::new(Some(value)))
}

/// Something whose OS resource can be released early.
pub trait Release: Send + Sync {
    fn release(&self) -> bool;
}

impl<T: Send> Release for Mutex<Option<T>> {
    fn release(&self) -> bool {
        self.lock().unwrap_or_else(PoisonError::into_inner).take().is_some()
    }
}
