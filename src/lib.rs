pub mod error;
pub mod checksum;
pub mod primitive;
pub mod codec;
pub mod header;
pub mod block;
pub mod transport;
pub mod registry;
pub mod config;
pub mod io_stream;
pub mod library;

pub use error::{ContainerError, ErrorKind, Result};
pub use checksum::{adler32, Checksum, ChecksumAlgo};
pub use codec::{CodecId, get_codec};
pub use header::{Header, Trailer};
pub use block::{BLOCK_UNIT, SPILL_CAPACITY};
pub use transport::{Sink, Source};
pub use registry::{HandleId, Registry, ShutdownGuard, ShutdownReport};
pub use config::ContainerOptions;
pub use io_stream::{ContainerReader, ContainerWriter};
pub use library::WorkLibrary;
