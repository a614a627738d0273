use clap::{Parser, Subcommand};
use libpack::block::scan_frames;
use libpack::header::{Header, Trailer, HEADER_SIZE, TRAILER_LEN};
use libpack::{ChecksumAlgo, CodecId, ContainerOptions, ContainerReader, ContainerWriter, Registry, Sink, Source};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "libpack", about = "Compressed, checksummed working-library containers")]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the physical header and frame layout
    Info {
        input: PathBuf,
        /// The container was written to a stream (trailer at the end)
        #[arg(long)]
        stream: bool,
        #[arg(long)]
        json: bool,
    },
    /// Decode every block and check the checksum
    Verify {
        input: PathBuf,
        #[arg(long)]
        stream: bool,
        /// Codec: lz4 (default), zstd
        #[arg(short, long, default_value = "lz4")]
        codec: String,
        /// Checksum: adler32 (default), none
        #[arg(long, default_value = "adler32")]
        checksum: String,
    },
    /// Wrap a file in a container (`-` for stdin/stdout)
    Pack {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, default_value = "lz4")]
        codec: String,
        #[arg(long, default_value = "adler32")]
        checksum: String,
        /// Compression level (zstd 1-22; ignored for lz4)
        #[arg(short, long, default_value = "3")]
        level: i32,
    },
    /// Restore a file packed with `pack`
    Unpack {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// The container was written to a stream (trailer at the end)
        #[arg(long)]
        stream: bool,
        #[arg(short, long, default_value = "lz4")]
        codec: String,
        #[arg(long, default_value = "adler32")]
        checksum: String,
    },
}

#[derive(Serialize)]
struct InfoReport {
    path:       String,
    magic:      String,
    codec:      String,
    checksum:   String,
    length:     u32,
    digest:     String,
    frames:     usize,
    compressed: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let registry = Registry::new();
    // Partial outputs are removed if a command bails out early.
    let _guard = registry.shutdown_guard();

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, stream, json } => {
            let image = read_input(&input)?;
            if image.len() < HEADER_SIZE {
                return Err(format!("{}: shorter than a header", input.display()).into());
            }
            let mut header = Header::read(&image[..HEADER_SIZE])?;
            let mut end = image.len();
            if stream {
                if end < HEADER_SIZE + TRAILER_LEN {
                    return Err(format!("{}: stream ends before its trailer", input.display()).into());
                }
                end -= TRAILER_LEN;
                let mut tail = [0u8; TRAILER_LEN];
                tail.copy_from_slice(&image[end..]);
                header.trailer = Trailer::from_bytes(&tail);
            }
            let frames = scan_frames(&image[HEADER_SIZE..end])?;

            let report = InfoReport {
                path:       input.display().to_string(),
                magic:      hex::encode(header.magic),
                codec:      header.codec().map_or_else(|| format!("{:#04x}", header.codec_id), |c| c.name().to_owned()),
                checksum:   header.checksum_algo().map_or_else(|| header.checksum_id.to_string(), |c| c.name().to_owned()),
                length:     header.trailer.length,
                digest:     hex::encode(header.trailer.checksum.to_be_bytes()),
                frames:     frames.len(),
                compressed: frames.iter().map(|f| f.compressed_len).sum(),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("── Container ────────────────────────────────────────────");
                println!("  Path           {}", report.path);
                println!("  Magic          {}", report.magic);
                println!("  Codec          {}", report.codec);
                println!("  Checksum       {} ({})", report.checksum, report.digest);
                println!("  Length         {} B", report.length);
                println!("  Frames         {}", report.frames);
                println!("  Compressed     {} B", report.compressed);
            }
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { input, stream, codec, checksum } => {
            let options = parse_options(&codec, &checksum, libpack::config::DEFAULT_LEVEL)?;
            let reader = open_input(&input, stream, options, &registry)?;
            let (len, blocks) = (reader.len(), reader.blocks_decoded());
            let digest = reader.close()?;
            println!("{}: ok, {} B in {} block(s), checksum {:08x}", input.display(), len, blocks, digest);
        }

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { input, output, codec, checksum, level } => {
            let options = parse_options(&codec, &checksum, level)?;
            let data = read_input(&input)?;
            let mut writer = open_output(&output, options, &registry)?;
            writer.put_uint(data.len() as u64)?;
            writer.write_raw(&data)?;
            let blocks = writer.blocks_written();
            let digest = writer.close()?;
            tracing::info!(input = %input.display(), bytes = data.len(), blocks, digest = format_args!("{digest:08x}"), "packed");
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { input, output, stream, codec, checksum } => {
            let options = parse_options(&codec, &checksum, libpack::config::DEFAULT_LEVEL)?;
            let mut reader = open_input(&input, stream, options, &registry)?;
            let len = reader.get_uint()?;
            let data = reader.read_bytes(usize::try_from(len)?)?.to_vec();
            // Nothing is written until the content has been verified.
            reader.close()?;
            write_output(&output, &data)?;
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn read_input(path: &Path) -> io::Result<Vec<u8>> {
    if is_stdio(path) {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read(path)
    }
}

fn write_output(path: &Path, data: &[u8]) -> io::Result<()> {
    if is_stdio(path) {
        let mut out = io::stdout().lock();
        out.write_all(data)?;
        out.flush()
    } else {
        std::fs::write(path, data)
    }
}

/// Open a container for reading.  `stream` reads a regular file the way a
/// pipe is read, for containers captured from a stream.
fn open_input(
    path:     &Path,
    stream:   bool,
    options:  ContainerOptions,
    registry: &Arc<Registry>,
) -> libpack::Result<ContainerReader> {
    if is_stdio(path) {
        ContainerReader::new(Source::stream(io::stdin()), "<stdin>", options, registry)
    } else if stream {
        let name = path.display().to_string();
        let file = std::fs::File::open(path).map_err(|source| libpack::ContainerError::Io { name: name.clone(), op: "open", source })?;
        ContainerReader::new(Source::stream(file), name, options, registry)
    } else {
        ContainerReader::open(path, options, registry)
    }
}

fn open_output(path: &Path, options: ContainerOptions, registry: &Arc<Registry>) -> libpack::Result<ContainerWriter> {
    if is_stdio(path) {
        ContainerWriter::new(Sink::stream(io::stdout()), "<stdout>", options, registry)
    } else {
        ContainerWriter::create(path, options, registry)
    }
}

fn parse_options(codec: &str, checksum: &str, level: i32) -> Result<ContainerOptions, String> {
    let codec = CodecId::from_name(codec).ok_or_else(|| format!("unknown codec '{codec}'"))?;
    let checksum = ChecksumAlgo::from_name(checksum).ok_or_else(|| format!("unknown checksum '{checksum}'"))?;
    Ok(ContainerOptions::default().with_codec(codec).with_checksum(checksum).with_level(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpack_reads_captured_stream_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captured.lib");
        let options = ContainerOptions::default();
        let registry = Registry::new();

        // What `pack -o - > captured.lib` leaves on disk.
        let file = std::fs::File::create(&path).unwrap();
        let mut w = ContainerWriter::new(Sink::stream(file), "<stdout>", options, &registry).unwrap();
        w.put_uint(5).unwrap();
        w.write_raw(b"hello").unwrap();
        w.close().unwrap();

        let mut r = open_input(&path, true, options, &registry).unwrap();
        assert!(!r.is_seekable());
        assert_eq!(r.get_uint().unwrap(), 5);
        assert_eq!(r.read_bytes(5).unwrap(), b"hello");
        r.close().unwrap();

        // Read as a plain file, the zeroed in-place trailer declares no content.
        let plain = open_input(&path, false, options, &registry).unwrap();
        assert!(plain.is_empty());
    }

    #[test]
    fn unpack_accepts_stream_flag() {
        let cli = Cli::try_parse_from(["libpack", "unpack", "-i", "x.lib", "-o", "y", "--stream"]).unwrap();
        assert!(matches!(cli.command, Commands::Unpack { stream: true, .. }));
    }
}
