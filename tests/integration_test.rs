use libpack::block::{scan_frames, BLOCK_UNIT, MIN_BLOCK};
use libpack::header::{HEADER_SIZE, TRAILER_LEN};
use libpack::{
    adler32, ChecksumAlgo, CodecId, ContainerError, ContainerOptions, ContainerReader, ContainerWriter,
    ErrorKind, Registry, Sink, Source,
};
use proptest::prelude::*;
use std::io::{self, Cursor, Write};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

/// In-memory stream sink whose bytes stay reachable after the writer is gone.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

#[derive(Debug, Clone)]
enum Item {
    Uint(u64),
    Int(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F64(f64),
    Raw(Vec<u8>),
}

fn item() -> impl Strategy<Value = Item> {
    prop_oneof![
        any::<u64>().prop_map(Item::Uint),
        any::<i64>().prop_map(Item::Int),
        any::<u8>().prop_map(Item::U8),
        any::<u16>().prop_map(Item::U16),
        any::<u32>().prop_map(Item::U32),
        any::<u64>().prop_map(Item::U64),
        any::<f64>().prop_map(Item::F64),
        prop::collection::vec(any::<u8>(), 0..3000).prop_map(Item::Raw),
    ]
}

fn put(w: &mut ContainerWriter, v: &Item) {
    match v {
        Item::Uint(x) => w.put_uint(*x),
        Item::Int(x)  => w.put_int(*x),
        Item::U8(x)   => w.write_u8(*x),
        Item::U16(x)  => w.write_u16(*x),
        Item::U32(x)  => w.write_u32(*x),
        Item::U64(x)  => w.write_u64(*x),
        Item::F64(x)  => w.write_f64(*x),
        Item::Raw(b)  => w.write_raw(b),
    }
    .unwrap();
}

fn check(r: &mut ContainerReader, v: &Item) {
    match v {
        Item::Uint(x) => assert_eq!(r.get_uint().unwrap(), *x),
        Item::Int(x)  => assert_eq!(r.get_int().unwrap(), *x),
        Item::U8(x)   => assert_eq!(r.read_u8().unwrap(), *x),
        Item::U16(x)  => assert_eq!(r.read_u16().unwrap(), *x),
        Item::U32(x)  => assert_eq!(r.read_u32().unwrap(), *x),
        Item::U64(x)  => assert_eq!(r.read_u64().unwrap(), *x),
        Item::F64(x)  => assert_eq!(r.read_f64().unwrap().to_bits(), x.to_bits()),
        Item::Raw(b)  => {
            let mut buf = vec![0u8; b.len()];
            r.read_raw(&mut buf).unwrap();
            assert_eq!(&buf, b);
        }
    }
}

/// Bytes that LZ4 cannot shortcut, so a flipped byte cannot decode to the
/// same content.
fn noisy(len: usize) -> Vec<u8> {
    let mut x = 0x2545_f491u32;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            x as u8
        })
        .collect()
}

fn write_file(path: &std::path::Path, options: ContainerOptions, data: &[u8]) -> u32 {
    let reg = Registry::new();
    let mut w = ContainerWriter::create(path, options, &reg).unwrap();
    w.write_raw(data).unwrap();
    w.close().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn roundtrip_through_file(values in prop::collection::vec(item(), 0..200), zstd in any::<bool>()) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unit.lib");
        let codec = if zstd { CodecId::Zstd } else { CodecId::Lz4 };
        let options = ContainerOptions::default().with_codec(codec);
        let reg = Registry::new();

        let mut w = ContainerWriter::create(&path, options, &reg).unwrap();
        for v in &values {
            put(&mut w, v);
        }
        let written = w.close().unwrap();

        let mut r = ContainerReader::open(&path, options, &reg).unwrap();
        for v in &values {
            check(&mut r, v);
        }
        prop_assert_eq!(r.remaining(), 0);
        prop_assert_eq!(r.close().unwrap(), written);
        prop_assert!(reg.is_empty());
    }
}

#[test]
fn varint_scenario_on_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("scenario.lib");
    let reg = Registry::new();

    let mut w = ContainerWriter::create(&path, ContainerOptions::default(), &reg).unwrap();
    w.put_uint(300).unwrap();
    w.put_int(-1).unwrap();
    let cs = w.close().unwrap();
    assert_eq!(cs, adler32(&[0xac, 0x02, 0x01]));

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..8], b"LPAKL\x01\x00\x00");
    assert_eq!(&bytes[8..12], &3u32.to_be_bytes());
    assert_eq!(&bytes[12..16], &cs.to_be_bytes());

    let mut r = ContainerReader::open(&path, ContainerOptions::default(), &reg).unwrap();
    assert!(r.is_seekable());
    assert_eq!(r.contents(), &[0xac, 0x02, 0x01]);
    assert_eq!(r.get_uint().unwrap(), 300);
    assert_eq!(r.get_int().unwrap(), -1);
    assert_eq!(r.close().unwrap(), cs);
}

#[test]
fn corrupted_magic_names_source() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.lib");
    write_file(&path, ContainerOptions::default(), b"payload");

    let mut bytes = std::fs::read(&path).unwrap();
    bytes[..4].copy_from_slice(b"ZZZZ");
    std::fs::write(&path, &bytes).unwrap();

    let err = ContainerReader::open(&path, ContainerOptions::default(), &Registry::new()).err().unwrap();
    assert!(matches!(err, ContainerError::BadMagic { found, .. } if &found == b"ZZZZ"));
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(err.to_string().contains(&path.display().to_string()));
}

#[test]
fn block_boundaries() {
    let dir = tempdir().unwrap();
    for (count, blocks) in [(BLOCK_UNIT - 1, 1), (BLOCK_UNIT, 1), (BLOCK_UNIT + 1, 2)] {
        let path = dir.path().join(format!("b{count}.lib"));
        let reg = Registry::new();
        let mut w = ContainerWriter::create(&path, ContainerOptions::default(), &reg).unwrap();
        for i in 0..count {
            w.write_u8(i as u8).unwrap();
        }
        w.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let frames = scan_frames(&bytes[HEADER_SIZE..]).unwrap();
        assert_eq!(frames.len(), blocks, "{count} bytes");

        let r = ContainerReader::open(&path, ContainerOptions::default(), &reg).unwrap();
        assert_eq!(r.len(), count);
        assert_eq!(r.blocks_decoded(), blocks as u64);
        assert!(r.contents().iter().enumerate().all(|(i, &b)| b == i as u8));
        r.close().unwrap();
    }
}

#[test]
fn values_never_straddle_blocks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("aligned.lib");
    let reg = Registry::new();
    let mut w = ContainerWriter::create(&path, ContainerOptions::default(), &reg).unwrap();
    w.write_raw(&vec![1u8; BLOCK_UNIT - 3]).unwrap();
    // Eight bytes do not fit in the three left: they open a new block.
    w.write_u64(u64::MAX).unwrap();
    assert_eq!(w.blocks_written(), 1);
    w.close().unwrap();

    let mut r = ContainerReader::open(&path, ContainerOptions::default(), &reg).unwrap();
    assert_eq!(r.len(), BLOCK_UNIT + 5);
    r.read_bytes(BLOCK_UNIT - 3).unwrap();
    assert_eq!(r.read_u64().unwrap(), u64::MAX);
    r.close().unwrap();
}

#[test]
fn large_blob_spans_blocks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("blob.lib");
    let data = noisy(3 * BLOCK_UNIT + 17);
    let cs = write_file(&path, ContainerOptions::default(), &data);
    assert_eq!(cs, adler32(&data));

    let reg = Registry::new();
    let mut r = ContainerReader::open(&path, ContainerOptions::default(), &reg).unwrap();
    assert_eq!(r.blocks_decoded(), 4);
    assert_eq!(r.read_bytes(data.len()).unwrap(), &data[..]);
    r.close().unwrap();
}

#[test]
fn length_prefixed_unit_blob_roundtrips() {
    let dir = tempdir().unwrap();
    for codec in [CodecId::Lz4, CodecId::Zstd] {
        let path = dir.path().join(format!("prefixed-{}.lib", codec.name()));
        let options = ContainerOptions::default().with_codec(codec);
        let reg = Registry::new();
        let blob = vec![0xaau8; BLOCK_UNIT];

        let mut w = ContainerWriter::create(&path, options, &reg).unwrap();
        w.put_uint(blob.len() as u64).unwrap();
        w.write_raw(&blob).unwrap();
        // The blob topped up the first block instead of sealing the prefix alone.
        assert_eq!(w.blocks_written(), 1);
        let written = w.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(scan_frames(&bytes[HEADER_SIZE..]).unwrap().len(), 2);

        let mut r = ContainerReader::open(&path, options, &reg).unwrap();
        assert_eq!(r.len(), BLOCK_UNIT + 3);
        assert_eq!(r.get_uint().unwrap(), BLOCK_UNIT as u64);
        assert_eq!(r.read_bytes(BLOCK_UNIT).unwrap(), &blob[..]);
        assert_eq!(r.close().unwrap(), written);
    }
}

#[test]
fn small_values_between_blobs_stay_aligned() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("mixed.lib");
    let reg = Registry::new();
    let blob = noisy(2 * BLOCK_UNIT + 5);

    let mut w = ContainerWriter::create(&path, ContainerOptions::default(), &reg).unwrap();
    for round in 0..3u8 {
        w.write_u8(round).unwrap();
        w.write_raw(&blob).unwrap();
    }
    w.close().unwrap();

    let mut r = ContainerReader::open(&path, ContainerOptions::default(), &reg).unwrap();
    for round in 0..3u8 {
        assert_eq!(r.read_u8().unwrap(), round);
        assert_eq!(r.read_bytes(blob.len()).unwrap(), &blob[..]);
    }
    assert_eq!(r.remaining(), 0);
    r.close().unwrap();
}

#[test]
fn stream_and_file_carry_same_content() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("seek.lib");
    let reg = Registry::new();
    let data = noisy(100_000);

    let file_cs = write_file(&path, ContainerOptions::default(), &data);

    let buf = SharedBuf::default();
    let mut w = ContainerWriter::new(Sink::stream(buf.clone()), "<pipe>", ContainerOptions::default(), &reg).unwrap();
    assert!(!w.is_seekable());
    w.write_raw(&data).unwrap();
    let stream_cs = w.close().unwrap();
    assert_eq!(stream_cs, file_cs);

    let streamed = buf.take();
    let on_disk = std::fs::read(&path).unwrap();
    // Same frames; only the trailer placement differs.
    assert_eq!(streamed.len(), on_disk.len() + TRAILER_LEN);
    assert_eq!(&streamed[HEADER_SIZE..on_disk.len()], &on_disk[HEADER_SIZE..]);
    assert_eq!(&streamed[8..16], &[0u8; 8]);
    assert_eq!(&streamed[streamed.len() - 8..], &on_disk[8..16]);

    let r = ContainerReader::new(Source::stream(Cursor::new(streamed)), "<pipe>", ContainerOptions::default(), &reg).unwrap();
    assert_eq!(r.contents(), &data[..]);
    assert_eq!(r.close().unwrap(), file_cs);
}

#[test]
fn short_tail_is_padded_invisibly() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tiny.lib");
    write_file(&path, ContainerOptions::default(), b"abc");

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[8..12], &3u32.to_be_bytes());
    let frames = scan_frames(&bytes[HEADER_SIZE..]).unwrap();
    assert_eq!(frames.len(), 1);

    // The frame decompresses to a full minimum block.
    let body = &bytes[HEADER_SIZE + 4..];
    let raw = lz4_flex::block::decompress(body, MIN_BLOCK).unwrap();
    assert_eq!(raw.len(), MIN_BLOCK);
    assert_eq!(&raw[..3], b"abc");

    let r = ContainerReader::open(&path, ContainerOptions::default(), &Registry::new()).unwrap();
    assert_eq!(r.contents(), b"abc");
    r.close().unwrap();
}

#[test]
fn empty_container_is_valid() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.lib");
    let cs = write_file(&path, ContainerOptions::default(), &[]);
    // Seed state: s1 = 1 in the high half, s2 = 0.
    assert_eq!(cs, 0x0001_0000);

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(scan_frames(&bytes[HEADER_SIZE..]).unwrap().len(), 1);

    let mut r = ContainerReader::open(&path, ContainerOptions::default(), &Registry::new()).unwrap();
    assert!(r.is_empty());
    assert!(matches!(r.read_u8(), Err(ContainerError::Decode { .. })));
    assert_eq!(r.close().unwrap(), 0x0001_0000);
}

#[test]
fn tampering_is_detected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tamper.lib");
    let data = noisy(4096);
    write_file(&path, ContainerOptions::default(), &data);
    let pristine = std::fs::read(&path).unwrap();

    let mut mismatches = 0;
    for pos in (HEADER_SIZE + 4..pristine.len()).step_by(97) {
        let mut bytes = pristine.clone();
        bytes[pos] ^= 0x40;
        std::fs::write(&path, &bytes).unwrap();

        // Either the frame no longer decodes or the checksum catches it.
        match ContainerReader::open(&path, ContainerOptions::default(), &Registry::new()) {
            Err(e) => assert_eq!(e.kind(), ErrorKind::Format, "{e}"),
            Ok(r) => match r.close() {
                Err(ContainerError::ChecksumMismatch { .. }) => mismatches += 1,
                Err(e) => panic!("unexpected error {e}"),
                Ok(_) => panic!("flip at {pos} went unnoticed"),
            },
        }
    }
    assert!(mismatches > 0);

    // A wrong stored checksum alone is also caught.
    let mut bytes = pristine;
    bytes[15] ^= 1;
    std::fs::write(&path, &bytes).unwrap();
    let r = ContainerReader::open(&path, ContainerOptions::default(), &Registry::new()).unwrap();
    let err = r.close().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Checksum);
}

#[test]
fn truncated_file_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cut.lib");
    write_file(&path, ContainerOptions::default(), &noisy(10_000));
    let bytes = std::fs::read(&path).unwrap();

    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    let err = ContainerReader::open(&path, ContainerOptions::default(), &Registry::new()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Format);

    std::fs::write(&path, &bytes[..10]).unwrap();
    let err = ContainerReader::open(&path, ContainerOptions::default(), &Registry::new()).err().unwrap();
    assert!(matches!(err, ContainerError::Truncated { .. }));
}

#[test]
fn mismatched_options_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("zstd.lib");
    let zstd = ContainerOptions::default().with_codec(CodecId::Zstd).with_level(19);
    write_file(&path, zstd, b"zstandard body");

    let err = ContainerReader::open(&path, ContainerOptions::default(), &Registry::new()).err().unwrap();
    assert!(matches!(err, ContainerError::UnexpectedCodec { found: b'Z', expected: b'L', .. }));

    let no_cs = zstd.with_checksum(ChecksumAlgo::None);
    let err = ContainerReader::open(&path, no_cs, &Registry::new()).err().unwrap();
    assert!(matches!(err, ContainerError::UnexpectedChecksum { found: 1, expected: 0, .. }));

    let r = ContainerReader::open(&path, zstd, &Registry::new()).unwrap();
    assert_eq!(r.contents(), b"zstandard body");
    r.close().unwrap();
}

#[test]
fn shutdown_removes_unfinished_writer() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out.lib");
    let input = dir.path().join("in.lib");
    write_file(&input, ContainerOptions::default(), b"kept");

    let reg = Registry::new();
    let mut w = ContainerWriter::create(&out, ContainerOptions::default(), &reg).unwrap();
    w.write_raw(&noisy(2 * BLOCK_UNIT)).unwrap();
    let r = ContainerReader::open(&input, ContainerOptions::default(), &reg).unwrap();
    assert_eq!(reg.len(), 2);

    let report = reg.shutdown();
    assert_eq!(report.released, 2);
    assert_eq!(report.removed, vec![out.clone()]);
    assert!(!out.exists());
    assert!(input.exists());
    assert_eq!(reg.shutdown().released, 0);

    // The writer's transport is gone; the reader already holds its content.
    let err = w.close().unwrap_err();
    assert!(matches!(err, ContainerError::Released { .. }));
    assert_eq!(r.contents(), b"kept");
    r.close().unwrap();
    assert!(!out.exists());
}

#[test]
fn dropped_writer_discards_target() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dropped.lib");
    let reg = Registry::new();
    {
        let mut w = ContainerWriter::create(&path, ContainerOptions::default(), &reg).unwrap();
        w.put_uint(1).unwrap();
        assert!(path.exists());
    }
    assert!(!path.exists());
    assert!(reg.is_empty());
}

#[test]
fn guard_cleans_up_on_panic() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("panicked.lib");
    let reg = Registry::new();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _guard = reg.shutdown_guard();
        let w = ContainerWriter::create(&path, ContainerOptions::default(), &reg).unwrap();
        std::mem::forget(w);
        panic!("compiler crashed");
    }));
    assert!(result.is_err());
    assert!(!path.exists());
    assert!(reg.is_empty());
}
