//! Linear container scan: integrity verification and index rebuild.

use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Instant;

use blobpack_core::BlobHash;
use tracing::{debug, warn};

use crate::codec;
use crate::error::{StoreError, StoreResult};
use crate::index::BlobPos;
use crate::packed::{self, FrameHeader, CONTAINER_MAGIC, FRAME_OVERHEAD};

/// One verified frame handed to the scan callback.
#[derive(Debug)]
pub struct ScanEntry {
    /// Position of the frame.
    pub pos: BlobPos,
    /// Frame flag bits.
    pub flags: u8,
    /// Verified plaintext hash.
    pub hash: BlobHash,
    /// Plaintext payload.
    pub data: Vec<u8>,
}

/// Outcome of a full scan pass.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Number of containers walked.
    pub containers: u32,
    /// Number of live frames that verified.
    pub blobs: u64,
    /// Positions of frames whose recomputed hash disagreed with the frame
    /// header, whose payload could not be decoded, or which were truncated.
    pub corrupted: Vec<BlobPos>,
}

/// Walk every container in ascending order, verify each frame and call
/// `iter_fn` with its contents. Tombstoned frames are skipped without
/// verification. Corruption is aggregated over the whole pass and reported
/// in the returned [`ScanReport`]; only I/O and callback errors abort the
/// scan early.
///
/// `deadline`, when set, is checked between frames; exceeding it returns
/// [`StoreError::Canceled`].
pub fn scan_containers<F>(
    dir: &Path,
    deadline: Option<Instant>,
    mut iter_fn: F,
) -> StoreResult<ScanReport>
where
    F: FnMut(&ScanEntry) -> StoreResult<()>,
{
    let mut report = ScanReport::default();

    let mut n = 0u32;
    while let Some(file) = packed::open_container_read(dir, n)? {
        // open_container_read consumed the magic; continue from there.
        let mut reader = BufReader::new(file);
        let mut offset = CONTAINER_MAGIC.len() as u64;
        let mut indexed = 0u64;

        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(StoreError::Canceled);
                }
            }

            let mut prefix = [0u8; FRAME_OVERHEAD];
            match reader.read_exact(&mut prefix) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let header = FrameHeader::parse(&prefix);
            let pos = BlobPos {
                n,
                offset,
                size: header.size,
            };

            let mut payload = vec![0u8; header.size as usize];
            if let Err(e) = reader.read_exact(&mut payload) {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    // Trailing partial frame (interrupted append). Frame
                    // boundaries cannot be resynchronized past this point.
                    warn!(container = n, offset, "truncated frame, stopping container scan");
                    report.corrupted.push(pos);
                    break;
                }
                return Err(e.into());
            }
            offset += FRAME_OVERHEAD as u64 + header.size as u64;

            if header.is_deleted() {
                continue;
            }

            let plain = if header.is_compressed() {
                match codec::decompress(&payload) {
                    Ok(plain) => plain,
                    Err(e) => {
                        warn!(container = n, offset = pos.offset, error = %e, "undecodable payload");
                        report.corrupted.push(pos);
                        continue;
                    }
                }
            } else {
                payload
            };

            let hash = BlobHash::compute(&plain);
            if hash.as_bytes() != &header.hash {
                warn!(
                    container = n,
                    offset = pos.offset,
                    expected = %BlobHash(header.hash),
                    actual = %hash,
                    "frame hash mismatch"
                );
                report.corrupted.push(pos);
                continue;
            }

            iter_fn(&ScanEntry {
                pos,
                flags: header.flags,
                hash,
                data: plain,
            })?;
            indexed += 1;
        }

        debug!(container = n, blobs = indexed, "container scanned");
        report.blobs += indexed;
        n += 1;
    }
    report.containers = n;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packed::{encode_frame, flags, PackedWriter};

    fn write_blobs(dir: &Path, payloads: &[&[u8]]) -> Vec<(BlobHash, BlobPos)> {
        let (mut writer, _readers) = PackedWriter::open(dir, 1 << 20).unwrap();
        payloads
            .iter()
            .map(|payload| {
                let hash = BlobHash::compute(payload);
                let frame = encode_frame(hash.as_bytes(), 0, payload);
                let (n, offset) = writer.append_frame(&frame).unwrap();
                (
                    hash,
                    BlobPos {
                        n,
                        offset,
                        size: payload.len() as u32,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn scan_yields_every_live_frame() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_blobs(dir.path(), &[b"a", b"bb", b"ccc"]);

        let mut seen = Vec::new();
        let report = scan_containers(dir.path(), None, |entry| {
            assert_eq!(entry.flags, 0);
            seen.push((entry.hash, entry.pos));
            Ok(())
        })
        .unwrap();

        assert_eq!(report.blobs, 3);
        assert_eq!(report.containers, 1);
        assert!(report.corrupted.is_empty());
        assert_eq!(seen, written);
    }

    #[test]
    fn scan_skips_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_blobs(dir.path(), &[b"keep", b"drop"]);

        let (mut writer, _readers) = PackedWriter::open(dir.path(), 1 << 20).unwrap();
        writer.mark_deleted(&written[1].1).unwrap();

        let mut seen = Vec::new();
        let report = scan_containers(dir.path(), None, |entry| {
            seen.push(entry.hash);
            Ok(())
        })
        .unwrap();
        assert_eq!(report.blobs, 1);
        assert_eq!(seen, vec![written[0].0]);
    }

    #[test]
    fn scan_reports_flipped_byte() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_blobs(dir.path(), &[b"pristine", b"damaged!"]);
        let victim = written[1].1;

        // Flip one payload byte on disk.
        let path = packed::container_path(dir.path(), 0);
        let mut raw = std::fs::read(&path).unwrap();
        let payload_start = victim.offset as usize + FRAME_OVERHEAD;
        raw[payload_start] ^= 0xff;
        std::fs::write(&path, &raw).unwrap();

        let mut seen = Vec::new();
        let report = scan_containers(dir.path(), None, |entry| {
            seen.push(entry.hash);
            Ok(())
        })
        .unwrap();

        assert_eq!(seen, vec![written[0].0]);
        assert_eq!(report.corrupted, vec![victim]);
    }

    #[test]
    fn scan_reports_truncated_tail() {
        let dir = tempfile::tempdir().unwrap();
        write_blobs(dir.path(), &[b"whole frame"]);

        // Append a header claiming more payload than exists.
        let path = packed::container_path(dir.path(), 0);
        let mut raw = std::fs::read(&path).unwrap();
        let tail_offset = raw.len() as u64;
        let hash = BlobHash::compute(b"never finished");
        let frame = encode_frame(hash.as_bytes(), 0, b"never finished");
        raw.extend_from_slice(&frame[..FRAME_OVERHEAD + 4]);
        std::fs::write(&path, &raw).unwrap();

        let report = scan_containers(dir.path(), None, |_| Ok(())).unwrap();
        assert_eq!(report.blobs, 1);
        assert_eq!(report.corrupted.len(), 1);
        assert_eq!(report.corrupted[0].offset, tail_offset);
    }

    #[test]
    fn scan_honors_deadline() {
        let dir = tempfile::tempdir().unwrap();
        write_blobs(dir.path(), &[b"one", b"two"]);

        let past = Instant::now() - std::time::Duration::from_secs(1);
        match scan_containers(dir.path(), Some(past), |_| Ok(())) {
            Err(StoreError::Canceled) => {}
            other => panic!("expected Canceled, got {other:?}"),
        }
    }

    #[test]
    fn scan_decompresses_flagged_frames() {
        let dir = tempfile::tempdir().unwrap();
        let plain = b"compressible compressible compressible".to_vec();
        let packed_payload = codec::compress(&plain).unwrap();
        let hash = BlobHash::compute(&plain);

        let (mut writer, _readers) = PackedWriter::open(dir.path(), 1 << 20).unwrap();
        let frame = encode_frame(hash.as_bytes(), flags::COMPRESSED, &packed_payload);
        writer.append_frame(&frame).unwrap();

        let mut seen = Vec::new();
        scan_containers(dir.path(), None, |entry| {
            seen.push((entry.hash, entry.data.clone()));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![(hash, plain)]);
    }
}
