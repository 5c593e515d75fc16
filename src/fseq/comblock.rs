// Compression block table handling. Zstd-compressed sequences store
// their channel data as a series of independently compressed blocks; an
// 8-byte-per-entry table at offset 32 records each block's first frame
// id and compressed size. Encoders are known to pad the table with
// trailing zero-size entries, so the header's block count is advisory.

use std::io::Read;

use crate::error::{PlayerError, Result};
use crate::fseq::{Compression, SeqHeader, HEADER_SIZE};
use crate::rafile::RandomAccessFile;

/// Size of one compression block table entry.
const ENTRY_SIZE: usize = 8;

#[derive(Debug, Clone, Copy)]
struct BlockEntry {
    #[allow(dead_code)]
    first_frame_id: u32,
    size: u32,
}

fn parse_entry(b: &[u8]) -> BlockEntry {
    BlockEntry {
        first_frame_id: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        size: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
    }
}

/// Reads the first `n` table entries, failing on a short read.
fn read_entries(file: &RandomAccessFile, n: usize) -> Result<Vec<BlockEntry>> {
    let mut table = vec![0u8; n * ENTRY_SIZE];
    let read = file.read_at(HEADER_SIZE as u64, &mut table)?;
    if read < table.len() {
        return Err(PlayerError::Syscall(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("short compression block table read: {read}/{} bytes", table.len()),
        )));
    }
    Ok(table.chunks_exact(ENTRY_SIZE).map(parse_entry).collect())
}

/// Returns the number of playable compression blocks: the count from
/// the header with trailing zero-size padding entries trimmed off.
pub fn count(file: &RandomAccessFile, seq: &SeqHeader) -> Result<u32> {
    let declared = seq.compression_block_count as usize;
    if declared == 0 {
        return Ok(0);
    }

    let entries = read_entries(file, declared)?;
    let effective = entries
        .iter()
        .position(|e| e.size == 0)
        .unwrap_or(declared);

    if effective < declared {
        log::debug!("corrected compression block count {declared}->{effective}");
    }

    Ok(effective as u32)
}

/// Computes the absolute byte address and compressed size of block
/// `index` by summing the sizes of all leading table entries.
fn find_absolute_addr(
    file: &RandomAccessFile,
    seq: &SeqHeader,
    index: u32,
) -> Result<(u64, u32)> {
    if index >= seq.compression_block_count as u32 {
        return Err(PlayerError::Range(format!(
            "compression block {index} out of bounds ({} declared)",
            seq.compression_block_count
        )));
    }

    let entries = read_entries(file, index as usize + 1)?;

    let mut addr = seq.channel_data_offset as u64;
    let mut size = 0u32;
    for (i, e) in entries.iter().enumerate() {
        if e.size == 0 {
            return Err(PlayerError::Decode(format!(
                "compression block {i} has zero size"
            )));
        }
        size = e.size;
        if (i as u32) < index {
            addr += e.size as u64;
        }
    }

    Ok((addr, size))
}

/// Reads compression block `index` and decompresses it into an ordered
/// list of owned frame buffers of `channel_count` bytes each.
pub fn read_block(
    file: &RandomAccessFile,
    seq: &SeqHeader,
    index: u32,
) -> Result<Vec<Vec<u8>>> {
    match seq.compression {
        Compression::Zstd => read_block_zstd(file, seq, index),
        Compression::None | Compression::Zlib => Err(PlayerError::Unsupported(format!(
            "cannot block-read {:?}-compressed sequence",
            seq.compression
        ))),
    }
}

fn read_block_zstd(
    file: &RandomAccessFile,
    seq: &SeqHeader,
    index: u32,
) -> Result<Vec<Vec<u8>>> {
    let (addr, size) = find_absolute_addr(file, seq, index)?;

    let mut compressed = vec![0u8; size as usize];
    let read = file.read_at(addr, &mut compressed)?;
    if read < compressed.len() {
        return Err(PlayerError::Syscall(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("short compression block read: {read}/{size} bytes"),
        )));
    }

    let mut decoder = zstd::stream::read::Decoder::new(compressed.as_slice())
        .map_err(|e| PlayerError::Zstd(e.to_string()))?;
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| PlayerError::Zstd(e.to_string()))?;

    // A block holds whole frames only; anything else means the stream
    // decompressed incorrectly.
    let frame_size = seq.channel_count as usize;
    if frame_size == 0 || decompressed.len() % frame_size != 0 {
        return Err(PlayerError::Decode(format!(
            "decompressed block length {} is not a multiple of the frame size {frame_size}",
            decompressed.len()
        )));
    }

    Ok(decompressed
        .chunks_exact(frame_size)
        .map(|f| f.to_vec())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fseq::tests::{write_test_file, TestHeader};
    use crate::fseq::open;
    use crate::rafile::OpenMode;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lumen-comblock-{}-{}", std::process::id(), name))
    }

    fn block_entry(first_frame_id: u32, size: u32) -> Vec<u8> {
        let mut b = Vec::with_capacity(ENTRY_SIZE);
        b.extend_from_slice(&first_frame_id.to_le_bytes());
        b.extend_from_slice(&size.to_le_bytes());
        b
    }

    #[test]
    fn test_count_trims_trailing_padding_entries() {
        let mut extra = Vec::new();
        extra.extend_from_slice(&block_entry(0, 100));
        extra.extend_from_slice(&block_entry(250, 80));
        extra.extend_from_slice(&block_entry(0, 0));
        extra.extend_from_slice(&block_entry(0, 0));

        let path = temp_path("count");
        write_test_file(
            &path,
            &TestHeader {
                compression_type: 1,
                compression_block_count: 4,
                channel_data_offset: 32 + extra.len() as u32,
                ..Default::default()
            },
            &extra,
        );

        let f = RandomAccessFile::open(&path, OpenMode::Read).unwrap();
        let seq = open(&f).unwrap();
        assert_eq!(count(&f, &seq).unwrap(), 2);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_zstd_block_reassembles_into_ordered_frames() {
        // 250 frames of 16 channels, the k-th frame filled with k % 251.
        let channel_count = 16u32;
        let frames = 250usize;
        let mut raw = Vec::with_capacity(frames * channel_count as usize);
        for k in 0..frames {
            raw.extend(std::iter::repeat((k % 251) as u8).take(channel_count as usize));
        }
        let compressed = zstd::stream::encode_all(raw.as_slice(), 1).unwrap();

        let mut extra = Vec::new();
        extra.extend_from_slice(&block_entry(0, compressed.len() as u32));
        let channel_data_offset = 32 + extra.len() as u32;
        extra.extend_from_slice(&compressed);

        let path = temp_path("zstd");
        write_test_file(
            &path,
            &TestHeader {
                channel_count,
                frame_count: frames as u32,
                compression_type: 1,
                compression_block_count: 1,
                channel_data_offset,
                ..Default::default()
            },
            &extra,
        );

        let f = RandomAccessFile::open(&path, OpenMode::Read).unwrap();
        let seq = open(&f).unwrap();
        let list = read_block(&f, &seq, 0).unwrap();
        assert_eq!(list.len(), frames);
        for (k, frame) in list.iter().enumerate() {
            assert_eq!(frame.len(), channel_count as usize);
            assert!(frame.iter().all(|&v| v == (k % 251) as u8));
        }

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_out_of_bounds_block_index_is_range_error() {
        let extra = block_entry(0, 10);
        let path = temp_path("range");
        write_test_file(
            &path,
            &TestHeader {
                compression_type: 1,
                compression_block_count: 1,
                channel_data_offset: 32 + extra.len() as u32,
                ..Default::default()
            },
            &extra,
        );

        let f = RandomAccessFile::open(&path, OpenMode::Read).unwrap();
        let seq = open(&f).unwrap();
        assert!(matches!(
            read_block(&f, &seq, 1),
            Err(PlayerError::Range(_))
        ));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_uncompressed_sequence_rejects_block_reads() {
        let extra = block_entry(0, 10);
        let path = temp_path("nosup");
        write_test_file(
            &path,
            &TestHeader {
                compression_type: 0,
                compression_block_count: 1,
                channel_data_offset: 32 + extra.len() as u32,
                ..Default::default()
            },
            &extra,
        );

        let f = RandomAccessFile::open(&path, OpenMode::Read).unwrap();
        let seq = open(&f).unwrap();
        assert!(matches!(
            read_block(&f, &seq, 0),
            Err(PlayerError::Unsupported(_))
        ));

        std::fs::remove_file(&path).unwrap();
    }
}
