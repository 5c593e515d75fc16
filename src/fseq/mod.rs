// FSEQ v2 file decoding: the fixed 32-byte header and the variable
// table that sits between it and the channel data. Compression block
// handling lives in `comblock`.

pub mod comblock;

use crate::error::{PlayerError, Result};
use crate::rafile::RandomAccessFile;

/// Size of the fixed FSEQ header at offset 0.
pub const HEADER_SIZE: usize = 32;

const MAGIC: [u8; 4] = *b"PSEQ";
const SUPPORTED_MAJOR_VERSION: u8 = 2;

/// Minimum encoded size of a variable record: u16 size + two id bytes,
/// plus at least one value byte.
const VAR_HEADER_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zstd,
    /// Present in the format, never produced by the tools this player
    /// targets; playback of zlib sequences is rejected at block read.
    Zlib,
}

/// Decoded sequence metadata. Immutable once a file is opened.
#[derive(Debug, Clone)]
pub struct SeqHeader {
    pub channel_data_offset: u32,
    pub minor_version: u8,
    pub major_version: u8,
    pub variable_data_offset: u16,
    pub channel_count: u32,
    pub frame_count: u32,
    pub frame_step_time_ms: u16,
    pub compression: Compression,
    pub compression_block_count: u8,
    pub channel_range_count: u8,
    pub sequence_uid: u64,
}

impl SeqHeader {
    /// Frames per second implied by the frame step time.
    pub fn fps(&self) -> u32 {
        (1000 / self.frame_step_time_ms.max(1)) as u32
    }
}

/// Reads and validates the sequence header at the start of the file.
pub fn open(file: &RandomAccessFile) -> Result<SeqHeader> {
    let mut b = [0u8; HEADER_SIZE];
    let n = file.read_at(0, &mut b)?;
    if n < HEADER_SIZE {
        return Err(PlayerError::Syscall(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("short header read: {n}/{HEADER_SIZE} bytes"),
        )));
    }

    if b[0..4] != MAGIC {
        return Err(PlayerError::Decode("bad FSEQ magic".into()));
    }

    let major_version = b[7];
    if major_version != SUPPORTED_MAJOR_VERSION {
        return Err(PlayerError::Decode(format!(
            "unsupported FSEQ major version {major_version}"
        )));
    }

    let frame_step_time_ms = b[18] as u16;
    if frame_step_time_ms == 0 {
        return Err(PlayerError::Decode("frame step time must be >= 1ms".into()));
    }

    let compression = match b[20] {
        0 => Compression::None,
        1 => Compression::Zstd,
        2 => Compression::Zlib,
        other => {
            return Err(PlayerError::Decode(format!(
                "unknown compression type {other}"
            )))
        }
    };

    let seq = SeqHeader {
        channel_data_offset: u16::from_le_bytes([b[4], b[5]]) as u32,
        minor_version: b[6],
        major_version,
        variable_data_offset: u16::from_le_bytes([b[8], b[9]]),
        channel_count: u32::from_le_bytes([b[10], b[11], b[12], b[13]]),
        frame_count: u32::from_le_bytes([b[14], b[15], b[16], b[17]]),
        frame_step_time_ms,
        compression,
        compression_block_count: b[21],
        channel_range_count: b[22],
        sequence_uid: u64::from_le_bytes(b[24..32].try_into().unwrap()),
    };

    log::debug!(
        "opened FSEQ v{}.{} uid {:016x} ({} channel ranges declared)",
        seq.major_version,
        seq.minor_version,
        seq.sequence_uid,
        seq.channel_range_count,
    );

    Ok(seq)
}

/// Searches the variable table for the `mf` (media file) variable and
/// returns its value as a NUL-terminated string, or `None` if the
/// sequence does not name an audio track.
pub fn media_file(file: &RandomAccessFile, seq: &SeqHeader) -> Result<Option<String>> {
    let start = seq.variable_data_offset as u32;
    if seq.channel_data_offset < start {
        return Err(PlayerError::Decode(
            "variable table extends past channel data".into(),
        ));
    }

    let len = (seq.channel_data_offset - start) as usize;
    if len == 0 {
        return Ok(None);
    }

    let mut table = vec![0u8; len];
    let n = file.read_at(start as u64, &mut table)?;
    if n < len {
        return Err(PlayerError::Syscall(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("short variable table read: {n}/{len} bytes"),
        )));
    }

    let mut at = 0usize;
    // Records are packed without gaps; anything under 5 bytes at the
    // tail is padding.
    while len - at > VAR_HEADER_SIZE {
        let size = u16::from_le_bytes([table[at], table[at + 1]]) as usize;
        if size == 0 {
            break; // zero-size record terminates the table
        }
        if size <= VAR_HEADER_SIZE || at + size > len {
            return Err(PlayerError::Decode(format!(
                "malformed variable record of size {size} at offset {at}"
            )));
        }

        if table[at + 2] == b'm' && table[at + 3] == b'f' {
            let value = &table[at + VAR_HEADER_SIZE..at + size];
            let end = value.iter().position(|&c| c == 0).unwrap_or(value.len());
            return Ok(Some(String::from_utf8_lossy(&value[..end]).into_owned()));
        }

        at += size;
    }

    Ok(None)
}
