// Channel range map: remaps raw sequence channel indices onto physical
// LOR unit + circuit addresses. The file is a JSON array of range
// entries; declaration order matters because ranges may overlap and the
// first match wins.

use std::path::Path;

use serde::Deserialize;

use crate::error::{PlayerError, Result};
use crate::rafile::{OpenMode, RandomAccessFile};

#[derive(Debug, Clone, Deserialize)]
struct SpanDe {
    from: u32,
    to: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct EntryDe {
    index: SpanDe,
    circuit: SpanDe,
    unit: u8,
}

/// One contiguous index range mapped linearly onto a circuit range of
/// equal length on a single unit.
#[derive(Debug, Clone)]
pub struct ChannelRange {
    index: (u32, u32),
    circuit: (u16, u16),
    unit: u8,
}

#[derive(Debug, Clone)]
pub struct ChannelMap {
    ranges: Vec<ChannelRange>,
}

impl ChannelMap {
    /// Parses a channel map from its JSON text. Rejects anything that is
    /// not an array of complete entries, and any entry whose index and
    /// circuit ranges differ in length.
    pub fn parse(s: &str) -> Result<Self> {
        let entries: Vec<EntryDe> =
            serde_json::from_str(s).map_err(|e| PlayerError::InvalidFormat(e.to_string()))?;

        let mut ranges = Vec::with_capacity(entries.len());
        for (i, e) in entries.iter().enumerate() {
            let index_len = e.index.to.wrapping_sub(e.index.from);
            let circuit_len = e.circuit.to.wrapping_sub(e.circuit.from);
            if index_len != circuit_len {
                return Err(PlayerError::InvalidFormat(format!(
                    "entry {i}: index range length {index_len} != circuit range length {circuit_len}"
                )));
            }
            if e.circuit.to > u16::MAX as u32 {
                return Err(PlayerError::InvalidFormat(format!(
                    "entry {i}: circuit {} exceeds the 16-bit circuit space",
                    e.circuit.to
                )));
            }
            ranges.push(ChannelRange {
                index: (e.index.from, e.index.to),
                circuit: (e.circuit.from as u16, e.circuit.to as u16),
                unit: e.unit,
            });
        }

        Ok(Self { ranges })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file = RandomAccessFile::open(path, OpenMode::Read)?;
        let size = file.size()? as usize;

        let mut b = vec![0u8; size];
        let n = file.read_at(0, &mut b)?;
        if n < size {
            return Err(PlayerError::Syscall(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("short channel map read: {n}/{size} bytes"),
            )));
        }

        let text = std::str::from_utf8(&b)
            .map_err(|e| PlayerError::InvalidFormat(e.to_string()))?;
        Self::parse(text)
    }

    /// Remaps a sequence channel index to `(unit, circuit)`. Walks the
    /// entries in declaration order and returns the first hit.
    pub fn lookup(&self, id: u32) -> Option<(u8, u16)> {
        for r in &self.ranges {
            if id >= r.index.0 && id <= r.index.1 {
                return Some((r.unit, r.circuit.0 + (id - r.index.0) as u16));
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = r#"[
        {"index": {"from": 0, "to": 15}, "circuit": {"from": 1, "to": 16}, "unit": 20},
        {"index": {"from": 16, "to": 19}, "circuit": {"from": 1, "to": 4}, "unit": 21}
    ]"#;

    #[test]
    fn test_lookup_is_linear_within_a_range() {
        let map = ChannelMap::parse(MAP).unwrap();
        for id in 0..16 {
            assert_eq!(map.lookup(id), Some((20, 1 + id as u16)));
        }
        assert_eq!(map.lookup(16), Some((21, 1)));
        assert_eq!(map.lookup(19), Some((21, 4)));
        assert_eq!(map.lookup(20), None);
    }

    #[test]
    fn test_first_matching_range_wins() {
        let overlapping = r#"[
            {"index": {"from": 0, "to": 7}, "circuit": {"from": 1, "to": 8}, "unit": 1},
            {"index": {"from": 4, "to": 11}, "circuit": {"from": 9, "to": 16}, "unit": 2}
        ]"#;
        let map = ChannelMap::parse(overlapping).unwrap();
        assert_eq!(map.lookup(5), Some((1, 6)));
        assert_eq!(map.lookup(8), Some((2, 13)));
    }

    #[test]
    fn test_mismatched_range_lengths_are_rejected() {
        let bad = r#"[
            {"index": {"from": 0, "to": 10}, "circuit": {"from": 1, "to": 4}, "unit": 1}
        ]"#;
        assert!(matches!(
            ChannelMap::parse(bad),
            Err(PlayerError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_schema_violations_are_rejected() {
        // root is not an array
        assert!(ChannelMap::parse(r#"{"unit": 1}"#).is_err());
        // element is not an object
        assert!(ChannelMap::parse(r#"[42]"#).is_err());
        // missing required field
        assert!(ChannelMap::parse(r#"[{"index": {"from": 0, "to": 0}, "unit": 1}]"#).is_err());
    }

    #[test]
    fn test_empty_map_is_valid() {
        let map = ChannelMap::parse("[]").unwrap();
        assert!(map.is_empty());
        assert_eq!(map.lookup(0), None);
    }
}
