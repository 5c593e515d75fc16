// Fixed-capacity append buffer for assembling LOR packets before they
// are handed to the serial sink. Each packet is framed by a leading and
// trailing 0x00 stop byte; the buffer is rewound, not reallocated,
// after every flush.

/// Backing capacity. No single LOR packet emitted by this player comes
/// anywhere near this size; the headroom exists to batch many packets
/// per serial write.
pub const CAPACITY: usize = 2048;

/// Flush once the write head passes this fraction of the capacity.
const FLUSH_THRESHOLD: usize = (CAPACITY * 8) / 10;

pub struct MsgBuffer {
    buf: [u8; CAPACITY],
    head: usize,
    packets: usize,
}

impl Default for MsgBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MsgBuffer {
    pub fn new() -> Self {
        Self {
            buf: [0; CAPACITY],
            head: 0,
            packets: 0,
        }
    }

    /// Appends one packet payload, adding the stop-byte framing on both
    /// sides. Panics if the payload would overflow the buffer; callers
    /// are expected to flush between packet batches.
    pub fn append(&mut self, payload: &[u8]) {
        assert!(!payload.is_empty());
        assert!(
            self.head + payload.len() + 2 <= CAPACITY,
            "LOR buffer overflow: flush before appending"
        );

        self.buf[self.head] = 0x00;
        self.buf[self.head + 1..self.head + 1 + payload.len()].copy_from_slice(payload);
        self.buf[self.head + 1 + payload.len()] = 0x00;

        self.head += payload.len() + 2;
        self.packets += 1;
    }

    pub fn packets(&self) -> usize {
        self.packets
    }

    pub fn is_empty(&self) -> bool {
        self.packets == 0
    }

    /// Hands the accumulated packets to `write` and rewinds the head.
    /// With `force` the buffer flushes whenever it holds any packets;
    /// without it, only once the high-water threshold is passed.
    /// Returns the number of bytes flushed.
    pub fn flush_if<F: FnMut(&[u8])>(&mut self, force: bool, mut write: F) -> usize {
        let due = if force {
            self.packets > 0
        } else {
            self.head >= FLUSH_THRESHOLD
        };
        if !due {
            return 0;
        }

        let flushed = self.head;
        write(&self.buf[..self.head]);
        self.head = 0;
        self.packets = 0;
        flushed
    }
}
