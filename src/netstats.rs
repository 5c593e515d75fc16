// Network output statistics. Accumulates serial write volume over the
// current status window and estimates how many bytes the cell-grouping
// pass avoided putting on the wire, compared to emitting one
// channel effect per circuit.

/// Framed size of a single-channel set-intensity packet: stop byte,
/// unit, opcode, level, channel address, stop byte.
const UNGROUPED_PACKET_SIZE: u64 = 6;

/// Framed size of a channel-set set-intensity packet.
const GROUPED_PACKET_SIZE: u64 = 8;

#[derive(Debug, Default)]
pub struct NetStats {
    written: u64,
    packets: u64,
    saved: u64,
}

impl NetStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records bytes flushed to the serial sink.
    pub fn add_written(&mut self, bytes: u64) {
        self.written += bytes;
    }

    /// Records a single emitted packet (heartbeat, unit effect).
    pub fn record_packet(&mut self) {
        self.packets += 1;
    }

    /// Records one emitted group effect covering `size` cells.
    pub fn record_group(&mut self, size: usize) {
        self.packets += 1;
        if size > 1 {
            // one channel-set packet replaced `size` single-channel packets
            self.saved += UNGROUPED_PACKET_SIZE * size as u64 - GROUPED_PACKET_SIZE;
        }
    }

    /// Formats the window's totals and resets them.
    pub fn pop_summary(&mut self) -> String {
        let summary = format!(
            "kbps: {:.2} ({} packets, saved {:.2} kb)",
            self.written as f64 / 1024.0,
            self.packets,
            self.saved as f64 / 1024.0,
        );
        *self = Self::default();
        summary
    }
}
