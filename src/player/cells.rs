// Cell table: one record per raw sequence channel index, carrying its
// physical (unit, section, offset) address and current intensity. A
// linking pass fuses neighboring cells that share unit, section and
// intensity so the serializer can emit one channel-set effect per run
// instead of one effect per circuit.

use crate::cmap::ChannelMap;

#[derive(Debug, Clone, Copy, Default)]
struct Cell {
    /// Index is covered by the channel map.
    valid: bool,
    /// Fused with the next neighboring cell for this frame.
    linked: bool,
    /// Intensity changed since the previous frame. Not consulted by the
    /// grouping pass yet; see the TODO in `next_group`.
    #[allow(dead_code)]
    outdated: bool,
    unit: u8,
    /// (circuit - 1) / 16, the 16-channel bank within the unit.
    section: u8,
    /// (circuit - 1) % 16, the bit position within the bank.
    offset: u8,
    intensity: u8,
}

/// A run of linked cells emitted as one effect: all share `unit`,
/// `section` and `intensity`, with `channel_bits` selecting the covered
/// offsets within the section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellGroup {
    pub unit: u8,
    pub section: u8,
    pub channel_bits: u16,
    pub intensity: u8,
    pub size: usize,
}

pub struct CellTable {
    cells: Vec<Cell>,
}

impl CellTable {
    /// Builds the table by resolving every sequence index through the
    /// channel map. Unmapped indexes stay invalid but keep their slot so
    /// indexing remains 1-to-1 with frame data.
    pub fn new(cmap: &ChannelMap, size: u32) -> Self {
        let mut cells = vec![Cell::default(); size as usize];

        let mut configured = 0u32;
        for (i, cell) in cells.iter_mut().enumerate() {
            let Some((unit, circuit)) = cmap.lookup(i as u32) else {
                log::warn!("channel mapping does not cover index {i}");
                continue;
            };
            debug_assert!(circuit > 0);

            cell.valid = true;
            cell.unit = unit;
            cell.section = ((circuit - 1) / 16) as u8;
            cell.offset = ((circuit - 1) % 16) as u8;
            cell.intensity = 0;
            configured += 1;
        }

        log::info!("configured {configured}/{size} indexes");

        Self { cells }
    }

    /// Updates a cell's intensity. The cell is only marked outdated when
    /// the value actually changed, which keeps equal-intensity runs
    /// stable for the linking pass.
    pub fn set(&mut self, index: usize, intensity: u8) {
        let cell = &mut self.cells[index];
        if !cell.valid || cell.intensity == intensity {
            return;
        }
        cell.intensity = intensity;
        cell.outdated = true;
    }

    /// Links every cell to its next neighbor when both are valid and
    /// share unit, section and intensity. Run once per frame, after all
    /// `set` calls and before group iteration.
    pub fn link_all(&mut self) {
        for i in 0..self.cells.len() {
            let linked = self.cells[i].valid
                && i + 1 < self.cells.len()
                && linkable(&self.cells[i], &self.cells[i + 1]);
            self.cells[i].linked = linked;
        }
    }

    /// Returns the next group of linked cells at or after `*cursor`,
    /// advancing the cursor past it. Iterating from cursor 0 until
    /// `None` visits every valid cell exactly once.
    pub fn next_group(&self, cursor: &mut usize) -> Option<CellGroup> {
        while *cursor < self.cells.len() && !self.cells[*cursor].valid {
            *cursor += 1;
        }
        if *cursor >= self.cells.len() {
            return None;
        }

        let mut group = CellGroup::default();
        loop {
            let cell = &self.cells[*cursor];
            debug_assert!(cell.valid);

            group.channel_bits |= 1 << cell.offset;
            if group.size == 0 {
                group.unit = cell.unit;
                group.section = cell.section;
                group.intensity = cell.intensity;
            }
            group.size += 1;

            *cursor += 1;
            if *cursor >= self.cells.len() || !self.cells[*cursor - 1].linked {
                break;
            }

            // TODO: consult the outdated bit to skip groups whose
            // intensity did not change since the previous frame
        }

        Some(group)
    }
}

fn linkable(a: &Cell, b: &Cell) -> bool {
    a.valid
        && b.valid
        && a.unit == b.unit
        && a.section == b.section
        && a.intensity == b.intensity
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_16_channels_unit_20() -> ChannelMap {
        ChannelMap::parse(
            r#"[{"index": {"from": 0, "to": 15}, "circuit": {"from": 1, "to": 16}, "unit": 20}]"#,
        )
        .unwrap()
    }

    fn apply(table: &mut CellTable, frame: &[u8]) {
        for (i, &v) in frame.iter().enumerate() {
            table.set(i, v);
        }
        table.link_all();
    }

    fn groups(table: &CellTable) -> Vec<CellGroup> {
        let mut cursor = 0;
        let mut out = Vec::new();
        while let Some(g) = table.next_group(&mut cursor) {
            out.push(g);
        }
        out
    }

    #[test]
    fn test_uniform_frame_collapses_to_one_group() {
        let mut table = CellTable::new(&map_16_channels_unit_20(), 16);
        apply(&mut table, &[255; 16]);

        let gs = groups(&table);
        assert_eq!(
            gs,
            vec![CellGroup {
                unit: 20,
                section: 0,
                channel_bits: 0xFFFF,
                intensity: 255,
                size: 16,
            }]
        );

        let mut cursor = 16;
        assert_eq!(table.next_group(&mut cursor), None);
    }

    #[test]
    fn test_half_and_half_frame_yields_two_groups_in_order() {
        let mut table = CellTable::new(&map_16_channels_unit_20(), 16);
        let mut frame = [0u8; 16];
        frame[8..].fill(255);
        apply(&mut table, &frame);

        let gs = groups(&table);
        assert_eq!(
            gs,
            vec![
                CellGroup {
                    unit: 20,
                    section: 0,
                    channel_bits: 0x00FF,
                    intensity: 0,
                    size: 8,
                },
                CellGroup {
                    unit: 20,
                    section: 0,
                    channel_bits: 0xFF00,
                    intensity: 255,
                    size: 8,
                },
            ]
        );
    }

    #[test]
    fn test_links_require_matching_unit_section_and_intensity() {
        // 32 channels: circuits 1..16 on unit 1, then 1..16 on unit 2.
        let map = ChannelMap::parse(
            r#"[
                {"index": {"from": 0, "to": 15}, "circuit": {"from": 1, "to": 16}, "unit": 1},
                {"index": {"from": 16, "to": 31}, "circuit": {"from": 1, "to": 16}, "unit": 2}
            ]"#,
        )
        .unwrap();
        let mut table = CellTable::new(&map, 32);
        apply(&mut table, &[10; 32]);

        // Equal intensity everywhere, but the unit boundary must split
        // the run into two groups.
        let gs = groups(&table);
        assert_eq!(gs.len(), 2);
        assert_eq!((gs[0].unit, gs[0].size), (1, 16));
        assert_eq!((gs[1].unit, gs[1].size), (2, 16));
    }

    #[test]
    fn test_section_boundary_breaks_a_group() {
        // 32 circuits on one unit span two 16-channel sections.
        let map = ChannelMap::parse(
            r#"[{"index": {"from": 0, "to": 31}, "circuit": {"from": 1, "to": 32}, "unit": 5}]"#,
        )
        .unwrap();
        let mut table = CellTable::new(&map, 32);
        apply(&mut table, &[77; 32]);

        let gs = groups(&table);
        assert_eq!(gs.len(), 2);
        assert_eq!((gs[0].section, gs[0].channel_bits), (0, 0xFFFF));
        assert_eq!((gs[1].section, gs[1].channel_bits), (1, 0xFFFF));
    }

    #[test]
    fn test_unmapped_indexes_are_skipped_but_break_runs() {
        // Indexes 0..4 and 8..12 are mapped; 4..8 are holes.
        let map = ChannelMap::parse(
            r#"[
                {"index": {"from": 0, "to": 3}, "circuit": {"from": 1, "to": 4}, "unit": 9},
                {"index": {"from": 8, "to": 11}, "circuit": {"from": 5, "to": 8}, "unit": 9}
            ]"#,
        )
        .unwrap();
        let mut table = CellTable::new(&map, 12);
        apply(&mut table, &[42; 12]);

        let gs = groups(&table);
        assert_eq!(gs.len(), 2);
        assert_eq!(gs[0].channel_bits, 0b0000_0000_0000_1111);
        assert_eq!(gs[1].channel_bits, 0b0000_0000_1111_0000);
    }

    #[test]
    fn test_grouping_covers_every_valid_cell_exactly_once() {
        let map = ChannelMap::parse(
            r#"[{"index": {"from": 0, "to": 15}, "circuit": {"from": 1, "to": 16}, "unit": 3}]"#,
        )
        .unwrap();
        let mut table = CellTable::new(&map, 16);
        // Alternating pattern forces many small groups.
        let frame: Vec<u8> = (0..16).map(|i| if i % 2 == 0 { 0 } else { 200 }).collect();
        apply(&mut table, &frame);

        let gs = groups(&table);
        let total: usize = gs.iter().map(|g| g.size).sum();
        assert_eq!(total, 16);

        let mut seen = 0u16;
        for g in &gs {
            assert_eq!(seen & g.channel_bits, 0, "no cell may appear twice");
            seen |= g.channel_bits;
            assert_eq!(g.channel_bits.count_ones() as usize, g.size);
        }
        assert_eq!(seen, 0xFFFF);
    }

    #[test]
    fn test_set_only_marks_changed_cells_outdated() {
        let mut table = CellTable::new(&map_16_channels_unit_20(), 16);
        table.set(0, 0); // unchanged from initial state
        assert!(!table.cells[0].outdated);

        table.set(0, 1);
        assert!(table.cells[0].outdated);
    }
}
