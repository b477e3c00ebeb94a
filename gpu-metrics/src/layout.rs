//! OA report layouts
//!
//! A report is a fixed size little-endian blob. Every supported format is
//! described declaratively by a [`ReportLayout`]: where the timestamp and the
//! context id live and which groups of raw counters follow. The accumulator
//! walks these tables instead of carrying one hand written routine per format.

/// Storage width of a raw counter inside a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldWidth {
    /// 32-bit little-endian dword
    U32,
    /// 32 low bits stored as a dword, the 8 high bits in a separate byte table
    U40 { high_byte_offset: usize },
    /// 64-bit little-endian qword
    U64,
}

/// A run of consecutive raw counters sharing a width.
#[derive(Debug, Clone, Copy)]
pub struct CounterGroup {
    pub name: &'static str,
    /// Byte offset of the first counter (of its low dword for `U40`)
    pub offset: usize,
    pub count: usize,
    pub width: FieldWidth,
}

impl CounterGroup {
    /// Reads the `index`-th counter of the group from `report`.
    pub fn read(&self, report: &[u8], index: usize) -> u64 {
        match self.width {
            FieldWidth::U32 => read_u32(report, self.offset + index * 4) as u64,
            FieldWidth::U64 => read_u64(report, self.offset + index * 8),
            FieldWidth::U40 { high_byte_offset } => {
                let low = read_u32(report, self.offset + index * 4) as u64;
                let high = report[high_byte_offset + index] as u64;
                (high << 32) | low
            }
        }
    }

    /// Stores `value` as the `index`-th counter, truncated to the field width.
    pub fn write(&self, report: &mut [u8], index: usize, value: u64) {
        match self.width {
            FieldWidth::U32 => write_u32(report, self.offset + index * 4, value as u32),
            FieldWidth::U64 => {
                let o = self.offset + index * 8;
                report[o..o + 8].copy_from_slice(&value.to_le_bytes());
            }
            FieldWidth::U40 { high_byte_offset } => {
                write_u32(report, self.offset + index * 4, value as u32);
                report[high_byte_offset + index] = (value >> 32) as u8;
            }
        }
    }

    /// Byte ranges touched by the group, used to validate layouts.
    fn spans(&self) -> Vec<(usize, usize)> {
        match self.width {
            FieldWidth::U32 => vec![(self.offset, self.offset + self.count * 4)],
            FieldWidth::U64 => vec![(self.offset, self.offset + self.count * 8)],
            FieldWidth::U40 { high_byte_offset } => vec![
                (self.offset, self.offset + self.count * 4),
                (high_byte_offset, high_byte_offset + self.count),
            ],
        }
    }
}

/// Declarative description of one report format.
#[derive(Debug)]
pub struct ReportLayout {
    /// Identifier recorded in `DeviceInfo::oa_format`
    pub format_id: u32,
    pub name: &'static str,
    pub report_size: usize,
    pub timestamp_offset: usize,
    /// `U32` or `U64`
    pub timestamp_width: FieldWidth,
    pub context_id_offset: usize,
    pub groups: &'static [CounterGroup],
}

impl ReportLayout {
    /// Number of delta slots produced by accumulation: the timestamp first,
    /// then every counter of every group in declaration order.
    pub fn delta_count(&self) -> usize {
        1 + self.groups.iter().map(|g| g.count).sum::<usize>()
    }

    /// Width in bits of the raw timestamp field.
    pub fn timestamp_bits(&self) -> u32 {
        match self.timestamp_width {
            FieldWidth::U64 => 64,
            _ => 32,
        }
    }

    /// Unshifted timestamp field of `report`.
    pub fn read_timestamp_raw(&self, report: &[u8]) -> u64 {
        match self.timestamp_width {
            FieldWidth::U64 => read_u64(report, self.timestamp_offset),
            _ => read_u32(report, self.timestamp_offset) as u64,
        }
    }

    pub fn read_context_id(&self, report: &[u8]) -> u32 {
        read_u32(report, self.context_id_offset)
    }

    /// Fills the report header: reason bits, raw timestamp and context id.
    pub fn write_header(&self, report: &mut [u8], reason: u32, timestamp_raw: u64, context_id: u32) {
        write_u32(report, 0, (reason & REPORT_REASON_MASK) << REPORT_REASON_SHIFT);
        match self.timestamp_width {
            FieldWidth::U64 => report[self.timestamp_offset..self.timestamp_offset + 8]
                .copy_from_slice(&timestamp_raw.to_le_bytes()),
            _ => write_u32(report, self.timestamp_offset, timestamp_raw as u32),
        }
        write_u32(report, self.context_id_offset, context_id);
    }

    /// Reason bits of the report header.
    pub fn read_reason(&self, report: &[u8]) -> u32 {
        (read_u32(report, 0) >> REPORT_REASON_SHIFT) & REPORT_REASON_MASK
    }

    /// Checks that every field lies inside the report and no two fields overlap.
    pub fn validate(&self) -> Result<(), String> {
        let mut spans = vec![
            (0, 4),
            (
                self.timestamp_offset,
                self.timestamp_offset + self.timestamp_bits() as usize / 8,
            ),
            (self.context_id_offset, self.context_id_offset + 4),
        ];
        for group in self.groups {
            spans.extend(group.spans());
        }

        spans.sort_unstable();
        for pair in spans.windows(2) {
            if pair[0].1 > pair[1].0 {
                return Err(format!(
                    "{}: fields {:?} and {:?} overlap",
                    self.name, pair[0], pair[1]
                ));
            }
        }
        match spans.last() {
            Some(&(_, end)) if end > self.report_size => Err(format!(
                "{}: field ends at {} past report size {}",
                self.name, end, self.report_size
            )),
            _ => Ok(()),
        }
    }
}

const REPORT_REASON_SHIFT: u32 = 19;
const REPORT_REASON_MASK: u32 = 0x7f;

pub const REASON_TIMER: u32 = 1 << 0;
pub const REASON_CONTEXT_SWITCH: u32 = 1 << 3;

/// Human readable names of the reason bits set in `reason`.
pub fn reason_names(reason: u32) -> Vec<&'static str> {
    const NAMES: [&str; 7] = [
        "timer",
        "trigger1",
        "trigger2",
        "context-switch",
        "go-transition",
        "clock-ratio-change",
        "mmio-trigger",
    ];
    let names: Vec<_> = NAMES
        .iter()
        .enumerate()
        .filter(|(bit, _)| reason & (1 << bit) != 0)
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() {
        vec!["unknown"]
    } else {
        names
    }
}

pub(crate) fn read_u32(report: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&report[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn write_u32(report: &mut [u8], offset: usize, value: u32) {
    report[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_u64(report: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&report[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

/// 32 A counters with 40-bit storage, 4 extra 32-bit A counters, 8 B and 8 C.
pub static A32U40_A4U32_B8_C8: ReportLayout = ReportLayout {
    format_id: 5,
    name: "A32u40_A4u32_B8_C8",
    report_size: 256,
    timestamp_offset: 4,
    timestamp_width: FieldWidth::U32,
    context_id_offset: 8,
    groups: &[
        CounterGroup { name: "GpuTicks", offset: 12, count: 1, width: FieldWidth::U32 },
        CounterGroup {
            name: "A0-31",
            offset: 16,
            count: 32,
            width: FieldWidth::U40 { high_byte_offset: 160 },
        },
        CounterGroup { name: "A32-35", offset: 144, count: 4, width: FieldWidth::U32 },
        CounterGroup { name: "B0-7", offset: 192, count: 8, width: FieldWidth::U32 },
        CounterGroup { name: "C0-7", offset: 224, count: 8, width: FieldWidth::U32 },
    ],
};

/// 24 A counters with 40-bit storage interleaved with 14 32-bit ones, 8 B and 8 C.
pub static A24U40_A14U32_B8_C8: ReportLayout = ReportLayout {
    format_id: 6,
    name: "A24u40_A14u32_B8_C8",
    report_size: 256,
    timestamp_offset: 4,
    timestamp_width: FieldWidth::U32,
    context_id_offset: 8,
    groups: &[
        CounterGroup { name: "GpuTicks", offset: 12, count: 1, width: FieldWidth::U32 },
        CounterGroup { name: "A0-3", offset: 16, count: 4, width: FieldWidth::U32 },
        CounterGroup {
            name: "A4-23",
            offset: 32,
            count: 20,
            width: FieldWidth::U40 { high_byte_offset: 164 },
        },
        CounterGroup { name: "A24-27", offset: 112, count: 4, width: FieldWidth::U32 },
        CounterGroup {
            name: "A28-31",
            offset: 128,
            count: 4,
            width: FieldWidth::U40 { high_byte_offset: 188 },
        },
        CounterGroup { name: "A32-36", offset: 144, count: 5, width: FieldWidth::U32 },
        CounterGroup { name: "A37", offset: 184, count: 1, width: FieldWidth::U32 },
        CounterGroup { name: "B0-7", offset: 192, count: 8, width: FieldWidth::U32 },
        CounterGroup { name: "C0-7", offset: 224, count: 8, width: FieldWidth::U32 },
    ],
};

/// Media engine format with a 64-bit header.
pub static MPEC8U32_B8_C8: ReportLayout = ReportLayout {
    format_id: 7,
    name: "MPEC8u32_B8_C8",
    report_size: 128,
    timestamp_offset: 8,
    timestamp_width: FieldWidth::U64,
    context_id_offset: 16,
    groups: &[
        CounterGroup { name: "GpuTicks", offset: 24, count: 1, width: FieldWidth::U64 },
        CounterGroup { name: "MPEC0-7", offset: 32, count: 8, width: FieldWidth::U32 },
        CounterGroup { name: "B0-7", offset: 64, count: 8, width: FieldWidth::U32 },
        CounterGroup { name: "C0-7", offset: 96, count: 8, width: FieldWidth::U32 },
    ],
};

/// 64 programmable event counters of 64 bits each.
pub static PEC64U64: ReportLayout = ReportLayout {
    format_id: 8,
    name: "PEC64u64",
    report_size: 576,
    timestamp_offset: 8,
    timestamp_width: FieldWidth::U64,
    context_id_offset: 16,
    groups: &[
        CounterGroup { name: "GpuTicks", offset: 24, count: 1, width: FieldWidth::U64 },
        CounterGroup { name: "PEC0-63", offset: 64, count: 64, width: FieldWidth::U64 },
    ],
};

/// Every layout known to the catalog.
pub static LAYOUTS: [&ReportLayout; 4] =
    [&A32U40_A4U32_B8_C8, &A24U40_A14U32_B8_C8, &MPEC8U32_B8_C8, &PEC64U64];

/// Looks a layout up by the identifier stored in recordings.
pub fn layout_by_format(format_id: u32) -> Option<&'static ReportLayout> {
    LAYOUTS.iter().copied().find(|l| l.format_id == format_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::MAX_RAW_COUNTERS;

    #[test]
    fn test_layouts_are_consistent() {
        for layout in LAYOUTS {
            layout.validate().unwrap();
            assert!(layout.delta_count() <= MAX_RAW_COUNTERS, "{}", layout.name);
        }
    }

    #[test]
    fn test_delta_counts() {
        assert_eq!(A32U40_A4U32_B8_C8.delta_count(), 54);
        assert_eq!(A24U40_A14U32_B8_C8.delta_count(), 56);
        assert_eq!(MPEC8U32_B8_C8.delta_count(), 26);
        assert_eq!(PEC64U64.delta_count(), 66);
    }

    #[test]
    fn test_validate_catches_overlap() {
        static BROKEN: ReportLayout = ReportLayout {
            format_id: 99,
            name: "broken",
            report_size: 32,
            timestamp_offset: 4,
            timestamp_width: FieldWidth::U32,
            context_id_offset: 8,
            groups: &[CounterGroup { name: "A", offset: 10, count: 2, width: FieldWidth::U32 }],
        };
        assert!(BROKEN.validate().is_err());
    }

    #[test]
    fn test_u40_read() {
        let mut report = vec![0u8; 256];
        report[16..20].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        report[160] = 0x12;
        let group = &A32U40_A4U32_B8_C8.groups[1];
        assert_eq!(group.read(&report, 0), 0x12_dead_beef);
    }

    #[test]
    fn test_header_fields() {
        let mut report = vec![0u8; 256];
        // timer and context-switch reasons
        report[0..4].copy_from_slice(&(0b1001u32 << 19).to_le_bytes());
        report[4..8].copy_from_slice(&1234u32.to_le_bytes());
        report[8..12].copy_from_slice(&42u32.to_le_bytes());

        let layout = &A32U40_A4U32_B8_C8;
        assert_eq!(layout.read_timestamp_raw(&report), 1234);
        assert_eq!(layout.read_context_id(&report), 42);
        assert_eq!(reason_names(layout.read_reason(&report)), vec!["timer", "context-switch"]);
        assert_eq!(reason_names(0), vec!["unknown"]);
    }

    #[test]
    fn test_write_then_read() {
        let layout = &A24U40_A14U32_B8_C8;
        let mut report = vec![0u8; layout.report_size];
        layout.write_header(&mut report, REASON_CONTEXT_SWITCH, 0x1_0000_0005, 3);
        for group in layout.groups {
            group.write(&mut report, group.count - 1, 0xab_1234_5678);
        }

        // the 32-bit timestamp field keeps the low dword only
        assert_eq!(layout.read_timestamp_raw(&report), 5);
        assert_eq!(layout.read_context_id(&report), 3);
        assert_eq!(reason_names(layout.read_reason(&report)), vec!["context-switch"]);
        for group in layout.groups {
            let expected = match group.width {
                FieldWidth::U32 => 0x1234_5678,
                _ => 0xab_1234_5678,
            };
            assert_eq!(group.read(&report, group.count - 1), expected, "{}", group.name);
        }
    }

    #[test]
    fn test_layout_by_format() {
        assert_eq!(layout_by_format(8).map(|l| l.name), Some("PEC64u64"));
        assert!(layout_by_format(1).is_none());
    }
}
