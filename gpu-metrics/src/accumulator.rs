//! Report accumulation
//!
//! Two reports of the same metric set are turned into per-counter deltas
//! taking the rollover of each field width into account.

use crate::catalog::MetricSet;
use crate::layout::FieldWidth;

/// Upper bound on the raw counters of any report format.
pub const MAX_RAW_COUNTERS: usize = 128;

const U40_MODULUS: u64 = 1 << 40;

/// Raw counter deltas between two reports.
///
/// Slot 0 holds the shifted timestamp delta, then every counter group of the
/// layout in declaration order.
#[derive(Clone)]
pub struct Accumulator {
    deltas: [u64; MAX_RAW_COUNTERS],
    len: usize,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            deltas: [0; MAX_RAW_COUNTERS],
            len: 0,
        }
    }
}

impl std::fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.deltas()).finish()
    }
}

impl Accumulator {
    pub fn deltas(&self) -> &[u64] {
        &self.deltas[..self.len]
    }

    /// Timestamp delta in GPU cycles.
    pub fn gpu_time_cycles(&self) -> u64 {
        self.deltas[0]
    }

    /// Resets the state and fills it with the deltas from `report0` to `report1`.
    ///
    /// # Panics
    ///
    /// Panics when either report does not have the size of the metric set's
    /// report format.
    pub fn accumulate(&mut self, metric_set: &MetricSet, report0: &[u8], report1: &[u8]) {
        let layout = metric_set.layout;
        assert_eq!(
            report0.len(),
            layout.report_size,
            "report size does not match format {}",
            layout.name
        );
        assert_eq!(
            report1.len(),
            layout.report_size,
            "report size does not match format {}",
            layout.name
        );

        self.deltas = [0; MAX_RAW_COUNTERS];
        self.deltas[0] = timestamp_delta(metric_set, report0, report1);

        let mut slot = 1;
        for group in layout.groups {
            for i in 0..group.count {
                let v0 = group.read(report0, i);
                let v1 = group.read(report1, i);
                self.deltas[slot] = field_delta(group.width, v0, v1);
                slot += 1;
            }
        }
        self.len = slot;
    }
}

/// Deltas between two consecutive reports of `metric_set`.
pub fn accumulate(metric_set: &MetricSet, report0: &[u8], report1: &[u8]) -> Accumulator {
    let mut acc = Accumulator::default();
    acc.accumulate(metric_set, report0, report1);
    acc
}

fn field_delta(width: FieldWidth, v0: u64, v1: u64) -> u64 {
    match width {
        FieldWidth::U32 => (v1 as u32).wrapping_sub(v0 as u32) as u64,
        FieldWidth::U40 { .. } => {
            if v0 > v1 {
                U40_MODULUS + v1 - v0
            } else {
                v1 - v0
            }
        }
        FieldWidth::U64 => v1.wrapping_sub(v0),
    }
}

fn timestamp_delta(metric_set: &MetricSet, report0: &[u8], report1: &[u8]) -> u64 {
    let layout = metric_set.layout;
    let delta = field_delta(
        layout.timestamp_width,
        layout.read_timestamp_raw(report0),
        layout.read_timestamp_raw(report1),
    );
    apply_shift(delta, metric_set.timestamp_shift)
}

pub(crate) fn apply_shift(value: u64, shift: i8) -> u64 {
    if shift >= 0 {
        value << shift
    } else {
        value >> shift.unsigned_abs()
    }
}

/// Timestamp of `report` in GPU cycles, with the family shift applied.
pub fn read_timestamp(metric_set: &MetricSet, report: &[u8]) -> u64 {
    apply_shift(
        metric_set.layout.read_timestamp_raw(report),
        metric_set.timestamp_shift,
    )
}

/// Raw timestamp field value the hardware stores for `gpu_timestamp` cycles.
pub fn raw_timestamp_for(metric_set: &MetricSet, gpu_timestamp: u64) -> u64 {
    apply_shift(gpu_timestamp, -metric_set.timestamp_shift)
}

/// Timestamp field of `report` as stored by the hardware.
pub fn read_timestamp_raw(metric_set: &MetricSet, report: &[u8]) -> u64 {
    metric_set.layout.read_timestamp_raw(report)
}

pub fn read_context_id(metric_set: &MetricSet, report: &[u8]) -> u32 {
    metric_set.layout.read_context_id(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{CounterGroup, ReportLayout, A32U40_A4U32_B8_C8};
    use proptest::prelude::*;

    static WIDE: ReportLayout = ReportLayout {
        format_id: 100,
        name: "wide",
        report_size: 64,
        timestamp_offset: 8,
        timestamp_width: FieldWidth::U64,
        context_id_offset: 16,
        groups: &[
            CounterGroup { name: "D", offset: 20, count: 1, width: FieldWidth::U32 },
            CounterGroup { name: "Q", offset: 24, count: 2, width: FieldWidth::U64 },
        ],
    };

    fn metric_set(layout: &'static ReportLayout, shift: i8) -> MetricSet {
        MetricSet {
            symbol_name: "Test",
            name: "Test",
            hw_config_uuid: "00000000-0000-0000-0000-000000000000",
            layout,
            counters: &[],
            timestamp_shift: shift,
        }
    }

    fn a32_report(ts: u32, a0: u64) -> Vec<u8> {
        let mut r = vec![0u8; 256];
        r[4..8].copy_from_slice(&ts.to_le_bytes());
        r[16..20].copy_from_slice(&(a0 as u32).to_le_bytes());
        r[160] = (a0 >> 32) as u8;
        r
    }

    fn wide_report(ts: u64, d: u32, q: [u64; 2]) -> Vec<u8> {
        let mut r = vec![0u8; 64];
        r[8..16].copy_from_slice(&ts.to_le_bytes());
        r[20..24].copy_from_slice(&d.to_le_bytes());
        r[24..32].copy_from_slice(&q[0].to_le_bytes());
        r[32..40].copy_from_slice(&q[1].to_le_bytes());
        r
    }

    #[test]
    fn test_40bit_wrap() {
        let set = metric_set(&A32U40_A4U32_B8_C8, 0);
        let r0 = a32_report(0, 0xff_ffff_fff0);
        let r1 = a32_report(0, 0x10);
        let acc = accumulate(&set, &r0, &r1);
        // slot 1 is the clock counter, A0 follows
        assert_eq!(acc.deltas()[2], 0x20);
    }

    #[test]
    fn test_32bit_timestamp_wrap_and_shift() {
        let set = metric_set(&A32U40_A4U32_B8_C8, 1);
        let acc = accumulate(&set, &a32_report(u32::MAX - 4, 0), &a32_report(5, 0));
        assert_eq!(acc.gpu_time_cycles(), 20);

        let set = metric_set(&A32U40_A4U32_B8_C8, -1);
        let acc = accumulate(&set, &a32_report(100, 0), &a32_report(200, 0));
        assert_eq!(acc.gpu_time_cycles(), 50);
    }

    #[test]
    fn test_layout_slot_order() {
        let set = metric_set(&WIDE, 0);
        let acc = accumulate(
            &set,
            &wide_report(10, 1, [100, 1000]),
            &wide_report(25, 4, [150, 1500]),
        );
        assert_eq!(acc.deltas(), &[15, 3, 50, 500]);
    }

    #[test]
    fn test_state_is_reset_between_calls() {
        let set = metric_set(&WIDE, 0);
        let mut acc = Accumulator::default();
        acc.accumulate(&set, &wide_report(0, 0, [0, 0]), &wide_report(9, 9, [9, 9]));
        acc.accumulate(&set, &wide_report(0, 0, [0, 0]), &wide_report(1, 1, [1, 1]));
        assert_eq!(acc.deltas(), &[1, 1, 1, 1]);
    }

    #[test]
    #[should_panic(expected = "report size")]
    fn test_size_mismatch_panics() {
        let set = metric_set(&A32U40_A4U32_B8_C8, 0);
        accumulate(&set, &vec![0u8; 256], &vec![0u8; 128]);
    }

    #[test]
    fn test_readers() {
        let set = metric_set(&A32U40_A4U32_B8_C8, 1);
        let mut report = a32_report(300, 0);
        report[8..12].copy_from_slice(&7u32.to_le_bytes());
        assert_eq!(read_timestamp_raw(&set, &report), 300);
        assert_eq!(read_timestamp(&set, &report), 600);
        assert_eq!(read_context_id(&set, &report), 7);
        assert_eq!(raw_timestamp_for(&set, 600), 300);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_u40_delta_is_modular(x in 0u64..(1 << 40), delta in 0u64..(1 << 40)) {
            let y = (x + delta) % (1 << 40);
            let set = metric_set(&A32U40_A4U32_B8_C8, 0);
            let acc = accumulate(&set, &a32_report(0, x), &a32_report(0, y));
            prop_assert_eq!(acc.deltas()[2], delta);
        }

        #[test]
        fn prop_u32_and_u64_deltas_are_modular(
            d0 in any::<u32>(),
            d_delta in any::<u32>(),
            q0 in any::<u64>(),
            q_delta in any::<u64>(),
        ) {
            let set = metric_set(&WIDE, 0);
            let acc = accumulate(
                &set,
                &wide_report(0, d0, [q0, 0]),
                &wide_report(0, d0.wrapping_add(d_delta), [q0.wrapping_add(q_delta), 0]),
            );
            prop_assert_eq!(acc.deltas()[1], d_delta as u64);
            prop_assert_eq!(acc.deltas()[2], q_delta);
        }
    }
}
