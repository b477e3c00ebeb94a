//! GPU to CPU time translation
//!
//! Report timestamps are only as wide as the report field, so both sample
//! timestamps and correlation points are first unwrapped onto one
//! monotonic GPU axis, walking them in recording order.

use oatrace_gpu::{read_timestamp, MetricSet};
use oatrace_shared::utils::time::cycles_to_ns;
use oatrace_shared::{CorrelationPoint, CpuTimestamp, GpuTimestamp};

use crate::parse::ParsedRecording;

/// Extends a wrapping timestamp counter onto a signed axis.
///
/// Each value is placed at the position closest to the previous one, which
/// tolerates small backwards steps between interleaved sources. A step back
/// across a wrap before the first value lands below zero; [`rebase`] moves
/// a set of positions back onto the unsigned axis.
///
/// [`rebase`]: TimestampUnwrapper::rebase
#[derive(Debug, Clone)]
pub struct TimestampUnwrapper {
    bits: u32,
    last: Option<i128>,
}

impl TimestampUnwrapper {
    pub fn new(bits: u32) -> Self {
        Self {
            bits: bits.clamp(1, 64),
            last: None,
        }
    }

    pub fn unwrap(&mut self, value: u64) -> i128 {
        if self.bits >= 64 {
            self.last = Some(value as i128);
            return value as i128;
        }

        let range = 1u64 << self.bits;
        let mask = range - 1;
        let value = value & mask;
        let next = match self.last {
            None => value as i128,
            Some(last) => {
                let delta = value.wrapping_sub(last as u64) & mask;
                if delta < range / 2 {
                    last + delta as i128
                } else {
                    last - (range - delta) as i128
                }
            }
        };
        self.last = Some(next);
        next
    }

    /// Offset, a whole number of wraps, that lifts `min` to zero or above.
    fn rebase_offset(&self, min: i128) -> i128 {
        if min >= 0 {
            return 0;
        }
        let range = 1i128 << self.bits;
        (-min + range - 1) / range * range
    }

    /// Shifts `positions` by whole wraps so that none is negative.
    ///
    /// Every position keeps its residue modulo the counter range.
    pub fn rebase(&self, positions: &[i128]) -> Vec<u64> {
        let offset = positions
            .iter()
            .min()
            .map_or(0, |&min| self.rebase_offset(min));
        positions
            .iter()
            .map(|&p| u64::try_from(p + offset).unwrap_or(u64::MAX))
            .collect()
    }
}

/// Width in bits of the shifted GPU timestamps of `metric_set`.
pub fn timestamp_bits(metric_set: &MetricSet) -> u32 {
    let bits = metric_set.layout.timestamp_bits() as i32 + metric_set.timestamp_shift as i32;
    bits.clamp(1, 64) as u32
}

/// Correlation points sorted by GPU timestamp.
#[derive(Debug, Clone, Default)]
pub struct CorrelationTable {
    points: Vec<CorrelationPoint>,
    timestamp_frequency: u64,
}

impl CorrelationTable {
    pub fn new(mut points: Vec<CorrelationPoint>, timestamp_frequency: u64) -> Self {
        points.sort_by_key(|p| p.gpu_timestamp);
        points.dedup_by_key(|p| p.gpu_timestamp);
        Self {
            points,
            timestamp_frequency,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[CorrelationPoint] {
        &self.points
    }

    pub fn cpu_range(&self) -> Option<(CpuTimestamp, CpuTimestamp)> {
        let min = self.points.iter().map(|p| p.cpu_timestamp).min()?;
        let max = self.points.iter().map(|p| p.cpu_timestamp).max()?;
        Some((min, max))
    }

    pub fn gpu_range(&self) -> Option<(GpuTimestamp, GpuTimestamp)> {
        Some((self.points.first()?.gpu_timestamp, self.points.last()?.gpu_timestamp))
    }

    /// CPU time of `gpu` cycles.
    ///
    /// Interpolates between the two points bracketing `gpu`, or extrapolates
    /// from the nearest bracket outside the table. A single point is
    /// extrapolated at the timestamp frequency. Returns `None` without any
    /// point.
    pub fn gpu_to_cpu(&self, gpu: GpuTimestamp) -> Option<CpuTimestamp> {
        let (p0, p1) = match self.points.len() {
            0 => return None,
            1 => {
                let p = self.points[0];
                let offset = cycles_to_ns(gpu.abs_diff(p.gpu_timestamp), self.timestamp_frequency);
                return Some(if gpu >= p.gpu_timestamp {
                    p.cpu_timestamp.saturating_add(offset)
                } else {
                    p.cpu_timestamp.saturating_sub(offset)
                });
            }
            n => {
                let idx = self.points.partition_point(|p| p.gpu_timestamp <= gpu);
                let idx = idx.clamp(1, n - 1);
                (self.points[idx - 1], self.points[idx])
            }
        };

        let gpu_span = p1.gpu_timestamp as i128 - p0.gpu_timestamp as i128;
        let cpu_span = p1.cpu_timestamp as i128 - p0.cpu_timestamp as i128;
        let cpu = p0.cpu_timestamp as i128
            + (gpu as i128 - p0.gpu_timestamp as i128) * cpu_span / gpu_span;
        Some(cpu.clamp(0, u64::MAX as i128) as u64)
    }
}

/// Sample timestamps and correlation points on one unwrapped GPU axis.
#[derive(Debug, Clone)]
pub struct GpuClock {
    pub sample_timestamps: Vec<GpuTimestamp>,
    pub table: CorrelationTable,
}

impl GpuClock {
    pub fn new(parsed: &ParsedRecording<'_>, metric_set: &MetricSet) -> Self {
        let mut unwrapper = TimestampUnwrapper::new(timestamp_bits(metric_set));
        let mut positions = Vec::with_capacity(parsed.samples.len() + parsed.correlations.len());
        let mut is_sample = Vec::with_capacity(positions.capacity());

        let mut samples = parsed.samples.iter().peekable();
        let mut correlations = parsed.correlations.iter().peekable();
        loop {
            let take_sample = match (samples.peek(), correlations.peek()) {
                (Some(s), Some(c)) => s.offset < c.offset,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };

            if take_sample {
                if let Some(sample) = samples.next() {
                    let ts = read_timestamp(metric_set, sample.report);
                    positions.push(unwrapper.unwrap(ts));
                    is_sample.push(true);
                }
            } else if let Some(c) = correlations.next() {
                positions.push(unwrapper.unwrap(c.point.gpu_timestamp));
                is_sample.push(false);
            }
        }

        // dumps open with the newest anchor, so older samples may sit
        // below it across a wrap
        let timestamps = unwrapper.rebase(&positions);
        let mut sample_timestamps = Vec::with_capacity(parsed.samples.len());
        let mut points = Vec::with_capacity(parsed.correlations.len());
        let mut cpu = parsed.correlations.iter().map(|c| c.point.cpu_timestamp);
        for (ts, sample) in timestamps.into_iter().zip(is_sample) {
            if sample {
                sample_timestamps.push(ts);
            } else if let Some(cpu_timestamp) = cpu.next() {
                points.push(CorrelationPoint::new(cpu_timestamp, ts));
            }
        }

        Self {
            sample_timestamps,
            table: CorrelationTable::new(points, parsed.device_info.timestamp_frequency),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CorrelationTable {
        CorrelationTable::new(
            vec![CorrelationPoint::new(2000, 200), CorrelationPoint::new(1000, 100)],
            1_000_000_000,
        )
    }

    #[test]
    fn test_interpolation_inside_bracket() {
        assert_eq!(table().gpu_to_cpu(150), Some(1500));
        assert_eq!(table().gpu_to_cpu(100), Some(1000));
        assert_eq!(table().gpu_to_cpu(200), Some(2000));
    }

    #[test]
    fn test_extrapolation_uses_nearest_bracket() {
        assert_eq!(table().gpu_to_cpu(250), Some(2500));
        assert_eq!(table().gpu_to_cpu(50), Some(500));
    }

    #[test]
    fn test_single_point_uses_frequency() {
        // 1 cycle per microsecond
        let table = CorrelationTable::new(vec![CorrelationPoint::new(10_000, 100)], 1_000_000);
        assert_eq!(table.gpu_to_cpu(110), Some(20_000));
        assert_eq!(table.gpu_to_cpu(95), Some(5_000));
        assert_eq!(CorrelationTable::default().gpu_to_cpu(1), None);
    }

    #[test]
    fn test_interpolation_with_three_points() {
        let table = CorrelationTable::new(
            vec![
                CorrelationPoint::new(0, 0),
                CorrelationPoint::new(1000, 100),
                CorrelationPoint::new(1500, 200),
            ],
            1_000_000_000,
        );
        assert_eq!(table.gpu_to_cpu(150), Some(1250));
        assert_eq!(table.gpu_to_cpu(50), Some(500));
        assert_eq!(table.cpu_range(), Some((0, 1500)));
        assert_eq!(table.gpu_range(), Some((0, 200)));
    }

    #[test]
    fn test_unwrap_across_32bit_wrap() {
        let mut unwrapper = TimestampUnwrapper::new(32);
        assert_eq!(unwrapper.unwrap(0xffff_fff0), 0xffff_fff0);
        assert_eq!(unwrapper.unwrap(0x10), 0x1_0000_0010);
        // small step backwards stays in the same epoch
        assert_eq!(unwrapper.unwrap(0x8), 0x1_0000_0008);
        assert_eq!(unwrapper.unwrap(0x1_0000_0020), 0x1_0000_0020);
    }

    #[test]
    fn test_unwrap_backwards_across_zero() {
        let mut unwrapper = TimestampUnwrapper::new(32);
        let positions = vec![
            unwrapper.unwrap(0x1000),
            unwrapper.unwrap(0xffff_0000),
            unwrapper.unwrap(0xffff_8000),
            unwrapper.unwrap(0x100),
        ];
        assert_eq!(positions, vec![0x1000, -0x1_0000, -0x8000, 0x100]);

        let rebased = unwrapper.rebase(&positions);
        assert_eq!(
            rebased,
            vec![0x1_0000_1000, 0xffff_0000, 0xffff_8000, 0x1_0000_0100]
        );
        // nothing to lift
        assert_eq!(unwrapper.rebase(&[5, 7]), vec![5, 7]);
    }

    #[test]
    fn test_unwrap_64bit_is_identity() {
        let mut unwrapper = TimestampUnwrapper::new(64);
        assert_eq!(unwrapper.unwrap(u64::MAX), u64::MAX as i128);
        assert_eq!(unwrapper.unwrap(3), 3);
        assert_eq!(unwrapper.rebase(&[u64::MAX as i128, 3]), vec![u64::MAX, 3]);
    }
}
