//! Software OA device
//!
//! Produces well-formed reports for any metric set of the catalog. Reports
//! can be scripted up front, which is what the tests do, or generated live at
//! the sampling period for `oatrace record --device synthetic`.

use oatrace_gpu::layout::{REASON_CONTEXT_SWITCH, REASON_TIMER};
use oatrace_gpu::{raw_timestamp_for, DeviceDescriptor, MetricSet};
use oatrace_shared::utils::time::ns_to_cycles;
use oatrace_shared::{AnomalyKind, CorrelationPoint, OaError, Topology, IDLE_CONTEXT_ID};
use std::collections::VecDeque;
use std::os::fd::BorrowedFd;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{OaDevice, ReadOutcome};
use crate::correlation::CorrelationClock;

const SYNTHETIC_TIMESTAMP_FREQUENCY: u64 = 19_200_000;

/// GT clocks per timestamp tick, a 960MHz GT against the 19.2MHz timestamp
const GT_CLOCKS_PER_TICK: u64 = 50;

/// Reports the live generator may fall behind before it reports a lost buffer.
const MAX_LIVE_BACKLOG: u64 = 16 * 1024;

/// Context ids the live generator cycles through.
const LIVE_CONTEXTS: [u32; 3] = [1, 2, IDLE_CONTEXT_ID];

/// Builds successive reports with monotonically increasing counters.
pub struct ReportGenerator {
    metric_set: MetricSet,
    counters: Vec<u64>,
    last_timestamp: Option<u64>,
    last_context: Option<u32>,
}

impl ReportGenerator {
    pub fn new(metric_set: MetricSet) -> Self {
        let slots = metric_set.layout.delta_count() - 1;
        Self {
            metric_set,
            counters: vec![0; slots],
            last_timestamp: None,
            last_context: None,
        }
    }

    /// Report taken at `gpu_timestamp` cycles while `context_id` runs.
    pub fn next_report(&mut self, gpu_timestamp: u64, context_id: u32) -> Vec<u8> {
        let layout = self.metric_set.layout;
        let elapsed = self
            .last_timestamp
            .map(|last| gpu_timestamp.wrapping_sub(last))
            .unwrap_or(0);

        let reason = match self.last_context {
            Some(last) if last != context_id => REASON_CONTEXT_SWITCH,
            _ => REASON_TIMER,
        };

        let mut report = vec![0u8; layout.report_size];
        layout.write_header(
            &mut report,
            reason,
            raw_timestamp_for(&self.metric_set, gpu_timestamp),
            context_id,
        );

        let mut slot = 0;
        for group in layout.groups {
            for i in 0..group.count {
                // slot 0 is the GT clock, the rest tick at distinct rates
                let rate = if slot == 0 {
                    GT_CLOCKS_PER_TICK
                } else {
                    (slot as u64 % 7) + 1
                };
                self.counters[slot] = self.counters[slot].wrapping_add(elapsed * rate);
                group.write(&mut report, i, self.counters[slot]);
                slot += 1;
            }
        }

        self.last_timestamp = Some(gpu_timestamp);
        self.last_context = Some(context_id);
        report
    }
}

enum Pending {
    Report(Vec<u8>),
    Anomaly(AnomalyKind),
}

struct LiveSchedule {
    next_timestamp: u64,
    switch_every: u64,
    generated: u64,
}

pub struct SyntheticDevice {
    descriptor: DeviceDescriptor,
    report_size: usize,
    generator: ReportGenerator,
    pending: VecDeque<Pending>,
    status: Option<AnomalyKind>,
    period_cycles: u64,
    next_scripted: u64,
    origin: Instant,
    gpu_origin: u64,
    live: Option<LiveSchedule>,
}

impl SyntheticDevice {
    /// Descriptor of a synthetic GPU with the given PCI id.
    pub fn descriptor_for(device_id: u32) -> DeviceDescriptor {
        DeviceDescriptor {
            device_id,
            revision: 0,
            timestamp_frequency: SYNTHETIC_TIMESTAMP_FREQUENCY,
            gt_min_frequency: 300,
            gt_max_frequency: 1300,
            topology: Topology::fully_populated(1, 6, 16),
        }
    }

    pub fn new(descriptor: DeviceDescriptor, metric_set: MetricSet) -> Self {
        let gpu_origin = 1_000_000;
        let period_cycles = ns_to_cycles(1_000_000, descriptor.timestamp_frequency).max(1);
        Self {
            report_size: metric_set.report_size(),
            generator: ReportGenerator::new(metric_set),
            descriptor,
            pending: VecDeque::new(),
            status: None,
            period_cycles,
            next_scripted: gpu_origin,
            origin: Instant::now(),
            gpu_origin,
            live: None,
        }
    }

    /// Spacing between consecutive reports.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period_cycles =
            ns_to_cycles(period.as_nanos() as u64, self.descriptor.timestamp_frequency).max(1);
        self
    }

    /// Generate reports continuously at the configured period, switching
    /// context every `switch_every` reports.
    pub fn live(mut self, switch_every: u64) -> Self {
        self.live = Some(LiveSchedule {
            next_timestamp: self.gpu_now(),
            switch_every: switch_every.max(1),
            generated: 0,
        });
        self
    }

    /// Queue `count` reports of `context_id`.
    pub fn push_reports(&mut self, count: usize, context_id: u32) {
        for _ in 0..count {
            let report = self.generator.next_report(self.next_scripted, context_id);
            self.pending.push_back(Pending::Report(report));
            self.next_scripted += self.period_cycles;
        }
    }

    /// Queue an anomaly after the reports pushed so far.
    pub fn push_anomaly(&mut self, kind: AnomalyKind) {
        self.pending.push_back(Pending::Anomaly(kind));
    }

    pub fn pending_reports(&self) -> usize {
        self.pending
            .iter()
            .filter(|p| matches!(p, Pending::Report(_)))
            .count()
    }

    fn gpu_now(&self) -> u64 {
        let elapsed = self.origin.elapsed().as_nanos() as u64;
        self.gpu_origin + ns_to_cycles(elapsed, self.descriptor.timestamp_frequency)
    }

    fn generate_due(&mut self) {
        let now = self.gpu_now();
        let Some(live) = self.live.as_mut() else {
            return;
        };

        let due = now.saturating_sub(live.next_timestamp) / self.period_cycles;
        if due > MAX_LIVE_BACKLOG {
            warn!("Synthetic stream fell {} reports behind", due);
            self.pending.push_back(Pending::Anomaly(AnomalyKind::BufferLost));
            live.next_timestamp = now;
            return;
        }

        while live.next_timestamp <= now {
            let index = (live.generated / live.switch_every) as usize % LIVE_CONTEXTS.len();
            let report = self
                .generator
                .next_report(live.next_timestamp, LIVE_CONTEXTS[index]);
            self.pending.push_back(Pending::Report(report));
            live.next_timestamp += self.period_cycles;
            live.generated += 1;
        }
    }
}

impl OaDevice for SyntheticDevice {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }

    fn read_reports(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, OaError> {
        if buf.len() < self.report_size {
            return Err(OaError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "read buffer smaller than one report",
            )));
        }
        self.generate_due();

        let mut copied = 0;
        loop {
            match self.pending.front() {
                Some(Pending::Report(report)) => {
                    if copied + self.report_size > buf.len() {
                        break;
                    }
                    buf[copied..copied + self.report_size].copy_from_slice(report);
                    copied += self.report_size;
                    self.pending.pop_front();
                }
                Some(Pending::Anomaly(kind)) => {
                    if copied > 0 {
                        break;
                    }
                    debug!("Synthetic stream signals {}", kind);
                    self.status = Some(*kind);
                    self.pending.pop_front();
                    return Ok(ReadOutcome::Anomaly);
                }
                None => break,
            }
        }

        if copied == 0 {
            Ok(ReadOutcome::WouldBlock)
        } else {
            Ok(ReadOutcome::Data(copied))
        }
    }

    fn stream_status(&mut self) -> Result<Option<AnomalyKind>, OaError> {
        Ok(self.status.take())
    }

    fn correlation_point(&mut self, clock: CorrelationClock) -> Result<CorrelationPoint, OaError> {
        let before = clock.now_ns()?;
        let gpu = self.gpu_now();
        let after = clock.now_ns()?;
        Ok(CorrelationPoint::new(before + (after - before) / 2, gpu))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oatrace_gpu::{accumulate, read_context_id, read_timestamp, Catalog};

    fn render_basic() -> (DeviceDescriptor, MetricSet) {
        let descriptor = SyntheticDevice::descriptor_for(0x9a49);
        let catalog = Catalog::load(&descriptor).unwrap();
        let set = catalog.metric_set("RenderBasic").unwrap().clone();
        (descriptor, set)
    }

    #[test]
    fn test_scripted_reports_in_order() {
        let (descriptor, set) = render_basic();
        let mut device = SyntheticDevice::new(descriptor, set.clone());
        device.push_reports(3, 7);
        device.push_reports(2, IDLE_CONTEXT_ID);
        assert_eq!(device.pending_reports(), 5);

        let mut buf = vec![0u8; set.report_size() * 8];
        let ReadOutcome::Data(n) = device.read_reports(&mut buf).unwrap() else {
            panic!("expected data");
        };
        assert_eq!(n, 5 * set.report_size());

        let reports: Vec<_> = buf[..n].chunks(set.report_size()).collect();
        let ctx: Vec<_> = reports.iter().map(|r| read_context_id(&set, r)).collect();
        assert_eq!(ctx, vec![7, 7, 7, IDLE_CONTEXT_ID, IDLE_CONTEXT_ID]);
        assert!(read_timestamp(&set, reports[1]) > read_timestamp(&set, reports[0]));

        assert_eq!(device.read_reports(&mut buf).unwrap(), ReadOutcome::WouldBlock);
    }

    #[test]
    fn test_counters_advance_between_reports() {
        let (_, set) = render_basic();
        let mut generator = ReportGenerator::new(set.clone());
        let r0 = generator.next_report(1000, 1);
        let r1 = generator.next_report(1100, 1);

        let acc = accumulate(&set, &r0, &r1);
        assert_eq!(acc.gpu_time_cycles(), 100);
        assert_eq!(acc.deltas()[1], 100 * GT_CLOCKS_PER_TICK);
        assert!(acc.deltas()[2..].iter().all(|&d| d > 0));
    }

    #[test]
    fn test_anomaly_splits_reads() {
        let (descriptor, set) = render_basic();
        let mut device = SyntheticDevice::new(descriptor, set.clone());
        device.push_reports(1, 1);
        device.push_anomaly(AnomalyKind::ReportLost);
        device.push_reports(1, 1);

        let mut buf = vec![0u8; set.report_size() * 4];
        assert_eq!(
            device.read_reports(&mut buf).unwrap(),
            ReadOutcome::Data(set.report_size())
        );
        assert_eq!(device.read_reports(&mut buf).unwrap(), ReadOutcome::Anomaly);
        assert_eq!(device.stream_status().unwrap(), Some(AnomalyKind::ReportLost));
        assert_eq!(device.stream_status().unwrap(), None);
        assert_eq!(
            device.read_reports(&mut buf).unwrap(),
            ReadOutcome::Data(set.report_size())
        );
    }

    #[test]
    fn test_small_read_buffer_is_rejected() {
        let (descriptor, set) = render_basic();
        let mut device = SyntheticDevice::new(descriptor, set.clone());
        let mut buf = vec![0u8; set.report_size() - 1];
        assert!(device.read_reports(&mut buf).is_err());
    }

    #[test]
    fn test_live_generation() {
        let (descriptor, set) = render_basic();
        let mut device = SyntheticDevice::new(descriptor, set.clone())
            .with_period(Duration::from_micros(100))
            .live(4);
        std::thread::sleep(Duration::from_millis(5));

        let mut buf = vec![0u8; set.report_size() * 256];
        match device.read_reports(&mut buf).unwrap() {
            ReadOutcome::Data(n) => assert!(n >= set.report_size()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_correlation_point_is_monotonic() {
        let (descriptor, set) = render_basic();
        let mut device = SyntheticDevice::new(descriptor, set);
        let a = device.correlation_point(CorrelationClock::Mono).unwrap();
        std::thread::sleep(Duration::from_millis(1));
        let b = device.correlation_point(CorrelationClock::Mono).unwrap();
        assert!(b.cpu_timestamp > a.cpu_timestamp);
        assert!(b.gpu_timestamp > a.gpu_timestamp);
    }
}
