//! Recorder control loop
//!
//! One thread owns the device, the sink and the command fifo. Each
//! iteration waits in `poll()` until the device or the fifo is readable or
//! the next correlation point is due, then services whatever woke it.

use anyhow::Context;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use oatrace_gpu::MetricSet;
use oatrace_shared::protocol::command::Command;
use oatrace_shared::protocol::record::RECORD_FORMAT_VERSION;
use oatrace_shared::{
    AnomalyKind, CorrelationPoint, DeviceInfo, OaError, Record, RecordVersion, Topology,
};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::command::CommandChannel;
use crate::config::RecorderConfig;
use crate::correlation::{CorrelationClock, CorrelationTracker};
use crate::device::{OaDevice, ReadOutcome};
use crate::metrics;
use crate::retry::retry_with_backoff;
use crate::sink::{FileSink, RecordWriter, Sink};

/// Longest wait when the device has no descriptor to poll.
const UNPOLLABLE_DEVICE_WAIT: Duration = Duration::from_millis(5);

/// Reads serviced per wakeup before the loop looks at the fifo again.
const MAX_READS_PER_WAKEUP: usize = 64;

const QUERY_ATTEMPTS: u32 = 3;
const QUERY_INITIAL_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct RecorderOptions {
    pub correlation_period: Duration,
    pub correlation_slack: Duration,
    pub correlation_clock: CorrelationClock,
    pub engine_class: u32,
    pub engine_instance: u32,
    pub read_chunk_size: usize,
    /// Circular mode: write the ring here when recording stops
    pub shutdown_dump: Option<PathBuf>,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            correlation_period: Duration::from_secs(1),
            correlation_slack: Duration::from_millis(1),
            correlation_clock: CorrelationClock::default(),
            engine_class: 0,
            engine_instance: 0,
            read_chunk_size: 64 * 1024,
            shutdown_dump: None,
        }
    }
}

impl RecorderOptions {
    pub fn from_config(config: &RecorderConfig, shutdown_dump: Option<PathBuf>) -> Self {
        Self {
            correlation_period: config.correlation_period(),
            correlation_slack: config.correlation_slack(),
            correlation_clock: config.correlation_clock,
            engine_class: config.engine_class,
            engine_instance: config.engine_instance,
            read_chunk_size: config.read_chunk_size,
            shutdown_dump,
        }
    }
}

/// Counts of what the recorder wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub samples: u64,
    pub report_lost: u64,
    pub buffer_lost: u64,
    pub correlations: u64,
    pub dumps: u64,
}

pub struct Recorder<D: OaDevice> {
    device: D,
    metric_set: MetricSet,
    device_info: DeviceInfo,
    topology: Topology,
    sink: Box<dyn Sink>,
    commands: Option<CommandChannel>,
    tracker: CorrelationTracker,
    clock: CorrelationClock,
    shutdown_dump: Option<PathBuf>,
    writer: RecordWriter,
    read_buf: Vec<u8>,
    quit: Arc<AtomicBool>,
    stats: RecorderStats,
}

impl<D: OaDevice> Recorder<D> {
    pub fn new(
        device: D,
        metric_set: MetricSet,
        sink: Box<dyn Sink>,
        commands: Option<CommandChannel>,
        options: RecorderOptions,
    ) -> Self {
        let descriptor = device.descriptor();
        let device_info = DeviceInfo {
            timestamp_frequency: descriptor.timestamp_frequency,
            device_id: descriptor.device_id,
            device_revision: descriptor.revision,
            gt_min_frequency: descriptor.gt_min_frequency,
            gt_max_frequency: descriptor.gt_max_frequency,
            engine_class: options.engine_class,
            engine_instance: options.engine_instance,
            oa_format: metric_set.layout.format_id,
            metric_set_name: metric_set.symbol_name.to_string(),
            metric_set_uuid: metric_set.hw_config_uuid.to_string(),
        };
        let topology = descriptor.topology.clone();

        let report_size = metric_set.report_size();
        let chunk = (options.read_chunk_size / report_size).max(1) * report_size;

        Self {
            device,
            metric_set,
            device_info,
            topology,
            sink,
            commands,
            tracker: CorrelationTracker::new(
                options.correlation_period,
                options.correlation_slack,
                Instant::now(),
            ),
            clock: options.correlation_clock,
            shutdown_dump: options.shutdown_dump,
            writer: RecordWriter::default(),
            read_buf: vec![0u8; chunk],
            quit: Arc::new(AtomicBool::new(false)),
            stats: RecorderStats::default(),
        }
    }

    /// Flag that stops the loop at its next iteration when set.
    pub fn quit_handle(&self) -> Arc<AtomicBool> {
        self.quit.clone()
    }

    pub fn stats(&self) -> RecorderStats {
        self.stats
    }

    fn header_records(&self) -> [Record; 3] {
        [
            Record::Version(RecordVersion {
                version: RECORD_FORMAT_VERSION,
            }),
            Record::DeviceInfo(self.device_info.clone()),
            Record::Topology(self.topology.clone()),
        ]
    }

    /// Writes the recording header, when the sink wants one, and the first
    /// correlation point.
    pub fn start(&mut self) -> Result<(), OaError> {
        info!(
            "Recording metric set {} (format {}, {} byte reports)",
            self.metric_set.symbol_name,
            self.metric_set.layout.name,
            self.metric_set.report_size()
        );
        if self.sink.wants_header() {
            for record in self.header_records() {
                self.writer.write_record(self.sink.as_mut(), &record)?;
            }
        }
        self.sample_correlation()?;
        Ok(())
    }

    /// Moves everything the device has ready into the sink.
    pub fn drain_device(&mut self) -> Result<u64, OaError> {
        let report_size = self.metric_set.report_size();
        let mut written = 0;

        for _ in 0..MAX_READS_PER_WAKEUP {
            match self.device.read_reports(&mut self.read_buf) {
                Ok(ReadOutcome::Data(len)) => {
                    if len % report_size != 0 {
                        warn!(
                            "Device returned {} bytes, not a multiple of {}; dropping the tail",
                            len, report_size
                        );
                    }
                    let count = self.writer.write_samples(
                        self.sink.as_mut(),
                        &self.read_buf[..len],
                        report_size,
                    )? as u64;
                    written += count;
                }
                Ok(ReadOutcome::WouldBlock) => break,
                Ok(ReadOutcome::Anomaly) => self.handle_anomaly()?,
                Err(e) if e.is_transient() => break,
                Err(e) => return Err(e),
            }
        }

        self.stats.samples += written;
        metrics::SAMPLES_TOTAL.inc_by(written);
        Ok(written)
    }

    fn handle_anomaly(&mut self) -> Result<(), OaError> {
        let device = &mut self.device;
        let status = retry_with_backoff("stream status", QUERY_ATTEMPTS, QUERY_INITIAL_DELAY, || {
            device.stream_status()
        })?;

        let Some(kind) = status else {
            debug!("Device signalled an anomaly but reported no status");
            return Ok(());
        };

        let (record, label) = match kind {
            AnomalyKind::ReportLost => {
                self.stats.report_lost += 1;
                (Record::ReportLost, "report_lost")
            }
            AnomalyKind::BufferLost => {
                self.stats.buffer_lost += 1;
                (Record::BufferLost, "buffer_lost")
            }
        };
        warn!("OA stream anomaly: {}", OaError::StreamAnomaly(kind));
        metrics::ANOMALIES_TOTAL.with_label_values(&[label]).inc();
        self.writer.write_record(self.sink.as_mut(), &record)
    }

    /// Samples a correlation point and appends it to the sink.
    pub fn sample_correlation(&mut self) -> Result<CorrelationPoint, OaError> {
        let device = &mut self.device;
        let clock = self.clock;
        let point = retry_with_backoff("correlation", QUERY_ATTEMPTS, QUERY_INITIAL_DELAY, || {
            device.correlation_point(clock)
        })?;

        self.writer
            .write_record(self.sink.as_mut(), &Record::Correlation(point))?;
        self.tracker.record(point, Instant::now());
        self.stats.correlations += 1;
        metrics::CORRELATIONS_TOTAL.inc();
        debug!(
            "Correlation cpu={} gpu={}",
            point.cpu_timestamp, point.gpu_timestamp
        );
        Ok(point)
    }

    /// Writes a self-contained recording of the sink's retained records to
    /// `path`.
    pub fn dump_to(&mut self, path: &Path) -> Result<(), OaError> {
        let no_ring = || OaError::InvalidCommand("dump requires a circular buffer".to_string());
        if !self.sink.can_snapshot() {
            return Err(no_ring());
        }

        self.sink.flush()?;
        let anchor = self.tracker.last();
        // the snapshot then ends with a fresh point
        self.sample_correlation()?;
        let snapshot = self.sink.snapshot().ok_or_else(no_ring)?;

        let mut file = FileSink::create(path)?;
        for record in self.header_records() {
            self.writer.write_record(&mut file, &record)?;
        }
        if let Some(point) = anchor {
            self.writer
                .write_record(&mut file, &Record::Correlation(point))?;
        }
        file.write_bytes(&snapshot)?;
        file.flush()?;

        self.stats.dumps += 1;
        metrics::DUMPS_TOTAL.inc();
        info!("Dumped {} bytes to {}", snapshot.len(), path.display());
        Ok(())
    }

    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::Dump(path) => {
                if let Err(e) = self.dump_to(&path) {
                    error!("Dump to {} failed: {}", path.display(), e);
                }
            }
            Command::Quit => {
                info!("Quit requested");
                self.quit.store(true, Ordering::Relaxed);
            }
        }
    }

    /// Blocks until the device or the fifo is readable or `timeout` passes.
    fn wait(&self, timeout: Duration) -> Result<(bool, bool), OaError> {
        let device_fd = self.device.poll_fd();
        let command_fd = self.commands.as_ref().map(|c| c.as_fd());
        let timeout = match device_fd {
            Some(_) => timeout,
            None => timeout.min(UNPOLLABLE_DEVICE_WAIT),
        };

        let mut fds = Vec::with_capacity(2);
        if let Some(fd) = device_fd.as_ref() {
            fds.push(PollFd::new(fd, PollFlags::POLLIN));
        }
        if let Some(fd) = command_fd.as_ref() {
            fds.push(PollFd::new(fd, PollFlags::POLLIN));
        }

        let timeout_ms = timeout.as_micros().div_ceil(1000).min(i32::MAX as u128) as i32;
        match poll(&mut fds, timeout_ms) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok((false, false)),
            Err(e) => return Err(std::io::Error::from(e).into()),
        }

        let ready = |fd: &PollFd| {
            fd.revents().map_or(false, |r| {
                r.intersects(PollFlags::POLLIN | PollFlags::POLLERR | PollFlags::POLLHUP)
            })
        };
        let (device_ready, next) = match device_fd {
            Some(_) => (ready(&fds[0]), 1),
            None => (true, 0),
        };
        let commands_ready = command_fd.is_some() && ready(&fds[next]);
        Ok((device_ready, commands_ready))
    }

    fn service_commands(&mut self) -> Result<(), OaError> {
        let Some(channel) = self.commands.as_mut() else {
            return Ok(());
        };
        for command in channel.read_commands()? {
            self.handle_command(command);
        }
        Ok(())
    }

    fn run_loop(&mut self) -> Result<(), OaError> {
        while !self.quit.load(Ordering::Relaxed) {
            if self.tracker.is_due(Instant::now()) {
                self.sample_correlation()?;
            }

            let timeout = self.tracker.time_until_due(Instant::now());
            let (device_ready, commands_ready) = self.wait(timeout)?;
            if device_ready {
                self.drain_device()?;
            }
            if commands_ready {
                self.service_commands()?;
            }
        }
        Ok(())
    }

    /// Final drain, closing correlation point and flush. In circular mode the
    /// ring is written to the shutdown path, if any.
    pub fn finish(&mut self) -> Result<(), OaError> {
        self.drain_device()?;
        self.sample_correlation()?;
        self.sink.flush()?;
        if let Some(path) = self.shutdown_dump.take() {
            self.dump_to(&path)?;
        }
        info!(
            "Recording stopped: {} samples, {} report lost, {} buffer lost, {} correlation points",
            self.stats.samples, self.stats.report_lost, self.stats.buffer_lost, self.stats.correlations
        );
        Ok(())
    }

    /// Runs until quit is requested, then flushes.
    pub fn run(&mut self) -> anyhow::Result<RecorderStats> {
        self.start().context("Failed to start recording")?;
        let looped = self.run_loop();
        let finished = self.finish();
        looped.context("Recorder loop failed")?;
        finished.context("Failed to flush recording")?;
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circular::CircularBuffer;
    use crate::device::SyntheticDevice;
    use oatrace_gpu::Catalog;
    use oatrace_shared::protocol::record::RecordReader;

    fn synthetic(reports: usize) -> (SyntheticDevice, MetricSet) {
        let descriptor = SyntheticDevice::descriptor_for(0x9a49);
        let catalog = Catalog::load(&descriptor).unwrap();
        let set = catalog.metric_set("RenderBasic").unwrap().clone();
        let mut device = SyntheticDevice::new(descriptor, set.clone());
        device.push_reports(reports, 1);
        (device, set)
    }

    fn records(bytes: &[u8]) -> Vec<Record> {
        RecordReader::new(bytes)
            .map(|r| r.unwrap().decode().unwrap())
            .collect()
    }

    #[test]
    fn test_file_recording_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.record");
        let (device, set) = synthetic(4);
        let sink = Box::new(FileSink::create(&path).unwrap());
        let mut recorder = Recorder::new(device, set, sink, None, RecorderOptions::default());

        recorder.start().unwrap();
        assert_eq!(recorder.drain_device().unwrap(), 4);
        recorder.finish().unwrap();

        let records = records(&std::fs::read(&path).unwrap());
        assert!(matches!(records[0], Record::Version(RecordVersion { version: 1 })));
        assert!(matches!(records[1], Record::DeviceInfo(_)));
        assert!(matches!(records[2], Record::Topology(_)));
        assert!(matches!(records[3], Record::Correlation(_)));
        assert!(records[4..8].iter().all(|r| matches!(r, Record::Sample(_))));
        assert!(matches!(records[8], Record::Correlation(_)));
        assert_eq!(records.len(), 9);
        assert_eq!(recorder.stats().samples, 4);
    }

    #[test]
    fn test_anomaly_becomes_marker() {
        let (mut device, set) = synthetic(2);
        device.push_anomaly(AnomalyKind::BufferLost);
        device.push_reports(1, 1);

        let sink = Box::new(CircularBuffer::new(64 * 1024));
        let mut recorder = Recorder::new(device, set, sink, None, RecorderOptions::default());
        assert_eq!(recorder.drain_device().unwrap(), 3);
        assert_eq!(recorder.stats().buffer_lost, 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.record");
        recorder.dump_to(&path).unwrap();

        let kinds: Vec<_> = records(&std::fs::read(&path).unwrap())
            .iter()
            .map(|r| r.record_type())
            .collect();
        use oatrace_shared::RecordType as T;
        assert_eq!(
            kinds,
            vec![
                T::Version,
                T::DeviceInfo,
                T::Topology,
                T::Sample,
                T::Sample,
                T::BufferLost,
                T::Sample,
                T::Correlation
            ]
        );
    }

    #[test]
    fn test_dump_requires_ring() {
        let dir = tempfile::tempdir().unwrap();
        let (device, set) = synthetic(1);
        let sink = Box::new(FileSink::create(&dir.path().join("out.record")).unwrap());
        let mut recorder = Recorder::new(device, set, sink, None, RecorderOptions::default());
        recorder.start().unwrap();

        let err = recorder.dump_to(&dir.path().join("dump.record")).unwrap_err();
        assert!(matches!(err, OaError::InvalidCommand(_)));
        assert!(!dir.path().join("dump.record").exists());
        assert_eq!(recorder.stats().correlations, 1);

        // the rejected dump left nothing in the live recording
        recorder.finish().unwrap();
        let records = records(&std::fs::read(dir.path().join("out.record")).unwrap());
        let correlations = records
            .iter()
            .filter(|r| matches!(r, Record::Correlation(_)))
            .count();
        assert_eq!(correlations, 2);
        assert_eq!(records.len(), 3 + 1 + 1 + 1);
    }

    #[test]
    fn test_dump_starts_with_previous_anchor() {
        let (device, set) = synthetic(3);
        let sink = Box::new(CircularBuffer::new(64 * 1024));
        let mut recorder = Recorder::new(device, set, sink, None, RecorderOptions::default());
        recorder.start().unwrap();
        recorder.drain_device().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.record");
        recorder.dump_to(&path).unwrap();

        let records = records(&std::fs::read(&path).unwrap());
        // anchor, then the ring: initial point, samples, fresh point
        assert!(matches!(records[3], Record::Correlation(_)));
        assert!(matches!(records[4], Record::Correlation(_)));
        assert!(matches!(records.last(), Some(Record::Correlation(_))));
        assert_eq!(recorder.stats().dumps, 1);
    }

    #[test]
    fn test_quit_command_stops_run() {
        let (device, set) = synthetic(2);
        let sink = Box::new(CircularBuffer::new(64 * 1024));
        let mut recorder = Recorder::new(device, set, sink, None, RecorderOptions::default());
        recorder.handle_command(Command::Quit);

        let stats = recorder.run().unwrap();
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.correlations, 2);
    }

    #[test]
    fn test_read_buffer_holds_whole_reports() {
        let (device, set) = synthetic(0);
        let options = RecorderOptions {
            read_chunk_size: set.report_size() * 3 + 7,
            ..Default::default()
        };
        let sink = Box::new(CircularBuffer::new(64 * 1024));
        let recorder = Recorder::new(device, set.clone(), sink, None, options);
        assert_eq!(recorder.read_buf.len(), set.report_size() * 3);
    }
}
