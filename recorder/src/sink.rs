//! Record sinks
//!
//! The recorder appends encoded records through one write path, regardless of
//! whether they end up in a file or in the in-memory ring.

use oatrace_shared::protocol::record::encode_sample;
use oatrace_shared::{OaError, Record};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::circular::CircularBuffer;
use crate::metrics;

/// Destination of encoded records.
pub trait Sink: Send {
    /// Append whole encoded records.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), OaError>;

    fn flush(&mut self) -> Result<(), OaError>;

    /// Copy of everything currently retained, if the sink keeps its contents
    /// in memory.
    fn snapshot(&self) -> Option<Vec<u8>> {
        None
    }

    /// Whether [`Sink::snapshot`] returns anything.
    fn can_snapshot(&self) -> bool {
        false
    }

    /// Whether the recording header must be written at the start of the
    /// sink. In-memory rings get it prepended at dump time instead.
    fn wants_header(&self) -> bool {
        true
    }
}

/// Encodes records into a reusable scratch buffer before handing them to a
/// [`Sink`].
#[derive(Default)]
pub struct RecordWriter {
    scratch: Vec<u8>,
}

impl RecordWriter {
    pub fn write_record(&mut self, sink: &mut dyn Sink, record: &Record) -> Result<(), OaError> {
        self.scratch.clear();
        record.encode_into(&mut self.scratch)?;
        sink.write_bytes(&self.scratch)
    }

    /// Wraps each `report_size` chunk of `reports` into a Sample record.
    pub fn write_samples(
        &mut self,
        sink: &mut dyn Sink,
        reports: &[u8],
        report_size: usize,
    ) -> Result<usize, OaError> {
        let mut count = 0;
        for report in reports.chunks_exact(report_size) {
            self.scratch.clear();
            encode_sample(report, &mut self.scratch)?;
            sink.write_bytes(&self.scratch)?;
            count += 1;
        }
        Ok(count)
    }
}

pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: &Path) -> Result<Self, OaError> {
        let file = File::create(path)?;
        debug!("Recording to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for FileSink {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), OaError> {
        self.writer.write_all(bytes)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OaError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Sink for CircularBuffer {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), OaError> {
        let before = self.evicted_bytes();
        self.write(bytes)?;
        let evicted = self.evicted_bytes() - before;
        if evicted > 0 {
            metrics::BYTES_EVICTED.inc_by(evicted);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OaError> {
        Ok(())
    }

    fn snapshot(&self) -> Option<Vec<u8>> {
        Some(self.read_available(self.used_size()))
    }

    fn can_snapshot(&self) -> bool {
        true
    }

    fn wants_header(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oatrace_shared::protocol::record::RecordReader;
    use oatrace_shared::CorrelationPoint;

    #[test]
    fn test_file_sink_writes_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.record");

        let mut sink = FileSink::create(&path).unwrap();
        let mut writer = RecordWriter::default();
        writer
            .write_record(&mut sink, &Record::Correlation(CorrelationPoint::new(1, 2)))
            .unwrap();
        assert_eq!(writer.write_samples(&mut sink, &[7u8; 64], 32).unwrap(), 2);
        sink.flush().unwrap();
        assert!(sink.snapshot().is_none());
        assert!(sink.wants_header());

        let bytes = std::fs::read(sink.path()).unwrap();
        let records: Vec<_> = RecordReader::new(&bytes)
            .map(|r| r.unwrap().decode().unwrap())
            .collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1], Record::Sample(vec![7u8; 32]));
    }

    #[test]
    fn test_circular_sink_snapshot() {
        let mut ring = CircularBuffer::new(4096);
        let mut writer = RecordWriter::default();
        writer.write_record(&mut ring, &Record::ReportLost).unwrap();
        writer.write_samples(&mut ring, &[1u8; 16], 16).unwrap();

        let snapshot = ring.snapshot().unwrap();
        assert_eq!(snapshot.len(), 8 + 24);
        assert!(!ring.wants_header());
        // the ring keeps its contents after a snapshot
        assert_eq!(ring.used_size(), snapshot.len());
    }

    #[test]
    fn test_trailing_partial_report_is_ignored() {
        let mut ring = CircularBuffer::new(4096);
        let mut writer = RecordWriter::default();
        assert_eq!(writer.write_samples(&mut ring, &[0u8; 40], 16).unwrap(), 2);
    }
}
