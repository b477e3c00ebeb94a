//! Recording parser
//!
//! Splits an encoded recording into its header trio and typed vectors of
//! data records, in source order. Sample payloads stay borrowed from the
//! input buffer.

use oatrace_gpu::layout::layout_by_format;
use oatrace_shared::protocol::record::{RawRecord, RECORD_FORMAT_VERSION};
use oatrace_shared::{
    AnomalyKind, CorrelationPoint, DeviceInfo, OaError, Record, RecordReader, RecordType, Topology,
};
use tracing::{debug, warn};

/// A Sample record's report bytes.
#[derive(Debug, Clone, Copy)]
pub struct SampleRef<'a> {
    /// Byte offset of the record in the recording
    pub offset: usize,
    pub report: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationRef {
    pub offset: usize,
    pub point: CorrelationPoint,
}

/// A ReportLost or BufferLost marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LostMarker {
    pub kind: AnomalyKind,
    pub offset: usize,
    /// Index of the first sample recorded after the loss
    pub next_sample: usize,
}

#[derive(Debug, Clone)]
pub struct ParsedRecording<'a> {
    pub version: u32,
    pub device_info: DeviceInfo,
    pub topology: Topology,
    pub samples: Vec<SampleRef<'a>>,
    pub correlations: Vec<CorrelationRef>,
    pub losses: Vec<LostMarker>,
    /// Offset of a record type from a newer format version where parsing
    /// stopped
    pub stopped_at: Option<usize>,
}

impl<'a> ParsedRecording<'a> {
    pub fn correlation_points(&self) -> Vec<CorrelationPoint> {
        self.correlations.iter().map(|c| c.point).collect()
    }

    /// Loss markers recorded strictly inside `[start, end)` samples, or just
    /// before the sample at `start`.
    pub fn losses_within(&self, start: usize, end: usize) -> impl Iterator<Item = &LostMarker> {
        self.losses
            .iter()
            .filter(move |l| l.next_sample >= start && l.next_sample < end)
    }
}

fn expect_header<'a>(
    records: &mut RecordReader<'a>,
    expected: RecordType,
) -> Result<(RawRecord<'a>, Record), OaError> {
    let offset = records.offset();
    let raw = records.next().ok_or_else(|| {
        OaError::malformed(offset, format!("recording ends before its {:?} record", expected))
    })??;

    if raw.record_type() != Some(expected) {
        return Err(OaError::malformed(
            raw.offset,
            format!(
                "expected {:?} record, found type 0x{:x}",
                expected, raw.header.record_type
            ),
        ));
    }
    let record = raw.decode()?;
    Ok((raw, record))
}

/// Parses a complete recording.
pub fn parse(data: &[u8]) -> Result<ParsedRecording<'_>, OaError> {
    let mut records = RecordReader::new(data);

    let version = match expect_header(&mut records, RecordType::Version)? {
        (_, Record::Version(v)) => v.version,
        (raw, _) => return Err(OaError::malformed(raw.offset, "bad Version record")),
    };
    if version == 0 {
        return Err(OaError::malformed(0, "format version 0"));
    }

    let device_info = match expect_header(&mut records, RecordType::DeviceInfo)? {
        (_, Record::DeviceInfo(info)) => info,
        (raw, _) => return Err(OaError::malformed(raw.offset, "bad DeviceInfo record")),
    };
    let topology = match expect_header(&mut records, RecordType::Topology)? {
        (_, Record::Topology(topology)) => topology,
        (raw, _) => return Err(OaError::malformed(raw.offset, "bad Topology record")),
    };

    let report_size = layout_by_format(device_info.oa_format).map(|l| l.report_size);

    let mut parsed = ParsedRecording {
        version,
        device_info,
        topology,
        samples: Vec::new(),
        correlations: Vec::new(),
        losses: Vec::new(),
        stopped_at: None,
    };

    for raw in records {
        let raw = raw?;
        let Some(record_type) = raw.record_type() else {
            if version > RECORD_FORMAT_VERSION {
                warn!(
                    "Stopping at record type 0x{:x} from format version {} (offset {})",
                    raw.header.record_type, version, raw.offset
                );
                parsed.stopped_at = Some(raw.offset);
                break;
            }
            return Err(OaError::malformed(
                raw.offset,
                format!("unknown record type 0x{:x}", raw.header.record_type),
            ));
        };

        match record_type {
            RecordType::Sample => {
                if let Some(size) = report_size {
                    if raw.payload.len() != size {
                        return Err(OaError::malformed(
                            raw.offset,
                            format!(
                                "sample of {} bytes, format {} reports are {} bytes",
                                raw.payload.len(),
                                parsed.device_info.oa_format,
                                size
                            ),
                        ));
                    }
                }
                parsed.samples.push(SampleRef {
                    offset: raw.offset,
                    report: raw.payload,
                });
            }
            RecordType::Correlation => {
                if let Record::Correlation(point) = raw.decode()? {
                    parsed.correlations.push(CorrelationRef {
                        offset: raw.offset,
                        point,
                    });
                }
            }
            RecordType::ReportLost | RecordType::BufferLost => {
                let kind = if record_type == RecordType::ReportLost {
                    AnomalyKind::ReportLost
                } else {
                    AnomalyKind::BufferLost
                };
                parsed.losses.push(LostMarker {
                    kind,
                    offset: raw.offset,
                    next_sample: parsed.samples.len(),
                });
            }
            RecordType::Version | RecordType::DeviceInfo | RecordType::Topology => {
                warn!(
                    "Ignoring repeated {:?} record at offset {}",
                    record_type, raw.offset
                );
            }
        }
    }

    debug!(
        "Parsed {} samples, {} correlation points, {} loss markers",
        parsed.samples.len(),
        parsed.correlations.len(),
        parsed.losses.len()
    );
    Ok(parsed)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use oatrace_shared::protocol::record::encode_sample;
    use oatrace_shared::{RecordVersion, Topology};

    pub(crate) fn device_info(oa_format: u32) -> DeviceInfo {
        DeviceInfo {
            timestamp_frequency: 19_200_000,
            device_id: 0x9a49,
            device_revision: 0,
            gt_min_frequency: 300,
            gt_max_frequency: 1300,
            engine_class: 0,
            engine_instance: 0,
            oa_format,
            metric_set_name: "RenderBasic".to_string(),
            metric_set_uuid: String::new(),
        }
    }

    fn header(version: u32, oa_format: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        Record::Version(RecordVersion { version })
            .encode_into(&mut buf)
            .unwrap();
        Record::DeviceInfo(device_info(oa_format))
            .encode_into(&mut buf)
            .unwrap();
        Record::Topology(Topology::fully_populated(1, 6, 16))
            .encode_into(&mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn test_parse_typed_vectors() {
        // format 0 has no known layout, any sample size passes
        let mut buf = header(1, 0);
        Record::Correlation(CorrelationPoint::new(10, 20))
            .encode_into(&mut buf)
            .unwrap();
        encode_sample(&[1u8; 16], &mut buf).unwrap();
        Record::ReportLost.encode_into(&mut buf).unwrap();
        encode_sample(&[2u8; 16], &mut buf).unwrap();
        Record::BufferLost.encode_into(&mut buf).unwrap();

        let parsed = parse(&buf).unwrap();
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.device_info.device_id, 0x9a49);
        assert_eq!(parsed.samples.len(), 2);
        assert_eq!(parsed.samples[1].report, &[2u8; 16]);
        assert_eq!(parsed.correlation_points(), vec![CorrelationPoint::new(10, 20)]);
        assert_eq!(parsed.losses.len(), 2);
        assert_eq!(parsed.losses[0].kind, AnomalyKind::ReportLost);
        assert_eq!(parsed.losses[0].next_sample, 1);
        assert_eq!(parsed.losses[1].next_sample, 2);
        assert_eq!(parsed.losses_within(0, 2).count(), 1);
        assert!(parsed.stopped_at.is_none());
    }

    #[test]
    fn test_missing_header_is_malformed() {
        let mut buf = Vec::new();
        Record::Version(RecordVersion { version: 1 })
            .encode_into(&mut buf)
            .unwrap();
        Record::Topology(Topology::fully_populated(1, 1, 8))
            .encode_into(&mut buf)
            .unwrap();

        let err = parse(&buf).unwrap_err();
        assert!(matches!(err, OaError::MalformedRecording { .. }));
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn test_truncated_record_reports_offset() {
        let mut buf = header(1, 0);
        let offset = buf.len();
        encode_sample(&[0u8; 32], &mut buf).unwrap();
        buf.truncate(buf.len() - 4);

        match parse(&buf).unwrap_err() {
            OaError::MalformedRecording { offset: at, .. } => assert_eq!(at, offset),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sample_size_checked_against_format() {
        let mut buf = header(1, 5);
        encode_sample(&[0u8; 100], &mut buf).unwrap();
        assert!(parse(&buf).is_err());
    }

    fn unknown_record(buf: &mut Vec<u8>) {
        buf.extend_from_slice(&0x20000u32.to_le_bytes());
        buf.extend_from_slice(&12u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
    }

    #[test]
    fn test_unknown_type_in_newer_version_stops() {
        let mut buf = header(2, 0);
        encode_sample(&[1u8; 8], &mut buf).unwrap();
        let offset = buf.len();
        unknown_record(&mut buf);
        encode_sample(&[1u8; 8], &mut buf).unwrap();

        let parsed = parse(&buf).unwrap();
        assert_eq!(parsed.samples.len(), 1);
        assert_eq!(parsed.stopped_at, Some(offset));
    }

    #[test]
    fn test_unknown_type_in_current_version_fails() {
        let mut buf = header(1, 0);
        unknown_record(&mut buf);
        assert!(matches!(
            parse(&buf).unwrap_err(),
            OaError::MalformedRecording { .. }
        ));
    }
}
