//! Binary record stream
//!
//! A recording is a flat sequence of records, each prefixed with a little
//! endian `{ type: u32, size: u32 }` header where `size` includes the header
//! itself. `size` is the only thing used to skip from one record to the next.
//!
//! ```text
//! Version | DeviceInfo | Topology | (Correlation | Sample | ReportLost | BufferLost)*
//! ```
//!
//! Structured payloads are encoded with bincode (fixint, little endian) so the
//! writer and the reader always agree on field widths. Sample payloads are the
//! raw OA report bytes; loss markers have no payload.

use crate::error::OaError;
use crate::types::device::{CorrelationPoint, DeviceInfo, RecordVersion, Topology};
use bincode::Options;
use bytes::{Buf, BufMut};

/// Size of the `{ type, size }` envelope.
pub const RECORD_HEADER_SIZE: usize = 8;

/// Version of the recording format written by this crate.
pub const RECORD_FORMAT_VERSION: u32 = 1;

fn record_bincode() -> impl bincode::config::Options {
    bincode::config::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .allow_trailing_bytes()
}

/// Record type identifiers.
///
/// The first three match the numbering of the kernel OA stream, the
/// recorder's own metadata records start at 65536.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RecordType {
    Sample = 1,
    ReportLost = 2,
    BufferLost = 3,
    Version = 1 << 16,
    DeviceInfo = (1 << 16) + 1,
    Topology = (1 << 16) + 2,
    Correlation = (1 << 16) + 3,
}

impl RecordType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(RecordType::Sample),
            2 => Some(RecordType::ReportLost),
            3 => Some(RecordType::BufferLost),
            0x10000 => Some(RecordType::Version),
            0x10001 => Some(RecordType::DeviceInfo),
            0x10002 => Some(RecordType::Topology),
            0x10003 => Some(RecordType::Correlation),
            _ => None,
        }
    }
}

/// Record envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_type: u32,
    /// Total record size, header included
    pub size: u32,
}

impl RecordHeader {
    /// Read a header from the front of `bytes`, `None` if fewer than
    /// [`RECORD_HEADER_SIZE`] bytes are available.
    pub fn peek(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return None;
        }
        let record_type = bytes.get_u32_le();
        let size = bytes.get_u32_le();
        Some(Self { record_type, size })
    }

    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.record_type);
        buf.put_u32_le(self.size);
    }

    fn for_payload(record_type: RecordType, payload_len: usize) -> Result<Self, OaError> {
        let size = u32::try_from(RECORD_HEADER_SIZE + payload_len).map_err(|_| {
            OaError::RecordTooLarge {
                size: RECORD_HEADER_SIZE + payload_len,
                capacity: u32::MAX as usize,
            }
        })?;
        Ok(Self {
            record_type: record_type as u32,
            size,
        })
    }
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Version(RecordVersion),
    DeviceInfo(DeviceInfo),
    Topology(Topology),
    Correlation(CorrelationPoint),
    /// Raw OA report bytes
    Sample(Vec<u8>),
    ReportLost,
    BufferLost,
}

impl Record {
    pub fn record_type(&self) -> RecordType {
        match self {
            Record::Version(_) => RecordType::Version,
            Record::DeviceInfo(_) => RecordType::DeviceInfo,
            Record::Topology(_) => RecordType::Topology,
            Record::Correlation(_) => RecordType::Correlation,
            Record::Sample(_) => RecordType::Sample,
            Record::ReportLost => RecordType::ReportLost,
            Record::BufferLost => RecordType::BufferLost,
        }
    }

    /// Append the encoded record (header and payload) to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), OaError> {
        let payload = match self {
            Record::Version(v) => record_bincode().serialize(v)?,
            Record::DeviceInfo(info) => record_bincode().serialize(info)?,
            Record::Topology(topo) => record_bincode().serialize(topo)?,
            Record::Correlation(corr) => record_bincode().serialize(corr)?,
            Record::Sample(report) => return encode_sample(report, buf),
            Record::ReportLost | Record::BufferLost => Vec::new(),
        };

        let header = RecordHeader::for_payload(self.record_type(), payload.len())?;
        buf.reserve(header.size as usize);
        header.write_to(buf);
        buf.put_slice(&payload);
        Ok(())
    }

    /// Encode into a freshly allocated buffer.
    pub fn encode(&self) -> Result<Vec<u8>, OaError> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }
}

/// Append a Sample record wrapping `report` without copying it into a [`Record`].
pub fn encode_sample(report: &[u8], buf: &mut Vec<u8>) -> Result<(), OaError> {
    let header = RecordHeader::for_payload(RecordType::Sample, report.len())?;
    buf.reserve(header.size as usize);
    header.write_to(buf);
    buf.put_slice(report);
    Ok(())
}

/// A record borrowed from an encoded stream, not yet decoded.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    /// Byte offset of the header within the stream
    pub offset: usize,
    pub header: RecordHeader,
    pub payload: &'a [u8],
}

impl<'a> RawRecord<'a> {
    pub fn record_type(&self) -> Option<RecordType> {
        RecordType::from_u32(self.header.record_type)
    }

    /// Decode the payload into a typed [`Record`].
    pub fn decode(&self) -> Result<Record, OaError> {
        let malformed = |e: bincode::Error| {
            OaError::malformed(
                self.offset,
                format!("bad payload for record type 0x{:x}: {}", self.header.record_type, e),
            )
        };

        let record = match self.record_type() {
            Some(RecordType::Version) => {
                Record::Version(record_bincode().deserialize(self.payload).map_err(malformed)?)
            }
            Some(RecordType::DeviceInfo) => {
                Record::DeviceInfo(record_bincode().deserialize(self.payload).map_err(malformed)?)
            }
            Some(RecordType::Topology) => {
                Record::Topology(record_bincode().deserialize(self.payload).map_err(malformed)?)
            }
            Some(RecordType::Correlation) => {
                Record::Correlation(record_bincode().deserialize(self.payload).map_err(malformed)?)
            }
            Some(RecordType::Sample) => Record::Sample(self.payload.to_vec()),
            Some(RecordType::ReportLost) => Record::ReportLost,
            Some(RecordType::BufferLost) => Record::BufferLost,
            None => {
                return Err(OaError::malformed(
                    self.offset,
                    format!("unknown record type 0x{:x}", self.header.record_type),
                ))
            }
        };
        Ok(record)
    }
}

/// Front-to-back iterator over the records of an encoded stream.
///
/// Stops after the first structural error, which is yielded once.
#[derive(Debug, Clone)]
pub struct RecordReader<'a> {
    data: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> RecordReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            failed: false,
        }
    }

    /// Byte offset of the next record.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for RecordReader<'a> {
    type Item = Result<RawRecord<'a>, OaError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.data.len() {
            return None;
        }

        let remaining = &self.data[self.offset..];
        let Some(header) = RecordHeader::peek(remaining) else {
            self.failed = true;
            return Some(Err(OaError::malformed(
                self.offset,
                format!("truncated record header ({} bytes left)", remaining.len()),
            )));
        };

        let size = header.size as usize;
        if size < RECORD_HEADER_SIZE {
            self.failed = true;
            return Some(Err(OaError::malformed(
                self.offset,
                format!("record size {} smaller than header", size),
            )));
        }
        if size > remaining.len() {
            self.failed = true;
            return Some(Err(OaError::malformed(
                self.offset,
                format!(
                    "record size {} exceeds the {} bytes left in the stream",
                    size,
                    remaining.len()
                ),
            )));
        }

        let raw = RawRecord {
            offset: self.offset,
            header,
            payload: &remaining[RECORD_HEADER_SIZE..size],
        };
        self.offset += size;
        Some(Ok(raw))
    }
}
