//! Bounded ring of records
//!
//! The region `[begin, begin + used)` (modulo capacity) always holds a
//! sequence of whole records. Room for a new record is made by evicting the
//! oldest records one header at a time, never by cutting one in half.

use oatrace_shared::protocol::record::{RecordHeader, RECORD_HEADER_SIZE};
use oatrace_shared::OaError;

/// Smallest buffer the recorder accepts.
pub const MIN_CIRCULAR_SIZE: usize = 8 * 1024;

pub struct CircularBuffer {
    data: Box<[u8]>,
    begin: usize,
    used: usize,
    evicted_bytes: u64,
}

impl CircularBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            begin: 0,
            used: 0,
            evicted_bytes: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn used_size(&self) -> usize {
        self.used
    }

    pub fn available_space(&self) -> usize {
        self.capacity() - self.used
    }

    /// Total bytes dropped by eviction since creation.
    pub fn evicted_bytes(&self) -> u64 {
        self.evicted_bytes
    }

    /// Appends `bytes`, a sequence of whole records, evicting old records
    /// when there is not enough room.
    ///
    /// # Panics
    ///
    /// Panics when `bytes` does not end on a record boundary.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), OaError> {
        if bytes.len() > self.capacity() {
            return Err(OaError::RecordTooLarge {
                size: bytes.len(),
                capacity: self.capacity(),
            });
        }
        assert!(
            is_record_sequence(bytes),
            "circular buffer writes must contain whole records"
        );

        if bytes.len() > self.available_space() {
            self.shrink(bytes.len());
        }

        let end = (self.begin + self.used) % self.capacity().max(1);
        let first = bytes.len().min(self.capacity() - end);
        self.data[end..end + first].copy_from_slice(&bytes[..first]);
        self.data[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        self.used += bytes.len();
        Ok(())
    }

    /// Evicts whole records from the front until at least `target` bytes are
    /// free or the buffer is empty. Returns the number of bytes evicted.
    pub fn shrink(&mut self, target: usize) -> usize {
        let mut freed = 0;

        while self.available_space() < target && self.used > 0 {
            let size = self.peek_record_size();
            assert!(
                size >= RECORD_HEADER_SIZE && size <= self.used,
                "corrupt record header in circular buffer"
            );
            self.begin = (self.begin + size) % self.capacity();
            self.used -= size;
            freed += size;
        }

        if self.used == 0 {
            self.begin = 0;
        }
        self.evicted_bytes += freed as u64;
        freed
    }

    /// Copies out up to `max` bytes starting at the oldest record without
    /// consuming them.
    pub fn read_available(&self, max: usize) -> Vec<u8> {
        let (head, tail) = self.chunks();
        let len = max.min(self.used);
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&head[..len.min(head.len())]);
        if len > head.len() {
            out.extend_from_slice(&tail[..len - head.len()]);
        }
        out
    }

    /// The used region as up to two contiguous slices, oldest bytes first.
    pub fn chunks(&self) -> (&[u8], &[u8]) {
        if self.used == 0 {
            return (&[], &[]);
        }
        let first = self.used.min(self.capacity() - self.begin);
        (
            &self.data[self.begin..self.begin + first],
            &self.data[..self.used - first],
        )
    }

    fn peek_record_size(&self) -> usize {
        let mut header = [0u8; RECORD_HEADER_SIZE];
        for (i, byte) in header.iter_mut().enumerate() {
            *byte = self.data[(self.begin + i) % self.capacity()];
        }
        RecordHeader::peek(&header)
            .map(|h| h.size as usize)
            .unwrap_or(0)
    }
}

fn is_record_sequence(mut bytes: &[u8]) -> bool {
    while !bytes.is_empty() {
        match RecordHeader::peek(bytes) {
            Some(h) if h.size as usize >= RECORD_HEADER_SIZE && h.size as usize <= bytes.len() => {
                bytes = &bytes[h.size as usize..];
            }
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use oatrace_shared::protocol::record::RecordReader;
    use oatrace_shared::{CorrelationPoint, Record};

    fn sample(len: usize, fill: u8) -> Vec<u8> {
        Record::Sample(vec![fill; len]).encode().unwrap()
    }

    fn record_sizes(bytes: &[u8]) -> Vec<usize> {
        RecordReader::new(bytes)
            .map(|r| r.unwrap().header.size as usize)
            .collect()
    }

    #[test]
    fn test_write_and_read_back() {
        let mut buf = CircularBuffer::new(1024);
        let a = sample(16, 1);
        let b = Record::Correlation(CorrelationPoint::new(10, 20)).encode().unwrap();
        buf.write(&a).unwrap();
        buf.write(&b).unwrap();

        assert_eq!(buf.used_size(), a.len() + b.len());
        assert_eq!(buf.available_space(), 1024 - a.len() - b.len());
        assert_eq!(buf.read_available(usize::MAX), [a, b].concat());
    }

    #[test]
    fn test_eviction_drops_oldest_whole_records() {
        // two 40-byte records fit in 100 bytes
        let mut buf = CircularBuffer::new(100);
        for fill in 0..4u8 {
            buf.write(&sample(32, fill)).unwrap();
        }

        assert_eq!(buf.used_size(), 80);
        let contents = buf.read_available(usize::MAX);
        assert_eq!(record_sizes(&contents), vec![40, 40]);
        assert_eq!(contents[8], 2);
        assert_eq!(contents[48], 3);
        assert_eq!(buf.evicted_bytes(), 80);
    }

    #[test]
    fn test_wrapped_header_is_peeked() {
        let mut buf = CircularBuffer::new(100);
        buf.write(&sample(52, 0)).unwrap(); // 60 bytes
        buf.write(&sample(28, 1)).unwrap(); // 36 bytes, ends at 96
        buf.write(&sample(28, 2)).unwrap(); // evicts the first, wraps around

        let (head, tail) = buf.chunks();
        assert_eq!(head.len(), 36 + 4);
        assert_eq!(tail.len(), 32);
        assert_eq!(record_sizes(&buf.read_available(usize::MAX)), vec![36, 36]);

        buf.write(&sample(52, 3)).unwrap();
        assert_eq!(record_sizes(&buf.read_available(usize::MAX)), vec![36, 60]);

        // the oldest record now starts at 96, its header straddles the end
        buf.write(&sample(28, 4)).unwrap();
        let contents = buf.read_available(usize::MAX);
        assert_eq!(record_sizes(&contents), vec![60, 36]);
        assert_eq!(contents[68], 4);
    }

    #[test]
    fn test_record_larger_than_capacity() {
        let mut buf = CircularBuffer::new(64);
        let err = buf.write(&sample(100, 0)).unwrap_err();
        assert!(matches!(err, OaError::RecordTooLarge { size: 108, capacity: 64 }));
        assert_eq!(buf.used_size(), 0);
    }

    #[test]
    fn test_record_of_exact_capacity_drains_everything() {
        let mut buf = CircularBuffer::new(64);
        buf.write(&sample(8, 0)).unwrap();
        buf.write(&sample(56, 1)).unwrap();
        assert_eq!(buf.used_size(), 64);
        assert_eq!(record_sizes(&buf.read_available(usize::MAX)), vec![64]);
    }

    #[test]
    #[should_panic(expected = "whole records")]
    fn test_partial_record_write_panics() {
        let mut buf = CircularBuffer::new(64);
        let rec = sample(16, 0);
        let _ = buf.write(&rec[..10]);
    }

    #[test]
    fn test_shrink_empty_buffer() {
        let mut buf = CircularBuffer::new(64);
        assert_eq!(buf.shrink(64), 0);
        assert!(buf.chunks().0.is_empty());
    }

    #[test]
    fn test_whole_records_after_many_writes() {
        // deterministic mix of record sizes that forces many wraps
        let mut buf = CircularBuffer::new(MIN_CIRCULAR_SIZE);
        let mut written = 0usize;
        let mut seed = 0x2545_f491u32;
        while written < MIN_CIRCULAR_SIZE * 10 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let len = (seed % 600) as usize;
            let rec = sample(len, (seed & 0xff) as u8);
            buf.write(&rec).unwrap();
            written += rec.len();

            let contents = buf.read_available(usize::MAX);
            let sizes = record_sizes(&contents);
            assert_eq!(sizes.iter().sum::<usize>(), buf.used_size());
        }
    }
}
