//! Error taxonomy shared by the recorder, the reader and the catalog.

use std::fmt;

/// Kind of data loss reported by the device for the live OA stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    /// The OA unit dropped one or more reports.
    ReportLost,
    /// The OA buffer overflowed before it was drained.
    BufferLost,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyKind::ReportLost => write!(f, "report lost"),
            AnomalyKind::BufferLost => write!(f, "buffer lost"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OaError {
    /// No catalog table matches the device's chip family. Fatal at startup.
    #[error("unsupported device 0x{device_id:04x}")]
    UnsupportedDevice { device_id: u32 },

    /// Loss signalled by the device; the recorder turns it into a marker record.
    #[error("stream anomaly: {0}")]
    StreamAnomaly(AnomalyKind),

    /// Would-block or interrupted; retried on the next poll.
    #[error("resource temporarily unavailable")]
    TransientUnavailable,

    /// Structural violation in a persisted recording.
    #[error("malformed recording at byte offset {offset}: {message}")]
    MalformedRecording { offset: usize, message: String },

    #[error("unknown counter '{0}'")]
    CounterNotFound(String),

    #[error("unknown metric set '{0}'")]
    UnknownMetricSet(String),

    #[error("record of {size} bytes does not fit in a {capacity} byte buffer")]
    RecordTooLarge { size: usize, capacity: usize },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("payload encoding failed: {0}")]
    Codec(#[from] bincode::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OaError {
    /// Shorthand for building a [`OaError::MalformedRecording`].
    pub fn malformed(offset: usize, message: impl Into<String>) -> Self {
        OaError::MalformedRecording {
            offset,
            message: message.into(),
        }
    }

    /// True for conditions that should simply be retried later.
    pub fn is_transient(&self) -> bool {
        match self {
            OaError::TransientUnavailable => true,
            OaError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}
