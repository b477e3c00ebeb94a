//! Shared types and utilities for oatrace
//!
//! This crate contains the recording format, the recorder command messages
//! and the error taxonomy used by the recorder, the reader and the CLI.

pub mod error;
pub mod protocol;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{AnomalyKind, OaError};
pub use protocol::record::{Record, RecordReader, RecordType};
pub use types::device::*;
