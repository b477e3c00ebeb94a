//! Messages sent to a running recorder over its command fifo.
//!
//! Each message is `{ command: u32, size: u32, payload }` in little endian,
//! with `size` covering the header. Dump carries a NUL terminated path.

use crate::error::OaError;
use bytes::{Buf, BufMut};
use std::path::PathBuf;

/// Default location of the recorder command fifo.
pub const DEFAULT_COMMAND_FIFO: &str = "/tmp/.oatrace-record";

/// Size of the `{ command, size }` header.
pub const COMMAND_HEADER_SIZE: usize = 8;

/// Upper bound on a command payload, a dump path.
pub const MAX_COMMAND_PAYLOAD: usize = 4096;

const COMMAND_DUMP: u32 = 1;
const COMMAND_QUIT: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Snapshot the circular buffer into a new recording at this path
    Dump(PathBuf),
    /// Stop recording
    Quit,
}

/// Decoded command header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub command: u32,
    pub size: u32,
}

impl CommandHeader {
    pub fn decode(mut bytes: &[u8]) -> Result<Self, OaError> {
        if bytes.len() < COMMAND_HEADER_SIZE {
            return Err(OaError::InvalidCommand(format!(
                "short header: {} bytes",
                bytes.len()
            )));
        }
        let command = bytes.get_u32_le();
        let size = bytes.get_u32_le();
        if (size as usize) < COMMAND_HEADER_SIZE
            || size as usize - COMMAND_HEADER_SIZE > MAX_COMMAND_PAYLOAD
        {
            return Err(OaError::InvalidCommand(format!("bad command size {}", size)));
        }
        Ok(Self { command, size })
    }

    /// Number of payload bytes following the header.
    pub fn payload_len(&self) -> usize {
        self.size as usize - COMMAND_HEADER_SIZE
    }
}

impl Command {
    pub fn encode(&self) -> Vec<u8> {
        let (command, payload) = match self {
            Command::Dump(path) => {
                let mut bytes = path.to_string_lossy().into_owned().into_bytes();
                bytes.push(0);
                (COMMAND_DUMP, bytes)
            }
            Command::Quit => (COMMAND_QUIT, Vec::new()),
        };

        let mut buf = Vec::with_capacity(COMMAND_HEADER_SIZE + payload.len());
        buf.put_u32_le(command);
        buf.put_u32_le((COMMAND_HEADER_SIZE + payload.len()) as u32);
        buf.put_slice(&payload);
        buf
    }

    /// Build a command from its header and complete payload.
    pub fn decode(header: CommandHeader, payload: &[u8]) -> Result<Self, OaError> {
        match header.command {
            COMMAND_DUMP => {
                let path = payload.split(|&b| b == 0).next().unwrap_or_default();
                if path.is_empty() {
                    return Err(OaError::InvalidCommand("dump without a path".to_string()));
                }
                let path = std::str::from_utf8(path)
                    .map_err(|e| OaError::InvalidCommand(format!("dump path: {}", e)))?;
                Ok(Command::Dump(PathBuf::from(path)))
            }
            COMMAND_QUIT => Ok(Command::Quit),
            other => Err(OaError::InvalidCommand(format!("unknown command 0x{:x}", other))),
        }
    }
}
