//! Command fifo
//!
//! The recorder owns a named pipe that out-of-band clients write
//! [`Command`] messages into. The fifo is opened read-write so that it never
//! reports end-of-file while no client is connected.

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use oatrace_shared::protocol::command::{Command, CommandHeader, COMMAND_HEADER_SIZE};
use oatrace_shared::OaError;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub struct CommandChannel {
    path: PathBuf,
    file: File,
    pending: Vec<u8>,
}

impl CommandChannel {
    /// Creates the fifo at `path`, replacing a stale one left by a previous
    /// run.
    pub fn create(path: &Path) -> Result<Self, OaError> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed stale command fifo {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(std::io::Error::from)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)?;

        info!("Listening for commands on {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
            pending: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drains the fifo and decodes every complete command received so far.
    /// Incomplete trailing bytes are kept for the next call.
    pub fn read_commands(&mut self) -> Result<Vec<Command>, OaError> {
        let mut chunk = [0u8; 512];
        loop {
            match self.file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let mut commands = Vec::new();
        let mut consumed = 0;
        while self.pending.len() - consumed >= COMMAND_HEADER_SIZE {
            let header = match CommandHeader::decode(&self.pending[consumed..]) {
                Ok(header) => header,
                Err(e) => {
                    // no way to resynchronise inside a corrupt stream
                    warn!("Discarding {} command bytes: {}", self.pending.len() - consumed, e);
                    self.pending.clear();
                    return Ok(commands);
                }
            };

            let end = consumed + header.size as usize;
            if self.pending.len() < end {
                break;
            }
            match Command::decode(header, &self.pending[consumed + COMMAND_HEADER_SIZE..end]) {
                Ok(command) => commands.push(command),
                Err(e) => warn!("Ignoring command: {}", e),
            }
            consumed = end;
        }

        self.pending.drain(..consumed);
        Ok(commands)
    }
}

impl AsFd for CommandChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("Failed to remove command fifo {}: {}", self.path.display(), e);
        }
    }
}

/// Writes `commands` to a running recorder's fifo.
///
/// Relative dump paths are resolved against the current directory, since
/// the recorder may run elsewhere.
pub fn send_commands(fifo: &Path, commands: &[Command]) -> Result<(), OaError> {
    let mut file = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(fifo)?;
    let cwd = std::env::current_dir()?;

    for command in commands {
        let command = match command {
            Command::Dump(path) if path.is_relative() => Command::Dump(cwd.join(path)),
            other => other.clone(),
        };
        file.write_all(&command.encode())?;
        debug!("Sent {:?} to {}", command, fifo.display());
    }
    Ok(())
}
