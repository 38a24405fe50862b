//! Shared protocol constants and wire-level types for the Connekt framed transport

use crate::error::TransferError;

// Protocol header constants
pub const MAGIC: &[u8; 4] = b"CNKT";
pub const VERSION: u16 = 1;

/// Header layout: MAGIC (4) | VERSION (2) | TYPE (1) | LENGTH (4)
pub const HEADER_LEN: usize = 11;

// Maximum frame payload size (64MB) - prevents DoS via memory exhaustion.
// File bytes never travel inside frames, so only listings come close.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Payload cap for COMMAND, SIZE and STRING frames (and an ERROR frame sent in their place)
pub const MAX_SCALAR_FRAME_SIZE: usize = 4096;

pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_HOST: &str = "localhost";

/// Chunk size used by both transfer directions unless configured otherwise
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

/// Size sent in reply to DOWNLOAD when the requested file does not exist
pub const SIZE_NOT_FOUND: i64 = -1;

/// Trailing token sent by the server after a download stream and after a stored upload
pub const ACK: &str = "ACK";

/// Sent by the server once an upload's metadata has been accepted
pub const READY: &str = "READY";

// Frame type IDs
pub mod frame {
    pub const COMMAND: u8 = 1;
    pub const STRING: u8 = 2;
    pub const SIZE: u8 = 3;
    // LIST payload: count u32 | (len u16 | utf8 bytes)*
    pub const LIST: u8 = 4;
    // ERROR payload: code u8 | utf8 message
    pub const ERROR: u8 = 5;

    pub fn name(t: u8) -> &'static str {
        match t {
            COMMAND => "COMMAND",
            STRING => "STRING",
            SIZE => "SIZE",
            LIST => "LIST",
            ERROR => "ERROR",
            _ => "UNKNOWN",
        }
    }
}

// Error codes carried in ERROR frames
pub mod error_code {
    pub const INVALID_NAME: u8 = 1;
    pub const IO: u8 = 2;
}

pub mod timeouts {
    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5_000;

    // Time a fresh connection gets to send its command (ms)
    pub const COMMAND_MS: u64 = 5_000;

    // Handshake replies (READY, SIZE, LIST) the client waits for (ms)
    pub const REPLY_MS: u64 = 30_000;
}

/// The single command a client sends to select server behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Upload,
    Download,
    ListFiles,
    Connected,
}

impl Command {
    pub fn tag(self) -> u8 {
        match self {
            Command::Upload => 1,
            Command::Download => 2,
            Command::ListFiles => 3,
            Command::Connected => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, TransferError> {
        match tag {
            1 => Ok(Command::Upload),
            2 => Ok(Command::Download),
            3 => Ok(Command::ListFiles),
            4 => Ok(Command::Connected),
            other => Err(TransferError::Protocol(format!(
                "unknown command tag {other}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Command::Upload => "UPLOAD",
            Command::Download => "DOWNLOAD",
            Command::ListFiles => "LIST_FILES",
            Command::Connected => "CONNECTED",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name and total length of a file announced before its bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
}

impl FileMetadata {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}
