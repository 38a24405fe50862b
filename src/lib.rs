//! Connekt
//!
//! Single-connection file transfer: upload, download and listing against a
//! storage directory, with pausable chunked transfers and progress callbacks.

pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod logger;
pub mod net_async;
pub mod observer;
pub mod pause;
pub mod progress;
pub mod protocol;
pub mod protocol_core;
pub mod transfer;
pub mod url;

pub use error::TransferError;
pub use net_async::client::{Client, TransferHandle, TransferOutcome};
pub use observer::{TransferEvent, TransferObserver, TransferStatus};
pub use pause::PauseGate;
pub use protocol::{Command, FileMetadata};
pub use transfer::TransferState;
