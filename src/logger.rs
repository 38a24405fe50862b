//! Server event journal
//!
//! Console diagnostics go through `tracing`; this is the optional append-only
//! record of what each connection did, one line per event.

use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;

pub trait Logger: Send + Sync {
    fn connected(&self, _peer: &SocketAddr) {}
    fn upload_done(&self, _peer: &SocketAddr, _name: &str, _bytes: u64) {}
    fn download_done(&self, _peer: &SocketAddr, _name: &str, _bytes: u64) {}
    fn not_found(&self, _peer: &SocketAddr, _name: &str) {}
    fn listed(&self, _peer: &SocketAddr, _entries: usize) {}
    fn error(&self, _peer: &SocketAddr, _context: &str, _msg: &str) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn connected(&self, peer: &SocketAddr) {
        self.line(&format!("CONNECTED peer={peer}"));
    }
    fn upload_done(&self, peer: &SocketAddr, name: &str, bytes: u64) {
        self.line(&format!("UPLOAD peer={peer} name={name} bytes={bytes}"));
    }
    fn download_done(&self, peer: &SocketAddr, name: &str, bytes: u64) {
        self.line(&format!("DOWNLOAD peer={peer} name={name} bytes={bytes}"));
    }
    fn not_found(&self, peer: &SocketAddr, name: &str) {
        self.line(&format!("NOT_FOUND peer={peer} name={name}"));
    }
    fn listed(&self, peer: &SocketAddr, entries: usize) {
        self.line(&format!("LIST peer={peer} entries={entries}"));
    }
    fn error(&self, peer: &SocketAddr, context: &str, msg: &str) {
        self.line(&format!("ERROR peer={peer} ctx={context} msg={msg}"));
    }
}
