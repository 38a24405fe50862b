//! On-disk configuration (`connekt.toml`)
//!
//! Every field has a default, so an absent file or a partial one is fine.
//! Command-line flags are applied on top by the binaries.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::protocol::{DEFAULT_CHUNK_SIZE, DEFAULT_HOST, DEFAULT_PORT};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (host:port)
    pub bind: String,
    /// Storage root for uploaded and downloadable files
    pub root: PathBuf,
    /// Connections handled at once; further accepts wait for a free slot
    pub max_connections: usize,
    pub chunk_size: usize,
    /// Append a plain-text event journal here
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{DEFAULT_PORT}"),
            root: PathBuf::from("server_files"),
            max_connections: 64,
            chunk_size: DEFAULT_CHUNK_SIZE,
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("Connekt");
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("connekt");
    }
    PathBuf::from(".connekt")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("connekt.toml")
}

impl Config {
    /// Load `path`, or the default location when `path` is `None`.
    ///
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (p, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };
        match std::fs::read_to_string(&p) {
            Ok(data) => Self::from_toml(&data)
                .with_context(|| format!("Failed to parse config {}", p.display())),
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read config {}", p.display())),
        }
    }

    pub fn from_toml(data: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.chunk_size == 0 || self.client.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than zero");
        }
        if self.server.max_connections == 0 {
            anyhow::bail!("max_connections must be greater than zero");
        }
        Ok(())
    }

    /// Atomic write: temp file in the same directory, then rename
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let data = toml::to_string(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(data.as_bytes())?;
        tmp.flush()?;
        tmp.persist(path)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }
}
