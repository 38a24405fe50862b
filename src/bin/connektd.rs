use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use connekt::cli::DaemonOpts;
use connekt::config::Config;
use connekt::logger::{Logger, NoopLogger, TextLogger};
use connekt::net_async;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    let mut cfg = Config::load(opts.config.as_deref())?;
    if let Some(bind) = opts.bind {
        cfg.server.bind = bind;
    }
    if let Some(root) = opts.root {
        cfg.server.root = root;
    }
    if let Some(n) = opts.max_connections {
        cfg.server.max_connections = n;
    }
    if opts.log_file.is_some() {
        cfg.server.log_file = opts.log_file;
    }
    cfg.validate()?;

    if cfg.server.root.exists() && !cfg.server.root.is_dir() {
        anyhow::bail!(
            "Root path is not a directory: {}",
            cfg.server.root.display()
        );
    }

    let logger: Arc<dyn Logger> = match &cfg.server.log_file {
        Some(path) => Arc::new(
            TextLogger::new(path)
                .with_context(|| format!("Failed to open journal {}", path.display()))?,
        ),
        None => Arc::new(NoopLogger),
    };

    println!("Starting Connekt daemon:");
    println!("  Root: {}", cfg.server.root.display());
    println!("  Bind: {}", cfg.server.bind);

    // Security warning for 0.0.0.0 binding
    if cfg.server.bind.starts_with("0.0.0.0") {
        eprintln!("⚠️  WARNING: Binding to 0.0.0.0 exposes daemon to all network interfaces");
        eprintln!("   This protocol is UNENCRYPTED and UNAUTHENTICATED");
        eprintln!("   Only use on trusted networks (LAN)");
        eprintln!();
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async move {
        tokio::select! {
            res = net_async::server::serve(cfg.server, logger) => res,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                Ok(())
            }
        }
    })
}
