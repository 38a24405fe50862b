//! connekt - terminal client for a connektd server
//!
//! Uploads and downloads show a progress bar; while one runs, typing `p`
//! then Enter pauses it and `r` then Enter resumes it.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use connekt::cli::{ClientCommand, ClientOpts};
use connekt::config::Config;
use connekt::net_async::client::{Client, TransferHandle};
use connekt::progress::TransferProgress;
use connekt::url::parse_server;

#[derive(Debug, Clone, Copy)]
enum Control {
    Pause,
    Resume,
}

fn main() -> Result<()> {
    let opts = ClientOpts::parse();

    // Quiet by default so log lines don't tear the progress bar
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .try_init();

    let mut cfg = Config::load(opts.config.as_deref())?;
    if let Some(s) = &opts.server {
        let remote = parse_server(s).with_context(|| format!("Invalid server address: {s}"))?;
        cfg.client.host = remote.host;
        cfg.client.port = remote.port;
    }
    if let Some(n) = opts.chunk_size {
        cfg.client.chunk_size = n;
    }
    cfg.validate()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(run(opts.command, Client::new(&cfg.client)))
}

async fn run(command: ClientCommand, client: Client) -> Result<()> {
    match command {
        ClientCommand::Ping => {
            client
                .probe()
                .await
                .with_context(|| format!("Failed to reach {}", client.addr()))?;
            println!("{} is reachable", client.addr());
        }
        ClientCommand::List => {
            let names = client
                .list_files()
                .await
                .with_context(|| format!("Failed to list files on {}", client.addr()))?;
            for name in names {
                println!("{name}");
            }
        }
        ClientCommand::Upload { path } => {
            let progress = Arc::new(TransferProgress::new(&format!("Uploading {}", path.display())));
            let handle = client.with_observer(progress.clone()).upload_file(path);
            drive(handle, &progress).await?;
        }
        ClientCommand::Download { name, dir } => {
            let progress = Arc::new(TransferProgress::new(&format!("Downloading {name}")));
            let handle = client.with_observer(progress.clone()).download_file(name, dir);
            drive(handle, &progress).await?;
        }
    }
    Ok(())
}

/// Stdin is read on a plain thread so the runtime never waits on it at exit
fn spawn_stdin_controls() -> mpsc::UnboundedReceiver<Control> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let ctl = match line.trim() {
                "p" | "pause" => Control::Pause,
                "r" | "resume" => Control::Resume,
                _ => continue,
            };
            if tx.send(ctl).is_err() {
                break;
            }
        }
    });
    rx
}

async fn drive(handle: TransferHandle, progress: &TransferProgress) -> Result<()> {
    progress.println("  type p + Enter to pause, r + Enter to resume");
    let mut controls = spawn_stdin_controls();
    let mut ticker = tokio::time::interval(Duration::from_millis(100));

    while !handle.is_finished() {
        tokio::select! {
            Some(ctl) = controls.recv() => match ctl {
                Control::Pause => {
                    handle.pause_transfer().await;
                }
                Control::Resume => {
                    handle.resume_transfer().await;
                }
            },
            _ = ticker.tick() => {}
        }
    }

    let outcome = handle.wait().await;
    progress.finish();
    let state = outcome.into_result()?;
    tracing::debug!(bytes = state.transferred_bytes, chunks = state.chunks, "done");
    Ok(())
}
