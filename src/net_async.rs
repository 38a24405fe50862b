//! Tokio transport for the Connekt daemon and client.
//!
//! One connection carries exactly one command. The server spawns a task per
//! accepted connection (admission is capped by a semaphore); the client runs
//! each upload/download on its own task and hands back a `TransferHandle`
//! for pause/resume and the final outcome.

use crate::codec;
use crate::error::{Result, TransferError};
use crate::protocol::{timeouts, Command, ACK, READY, SIZE_NOT_FOUND};
use crate::transfer;
use std::io;
use tokio::time::{timeout, Duration};

pub mod server {
    use super::*;
    use crate::config::ServerConfig;
    use crate::logger::Logger;
    use crate::observer::NoopObserver;
    use crate::pause::PauseGate;
    use crate::protocol::error_code;
    use crate::protocol_core::{ensure_dir_exists, resolve_in_root, size_to_wire};
    use anyhow::Context;
    use std::net::SocketAddr;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio::net::TcpListener;
    use tokio::sync::Semaphore;

    /// Per-connection lifecycle; logged on every transition
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ConnState {
        AwaitCommand,
        Uploading,
        Downloading,
        Listing,
        Acknowledging,
        Closed,
    }

    /// What one connection needs from the daemon
    #[derive(Clone)]
    pub struct HandlerContext {
        pub root: PathBuf,
        pub chunk_size: usize,
        pub logger: Arc<dyn Logger>,
    }

    pub async fn serve(cfg: ServerConfig, logger: Arc<dyn Logger>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&cfg.bind)
            .await
            .with_context(|| format!("bind {}", cfg.bind))?;
        serve_listener(listener, cfg, logger).await
    }

    /// Accept loop over an already-bound listener
    pub async fn serve_listener(
        listener: TcpListener,
        cfg: ServerConfig,
        logger: Arc<dyn Logger>,
    ) -> anyhow::Result<()> {
        ensure_dir_exists(&cfg.root)
            .with_context(|| format!("create storage root {}", cfg.root.display()))?;
        let root = std::fs::canonicalize(&cfg.root)
            .with_context(|| format!("canonicalize storage root {}", cfg.root.display()))?;
        let ctx = HandlerContext {
            root,
            chunk_size: cfg.chunk_size.max(1),
            logger,
        };
        let slots = Arc::new(Semaphore::new(cfg.max_connections.max(1)));

        tracing::info!(
            addr = %listener.local_addr()?,
            root = %ctx.root.display(),
            max_connections = cfg.max_connections,
            "connekt daemon listening"
        );

        loop {
            let permit = slots
                .clone()
                .acquire_owned()
                .await
                .context("connection limiter closed")?;
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            };
            let _ = stream.set_nodelay(true);
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = handle_connection(stream, peer, &ctx).await {
                    tracing::warn!(%peer, kind = e.kind(), error = %e, "connection failed");
                    ctx.logger.error(&peer, e.kind(), &e.to_string());
                }
                tracing::debug!(%peer, state = ?ConnState::Closed, "connection closed");
            });
        }
    }

    /// Read one command and run the matching operation
    pub async fn handle_connection<S>(mut stream: S, peer: SocketAddr, ctx: &HandlerContext) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::debug!(%peer, state = ?ConnState::AwaitCommand, "connection accepted");
        let cmd = codec::read_command_timed(&mut stream, timeouts::COMMAND_MS).await?;
        tracing::debug!(%peer, command = %cmd, "command received");

        match cmd {
            Command::Upload => handle_upload(&mut stream, peer, ctx).await,
            Command::Download => handle_download(&mut stream, peer, ctx).await,
            Command::ListFiles => send_file_list(&mut stream, peer, ctx).await,
            Command::Connected => {
                tracing::info!(%peer, "client connected");
                ctx.logger.connected(&peer);
                Ok(())
            }
        }
    }

    async fn reject_name<S>(stream: &mut S, name: &str, err: TransferError) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        codec::write_error(stream, error_code::INVALID_NAME, name).await?;
        Err(err)
    }

    async fn handle_upload<S>(stream: &mut S, peer: SocketAddr, ctx: &HandlerContext) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let meta = codec::read_metadata(stream).await?;
        let path = match resolve_in_root(&ctx.root, &meta.name) {
            Ok(p) => p,
            Err(e) => return reject_name(stream, &meta.name, e).await,
        };
        let mut file = match tokio::fs::File::create(&path).await {
            Ok(f) => f,
            Err(e) => {
                codec::write_error(stream, error_code::IO, &e.to_string()).await?;
                return Err(e.into());
            }
        };
        codec::write_string(stream, READY).await?;

        tracing::debug!(%peer, name = %meta.name, size = meta.size, state = ?ConnState::Uploading, "receiving file");
        let state = transfer::receive_chunks(
            stream,
            &mut file,
            meta.size,
            ctx.chunk_size,
            &PauseGate::new(),
            &NoopObserver,
        )
        .await?;

        tracing::debug!(%peer, state = ?ConnState::Acknowledging, "upload stored");
        codec::write_string(stream, ACK).await?;
        tracing::info!(%peer, name = %meta.name, bytes = state.transferred_bytes, chunks = state.chunks, "file uploaded");
        ctx.logger.upload_done(&peer, &meta.name, state.transferred_bytes);
        Ok(())
    }

    async fn handle_download<S>(stream: &mut S, peer: SocketAddr, ctx: &HandlerContext) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let name = codec::read_string(stream).await?;
        let path = match resolve_in_root(&ctx.root, &name) {
            Ok(p) => p,
            Err(e) => return reject_name(stream, &name, e).await,
        };

        let opened = match tokio::fs::metadata(&path).await {
            Ok(md) if md.is_file() => Some((tokio::fs::File::open(&path).await, md.len())),
            _ => None,
        };
        let (mut file, size) = match opened {
            Some((Ok(f), size)) => (f, size),
            Some((Err(e), _)) => {
                codec::write_error(stream, error_code::IO, &e.to_string()).await?;
                return Err(e.into());
            }
            None => {
                codec::write_size(stream, SIZE_NOT_FOUND).await?;
                tracing::info!(%peer, %name, "requested file not found");
                ctx.logger.not_found(&peer, &name);
                return Ok(());
            }
        };

        codec::write_size(stream, size_to_wire(size)?).await?;
        tracing::debug!(%peer, %name, size, state = ?ConnState::Downloading, "sending file");
        let state = transfer::send_chunks(
            &mut file,
            stream,
            size,
            ctx.chunk_size,
            &PauseGate::new(),
            &NoopObserver,
        )
        .await?;

        tracing::debug!(%peer, state = ?ConnState::Acknowledging, "download streamed");
        codec::write_string(stream, ACK).await?;
        tracing::info!(%peer, %name, bytes = state.transferred_bytes, "file sent");
        ctx.logger.download_done(&peer, &name, state.transferred_bytes);
        Ok(())
    }

    /// Names of the immediate entries of the storage root, sorted byte-wise
    pub async fn list_root(root: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut rd = tokio::fs::read_dir(root).await?;
        while let Some(entry) = rd.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn send_file_list<S>(stream: &mut S, peer: SocketAddr, ctx: &HandlerContext) -> Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        tracing::debug!(%peer, state = ?ConnState::Listing, "listing storage root");
        let names = list_root(&ctx.root).await?;
        codec::write_listing(stream, &names).await?;
        ctx.logger.listed(&peer, names.len());
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::logger::NoopLogger;
        use crate::protocol::FileMetadata;

        fn ctx(root: &Path) -> HandlerContext {
            HandlerContext {
                root: root.canonicalize().unwrap(),
                chunk_size: 4,
                logger: Arc::new(NoopLogger),
            }
        }

        fn peer() -> SocketAddr {
            "127.0.0.1:50000".parse().unwrap()
        }

        #[tokio::test]
        async fn test_upload_over_duplex() {
            let dir = tempfile::tempdir().unwrap();
            let ctx = ctx(dir.path());
            let (mut client, srv) = tokio::io::duplex(1024);
            let handler = tokio::spawn(async move { handle_connection(srv, peer(), &ctx).await });

            codec::write_command(&mut client, Command::Upload).await.unwrap();
            codec::write_metadata(&mut client, &FileMetadata::new("note.txt", 11))
                .await
                .unwrap();
            assert_eq!(codec::read_string(&mut client).await.unwrap(), READY);
            tokio::io::AsyncWriteExt::write_all(&mut client, b"hello world")
                .await
                .unwrap();
            assert_eq!(codec::read_string(&mut client).await.unwrap(), ACK);

            handler.await.unwrap().unwrap();
            assert_eq!(std::fs::read(dir.path().join("note.txt")).unwrap(), b"hello world");
        }

        #[tokio::test]
        async fn test_upload_rejects_traversal_name() {
            let dir = tempfile::tempdir().unwrap();
            let ctx = ctx(dir.path());
            let (mut client, srv) = tokio::io::duplex(1024);
            let handler = tokio::spawn(async move { handle_connection(srv, peer(), &ctx).await });

            codec::write_command(&mut client, Command::Upload).await.unwrap();
            codec::write_metadata(&mut client, &FileMetadata::new("../evil.txt", 3))
                .await
                .unwrap();
            assert!(matches!(
                codec::read_string(&mut client).await,
                Err(TransferError::InvalidName(_))
            ));
            assert!(matches!(
                handler.await.unwrap(),
                Err(TransferError::InvalidName(_))
            ));
            assert!(!dir.path().parent().unwrap().join("evil.txt").exists());
        }

        #[cfg(unix)]
        #[tokio::test]
        async fn test_upload_refuses_dangling_symlink_in_root() {
            let dir = tempfile::tempdir().unwrap();
            let outside = tempfile::tempdir().unwrap();
            let planted = outside.path().join("planted.txt");
            std::os::unix::fs::symlink(&planted, dir.path().join("up.txt")).unwrap();
            let ctx = ctx(dir.path());
            let (mut client, srv) = tokio::io::duplex(1024);
            let handler = tokio::spawn(async move { handle_connection(srv, peer(), &ctx).await });

            codec::write_command(&mut client, Command::Upload).await.unwrap();
            codec::write_metadata(&mut client, &FileMetadata::new("up.txt", 3))
                .await
                .unwrap();
            assert!(matches!(
                codec::read_string(&mut client).await,
                Err(TransferError::InvalidName(_))
            ));
            assert!(handler.await.unwrap().is_err());
            assert!(!planted.exists());
        }

        #[tokio::test]
        async fn test_download_missing_sends_sentinel() {
            let dir = tempfile::tempdir().unwrap();
            let ctx = ctx(dir.path());
            let (mut client, srv) = tokio::io::duplex(1024);
            let handler = tokio::spawn(async move { handle_connection(srv, peer(), &ctx).await });

            codec::write_command(&mut client, Command::Download).await.unwrap();
            codec::write_string(&mut client, "missing.bin").await.unwrap();
            assert_eq!(codec::read_size(&mut client).await.unwrap(), SIZE_NOT_FOUND);
            handler.await.unwrap().unwrap();
        }

        #[tokio::test]
        async fn test_download_streams_then_acks() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("data.bin"), b"0123456789").unwrap();
            let ctx = ctx(dir.path());
            let (mut client, srv) = tokio::io::duplex(1024);
            let handler = tokio::spawn(async move { handle_connection(srv, peer(), &ctx).await });

            codec::write_command(&mut client, Command::Download).await.unwrap();
            codec::write_string(&mut client, "data.bin").await.unwrap();
            assert_eq!(codec::read_size(&mut client).await.unwrap(), 10);
            let mut body = [0u8; 10];
            tokio::io::AsyncReadExt::read_exact(&mut client, &mut body)
                .await
                .unwrap();
            assert_eq!(&body, b"0123456789");
            assert_eq!(codec::read_string(&mut client).await.unwrap(), ACK);
            handler.await.unwrap().unwrap();
        }

        #[tokio::test]
        async fn test_list_root_is_sorted_snapshot() {
            let dir = tempfile::tempdir().unwrap();
            for n in ["b.bin", "a.txt", "C.md"] {
                std::fs::write(dir.path().join(n), b"x").unwrap();
            }
            let names = list_root(dir.path()).await.unwrap();
            assert_eq!(names, vec!["C.md", "a.txt", "b.bin"]);
        }

        #[tokio::test]
        async fn test_garbage_instead_of_command() {
            let dir = tempfile::tempdir().unwrap();
            let ctx = ctx(dir.path());
            let (mut client, srv) = tokio::io::duplex(1024);
            let handler = tokio::spawn(async move { handle_connection(srv, peer(), &ctx).await });
            tokio::io::AsyncWriteExt::write_all(&mut client, b"GET / HTTP/1.1\r\n\r\n")
                .await
                .unwrap();
            assert!(matches!(
                handler.await.unwrap(),
                Err(TransferError::Protocol(_))
            ));
        }
    }
}

pub mod client {
    use super::*;
    use crate::config::ClientConfig;
    use crate::observer::{Direction, NoopObserver, TransferObserver, TransferStatus};
    use crate::pause::PauseGate;
    use crate::protocol::FileMetadata;
    use crate::protocol_core::{sanitize_file_name, size_from_wire};
    use crate::transfer::TransferState;
    use std::future::Future;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;
    use tracing::Instrument;
    use uuid::Uuid;

    pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
        let addr = format!("{}:{}", host, port);
        let stream = match timeout(
            Duration::from_millis(timeouts::CONNECT_MS),
            TcpStream::connect(&addr),
        )
        .await
        {
            Ok(res) => res?,
            Err(_) => {
                return Err(TransferError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect {} timed out", addr),
                )))
            }
        };
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    /// Bound a handshake reply wait
    async fn reply<T>(fut: impl Future<Output = Result<T>>) -> Result<T> {
        match timeout(Duration::from_millis(timeouts::REPLY_MS), fut).await {
            Ok(res) => res,
            Err(_) => Err(TransferError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no reply from server within {} ms", timeouts::REPLY_MS),
            ))),
        }
    }

    /// How a transfer ended
    #[derive(Debug)]
    pub enum TransferOutcome {
        Completed(TransferState),
        NotFound(String),
        Failed(TransferError),
    }

    impl TransferOutcome {
        pub fn status(&self, direction: Direction) -> TransferStatus {
            match self {
                TransferOutcome::Completed(_) => TransferStatus::Completed(direction),
                TransferOutcome::NotFound(_) => TransferStatus::NotFound,
                TransferOutcome::Failed(e) => TransferStatus::Failed(e.to_string()),
            }
        }

        pub fn into_result(self) -> Result<TransferState> {
            match self {
                TransferOutcome::Completed(state) => Ok(state),
                TransferOutcome::NotFound(name) => Err(TransferError::NotFound(name)),
                TransferOutcome::Failed(e) => Err(e),
            }
        }
    }

    /// Controller side of a running transfer
    pub struct TransferHandle {
        id: Uuid,
        direction: Direction,
        gate: Arc<PauseGate>,
        observer: Arc<dyn TransferObserver>,
        task: Option<JoinHandle<TransferOutcome>>,
    }

    impl TransferHandle {
        pub fn id(&self) -> Uuid {
            self.id
        }

        pub fn direction(&self) -> Direction {
            self.direction
        }

        /// Freeze the transfer after the chunk in flight. No-op when already paused.
        pub async fn pause_transfer(&self) -> bool {
            let paused = self.gate.pause().await;
            if paused {
                tracing::info!(id = %self.id, "transfer paused");
                self.observer.on_status_changed(&TransferStatus::Paused);
            }
            paused
        }

        /// No-op when not paused
        pub async fn resume_transfer(&self) -> bool {
            let resumed = self.gate.resume().await;
            if resumed {
                tracing::info!(id = %self.id, "transfer resumed");
                self.observer.on_status_changed(&TransferStatus::Resumed);
            }
            resumed
        }

        pub fn is_paused(&self) -> bool {
            self.gate.is_paused()
        }

        pub fn is_finished(&self) -> bool {
            self.task.as_ref().map_or(true, |t| t.is_finished())
        }

        /// Wait for the final outcome. A paused transfer only finishes after `resume_transfer`.
        pub async fn wait(mut self) -> TransferOutcome {
            let Some(task) = self.task.take() else {
                return TransferOutcome::Failed(TransferError::protocol("transfer already awaited"));
            };
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => TransferOutcome::Failed(TransferError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    format!("transfer task ended abnormally: {e}"),
                ))),
            }
        }
    }

    impl Drop for TransferHandle {
        // A detached transfer must not stay frozen forever
        fn drop(&mut self) {
            self.gate.release_if_paused();
        }
    }

    /// Client session factory: one connection per operation
    #[derive(Clone)]
    pub struct Client {
        host: String,
        port: u16,
        chunk_size: usize,
        observer: Arc<dyn TransferObserver>,
    }

    impl Client {
        pub fn new(cfg: &ClientConfig) -> Self {
            Self {
                host: cfg.host.clone(),
                port: cfg.port,
                chunk_size: cfg.chunk_size.max(1),
                observer: Arc::new(NoopObserver),
            }
        }

        pub fn with_observer(mut self, observer: Arc<dyn TransferObserver>) -> Self {
            self.observer = observer;
            self
        }

        pub fn addr(&self) -> String {
            format!("{}:{}", self.host, self.port)
        }

        /// Liveness probe: the server logs our address, then we hang up
        pub async fn probe(&self) -> Result<()> {
            let mut stream = connect(&self.host, self.port).await?;
            codec::write_command(&mut stream, Command::Connected).await?;
            stream.shutdown().await?;
            Ok(())
        }

        pub async fn list_files(&self) -> Result<Vec<String>> {
            let mut stream = connect(&self.host, self.port).await?;
            codec::write_command(&mut stream, Command::ListFiles).await?;
            reply(codec::read_listing(&mut stream)).await
        }

        /// Start uploading `path` on its own task
        pub fn upload_file(&self, path: impl Into<PathBuf>) -> TransferHandle {
            let path = path.into();
            let (host, port, chunk) = (self.host.clone(), self.port, self.chunk_size);
            self.spawn_transfer(Direction::Upload, move |gate, observer| async move {
                run_upload(&host, port, &path, chunk, &gate, observer.as_ref())
                    .await
                    .map(TransferOutcome::Completed)
            })
        }

        /// Start downloading `remote_name` into `local_dir` on its own task
        pub fn download_file(
            &self,
            remote_name: impl Into<String>,
            local_dir: impl Into<PathBuf>,
        ) -> TransferHandle {
            let (name, dir) = (remote_name.into(), local_dir.into());
            let (host, port, chunk) = (self.host.clone(), self.port, self.chunk_size);
            self.spawn_transfer(Direction::Download, move |gate, observer| async move {
                let state =
                    run_download(&host, port, &name, &dir, chunk, &gate, observer.as_ref()).await?;
                match state {
                    Some(state) => Ok(TransferOutcome::Completed(state)),
                    None => Ok(TransferOutcome::NotFound(name)),
                }
            })
        }

        fn spawn_transfer<F, Fut>(&self, direction: Direction, run: F) -> TransferHandle
        where
            F: FnOnce(Arc<PauseGate>, Arc<dyn TransferObserver>) -> Fut,
            Fut: Future<Output = Result<TransferOutcome>> + Send + 'static,
        {
            let id = Uuid::new_v4();
            let gate = Arc::new(PauseGate::new());
            let observer = self.observer.clone();
            let fut = run(gate.clone(), observer.clone());
            let span = tracing::info_span!("transfer", %id, ?direction);

            let task_observer = observer.clone();
            let task = tokio::spawn(
                async move {
                    let outcome = fut.await.unwrap_or_else(TransferOutcome::Failed);
                    match &outcome {
                        TransferOutcome::Completed(s) => {
                            tracing::info!(bytes = s.transferred_bytes, chunks = s.chunks, "transfer completed")
                        }
                        TransferOutcome::NotFound(name) => tracing::info!(%name, "remote file not found"),
                        TransferOutcome::Failed(e) => tracing::warn!(error = %e, "transfer failed"),
                    }
                    task_observer.on_status_changed(&outcome.status(direction));
                    outcome
                }
                .instrument(span),
            );

            TransferHandle {
                id,
                direction,
                gate,
                observer,
                task: Some(task),
            }
        }
    }

    async fn run_upload(
        host: &str,
        port: u16,
        path: &Path,
        chunk_size: usize,
        gate: &PauseGate,
        observer: &dyn TransferObserver,
    ) -> Result<TransferState> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidName(path.display().to_string()))?;
        let mut file = tokio::fs::File::open(path).await?;
        let meta = FileMetadata::new(name, file.metadata().await?.len());
        meta.validate()?;

        let mut stream = connect(host, port).await?;
        codec::write_command(&mut stream, Command::Upload).await?;
        codec::write_metadata(&mut stream, &meta).await?;
        let ready = reply(codec::read_string(&mut stream)).await?;
        if ready != READY {
            return Err(TransferError::protocol(format!("unexpected upload reply {ready:?}")));
        }

        tracing::debug!(name = %meta.name, size = meta.size, "upload accepted");
        observer.on_status_changed(&TransferStatus::Started(Direction::Upload));
        let state =
            transfer::send_chunks(&mut file, &mut stream, meta.size, chunk_size, gate, observer).await?;

        let ack = codec::read_string(&mut stream).await?;
        tracing::debug!(%ack, "upload acknowledged");
        Ok(state)
    }

    /// `Ok(None)` when the server reports the file missing; nothing is created locally then.
    async fn run_download(
        host: &str,
        port: u16,
        remote_name: &str,
        local_dir: &Path,
        chunk_size: usize,
        gate: &PauseGate,
        observer: &dyn TransferObserver,
    ) -> Result<Option<TransferState>> {
        let local_name = sanitize_file_name(remote_name)?;

        let mut stream = connect(host, port).await?;
        codec::write_command(&mut stream, Command::Download).await?;
        codec::write_string(&mut stream, remote_name).await?;
        let size = reply(codec::read_size(&mut stream)).await?;
        if size == SIZE_NOT_FOUND {
            return Ok(None);
        }
        let size = size_from_wire(size)?;

        tokio::fs::create_dir_all(local_dir).await?;
        let mut file = tokio::fs::File::create(local_dir.join(local_name)).await?;
        observer.on_status_changed(&TransferStatus::Started(Direction::Download));
        let state =
            transfer::receive_chunks(&mut stream, &mut file, size, chunk_size, gate, observer).await?;

        // Any value is accepted; it only marks the end of the exchange.
        let ack = codec::read_string(&mut stream).await?;
        if ack != ACK {
            tracing::debug!(%ack, "non-standard acknowledgment");
        }
        Ok(Some(state))
    }
}
