//! Async frame I/O over any byte stream
//!
//! Each typed value (command, string, size, listing, error) is written as one
//! frame. File contents are not framed: they follow a SIZE frame as a raw run
//! of exactly that many bytes, driven by the `transfer` loops.

use crate::error::{Result, TransferError};
use crate::protocol::{frame, Command, FileMetadata, HEADER_LEN, MAX_FRAME_SIZE, MAX_SCALAR_FRAME_SIZE};
use crate::protocol_core::{
    build_frame_header, decode_error, decode_listing, decode_size, decode_string, encode_error,
    encode_listing, encode_size, parse_frame_header, size_from_wire, size_to_wire,
    validate_frame_size, validate_frame_size_within,
};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};

fn eof_as_protocol(e: io::Error, what: &str) -> TransferError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        TransferError::protocol(format!("stream ended inside {what}"))
    } else {
        TransferError::Io(e)
    }
}

pub async fn write_frame<W>(stream: &mut W, t: u8, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    validate_frame_size(payload.len())?;
    let hdr = build_frame_header(t, payload.len() as u32);
    stream.write_all(&hdr).await?;
    if !payload.is_empty() {
        stream.write_all(payload).await?;
    }
    stream.flush().await?;
    Ok(())
}

pub async fn read_frame<R>(stream: &mut R) -> Result<(u8, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    read_frame_within(stream, MAX_FRAME_SIZE).await
}

/// Read one frame, refusing a declared payload above `limit` before allocating for it
pub async fn read_frame_within<R>(stream: &mut R, limit: usize) -> Result<(u8, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut hdr = [0u8; HEADER_LEN];
    stream
        .read_exact(&mut hdr)
        .await
        .map_err(|e| eof_as_protocol(e, "frame header"))?;
    let (typ, len) = parse_frame_header(&hdr)?;
    let len = len as usize;
    validate_frame_size_within(len, limit)?;
    let mut payload = vec![0u8; len];
    if len > 0 {
        stream
            .read_exact(&mut payload)
            .await
            .map_err(|e| eof_as_protocol(e, "frame payload"))?;
    }
    Ok((typ, payload))
}

pub async fn read_frame_timed<R>(stream: &mut R, ms: u64) -> Result<(u8, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    read_frame_timed_within(stream, ms, MAX_FRAME_SIZE).await
}

async fn read_frame_timed_within<R>(stream: &mut R, ms: u64, limit: usize) -> Result<(u8, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    match timeout(Duration::from_millis(ms), read_frame_within(stream, limit)).await {
        Ok(res) => res,
        Err(_) => Err(TransferError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("frame read timeout ({} ms)", ms),
        ))),
    }
}

/// Read a frame and insist on `expected`; an ERROR frame becomes the error it carries.
async fn expect_frame<R>(stream: &mut R, expected: u8) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let (typ, payload) = read_frame_within(stream, frame_limit(expected)).await?;
    check_frame(typ, payload, expected)
}

/// Only listings may be large; everything else is a handful of bytes
fn frame_limit(expected: u8) -> usize {
    match expected {
        frame::LIST => MAX_FRAME_SIZE,
        _ => MAX_SCALAR_FRAME_SIZE,
    }
}

fn check_frame(typ: u8, payload: Vec<u8>, expected: u8) -> Result<Vec<u8>> {
    if typ == expected {
        return Ok(payload);
    }
    if typ == frame::ERROR {
        return Err(decode_error(&payload));
    }
    Err(TransferError::protocol(format!(
        "expected {} frame, got {} ({})",
        frame::name(expected),
        frame::name(typ),
        typ
    )))
}

pub async fn write_command<W: AsyncWrite + Unpin>(stream: &mut W, cmd: Command) -> Result<()> {
    write_frame(stream, frame::COMMAND, &[cmd.tag()]).await
}

pub fn decode_command(payload: &[u8]) -> Result<Command> {
    match payload {
        [tag] => Command::from_tag(*tag),
        _ => Err(TransferError::protocol(format!(
            "bad COMMAND payload length {}",
            payload.len()
        ))),
    }
}

pub async fn read_command<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Command> {
    decode_command(&expect_frame(stream, frame::COMMAND).await?)
}

/// Server side: the command must arrive within `ms` of the connection opening
pub async fn read_command_timed<R: AsyncRead + Unpin>(stream: &mut R, ms: u64) -> Result<Command> {
    let (typ, payload) = read_frame_timed_within(stream, ms, frame_limit(frame::COMMAND)).await?;
    decode_command(&check_frame(typ, payload, frame::COMMAND)?)
}

pub async fn write_string<W: AsyncWrite + Unpin>(stream: &mut W, s: &str) -> Result<()> {
    write_frame(stream, frame::STRING, s.as_bytes()).await
}

pub async fn read_string<R: AsyncRead + Unpin>(stream: &mut R) -> Result<String> {
    decode_string(expect_frame(stream, frame::STRING).await?)
}

pub async fn write_size<W: AsyncWrite + Unpin>(stream: &mut W, size: i64) -> Result<()> {
    write_frame(stream, frame::SIZE, &encode_size(size)).await
}

pub async fn read_size<R: AsyncRead + Unpin>(stream: &mut R) -> Result<i64> {
    decode_size(&expect_frame(stream, frame::SIZE).await?)
}

/// Filename frame followed by size frame
pub async fn write_metadata<W: AsyncWrite + Unpin>(stream: &mut W, meta: &FileMetadata) -> Result<()> {
    let size = size_to_wire(meta.size)?;
    write_string(stream, &meta.name).await?;
    write_size(stream, size).await
}

pub async fn read_metadata<R: AsyncRead + Unpin>(stream: &mut R) -> Result<FileMetadata> {
    let name = read_string(stream).await?;
    let size = size_from_wire(read_size(stream).await?)?;
    Ok(FileMetadata { name, size })
}

pub async fn write_listing<W: AsyncWrite + Unpin>(stream: &mut W, names: &[String]) -> Result<()> {
    let payload = encode_listing(names)?;
    write_frame(stream, frame::LIST, &payload).await
}

pub async fn read_listing<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<String>> {
    decode_listing(&expect_frame(stream, frame::LIST).await?)
}

pub async fn write_error<W: AsyncWrite + Unpin>(stream: &mut W, code: u8, msg: &str) -> Result<()> {
    write_frame(stream, frame::ERROR, &encode_error(code, msg)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::error_code;

    async fn round_trip_bytes() -> Vec<u8> {
        let mut buf: Vec<u8> = Vec::new();
        write_command(&mut buf, Command::Download).await.unwrap();
        write_metadata(&mut buf, &FileMetadata::new("report.pdf", 2_500_000))
            .await
            .unwrap();
        write_listing(&mut buf, &["a.txt".to_string(), "b.bin".to_string()])
            .await
            .unwrap();
        write_size(&mut buf, -1).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_typed_values_round_trip() {
        let buf = round_trip_bytes().await;
        let mut rd: &[u8] = &buf;
        assert_eq!(read_command(&mut rd).await.unwrap(), Command::Download);
        assert_eq!(
            read_metadata(&mut rd).await.unwrap(),
            FileMetadata::new("report.pdf", 2_500_000)
        );
        assert_eq!(read_listing(&mut rd).await.unwrap(), vec!["a.txt", "b.bin"]);
        assert_eq!(read_size(&mut rd).await.unwrap(), -1);
        assert!(rd.is_empty());
    }

    #[tokio::test]
    async fn test_every_command_round_trips() {
        for cmd in [
            Command::Upload,
            Command::Download,
            Command::ListFiles,
            Command::Connected,
        ] {
            let mut buf: Vec<u8> = Vec::new();
            write_command(&mut buf, cmd).await.unwrap();
            let mut rd: &[u8] = &buf;
            assert_eq!(read_command(&mut rd).await.unwrap(), cmd);
        }
    }

    #[tokio::test]
    async fn test_truncated_stream_is_protocol_error() {
        let buf = round_trip_bytes().await;
        for cut in [0, 5, HEADER_LEN - 1, HEADER_LEN] {
            let mut rd: &[u8] = &buf[..cut.min(buf.len())];
            assert!(
                matches!(read_command(&mut rd).await, Err(TransferError::Protocol(_))),
                "cut at {cut}"
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_command_tag_rejected() {
        let mut buf: Vec<u8> = Vec::new();
        write_frame(&mut buf, frame::COMMAND, &[42]).await.unwrap();
        let mut rd: &[u8] = &buf;
        assert!(matches!(
            read_command(&mut rd).await,
            Err(TransferError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_unexpected_frame_type_rejected() {
        let mut buf: Vec<u8> = Vec::new();
        write_string(&mut buf, "not a size").await.unwrap();
        let mut rd: &[u8] = &buf;
        assert!(matches!(read_size(&mut rd).await, Err(TransferError::Protocol(_))));

        let mut buf: Vec<u8> = Vec::new();
        write_frame(&mut buf, 77, b"").await.unwrap();
        let mut rd: &[u8] = &buf;
        assert!(read_string(&mut rd).await.is_err());
    }

    #[tokio::test]
    async fn test_error_frame_surfaces_as_error() {
        let mut buf: Vec<u8> = Vec::new();
        write_error(&mut buf, error_code::INVALID_NAME, "../../x").await.unwrap();
        let mut rd: &[u8] = &buf;
        assert!(matches!(
            read_size(&mut rd).await,
            Err(TransferError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_negative_metadata_size_rejected() {
        let mut buf: Vec<u8> = Vec::new();
        write_string(&mut buf, "x").await.unwrap();
        write_size(&mut buf, -5).await.unwrap();
        let mut rd: &[u8] = &buf;
        assert!(read_metadata(&mut rd).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_scalar_frame_rejected_before_payload() {
        // Header only: a 64 MiB COMMAND must be refused without waiting for its body
        let hdr = build_frame_header(frame::COMMAND, MAX_FRAME_SIZE as u32);
        let mut rd: &[u8] = &hdr;
        assert!(matches!(
            read_command(&mut rd).await,
            Err(TransferError::Protocol(ref m)) if m.contains("too large")
        ));

        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&build_frame_header(frame::COMMAND, (MAX_SCALAR_FRAME_SIZE + 1) as u32))
            .await
            .unwrap();
        assert!(matches!(
            read_command_timed(&mut server, 1000).await,
            Err(TransferError::Protocol(ref m)) if m.contains("too large")
        ));

        let hdr = build_frame_header(frame::STRING, (MAX_SCALAR_FRAME_SIZE + 1) as u32);
        let mut rd: &[u8] = &hdr;
        assert!(matches!(read_string(&mut rd).await, Err(TransferError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_large_listing_still_accepted() {
        let names: Vec<String> = (0..2000).map(|i| format!("file-{i:05}.bin")).collect();
        let mut buf: Vec<u8> = Vec::new();
        write_listing(&mut buf, &names).await.unwrap();
        assert!(buf.len() > MAX_SCALAR_FRAME_SIZE);
        let mut rd: &[u8] = &buf;
        assert_eq!(read_listing(&mut rd).await.unwrap(), names);
    }

    #[tokio::test]
    async fn test_command_read_timeout() {
        let (mut client, _server) = tokio::io::duplex(64);
        let res = read_command_timed(&mut client, 20).await;
        assert!(matches!(res, Err(TransferError::Io(ref e)) if e.kind() == io::ErrorKind::TimedOut));
    }
}
