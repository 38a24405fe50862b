//! Protocol logic shared by the client and server endpoints
//!
//! Header building/parsing, payload encoding for the typed frames, and the
//! storage-root path rules. Everything here is synchronous; `codec` layers
//! the async stream I/O on top.

use crate::error::{Result, TransferError};
use crate::protocol::{FileMetadata, HEADER_LEN, MAGIC, MAX_FRAME_SIZE, VERSION};
use std::path::{Path, PathBuf};

/// Reject a client-supplied filename unless it is a single plain path component.
///
/// Names with separators, `.`/`..`, NUL bytes or (on Windows) a drive/stream
/// colon are refused rather than normalized, so a request can never address
/// anything outside the storage root.
pub fn sanitize_file_name(name: &str) -> Result<&str> {
    let invalid = || TransferError::InvalidName(name.to_string());
    if name.is_empty() || name == "." || name == ".." {
        return Err(invalid());
    }
    if name.contains('\0') || name.contains('/') || name.contains('\\') {
        return Err(invalid());
    }
    #[cfg(windows)]
    if name.contains(':') {
        return Err(invalid());
    }
    Ok(name)
}

/// Join a sanitized filename onto the storage root and make sure the result
/// does not leave it through a symlink.
pub fn resolve_in_root(root: &Path, name: &str) -> Result<PathBuf> {
    let name = sanitize_file_name(name)?;
    let canon_root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let joined = canon_root.join(name);

    if let Ok(canon) = std::fs::canonicalize(&joined) {
        if !canon.starts_with(&canon_root) {
            return Err(TransferError::InvalidName(name.to_string()));
        }
        return Ok(canon);
    }
    // Present but unresolvable: a dangling link that creating the file would follow
    if std::fs::symlink_metadata(&joined).is_ok() {
        return Err(TransferError::InvalidName(name.to_string()));
    }
    Ok(joined)
}

/// Validate frame payload size against protocol::MAX_FRAME_SIZE
pub fn validate_frame_size(size: usize) -> Result<()> {
    validate_frame_size_within(size, MAX_FRAME_SIZE)
}

pub fn validate_frame_size_within(size: usize, limit: usize) -> Result<()> {
    if size > limit {
        return Err(TransferError::protocol(format!(
            "frame payload too large: {} bytes (max: {})",
            size, limit
        )));
    }
    Ok(())
}

/// Build frame header (11 bytes)
/// Format: MAGIC (4) | VERSION (2) | TYPE (1) | LENGTH (4)
pub fn build_frame_header(frame_type: u8, payload_len: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[6] = frame_type;
    header[7..11].copy_from_slice(&payload_len.to_le_bytes());
    header
}

/// Parse frame header
/// Returns: (frame_type, payload_length)
pub fn parse_frame_header(header: &[u8; HEADER_LEN]) -> Result<(u8, u32)> {
    if &header[0..4] != MAGIC {
        return Err(TransferError::protocol("invalid magic in frame header"));
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(TransferError::protocol(format!(
            "protocol version mismatch: got {}, expected {}",
            version, VERSION
        )));
    }

    let frame_type = header[6];
    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);

    Ok((frame_type, payload_len))
}

pub fn encode_size(size: i64) -> [u8; 8] {
    size.to_le_bytes()
}

pub fn decode_size(payload: &[u8]) -> Result<i64> {
    let bytes: [u8; 8] = payload
        .try_into()
        .map_err(|_| TransferError::protocol(format!("bad SIZE payload length {}", payload.len())))?;
    Ok(i64::from_le_bytes(bytes))
}

/// Sizes above i64::MAX cannot be announced; the wire field is signed so
/// the not-found sentinel fits.
pub fn size_to_wire(size: u64) -> Result<i64> {
    i64::try_from(size).map_err(|_| TransferError::protocol(format!("file too large: {size} bytes")))
}

pub fn size_from_wire(size: i64) -> Result<u64> {
    u64::try_from(size).map_err(|_| TransferError::protocol(format!("negative size {size}")))
}

pub fn decode_string(payload: Vec<u8>) -> Result<String> {
    String::from_utf8(payload).map_err(|_| TransferError::protocol("STRING payload is not UTF-8"))
}

/// count u32 | (len u16 | utf8 bytes)*
pub fn encode_listing(names: &[String]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(4 + names.iter().map(|n| 2 + n.len()).sum::<usize>());
    let count = u32::try_from(names.len())
        .map_err(|_| TransferError::protocol("too many listing entries"))?;
    out.extend_from_slice(&count.to_le_bytes());
    for n in names {
        let len = u16::try_from(n.len())
            .map_err(|_| TransferError::protocol(format!("name too long: {} bytes", n.len())))?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(n.as_bytes());
    }
    validate_frame_size(out.len())?;
    Ok(out)
}

pub fn decode_listing(payload: &[u8]) -> Result<Vec<String>> {
    if payload.len() < 4 {
        return Err(TransferError::protocol("bad LIST payload"));
    }
    let count = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let mut off = 4;
    let mut names = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        if payload.len() < off + 2 {
            return Err(TransferError::protocol("LIST entry truncated"));
        }
        let nlen = u16::from_le_bytes([payload[off], payload[off + 1]]) as usize;
        off += 2;
        if payload.len() < off + nlen {
            return Err(TransferError::protocol("LIST name truncated"));
        }
        let name = std::str::from_utf8(&payload[off..off + nlen])
            .map_err(|_| TransferError::protocol("LIST name is not UTF-8"))?;
        names.push(name.to_string());
        off += nlen;
    }
    if off != payload.len() {
        return Err(TransferError::protocol("trailing bytes after LIST entries"));
    }
    Ok(names)
}

pub fn encode_error(code: u8, msg: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + msg.len());
    out.push(code);
    out.extend_from_slice(msg.as_bytes());
    out
}

/// Turn an ERROR frame payload into the matching local error
pub fn decode_error(payload: &[u8]) -> TransferError {
    use crate::protocol::error_code;
    let Some((&code, rest)) = payload.split_first() else {
        return TransferError::protocol("empty ERROR payload");
    };
    let msg = String::from_utf8_lossy(rest).into_owned();
    match code {
        error_code::INVALID_NAME => TransferError::InvalidName(msg),
        _ => TransferError::Remote(msg),
    }
}

impl FileMetadata {
    /// The announced name must already be something the server would accept
    pub fn validate(&self) -> Result<()> {
        sanitize_file_name(&self.name)?;
        Ok(())
    }
}

/// Create directory with parent creation
pub fn ensure_dir_exists(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{error_code, frame};
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_accepts_plain_names() {
        assert_eq!(sanitize_file_name("a.txt").unwrap(), "a.txt");
        assert_eq!(sanitize_file_name(".hidden").unwrap(), ".hidden");
        assert_eq!(sanitize_file_name("with space.bin").unwrap(), "with space.bin");
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        for bad in ["", ".", "..", "../etc/passwd", "dir/file", "/etc/passwd", "a\\b", "nul\0.txt"] {
            assert!(
                matches!(sanitize_file_name(bad), Err(TransferError::InvalidName(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_in_root_stays_under_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let p = resolve_in_root(root, "new.bin").unwrap();
        assert!(p.starts_with(root.canonicalize().unwrap()));
        assert!(p.ends_with("new.bin"));
        assert!(resolve_in_root(root, "../escape").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_in_root_rejects_symlink_escape() {
        let root_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("secret.txt");
        std::fs::write(&target, "x").unwrap();
        std::os::unix::fs::symlink(&target, root_dir.path().join("link.txt")).unwrap();

        assert!(matches!(
            resolve_in_root(root_dir.path(), "link.txt"),
            Err(TransferError::InvalidName(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_in_root_rejects_dangling_symlink() {
        let root_dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let planted = outside.path().join("planted.txt");
        std::os::unix::fs::symlink(&planted, root_dir.path().join("up.txt")).unwrap();

        assert!(matches!(
            resolve_in_root(root_dir.path(), "up.txt"),
            Err(TransferError::InvalidName(_))
        ));
        assert!(!planted.exists());
    }

    #[test]
    fn test_frame_header_round_trip() {
        let header = build_frame_header(frame::LIST, 12345);
        let (parsed_type, parsed_len) = parse_frame_header(&header).unwrap();
        assert_eq!(parsed_type, frame::LIST);
        assert_eq!(parsed_len, 12345);
    }

    #[test]
    fn test_parse_frame_header_invalid_magic() {
        let mut header = build_frame_header(frame::STRING, 3);
        header[0..4].copy_from_slice(b"WRNG");
        assert!(matches!(
            parse_frame_header(&header),
            Err(TransferError::Protocol(_))
        ));
    }

    #[test]
    fn test_parse_frame_header_wrong_version() {
        let mut header = build_frame_header(frame::STRING, 3);
        header[4..6].copy_from_slice(&999u16.to_le_bytes());
        assert!(parse_frame_header(&header).is_err());
    }

    #[test]
    fn test_validate_frame_size_edge_cases() {
        assert!(validate_frame_size(0).is_ok());
        assert!(validate_frame_size(MAX_FRAME_SIZE).is_ok());
        assert!(validate_frame_size(MAX_FRAME_SIZE + 1).is_err());
    }

    #[test]
    fn test_listing_round_trip_keeps_order() {
        let names = vec!["b.bin".to_string(), "a.txt".to_string(), "ünïcode".to_string()];
        let encoded = encode_listing(&names).unwrap();
        assert_eq!(decode_listing(&encoded).unwrap(), names);
        assert!(decode_listing(&encode_listing(&[]).unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_listing_truncated() {
        let encoded = encode_listing(&["abcdef".to_string()]).unwrap();
        assert!(decode_listing(&encoded[..encoded.len() - 1]).is_err());
        assert!(decode_listing(&encoded[..2]).is_err());
    }

    #[test]
    fn test_size_conversions() {
        assert_eq!(decode_size(&encode_size(-1)).unwrap(), -1);
        assert_eq!(decode_size(&encode_size(2_500_000)).unwrap(), 2_500_000);
        assert!(decode_size(&[0u8; 7]).is_err());
        assert!(size_from_wire(-1).is_err());
        assert!(size_to_wire(u64::MAX).is_err());
    }

    #[test]
    fn test_error_payload_maps_codes() {
        let e = decode_error(&encode_error(error_code::INVALID_NAME, "../x"));
        assert!(matches!(e, TransferError::InvalidName(ref n) if n == "../x"));
        let e = decode_error(&encode_error(error_code::IO, "disk full"));
        assert!(matches!(e, TransferError::Remote(_)));
        assert!(matches!(decode_error(&[]), TransferError::Protocol(_)));
    }

    #[test]
    fn test_ensure_dir_exists() {
        let temp_dir = TempDir::new().unwrap();
        let new_dir = temp_dir.path().join("new").join("nested");
        ensure_dir_exists(&new_dir).unwrap();
        assert!(new_dir.is_dir());
        ensure_dir_exists(&new_dir).unwrap();
    }
}
