//! Server address parsing for connekt:// URLs and bare host[:port] strings

use crate::protocol::DEFAULT_PORT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteServer {
    pub host: String,
    pub port: u16,
}

/// Accepts `connekt://host[:port][/]` or `host[:port]`.
/// Returns `None` for an empty host, another scheme, or an unparsable port.
pub fn parse_server(s: &str) -> Option<RemoteServer> {
    let s_trim = s.trim();
    let lower = s_trim.to_ascii_lowercase();
    let rest = if let Some(scheme_end) = lower.find("://") {
        if &lower[..scheme_end] != "connekt" {
            return None;
        }
        &s_trim[scheme_end + 3..]
    } else {
        s_trim
    };
    let hp = rest.split('/').next().unwrap_or(rest);
    if hp.is_empty() {
        return None;
    }
    let (host, port) = match hp.rsplit_once(':') {
        Some((h, pr)) => (h.to_string(), pr.parse().ok()?),
        None => (hp.to_string(), DEFAULT_PORT),
    };
    if host.is_empty() {
        return None;
    }
    Some(RemoteServer { host, port })
}
