//! External collaborators the core consumes rather than implements.
//!
//! Per spec §1 the TCP accept loop, SDP text parser, access-control files,
//! config reload machinery, and SDP-cache persistence are all outside the
//! core's scope — they're invoked through the traits below. Each trait also
//! gets one default, in-process implementation so the crate is runnable
//! standalone without wiring in an external store.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;

/// Parses raw SDP text into ordered `(type, value)` lines.
///
/// A minimal line-oriented parser; the wire-format semantics of individual
/// attribute lines belong to the reflector's own SDP repair logic
/// ([`crate::protocol::sdp`]), not to this contract.
pub trait SdpTextParser: Send + Sync {
    fn parse_lines(&self, sdp: &str) -> Vec<(char, String)>;
}

/// Default parser: splits on CRLF/LF, keeps `type=value` lines, skips blanks.
#[derive(Default)]
pub struct LineSdpParser;

impl SdpTextParser for LineSdpParser {
    fn parse_lines(&self, sdp: &str) -> Vec<(char, String)> {
        sdp.lines()
            .filter_map(|line| {
                let line = line.trim_end_matches('\r');
                if line.is_empty() {
                    return None;
                }
                let mut chars = line.chars();
                let tag = chars.next()?;
                if chars.next() != Some('=') {
                    return None;
                }
                Some((tag, chars.as_str().to_string()))
            })
            .collect()
    }
}

/// Access-control decision for a broadcaster address.
pub trait AccessControl: Send + Sync {
    fn allow_broadcast(&self, addr: IpAddr) -> bool;
}

/// In-memory IP allow-list, backed by [`crate::config::ReflectorConfig`].
pub struct AllowListAccessControl {
    allowed: Vec<IpAddr>,
}

impl AllowListAccessControl {
    pub fn new(allowed: Vec<IpAddr>) -> Self {
        Self { allowed }
    }
}

impl AccessControl for AllowListAccessControl {
    fn allow_broadcast(&self, addr: IpAddr) -> bool {
        self.allowed.is_empty() || self.allowed.contains(&addr)
    }
}

/// Persisted SDP cache, keyed `<sourcePath><delimiter><channel>` (spec §6).
///
/// The core only needs get/put/remove; durability of the backing store is
/// an external concern. The default implementation is in-memory and does
/// not survive a restart.
pub trait SdpCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, sdp: String);
    fn remove(&self, key: &str);
}

#[derive(Default)]
pub struct InMemorySdpCache {
    entries: RwLock<HashMap<String, String>>,
}

impl SdpCache for InMemorySdpCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn put(&self, key: &str, sdp: String) {
        self.entries.write().insert(key.to_string(), sdp);
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }
}

/// Build the SDP-cache key for a source path and channel, per spec §6.
pub fn sdp_cache_key(source_path: &str, channel: u32) -> String {
    format!("{source_path}#{channel}")
}

/// Bundle of contract implementations a [`crate::server::Server`] is built with.
///
/// Grouped so callers can swap any one collaborator (e.g. a persistent SDP
/// cache) without touching the others.
#[derive(Clone)]
pub struct Contracts {
    pub sdp_parser: Arc<dyn SdpTextParser>,
    pub access_control: Arc<dyn AccessControl>,
    pub sdp_cache: Arc<dyn SdpCache>,
}

impl Contracts {
    pub fn default_in_process(ip_allow_list: Vec<IpAddr>) -> Self {
        Self {
            sdp_parser: Arc::new(LineSdpParser),
            access_control: Arc::new(AllowListAccessControl::new(ip_allow_list)),
            sdp_cache: Arc::new(InMemorySdpCache::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_parser_skips_blank_and_malformed() {
        let parser = LineSdpParser;
        let lines = parser.parse_lines("v=0\r\n\r\nbadline\nm=video 0 RTP/AVP 96\r\n");
        assert_eq!(lines, vec![('v', "0".to_string()), ('m', "video 0 RTP/AVP 96".to_string())]);
    }

    #[test]
    fn sdp_cache_roundtrip() {
        let cache = InMemorySdpCache::default();
        let key = sdp_cache_key("/live/s1", 0);
        assert!(cache.get(&key).is_none());
        cache.put(&key, "v=0\r\n".to_string());
        assert_eq!(cache.get(&key), Some("v=0\r\n".to_string()));
        cache.remove(&key);
        assert!(cache.get(&key).is_none());
    }
}
