//! Reflector-wide configuration (spec §6's CLI/config table).
//!
//! These knobs are consumed by the pipeline roles and the reflector session
//! layer; they are collected once at startup into a single [`ReflectorConfig`]
//! and shared read-only (`Arc`) across every connection task, the same way
//! the teacher's `ServerConfig` flowed through its handlers.

use std::net::IpAddr;

/// Full set of reflector-wide policy and SDP knobs.
#[derive(Debug, Clone)]
pub struct ReflectorConfig {
    /// SDP origin/session fields advertised in DESCRIBE responses.
    pub public_host: Option<String>,
    pub sdp_username: String,
    pub sdp_session_id: String,
    pub sdp_session_version: String,
    pub sdp_session_name: String,

    /// Accept URLs that do not end in `.sdp`.
    pub allow_non_sdp_urls: bool,
    /// Permit `ANNOUNCE`.
    pub enable_broadcast_announce: bool,
    /// Permit `RECORD` / push data.
    pub enable_broadcast_push: bool,
    /// Hard cap on publisher lifetime, in seconds. `None` = unlimited.
    pub max_broadcast_announce_duration_secs: Option<u64>,
    /// Allow a second publisher to attach to an already-live name.
    pub allow_duplicate_broadcasts: bool,
    /// Inclusive port range that SDP-advertised static sockets must fall within.
    pub minimum_static_sdp_port: u16,
    pub maximum_static_sdp_port: u16,
    /// Reject `ANNOUNCE`s whose SDP requests ports outside the static range.
    pub enforce_static_sdp_port_range: bool,
    /// Tear down subscribers when the publisher disconnects.
    pub kill_clients_when_broadcast_stops: bool,
    /// Use a single SSRC for every packet of a stream rather than per-source.
    pub use_one_ssrc_per_stream: bool,
    /// Idle-SSRC expiry, in seconds.
    pub timeout_stream_ssrc_secs: u64,
    /// Publisher keepalive timeout, in seconds. Clamped to a 30s floor per spec §5.
    pub timeout_broadcaster_session_secs: u64,
    /// Require authentication for loopback publishers too.
    pub authenticate_local_broadcast: bool,
    /// Disable client overbuffering (ignore `x-bufferdelay`).
    pub disable_overbuffering: bool,
    /// Master enable for reflection; when false every broadcast is refused.
    pub allow_broadcasts: bool,
    /// Allow `.kill`-suffixed `ANNOUNCE` to tear down a named broadcast.
    pub allow_announced_kill: bool,
    /// Add a `Range: npt=now-` header to `PLAY` responses.
    pub enable_play_response_range_header: bool,
    /// Scale `b=` SDP bandwidth lines by this percentage (1-100).
    pub compatibility_adjust_sdp_media_bandwidth_percent: u8,
    /// Require sequence/time fields in the `RTP-Info` header.
    pub force_rtp_info_sequence_and_time: bool,
    /// IP allow-list for broadcasters. Empty means "allow any".
    pub ip_allow_list: Vec<IpAddr>,
    /// Path prefix that, when matched, triggers a broadcast redirect.
    pub redirect_broadcast_keyword: Option<String>,
    pub redirect_broadcasts_dir: Option<String>,
    /// Allowed broadcast path prefixes. Empty means "allow any path".
    pub broadcast_dir_list: Vec<String>,

    /// Fixed worker-pool size for the cooperative scheduler (spec §5).
    pub worker_threads: usize,
    /// Maximum SDP body size accepted in an `ANNOUNCE`, in kilobytes.
    pub max_sdp_size_kb: usize,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            public_host: None,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_version: "0".to_string(),
            sdp_session_name: "Broadcast".to_string(),

            allow_non_sdp_urls: false,
            enable_broadcast_announce: true,
            enable_broadcast_push: true,
            max_broadcast_announce_duration_secs: None,
            allow_duplicate_broadcasts: false,
            minimum_static_sdp_port: 6970,
            maximum_static_sdp_port: 9999,
            enforce_static_sdp_port_range: false,
            kill_clients_when_broadcast_stops: false,
            use_one_ssrc_per_stream: false,
            timeout_stream_ssrc_secs: 30,
            timeout_broadcaster_session_secs: 30,
            authenticate_local_broadcast: false,
            disable_overbuffering: false,
            allow_broadcasts: true,
            allow_announced_kill: false,
            enable_play_response_range_header: false,
            compatibility_adjust_sdp_media_bandwidth_percent: 100,
            force_rtp_info_sequence_and_time: false,
            ip_allow_list: Vec::new(),
            redirect_broadcast_keyword: None,
            redirect_broadcasts_dir: None,
            broadcast_dir_list: Vec::new(),

            worker_threads: 8,
            max_sdp_size_kb: 64,
        }
    }
}

impl ReflectorConfig {
    /// Effective publisher keepalive: the configured value, floored at 30s
    /// per spec §5 ("Publishers have a dedicated timeout (minimum 30 s)").
    pub fn publisher_timeout_secs(&self) -> u64 {
        self.timeout_broadcaster_session_secs.max(30)
    }

    /// Whether a broadcaster at `addr` is permitted by [`ip_allow_list`](Self::ip_allow_list).
    pub fn ip_allowed(&self, addr: IpAddr) -> bool {
        self.ip_allow_list.is_empty() || self.ip_allow_list.contains(&addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publisher_timeout_floors_at_30() {
        let mut cfg = ReflectorConfig::default();
        cfg.timeout_broadcaster_session_secs = 5;
        assert_eq!(cfg.publisher_timeout_secs(), 30);
        cfg.timeout_broadcaster_session_secs = 120;
        assert_eq!(cfg.publisher_timeout_secs(), 120);
    }

    #[test]
    fn empty_allow_list_permits_everyone() {
        let cfg = ReflectorConfig::default();
        assert!(cfg.ip_allowed("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn nonempty_allow_list_restricts() {
        let mut cfg = ReflectorConfig::default();
        cfg.ip_allow_list.push("10.0.0.1".parse().unwrap());
        assert!(cfg.ip_allowed("10.0.0.1".parse().unwrap()));
        assert!(!cfg.ip_allowed("10.0.0.2".parse().unwrap()));
    }
}
