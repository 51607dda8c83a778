//! Source-level descriptors (spec §3 `StreamDescriptor` / `SourceDescriptor`).
//!
//! Grounded on `SourceInfo.h`'s `StreamInfo`/`SourceInfo`: a broadcast is
//! described before any socket exists, so a publisher's `ANNOUNCE`+SDP or a
//! pre-configured SDP file can both produce the same descriptor shape that
//! [`crate::reflector::session::ReflectorSession::setup`] consumes.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Transport flavor a track is set up to use (spec §3, §6 interleaved framing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackTransport {
    Udp,
    TcpInterleaved,
}

/// Push vs. pull direction for a track's setup (spec §3 `setupToReceive`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupDirection {
    /// Reflector receives from a publisher (`ANNOUNCE`+`RECORD`).
    Push,
    /// Reflector serves subscribers from a source it already has (`DESCRIBE`/`SETUP`).
    Pull,
}

/// One media track within a broadcast (spec §3 `StreamDescriptor`).
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    /// Track id, unique within its session (spec §3 invariant).
    pub track_id: u32,
    /// Source address the publisher sends from, if known ahead of time.
    pub source_addr: Option<IpAddr>,
    /// Destination address packets are reflected to (multicast or server-local).
    pub dest_addr: IpAddr,
    /// Destination port; always even. `port + 1` is the paired RTCP port.
    pub dest_port: u16,
    pub ttl: u8,
    pub payload_type: u8,
    pub payload_name: String,
    /// Subscriber bootstrap buffer delay, in seconds (spec §3 default 3).
    pub buffer_delay_secs: u32,
    pub transport: TrackTransport,
    pub direction: SetupDirection,
    /// RTP clock rate for this track's media, in Hz.
    pub timescale: u32,
    /// Already has a publisher bound (spec §4.3 duplicate-broadcast check).
    pub setup_to_receive: bool,
}

impl StreamDescriptor {
    pub fn default_buffer_delay_secs() -> u32 {
        3
    }
}

/// A full broadcast description: its tracks plus an optional active window
/// (spec §3 `SourceDescriptor`).
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub streams: Vec<StreamDescriptor>,
    /// `(start, end)` unix-seconds window. `None` means permanent (spec §3 invariant).
    pub active_window: Option<(u64, u64)>,
}

impl SourceDescriptor {
    pub fn permanent(streams: Vec<StreamDescriptor>) -> Self {
        Self {
            streams,
            active_window: None,
        }
    }

    /// Whether this source has no scheduled end (spec §3: a zero-length window means permanent).
    pub fn is_permanent(&self) -> bool {
        match self.active_window {
            None => true,
            Some((start, end)) => end <= start,
        }
    }

    /// Whether `now` falls within the scheduled active window.
    pub fn is_active_at(&self, now_unix_secs: u64) -> bool {
        match self.active_window {
            None => true,
            Some((start, end)) if end <= start => true,
            Some((start, end)) => now_unix_secs >= start && now_unix_secs < end,
        }
    }

    /// Convenience wrapper over [`is_active_at`](Self::is_active_at) using the
    /// current wall-clock time.
    pub fn is_active_now(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.is_active_at(now)
    }
}

/// Whether `addr` is a legal reflection destination: multicast or loopback
/// (the "server-local" case for unicast push-mode relay to the same host).
///
/// Grounded on `SourceInfo::IsReflectableIPAddr`.
pub fn is_reflectable_addr(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_multicast() || v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_multicast() || v6.is_loopback(),
    }
}

impl StreamDescriptor {
    /// Derived predicate (spec §3 `isReflectable`): rejects streams whose
    /// destination is neither multicast nor server-local.
    pub fn is_reflectable(&self) -> bool {
        is_reflectable_addr(self.dest_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(dest: &str) -> StreamDescriptor {
        StreamDescriptor {
            track_id: 1,
            source_addr: None,
            dest_addr: dest.parse().unwrap(),
            dest_port: 20000,
            ttl: 16,
            payload_type: 96,
            payload_name: "H264".into(),
            buffer_delay_secs: StreamDescriptor::default_buffer_delay_secs(),
            transport: TrackTransport::Udp,
            direction: SetupDirection::Pull,
            timescale: 90000,
            setup_to_receive: false,
        }
    }

    #[test]
    fn multicast_is_reflectable() {
        assert!(stream("239.1.1.1").is_reflectable());
    }

    #[test]
    fn loopback_is_reflectable() {
        assert!(stream("127.0.0.1").is_reflectable());
    }

    #[test]
    fn public_unicast_is_not_reflectable() {
        assert!(!stream("8.8.8.8").is_reflectable());
    }

    #[test]
    fn zero_length_window_is_permanent() {
        let src = SourceDescriptor {
            streams: vec![],
            active_window: Some((100, 100)),
        };
        assert!(src.is_permanent());
        assert!(src.is_active_at(50));
        assert!(src.is_active_at(500));
    }

    #[test]
    fn scheduled_window_bounds_activity() {
        let src = SourceDescriptor {
            streams: vec![],
            active_window: Some((100, 200)),
        };
        assert!(!src.is_permanent());
        assert!(!src.is_active_at(50));
        assert!(src.is_active_at(150));
        assert!(!src.is_active_at(200));
    }
}
