//! Reflector Session (spec §4.3): aggregates the streams of one broadcast,
//! owns the SDP and publisher/subscriber identities, and provides tear-down.
//!
//! Grounded on `QTSSReflectorModule.cpp`'s duplicate-broadcast check and
//! `.kill` handling, adapted to the Rust ownership model spec §9 calls for:
//! the session owns its streams; streams hold subscriber handles, not
//! owning pointers back to connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::frame_buffer::PacketKind;
use super::source::SourceDescriptor;
use super::stream::{ReflectorStream, SubscriberId};
use crate::error::{Result, RtspError};

const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// Error returned by [`ReflectorSession::setup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupError {
    PortRangeViolation,
    AddressUnreflectable,
    BindInUse,
}

/// A subscriber handle: which stream, and its cursor id on that stream.
#[derive(Debug, Clone, Copy)]
pub struct SubscriberHandle {
    pub stream_index: usize,
    pub subscriber_id: SubscriberId,
}

struct Inner {
    publisher_connection_id: Option<u64>,
    publisher_attached_at: Option<Instant>,
    subscribers: Vec<u64>,
    init_at: Instant,
}

/// One live one-in-many-out broadcast, named by path+channel (spec §3).
pub struct ReflectorSession {
    pub name: String,
    pub source: SourceDescriptor,
    pub streams: Vec<ReflectorStream>,
    pub local_sdp: RwLock<String>,
    refcount: AtomicU64,
    inner: RwLock<Inner>,
}

impl ReflectorSession {
    /// `setup` (spec §4.3): creates N Reflector Streams, binding ingest
    /// endpoints logically (actual socket binding is an out-of-scope
    /// collaborator; this validates the descriptors that would drive it).
    pub fn setup(name: String, source: SourceDescriptor) -> std::result::Result<Self, SetupError> {
        for stream in &source.streams {
            if !stream.is_reflectable() {
                return Err(SetupError::AddressUnreflectable);
            }
        }

        let streams = source
            .streams
            .iter()
            .map(|desc| {
                ReflectorStream::new(desc.clone(), DEFAULT_BUFFER_CAPACITY, Duration::from_millis(500))
            })
            .collect();

        Ok(Self {
            name,
            source,
            streams,
            local_sdp: RwLock::new(String::new()),
            refcount: AtomicU64::new(0),
            inner: RwLock::new(Inner {
                publisher_connection_id: None,
                publisher_attached_at: None,
                subscribers: Vec::new(),
                init_at: Instant::now(),
            }),
        })
    }

    /// Static-SDP-port-range validation (spec §6 `enforce_static_sdp_port_range`):
    /// every stream's advertised destination port must fall within
    /// `[min, max]`. Called by the route role before `setup` when the
    /// policy is enabled; `setup` itself stays policy-agnostic.
    pub fn validate_static_port_range(streams: &[super::source::StreamDescriptor], min: u16, max: u16) -> std::result::Result<(), SetupError> {
        if streams.iter().any(|s| s.dest_port < min || s.dest_port > max) {
            return Err(SetupError::PortRangeViolation);
        }
        Ok(())
    }

    /// Duplicate-broadcast check (spec §4.3): a stream whose descriptor
    /// already has `setup_to_receive` set refuses a second publisher unless
    /// the caller has the duplicate-broadcast policy enabled.
    pub fn setup_to_receive_is_duplicate(&self, track_id: u32, allow_duplicate_broadcasts: bool) -> bool {
        if allow_duplicate_broadcasts {
            return false;
        }
        self.streams
            .iter()
            .any(|s| s.descriptor.track_id == track_id && s.setup_to_receive())
    }

    /// Record that a publisher's push `SETUP` has completed on `track_id`
    /// (spec §4.3). A no-op if no stream has that track id.
    pub fn mark_setup_to_receive(&self, track_id: u32) {
        if let Some(stream) = self.streams.iter().find(|s| s.descriptor.track_id == track_id) {
            stream.mark_setup_to_receive();
        }
    }

    /// `use_one_SSRC_per_stream`/`timeout_stream_SSRC_secs` (spec §6),
    /// applied to every track in the broadcast.
    pub fn configure_ssrc_policy(&self, lock_to_one: bool, idle_timeout: std::time::Duration) {
        for stream in &self.streams {
            stream.configure_ssrc_policy(lock_to_one, idle_timeout);
        }
    }

    pub fn set_publisher(&self, connection_id: u64) {
        let mut inner = self.inner.write();
        inner.publisher_connection_id = Some(connection_id);
        inner.publisher_attached_at = Some(Instant::now());
        self.refcount.fetch_add(1, Ordering::SeqCst);
    }

    pub fn clear_publisher(&self) {
        let mut inner = self.inner.write();
        if inner.publisher_connection_id.take().is_some() {
            inner.publisher_attached_at = None;
            self.refcount.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn has_publisher(&self) -> bool {
        self.inner.read().publisher_connection_id.is_some()
    }

    /// `max_broadcast_announce_duration_secs` (spec §6): whether the current
    /// publisher has held this session past the configured hard cap.
    /// `None` disables the cap.
    pub fn publisher_lifetime_exceeded(&self, max_secs: Option<u64>) -> bool {
        let Some(max_secs) = max_secs else { return false };
        match self.inner.read().publisher_attached_at {
            Some(attached_at) => attached_at.elapsed() >= Duration::from_secs(max_secs),
            None => false,
        }
    }

    pub fn add_subscriber(&self, connection_id: u64) {
        let mut inner = self.inner.write();
        inner.subscribers.push(connection_id);
        self.refcount.fetch_add(1, Ordering::SeqCst);
    }

    /// `removeSubscriber` (spec §4.3): idempotent. `kill_clients` is
    /// informational here — the actual teardown signal to the connection
    /// is delivered by the pipeline; this only updates bookkeeping.
    pub fn remove_subscriber(&self, connection_id: u64, _kill_clients: bool) {
        let mut inner = self.inner.write();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|id| *id != connection_id);
        if inner.subscribers.len() < before {
            self.refcount.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn subscriber_connection_ids(&self) -> Vec<u64> {
        self.inner.read().subscribers.clone()
    }

    /// `tearDownAllSubscribers` (spec §4.3).
    pub fn tear_down_all_subscribers(&self) -> Vec<u64> {
        let mut inner = self.inner.write();
        let ids = std::mem::take(&mut inner.subscribers);
        let count = ids.len() as u64;
        self.refcount.fetch_sub(count, Ordering::SeqCst);
        ids
    }

    pub fn refcount(&self) -> u64 {
        self.refcount.load(Ordering::SeqCst)
    }

    /// Ingest a packet on `track_id` from the publisher (push mode) or the
    /// source feed (pull mode). Returns [`RtspError::NotFound`] if the
    /// track doesn't exist.
    pub fn push_packet(&self, track_id: u32, bytes: Vec<u8>, is_rtcp: bool) -> Result<()> {
        let stream = self
            .streams
            .iter()
            .find(|s| s.descriptor.track_id == track_id)
            .ok_or_else(|| RtspError::NotFound(format!("track {track_id}")))?;
        stream.push_packet(bytes, is_rtcp);
        Ok(())
    }

    /// Dispatch an interleaved-channel frame to the right stream (spec §4.5,
    /// §8 invariant 5): `channel >> 1` selects the stream index; even
    /// channel is RTP, odd is RTCP. Out-of-range indices are rejected
    /// without touching any state.
    pub fn push_interleaved(&self, channel: u8, bytes: Vec<u8>) -> Result<()> {
        let index = (channel >> 1) as usize;
        let is_rtcp = channel & 1 == 1;
        let stream = self
            .streams
            .get(index)
            .ok_or_else(|| RtspError::NotFound(format!("interleaved channel {channel}")))?;
        stream.push_packet(bytes, is_rtcp);
        Ok(())
    }

    pub fn local_sdp(&self) -> String {
        self.local_sdp.read().clone()
    }

    pub fn set_local_sdp(&self, sdp: String) {
        *self.local_sdp.write() = sdp;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflector::source::{SetupDirection, StreamDescriptor, TrackTransport};

    fn stream_desc(track_id: u32) -> StreamDescriptor {
        StreamDescriptor {
            track_id,
            source_addr: None,
            dest_addr: "239.1.1.1".parse().unwrap(),
            dest_port: 20000 + track_id as u16 * 2,
            ttl: 16,
            payload_type: 96,
            payload_name: "H264".into(),
            buffer_delay_secs: 3,
            transport: TrackTransport::Udp,
            direction: SetupDirection::Pull,
            timescale: 90000,
            setup_to_receive: false,
        }
    }

    #[test]
    fn setup_rejects_unreflectable_destination() {
        let mut desc = stream_desc(1);
        desc.dest_addr = "8.8.8.8".parse().unwrap();
        let source = SourceDescriptor::permanent(vec![desc]);
        assert_eq!(
            ReflectorSession::setup("live/s1".into(), source).unwrap_err(),
            SetupError::AddressUnreflectable
        );
    }

    #[test]
    fn publisher_lifetime_cap_disabled_by_default() {
        let source = SourceDescriptor::permanent(vec![stream_desc(1)]);
        let session = ReflectorSession::setup("live/s1".into(), source).unwrap();
        session.set_publisher(1);
        assert!(!session.publisher_lifetime_exceeded(None));
    }

    #[test]
    fn publisher_lifetime_cap_trips_once_elapsed() {
        let source = SourceDescriptor::permanent(vec![stream_desc(1)]);
        let session = ReflectorSession::setup("live/s1".into(), source).unwrap();
        session.set_publisher(1);
        assert!(!session.publisher_lifetime_exceeded(Some(3600)));
        assert!(session.publisher_lifetime_exceeded(Some(0)));
    }

    #[test]
    fn configure_ssrc_policy_applies_to_every_stream() {
        let source = SourceDescriptor::permanent(vec![stream_desc(1), stream_desc(2)]);
        let session = ReflectorSession::setup("live/s1".into(), source).unwrap();
        session.configure_ssrc_policy(true, std::time::Duration::from_secs(5));

        let rtp = |ssrc: u32| {
            let mut b = vec![0x80, 96, 0, 0, 0, 0, 0, 0];
            b.extend_from_slice(&ssrc.to_be_bytes());
            b
        };
        let sub = session.streams[0].attach_subscriber();
        session.streams[0].push_packet(rtp(111), false);
        session.streams[0].push_packet(rtp(222), false);
        match session.streams[0].poll_subscriber(sub) {
            Some(crate::reflector::stream::Offer::Send { .. }) => {}
            other => panic!("expected the first SSRC's packet to survive, got {other:?}"),
        }
        match session.streams[0].poll_subscriber(sub) {
            Some(crate::reflector::stream::Offer::WaitUntil(_)) => {}
            other => panic!("expected the second SSRC's packet to have been dropped, got {other:?}"),
        }
    }

    #[test]
    fn refcount_tracks_publisher_and_subscribers() {
        let source = SourceDescriptor::permanent(vec![stream_desc(1)]);
        let session = ReflectorSession::setup("live/s1".into(), source).unwrap();
        assert_eq!(session.refcount(), 0);
        session.set_publisher(1);
        assert_eq!(session.refcount(), 1);
        session.add_subscriber(2);
        session.add_subscriber(3);
        assert_eq!(session.refcount(), 3);
        session.remove_subscriber(2, false);
        assert_eq!(session.refcount(), 2);
        session.clear_publisher();
        assert_eq!(session.refcount(), 1);
    }

    #[test]
    fn remove_subscriber_is_idempotent() {
        let source = SourceDescriptor::permanent(vec![stream_desc(1)]);
        let session = ReflectorSession::setup("live/s1".into(), source).unwrap();
        session.add_subscriber(2);
        session.remove_subscriber(2, false);
        session.remove_subscriber(2, false);
        assert_eq!(session.refcount(), 0);
    }

    #[test]
    fn interleaved_channel_maps_to_stream_and_kind() {
        let source = SourceDescriptor::permanent(vec![stream_desc(0), stream_desc(1)]);
        let session = ReflectorSession::setup("live/s1".into(), source).unwrap();
        session.push_interleaved(0, vec![0x80, 96, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(session.streams[0].state(), crate::reflector::stream::StreamState::Receiving);
    }

    #[test]
    fn interleaved_channel_out_of_range_is_rejected() {
        let source = SourceDescriptor::permanent(vec![stream_desc(0)]);
        let session = ReflectorSession::setup("live/s1".into(), source).unwrap();
        assert!(session.push_interleaved(0xFE, vec![0; 12]).is_err());
        assert_eq!(session.refcount(), 0);
    }

    #[test]
    fn static_port_range_rejects_out_of_range_port() {
        let desc = stream_desc(1);
        assert!(ReflectorSession::validate_static_port_range(&[desc.clone()], 6970, 9999).is_err());
        assert!(ReflectorSession::validate_static_port_range(&[stream_desc_at_port(7000)], 6970, 9999).is_ok());
    }

    fn stream_desc_at_port(port: u16) -> StreamDescriptor {
        let mut desc = stream_desc(1);
        desc.dest_port = port;
        desc
    }

    #[test]
    fn duplicate_broadcast_detected_unless_allowed() {
        let mut desc = stream_desc(1);
        desc.setup_to_receive = true;
        let source = SourceDescriptor::permanent(vec![desc]);
        let session = ReflectorSession::setup("live/s1".into(), source).unwrap();
        assert!(session.setup_to_receive_is_duplicate(1, false));
        assert!(!session.setup_to_receive_is_duplicate(1, true));
    }
}
