//! Reflector Stream (spec §4.2): one per media track. Ingests packets from
//! a single producer into its [`FrameBuffer`](super::frame_buffer::FrameBuffer)
//! and drives per-subscriber pacing and thinning.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::frame_buffer::{FrameBuffer, PacketKind, ReadResult};
use super::source::StreamDescriptor;

/// Lifecycle state of a Reflector Stream (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Receiving,
    TornDown,
}

/// Identifies one subscriber's cursor on this stream.
pub type SubscriberId = u64;

/// Per-subscriber pacing/cursor state (spec §4.2).
#[derive(Debug, Clone)]
struct PacingState {
    cursor: Option<u64>,
    next_send_deadline: Instant,
    /// Accumulated lateness; drives the thinning decision.
    lateness: Duration,
}

/// What the stream offers a subscriber on its next poll.
#[derive(Debug)]
pub enum Offer {
    /// Send this entry now.
    Send { kind: PacketKind, sequence: u16, timestamp: u32, payload: std::sync::Arc<[u8]> },
    /// No entry is ready; try again no earlier than this deadline.
    WaitUntil(Instant),
    /// The cursor skipped entries due to ring overflow; log and continue.
    Lost { skipped: u64 },
}

/// `use_one_SSRC_per_stream`/`timeout_stream_SSRC_secs` (spec §6): whether
/// ingest should lock onto a single source SSRC per track, and how long an
/// SSRC may go quiet before it's considered gone.
#[derive(Debug, Clone, Copy)]
struct SsrcPolicy {
    lock_to_one: bool,
    idle_timeout: Duration,
}

impl Default for SsrcPolicy {
    fn default() -> Self {
        Self { lock_to_one: false, idle_timeout: Duration::from_secs(30) }
    }
}

struct Inner {
    state: StreamState,
    subscribers: HashMap<SubscriberId, PacingState>,
    next_subscriber_id: SubscriberId,
    thinning_tolerance: Duration,
    /// Whether a publisher has completed `SETUP` to push into this track
    /// (spec §4.3 duplicate-broadcast check). Starts at the descriptor's
    /// initial value and flips permanently once a push `SETUP` succeeds.
    setup_to_receive: bool,
    ssrc_policy: SsrcPolicy,
    ssrc_seen: HashMap<u32, Instant>,
    locked_ssrc: Option<u32>,
}

/// A single ingest producer plus a fan-out point for many subscriber cursors.
pub struct ReflectorStream {
    pub descriptor: StreamDescriptor,
    pub buffer: FrameBuffer,
    inner: Mutex<Inner>,
}

impl ReflectorStream {
    pub fn new(descriptor: StreamDescriptor, buffer_capacity: usize, thinning_tolerance: Duration) -> Self {
        let setup_to_receive = descriptor.setup_to_receive;
        Self {
            descriptor,
            buffer: FrameBuffer::new(buffer_capacity),
            inner: Mutex::new(Inner {
                state: StreamState::Idle,
                subscribers: HashMap::new(),
                next_subscriber_id: 0,
                thinning_tolerance,
                setup_to_receive,
                ssrc_policy: SsrcPolicy::default(),
                ssrc_seen: HashMap::new(),
                locked_ssrc: None,
            }),
        }
    }

    /// `use_one_SSRC_per_stream`/`timeout_stream_SSRC_secs` (spec §6).
    pub fn configure_ssrc_policy(&self, lock_to_one: bool, idle_timeout: Duration) {
        let mut inner = self.inner.lock();
        inner.ssrc_policy = SsrcPolicy { lock_to_one, idle_timeout };
    }

    pub fn state(&self) -> StreamState {
        self.inner.lock().state
    }

    /// Runtime push-`SETUP` flag (spec §4.3), distinct from the descriptor's
    /// static initial value.
    pub fn setup_to_receive(&self) -> bool {
        self.inner.lock().setup_to_receive
    }

    /// Record that a publisher's push `SETUP` has completed on this track.
    pub fn mark_setup_to_receive(&self) {
        self.inner.lock().setup_to_receive = true;
    }

    /// Single producer entry point (spec §4.2 `pushPacket`).
    pub fn push_packet(&self, bytes: Vec<u8>, is_rtcp: bool) {
        let mut inner = self.inner.lock();
        if inner.state == StreamState::TornDown {
            return;
        }

        if !is_rtcp {
            if let Some(ssrc) = parse_rtp_ssrc(&bytes) {
                let now = Instant::now();
                let policy = inner.ssrc_policy;
                inner.ssrc_seen.retain(|_, last| now.saturating_duration_since(*last) < policy.idle_timeout);

                if policy.lock_to_one {
                    match inner.locked_ssrc {
                        Some(locked) if locked != ssrc => {
                            let locked_is_idle = !inner.ssrc_seen.contains_key(&locked);
                            if locked_is_idle {
                                inner.locked_ssrc = Some(ssrc);
                            } else {
                                return;
                            }
                        }
                        _ => inner.locked_ssrc = Some(ssrc),
                    }
                }
                inner.ssrc_seen.insert(ssrc, now);
            }
        }

        inner.state = StreamState::Receiving;
        drop(inner);

        let (sequence, timestamp) = parse_rtp_seq_ts(&bytes, is_rtcp);
        let kind = if is_rtcp { PacketKind::Rtcp } else { PacketKind::Rtp };
        self.buffer.append(kind, sequence, timestamp, bytes);
    }

    /// Attach a new subscriber cursor, seeded at the current buffer head so
    /// it does not replay backlog it never asked for (spec §4.2 `attachSubscriber`).
    pub fn attach_subscriber(&self) -> SubscriberId {
        let mut inner = self.inner.lock();
        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        let cursor = self.buffer.head_packet_id();
        inner.subscribers.insert(
            id,
            PacingState {
                cursor,
                next_send_deadline: Instant::now(),
                lateness: Duration::ZERO,
            },
        );
        id
    }

    pub fn detach_subscriber(&self, id: SubscriberId) {
        self.inner.lock().subscribers.remove(&id);
    }

    pub fn first_packet_info(&self) -> Option<(u16, u32, Instant)> {
        self.buffer.first_packet_info()
    }

    /// Offer the next packet to subscriber `id` if its pacing deadline has
    /// passed (spec §4.2 pacing/thinning). Returns `None` if `id` is not
    /// attached.
    pub fn poll_subscriber(&self, id: SubscriberId) -> Option<Offer> {
        let mut inner = self.inner.lock();
        let tolerance = inner.thinning_tolerance;
        let pacing = inner.subscribers.get_mut(&id)?;

        let now = Instant::now();
        if pacing.next_send_deadline > now {
            return Some(Offer::WaitUntil(pacing.next_send_deadline));
        }

        match self.buffer.read_at(pacing.cursor) {
            ReadResult::Empty => {
                pacing.next_send_deadline = now + Duration::from_millis(20);
                Some(Offer::WaitUntil(pacing.next_send_deadline))
            }
            ReadResult::Lost { skipped, resumed_at } => {
                pacing.cursor = resumed_at.as_ref().map(|e| e.packet_id);
                Some(Offer::Lost { skipped })
            }
            ReadResult::Some(entry) => {
                pacing.cursor = Some(entry.packet_id);

                // Thinning: RTCP is never dropped; RTP is dropped once
                // lateness exceeds tolerance (spec §4.2).
                if entry.kind == PacketKind::Rtp && pacing.lateness > tolerance {
                    pacing.lateness = pacing.lateness.saturating_sub(Duration::from_millis(1));
                    return Some(Offer::WaitUntil(now));
                }

                let lateness = now.saturating_duration_since(entry.arrival);
                pacing.lateness = lateness;

                Some(Offer::Send {
                    kind: entry.kind,
                    sequence: entry.sequence,
                    timestamp: entry.timestamp,
                    payload: entry.payload,
                })
            }
        }
    }

    pub fn tear_down(&self) {
        let mut inner = self.inner.lock();
        inner.state = StreamState::TornDown;
        inner.subscribers.clear();
    }
}

/// Best-effort sequence/timestamp extraction from an RTP/RTCP packet.
///
/// The wire-format codec itself is out of scope (spec §1); this reads only
/// the two fixed-offset fields the Frame Buffer needs for its "newer than"
/// bookkeeping (RFC 3550 §5.1: sequence at bytes 2-3, timestamp at 4-7).
/// RTCP packets carry no comparable sequence number, so `0` is used.
fn parse_rtp_seq_ts(bytes: &[u8], is_rtcp: bool) -> (u16, u32) {
    if is_rtcp || bytes.len() < 12 {
        return (0, 0);
    }
    let sequence = u16::from_be_bytes([bytes[2], bytes[3]]);
    let timestamp = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    (sequence, timestamp)
}

/// RFC 3550 §5.1: SSRC at bytes 8-11.
fn parse_rtp_ssrc(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < 12 {
        return None;
    }
    Some(u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]))
}
