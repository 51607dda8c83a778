//! Frame Buffer (spec §4.1): a bounded, single-producer ring of recent
//! RTP/RTCP packets that lets a newly attached subscriber bootstrap from
//! the most recent sequence number/timestamp instead of waiting for the
//! next publisher packet.

use std::collections::VecDeque;

use parking_lot::RwLock;

/// Packet kind tagged onto each Frame Buffer entry (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Rtp,
    Rtcp,
}

/// One stored packet plus its capture metadata.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Monotonic id assigned at append time; readers track these, not deque
    /// indices, since the deque's front shifts as the ring overflows.
    pub packet_id: u64,
    pub kind: PacketKind,
    pub sequence: u16,
    pub timestamp: u32,
    pub arrival: std::time::Instant,
    pub payload: std::sync::Arc<[u8]>,
}

/// Result of a cursor read (spec §4.1 `readAt`).
#[derive(Debug, Clone)]
pub enum ReadResult {
    /// Entry found; `Entry::packet_id` is the new cursor watermark.
    Some(Entry),
    /// Producer hasn't appended anything past the cursor yet.
    Empty,
    /// The cursor's next entry was overwritten by ring overflow; `skipped`
    /// counts how many entries were lost. The cursor advances to the
    /// oldest entry still present.
    Lost { skipped: u64, resumed_at: Option<Entry> },
}

struct Inner {
    ring: VecDeque<Entry>,
    capacity: usize,
    next_packet_id: u64,
}

/// Bounded ring buffer shared by one Reflector Stream's producer and many
/// subscriber cursors.
pub struct FrameBuffer {
    inner: RwLock<Inner>,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame buffer capacity must be positive");
        Self {
            inner: RwLock::new(Inner {
                ring: VecDeque::with_capacity(capacity),
                capacity,
                next_packet_id: 0,
            }),
        }
    }

    /// Append one packet (spec §4.1 `append`). Wait-free for the single
    /// producer: at most one write-lock acquisition, no blocking on readers.
    pub fn append(&self, kind: PacketKind, sequence: u16, timestamp: u32, payload: Vec<u8>) -> u64 {
        let mut inner = self.inner.write();
        let packet_id = inner.next_packet_id;
        inner.next_packet_id += 1;

        if inner.ring.len() == inner.capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(Entry {
            packet_id,
            kind,
            sequence,
            timestamp,
            arrival: std::time::Instant::now(),
            payload: payload.into(),
        });
        packet_id
    }

    /// First entry still present, used to seed a newly attaching subscriber's
    /// cursor (spec §4.1 `firstPacketInfo`).
    pub fn first_packet_info(&self) -> Option<(u16, u32, std::time::Instant)> {
        let inner = self.inner.read();
        inner.ring.front().map(|e| (e.sequence, e.timestamp, e.arrival))
    }

    /// Newest packet_id appended so far, or `None` if nothing has been
    /// appended yet. A fresh cursor starts here to avoid replaying backlog.
    pub fn head_packet_id(&self) -> Option<u64> {
        let inner = self.inner.read();
        inner.ring.back().map(|e| e.packet_id)
    }

    /// Read the first unread entry after `cursor` (spec §4.1 `readAt`).
    ///
    /// `cursor` is `None` for a brand-new subscriber with no watermark yet.
    pub fn read_at(&self, cursor: Option<u64>) -> ReadResult {
        let inner = self.inner.read();
        let oldest_id = match inner.ring.front() {
            Some(e) => e.packet_id,
            None => return ReadResult::Empty,
        };

        let want = match cursor {
            None => oldest_id,
            Some(c) => c + 1,
        };

        if want < oldest_id {
            let skipped = oldest_id - want;
            let resumed_at = inner.ring.front().cloned();
            return ReadResult::Lost { skipped, resumed_at };
        }

        let offset = (want - oldest_id) as usize;
        match inner.ring.get(offset) {
            Some(entry) => ReadResult::Some(entry.clone()),
            None => ReadResult::Empty,
        }
    }
}

/// Signed 16-bit "newer than" comparison for RTP sequence-number wraparound
/// (spec §4.1, §8): `a` is newer than `b` iff `(a - b)` as a signed 16-bit
/// value is positive.
pub fn newer_than(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fb(cap: usize) -> FrameBuffer {
        FrameBuffer::new(cap)
    }

    #[test]
    fn append_then_read_from_scratch() {
        let buf = fb(4);
        buf.append(PacketKind::Rtp, 1, 1000, vec![1, 2, 3]);
        match buf.read_at(None) {
            ReadResult::Some(e) => {
                assert_eq!(e.sequence, 1);
                assert_eq!(&*e.payload, &[1, 2, 3][..]);
            }
            other => panic!("expected Some, got {other:?}"),
        }
    }

    #[test]
    fn read_after_head_is_empty() {
        let buf = fb(4);
        let id = buf.append(PacketKind::Rtp, 1, 1000, vec![1]);
        assert!(matches!(buf.read_at(Some(id)), ReadResult::Empty));
    }

    #[test]
    fn monotone_prefix_delivery() {
        let buf = fb(8);
        for seq in 1..=5u16 {
            buf.append(PacketKind::Rtp, seq, seq as u32 * 100, vec![seq as u8]);
        }
        let mut cursor = None;
        let mut seen = Vec::new();
        loop {
            match buf.read_at(cursor) {
                ReadResult::Some(e) => {
                    seen.push(e.sequence);
                    cursor = Some(e.packet_id);
                }
                _ => break,
            }
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn overflow_evicts_oldest_and_lagging_cursor_gets_lost_signal() {
        let buf = fb(2);
        let id0 = buf.append(PacketKind::Rtp, 1, 100, vec![1]);
        buf.append(PacketKind::Rtp, 2, 200, vec![2]);
        buf.append(PacketKind::Rtp, 3, 300, vec![3]); // evicts seq=1

        match buf.read_at(Some(id0)) {
            ReadResult::Lost { skipped, resumed_at } => {
                assert_eq!(skipped, 0);
                assert_eq!(resumed_at.unwrap().sequence, 2);
            }
            other => panic!("expected Lost, got {other:?}"),
        }
    }

    #[test]
    fn sequence_wraparound_newer_than() {
        assert!(newer_than(1, 0));
        assert!(newer_than(0, u16::MAX));
        assert!(!newer_than(u16::MAX, 0));
        assert!(!newer_than(5, 5));
    }
}
