//! Subscriber Output (spec §4.7): per-subscriber cursor over a Reflector
//! Stream's Frame Buffer. Pulls packets and writes them out over the
//! subscriber's negotiated transport, scheduled as its own [`Task`] so a
//! slow or stalled subscriber never blocks the stream's other subscribers
//! or the connection that set it up.
//!
//! Grounded on `QTSSReflectorModule.cpp`'s per-client `ReflectorSocket`
//! delivery loop, adapted to the scheduler substitution in spec §5: instead
//! of a dedicated send thread per subscriber, each is a resumable task
//! polled by the shared worker pool.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::frame_buffer::PacketKind;
use super::session::ReflectorSession;
use super::session::SubscriberHandle;
use super::stream::Offer;
use crate::pipeline::interleaved;
use crate::pipeline::scheduler::{StepOutcome, Task};
use crate::transport::UdpTransport;

/// Where a Subscriber Output writes the packets it pulls off the stream.
pub enum OutputSink {
    Udp {
        transport: UdpTransport,
        rtp_addr: SocketAddr,
        rtcp_addr: SocketAddr,
    },
    Interleaved {
        stream: TcpStream,
        rtp_channel: u8,
        rtcp_channel: u8,
    },
}

/// Outcome of one [`SubscriberOutput::write_packet`] attempt (spec §4.7
/// `writePacket`).
enum WriteOutcome {
    Ok,
    WouldBlock { retry_after: Duration },
    Idle { retry_after: Duration },
    Error,
}

/// Per subscriber per session (spec §4.7). One instance per attached track;
/// a subscriber with N tracks runs N of these.
pub struct SubscriberOutput {
    session: Arc<ReflectorSession>,
    handle: SubscriberHandle,
    sink: OutputSink,
    /// Set by the owning `ClientSession` when the subscriber tears down or
    /// its connection drops, so this task detaches and exits on its next
    /// poll instead of running forever.
    cancelled: Arc<AtomicBool>,
    /// This subscriber's reference point for `RewriteRTCP` (local send time,
    /// NTP timestamp of the first Sender Report it saw). `None` until the
    /// first RTCP packet is delivered.
    rtcp_base: Option<(Instant, u64)>,
}

impl SubscriberOutput {
    /// `initializeStreams` (spec §4.7) is folded into construction: the
    /// cursor itself was already seeded by
    /// [`ReflectorStream::attach_subscriber`](super::stream::ReflectorStream::attach_subscriber)
    /// at `SETUP` time, so there is nothing left to initialize here beyond
    /// holding the session/handle/sink triple. Returns the cancellation flag
    /// the caller should store and flip on teardown.
    pub fn new(session: Arc<ReflectorSession>, handle: SubscriberHandle, sink: OutputSink) -> (Self, Arc<AtomicBool>) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let output = Self { session, handle, sink, cancelled: cancelled.clone(), rtcp_base: None };
        (output, cancelled)
    }

    fn write_packet(&mut self) -> WriteOutcome {
        let Some(stream) = self.session.streams.get(self.handle.stream_index) else {
            return WriteOutcome::Error;
        };

        match stream.poll_subscriber(self.handle.subscriber_id) {
            None => WriteOutcome::Error,
            Some(Offer::WaitUntil(at)) => {
                WriteOutcome::Idle { retry_after: at.saturating_duration_since(std::time::Instant::now()) }
            }
            Some(Offer::Lost { skipped }) => {
                tracing::debug!(
                    stream_index = self.handle.stream_index,
                    subscriber_id = self.handle.subscriber_id,
                    skipped,
                    "subscriber cursor skipped buffered entries"
                );
                WriteOutcome::Idle { retry_after: Duration::ZERO }
            }
            Some(Offer::Send { kind, payload, .. }) => self.deliver(kind, &payload),
        }
    }

    fn deliver(&mut self, kind: PacketKind, payload: &[u8]) -> WriteOutcome {
        let rewritten;
        let payload = if kind == PacketKind::Rtcp {
            rewritten = self.rewrite_rtcp(payload);
            &rewritten
        } else {
            payload
        };

        match &mut self.sink {
            OutputSink::Udp { transport, rtp_addr, rtcp_addr } => {
                let addr = if kind == PacketKind::Rtcp { *rtcp_addr } else { *rtp_addr };
                // UDP is lossy by design (spec §4.7): a send error here is
                // logged, not propagated as a fatal write error.
                match transport.send_to(payload, addr) {
                    Ok(_) => WriteOutcome::Ok,
                    Err(e) => {
                        tracing::debug!(%addr, error = %e, "udp subscriber send failed");
                        WriteOutcome::Ok
                    }
                }
            }
            OutputSink::Interleaved { stream, rtp_channel, rtcp_channel } => {
                let channel = if kind == PacketKind::Rtcp { *rtcp_channel } else { *rtp_channel };
                let framed = interleaved::frame(channel, payload);
                match stream.write_all(&framed) {
                    Ok(()) => WriteOutcome::Ok,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        WriteOutcome::WouldBlock { retry_after: Duration::from_millis(20) }
                    }
                    Err(_) => WriteOutcome::Error,
                }
            }
        }
    }

    /// `RewriteRTCP`/`TrackRTCPBaseTime`: a reflected Sender Report's NTP
    /// timestamp describes the publisher's wall clock at capture, which
    /// drifts further from "now" the longer a subscriber has been attached.
    /// The first SR this subscriber sees becomes its base (publisher NTP,
    /// local send time); every later SR's NTP is rewritten to that base
    /// plus the local time elapsed since, so a subscriber joining stream
    /// playback late still gets RTCP whose NTP tracks real time from its
    /// own point of reference. Non-SR packets (RR, BYE, ...) pass through
    /// unchanged — RFC 3550 §6.4.1 only defines the NTP field for SR.
    fn rewrite_rtcp(&mut self, payload: &[u8]) -> Vec<u8> {
        const SENDER_REPORT: u8 = 200;
        if payload.len() < 16 || payload[1] != SENDER_REPORT {
            return payload.to_vec();
        }

        let msw = u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]);
        let lsw = u32::from_be_bytes([payload[12], payload[13], payload[14], payload[15]]);
        let packet_ntp = ((msw as u64) << 32) | lsw as u64;

        let now = Instant::now();
        let (base_instant, base_ntp) = *self.rtcp_base.get_or_insert((now, packet_ntp));

        let elapsed = now.saturating_duration_since(base_instant);
        let elapsed_ntp = ((elapsed.as_secs()) << 32)
            | (((elapsed.subsec_nanos() as u64) << 32) / 1_000_000_000);
        let new_ntp = base_ntp.wrapping_add(elapsed_ntp);

        let mut out = payload.to_vec();
        out[8..12].copy_from_slice(&((new_ntp >> 32) as u32).to_be_bytes());
        out[12..16].copy_from_slice(&(new_ntp as u32).to_be_bytes());
        out
    }

    /// `tearDown` (spec §4.7): detach the cursor so the stream stops
    /// tracking pacing state for it.
    fn tear_down(&self) {
        if let Some(stream) = self.session.streams.get(self.handle.stream_index) {
            stream.detach_subscriber(self.handle.subscriber_id);
        }
    }
}

impl Task for SubscriberOutput {
    fn step(&mut self) -> StepOutcome {
        if self.cancelled.load(Ordering::SeqCst) {
            self.tear_down();
            return StepOutcome::Done;
        }

        match self.write_packet() {
            WriteOutcome::Ok => StepOutcome::Reschedule,
            WriteOutcome::WouldBlock { retry_after } => StepOutcome::RescheduleAfter(retry_after),
            WriteOutcome::Idle { retry_after } => StepOutcome::RescheduleAfter(retry_after),
            WriteOutcome::Error => {
                self.tear_down();
                StepOutcome::Done
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflector::session::ReflectorSession;
    use crate::reflector::source::{SetupDirection, SourceDescriptor, StreamDescriptor, TrackTransport};
    use std::net::UdpSocket;

    fn stream_desc(track_id: u32) -> StreamDescriptor {
        StreamDescriptor {
            track_id,
            source_addr: None,
            dest_addr: "239.1.1.1".parse().unwrap(),
            dest_port: 20000,
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
    fn delivers_packet_to_udp_sink_then_idles() {
        let recv_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let recv_addr = recv_socket.local_addr().unwrap();
        recv_socket.set_nonblocking(true).unwrap();

        let session = Arc::new(
            ReflectorSession::setup("live/a.sdp".into(), SourceDescriptor::permanent(vec![stream_desc(0)])).unwrap(),
        );
        let subscriber_id = session.streams[0].attach_subscriber();
        session.streams[0].push_packet(vec![0x80, 96, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0], false);

        let udp = UdpTransport::bind().unwrap();
        let (mut output, _cancel) = SubscriberOutput::new(
            session,
            SubscriberHandle { stream_index: 0, subscriber_id },
            OutputSink::Udp { transport: udp, rtp_addr: recv_addr, rtcp_addr: recv_addr },
        );

        match output.write_packet() {
            WriteOutcome::Ok => {}
            _ => panic!("expected Ok"),
        }

        let mut buf = [0u8; 64];
        std::thread::sleep(Duration::from_millis(20));
        assert!(recv_socket.recv_from(&mut buf).is_ok());

        match output.write_packet() {
            WriteOutcome::Idle { .. } => {}
            _ => panic!("expected Idle once the buffer is drained"),
        }
    }

    #[test]
    fn first_sender_report_establishes_the_base_unchanged() {
        let session = Arc::new(
            ReflectorSession::setup("live/a.sdp".into(), SourceDescriptor::permanent(vec![stream_desc(0)])).unwrap(),
        );
        let subscriber_id = session.streams[0].attach_subscriber();
        let udp = UdpTransport::bind().unwrap();
        let addr: SocketAddr = "127.0.0.1:19999".parse().unwrap();
        let (mut output, _cancel) = SubscriberOutput::new(
            session,
            SubscriberHandle { stream_index: 0, subscriber_id },
            OutputSink::Udp { transport: udp, rtp_addr: addr, rtcp_addr: addr },
        );

        let sr = sender_report(0xAABBCCDD, 0x11223344);
        let rewritten = output.rewrite_rtcp(&sr);
        assert_eq!(rewritten, sr);
        assert!(output.rtcp_base.is_some());
    }

    #[test]
    fn later_sender_report_advances_ntp_from_the_base() {
        let session = Arc::new(
            ReflectorSession::setup("live/a.sdp".into(), SourceDescriptor::permanent(vec![stream_desc(0)])).unwrap(),
        );
        let subscriber_id = session.streams[0].attach_subscriber();
        let udp = UdpTransport::bind().unwrap();
        let addr: SocketAddr = "127.0.0.1:19999".parse().unwrap();
        let (mut output, _cancel) = SubscriberOutput::new(
            session,
            SubscriberHandle { stream_index: 0, subscriber_id },
            OutputSink::Udp { transport: udp, rtp_addr: addr, rtcp_addr: addr },
        );

        let base_instant = Instant::now() - Duration::from_secs(5);
        output.rtcp_base = Some((base_instant, 0u64));

        let sr = sender_report(0, 0);
        let rewritten = output.rewrite_rtcp(&sr);
        let msw = u32::from_be_bytes([rewritten[8], rewritten[9], rewritten[10], rewritten[11]]);
        assert!(msw >= 4, "expected the rewritten NTP seconds field to reflect ~5s elapsed, got {msw}");
    }

    #[test]
    fn non_sender_report_rtcp_passes_through_unchanged() {
        let session = Arc::new(
            ReflectorSession::setup("live/a.sdp".into(), SourceDescriptor::permanent(vec![stream_desc(0)])).unwrap(),
        );
        let subscriber_id = session.streams[0].attach_subscriber();
        let udp = UdpTransport::bind().unwrap();
        let addr: SocketAddr = "127.0.0.1:19999".parse().unwrap();
        let (mut output, _cancel) = SubscriberOutput::new(
            session,
            SubscriberHandle { stream_index: 0, subscriber_id },
            OutputSink::Udp { transport: udp, rtp_addr: addr, rtcp_addr: addr },
        );

        let rr = vec![0x80, 201, 0, 1, 0, 0, 0, 0];
        assert_eq!(output.rewrite_rtcp(&rr), rr);
        assert!(output.rtcp_base.is_none());
    }

    fn sender_report(msw: u32, lsw: u32) -> Vec<u8> {
        let mut b = vec![0x80, 200, 0, 6, 0, 0, 0, 1];
        b.extend_from_slice(&msw.to_be_bytes());
        b.extend_from_slice(&lsw.to_be_bytes());
        b.extend_from_slice(&0u32.to_be_bytes());
        b.extend_from_slice(&0u32.to_be_bytes());
        b
    }

    #[test]
    fn cancelled_task_detaches_and_completes() {
        let session = Arc::new(
            ReflectorSession::setup("live/a.sdp".into(), SourceDescriptor::permanent(vec![stream_desc(0)])).unwrap(),
        );
        let subscriber_id = session.streams[0].attach_subscriber();
        let udp = UdpTransport::bind().unwrap();
        let addr: SocketAddr = "127.0.0.1:19999".parse().unwrap();
        let (mut output, cancel) = SubscriberOutput::new(
            session.clone(),
            SubscriberHandle { stream_index: 0, subscriber_id },
            OutputSink::Udp { transport: udp, rtp_addr: addr, rtcp_addr: addr },
        );
        cancel.store(true, Ordering::SeqCst);
        assert!(matches!(output.step(), StepOutcome::Done));
        assert!(session.streams[0].poll_subscriber(subscriber_id).is_none());
    }
}
