//! Client session management (spec §3 `ClientSession`, RFC 2326 §3, §12.37).
//!
//! A `ClientSession` is the server-side state object created during SETUP
//! and destroyed by TEARDOWN or timeout. Unlike the teacher's `Session`
//! (which only ever served a single mount's playback state), a
//! `ClientSession` additionally binds to a Reflector Session as either a
//! subscriber or the publisher, and tracks per-track transport (spec §9:
//! the back-reference is the session name, looked up through the registry,
//! not an owning pointer).

pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use crate::error::{Result, RtspError};
use crate::reflector::SubscriberHandle;
pub use transport::{NegotiatedTransport, RequestedTransport};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

const SERVER_PORT_MIN: u64 = 5000;
const SERVER_PORT_MAX: u64 = 65534;

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// RTSP session state machine (RFC 2326 §A.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Ready,
    Playing,
    Paused,
}

/// Whether a `ClientSession` is attached to its Reflector Session as the
/// publisher or as a subscriber (spec §3 invariant: at most one of either).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Publisher,
    Subscriber,
}

/// Per-session, per-track transport plus role binding.
pub struct ClientSession {
    pub id: String,
    pub uri: String,
    /// Name of the bound Reflector Session, looked up through the registry
    /// rather than held as an owning reference (spec §9).
    pub reflector_session_name: RwLock<Option<String>>,
    pub role: RwLock<Option<SessionRole>>,
    pub transports: RwLock<HashMap<u32, NegotiatedTransport>>,
    pub state: RwLock<SessionState>,
    pub timeout_secs: u64,
    pub last_activity: RwLock<Instant>,
    /// Per-track Subscriber Output attach points (spec §4.7), populated by
    /// `SETUP` when this session is a subscriber.
    subscriber_handles: RwLock<HashMap<u32, SubscriberHandle>>,
    /// Cancellation flags for the running `SubscriberOutput` tasks spawned
    /// for this session's tracks at `PLAY` time, so `TEARDOWN` or connection
    /// cleanup can stop them without a back-reference to the scheduler.
    output_cancel_flags: RwLock<Vec<Arc<AtomicBool>>>,
    /// Consecutive idle retries spent in `PLAY` waiting for the Frame Buffer
    /// to have initial packets (spec §4.5 `PLAY`), reset once it does.
    play_wait_attempts: AtomicU32,
}

impl ClientSession {
    pub fn new(uri: &str) -> Self {
        let id = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self {
            id: format!("{id:016X}"),
            uri: uri.to_string(),
            reflector_session_name: RwLock::new(None),
            role: RwLock::new(None),
            transports: RwLock::new(HashMap::new()),
            state: RwLock::new(SessionState::Ready),
            timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            last_activity: RwLock::new(Instant::now()),
            subscriber_handles: RwLock::new(HashMap::new()),
            output_cancel_flags: RwLock::new(Vec::new()),
            play_wait_attempts: AtomicU32::new(0),
        }
    }

    pub fn bind_reflector_session(&self, name: &str, role: SessionRole) {
        *self.reflector_session_name.write() = Some(name.to_string());
        *self.role.write() = Some(role);
    }

    pub fn reflector_session_name(&self) -> Option<String> {
        self.reflector_session_name.read().clone()
    }

    pub fn role(&self) -> Option<SessionRole> {
        *self.role.read()
    }

    pub fn set_track_transport(&self, track_id: u32, transport: NegotiatedTransport) {
        self.transports.write().insert(track_id, transport);
    }

    pub fn get_track_transport(&self, track_id: u32) -> Option<NegotiatedTransport> {
        self.transports.read().get(&track_id).cloned()
    }

    /// Record the Subscriber Output attach point for `track_id`, created by
    /// `SETUP` (spec §4.5) via `ReflectorStream::attach_subscriber`.
    pub fn set_subscriber_handle(&self, track_id: u32, handle: SubscriberHandle) {
        self.subscriber_handles.write().insert(track_id, handle);
    }

    /// All (track id, attach point) pairs recorded so far, used at `PLAY`
    /// time to spawn one `SubscriberOutput` task per track.
    pub fn subscriber_handles(&self) -> Vec<(u32, SubscriberHandle)> {
        self.subscriber_handles.read().iter().map(|(k, v)| (*k, *v)).collect()
    }

    /// Track a running output task's cancellation flag so it can be stopped
    /// on `TEARDOWN` or connection cleanup.
    pub fn register_output_cancel(&self, flag: Arc<AtomicBool>) {
        self.output_cancel_flags.write().push(flag);
    }

    /// Signal every Subscriber Output task spawned for this session to
    /// detach and stop on its next scheduler poll.
    pub fn cancel_outputs(&self) {
        for flag in self.output_cancel_flags.read().iter() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    pub fn set_state(&self, state: SessionState) {
        tracing::debug!(session_id = %self.id, ?state, "state transition");
        *self.state.write() = state;
    }

    pub fn get_state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_playing(&self) -> bool {
        self.get_state() == SessionState::Playing
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.read().elapsed()
    }

    /// Record another `PLAY` idle-wait iteration and return the new count.
    pub fn note_play_wait_attempt(&self) -> u32 {
        self.play_wait_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset_play_wait_attempts(&self) {
        self.play_wait_attempts.store(0, Ordering::SeqCst);
    }

    /// Format the `Session` response header value per RFC 2326 §12.37.
    pub fn session_header_value(&self) -> String {
        format!("{};timeout={}", self.id, self.timeout_secs)
    }
}

impl Clone for NegotiatedTransport {
    fn clone(&self) -> Self {
        match self {
            Self::Udp { client_rtp_port, client_rtcp_port, server_rtp_port, server_rtcp_port, client_addr } => {
                Self::Udp {
                    client_rtp_port: *client_rtp_port,
                    client_rtcp_port: *client_rtcp_port,
                    server_rtp_port: *server_rtp_port,
                    server_rtcp_port: *server_rtcp_port,
                    client_addr: *client_addr,
                }
            }
            Self::Interleaved { rtp_channel, rtcp_channel } => Self::Interleaved {
                rtp_channel: *rtp_channel,
                rtcp_channel: *rtcp_channel,
            },
        }
    }
}

/// Thread-safe registry of active client sessions, plus the server-port
/// allocator used during SETUP (spec §4.5).
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<ClientSession>>>>,
    next_server_port: Arc<AtomicU64>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_server_port: Arc::new(AtomicU64::new(SERVER_PORT_MIN)),
        }
    }

    pub fn create_session(&self, uri: &str) -> Arc<ClientSession> {
        let session = Arc::new(ClientSession::new(uri));
        let id = session.id.clone();
        self.sessions.write().insert(id.clone(), session.clone());
        tracing::debug!(session_id = %id, uri, "client session created");
        session
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<ClientSession>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn remove_session(&self, id: &str) -> Option<Arc<ClientSession>> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            tracing::debug!(session_id = %id, "client session removed");
        }
        removed
    }

    pub fn remove_sessions(&self, ids: &[String]) -> usize {
        let mut sessions = self.sessions.write();
        let mut removed = 0;
        for id in ids {
            if sessions.remove(id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Allocate a pair of (RTP, RTCP) server ports within `[min, max]`,
    /// wrapping back to `min` at the top of the range (spec §6
    /// `minimum_static_sdp_port`/`maximum_static_sdp_port`). Returns
    /// [`RtspError::PortRangeExhausted`] if the configured range can't even
    /// hold one RTP/RTCP pair.
    pub fn allocate_server_ports(&self, min: u16, max: u16) -> Result<(u16, u16)> {
        if max < min + 1 {
            return Err(RtspError::PortRangeExhausted);
        }

        let rtp = self.next_server_port.fetch_add(2, Ordering::SeqCst);

        if rtp < min as u64 || rtp + 1 > max as u64 {
            self.next_server_port.store(min as u64 + 2, Ordering::SeqCst);
            return Ok((min, min + 1));
        }

        Ok((rtp as u16, rtp as u16 + 1))
    }

    pub fn get_playing_sessions(&self) -> Vec<Arc<ClientSession>> {
        self.sessions.read().values().filter(|s| s.is_playing()).cloned().collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
