//! RTSP Request Pipeline (spec §2, §4.5): the per-connection state machine
//! that turns bytes on a socket into role-dispatched RTSP responses.
//!
//! Grounded on the teacher's `transport::tcp::Connection`, replaced per
//! spec §5/§9: instead of a blocking read/handle/write loop owning a
//! dedicated thread, [`RTSPConnection`] implements
//! [`Task`](crate::pipeline::scheduler::Task) and is driven by the
//! [`Scheduler`](crate::pipeline::scheduler::Scheduler) as a resumable
//! `(state, currentRoleIndex)` cursor (spec §9).

pub mod interleaved;
pub mod scheduler;

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::ReflectorConfig;
use crate::contracts::Contracts;
use crate::protocol::request::RtspRequest;
use crate::reflector::registry::SessionRegistry;
use crate::reflector::{OutputSink, SubscriberOutput};
use crate::roles::{RoleChain, RoleContext, RoleOutcome, RoleProgress};
use crate::session::{SessionManager, SessionRole};
use crate::transport::UdpTransport;
use crate::tunnel::{self, BindOutcome, TunnelHalfKind, TunnelPairing};
use scheduler::{Scheduler, StepOutcome, Task, POLL_INTERVAL};

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Pipeline state table (spec §4.5). A connection starts at
/// `ReadingFirstRequest` and loops through `Reading` for subsequent
/// keep-alive requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    ReadingFirstRequest,
    TunnelCheck,
    HttpTunnelWait,
    BoundIntoTunnel,
    Reading,
    HaveMessage,
    Filtering,
    RouteAuthAuthz,
    PreProcess,
    Process,
    PostProcess,
    Sending,
    CleaningUp,
}

/// Which role bucket a pipeline state maps to (spec §4.5's bucket grouping:
/// `RouteAuthAuthz` runs route+authenticate+authorize as one resumable unit).
pub struct RoleChains {
    pub filter: RoleChain,
    pub route_auth_authz: RoleChain,
    pub preprocess: RoleChain,
    pub process: RoleChain,
    pub postprocess: RoleChain,
}

impl RoleChains {
    pub fn default_chain() -> Self {
        Self {
            filter: RoleChain::new(vec![Box::new(crate::roles::filter::FilterRole)]),
            route_auth_authz: RoleChain::new(vec![
                Box::new(crate::roles::route::RouteRole),
                Box::new(crate::roles::authenticate::AuthenticateRole),
                Box::new(crate::roles::authorize::AuthorizeRole),
            ]),
            preprocess: RoleChain::new(vec![Box::new(crate::roles::preprocess::PreprocessRole)]),
            process: RoleChain::new(vec![Box::new(crate::roles::process::ProcessRole)]),
            postprocess: RoleChain::new(vec![Box::new(crate::roles::postprocess::PostprocessRole)]),
        }
    }
}

/// Shared, read-only services every connection task needs (spec §9: typed
/// services passed explicitly, no global statics).
#[derive(Clone)]
pub struct Services {
    pub config: Arc<ReflectorConfig>,
    pub contracts: Contracts,
    pub sessions: SessionManager,
    pub registry: SessionRegistry,
    pub tunnel_pairing: Arc<TunnelPairing>,
    pub chains: Arc<RoleChains>,
    /// Shared outbound socket for UDP Subscriber Output sinks (spec §4.7);
    /// one bound socket serves every subscriber, mirroring the teacher's
    /// single shared `UdpTransport`.
    pub udp: UdpTransport,
    /// Scheduler that connection tasks are also running on, used to spawn
    /// `SubscriberOutput` tasks at `PLAY` time.
    pub scheduler: Arc<Scheduler>,
}

/// One RTSP client connection, modeled as a resumable [`Task`] (spec §9).
pub struct RTSPConnection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    connection_id: u64,
    services: Services,

    read_buf: Vec<u8>,
    state: PipelineState,
    current_role_index: usize,
    pending_request: Option<RtspRequest>,
    pending_filter_request: Option<FilterRequestLine>,
    tunnel_cookie: Option<String>,
    tunnel_kind: Option<TunnelHalfKind>,
    tunnel_registered: bool,
    /// Once a tunnel half donates its socket to us, reads come from here
    /// instead of `stream` (spec §9 `takeInputSocket`); `stream` stays the
    /// write channel for RTSP responses.
    tunnel_read_stream: Option<TcpStream>,
    client_session: Option<Arc<crate::session::ClientSession>>,
    broadcast_name: Option<String>,
    reflector_session: Option<crate::reflector::registry::SessionHandle>,
    kill_requested: bool,
    /// Response staged by `Process`, carried forward so `PostProcess` can
    /// amend it before the `Sending` state writes it out (spec §4.5).
    pending_response: Option<crate::protocol::response::RtspResponse>,
}

/// The parsed first line plus headers, before a body (if any) is fully
/// buffered — used to decide whether a request is an HTTP tunnel half.
struct FilterRequestLine {
    method: String,
    uri: String,
    version: String,
    headers: Vec<(String, String)>,
    header_block_len: usize,
}

impl RTSPConnection {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, services: Services) -> std::io::Result<Self> {
        stream.set_nonblocking(true)?;
        let connection_id = CONNECTION_COUNTER.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            stream,
            peer_addr,
            connection_id,
            services,
            read_buf: Vec::new(),
            state: PipelineState::ReadingFirstRequest,
            current_role_index: 0,
            pending_request: None,
            pending_filter_request: None,
            tunnel_cookie: None,
            tunnel_kind: None,
            tunnel_registered: false,
            tunnel_read_stream: None,
            client_session: None,
            broadcast_name: None,
            reflector_session: None,
            kill_requested: false,
            pending_response: None,
        })
    }

    fn fill_read_buf(&mut self) -> std::io::Result<usize> {
        let mut chunk = [0u8; 4096];
        let n = match &mut self.tunnel_read_stream {
            Some(donor) => donor.read(&mut chunk)?,
            None => self.stream.read(&mut chunk)?,
        };
        self.read_buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    fn header_block_end(&self) -> Option<usize> {
        self.read_buf
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|i| i + 4)
    }

    fn step_reading(&mut self) -> StepOutcome {
        match self.fill_read_buf() {
            Ok(0) => {
                self.state = PipelineState::CleaningUp;
                StepOutcome::Reschedule
            }
            Ok(_) => {
                if let interleaved::ScanResult::Frame { header, total_len } = interleaved::scan(&self.read_buf) {
                    if let Some(name) = &self.broadcast_name {
                        if let Some(handle) = self.services.registry.resolve(name) {
                            if handle.session.publisher_lifetime_exceeded(self.services.config.max_broadcast_announce_duration_secs) {
                                tracing::info!(broadcast = %name, "publisher exceeded its configured lifetime, disconnecting");
                                handle.session.clear_publisher();
                                if self.services.config.kill_clients_when_broadcast_stops {
                                    handle.session.tear_down_all_subscribers();
                                }
                            } else {
                                let payload = interleaved::payload(&self.read_buf, header).to_vec();
                                let _ = handle.session.push_interleaved(header.channel, payload);
                            }
                        }
                    }
                    self.read_buf.drain(..total_len);
                    return StepOutcome::Reschedule;
                }

                match self.header_block_end() {
                    Some(end) => {
                        let raw_headers = String::from_utf8_lossy(&self.read_buf[..end]).into_owned();
                        match RtspRequest::parse_headers(&raw_headers) {
                            Ok(parsed) => {
                                self.pending_filter_request = Some(FilterRequestLine {
                                    method: parsed.method,
                                    uri: parsed.uri,
                                    version: parsed.version,
                                    headers: parsed.headers,
                                    header_block_len: end,
                                });
                                self.state = PipelineState::TunnelCheck;
                                StepOutcome::Reschedule
                            }
                            Err(_) => {
                                self.state = PipelineState::CleaningUp;
                                StepOutcome::Reschedule
                            }
                        }
                    }
                    None => StepOutcome::RescheduleAfter(POLL_INTERVAL),
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => StepOutcome::RescheduleAfter(POLL_INTERVAL),
            Err(_) => {
                self.state = PipelineState::CleaningUp;
                StepOutcome::Reschedule
            }
        }
    }

    /// Detect whether the just-parsed header block opens an HTTP tunnel
    /// half before treating it as an ordinary RTSP request.
    fn step_tunnel_check(&mut self) -> StepOutcome {
        let Some(line) = self.pending_filter_request.take() else {
            self.state = PipelineState::Reading;
            return StepOutcome::Reschedule;
        };

        let accept = line.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case("Accept")).map(|(_, v)| v.as_str());
        let cookie = line.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case("X-SessionCookie")).map(|(_, v)| v.as_str());

        if let Some((kind, cookie)) = tunnel::detect_tunnel_half(&line.method, &line.version, accept, cookie) {
            self.read_buf.drain(..line.header_block_len);
            self.tunnel_cookie = Some(cookie);
            self.tunnel_kind = Some(kind);
            self.state = PipelineState::HttpTunnelWait;
            return StepOutcome::Reschedule;
        }

        // Not a tunnel half: put the line back and wait for the full body
        // (declared by Content-Length) before building the RTSP request.
        self.pending_filter_request = Some(line);
        self.state = PipelineState::HaveMessage;
        StepOutcome::Reschedule
    }

    fn step_http_tunnel_wait(&mut self) -> StepOutcome {
        let Some(cookie) = self.tunnel_cookie.clone() else {
            self.state = PipelineState::CleaningUp;
            return StepOutcome::Reschedule;
        };
        let kind = self.tunnel_kind.unwrap_or(TunnelHalfKind::Get);

        if self.tunnel_registered {
            // The GET half is always the eventual survivor (spec §9
            // `takeInputSocket`): a POST that registered first just waits
            // for the pairing table entry to disappear (a GET took it over
            // directly), while a GET that registered first must poll for a
            // POST donating its socket after the fact.
            return match kind {
                TunnelHalfKind::Post => {
                    if self.services.tunnel_pairing.is_pending(&cookie) {
                        StepOutcome::RescheduleAfter(POLL_INTERVAL)
                    } else {
                        self.state = PipelineState::CleaningUp;
                        StepOutcome::Reschedule
                    }
                }
                TunnelHalfKind::Get => match self.services.tunnel_pairing.take_donor(&cookie) {
                    Some(donor) => {
                        self.adopt_donor(donor.donor_stream, donor.buffered);
                        StepOutcome::Reschedule
                    }
                    None => StepOutcome::RescheduleAfter(POLL_INTERVAL),
                },
            };
        }

        let donor_stream = match self.stream.try_clone() {
            Ok(s) => s,
            Err(_) => {
                self.state = PipelineState::CleaningUp;
                return StepOutcome::Reschedule;
            }
        };
        let buffered = std::mem::take(&mut self.read_buf);

        match self.services.tunnel_pairing.bind(&cookie, kind, self.connection_id, donor_stream, buffered) {
            Ok(BindOutcome::Waiting) => {
                self.tunnel_registered = true;
                StepOutcome::RescheduleAfter(POLL_INTERVAL)
            }
            Ok(BindOutcome::Paired { donor_stream, buffered, .. }) => {
                // We are the GET survivor pairing with an already-waiting
                // POST half: adopt its socket and buffered bytes directly.
                self.adopt_donor(donor_stream, buffered);
                StepOutcome::Reschedule
            }
            Ok(BindOutcome::Donated) => {
                // We are the POST half and a GET was already waiting; our
                // socket has been parked for it to collect. Our job here
                // is done.
                self.state = PipelineState::CleaningUp;
                StepOutcome::Reschedule
            }
            Err(_) => {
                self.state = PipelineState::CleaningUp;
                StepOutcome::Reschedule
            }
        }
    }

    /// Adopt a donated POST socket as this (GET) connection's read source,
    /// carrying over whatever body bytes the POST half had already buffered
    /// before the donation (spec §9 `takeInputSocket`).
    fn adopt_donor(&mut self, donor_stream: TcpStream, buffered: Vec<u8>) {
        self.tunnel_read_stream = Some(donor_stream);
        self.read_buf = buffered;
        self.state = PipelineState::BoundIntoTunnel;
    }

    fn step_bound_into_tunnel(&mut self) -> StepOutcome {
        // Decode the base64 RTSP body carried by the POST half and treat it
        // like a freshly-read request (spec §4.6).
        use base64::Engine;
        if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(&self.read_buf) {
            self.read_buf = decoded;
        }
        self.state = PipelineState::Reading;
        StepOutcome::Reschedule
    }

    fn step_have_message(&mut self) -> StepOutcome {
        let Some(line) = &self.pending_filter_request else {
            self.state = PipelineState::Reading;
            return StepOutcome::Reschedule;
        };

        let declared_len = line
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
            .and_then(|(_, v)| v.parse::<usize>().ok())
            .unwrap_or(0);
        let needed = line.header_block_len + declared_len;

        if self.read_buf.len() < needed {
            return StepOutcome::RescheduleAfter(POLL_INTERVAL);
        }

        let line = self.pending_filter_request.take().unwrap();
        let mut request = RtspRequest {
            method: line.method,
            uri: line.uri,
            version: line.version,
            headers: line.headers,
            body: None,
        };
        if declared_len > 0 {
            request.body = Some(self.read_buf[line.header_block_len..needed].to_vec());
        }
        self.read_buf.drain(..needed);

        self.pending_request = Some(request);
        self.current_role_index = 0;
        // `broadcast_name`/`reflector_session` are overwritten by `RouteRole`
        // at the start of every request; left alone between requests so
        // `cleanup()` can still find the bound session if the connection
        // drops while idle rather than mid-request.
        self.kill_requested = false;
        self.state = PipelineState::Filtering;
        StepOutcome::Reschedule
    }

    fn run_bucket(&mut self, bucket: BucketKind) -> StepOutcome {
        let Some(request) = self.pending_request.clone() else {
            self.state = PipelineState::CleaningUp;
            return StepOutcome::Reschedule;
        };

        let mut ctx = RoleContext::new(
            &request,
            self.peer_addr,
            self.connection_id,
            self.services.config.clone(),
            self.services.contracts.clone(),
            self.services.sessions.clone(),
            self.services.registry.clone(),
        );
        ctx.client_session = self.client_session.clone();
        ctx.broadcast_name = self.broadcast_name.clone();
        ctx.reflector_session = self.reflector_session.clone();
        ctx.kill_requested = self.kill_requested;
        ctx.pending_response = self.pending_response.take();

        let chain = match bucket {
            BucketKind::Filter => &self.services.chains.filter,
            BucketKind::RouteAuthAuthz => &self.services.chains.route_auth_authz,
            BucketKind::PreProcess => &self.services.chains.preprocess,
            BucketKind::Process => &self.services.chains.process,
            BucketKind::PostProcess => &self.services.chains.postprocess,
        };

        let progress = chain.run_from(self.current_role_index, &mut ctx);

        self.client_session = ctx.client_session;
        self.broadcast_name = ctx.broadcast_name;
        self.reflector_session = ctx.reflector_session;
        self.kill_requested = ctx.kill_requested;
        self.pending_response = ctx.pending_response;

        match progress {
            RoleProgress::Completed => {
                self.current_role_index = 0;
                self.state = bucket.next_state();
                StepOutcome::Reschedule
            }
            RoleProgress::Suspended { role_index, outcome } => {
                self.current_role_index = role_index;
                match outcome {
                    RoleOutcome::NeedsIdle(d) => StepOutcome::RescheduleAfter(d),
                    RoleOutcome::NeedsEvent(_) | RoleOutcome::NeedsGlobalLock => {
                        StepOutcome::RescheduleAfter(POLL_INTERVAL)
                    }
                    RoleOutcome::Respond(resp) => {
                        self.send_response(resp);
                        self.state = PipelineState::Sending;
                        StepOutcome::Reschedule
                    }
                    RoleOutcome::Done => StepOutcome::Reschedule,
                }
            }
            RoleProgress::Responded(resp) => {
                self.send_response(resp);
                self.state = PipelineState::Sending;
                StepOutcome::Reschedule
            }
        }
    }

    fn send_response(&mut self, response: crate::protocol::response::RtspResponse) {
        let bytes = response.serialize();
        if self.stream.write_all(bytes.as_bytes()).is_err() {
            tracing::warn!(peer = %self.peer_addr, "write error sending response");
        }
    }

    fn cleanup(&self) {
        if let Some(session) = &self.client_session {
            session.cancel_outputs();
            if let Some(name) = &self.broadcast_name {
                if let Some(handle) = self.services.registry.resolve(name) {
                    match session.role() {
                        Some(crate::session::SessionRole::Subscriber) => {
                            handle.session.remove_subscriber(self.connection_id, false);
                        }
                        Some(crate::session::SessionRole::Publisher) => {
                            handle.session.clear_publisher();
                        }
                        None => {}
                    }
                }
                self.services.registry.release(name);
            }
            self.services.sessions.remove_session(&session.id);
        }
        tracing::info!(peer = %self.peer_addr, connection_id = self.connection_id, "connection closed");
    }

    /// Spawn one `SubscriberOutput` task per attached track once a `PLAY`
    /// succeeds for a subscriber session (spec §4.5 PLAY: "in pull mode
    /// initializes each stream's cursor"). A no-op for publishers, for
    /// already-spawned tracks (the attach point's subscriber id changes
    /// each `SETUP`, so this keys off the session's current handle set) and
    /// when the response was not a success.
    fn spawn_subscriber_outputs_on_play(&mut self) {
        let Some(request) = &self.pending_request else { return };
        if request.method != "PLAY" {
            return;
        }
        let Some(response) = &self.pending_response else { return };
        if response.status_code != 200 {
            return;
        }
        let Some(session) = self.client_session.clone() else { return };
        if session.role() != Some(SessionRole::Subscriber) {
            return;
        }
        let Some(handle) = self.reflector_session.clone() else { return };

        for (track_id, sub_handle) in session.subscriber_handles() {
            let Some(transport) = session.get_track_transport(track_id) else { continue };
            let sink = match transport {
                crate::session::NegotiatedTransport::Udp { client_addr, client_rtp_port, client_rtcp_port, .. } => {
                    OutputSink::Udp {
                        transport: self.services.udp.clone(),
                        rtp_addr: std::net::SocketAddr::new(client_addr.ip(), client_rtp_port),
                        rtcp_addr: std::net::SocketAddr::new(client_addr.ip(), client_rtcp_port),
                    }
                }
                crate::session::NegotiatedTransport::Interleaved { rtp_channel, rtcp_channel } => {
                    let Ok(stream) = self.stream.try_clone() else { continue };
                    OutputSink::Interleaved { stream, rtp_channel, rtcp_channel }
                }
            };

            let (output, cancel) = SubscriberOutput::new(handle.session.clone(), sub_handle, sink);
            session.register_output_cancel(cancel);
            self.services.scheduler.spawn(Box::new(output));
        }
    }
}

#[derive(Clone, Copy)]
enum BucketKind {
    Filter,
    RouteAuthAuthz,
    PreProcess,
    Process,
    PostProcess,
}

impl BucketKind {
    fn next_state(self) -> PipelineState {
        match self {
            BucketKind::Filter => PipelineState::RouteAuthAuthz,
            BucketKind::RouteAuthAuthz => PipelineState::PreProcess,
            BucketKind::PreProcess => PipelineState::Process,
            BucketKind::Process => PipelineState::PostProcess,
            BucketKind::PostProcess => PipelineState::Sending,
        }
    }
}

impl Task for RTSPConnection {
    fn step(&mut self) -> StepOutcome {
        match self.state {
            PipelineState::ReadingFirstRequest | PipelineState::Reading => self.step_reading(),
            PipelineState::TunnelCheck => self.step_tunnel_check(),
            PipelineState::HttpTunnelWait => self.step_http_tunnel_wait(),
            PipelineState::BoundIntoTunnel => self.step_bound_into_tunnel(),
            PipelineState::HaveMessage => self.step_have_message(),
            PipelineState::Filtering => self.run_bucket(BucketKind::Filter),
            PipelineState::RouteAuthAuthz => self.run_bucket(BucketKind::RouteAuthAuthz),
            PipelineState::PreProcess => self.run_bucket(BucketKind::PreProcess),
            PipelineState::Process => self.run_bucket(BucketKind::Process),
            PipelineState::PostProcess => self.run_bucket(BucketKind::PostProcess),
            PipelineState::Sending => {
                self.spawn_subscriber_outputs_on_play();
                if let Some(resp) = self.pending_response.take() {
                    self.send_response(resp);
                }
                self.pending_request = None;
                self.state = PipelineState::Reading;
                StepOutcome::Reschedule
            }
            PipelineState::CleaningUp => {
                self.cleanup();
                StepOutcome::Done
            }
        }
    }
}
