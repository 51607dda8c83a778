//! High-level server orchestrator (spec §2: wires together the Session
//! Registry, role chains, HTTP Tunnel Binder, and scheduler behind a small
//! public API).
//!
//! Grounded on the teacher's `Server`: same start/stop/is_running shape,
//! same "spawn an accept thread, track a running flag" pattern, adapted
//! from a single-packetizer mount server to the reflector's scheduler-driven
//! connection model (spec §5, §9).

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::config::ReflectorConfig;
use crate::contracts::Contracts;
use crate::error::{Result, RtspError};
use crate::pipeline::scheduler::Scheduler;
use crate::pipeline::{RoleChains, Services};
use crate::reflector::registry::SessionRegistry;
use crate::reflector::{SourceDescriptor, StreamDescriptor};
use crate::session::SessionManager;
use crate::transport::tcp;
use crate::transport::UdpTransport;
use crate::tunnel::TunnelPairing;

/// High-level RTSP reflector orchestrator.
///
/// Owns the Session Registry, the cooperative scheduler, and the shared
/// outbound UDP socket; delegates TCP accept to [`transport::tcp`] and
/// per-connection/per-subscriber work to the [`pipeline`](crate::pipeline)
/// module's tasks.
pub struct Server {
    bind_addr: String,
    config: Arc<ReflectorConfig>,
    running: Arc<AtomicBool>,
    registry: SessionRegistry,
    sessions: SessionManager,
    scheduler: Option<Arc<Scheduler>>,
}

impl Server {
    pub fn new(bind_addr: &str) -> Self {
        Self::with_config(bind_addr, ReflectorConfig::default())
    }

    /// Create a server with custom reflector configuration (spec §6).
    pub fn with_config(bind_addr: &str, config: ReflectorConfig) -> Self {
        Self {
            bind_addr: bind_addr.to_string(),
            config: Arc::new(config),
            running: Arc::new(AtomicBool::new(false)),
            registry: SessionRegistry::new(),
            sessions: SessionManager::new(),
            scheduler: None,
        }
    }

    /// Pre-register a permanent broadcast from a configured SDP/source
    /// description, bypassing `ANNOUNCE` (spec §1: "pre-configured SDP"
    /// input path).
    pub fn register_static_broadcast(&self, name: &str, streams: Vec<StreamDescriptor>) -> Result<()> {
        let source = SourceDescriptor::permanent(streams);
        let session = crate::reflector::ReflectorSession::setup(name.to_string(), source)
            .map_err(|e| RtspError::UnsupportedMediaType(format!("{e:?}")))?;
        self.registry.resolve_or_register(session);
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;

        let scheduler = Arc::new(Scheduler::start(self.config.worker_threads));
        self.scheduler = Some(scheduler.clone());
        self.running.store(true, Ordering::SeqCst);

        let services = Services {
            config: self.config.clone(),
            contracts: Contracts::default_in_process(self.config.ip_allow_list.clone()),
            sessions: self.sessions.clone(),
            registry: self.registry.clone(),
            tunnel_pairing: Arc::new(TunnelPairing::new()),
            chains: Arc::new(RoleChains::default_chain()),
            udp: UdpTransport::bind()?,
            scheduler: scheduler.clone(),
        };

        let running = self.running.clone();

        tracing::info!(addr = %self.bind_addr, workers = self.config.worker_threads, "RTSP reflector listening");

        thread::spawn(move || {
            tcp::accept_loop(listener, services, scheduler, running);
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn config(&self) -> Arc<ReflectorConfig> {
        self.config.clone()
    }
}
