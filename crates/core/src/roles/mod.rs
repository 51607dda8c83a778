//! Role Dispatch (spec §2, §9): an ordered chain of extension callbacks
//! bound to lifecycle roles (filter, route, authenticate, authorize,
//! preprocess, process, postprocess), each able to cooperatively suspend.
//!
//! Per spec §9 DESIGN NOTES, roles are modeled as a function returning an
//! explicit resumable sum type rather than a coroutine capturing the stack
//! across I/O — the pipeline stores `(state, currentRoleIndex)` and resumes
//! at exactly the same role.

pub mod authenticate;
pub mod authorize;
pub mod filter;
pub mod postprocess;
pub mod preprocess;
pub mod process;
pub mod route;

use std::sync::Arc;
use std::time::Duration;

use crate::config::ReflectorConfig;
use crate::contracts::Contracts;
use crate::error::{Result, RtspError};
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::reflector::registry::SessionHandle;
use crate::session::SessionManager;

/// Kind of event a suspended role is waiting on (spec §9 `NeedsEvent`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Readable,
    Writable,
}

/// Sum type a role returns (spec §9): `Done`, `NeedsEvent`, `NeedsIdle`,
/// `NeedsGlobalLock`, or a short-circuit response.
pub enum RoleOutcome {
    Done,
    NeedsEvent(EventKind),
    NeedsIdle(Duration),
    NeedsGlobalLock,
    Respond(RtspResponse),
}

/// Shared, mutable state the role chain threads through one request's
/// handling. Typed services (registry, session manager, config, contracts)
/// are passed in explicitly at construction rather than reached via global
/// statics (spec §9).
pub struct RoleContext<'a> {
    pub request: &'a RtspRequest,
    pub client_addr: std::net::SocketAddr,
    pub connection_id: u64,
    pub config: Arc<ReflectorConfig>,
    pub contracts: Contracts,
    pub sessions: SessionManager,
    pub registry: crate::reflector::registry::SessionRegistry,

    /// Populated by [`route::RouteRole`]: the resolved broadcast name.
    pub broadcast_name: Option<String>,
    /// Populated by [`route::RouteRole`] when the session already exists or
    /// is created as part of routing (DESCRIBE/SETUP in pull mode).
    pub reflector_session: Option<SessionHandle>,
    /// Set when the URI carried a `.kill` suffix (spec §4.5 ANNOUNCE).
    pub kill_requested: bool,
    /// The client session this request is bound to (created or resolved by
    /// [`process::ProcessRole`] via the `Session` header).
    pub client_session: Option<std::sync::Arc<crate::session::ClientSession>>,
    /// Response built by [`process::ProcessRole`], available to
    /// [`postprocess`] roles for header augmentation before it is sent
    /// (spec §4.5: `Process` then `PostProcess` are distinct pipeline
    /// states, so the response is staged here rather than sent immediately).
    pub pending_response: Option<RtspResponse>,
}

impl<'a> RoleContext<'a> {
    pub fn new(
        request: &'a RtspRequest,
        client_addr: std::net::SocketAddr,
        connection_id: u64,
        config: Arc<ReflectorConfig>,
        contracts: Contracts,
        sessions: SessionManager,
        registry: crate::reflector::registry::SessionRegistry,
    ) -> Self {
        Self {
            request,
            client_addr,
            connection_id,
            config,
            contracts,
            sessions,
            registry,
            broadcast_name: None,
            reflector_session: None,
            kill_requested: false,
            client_session: None,
            pending_response: None,
        }
    }
}

/// One named extension callback slot (spec GLOSSARY "Role").
pub trait Role: Send + Sync {
    fn name(&self) -> &'static str;
    fn invoke(&self, ctx: &mut RoleContext) -> Result<RoleOutcome>;
}

/// Result of running a chain of roles from a given starting index.
pub enum RoleProgress {
    /// All roles in this bucket ran to completion.
    Completed,
    /// A role suspended; the pipeline resumes at `role_index` next time.
    Suspended { role_index: usize, outcome: RoleOutcome },
    /// A role (or a propagated error) short-circuited with a response.
    Responded(RtspResponse),
}

/// An ordered bucket of roles run together as one pipeline state (e.g. the
/// `RouteAuthAuthz` bucket runs route, authenticate, authorize).
pub struct RoleChain {
    roles: Vec<Box<dyn Role>>,
}

impl RoleChain {
    pub fn new(roles: Vec<Box<dyn Role>>) -> Self {
        Self { roles }
    }

    /// Run roles starting at `start_index`, stopping at the first
    /// suspension or short-circuit response (spec §4.5 "re-entrant" role
    /// execution).
    pub fn run_from(&self, start_index: usize, ctx: &mut RoleContext) -> RoleProgress {
        for (offset, role) in self.roles.iter().enumerate().skip(start_index) {
            let outcome = match role.invoke(ctx) {
                Ok(o) => o,
                Err(e) => {
                    tracing::warn!(role = role.name(), error = %e, "role returned error");
                    return RoleProgress::Responded(canned_error_response(&e, ctx.request));
                }
            };
            match outcome {
                RoleOutcome::Done => continue,
                RoleOutcome::Respond(resp) => return RoleProgress::Responded(resp),
                other => return RoleProgress::Suspended { role_index: offset, outcome: other },
            }
        }
        RoleProgress::Completed
    }
}

/// Build the canned error response a pipeline sends when a role returns an
/// error instead of its own response (spec §7 "Propagation").
pub fn canned_error_response(err: &RtspError, request: &RtspRequest) -> RtspResponse {
    let cseq = request.cseq().unwrap_or("0");
    RtspResponse::new(err.status_code(), err.status_text()).add_header("CSeq", cseq)
}
