//! Authenticate role (spec §4.5 `RouteAuthAuthz` bucket, second member).
//!
//! Grounded on `QTSSAccessModule`'s local-broadcast exemption: a publisher
//! connecting from loopback is trusted unless `authenticate_local_broadcast`
//! is set, matching the source's "don't require a password for the machine
//! running the server" default.

use super::{Role, RoleContext, RoleOutcome};
use crate::error::{Result, RtspError};

pub struct AuthenticateRole;

impl Role for AuthenticateRole {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    fn invoke(&self, ctx: &mut RoleContext) -> Result<RoleOutcome> {
        if ctx.request.method != "ANNOUNCE" {
            return Ok(RoleOutcome::Done);
        }

        let is_local = ctx.client_addr.ip().is_loopback();
        if is_local && !ctx.config.authenticate_local_broadcast {
            return Ok(RoleOutcome::Done);
        }

        if !ctx.contracts.access_control.allow_broadcast(ctx.client_addr.ip()) {
            return Err(RtspError::Unauthorized(format!(
                "broadcaster {} not authorized",
                ctx.client_addr.ip()
            )));
        }

        Ok(RoleOutcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReflectorConfig;
    use crate::contracts::Contracts;
    use crate::protocol::request::RtspRequest;
    use crate::reflector::registry::SessionRegistry;
    use crate::session::SessionManager;
    use std::sync::Arc;

    fn make_ctx<'a>(req: &'a RtspRequest, addr: &str, allow_list: Vec<std::net::IpAddr>, cfg: ReflectorConfig) -> RoleContext<'a> {
        RoleContext::new(
            req,
            addr.parse().unwrap(),
            1,
            Arc::new(cfg),
            Contracts::default_in_process(allow_list),
            SessionManager::new(),
            SessionRegistry::new(),
        )
    }

    #[test]
    fn loopback_announce_skips_auth_by_default() {
        let req = RtspRequest::parse("ANNOUNCE rtsp://host/live/a.sdp RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap();
        let mut ctx = make_ctx(&req, "127.0.0.1:5000", vec![], ReflectorConfig::default());
        assert!(matches!(AuthenticateRole.invoke(&mut ctx).unwrap(), RoleOutcome::Done));
    }

    #[test]
    fn remote_announce_rejected_when_not_in_allow_list() {
        let req = RtspRequest::parse("ANNOUNCE rtsp://host/live/a.sdp RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap();
        let mut ctx = make_ctx(&req, "10.0.0.5:5000", vec!["10.0.0.9".parse().unwrap()], ReflectorConfig::default());
        assert!(AuthenticateRole.invoke(&mut ctx).is_err());
    }

    #[test]
    fn non_announce_methods_bypass_authentication() {
        let req = RtspRequest::parse("PLAY rtsp://host/live/a.sdp RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap();
        let mut ctx = make_ctx(&req, "10.0.0.5:5000", vec!["10.0.0.9".parse().unwrap()], ReflectorConfig::default());
        assert!(matches!(AuthenticateRole.invoke(&mut ctx).unwrap(), RoleOutcome::Done));
    }
}
