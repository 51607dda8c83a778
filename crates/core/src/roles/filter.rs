//! Filter role (spec §4.5 `Filtering` state): cheap, stateless request
//! sanity checks that run before routing does any registry work.
//!
//! Grounded on the teacher's request-validation checks in `protocol/handler.rs`,
//! generalized with the `allow_non_sdp_urls` policy (spec §6).

use super::{Role, RoleContext, RoleOutcome};
use crate::error::{RtspError, Result};

pub struct FilterRole;

impl Role for FilterRole {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn invoke(&self, ctx: &mut RoleContext) -> Result<RoleOutcome> {
        if ctx.request.cseq().is_none() {
            return Err(RtspError::BadRequest("missing CSeq header".into()));
        }

        if ctx.request.method.is_empty() || ctx.request.uri.is_empty() {
            return Err(RtspError::BadRequest("malformed request line".into()));
        }

        if !ctx.config.allow_non_sdp_urls
            && matches!(ctx.request.method.as_str(), "DESCRIBE" | "ANNOUNCE")
            && !ctx.request.uri.ends_with(".sdp")
            && !ctx.request.uri.contains(".sdp/")
        {
            return Err(RtspError::BadRequest("URL must reference a .sdp resource".into()));
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

    fn ctx_for(raw: &str) -> (RtspRequest, Arc<ReflectorConfig>) {
        (RtspRequest::parse(raw).unwrap(), Arc::new(ReflectorConfig::default()))
    }

    #[test]
    fn missing_cseq_is_rejected() {
        let (req, cfg) = ctx_for("OPTIONS rtsp://host/live/s1.sdp RTSP/1.0\r\n\r\n");
        let mut ctx = RoleContext::new(
            &req,
            "127.0.0.1:1".parse().unwrap(),
            1,
            cfg,
            Contracts::default_in_process(vec![]),
            SessionManager::new(),
            SessionRegistry::new(),
        );
        assert!(FilterRole.invoke(&mut ctx).is_err());
    }

    #[test]
    fn non_sdp_describe_rejected_by_default() {
        let (req, cfg) = ctx_for("DESCRIBE rtsp://host/live/s1 RTSP/1.0\r\nCSeq: 1\r\n\r\n");
        let mut ctx = RoleContext::new(
            &req,
            "127.0.0.1:1".parse().unwrap(),
            1,
            cfg,
            Contracts::default_in_process(vec![]),
            SessionManager::new(),
            SessionRegistry::new(),
        );
        assert!(FilterRole.invoke(&mut ctx).is_err());
    }

    #[test]
    fn sdp_describe_accepted() {
        let (req, cfg) = ctx_for("DESCRIBE rtsp://host/live/s1.sdp RTSP/1.0\r\nCSeq: 1\r\n\r\n");
        let mut ctx = RoleContext::new(
            &req,
            "127.0.0.1:1".parse().unwrap(),
            1,
            cfg,
            Contracts::default_in_process(vec![]),
            SessionManager::new(),
            SessionRegistry::new(),
        );
        assert!(matches!(FilterRole.invoke(&mut ctx).unwrap(), RoleOutcome::Done));
    }
}
