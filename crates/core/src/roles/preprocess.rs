//! Preprocess role (spec §4.5 `PreProcess` state): per-method request body
//! and header validation that runs after routing/auth but before dispatch.
//!
//! Grounded on `RTSPRequest::ParseForSyntax`'s header-combination checks
//! (e.g. a `DESCRIBE` may not carry a `Session` header) and the SDP
//! size-limit check the teacher applies to request bodies generally.

use super::{Role, RoleContext, RoleOutcome};
use crate::error::{ParseErrorKind, Result, RtspError};

pub struct PreprocessRole;

impl Role for PreprocessRole {
    fn name(&self) -> &'static str {
        "preprocess"
    }

    fn invoke(&self, ctx: &mut RoleContext) -> Result<RoleOutcome> {
        if ctx.request.method == "ANNOUNCE" {
            let declared = ctx.request.content_length().unwrap_or(0);
            let limit = ctx.config.max_sdp_size_kb.saturating_mul(1024);
            if declared > limit {
                return Err(RtspError::Parse { kind: ParseErrorKind::BodyTooLarge });
            }
        }

        if ctx.request.method == "DESCRIBE" && ctx.request.get_header("Session").is_some() {
            return Err(RtspError::HeaderFieldNotValid("DESCRIBE must not carry a Session header".into()));
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

    fn ctx_for<'a>(req: &'a RtspRequest, cfg: ReflectorConfig) -> RoleContext<'a> {
        RoleContext::new(
            req,
            "127.0.0.1:1".parse().unwrap(),
            1,
            Arc::new(cfg),
            Contracts::default_in_process(vec![]),
            SessionManager::new(),
            SessionRegistry::new(),
        )
    }

    #[test]
    fn oversized_sdp_rejected() {
        let body = "v=0\r\n".repeat(1000);
        let raw = format!(
            "ANNOUNCE rtsp://host/live/a.sdp RTSP/1.0\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let req = RtspRequest::parse(&raw).unwrap();
        let mut cfg = ReflectorConfig::default();
        cfg.max_sdp_size_kb = 1;
        let mut ctx = ctx_for(&req, cfg);
        assert!(PreprocessRole.invoke(&mut ctx).is_err());
    }

    #[test]
    fn describe_with_session_header_rejected() {
        let raw = "DESCRIBE rtsp://host/live/a.sdp RTSP/1.0\r\nCSeq: 1\r\nSession: 12345\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        let mut ctx = ctx_for(&req, ReflectorConfig::default());
        assert!(PreprocessRole.invoke(&mut ctx).is_err());
    }

    #[test]
    fn normal_describe_accepted() {
        let raw = "DESCRIBE rtsp://host/live/a.sdp RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        let mut ctx = ctx_for(&req, ReflectorConfig::default());
        assert!(matches!(PreprocessRole.invoke(&mut ctx).unwrap(), RoleOutcome::Done));
    }
}
