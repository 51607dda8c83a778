//! Authorize role (spec §4.5 `RouteAuthAuthz` bucket, third member):
//! broadcast-level policy checks that don't depend on identity.
//!
//! Grounded on `QTSSReflectorModule`'s `sBroadcastsAllowed`/directory-list
//! checks (`AllowedBroadcast`), generalized to the spec §6 knobs
//! `allow_broadcasts`, `broadcast_dir_list`, and the redirect pair
//! `redirect_broadcast_keyword`/`redirect_broadcasts_dir`.

use super::{Role, RoleContext, RoleOutcome};
use crate::error::{Result, RtspError};

pub struct AuthorizeRole;

impl Role for AuthorizeRole {
    fn name(&self) -> &'static str {
        "authorize"
    }

    fn invoke(&self, ctx: &mut RoleContext) -> Result<RoleOutcome> {
        if ctx.request.method != "ANNOUNCE" {
            return Ok(RoleOutcome::Done);
        }

        if !ctx.config.allow_broadcasts {
            return Err(RtspError::Forbidden("broadcasting is disabled on this server".into()));
        }

        let Some(name) = ctx.broadcast_name.clone() else {
            return Ok(RoleOutcome::Done);
        };

        if !ctx.config.broadcast_dir_list.is_empty()
            && !ctx.config.broadcast_dir_list.iter().any(|prefix| name.starts_with(prefix))
        {
            return Err(RtspError::Forbidden(format!("{name} is outside the allowed broadcast directories")));
        }

        if let (Some(keyword), Some(redirect_dir)) = (&ctx.config.redirect_broadcast_keyword, &ctx.config.redirect_broadcasts_dir) {
            if let Some(rest) = name.strip_prefix(keyword.as_str()) {
                ctx.broadcast_name = Some(format!("{redirect_dir}{rest}"));
            }
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

    fn ctx_with<'a>(req: &'a RtspRequest, cfg: ReflectorConfig, broadcast_name: &str) -> RoleContext<'a> {
        let mut ctx = RoleContext::new(
            req,
            "127.0.0.1:1".parse().unwrap(),
            1,
            Arc::new(cfg),
            Contracts::default_in_process(vec![]),
            SessionManager::new(),
            SessionRegistry::new(),
        );
        ctx.broadcast_name = Some(broadcast_name.to_string());
        ctx
    }

    #[test]
    fn broadcasts_disabled_rejects_announce() {
        let req = RtspRequest::parse("ANNOUNCE rtsp://host/live/a.sdp RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap();
        let mut cfg = ReflectorConfig::default();
        cfg.allow_broadcasts = false;
        let mut ctx = ctx_with(&req, cfg, "live/a.sdp");
        assert!(AuthorizeRole.invoke(&mut ctx).is_err());
    }

    #[test]
    fn directory_list_restricts_path() {
        let req = RtspRequest::parse("ANNOUNCE rtsp://host/other/a.sdp RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap();
        let mut cfg = ReflectorConfig::default();
        cfg.broadcast_dir_list = vec!["live/".to_string()];
        let mut ctx = ctx_with(&req, cfg, "other/a.sdp");
        assert!(AuthorizeRole.invoke(&mut ctx).is_err());
    }

    #[test]
    fn redirect_rewrites_broadcast_name() {
        let req = RtspRequest::parse("ANNOUNCE rtsp://host/staging/a.sdp RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap();
        let mut cfg = ReflectorConfig::default();
        cfg.redirect_broadcast_keyword = Some("staging/".to_string());
        cfg.redirect_broadcasts_dir = Some("live/".to_string());
        let mut ctx = ctx_with(&req, cfg, "staging/a.sdp");
        AuthorizeRole.invoke(&mut ctx).unwrap();
        assert_eq!(ctx.broadcast_name.as_deref(), Some("live/a.sdp"));
    }
}
