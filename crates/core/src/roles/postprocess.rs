//! Postprocess role (spec §4.5 `PostProcess` state): header augmentation
//! applied to the staged response after `Process` has built it.
//!
//! Grounded on the teacher's response-header hooks, generalized to the two
//! spec §6 compatibility switches that only apply to a successful `PLAY`
//! response: `enable_play_response_range_header` and
//! `force_rtp_info_sequence_and_time`.

use super::{Role, RoleContext, RoleOutcome};
use crate::error::Result;

pub struct PostprocessRole;

impl Role for PostprocessRole {
    fn name(&self) -> &'static str {
        "postprocess"
    }

    fn invoke(&self, ctx: &mut RoleContext) -> Result<RoleOutcome> {
        if ctx.request.method != "PLAY" {
            return Ok(RoleOutcome::Done);
        }

        let Some(mut response) = ctx.pending_response.take() else {
            return Ok(RoleOutcome::Done);
        };

        if response.status_code == 200 {
            if ctx.config.enable_play_response_range_header {
                response = response.add_header("Range", "npt=0.000-");
            }

            if ctx.config.force_rtp_info_sequence_and_time {
                if let Some(handle) = &ctx.reflector_session {
                    if let Some(stream) = handle.session.streams.first() {
                        if let Some((seq, ts, _)) = stream.first_packet_info() {
                            response = response.add_header(
                                "RTP-Info",
                                &format!("url={};seq={seq};rtptime={ts}", ctx.request.uri),
                            );
                        }
                    }
                }
            }
        }

        ctx.pending_response = Some(response);
        Ok(RoleOutcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReflectorConfig;
    use crate::contracts::Contracts;
    use crate::protocol::request::RtspRequest;
    use crate::protocol::response::RtspResponse;
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
    fn adds_range_header_when_enabled() {
        let req = RtspRequest::parse("PLAY rtsp://host/live/a.sdp RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap();
        let mut cfg = ReflectorConfig::default();
        cfg.enable_play_response_range_header = true;
        let mut ctx = ctx_for(&req, cfg);
        ctx.pending_response = Some(RtspResponse::ok());
        PostprocessRole.invoke(&mut ctx).unwrap();
        let resp = ctx.pending_response.unwrap();
        assert!(resp.headers.iter().any(|(k, v)| k == "Range" && v == "npt=0.000-"));
    }

    #[test]
    fn leaves_non_play_responses_untouched() {
        let req = RtspRequest::parse("DESCRIBE rtsp://host/live/a.sdp RTSP/1.0\r\nCSeq: 1\r\n\r\n").unwrap();
        let mut ctx = ctx_for(&req, ReflectorConfig::default());
        ctx.pending_response = Some(RtspResponse::ok());
        PostprocessRole.invoke(&mut ctx).unwrap();
        assert!(!ctx.pending_response.unwrap().headers.iter().any(|(k, _)| k == "Range"));
    }
}
