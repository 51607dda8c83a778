//! Route role (spec §4.5 `RouteAuthAuthz` bucket, first member): resolves
//! the request's broadcast name against the Session Registry, registering a
//! new Reflector Session for `ANNOUNCE`.
//!
//! Grounded on `QTSSReflectorModule::DoAnnounceAddMovie` / `PreProcessReflectorInfo`:
//! the SDP accompanying `ANNOUNCE` is parsed once, turned into stream
//! descriptors, and used to create (or reject a duplicate of) the session.

use super::{Role, RoleContext, RoleOutcome};
use crate::error::{Result, RtspError};
use crate::protocol::sdp;
use crate::reflector::{
    extract_broadcast_path, ReflectorSession, SetupDirection, SourceDescriptor, StreamDescriptor,
    TrackTransport,
};

pub struct RouteRole;

impl Role for RouteRole {
    fn name(&self) -> &'static str {
        "route"
    }

    fn invoke(&self, ctx: &mut RoleContext) -> Result<RoleOutcome> {
        if ctx.request.method == "OPTIONS" {
            return Ok(RoleOutcome::Done);
        }

        let path = extract_broadcast_path(&ctx.request.uri);
        ctx.kill_requested = path.kill;
        ctx.broadcast_name = Some(path.name.clone());

        if ctx.request.method == "ANNOUNCE" {
            if ctx.kill_requested {
                if !ctx.config.allow_announced_kill {
                    return Err(RtspError::Forbidden("announced kill is disabled".into()));
                }
                ctx.reflector_session = ctx.registry.resolve(&path.name);
                return Ok(RoleOutcome::Done);
            }

            if !ctx.config.enable_broadcast_announce {
                return Err(RtspError::Forbidden("ANNOUNCE is disabled".into()));
            }

            let sdp_text = ctx.request.body_text().unwrap_or_default();
            let lines = ctx.contracts.sdp_parser.parse_lines(sdp_text);
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let repaired = sdp::repair(&lines, now, &ctx.client_addr.ip().to_string(), &ctx.config.sdp_session_id);
            let source = source_descriptor_from_sdp(&repaired);

            if let Some(existing) = ctx.registry.resolve(&path.name) {
                if existing.session.has_publisher() && !ctx.config.allow_duplicate_broadcasts {
                    return Err(RtspError::PreconditionFailed(format!(
                        "broadcast {} already active",
                        path.name
                    )));
                }
                ctx.reflector_session = Some(existing);
                return Ok(RoleOutcome::Done);
            }

            if ctx.config.enforce_static_sdp_port_range {
                ReflectorSession::validate_static_port_range(
                    &source.streams,
                    ctx.config.minimum_static_sdp_port,
                    ctx.config.maximum_static_sdp_port,
                )
                .map_err(|_| RtspError::UnsupportedMediaType(format!("SDP port outside the configured static range for {}", path.name)))?;
            }

            let session = ReflectorSession::setup(path.name.clone(), source).map_err(|e| {
                RtspError::UnsupportedMediaType(format!("{:?}", e))
            })?;
            session.set_local_sdp(sdp::render(&repaired));
            session.configure_ssrc_policy(
                ctx.config.use_one_ssrc_per_stream,
                std::time::Duration::from_secs(ctx.config.timeout_stream_ssrc_secs),
            );
            let handle = ctx.registry.resolve_or_register(session);
            ctx.reflector_session = Some(handle);
            return Ok(RoleOutcome::Done);
        }

        // Subscriber-side methods (DESCRIBE/SETUP/PLAY/PAUSE/TEARDOWN/...):
        // the named broadcast must already exist.
        match ctx.registry.resolve(&path.name) {
            Some(handle) => {
                ctx.reflector_session = Some(handle);
                Ok(RoleOutcome::Done)
            }
            None => Err(RtspError::NotFound(format!("no broadcast named {}", path.name))),
        }
    }
}

/// Build a [`SourceDescriptor`] from parsed SDP lines (spec §6 `m=`/`a=rtpmap`).
///
/// Destination addresses for server-allocated (as opposed to multicast) push
/// broadcasts are assigned by the transport layer, which is out of scope
/// here (spec §1); this uses loopback as the reflectable placeholder a
/// unicast push session relays through.
fn source_descriptor_from_sdp(lines: &[(char, String)]) -> SourceDescriptor {
    let mut streams = Vec::new();
    let mut track_id = 0u32;
    let mut pending_rtpmap: Option<(u8, String, u32)> = None;

    for (tag, value) in lines {
        match tag {
            'm' => {
                if let Some((payload_type, dest_port)) = parse_m_line(value) {
                    streams.push(StreamDescriptor {
                        track_id,
                        source_addr: None,
                        dest_addr: "127.0.0.1".parse().unwrap(),
                        dest_port,
                        ttl: 16,
                        payload_type,
                        payload_name: "unknown".to_string(),
                        buffer_delay_secs: StreamDescriptor::default_buffer_delay_secs(),
                        transport: TrackTransport::Udp,
                        direction: SetupDirection::Push,
                        timescale: 90000,
                        setup_to_receive: false,
                    });
                    track_id += 1;
                }
            }
            'a' => {
                if let Some(rest) = value.strip_prefix("rtpmap:") {
                    pending_rtpmap = parse_rtpmap(rest);
                    if let (Some(stream), Some((pt, name, clock))) = (streams.last_mut(), pending_rtpmap.take()) {
                        if stream.payload_type == pt {
                            stream.payload_name = name;
                            stream.timescale = clock;
                        }
                    }
                }
            }
            _ => {}
        }
    }

    SourceDescriptor::permanent(streams)
}

fn parse_m_line(value: &str) -> Option<(u8, u16)> {
    let mut parts = value.split_whitespace();
    let _media = parts.next()?;
    let port: u16 = parts.next()?.parse().ok()?;
    let _proto = parts.next()?;
    let payload_type: u8 = parts.next()?.parse().ok()?;
    Some((payload_type, port))
}

fn parse_rtpmap(value: &str) -> Option<(u8, String, u32)> {
    let mut parts = value.splitn(2, ' ');
    let pt: u8 = parts.next()?.parse().ok()?;
    let rest = parts.next()?;
    let mut fields = rest.split('/');
    let name = fields.next()?.to_string();
    let clock: u32 = fields.next()?.parse().unwrap_or(90000);
    Some((pt, name, clock))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_m_and_rtpmap_into_stream() {
        let lines = vec![
            ('m', "video 20000 RTP/AVP 96".to_string()),
            ('a', "rtpmap:96 H264/90000".to_string()),
        ];
        let source = source_descriptor_from_sdp(&lines);
        assert_eq!(source.streams.len(), 1);
        assert_eq!(source.streams[0].payload_type, 96);
        assert_eq!(source.streams[0].payload_name, "H264");
        assert_eq!(source.streams[0].timescale, 90000);
    }

    #[test]
    fn multiple_m_lines_get_distinct_track_ids() {
        let lines = vec![
            ('m', "video 20000 RTP/AVP 96".to_string()),
            ('m', "audio 20002 RTP/AVP 97".to_string()),
        ];
        let source = source_descriptor_from_sdp(&lines);
        assert_eq!(source.streams[0].track_id, 0);
        assert_eq!(source.streams[1].track_id, 1);
    }
}
