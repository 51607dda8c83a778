//! Process role (spec §4.5 `Process` state): method dispatch.
//!
//! Grounded on the teacher's `protocol/handler.rs` method switch, adapted
//! from single-mount playback to the reflector's publisher/subscriber roles:
//! `ANNOUNCE`/`RECORD` bind a `ClientSession` as the session's publisher,
//! `SETUP`/`PLAY` attach it as a subscriber against a `ReflectorStream`.

use std::time::Duration;

use super::{Role, RoleContext, RoleOutcome};
use crate::error::{Result, RtspError};
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp;
use crate::session::{NegotiatedTransport, RequestedTransport, SessionRole};

/// Spec §4.5 `PLAY`: how long and how many times to idle waiting for the
/// Frame Buffer to have initial packets before giving up.
const PLAY_WAIT_INTERVAL: Duration = Duration::from_millis(100);
const PLAY_WAIT_MAX_ATTEMPTS: u32 = 10;

pub struct ProcessRole;

impl Role for ProcessRole {
    fn name(&self) -> &'static str {
        "process"
    }

    fn invoke(&self, ctx: &mut RoleContext) -> Result<RoleOutcome> {
        let cseq = ctx.request.cseq().unwrap_or("0").to_string();

        let response = match ctx.request.method.as_str() {
            "OPTIONS" => options_response(),
            "DESCRIBE" => describe(ctx)?,
            "ANNOUNCE" => announce(ctx)?,
            "SETUP" => setup(ctx)?,
            "PLAY" => match play(ctx)? {
                PlayOutcome::Response(resp) => resp,
                PlayOutcome::Idle(d) => return Ok(RoleOutcome::NeedsIdle(d)),
            },
            "RECORD" => record(ctx)?,
            "PAUSE" => pause(ctx)?,
            "TEARDOWN" => teardown(ctx)?,
            "GET_PARAMETER" => RtspResponse::ok(),
            "SET_PARAMETER" => RtspResponse::ok(),
            other => return Err(RtspError::BadRequest(format!("unsupported method {other}"))),
        };

        ctx.pending_response = Some(response.add_header("CSeq", &cseq));
        Ok(RoleOutcome::Done)
    }
}

fn options_response() -> RtspResponse {
    RtspResponse::ok().add_header(
        "Public",
        "OPTIONS, DESCRIBE, ANNOUNCE, SETUP, PLAY, RECORD, PAUSE, TEARDOWN, GET_PARAMETER, SET_PARAMETER",
    )
}

fn describe(ctx: &mut RoleContext) -> Result<RtspResponse> {
    let handle = ctx
        .reflector_session
        .clone()
        .ok_or_else(|| RtspError::NotFound("broadcast not found".into()))?;

    let host = ctx.config.public_host.clone().unwrap_or_else(|| ctx.client_addr.ip().to_string());
    let body = sdp::generate_subscriber_sdp(
        &handle.session,
        &host,
        &ctx.config.sdp_session_id,
        &ctx.config.sdp_session_version,
        &ctx.config.sdp_username,
        &ctx.config.sdp_session_name,
        ctx.config.compatibility_adjust_sdp_media_bandwidth_percent,
    );

    Ok(RtspResponse::ok()
        .add_header("Content-Type", "application/sdp")
        .with_body(body))
}

fn announce(ctx: &mut RoleContext) -> Result<RtspResponse> {
    if ctx.kill_requested {
        let Some(name) = ctx.broadcast_name.clone() else {
            return Ok(RtspResponse::ok());
        };
        if let Some(session) = ctx.registry.unregister(&name) {
            if ctx.config.kill_clients_when_broadcast_stops {
                session.tear_down_all_subscribers();
            }
        }
        return Ok(RtspResponse::ok());
    }

    let handle = ctx
        .reflector_session
        .clone()
        .ok_or_else(|| RtspError::Internal("route role did not populate a session".into()))?;

    let session = ctx.sessions.create_session(&ctx.request.uri);
    session.bind_reflector_session(&handle.session.name, SessionRole::Publisher);
    ctx.client_session = Some(session.clone());
    handle.session.set_publisher(ctx.connection_id);

    Ok(RtspResponse::ok().add_header("Session", &session.session_header_value()))
}

fn setup(ctx: &mut RoleContext) -> Result<RtspResponse> {
    let handle = ctx
        .reflector_session
        .clone()
        .ok_or_else(|| RtspError::NotFound("broadcast not found".into()))?;

    let transport_header = ctx
        .request
        .get_header("Transport")
        .ok_or_else(|| RtspError::BadRequest("missing Transport header".into()))?;

    let requested = RequestedTransport::parse(transport_header)
        .ok_or_else(|| RtspError::UnsupportedTransport("unparseable Transport header".into()))?;

    let session = match ctx.client_session.clone() {
        Some(s) => s,
        None => {
            let s = ctx.sessions.create_session(&ctx.request.uri);
            let role = if RequestedTransport::is_record_mode(transport_header) {
                SessionRole::Publisher
            } else {
                SessionRole::Subscriber
            };
            s.bind_reflector_session(&handle.session.name, role);
            ctx.client_session = Some(s.clone());
            s
        }
    };

    let track_id = track_id_from_uri(&ctx.request.uri).unwrap_or(0);

    if session.role() == Some(SessionRole::Publisher)
        && handle.session.setup_to_receive_is_duplicate(track_id, ctx.config.allow_duplicate_broadcasts)
    {
        return Err(RtspError::PreconditionFailed(format!(
            "track {track_id} already has a publisher"
        )));
    }

    let (negotiated, transport_reply) = match requested {
        RequestedTransport::Udp { client_rtp_port, client_rtcp_port } => {
            let (server_rtp_port, server_rtcp_port) = ctx
                .sessions
                .allocate_server_ports(ctx.config.minimum_static_sdp_port, ctx.config.maximum_static_sdp_port)?;
            let negotiated = NegotiatedTransport::Udp {
                client_rtp_port,
                client_rtcp_port,
                server_rtp_port,
                server_rtcp_port,
                client_addr: ctx.client_addr,
            };
            let reply = format!(
                "RTP/AVP;unicast;client_port={client_rtp_port}-{client_rtcp_port};server_port={server_rtp_port}-{server_rtcp_port}"
            );
            (negotiated, reply)
        }
        RequestedTransport::Interleaved { rtp_channel, rtcp_channel } => {
            let negotiated = NegotiatedTransport::Interleaved { rtp_channel, rtcp_channel };
            let reply = format!("RTP/AVP/TCP;interleaved={rtp_channel}-{rtcp_channel}");
            (negotiated, reply)
        }
    };

    session.set_track_transport(track_id, negotiated);

    if session.role() == Some(SessionRole::Publisher) {
        handle.session.mark_setup_to_receive(track_id);
    }

    if session.role() == Some(SessionRole::Subscriber) {
        handle.session.add_subscriber(ctx.connection_id);
        if let Some(stream_index) = handle.session.streams.iter().position(|s| s.descriptor.track_id == track_id) {
            let subscriber_id = handle.session.streams[stream_index].attach_subscriber();
            session.set_subscriber_handle(track_id, crate::reflector::SubscriberHandle { stream_index, subscriber_id });
        }
    }

    let mut response = RtspResponse::ok()
        .add_header("Session", &session.session_header_value())
        .add_header("Transport", &transport_reply);

    // `disable_overbuffering` (spec §6): clients may ask for a larger
    // playout buffer via `x-bufferdelay`; honor it by echoing the value
    // back unless the operator has disabled client-requested overbuffering.
    if !ctx.config.disable_overbuffering {
        if let Some(requested_delay) = ctx.request.get_header("x-bufferdelay") {
            response = response.add_header("x-bufferdelay", requested_delay);
        }
    }

    Ok(response)
}

/// Outcome of a `PLAY` attempt: either a response is ready, or the role
/// should suspend and retry once the Frame Buffer has initial packets
/// (spec §4.5 `PLAY`: "it first checks the Frame Buffer has initial
/// packets; if not, it idles for up to N iterations ... before returning
/// `ClientNotFound`").
enum PlayOutcome {
    Response(RtspResponse),
    Idle(Duration),
}

fn play(ctx: &mut RoleContext) -> Result<PlayOutcome> {
    let session = ctx
        .client_session
        .clone()
        .ok_or_else(RtspError::not_session_attached)?;

    if session.role() != Some(SessionRole::Subscriber) {
        return Err(RtspError::MethodNotValidInState(
            "PLAY is only valid for a session set up to subscribe".into(),
        ));
    }

    if ctx.config.force_rtp_info_sequence_and_time {
        let handles = session.subscriber_handles();
        let ready = match &ctx.reflector_session {
            Some(handle) => handles
                .iter()
                .all(|(_, sub)| handle.session.streams[sub.stream_index].first_packet_info().is_some()),
            None => true,
        };

        if !ready {
            let attempts = session.note_play_wait_attempt();
            if attempts >= PLAY_WAIT_MAX_ATTEMPTS {
                session.reset_play_wait_attempts();
                return Err(RtspError::SessionNotFound(
                    "no packets buffered for this broadcast yet".into(),
                ));
            }
            return Ok(PlayOutcome::Idle(PLAY_WAIT_INTERVAL));
        }
        session.reset_play_wait_attempts();
    }

    session.set_state(crate::session::SessionState::Playing);
    session.touch();

    // `Range`/`RTP-Info` augmentation happens in the `PostProcess` bucket
    // (spec §4.5), not here.
    Ok(PlayOutcome::Response(
        RtspResponse::ok().add_header("Session", &session.session_header_value()),
    ))
}

fn record(ctx: &mut RoleContext) -> Result<RtspResponse> {
    let session = ctx
        .client_session
        .clone()
        .ok_or_else(RtspError::not_session_attached)?;

    if !ctx.config.enable_broadcast_push {
        return Err(RtspError::Forbidden("RECORD is disabled".into()));
    }

    if session.role() != Some(SessionRole::Publisher) {
        return Err(RtspError::MethodNotValidInState(
            "RECORD is only valid for a session set up to publish".into(),
        ));
    }

    session.set_state(crate::session::SessionState::Playing);
    session.touch();
    Ok(RtspResponse::ok().add_header("Session", &session.session_header_value()))
}

fn pause(ctx: &mut RoleContext) -> Result<RtspResponse> {
    let session = ctx
        .client_session
        .clone()
        .ok_or_else(RtspError::not_session_attached)?;
    session.set_state(crate::session::SessionState::Paused);
    Ok(RtspResponse::ok().add_header("Session", &session.session_header_value()))
}

fn teardown(ctx: &mut RoleContext) -> Result<RtspResponse> {
    let session = ctx
        .client_session
        .clone()
        .ok_or_else(RtspError::not_session_attached)?;

    session.cancel_outputs();

    if let Some(handle) = &ctx.reflector_session {
        match session.role() {
            Some(SessionRole::Subscriber) => {
                handle.session.remove_subscriber(ctx.connection_id, false);
            }
            Some(SessionRole::Publisher) => {
                handle.session.clear_publisher();
                if ctx.config.kill_clients_when_broadcast_stops {
                    handle.session.tear_down_all_subscribers();
                }
            }
            None => {}
        }
        if let Some(name) = ctx.broadcast_name.clone() {
            ctx.registry.release(&name);
        }
    }

    ctx.sessions.remove_session(&session.id);
    Ok(RtspResponse::ok())
}

fn track_id_from_uri(uri: &str) -> Option<u32> {
    uri.rfind("trackID=").and_then(|pos| uri[pos + 8..].parse().ok())
}

impl RtspError {
    fn not_session_attached() -> Self {
        RtspError::SessionNotFound("no Session header bound to this connection".into())
    }
}
