use std::net::IpAddr;
use std::process::ExitCode;

use clap::Parser;
use rtsp_reflector::{ReflectorConfig, Server};

/// Standalone RTSP broadcast reflector: one publisher, many subscribers.
#[derive(Parser)]
#[command(name = "rtsp-reflector", about = "RTSP broadcast reflector")]
struct Args {
    /// Bind address (host:port) for the RTSP listener.
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: String,

    /// Public hostname/IP advertised in SDP `o=`/`c=` lines. Defaults to the
    /// bind address's host.
    #[arg(long)]
    public_host: Option<String>,

    /// Accept request URLs that do not end in `.sdp`.
    #[arg(long)]
    allow_non_sdp_urls: bool,

    /// Permit `ANNOUNCE` (disable to run pre-configured broadcasts only).
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    enable_broadcast_announce: bool,

    /// Permit `RECORD` / push data.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    enable_broadcast_push: bool,

    /// Hard cap on publisher lifetime, in seconds. Unset = unlimited.
    #[arg(long)]
    max_broadcast_announce_duration_secs: Option<u64>,

    /// Allow a second publisher to attach to an already-live broadcast name.
    #[arg(long)]
    allow_duplicate_broadcasts: bool,

    /// Inclusive port range that SDP-advertised static sockets must fall within.
    #[arg(long, default_value_t = 6970)]
    minimum_static_sdp_port: u16,
    #[arg(long, default_value_t = 9999)]
    maximum_static_sdp_port: u16,
    /// Reject `ANNOUNCE`s whose SDP requests ports outside the static range.
    #[arg(long)]
    enforce_static_sdp_port_range: bool,

    /// Tear down subscribers when the publisher disconnects.
    #[arg(long)]
    kill_clients_when_broadcast_stops: bool,

    /// Use a single SSRC for every packet of a stream rather than per-source.
    #[arg(long)]
    use_one_ssrc_per_stream: bool,

    /// Idle-SSRC expiry, in seconds.
    #[arg(long, default_value_t = 30)]
    timeout_stream_ssrc_secs: u64,

    /// Publisher keepalive timeout, in seconds (floored at 30s).
    #[arg(long, default_value_t = 30)]
    timeout_broadcaster_session_secs: u64,

    /// Require authentication for loopback publishers too.
    #[arg(long)]
    authenticate_local_broadcast: bool,

    /// Disable client overbuffering (ignore `x-bufferdelay`).
    #[arg(long)]
    disable_overbuffering: bool,

    /// Master enable for reflection; when false every broadcast is refused.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    allow_broadcasts: bool,

    /// Allow a `.kill`-suffixed `ANNOUNCE` to tear down a named broadcast.
    #[arg(long)]
    allow_announced_kill: bool,

    /// Add a `Range: npt=now-` header to `PLAY` responses.
    #[arg(long)]
    enable_play_response_range_header: bool,

    /// Scale `b=` SDP bandwidth lines by this percentage (1-100).
    #[arg(long, default_value_t = 100)]
    compatibility_adjust_sdp_media_bandwidth_percent: u8,

    /// Require sequence/time fields in the `RTP-Info` header.
    #[arg(long)]
    force_rtp_info_sequence_and_time: bool,

    /// IP allow-list for broadcasters. May be repeated; empty means "allow any".
    #[arg(long = "ip-allow")]
    ip_allow_list: Vec<IpAddr>,

    /// Path prefix that, when matched, triggers a broadcast redirect.
    #[arg(long)]
    redirect_broadcast_keyword: Option<String>,
    #[arg(long)]
    redirect_broadcasts_dir: Option<String>,

    /// Allowed broadcast path prefixes. May be repeated; empty means "allow any path".
    #[arg(long = "broadcast-dir")]
    broadcast_dir_list: Vec<String>,

    /// Fixed worker-pool size for the cooperative scheduler.
    #[arg(long, default_value_t = 8)]
    worker_threads: usize,

    /// Maximum SDP body size accepted in an `ANNOUNCE`, in kilobytes.
    #[arg(long, default_value_t = 64)]
    max_sdp_size_kb: usize,
}

impl From<Args> for ReflectorConfig {
    fn from(args: Args) -> Self {
        let defaults = ReflectorConfig::default();
        ReflectorConfig {
            public_host: args.public_host,
            allow_non_sdp_urls: args.allow_non_sdp_urls,
            enable_broadcast_announce: args.enable_broadcast_announce,
            enable_broadcast_push: args.enable_broadcast_push,
            max_broadcast_announce_duration_secs: args.max_broadcast_announce_duration_secs,
            allow_duplicate_broadcasts: args.allow_duplicate_broadcasts,
            minimum_static_sdp_port: args.minimum_static_sdp_port,
            maximum_static_sdp_port: args.maximum_static_sdp_port,
            enforce_static_sdp_port_range: args.enforce_static_sdp_port_range,
            kill_clients_when_broadcast_stops: args.kill_clients_when_broadcast_stops,
            use_one_ssrc_per_stream: args.use_one_ssrc_per_stream,
            timeout_stream_ssrc_secs: args.timeout_stream_ssrc_secs,
            timeout_broadcaster_session_secs: args.timeout_broadcaster_session_secs,
            authenticate_local_broadcast: args.authenticate_local_broadcast,
            disable_overbuffering: args.disable_overbuffering,
            allow_broadcasts: args.allow_broadcasts,
            allow_announced_kill: args.allow_announced_kill,
            enable_play_response_range_header: args.enable_play_response_range_header,
            compatibility_adjust_sdp_media_bandwidth_percent: args.compatibility_adjust_sdp_media_bandwidth_percent,
            force_rtp_info_sequence_and_time: args.force_rtp_info_sequence_and_time,
            ip_allow_list: args.ip_allow_list,
            redirect_broadcast_keyword: args.redirect_broadcast_keyword,
            redirect_broadcasts_dir: args.redirect_broadcasts_dir,
            broadcast_dir_list: args.broadcast_dir_list,
            worker_threads: args.worker_threads,
            max_sdp_size_kb: args.max_sdp_size_kb,
            ..defaults
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let bind_addr = args.bind.clone();
    let config: ReflectorConfig = args.into();

    let mut server = Server::with_config(&bind_addr, config);

    if let Err(e) = server.start() {
        tracing::error!(error = %e, "failed to start server");
        return ExitCode::FAILURE;
    }

    tracing::info!(addr = %bind_addr, "RTSP reflector running, press Enter to stop");
    let mut input = String::new();
    if std::io::stdin().read_line(&mut input).is_err() {
        tracing::warn!("stdin closed, shutting down");
    }

    server.stop();
    ExitCode::SUCCESS
}
