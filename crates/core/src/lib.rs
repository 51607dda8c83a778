//! # rtsp_reflector — single-publisher, many-subscriber RTSP reflector core
//!
//! A Rust library implementing the server-side half of an RTSP broadcast
//! reflector: one live RTP/RTCP source (pushed in via `ANNOUNCE`/`RECORD`,
//! or pre-configured) fanned out to many RTSP subscribers over RTP-over-UDP
//! or interleaved-in-TCP, with bounded packet buffering for subscriber
//! bootstrap.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request/response parsing, session lifecycle, transport negotiation, interleaved framing |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP/RTCP | Packet sequencing and the frame buffer's "newer than" wraparound comparison |
//! | [RFC 4566](https://tools.ietf.org/html/rfc4566)/[8866](https://tools.ietf.org/html/rfc8866) | SDP | Repair, per-subscriber stripping, and generation for DESCRIBE responses |
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │  Server           — orchestrator, public API        │
//! ├────────────────────────────────────────────────────┤
//! │  Pipeline         — per-connection state machine,   │
//! │                     cooperative scheduler           │
//! │  Roles            — filter/route/authenticate/      │
//! │                     authorize/preprocess/process/   │
//! │                     postprocess dispatch chain       │
//! │  Tunnel           — HTTP tunnel GET/POST pairing     │
//! ├────────────────────────────────────────────────────┤
//! │  Reflector        — Frame Buffer, Reflector Stream,  │
//! │                     Reflector Session, Registry      │
//! │  Session          — client (subscriber/publisher)    │
//! │                     state machine, transport         │
//! ├────────────────────────────────────────────────────┤
//! │  Protocol         — RTSP request/response, SDP       │
//! │  Contracts        — external collaborators (SDP      │
//! │                     parser, access control, cache)   │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate layout
//!
//! - [`server`] — High-level [`Server`] orchestrator.
//! - [`config`] — [`config::ReflectorConfig`], the CLI/config knob table.
//! - [`contracts`] — External collaborators consumed via traits (spec §1).
//! - [`reflector`] — Frame Buffer, Reflector Stream, Reflector Session, Session Registry.
//! - [`session`] — Per-client session state machine and transport negotiation.
//! - [`roles`] — Role Dispatch: the resumable extension-callback chain.
//! - [`pipeline`] — RTSP Request Pipeline: per-connection state machine and scheduler.
//! - [`tunnel`] — HTTP Tunnel Binder.
//! - [`protocol`] — RTSP request/response parsing and SDP generation.
//! - [`transport`] — TCP accept loop and UDP delivery.
//! - [`error`] — [`RtspError`] enum and [`Result`] alias.

pub mod config;
pub mod contracts;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod reflector;
pub mod roles;
pub mod server;
pub mod session;
pub mod transport;
pub mod tunnel;

pub use config::ReflectorConfig;
pub use error::{Result, RtspError};
pub use server::Server;
