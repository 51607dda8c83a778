//! HTTP Tunnel Binder (spec §4.6): pairs a GET half-connection with a POST
//! half-connection via a session cookie so RTSP flows as tunneled HTTP.
//!
//! Grounded on `RTSPSession.cpp`'s tunnel-pairing logic: the GET half is
//! always the survivor (it holds the socket the client expects RTSP
//! responses on); the POST half donates its socket and any bytes already
//! read off it, then goes terminal. Survivorship is keyed on which verb
//! opened the half, not on arrival order — the POST can arrive before or
//! after the GET.

use std::collections::HashMap;
use std::net::TcpStream;

use parking_lot::Mutex;

use crate::error::{Result, RtspError};

/// Which HTTP verb opened this tunnel half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelHalfKind {
    Get,
    Post,
}

/// One awaiting half-connection, keyed by its session cookie. Carries the
/// donor socket itself, plus any bytes already pulled off it into the
/// connection's own read buffer before the donation, so no body bytes are
/// lost when the kernel socket changes owners.
struct PendingHalf {
    kind: TunnelHalfKind,
    connection_id: u64,
    stream: TcpStream,
    buffered: Vec<u8>,
}

/// A POST half that donated its socket before its complementary GET had
/// registered, parked here for the GET to collect on its next poll.
pub struct DonatedHalf {
    pub donor_connection_id: u64,
    pub donor_stream: TcpStream,
    pub buffered: Vec<u8>,
}

/// Outcome of [`TunnelPairing::bind`].
pub enum BindOutcome {
    /// No complementary half exists yet; caller should remain in
    /// `HTTPTunnelWait` (spec §4.5).
    Waiting,
    /// A complementary half was already present and is now paired: the
    /// caller is the GET survivor, `donor_stream` and `buffered` are the
    /// POST half's socket and its already-read bytes, transferred to the
    /// caller (spec §9 `takeInputSocket`).
    Paired { donor_connection_id: u64, donor_stream: TcpStream, buffered: Vec<u8> },
    /// The caller is the POST half and a GET was already waiting; the
    /// caller's socket has been parked for the GET to collect via
    /// [`TunnelPairing::take_donor`]. The caller is now terminal.
    Donated,
}

#[derive(Default)]
struct Inner {
    pending: HashMap<String, PendingHalf>,
    donated: HashMap<String, DonatedHalf>,
}

/// Transient `sessionCookie → firstHalfConnection` mapping (spec §3 `TunnelPairing`).
#[derive(Default)]
pub struct TunnelPairing {
    inner: Mutex<Inner>,
}

impl TunnelPairing {
    pub fn new() -> Self {
        Self::default()
    }

    /// `resolveOrRegister(cookie, self)` (spec §4.6 binding algorithm),
    /// redesigned so the GET half is always the eventual survivor:
    ///
    /// - `Get` with no pending entry: registers and waits.
    /// - `Get` with a pending `Post`: pairs immediately, taking the POST's
    ///   socket and buffered bytes directly.
    /// - `Get` with a pending `Get`: rejected (spec §4.6 "Failure").
    /// - `Post` with no pending entry: registers and waits (a later GET will
    ///   pair with it immediately).
    /// - `Post` with a pending `Get`: donates its socket into the `donated`
    ///   table for the waiting GET to collect, and returns [`BindOutcome::Donated`].
    /// - `Post` with a pending `Post`: rejected.
    pub fn bind(&self, cookie: &str, kind: TunnelHalfKind, connection_id: u64, stream: TcpStream, buffered: Vec<u8>) -> Result<BindOutcome> {
        let mut inner = self.inner.lock();

        match kind {
            TunnelHalfKind::Get => match inner.pending.remove(cookie) {
                Some(existing) if existing.kind == TunnelHalfKind::Post => Ok(BindOutcome::Paired {
                    donor_connection_id: existing.connection_id,
                    donor_stream: existing.stream,
                    buffered: existing.buffered,
                }),
                Some(existing) => {
                    let kind = existing.kind;
                    inner.pending.insert(cookie.to_string(), existing);
                    Err(RtspError::BadRequest(format!("tunnel cookie {cookie} already held by a {kind:?} half")))
                }
                None => {
                    inner.pending.insert(cookie.to_string(), PendingHalf { kind, connection_id, stream, buffered });
                    Ok(BindOutcome::Waiting)
                }
            },
            TunnelHalfKind::Post => match inner.pending.get(cookie) {
                Some(existing) if existing.kind == TunnelHalfKind::Get => {
                    inner
                        .donated
                        .insert(cookie.to_string(), DonatedHalf { donor_connection_id: connection_id, donor_stream: stream, buffered });
                    Ok(BindOutcome::Donated)
                }
                Some(existing) => {
                    let kind = existing.kind;
                    Err(RtspError::BadRequest(format!("tunnel cookie {cookie} already held by a {kind:?} half")))
                }
                None => {
                    inner.pending.insert(cookie.to_string(), PendingHalf { kind, connection_id, stream, buffered });
                    Ok(BindOutcome::Waiting)
                }
            },
        }
    }

    pub fn is_pending(&self, cookie: &str) -> bool {
        self.inner.lock().pending.contains_key(cookie)
    }

    /// Polled by a waiting GET half: collects a POST half's socket once it
    /// has donated, clearing both the donation and the GET's own pending
    /// placeholder.
    pub fn take_donor(&self, cookie: &str) -> Option<DonatedHalf> {
        let mut inner = self.inner.lock();
        let donor = inner.donated.remove(cookie)?;
        inner.pending.remove(cookie);
        Some(donor)
    }
}

/// Detect a tunneled request from its first line plus headers: `GET` or
/// `POST`, an HTTP version, `Accept: application/x-rtsp-tunnelled`, and an
/// `X-SessionCookie` header (spec §4.6).
pub fn detect_tunnel_half(method: &str, version: &str, accept: Option<&str>, cookie: Option<&str>) -> Option<(TunnelHalfKind, String)> {
    let kind = match method {
        "GET" => TunnelHalfKind::Get,
        "POST" => TunnelHalfKind::Post,
        _ => return None,
    };
    if !version.starts_with("HTTP/") {
        return None;
    }
    if accept.map(|a| a.eq_ignore_ascii_case("application/x-rtsp-tunnelled")) != Some(true) {
        return None;
    }
    let cookie = cookie?.to_string();
    Some((kind, cookie))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    /// A pair of connected loopback sockets, standing in for two real
    /// tunnel-half connections in these unit tests.
    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn first_half_waits() {
        let pairing = TunnelPairing::new();
        let (a, _b) = socket_pair();
        match pairing.bind("abc", TunnelHalfKind::Get, 1, a, Vec::new()).unwrap() {
            BindOutcome::Waiting => {}
            _ => panic!("expected Waiting"),
        }
        assert!(pairing.is_pending("abc"));
    }

    #[test]
    fn post_then_get_pairs_with_get_as_survivor() {
        let pairing = TunnelPairing::new();
        let (a, b) = socket_pair();
        pairing.bind("abc", TunnelHalfKind::Post, 1, a, b"body-so-far".to_vec()).unwrap();
        match pairing.bind("abc", TunnelHalfKind::Get, 2, b, Vec::new()).unwrap() {
            BindOutcome::Paired { donor_connection_id, buffered, .. } => {
                assert_eq!(donor_connection_id, 1);
                assert_eq!(buffered, b"body-so-far");
            }
            _ => panic!("expected Paired"),
        }
        assert!(!pairing.is_pending("abc"));
    }

    #[test]
    fn get_then_post_donates_for_get_to_collect() {
        let pairing = TunnelPairing::new();
        let (a, b) = socket_pair();
        pairing.bind("abc", TunnelHalfKind::Get, 1, a, Vec::new()).unwrap();
        match pairing.bind("abc", TunnelHalfKind::Post, 2, b, b"chunk".to_vec()).unwrap() {
            BindOutcome::Donated => {}
            _ => panic!("expected Donated"),
        }
        // The GET's own placeholder is still registered until it collects.
        assert!(pairing.is_pending("abc"));
        let donor = pairing.take_donor("abc").expect("donor available");
        assert_eq!(donor.donor_connection_id, 2);
        assert_eq!(donor.buffered, b"chunk");
        assert!(!pairing.is_pending("abc"));
        assert!(pairing.take_donor("abc").is_none());
    }

    #[test]
    fn same_direction_twice_is_rejected() {
        let pairing = TunnelPairing::new();
        let (a, b) = socket_pair();
        pairing.bind("abc", TunnelHalfKind::Get, 1, a, Vec::new()).unwrap();
        assert!(pairing.bind("abc", TunnelHalfKind::Get, 2, b, Vec::new()).is_err());
    }

    #[test]
    fn detects_tunnel_request() {
        let parsed = detect_tunnel_half("GET", "HTTP/1.0", Some("application/x-rtsp-tunnelled"), Some("abc"));
        assert!(matches!(parsed, Some((TunnelHalfKind::Get, cookie)) if cookie == "abc"));
    }

    #[test]
    fn non_tunnel_request_not_detected() {
        assert!(detect_tunnel_half("OPTIONS", "RTSP/1.0", None, None).is_none());
    }
}
