//! Error types for the RTSP reflector library.

use std::fmt;

/// Errors that can occur across the reflector stack.
///
/// Variants map to the error kinds a role or pipeline stage can return;
/// [`RtspError::status_code`] and [`RtspError::status_text`] give the
/// canned RTSP response a pipeline sends when a role returns one of
/// these instead of a response of its own.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed RTSP, missing required headers, body too large, invalid base64.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Authentication required or failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Broadcast disallowed by policy, or path not in the allowed list.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Session id unknown, or broadcast not yet active after the wait limit.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate broadcast, invalid `.kill`, announce disabled, SDP too long.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Invalid SDP, or port outside the configured static range.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// `DESCRIBE` carried a `Session` header.
    #[error("header field not valid: {0}")]
    HeaderFieldNotValid(String),

    /// Server shutting down or refusing new work.
    #[error("server unavailable: {0}")]
    ServerUnavailable(String),

    /// Max connections or max bandwidth exceeded.
    #[error("not enough bandwidth: {0}")]
    NotEnoughBandwidth(String),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// No session with the given ID exists in the registry.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Method is not valid for the session's current role or state, e.g.
    /// `RECORD` on a subscriber session or `PLAY` on a publisher one.
    #[error("method not valid in this state: {0}")]
    MethodNotValidInState(String),

    /// `Transport` header named a mode the reflector doesn't support.
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// SETUP has not been completed for this track (no transport negotiated).
    #[error("transport not configured for session: {0}")]
    TransportNotConfigured(String),

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Server-side UDP port allocation exhausted the configured range.
    #[error("port range exhausted")]
    PortRangeExhausted,

    /// No Reflector Session registered at the requested name.
    #[error("mount not found: {0}")]
    MountNotFound(String),
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` named more bytes than the configured maximum.
    BodyTooLarge,
    /// The request body was not valid base64 (HTTP-tunnel POST body).
    InvalidBase64,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::BodyTooLarge => write!(f, "body too large"),
            Self::InvalidBase64 => write!(f, "invalid base64 body"),
        }
    }
}

impl RtspError {
    /// RTSP status code for the canned error response (RFC 2326 §7.1, §11).
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) | Self::Parse { .. } => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) | Self::MountNotFound(_) => 404,
            Self::HeaderFieldNotValid(_) => 405,
            Self::PreconditionFailed(_) => 412,
            Self::UnsupportedMediaType(_) | Self::TransportNotConfigured(_) => 415,
            Self::NotEnoughBandwidth(_) => 453,
            Self::SessionNotFound(_) => 454,
            Self::MethodNotValidInState(_) => 455,
            Self::UnsupportedTransport(_) => 461,
            Self::ServerUnavailable(_) | Self::NotStarted | Self::AlreadyRunning => 503,
            Self::PortRangeExhausted | Self::Io(_) | Self::Internal(_) => 500,
        }
    }

    /// Status line text that accompanies [`status_code`](Self::status_code).
    pub fn status_text(&self) -> &'static str {
        match self.status_code() {
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            412 => "Precondition Failed",
            415 => "Unsupported Media Type",
            453 => "Not Enough Bandwidth",
            454 => "Session Not Found",
            455 => "Method Not Valid in This State",
            461 => "Unsupported Transport",
            503 => "Service Unavailable",
            _ => "Internal Server Error",
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_broadcast_maps_to_412() {
        let e = RtspError::PreconditionFailed("duplicate broadcast".into());
        assert_eq!(e.status_code(), 412);
    }

    #[test]
    fn not_enough_bandwidth_maps_to_453() {
        let e = RtspError::NotEnoughBandwidth("max connections reached".into());
        assert_eq!(e.status_code(), 453);
        assert_eq!(e.status_text(), "Not Enough Bandwidth");
    }

    #[test]
    fn session_not_found_maps_to_454() {
        assert_eq!(RtspError::SessionNotFound("x".into()).status_code(), 454);
    }

    #[test]
    fn method_not_valid_in_state_maps_to_455() {
        assert_eq!(RtspError::MethodNotValidInState("x".into()).status_code(), 455);
    }

    #[test]
    fn unsupported_transport_maps_to_461() {
        assert_eq!(RtspError::UnsupportedTransport("x".into()).status_code(), 461);
    }
}
