/// An RTSP response (RFC 2326 §7).
///
/// Serializes to the standard text format:
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// Uses a builder pattern — chain [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body), then call [`serialize`](Self::serialize).
/// `Content-Length` is computed automatically when a body is present.
#[must_use]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Server identification string included in every RTSP response
/// per RFC 2326 §12.36.
pub const SERVER_AGENT: &str = "rtsp-reflector/0.1";

impl RtspResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        RtspResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    /// 200 OK — success (RFC 2326 §7.1.1).
    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    /// 404 Not Found — the requested resource does not exist.
    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    /// 400 Bad Request — malformed or missing required header.
    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request")
    }

    /// 401 Unauthorized — broadcaster failed or lacks authentication.
    pub fn unauthorized() -> Self {
        Self::new(401, "Unauthorized")
    }

    /// 403 Forbidden — broadcast disallowed by policy.
    pub fn forbidden() -> Self {
        Self::new(403, "Forbidden")
    }

    /// 405 Method Not Allowed — used for `DESCRIBE` carrying a `Session` header.
    pub fn header_field_not_valid() -> Self {
        Self::new(405, "Method Not Allowed")
    }

    /// 454 Session Not Found — unknown `Session` header value.
    pub fn session_not_found() -> Self {
        Self::new(454, "Session Not Found")
    }

    /// 455 Method Not Valid in This State — e.g. `PLAY` before `SETUP`.
    pub fn method_not_valid_in_state() -> Self {
        Self::new(455, "Method Not Valid in This State")
    }

    /// 412 Precondition Failed — duplicate broadcast, invalid `.kill`.
    pub fn precondition_failed() -> Self {
        Self::new(412, "Precondition Failed")
    }

    /// 415 Unsupported Media Type — invalid SDP or out-of-range static port.
    pub fn unsupported_media_type() -> Self {
        Self::new(415, "Unsupported Media Type")
    }

    /// 453 Not Enough Bandwidth — max connections/bandwidth exceeded.
    pub fn not_enough_bandwidth() -> Self {
        Self::new(453, "Not Enough Bandwidth")
    }

    /// 461 Unsupported Transport — `Transport` header names an unsupported mode.
    pub fn unsupported_transport() -> Self {
        Self::new(461, "Unsupported Transport")
    }

    /// 503 Service Unavailable — server shutting down or refusing new work.
    pub fn service_unavailable() -> Self {
        Self::new(503, "Service Unavailable")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize to the RTSP text wire format.
    ///
    /// If a body is present, `Content-Length` is appended automatically
    /// (RFC 2326 §12.14).
    pub fn serialize(&self) -> String {
        let mut response = format!("RTSP/1.0 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            response.push_str(&format!("{}: {}\r\n", name, value));
        }

        if let Some(body) = &self.body {
            response.push_str(&format!("Content-Length: {}\r\n", body.len()));
            response.push_str("\r\n");
            response.push_str(body);
        } else {
            response.push_str("\r\n");
        }
        response
    }
}
