use crate::error::{ParseErrorKind, RtspError};

/// A parsed RTSP request (RFC 2326 §6).
///
/// RTSP requests follow HTTP/1.1 syntax:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. The body (e.g. an
/// `ANNOUNCE` SDP payload, or a base64-encoded tunnel POST body) is parsed
/// separately from the header block: [`parse_headers`](Self::parse_headers)
/// consumes up to the blank line, and the caller reads exactly
/// `Content-Length` more bytes and attaches them with
/// [`with_body`](Self::with_body) — the pipeline cannot know how many body
/// bytes to read until it has parsed the headers.
#[derive(Debug, Clone)]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, DESCRIBE, ANNOUNCE, SETUP, PLAY, RECORD, ...).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:port/stream/track1`).
    pub uri: String,
    /// Protocol version (`RTSP/1.0`, or an `HTTP/1.x` line for tunnel halves).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Raw body bytes, if any (spec §6 `Content-Length`).
    pub body: Option<Vec<u8>>,
}

impl RtspRequest {
    /// Parse the request line and header block only (everything up to, and
    /// including, the blank line). Returns [`RtspError::Parse`] on malformed
    /// input.
    pub fn parse_headers(raw: &str) -> crate::error::Result<Self> {
        let mut lines = raw.lines();

        let request_line = lines.next().ok_or(RtspError::Parse {
            kind: ParseErrorKind::EmptyRequest,
        })?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidRequestLine,
            });
        }

        let method = parts[0].to_string();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let colon_pos = line.find(':').ok_or(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;
            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();
            headers.push((name, value));
        }

        Ok(RtspRequest { method, uri, version, headers, body: None })
    }

    /// Convenience for tests and simple callers: parse headers and, if a
    /// body follows the blank line in `raw` and a `Content-Length` header
    /// names its size, attach exactly that many bytes.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let header_end = raw.find("\r\n\r\n").map(|i| i + 4).or_else(|| raw.find("\n\n").map(|i| i + 2));
        let mut request = match header_end {
            Some(idx) => Self::parse_headers(&raw[..idx])?,
            None => Self::parse_headers(raw)?,
        };

        if let Some(idx) = header_end {
            let declared = request.content_length().unwrap_or(0);
            if declared > 0 {
                let body_bytes = raw.as_bytes()[idx..].to_vec();
                request.body = Some(body_bytes.into_iter().take(declared).collect());
            }
        }

        Ok(request)
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Declared body size from `Content-Length`, if present and valid.
    pub fn content_length(&self) -> Option<usize> {
        self.get_header("Content-Length").and_then(|v| v.parse().ok())
    }

    /// Body decoded as UTF-8 text (e.g. an `ANNOUNCE` SDP payload).
    pub fn body_text(&self) -> Option<&str> {
        self.body.as_deref().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Body decoded from base64 (HTTP-tunnel POST body, spec §4.6).
    pub fn body_base64_decoded(&self) -> crate::error::Result<Vec<u8>> {
        use base64::Engine;
        let body = self.body.as_deref().unwrap_or(&[]);
        base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(|_| RtspError::Parse { kind: ParseErrorKind::InvalidBase64 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options_request() {
        let raw = "OPTIONS rtsp://localhost:8554/test RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "OPTIONS");
        assert_eq!(req.uri, "rtsp://localhost:8554/test");
        assert_eq!(req.version, "RTSP/1.0");
        assert_eq!(req.cseq(), Some("1"));
        assert!(req.body.is_none());
    }

    #[test]
    fn parse_announce_with_sdp_body() {
        let sdp = "v=0\r\ns=test\r\n";
        let raw = format!(
            "ANNOUNCE rtsp://host/live/a.sdp RTSP/1.0\r\nCSeq: 1\r\nContent-Length: {}\r\n\r\n{}",
            sdp.len(),
            sdp
        );
        let req = RtspRequest::parse(&raw).unwrap();
        assert_eq!(req.method, "ANNOUNCE");
        assert_eq!(req.body_text(), Some(sdp));
    }

    #[test]
    fn parse_setup_with_transport() {
        let raw = "SETUP rtsp://localhost:8554/test/track1 RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP;unicast;client_port=8000-8001\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "SETUP");
        assert_eq!(req.cseq(), Some("3"));
        assert_eq!(req.get_header("Transport"), Some("RTP/AVP;unicast;client_port=8000-8001"));
    }

    #[test]
    fn parse_empty_request() {
        assert!(RtspRequest::parse("").is_err());
    }

    #[test]
    fn parse_invalid_request_line() {
        assert!(RtspRequest::parse("JUST_A_METHOD\r\n\r\n").is_err());
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let raw = "OPTIONS rtsp://localhost RTSP/1.0\r\ncseq: 42\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.get_header("CSeq"), Some("42"));
        assert_eq!(req.get_header("cseq"), Some("42"));
        assert_eq!(req.get_header("CSEQ"), Some("42"));
    }

    #[test]
    fn base64_tunnel_body_decodes() {
        let raw_rtsp = b"OPTIONS rtsp://host/s RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw_rtsp);
        let raw = format!(
            "POST /s RTSP/1.0\r\nContent-Length: {}\r\n\r\n{}",
            encoded.len(),
            encoded
        );
        let req = RtspRequest::parse(&raw).unwrap();
        assert_eq!(req.body_base64_decoded().unwrap(), raw_rtsp);
    }
}
