use std::net::SocketAddr;

/// Negotiated per-track transport (spec §3 `ClientSession.transport`,
/// RFC 2326 §12.39). Grounded on the teacher's `Transport`/`TransportHeader`,
/// extended with the interleaved-TCP variant the teacher explicitly left
/// unimplemented.
#[derive(Debug, Clone)]
pub enum NegotiatedTransport {
    Udp {
        client_rtp_port: u16,
        client_rtcp_port: u16,
        server_rtp_port: u16,
        server_rtcp_port: u16,
        client_addr: SocketAddr,
    },
    Interleaved {
        rtp_channel: u8,
        rtcp_channel: u8,
    },
}

/// Parsed `Transport` request-header value (RFC 2326 §12.39).
#[derive(Debug, Clone)]
pub enum RequestedTransport {
    Udp { client_rtp_port: u16, client_rtcp_port: u16 },
    Interleaved { rtp_channel: u8, rtcp_channel: u8 },
}

impl RequestedTransport {
    /// Parse the `Transport` header. Recognizes `client_port=RTP-RTCP` for
    /// UDP and `interleaved=RTP-RTCP` for TCP-interleaved (spec §6).
    pub fn parse(header: &str) -> Option<Self> {
        let is_tcp = header.contains("RTP/AVP/TCP") || header.contains("interleaved=");

        for part in header.split(';') {
            let part = part.trim();
            if is_tcp {
                if let Some(chans) = part.strip_prefix("interleaved=") {
                    let (a, b) = split_pair(chans)?;
                    return Some(RequestedTransport::Interleaved {
                        rtp_channel: a,
                        rtcp_channel: b,
                    });
                }
            } else if let Some(ports) = part.strip_prefix("client_port=") {
                let (a, b) = split_pair(ports)?;
                return Some(RequestedTransport::Udp {
                    client_rtp_port: a,
                    client_rtcp_port: b,
                });
            }
        }
        None
    }

    pub fn is_record_mode(header: &str) -> bool {
        header.contains("mode=record") || header.contains("mode=\"RECORD\"")
    }
}

fn split_pair<T: std::str::FromStr>(s: &str) -> Option<(T, T)> {
    let parts: Vec<&str> = s.split('-').collect();
    if parts.len() != 2 {
        return None;
    }
    let a = parts[0].parse().ok()?;
    let b = parts[1].parse().ok()?;
    Some((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_udp_client_port() {
        match RequestedTransport::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap() {
            RequestedTransport::Udp { client_rtp_port, client_rtcp_port } => {
                assert_eq!(client_rtp_port, 5000);
                assert_eq!(client_rtcp_port, 5001);
            }
            other => panic!("expected Udp, got {other:?}"),
        }
    }

    #[test]
    fn parse_interleaved_channels() {
        match RequestedTransport::parse("RTP/AVP/TCP;interleaved=0-1").unwrap() {
            RequestedTransport::Interleaved { rtp_channel, rtcp_channel } => {
                assert_eq!(rtp_channel, 0);
                assert_eq!(rtcp_channel, 1);
            }
            other => panic!("expected Interleaved, got {other:?}"),
        }
    }

    #[test]
    fn parse_missing_client_port_is_none() {
        assert!(RequestedTransport::parse("RTP/AVP;unicast").is_none());
    }

    #[test]
    fn detects_record_mode() {
        assert!(RequestedTransport::is_record_mode(
            "RTP/AVP;unicast;mode=record;client_port=6000-6001"
        ));
        assert!(!RequestedTransport::is_record_mode(
            "RTP/AVP;unicast;client_port=6000-6001"
        ));
    }
}
