//! SDP generation and repair (RFC 4566 / RFC 8866, spec §6, §9).
//!
//! Two directions: [`generate_subscriber_sdp`] builds the stripped SDP
//! served to subscribers from a [`ReflectorSession`], and [`repair`] fixes
//! up a publisher's `ANNOUNCE` SDP so it always carries the required
//! `v=`/`s=`/`t=`/`o=` lines (spec §9: "SDP repair ... isolate it as a pure
//! function for testing").

use crate::reflector::ReflectorSession;

/// Deterministic SDP repair (spec §9): synthesize missing required lines
/// given the inputs that would otherwise vary (current time, user agent,
/// client address, session id) — all passed in explicitly so the function
/// stays pure and testable.
pub fn repair(
    lines: &[(char, String)],
    now_unix_secs: u64,
    client_addr: &str,
    session_id: &str,
) -> Vec<(char, String)> {
    let mut out = Vec::with_capacity(lines.len() + 4);
    let mut has = [false; 4]; // v, o, s, t in that index order

    for (tag, value) in lines {
        match tag {
            'v' => has[0] = true,
            'o' => has[1] = true,
            's' => has[2] = true,
            't' => has[3] = true,
            _ => {}
        }
        out.push((*tag, value.clone()));
    }

    if !has[0] {
        out.insert(0, ('v', "0".to_string()));
    }
    if !has[1] {
        let insert_at = out.iter().position(|(t, _)| *t == 'v').map(|i| i + 1).unwrap_or(0);
        out.insert(insert_at, ('o', format!("- {session_id} {now_unix_secs} IN IP4 {client_addr}")));
    }
    if !has[2] {
        out.push(('s', "Broadcast".to_string()));
    }
    if !has[3] {
        out.push(('t', "0 0".to_string()));
    }
    out
}

/// Strip `c=` connection-info lines and add `a=control:*`, producing the
/// SDP served to subscribers (spec §6: "rewrites SDPs served to subscribers
/// to strip connection info, add `a=control:*`").
pub fn strip_for_subscribers(lines: &[(char, String)]) -> Vec<(char, String)> {
    let mut out: Vec<(char, String)> = lines.iter().filter(|(tag, _)| *tag != 'c').cloned().collect();
    out.push(('a', "control:*".to_string()));
    out
}

/// Scale every `b=` bandwidth line's value by `percent` (1-100), per spec §6
/// `compatibility_adjust_sdp_media_bandwidth_percent`.
pub fn scale_bandwidth_lines(lines: &[(char, String)], percent: u8) -> Vec<(char, String)> {
    let percent = percent.clamp(1, 100) as u64;
    lines
        .iter()
        .map(|(tag, value)| {
            if *tag != 'b' {
                return (*tag, value.clone());
            }
            match value.split_once(':') {
                Some((kind, num)) => match num.parse::<u64>() {
                    Ok(n) => (*tag, format!("{kind}:{}", n.saturating_mul(percent) / 100)),
                    Err(_) => (*tag, value.clone()),
                },
                None => (*tag, value.clone()),
            }
        })
        .collect()
}

pub fn render(lines: &[(char, String)]) -> String {
    let mut s = String::new();
    for (tag, value) in lines {
        s.push_str(&format!("{tag}={value}\r\n"));
    }
    s
}

/// Build the SDP body returned by `DESCRIBE` for a pull-mode Reflector
/// Session: one `m=` line per stream, repaired and stripped for subscribers.
pub fn generate_subscriber_sdp(
    session: &ReflectorSession,
    host: &str,
    session_id: &str,
    session_version: &str,
    username: &str,
    session_name: &str,
    bandwidth_percent: u8,
) -> String {
    let mut lines = vec![
        ('v', "0".to_string()),
        ('o', format!("{username} {session_id} {session_version} IN IP4 {host}")),
        ('s', session_name.to_string()),
        ('t', "0 0".to_string()),
    ];

    for stream in &session.streams {
        lines.push(('m', format!("video {} RTP/AVP {}", stream.descriptor.dest_port, stream.descriptor.payload_type)));
        lines.push(('a', format!("rtpmap:{} {}/{}", stream.descriptor.payload_type, stream.descriptor.payload_name, stream.descriptor.timescale)));
        lines.push(('a', format!("control:trackID={}", stream.descriptor.track_id)));
    }

    let scaled = scale_bandwidth_lines(&lines, bandwidth_percent);
    let stripped = strip_for_subscribers(&scaled);
    render(&stripped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflector::source::{SetupDirection, SourceDescriptor, StreamDescriptor, TrackTransport};

    #[test]
    fn repair_synthesizes_missing_required_lines() {
        let lines = vec![('m', "video 0 RTP/AVP 96".to_string())];
        let repaired = repair(&lines, 1_000_000, "10.0.0.1", "42");
        let tags: Vec<char> = repaired.iter().map(|(t, _)| *t).collect();
        assert!(tags.contains(&'v'));
        assert!(tags.contains(&'o'));
        assert!(tags.contains(&'s'));
        assert!(tags.contains(&'t'));
    }

    #[test]
    fn repair_leaves_present_lines_untouched() {
        let lines = vec![
            ('v', "0".to_string()),
            ('o', "custom 1 1 IN IP4 1.2.3.4".to_string()),
            ('s', "My Session".to_string()),
            ('t', "0 0".to_string()),
        ];
        let repaired = repair(&lines, 1_000_000, "10.0.0.1", "42");
        assert_eq!(repaired, lines);
    }

    #[test]
    fn strip_removes_connection_lines_and_adds_control() {
        let lines = vec![('v', "0".to_string()), ('c', "IN IP4 10.0.0.1".to_string())];
        let stripped = strip_for_subscribers(&lines);
        assert!(!stripped.iter().any(|(t, _)| *t == 'c'));
        assert!(stripped.iter().any(|(t, v)| *t == 'a' && v == "control:*"));
    }

    #[test]
    fn scale_bandwidth_applies_percent() {
        let lines = vec![('b', "AS:1000".to_string())];
        let scaled = scale_bandwidth_lines(&lines, 50);
        assert_eq!(scaled[0].1, "AS:500");
    }

    #[test]
    fn generates_sdp_with_control_per_track() {
        let desc = StreamDescriptor {
            track_id: 1,
            source_addr: None,
            dest_addr: "239.1.1.1".parse().unwrap(),
            dest_port: 20000,
            ttl: 16,
            payload_type: 96,
            payload_name: "H264".into(),
            buffer_delay_secs: 3,
            transport: TrackTransport::Udp,
            direction: SetupDirection::Pull,
            timescale: 90000,
            setup_to_receive: false,
        };
        let session = ReflectorSession::setup("live/s1".into(), SourceDescriptor::permanent(vec![desc])).unwrap();
        let sdp = generate_subscriber_sdp(&session, "192.168.1.100", "1", "1", "-", "Broadcast", 100);
        assert!(sdp.contains("v=0\r\n"));
        assert!(sdp.contains("m=video 20000 RTP/AVP 96\r\n"));
        assert!(sdp.contains("a=control:trackID=1\r\n"));
        assert!(sdp.contains("a=control:*\r\n"));
        assert!(!sdp.contains("c=IN"));
    }
}
