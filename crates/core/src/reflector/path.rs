//! Broadcast-name extraction from an RTSP request URI.
//!
//! Grounded on the teacher's `mount::extract_mount_path`, generalized to the
//! reflector's session-name rules: strip a single trailing `.sdp` suffix
//! (a path may legitimately end `.sdp.sdp`; only one is stripped — see the
//! open question in spec §9), recognize the `.kill` broadcast-kill suffix,
//! and strip a `/trackID=N` or `/trackN` suffix used by per-track requests.

/// Outcome of parsing a broadcast path out of a request URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastPath {
    /// Session name used as the Session Registry key (spec §3 `ReflectorSession.name`).
    pub name: String,
    /// True if the URI carried the `.kill` suffix (spec §4.5 ANNOUNCE handling).
    pub kill: bool,
}

/// Extract the broadcast path (and `.kill` flag) from a request URI.
///
/// `rtsp://host:8554/live/s1.sdp/trackID=1` → `live/s1.sdp`
/// `rtsp://host:8554/live/s1.sdp.kill`      → `live/s1.sdp`, kill=true
/// `*`                                       → name="" (caller rejects)
pub fn extract_broadcast_path(uri: &str) -> BroadcastPath {
    let mut path = if let Some(after) = uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))
    {
        match after.find('/') {
            Some(slash) => &after[slash + 1..],
            None => "",
        }
    } else {
        uri.trim_start_matches('/')
    };

    if let Some(pos) = path.rfind("/trackID=") {
        path = &path[..pos];
    } else if let Some(pos) = path.rfind("/track") {
        path = &path[..pos];
    }

    let kill = path.ends_with(".kill");
    let path = if kill {
        path.trim_end_matches(".kill")
    } else {
        path
    };

    BroadcastPath {
        name: strip_one_sdp_suffix(path).to_string(),
        kill,
    }
}

/// Strip a single trailing `.sdp` suffix, if present.
///
/// Only one suffix is stripped even if the path ends `.sdp.sdp` — this
/// preserves the source's observed behavior (spec §9 open question) rather
/// than guessing at a recursive-strip semantics.
pub fn strip_one_sdp_suffix(path: &str) -> &str {
    path.strip_suffix(".sdp").unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path() {
        let p = extract_broadcast_path("rtsp://host:8554/live/s1.sdp");
        assert_eq!(p.name, "live/s1");
        assert!(!p.kill);
    }

    #[test]
    fn path_with_track_id() {
        let p = extract_broadcast_path("rtsp://host:8554/live/s1.sdp/trackID=1");
        assert_eq!(p.name, "live/s1");
    }

    #[test]
    fn kill_suffix_detected() {
        let p = extract_broadcast_path("rtsp://host/live/s1.kill");
        assert_eq!(p.name, "live/s1");
        assert!(p.kill);
    }

    #[test]
    fn doubly_suffixed_path_strips_only_the_outer_sdp() {
        let p = extract_broadcast_path("rtsp://host/live/s1.sdp.sdp");
        assert_eq!(p.name, "live/s1.sdp");
    }

    #[test]
    fn strips_only_one_sdp_suffix() {
        assert_eq!(strip_one_sdp_suffix("live/s1.sdp.sdp"), "live/s1.sdp");
        assert_eq!(strip_one_sdp_suffix("live/s1.sdp"), "live/s1");
        assert_eq!(strip_one_sdp_suffix("live/s1"), "live/s1");
    }
}
