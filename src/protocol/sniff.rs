//! Protocol sniffing.
//!
//! A connection's traffic is classified exactly once, on the first bytes
//! received: an HTTP/1.x request line routes to the relay, anything else
//! stays on the binary path. Later data is never reclassified.
//!
//! Too little data to tell is classified as binary. That is the documented
//! contract (the binary path is the default), not an oversight.

/// Classification of a connection's first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Looks like the start of an HTTP/1.x request
    Http,
    /// Everything else, including buffers too short to tell
    Binary,
}

const METHODS: [&[u8]; 7] = [
    b"GET", b"POST", b"PUT", b"DELETE", b"HEAD", b"OPTIONS", b"PATCH",
];

/// Classify an initial byte chunk as HTTP or binary.
///
/// Returns [`Protocol::Http`] iff the buffer starts with
/// `METHOD SP target SP "HTTP/" digit "." digit` for a known HTTP/1.x
/// method, where `target` is at least one non-whitespace byte.
pub fn classify(initial: &[u8]) -> Protocol {
    if METHODS.iter().any(|&m| matches_request_line(initial, m)) {
        Protocol::Http
    } else {
        Protocol::Binary
    }
}

fn matches_request_line(buf: &[u8], method: &[u8]) -> bool {
    let Some(rest) = buf.strip_prefix(method) else {
        return false;
    };
    let Some(rest) = rest.strip_prefix(b" ") else {
        return false;
    };

    // \S+ request target
    let target_len = rest
        .iter()
        .take_while(|b| !b.is_ascii_whitespace())
        .count();
    if target_len == 0 {
        return false;
    }
    let Some(rest) = rest[target_len..].strip_prefix(b" ") else {
        return false;
    };

    let Some(rest) = rest.strip_prefix(b"HTTP/") else {
        return false;
    };
    matches!(rest, [major, b'.', minor, ..] if major.is_ascii_digit() && minor.is_ascii_digit())
}
