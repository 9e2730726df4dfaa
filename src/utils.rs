//! Shared utility helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as integer milliseconds since epoch (§3: all timestamps
/// are stored this way).
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Current time as integer seconds since epoch (credential `expiresAt`
/// is seconds, per §3).
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Truncate a string to `max` chars, appending `…` if trimmed.
pub fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

/// MD5 hex digest, used to derive a Session id from the first user
/// message (§4.3). Not for anything security-sensitive — purely a
/// stable content-addressed identifier.
pub fn md5_hex(input: &str) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_strings() {
        assert_eq!(truncate_str("hi", 10), "hi");
    }

    #[test]
    fn truncate_trims_long_strings() {
        let s = "a".repeat(20);
        let t = truncate_str(&s, 5);
        assert_eq!(t, "aaaaa…");
    }

    #[test]
    fn md5_hex_is_stable_and_32_chars() {
        let a = md5_hex("hello");
        let b = md5_hex("hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, md5_hex("world"));
    }
}
