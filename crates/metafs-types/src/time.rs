use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A POSIX-style timestamp with separate second and nanosecond fields.
///
/// Attribute export copies both fields verbatim; nothing in the cache ever
/// collapses them into a single nanosecond count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeSpec {
    pub sec: i64,
    pub nsec: u32,
}

impl TimeSpec {
    pub const fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Self {
                sec: d.as_secs() as i64,
                nsec: d.subsec_nanos(),
            },
            // Clock before the epoch; clamp rather than panic.
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timespec_fields() {
        let t = TimeSpec::new(1700000000, 123456789);
        assert_eq!(t.sec, 1700000000);
        assert_eq!(t.nsec, 123456789);
    }

    #[test]
    fn test_timespec_now_is_recent() {
        let t = TimeSpec::now();
        // Well after 2020-01-01.
        assert!(t.sec > 1_577_836_800);
        assert!(t.nsec < 1_000_000_000);
    }

    #[test]
    fn test_timespec_serde() {
        let t = TimeSpec::new(5, 7);
        let json = serde_json::to_string(&t).unwrap();
        let parsed: TimeSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, t);
    }
}
