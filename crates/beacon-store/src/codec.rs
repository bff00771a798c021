//! Wire helpers specific to the store layout.
//!
//! Scalar encode/decode lives in `beacon_core::value`; this module adds the
//! persisted buffer-entry format: `"<millis>:<scalar>"` strings kept in
//! `buffer:*` lists for external consumers.

use beacon_core::TaggedValue;
use beacon_core::value::{decode_wire, encode_wire};

/// Render one buffer list entry.
pub fn format_buffer_entry(ts_ms: i64, value: &TaggedValue) -> String {
    format!("{ts_ms}:{}", encode_wire(value))
}

/// Parse a buffer list entry back into `(timestamp, value)`.
pub fn parse_buffer_entry(raw: &str) -> Option<(i64, TaggedValue)> {
    let (ts, rest) = raw.split_once(':')?;
    let ts_ms: i64 = ts.parse().ok()?;
    Some((ts_ms, decode_wire(rest)))
}

/// The `buffer:` namespace key for a series. Keys already namespaced stay
/// untouched.
pub fn buffer_key(key: &str) -> String {
    if key.starts_with("buffer:") {
        key.to_string()
    } else {
        format!("buffer:{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_entry_round_trip() {
        let entry = format_buffer_entry(1_700_000_000_000, &TaggedValue::Number(21.5));
        assert_eq!(entry, "1700000000000:21.5");
        let (ts, v) = parse_buffer_entry(&entry).unwrap();
        assert_eq!(ts, 1_700_000_000_000);
        assert_eq!(v, TaggedValue::Number(21.5));
    }

    #[test]
    fn buffer_entry_with_string_payload() {
        let entry = format_buffer_entry(5, &TaggedValue::Str("a:b".to_string()));
        let (ts, v) = parse_buffer_entry(&entry).unwrap();
        assert_eq!(ts, 5);
        assert_eq!(v, TaggedValue::Str("a:b".to_string()));
    }

    #[test]
    fn malformed_entries_are_none() {
        assert!(parse_buffer_entry("no-separator").is_none());
        assert!(parse_buffer_entry("abc:1").is_none());
    }

    #[test]
    fn buffer_key_is_idempotent() {
        assert_eq!(buffer_key("output:series"), "buffer:output:series");
        assert_eq!(buffer_key("buffer:series"), "buffer:series");
    }
}
