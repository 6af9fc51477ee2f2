//! Range-local key encoding
//!
//! Probes must never read or write user data. Each range owns a small
//! range-local keyspace, addressed by the range's start key but disjoint from
//! every user key:
//!
//! ```text
//! LOCAL_RANGE_PREFIX | start_key | suffix
//! ```
//!
//! Stores route range-local keys by their embedded start key (see [`addr`]).

/// Prefix of all range-local keys; stores reject user keys carrying it
pub const LOCAL_RANGE_PREFIX: &[u8] = b"\x01k";

/// Suffix identifying the probe key inside a range-local keyspace
pub const PROBE_SUFFIX: &[u8] = b"prbe";

/// Build the probe key of the range starting at `start_key`
pub fn range_probe_key(start_key: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(LOCAL_RANGE_PREFIX.len() + start_key.len() + PROBE_SUFFIX.len());
    key.extend_from_slice(LOCAL_RANGE_PREFIX);
    key.extend_from_slice(start_key);
    key.extend_from_slice(PROBE_SUFFIX);
    key
}

/// Whether `key` lives in a range-local keyspace
pub fn is_range_local(key: &[u8]) -> bool {
    key.starts_with(LOCAL_RANGE_PREFIX)
}

/// Address used to route `key` to its owning range
///
/// User keys route as themselves; range probe keys route by the embedded
/// start key.
pub fn addr(key: &[u8]) -> &[u8] {
    key.strip_prefix(LOCAL_RANGE_PREFIX)
        .and_then(|rest| rest.strip_suffix(PROBE_SUFFIX))
        .unwrap_or(key)
}
