//! Attribute maps and the mutation rules the server enforces.
//!
//! Terminals, connections, and the server each carry a string key/value map
//! with dotted namespaces (`session.*`, `proc.*`, `user.*`, ...). Clients
//! and attribute scripts may not overwrite the identity keys; one encoded
//! key/value line is capped at 4 KiB. On the wire an attribute rides as
//! `key NUL value NUL`, with a bare `key NUL` encoding removal.

use std::collections::BTreeMap;

use crate::ATTRIBUTE_MAX_LENGTH;

pub type AttributeMap = BTreeMap<String, String>;

/// Keys the server owns; client writes to these are refused.
const RESTRICTED: &[&str] = &[
    "id",
    "machine-id",
    "started",
    "pid",
    "uid",
    "gid",
    "user",
    "host",
    "name",
    "flavor",
];

const RESTRICTED_PREFIXES: &[&str] = &["proc.", "owner.", "sender.", "server."];

pub fn is_restricted(key: &str) -> bool {
    RESTRICTED.contains(&key) || RESTRICTED_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Length check for one encoded attribute line.
pub fn fits(key: &str, value: &str) -> bool {
    key.len() + value.len() + 2 <= ATTRIBUTE_MAX_LENGTH
}

/// Encode a set as `key NUL value NUL`.
pub fn encode_pair(key: &str, value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + value.len() + 2);
    out.extend_from_slice(key.as_bytes());
    out.push(0);
    out.extend_from_slice(value.as_bytes());
    out.push(0);
    out
}

/// Encode a removal as `key NUL`.
pub fn encode_removal(key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 1);
    out.extend_from_slice(key.as_bytes());
    out.push(0);
    out
}

/// Decode a run of alternating NUL-terminated keys and values.
pub fn decode_pairs(mut body: &[u8]) -> Vec<(String, Option<String>)> {
    let mut out = Vec::new();

    while let Some(knul) = body.iter().position(|&b| b == 0) {
        let key = String::from_utf8_lossy(&body[..knul]).into_owned();
        body = &body[knul + 1..];

        match body.iter().position(|&b| b == 0) {
            Some(vnul) => {
                let value = String::from_utf8_lossy(&body[..vnul]).into_owned();
                body = &body[vnul + 1..];
                out.push((key, Some(value)));
            }
            None => {
                out.push((key, None));
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_keys_are_restricted() {
        assert!(is_restricted("id"));
        assert!(is_restricted("machine-id"));
        assert!(is_restricted("proc.rc"));
        assert!(is_restricted("server.host"));
        assert!(!is_restricted("session.title"));
        assert!(!is_restricted("user.note"));
    }

    #[test]
    fn pair_encoding_round_trips() {
        let mut body = encode_pair("session.title", "hello");
        body.extend_from_slice(&encode_removal("session.badge"));

        let decoded = decode_pairs(&body);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], ("session.title".into(), Some("hello".into())));
        assert_eq!(decoded[1], ("session.badge".into(), None));
    }

    #[test]
    fn length_cap_counts_both_halves() {
        let key = "k".repeat(2000);
        let value = "v".repeat(2094);
        assert!(fits(&key, &value));
        assert!(!fits(&key, &(value + "x")));
    }
}
