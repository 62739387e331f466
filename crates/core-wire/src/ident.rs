//! Global identifiers. Servers, terminals, connections, and tasks are named
//! by UUIDs; the 14-character compressed form appears in socket paths and
//! log lines where the dashed form is too wide.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Id(Uuid);

impl Id {
    pub const NIL: Id = Id(Uuid::nil());

    pub fn generate() -> Self {
        Id(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Id(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// 14-character compressed form: an 11-byte fold of the id, base64
    /// encoded with the non-filename-safe characters squashed.
    pub fn short(&self) -> String {
        let b = self.0.as_bytes();
        let mut hash = [0u8; 11];
        hash.copy_from_slice(&b[..11]);
        for i in 4..10 {
            hash[i] ^= b[i + 6];
        }

        let mut s = STANDARD_NO_PAD.encode(hash);
        s.truncate(14);
        s.chars()
            .map(|c| if c == '/' || c == '+' { 'a' } else { c })
            .collect()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    /// Accepts dashed canonical form or 32 bare hex digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_both_forms() {
        let dashed: Id = "6ba7b810-9dad-11d1-80b4-00c04fd430c8".parse().unwrap();
        let bare: Id = "6ba7b8109dad11d180b400c04fd430c8".parse().unwrap();
        assert_eq!(dashed, bare);
        assert_eq!(dashed.to_string(), "6ba7b810-9dad-11d1-80b4-00c04fd430c8");
    }

    #[test]
    fn short_form_is_fourteen_safe_chars() {
        let id = Id::generate();
        let s = id.short();
        assert_eq!(s.len(), 14);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn short_form_is_stable() {
        let id: Id = "6ba7b810-9dad-11d1-80b4-00c04fd430c8".parse().unwrap();
        assert_eq!(id.short(), id.short());
        assert_ne!(Id::generate().short(), id.short());
    }

    #[test]
    fn round_trips_bytes() {
        let id = Id::generate();
        let bytes = *id.as_bytes();
        assert_eq!(Id::from_bytes(bytes), id);
    }
}
