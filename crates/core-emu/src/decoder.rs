//! Incremental UTF-8 decoding for pty input.
//!
//! A read can end in the middle of a multi-byte sequence; up to seven
//! continuation bytes are retained and prepended to the next burst.
//! Malformed sequences decode to U+FFFD.

const CARRY_MAX: usize = 8;

#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Utf8Decoder::default()
    }

    pub fn reset(&mut self) {
        self.carry.clear();
    }

    pub fn has_carry(&self) -> bool {
        !self.carry.is_empty()
    }

    /// Decode `input` (prepending any carry), invoking `emit` per codepoint.
    pub fn feed(&mut self, input: &[u8], mut emit: impl FnMut(char)) {
        let owned: Vec<u8>;
        let mut bytes: &[u8] = if self.carry.is_empty() {
            input
        } else {
            let mut b = std::mem::take(&mut self.carry);
            b.extend_from_slice(input);
            owned = b;
            &owned
        };

        loop {
            match std::str::from_utf8(bytes) {
                Ok(s) => {
                    s.chars().for_each(&mut emit);
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    // SAFETY-free split: valid_up_to is a char boundary
                    let (ok, rest) = bytes.split_at(valid);
                    std::str::from_utf8(ok).unwrap().chars().for_each(&mut emit);

                    match e.error_len() {
                        Some(n) => {
                            emit('\u{FFFD}');
                            bytes = &rest[n..];
                        }
                        None => {
                            // Incomplete tail; carry it into the next burst
                            if rest.len() < CARRY_MAX {
                                self.carry = rest.to_vec();
                            } else {
                                emit('\u{FFFD}');
                            }
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(d: &mut Utf8Decoder, input: &[u8]) -> String {
        let mut out = String::new();
        d.feed(input, |c| out.push(c));
        out
    }

    #[test]
    fn ascii_passthrough() {
        let mut d = Utf8Decoder::new();
        assert_eq!(collect(&mut d, b"hello"), "hello");
    }

    #[test]
    fn split_multibyte_carries_across_bursts() {
        let mut d = Utf8Decoder::new();
        let bytes = "a\u{6F22}b".as_bytes();
        let mut out = String::new();
        for i in 0..bytes.len() {
            d.feed(&bytes[i..i + 1], |c| out.push(c));
        }
        assert_eq!(out, "a\u{6F22}b");
        assert!(!d.has_carry());
    }

    #[test]
    fn invalid_bytes_become_replacement() {
        let mut d = Utf8Decoder::new();
        assert_eq!(collect(&mut d, b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(collect(&mut d, b"\xc3\x28"), "\u{FFFD}(");
    }

    #[test]
    fn truncated_tail_is_not_emitted_until_complete() {
        let mut d = Utf8Decoder::new();
        let emoji = "\u{1F600}".as_bytes();
        assert_eq!(collect(&mut d, &emoji[..2]), "");
        assert!(d.has_carry());
        assert_eq!(collect(&mut d, &emoji[2..]), "\u{1F600}");
    }

    #[test]
    fn slicing_invariance() {
        let text = "x\u{00E9}\u{6F22}\u{1F600}y".repeat(50);
        let bytes = text.as_bytes();

        for chunk in [1, 2, 3, 5, 7, 64] {
            let mut d = Utf8Decoder::new();
            let mut out = String::new();
            for piece in bytes.chunks(chunk) {
                d.feed(piece, |c| out.push(c));
            }
            assert_eq!(out, text, "chunk size {chunk}");
        }
    }
}
