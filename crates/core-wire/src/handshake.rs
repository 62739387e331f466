//! The pre-framing handshake.
//!
//! Before any framed traffic, each end emits a human-readable line
//! `OSC 511 ; <role>;<version>;<uuid>;<nonce> ST`. The scanner tolerates up
//! to [`crate::CONNECT_HANDSHAKE_MAX`] bytes of junk ahead of the prefix
//! (motd banners, shell noise) and hands back any residual bytes that
//! followed the terminator so the installed framing can consume them.
//!
//! The responding side reuses the role field for its chosen protocol:
//! `raw`, `term`, `reject` (version field carries the status code), or the
//! fd-transfer variants `clientfd` / `serverfd`.

use crate::error::WireError;
use crate::ident::Id;
use crate::{CONNECT_HANDSHAKE_MAX, PROTOCOL_VERSION};

const ESC: u8 = 0x1b;
const OSC: u8 = 0x9d;
const ST: u8 = 0x9c;
const BEL: u8 = 0x07;

const PREFIX: [u8; 5] = [OSC, b'5', b'1', b'1', b';'];
const PREFIX7: &[u8] = b"\x1b]511;";

#[derive(Debug, PartialEq, Eq)]
pub enum ShakeResult {
    /// Keep feeding bytes.
    Ongoing,
    /// A full line was parsed; see `line()` and `residual`.
    Success,
}

/// Parsed hello or response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeLine {
    /// `server` / `client`, or the chosen protocol on a response.
    pub role: String,
    /// Protocol version; reject status code on a `reject` response.
    pub version: u32,
    pub id: Id,
    pub nonce: String,
}

#[derive(Debug, Clone, Copy, Default)]
enum ScanState {
    #[default]
    Junk,
    Prefix(usize),
    Line,
    Esc,
    PrefixEsc(usize),
}

#[derive(Debug, Default)]
pub struct Handshake {
    state: ScanState,
    junk: usize,
    buf: Vec<u8>,
    line: Option<HandshakeLine>,
    /// Bytes that arrived after the terminator.
    pub residual: Vec<u8>,
}

impl Handshake {
    pub fn new() -> Self {
        Handshake::default()
    }

    /// Compose the line announcing this end.
    pub fn hello(role: &str, id: Id, nonce: &str) -> String {
        format!("\x1b]511;{role};{PROTOCOL_VERSION};{id};{nonce}\x1b\\")
    }

    /// Compose a response choosing a protocol (or rejecting).
    pub fn response(protocol: &str, version: u32, id: Id, nonce: &str) -> String {
        format!("\x1b]511;{protocol};{version};{id};{nonce}\x1b\\")
    }

    pub fn line(&self) -> Option<&HandshakeLine> {
        self.line.as_ref()
    }

    pub fn reset(&mut self) {
        self.state = ScanState::Junk;
        self.junk = 0;
        self.buf.clear();
        self.line = None;
        self.residual.clear();
    }

    /// Feed inbound bytes. Success leaves unconsumed bytes in `residual`.
    pub fn process(&mut self, input: &[u8]) -> Result<ShakeResult, WireError> {
        for (i, &b) in input.iter().enumerate() {
            match self.state {
                ScanState::Junk => {
                    if b == PREFIX7[0] {
                        self.state = ScanState::PrefixEsc(1);
                    } else if b == PREFIX[0] {
                        self.state = ScanState::Prefix(1);
                    } else {
                        self.junk += 1;
                        if self.junk > CONNECT_HANDSHAKE_MAX {
                            return Err(WireError::HandshakeOverrun(CONNECT_HANDSHAKE_MAX));
                        }
                    }
                }
                ScanState::PrefixEsc(n) => {
                    if PREFIX7.get(n) == Some(&b) {
                        if n + 1 == PREFIX7.len() {
                            self.state = ScanState::Line;
                        } else {
                            self.state = ScanState::PrefixEsc(n + 1);
                        }
                    } else {
                        self.junk += n;
                        self.rescan(b)?;
                    }
                }
                ScanState::Prefix(n) => {
                    if PREFIX.get(n) == Some(&b) {
                        if n + 1 == PREFIX.len() {
                            self.state = ScanState::Line;
                        } else {
                            self.state = ScanState::Prefix(n + 1);
                        }
                    } else {
                        self.junk += n;
                        self.rescan(b)?;
                    }
                }
                ScanState::Line => match b {
                    BEL | ST | b'\n' => {
                        self.finish()?;
                        self.residual.extend_from_slice(&input[i + 1..]);
                        return Ok(ShakeResult::Success);
                    }
                    ESC => self.state = ScanState::Esc,
                    b'\r' => {}
                    _ => {
                        if self.buf.len() >= CONNECT_HANDSHAKE_MAX {
                            return Err(WireError::HandshakeOverrun(CONNECT_HANDSHAKE_MAX));
                        }
                        self.buf.push(b);
                    }
                },
                ScanState::Esc => {
                    if b == b'\\' {
                        self.finish()?;
                        self.residual.extend_from_slice(&input[i + 1..]);
                        return Ok(ShakeResult::Success);
                    }
                    return Err(WireError::Handshake("stray escape in handshake line"));
                }
            }
        }
        Ok(ShakeResult::Ongoing)
    }

    /// Re-dispatch a byte that broke a partial prefix match.
    fn rescan(&mut self, b: u8) -> Result<(), WireError> {
        if b == PREFIX7[0] {
            self.state = ScanState::PrefixEsc(1);
        } else if b == PREFIX[0] {
            self.state = ScanState::Prefix(1);
        } else {
            self.state = ScanState::Junk;
            self.junk += 1;
        }
        if self.junk > CONNECT_HANDSHAKE_MAX {
            return Err(WireError::HandshakeOverrun(CONNECT_HANDSHAKE_MAX));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), WireError> {
        let text = std::str::from_utf8(&self.buf)
            .map_err(|_| WireError::Handshake("handshake line is not UTF-8"))?;

        let mut fields = text.splitn(4, ';');
        let role = fields
            .next()
            .filter(|s| !s.is_empty())
            .ok_or(WireError::Handshake("missing role"))?
            .to_owned();
        let version: u32 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(WireError::Handshake("missing version"))?;
        let id: Id = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(WireError::Handshake("missing uuid"))?;
        let nonce = fields.next().unwrap_or_default().to_owned();

        self.line = Some(HandshakeLine {
            role,
            version,
            id,
            nonce,
        });
        self.state = ScanState::Junk;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(h: &mut Handshake, bytes: &[u8]) -> ShakeResult {
        h.process(bytes).unwrap()
    }

    #[test]
    fn hello_round_trips() {
        let id = Id::generate();
        let hello = Handshake::hello("server", id, "abc123");

        let mut h = Handshake::new();
        assert_eq!(feed(&mut h, hello.as_bytes()), ShakeResult::Success);
        let line = h.line().unwrap();
        assert_eq!(line.role, "server");
        assert_eq!(line.version, PROTOCOL_VERSION);
        assert_eq!(line.id, id);
        assert_eq!(line.nonce, "abc123");
        assert!(h.residual.is_empty());
    }

    #[test]
    fn junk_before_prefix_is_tolerated() {
        let id = Id::generate();
        let mut stream = b"Welcome to the machine\r\nlast login: yesterday\r\n".to_vec();
        stream.extend_from_slice(Handshake::response("raw", 1, id, "n").as_bytes());
        stream.extend_from_slice(b"RESIDUAL");

        let mut h = Handshake::new();
        assert_eq!(feed(&mut h, &stream), ShakeResult::Success);
        assert_eq!(h.line().unwrap().role, "raw");
        assert_eq!(h.residual, b"RESIDUAL");
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let id = Id::generate();
        let hello = Handshake::hello("client", id, "nonce");
        let mut h = Handshake::new();
        let mut done = false;
        for &b in hello.as_bytes() {
            if h.process(&[b]).unwrap() == ShakeResult::Success {
                done = true;
            }
        }
        assert!(done);
        assert_eq!(h.line().unwrap().role, "client");
    }

    #[test]
    fn excess_junk_fails() {
        let mut h = Handshake::new();
        let junk = vec![b'x'; CONNECT_HANDSHAKE_MAX + 1];
        assert!(h.process(&junk).is_err());
    }

    #[test]
    fn reject_carries_status_in_version_field() {
        let id = Id::generate();
        let line = Handshake::response("reject", 3, id, "");
        let mut h = Handshake::new();
        assert_eq!(feed(&mut h, line.as_bytes()), ShakeResult::Success);
        let line = h.line().unwrap();
        assert_eq!(line.role, "reject");
        assert_eq!(line.version, 3);
    }

    #[test]
    fn bel_terminator_accepted() {
        let id = Id::generate();
        let line = format!("\x1b]511;term;1;{id};n\x07framed-bytes-follow");
        let mut h = Handshake::new();
        assert_eq!(feed(&mut h, line.as_bytes()), ShakeResult::Success);
        assert_eq!(h.residual, b"framed-bytes-follow");
    }

    #[test]
    fn partial_prefix_counts_as_junk_and_rescans() {
        let id = Id::generate();
        let mut stream = b"\x1b]51x noise ".to_vec();
        stream.extend_from_slice(Handshake::hello("server", id, "n").as_bytes());
        let mut h = Handshake::new();
        assert_eq!(feed(&mut h, &stream), ShakeResult::Success);
        assert_eq!(h.line().unwrap().role, "server");
    }
}
