//! Frame envelope and the two transport framings.
//!
//! Raw framing: 8-byte little-endian header (command, payload length), body,
//! zero padding out to four bytes. The parser discards padding after
//! consuming the payload. Term framing: whole raw frames base64-encoded and
//! wrapped in `OSC 512 ; ... ST` envelopes of 1024 bytes, with junk between
//! envelopes ignored and 7-bit ESC-prefixed C1 forms accepted.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;

use crate::BODY_MAX_LENGTH;
use crate::error::WireError;

const HEADER_SIZE: usize = 8;

const ESC: u8 = 0x1b;
const OSC: u8 = 0x9d;
const ST: u8 = 0x9c;
const BEL: u8 = 0x07;

/// `OSC 512 ;` after C1 promotion.
const DATA_PREFIX: [u8; 5] = [OSC, b'5', b'1', b'2', b';'];
/// 7-bit envelope pieces used on the wire.
const DATA_PREFIX7: &[u8; 6] = b"\x1b]512;";
const ST7: &[u8; 2] = b"\x1b\\";

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u32,
    pub payload: Vec<u8>,
}

/// Build the wire bytes of one frame: header, payload, padding.
pub fn encode_frame(command: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len() + 3);
    out.extend_from_slice(&command.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

/// Transport framing installed on a connection after the handshake.
pub trait Framing: Send {
    /// Consume inbound bytes, appending every completed frame to `out`.
    fn feed(&mut self, input: &[u8], out: &mut Vec<Frame>) -> Result<(), WireError>;

    /// Wrap one already-encoded frame for the wire.
    fn wrap(&self, frame: &[u8], out: &mut Vec<u8>);

    fn reset(&mut self);
}

/// Length-prefixed framing.
#[derive(Debug, Default)]
pub struct RawFraming {
    header: Vec<u8>,
    command: u32,
    payload_len: usize,
    /// Payload length padded out to four bytes.
    padded_len: usize,
    body: Vec<u8>,
    have_header: bool,
}

impl RawFraming {
    pub fn new() -> Self {
        RawFraming::default()
    }
}

impl Framing for RawFraming {
    fn feed(&mut self, input: &[u8], out: &mut Vec<Frame>) -> Result<(), WireError> {
        let mut i = 0usize;

        while i < input.len() {
            if !self.have_header {
                let need = HEADER_SIZE - self.header.len();
                let take = need.min(input.len() - i);
                self.header.extend_from_slice(&input[i..i + take]);
                i += take;

                if self.header.len() < HEADER_SIZE {
                    return Ok(());
                }

                self.command = u32::from_le_bytes(self.header[0..4].try_into().unwrap());
                self.payload_len =
                    u32::from_le_bytes(self.header[4..8].try_into().unwrap()) as usize;
                self.padded_len = self.payload_len.div_ceil(4) * 4;

                if self.padded_len > BODY_MAX_LENGTH {
                    return Err(WireError::BodyTooLong(self.padded_len));
                }

                self.header.clear();
                self.body.clear();
                self.have_header = true;
            }

            let need = self.padded_len - self.body.len();
            let take = need.min(input.len() - i);
            self.body.extend_from_slice(&input[i..i + take]);
            i += take;

            if self.body.len() == self.padded_len {
                self.body.truncate(self.payload_len);
                out.push(Frame {
                    command: self.command,
                    payload: std::mem::take(&mut self.body),
                });
                self.have_header = false;
            }
        }
        Ok(())
    }

    fn wrap(&self, frame: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(frame);
    }

    fn reset(&mut self) {
        self.header.clear();
        self.body.clear();
        self.have_header = false;
    }
}

/// OSC-embedded framing for streams that pass through a host terminal.
pub struct TermFraming {
    inner: RawFraming,
    acc: Vec<u8>,
    have_esc: bool,
    have_prefix: bool,
    prefix_pos: usize,
    /// Pending UTF-8 lead byte for 2-byte C1 encodings.
    pending: Option<u8>,
}

impl Default for TermFraming {
    fn default() -> Self {
        TermFraming {
            inner: RawFraming::new(),
            acc: Vec::new(),
            have_esc: false,
            have_prefix: false,
            prefix_pos: 0,
            pending: None,
        }
    }
}

impl TermFraming {
    pub fn new() -> Self {
        TermFraming::default()
    }

    fn fail(&self) -> Result<(), WireError> {
        // Junk between messages is ignored
        if !self.have_prefix && self.prefix_pos == 0 {
            Ok(())
        } else {
            Err(WireError::Malformed("garbage inside term envelope"))
        }
    }

    fn is_base64_byte(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b == b'+' || b == b'/'
    }

    fn process(&mut self, byte: u8, out: &mut Vec<Frame>) -> Result<(), WireError> {
        let mut c = byte;

        // Two-byte UTF-8 encodings of the C1 controls
        if let Some(lead) = self.pending.take() {
            if lead == 0xc2 && (0x80..0xc0).contains(&c) {
                // decoded codepoint is c itself
            } else {
                return self.fail();
            }
        } else if c >= 0x80 {
            if c == 0xc2 {
                self.pending = Some(c);
                return Ok(());
            }
            if c < 0xa0 {
                // bare C1 byte, accept as-is
            } else {
                return self.fail();
            }
        }

        // Promote 7-bit escape forms to 8-bit controls
        if c == ESC {
            if self.have_esc {
                let r = self.fail();
                self.have_esc = false;
                return r;
            }
            self.have_esc = true;
            return Ok(());
        }
        if self.have_esc {
            self.have_esc = false;
            if c == OSC - 0x40 {
                c = OSC;
            } else if c == ST - 0x40 {
                c = ST;
            } else {
                return self.fail();
            }
        }

        if !self.have_prefix {
            if c != DATA_PREFIX[self.prefix_pos] {
                let r = self.fail();
                self.prefix_pos = 0;
                return r;
            }
            self.prefix_pos += 1;
            if self.prefix_pos == DATA_PREFIX.len() {
                self.have_prefix = true;
                self.prefix_pos = 0;
            }
        } else if c == ST || c == BEL {
            let decoded = STANDARD_NO_PAD
                .decode(&self.acc)
                .map_err(|_| WireError::BadBase64)?;
            self.have_prefix = false;
            self.acc.clear();
            self.inner.feed(&decoded, out)?;
        } else if !Self::is_base64_byte(c) || self.acc.len() >= BODY_MAX_LENGTH {
            return self.fail();
        } else {
            self.acc.push(c);
        }

        Ok(())
    }
}

impl Framing for TermFraming {
    fn feed(&mut self, input: &[u8], out: &mut Vec<Frame>) -> Result<(), WireError> {
        for &b in input {
            self.process(b, out)?;
        }
        Ok(())
    }

    fn wrap(&self, frame: &[u8], out: &mut Vec<u8>) {
        let payload = crate::TERM_PAYLOADSIZE;
        let mut rest = frame;

        while !rest.is_empty() {
            let take = rest.len().min(payload);
            out.extend_from_slice(DATA_PREFIX7);
            out.extend_from_slice(STANDARD_NO_PAD.encode(&rest[..take]).as_bytes());
            out.extend_from_slice(ST7);
            rest = &rest[take..];
        }
    }

    fn reset(&mut self) {
        self.inner.reset();
        self.acc.clear();
        self.have_esc = false;
        self.have_prefix = false;
        self.prefix_pos = 0;
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_little_endian_and_padded() {
        let f = encode_frame(5, b"abcde");
        assert_eq!(&f[0..4], &[5, 0, 0, 0]);
        assert_eq!(&f[4..8], &[5, 0, 0, 0]);
        assert_eq!(&f[8..13], b"abcde");
        assert_eq!(f.len(), 16);
        assert_eq!(&f[13..], &[0, 0, 0]);
    }

    #[test]
    fn raw_round_trip_single() {
        let mut m = RawFraming::new();
        let mut out = Vec::new();
        m.feed(&encode_frame(6, b""), &mut out).unwrap();
        m.feed(&encode_frame(57, b"input bytes"), &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Frame { command: 6, payload: vec![] });
        assert_eq!(out[1].command, 57);
        assert_eq!(out[1].payload, b"input bytes");
    }

    #[test]
    fn raw_reassembles_across_arbitrary_splits() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_frame(1, b"hello"));
        wire.extend_from_slice(&encode_frame(2, b"xyzzy123"));
        wire.extend_from_slice(&encode_frame(3, b""));

        for chunk in 1..wire.len() {
            let mut m = RawFraming::new();
            let mut out = Vec::new();
            for piece in wire.chunks(chunk) {
                m.feed(piece, &mut out).unwrap();
            }
            assert_eq!(out.len(), 3, "chunk size {chunk}");
            assert_eq!(out[0].payload, b"hello");
            assert_eq!(out[1].payload, b"xyzzy123");
            assert!(out[2].payload.is_empty());
        }
    }

    #[test]
    fn raw_rejects_oversize_body() {
        let mut m = RawFraming::new();
        let mut hdr = Vec::new();
        hdr.extend_from_slice(&1u32.to_le_bytes());
        hdr.extend_from_slice(&(BODY_MAX_LENGTH as u32 + 1).to_le_bytes());
        let mut out = Vec::new();
        assert!(matches!(
            m.feed(&hdr, &mut out),
            Err(WireError::BodyTooLong(_))
        ));
    }

    #[test]
    fn term_wrap_produces_fixed_size_envelopes() {
        let m = TermFraming::new();
        let frame = encode_frame(105, &vec![0x55u8; 2000]);
        let mut wire = Vec::new();
        m.wrap(&frame, &mut wire);

        assert!(wire.starts_with(b"\x1b]512;"));
        // Full chunks are exactly TERM_CHUNKSIZE bytes
        assert_eq!(&wire[..6], b"\x1b]512;");
        assert_eq!(&wire[crate::TERM_CHUNKSIZE - 2..crate::TERM_CHUNKSIZE], b"\x1b\\");
    }

    #[test]
    fn term_round_trips_with_junk_between_envelopes() {
        let m = TermFraming::new();
        let frame = encode_frame(51, b"session.title\0hello\0");
        let mut wire = Vec::new();
        m.wrap(&frame, &mut wire);

        let mut stream = Vec::new();
        stream.extend_from_slice(b"some shell noise\r\n");
        stream.extend_from_slice(&wire);
        stream.extend_from_slice(b"more noise");

        let mut d = TermFraming::new();
        let mut out = Vec::new();
        d.feed(&stream, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].command, 51);
        assert_eq!(out[0].payload, b"session.title\0hello\0");
    }

    #[test]
    fn term_round_trips_large_frames_across_chunks() {
        let m = TermFraming::new();
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let frame = encode_frame(105, &payload);
        let mut wire = Vec::new();
        m.wrap(&frame, &mut wire);

        let mut d = TermFraming::new();
        let mut out = Vec::new();
        for piece in wire.chunks(7) {
            d.feed(piece, &mut out).unwrap();
        }
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, payload);
    }

    #[test]
    fn term_rejects_garbage_inside_envelope() {
        let mut d = TermFraming::new();
        let mut out = Vec::new();
        let mut stream = b"\x1b]512;AAAA".to_vec();
        stream.push(b'%');
        assert!(d.feed(&stream, &mut out).is_err());
    }

    #[test]
    fn term_disconnect_literal_decodes() {
        // The fixed 8-byte disconnect frame in its term encoding
        let mut d = TermFraming::new();
        let mut out = Vec::new();
        d.feed(b"\x1b]512;BQAAAAAAAAA\x07", &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].command, 5);
        assert!(out[0].payload.is_empty());
    }
}
