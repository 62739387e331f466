//! The client multiplex wire protocol: identifiers, the frame envelope, the
//! two transport framings, and the handshake that precedes all framed
//! traffic.
//!
//! Every frame is `u32_le command`, `u32_le payload_len`, payload, padded to
//! a multiple of four. `RawFraming` carries frames directly; `TermFraming`
//! wraps each frame in base64 inside an `OSC 512 ;` envelope so the stream
//! survives being embedded in a host terminal. Both implement [`Framing`] so
//! connection code never branches on which is installed after the handshake.

pub mod attr;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod ident;
pub mod proto;

pub use error::WireError;
pub use frame::{Frame, Framing, RawFraming, TermFraming, encode_frame};
pub use handshake::{Handshake, HandshakeLine, ShakeResult};
pub use ident::Id;
pub use proto::{Command, StatusCode};

/// Wire protocol version carried in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum frame body length.
pub const BODY_MAX_LENGTH: usize = 16 * 1024 * 1024;
/// Maximum length of one key/value attribute line.
pub const ATTRIBUTE_MAX_LENGTH: usize = 4096;
/// Maximum non-handshake bytes tolerated before a connection fails.
pub const CONNECT_HANDSHAKE_MAX: usize = 8192;

/// Default keepalive interval in milliseconds.
pub const KEEPALIVE_DEFAULT: u32 = 25_000;
/// Minimum negotiable keepalive interval in milliseconds.
pub const KEEPALIVE_MIN: u32 = 5_000;

/// Term-framing envelope size and the payload bytes that fit in one.
pub const TERM_CHUNKSIZE: usize = 1024;
pub const TERM_PAYLOADSIZE: usize = (TERM_CHUNKSIZE - 8) / 4 * 3;
