//! Wire-level error taxonomy. Every variant closes the offending connection
//! with a disconnect frame; none of them aborts the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame body of {0} bytes exceeds the limit")]
    BodyTooLong(usize),

    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    #[error("invalid base64 inside term envelope")]
    BadBase64,

    #[error("handshake failed: {0}")]
    Handshake(&'static str),

    #[error("handshake preamble exceeded {0} bytes")]
    HandshakeOverrun(usize),

    #[error("protocol version mismatch: peer speaks {0}")]
    VersionMismatch(u32),

    #[error("attribute line exceeds {0} bytes")]
    AttributeTooLong(usize),
}
