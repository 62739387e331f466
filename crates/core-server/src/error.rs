//! Server error taxonomy. Connection-scoped errors close that connection;
//! terminal-scoped errors close that terminal; nothing here aborts the
//! process.

use core_wire::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Wire(#[from] core_wire::WireError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no such object")]
    NotFound,

    #[error("object already exists")]
    AlreadyExists,

    #[error("attribute is read-only")]
    ReadOnly,

    #[error("connection limit reached")]
    LimitExceeded,

    #[error("terminal has been closed")]
    TermClosed,
}

impl ServerError {
    /// Status code carried in the typed error reply frame.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Wire(_) => StatusCode::ProtocolError,
            ServerError::Io(_) => StatusCode::Closed,
            ServerError::NotFound => StatusCode::NotFound,
            ServerError::AlreadyExists => StatusCode::AlreadyExists,
            ServerError::ReadOnly => StatusCode::ReadOnly,
            ServerError::LimitExceeded => StatusCode::LimitExceeded,
            ServerError::TermClosed => StatusCode::Closed,
        }
    }
}
