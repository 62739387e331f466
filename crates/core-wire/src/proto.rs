//! The closed command enum and status codes shared by both ends.
//!
//! Numeric assignments are stable wire contract; both sides are built from
//! this table. Link-level commands keep their historical low numbers (the
//! eight-byte disconnect and keepalive frames are recognized by exact bytes
//! in some embeddings).

/// Frame command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    // Link level
    ErrorResponse = 1,
    Acknowledge = 2,
    ThrottlePause = 3,
    ThrottleResume = 4,
    Disconnect = 5,
    Keepalive = 6,

    // Server object
    AnnounceServer = 16,
    RemoveServer = 17,
    GetServerAttribute = 18,
    SetServerAttribute = 19,
    RemoveServerAttribute = 20,

    // Connection object
    AnnounceConn = 32,
    RemoveConn = 33,
    GetConnAttribute = 34,
    SetConnAttribute = 35,
    RemoveConnAttribute = 36,

    // Terminal object and operations
    AnnounceTerm = 48,
    RemoveTerm = 49,
    GetTermAttribute = 50,
    SetTermAttribute = 51,
    RemoveTermAttribute = 52,
    CreateTerm = 53,
    DestroyTerm = 54,
    ResizeTerm = 55,
    ResizeBuffer = 56,
    SendInput = 57,
    MouseEvent = 58,
    ResetTerm = 59,
    GetRows = 60,
    GetRegion = 61,
    GetContent = 62,
    CreateRegion = 63,
    RemoveRegion = 64,

    // Tasks
    TaskStart = 80,
    TaskInput = 81,
    TaskOutput = 82,
    TaskCancel = 83,

    // Terminal output (server to client)
    BeginOutput = 96,
    EndOutput = 97,
    FlagsChanged = 98,
    BufferCapacity = 99,
    BufferLength = 100,
    BufferSwitched = 101,
    SizeChanged = 102,
    CursorMoved = 103,
    BellRang = 104,
    RowContent = 105,
    RegionUpdate = 106,
    DirectoryUpdate = 107,
    FileUpdate = 108,
    FileRemoved = 109,
    MouseMoved = 110,
}

impl Command {
    pub fn from_u32(v: u32) -> Option<Command> {
        use Command::*;
        Some(match v {
            1 => ErrorResponse,
            2 => Acknowledge,
            3 => ThrottlePause,
            4 => ThrottleResume,
            5 => Disconnect,
            6 => Keepalive,
            16 => AnnounceServer,
            17 => RemoveServer,
            18 => GetServerAttribute,
            19 => SetServerAttribute,
            20 => RemoveServerAttribute,
            32 => AnnounceConn,
            33 => RemoveConn,
            34 => GetConnAttribute,
            35 => SetConnAttribute,
            36 => RemoveConnAttribute,
            48 => AnnounceTerm,
            49 => RemoveTerm,
            50 => GetTermAttribute,
            51 => SetTermAttribute,
            52 => RemoveTermAttribute,
            53 => CreateTerm,
            54 => DestroyTerm,
            55 => ResizeTerm,
            56 => ResizeBuffer,
            57 => SendInput,
            58 => MouseEvent,
            59 => ResetTerm,
            60 => GetRows,
            61 => GetRegion,
            62 => GetContent,
            63 => CreateRegion,
            64 => RemoveRegion,
            80 => TaskStart,
            81 => TaskInput,
            82 => TaskOutput,
            83 => TaskCancel,
            96 => BeginOutput,
            97 => EndOutput,
            98 => FlagsChanged,
            99 => BufferCapacity,
            100 => BufferLength,
            101 => BufferSwitched,
            102 => SizeChanged,
            103 => CursorMoved,
            104 => BellRang,
            105 => RowContent,
            106 => RegionUpdate,
            107 => DirectoryUpdate,
            108 => FileUpdate,
            109 => FileRemoved,
            110 => MouseMoved,
            _ => return None,
        })
    }
}

/// Status codes carried in disconnect frames, error replies, and handshake
/// rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StatusCode {
    Ok = 0,
    Closed = 1,
    ProtocolError = 2,
    ProtocolMismatch = 3,
    DuplicateConn = 4,
    ServerShutdown = 5,
    IdleTimeout = 6,
    NotFound = 7,
    AlreadyExists = 8,
    ReadOnly = 9,
    CannotSave = 10,
    LimitExceeded = 11,
}

impl StatusCode {
    pub fn from_u32(v: u32) -> Option<StatusCode> {
        use StatusCode::*;
        Some(match v {
            0 => Ok,
            1 => Closed,
            2 => ProtocolError,
            3 => ProtocolMismatch,
            4 => DuplicateConn,
            5 => ServerShutdown,
            6 => IdleTimeout,
            7 => NotFound,
            8 => AlreadyExists,
            9 => ReadOnly,
            10 => CannotSave,
            11 => LimitExceeded,
        _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_level_numbers_are_pinned() {
        assert_eq!(Command::Disconnect as u32, 5);
        assert_eq!(Command::Keepalive as u32, 6);
    }

    #[test]
    fn round_trip_every_command() {
        for v in 0..=200u32 {
            if let Some(cmd) = Command::from_u32(v) {
                assert_eq!(cmd as u32, v);
            }
        }
        assert!(Command::from_u32(7).is_none());
        assert!(Command::from_u32(111).is_none());
    }
}
