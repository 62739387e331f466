//! The VT emulator: the byte-oriented parser state machine and the xterm
//! command surface it drives against the screen, buffers, palette, and
//! tab stops.
//!
//! One input burst (`XtermEmulator::term_event`) drains a pty read, applies
//! every resulting mutation, and leaves a per-burst event-state record for
//! the emission layer to walk. UTF-8 sequences split across bursts are
//! carried in an eight-byte buffer; malformed input becomes U+FFFD.

pub mod charsets;
pub mod content;
pub mod decoder;
pub mod emulator;
pub mod events;
pub mod machine;
mod osc;

pub use content::ContentMap;
pub use decoder::Utf8Decoder;
pub use emulator::{EmulatorOptions, XtermEmulator};
pub use events::EventState;
pub use machine::{VtAction, VtMachine};
