//! The per-terminal buffer engine: the row ring with scrollback, the region
//! catalog, the screen abstraction, and the ancillary palette / tab-stop
//! tables.
//!
//! All visible mutation flows through [`TermScreen`]; the ring and catalog
//! record which rows and regions changed so the emission layer can walk the
//! deltas after each input burst.

pub mod buffer;
pub mod palette;
pub mod rect;
pub mod region;
pub mod screen;
pub mod tabstops;

pub use buffer::TermBuffer;
pub use palette::TermPalette;
pub use rect::{Point, Rect, Size};
pub use region::{Region, RegionType};
pub use screen::{JobState, ShellVars, TermScreen};
pub use tabstops::TermTabStops;
