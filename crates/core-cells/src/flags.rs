//! Flag words shared between the emulator and the wire protocol.
//!
//! Assignments are stable wire contract. `TermFlags` round-trips through
//! saved scrollback dumps; `CellFlags` rides in every attribute range.

use bitflags::bitflags;

bitflags! {
    /// Per-cell attribute flags (32-bit low half of the attribute word).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CellFlags: u32 {
        const FG            = 1;
        const FG_INDEX      = 1 << 1;
        const BG            = 1 << 2;
        const BG_INDEX      = 1 << 3;
        const BOLD          = 1 << 4;
        const FAINT         = 1 << 5;
        const ITALICS       = 1 << 6;
        const UNDERLINE     = 1 << 7;
        const DBL_UNDERLINE = 1 << 8;
        const BLINK         = 1 << 9;
        const FAST_BLINK    = 1 << 10;
        const INVERSE       = 1 << 11;
        const INVISIBLE     = 1 << 12;
        const STRIKETHROUGH = 1 << 13;
        const FRAMED        = 1 << 14;
        const ENCIRCLED     = 1 << 15;
        const OVERLINE      = 1 << 16;
        const ALT_FONT0     = 1 << 17;
        const ALT_FONT1     = 1 << 18;
        const ALT_FONT2     = 1 << 19;
        const FONT_MASK     = 7 << 17;
        /// Every SGR-controlled bit, cleared by SGR 0.
        const ALL           = 0xfffff;
        const PROTECTED     = 1 << 24;
        const HIGHLIGHTED   = 1 << 25;
        const PROMPT        = 1 << 26;
        const COMMAND       = 1 << 27;
        const HYPERLINK     = 1 << 28;
        const EMOJI_CHAR    = 1 << 30;
        const DBL_WIDTH_CHAR = 1 << 31;
        /// Hints that describe one character rather than the run.
        const PER_CHAR_FLAGS = 3 << 30;
    }
}

bitflags! {
    /// Per-line flags. The low byte is reserved for the buffer id on the
    /// wire; bits 16.. are reserved for client use.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LineFlags: u32 {
        const CONTINUATION  = 1 << 8;
        const DBL_WIDTH_LINE = 1 << 9;
        const DBL_TOP_LINE  = 1 << 10;
        const DBL_BOTTOM_LINE = 1 << 11;
        const DBL_LINE_MASK = 7 << 9;
        const SERVER_LINE_MASK = 0xff00;
    }
}

bitflags! {
    /// Cursor state flags. The low byte counts combining codepoints written
    /// into the current cluster (sub-position).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CursorFlags: u32 {
        const SUBPOS_MASK    = 0xff;
        const PAST_END       = 1 << 8;
        const ON_DOUBLE_LEFT = 1 << 9;
        const ON_DOUBLE_RIGHT = 1 << 10;
        const _ = !0;
    }
}

bitflags! {
    /// Region lifecycle and shell-integration flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RegionFlags: u32 {
        const HAS_START     = 1;
        const HAS_END       = 1 << 1;
        const DELETED       = 1 << 2;
        const OVERWRITTEN   = 1 << 3;
        const HAS_PROMPT    = 1 << 4;
        const HAS_COMMAND   = 1 << 5;
        const EMPTY_COMMAND = 1 << 6;
        const HAS_OUTPUT    = 1 << 7;
    }
}

bitflags! {
    /// Terminal mode flags (64-bit).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TermFlags: u64 {
        const ANSI                  = 1;
        const NEW_LINE              = 1 << 1;
        const APP_CU_KEYS           = 1 << 2;
        const APP_SCREEN            = 1 << 3;
        const APP_KEYPAD            = 1 << 4;
        const REVERSE_VIDEO         = 1 << 5;
        const BLINK_SEEN            = 1 << 6;
        const HARD_SCROLL_LOCK      = 1 << 7;
        const SOFT_SCROLL_LOCK      = 1 << 8;
        const KEYBOARD_LOCK         = 1 << 9;
        const SEND_RECEIVE          = 1 << 10;
        const INSERT_MODE           = 1 << 11;
        const LEFT_RIGHT_MARGIN_MODE = 1 << 12;
        const ORIGIN_MODE           = 1 << 13;
        const SMOOTH_SCROLLING      = 1 << 14;
        const AUTOWRAP              = 1 << 15;
        const REVERSE_AUTOWRAP      = 1 << 16;
        const AUTOREPEAT            = 1 << 17;
        const ALLOW_COLUMN_CHANGE   = 1 << 18;
        const CONTROLS_8BIT         = 1 << 19;
        const BRACKETED_PASTE_MODE  = 1 << 20;
        const CURSOR_VISIBLE        = 1 << 21;

        const X10_MOUSE_MODE        = 1 << 32;
        const NORMAL_MOUSE_MODE     = 1 << 33;
        const HIGHLIGHT_MOUSE_MODE  = 1 << 34;
        const BUTTON_EVENT_MOUSE_MODE = 1 << 35;
        const ANY_EVENT_MOUSE_MODE  = 1 << 36;
        const MOUSE_MODE_MASK       = 31 << 32;
        const FOCUS_EVENT_MODE      = 1 << 37;
        const UTF8_EXT_MOUSE_MODE   = 1 << 38;
        const SGR_EXT_MOUSE_MODE    = 1 << 39;
        const URXVT_EXT_MOUSE_MODE  = 1 << 40;
        const EXT_MOUSE_MODE_MASK   = 7 << 38;
        const ALT_SCROLL_MOUSE_MODE = 1 << 41;

        const TITLE_MODE_SET_HEX    = 1 << 45;
        const TITLE_MODE_QUERY_HEX  = 1 << 46;
        const RATE_LIMITED          = 1 << 47;
    }
}

impl TermFlags {
    pub const DEFAULT: TermFlags = TermFlags::ANSI
        .union(TermFlags::SEND_RECEIVE)
        .union(TermFlags::AUTOWRAP)
        .union(TermFlags::AUTOREPEAT)
        .union(TermFlags::CURSOR_VISIBLE);
}

bitflags! {
    /// Arguments to the emulator reset entry point.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ResetFlags: u32 {
        const RESET_EMULATOR  = 1;
        const CLEAR_SCROLLBACK = 1 << 1;
        const CLEAR_SCREEN    = 1 << 2;
        const FORM_FEED       = 1 << 3;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sgr_bits_are_inside_all() {
        assert!(CellFlags::ALL.contains(CellFlags::BOLD));
        assert!(CellFlags::ALL.contains(CellFlags::ALT_FONT2));
        assert!(!CellFlags::ALL.contains(CellFlags::PROTECTED));
        assert!(!CellFlags::ALL.contains(CellFlags::HYPERLINK));
    }

    #[test]
    fn default_term_flags_match_wire_value() {
        assert_eq!(
            TermFlags::DEFAULT.bits(),
            1 | 1 << 10 | 1 << 15 | 1 << 17 | 1 << 21
        );
    }

    #[test]
    fn per_char_flags_cover_hints() {
        assert_eq!(
            CellFlags::PER_CHAR_FLAGS,
            CellFlags::EMOJI_CHAR | CellFlags::DBL_WIDTH_CHAR
        );
    }
}
