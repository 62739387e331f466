//! The cursor: grid coordinates plus the derived cluster/byte position into
//! the row under it.
//!
//! After a cell write the row keeps `pos`/`ptr` consistent with its string,
//! so re-derivation (`CellRow::update_cursor`) is only needed after an
//! out-of-band row mutation (erase, resize, scroll).

use crate::flags::CursorFlags;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub x: i32,
    pub y: i32,
    flags: CursorFlags,
    pos: i32,
    ptr: usize,
    saved_pos: i32,
}

impl Cursor {
    pub fn new(x: i32) -> Self {
        Cursor {
            x,
            ..Default::default()
        }
    }

    pub fn flags(&self) -> CursorFlags {
        self.flags
    }

    pub fn past_end(&self) -> bool {
        self.flags.contains(CursorFlags::PAST_END)
    }

    pub fn on_double_left(&self) -> bool {
        self.flags.contains(CursorFlags::ON_DOUBLE_LEFT)
    }

    pub fn on_double_right(&self) -> bool {
        self.flags.contains(CursorFlags::ON_DOUBLE_RIGHT)
    }

    /// Cluster index within the row.
    pub fn pos(&self) -> i32 {
        self.pos
    }

    /// Byte offset within the row string.
    pub fn ptr(&self) -> usize {
        self.ptr
    }

    /// Cluster index saved by the last `advance_pos`; combining codepoints
    /// merge into the cluster at this position.
    pub fn saved_pos(&self) -> i32 {
        self.saved_pos
    }

    /// Count of combining codepoints folded into the current cluster.
    pub fn subpos(&self) -> u8 {
        (self.flags.bits() & CursorFlags::SUBPOS_MASK.bits()) as u8
    }

    pub fn inc_subpos(&mut self) {
        self.flags = CursorFlags::from_bits_retain(self.flags.bits() + 1);
    }

    /// Reset flags to `add` with a sub-position of one (the base character
    /// of a fresh cluster counts as the first write).
    pub fn set_subpos(&mut self, add: CursorFlags) {
        self.flags = CursorFlags::from_bits_retain(add.bits() | 1);
    }

    pub fn reset_flags(&mut self) {
        self.flags = CursorFlags::empty();
    }

    pub fn set_double_left(&mut self) {
        self.flags |= CursorFlags::ON_DOUBLE_LEFT;
    }

    pub fn set_double_right(&mut self) {
        self.flags |= CursorFlags::ON_DOUBLE_RIGHT;
    }

    pub fn set_past_end(&mut self, past_end: bool) {
        self.flags.set(CursorFlags::PAST_END, past_end);
    }

    /// Advance to the next cluster, remembering the old position for
    /// combining-codepoint merges.
    pub fn advance_pos(&mut self) {
        self.saved_pos = self.pos;
        self.pos += 1;
    }

    pub fn set_pos(&mut self, pos: i32) {
        self.pos = pos;
    }

    pub fn set_ptr(&mut self, ptr: usize) {
        self.ptr = ptr;
    }

    pub fn inc_pos_by(&mut self, n: i32) {
        self.pos += n;
    }

    pub fn inc_ptr_by(&mut self, n: usize) {
        self.ptr += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subpos_counts_in_low_byte() {
        let mut c = Cursor::new(0);
        c.set_subpos(CursorFlags::ON_DOUBLE_LEFT);
        assert_eq!(c.subpos(), 1);
        assert!(c.on_double_left());
        c.inc_subpos();
        c.inc_subpos();
        assert_eq!(c.subpos(), 3);
        assert!(c.on_double_left());
    }

    #[test]
    fn past_end_is_distinct_from_position() {
        let mut c = Cursor::new(79);
        assert!(!c.past_end());
        c.set_past_end(true);
        assert!(c.past_end());
        assert_eq!(c.x, 79);
        c.set_past_end(false);
        assert!(!c.past_end());
    }

    #[test]
    fn advance_saves_previous_cluster() {
        let mut c = Cursor::new(0);
        c.advance_pos();
        c.advance_pos();
        assert_eq!(c.pos(), 2);
        assert_eq!(c.saved_pos(), 1);
    }
}
