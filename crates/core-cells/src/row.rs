//! One logical line: the UTF-8 text, a run-length table of attribute
//! ranges, cluster/column counts, line flags, and a modification stamp.
//!
//! Range-table invariants, preserved by every operation here:
//! * ranges are strictly sorted by `start` and pairwise non-overlapping;
//! * no two adjacent ranges with equal `(flags, fg, bg, link)` (always
//!   coalesced);
//! * only non-default attributes are stored; gaps carry default attributes.
//!
//! Positions: `x` is a column index, `pos` a cluster index, `ptr` a byte
//! index into `str`. Double-width clusters occupy two columns and one
//! cluster; splitting one replaces it with two fill spaces.

use smallvec::SmallVec;

use crate::cursor::Cursor;
use crate::flags::{CellFlags, LineFlags};
use crate::{CellAttributes, INVALID_MODTIME, RegionId};

const FILL: char = ' ';

/// One run of equal cell attributes, inclusive cluster range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrRange {
    pub start: u32,
    pub end: u32,
    pub flags: CellFlags,
    pub fg: u32,
    pub bg: u32,
    pub link: RegionId,
}

impl AttrRange {
    fn point(pos: u32, a: &CellAttributes) -> Self {
        AttrRange {
            start: pos,
            end: pos,
            flags: a.flags,
            fg: a.fg,
            bg: a.bg,
            link: a.link,
        }
    }

    pub fn attrs(&self) -> CellAttributes {
        CellAttributes {
            flags: self.flags,
            fg: self.fg,
            bg: self.bg,
            link: self.link,
        }
    }

    fn attr_eq(&self, a: &CellAttributes) -> bool {
        self.flags == a.flags && self.fg == a.fg && self.bg == a.bg && self.link == a.link
    }

    fn same_attrs(&self, other: &AttrRange) -> bool {
        self.flags == other.flags
            && self.fg == other.fg
            && self.bg == other.bg
            && self.link == other.link
    }
}

#[derive(Debug, Clone, Default)]
pub struct CellRow {
    str: String,
    ranges: SmallVec<[AttrRange; 2]>,
    clusters: u32,
    columns: i32,
    pub flags: LineFlags,
    pub modtime: i32,
}

impl CellRow {
    pub fn new() -> Self {
        CellRow {
            modtime: INVALID_MODTIME,
            ..Default::default()
        }
    }

    /// Rebuild a row from wire parts; cluster and column counts are derived.
    pub fn restore(str: String, ranges: Vec<AttrRange>, flags: LineFlags, modtime: i32) -> Self {
        let clusters = core_text::segments(&str).count() as u32;
        let columns = core_text::columns(&str) as i32;
        CellRow {
            str,
            ranges: ranges.into(),
            clusters,
            columns,
            flags,
            modtime,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.str
    }

    pub fn columns(&self) -> i32 {
        self.columns
    }

    pub fn clusters(&self) -> u32 {
        self.clusters
    }

    pub fn is_empty(&self) -> bool {
        self.clusters == 0
    }

    pub fn ranges(&self) -> &[AttrRange] {
        &self.ranges
    }

    pub fn num_ranges(&self) -> u32 {
        self.ranges.len() as u32
    }

    /// Reset content, keeping the modification stamp.
    pub fn erase_all(&mut self) {
        self.str.clear();
        self.ranges.clear();
        self.clusters = 0;
        self.columns = 0;
        self.flags = LineFlags::empty();
    }

    pub fn clear(&mut self) {
        self.erase_all();
        self.modtime = INVALID_MODTIME;
    }

    /*
     * Range table helpers
     */

    fn coalesce_ranges(&mut self, loc: usize) {
        // Check the range after us
        if loc + 1 < self.ranges.len() {
            let (a, b) = (self.ranges[loc], self.ranges[loc + 1]);
            if a.end + 1 == b.start && a.same_attrs(&b) {
                self.ranges[loc].end = b.end;
                self.ranges.remove(loc + 1);
            }
        }
        // Check the range before us
        if loc > 0 && loc < self.ranges.len() {
            let (a, b) = (self.ranges[loc - 1], self.ranges[loc]);
            if a.end + 1 == b.start && a.same_attrs(&b) {
                self.ranges[loc - 1].end = b.end;
                self.ranges.remove(loc);
            }
        }
    }

    fn split_range_around(&mut self, loc: usize, pos: u32) {
        let mut second = self.ranges[loc];
        second.start = pos + 1;
        self.ranges[loc].end = pos - 1;
        self.ranges.insert(loc + 1, second);
    }

    /// Set the attributes of the single cluster at `pos`.
    fn update_ranges(&mut self, pos: u32, a: &CellAttributes) {
        let mut hit = None;
        for (i, r) in self.ranges.iter().enumerate() {
            if r.start > pos {
                hit = Some((i, false));
                break;
            }
            if r.end >= pos {
                hit = Some((i, true));
                break;
            }
        }

        match hit {
            None => {
                if !a.flags.is_empty() {
                    self.ranges.push(AttrRange::point(pos, a));
                    let last = self.ranges.len() - 1;
                    self.coalesce_ranges(last);
                }
            }
            Some((i, false)) => {
                // Between ranges
                if !a.flags.is_empty() {
                    self.ranges.insert(i, AttrRange::point(pos, a));
                    self.coalesce_ranges(i);
                }
            }
            Some((i, true)) => {
                let r = self.ranges[i];
                if r.attr_eq(a) {
                    return;
                }
                if r.start == r.end {
                    if !a.flags.is_empty() {
                        let rr = &mut self.ranges[i];
                        rr.flags = a.flags;
                        rr.fg = a.fg;
                        rr.bg = a.bg;
                        rr.link = a.link;
                    } else {
                        self.ranges.remove(i);
                    }
                    self.coalesce_ranges(i);
                } else if pos == r.start {
                    self.ranges[i].start += 1;
                    if !a.flags.is_empty() {
                        self.ranges.insert(i, AttrRange::point(pos, a));
                        self.coalesce_ranges(i);
                    }
                } else if pos == r.end {
                    self.ranges[i].end -= 1;
                    if !a.flags.is_empty() {
                        self.ranges.insert(i + 1, AttrRange::point(pos, a));
                        self.coalesce_ranges(i + 1);
                    }
                } else {
                    self.split_range_around(i, pos);
                    if !a.flags.is_empty() {
                        self.ranges.insert(i + 1, AttrRange::point(pos, a));
                    }
                }
            }
        }
    }

    /*
     * Cluster surgery
     */

    /// Replace the double-width cluster starting at byte `i` (cluster index
    /// `pos`) with two fill spaces. Returns the byte position of the first
    /// space.
    fn split_char(&mut self, i: usize, pos: u32) -> usize {
        // Remove character hint flags from the covering range
        if let Some(mut a) = self
            .ranges
            .iter()
            .find(|r| r.end >= pos)
            .map(AttrRange::attrs)
        {
            a.flags &= !CellFlags::PER_CHAR_FLAGS;
            self.update_ranges(pos, &a);
        }
        // Extend ranges: one cluster became two
        for r in &mut self.ranges {
            if r.start > pos {
                r.start += 1;
                r.end += 1;
            } else if r.end >= pos {
                r.end += 1;
            }
        }

        let mut k = i;
        core_text::next_cluster(&self.str, &mut k);
        self.str.replace_range(i..k, "  ");
        self.clusters += 1;
        i
    }

    /// Remove the cluster starting at byte `i` (cluster index `pos`).
    /// Caller accounts for the column change.
    fn remove_char(&mut self, i: usize, pos: u32) {
        let mut k = i;
        core_text::next_cluster(&self.str, &mut k);
        self.str.replace_range(i..k, "");
        self.clusters -= 1;

        let mut cr = 0usize;
        let mut j = 0usize;
        while j < self.ranges.len() {
            let r = &mut self.ranges[j];
            if r.start > pos {
                r.start -= 1;
                r.end -= 1;
                if pos != 0 && j != 0 && r.start == pos {
                    cr = j;
                }
                j += 1;
            } else if r.start == pos && r.end == pos {
                self.ranges.remove(j);
            } else if r.end >= pos {
                r.end -= 1;
                j += 1;
            } else {
                j += 1;
            }
        }

        if cr != 0 {
            self.coalesce_ranges(cr);
        }
    }

    /// Absorb the cell following the cluster at byte `i` so a double-width
    /// write can take its column.
    fn merge_chars(&mut self, i: usize, pos: u32) {
        let mut k = i;
        core_text::next_cluster(&self.str, &mut k);

        // Case 1: end of string, the write grows the row
        if k == self.str.len() {
            self.columns += 1;
            return;
        }
        let i2 = k;
        let pos2 = pos + 1;
        let mut k2 = i2;
        let width = core_text::width_next(&self.str, &mut k2);

        if width == 1 {
            // Case 2: remove the single-width neighbour
            self.remove_char(i2, pos2);
        } else {
            // Case 3: neighbour is double; its left half becomes a space
            if let Some(mut a) = self
                .ranges
                .iter()
                .find(|r| r.end >= pos2)
                .map(AttrRange::attrs)
            {
                a.flags &= !CellFlags::PER_CHAR_FLAGS;
                self.update_ranges(pos2, &a);
            }
            self.str.replace_range(i2..k2, " ");
        }
    }

    /*
     * Primary operations
     */

    /// Derive `pos`/`ptr` (and the double-width flags) from the cursor's
    /// column.
    pub fn update_cursor(&self, cursor: &mut Cursor) {
        cursor.reset_flags();
        let mut x = cursor.x;
        let mut pos: i32 = 0;
        let mut i = 0usize;
        let s = self.str.as_str();

        while i < s.len() {
            let mut k = i;
            let width = core_text::width_next(s, &mut k) as i32;

            if x < width {
                if x != 0 {
                    cursor.set_double_right();
                } else if width == 2 {
                    cursor.set_double_left();
                }
                cursor.set_pos(pos);
                cursor.set_ptr(i);
                return;
            }

            i = k;
            x -= width;
            pos += 1;
        }
        cursor.set_pos(pos + x);
        cursor.set_ptr(i);
    }

    /// Append `n` fill spaces.
    pub fn pad(&mut self, n: u32) {
        for _ in 0..n {
            self.str.push(FILL);
        }
        self.clusters += n;
        self.columns += n as i32;
    }

    /// Insert a zero-width (combining) codepoint into the cluster under the
    /// cursor; does not advance the position.
    pub fn combine(&mut self, cursor: &mut Cursor, a: &CellAttributes, c: char) {
        let mut buf = [0u8; 4];
        let enc = c.encode_utf8(&mut buf);
        self.str.insert_str(cursor.ptr(), enc);
        cursor.inc_ptr_by(enc.len());

        self.update_ranges(cursor.saved_pos() as u32, a);
    }

    /// Append one positive-width cluster; returns the new byte length.
    pub fn append(&mut self, a: &CellAttributes, c: char, width: i32) -> usize {
        self.str.push(c);

        let mut extended = false;
        if let Some(last) = self.ranges.last_mut() {
            if self.clusters.checked_sub(1) == Some(last.end) && last.attr_eq(a) {
                last.end += 1;
                extended = true;
            }
        }
        if !extended && !a.flags.is_empty() {
            self.ranges.push(AttrRange::point(self.clusters, a));
        }

        self.clusters += 1;
        self.columns += width;
        self.str.len()
    }

    /// Replace the cluster at the cursor, handling single/double width
    /// transitions. Returns the byte offset just past the written cluster.
    pub fn replace(&mut self, cursor: &mut Cursor, a: &CellAttributes, c: char, width: i32) -> usize {
        let mut i = cursor.ptr();
        let mut oldwidth = 1;

        if cursor.on_double_right() {
            // Break up a double-width cluster (unaligned)
            self.split_char(i, cursor.pos() as u32);
            // Move the cursor to the second space
            cursor.inc_pos_by(1);
            cursor.inc_ptr_by(1);
            i = cursor.ptr();
        } else if cursor.on_double_left() {
            oldwidth = 2;
        }

        if oldwidth != width {
            if oldwidth > width {
                // Break up a double-width cluster (aligned)
                self.split_char(i, cursor.pos() as u32);
            } else {
                self.merge_chars(i, cursor.pos() as u32);
            }
            i = cursor.ptr();
        }

        let mut k = i;
        core_text::next_cluster(&self.str, &mut k);

        let mut buf = [0u8; 4];
        let enc = c.encode_utf8(&mut buf);
        self.str.replace_range(i..k, enc);

        self.update_ranges(cursor.pos() as u32, a);

        cursor.ptr() + enc.len()
    }

    /// Insert a blank column at `x`, shifting the rest right.
    pub fn insert(&mut self, x: i32) {
        let mut cursor = Cursor::new(x);
        self.update_cursor(&mut cursor);

        let mut i = cursor.ptr();
        let mut pos = cursor.pos() as u32;

        if cursor.on_double_right() {
            // Break up a double-width cluster (unaligned)
            i = self.split_char(i, pos) + 1;
            pos += 1;
        }

        self.str.insert(i, FILL);
        self.columns += 1;
        self.clusters += 1;

        let mut j = 0usize;
        while j < self.ranges.len() {
            if self.ranges[j].start >= pos {
                self.ranges[j].start += 1;
                self.ranges[j].end += 1;
                j += 1;
            } else if self.ranges[j].end >= pos {
                self.ranges[j].end += 1;
                self.split_range_around(j, pos);
                j += 2;
            } else {
                j += 1;
            }
        }
    }

    /// Delete the column at `x`, shifting the rest left.
    pub fn remove(&mut self, x: i32) {
        let mut cursor = Cursor::new(x);
        self.update_cursor(&mut cursor);

        let mut i = cursor.ptr();
        let mut pos = cursor.pos() as u32;

        if cursor.on_double_left() || cursor.on_double_right() {
            i = self.split_char(i, pos);
            if cursor.on_double_right() {
                pos += 1;
                i += 1;
            }
        }

        self.remove_char(i, pos);
        self.columns -= 1;
    }

    /// Truncate to `x` columns.
    pub fn resize(&mut self, x: i32) {
        if self.columns <= x {
            return;
        }
        self.columns = x;

        let mut cursor = Cursor::new(x);
        self.update_cursor(&mut cursor);

        let mut startptr = cursor.ptr();
        let mut startpos = cursor.pos() as u32;

        if cursor.on_double_right() {
            startptr = self.split_char(startptr, startpos) + 1;
            startpos += 1;
        }

        self.str.truncate(startptr);
        self.clusters = startpos;

        let mut j = 0usize;
        while j < self.ranges.len() {
            if self.ranges[j].start >= startpos {
                self.ranges.remove(j);
            } else if self.ranges[j].end >= startpos {
                self.ranges[j].end = startpos - 1;
                j += 1;
            } else {
                j += 1;
            }
        }
    }

    /// Replace the span `[startx, endx)` with fill spaces, clearing
    /// attributes.
    pub fn erase(&mut self, startx: i32, endx: i32) {
        let endx = endx.min(self.columns);
        if startx >= endx {
            return;
        }

        let mut cursor = Cursor::new(startx);
        self.update_cursor(&mut cursor);
        let mut startptr = cursor.ptr();
        let mut startpos = cursor.pos() as u32;

        if cursor.on_double_right() {
            startptr = self.split_char(startptr, startpos) + 1;
            startpos += 1;
        }

        let mut cursor = Cursor::new(endx);
        self.update_cursor(&mut cursor);
        let mut endptr = cursor.ptr();
        let mut endpos = cursor.pos() as u32;

        if cursor.on_double_right() {
            endptr = self.split_char(endptr, endpos) + 1;
            endpos += 1;
        }

        let span = (endx - startx) as usize;
        let fill: String = std::iter::repeat_n(FILL, span).collect();
        self.str.replace_range(startptr..endptr, &fill);
        self.clusters = (self.clusters as i64 + span as i64 - (endpos - startpos) as i64) as u32;

        let mut j = 0usize;
        while j < self.ranges.len() {
            if self.ranges[j].start >= endpos {
                // Finished
                break;
            } else if self.ranges[j].start < startpos {
                if self.ranges[j].end >= endpos {
                    // Break range in two, and finished
                    let mut second = self.ranges[j];
                    second.start = endpos;
                    self.ranges[j].end = startpos - 1;
                    self.ranges.insert(j + 1, second);
                    break;
                } else if self.ranges[j].end >= startpos {
                    // Truncate range at end
                    self.ranges[j].end = startpos - 1;
                    j += 1;
                } else {
                    j += 1;
                }
            } else if self.ranges[j].end >= endpos {
                // Truncate range at start
                self.ranges[j].start = endpos;
                j += 1;
            } else {
                self.ranges.remove(j);
            }
        }
    }

    /// Erase `[startx, endx)` skipping cells whose range carries the
    /// `PROTECTED` flag.
    pub fn selective_erase(&mut self, startx: i32, endx: i32) {
        let endx = endx.min(self.columns);

        // Simple but inefficient implementation
        for x in startx..endx {
            let mut cursor = Cursor::new(x);
            self.update_cursor(&mut cursor);
            let pos = cursor.pos() as u32;
            let mut protect = false;

            for r in &self.ranges {
                if r.start > pos {
                    break;
                }
                if r.end >= pos {
                    protect = r.flags.contains(CellFlags::PROTECTED);
                    break;
                }
            }

            if !protect {
                self.erase(x, x + 1);
            }
        }
    }

    pub fn selective_erase_from(&mut self, startx: i32) {
        self.selective_erase(startx, self.columns);
    }

    /// Extract the clusters `[start_pos, end_pos)` as a string.
    pub fn substr(&self, start_pos: u32, end_pos: u32) -> String {
        let s = self.str.as_str();
        let mut i = 0usize;
        let mut pos = 0u32;

        while i < s.len() && pos < start_pos {
            core_text::next_cluster(s, &mut i);
            pos += 1;
        }
        let mut k = i;
        while k < s.len() && pos < end_pos {
            core_text::next_cluster(s, &mut k);
            pos += 1;
        }
        s[i..k].to_owned()
    }

    pub fn substr_from(&self, start_pos: u32) -> String {
        let s = self.str.as_str();
        let mut i = 0usize;
        let mut pos = 0u32;

        while i < s.len() && pos < start_pos {
            core_text::next_cluster(s, &mut i);
            pos += 1;
        }
        s[i..].to_owned()
    }
}
