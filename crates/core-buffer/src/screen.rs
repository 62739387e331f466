//! The screen abstraction: cursor, margins, origin mode, and the
//! shell-integration job state machine.
//!
//! The screen does not own a buffer; every operation takes the active
//! `TermBuffer` so the emulator can flip between the normal and alternate
//! buffers without self-references. `offset` anchors the visible window at
//! `buffer.size() - height`.

use core_cells::{CellAttributes, Cursor, CursorFlags, LineFlags, RegionFlags, RegionId, RowIndex};

use crate::buffer::TermBuffer;
use crate::rect::{Point, Rect, Size};
use crate::region::{Region, RegionType};

/// Shell-integration variable slots captured from OSC 7 / OSC 1337.
#[derive(Debug, Clone, Default)]
pub struct ShellVars {
    pub path: String,
    pub user: String,
    pub host: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobState {
    #[default]
    None,
    Prompt,
    Command,
    Output,
}

/// Flags the emulator drains after screen operations.
#[derive(Debug, Default)]
pub struct ScreenDirty {
    pub size_changed: bool,
    pub buffer_switched: bool,
}

const MAX_CLUSTER_SIZE: u8 = 16;
pub const MAX_COMMAND_LINES: u32 = 5;

#[derive(Debug)]
pub struct TermScreen {
    offset: RowIndex,
    cursor: Cursor,
    bounds: Rect,
    margins: Rect,
    mouse_pos: Point,
    origin: Point,
    stay_within_margins: bool,

    job_state: JobState,
    job: Option<RegionId>,
    child: Option<RegionId>,

    pub dirty: ScreenDirty,
}

impl TermScreen {
    pub fn new(size: Size) -> Self {
        TermScreen {
            offset: 0,
            cursor: Cursor::default(),
            bounds: Rect::new(Point::default(), size),
            margins: Rect::new(Point::default(), size),
            mouse_pos: Point::default(),
            origin: Point::default(),
            stay_within_margins: false,
            job_state: JobState::None,
            job: None,
            child: None,
            dirty: ScreenDirty::default(),
        }
    }

    pub fn offset(&self) -> RowIndex {
        self.offset
    }

    pub fn width(&self) -> i32 {
        self.bounds.width()
    }

    pub fn height(&self) -> i32 {
        self.bounds.height()
    }

    pub fn size(&self) -> Size {
        self.bounds.size()
    }

    pub fn bounds(&self) -> &Rect {
        &self.bounds
    }

    pub fn margins(&self) -> &Rect {
        &self.margins
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn mouse_pos(&self) -> Point {
        self.mouse_pos
    }

    pub fn set_mouse_pos(&mut self, pos: Point) {
        self.mouse_pos = pos;
    }

    pub fn stay_within_margins(&self) -> bool {
        self.stay_within_margins
    }

    pub fn job_state(&self) -> JobState {
        self.job_state
    }

    pub fn set_cursor_past_end(&mut self, past_end: bool) {
        self.cursor.set_past_end(past_end);
    }

    pub fn cursor_at_left(&self) -> bool {
        self.cursor.x == self.margins.left()
    }

    pub fn cursor_at_top(&self) -> bool {
        self.cursor.y == self.margins.top()
    }

    pub fn cursor_at_bottom(&self) -> bool {
        self.cursor.y == self.margins.bottom()
    }

    pub fn move_to_end(&mut self, buf: &TermBuffer) {
        self.offset = buf.size() - self.bounds.height() as u64;
    }

    fn right_bound(row_flags: LineFlags, limit: i32) -> i32 {
        if row_flags.contains(LineFlags::DBL_WIDTH_LINE) {
            limit / 2
        } else {
            limit
        }
    }

    fn cursor_at_right(&self, buf: &TermBuffer, threshold: i32) -> bool {
        let flags = buf.const_row(self.offset + self.cursor.y as u64).flags;
        let d = Self::right_bound(flags, self.margins.right()) - self.cursor.x;
        d >= 0 && d < threshold
    }

    /// True when a printable of `width` columns cannot be placed without
    /// wrapping: the cursor is marked past-end, or a double would straddle
    /// the margin.
    pub fn cursor_past_end(&self, buf: &TermBuffer, width: i32) -> bool {
        self.cursor.past_end() || (width == 2 && self.cursor_at_right(buf, 1))
    }

    pub fn cursor_update(&mut self, buf: &TermBuffer) {
        buf.const_row(self.offset + self.cursor.y as u64)
            .update_cursor(&mut self.cursor);
    }

    pub fn row_and_cursor_update(&mut self, buf: &TermBuffer) {
        self.cursor_update(buf);
    }

    fn constrain_to_margins(&mut self, buf: &TermBuffer) -> bool {
        let mut changed = false;

        if self.cursor.x < self.margins.left() {
            self.cursor.x = self.margins.left();
            changed = true;
        } else if self.cursor.x > self.margins.right() {
            self.cursor.x = self.margins.right();
            changed = true;
        }

        if self.cursor.y < self.margins.top() {
            self.cursor.y = self.margins.top();
            changed = true;
        } else if self.cursor.y > self.margins.bottom() {
            self.cursor.y = self.margins.bottom();
            changed = true;
        }

        if changed {
            self.row_and_cursor_update(buf);
        }
        changed
    }

    /*
     * Geometry
     */

    pub fn set_width(&mut self, width: i32, buf: &TermBuffer) {
        let left = self.margins.left();
        let right = self.bounds.right() - self.margins.right();

        self.bounds.set_width(width);

        if left + right + 1 < width {
            self.margins.set_right(self.bounds.right() - right);
        } else {
            self.margins.set_left(0);
            self.margins.set_right(self.bounds.right());
        }

        self.constrain_to_margins(buf);
    }

    pub fn set_height(&mut self, height: i32, lines_added: i32, buf: &TermBuffer) {
        let top = self.margins.top();
        let bottom = self.bounds.bottom() - self.margins.bottom();

        // adjust cursor
        if height > self.bounds.height() {
            self.cursor.y += height - self.bounds.height() - lines_added;
        }

        self.bounds.set_height(height);

        if top + bottom + 1 < height {
            self.margins.set_bottom(self.bounds.bottom() - bottom);
        } else {
            self.margins.set_top(0);
            self.margins.set_bottom(self.bounds.bottom());
        }

        self.move_to_end(buf);

        if !self.constrain_to_margins(buf) {
            self.row_and_cursor_update(buf);
        }
    }

    /// Called after the emulator flips the active buffer.
    pub fn on_buffer_switched(&mut self, buf: &TermBuffer) {
        self.move_to_end(buf);
        self.row_and_cursor_update(buf);
        self.dirty.buffer_switched = true;
    }

    pub fn set_margins(&mut self, margins: Rect, buf: &TermBuffer) {
        if self.margins != margins {
            self.margins = margins;
            self.dirty.size_changed = true;
        }
        if self.stay_within_margins {
            self.origin = self.margins.top_left();
            self.constrain_to_margins(buf);
        }
    }

    pub fn set_stay_within_margins(&mut self, stay: bool, buf: &TermBuffer) {
        if self.stay_within_margins != stay {
            self.stay_within_margins = stay;

            if stay {
                self.origin = self.margins.top_left();
                self.constrain_to_margins(buf);
            } else {
                self.origin = Point::default();
            }
        }
    }

    /*
     * Rows
     */

    /// IL at the cursor: rotate a blank in, pushing the bottom margin row
    /// out. No-op outside the margins.
    pub fn insert_row(&mut self, buf: &mut TermBuffer) {
        if !self.margins.contains(self.cursor.x, self.cursor.y) {
            return;
        }

        buf.delete_row_and_insert_above(
            self.offset + self.margins.bottom() as u64,
            self.offset + self.cursor.y as u64,
        );
        self.row_and_cursor_update(buf);
    }

    /// DL at the cursor.
    pub fn delete_row(&mut self, buf: &mut TermBuffer) {
        if !self.margins.contains(self.cursor.x, self.cursor.y) {
            return;
        }

        buf.delete_row_and_insert_below(
            self.offset + self.cursor.y as u64,
            self.offset + self.margins.bottom() as u64,
        );
        self.row_and_cursor_update(buf);
    }

    /// Scroll the content up one row. With a default top margin this grows
    /// the ring (scrollback); inside a scroll region it rotates in place and
    /// evicts nothing.
    pub fn scroll_up(&mut self, buf: &mut TermBuffer) {
        let top = self.margins.top();

        if top == 0 {
            buf.insert_row(self.offset + self.margins.height() as u64);
            self.move_to_end(buf);
        } else {
            buf.delete_row_and_insert_below(
                self.offset + top as u64,
                self.offset + self.margins.bottom() as u64,
            );
        }

        self.row_and_cursor_update(buf);
    }

    pub fn scroll_down(&mut self, buf: &mut TermBuffer) {
        buf.delete_row_and_insert_above(
            self.offset + self.margins.bottom() as u64,
            self.offset + self.margins.top() as u64,
        );
        self.row_and_cursor_update(buf);
    }

    /// On a clear while a command is open, scroll the job's first row to the
    /// top of the screen instead of letting the clear erase history.
    pub fn scroll_to_job(&mut self, buf: &mut TermBuffer) {
        let Some(job) = self.job else { return };
        let Some(start) = buf.live_region(job).map(|r| r.start_row) else {
            return;
        };
        if self.margins.top() == 0 && self.margins.bottom() == self.bounds.bottom() {
            while self.offset < start {
                self.scroll_up(buf);
            }
        }
    }

    /*
     * Cursor movement
     */

    pub fn cursor_move_x(&mut self, relative: bool, x: i32, stay_within_margins: bool, buf: &TermBuffer) {
        let row = buf.const_row(self.offset + self.cursor.y as u64);
        let (left_bound, right_bound) = if (stay_within_margins
            && self.margins.contains(self.cursor.x, self.cursor.y))
            || self.stay_within_margins
        {
            (
                self.margins.left(),
                Self::right_bound(row.flags, self.margins.right()),
            )
        } else {
            (0, Self::right_bound(row.flags, self.bounds.right()))
        };

        if relative {
            self.cursor.x += x;
        } else {
            self.cursor.x = x + self.origin.x;
        }

        if self.cursor.x < left_bound {
            self.cursor.x = left_bound;
        } else if self.cursor.x > right_bound {
            self.cursor.x = right_bound;
        }

        row.update_cursor(&mut self.cursor);
    }

    pub fn cursor_move_y(&mut self, relative: bool, y: i32, stay_within_margins: bool, buf: &TermBuffer) {
        let (top_bound, bottom_bound) = if (stay_within_margins
            && self.margins.contains(self.cursor.x, self.cursor.y))
            || self.stay_within_margins
        {
            (self.margins.top(), self.margins.bottom())
        } else {
            (0, self.bounds.bottom())
        };

        if relative {
            self.cursor.y += y;
        } else {
            self.cursor.y = y + self.origin.y;
        }

        if self.cursor.y < top_bound {
            self.cursor.y = top_bound;
        } else if self.cursor.y > bottom_bound {
            self.cursor.y = bottom_bound;
        }

        let row = buf.const_row(self.offset + self.cursor.y as u64);
        if row.flags.contains(LineFlags::DBL_WIDTH_LINE) {
            let right_bound = self.margins.right() / 2;
            if self.cursor.x > right_bound {
                self.cursor.x = right_bound;
            }
        }

        row.update_cursor(&mut self.cursor);
    }

    /// Line feed: move down, clamping to the margins; the caller scrolls at
    /// the bottom. The landing row is stamped.
    pub fn cursor_move_down(&mut self, buf: &mut TermBuffer) {
        let (top_bound, bottom_bound) =
            if self.margins.contains(self.cursor.x, self.cursor.y) || self.stay_within_margins {
                (self.margins.top(), self.margins.bottom())
            } else {
                (0, self.bounds.bottom())
            };

        self.cursor.y += 1;

        if self.cursor.y < top_bound {
            self.cursor.y = top_bound;
        } else if self.cursor.y > bottom_bound {
            self.cursor.y = bottom_bound;
        }

        let idx = self.offset + self.cursor.y as u64;
        buf.touch_row(idx);
        let row = buf.const_row(idx);

        if row.flags.contains(LineFlags::DBL_WIDTH_LINE) {
            let right_bound = self.margins.right() / 2;
            if self.cursor.x > right_bound {
                self.cursor.x = right_bound;
            }
        }

        row.update_cursor(&mut self.cursor);
    }

    /// Advance by `dx` columns, stopping past-end at the right margin.
    pub fn cursor_advance(&mut self, mut dx: u32, buf: &TermBuffer) {
        let mut moved = false;

        while dx > 0 {
            if self.cursor_at_right(buf, 1) {
                self.cursor.set_past_end(true);
                break;
            }
            self.cursor_move_x(true, 1, true, buf);
            moved = true;
            dx -= 1;
        }

        if !moved {
            self.cursor_update(buf);
        }
    }

    /*
     * Cell writes
     */

    /// Fold a combining codepoint into the cluster under the cursor.
    pub fn combine_cell(&mut self, buf: &mut TermBuffer, a: &CellAttributes, c: char) {
        if self.cursor.subpos() < MAX_CLUSTER_SIZE {
            let idx = self.offset + self.cursor.y as u64;
            let row = buf.single_row_mut(idx);
            row.combine(&mut self.cursor, a, c);
            self.cursor.inc_subpos();
        }
    }

    /// Write one positive-width cluster base at the cursor and advance.
    pub fn write_cell(&mut self, buf: &mut TermBuffer, a: &CellAttributes, c: char, width: i32) {
        let x = self.cursor.x;
        let idx = self.offset + self.cursor.y as u64;

        let dbl_line;
        let next_width;
        {
            let row = buf.row_mut(idx);
            dbl_line = row.flags.contains(LineFlags::DBL_WIDTH_LINE);

            let nextptr = if row.columns() == x {
                row.append(a, c, width)
            } else if row.columns() > x {
                // Handles replacing singles with doubles and every partial
                // overlap of doubles; may move the cursor if a double split.
                row.replace(&mut self.cursor, a, c, width)
            } else {
                row.pad((x - row.columns()) as u32);
                row.append(a, c, width)
            };

            self.cursor.set_ptr(nextptr);
            next_width = core_text::width_at(row.as_str(), nextptr) as i32;
        }

        // Advance cursor
        let d = Self::right_bound(
            if dbl_line {
                LineFlags::DBL_WIDTH_LINE
            } else {
                LineFlags::empty()
            },
            self.margins.right(),
        ) - self.cursor.x;
        let at_right = d >= 0 && d < width;

        let mut flags = CursorFlags::empty();
        let w = if at_right {
            flags |= CursorFlags::PAST_END;
            width
        } else {
            self.cursor.x += width;
            self.cursor.advance_pos();
            next_width
        };

        if w == 2 {
            flags |= CursorFlags::ON_DOUBLE_LEFT;
        }

        self.cursor.set_subpos(flags);
    }

    /// ICH: open `count` blank columns at the cursor within the margins.
    pub fn insert_cells(&mut self, buf: &mut TermBuffer, mut count: i32) {
        if self.margins.contains(self.cursor.x, self.cursor.y) {
            let idx = self.offset + self.cursor.y as u64;
            let x = self.cursor.x;
            let m = self.margins.right();

            let row = buf.row_mut(idx);
            while count > 0 {
                if row.columns() > m {
                    row.remove(m);
                }
                if row.columns() > x {
                    row.insert(x);
                }
                count -= 1;
            }
            row.update_cursor(&mut self.cursor);
        }
    }

    /// DCH: close the column at the cursor, pulling in a blank at the right
    /// margin.
    pub fn delete_cell(&mut self, buf: &mut TermBuffer) {
        if self.margins.contains(self.cursor.x, self.cursor.y) {
            let idx = self.offset + self.cursor.y as u64;
            let x = self.cursor.x;
            let m = self.margins.right();

            let row = buf.row_mut(idx);
            if row.columns() > x {
                row.remove(x);
            }
            if row.columns() > m {
                row.insert(m);
            }
            row.update_cursor(&mut self.cursor);
        }
    }

    /*
     * Line flags
     */

    pub fn set_line_flags_at(&mut self, y: i32, flags: LineFlags, buf: &mut TermBuffer) {
        let idx = self.offset + y as u64;
        let margins_right = self.margins.right();
        let cursor_y = self.cursor.y;

        let row = buf.row_mut(idx);
        if row.flags != flags {
            row.flags = flags;

            if flags.contains(LineFlags::DBL_WIDTH_LINE) {
                let right_bound = margins_right / 2;
                if cursor_y == y && self.cursor.x > right_bound {
                    self.cursor.x = right_bound;
                }
                row.resize(right_bound);
            }

            if cursor_y == y {
                row.update_cursor(&mut self.cursor);
            }
        }
    }

    pub fn set_line_flags(&mut self, flags: LineFlags, buf: &mut TermBuffer) {
        self.set_line_flags_at(self.cursor.y, flags, buf);
    }

    pub fn reset_line(&mut self, y: i32, buf: &mut TermBuffer) {
        let idx = self.offset + y as u64;
        let row = buf.row_mut(idx);
        row.clear();

        if self.cursor.y == y {
            row.update_cursor(&mut self.cursor);
        }
    }

    pub fn reset_single_line(&mut self, y: i32, buf: &mut TermBuffer) {
        let idx = self.offset + y as u64;
        let row = buf.single_row_mut(idx);
        row.clear();

        if self.cursor.y == y {
            row.update_cursor(&mut self.cursor);
        }
    }

    /*
     * Shell integration regions
     */

    fn close_open_job(&mut self, buf: &mut TermBuffer) {
        if self.job_state != JobState::None {
            let row = self.offset + self.cursor.y as u64;
            let col = self.cursor.pos() as u32;

            if let Some(child) = self.child.take() {
                if buf.put_reference(child) {
                    buf.end_region(child, row, col);
                }
            }
            if let Some(job) = self.job.take() {
                if buf.put_reference(job) {
                    if let Some(r) = buf.live_region_mut(job) {
                        r.attributes.insert("rc".to_owned(), "-2".to_owned());
                    }
                    buf.end_region(job, row, col);
                }
            }
        }
    }

    /// OSC 133 A: close any open pair, then open a Job region with a Prompt
    /// region nested inside it.
    pub fn begin_prompt_region(&mut self, buf: &mut TermBuffer) {
        self.close_open_job(buf);

        let row = self.offset + self.cursor.y as u64;
        let col = self.cursor.pos() as u32;

        let mut job = Region::new(RegionType::Job);
        job.start_row = row;
        job.start_col = col;
        job.flags = RegionFlags::HAS_START;
        let job_id = buf.begin_region(job);
        buf.take_reference(job_id);

        let mut prompt = Region::with_parent(RegionType::Prompt, job_id);
        prompt.start_row = row;
        prompt.start_col = col;
        prompt.flags = RegionFlags::HAS_START;
        let child_id = buf.begin_region(prompt);
        buf.take_reference(child_id);

        self.job = Some(job_id);
        self.child = Some(child_id);
        self.job_state = JobState::Prompt;
    }

    /// OSC 133 B: close the prompt, open a Command region.
    pub fn begin_command_region(&mut self, buf: &mut TermBuffer) {
        let Some(job_id) = self.job else { return };
        if self.job_state != JobState::Prompt {
            return;
        }
        if buf.live_region(job_id).map(|r| r.refcount) == Some(1) {
            // The catalog already evicted the job
            return;
        }

        let row = self.offset + self.cursor.y as u64;
        let col = self.cursor.pos() as u32;

        if let Some(child) = self.child.take() {
            if buf.put_reference(child) {
                buf.end_region(child, row, col);

                if let Some(job) = buf.live_region_mut(job_id) {
                    job.flags |= RegionFlags::HAS_PROMPT;
                }
                buf.report_region(job_id);
            }
        }

        let mut command = Region::with_parent(RegionType::Command, job_id);
        command.start_row = row;
        command.start_col = col;
        command.flags = RegionFlags::HAS_START;
        let child_id = buf.begin_region(command);
        buf.take_reference(child_id);

        self.child = Some(child_id);
        self.job_state = JobState::Command;
    }

    /// OSC 133 C: close the command, capture its text plus context into the
    /// job attributes, open the Output region.
    pub fn begin_output_region(
        &mut self,
        buf: &mut TermBuffer,
        vars: &ShellVars,
        walltime: String,
    ) {
        let Some(job_id) = self.job else { return };
        if self.job_state != JobState::Command {
            return;
        }
        if buf.live_region(job_id).map(|r| r.refcount) == Some(1) {
            return;
        }

        let row = self.offset + self.cursor.y as u64;
        let col = self.cursor.pos() as u32;

        if let Some(child) = self.child.take() {
            if buf.put_reference(child) {
                buf.end_region(child, row, col);

                let command = region_text(buf, child, MAX_COMMAND_LINES);
                let empty = command.chars().all(|c| c == ' ' || c == '\n');

                if empty {
                    if let Some(r) = buf.live_region_mut(child) {
                        r.flags |= RegionFlags::EMPTY_COMMAND;
                    }
                }

                if let Some(job) = buf.live_region_mut(job_id) {
                    if empty {
                        job.flags |= RegionFlags::EMPTY_COMMAND;
                    }
                    job.flags |= RegionFlags::HAS_COMMAND;
                    job.attributes.insert("command".to_owned(), command);
                    job.attributes.insert("started".to_owned(), walltime);
                    job.attributes.insert("path".to_owned(), vars.path.clone());
                    job.attributes.insert("user".to_owned(), vars.user.clone());
                    job.attributes.insert("host".to_owned(), vars.host.clone());
                }
                buf.report_region(job_id);
            }
        }

        let mut output = Region::with_parent(RegionType::Output, job_id);
        output.start_row = row;
        output.start_col = col;
        output.flags = RegionFlags::HAS_START;
        let child_id = buf.begin_region(output);
        buf.take_reference(child_id);

        self.child = Some(child_id);
        self.job_state = JobState::Output;
    }

    /// OSC 133 D: close the output and the job with the exit code.
    pub fn end_output_region(&mut self, buf: &mut TermBuffer, code: i32, walltime: String) {
        if self.job_state != JobState::Output {
            return;
        }

        let row = self.offset + self.cursor.y as u64;
        let col = self.cursor.pos() as u32;

        if let Some(child) = self.child.take() {
            if buf.put_reference(child) {
                buf.end_region(child, row, col);
                if let Some(job) = self.job.and_then(|id| buf.live_region_mut(id)) {
                    job.flags |= RegionFlags::HAS_OUTPUT;
                }
            }
        }
        if let Some(job) = self.job.take() {
            if buf.put_reference(job) {
                if let Some(r) = buf.live_region_mut(job) {
                    r.attributes.insert("ended".to_owned(), walltime);
                    r.attributes.insert("rc".to_owned(), code.to_string());
                }
                buf.end_region(job, row, col);
            }
        }

        self.job_state = JobState::None;
    }

    /// While a command region is open, mirror the partial command text so
    /// the emulator can publish it as a terminal attribute.
    pub fn partial_command(&self, buf: &TermBuffer) -> Option<String> {
        let child = self.child?;
        if self.job_state != JobState::Command {
            return None;
        }
        if buf.live_region(child).map(|r| r.refcount) > Some(1) {
            Some(partial_region_text(
                buf,
                child,
                self.offset + self.cursor.y as u64,
                self.cursor.pos() as u32,
            ))
        } else {
            None
        }
    }

    /// Full reset: drop the open job pair and restore margins.
    pub fn reset(&mut self, buf: &mut TermBuffer) {
        self.close_open_job(buf);
        self.job = None;
        self.child = None;
        self.job_state = JobState::None;

        self.set_margins(self.bounds, buf);
    }
}

/// Build the text of a closed region, joining hard-wrapped rows and
/// inserting newlines at non-continuation boundaries, capped at `max_lines`.
pub fn region_text(buf: &TermBuffer, id: RegionId, mut max_lines: u32) -> String {
    let Some(region) = buf.live_region(id) else {
        return String::new();
    };
    let size = buf.size();
    let mut cur = region.start_row;
    let end = region.end_row;

    if cur >= size {
        return String::new();
    }

    let row = buf.const_row(cur);
    let mut result = if cur == end {
        return trim_newlines(row.substr(region.start_col, region.end_col));
    } else {
        row.substr_from(region.start_col)
    };

    loop {
        cur += 1;
        if cur >= size {
            break;
        }
        let row = buf.const_row(cur);

        if !row.flags.contains(LineFlags::CONTINUATION) {
            max_lines -= 1;
            if max_lines == 0 {
                break;
            }
            result.push('\n');
        }

        if cur == end {
            result.push_str(&row.substr(0, region.end_col));
            break;
        }
        result.push_str(row.as_str());
    }

    trim_newlines(result)
}

/// Text of a still-open region from its start through the cursor.
fn partial_region_text(buf: &TermBuffer, id: RegionId, cursor_row: RowIndex, cursor_col: u32) -> String {
    let Some(region) = buf.live_region(id) else {
        return String::new();
    };
    let size = buf.size();
    let mut cur = region.start_row;

    if cur >= size || cursor_row >= size {
        return String::new();
    }

    let row = buf.const_row(cur);
    let mut result = if cur == cursor_row {
        return trim_newlines(row.substr(region.start_col, cursor_col));
    } else {
        row.substr_from(region.start_col)
    };

    while cur < cursor_row {
        cur += 1;
        let row = buf.const_row(cur);
        if !row.flags.contains(LineFlags::CONTINUATION) {
            break;
        }
        if cur == cursor_row {
            result.push_str(&row.substr(0, cursor_col));
        } else {
            result.push_str(row.as_str());
        }
    }

    trim_newlines(result)
}

fn trim_newlines(mut s: String) -> String {
    while s.ends_with('\n') {
        s.pop();
    }
    s
}
