//! The xterm emulator: binds parser dispatches to screen, buffer, palette,
//! and tab-stop operations.
//!
//! The emulator owns both buffers, the screen, and the terminal attribute
//! map. It never talks to the outside directly: replies to the application
//! accumulate in an outbox the owning terminal drains after each burst, and
//! everything a client must learn lands in the event-state record.

use std::collections::BTreeMap;

use core_buffer::{
    JobState, Point, Rect, ShellVars, Size, TermBuffer, TermPalette, TermScreen, TermTabStops,
};
use core_cells::{
    CellAttributes, CellFlags, Cursor, LineFlags, ResetFlags, TermFlags, make_color,
};
use core_text::{ClusterBuilder, WidthCategory};
use tracing::debug;

use crate::charsets::{Charset, CharsetState};
use crate::content::ContentMap;
use crate::decoder::Utf8Decoder;
use crate::events::EventState;
use crate::machine::{VtAction, VtMachine};

pub const TERM_MIN_COLS: i32 = 16;
pub const TERM_MAX_COLS: i32 = 1024;
pub const TERM_MIN_ROWS: i32 = 8;
pub const TERM_MAX_ROWS: i32 = 1024;
pub const TERM_MAX_CAPORDER: u8 = 30;

/// Construction parameters; everything else derives from the config system.
#[derive(Debug, Clone)]
pub struct EmulatorOptions {
    pub flags: TermFlags,
    pub palette: String,
    pub caporder: u8,
    pub prompt_newline: bool,
    pub scroll_clear: bool,
    pub answerback: String,
    pub content_limit: usize,
}

impl Default for EmulatorOptions {
    fn default() -> Self {
        EmulatorOptions {
            flags: TermFlags::DEFAULT,
            palette: String::new(),
            caporder: 12,
            prompt_newline: false,
            scroll_clear: false,
            answerback: String::new(),
            content_limit: 8 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SavedCursor {
    pub flags: TermFlags,
    pub cursor: Cursor,
    pub attributes: CellAttributes,
    pub charset: CharsetState,
}

pub struct XtermEmulator {
    pub(crate) screen: TermScreen,
    pub(crate) bufs: [TermBuffer; 2],
    pub(crate) tabs: TermTabStops,
    pub(crate) palette: TermPalette,

    machine: VtMachine,
    utf8: Utf8Decoder,
    pub(crate) charset: CharsetState,
    cluster: ClusterBuilder,

    pub(crate) attributes: CellAttributes,
    pub(crate) flags: TermFlags,
    init_flags: TermFlags,
    alt_active: bool,

    pub(crate) prompt_newline: bool,
    pub(crate) scroll_clear: bool,
    answerback: String,
    pub(crate) content_limit: usize,

    saved_cursor: SavedCursor,
    pub(crate) saved_modes: BTreeMap<u16, bool>,
    pub(crate) cursor_style: u32,
    pub(crate) title_stack: Vec<String>,
    pub(crate) title2_stack: Vec<String>,
    pub(crate) sivars: ShellVars,

    pub(crate) content: ContentMap,
    pub(crate) term_attributes: BTreeMap<String, String>,
    pub(crate) events: EventState,

    /// Replies headed back into the pty.
    pub(crate) replies: Vec<u8>,
    /// OSC 511 payloads for the command collaborator.
    pub(crate) term_commands: Vec<String>,
    /// OSC 512 inbound data payloads.
    pub(crate) term_data: Vec<String>,
}

impl XtermEmulator {
    pub fn new(size: Size, options: &EmulatorOptions) -> Self {
        let size = clamp_size(size);
        let caporder = options.caporder.clamp(1, TERM_MAX_CAPORDER);

        let mut emulator = XtermEmulator {
            screen: TermScreen::new(size),
            bufs: [
                TermBuffer::new(size.height as u32, caporder, 0),
                TermBuffer::new(size.height as u32, 0, 1),
            ],
            tabs: TermTabStops::new(size.width as usize),
            palette: TermPalette::new(&options.palette),
            machine: VtMachine::new(),
            utf8: Utf8Decoder::new(),
            charset: CharsetState::new(),
            cluster: ClusterBuilder::new(),
            attributes: CellAttributes::default(),
            flags: options.flags,
            init_flags: options.flags,
            alt_active: false,
            prompt_newline: options.prompt_newline,
            scroll_clear: options.scroll_clear,
            answerback: options.answerback.clone(),
            content_limit: options.content_limit,
            saved_cursor: SavedCursor {
                flags: TermFlags::empty(),
                cursor: Cursor::default(),
                attributes: CellAttributes::default(),
                charset: CharsetState::new(),
            },
            saved_modes: BTreeMap::from([(2, true), (7, true), (1007, true)]),
            cursor_style: 1,
            title_stack: Vec::new(),
            title2_stack: Vec::new(),
            sivars: ShellVars::default(),
            content: ContentMap::new(),
            term_attributes: BTreeMap::new(),
            events: EventState::default(),
            replies: Vec::new(),
            term_commands: Vec::new(),
            term_data: Vec::new(),
        };
        emulator.cmd_save_cursor();
        emulator
    }

    /*
     * Accessors
     */

    pub fn flags(&self) -> TermFlags {
        self.flags
    }

    pub fn alt_active(&self) -> bool {
        self.alt_active
    }

    pub fn buffer(&self, i: usize) -> &TermBuffer {
        &self.bufs[i]
    }

    pub fn buffer_mut(&mut self, i: usize) -> &mut TermBuffer {
        &mut self.bufs[i]
    }

    pub fn screen(&self) -> &TermScreen {
        &self.screen
    }

    pub fn cursor(&self) -> Cursor {
        *self.screen.cursor()
    }

    pub fn size(&self) -> Size {
        self.screen.size()
    }

    pub fn margins(&self) -> Rect {
        *self.screen.margins()
    }

    pub fn events(&self) -> &EventState {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventState {
        &mut self.events
    }

    pub fn palette(&self) -> &TermPalette {
        &self.palette
    }

    pub fn content(&self) -> &ContentMap {
        &self.content
    }

    pub fn take_replies(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.replies)
    }

    pub fn take_term_commands(&mut self) -> Vec<String> {
        std::mem::take(&mut self.term_commands)
    }

    pub fn take_term_data(&mut self) -> Vec<String> {
        std::mem::take(&mut self.term_data)
    }

    fn parts(&mut self) -> (&mut TermScreen, &mut TermBuffer) {
        let idx = self.alt_active as usize;
        (&mut self.screen, &mut self.bufs[idx])
    }

    /*
     * Attributes
     */

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.term_attributes.get(key).map(String::as_str)
    }

    pub fn attributes_map(&self) -> &BTreeMap<String, String> {
        &self.term_attributes
    }

    /// Set a terminal attribute, recording the change for emission.
    pub fn set_attribute(&mut self, key: &str, value: String) {
        if self.term_attributes.get(key) == Some(&value) {
            return;
        }
        let mut line = Vec::with_capacity(key.len() + value.len() + 2);
        line.extend_from_slice(key.as_bytes());
        line.push(0);
        line.extend_from_slice(value.as_bytes());
        line.push(0);
        self.term_attributes.insert(key.to_owned(), value);
        self.events.note_attribute(key, line);
        self.on_attribute_changed(key);
    }

    pub fn remove_attribute(&mut self, key: &str) {
        if self.term_attributes.remove(key).is_none() {
            return;
        }
        let mut line = Vec::with_capacity(key.len() + 1);
        line.extend_from_slice(key.as_bytes());
        line.push(0);
        self.events.note_attribute(key, line);
    }

    /// A few attributes feed back into emulator state when rewritten.
    fn on_attribute_changed(&mut self, key: &str) {
        match key {
            "session.palette" => {
                if let Some(v) = self.term_attributes.get(key) {
                    self.palette.parse(v);
                }
            }
            "profile.prompt-newline" => {
                self.prompt_newline = self.term_attributes.get(key).map(String::as_str)
                    == Some("true");
            }
            "profile.scroll-clear" => {
                self.scroll_clear =
                    self.term_attributes.get(key).map(String::as_str) == Some("true");
            }
            _ => {}
        }
    }

    /*
     * External entry points (called with the terminal state lock held)
     */

    /// Run one input burst. Returns whether anything observable changed.
    pub fn term_event(&mut self, input: &[u8], modtime: i32) -> bool {
        self.bufs[0].set_modtime(modtime);
        self.bufs[1].set_modtime(modtime);

        let saved_flags = self.flags;
        let saved_cursor = *self.screen.cursor();

        let mut actions = Vec::new();
        {
            let XtermEmulator { utf8, machine, .. } = self;
            utf8.feed(input, |c| {
                if let Some(action) = machine.process(c) {
                    actions.push(action);
                }
            });
        }
        for action in actions {
            self.dispatch(action);
        }

        if self.attributes.flags.contains(CellFlags::COMMAND) {
            let (screen, buf) = self.parts();
            if let Some(partial) = screen.partial_command(buf) {
                self.set_attribute("command", partial);
            }
        }

        self.drain_screen_dirty();
        self.bufs[0].bound_changed_regions();
        self.bufs[1].bound_changed_regions();

        if self.flags != saved_flags {
            self.events.report_flags();
        }
        if *self.screen.cursor() != saved_cursor {
            self.events.report_cursor();
        }
        if !self.bufs[0].events().changed_rows.is_empty()
            || !self.bufs[1].events().changed_rows.is_empty()
            || !self.bufs[0].events().changed_regions.is_empty()
            || !self.bufs[1].events().changed_regions.is_empty()
        {
            self.events.mark_changed();
        }

        self.events.state_changed()
    }

    /// Reset, then process a greeting (used for duplicate and reset ops).
    pub fn term_reset(&mut self, input: &[u8], arg: ResetFlags, modtime: i32) -> bool {
        self.bufs[0].set_modtime(modtime);
        self.bufs[1].set_modtime(modtime);

        let saved_flags = self.flags;
        let saved_cursor = *self.screen.cursor();

        self.reset_emulator(arg);

        if std::str::from_utf8(input).is_ok() {
            let mut actions = Vec::new();
            {
                let XtermEmulator { utf8, machine, .. } = self;
                utf8.feed(input, |c| {
                    if let Some(action) = machine.process(c) {
                        actions.push(action);
                    }
                });
            }
            for action in actions {
                self.dispatch(action);
            }
        }

        self.drain_screen_dirty();

        if self.flags != saved_flags {
            self.events.report_flags();
        }
        if *self.screen.cursor() != saved_cursor {
            self.events.report_cursor();
        }
        self.events.mark_changed();
        self.events.state_changed()
    }

    /// Resize the terminal. Returns the clamped size to apply to the pty,
    /// or None when nothing changed.
    pub fn term_resize(&mut self, size: Size) -> Option<Size> {
        let saved_cursor = *self.screen.cursor();
        let applied = self.set_size(size);
        if applied.is_some() {
            self.events.report_size();
        }
        if *self.screen.cursor() != saved_cursor {
            self.events.report_cursor();
        }
        self.drain_screen_dirty();
        applied
    }

    pub fn buffer_resize(&mut self, bufid: u8, caporder: u8) -> bool {
        let no_scrollback = caporder & 0x80 != 0;
        let caporder = (caporder & 0x7f).min(TERM_MAX_CAPORDER);

        if bufid == 0 && !no_scrollback {
            let changed = self.bufs[0].enable_scrollback(caporder);
            if changed {
                self.events.report_buffer_capacity(0);
            }
            if !self.alt_active {
                let (screen, buf) = self.parts();
                screen.move_to_end(buf);
                screen.row_and_cursor_update(buf);
            }
            changed
        } else {
            false
        }
    }

    /// Encode a mouse event for the application per the active tracking
    /// mode. Returns whether a report was produced.
    pub fn term_mouse(&mut self, event: u32, x: u32, y: u32) -> bool {
        const RELEASE: u32 = 1 << 8;
        const MOTION: u32 = 1 << 9;
        const SHIFT: u32 = 1 << 12;
        const META: u32 = 1 << 13;
        const CONTROL: u32 = 1 << 14;

        let release = event & RELEASE != 0;
        let motion = event & MOTION != 0;
        let button = event & 0xff;
        let f = self.flags;

        if f.contains(TermFlags::X10_MOUSE_MODE) {
            // Button presses only, no modifiers
            if release || motion || button == 0 || button > 3 {
                return false;
            }
            let reply = format!(
                "\u{9b}M{}{}{}",
                (31 + button) as u8 as char,
                (32 + (x + 1).min(223)) as u8 as char,
                (32 + (y + 1).min(223)) as u8 as char,
            );
            self.term_reply(&reply);
            return true;
        }

        let tracking = f.intersects(
            TermFlags::NORMAL_MOUSE_MODE
                | TermFlags::BUTTON_EVENT_MOUSE_MODE
                | TermFlags::ANY_EVENT_MOUSE_MODE,
        );
        if !tracking {
            return false;
        }
        if motion {
            let wants_motion = f.contains(TermFlags::ANY_EVENT_MOUSE_MODE)
                || (f.contains(TermFlags::BUTTON_EVENT_MOUSE_MODE) && button != 0);
            if !wants_motion {
                return false;
            }
        }

        let mut cb = match button {
            0 => 3, // no button
            1..=3 => button - 1,
            // Wheel buttons
            b => 64 + (b - 4),
        };
        if motion {
            cb += 32;
        }
        if event & SHIFT != 0 {
            cb += 4;
        }
        if event & META != 0 {
            cb += 8;
        }
        if event & CONTROL != 0 {
            cb += 16;
        }

        if f.contains(TermFlags::SGR_EXT_MOUSE_MODE) {
            let reply = format!(
                "\u{9b}<{};{};{}{}",
                cb,
                x + 1,
                y + 1,
                if release { 'm' } else { 'M' }
            );
            self.term_reply(&reply);
        } else {
            if release {
                cb = 3 + if motion { 32 } else { 0 };
            }
            let reply = format!(
                "\u{9b}M{}{}{}",
                (32 + cb) as u8 as char,
                (32 + (x + 1).min(223)) as u8 as char,
                (32 + (y + 1).min(223)) as u8 as char,
            );
            self.term_reply(&reply);
        }
        true
    }

    pub fn move_mouse(&mut self, pos: Point) -> bool {
        let mut pos = pos;
        if pos.x >= self.screen.width() {
            pos.x = self.screen.width() - 1;
        }
        if pos.y >= self.screen.height() {
            pos.y = self.screen.height() - 1;
        }

        if self.screen.mouse_pos() == pos {
            false
        } else {
            self.screen.set_mouse_pos(pos);
            true
        }
    }

    pub fn set_flag(&mut self, flag: TermFlags, enabled: bool) -> bool {
        let cur = self.flags & flag;
        let next = if enabled { flag } else { TermFlags::empty() };

        if cur == next {
            return false;
        }
        self.flags.set(flag, enabled);
        self.events.report_flags();
        true
    }

    pub fn reset_event_state(&mut self) {
        self.events.clear();
        self.bufs[0].reset_event_state();
        self.bufs[1].reset_event_state();
    }

    /// Release content held by regions that eviction reclaimed this burst.
    pub fn release_evicted_content(&mut self) {
        for i in 0..2 {
            let released = std::mem::take(&mut self.bufs[i].events_mut().released_content);
            for id in released {
                self.content.put(id);
            }
        }
    }

    fn drain_screen_dirty(&mut self) {
        if self.screen.dirty.size_changed {
            self.events.report_size();
        }
        if self.screen.dirty.buffer_switched {
            self.events.report_buffer_switched();
        }
        self.screen.dirty.size_changed = false;
        self.screen.dirty.buffer_switched = false;

        for i in 0..2 {
            if self.bufs[i].events().capacity_changed {
                self.events.report_buffer_capacity(i as u8);
            } else if self.bufs[i].events().length_changed {
                self.events.report_buffer_length(i as u8);
            }
        }
    }

    /*
     * Sizing
     */

    fn set_size(&mut self, size: Size) -> Option<Size> {
        let size = clamp_size(size);

        if self.screen.size() == size {
            return None;
        }

        if self.screen.width() != size.width {
            self.tabs.set_width(size.width as usize);
            let idx = self.alt_active as usize;
            self.screen.set_width(size.width, &self.bufs[idx]);
        }
        if self.screen.height() != size.height {
            let max_chop = if self.alt_active {
                0
            } else {
                (self.screen.bounds().bottom() - self.screen.cursor().y) as u32
            };

            let rc0 = self.bufs[0].set_screen_height(size.height as u32, max_chop);
            let rc1 = self.bufs[1].set_screen_height(size.height as u32, 0);
            let lines_added = if self.alt_active { rc1 } else { rc0 };
            let idx = self.alt_active as usize;
            self.screen.set_height(size.height, lines_added, &self.bufs[idx]);
        }

        self.set_attribute("session.columns", size.width.to_string());
        self.set_attribute("session.rows", size.height.to_string());
        Some(size)
    }

    pub(crate) fn set_width(&mut self, width: i32) {
        let width = width.clamp(TERM_MIN_COLS, TERM_MAX_COLS);
        if self.screen.width() == width {
            return;
        }

        self.tabs.set_width(width as usize);
        let idx = self.alt_active as usize;
        self.screen.set_width(width, &self.bufs[idx]);
        self.events.report_size();

        self.set_attribute("session.columns", width.to_string());
        self.set_attribute("session.rows", self.screen.height().to_string());
    }

    pub(crate) fn set_alt_active(&mut self, alt_active: bool) {
        if self.alt_active != alt_active {
            self.alt_active = alt_active;
            let idx = self.alt_active as usize;
            self.screen.on_buffer_switched(&self.bufs[idx]);
        }
    }

    /*
     * Dispatch
     */

    fn dispatch(&mut self, action: VtAction) {
        match action {
            VtAction::Print(c) => {
                let mapped = self.charset.map(c);
                self.printable(mapped);
            }
            VtAction::Control(c) => self.control(c),
            VtAction::Esc {
                intermediates,
                final_byte,
            } => self.esc_dispatch(&intermediates, final_byte),
            VtAction::Csi {
                private,
                params,
                param_count,
                intermediates,
                final_byte,
            } => self.csi_dispatch(private, &params, param_count, &intermediates, final_byte),
            VtAction::Osc {
                selector,
                payload,
                bel,
            } => self.osc_dispatch(selector, payload, bel),
            VtAction::Dcs {
                params,
                intermediates,
                final_byte,
                data,
            } => self.dcs_dispatch(&params, &intermediates, final_byte, &data),
        }
    }

    pub(crate) fn line_feed(&mut self) {
        let (screen, buf) = self.parts();
        if screen.cursor_at_bottom() {
            screen.scroll_up(buf);
        } else {
            screen.cursor_move_down(buf);
        }
    }

    pub(crate) fn carriage_return(&mut self) {
        let (screen, buf) = self.parts();
        screen.cursor_move_x(false, 0, true, buf);
    }

    fn control(&mut self, c: char) {
        match c as u32 {
            0x05 => {
                let answerback = self.answerback.clone();
                self.term_reply(&answerback);
            }
            0x07 => self.events.report_bell(),
            0x08 => {
                if !self.screen.cursor_at_left() {
                    let (screen, buf) = self.parts();
                    screen.cursor_move_x(true, -1, true, buf);
                } else if self.flags.contains(TermFlags::REVERSE_AUTOWRAP)
                    && !self.screen.cursor_at_top()
                {
                    let right = self.screen.margins().right();
                    let (screen, buf) = self.parts();
                    screen.cursor_move_y(true, -1, true, buf);
                    screen.cursor_move_x(false, right, true, buf);
                }
            }
            0x09 => {
                let next = self.tabs.next_tab_stop(self.screen.cursor().x as usize) as i32;
                let (screen, buf) = self.parts();
                screen.cursor_move_x(false, next, true, buf);
            }
            0x0a | 0x0b | 0x0c => {
                self.line_feed();
                if self.flags.contains(TermFlags::NEW_LINE) {
                    self.carriage_return();
                }
            }
            0x0d => self.carriage_return(),
            0x0e => self.charset.set_left(1),
            0x0f => self.charset.set_left(0),
            0x7f => {}
            0x84 => self.line_feed(),
            0x85 => {
                self.line_feed();
                self.carriage_return();
            }
            0x88 => self.tabs.set_tab_stop(self.screen.cursor().x as usize),
            0x8d => {
                let (screen, buf) = self.parts();
                if screen.cursor_at_top() {
                    screen.scroll_down(buf);
                } else {
                    screen.cursor_move_y(true, -1, true, buf);
                }
            }
            0x8e => self.charset.set_single_left(2),
            0x8f => self.charset.set_single_left(3),
            other => {
                debug!(control = other, "unhandled control code");
            }
        }
    }

    /*
     * Printables
     */

    fn hint_flags(&self) -> CellFlags {
        let mut flags = CellFlags::empty();
        if self.cluster.width() == 2 {
            flags |= CellFlags::DBL_WIDTH_CHAR;
        }
        if self.cluster.is_emoji() {
            flags |= CellFlags::EMOJI_CHAR;
        }
        flags
    }

    fn printable(&mut self, c: char) {
        if (c as u32) < 128 {
            // ASCII fast path
            self.cluster.restart(c);
            let a = self.attributes;
            self.printable_cell(&a, c, 1);
            return;
        }

        match self.cluster.categorize(c) {
            WidthCategory::Single => {
                let a = self.attributes;
                self.printable_cell(&a, c, 1);
            }
            WidthCategory::Double => {
                let mut a = self.attributes;
                a.flags |= self.hint_flags();
                self.printable_cell(&a, c, 2);
            }
            WidthCategory::Join => {
                let mut a = self.attributes;
                a.flags |= self.hint_flags();
                let (screen, buf) = self.parts();
                screen.combine_cell(buf, &a, c);
            }
            WidthCategory::Upgrade => {
                // The cluster was written one column wide; back up and
                // replay it at its new width.
                let mut a = self.attributes;
                a.flags |= self.hint_flags();

                {
                    let (screen, buf) = self.parts();
                    if screen.cursor_past_end(buf, 1) {
                        screen.delete_cell(buf);
                    } else {
                        screen.cursor_move_x(true, -1, true, buf);
                    }
                }

                let seq: Vec<char> = self.cluster.seq().chars().collect();
                self.printable_cell(&a, seq[0], 2);
                let (screen, buf) = self.parts();
                for &cc in &seq[1..] {
                    screen.combine_cell(buf, &a, cc);
                }
            }
        }
    }

    fn printable_cell(&mut self, a: &CellAttributes, c: char, width: i32) {
        let autowrap = self.flags.contains(TermFlags::AUTOWRAP);
        let lr_margins = self.flags.contains(TermFlags::LEFT_RIGHT_MARGIN_MODE);
        let insert_mode = self.flags.contains(TermFlags::INSERT_MODE);

        let (screen, buf) = self.parts();

        if screen.cursor_past_end(buf, width) && autowrap {
            screen.cursor_move_x(false, 0, true, buf);

            if screen.cursor_at_bottom() {
                screen.scroll_up(buf);
            } else {
                screen.cursor_move_y(true, 1, true, buf);
            }

            if !lr_margins {
                let idx = screen.offset() + screen.cursor().y as u64;
                buf.row_mut(idx).flags = LineFlags::CONTINUATION;
            }
        } else if screen.cursor().past_end() {
            // No wrap: re-anchor so the write overwrites the margin cell
            screen.cursor_update(buf);
        }

        if insert_mode {
            screen.insert_cells(buf, width);
        }

        screen.write_cell(buf, a, c, width);
    }

    /*
     * ESC dispatch
     */

    fn esc_dispatch(&mut self, intermediates: &str, fin: char) {
        match (intermediates, fin) {
            ("", '7') => self.cmd_save_cursor(),
            ("", '8') => self.cmd_restore_cursor(),
            ("#", '3') => {
                if !self.flags.contains(TermFlags::LEFT_RIGHT_MARGIN_MODE) {
                    let (screen, buf) = self.parts();
                    screen.set_line_flags(
                        LineFlags::DBL_WIDTH_LINE | LineFlags::DBL_TOP_LINE,
                        buf,
                    );
                }
            }
            ("#", '4') => {
                if !self.flags.contains(TermFlags::LEFT_RIGHT_MARGIN_MODE) {
                    let (screen, buf) = self.parts();
                    screen.set_line_flags(
                        LineFlags::DBL_WIDTH_LINE | LineFlags::DBL_BOTTOM_LINE,
                        buf,
                    );
                }
            }
            ("#", '5') => {
                let (screen, buf) = self.parts();
                screen.set_line_flags(LineFlags::empty(), buf);
            }
            ("#", '6') => {
                if !self.flags.contains(TermFlags::LEFT_RIGHT_MARGIN_MODE) {
                    let (screen, buf) = self.parts();
                    screen.set_line_flags(LineFlags::DBL_WIDTH_LINE, buf);
                }
            }
            ("#", '8') => self.cmd_screen_alignment_test(),
            (" ", 'F') => {
                self.flags.remove(TermFlags::CONTROLS_8BIT);
            }
            (" ", 'G') => {
                self.flags.insert(TermFlags::CONTROLS_8BIT);
            }
            ("", '=') => {
                self.flags.insert(TermFlags::APP_KEYPAD);
            }
            ("", '>') => {
                self.flags.remove(TermFlags::APP_KEYPAD);
            }
            ("", 'D') => self.line_feed(),
            ("", 'E') => {
                self.line_feed();
                self.carriage_return();
            }
            ("", 'H') => self.tabs.set_tab_stop(self.screen.cursor().x as usize),
            ("", 'M') => {
                let (screen, buf) = self.parts();
                if screen.cursor_at_top() {
                    screen.scroll_down(buf);
                } else {
                    screen.cursor_move_y(true, -1, true, buf);
                }
            }
            ("", 'N') => self.charset.set_single_left(2),
            ("", 'O') => self.charset.set_single_left(3),
            ("", 'c') => self.reset_emulator(ResetFlags::RESET_EMULATOR | ResetFlags::CLEAR_SCREEN),
            ("", 'n') => self.charset.set_left(2),
            ("", 'o') => self.charset.set_left(3),
            ("", '|') => self.charset.set_right(3),
            ("", '}') => self.charset.set_right(2),
            ("", '~') => self.charset.set_right(1),
            ("(", f) | (")", f) | ("*", f) | ("+", f) => {
                let slot = match intermediates {
                    "(" => 0,
                    ")" => 1,
                    "*" => 2,
                    _ => 3,
                };
                match f {
                    'B' | '1' => self.charset.set_charset(slot, Charset::UsAscii),
                    '0' | '2' => self.charset.set_charset(slot, Charset::DecLineDrawing),
                    'A' => self.charset.set_charset(slot, Charset::BritishNrc),
                    _ => {}
                }
            }
            ("-", f) | (".", f) | ("/", f) => {
                let slot = match intermediates {
                    "-" => 1,
                    "." => 2,
                    _ => 3,
                };
                if f == 'A' {
                    self.charset.set_charset(slot, Charset::Latin1Supplement);
                }
            }
            _ => {
                debug!(intermediates, final_byte = %fin, "unhandled escape sequence");
            }
        }
    }

    pub(crate) fn cmd_save_cursor(&mut self) {
        self.saved_cursor = SavedCursor {
            flags: self.flags & (TermFlags::ORIGIN_MODE | TermFlags::AUTOWRAP),
            cursor: *self.screen.cursor(),
            attributes: self.attributes,
            charset: self.charset,
        };
    }

    pub(crate) fn cmd_restore_cursor(&mut self) {
        self.flags.remove(TermFlags::ORIGIN_MODE | TermFlags::AUTOWRAP);
        self.flags.insert(self.saved_cursor.flags);

        let origin = self.flags.contains(TermFlags::ORIGIN_MODE);
        let x = self.saved_cursor.cursor.x;
        let y = self.saved_cursor.cursor.y;
        let past_end = self.saved_cursor.cursor.past_end();

        {
            let (screen, buf) = self.parts();
            screen.set_stay_within_margins(origin, buf);
            screen.cursor_move_x(false, x, false, buf);
            screen.cursor_move_y(false, y, false, buf);
            screen.set_cursor_past_end(past_end);
        }

        self.attributes = self.saved_cursor.attributes;
        self.charset = self.saved_cursor.charset;
    }

    fn cmd_screen_alignment_test(&mut self) {
        self.clear_screen();

        let n = self.screen.width();
        let height = self.screen.height();
        let a = self.attributes;
        let (screen, buf) = self.parts();

        for y in 0..height {
            let idx = screen.offset() + y as u64;
            let row = buf.row_mut(idx);
            while row.columns() < n {
                row.append(&a, 'E', 1);
            }
        }
        screen.cursor_update(buf);
    }

    /*
     * Screen clears and resets
     */

    pub(crate) fn clear_screen(&mut self) {
        self.attributes = CellAttributes::default();

        let height = self.screen.height();
        let bounds = *self.screen.bounds();
        let (screen, buf) = self.parts();

        screen.set_margins(bounds, buf);
        screen.cursor_move_x(false, 0, false, buf);
        screen.cursor_move_y(false, 0, false, buf);

        for y in 0..height {
            screen.reset_single_line(y, buf);
        }
        buf.remove_regions(screen.offset(), 0);
    }

    pub(crate) fn erase_in_display(&mut self, ty: u32) {
        let p = *self.screen.cursor();
        let height = self.screen.height();

        if self.scroll_clear
            && self.attributes.flags.contains(CellFlags::COMMAND)
            && (ty == 2 || (ty == 0 && p.x == 0 && p.y == 0))
        {
            let (screen, buf) = self.parts();
            screen.scroll_to_job(buf);
        }

        match ty {
            0 => {
                let (screen, buf) = self.parts();
                for y in 0..height {
                    if y == p.y {
                        let idx = screen.offset() + y as u64;
                        buf.single_row_mut(idx).resize(p.x);
                    } else if y > p.y {
                        screen.reset_single_line(y, buf);
                    }
                }
                buf.remove_regions(screen.offset() + p.y as u64, p.x as u32);
            }
            1 => {
                let (screen, buf) = self.parts();
                for y in 0..height {
                    if y < p.y {
                        screen.reset_line(y, buf);
                    } else if y == p.y {
                        let idx = screen.offset() + y as u64;
                        buf.row_mut(idx).erase(0, p.x + 1);
                    }
                }
                buf.remove_regions(screen.offset(), 0);
            }
            2 => {
                let (screen, buf) = self.parts();
                for y in 0..height {
                    screen.reset_single_line(y, buf);
                }
                buf.remove_regions(screen.offset(), 0);
            }
            3 => {
                self.reset_emulator(ResetFlags::CLEAR_SCROLLBACK);
            }
            _ => {}
        }

        let (screen, buf) = self.parts();
        screen.cursor_update(buf);
    }

    fn selective_erase_in_display(&mut self, ty: u32) {
        let p = *self.screen.cursor();
        let height = self.screen.height();
        let (screen, buf) = self.parts();

        match ty {
            0 => {
                for y in 0..height {
                    let idx = screen.offset() + y as u64;
                    if y == p.y {
                        buf.row_mut(idx).selective_erase_from(p.x);
                    } else if y > p.y {
                        buf.row_mut(idx).selective_erase_from(0);
                    }
                }
                buf.remove_regions(screen.offset() + p.y as u64, p.x as u32);
            }
            1 => {
                for y in 0..height {
                    let idx = screen.offset() + y as u64;
                    if y < p.y {
                        buf.row_mut(idx).selective_erase_from(0);
                    } else if y == p.y {
                        buf.row_mut(idx).selective_erase(0, p.x + 1);
                    }
                }
                buf.remove_regions(screen.offset(), 0);
            }
            2 => {
                for y in 0..height {
                    let idx = screen.offset() + y as u64;
                    buf.row_mut(idx).selective_erase_from(0);
                }
                buf.remove_regions(screen.offset(), 0);
            }
            _ => {}
        }

        screen.cursor_update(buf);
    }

    pub(crate) fn reset_emulator(&mut self, arg: ResetFlags) {
        if arg.contains(ResetFlags::RESET_EMULATOR) {
            self.flags = self.init_flags;
            {
                let (screen, buf) = self.parts();
                screen.reset(buf);
            }
            self.tabs.reset();
            self.bufs[1].clear();
            self.set_alt_active(false);
            self.utf8.reset();
            self.machine.reset();
            self.cluster.reset();
            self.charset.reset();
            self.attributes = CellAttributes::default();
            self.cmd_save_cursor();
            self.saved_cursor.cursor = Cursor::default();
            self.remove_attribute("command");
            self.remove_attribute("cursor");
            self.cursor_style = 1;
            self.title_stack.clear();
            self.title2_stack.clear();
        }
        if arg.contains(ResetFlags::CLEAR_SCROLLBACK) {
            if self.bufs[0].clear_scrollback() {
                self.events.report_buffer_capacity(0);
            }
            let idx = self.alt_active as usize;
            if idx == 0 {
                let (screen, buf) = self.parts();
                screen.move_to_end(buf);
                screen.row_and_cursor_update(buf);
            }
        }
        if arg.contains(ResetFlags::CLEAR_SCREEN) {
            self.clear_screen();
        }
        if arg.contains(ResetFlags::FORM_FEED) {
            self.replies.push(0x0c);
        }
    }

    /*
     * CSI dispatch
     */

    fn csi_dispatch(
        &mut self,
        private: Option<char>,
        params: &[u32],
        count: usize,
        intermediates: &str,
        fin: char,
    ) {
        let p0 = params.first().copied().unwrap_or(0);
        let times = p0.max(1) as i32;

        match (private, intermediates, fin) {
            (None, "", '@') => {
                let (screen, buf) = self.parts();
                screen.insert_cells(buf, times);
            }
            (None, "", 'A') => {
                let (screen, buf) = self.parts();
                screen.cursor_move_y(true, -times, true, buf);
            }
            (None, "", 'B') | (None, "", 'e') => {
                let (screen, buf) = self.parts();
                screen.cursor_move_y(true, times, true, buf);
            }
            (None, "", 'C') | (None, "", 'a') => {
                let (screen, buf) = self.parts();
                screen.cursor_move_x(true, times, true, buf);
            }
            (None, "", 'D') => {
                let (screen, buf) = self.parts();
                screen.cursor_move_x(true, -times, true, buf);
            }
            (None, "", 'E') => {
                let (screen, buf) = self.parts();
                screen.cursor_move_y(true, times, true, buf);
                screen.cursor_move_x(false, 0, true, buf);
            }
            (None, "", 'F') => {
                let (screen, buf) = self.parts();
                screen.cursor_move_y(true, -times, true, buf);
                screen.cursor_move_x(false, 0, true, buf);
            }
            (None, "", 'G') | (None, "", '`') => {
                let col = p0.saturating_sub(1) as i32;
                let (screen, buf) = self.parts();
                screen.cursor_move_x(false, col, true, buf);
            }
            (None, "", 'H') | (None, "", 'f') => {
                let row = p0.saturating_sub(1) as i32;
                let col = params.get(1).copied().unwrap_or(0).saturating_sub(1) as i32;
                let (screen, buf) = self.parts();
                screen.cursor_move_y(false, row, false, buf);
                screen.cursor_move_x(false, col, false, buf);
            }
            (None, "", 'I') => {
                for _ in 0..times {
                    let next = self.tabs.next_tab_stop(self.screen.cursor().x as usize) as i32;
                    let (screen, buf) = self.parts();
                    screen.cursor_move_x(false, next, true, buf);
                }
            }
            (None, "", 'J') => self.erase_in_display(p0),
            (Some('?'), "", 'J') => self.selective_erase_in_display(p0),
            (None, "", 'K') => self.erase_in_line(p0),
            (Some('?'), "", 'K') => self.selective_erase_in_line(p0),
            (None, "", 'L') => {
                for _ in 0..times {
                    let (screen, buf) = self.parts();
                    screen.insert_row(buf);
                }
            }
            (None, "", 'M') => {
                for _ in 0..times {
                    let (screen, buf) = self.parts();
                    screen.delete_row(buf);
                }
            }
            (None, "", 'P') => {
                for _ in 0..times {
                    let (screen, buf) = self.parts();
                    screen.delete_cell(buf);
                }
            }
            (None, "", 'S') => {
                for _ in 0..times {
                    let (screen, buf) = self.parts();
                    screen.scroll_up(buf);
                }
            }
            (None, "", 'T') => {
                if count <= 1 {
                    for _ in 0..times {
                        let (screen, buf) = self.parts();
                        screen.scroll_down(buf);
                    }
                }
            }
            (Some('>'), "", 'T') => self.cmd_reset_title_modes(params),
            (None, "", 'X') => {
                let x = self.screen.cursor().x;
                let (screen, buf) = self.parts();
                let idx = screen.offset() + screen.cursor().y as u64;
                buf.row_mut(idx).erase(x, x + times);
            }
            (None, "", 'Z') => {
                for _ in 0..times {
                    let prev = self.tabs.prev_tab_stop(self.screen.cursor().x as usize) as i32;
                    let (screen, buf) = self.parts();
                    screen.cursor_move_x(false, prev, true, buf);
                }
            }
            (None, "", 'b') => self.cmd_repeat_character(times),
            (None, "", 'c') => {
                if p0 == 0 {
                    self.term_reply("\u{9b}?64;1;2;6;9;15;18;21;22c");
                }
            }
            (Some('>'), "", 'c') => {
                if p0 == 0 {
                    self.term_reply("\u{9b}>41;327;0c");
                }
            }
            (None, "", 'd') => {
                let row = p0.saturating_sub(1) as i32;
                let (screen, buf) = self.parts();
                screen.cursor_move_y(false, row, true, buf);
            }
            (None, "", 'g') => match p0 {
                0 => self.tabs.clear_tab_stop(self.screen.cursor().x as usize),
                3 => self.tabs.clear_tab_stops(),
                _ => {}
            },
            (None, "", 'h') => self.cmd_set_mode(params),
            (Some('?'), "", 'h') => {
                for &mode in params {
                    self.set_private_mode(mode);
                }
            }
            (None, "", 'l') => self.cmd_reset_mode(params),
            (Some('?'), "", 'l') => {
                for &mode in params {
                    self.reset_private_mode(mode);
                }
            }
            (None, "", 'm') => self.cmd_character_attributes(params, count),
            (Some('>'), "", 'm') => {}
            (None, "", 'n') => self.cmd_device_status_report(p0),
            (Some('?'), "", 'n') => {}
            (None, "!", 'p') => self.cmd_soft_reset(),
            (None, "$", 'p') => self.cmd_mode_request(p0),
            (Some('?'), "$", 'p') => self.cmd_private_mode_request(p0),
            (None, "\"", 'q') => match p0 {
                0 | 2 => {
                    self.attributes.flags.remove(CellFlags::PROTECTED);
                }
                1 => {
                    self.attributes.flags.insert(CellFlags::PROTECTED);
                }
                _ => {}
            },
            (None, " ", 'q') => {
                let arg = if p0 == 0 { 1 } else { p0 };
                if arg <= 6 {
                    self.cursor_style = arg;
                    self.set_attribute("cursor", arg.to_string());
                }
            }
            (None, "", 'r') => self.cmd_set_top_bottom_margins(params),
            (Some('?'), "", 'r') => {
                for &mode in params {
                    if self.saved_modes.get(&(mode as u16)).copied().unwrap_or(false) {
                        self.set_private_mode(mode);
                    } else {
                        self.reset_private_mode(mode);
                    }
                }
            }
            (None, "", 's') => self.cmd_set_left_right_margins(params, count),
            (Some('?'), "", 's') => self.cmd_private_mode_save(params),
            (None, "", 't') => self.cmd_window_ops(params),
            (Some('>'), "", 't') => self.cmd_set_title_modes(params),
            _ => {
                debug!(?private, intermediates, final_byte = %fin, "unhandled csi");
            }
        }
    }

    fn erase_in_line(&mut self, ty: u32) {
        let past_end = self.screen.cursor().past_end();
        let x = self.screen.cursor().x + past_end as i32;
        let (screen, buf) = self.parts();
        let idx = screen.offset() + screen.cursor().y as u64;

        match ty {
            0 => buf.row_mut(idx).resize(x),
            1 => buf.row_mut(idx).erase(0, x + 1),
            2 => buf.row_mut(idx).erase_all(),
            _ => return,
        }

        screen.cursor_update(buf);
        if past_end {
            screen.set_cursor_past_end(true);
        }
    }

    fn selective_erase_in_line(&mut self, ty: u32) {
        let past_end = self.screen.cursor().past_end();
        let x = self.screen.cursor().x + past_end as i32;
        let (screen, buf) = self.parts();
        let idx = screen.offset() + screen.cursor().y as u64;

        match ty {
            0 => {
                let row = buf.row_mut(idx);
                let cols = row.columns();
                row.selective_erase(x, cols);
            }
            1 => buf.row_mut(idx).selective_erase(0, x + 1),
            2 => {
                let row = buf.row_mut(idx);
                let cols = row.columns();
                row.selective_erase(0, cols);
            }
            _ => return,
        }

        screen.cursor_update(buf);
        if past_end {
            screen.set_cursor_past_end(true);
        }
    }

    fn cmd_repeat_character(&mut self, times: i32) {
        let pos = self.screen.cursor().pos();
        if pos > 0 {
            let p = pos as u32 - !self.screen.cursor().past_end() as u32;
            let idx = self.alt_active as usize;
            let row_idx = self.screen.offset() + self.screen.cursor().y as u64;
            let cs: Vec<char> = self.bufs[idx]
                .const_row(row_idx)
                .substr(p, p + 1)
                .chars()
                .collect();

            for _ in 0..times {
                for &c in &cs {
                    self.printable(c);
                }
            }
        }
    }

    fn cmd_set_top_bottom_margins(&mut self, params: &[u32]) {
        let h = self.screen.height() as u32;
        let mut top = params.first().copied().unwrap_or(1);
        let mut bot = params.get(1).copied().unwrap_or(h);

        if top == 0 {
            top = 1;
        }
        if bot == 0 {
            bot = h;
        }

        if top > h || bot > h || top >= bot {
            return;
        }

        let mut margins = *self.screen.margins();
        margins.set_top(top as i32 - 1);
        margins.set_bottom(bot as i32 - 1);

        let (screen, buf) = self.parts();
        screen.set_margins(margins, buf);
        screen.cursor_move_x(false, 0, false, buf);
        screen.cursor_move_y(false, 0, false, buf);
    }

    fn cmd_set_left_right_margins(&mut self, params: &[u32], count: usize) {
        if !self.flags.contains(TermFlags::LEFT_RIGHT_MARGIN_MODE) && count == 0 {
            // ANSI.SYS-style save cursor
            self.cmd_save_cursor();
            return;
        }

        let w = self.screen.width() as u32;
        let mut left = params.first().copied().unwrap_or(1);
        let mut right = params.get(1).copied().unwrap_or(w);

        if left == 0 {
            left = 1;
        }
        if right == 0 {
            right = w;
        }

        if left > w || right > w || left >= right {
            return;
        }

        let mut margins = *self.screen.margins();
        margins.set_left(left as i32 - 1);
        margins.set_right(right as i32 - 1);

        let (screen, buf) = self.parts();
        screen.set_margins(margins, buf);
        screen.cursor_move_x(false, 0, false, buf);
        screen.cursor_move_y(false, 0, false, buf);
    }

    fn cmd_soft_reset(&mut self) {
        self.flags.remove(
            TermFlags::ORIGIN_MODE
                | TermFlags::INSERT_MODE
                | TermFlags::APP_KEYPAD
                | TermFlags::APP_CU_KEYS
                | TermFlags::KEYBOARD_LOCK,
        );
        self.flags.insert(TermFlags::AUTOWRAP | TermFlags::CURSOR_VISIBLE);
        self.attributes = CellAttributes::default();
        self.charset.reset();

        let bounds = *self.screen.bounds();
        let (screen, buf) = self.parts();
        screen.set_stay_within_margins(false, buf);
        screen.set_margins(bounds, buf);
        self.cmd_save_cursor();
    }

    fn cmd_set_mode(&mut self, params: &[u32]) {
        for &mode in params {
            match mode {
                2 => self.flags.insert(TermFlags::KEYBOARD_LOCK),
                4 => self.flags.insert(TermFlags::INSERT_MODE),
                12 => self.flags.insert(TermFlags::SEND_RECEIVE),
                20 => self.flags.insert(TermFlags::NEW_LINE),
                _ => {}
            }
        }
    }

    fn cmd_reset_mode(&mut self, params: &[u32]) {
        for &mode in params {
            match mode {
                2 => self.flags.remove(TermFlags::KEYBOARD_LOCK),
                4 => self.flags.remove(TermFlags::INSERT_MODE),
                12 => self.flags.remove(TermFlags::SEND_RECEIVE),
                20 => self.flags.remove(TermFlags::NEW_LINE),
                _ => {}
            }
        }
    }

    pub(crate) fn set_private_mode(&mut self, mode: u32) {
        match mode {
            1 => self.flags.insert(TermFlags::APP_CU_KEYS),
            2 => {
                self.flags.insert(TermFlags::ANSI);
                for slot in 0..4 {
                    self.charset.set_charset(slot, Charset::UsAscii);
                }
            }
            3 => {
                if self.flags.contains(TermFlags::ALLOW_COLUMN_CHANGE) {
                    self.set_width(132);
                }
                self.clear_screen();
                self.flags.remove(TermFlags::LEFT_RIGHT_MARGIN_MODE);
            }
            4 => self.flags.insert(TermFlags::SMOOTH_SCROLLING),
            5 => self.flags.insert(TermFlags::REVERSE_VIDEO),
            6 => {
                self.flags.insert(TermFlags::ORIGIN_MODE);
                let (screen, buf) = self.parts();
                screen.set_stay_within_margins(true, buf);
            }
            7 => self.flags.insert(TermFlags::AUTOWRAP),
            8 => self.flags.insert(TermFlags::AUTOREPEAT),
            9 => {
                self.flags.remove(TermFlags::MOUSE_MODE_MASK);
                self.flags.insert(TermFlags::X10_MOUSE_MODE);
            }
            12 => {
                if self.cursor_style & 1 == 0 {
                    self.cursor_style -= 1;
                    self.set_attribute("cursor", self.cursor_style.to_string());
                }
            }
            25 => self.flags.insert(TermFlags::CURSOR_VISIBLE),
            40 => self.flags.insert(TermFlags::ALLOW_COLUMN_CHANGE),
            45 => self.flags.insert(TermFlags::REVERSE_AUTOWRAP),
            47 => {
                self.set_alt_active(true);
                self.flags.insert(TermFlags::APP_SCREEN);
            }
            66 => self.flags.insert(TermFlags::APP_KEYPAD),
            69 => {
                self.flags.insert(TermFlags::LEFT_RIGHT_MARGIN_MODE);
                let height = self.screen.height();
                for y in 0..height {
                    let (screen, buf) = self.parts();
                    screen.set_line_flags_at(y, LineFlags::empty(), buf);
                }
            }
            1000 => {
                self.flags.remove(TermFlags::MOUSE_MODE_MASK);
                self.flags.insert(TermFlags::NORMAL_MOUSE_MODE);
            }
            1001 => {
                self.flags.remove(TermFlags::MOUSE_MODE_MASK);
                self.flags.insert(TermFlags::HIGHLIGHT_MOUSE_MODE);
            }
            1002 => {
                self.flags.remove(TermFlags::MOUSE_MODE_MASK);
                self.flags.insert(TermFlags::BUTTON_EVENT_MOUSE_MODE);
            }
            1003 => {
                self.flags.remove(TermFlags::MOUSE_MODE_MASK);
                self.flags.insert(TermFlags::ANY_EVENT_MOUSE_MODE);
            }
            1004 => self.flags.insert(TermFlags::FOCUS_EVENT_MODE),
            1005 => {
                self.flags.remove(TermFlags::EXT_MOUSE_MODE_MASK);
                self.flags.insert(TermFlags::UTF8_EXT_MOUSE_MODE);
            }
            1006 => {
                self.flags.remove(TermFlags::EXT_MOUSE_MODE_MASK);
                self.flags.insert(TermFlags::SGR_EXT_MOUSE_MODE);
            }
            1007 => self.flags.insert(TermFlags::ALT_SCROLL_MOUSE_MODE),
            1015 => {
                self.flags.remove(TermFlags::EXT_MOUSE_MODE_MASK);
                self.flags.insert(TermFlags::URXVT_EXT_MOUSE_MODE);
            }
            1047 => {
                self.set_alt_active(true);
                self.flags.insert(TermFlags::APP_SCREEN);
            }
            1048 => self.cmd_save_cursor(),
            1049 => {
                self.cmd_save_cursor();
                self.bufs[1].clear();
                self.set_alt_active(true);
                self.flags.insert(TermFlags::APP_SCREEN);
            }
            2004 => self.flags.insert(TermFlags::BRACKETED_PASTE_MODE),
            _ => {}
        }
    }

    pub(crate) fn reset_private_mode(&mut self, mode: u32) {
        match mode {
            1 => self.flags.remove(TermFlags::APP_CU_KEYS),
            2 => self.flags.remove(TermFlags::ANSI),
            3 => {
                if self.flags.contains(TermFlags::ALLOW_COLUMN_CHANGE) {
                    self.set_width(80);
                }
                self.clear_screen();
                self.flags.remove(TermFlags::LEFT_RIGHT_MARGIN_MODE);
            }
            4 => self.flags.remove(TermFlags::SMOOTH_SCROLLING),
            5 => self.flags.remove(TermFlags::REVERSE_VIDEO),
            6 => {
                self.flags.remove(TermFlags::ORIGIN_MODE);
                let (screen, buf) = self.parts();
                screen.set_stay_within_margins(false, buf);
            }
            7 => self.flags.remove(TermFlags::AUTOWRAP),
            8 => self.flags.remove(TermFlags::AUTOREPEAT),
            9 | 1000 | 1001 | 1002 | 1003 => {
                self.flags.remove(TermFlags::MOUSE_MODE_MASK);
            }
            12 => {
                if self.cursor_style & 1 == 1 {
                    self.cursor_style += 1;
                    self.set_attribute("cursor", self.cursor_style.to_string());
                }
            }
            25 => self.flags.remove(TermFlags::CURSOR_VISIBLE),
            40 => self.flags.remove(TermFlags::ALLOW_COLUMN_CHANGE),
            45 => self.flags.remove(TermFlags::REVERSE_AUTOWRAP),
            47 => {
                self.set_alt_active(false);
                self.flags.remove(TermFlags::APP_SCREEN);
            }
            66 => self.flags.remove(TermFlags::APP_KEYPAD),
            69 => {
                self.flags.remove(TermFlags::LEFT_RIGHT_MARGIN_MODE);
                let width = self.screen.width();
                let mut margins = *self.screen.margins();
                margins.set_left(0);
                margins.set_width(width);
                let (screen, buf) = self.parts();
                screen.set_margins(margins, buf);
            }
            1004 => self.flags.remove(TermFlags::FOCUS_EVENT_MODE),
            1005 | 1006 | 1015 => self.flags.remove(TermFlags::EXT_MOUSE_MODE_MASK),
            1007 => self.flags.remove(TermFlags::ALT_SCROLL_MOUSE_MODE),
            1047 => {
                if self.alt_active {
                    self.bufs[1].clear();
                }
                self.set_alt_active(false);
                self.flags.remove(TermFlags::APP_SCREEN);
            }
            1048 => self.cmd_restore_cursor(),
            1049 => {
                self.set_alt_active(false);
                self.flags.remove(TermFlags::APP_SCREEN);
                self.cmd_restore_cursor();
            }
            2004 => self.flags.remove(TermFlags::BRACKETED_PASTE_MODE),
            _ => {}
        }
    }

    fn cmd_private_mode_save(&mut self, params: &[u32]) {
        for &mode in params {
            let value = match mode {
                1 => self.flags.contains(TermFlags::APP_CU_KEYS),
                2 => self.flags.contains(TermFlags::ANSI),
                4 => self.flags.contains(TermFlags::SMOOTH_SCROLLING),
                5 => self.flags.contains(TermFlags::REVERSE_VIDEO),
                6 => self.flags.contains(TermFlags::ORIGIN_MODE),
                7 => self.flags.contains(TermFlags::AUTOWRAP),
                8 => self.flags.contains(TermFlags::AUTOREPEAT),
                9 => self.flags.contains(TermFlags::X10_MOUSE_MODE),
                12 => self.cursor_style & 1 == 1,
                25 => self.flags.contains(TermFlags::CURSOR_VISIBLE),
                40 => self.flags.contains(TermFlags::ALLOW_COLUMN_CHANGE),
                45 => self.flags.contains(TermFlags::REVERSE_AUTOWRAP),
                47 | 1047 | 1049 => self.flags.contains(TermFlags::APP_SCREEN),
                66 => self.flags.contains(TermFlags::APP_KEYPAD),
                69 => self.flags.contains(TermFlags::LEFT_RIGHT_MARGIN_MODE),
                1000 => self.flags.contains(TermFlags::NORMAL_MOUSE_MODE),
                1001 => self.flags.contains(TermFlags::HIGHLIGHT_MOUSE_MODE),
                1002 => self.flags.contains(TermFlags::BUTTON_EVENT_MOUSE_MODE),
                1003 => self.flags.contains(TermFlags::ANY_EVENT_MOUSE_MODE),
                1004 => self.flags.contains(TermFlags::FOCUS_EVENT_MODE),
                1005 => self.flags.contains(TermFlags::UTF8_EXT_MOUSE_MODE),
                1006 => self.flags.contains(TermFlags::SGR_EXT_MOUSE_MODE),
                1007 => self.flags.contains(TermFlags::ALT_SCROLL_MOUSE_MODE),
                1015 => self.flags.contains(TermFlags::URXVT_EXT_MOUSE_MODE),
                2004 => self.flags.contains(TermFlags::BRACKETED_PASTE_MODE),
                _ => continue,
            };
            self.saved_modes.insert(mode as u16, value);
        }
    }

    fn cmd_character_attributes(&mut self, params: &[u32], count: usize) {
        if count == 0 {
            self.attributes.flags.remove(CellFlags::ALL);
            self.attributes.fg = 0;
            self.attributes.bg = 0;
            return;
        }

        let mut i = 0;
        let n = params.len();
        while i < n {
            let arg = params[i];
            match arg {
                0 => {
                    self.attributes.flags.remove(CellFlags::ALL);
                    self.attributes.fg = 0;
                    self.attributes.bg = 0;
                }
                1 => self.attributes.flags.insert(CellFlags::BOLD),
                2 => self.attributes.flags.insert(CellFlags::FAINT),
                3 => self.attributes.flags.insert(CellFlags::ITALICS),
                4 => self.attributes.flags.insert(CellFlags::UNDERLINE),
                5 => {
                    self.attributes.flags.insert(CellFlags::BLINK);
                    self.flags.insert(TermFlags::BLINK_SEEN);
                }
                6 => {
                    self.attributes.flags.insert(CellFlags::FAST_BLINK);
                    self.flags.insert(TermFlags::BLINK_SEEN);
                }
                7 => self.attributes.flags.insert(CellFlags::INVERSE),
                8 => self.attributes.flags.insert(CellFlags::INVISIBLE),
                9 => self.attributes.flags.insert(CellFlags::STRIKETHROUGH),
                10 => self.attributes.flags.remove(CellFlags::FONT_MASK),
                11 => self.attributes.flags.insert(CellFlags::ALT_FONT1),
                12 => self.attributes.flags.insert(CellFlags::ALT_FONT2),
                20 => self.attributes.flags.insert(CellFlags::ALT_FONT0),
                21 => self.attributes.flags.insert(CellFlags::DBL_UNDERLINE),
                22 => self
                    .attributes
                    .flags
                    .remove(CellFlags::BOLD | CellFlags::FAINT),
                23 => self
                    .attributes
                    .flags
                    .remove(CellFlags::ITALICS | CellFlags::ALT_FONT0),
                24 => self
                    .attributes
                    .flags
                    .remove(CellFlags::UNDERLINE | CellFlags::DBL_UNDERLINE),
                25 => self
                    .attributes
                    .flags
                    .remove(CellFlags::BLINK | CellFlags::FAST_BLINK),
                27 => self.attributes.flags.remove(CellFlags::INVERSE),
                28 => self.attributes.flags.remove(CellFlags::INVISIBLE),
                29 => self.attributes.flags.remove(CellFlags::STRIKETHROUGH),
                39 => {
                    self.attributes
                        .flags
                        .remove(CellFlags::FG | CellFlags::FG_INDEX);
                    self.attributes.fg = 0;
                }
                49 => {
                    self.attributes
                        .flags
                        .remove(CellFlags::BG | CellFlags::BG_INDEX);
                    self.attributes.bg = 0;
                }
                51 => self.attributes.flags.insert(CellFlags::FRAMED),
                52 => self.attributes.flags.insert(CellFlags::ENCIRCLED),
                53 => self.attributes.flags.insert(CellFlags::OVERLINE),
                54 => self
                    .attributes
                    .flags
                    .remove(CellFlags::FRAMED | CellFlags::ENCIRCLED),
                55 => self.attributes.flags.remove(CellFlags::OVERLINE),
                38 | 48 => {
                    i += 1;
                    if i == n {
                        break;
                    }
                    match params[i] {
                        5 => {
                            i += 1;
                            if i == n {
                                return;
                            }
                            if arg == 38 {
                                self.attributes
                                    .flags
                                    .insert(CellFlags::FG | CellFlags::FG_INDEX);
                                self.attributes.fg = params[i];
                            } else {
                                self.attributes
                                    .flags
                                    .insert(CellFlags::BG | CellFlags::BG_INDEX);
                                self.attributes.bg = params[i];
                            }
                        }
                        2 => {
                            if n - i < 4 {
                                return;
                            }
                            let r = params[i + 1] as u8;
                            let g = params[i + 2] as u8;
                            let b = params[i + 3] as u8;
                            i += 3;
                            if arg == 38 {
                                self.attributes.flags.insert(CellFlags::FG);
                                self.attributes.flags.remove(CellFlags::FG_INDEX);
                                self.attributes.fg = make_color(r, g, b);
                            } else {
                                self.attributes.flags.insert(CellFlags::BG);
                                self.attributes.flags.remove(CellFlags::BG_INDEX);
                                self.attributes.bg = make_color(r, g, b);
                            }
                        }
                        _ => return,
                    }
                }
                30..=37 => {
                    self.attributes
                        .flags
                        .insert(CellFlags::FG | CellFlags::FG_INDEX);
                    self.attributes.fg = arg - 30;
                }
                40..=47 => {
                    self.attributes
                        .flags
                        .insert(CellFlags::BG | CellFlags::BG_INDEX);
                    self.attributes.bg = arg - 40;
                }
                90..=97 => {
                    self.attributes
                        .flags
                        .insert(CellFlags::FG | CellFlags::FG_INDEX);
                    self.attributes.fg = arg - 82;
                }
                100..=107 => {
                    self.attributes
                        .flags
                        .insert(CellFlags::BG | CellFlags::BG_INDEX);
                    self.attributes.bg = arg - 92;
                }
                _ => {}
            }
            i += 1;
        }
    }

    fn cmd_reset_title_modes(&mut self, params: &[u32]) {
        for &arg in params {
            match arg {
                0 => self.flags.remove(TermFlags::TITLE_MODE_SET_HEX),
                1 => self.flags.remove(TermFlags::TITLE_MODE_QUERY_HEX),
                _ => {}
            }
        }
    }

    fn cmd_set_title_modes(&mut self, params: &[u32]) {
        for &arg in params {
            match arg {
                0 => self.flags.insert(TermFlags::TITLE_MODE_SET_HEX),
                1 => self.flags.insert(TermFlags::TITLE_MODE_QUERY_HEX),
                _ => {}
            }
        }
    }
}

pub(crate) fn clamp_size(size: Size) -> Size {
    Size::new(
        size.width.clamp(TERM_MIN_COLS, TERM_MAX_COLS),
        size.height.clamp(TERM_MIN_ROWS, TERM_MAX_ROWS),
    )
}

/// Keep job-state helpers visible for tests without re-exporting the screen.
pub fn job_state_of(emulator: &XtermEmulator) -> JobState {
    emulator.screen.job_state()
}

#[cfg(test)]
mod tests;
