//! The emission engine: turn a watcher's accumulated state into the minimal
//! frame sequence.
//!
//! Within one emission the order is fixed: BEGIN_OUTPUT, flags, buffer
//! capacity-or-length per buffer, buffer switch, size and margins, cursor,
//! bell, region updates, row updates (ascending, buffer 0 then 1),
//! attribute changes, END_OUTPUT. MOUSE_MOVED rides outside the envelope so
//! clients can rate-limit it independently. Every frame's payload leads
//! with the subject terminal's UUID.

use core_cells::{CellRow, bufreg_reg};
use core_emu::XtermEmulator;
use core_wire::{Command, Id, encode_frame};

use crate::watch::WatchState;

struct FrameBuilder<'a> {
    id: &'a Id,
    payload: Vec<u8>,
}

impl<'a> FrameBuilder<'a> {
    fn new(id: &'a Id) -> Self {
        let mut payload = Vec::with_capacity(64);
        payload.extend_from_slice(id.as_bytes());
        FrameBuilder { id, payload }
    }

    fn u32(mut self, v: u32) -> Self {
        self.payload.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn u64(mut self, v: u64) -> Self {
        self.payload.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn bytes(mut self, b: &[u8]) -> Self {
        self.payload.extend_from_slice(b);
        self
    }

    fn finish(self, command: Command) -> Vec<u8> {
        encode_frame(command as u32, &self.payload)
    }

    fn restart(&mut self) -> FrameBuilder<'a> {
        FrameBuilder::new(self.id)
    }
}

fn row_frame(id: &Id, bufid: u8, index: u64, row: &CellRow) -> Vec<u8> {
    let mut b = FrameBuilder::new(id)
        .u64(index)
        .u32(row.flags.bits() | bufid as u32)
        .u32(row.modtime as u32)
        .u32(row.num_ranges());

    for r in row.ranges() {
        b = b
            .u32(r.start)
            .u32(r.end)
            .u32(r.flags.bits())
            .u32(r.fg)
            .u32(r.bg)
            .u32(r.link);
    }
    b.bytes(row.as_str().as_bytes()).finish(Command::RowContent)
}

/// Encode the frames for one watcher. `state` is drained; the caller holds
/// the terminal state lock.
pub fn encode_term_updates(id: &Id, emulator: &XtermEmulator, state: &mut WatchState) -> Vec<Vec<u8>> {
    let mut out = Vec::new();

    let mouse_moved = state.mouse_moved;
    let have_output = state.flags_changed
        || state.buffer_changed != [[false; 2]; 2]
        || state.buffer_switched
        || state.size_changed
        || state.cursor_changed
        || state.bell_count != 0
        || !state.changed_rows[0].is_empty()
        || !state.changed_rows[1].is_empty()
        || !state.changed_regions.is_empty()
        || !state.changed_attributes.is_empty();

    if have_output {
        let mut b = FrameBuilder::new(id);
        out.push(b.restart().finish(Command::BeginOutput));

        if state.flags_changed {
            out.push(b.restart().u64(emulator.flags().bits()).finish(Command::FlagsChanged));
        }

        for bufid in 0..2usize {
            let buffer = emulator.buffer(bufid);
            if state.buffer_changed[bufid][1] {
                out.push(
                    b.restart()
                        .u64(buffer.size())
                        .u32((buffer.caporder_wire() as u32) << 8 | bufid as u32)
                        .finish(Command::BufferCapacity),
                );
            } else if state.buffer_changed[bufid][0] {
                out.push(
                    b.restart()
                        .u64(buffer.size())
                        .u32(bufid as u32)
                        .finish(Command::BufferLength),
                );
            }
        }

        if state.buffer_switched {
            out.push(
                b.restart()
                    .u32(emulator.alt_active() as u32)
                    .finish(Command::BufferSwitched),
            );
        }

        if state.size_changed {
            let size = emulator.size();
            let margins = emulator.margins();
            out.push(
                b.restart()
                    .u32(size.width as u32)
                    .u32(size.height as u32)
                    .u32(margins.left() as u32)
                    .u32(margins.top() as u32)
                    .u32(margins.width() as u32)
                    .u32(margins.height() as u32)
                    .finish(Command::SizeChanged),
            );
        }

        if state.cursor_changed {
            let cursor = emulator.cursor();
            out.push(
                b.restart()
                    .u32(cursor.x as u32)
                    .u32(cursor.y as u32)
                    .u32(cursor.pos() as u32)
                    .u32(cursor.flags().bits())
                    .finish(Command::CursorMoved),
            );
        }

        if state.bell_count != 0 {
            out.push(
                b.restart()
                    .u32(0)
                    .u32(state.bell_count)
                    .finish(Command::BellRang),
            );
        }

        for &bufreg in &state.changed_regions {
            let bufid = core_cells::bufreg_buf(bufreg) as usize;
            let Some(region) = emulator.buffer(bufid).region(bufreg_reg(bufreg)) else {
                continue;
            };

            let mut attrs = Vec::new();
            for (key, value) in &region.attributes {
                attrs.extend_from_slice(key.as_bytes());
                attrs.push(0);
                attrs.extend_from_slice(value.as_bytes());
                attrs.push(0);
            }

            out.push(
                b.restart()
                    .u32(region.id)
                    .u32(region.wire_type())
                    .u32(region.flags.bits())
                    .u32(region.parent)
                    .u64(region.start_row)
                    .u64(region.end_row)
                    .u32(region.start_col)
                    .u32(region.end_col)
                    .bytes(&attrs)
                    .finish(Command::RegionUpdate),
            );
        }

        for bufid in 0..2usize {
            let buffer = emulator.buffer(bufid);
            let size = buffer.size();
            for &i in &state.changed_rows[bufid] {
                if i >= size {
                    break;
                }
                out.push(row_frame(id, bufid as u8, i, buffer.const_row(i)));
            }
        }

        for line in state.changed_attributes.values() {
            out.push(b.restart().bytes(line).finish(Command::GetTermAttribute));
        }

        out.push(b.restart().finish(Command::EndOutput));
    }

    if mouse_moved {
        let pos = emulator.screen().mouse_pos();
        out.push(
            FrameBuilder::new(id)
                .u32(pos.x as u32)
                .u32(pos.y as u32)
                .finish(Command::MouseMoved),
        );
    }

    state.clear();
    out
}

/// Encode a base-state emission for connection or server watches: one
/// attribute frame per entry.
pub fn encode_attribute_updates(
    id: &Id,
    command: Command,
    attributes: &std::collections::BTreeMap<String, String>,
) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    for (key, value) in attributes {
        let mut b = FrameBuilder::new(id);
        b = b.bytes(key.as_bytes());
        b = b.bytes(&[0]);
        b = b.bytes(value.as_bytes());
        b = b.bytes(&[0]);
        out.push(b.finish(command));
    }
    out
}

/// The frame that tells a watcher its subject went away.
pub fn encode_closing(id: &Id, command: Command, reason: u32) -> Vec<u8> {
    FrameBuilder::new(id).u32(reason).finish(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_buffer::Size;
    use core_cells::{AttrRange, LineFlags};
    use core_emu::{EmulatorOptions, XtermEmulator};
    use core_wire::{Frame, Framing, RawFraming};

    fn emu_with(input: &[u8]) -> XtermEmulator {
        let mut e = XtermEmulator::new(Size::new(80, 24), &EmulatorOptions::default());
        e.reset_event_state();
        e.term_event(input, 7);
        e
    }

    fn watcher_state(e: &XtermEmulator) -> WatchState {
        let mut state = WatchState::default();
        state.merge_events(e.events());
        for bufid in 0..2 {
            let buf = e.buffer(bufid);
            state.merge_rows(bufid, &buf.events().changed_rows, buf.size(), buf.screen_height());
            state.merge_regions(&buf.events().changed_regions);
        }
        state
    }

    fn decode_all(frames: &[Vec<u8>]) -> Vec<Frame> {
        let mut machine = RawFraming::new();
        let mut out = Vec::new();
        for f in frames {
            machine.feed(f, &mut out).unwrap();
        }
        out
    }

    #[test]
    fn emission_is_enveloped_and_ordered() {
        let id = Id::generate();
        let e = emu_with(b"hello");
        let mut state = watcher_state(&e);

        let frames = decode_all(&encode_term_updates(&id, &e, &mut state));
        assert_eq!(frames.first().unwrap().command, Command::BeginOutput as u32);
        assert_eq!(frames.last().unwrap().command, Command::EndOutput as u32);

        // Cursor frame precedes row content
        let cursor_at = frames
            .iter()
            .position(|f| f.command == Command::CursorMoved as u32)
            .unwrap();
        let row_at = frames
            .iter()
            .position(|f| f.command == Command::RowContent as u32)
            .unwrap();
        assert!(cursor_at < row_at);

        // Every payload leads with the subject id
        for f in &frames {
            assert_eq!(&f.payload[..16], id.as_bytes());
        }

        assert!(state.is_empty());
    }

    #[test]
    fn row_frame_round_trips_to_cell_row() {
        let id = Id::generate();
        let e = emu_with(b"\x1b[1mbold\x1b[0m plain");
        let mut state = watcher_state(&e);

        let frames = decode_all(&encode_term_updates(&id, &e, &mut state));
        let row = frames
            .iter()
            .find(|f| f.command == Command::RowContent as u32)
            .unwrap();

        let p = &row.payload[16..];
        let index = u64::from_le_bytes(p[0..8].try_into().unwrap());
        let line_flags = u32::from_le_bytes(p[8..12].try_into().unwrap());
        let modtime = u32::from_le_bytes(p[12..16].try_into().unwrap()) as i32;
        let nranges = u32::from_le_bytes(p[16..20].try_into().unwrap()) as usize;

        assert_eq!(index, 0);
        assert_eq!(line_flags & 0xff, 0); // buffer id
        assert_eq!(modtime, 7);

        let mut ranges = Vec::new();
        let mut at = 20;
        for _ in 0..nranges {
            let words: Vec<u32> = (0..6)
                .map(|i| u32::from_le_bytes(p[at + i * 4..at + i * 4 + 4].try_into().unwrap()))
                .collect();
            ranges.push(AttrRange {
                start: words[0],
                end: words[1],
                flags: core_cells::CellFlags::from_bits_retain(words[2]),
                fg: words[3],
                bg: words[4],
                link: words[5],
            });
            at += 24;
        }
        let text = std::str::from_utf8(&p[at..]).unwrap();

        let rebuilt = CellRow::restore(
            text.to_owned(),
            ranges,
            LineFlags::from_bits_retain(line_flags & !0xff),
            modtime,
        );
        let original = e.buffer(0).const_row(0);
        assert_eq!(rebuilt.as_str(), original.as_str());
        assert_eq!(rebuilt.ranges(), original.ranges());
        assert_eq!(rebuilt.columns(), original.columns());
    }

    #[test]
    fn empty_state_emits_nothing() {
        let id = Id::generate();
        let e = emu_with(b"x");
        let mut state = WatchState::default();
        let frames = encode_term_updates(&id, &e, &mut state);
        assert!(frames.is_empty());
    }

    #[test]
    fn mouse_moved_rides_outside_the_envelope() {
        let id = Id::generate();
        let mut e = emu_with(b"");
        e.move_mouse(core_buffer::Point::new(3, 4));

        let mut state = WatchState::default();
        state.mouse_moved = true;
        let frames = decode_all(&encode_term_updates(&id, &e, &mut state));

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::MouseMoved as u32);
        let p = &frames[0].payload[16..];
        assert_eq!(u32::from_le_bytes(p[0..4].try_into().unwrap()), 3);
        assert_eq!(u32::from_le_bytes(p[4..8].try_into().unwrap()), 4);
    }

    #[test]
    fn capacity_preferred_over_length() {
        let id = Id::generate();
        let mut e = emu_with(b"");
        e.reset_event_state();
        e.buffer_resize(0, 9);
        let mut state = watcher_state(&e);

        let frames = decode_all(&encode_term_updates(&id, &e, &mut state));
        assert!(frames.iter().any(|f| f.command == Command::BufferCapacity as u32));
        assert!(!frames.iter().any(|f| f.command == Command::BufferLength as u32));

        let cap = frames
            .iter()
            .find(|f| f.command == Command::BufferCapacity as u32)
            .unwrap();
        let word = u32::from_le_bytes(cap.payload[24..28].try_into().unwrap());
        assert_eq!(word & 0xff, 0); // buffer id
        assert_eq!((word >> 8) & 0x7f, 9); // caporder
    }

    #[test]
    fn region_updates_carry_attribute_map() {
        let id = Id::generate();
        let e = emu_with(b"\x1b]133;A\x07$ \x1b]133;B\x07true\x1b]133;C\x07\x1b]133;D;0\x07");
        let mut state = watcher_state(&e);

        let frames = decode_all(&encode_term_updates(&id, &e, &mut state));
        let regions: Vec<_> = frames
            .iter()
            .filter(|f| f.command == Command::RegionUpdate as u32)
            .collect();
        assert!(!regions.is_empty());

        // The job region carries command and rc attributes
        let found = regions.iter().any(|f| {
            let attrs = &f.payload[16 + 40..];
            let text = String::from_utf8_lossy(attrs);
            text.contains("command\0true\0") && text.contains("rc\00\0")
        });
        assert!(found);
    }
}
