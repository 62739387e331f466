use core_buffer::Size;
use core_cells::{CellFlags, LineFlags, ResetFlags, TermFlags};

use crate::emulator::{EmulatorOptions, XtermEmulator};

fn emu(width: i32, height: i32) -> XtermEmulator {
    XtermEmulator::new(Size::new(width, height), &EmulatorOptions::default())
}

fn feed(e: &mut XtermEmulator, bytes: &[u8]) {
    e.reset_event_state();
    e.term_event(bytes, 1);
}

fn row_str(e: &XtermEmulator, y: u64) -> String {
    e.buffer(e.alt_active() as usize).const_row(y).as_str().to_owned()
}

fn visible(e: &XtermEmulator) -> Vec<String> {
    let buf = e.buffer(e.alt_active() as usize);
    let offset = e.screen().offset();
    (0..e.size().height as u64)
        .map(|y| buf.const_row(offset + y).as_str().to_owned())
        .collect()
}

#[test]
fn plain_text_lands_in_row_zero() {
    let mut e = emu(80, 24);
    feed(&mut e, b"abc");

    let row = e.buffer(0).const_row(0);
    assert_eq!(row.as_str(), "abc");
    assert!(row.ranges().is_empty());
    assert_eq!(row.flags, LineFlags::empty());

    let c = e.cursor();
    assert_eq!((c.x, c.y, c.pos()), (3, 0, 3));
    assert!(e.buffer(0).events().changed_rows.contains(&0));
    assert!(e.events().cursor_changed);
}

#[test]
fn sgr_bold_produces_one_range() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b[1mX");

    let row = e.buffer(0).const_row(0);
    assert_eq!(row.as_str(), "X");
    assert_eq!(row.ranges().len(), 1);
    let r = row.ranges()[0];
    assert_eq!((r.start, r.end), (0, 0));
    assert_eq!(r.flags, CellFlags::BOLD);
    assert_eq!((r.fg, r.bg, r.link), (0, 0, 0));
}

#[test]
fn sgr_extended_colors() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b[38;5;196mA\x1b[0m\x1b[48;2;1;2;3mB");

    let row = e.buffer(0).const_row(0);
    assert_eq!(row.ranges().len(), 2);
    let a = row.ranges()[0];
    assert!(a.flags.contains(CellFlags::FG | CellFlags::FG_INDEX));
    assert_eq!(a.fg, 196);
    let b = row.ranges()[1];
    assert!(b.flags.contains(CellFlags::BG));
    assert!(!b.flags.contains(CellFlags::BG_INDEX));
    assert_eq!(b.bg, 0x010203);
}

#[test]
fn wrap_sets_continuation_flag() {
    let mut e = emu(80, 24);
    let mut input = vec![b'a'; 80];
    input.push(b'a');
    feed(&mut e, &input);

    assert_eq!(row_str(&e, 0), "a".repeat(80));
    assert_eq!(row_str(&e, 1), "a");
    assert!(
        e.buffer(0)
            .const_row(1)
            .flags
            .contains(LineFlags::CONTINUATION)
    );
    let c = e.cursor();
    assert_eq!((c.x, c.y), (1, 1));
}

#[test]
fn no_autowrap_overwrites_last_cell() {
    let mut e = emu(10, 4);
    feed(&mut e, b"\x1b[?7l0123456789XY");

    assert_eq!(row_str(&e, 0), "012345678Y");
    let c = e.cursor();
    assert_eq!(c.x, 9);
    assert!(c.past_end());
}

#[test]
fn double_width_with_one_column_left_wraps() {
    let mut e = emu(10, 4);
    feed(&mut e, "012345678\u{6F22}".as_bytes());

    assert_eq!(row_str(&e, 0), "012345678");
    assert_eq!(row_str(&e, 1), "\u{6F22}");
    assert!(
        e.buffer(0)
            .const_row(1)
            .flags
            .contains(LineFlags::CONTINUATION)
    );
}

#[test]
fn cursor_movement_commands() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b[5;10H");
    assert_eq!((e.cursor().x, e.cursor().y), (9, 4));

    feed(&mut e, b"\x1b[2A\x1b[3C\x1b[1B\x1b[4D");
    assert_eq!((e.cursor().x, e.cursor().y), (8, 3));

    feed(&mut e, b"\x1b[G");
    assert_eq!(e.cursor().x, 0);
    feed(&mut e, b"\x1b[15G\x1b[d");
    assert_eq!((e.cursor().x, e.cursor().y), (14, 0));
}

#[test]
fn tabs_and_backtabs() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\t\t");
    assert_eq!(e.cursor().x, 16);
    feed(&mut e, b"\x1b[Z");
    assert_eq!(e.cursor().x, 8);
    feed(&mut e, b"\x1b[2I");
    assert_eq!(e.cursor().x, 24);
}

#[test]
fn scroll_region_contains_scrolling() {
    let mut e = emu(20, 6);
    feed(&mut e, b"r0\r\nr1\r\nr2\r\nr3\r\nr4\r\nr5");
    // Margins rows 2..4 (1-based 2..5 => 0-based 1..4)
    feed(&mut e, b"\x1b[2;5r");
    assert_eq!((e.cursor().x, e.cursor().y), (0, 0));

    // Cursor to bottom margin, then LF scrolls only the region
    feed(&mut e, b"\x1b[5;1Hnew");
    feed(&mut e, b"\n");
    let rows = visible(&e);
    assert_eq!(rows[0], "r0");
    assert_eq!(rows[1], "r2");
    assert_eq!(rows[2], "r3");
    assert_eq!(rows[3], "new");
    assert_eq!(rows[4], "");
    assert_eq!(rows[5], "r5");
    // No scrollback grew
    assert_eq!(e.buffer(0).size(), 6);
}

#[test]
fn origin_mode_offsets_cursor_addressing() {
    let mut e = emu(20, 10);
    feed(&mut e, b"\x1b[3;8r\x1b[?6h\x1b[1;1HX");
    // Row 1 in origin mode is the margin top (row 2, 0-based)
    assert_eq!(row_str(&e, 2), "X");
    feed(&mut e, b"\x1b[?6l");
}

#[test]
fn insert_delete_lines_respect_margins() {
    let mut e = emu(10, 5);
    feed(&mut e, b"a\r\nb\r\nc\r\nd\r\ne");
    feed(&mut e, b"\x1b[2;4r\x1b[2;1H\x1b[L");
    let rows = visible(&e);
    assert_eq!(rows, vec!["a", "", "b", "c", "e"]);

    feed(&mut e, b"\x1b[M");
    let rows = visible(&e);
    assert_eq!(rows, vec!["a", "b", "c", "", "e"]);
}

#[test]
fn erase_in_line_variants() {
    let mut e = emu(10, 3);
    feed(&mut e, b"0123456789\x1b[1;5H\x1b[K");
    assert_eq!(row_str(&e, 0), "0123");

    feed(&mut e, b"\x1b[2;1Habcdefghij\x1b[2;5H\x1b[1K");
    assert_eq!(row_str(&e, 1), "     fghij");

    feed(&mut e, b"\x1b[2K");
    assert_eq!(row_str(&e, 1), "");
}

#[test]
fn erase_characters_and_insert_cells() {
    let mut e = emu(10, 3);
    feed(&mut e, b"0123456789\x1b[1;3H\x1b[2X");
    assert_eq!(row_str(&e, 0), "01  456789");

    feed(&mut e, b"\x1b[1;1H\x1b[2@");
    assert_eq!(row_str(&e, 0), "  01  4567");
}

#[test]
fn protected_cells_survive_selective_erase() {
    let mut e = emu(20, 3);
    feed(&mut e, b"ab\x1b[1\"qcd\x1b[0\"qef");
    feed(&mut e, b"\x1b[?2J");
    assert_eq!(row_str(&e, 0), "  cd  ");
}

#[test]
fn alt_screen_switch_and_restore() {
    let mut e = emu(20, 5);
    feed(&mut e, b"normal\x1b[?1049h");
    assert!(e.alt_active());
    assert!(e.flags().contains(TermFlags::APP_SCREEN));
    assert!(e.events().buffer_switched);

    feed(&mut e, b"alt content");
    assert_eq!(row_str(&e, 0), "alt content");

    feed(&mut e, b"\x1b[?1049l");
    assert!(!e.alt_active());
    assert_eq!(row_str(&e, 0), "normal");
    assert_eq!((e.cursor().x, e.cursor().y), (6, 0));
}

#[test]
fn da1_reply() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b[c");
    assert_eq!(e.take_replies(), b"\x1b[?64;1;2;6;9;15;18;21;22c");
}

#[test]
fn da2_reply() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b[>c");
    assert_eq!(e.take_replies(), b"\x1b[>41;327;0c");
}

#[test]
fn dsr_cursor_position_reply() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b[4;8H\x1b[6n");
    assert_eq!(e.take_replies(), b"\x1b[4;8R");
    feed(&mut e, b"\x1b[5n");
    assert_eq!(e.take_replies(), b"\x1b[0n");
}

#[test]
fn palette_query_reports_entry() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b]4;1;?\x07");
    assert_eq!(e.take_replies(), b"\x1b]4;1;rgb:cdcd/0000/0000\x07");
}

#[test]
fn palette_set_and_reset() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b]4;1;#102030\x07");
    assert_eq!(e.palette().get(1), 0x102030);
    assert!(e.attribute("session.palette").is_some());

    feed(&mut e, b"\x1b]104;1\x07");
    assert_eq!(e.palette().get(1), 0xcd0000);
}

#[test]
fn special_colors_via_osc_10() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b]10;#ffffff;#000000\x07");
    assert_eq!(e.palette().get(260), 0xffffff);
    assert_eq!(e.palette().get(261), 0x000000);

    feed(&mut e, b"\x1b]11;?\x07");
    assert_eq!(e.take_replies(), b"\x1b]11;rgb:0000/0000/0000\x07");
}

#[test]
fn mode_request_reports() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b[?2004h\x1b[?2004$p");
    assert_eq!(e.take_replies(), b"\x1b[?2004;1$y");

    feed(&mut e, b"\x1b[?2004l\x1b[?2004$p");
    assert_eq!(e.take_replies(), b"\x1b[?2004;2$y");

    // Permanently unset
    feed(&mut e, b"\x1b[?1050$p");
    assert_eq!(e.take_replies(), b"\x1b[?1050;4$y");

    feed(&mut e, b"\x1b[4h\x1b[4$p");
    assert_eq!(e.take_replies(), b"\x1b[4;1$y");
}

#[test]
fn private_mode_save_restore() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b[?2004h\x1b[?2004s\x1b[?2004l");
    assert!(!e.flags().contains(TermFlags::BRACKETED_PASTE_MODE));
    feed(&mut e, b"\x1b[?2004r");
    assert!(e.flags().contains(TermFlags::BRACKETED_PASTE_MODE));
}

#[test]
fn decaln_fills_screen() {
    let mut e = emu(12, 4);
    feed(&mut e, b"\x1b#8");
    for row in visible(&e) {
        assert_eq!(row, "E".repeat(12));
    }
}

#[test]
fn osc133_job_cycle_end_to_end() {
    let mut e = emu(40, 10);
    feed(&mut e, b"\x1b]133;A\x07$ ");
    feed(&mut e, b"\x1b]133;B\x07echo hi\r\n");
    feed(&mut e, b"\x1b]133;C\x07hi\r\n");
    feed(&mut e, b"\x1b]133;D;0\x07");

    let buf = e.buffer(0);
    let mut job = None;
    let mut children = Vec::new();
    for id in 1..=16 {
        if let Some(r) = buf.region(id) {
            if r.ty == core_buffer::RegionType::Job {
                job = Some(r);
            } else {
                children.push(r);
            }
        }
    }

    let job = job.expect("job region");
    use core_cells::RegionFlags as RF;
    assert!(job.flags.contains(
        RF::HAS_START | RF::HAS_END | RF::HAS_PROMPT | RF::HAS_COMMAND | RF::HAS_OUTPUT
    ));
    assert_eq!(job.attributes.get("command").unwrap(), "echo hi");
    assert_eq!(job.attributes.get("rc").unwrap(), "0");
    assert!(job.attributes.contains_key("started"));
    assert!(job.attributes.contains_key("ended"));

    let types: Vec<_> = children
        .iter()
        .filter(|r| r.parent == job.id)
        .map(|r| r.ty)
        .collect();
    assert!(types.contains(&core_buffer::RegionType::Prompt));
    assert!(types.contains(&core_buffer::RegionType::Command));
    assert!(types.contains(&core_buffer::RegionType::Output));
}

#[test]
fn partial_command_is_published_as_attribute() {
    let mut e = emu(40, 10);
    feed(&mut e, b"\x1b]133;A\x07$ \x1b]133;B\x07git sta");
    assert_eq!(e.attribute("command"), Some("git sta"));
}

#[test]
fn osc8_hyperlink_marks_cells() {
    let mut e = emu(40, 5);
    feed(&mut e, b"\x1b]8;;http://example.com\x07link\x1b]8;;\x07plain");

    let row = e.buffer(0).const_row(0);
    assert_eq!(row.as_str(), "linkplain");
    let link_range = row.ranges()[0];
    assert!(link_range.flags.contains(CellFlags::HYPERLINK));
    assert_eq!((link_range.start, link_range.end), (0, 3));

    let region = e.buffer(0).region(link_range.link).unwrap();
    assert_eq!(region.ty, core_buffer::RegionType::Content);
    assert_eq!(region.attributes.get("uri").unwrap(), "http://example.com");
}

#[test]
fn osc1337_inline_image_creates_region_and_moves_cursor() {
    let mut e = emu(40, 12);
    let payload = base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        b"fake image bytes",
    );
    let seq = format!("\x1b]1337;File=inline=1;width=10;height=3:{payload}\x07");
    feed(&mut e, seq.as_bytes());

    let buf = e.buffer(0);
    let region = (1..=8)
        .filter_map(|id| buf.region(id))
        .find(|r| r.ty == core_buffer::RegionType::Image)
        .expect("image region");
    assert_eq!(region.attributes.get("width").unwrap(), "10");
    assert!(region.attributes.contains_key("id"));
    assert_eq!(e.content().len(), 1);

    assert_eq!((e.cursor().x, e.cursor().y), (10, 2));
}

#[test]
fn osc1337_image_bad_height_falls_back_to_default() {
    let mut e = emu(40, 12);
    let payload =
        base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"bytes");
    let seq = format!("\x1b]1337;File=inline=1;width=4;height=junk:{payload}\x07");
    feed(&mut e, seq.as_bytes());

    // Default height is a third of the screen
    assert_eq!(e.cursor().y, 3);
}

#[test]
fn title_and_title_stack() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b]2;first\x07");
    assert_eq!(e.attribute("session.title"), Some("first"));

    feed(&mut e, b"\x1b[22;2t\x1b]2;second\x07");
    assert_eq!(e.attribute("session.title"), Some("second"));

    feed(&mut e, b"\x1b[23;2t");
    assert_eq!(e.attribute("session.title"), Some("first"));
}

#[test]
fn title_query_reports() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b]2;mytitle\x07\x1b[21t");
    assert_eq!(e.take_replies(), b"\x1b]lmytitle\x1b\\");
}

#[test]
fn osc52_clipboard_set_and_query() {
    let mut e = emu(80, 24);
    // "hello" in base64
    feed(&mut e, b"\x1b]52;c;aGVsbG8=\x07");
    assert_eq!(e.attribute("clipboard.c"), Some("aGVsbG8="));

    feed(&mut e, b"\x1b]52;c;?\x07");
    assert_eq!(e.take_replies(), b"\x1b]52;c;aGVsbG8=\x07");
}

#[test]
fn osc513_attribute_query() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b]2;abc\x07\x1b]513;session.title\x07");
    assert_eq!(e.take_replies(), b"\x1b]514;session.title=YWJj\x07");
}

#[test]
fn osc514_whitelist_enforced() {
    let mut e = emu(80, 24);
    // session.badge is settable
    feed(&mut e, b"\x1b]514;session.badge=YWJj\x07");
    assert_eq!(e.attribute("session.badge"), Some("abc"));

    // session.title is not settable through this path
    feed(&mut e, b"\x1b]514;session.title=YWJj\x07");
    assert_ne!(e.attribute("session.title"), Some("abc"));
}

#[test]
fn ed3_clears_normal_scrollback_only() {
    let mut e = emu(10, 4);
    for i in 0..10 {
        feed(&mut e, format!("line{i}\r\n").as_bytes());
    }
    assert!(e.buffer(0).size() > 4);

    feed(&mut e, b"\x1b[3J");
    assert_eq!(e.buffer(0).size(), 4);
    assert_eq!(e.buffer(1).size(), 4);
    // The visible window survives
    assert_eq!(row_str(&e, 0), "line7");
}

#[test]
fn ris_is_idempotent() {
    let mut e = emu(20, 6);
    feed(&mut e, b"\x1b[1mhello\x1b[5;5H\x1b[?6h\x1b[2;4r");

    feed(&mut e, b"\x1bc");
    let flags_once = e.flags();
    let rows_once = visible(&e);
    let cursor_once = (e.cursor().x, e.cursor().y);

    feed(&mut e, b"\x1bc");
    assert_eq!(e.flags(), flags_once);
    assert_eq!(visible(&e), rows_once);
    assert_eq!((e.cursor().x, e.cursor().y), cursor_once);
}

#[test]
fn reset_entry_point_processes_greeting() {
    let mut e = emu(20, 6);
    feed(&mut e, b"old content");
    e.reset_event_state();
    e.term_reset(b"fresh", ResetFlags::RESET_EMULATOR | ResetFlags::CLEAR_SCREEN, 2);
    assert_eq!(row_str(&e, 0), "fresh");
}

#[test]
fn rep_repeats_previous_cluster() {
    let mut e = emu(20, 4);
    feed(&mut e, b"ab\x1b[3b");
    assert_eq!(row_str(&e, 0), "abbbb");
}

#[test]
fn decscusr_updates_cursor_attribute() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b[4 q");
    assert_eq!(e.attribute("cursor"), Some("4"));

    // DECSET 12 toggles the blink bit of the stored style
    feed(&mut e, b"\x1b[?12h");
    assert_eq!(e.attribute("cursor"), Some("3"));
    feed(&mut e, b"\x1b[?12l");
    assert_eq!(e.attribute("cursor"), Some("4"));
}

#[test]
fn decrqss_reports_margins_and_sgr() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b[3;10r\x1bP$qr\x1b\\");
    assert_eq!(e.take_replies(), b"\x1bP1$r3;10r\x1b\\");

    feed(&mut e, b"\x1b[1;31m\x1bP$qm\x1b\\");
    assert_eq!(e.take_replies(), b"\x1bP1$r1;31m\x1b\\");
}

#[test]
fn bell_counts_accumulate() {
    let mut e = emu(80, 24);
    feed(&mut e, b"a\x07b\x07\x07");
    assert_eq!(e.events().bell_count, 3);
}

#[test]
fn charset_line_drawing() {
    let mut e = emu(20, 4);
    feed(&mut e, b"\x1b(0qqx\x1b(Bq");
    assert_eq!(row_str(&e, 0), "\u{2500}\u{2500}\u{2502}q");
}

#[test]
fn window_size_report() {
    let mut e = emu(100, 42);
    feed(&mut e, b"\x1b[18t");
    assert_eq!(e.take_replies(), b"\x1b[8;42;100t");
}

#[test]
fn split_utf8_across_bursts() {
    let mut e = emu(20, 4);
    let bytes = "\u{6F22}".as_bytes();
    feed(&mut e, &bytes[..1]);
    e.reset_event_state();
    e.term_event(&bytes[1..], 2);
    assert_eq!(row_str(&e, 0), "\u{6F22}");
}

#[test]
fn emoji_vs16_upgrade_rewrites_cell() {
    let mut e = emu(20, 4);
    feed(&mut e, "\u{2602}\u{FE0F}x".as_bytes());
    let row = e.buffer(0).const_row(0);
    assert_eq!(row.as_str(), "\u{2602}\u{FE0F}x");
    assert_eq!(row.columns(), 3);
    let hinted = row
        .ranges()
        .iter()
        .any(|r| r.flags.contains(CellFlags::DBL_WIDTH_CHAR | CellFlags::EMOJI_CHAR));
    assert!(hinted);
}

#[test]
fn input_slicing_invariance() {
    // Pseudo-random printable ASCII mixed with cursor movement
    let mut input = Vec::new();
    let mut seed = 0x12345678u32;
    for _ in 0..4096 {
        seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
        let b = (seed >> 24) as u8;
        match b % 23 {
            0 => input.extend_from_slice(b"\r\n"),
            1 => input.extend_from_slice(b"\x1b[1m"),
            2 => input.extend_from_slice(b"\x1b[0m"),
            3 => input.extend_from_slice(b"\x1b[3D"),
            _ => input.push(b' ' + (b % 94)),
        }
    }

    let reference = {
        let mut e = emu(80, 24);
        e.term_event(&input, 1);
        visible(&e)
    };

    for chunk in [1, 7, 63, 256, 1024] {
        let mut e = emu(80, 24);
        for piece in input.chunks(chunk) {
            e.term_event(piece, 1);
        }
        assert_eq!(visible(&e), reference, "chunk size {chunk}");
    }
}

#[test]
fn resize_between_chunks_leaves_content_intact() {
    // Height changes between bursts must not disturb written rows as long
    // as nothing width-dependent is in the stream.
    let mut text = Vec::new();
    for i in 0..400 {
        text.extend_from_slice(format!("line number {i:05}\r\n").as_bytes());
    }

    let reference = {
        let mut e = emu(80, 24);
        e.term_event(&text, 1);
        let buf = e.buffer(0);
        buf.const_row(buf.size() - 2).as_str().to_owned()
    };

    let mut e = emu(80, 24);
    let mut tall = false;
    for piece in text.chunks(256) {
        e.term_event(piece, 1);
        tall = !tall;
        e.term_resize(Size::new(80, if tall { 30 } else { 24 }));
    }
    e.term_resize(Size::new(80, 24));

    let buf = e.buffer(0);
    let mut found = false;
    for i in 0..buf.size() {
        if buf.const_row(i).as_str() == reference {
            found = true;
            break;
        }
    }
    assert!(found, "final row text {reference:?} lost across resizes");
}

#[test]
fn resize_clamps_and_reports() {
    let mut e = emu(80, 24);
    e.reset_event_state();
    let applied = e.term_resize(Size::new(2000, 2)).unwrap();
    assert_eq!((applied.width, applied.height), (1024, 8));
    assert!(e.events().size_changed);
    assert_eq!(e.attribute("session.columns"), Some("1024"));

    assert!(e.term_resize(Size::new(1024, 8)).is_none());
}

#[test]
fn resize_keeps_row_content() {
    let mut e = emu(80, 24);
    feed(&mut e, b"persistent row");
    e.reset_event_state();
    e.term_resize(Size::new(40, 12));
    assert_eq!(row_str(&e, 0), "persistent row");

    e.term_resize(Size::new(120, 30));
    assert_eq!(row_str(&e, 0), "persistent row");
}

#[test]
fn shrink_width_clamps_cursor() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b[1;60H");
    assert_eq!(e.cursor().x, 59);
    e.reset_event_state();
    e.term_resize(Size::new(40, 24));
    assert!(e.cursor().x <= 39);
}

#[test]
fn mouse_tracking_reports_follow_the_mode() {
    let mut e = emu(80, 24);
    // No tracking mode: nothing reported
    assert!(!e.term_mouse(1, 4, 5));

    feed(&mut e, b"\x1b[?1000h\x1b[?1006h");
    assert!(e.term_mouse(1, 4, 5));
    assert_eq!(e.take_replies(), b"\x1b[<0;5;6M");
    assert!(e.term_mouse(1 | 1 << 8, 4, 5));
    assert_eq!(e.take_replies(), b"\x1b[<0;5;6m");

    // Motion is ignored in normal tracking
    assert!(!e.term_mouse(1 << 9, 4, 5));

    feed(&mut e, b"\x1b[?1006l");
    assert!(e.term_mouse(1, 0, 0));
    assert_eq!(e.take_replies(), b"\x1b[M\x20\x21\x21");
}

#[test]
fn mouse_move_clamps_and_detects_change() {
    let mut e = emu(80, 24);
    assert!(e.move_mouse(core_buffer::Point::new(200, 5)));
    assert_eq!(e.screen().mouse_pos(), core_buffer::Point::new(79, 5));
    assert!(!e.move_mouse(core_buffer::Point::new(79, 5)));
}

#[test]
fn buffer_resize_enables_scrollback() {
    let mut e = emu(80, 24);
    e.reset_event_state();
    assert!(e.buffer_resize(0, 10));
    assert_eq!(e.buffer(0).capacity(), 1024);
    assert!(e.events().buffer_changed[0][1]);
    assert!(!e.buffer_resize(0, 10));
}

#[test]
fn osc511_and_512_are_routed_out() {
    let mut e = emu(80, 24);
    feed(&mut e, b"\x1b]511;do-thing;arg\x07\x1b]512;ZGF0YQ==\x07");
    assert_eq!(e.take_term_commands(), vec!["do-thing;arg".to_owned()]);
    assert_eq!(e.take_term_data(), vec!["ZGF0YQ==".to_owned()]);
}
