//! Operating-system commands, device reports, and status-string requests.
//!
//! Replies are composed with 8-bit C1 introducers and downgraded to 7-bit
//! escapes on the way out unless the application requested S8C1T.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use core_buffer::palette::{PALETTE_SPECIAL_BASE, PALETTE_SIZE};
use core_buffer::{Region, RegionType, TermPalette};
use core_cells::{CellFlags, INVALID_REGION_ID, TermFlags};
use tracing::debug;

use crate::content::content_hash;
use crate::emulator::XtermEmulator;
use crate::machine::VtMachine;

/// Attributes OSC 514 may write.
const SETTABLE_ATTRIBUTES: [&str; 4] = [
    "session.icon",
    "session.badge",
    "session.layout",
    "session.fills",
];

impl XtermEmulator {
    /// Queue a reply to the application, downgrading C1 controls to their
    /// 7-bit forms unless 8-bit controls were requested.
    pub(crate) fn term_reply(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        if self.flags.contains(TermFlags::CONTROLS_8BIT) {
            self.replies.extend_from_slice(s.as_bytes());
        } else {
            for c in s.chars() {
                let u = c as u32;
                if (0x80..0xa0).contains(&u) {
                    self.replies.push(0x1b);
                    self.replies.push((u - 0x40) as u8);
                } else {
                    let mut buf = [0u8; 4];
                    self.replies
                        .extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
    }

    fn reply_terminator(bel: bool) -> &'static str {
        if bel { "\x07" } else { "\u{9c}" }
    }

    /*
     * Mode reports
     */

    pub(crate) fn cmd_mode_request(&mut self, mode: u32) {
        let reply: i32 = match mode {
            2 => !self.flags.contains(TermFlags::KEYBOARD_LOCK) as i32,
            4 => !self.flags.contains(TermFlags::INSERT_MODE) as i32,
            12 => !self.flags.contains(TermFlags::SEND_RECEIVE) as i32,
            20 => !self.flags.contains(TermFlags::NEW_LINE) as i32,
            _ => -1,
        };
        self.term_reply(&format!("\u{9b}{};{}$y", mode, reply + 1));
    }

    pub(crate) fn cmd_private_mode_request(&mut self, mode: u32) {
        let f = self.flags;
        let reply: i32 = match mode {
            1 => !f.contains(TermFlags::APP_CU_KEYS) as i32,
            2 => !f.contains(TermFlags::ANSI) as i32,
            3 => (self.screen.width() != 132) as i32,
            4 => !f.contains(TermFlags::SMOOTH_SCROLLING) as i32,
            5 => !f.contains(TermFlags::REVERSE_VIDEO) as i32,
            6 => !f.contains(TermFlags::ORIGIN_MODE) as i32,
            7 => !f.contains(TermFlags::AUTOWRAP) as i32,
            8 => !f.contains(TermFlags::AUTOREPEAT) as i32,
            9 => !f.contains(TermFlags::X10_MOUSE_MODE) as i32,
            12 => (self.cursor_style & 1 == 0) as i32,
            25 => !f.contains(TermFlags::CURSOR_VISIBLE) as i32,
            40 => !f.contains(TermFlags::ALLOW_COLUMN_CHANGE) as i32,
            45 => !f.contains(TermFlags::REVERSE_AUTOWRAP) as i32,
            47 | 1047 | 1049 => !f.contains(TermFlags::APP_SCREEN) as i32,
            66 => !f.contains(TermFlags::APP_KEYPAD) as i32,
            69 => !f.contains(TermFlags::LEFT_RIGHT_MARGIN_MODE) as i32,
            1000 => !f.contains(TermFlags::NORMAL_MOUSE_MODE) as i32,
            1001 => !f.contains(TermFlags::HIGHLIGHT_MOUSE_MODE) as i32,
            1002 => !f.contains(TermFlags::BUTTON_EVENT_MOUSE_MODE) as i32,
            1003 => !f.contains(TermFlags::ANY_EVENT_MOUSE_MODE) as i32,
            1004 => !f.contains(TermFlags::FOCUS_EVENT_MODE) as i32,
            1005 => !f.contains(TermFlags::UTF8_EXT_MOUSE_MODE) as i32,
            1006 => !f.contains(TermFlags::SGR_EXT_MOUSE_MODE) as i32,
            1007 => !f.contains(TermFlags::ALT_SCROLL_MOUSE_MODE) as i32,
            1015 => !f.contains(TermFlags::URXVT_EXT_MOUSE_MODE) as i32,
            2004 => !f.contains(TermFlags::BRACKETED_PASTE_MODE) as i32,
            // Always set
            1048 | 1010 | 1011 | 1034 | 1035 | 1036 | 1037 | 1040 => 0,
            // Always unset
            18 | 19 | 30 | 35 | 38 | 42 | 44 | 67 | 95 | 1039 | 1041 | 1042 | 1043 => 1,
            // Permanently unset
            41 | 1050 | 1051 | 1060 | 1061 => 3,
            _ => -1,
        };
        self.term_reply(&format!("\u{9b}?{};{}$y", mode, reply + 1));
    }

    pub(crate) fn cmd_device_status_report(&mut self, arg: u32) {
        match arg {
            5 => self.term_reply("\u{9b}0n"),
            6 => {
                let c = self.screen.cursor();
                self.term_reply(&format!("\u{9b}{};{}R", c.y + 1, c.x + 1));
            }
            _ => {}
        }
    }

    /*
     * Window operations
     */

    pub(crate) fn cmd_window_ops(&mut self, params: &[u32]) {
        let arg = params.first().copied().unwrap_or(0);
        match arg {
            11 => self.term_reply("\u{9b}1t"),
            13 => self.term_reply("\u{9b}3;0;0t"),
            14 => self.term_reply("\u{9b}4;600;800t"),
            18 | 19 => {
                let reply = format!(
                    "\u{9b}{};{};{}t",
                    arg - 10,
                    self.screen.height(),
                    self.screen.width()
                );
                self.term_reply(&reply);
            }
            20 | 21 => {
                let key = if arg == 20 {
                    "session.title2"
                } else {
                    "session.title"
                };
                let mut data = self.attribute(key).unwrap_or_default().to_owned();
                if data.chars().any(VtMachine::is_control) {
                    data.clear();
                }
                if self.flags.contains(TermFlags::TITLE_MODE_QUERY_HEX) {
                    data = base16_encode(&data);
                }
                let introducer = if arg == 20 { 'L' } else { 'l' };
                self.term_reply(&format!("\u{9d}{introducer}{data}\u{9c}"));
            }
            22 => {
                let sub = params.get(1).copied().unwrap_or(0);
                let title = self.attribute("session.title").unwrap_or_default().to_owned();
                let title2 = self.attribute("session.title2").unwrap_or_default().to_owned();
                match sub {
                    0 => {
                        self.title_stack.push(title);
                        self.title2_stack.push(title2);
                    }
                    1 => self.title2_stack.push(title2),
                    2 => self.title_stack.push(title),
                    _ => {}
                }
            }
            23 => {
                let sub = params.get(1).copied().unwrap_or(0);
                match sub {
                    0 | 1 => {
                        if let Some(t2) = self.title2_stack.pop() {
                            self.set_attribute("session.title2", t2);
                        }
                        if sub == 0 {
                            if let Some(t) = self.title_stack.pop() {
                                self.set_attribute("session.title", t);
                            }
                        }
                    }
                    2 => {
                        if let Some(t) = self.title_stack.pop() {
                            self.set_attribute("session.title", t);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    /*
     * DCS: DECRQSS status strings
     */

    pub(crate) fn dcs_dispatch(
        &mut self,
        _params: &[u32],
        intermediates: &str,
        fin: char,
        data: &str,
    ) {
        if intermediates != "$" || fin != 'q' {
            debug!(intermediates, final_byte = %fin, "unhandled dcs");
            return;
        }

        let reply = match data {
            "\"p" => format!(
                "\u{90}1$r64;{}\"p\u{9c}",
                !self.flags.contains(TermFlags::CONTROLS_8BIT) as u8
            ),
            "\"q" => format!(
                "\u{90}1$r{}\"q\u{9c}",
                self.attributes.flags.contains(CellFlags::PROTECTED) as u8
            ),
            "r" => format!(
                "\u{90}1$r{};{}r\u{9c}",
                self.screen.margins().top() + 1,
                self.screen.margins().bottom() + 1
            ),
            " q" => format!("\u{90}1$r{} q\u{9c}", self.cursor_style),
            "m" => {
                let mut body = String::new();
                let f = self.attributes.flags;
                for (flag, code) in [
                    (CellFlags::BOLD, "1"),
                    (CellFlags::FAINT, "2"),
                    (CellFlags::ITALICS, "3"),
                    (CellFlags::UNDERLINE, "4"),
                    (CellFlags::BLINK, "5"),
                    (CellFlags::FAST_BLINK, "6"),
                    (CellFlags::INVERSE, "7"),
                    (CellFlags::INVISIBLE, "8"),
                    (CellFlags::STRIKETHROUGH, "9"),
                    (CellFlags::ALT_FONT1, "11"),
                    (CellFlags::ALT_FONT2, "12"),
                    (CellFlags::ALT_FONT0, "20"),
                    (CellFlags::DBL_UNDERLINE, "21"),
                    (CellFlags::FRAMED, "51"),
                    (CellFlags::ENCIRCLED, "52"),
                    (CellFlags::OVERLINE, "53"),
                ] {
                    if f.contains(flag) {
                        body.push_str(code);
                        body.push(';');
                    }
                }
                if f.contains(CellFlags::FG_INDEX) {
                    let fg = self.attributes.fg;
                    if fg < 8 {
                        body.push_str(&format!("{};", fg + 30));
                    } else if fg < 16 {
                        body.push_str(&format!("{};", fg + 82));
                    } else {
                        body.push_str(&format!("38;5;{fg};"));
                    }
                } else if f.contains(CellFlags::FG) {
                    let fg = self.attributes.fg;
                    body.push_str(&format!(
                        "38;2;{};{};{};",
                        core_cells::color_red(fg),
                        core_cells::color_green(fg),
                        core_cells::color_blue(fg)
                    ));
                }
                if f.contains(CellFlags::BG_INDEX) {
                    let bg = self.attributes.bg;
                    if bg < 8 {
                        body.push_str(&format!("{};", bg + 40));
                    } else if bg < 16 {
                        body.push_str(&format!("{};", bg + 92));
                    } else {
                        body.push_str(&format!("48;5;{bg};"));
                    }
                } else if f.contains(CellFlags::BG) {
                    let bg = self.attributes.bg;
                    body.push_str(&format!(
                        "48;2;{};{};{};",
                        core_cells::color_red(bg),
                        core_cells::color_green(bg),
                        core_cells::color_blue(bg)
                    ));
                }

                if body.is_empty() {
                    "\u{90}1$r0m\u{9c}".to_owned()
                } else {
                    body.pop();
                    format!("\u{90}1$r{body}m\u{9c}")
                }
            }
            _ => "\x18".to_owned(),
        };

        self.term_reply(&reply);
    }

    /*
     * OSC dispatch
     */

    pub(crate) fn osc_dispatch(&mut self, selector: u32, payload: String, bel: bool) {
        match selector {
            0 | 1 | 2 => {
                if !payload.is_empty() {
                    self.osc_title(payload, selector);
                }
            }
            3 => self.osc_prop(payload),
            4 => self.osc_palette(&payload, 0, 260, bel),
            5 => self.osc_palette(&payload, 256, 4, bel),
            6 => self.set_attribute("session.osc6", payload),
            7 => self.osc_workdir(&payload),
            8 => {
                if !payload.is_empty() {
                    self.osc_hyperlink(payload, "8");
                }
            }
            10..=19 => self.osc_special_color(&payload, selector as usize, bel),
            52 => self.osc_clipboard(&payload, bel),
            104 => self.osc_palette_reset(&payload, 0, 260),
            105 => self.osc_palette_reset(&payload, 256, 4),
            110..=119 => self.osc_special_reset(selector as usize),
            133 | 1333 => self.osc_shell_integration(&payload),
            511 => self.term_commands.push(payload),
            512 => self.term_data.push(payload),
            513 => {
                if !payload.is_empty() {
                    self.osc_get_attribute(&payload, bel);
                }
            }
            514 => {
                if !payload.is_empty() {
                    self.osc_set_attribute(payload);
                }
            }
            515 => {
                if !payload.is_empty() {
                    self.osc_hyperlink(payload, "515");
                }
            }
            9 | 46 | 50 | 51 | 777 => {
                // unsupported
            }
            1337 => {
                if !payload.is_empty() {
                    self.osc_iterm(payload);
                }
            }
            other => {
                debug!(selector = other, "unhandled osc");
            }
        }
    }

    fn osc_title(&mut self, mut title: String, arg: u32) {
        if self.flags.contains(TermFlags::TITLE_MODE_SET_HEX) {
            match base16_decode(&title) {
                Some(decoded) => title = decoded,
                None => return,
            }
        }
        if title.chars().any(VtMachine::is_control) {
            return;
        }

        match arg {
            0 => {
                self.set_attribute("session.title", title.clone());
                self.set_attribute("session.title2", title);
            }
            1 => self.set_attribute("session.title2", title),
            2 => self.set_attribute("session.title", title),
            _ => {}
        }
    }

    fn osc_prop(&mut self, payload: String) {
        let key_value = format!("prop.{payload}");
        match key_value.split_once('=') {
            Some((key, value)) => {
                let key = key.to_owned();
                let value = value.to_owned();
                self.set_attribute(&key, value);
            }
            None => self.remove_attribute(&key_value),
        }
    }

    fn osc_palette(&mut self, payload: &str, offset: usize, max: u32, bel: bool) {
        let mut fields = payload.split(';');

        loop {
            let Some(num) = fields.next() else { break };
            let Some(spec) = fields.next() else { break };

            let Ok(num) = num.parse::<u32>() else { break };
            if num >= max {
                break;
            }
            let slot = offset + num as usize;

            if spec == "?" {
                let color = self.palette.color(slot);
                let reply = format!(
                    "\u{9d}4;{};{}{}",
                    slot,
                    rgb_spec(color),
                    Self::reply_terminator(bel)
                );
                self.term_reply(&reply);
            } else if let Some(color) = color_parse(spec) {
                self.palette.set(slot, color);
                let spec = self.palette.to_spec();
                self.set_attribute("session.palette", spec);
            }
        }
    }

    fn osc_special_color(&mut self, payload: &str, mut start: usize, bel: bool) {
        for spec in payload.split(';') {
            if start >= 20 {
                break;
            }
            let slot = PALETTE_SPECIAL_BASE + start;
            debug_assert!(slot < PALETTE_SIZE);

            if spec == "?" {
                let color = self.palette.color(slot);
                let reply = format!(
                    "\u{9d}{};{}{}",
                    start,
                    rgb_spec(color),
                    Self::reply_terminator(bel)
                );
                self.term_reply(&reply);
            } else if let Some(color) = color_parse(spec) {
                self.palette.set(slot, color);
                let spec = self.palette.to_spec();
                self.set_attribute("session.palette", spec);
            }

            start += 1;
        }
    }

    fn osc_palette_reset(&mut self, payload: &str, offset: usize, max: u32) {
        let pref = self
            .attribute("owner-pref.palette")
            .unwrap_or_default()
            .to_owned();
        let defaults = TermPalette::new(&pref);

        if payload.is_empty() {
            for i in 0..260 {
                self.palette.set(i, defaults.get(i));
            }
        } else {
            for num in payload.split(';') {
                let Ok(num) = num.parse::<u32>() else { break };
                if num >= max {
                    break;
                }
                let slot = offset + num as usize;
                self.palette.set(slot, defaults.get(slot));
            }
        }

        let spec = self.palette.to_spec();
        self.set_attribute("session.palette", spec);
    }

    fn osc_special_reset(&mut self, selector: usize) {
        let pref = self
            .attribute("owner-pref.palette")
            .unwrap_or_default()
            .to_owned();
        let defaults = TermPalette::new(&pref);
        let slot = selector + 150;
        self.palette.set(slot, defaults.get(slot));

        let spec = self.palette.to_spec();
        self.set_attribute("session.palette", spec);
    }

    fn osc_workdir(&mut self, payload: &str) {
        self.set_attribute("session.osc7", payload.to_owned());
        let url = url_decode(payload);

        if let Some(rest) = url.strip_prefix("file://") {
            if let Some(idx) = rest.find('/') {
                let path = rest[idx..].to_owned();
                self.sivars.path = path.clone();
                self.set_attribute("session.path", path);

                if idx > 0 {
                    let host = &rest[..idx];
                    match host.split_once('@') {
                        Some((user, host)) => {
                            self.sivars.user = user.to_owned();
                            self.set_attribute("session.username", user.to_owned());
                            self.sivars.host = host.to_owned();
                            self.set_attribute("session.hostname", host.to_owned());
                        }
                        None => {
                            self.sivars.host = host.to_owned();
                            self.set_attribute("session.hostname", host.to_owned());
                        }
                    }
                }
            }
        }
    }

    fn osc_hyperlink(&mut self, payload: String, content_type: &str) {
        let Some(idx) = payload.find(';') else {
            self.attributes.flags.remove(CellFlags::HYPERLINK);
            self.attributes.link = INVALID_REGION_ID;
            return;
        };
        if idx == payload.len() - 1 {
            self.attributes.flags.remove(CellFlags::HYPERLINK);
            self.attributes.link = INVALID_REGION_ID;
            return;
        }

        let mut region = Region::new(RegionType::Content);
        let anchor = self.screen.offset() + self.screen.bounds().bottom() as u64;
        region.start_row = anchor;
        region.end_row = anchor;
        region.start_col = 0;
        region.end_col = 0;
        region
            .attributes
            .insert("type".to_owned(), content_type.to_owned());
        region
            .attributes
            .insert("uri".to_owned(), payload[idx + 1..].to_owned());

        let mut params = &payload[..idx];
        while !params.is_empty() {
            let Some(eq) = params.find('=') else { break };
            if eq == 0 {
                break;
            }
            let key = &params[..eq];
            params = &params[eq + 1..];

            let end = params.find(':').unwrap_or(params.len());
            region
                .attributes
                .entry(key.to_owned())
                .or_insert_with(|| params[..end].to_owned());
            params = if end < params.len() {
                &params[end + 1..]
            } else {
                ""
            };
        }

        let idx_buf = self.alt_active() as usize;
        let id = self.bufs[idx_buf].add_region(region);

        self.attributes.flags.insert(CellFlags::HYPERLINK);
        self.attributes.link = id;
    }

    fn osc_clipboard(&mut self, payload: &str, bel: bool) {
        let Some(idx) = payload.find(';') else { return };
        let spec: String = payload[..idx]
            .chars()
            .filter(|c| "cps01234567".contains(*c))
            .collect();
        let data = &payload[idx + 1..];

        if data == "?" {
            let mut reply = format!("\u{9d}52;{spec};");
            if !spec.is_empty() {
                let key = format!("clipboard.{}", spec.chars().next().unwrap());
                if let Some(value) = self.attribute(&key) {
                    // Stored base64; unpack to validate, then repack
                    if let Ok(raw) = STANDARD.decode(value.as_bytes()) {
                        reply.push_str(&STANDARD.encode(raw));
                    }
                }
            }
            reply.push_str(Self::reply_terminator(bel));
            self.term_reply(&reply);
        } else if STANDARD.decode(data.as_bytes()).is_ok() {
            for c in spec.chars() {
                let key = format!("clipboard.{c}");
                self.set_attribute(&key, data.to_owned());
            }
        }
    }

    fn osc_shell_integration(&mut self, payload: &str) {
        self.remove_attribute("command");
        self.attributes
            .flags
            .remove(CellFlags::PROMPT | CellFlags::COMMAND);

        if self.alt_active() || payload.is_empty() {
            return;
        }

        let mut chars = payload.chars();
        match chars.next() {
            Some('A') => {
                if self.prompt_newline && !self.screen.cursor_at_left() {
                    self.carriage_return();
                    self.line_feed();
                }
                self.attributes.flags.remove(CellFlags::ALL);
                self.attributes.flags.insert(CellFlags::PROMPT);
                let idx = self.alt_active() as usize;
                let (screen, buf) = (&mut self.screen, &mut self.bufs[idx]);
                screen.begin_prompt_region(buf);
            }
            Some('B') => {
                self.attributes.flags.insert(CellFlags::COMMAND);
                let idx = self.alt_active() as usize;
                let (screen, buf) = (&mut self.screen, &mut self.bufs[idx]);
                screen.begin_command_region(buf);
            }
            Some('C') => {
                let vars = self.sivars.clone();
                let now = walltime();
                let idx = self.alt_active() as usize;
                let (screen, buf) = (&mut self.screen, &mut self.bufs[idx]);
                screen.begin_output_region(buf, &vars, now);
            }
            Some('D') => {
                let code = match chars.next() {
                    Some(';') => chars.as_str().parse::<i32>().unwrap_or(0),
                    _ => -1,
                };
                let now = walltime();
                let idx = self.alt_active() as usize;
                let (screen, buf) = (&mut self.screen, &mut self.bufs[idx]);
                screen.end_output_region(buf, code, now);
            }
            _ => {}
        }
    }

    fn osc_get_attribute(&mut self, key: &str, bel: bool) {
        let mut reply = format!("\u{9d}514;{key}");
        if let Some(value) = self.attribute(key) {
            reply.push('=');
            reply.push_str(&STANDARD.encode(value.as_bytes()));
        }
        reply.push_str(Self::reply_terminator(bel));
        self.term_reply(&reply);
    }

    fn osc_set_attribute(&mut self, payload: String) {
        let (key, value) = match payload.split_once('=') {
            Some((k, v)) => (k.to_owned(), Some(v.to_owned())),
            None => (payload, None),
        };

        if !SETTABLE_ATTRIBUTES.contains(&key.as_str()) {
            return;
        }

        match value {
            None => self.remove_attribute(&key),
            Some(v) => {
                if let Ok(raw) = STANDARD.decode(v.as_bytes()) {
                    if let Ok(text) = String::from_utf8(raw) {
                        self.set_attribute(&key, text);
                    }
                }
            }
        }
    }

    /*
     * OSC 1337
     */

    fn osc_iterm(&mut self, payload: String) {
        if let Some(rest) = payload.strip_prefix("CurrentDir=") {
            self.sivars.path = rest.to_owned();
            self.set_attribute("session.path", rest.to_owned());
        } else if let Some(rest) = payload.strip_prefix("RemoteHost=") {
            if let Some((user, host)) = rest.split_once('@') {
                self.sivars.user = user.to_owned();
                self.set_attribute("session.username", user.to_owned());
                self.sivars.host = host.to_owned();
                self.set_attribute("session.hostname", host.to_owned());
            }
        } else if let Some(rest) = payload.strip_prefix("SetUserVar=") {
            if let Some((key, value)) = rest.split_once('=') {
                let key = format!("user.{key}");
                if let Ok(raw) = STANDARD.decode(value.as_bytes()) {
                    if let Ok(text) = String::from_utf8(raw) {
                        self.set_attribute(&key, text);
                    }
                }
            }
        } else if let Some(rest) = payload.strip_prefix("SetBadgeFormat=") {
            if let Ok(raw) = STANDARD.decode(rest.as_bytes()) {
                if let Ok(text) = String::from_utf8(raw) {
                    self.set_attribute("session.badge", text);
                }
            }
        } else if let Some(rest) = payload.strip_prefix("ShellIntegrationVersion=") {
            match rest.split_once(';') {
                None => self.set_attribute("session.siversion", rest.to_owned()),
                Some((version, mut vars)) => {
                    self.set_attribute("session.siversion", version.to_owned());
                    while !vars.is_empty() {
                        let Some(eq) = vars.find('=') else { break };
                        if eq == 0 {
                            break;
                        }
                        let key = format!("session.si{}", &vars[..eq]);
                        vars = &vars[eq + 1..];
                        let end = vars.find(';').unwrap_or(vars.len());
                        self.set_attribute(&key, vars[..end].to_owned());
                        vars = if end < vars.len() { &vars[end + 1..] } else { "" };
                    }
                }
            }
        } else if payload.starts_with("File=") {
            self.osc_iterm_file(payload);
        } else {
            debug!("unhandled osc 1337 command");
        }
    }

    fn osc_iterm_file(&mut self, payload: String) {
        let Some(colon) = payload.find(':') else { return };
        if self.alt_active() {
            return;
        }

        let params = &payload["File=".len()..colon];
        let mut attributes: std::collections::BTreeMap<String, String> = Default::default();
        let mut isinline = false;

        let mut rest = params;
        while !rest.is_empty() {
            let Some(eq) = rest.find('=') else { return };
            if eq == 0 {
                return;
            }
            let key = rest[..eq].to_owned();
            rest = &rest[eq + 1..];

            let end = rest.find(';').unwrap_or(rest.len());
            let mut value = rest[..end].to_owned();
            rest = if end < rest.len() { &rest[end + 1..] } else { "" };

            if key == "inline" {
                isinline = value == "1";
            }
            if key == "name" {
                match STANDARD
                    .decode(value.as_bytes())
                    .ok()
                    .and_then(|raw| String::from_utf8(raw).ok())
                {
                    Some(decoded) => value = decoded,
                    None => return,
                }
            }
            attributes.insert(key, value);
        }

        let Ok(content) = STANDARD.decode(payload[colon + 1..].as_bytes()) else {
            return;
        };
        if content.is_empty() || content.len() > self.content_limit {
            return;
        }

        // Determine region height and width in cells
        let mut h: i64 = 0;
        let mut w: i64 = 0;
        if isinline {
            h = parse_dimension(
                attributes.get("height").map(String::as_str).unwrap_or(""),
                self.screen.bounds().height(),
            );
            if h < 0 {
                h = (self.screen.bounds().height() / 3) as i64;
            }
            if h == 0 {
                return;
            }

            w = parse_dimension(
                attributes.get("width").map(String::as_str).unwrap_or(""),
                self.screen.bounds().width(),
            );
            if w < 0 {
                w = (self.screen.margins().width() - self.screen.cursor().x) as i64;
            }
            let idx = self.alt_active() as usize;
            if w <= 0 || self.screen.cursor_past_end(&self.bufs[idx], 1) {
                return;
            }
        }

        let size = content.len();
        let id = content_hash(&content);
        attributes.insert("id".to_owned(), id.to_string());
        attributes.insert("size".to_owned(), size.to_string());
        self.content.insert(content);

        let mut region = Region::new(RegionType::Image);
        region.attributes = attributes;
        region.start_row = self.screen.offset() + self.screen.cursor().y as u64;
        region.start_col = self.screen.cursor().x as u32;
        region.flags = core_cells::RegionFlags::HAS_START;
        let region_id = self.bufs[0].begin_region(region);

        if isinline {
            // Move the cursor past the rendered cells
            let mut lines = h;
            while lines > 1 {
                self.line_feed();
                lines -= 1;
            }
            let (screen, buf) = (&mut self.screen, &mut self.bufs[0]);
            screen.cursor_advance(w as u32, buf);
        }

        let row = self.screen.offset() + self.screen.cursor().y as u64;
        let col = self.screen.cursor().x as u32;
        self.bufs[0].end_region_at(region_id, row, col);
    }
}

/// Wall-clock seconds as a decimal string for region timestamps.
fn walltime() -> String {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_default()
}

/// `rgb:RRRR/GGGG/BBBB` with each 8-bit channel doubled to 16 bits.
fn rgb_spec(color: u32) -> String {
    let r = (color >> 16) & 0xff;
    let g = (color >> 8) & 0xff;
    let b = color & 0xff;
    format!(
        "rgb:{:04x}/{:04x}/{:04x}",
        r << 8 | r,
        g << 8 | g,
        b << 8 | b
    )
}

/// Parse `#rgb`-family and `rgb:r/g/b`-family color specs.
pub(crate) fn color_parse(spec: &str) -> Option<u32> {
    if let Some(hex) = spec.strip_prefix('#') {
        let val = u64::from_str_radix(hex, 16).ok()?;
        return match hex.len() {
            3 => Some(((val & 0xf00) << 12 | (val & 0xf0) << 8 | (val & 0xf) << 4) as u32),
            6 => Some(val as u32),
            9 => Some(
                ((val & 0xff0000000) >> 12 | (val & 0xff0000) >> 8 | (val & 0xff0) >> 4) as u32,
            ),
            12 => Some(
                ((val & 0xff0000000000) >> 24 | (val & 0xff000000) >> 16 | (val & 0xff00) >> 8)
                    as u32,
            ),
            _ => None,
        };
    }

    if let Some(body) = spec.strip_prefix("rgb:") {
        let mut channels = [0u32; 3];
        let mut parts = body.split('/');
        for channel in &mut channels {
            let part = parts.next()?;
            let val = u32::from_str_radix(part, 16).ok()?;
            *channel = match part.len() {
                1 => val << 4,
                2 => val,
                3 => val >> 4,
                4 => val >> 8,
                _ => return None,
            };
        }
        if parts.next().is_some() {
            return None;
        }
        return Some(channels[0] << 16 | channels[1] << 8 | channels[2]);
    }

    None
}

/// Integer or integer-with-percent; empty or unparsable yields -1.
fn parse_dimension(spec: &str, full: i32) -> i64 {
    if spec.is_empty() {
        return -1;
    }
    if let Some(pct) = spec.strip_suffix('%') {
        match pct.parse::<i64>() {
            Ok(v) if v >= 0 => (full as i64 * v) / 100,
            _ => -1,
        }
    } else {
        match spec.parse::<i64>() {
            Ok(v) if v >= 0 => v,
            _ => -1,
        }
    }
}

fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            match u8::from_str_radix(&s[i + 1..i + 3], 16) {
                Ok(b) => {
                    out.push(b);
                    i += 3;
                }
                Err(_) => {
                    out.push(b'?');
                    i += 3;
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn base16_encode(s: &str) -> String {
    s.bytes().map(|b| format!("{b:02x}")).collect()
}

fn base16_decode(s: &str) -> Option<String> {
    if s.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    for i in (0..s.len()).step_by(2) {
        out.push(u8::from_str_radix(s.get(i..i + 2)?, 16).ok()?);
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_parse_hash_forms() {
        assert_eq!(color_parse("#fff"), Some(0xf0f0f0));
        assert_eq!(color_parse("#102030"), Some(0x102030));
        assert_eq!(color_parse("#112233445566"), Some(0x113355));
        assert_eq!(color_parse("#gg0000"), None);
    }

    #[test]
    fn color_parse_rgb_forms() {
        assert_eq!(color_parse("rgb:1/2/3"), Some(0x102030));
        assert_eq!(color_parse("rgb:aa/bb/cc"), Some(0xaabbcc));
        assert_eq!(color_parse("rgb:aaaa/bbbb/cccc"), Some(0xaabbcc));
        assert_eq!(color_parse("rgb:aa/bb"), None);
        assert_eq!(color_parse("rgb:aa/bb/cc/dd"), None);
    }

    #[test]
    fn dimension_parse_falls_back_on_garbage() {
        assert_eq!(parse_dimension("5", 100), 5);
        assert_eq!(parse_dimension("50%", 60), 30);
        assert_eq!(parse_dimension("", 100), -1);
        assert_eq!(parse_dimension("-3", 100), -1);
        assert_eq!(parse_dimension("12furlongs", 100), -1);
    }

    #[test]
    fn url_decode_handles_escapes() {
        assert_eq!(url_decode("a%20b"), "a b");
        assert_eq!(url_decode("no-escapes"), "no-escapes");
    }

    #[test]
    fn base16_round_trip() {
        let enc = base16_encode("hello");
        assert_eq!(enc, "68656c6c6f");
        assert_eq!(base16_decode(&enc).unwrap(), "hello");
        assert!(base16_decode("abc").is_none());
    }

    #[test]
    fn rgb_spec_doubles_channels() {
        assert_eq!(rgb_spec(0xcd0000), "rgb:cdcd/0000/0000");
    }
}
