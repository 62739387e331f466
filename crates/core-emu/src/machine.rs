//! The VT parser state machine.
//!
//! A deterministic, codepoint-oriented machine following the published
//! VT500-family parser diagram, with the xterm extensions: BEL-terminated
//! OSC strings and 8-bit C1 controls. The transition logic is encoded as a
//! table keyed on (state, codepoint class); the emulator receives the
//! dispatched actions and never sees raw sequence bytes.
//!
//! Parameter collection: CSI/DCS parameters are `;`-delimited decimal
//! integers capped at 9999 (empty means zero unless a command documents
//! another default). OSC arguments split at the first `;` into selector and
//! payload. String payloads cap at 8 MiB; exceeding that aborts.

/// Maximum accepted value of one numeric parameter.
const PARAM_MAX: u32 = 9999;
/// Maximum parameters per sequence.
const PARAM_LIMIT: usize = 32;
/// Maximum size of collected string payloads.
const STRING_MAX: usize = 8 * 1024 * 1024;
/// Maximum collected intermediate bytes.
const INTERMEDIATE_MAX: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    CsiIgnore,
    OscString,
    /// Inside OSC, after ESC: a following `\` is the terminator.
    OscEsc,
    DcsEntry,
    DcsParam,
    DcsIntermediate,
    DcsPassthrough,
    DcsEsc,
    DcsIgnore,
    SosPmApcString,
    SosPmApcEsc,
}

/// A completed dispatch from the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VtAction {
    /// Printable codepoint for the grid.
    Print(char),
    /// C0 or C1 control to execute.
    Control(char),
    Esc {
        intermediates: String,
        final_byte: char,
    },
    Csi {
        /// Private-use prefix byte (`?`, `>`, `<`, `=`), if any.
        private: Option<char>,
        params: Vec<u32>,
        /// Which parameters were actually present (empty params read as 0).
        param_count: usize,
        intermediates: String,
        final_byte: char,
    },
    Osc {
        /// Numeric selector ahead of the first `;`.
        selector: u32,
        /// Everything after the first `;`, untouched.
        payload: String,
        /// Terminated by BEL rather than ST.
        bel: bool,
    },
    Dcs {
        params: Vec<u32>,
        intermediates: String,
        final_byte: char,
        data: String,
    },
}

#[derive(Debug, Default)]
pub struct VtMachine {
    state: State,
    private: Option<char>,
    params: Vec<u32>,
    param_count: usize,
    /// Set once the current parameter has at least one digit.
    param_digits: bool,
    intermediates: String,
    string_arg: String,
    dcs_final: char,
}

impl VtMachine {
    pub fn new() -> Self {
        VtMachine::default()
    }

    pub fn reset(&mut self) {
        self.state = State::Ground;
        self.clear_sequence();
    }

    fn clear_sequence(&mut self) {
        self.private = None;
        self.params.clear();
        self.param_count = 0;
        self.param_digits = false;
        self.intermediates.clear();
        self.string_arg.clear();
        self.dcs_final = '\0';
    }

    pub fn is_control(c: char) -> bool {
        let c = c as u32;
        c < 0x20 || c == 0x7f || (0x80..0xa0).contains(&c)
    }

    fn param_push(&mut self, d: u32) {
        if self.params.is_empty() {
            self.params.push(0);
            self.param_count = 1;
        }
        let last = self.params.last_mut().unwrap();
        *last = (*last * 10 + d).min(PARAM_MAX);
        self.param_digits = true;
    }

    fn param_next(&mut self) {
        if self.params.is_empty() {
            // leading `;` counts the empty first parameter
            self.params.push(0);
            self.param_count = 1;
        }
        if self.params.len() < PARAM_LIMIT {
            self.params.push(0);
            self.param_count = self.params.len();
        }
        self.param_digits = false;
    }

    /// Feed one codepoint; returns a completed dispatch, if any.
    pub fn process(&mut self, c: char) -> Option<VtAction> {
        use State::*;

        let u = c as u32;

        // CAN and SUB abort any sequence from any state
        if u == 0x18 || u == 0x1a {
            self.state = Ground;
            self.clear_sequence();
            return None;
        }

        // C1 controls (from 8-bit input) act from almost anywhere; inside
        // string collection only ST terminates.
        if (0x80..0xa0).contains(&u)
            && !matches!(self.state, OscString | OscEsc | DcsPassthrough | DcsEsc | SosPmApcString | SosPmApcEsc)
        {
            return self.c1_dispatch(c);
        }

        match self.state {
            Ground => {
                if u == 0x1b {
                    self.state = Escape;
                    self.clear_sequence();
                    None
                } else if u < 0x20 || u == 0x7f {
                    Some(VtAction::Control(c))
                } else {
                    Some(VtAction::Print(c))
                }
            }

            Escape => match u {
                0x1b => {
                    self.clear_sequence();
                    None
                }
                0x20..=0x2f => {
                    self.intermediates.push(c);
                    self.state = EscapeIntermediate;
                    None
                }
                0x5b => {
                    // CSI
                    self.state = CsiEntry;
                    None
                }
                0x5d => {
                    // OSC
                    self.state = OscString;
                    None
                }
                0x50 => {
                    // DCS
                    self.state = DcsEntry;
                    None
                }
                0x58 | 0x5e | 0x5f => {
                    // SOS, PM, APC
                    self.state = SosPmApcString;
                    None
                }
                0x30..=0x7e => {
                    self.state = Ground;
                    Some(VtAction::Esc {
                        intermediates: std::mem::take(&mut self.intermediates),
                        final_byte: c,
                    })
                }
                _ if u < 0x20 => Some(VtAction::Control(c)),
                _ => {
                    self.state = Ground;
                    None
                }
            },

            EscapeIntermediate => match u {
                0x1b => {
                    self.state = Escape;
                    self.clear_sequence();
                    None
                }
                0x20..=0x2f => {
                    if self.intermediates.len() < INTERMEDIATE_MAX {
                        self.intermediates.push(c);
                    }
                    None
                }
                0x30..=0x7e => {
                    self.state = Ground;
                    Some(VtAction::Esc {
                        intermediates: std::mem::take(&mut self.intermediates),
                        final_byte: c,
                    })
                }
                _ if u < 0x20 => Some(VtAction::Control(c)),
                _ => {
                    self.state = Ground;
                    None
                }
            },

            CsiEntry | CsiParam | CsiIntermediate => self.csi_byte(c),

            CsiIgnore => match u {
                0x1b => {
                    self.state = Escape;
                    self.clear_sequence();
                    None
                }
                0x40..=0x7e => {
                    self.state = Ground;
                    self.clear_sequence();
                    None
                }
                _ if u < 0x20 => Some(VtAction::Control(c)),
                _ => None,
            },

            OscString => match u {
                0x07 => self.osc_dispatch(true),
                0x9c => self.osc_dispatch(false),
                0x1b => {
                    self.state = OscEsc;
                    None
                }
                _ if u < 0x20 => None,
                _ => {
                    self.string_push(c);
                    None
                }
            },

            OscEsc => {
                if c == '\\' {
                    self.osc_dispatch(false)
                } else {
                    // Abort; reprocess as a fresh escape
                    self.state = Escape;
                    self.clear_sequence();
                    self.process(c)
                }
            }

            DcsEntry | DcsParam | DcsIntermediate => self.dcs_byte(c),

            DcsPassthrough => match u {
                0x9c => self.dcs_dispatch(),
                0x1b => {
                    self.state = DcsEsc;
                    None
                }
                _ => {
                    self.string_push(c);
                    None
                }
            },

            DcsEsc => {
                if c == '\\' {
                    self.dcs_dispatch()
                } else {
                    self.state = Escape;
                    self.clear_sequence();
                    self.process(c)
                }
            }

            DcsIgnore | SosPmApcString => match u {
                0x9c => {
                    self.state = Ground;
                    self.clear_sequence();
                    None
                }
                0x1b => {
                    self.state = SosPmApcEsc;
                    None
                }
                _ => None,
            },

            SosPmApcEsc => {
                self.state = if c == '\\' { Ground } else { Escape };
                self.clear_sequence();
                if c == '\\' { None } else { self.process(c) }
            }
        }
    }

    fn c1_dispatch(&mut self, c: char) -> Option<VtAction> {
        self.clear_sequence();
        match c as u32 {
            0x9b => {
                self.state = State::CsiEntry;
                None
            }
            0x9d => {
                self.state = State::OscString;
                None
            }
            0x90 => {
                self.state = State::DcsEntry;
                None
            }
            0x98 | 0x9e | 0x9f => {
                self.state = State::SosPmApcString;
                None
            }
            0x9c => {
                self.state = State::Ground;
                None
            }
            _ => {
                // Executable C1 control (IND, NEL, HTS, RI, SS2, SS3, ...)
                Some(VtAction::Control(c))
            }
        }
    }

    fn csi_byte(&mut self, c: char) -> Option<VtAction> {
        use State::*;
        let u = c as u32;

        match u {
            0x1b => {
                self.state = Escape;
                self.clear_sequence();
                None
            }
            _ if u < 0x20 => Some(VtAction::Control(c)),
            0x30..=0x39 => {
                if self.state == CsiIntermediate {
                    self.state = CsiIgnore;
                } else {
                    self.state = CsiParam;
                    self.param_push(u - 0x30);
                }
                None
            }
            0x3b => {
                if self.state == CsiIntermediate {
                    self.state = CsiIgnore;
                } else {
                    self.state = CsiParam;
                    self.param_next();
                }
                None
            }
            0x3a => {
                self.state = CsiIgnore;
                None
            }
            0x3c..=0x3f => {
                if self.state == CsiEntry {
                    self.private = Some(c);
                    self.state = CsiParam;
                } else {
                    self.state = CsiIgnore;
                }
                None
            }
            0x20..=0x2f => {
                if self.intermediates.len() < INTERMEDIATE_MAX {
                    self.intermediates.push(c);
                }
                self.state = CsiIntermediate;
                None
            }
            0x40..=0x7e => {
                self.state = Ground;
                let action = VtAction::Csi {
                    private: self.private.take(),
                    params: std::mem::take(&mut self.params),
                    param_count: self.param_count,
                    intermediates: std::mem::take(&mut self.intermediates),
                    final_byte: c,
                };
                self.clear_sequence();
                Some(action)
            }
            _ => {
                self.state = CsiIgnore;
                None
            }
        }
    }

    fn dcs_byte(&mut self, c: char) -> Option<VtAction> {
        use State::*;
        let u = c as u32;

        match u {
            0x1b => {
                self.state = Escape;
                self.clear_sequence();
                None
            }
            _ if u < 0x20 => None,
            0x30..=0x39 => {
                if self.state == DcsIntermediate {
                    self.state = DcsIgnore;
                } else {
                    self.state = DcsParam;
                    self.param_push(u - 0x30);
                }
                None
            }
            0x3b => {
                if self.state == DcsIntermediate {
                    self.state = DcsIgnore;
                } else {
                    self.state = DcsParam;
                    self.param_next();
                }
                None
            }
            0x3a | 0x3c..=0x3f => {
                if self.state == DcsEntry {
                    self.private = Some(c);
                    self.state = DcsParam;
                } else {
                    self.state = DcsIgnore;
                }
                None
            }
            0x20..=0x2f => {
                if self.intermediates.len() < INTERMEDIATE_MAX {
                    self.intermediates.push(c);
                }
                self.state = DcsIntermediate;
                None
            }
            0x40..=0x7e => {
                self.dcs_final = c;
                self.state = DcsPassthrough;
                None
            }
            _ => {
                self.state = DcsIgnore;
                None
            }
        }
    }

    fn string_push(&mut self, c: char) {
        if self.string_arg.len() >= STRING_MAX {
            // Oversize payload aborts the sequence
            self.state = State::Ground;
            self.clear_sequence();
        } else {
            self.string_arg.push(c);
        }
    }

    fn osc_dispatch(&mut self, bel: bool) -> Option<VtAction> {
        self.state = State::Ground;
        let arg = std::mem::take(&mut self.string_arg);
        self.clear_sequence();

        let (selector, payload) = match arg.split_once(';') {
            Some((sel, rest)) => (sel, rest.to_owned()),
            None => (arg.as_str(), String::new()),
        };
        let selector: u32 = selector.parse().ok()?;

        Some(VtAction::Osc {
            selector,
            payload,
            bel,
        })
    }

    fn dcs_dispatch(&mut self) -> Option<VtAction> {
        self.state = State::Ground;
        let action = VtAction::Dcs {
            params: std::mem::take(&mut self.params),
            intermediates: std::mem::take(&mut self.intermediates),
            final_byte: self.dcs_final,
            data: std::mem::take(&mut self.string_arg),
        };
        self.clear_sequence();
        Some(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &str) -> Vec<VtAction> {
        let mut m = VtMachine::new();
        input.chars().filter_map(|c| m.process(c)).collect()
    }

    #[test]
    fn plain_text_prints() {
        let actions = run("ab");
        assert_eq!(actions, vec![VtAction::Print('a'), VtAction::Print('b')]);
    }

    #[test]
    fn csi_with_params() {
        let actions = run("\x1b[1;31m");
        assert_eq!(
            actions,
            vec![VtAction::Csi {
                private: None,
                params: vec![1, 31],
                param_count: 2,
                intermediates: String::new(),
                final_byte: 'm',
            }]
        );
    }

    #[test]
    fn csi_empty_params_read_as_zero() {
        let actions = run("\x1b[;5H");
        assert_eq!(
            actions,
            vec![VtAction::Csi {
                private: None,
                params: vec![0, 5],
                param_count: 2,
                intermediates: String::new(),
                final_byte: 'H',
            }]
        );
    }

    #[test]
    fn csi_private_and_intermediates() {
        let actions = run("\x1b[?2004h\x1b[!p");
        assert_eq!(
            actions,
            vec![
                VtAction::Csi {
                    private: Some('?'),
                    params: vec![2004],
                    param_count: 1,
                    intermediates: String::new(),
                    final_byte: 'h',
                },
                VtAction::Csi {
                    private: None,
                    params: vec![],
                    param_count: 0,
                    intermediates: "!".into(),
                    final_byte: 'p',
                },
            ]
        );
    }

    #[test]
    fn params_cap_at_9999() {
        let actions = run("\x1b[123456A");
        assert_eq!(
            actions,
            vec![VtAction::Csi {
                private: None,
                params: vec![9999],
                param_count: 1,
                intermediates: String::new(),
                final_byte: 'A',
            }]
        );
    }

    #[test]
    fn controls_execute_inside_csi() {
        let actions = run("\x1b[1\x072A");
        assert_eq!(actions[0], VtAction::Control('\x07'));
        assert_eq!(
            actions[1],
            VtAction::Csi {
                private: None,
                params: vec![12],
                param_count: 1,
                intermediates: String::new(),
                final_byte: 'A',
            }
        );
    }

    #[test]
    fn osc_bel_and_st_terminators() {
        let a = run("\x1b]0;my title\x07");
        assert_eq!(
            a,
            vec![VtAction::Osc {
                selector: 0,
                payload: "my title".into(),
                bel: true,
            }]
        );

        let a = run("\x1b]133;A\x1b\\");
        assert_eq!(
            a,
            vec![VtAction::Osc {
                selector: 133,
                payload: "A".into(),
                bel: false,
            }]
        );
    }

    #[test]
    fn osc_payload_keeps_later_semicolons() {
        let a = run("\x1b]8;;http://x/?a=1;b=2\x07");
        assert_eq!(
            a,
            vec![VtAction::Osc {
                selector: 8,
                payload: ";http://x/?a=1;b=2".into(),
                bel: true,
            }]
        );
    }

    #[test]
    fn eight_bit_controls() {
        let a = run("\u{9b}2J");
        assert_eq!(
            a,
            vec![VtAction::Csi {
                private: None,
                params: vec![2],
                param_count: 1,
                intermediates: String::new(),
                final_byte: 'J',
            }]
        );

        let a = run("\u{9d}2;t\u{9c}x");
        assert_eq!(a.len(), 2);
        assert!(matches!(a[0], VtAction::Osc { selector: 2, .. }));
        assert_eq!(a[1], VtAction::Print('x'));
    }

    #[test]
    fn dcs_passthrough_collects_data() {
        let a = run("\x1bP$q\"p\x1b\\");
        assert_eq!(
            a,
            vec![VtAction::Dcs {
                params: vec![],
                intermediates: "$".into(),
                final_byte: 'q',
                data: "\"p".into(),
            }]
        );
    }

    #[test]
    fn can_aborts_sequence() {
        let a = run("\x1b[12\x18mA");
        assert_eq!(a, vec![VtAction::Print('m'), VtAction::Print('A')]);
    }

    #[test]
    fn colon_sends_csi_to_ignore() {
        let a = run("\x1b[38:5:196mZ");
        assert_eq!(a, vec![VtAction::Print('Z')]);
    }

    #[test]
    fn sos_pm_apc_swallowed() {
        let a = run("\x1b_hidden payload\x1b\\ok");
        assert_eq!(a, vec![VtAction::Print('o'), VtAction::Print('k')]);
    }

    #[test]
    fn esc_restarts_inside_csi() {
        let a = run("\x1b[12\x1b[3C");
        assert_eq!(
            a,
            vec![VtAction::Csi {
                private: None,
                params: vec![3],
                param_count: 1,
                intermediates: String::new(),
                final_byte: 'C',
            }]
        );
    }
}
