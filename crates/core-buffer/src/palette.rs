//! The per-terminal color palette.
//!
//! Slots 0..=255 are the xterm palette (16 ANSI + 6x6x6 cube + grayscale
//! ramp), 256..=259 are reserved extension slots, and 260..=269 back the
//! OSC 10..19 special colors (foreground, background, cursor, ...). The
//! string form is a comma-separated list of hex `index,value` overrides
//! against the defaults; it round-trips through the `session.palette`
//! attribute.

pub const PALETTE_SIZE: usize = 270;
/// Low 24 bits carry the color.
pub const PALETTE_COLOR: u32 = 0x00ff_ffff;
/// Stored values may carry marker bits above the color.
pub const PALETTE_VALUEMASK: u32 = 0x81ff_ffff;

/// Special-color slot base: OSC 10 maps to slot 260.
pub const PALETTE_SPECIAL_BASE: usize = 250;

#[derive(Debug, Clone)]
pub struct TermPalette {
    colors: [u32; PALETTE_SIZE],
}

fn default_slot(i: usize) -> u32 {
    const ANSI: [u32; 16] = [
        0x000000, 0xcd0000, 0x00cd00, 0xcdcd00, 0x0000ee, 0xcd00cd, 0x00cdcd, 0xe5e5e5,
        0x7f7f7f, 0xff0000, 0x00ff00, 0xffff00, 0x5c5cff, 0xff00ff, 0x00ffff, 0xffffff,
    ];
    const RAMP: [u32; 6] = [0, 95, 135, 175, 215, 255];

    match i {
        0..=15 => ANSI[i],
        16..=231 => {
            let idx = i - 16;
            let r = RAMP[idx / 36];
            let g = RAMP[idx / 6 % 6];
            let b = RAMP[idx % 6];
            r << 16 | g << 8 | b
        }
        232..=255 => {
            let v = (8 + 10 * (i - 232)) as u32;
            v << 16 | v << 8 | v
        }
        260 => 0xffffff, // foreground
        261 => 0x000000, // background
        262 => 0xffffff, // cursor
        _ => 0,
    }
}

impl Default for TermPalette {
    fn default() -> Self {
        let mut colors = [0u32; PALETTE_SIZE];
        for (i, c) in colors.iter_mut().enumerate() {
            *c = default_slot(i);
        }
        TermPalette { colors }
    }
}

impl TermPalette {
    /// Build from an override string; malformed entries end the parse.
    pub fn new(spec: &str) -> Self {
        let mut palette = TermPalette::default();
        palette.parse(spec);
        palette
    }

    pub fn parse(&mut self, spec: &str) {
        for (i, c) in self.colors.iter_mut().enumerate() {
            *c = default_slot(i);
        }

        let mut fields = spec.split(',');
        loop {
            let Some(num) = fields.next() else { break };
            let Some(value) = fields.next() else { break };

            let Ok(num) = usize::from_str_radix(num, 16) else {
                break;
            };
            let Ok(value) = u32::from_str_radix(value, 16) else {
                break;
            };

            if num < PALETTE_SIZE {
                self.colors[num] = value & PALETTE_VALUEMASK;
            }
        }
    }

    pub fn to_spec(&self) -> String {
        let mut result = String::new();

        for (i, &spec) in self.colors.iter().enumerate() {
            if spec != default_slot(i) {
                if !result.is_empty() {
                    result.push(',');
                }
                result.push_str(&format!("{i:x},{spec:x}"));
            }
        }

        result
    }

    pub fn get(&self, i: usize) -> u32 {
        self.colors[i]
    }

    pub fn set(&mut self, i: usize, color: u32) {
        self.colors[i] = color & PALETTE_VALUEMASK;
    }

    pub fn color(&self, i: usize) -> u32 {
        self.colors[i] & PALETTE_COLOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_cube_and_ramp() {
        let p = TermPalette::default();
        assert_eq!(p.get(1), 0xcd0000);
        assert_eq!(p.get(16), 0x000000);
        assert_eq!(p.get(231), 0xffffff);
        assert_eq!(p.get(232), 0x080808);
        assert_eq!(p.get(260), 0xffffff);
    }

    #[test]
    fn spec_round_trips_overrides() {
        let mut p = TermPalette::default();
        p.set(1, 0x123456);
        p.set(260, 0xabcdef);
        let spec = p.to_spec();

        let q = TermPalette::new(&spec);
        assert_eq!(q.get(1), 0x123456);
        assert_eq!(q.get(260), 0xabcdef);
        assert_eq!(q.get(2), p.get(2));
        assert_eq!(q.to_spec(), spec);
    }

    #[test]
    fn malformed_spec_stops_parsing() {
        let p = TermPalette::new("1,123456,zz,0");
        assert_eq!(p.get(1), 0x123456);
    }

    #[test]
    fn empty_spec_is_defaults() {
        let p = TermPalette::new("");
        assert_eq!(p.to_spec(), "");
    }
}
