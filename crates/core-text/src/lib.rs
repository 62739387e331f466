//! Display-width oracle and grapheme-cluster assembly.
//!
//! One authoritative width function (`cluster_width`) decides how many
//! terminal columns a grapheme cluster occupies. Every other crate walks row
//! strings through the helpers here; nothing else consults `unicode_width`
//! directly.
//!
//! Contract:
//! - Input strings are valid UTF-8 (the emulator replaces malformed bytes
//!   with U+FFFD before they reach a row).
//! - Clusters are in order, non-overlapping, and cover the entire string.
//! - Width decisions favor over-estimation for pictographic composites;
//!   an extra blank cell is harmless while under-estimation drifts the grid.

use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthChar;

pub mod cluster;

pub use cluster::{ClusterBuilder, WidthCategory};

pub const ZWJ: char = '\u{200D}';
pub const VS15: char = '\u{FE0E}';
pub const VS16: char = '\u{FE0F}';
const KEYCAP_COMBINING: char = '\u{20E3}';

/// Regional Indicator range (flag pairs).
pub(crate) fn is_regional_indicator(c: char) -> bool {
    ('\u{1F1E6}'..='\u{1F1FF}').contains(&c)
}

/// Fitzpatrick skin tone modifiers.
pub(crate) fn is_skin_tone_modifier(c: char) -> bool {
    ('\u{1F3FB}'..='\u{1F3FF}').contains(&c)
}

/// Rough Extended Pictographic heuristic covering the primary emoji blocks
/// plus the Misc Symbols / Dingbats ranges where legacy emoji live.
pub(crate) fn is_extended_pictographic(c: char) -> bool {
    ('\u{1F300}'..='\u{1FAFF}').contains(&c) || ('\u{2600}'..='\u{27BF}').contains(&c)
}

/// Emoji-presentation-by-default blocks. Symbols in the legacy ranges keep
/// text presentation unless VS16 follows.
pub(crate) fn has_default_emoji_presentation(c: char) -> bool {
    ('\u{1F300}'..='\u{1FAFF}').contains(&c)
}

/// True when the codepoint occupies no column of its own.
pub fn is_zero_width(c: char) -> bool {
    c == ZWJ || c == VS15 || c == VS16 || UnicodeWidthChar::width(c) == Some(0)
}

/// Terminal column width of one grapheme cluster.
///
/// Precedence: keycap and flag sequences are wide; VS16 forces emoji
/// presentation (wide) and VS15 forces text presentation (narrow); otherwise
/// the widest codepoint in the cluster decides, widened once more for
/// default-emoji-presentation bases.
pub fn cluster_width(cluster: &str) -> u16 {
    let mut chars = cluster.chars();
    let Some(first) = chars.next() else {
        return 0;
    };

    let mut regional = is_regional_indicator(first) as u8;
    let mut vs16 = false;
    let mut vs15 = false;
    let mut keycap = false;
    let mut max = UnicodeWidthChar::width(first).unwrap_or(1).max(1) as u16;
    let mut pictographic = is_extended_pictographic(first);
    let mut emoji_default = has_default_emoji_presentation(first);

    for c in chars {
        match c {
            VS16 => vs16 = true,
            VS15 => vs15 = true,
            KEYCAP_COMBINING => keycap = true,
            _ => {
                if is_regional_indicator(c) {
                    regional += 1;
                }
                if is_skin_tone_modifier(c) {
                    vs16 = true;
                }
                pictographic |= is_extended_pictographic(c);
                emoji_default |= has_default_emoji_presentation(c);
                max = max.max(UnicodeWidthChar::width(c).unwrap_or(0) as u16);
            }
        }
    }

    if regional >= 2 || keycap {
        return 2;
    }
    if vs15 && !vs16 {
        return 1;
    }
    if vs16 && pictographic {
        return 2;
    }
    if emoji_default {
        return 2;
    }
    max.max(1)
}

/// True when the cluster renders with emoji presentation.
pub fn cluster_is_emoji(cluster: &str) -> bool {
    let mut pictographic = false;
    let mut vs16 = false;
    let mut vs15 = false;
    let mut regional = 0u8;
    let mut emoji_default = false;
    for c in cluster.chars() {
        match c {
            VS16 => vs16 = true,
            VS15 => vs15 = true,
            _ => {
                if is_regional_indicator(c) {
                    regional += 1;
                }
                pictographic |= is_extended_pictographic(c);
                emoji_default |= has_default_emoji_presentation(c);
            }
        }
    }
    regional >= 2 || (pictographic && (vs16 || emoji_default) && !vs15)
}

/// One grapheme cluster with absolute byte offsets and display width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    pub cluster: &'a str,
    pub start: usize,
    pub end: usize,
    pub width: u16,
}

/// Iterate a row string as (cluster, width) segments.
pub fn segments(s: &str) -> impl Iterator<Item = Segment<'_>> {
    s.grapheme_indices(true).map(|(start, cluster)| Segment {
        cluster,
        start,
        end: start + cluster.len(),
        width: cluster_width(cluster),
    })
}

/// Width of the cluster starting at byte offset `ptr`, advancing `ptr` past
/// it. Returns 0 at end of string without moving.
pub fn width_next(s: &str, ptr: &mut usize) -> u16 {
    match s[*ptr..].graphemes(true).next() {
        Some(g) => {
            *ptr += g.len();
            cluster_width(g)
        }
        None => 0,
    }
}

/// Width of the cluster starting at byte offset `ptr` without advancing.
pub fn width_at(s: &str, ptr: usize) -> u16 {
    s[ptr..].graphemes(true).next().map_or(0, cluster_width)
}

/// Advance `ptr` past the cluster starting there.
pub fn next_cluster(s: &str, ptr: &mut usize) {
    if let Some(g) = s[*ptr..].graphemes(true).next() {
        *ptr += g.len();
    }
}

/// Byte length of the cluster starting at byte offset `ptr`.
pub fn cluster_len(s: &str, ptr: usize) -> usize {
    s[ptr..].graphemes(true).next().map_or(0, str::len)
}

/// Total column count of a string.
pub fn columns(s: &str) -> usize {
    s.graphemes(true).map(|g| cluster_width(g) as usize).sum()
}
