//! Case and character-width conversion used by formatter nodes.

use tracing::debug;

use nodeflow_core::node::FormatterConfig;

/// Half-width katakana U+FF61..=U+FF9F and their full-width forms, in order.
const HALF_KANA_FULL: &str = "。「」、・ヲァィゥェォャュョッーアイウエオカキクケコサシスセソタチツテトナニヌネノハヒフヘホマミムメモヤユヨラリルレロワン゛゜";
const HALF_KANA_START: u32 = 0xFF61;

const HALF_DAKUTEN: char = '\u{FF9E}';
const HALF_HANDAKUTEN: char = '\u{FF9F}';

/// Bases that take a voiced mark by adding one to the code point.
const VOICEABLE: &str = "カキクケコサシスセソタチツテトハヒフヘホ";
/// Bases that take a semi-voiced mark by adding two.
const SEMI_VOICEABLE: &str = "ハヒフヘホ";

const WIDTH_OFFSET: u32 = 0xFEE0;
const IDEOGRAPHIC_SPACE: char = '\u{3000}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatOperation {
    ToUpper,
    ToLower,
    ToFullWidth,
    ToHalfWidth,
}

impl FormatOperation {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "to_upper" => Some(Self::ToUpper),
            "to_lower" => Some(Self::ToLower),
            "to_full_width" => Some(Self::ToFullWidth),
            "to_half_width" => Some(Self::ToHalfWidth),
            _ => None,
        }
    }
}

/// Which character classes width conversion touches. All on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WidthFlags {
    pub kana: bool,
    pub digit: bool,
    pub ascii: bool,
}

impl Default for WidthFlags {
    fn default() -> Self {
        Self {
            kana: true,
            digit: true,
            ascii: true,
        }
    }
}

impl WidthFlags {
    pub fn from_config(config: &FormatterConfig) -> Self {
        Self {
            kana: config.kana.unwrap_or(true),
            digit: config.digit.unwrap_or(true),
            ascii: config.ascii.unwrap_or(true),
        }
    }
}

/// Apply a formatter node's operation. Unknown operations return the
/// input unchanged.
pub fn apply(text: &str, config: &FormatterConfig) -> String {
    let Some(op) = FormatOperation::parse(&config.operation) else {
        debug!(operation = %config.operation, "Unknown format operation, passing text through");
        return text.to_string();
    };
    format_text(text, op, WidthFlags::from_config(config))
}

pub fn format_text(text: &str, op: FormatOperation, flags: WidthFlags) -> String {
    match op {
        FormatOperation::ToUpper => text.to_uppercase(),
        FormatOperation::ToLower => text.to_lowercase(),
        FormatOperation::ToFullWidth => to_full_width(text, flags),
        FormatOperation::ToHalfWidth => to_half_width(text, flags),
    }
}

fn shift(c: char, up: bool) -> char {
    let code = if up {
        c as u32 + WIDTH_OFFSET
    } else {
        c as u32 - WIDTH_OFFSET
    };
    char::from_u32(code).unwrap_or(c)
}

fn half_kana_to_full(c: char) -> Option<char> {
    let offset = (c as u32).checked_sub(HALF_KANA_START)?;
    HALF_KANA_FULL.chars().nth(offset as usize)
}

fn full_kana_to_half(c: char) -> Option<char> {
    let offset = HALF_KANA_FULL.chars().position(|f| f == c)?;
    char::from_u32(HALF_KANA_START + offset as u32)
}

/// Combine a full-width base with a following half-width sound mark.
fn compose(base: char, mark: char) -> Option<char> {
    let step = match mark {
        HALF_DAKUTEN if base == 'ウ' => return Some('ヴ'),
        HALF_DAKUTEN if VOICEABLE.contains(base) => 1,
        HALF_HANDAKUTEN if SEMI_VOICEABLE.contains(base) => 2,
        _ => return None,
    };
    char::from_u32(base as u32 + step)
}

/// Split a voiced full-width katakana into its base and half-width mark.
fn decompose(c: char) -> Option<(char, char)> {
    if c == 'ヴ' {
        return Some(('ウ', HALF_DAKUTEN));
    }
    let base_at = |back: u32| (c as u32).checked_sub(back).and_then(char::from_u32);
    if let Some(base) = base_at(1).filter(|b| VOICEABLE.contains(*b)) {
        return Some((base, HALF_DAKUTEN));
    }
    base_at(2)
        .filter(|b| SEMI_VOICEABLE.contains(*b))
        .map(|base| (base, HALF_HANDAKUTEN))
}

fn to_full_width(text: &str, flags: WidthFlags) -> String {
    let mut out = String::with_capacity(text.len() * 3);
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '0'..='9' if flags.digit => out.push(shift(c, true)),
            '!'..='~' if flags.ascii && !c.is_ascii_digit() => out.push(shift(c, true)),
            ' ' if flags.ascii => out.push(IDEOGRAPHIC_SPACE),
            _ if flags.kana => match half_kana_to_full(c) {
                Some(full) => {
                    let composed = chars.peek().and_then(|&m| compose(full, m));
                    match composed {
                        Some(voiced) => {
                            chars.next();
                            out.push(voiced);
                        }
                        None => out.push(full),
                    }
                }
                None => out.push(c),
            },
            _ => out.push(c),
        }
    }
    out
}

fn to_half_width(text: &str, flags: WidthFlags) -> String {
    let mut out = String::with_capacity(text.len());

    for c in text.chars() {
        match c {
            '０'..='９' if flags.digit => out.push(shift(c, false)),
            '！'..='～' if flags.ascii && !('０'..='９').contains(&c) => out.push(shift(c, false)),
            IDEOGRAPHIC_SPACE if flags.ascii => out.push(' '),
            _ if flags.kana => {
                if let Some(half) = full_kana_to_half(c) {
                    out.push(half);
                } else if let Some((base, mark)) = decompose(c) {
                    match full_kana_to_half(base) {
                        Some(half) => {
                            out.push(half);
                            out.push(mark);
                        }
                        None => out.push(c),
                    }
                } else {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}
