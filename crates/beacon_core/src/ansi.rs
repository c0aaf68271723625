//! Terminal control codes to safe markup.
//!
//! Console output is untrusted. Everything that is not an SGR attribute change
//! or a job back-reference is either HTML-escaped text or dropped.

use std::fmt::Write as _;

use regex::Regex;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;
const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';
/// Longest incomplete sequence carried over to the next chunk.
const MAX_CARRY: usize = 256;

const BACK_REFERENCE: &str = r"\x1b\[\{([^:\x1b]+):(\d+)\x1b\\";

const COLOR_NAMES: [&str; 8] = [
    "black", "red", "green", "yellow", "blue", "magenta", "cyan", "white",
];
const CUBE_LEVELS: [u8; 6] = [0, 95, 135, 175, 215, 255];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Named(u8),
    Bright(u8),
    Rgb(u8, u8, u8),
}

impl Color {
    fn from_256(index: u8) -> Self {
        match index {
            0..=7 => Color::Named(index),
            8..=15 => Color::Bright(index - 8),
            16..=231 => {
                let n = usize::from(index - 16);
                Color::Rgb(CUBE_LEVELS[n / 36], CUBE_LEVELS[(n / 6) % 6], CUBE_LEVELS[n % 6])
            }
            _ => {
                let level = 8 + 10 * (index - 232);
                Color::Rgb(level, level, level)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Style {
    fg: Option<Color>,
    bg: Option<Color>,
    bold: bool,
    faint: bool,
    italic: bool,
    underline: bool,
}

impl Style {
    fn is_plain(&self) -> bool {
        *self == Style::default()
    }

    fn apply_sgr(&mut self, params: &str) {
        let mut values = params
            .split([';', ':'])
            .map(|p| if p.is_empty() { 0 } else { p.parse::<u32>().unwrap_or(u32::MAX) });

        while let Some(code) = values.next() {
            match code {
                0 => *self = Style::default(),
                1 => self.bold = true,
                2 => self.faint = true,
                3 => self.italic = true,
                4 => self.underline = true,
                22 => {
                    self.bold = false;
                    self.faint = false;
                }
                23 => self.italic = false,
                24 => self.underline = false,
                30..=37 => self.fg = Some(Color::Named((code - 30) as u8)),
                39 => self.fg = None,
                40..=47 => self.bg = Some(Color::Named((code - 40) as u8)),
                49 => self.bg = None,
                90..=97 => self.fg = Some(Color::Bright((code - 90) as u8)),
                100..=107 => self.bg = Some(Color::Bright((code - 100) as u8)),
                38 => {
                    if let Some(color) = extended_color(&mut values) {
                        self.fg = Some(color);
                    }
                }
                48 => {
                    if let Some(color) = extended_color(&mut values) {
                        self.bg = Some(color);
                    }
                }
                _ => {}
            }
        }
    }

    fn open_tag(&self) -> String {
        let mut classes = Vec::new();
        let mut styles = Vec::new();
        for (color, layer, property) in [
            (self.fg, "fg", "color"),
            (self.bg, "bg", "background-color"),
        ] {
            match color {
                Some(Color::Named(n)) => {
                    classes.push(format!("ansi-{}-{layer}", COLOR_NAMES[usize::from(n)]))
                }
                Some(Color::Bright(n)) => {
                    classes.push(format!("ansi-bright-{}-{layer}", COLOR_NAMES[usize::from(n)]))
                }
                Some(Color::Rgb(r, g, b)) => styles.push(format!("{property}:rgb({r},{g},{b})")),
                None => {}
            }
        }
        for (set, class) in [
            (self.bold, "ansi-bold"),
            (self.faint, "ansi-faint"),
            (self.italic, "ansi-italic"),
            (self.underline, "ansi-underline"),
        ] {
            if set {
                classes.push(class.to_string());
            }
        }

        let mut tag = String::from("<span");
        if !classes.is_empty() {
            let _ = write!(tag, " class=\"{}\"", classes.join(" "));
        }
        if !styles.is_empty() {
            let _ = write!(tag, " style=\"{}\"", styles.join(";"));
        }
        tag.push('>');
        tag
    }
}

fn extended_color(values: &mut impl Iterator<Item = u32>) -> Option<Color> {
    match values.next()? {
        5 => u8::try_from(values.next()?).ok().map(Color::from_256),
        2 => {
            let r = u8::try_from(values.next()?).ok()?;
            let g = u8::try_from(values.next()?).ok()?;
            let b = u8::try_from(values.next()?).ok()?;
            Some(Color::Rgb(r, g, b))
        }
        _ => None,
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Escape<'a> {
    Sgr(&'a str),
    /// Any other complete (or malformed) sequence; dropped.
    Control,
    Incomplete,
}

/// Classifies the escape sequence at `start` and returns its end.
fn scan_escape(text: &str, start: usize) -> (Escape<'_>, usize) {
    let bytes = text.as_bytes();
    let len = bytes.len();
    let Some(&kind) = bytes.get(start + 1) else {
        return (Escape::Incomplete, len);
    };

    match kind {
        b'[' => {
            if bytes.get(start + 2) == Some(&b'{') && !text[start..].contains("\x1b\\") {
                if text[start..].contains('\n') {
                    return (Escape::Control, start + 1);
                }
                return (Escape::Incomplete, len);
            }
            let mut i = start + 2;
            while i < len && (0x30..=0x3f).contains(&bytes[i]) {
                i += 1;
            }
            let params_end = i;
            while i < len && (0x20..=0x2f).contains(&bytes[i]) {
                i += 1;
            }
            match bytes.get(i) {
                None => (Escape::Incomplete, len),
                Some(b'm') if i == params_end => (Escape::Sgr(&text[start + 2..params_end]), i + 1),
                Some(0x40..=0x7e) => (Escape::Control, i + 1),
                Some(_) => (Escape::Control, i),
            }
        }
        b']' => {
            let mut i = start + 2;
            while i < len {
                if bytes[i] == BEL {
                    return (Escape::Control, i + 1);
                }
                if bytes[i] == ESC && bytes.get(i + 1) == Some(&b'\\') {
                    return (Escape::Control, i + 2);
                }
                i += 1;
            }
            (Escape::Incomplete, len)
        }
        0x20..=0x2f => {
            let mut i = start + 1;
            while i < len && (0x20..=0x2f).contains(&bytes[i]) {
                i += 1;
            }
            match bytes.get(i) {
                None => (Escape::Incomplete, len),
                Some(0x30..=0x7e) => (Escape::Control, i + 1),
                Some(_) => (Escape::Control, i),
            }
        }
        0x30..=0x7e => (Escape::Control, start + 2),
        _ => (Escape::Control, start + 1),
    }
}

fn escape_html(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

fn link_markup(name: &str, number: &str) -> String {
    let mut name_html = String::new();
    escape_html(name, &mut name_html);
    format!(
        "<a href=\"jobs/{name_html}\">{name_html}</a>:<a href=\"jobs/{name_html}/{number}\">#{number}</a>"
    )
}

fn placeholder(index: usize) -> String {
    format!("{PLACEHOLDER_OPEN}{index}{PLACEHOLDER_CLOSE}")
}

/// Incremental converter from raw console text to HTML fragments.
///
/// Each returned fragment is self-contained (all spans closed) so it can be
/// appended to previously rendered output. Attribute state and incomplete
/// trailing escape sequences carry across calls.
#[derive(Debug, Clone)]
pub struct AnsiMarkup {
    style: Style,
    carry: String,
    back_reference: Option<Regex>,
}

impl Default for AnsiMarkup {
    fn default() -> Self {
        Self::new()
    }
}

impl AnsiMarkup {
    pub fn new() -> Self {
        Self {
            style: Style::default(),
            carry: String::new(),
            back_reference: Regex::new(BACK_REFERENCE).ok(),
        }
    }

    /// Converts the next piece of console text.
    pub fn convert(&mut self, input: &str) -> String {
        let mut text = std::mem::take(&mut self.carry);
        text.push_str(input);
        self.render(&text, false)
    }

    /// Flushes anything carried over; call once the stream has ended.
    pub fn finish(&mut self) -> String {
        let text = std::mem::take(&mut self.carry);
        self.render(&text, true)
    }

    fn render(&mut self, text: &str, at_end: bool) -> String {
        let text = text.replace([PLACEHOLDER_OPEN, PLACEHOLDER_CLOSE], "\u{FFFD}");

        let mut links = Vec::new();
        let protected = match &self.back_reference {
            Some(regex) => regex
                .replace_all(&text, |caps: &regex::Captures<'_>| {
                    links.push(link_markup(&caps[1], &caps[2]));
                    placeholder(links.len() - 1)
                })
                .into_owned(),
            None => text,
        };

        let mut out = String::with_capacity(protected.len());
        let mut span_open = false;
        let bytes = protected.as_bytes();
        let mut pos = 0;
        while pos < bytes.len() {
            let next_esc = protected[pos..]
                .find(ESC as char)
                .map_or(bytes.len(), |offset| pos + offset);
            if next_esc > pos {
                if !span_open && !self.style.is_plain() {
                    out.push_str(&self.style.open_tag());
                    span_open = true;
                }
                escape_html(&protected[pos..next_esc], &mut out);
            }
            if next_esc == bytes.len() {
                break;
            }

            let (escape, end) = scan_escape(&protected, next_esc);
            match escape {
                Escape::Sgr(params) => {
                    let before = self.style;
                    self.style.apply_sgr(params);
                    if span_open && before != self.style {
                        out.push_str("</span>");
                        span_open = false;
                    }
                    pos = end;
                }
                Escape::Control => pos = end,
                Escape::Incomplete => {
                    let rest = &protected[next_esc..];
                    if at_end || rest.len() > MAX_CARRY || rest.contains(PLACEHOLDER_OPEN) {
                        // Unfinishable; drop the lone ESC and keep the text.
                        pos = next_esc + 1;
                    } else {
                        self.carry = rest.to_string();
                        break;
                    }
                }
            }
        }
        if span_open {
            out.push_str("</span>");
        }

        if links.is_empty() {
            out
        } else {
            restore_links(&out, &links)
        }
    }
}

/// Swaps every link placeholder for its markup in a single pass.
fn restore_links(html: &str, links: &[String]) -> String {
    let mut restored = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(open) = rest.find(PLACEHOLDER_OPEN) {
        restored.push_str(&rest[..open]);
        let tail = &rest[open..];
        let body = &tail[PLACEHOLDER_OPEN.len_utf8()..];
        let Some(close) = body.find(PLACEHOLDER_CLOSE) else {
            rest = tail;
            break;
        };
        let end = PLACEHOLDER_OPEN.len_utf8() + close + PLACEHOLDER_CLOSE.len_utf8();
        match body[..close].parse::<usize>().ok().and_then(|index| links.get(index)) {
            Some(link) => restored.push_str(link),
            None => restored.push_str(&tail[..end]),
        }
        rest = &tail[end..];
    }
    restored.push_str(rest);
    restored
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_text_is_escaped() {
        let mut markup = AnsiMarkup::new();
        assert_eq!(
            markup.convert("a < b && \"c\" > 'd'"),
            "a &lt; b &amp;&amp; &quot;c&quot; &gt; &#39;d&#39;"
        );
    }

    #[test]
    fn sgr_colours_become_spans() {
        let mut markup = AnsiMarkup::new();
        assert_eq!(
            markup.convert("\x1b[1;31mfail\x1b[0m ok"),
            "<span class=\"ansi-red-fg ansi-bold\">fail</span> ok"
        );
    }

    #[test]
    fn extended_colours_use_inline_style() {
        let mut markup = AnsiMarkup::new();
        assert_eq!(
            markup.convert("\x1b[38;5;196mx\x1b[48;2;1;2;3my"),
            "<span style=\"color:rgb(255,0,0)\">x</span>\
             <span style=\"color:rgb(255,0,0);background-color:rgb(1,2,3)\">y</span>"
        );
    }

    #[test]
    fn grayscale_ramp() {
        assert_eq!(Color::from_256(232), Color::Rgb(8, 8, 8));
        assert_eq!(Color::from_256(255), Color::Rgb(238, 238, 238));
        assert_eq!(Color::from_256(9), Color::Bright(1));
    }

    #[test]
    fn style_carries_across_chunks_with_closed_spans() {
        let mut markup = AnsiMarkup::new();
        assert_eq!(markup.convert("\x1b[32mgo"), "<span class=\"ansi-green-fg\">go</span>");
        assert_eq!(markup.convert("on"), "<span class=\"ansi-green-fg\">on</span>");
    }

    #[test]
    fn other_controls_are_dropped() {
        let mut markup = AnsiMarkup::new();
        assert_eq!(
            markup.convert("a\x1b[2Kb\x1b]0;title\x07c\x1b(Bd\x1b=e"),
            "abcde"
        );
    }

    #[test]
    fn split_sequence_is_carried() {
        let mut markup = AnsiMarkup::new();
        assert_eq!(markup.convert("x\x1b[3"), "x");
        assert_eq!(markup.convert("1my"), "<span class=\"ansi-red-fg\">y</span>");
    }

    #[test]
    fn back_reference_becomes_links() {
        let mut markup = AnsiMarkup::new();
        assert_eq!(
            markup.convert("see \x1b[{deploy:42\x1b\\ <done>"),
            "see <a href=\"jobs/deploy\">deploy</a>:<a href=\"jobs/deploy/42\">#42</a> &lt;done&gt;"
        );
    }

    #[test]
    fn many_back_references_restore_in_order() {
        let mut markup = AnsiMarkup::new();
        let line: String = (1..=12).map(|n| format!("\x1b[{{j{n}:{n}\x1b\\ ")).collect();
        let expected: String = (1..=12)
            .map(|n| format!("<a href=\"jobs/j{n}\">j{n}</a>:<a href=\"jobs/j{n}/{n}\">#{n}</a> "))
            .collect();
        assert_eq!(markup.convert(&line), expected);
    }

    #[test]
    fn split_back_reference_is_carried() {
        let mut markup = AnsiMarkup::new();
        assert_eq!(markup.convert("by \x1b[{up"), "by ");
        assert_eq!(
            markup.convert("stream:7\x1b\\."),
            "<a href=\"jobs/upstream\">upstream</a>:<a href=\"jobs/upstream/7\">#7</a>."
        );
    }

    #[test]
    fn forged_placeholders_are_neutralized() {
        let mut markup = AnsiMarkup::new();
        assert_eq!(markup.convert("\u{E000}0\u{E001}"), "\u{FFFD}0\u{FFFD}");
    }

    #[test]
    fn finish_drops_unfinished_escape() {
        let mut markup = AnsiMarkup::new();
        assert_eq!(markup.convert("tail\x1b["), "tail");
        assert_eq!(markup.finish(), "[");
    }
}
