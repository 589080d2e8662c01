//! Normalization of captured terminal buffers into plain-text frames.
//!
//! A capture carries the session's rendering markup and hard-wraps long log
//! lines at the pane width. Normalizing strips the markup, rejoins wrapped
//! lines into one line per log entry (an entry starts with `[`), and keeps at
//! most one blank line between blocks.

use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

fn ansi_escape() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("valid regex")
    })
}

fn color_remnant() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[\d{1,2}(?:;\d{1,2})*m").expect("valid regex"))
}

/// Removing a match can splice a new one together, so strip to a fixed point.
fn strip_all(pattern: &Regex, input: String) -> String {
    let mut current = input;
    loop {
        let next = match pattern.replace_all(&current, "") {
            Cow::Borrowed(_) => None,
            Cow::Owned(next) => Some(next),
        };
        match next {
            Some(next) => current = next,
            None => return current,
        }
    }
}

pub fn strip_markup(raw: &str) -> String {
    let mut text = raw.to_string();
    loop {
        let stripped = strip_all(color_remnant(), strip_all(ansi_escape(), text.clone()));
        if stripped == text {
            return stripped;
        }
        text = stripped;
    }
}

fn starts_entry(line: &str) -> bool {
    line.starts_with('[')
}

/// Rejoining can splice a dangling escape prefix onto the next line, so
/// passes repeat until the frame stops changing.
pub fn normalize_frame(raw: &str) -> String {
    let mut frame = normalize_pass(raw);
    loop {
        let next = normalize_pass(&frame);
        if next == frame {
            return frame;
        }
        frame = next;
    }
}

fn normalize_pass(raw: &str) -> String {
    let text = strip_markup(raw);

    let mut entries: Vec<String> = Vec::new();
    let mut buffer = String::new();
    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() {
            if !buffer.is_empty() {
                entries.push(std::mem::take(&mut buffer));
            }
            entries.push(String::new());
            continue;
        }
        if buffer.is_empty() || starts_entry(stripped) {
            if !buffer.is_empty() {
                entries.push(std::mem::take(&mut buffer));
            }
            buffer.push_str(stripped);
        } else {
            buffer.push(' ');
            buffer.push_str(stripped);
        }
    }
    if !buffer.is_empty() {
        entries.push(buffer);
    }

    let mut collapsed: Vec<String> = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.is_empty() && collapsed.last().is_some_and(|prev| prev.is_empty()) {
            continue;
        }
        collapsed.push(entry);
    }
    // Trailing blank rows are the unused part of the pane.
    while collapsed.last().is_some_and(|last| last.is_empty()) {
        collapsed.pop();
    }

    collapsed.join("\n")
}

/// Remembers the last emitted frame; an empty frame is never emitted.
#[derive(Debug, Default)]
pub struct FrameDeduper {
    last: String,
}

impl FrameDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the normalized frame when it differs from the previous emission.
    pub fn observe(&mut self, raw: &str) -> Option<String> {
        let frame = normalize_frame(raw);
        if frame == self.last {
            return None;
        }
        self.last = frame.clone();
        Some(frame)
    }
}
