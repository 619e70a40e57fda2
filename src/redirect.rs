//! The `__REDIRECT:<path>__` control tag carried inside assistant text.
//!
//! The client matches the tag against its accumulated buffer. The service
//! splits it out of the model's token stream as it arrives so it can be
//! validated and re-emitted in canonical form.

use lazy_static::lazy_static;
use regex::Regex;

pub const TAG_OPEN: &str = "__REDIRECT:";
pub const TAG_CLOSE: &str = "__";

lazy_static! {
    static ref REDIRECT_TAG: Regex = Regex::new(r"__REDIRECT:(.+?)__").unwrap();
}

pub fn format_tag(path: &str) -> String {
    format!("{}{}{}", TAG_OPEN, path, TAG_CLOSE)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectMatch {
    pub path: String,
    /// Byte offset of the opening `__REDIRECT:`.
    pub start: usize,
    /// Byte offset just past the closing `__`.
    pub end: usize,
}

/// First complete tag at or after `from`.
pub fn find_redirect_from(buffer: &str, from: usize) -> Option<RedirectMatch> {
    let haystack = buffer.get(from..)?;
    let caps = REDIRECT_TAG.captures(haystack)?;
    let whole = caps.get(0)?;
    let path = caps.get(1)?;
    Some(RedirectMatch {
        path: path.as_str().to_string(),
        start: from + whole.start(),
        end: from + whole.end(),
    })
}

pub fn find_redirect(buffer: &str) -> Option<RedirectMatch> {
    find_redirect_from(buffer, 0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Redirect(String),
}

/// Incremental tag extraction over a token stream.
///
/// Text that might still turn out to be the beginning of a tag is held back
/// until the next push (or [`RedirectSplitter::finish`]) decides it.
#[derive(Debug, Default)]
pub struct RedirectSplitter {
    pending: String,
}

impl RedirectSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        self.pending.push_str(chunk);
        let mut out = Vec::new();

        loop {
            let Some(open) = self.pending.find(TAG_OPEN) else {
                let keep = partial_tag_len(&self.pending);
                let emit_len = self.pending.len() - keep;
                if emit_len > 0 {
                    let text: String = self.pending.drain(..emit_len).collect();
                    out.push(Segment::Text(text));
                }
                break;
            };

            if open > 0 {
                let text: String = self.pending.drain(..open).collect();
                out.push(Segment::Text(text));
            }

            // `pending` now starts with the opening marker.
            match find_redirect(&self.pending) {
                Some(m) if m.start == 0 => {
                    self.pending.drain(..m.end);
                    out.push(Segment::Redirect(m.path));
                }
                _ => {
                    let body = &self.pending[TAG_OPEN.len()..];
                    if body.contains('\n') {
                        // A line break inside the body means this was never a tag.
                        let text: String = self.pending.drain(..TAG_OPEN.len()).collect();
                        out.push(Segment::Text(text));
                        continue;
                    }
                    break;
                }
            }
        }

        merge_text(out)
    }

    /// Releases whatever is still held back as plain text.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() { None } else { Some(std::mem::take(&mut self.pending)) }
    }
}

/// Length of the longest suffix of `text` that could still grow into an
/// opening tag.
pub fn partial_tag_len(text: &str) -> usize {
    let max = (TAG_OPEN.len() - 1).min(text.len());
    (1..=max)
        .rev()
        .find(|&n| text.is_char_boundary(text.len() - n) && TAG_OPEN.starts_with(&text[text.len() - n..]))
        .unwrap_or(0)
}

fn merge_text(segments: Vec<Segment>) -> Vec<Segment> {
    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
    for seg in segments {
        match (merged.last_mut(), seg) {
            (Some(Segment::Text(prev)), Segment::Text(next)) => prev.push_str(&next),
            (_, seg) => merged.push(seg),
        }
    }
    merged
}
