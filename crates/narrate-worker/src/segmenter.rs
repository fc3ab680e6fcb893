//! Split raw text into chunks that fit one speech-service call.
//!
//! Split points, in order of preference: a paragraph break, the end of a
//! sentence, a space, and finally any char boundary. A chunk never exceeds
//! the byte ceiling and never splits a code point.

use crate::error::{WorkerError, WorkerResult};

/// Smallest usable ceiling: one code point can take four bytes.
pub const MIN_BYTE_LIMIT: usize = 4;

const PARAGRAPH_BREAK: &str = "\n\n";

/// Sentence terminators and how many of their bytes stay with the sentence.
const SENTENCE_ENDS: [(&str, usize); 6] = [
    (". ", 1),
    ("! ", 1),
    ("? ", 1),
    ("。", 3),
    ("！", 3),
    ("？", 3),
];

/// Bytes a delimiter may extend past the ceiling (the trailing whitespace).
const LOOKAHEAD: usize = 2;

/// Normalize line endings, trim every line and join paragraphs with a blank line.
pub fn preprocess(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(PARAGRAPH_BREAK)
}

/// Split `text` into ordered chunks of at most `max_bytes` UTF-8 bytes.
pub fn segment(text: &str, max_bytes: usize) -> WorkerResult<Vec<String>> {
    if max_bytes < MIN_BYTE_LIMIT {
        return Err(WorkerError::config_error(format!(
            "chunk byte limit {} is below {}",
            max_bytes, MIN_BYTE_LIMIT
        )));
    }

    let text = preprocess(text);
    let mut chunks = Vec::new();
    let mut rest = text.as_str();

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        if rest.len() <= max_bytes {
            push_trimmed(&mut chunks, rest);
            break;
        }

        let cut = split_point(rest, max_bytes);
        push_trimmed(&mut chunks, &rest[..cut]);
        rest = &rest[cut..];
    }

    Ok(chunks)
}

fn push_trimmed(chunks: &mut Vec<String>, piece: &str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        chunks.push(piece.to_string());
    }
}

/// Byte offset to cut `text` at; always a char boundary in `1..=max_bytes`.
///
/// Delimiters are searched slightly past the ceiling so a break that starts
/// right at the ceiling still counts; the cut itself never passes it.
fn split_point(text: &str, max_bytes: usize) -> usize {
    let end = floor_char_boundary(text, max_bytes);
    let window = &text[..floor_char_boundary(text, end + LOOKAHEAD)];

    if let Some(cut) = last_cut(window, PARAGRAPH_BREAK, 0, end) {
        return cut;
    }

    let sentence_end = SENTENCE_ENDS
        .iter()
        .filter_map(|&(delim, keep)| last_cut(window, delim, keep, end))
        .max();
    if let Some(cut) = sentence_end {
        return cut;
    }

    last_cut(window, " ", 0, end).unwrap_or(end)
}

/// Last cut after `keep` bytes of a `delim` occurrence that lands in `1..=end`.
fn last_cut(window: &str, delim: &str, keep: usize, end: usize) -> Option<usize> {
    window
        .rmatch_indices(delim)
        .map(|(pos, _)| pos + keep)
        .find(|&cut| cut > 0 && cut <= end)
}

/// Largest char boundary at or below `index`.
fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}
