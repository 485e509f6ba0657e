//! Substring search over an already-fetched transcript.

use std::ops::Range;

use crate::transcript::TranscriptEntry;

/// Queries containing anything outside 7-bit ASCII are matched case-sensitively,
/// so case folding never rewrites non-Latin scripts.
fn is_case_sensitive(query: &str) -> bool {
  !query.is_ascii()
}

/// Whether `text` contains `query` under the active case policy.
/// A hit always has at least one highlight range.
pub fn matches(text: &str, query: &str) -> bool {
  !match_ranges(text, query).is_empty()
}

/// Byte length of the prefix of `text` whose lowercase form is exactly `needle`.
/// A match may not end inside a char's lowercase expansion.
fn folded_match_len(text: &str, needle: &[u8]) -> Option<usize> {
  let mut want = needle.iter();
  for (offset, c) in text.char_indices() {
    for folded in c.to_lowercase() {
      match want.next() {
        Some(&b) if folded == char::from(b) => {}
        _ => return None,
      }
    }
    if want.as_slice().is_empty() {
      return Some(offset + c.len_utf8());
    }
  }
  None
}

/// Entries containing `query`, in transcript order. An empty query matches nothing.
pub fn search<'a>(transcript: &'a [TranscriptEntry], query: &str) -> Vec<&'a TranscriptEntry> {
  if query.is_empty() {
    return Vec::new();
  }
  transcript.iter().filter(|entry| matches(&entry.text, query)).collect()
}

/// Byte ranges of non-overlapping occurrences of `query` in `text`, for highlighting.
pub fn match_ranges(text: &str, query: &str) -> Vec<Range<usize>> {
  if query.is_empty() || query.len() > text.len() {
    return Vec::new();
  }

  let mut ranges = Vec::new();
  if is_case_sensitive(query) {
    let mut from = 0;
    while let Some(pos) = text[from..].find(query) {
      let start = from + pos;
      ranges.push(start..start + query.len());
      from = start + query.len();
    }
    return ranges;
  }

  // Text is folded one char at a time, so signs like U+212A match "k".
  let needle = query.to_ascii_lowercase().into_bytes();
  let mut i = 0;
  while let Some(c) = text[i..].chars().next() {
    match folded_match_len(&text[i..], &needle) {
      Some(len) => {
        ranges.push(i..i + len);
        i += len;
      }
      None => i += c.len_utf8(),
    }
  }
  ranges
}

/// Split `text` into `(segment, is_match)` pieces covering the whole string.
pub fn highlight<'a>(text: &'a str, query: &str) -> Vec<(&'a str, bool)> {
  let mut pieces = Vec::new();
  let mut cursor = 0;
  for range in match_ranges(text, query) {
    if range.start > cursor {
      pieces.push((&text[cursor..range.start], false));
    }
    pieces.push((&text[range.clone()], true));
    cursor = range.end;
  }
  if cursor < text.len() {
    pieces.push((&text[cursor..], false));
  }
  pieces
}
