//! Content truncation with structural-boundary preference.
//!
//! Shortens text to a character budget, preferring to cut at a section
//! break, then a sentence break, then a word break, and finally falling
//! back to a hard cut. A fixed marker is appended whenever content is cut.
//!
//! # Algorithm
//!
//! 1. If the content fits in `max_length` characters, return it unchanged.
//! 2. Take the first `max_length` characters as the candidate.
//! 3. Scan backward from the end of the candidate for the strategy's
//!    delimiter, accepting it only if it lies within the strategy's slack
//!    of the end:
//!
//! | Strategy | Delimiter | Slack |
//! |----------|-----------|-------|
//! | [`Strategy::SectionBreak`] | `\n\n` | 500 |
//! | [`Strategy::SentenceBreak`] | `.`, `!` or `?` followed by `\n` | 200 |
//! | [`Strategy::WordBreak`] | any whitespace | 100 |
//!
//! 4. Without an acceptable delimiter, cut hard at `max_length`.
//! 5. Append the marker.
//!
//! All lengths are counted in `char`s, so cuts never split a UTF-8 scalar.
//!
//! # Example
//!
//! ```rust
//! use knowledge_harness_core::truncate::{truncate, Strategy, DEFAULT_MARKER};
//!
//! let text = "Intro paragraph.\n\nSecond section that is long enough to be cut.";
//! let out = truncate(text, 30, Strategy::SectionBreak);
//! assert!(out.truncated);
//! assert_eq!(out.text, format!("Intro paragraph.{}", DEFAULT_MARKER));
//! ```

/// Marker appended to truncated content unless the caller supplies one.
pub const DEFAULT_MARKER: &str = "\n\n[... content truncated ...]";

/// Boundary preference used when cutting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    SectionBreak,
    SentenceBreak,
    WordBreak,
    Hard,
}

impl Strategy {
    /// How far back (in chars) from the budget a delimiter may sit.
    pub fn slack(&self) -> usize {
        match self {
            Strategy::SectionBreak => 500,
            Strategy::SentenceBreak => 200,
            Strategy::WordBreak => 100,
            Strategy::Hard => 0,
        }
    }
}

/// Order tried by [`truncate_with_fallback`].
const FALLBACK_CHAIN: [Strategy; 3] = [
    Strategy::SectionBreak,
    Strategy::SentenceBreak,
    Strategy::WordBreak,
];

/// Output of a truncation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncated {
    pub text: String,
    /// `true` if this call cut the content and appended the marker.
    pub truncated: bool,
}

impl Truncated {
    fn unchanged(content: &str) -> Self {
        Self {
            text: content.to_string(),
            truncated: false,
        }
    }
}

/// Truncate with the default marker.
pub fn truncate(content: &str, max_length: usize, strategy: Strategy) -> Truncated {
    truncate_with_marker(content, max_length, strategy, DEFAULT_MARKER)
}

/// Truncate `content` to `max_length` chars (plus marker) using `strategy`.
pub fn truncate_with_marker(
    content: &str,
    max_length: usize,
    strategy: Strategy,
    marker: &str,
) -> Truncated {
    if fits(content, max_length, marker) {
        return Truncated::unchanged(content);
    }
    let candidate = prefix_chars(content, max_length);
    let cut = find_boundary(candidate, max_length, strategy).unwrap_or(candidate.len());
    finish(&candidate[..cut], marker)
}

/// Truncate with the default marker, trying section → sentence → word.
pub fn truncate_with_fallback(content: &str, max_length: usize) -> Truncated {
    truncate_with_fallback_marker(content, max_length, DEFAULT_MARKER)
}

/// Ordered-preference chain: the first strategy whose delimiter lies within
/// its slack wins; if none does, the content is cut hard at `max_length`.
pub fn truncate_with_fallback_marker(content: &str, max_length: usize, marker: &str) -> Truncated {
    if fits(content, max_length, marker) {
        return Truncated::unchanged(content);
    }
    let candidate = prefix_chars(content, max_length);
    let limit = max_length + marker.chars().count();

    for strategy in FALLBACK_CHAIN {
        if let Some(cut) = find_boundary(candidate, max_length, strategy) {
            let out = finish(&candidate[..cut], marker);
            if out.text.chars().count() <= limit {
                return out;
            }
        }
    }
    finish(candidate, marker)
}

/// Content fits when it is within budget, or when it is already the output
/// of a truncation at this budget (body within budget, marker at the end).
fn fits(content: &str, max_length: usize, marker: &str) -> bool {
    let len = content.chars().count();
    if len <= max_length {
        return true;
    }
    !marker.is_empty()
        && content.ends_with(marker)
        && len - marker.chars().count() <= max_length
}

fn finish(body: &str, marker: &str) -> Truncated {
    let mut text = String::with_capacity(body.len() + marker.len());
    text.push_str(body);
    text.push_str(marker);
    Truncated {
        text,
        truncated: true,
    }
}

/// The first `n` chars of `s`.
fn prefix_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Byte offset in `candidate` where the cut should happen, if the strategy's
/// delimiter lies within its slack. `candidate` holds exactly `max_length`
/// chars.
fn find_boundary(candidate: &str, max_length: usize, strategy: Strategy) -> Option<usize> {
    let min_chars = max_length.saturating_sub(strategy.slack());
    let min_byte = candidate
        .char_indices()
        .nth(min_chars)
        .map(|(i, _)| i)
        .unwrap_or(candidate.len());

    let cut = match strategy {
        Strategy::SectionBreak => candidate.rfind("\n\n"),
        Strategy::SentenceBreak => candidate
            .match_indices('\n')
            .map(|(i, _)| i)
            .filter(|&i| {
                candidate[..i]
                    .chars()
                    .next_back()
                    .is_some_and(|c| matches!(c, '.' | '!' | '?'))
            })
            .last(),
        Strategy::WordBreak => candidate
            .char_indices()
            .filter(|(_, c)| c.is_whitespace())
            .map(|(i, _)| i)
            .last(),
        Strategy::Hard => None,
    }?;

    // A cut at position 0 would discard everything; treat it as not found.
    if cut >= min_byte && cut > 0 {
        Some(cut)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_len(out: &Truncated) -> usize {
        out.text.chars().count() - DEFAULT_MARKER.chars().count()
    }

    #[test]
    fn test_short_content_unchanged() {
        let out = truncate("hello", 10, Strategy::SectionBreak);
        assert_eq!(out.text, "hello");
        assert!(!out.truncated);
    }

    #[test]
    fn test_exact_length_unchanged() {
        let out = truncate("0123456789", 10, Strategy::WordBreak);
        assert_eq!(out.text, "0123456789");
        assert!(!out.truncated);
    }

    #[test]
    fn test_section_break_within_slack() {
        let first = "a".repeat(700);
        let text = format!("{}\n\n{}", first, "b".repeat(800));
        let out = truncate(&text, 1000, Strategy::SectionBreak);
        assert!(out.truncated);
        assert_eq!(out.text, format!("{}{}", first, DEFAULT_MARKER));
    }

    #[test]
    fn test_section_break_outside_slack_hard_cuts() {
        let first = "a".repeat(100);
        let text = format!("{}\n\n{}", first, "b".repeat(2000));
        let out = truncate(&text, 1000, Strategy::SectionBreak);
        assert!(out.truncated);
        assert_eq!(body_len(&out), 1000);
    }

    #[test]
    fn test_sentence_break_requires_newline() {
        let text = format!("{}. More text.\nTail {}", "x".repeat(150), "y".repeat(400));
        let out = truncate(&text, 300, Strategy::SentenceBreak);
        assert!(out.text.starts_with(&format!("{}. More text.", "x".repeat(150))));
        assert!(out.text.ends_with(DEFAULT_MARKER));
        assert!(!out.text.contains("Tail"));
    }

    #[test]
    fn test_word_break() {
        let text = "alpha beta gamma delta epsilon";
        let out = truncate(text, 13, Strategy::WordBreak);
        assert_eq!(out.text, format!("alpha beta{}", DEFAULT_MARKER));
    }

    #[test]
    fn test_output_within_bound() {
        let text = "word ".repeat(1000);
        for strategy in [
            Strategy::SectionBreak,
            Strategy::SentenceBreak,
            Strategy::WordBreak,
            Strategy::Hard,
        ] {
            let out = truncate(&text, 777, strategy);
            assert!(out.text.chars().count() <= 777 + DEFAULT_MARKER.chars().count());
        }
    }

    #[test]
    fn test_idempotent() {
        let text = format!("{}\n\n{}", "a".repeat(900), "b".repeat(900));
        let once = truncate(&text, 1000, Strategy::SectionBreak);
        let twice = truncate(&once.text, 1000, Strategy::SectionBreak);
        assert_eq!(once.text, twice.text);
        assert!(!twice.truncated);
        assert_eq!(twice.text.matches("content truncated").count(), 1);
    }

    #[test]
    fn test_custom_marker() {
        let out = truncate_with_marker("one two three four", 8, Strategy::WordBreak, " …");
        assert_eq!(out.text, "one two …");
    }

    #[test]
    fn test_fallback_prefers_section() {
        let text = format!(
            "{}\n\n{}. end.\n{}",
            "a".repeat(600),
            "b".repeat(300),
            "c".repeat(500)
        );
        let out = truncate_with_fallback(&text, 1000);
        assert_eq!(out.text, format!("{}{}", "a".repeat(600), DEFAULT_MARKER));
    }

    #[test]
    fn test_fallback_uses_sentence_when_no_section() {
        let text = format!("{}. done.\n{}", "a".repeat(850), "b".repeat(500));
        let out = truncate_with_fallback(&text, 1000);
        assert!(out.text.starts_with(&format!("{}. done.", "a".repeat(850))));
        assert!(!out.text.contains('b'));
    }

    #[test]
    fn test_fallback_hard_cut_without_delimiters() {
        let text = "z".repeat(3000);
        let out = truncate_with_fallback(&text, 1000);
        assert_eq!(body_len(&out), 1000);
    }

    #[test]
    fn test_multibyte_never_split() {
        let text = "┌──┐ ".repeat(400);
        let out = truncate_with_fallback(&text, 333);
        assert!(out.truncated);
        assert!(out.text.chars().count() <= 333 + DEFAULT_MARKER.chars().count());
    }
}
