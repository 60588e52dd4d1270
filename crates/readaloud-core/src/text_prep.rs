//! Text preparation for TTS — splitting element text into speakable segments.
//!
//! Pure functions, no I/O.

use regex::Regex;
use std::sync::LazyLock;

use crate::types::{DEFAULT_MAX_CHARS, DEFAULT_MIN_CHARS};

// Split delimiters, strongest first. The index is the priority.
static DELIMITERS: LazyLock<[Regex; 7]> = LazyLock::new(|| {
    [
        // Sentence endings
        Regex::new(r"[.!?]+\s+").unwrap(),
        // Semicolon
        Regex::new(r";\s*").unwrap(),
        // Comma + contrasting conjunction
        Regex::new(r"(?i),\s+(?:but|however|although|though|yet|nevertheless)\s+").unwrap(),
        // Comma + coordinating conjunction
        Regex::new(r"(?i),\s+(?:and|or)\s+").unwrap(),
        // Bare comma
        Regex::new(r",\s*").unwrap(),
        // Contrasting word without comma
        Regex::new(r"(?i)\s+(?:but|however|although|though|yet|nevertheless)\s+").unwrap(),
        // Coordinating word without comma
        Regex::new(r"(?i)\s+(?:and|or)\s+").unwrap(),
    ]
});

/// Split `text` into segments of roughly `min_chars..=max_chars` characters.
///
/// Text no longer than `min_chars` comes back whole. Longer text is cut at
/// the strongest delimiter that leaves at least `min_chars` on both sides;
/// when none qualifies it is force-split at the last whitespace in
/// `[0.7 * max_chars, max_chars]`. A run without any whitespace is never cut
/// mid-word, so it may exceed `max_chars`.
///
/// Segments are trimmed, non-empty, and in reading order.
pub fn split_long_sentence(text: &str, min_chars: usize, max_chars: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if char_len(trimmed) <= min_chars {
        return vec![trimmed.to_string()];
    }

    let mut segments = Vec::new();
    let mut rest = trimmed;

    while !rest.is_empty() {
        if char_len(rest) <= max_chars {
            segments.push(rest.to_string());
            break;
        }

        let split_at = match best_split_point(rest, min_chars) {
            Some(idx) if char_len(rest[..idx].trim()) <= max_chars => Some(idx),
            _ => force_split_point(rest, max_chars),
        };

        let Some(idx) = split_at else {
            segments.push(rest.to_string());
            break;
        };

        let left = rest[..idx].trim();
        if !left.is_empty() {
            segments.push(left.to_string());
        }
        rest = rest[idx..].trim();
    }

    segments
}

/// [`split_long_sentence`] with the default 50/100 bounds.
pub fn split_segments(text: &str) -> Vec<String> {
    split_long_sentence(text, DEFAULT_MIN_CHARS, DEFAULT_MAX_CHARS)
}

/// Byte index just past the strongest qualifying delimiter match.
fn best_split_point(text: &str, min_chars: usize) -> Option<usize> {
    for delimiter in DELIMITERS.iter() {
        for m in delimiter.find_iter(text) {
            let idx = m.end();
            let left = text[..idx].trim();
            let right = text[idx..].trim();
            if char_len(left) >= min_chars && char_len(right) >= min_chars {
                return Some(idx);
            }
        }
    }
    None
}

/// Byte index of the whitespace to force-split at, scanning back from
/// `max_chars`.
fn force_split_point(text: &str, max_chars: usize) -> Option<usize> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let floor = (max_chars * 7).div_ceil(10);
    let is_space = |i: usize| chars.get(i).is_some_and(|&(_, c)| c.is_whitespace());

    (floor..=max_chars)
        .rev()
        .chain((1..floor).rev())
        .chain(max_chars + 1..chars.len())
        .find(|&i| is_space(i))
        .map(|i| chars[i].0)
}

/// Start of the word containing the caret: one past the last space before it.
///
/// Both offsets are in characters.
pub fn word_start_offset(text: &str, caret: usize) -> usize {
    let before: String = text.chars().take(caret).collect();
    before.rfind(' ').map(|i| before[..i].chars().count() + 1).unwrap_or(0)
}

/// The part of `text` from character offset `offset` onward.
pub fn tail_from(text: &str, offset: usize) -> &str {
    match text.char_indices().nth(offset) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}

/// The part of `text` before character offset `offset`.
pub fn head_until(text: &str, offset: usize) -> &str {
    &text[..text.len() - tail_from(text, offset).len()]
}

/// First 30 characters of `text`, for log lines.
pub fn preview(text: &str) -> String {
    const PREVIEW_CHARS: usize = 30;
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_of(parts: &[String]) -> Vec<String> {
        parts
            .join(" ")
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    // ── split_long_sentence ─────────────────────────────────────────

    #[test]
    fn short_text_single_segment() {
        assert_eq!(split_long_sentence("Short.", 50, 100), vec!["Short."]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(split_long_sentence("", 50, 100).is_empty());
        assert!(split_long_sentence("   \n ", 50, 100).is_empty());
    }

    #[test]
    fn text_within_max_is_not_split() {
        // 93 chars: no delimiter leaves 50 chars on both sides.
        let text = "Hello world. This is a test, but it continues further than fifty characters to force a split.";
        assert_eq!(split_segments(text), vec![text]);
    }

    #[test]
    fn prefers_sentence_boundary() {
        let text = "Reading aloud works best when the text is split at natural points. Short pieces sound choppy, but long pieces take too long to fetch from the server.";
        assert_eq!(
            split_segments(text),
            vec![
                "Reading aloud works best when the text is split at natural points.",
                "Short pieces sound choppy, but long pieces take too long to fetch from the server.",
            ]
        );
    }

    #[test]
    fn semicolon_beats_comma_conjunction() {
        let text = "The first clause of this sentence is quite long indeed; the second clause is also rather long, and it goes on.";
        assert_eq!(
            split_segments(text),
            vec![
                "The first clause of this sentence is quite long indeed;",
                "the second clause is also rather long, and it goes on.",
            ]
        );
    }

    #[test]
    fn force_splits_at_word_boundary() {
        let text = "word ".repeat(60);
        let parts = split_segments(&text);
        assert_eq!(parts.len(), 3);
        for part in &parts {
            assert!(part.chars().count() <= 100, "too long: {}", part.len());
        }
        assert_eq!(words_of(&parts).len(), 60);
    }

    #[test]
    fn force_splits_at_newlines_and_tabs() {
        for (text, count) in [("word\n".repeat(40), 40), ("alpha\tbeta\t".repeat(15), 30)] {
            let parts = split_long_sentence(&text, 50, 100);
            assert!(parts.len() > 1, "not split: {text:?}");
            for part in &parts {
                assert!(part.chars().count() <= 100, "too long: {}", part.len());
            }
            assert_eq!(words_of(&parts).len(), count);
        }
    }

    #[test]
    fn unsplittable_run_kept_whole() {
        let text = "a".repeat(150);
        assert_eq!(split_segments(&text), vec![text]);
    }

    #[test]
    fn force_split_falls_back_below_window() {
        // Only space sits before the 70..=100 window.
        let text = format!("lead {}", "b".repeat(120));
        let parts = split_segments(&text);
        assert_eq!(parts, vec!["lead".to_string(), "b".repeat(120)]);
    }

    #[test]
    fn preserves_word_sequence() {
        let inputs = [
            "Hello world. This is a test, but it continues further than fifty characters to force a split. The next sentence adds enough extra words to go well past one hundred characters.",
            "One; two; three; four; five; six; seven; eight; nine; ten; eleven; twelve; thirteen; fourteen; fifteen; sixteen; seventeen.",
            "This first part runs on for a good while, but the second half keeps going and going without stopping here.",
            "  Leading   and trailing   whitespace is   collapsed when the segments are joined back together, or so we hope, and it should still work.  ",
        ];
        for input in inputs {
            let parts = split_segments(input);
            let expected: Vec<String> = input.split_whitespace().map(str::to_string).collect();
            assert_eq!(words_of(&parts), expected, "input: {input}");
            for part in &parts {
                assert!(!part.is_empty());
                assert_eq!(part.trim(), part);
                let longest_word = part.split_whitespace().map(|w| w.chars().count()).max();
                assert!(
                    part.chars().count() <= 100 || part.split_whitespace().count() == 1,
                    "segment too long ({longest_word:?}): {part}"
                );
            }
        }
    }

    #[test]
    fn custom_bounds_are_honoured() {
        let text = "Hello world. This is a test, but it continues further than fifty characters to force a split.";
        let parts = split_long_sentence(text, 20, 60);
        assert!(parts.len() >= 2);
        for part in &parts {
            assert!(part.chars().count() <= 60);
        }
    }

    #[test]
    fn conjunctions_match_case_insensitively() {
        let text = "An opening stretch of words that is long enough alone, BUT a closing stretch follows right after it here and there.";
        let parts = split_segments(text);
        assert_eq!(parts.len(), 2);
        assert!(parts[0].ends_with("BUT"));
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "Café crème ".repeat(20);
        let parts = split_segments(&text);
        assert!(parts.len() > 1);
        assert_eq!(words_of(&parts).len(), 40);
    }

    // ── offsets ─────────────────────────────────────────────────────

    #[test]
    fn word_start_from_caret() {
        assert_eq!(word_start_offset("hello brave world", 9), 6);
        assert_eq!(word_start_offset("hello brave world", 3), 0);
        assert_eq!(word_start_offset("hello brave world", 6), 6);
    }

    #[test]
    fn tail_and_head_split_by_chars() {
        let text = "né un jour";
        assert_eq!(tail_from(text, 3), "un jour");
        assert_eq!(head_until(text, 3), "né ");
        assert_eq!(tail_from(text, 99), "");
        assert_eq!(head_until(text, 99), text);
    }

    #[test]
    fn preview_truncates_long_text() {
        assert_eq!(preview("short"), "short");
        let long = "a".repeat(40);
        assert_eq!(preview(&long), format!("{}...", "a".repeat(30)));
    }
}
