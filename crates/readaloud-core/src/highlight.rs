//! Highlight markup for the word currently being spoken.

use regex::Regex;
use std::sync::LazyLock;

pub const HIGHLIGHT_CLASS: &str = "read-highlight";
pub const PRELOAD_HIGHLIGHT_CLASS: &str = "read-preload-highlight";

static RE_HIGHLIGHT_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<span class="read-(?:preload-)?highlight">(.*?)</span>"#).unwrap()
});

/// Whitespace-separated words of a segment.
pub fn words(sentence: &str) -> Vec<&str> {
    sentence.split_whitespace().collect()
}

/// Element markup with the first word of `sentence` marked as loading.
pub fn preload_markup(sentence: &str, before: &str, to_read: &str) -> String {
    wrap_word(sentence, 0, before, to_read, PRELOAD_HIGHLIGHT_CLASS)
}

/// Element markup with word `index` of `sentence` highlighted.
pub fn word_markup(sentence: &str, index: usize, before: &str, to_read: &str) -> String {
    wrap_word(sentence, index, before, to_read, HIGHLIGHT_CLASS)
}

fn wrap_word(sentence: &str, index: usize, before: &str, to_read: &str, class: &str) -> String {
    let words = words(sentence);
    let (Some(word), Some(sentence_start)) = (words.get(index), to_read.find(sentence)) else {
        return format!("{before}{to_read}");
    };

    // Walk the words up to `index` so repeated words resolve to the right one.
    let mut cursor = 0;
    let mut word_pos = 0;
    for w in &words[..=index] {
        word_pos = cursor + sentence[cursor..].find(w).unwrap_or(0);
        cursor = word_pos + w.len();
    }

    let start = sentence_start + word_pos;
    let end = start + word.len();
    format!(
        "{before}{}<span class=\"{class}\">{word}</span>{}",
        &to_read[..start],
        &to_read[end..]
    )
}

/// Replace every highlight span with its inner text.
pub fn strip_highlights(markup: &str) -> String {
    RE_HIGHLIGHT_SPAN.replace_all(markup, "$1").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highlights_word_by_index() {
        let out = word_markup("the cat saw the dog", 3, "Intro: ", "the cat saw the dog");
        assert_eq!(
            out,
            r#"Intro: the cat saw <span class="read-highlight">the</span> dog"#
        );
    }

    #[test]
    fn preload_marks_first_word_of_later_sentence() {
        let out = preload_markup("Second one.", "", "First one. Second one.");
        assert_eq!(
            out,
            r#"First one. <span class="read-preload-highlight">Second</span> one."#
        );
    }

    #[test]
    fn missing_sentence_leaves_content() {
        assert_eq!(word_markup("absent", 0, "a ", "b c"), "a b c");
        assert_eq!(word_markup("b c", 5, "a ", "b c"), "a b c");
    }

    #[test]
    fn strip_removes_both_span_kinds() {
        let markup = r#"<span class="read-preload-highlight">A</span> b <span class="read-highlight">c</span>"#;
        assert_eq!(strip_highlights(markup), "A b c");
    }

    #[test]
    fn words_ignore_extra_whitespace() {
        assert_eq!(words("  one\ttwo  three "), vec!["one", "two", "three"]);
        assert!(words("   ").is_empty());
    }
}
