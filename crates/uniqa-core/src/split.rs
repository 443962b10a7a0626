//! Recursive delimiter-priority text splitter.
//!
//! [`split_recursive`] is a pure function with no knowledge of documents or
//! storage. It tries the first delimiter in the priority list, greedily
//! merges the resulting pieces back together up to `size` characters (with
//! an `overlap` tail carried into the next piece), and recurses with the
//! remaining delimiters on any piece that is still too large.
//!
//! # Guarantees
//!
//! - Every output piece is at most `size` characters long, except a single
//!   sentence (text ending in a terminator with no internal sentence break)
//!   that alone exceeds `size`. It is emitted whole.
//! - Output pieces are trimmed and non-empty.
//! - Lengths are measured in `char`s, never bytes.

use std::collections::VecDeque;

use crate::models::char_len;

/// Split boundaries, from coarsest to finest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// Blank line (`\n\n`).
    Paragraph,
    /// Single newline.
    Line,
    /// After `.`, `!`, `?` or `…` followed by whitespace.
    Sentence,
    /// Any whitespace run.
    Whitespace,
    /// Fixed-width character windows.
    Character,
}

impl Delimiter {
    fn joiner(&self) -> &'static str {
        match self {
            Delimiter::Paragraph => "\n\n",
            Delimiter::Line => "\n",
            Delimiter::Sentence | Delimiter::Whitespace => " ",
            Delimiter::Character => "",
        }
    }
}

pub const DEFAULT_PRIORITY: [Delimiter; 5] = [
    Delimiter::Paragraph,
    Delimiter::Line,
    Delimiter::Sentence,
    Delimiter::Whitespace,
    Delimiter::Character,
];

pub(crate) const TERMINATORS: [char; 5] = ['.', '!', '?', '…', '。'];

/// Split `text` into pieces of at most `size` characters.
///
/// `overlap` is clamped below `size`. An empty priority list falls back to
/// character windows.
pub fn split_recursive(text: &str, priority: &[Delimiter], size: usize, overlap: usize) -> Vec<String> {
    let size = size.max(1);
    let overlap = overlap.min(size - 1);
    let text = text.trim();

    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= size {
        return vec![text.to_string()];
    }

    let Some((&delim, rest)) = priority.split_first() else {
        return char_windows(text, size, overlap);
    };

    if delim == Delimiter::Character {
        return char_windows(text, size, overlap);
    }

    let pieces = split_on(text, delim);
    if pieces.len() <= 1 {
        if delim == Delimiter::Sentence && ends_with_terminator(text) {
            return vec![text.to_string()];
        }
        return split_recursive(text, rest, size, overlap);
    }

    merge_pieces(pieces, delim, rest, size, overlap)
}

fn split_on(text: &str, delim: Delimiter) -> Vec<String> {
    let raw: Vec<String> = match delim {
        Delimiter::Paragraph => text.split("\n\n").map(str::to_string).collect(),
        Delimiter::Line => text.split('\n').map(str::to_string).collect(),
        Delimiter::Sentence => split_sentences(text),
        Delimiter::Whitespace => text.split_whitespace().map(str::to_string).collect(),
        Delimiter::Character => text.chars().map(|c| c.to_string()).collect(),
    };
    raw.into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Break after a terminator that is followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if TERMINATORS.contains(&c) {
            if let Some(next) = chars.peek() {
                if next.is_whitespace() {
                    let sentence = current.trim();
                    if !sentence.is_empty() {
                        out.push(sentence.to_string());
                    }
                    current.clear();
                }
            }
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        out.push(tail.to_string());
    }
    out
}

fn ends_with_terminator(text: &str) -> bool {
    text.trim_end()
        .chars()
        .last()
        .map(|c| TERMINATORS.contains(&c))
        .unwrap_or(false)
}

fn joined_len(window: &VecDeque<String>, sep_len: usize) -> usize {
    if window.is_empty() {
        return 0;
    }
    window.iter().map(|p| char_len(p)).sum::<usize>() + sep_len * (window.len() - 1)
}

fn join(window: &VecDeque<String>, sep: &str) -> String {
    window.iter().map(String::as_str).collect::<Vec<_>>().join(sep)
}

fn merge_pieces(
    pieces: Vec<String>,
    delim: Delimiter,
    rest: &[Delimiter],
    size: usize,
    overlap: usize,
) -> Vec<String> {
    let sep = delim.joiner();
    let sep_len = char_len(sep);
    let mut out = Vec::new();
    let mut window: VecDeque<String> = VecDeque::new();

    for piece in pieces {
        let piece_len = char_len(&piece);

        if piece_len > size {
            if !window.is_empty() {
                out.push(join(&window, sep));
                window.clear();
            }
            if delim == Delimiter::Sentence && ends_with_terminator(&piece) {
                out.push(piece);
            } else {
                out.extend(split_recursive(&piece, rest, size, overlap));
            }
            continue;
        }

        let current = joined_len(&window, sep_len);
        let would_be = if window.is_empty() {
            piece_len
        } else {
            current + sep_len + piece_len
        };

        if would_be > size && !window.is_empty() {
            out.push(join(&window, sep));
            // Keep a tail of at most `overlap` chars that still leaves room for `piece`.
            while !window.is_empty() {
                let len = joined_len(&window, sep_len);
                if len <= overlap && len + sep_len + piece_len <= size {
                    break;
                }
                window.pop_front();
            }
        }

        window.push_back(piece);
    }

    if !window.is_empty() {
        out.push(join(&window, sep));
    }

    out
}

fn char_windows(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = (size - overlap).max(1);
    let mut out = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bounded(pieces: &[String], size: usize) {
        for p in pieces {
            assert!(char_len(p) <= size, "piece of {} chars exceeds {}: {:?}", char_len(p), size, p);
        }
    }

    #[test]
    fn test_short_text_is_single_piece() {
        let pieces = split_recursive("Hello world.", &DEFAULT_PRIORITY, 100, 10);
        assert_eq!(pieces, vec!["Hello world.".to_string()]);
    }

    #[test]
    fn test_empty_text() {
        assert!(split_recursive("   \n\n  ", &DEFAULT_PRIORITY, 100, 10).is_empty());
    }

    #[test]
    fn test_paragraphs_merge_up_to_size() {
        let text = "aaaa aaaa\n\nbbbb bbbb\n\ncccc cccc\n\ndddd dddd";
        let pieces = split_recursive(text, &DEFAULT_PRIORITY, 15, 0);
        assert_eq!(pieces.len(), 4);
        assert_bounded(&pieces, 15);

        let pieces = split_recursive(text, &DEFAULT_PRIORITY, 20, 0);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0], "aaaa aaaa\n\nbbbb bbbb");
        assert_bounded(&pieces, 20);
    }

    #[test]
    fn test_overlap_carries_tail() {
        let text = "one two three four five six seven eight nine ten";
        let pieces = split_recursive(text, &[Delimiter::Whitespace], 15, 6);
        assert!(pieces.len() > 1);
        assert_bounded(&pieces, 15);
        let last_word_of_first = pieces[0].split_whitespace().last().unwrap();
        assert!(pieces[1].starts_with(last_word_of_first));
    }

    #[test]
    fn test_single_long_sentence_kept_whole() {
        let sentence = format!("{}.", "word ".repeat(60).trim());
        let text = format!("Short intro.\n\n{sentence}");
        let pieces = split_recursive(&text, &DEFAULT_PRIORITY, 100, 10);
        assert!(pieces.contains(&sentence));
        for p in &pieces {
            if p != &sentence {
                assert!(char_len(p) <= 100);
            }
        }
    }

    #[test]
    fn test_unterminated_run_splits_on_whitespace() {
        let text = "word ".repeat(60);
        let pieces = split_recursive(&text, &DEFAULT_PRIORITY, 50, 0);
        assert!(pieces.len() > 1);
        assert_bounded(&pieces, 50);
    }

    #[test]
    fn test_character_fallback_on_unbroken_text() {
        let text = "x".repeat(250);
        let pieces = split_recursive(&text, &DEFAULT_PRIORITY, 100, 20);
        assert_bounded(&pieces, 100);
        assert_eq!(pieces.len(), 3);
    }

    #[test]
    fn test_multibyte_lengths_in_chars() {
        let text = "Поступление начинается первого июля. ".repeat(10);
        let pieces = split_recursive(&text, &DEFAULT_PRIORITY, 80, 0);
        assert_bounded(&pieces, 80);
        assert!(pieces.iter().all(|p| p.ends_with('.')));
    }

    #[test]
    fn test_split_sentences() {
        let s = split_sentences("First one. Second? Third! 3.14 stays");
        assert_eq!(s, vec!["First one.", "Second?", "Third!", "3.14 stays"]);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma.\n\nDelta epsilon.\nZeta eta theta iota kappa.";
        let a = split_recursive(text, &DEFAULT_PRIORITY, 20, 5);
        let b = split_recursive(text, &DEFAULT_PRIORITY, 20, 5);
        assert_eq!(a, b);
    }
}
