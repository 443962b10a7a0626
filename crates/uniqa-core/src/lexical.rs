//! Lexical scoring primitives shared by the lexical index backends.
//!
//! - [`tokenize`] lowercases, drops stopwords and applies a light
//!   per-language stemmer (Uzbek is left unstemmed, like a `simple` text
//!   search configuration).
//! - [`text_rank`] is a length-normalised term-frequency rank in the same
//!   order of magnitude as Postgres `ts_rank` (a full match of a short
//!   question scores around `0.1`-`0.2`).
//! - [`trigram_similarity`] follows `pg_trgm`: words are padded with two
//!   leading and one trailing space, and similarity is the Jaccard index of
//!   the trigram sets.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::intent::normalize;
use crate::models::Language;

const RANK_SCALE: f64 = 0.1;

const STOPWORDS_UZ: &[&str] = &[
    "va", "bilan", "uchun", "haqida", "nima", "qanday", "qancha", "bormi", "qachon", "qayerda",
    "mi", "bu", "u", "ham", "da", "dan", "ga", "ni", "kerak", "yoki", "men", "biz",
];
const STOPWORDS_EN: &[&str] = &[
    "the", "a", "an", "is", "are", "of", "to", "in", "on", "for", "and", "or", "what", "when",
    "how", "does", "do", "where", "which", "who", "i", "can", "my", "it", "be", "there", "at",
];
const STOPWORDS_RU: &[&str] = &[
    "и", "в", "на", "о", "об", "с", "по", "для", "как", "что", "где", "когда", "ли", "это", "у",
    "а", "я", "мне", "есть", "к",
];

const RU_SUFFIXES: &[&str] = &[
    "иями", "ями", "ами", "ого", "его", "ому", "ему", "ыми", "ими", "ия", "ие", "ий", "ый", "ой",
    "ая", "яя", "ое", "ее", "ые", "ов", "ев", "ах", "ях", "ом", "ем", "ам", "ям", "а", "я", "ы",
    "и", "е", "о", "у", "ю", "ь",
];
const EN_SUFFIXES: &[&str] = &["ations", "ation", "ings", "ing", "ies", "ed", "es", "ly", "s"];

/// Per-field weights combining rank and trigram components.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalWeights {
    pub question_rank: f64,
    pub answer_rank: f64,
    pub question_trigram: f64,
    pub answer_trigram: f64,
}

impl Default for LexicalWeights {
    fn default() -> Self {
        Self {
            question_rank: 2.0,
            answer_rank: 0.5,
            question_trigram: 3.0,
            answer_trigram: 1.0,
        }
    }
}

/// Raw per-field match signals for one indexed item.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LexicalComponents {
    pub question_rank: f64,
    pub answer_rank: f64,
    pub question_trigram: f64,
    pub answer_trigram: f64,
}

impl LexicalComponents {
    /// Weighted sum. Not clamped.
    pub fn score(&self, w: &LexicalWeights) -> f64 {
        w.question_rank * self.question_rank
            + w.answer_rank * self.answer_rank
            + w.question_trigram * self.question_trigram
            + w.answer_trigram * self.answer_trigram
    }

    /// Compute all four components in Rust.
    ///
    /// `question` may hold several newline-separated variants; trigram
    /// similarity takes the best of them.
    pub fn compute(query: &str, question: &str, answer: &str, language: Language) -> Self {
        let q_terms = tokenize(query, language);
        let question_trigram = question
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| trigram_similarity(query, l))
            .fold(0.0, f64::max);
        Self {
            question_rank: text_rank(&q_terms, &tokenize(question, language)),
            answer_rank: text_rank(&q_terms, &tokenize(answer, language)),
            question_trigram,
            answer_trigram: trigram_similarity(query, answer),
        }
    }
}

fn stopwords(language: Language) -> &'static [&'static str] {
    match language {
        Language::Uz => STOPWORDS_UZ,
        Language::En => STOPWORDS_EN,
        Language::Ru => STOPWORDS_RU,
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\'').to_string())
        .filter(|w| !w.is_empty())
}

/// Lowercased, stopword-free, stemmed terms.
pub fn tokenize(text: &str, language: Language) -> Vec<String> {
    let normalized = normalize(text);
    let stop = stopwords(language);
    words(&normalized)
        .filter(|w| !stop.contains(&w.as_str()))
        .map(|w| stem(&w, language))
        .collect()
}

/// Strip one common inflectional suffix, keeping at least three characters.
pub fn stem(word: &str, language: Language) -> String {
    let suffixes = match language {
        Language::Ru => RU_SUFFIXES,
        Language::En => EN_SUFFIXES,
        Language::Uz => return word.to_string(),
    };
    let len = word.chars().count();
    for suffix in suffixes {
        let slen = suffix.chars().count();
        if len >= slen + 3 && word.ends_with(suffix) {
            return word[..word.len() - suffix.len()].to_string();
        }
    }
    word.to_string()
}

/// Term-frequency rank of `doc_terms` against `query_terms`.
pub fn text_rank(query_terms: &[String], doc_terms: &[String]) -> f64 {
    if query_terms.is_empty() || doc_terms.is_empty() {
        return 0.0;
    }
    let mut tf: HashMap<&str, usize> = HashMap::new();
    for t in doc_terms {
        *tf.entry(t.as_str()).or_default() += 1;
    }
    let distinct: HashSet<&str> = query_terms.iter().map(String::as_str).collect();
    let raw: f64 = distinct
        .iter()
        .filter_map(|t| tf.get(t))
        .map(|&n| 1.0 + (n as f64).ln())
        .sum();
    let norm = 1.0 + (doc_terms.len() as f64).ln();
    RANK_SCALE * raw / norm
}

/// `pg_trgm`-style trigram set.
pub fn trigrams(text: &str) -> HashSet<String> {
    let mut out = HashSet::new();
    for word in words(&normalize(text)) {
        let padded: Vec<char> = format!("  {word} ").chars().collect();
        for w in padded.windows(3) {
            out.insert(w.iter().collect());
        }
    }
    out
}

/// Jaccard similarity of trigram sets, in `[0, 1]`.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    inter / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigram_identical() {
        assert!((trigram_similarity("admission", "Admission") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_trigram_partial() {
        let s = trigram_similarity("yotoqxona bormi", "yotoqxona mavjudmi");
        assert!(s > 0.3 && s < 1.0, "similarity {s}");
        assert_eq!(trigram_similarity("abc", ""), 0.0);
    }

    #[test]
    fn test_tokenize_drops_stopwords() {
        let t = tokenize("When does the admission start?", Language::En);
        assert_eq!(t, vec!["admission", "start"]);
    }

    #[test]
    fn test_tokenize_keeps_uzbek_apostrophe() {
        let t = tokenize("Kontrakt to‘lovi qancha?", Language::Uz);
        assert_eq!(t, vec!["kontrakt", "to'lovi"]);
    }

    #[test]
    fn test_stem_russian() {
        assert_eq!(stem("общежития", Language::Ru), "общежит");
        assert_eq!(stem("общежитие", Language::Ru), "общежит");
        assert_eq!(stem("да", Language::Ru), "да");
    }

    #[test]
    fn test_rank_zero_without_overlap() {
        let q = tokenize("tuition fee", Language::En);
        let d = tokenize("dormitory rooms", Language::En);
        assert_eq!(text_rank(&q, &d), 0.0);
    }

    #[test]
    fn test_rank_full_match_positive() {
        let q = tokenize("admission start", Language::En);
        let d = tokenize("When does admission start?", Language::En);
        assert!(text_rank(&q, &d) > 0.0);
    }

    #[test]
    fn test_exact_question_scores_high() {
        let c = LexicalComponents::compute(
            "When does admission start?",
            "When does admission start?",
            "Admission starts July 1st",
            Language::En,
        );
        assert!((c.question_trigram - 1.0).abs() < 1e-9);
        assert!(c.score(&LexicalWeights::default()) >= 3.0);
    }
}
