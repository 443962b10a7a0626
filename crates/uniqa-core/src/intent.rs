//! Pluggable intent and polarity strategies.
//!
//! Retrieval, grading, grounding and hierarchy resolution only see the
//! [`IntentClassifier`] and [`PolarityDetector`] traits. The keyword
//! implementations here can be swapped for a learned classifier without
//! touching any control flow.

use std::ops::Range;
use std::sync::Arc;

use regex::Regex;

use crate::error::{RagError, Result};
use crate::models::Category;

/// Maps text to a category name.
pub trait IntentClassifier: Send + Sync {
    /// Detected category name, or `None` when nothing matches.
    fn classify(&self, text: &str) -> Option<String>;

    /// Keyword list of a category, used for boosting and grading.
    fn keywords(&self, category: &str) -> Vec<String>;
}

/// Keyword-containment classifier over a category registry.
///
/// The category with the most keyword hits wins. Ties go to the category
/// registered first.
#[derive(Debug, Clone)]
pub struct KeywordIntentClassifier {
    categories: Vec<Category>,
}

impl KeywordIntentClassifier {
    pub fn new(categories: Vec<Category>) -> Self {
        let categories = categories
            .into_iter()
            .map(|c| Category {
                name: c.name,
                keywords: c.keywords.iter().map(|k| normalize(k)).collect(),
            })
            .collect();
        Self { categories }
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }
}

impl Default for KeywordIntentClassifier {
    fn default() -> Self {
        Self::new(default_categories())
    }
}

impl IntentClassifier for KeywordIntentClassifier {
    fn classify(&self, text: &str) -> Option<String> {
        let text = normalize(text);
        let mut best: Option<(&Category, usize)> = None;
        for category in &self.categories {
            let hits = category
                .keywords
                .iter()
                .filter(|k| !k.is_empty() && text.contains(k.as_str()))
                .count();
            if hits > 0 && best.map(|(_, b)| hits > b).unwrap_or(true) {
                best = Some((category, hits));
            }
        }
        best.map(|(c, _)| c.name.clone())
    }

    fn keywords(&self, category: &str) -> Vec<String> {
        self.categories
            .iter()
            .find(|c| c.name == category)
            .map(|c| c.keywords.clone())
            .unwrap_or_default()
    }
}

/// Lowercase and fold the apostrophe variants used in Uzbek Latin script.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'ʻ' | 'ʼ' | '‘' | '’' | '`' | '´' => '\'',
            other => other,
        })
        .collect()
}

/// Built-in categories for university Q&A.
pub fn default_categories() -> Vec<Category> {
    vec![
        Category::new(
            "Talaba hayoti",
            &[
                "yotoqxona", "hostel", "dormitory", "turar joy", "student life", "talabalar turar",
                "общежити",
            ],
        ),
        Category::new(
            "Qabul",
            &[
                "qabul", "admission", "hujjat topshirish", "imtihon", "entrance", "поступлени",
                "приём", "прием",
            ],
        ),
        Category::new(
            "Kontrakt",
            &[
                "kontrakt", "to'lov", "payment", "tuition", "fee", "контракт", "оплат", "стоимост",
            ],
        ),
        Category::new(
            "Fakultetlar",
            &["fakultet", "kafedra", "faculty", "department", "факультет", "кафедр"],
        ),
        Category::new(
            "Magistratura",
            &["magistr", "master", "postgraduate", "магистр"],
        ),
    ]
}

/// Whether a text affirms, denies, or is silent on availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Affirmative,
    Negative,
    Mixed,
    Neutral,
}

impl Polarity {
    pub fn affirms(&self) -> bool {
        matches!(self, Polarity::Affirmative | Polarity::Mixed)
    }

    pub fn denies(&self) -> bool {
        matches!(self, Polarity::Negative | Polarity::Mixed)
    }
}

/// True when one side purely affirms and the other denies, or the reverse.
pub fn contradicts(a: Polarity, b: Polarity) -> bool {
    (a == Polarity::Affirmative && b.denies()) || (a == Polarity::Negative && b.affirms())
}

/// Maps text to a [`Polarity`].
pub trait PolarityDetector: Send + Sync {
    fn polarity(&self, text: &str) -> Polarity;
}

/// Whole-word marker lists in Uzbek, Russian and English.
///
/// Negative phrases are matched first and blanked out, so "mavjud emas"
/// never also counts as the affirmative "mavjud".
#[derive(Debug, Clone)]
pub struct KeywordPolarityDetector {
    positive: WordSet,
    negative: WordSet,
}

pub const POSITIVE_MARKERS: &[&str] = &[
    "ha", "bor", "mavjud", "beriladi", "mumkin", "yes", "available", "provided", "да", "есть",
    "имеется", "доступно", "предоставляется",
];

pub const NEGATIVE_MARKERS: &[&str] = &[
    "yo'q", "mavjud emas", "mumkin emas", "ta'qiqlangan", "taqiqlangan", "berilmaydi", "no",
    "not available", "unavailable", "impossible", "prohibited", "not provided", "нет",
    "отсутствует", "невозможно", "запрещено", "недоступно", "не предоставляется",
];

impl KeywordPolarityDetector {
    pub fn new(positive: &[&str], negative: &[&str]) -> Result<Self> {
        Ok(Self {
            positive: WordSet::new(positive, "positive markers")?,
            negative: WordSet::new(negative, "negative markers")?,
        })
    }
}

impl Default for KeywordPolarityDetector {
    fn default() -> Self {
        Self::new(POSITIVE_MARKERS, NEGATIVE_MARKERS).expect("built-in polarity markers are valid")
    }
}

impl PolarityDetector for KeywordPolarityDetector {
    fn polarity(&self, text: &str) -> Polarity {
        let text = normalize(text);
        let denies = self.negative.is_match(&text);
        let rest = self.negative.blank_out(&text);
        let affirms = self.positive.is_match(&rest);
        match (affirms, denies) {
            (true, true) => Polarity::Mixed,
            (true, false) => Polarity::Affirmative,
            (false, true) => Polarity::Negative,
            (false, false) => Polarity::Neutral,
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '\''
}

/// Case-folded whole-word matcher over a phrase list.
///
/// Apostrophes count as word characters, so "ha" never matches inside
/// "ta'ha". Input text is expected to be [`normalize`]d.
#[derive(Debug, Clone)]
pub(crate) struct WordSet {
    re: Option<Regex>,
}

impl WordSet {
    pub(crate) fn new(words: &[&str], what: &str) -> Result<Self> {
        let mut alternatives: Vec<String> = words
            .iter()
            .map(|w| normalize(w.trim()))
            .filter(|w| !w.is_empty())
            .map(|w| regex::escape(&w))
            .collect();
        if alternatives.is_empty() {
            return Ok(Self { re: None });
        }
        // Longest first so multi-word phrases win over their prefixes.
        alternatives.sort_by_key(|w| std::cmp::Reverse(w.len()));
        // Only the leading boundary is consumed; the trailing one is checked
        // in `ranges`, so adjacent phrases separated by one space both match.
        let pattern = format!(r"(?:^|[^\w'])({})", alternatives.join("|"));
        let re = Regex::new(&pattern).map_err(|e| RagError::Config(format!("{what}: {e}")))?;
        Ok(Self { re: Some(re) })
    }

    /// Byte ranges of whole-phrase matches, in order.
    pub(crate) fn ranges(&self, text: &str) -> Vec<Range<usize>> {
        let Some(re) = &self.re else {
            return Vec::new();
        };
        re.captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .filter(|m| !text[m.end()..].chars().next().is_some_and(is_word_char))
            .map(|m| m.range())
            .collect()
    }

    pub(crate) fn find_iter<'t>(&self, text: &'t str) -> impl Iterator<Item = &'t str> {
        self.ranges(text).into_iter().map(move |r| &text[r])
    }

    pub(crate) fn is_match(&self, text: &str) -> bool {
        !self.ranges(text).is_empty()
    }

    /// `text` with every match replaced by a single space.
    pub(crate) fn blank_out(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for r in self.ranges(text) {
            out.push_str(&text[last..r.start]);
            out.push(' ');
            last = r.end;
        }
        out.push_str(&text[last..]);
        out
    }
}

/// Shared handles used by the retrieval components.
pub type SharedClassifier = Arc<dyn IntentClassifier>;
pub type SharedPolarity = Arc<dyn PolarityDetector>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_keyword() {
        let c = KeywordIntentClassifier::default();
        assert_eq!(c.classify("Yotoqxona bormi?").as_deref(), Some("Talaba hayoti"));
        assert_eq!(c.classify("Kontrakt to‘lovi qancha?").as_deref(), Some("Kontrakt"));
        assert_eq!(c.classify("When does admission start?").as_deref(), Some("Qabul"));
        assert_eq!(c.classify("Hello"), None);
    }

    #[test]
    fn test_classify_most_hits_wins() {
        let c = KeywordIntentClassifier::default();
        assert_eq!(
            c.classify("master tuition fee payment").as_deref(),
            Some("Kontrakt")
        );
    }

    #[test]
    fn test_keywords_lookup() {
        let c = KeywordIntentClassifier::default();
        assert!(c.keywords("Qabul").contains(&"admission".to_string()));
        assert!(c.keywords("Unknown").is_empty());
    }

    #[test]
    fn test_polarity() {
        let p = KeywordPolarityDetector::default();
        assert_eq!(p.polarity("Yotoqxona mavjud."), Polarity::Affirmative);
        assert_eq!(p.polarity("Yotoqxona mavjud emas."), Polarity::Negative);
        assert_eq!(p.polarity("Dormitory is not available."), Polarity::Negative);
        assert_eq!(p.polarity("Dormitory is available."), Polarity::Affirmative);
        assert_eq!(p.polarity("Общежития нет."), Polarity::Negative);
        assert_eq!(p.polarity("Classes start in September."), Polarity::Neutral);
    }

    #[test]
    fn test_whole_words_only() {
        let p = KeywordPolarityDetector::default();
        // "ha" inside "hafta" and "no" inside "notes" are not markers.
        assert_eq!(p.polarity("Dars haftada besh kun, notes included"), Polarity::Neutral);
    }

    #[test]
    fn test_word_set_matches_adjacent_phrases() {
        let set = WordSet::new(&["ehtimol", "odatda", "ko'p hollarda"], "hedges").unwrap();
        let found: Vec<&str> = set.find_iter("ehtimol odatda ko'p hollarda").collect();
        assert_eq!(found, vec!["ehtimol", "odatda", "ko'p hollarda"]);
        assert!(set.find_iter("odatdagidek").next().is_none());
        assert_eq!(set.blank_out("ehtimol odatda, yo'q"), "   , yo'q");
    }

    #[test]
    fn test_empty_word_set_matches_nothing() {
        let set = WordSet::new(&[], "none").unwrap();
        assert!(!set.is_match("anything at all"));
        assert_eq!(set.blank_out("same"), "same");
    }

    #[test]
    fn test_contradicts() {
        assert!(contradicts(Polarity::Affirmative, Polarity::Negative));
        assert!(contradicts(Polarity::Negative, Polarity::Mixed));
        assert!(!contradicts(Polarity::Mixed, Polarity::Negative));
        assert!(!contradicts(Polarity::Neutral, Polarity::Negative));
    }
}
