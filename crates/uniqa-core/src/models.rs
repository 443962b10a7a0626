//! Core data models shared by every stage of the retrieval pipeline.
//!
//! Persistent entities ([`Document`], [`Segment`], [`CuratedAnswer`],
//! [`Category`], [`DynamicFact`]) are owned by external stores and handed to
//! the core by value. Transient values ([`RetrievalCandidate`],
//! [`RetrievalBundle`], [`GradeResult`]) live for a single request.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Supported content languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Uz,
    Ru,
    En,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::Uz, Language::Ru, Language::En];

    /// ISO 639-1 code.
    pub fn code(&self) -> &'static str {
        match self {
            Language::Uz => "uz",
            Language::Ru => "ru",
            Language::En => "en",
        }
    }

    /// Parse an ISO code, defaulting to Uzbek for anything unrecognised.
    pub fn from_code(code: &str) -> Language {
        match code.trim().to_lowercase().as_str() {
            "ru" | "rus" | "russian" => Language::Ru,
            "en" | "eng" | "english" => Language::En,
            _ => Language::Uz,
        }
    }

    /// Name of the lexical rank configuration used for this language.
    ///
    /// Uzbek has no stemmer, so it ranks with the plain `simple` configuration.
    pub fn rank_config(&self) -> &'static str {
        match self {
            Language::Uz => "simple",
            Language::Ru => "russian",
            Language::En => "english",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Processing lifecycle of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<DocumentStatus> {
        match s {
            "uploaded" => Some(DocumentStatus::Uploaded),
            "processing" => Some(DocumentStatus::Processing),
            "ready" => Some(DocumentStatus::Ready),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

/// An uploaded free-text document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub language: Language,
    pub status: DocumentStatus,
    pub version: u32,
    /// Raw extracted text, before cleaning.
    pub body: String,
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>, language: Language, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            language,
            status: DocumentStatus::Uploaded,
            version: 0,
            body: body.into(),
        }
    }
}

/// Column headers plus one map per data row, keyed by header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStructure {
    pub headers: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
}

/// A retrieval-unit chunk of a document.
///
/// Segments are immutable; reprocessing a document replaces all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Deterministic UUID derived from the document id and ordinal.
    pub id: String,
    pub document_id: String,
    /// Position within the document, contiguous from 0.
    pub ordinal: usize,
    pub text: String,
    pub section_title: String,
    pub document_title: String,
    pub language: Language,
    pub table: Option<TableStructure>,
    /// Point id in the vector index (`doc_<id>_chunk_<n>`).
    pub vector_ref: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// One language rendition of a curated answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CuratedTranslation {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub variants: Vec<String>,
}

/// A maintained question/answer pair. Authoritative over raw documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedAnswer {
    pub id: String,
    pub category: Option<String>,
    pub translations: BTreeMap<Language, CuratedTranslation>,
    /// Whether the answer reflects the current academic year.
    #[serde(default = "default_true")]
    pub is_current: bool,
    #[serde(default)]
    pub year: Option<String>,
    /// Keys of dynamic facts referenced as `{{key}}` inside the answer text.
    #[serde(default)]
    pub fact_refs: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl CuratedAnswer {
    pub fn translation(&self, language: Language) -> Option<&CuratedTranslation> {
        self.translations.get(&language)
    }

    /// Question text plus all variants, newline separated.
    pub fn question_field(&self, language: Language) -> Option<String> {
        self.translation(language).map(|t| {
            let mut out = t.question.clone();
            for v in &t.variants {
                out.push('\n');
                out.push_str(v);
            }
            out
        })
    }
}

/// A topic with its intent keywords.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub keywords: Vec<String>,
}

impl Category {
    pub fn new(name: &str, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// A small fast-changing fact such as a phone number or a price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicFact {
    pub key: String,
    pub values: BTreeMap<Language, String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl DynamicFact {
    /// Value for `language`, falling back to Uzbek then any value.
    pub fn value(&self, language: Language) -> Option<&str> {
        self.values
            .get(&language)
            .or_else(|| self.values.get(&Language::Uz))
            .or_else(|| self.values.values().next())
            .map(|s| s.as_str())
    }
}

/// Where a retrieval candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Curated,
    Raw,
}

impl SourceType {
    /// Lower sorts first.
    pub fn priority(&self) -> u8 {
        match self {
            SourceType::Curated => 0,
            SourceType::Raw => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Curated => "curated",
            SourceType::Raw => "raw",
        }
    }
}

/// A ranked piece of evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub text: String,
    pub title: String,
    pub category: Option<String>,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub source_type: SourceType,
    /// Curated answer id or segment id.
    pub origin_id: String,
    /// Section title for raw segments.
    #[serde(default)]
    pub section: Option<String>,
}

/// Result of one `retrieve` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalBundle {
    pub context: String,
    pub sources: Vec<RetrievalCandidate>,
    pub top_confidence: f64,
}

impl RetrievalBundle {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Verdict of the relevance grader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeResult {
    pub is_relevant: bool,
    pub confidence: f64,
    pub reason: String,
    pub suggested_refined_query: Option<String>,
}

/// Clamp a score to `[0, 1]`, mapping NaN to 0.
pub fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Length in Unicode scalar values.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_codes() {
        assert_eq!(Language::from_code("EN"), Language::En);
        assert_eq!(Language::from_code("ru"), Language::Ru);
        assert_eq!(Language::from_code("xx"), Language::Uz);
        assert_eq!(Language::Ru.rank_config(), "russian");
        assert_eq!(Language::Uz.rank_config(), "simple");
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert!((clamp_unit(0.42) - 0.42).abs() < 1e-12);
    }

    #[test]
    fn test_fact_value_fallback() {
        let mut values = BTreeMap::new();
        values.insert(Language::Uz, "+998 71 000 00 00".to_string());
        let fact = DynamicFact {
            key: "phone".into(),
            values,
            is_active: true,
        };
        assert_eq!(fact.value(Language::En), Some("+998 71 000 00 00"));
    }

    #[test]
    fn test_question_field_includes_variants() {
        let mut translations = BTreeMap::new();
        translations.insert(
            Language::En,
            CuratedTranslation {
                question: "When does admission start?".into(),
                answer: "July 1st".into(),
                variants: vec!["Admission start date".into()],
            },
        );
        let ca = CuratedAnswer {
            id: "1".into(),
            category: None,
            translations,
            is_current: true,
            year: None,
            fact_refs: vec![],
        };
        let field = ca.question_field(Language::En).unwrap();
        assert!(field.contains("Admission start date"));
        assert!(ca.question_field(Language::Ru).is_none());
    }
}
