//! Relevance grading of a retrieved context against the query.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::intent::{normalize, SharedClassifier};
use crate::models::{char_len, clamp_unit, GradeResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraderParams {
    /// Contexts shorter than this (trimmed, in characters) are never relevant.
    pub min_context_chars: usize,
    pub max_terms: usize,
    /// Terms must be longer than this many characters.
    pub min_term_chars: usize,
    pub stopwords: Vec<String>,
    pub entity_weight: f64,
    pub intent_weight: f64,
    pub relevance_threshold: f64,
    /// Category name to the qualifier appended when refining a query.
    pub qualifiers: BTreeMap<String, String>,
    pub generic_qualifier: String,
}

impl Default for GraderParams {
    fn default() -> Self {
        let stopwords = [
            "haqida", "nima", "qanday", "qancha", "bormi", "yo'q", "bor", "kerak", "mumkin",
            "о", "в", "на", "и", "the", "is", "are", "what", "when", "does", "where", "which",
            "about", "have", "there", "какой", "какая", "когда", "где", "есть",
        ];
        let qualifiers = [
            ("Kontrakt", "(2025-2026 o'quv yili uchun)"),
            ("Talaba hayoti", "(bakalavr talabalari uchun)"),
            ("Fakultetlar", "(fakultetlar ro'yxati)"),
        ];
        Self {
            min_context_chars: 50,
            max_terms: 5,
            min_term_chars: 3,
            stopwords: stopwords.iter().map(|s| s.to_string()).collect(),
            entity_weight: 0.6,
            intent_weight: 0.4,
            relevance_threshold: 0.3,
            qualifiers: qualifiers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            generic_qualifier: "(batafsil ma'lumot)".to_string(),
        }
    }
}

/// Scores how well a context covers the query's salient terms and the
/// detected intent's keyword list.
#[derive(Clone)]
pub struct RelevanceGrader {
    classifier: SharedClassifier,
    params: GraderParams,
}

impl RelevanceGrader {
    pub fn new(classifier: SharedClassifier, params: GraderParams) -> Self {
        Self { classifier, params }
    }

    pub fn params(&self) -> &GraderParams {
        &self.params
    }

    pub fn grade(&self, query: &str, context: &str, intent: Option<&str>) -> GradeResult {
        let p = &self.params;
        if char_len(context.trim()) < p.min_context_chars {
            return GradeResult {
                is_relevant: false,
                confidence: 0.0,
                reason: "context is empty or too short".to_string(),
                suggested_refined_query: Some(self.refine(query, intent)),
            };
        }

        let context_norm = normalize(context);
        let terms = self.salient_terms(query);
        let matched = terms.iter().filter(|t| context_norm.contains(t.as_str())).count();
        let entity_coverage = matched as f64 / terms.len().max(1) as f64;

        let intent_score = match intent {
            Some(intent) => {
                let keywords = self.classifier.keywords(intent);
                if keywords.is_empty() {
                    0.0
                } else {
                    let hits = keywords
                        .iter()
                        .filter(|k| context_norm.contains(normalize(k).as_str()))
                        .count();
                    hits as f64 / keywords.len() as f64
                }
            }
            None => 0.0,
        };

        let confidence = clamp_unit(p.entity_weight * entity_coverage + p.intent_weight * intent_score);
        let is_relevant = confidence >= p.relevance_threshold;

        if is_relevant {
            GradeResult {
                is_relevant,
                confidence,
                reason: format!("context matches the question ({:.0}% confidence)", confidence * 100.0),
                suggested_refined_query: None,
            }
        } else {
            let shown: Vec<&str> = terms.iter().take(3).map(String::as_str).collect();
            GradeResult {
                is_relevant,
                confidence,
                reason: format!("key terms ({}) not found in context", shown.join(", ")),
                suggested_refined_query: Some(self.refine(query, intent)),
            }
        }
    }

    /// Up to `max_terms` lowercased words longer than `min_term_chars`,
    /// stopwords removed, in query order.
    pub fn salient_terms(&self, query: &str) -> Vec<String> {
        let p = &self.params;
        normalize(query)
            .split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .map(|w| w.trim_matches('\''))
            .filter(|w| char_len(w) > p.min_term_chars)
            .filter(|w| !p.stopwords.iter().any(|s| s == w))
            .map(str::to_string)
            .take(p.max_terms)
            .collect()
    }

    /// Append the intent's qualifier. A query already carrying it is
    /// returned unchanged, which ends refinement.
    pub fn refine(&self, query: &str, intent: Option<&str>) -> String {
        let qualifier = intent
            .and_then(|i| self.params.qualifiers.get(i))
            .unwrap_or(&self.params.generic_qualifier);
        if query.contains(qualifier.as_str()) {
            query.to_string()
        } else {
            format!("{} {}", query.trim_end(), qualifier)
        }
    }
}
