//! Hybrid retriever over the [`DualIndex`].
//!
//! # Algorithm
//!
//! 1. Detect the intent category (or take the caller's category filter).
//! 2. Lexical search: weighted rank/trigram score, floor at `lexical_floor`,
//!    power boost when a core keyword group hits both query and question,
//!    currency weighting, capped at `score_cap`. With no hit in the request
//!    language the other languages are searched with a penalty, and as a
//!    last resort curated questions containing the query text are taken at
//!    `substring_fallback_score`.
//! 3. Direct hit: the best curated lexical candidate scoring at least
//!    `direct_hit_threshold` whose category matches the intent (or with no
//!    intent) is returned alone.
//! 4. Vector search filtered by language, retried unfiltered when empty.
//! 5. Merge with source-type and intent multipliers; dedup by origin,
//!    preferring lexical curated entries.
//! 6. Drop candidates below `min_confidence`, sort by confidence then
//!    source priority.
//! 7. Truncate to `top_k`, reserving one raw slot when raw candidates exist
//!    and `top_k >= 2`.
//! 8. Build a provenance-tagged context string.
//!
//! A failing backend degrades to the other one with a warning. Only when
//! both fail is an error returned.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::index::{DualIndex, IndexEntry, LexicalHit, VectorHit};
use crate::intent::{normalize, SharedClassifier};
use crate::lexical::LexicalWeights;
use crate::models::{clamp_unit, Language, RetrievalBundle, RetrievalCandidate, SourceType};

/// Every retrieval threshold and multiplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalParams {
    pub weights: LexicalWeights,
    /// Lexical scores below this are discarded.
    pub lexical_floor: f64,
    pub power_boost: f64,
    /// Keyword groups; a group hitting both query and question triggers the power boost.
    pub power_keyword_groups: Vec<Vec<String>>,
    pub current_boost: f64,
    pub stale_penalty: f64,
    pub score_cap: f64,
    pub direct_hit_threshold: f64,
    pub cross_language_penalty: f64,
    pub curated_boost: f64,
    pub curated_intent_match: f64,
    pub curated_intent_mismatch: f64,
    pub raw_intent_match: f64,
    pub raw_intent_mismatch: f64,
    /// Merged candidates below this are dropped.
    pub min_confidence: f64,
    /// Score of curated entries found only by question substring; 0 disables.
    pub substring_fallback_score: f64,
    /// Backends are asked for `top_k * candidate_multiplier` hits.
    pub candidate_multiplier: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        let groups: &[&[&str]] = &[
            &["rektor", "rector", "ректор"],
            &["fakultet", "faculty", "факультет"],
            &["qabul", "admission", "поступлени", "приём", "прием"],
            &["aloqa", "bog'lanish", "contact", "telefon", "контакт", "телефон"],
            &["tarix", "history", "истори"],
        ];
        Self {
            weights: LexicalWeights::default(),
            lexical_floor: 0.1,
            power_boost: 2.5,
            power_keyword_groups: groups
                .iter()
                .map(|g| g.iter().map(|s| s.to_string()).collect())
                .collect(),
            current_boost: 1.2,
            stale_penalty: 0.8,
            score_cap: 0.99,
            direct_hit_threshold: 0.5,
            cross_language_penalty: 0.8,
            curated_boost: 1.1,
            curated_intent_match: 1.3,
            curated_intent_mismatch: 0.3,
            raw_intent_match: 1.4,
            raw_intent_mismatch: 0.3,
            min_confidence: 0.15,
            substring_fallback_score: 0.15,
            candidate_multiplier: 2,
        }
    }
}

/// A lexical hit after scoring.
#[derive(Debug, Clone)]
struct ScoredLexical {
    entry: IndexEntry,
    score: f64,
}

/// Queries both indexes and reranks.
#[derive(Clone)]
pub struct HybridRetriever {
    index: DualIndex,
    classifier: SharedClassifier,
    params: RetrievalParams,
}

impl HybridRetriever {
    pub fn new(index: DualIndex, classifier: SharedClassifier, params: RetrievalParams) -> Self {
        Self {
            index,
            classifier,
            params,
        }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    pub fn classifier(&self) -> &SharedClassifier {
        &self.classifier
    }

    pub fn index(&self) -> &DualIndex {
        &self.index
    }

    /// Retrieve up to `top_k` ranked sources for `query`.
    pub async fn retrieve(
        &self,
        query: &str,
        language: Language,
        top_k: usize,
        category_filter: Option<&str>,
    ) -> Result<RetrievalBundle> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(RetrievalBundle::default());
        }

        let intent = category_filter
            .map(str::to_string)
            .or_else(|| self.classifier.classify(query));
        let limit = top_k * self.params.candidate_multiplier.max(1);

        let (lexical, lexical_err) = match self.lexical_candidates(query, language, limit).await {
            Ok(hits) => (hits, None),
            Err(e) => {
                tracing::warn!("lexical index unavailable, continuing with vector search: {e}");
                (Vec::new(), Some(e))
            }
        };

        if let Some(hit) = self.direct_hit(&lexical, intent.as_deref()) {
            tracing::debug!(origin = %hit.origin_id, confidence = hit.confidence, "direct curated hit");
            return Ok(build_bundle(vec![hit]));
        }

        let (vector, vector_err) = if self.index.embedder().is_some() {
            match self.vector_candidates(query, language, limit).await {
                Ok(hits) => (hits, None),
                Err(e) => {
                    tracing::warn!("vector index unavailable, continuing with lexical search: {e}");
                    (Vec::new(), Some(e))
                }
            }
        } else {
            (Vec::new(), None)
        };

        if let (Some(le), Some(ve)) = (&lexical_err, &vector_err) {
            return Err(RagError::IndexUnavailable {
                backend: "lexical and vector",
                reason: format!("{le}; {ve}"),
            });
        }

        let merged = self.merge(lexical, vector, intent.as_deref());
        let selected = select_diverse(merged, top_k);

        tracing::debug!(
            query,
            intent = intent.as_deref().unwrap_or("-"),
            sources = selected.len(),
            "retrieved"
        );
        Ok(build_bundle(selected))
    }

    async fn lexical_candidates(&self, query: &str, language: Language, limit: usize) -> Result<Vec<ScoredLexical>> {
        let hits = self.index.lexical().search(query, language, limit).await?;
        let mut scored = self.score_lexical(query, hits, 1.0);

        if scored.is_empty() {
            for other in Language::ALL.into_iter().filter(|l| *l != language) {
                let hits = self.index.lexical().search(query, other, limit).await?;
                scored.extend(self.score_lexical(query, hits, self.params.cross_language_penalty));
            }
        }

        if scored.is_empty() && self.params.substring_fallback_score > 0.0 {
            let score = clamp_unit(self.params.substring_fallback_score);
            scored = self
                .index
                .lexical()
                .curated_containing(query, limit)
                .await?
                .into_iter()
                .map(|entry| ScoredLexical { entry, score })
                .collect();
            if !scored.is_empty() {
                tracing::debug!(query, hits = scored.len(), "substring fallback");
            }
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    fn score_lexical(&self, query: &str, hits: Vec<LexicalHit>, penalty: f64) -> Vec<ScoredLexical> {
        let p = &self.params;
        let query_norm = normalize(query);
        hits.into_iter()
            .filter_map(|hit| {
                let base = hit.components.score(&p.weights);
                if base < p.lexical_floor {
                    return None;
                }
                let mut score = base;
                if self.power_match(&query_norm, &normalize(&hit.entry.question)) {
                    score *= p.power_boost;
                }
                score *= if hit.entry.is_current {
                    p.current_boost
                } else {
                    p.stale_penalty
                };
                score = score.min(p.score_cap) * penalty;
                Some(ScoredLexical {
                    entry: hit.entry,
                    score: clamp_unit(score),
                })
            })
            .collect()
    }

    fn power_match(&self, query: &str, question: &str) -> bool {
        self.params.power_keyword_groups.iter().any(|group| {
            group.iter().any(|k| query.contains(k.as_str())) && group.iter().any(|k| question.contains(k.as_str()))
        })
    }

    fn direct_hit(&self, lexical: &[ScoredLexical], intent: Option<&str>) -> Option<RetrievalCandidate> {
        let best = lexical
            .iter()
            .find(|l| l.entry.source_type == SourceType::Curated)?;
        if best.score < self.params.direct_hit_threshold {
            return None;
        }
        let category_ok = match intent {
            None => true,
            Some(intent) => best
                .entry
                .category
                .as_deref()
                .map(|c| same_category(c, intent))
                .unwrap_or(false),
        };
        category_ok.then(|| candidate(&best.entry, best.score))
    }

    async fn vector_candidates(&self, query: &str, language: Language, limit: usize) -> Result<Vec<VectorHit>> {
        let hits = self.index.vector_search(query, limit, Some(language)).await?;
        if !hits.is_empty() {
            return Ok(hits);
        }
        self.index.vector_search(query, limit, None).await
    }

    /// Category of an entry; raw segments are classified from their text.
    fn entry_category(&self, entry: &IndexEntry) -> Option<String> {
        entry.category.clone().or_else(|| match entry.source_type {
            SourceType::Raw => self
                .classifier
                .classify(&format!("{}\n{}", entry.question, entry.answer)),
            SourceType::Curated => None,
        })
    }

    fn intent_factor(&self, category: Option<&str>, intent: Option<&str>, source: SourceType) -> f64 {
        let (hit, miss) = match source {
            SourceType::Curated => (self.params.curated_intent_match, self.params.curated_intent_mismatch),
            SourceType::Raw => (self.params.raw_intent_match, self.params.raw_intent_mismatch),
        };
        match (intent, category) {
            (Some(intent), Some(category)) if same_category(category, intent) => hit,
            (Some(_), Some(_)) => miss,
            _ => 1.0,
        }
    }

    fn merge(&self, lexical: Vec<ScoredLexical>, vector: Vec<VectorHit>, intent: Option<&str>) -> Vec<RetrievalCandidate> {
        let p = &self.params;
        let mut by_origin: HashMap<(SourceType, String), RetrievalCandidate> = HashMap::new();
        let mut order: Vec<(SourceType, String)> = Vec::new();

        let mut offer = |c: RetrievalCandidate, replace: bool| {
            let key = (c.source_type, c.origin_id.clone());
            match by_origin.get_mut(&key) {
                Some(existing) => {
                    if replace && c.confidence > existing.confidence {
                        *existing = c;
                    }
                }
                None => {
                    order.push(key.clone());
                    by_origin.insert(key, c);
                }
            }
        };

        for l in &lexical {
            let category = self.entry_category(&l.entry);
            let factor = self.intent_factor(category.as_deref(), intent, l.entry.source_type);
            let confidence = match l.entry.source_type {
                SourceType::Curated => l.score * p.curated_boost * factor,
                SourceType::Raw => l.score * factor,
            };
            let mut c = candidate(&l.entry, confidence.min(p.score_cap));
            c.category = category;
            offer(c, true);
        }

        for v in &vector {
            let similarity = (1.0 - v.distance).max(0.0);
            let currency = if v.payload.is_current {
                p.current_boost
            } else {
                p.stale_penalty
            };
            let similarity = similarity * currency;
            let category = self.entry_category(&v.payload);
            let factor = self.intent_factor(category.as_deref(), intent, v.payload.source_type);
            let confidence = match v.payload.source_type {
                SourceType::Curated => similarity * p.curated_boost * factor,
                SourceType::Raw => similarity * factor,
            };
            let mut c = candidate(&v.payload, confidence.min(p.score_cap));
            c.category = category;
            // Lexical entries win for curated answers; raw keeps the stronger signal.
            offer(c, v.payload.source_type == SourceType::Raw);
        }

        let mut merged: Vec<RetrievalCandidate> = order
            .into_iter()
            .filter_map(|k| by_origin.remove(&k))
            .filter(|c| c.confidence >= p.min_confidence)
            .collect();

        merged.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.source_type.priority().cmp(&b.source_type.priority()))
        });
        merged
    }
}

fn same_category(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim()) || a.trim().to_lowercase() == b.trim().to_lowercase()
}

fn candidate(entry: &IndexEntry, confidence: f64) -> RetrievalCandidate {
    RetrievalCandidate {
        text: entry.answer.clone(),
        title: entry.title.clone(),
        category: entry.category.clone(),
        confidence: clamp_unit(confidence),
        source_type: entry.source_type,
        origin_id: entry.item_id.clone(),
        section: entry.section.clone(),
    }
}

/// Take the best `top_k`, swapping the last slot for the best raw candidate
/// when only curated answers made the cut.
fn select_diverse(sorted: Vec<RetrievalCandidate>, top_k: usize) -> Vec<RetrievalCandidate> {
    if sorted.len() <= top_k {
        return sorted;
    }
    let (head, tail) = sorted.split_at(top_k);
    let mut selected = head.to_vec();
    if top_k >= 2 && !selected.iter().any(|c| c.source_type == SourceType::Raw) {
        if let Some(raw) = tail.iter().find(|c| c.source_type == SourceType::Raw) {
            selected.pop();
            selected.push(raw.clone());
        }
    }
    selected
}

/// Provenance-tagged context block for one source.
pub fn format_source(c: &RetrievalCandidate) -> String {
    let tag = match c.source_type {
        SourceType::Curated => format!("FAQ #{}", c.origin_id),
        SourceType::Raw => match &c.section {
            Some(section) if section != &c.title => format!("Hujjat: {} / {}", c.title, section),
            _ => format!("Hujjat: {}", c.title),
        },
    };
    format!("MANBA: {tag}\nMATN: {}", c.text)
}

pub const CONTEXT_SEPARATOR: &str = "\n---\n";

fn build_bundle(sources: Vec<RetrievalCandidate>) -> RetrievalBundle {
    let context = sources
        .iter()
        .map(format_source)
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);
    let top_confidence = sources.first().map(|c| c.confidence).unwrap_or(0.0);
    RetrievalBundle {
        context,
        sources,
        top_confidence,
    }
}
