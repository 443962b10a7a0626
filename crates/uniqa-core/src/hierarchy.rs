//! Source hierarchy: curated answers outrank official documents, which
//! outrank other documents. On a polarity contradiction between a curated
//! answer and a document excerpt the curated answer is primary.

use serde::{Deserialize, Serialize};

use crate::intent::{contradicts, normalize, SharedPolarity};
use crate::models::{RetrievalCandidate, SourceType};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyParams {
    /// Title substrings marking official documents.
    pub official_markers: Vec<String>,
}

impl Default for HierarchyParams {
    fn default() -> Self {
        Self {
            official_markers: ["nizom", "charter", "regulation", "устав", "положение"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyResolution {
    pub primary_source: Option<RetrievalCandidate>,
    pub conflict_detected: bool,
    pub reason: String,
    /// Sources in presentation order.
    pub ordered: Vec<RetrievalCandidate>,
}

pub struct SourceHierarchy {
    polarity: SharedPolarity,
    params: HierarchyParams,
}

impl SourceHierarchy {
    pub fn new(polarity: SharedPolarity, params: HierarchyParams) -> Self {
        Self { polarity, params }
    }

    /// 0 curated, 1 official document, 2 other document.
    pub fn rank(&self, source: &RetrievalCandidate) -> u8 {
        match source.source_type {
            SourceType::Curated => 0,
            SourceType::Raw => {
                let title = normalize(&source.title);
                if self.params.official_markers.iter().any(|m| title.contains(&normalize(m))) {
                    1
                } else {
                    2
                }
            }
        }
    }

    /// Stable sort by hierarchy rank; retrieval order is kept within a rank.
    pub fn prioritize(&self, sources: &[RetrievalCandidate]) -> Vec<RetrievalCandidate> {
        let mut ordered = sources.to_vec();
        ordered.sort_by_key(|s| self.rank(s));
        ordered
    }

    /// `sources` are expected in retrieval order (best first).
    pub fn resolve_hierarchy(&self, sources: &[RetrievalCandidate]) -> HierarchyResolution {
        let ordered = self.prioritize(sources);
        let curated = sources.iter().find(|s| s.source_type == SourceType::Curated);
        let has_raw = sources.iter().any(|s| s.source_type == SourceType::Raw);

        let Some(curated) = curated.filter(|_| has_raw) else {
            return HierarchyResolution {
                primary_source: sources.first().cloned(),
                conflict_detected: false,
                reason: "only one source type present".to_string(),
                ordered,
            };
        };

        let curated_pol = self.polarity.polarity(&curated.text);
        let conflicting = sources
            .iter()
            .filter(|s| s.source_type == SourceType::Raw)
            .find(|raw| {
                let raw_pol = self.polarity.polarity(&raw.text);
                contradicts(curated_pol, raw_pol) || contradicts(raw_pol, curated_pol)
            });

        match conflicting {
            Some(raw) => {
                tracing::info!(
                    curated = %curated.origin_id,
                    document = %raw.origin_id,
                    "curated answer overrides contradicting document"
                );
                HierarchyResolution {
                    primary_source: Some(curated.clone()),
                    conflict_detected: true,
                    reason: format!(
                        "curated answer #{} takes precedence over contradicting document '{}'",
                        curated.origin_id, raw.title
                    ),
                    ordered,
                }
            }
            None => HierarchyResolution {
                primary_source: sources.first().cloned(),
                conflict_detected: false,
                reason: "no contradiction between sources".to_string(),
                ordered,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::KeywordPolarityDetector;
    use std::sync::Arc;

    fn resolver() -> SourceHierarchy {
        SourceHierarchy::new(Arc::new(KeywordPolarityDetector::default()), HierarchyParams::default())
    }

    fn src(id: &str, title: &str, text: &str, source_type: SourceType, confidence: f64) -> RetrievalCandidate {
        RetrievalCandidate {
            text: text.into(),
            title: title.into(),
            category: None,
            confidence,
            source_type,
            origin_id: id.into(),
            section: None,
        }
    }

    #[test]
    fn test_curated_wins_on_conflict() {
        let sources = vec![
            src("d1", "Universitet Nizomi", "Dormitory is not available for master students.", SourceType::Raw, 0.8),
            src("7", "Is there a dormitory?", "Yes, a dormitory is available.", SourceType::Curated, 0.6),
        ];
        let r = resolver().resolve_hierarchy(&sources);
        assert!(r.conflict_detected);
        assert_eq!(r.primary_source.unwrap().origin_id, "7");
    }

    #[test]
    fn test_no_conflict_keeps_top_ranked() {
        let sources = vec![
            src("d1", "Guide", "Classes start in September.", SourceType::Raw, 0.8),
            src("7", "When do classes start?", "Classes start on September 2.", SourceType::Curated, 0.6),
        ];
        let r = resolver().resolve_hierarchy(&sources);
        assert!(!r.conflict_detected);
        assert_eq!(r.primary_source.unwrap().origin_id, "d1");
    }

    #[test]
    fn test_single_type_and_empty() {
        let r = resolver().resolve_hierarchy(&[]);
        assert!(r.primary_source.is_none());
        assert!(!r.conflict_detected);

        let only_raw = vec![src("d1", "Guide", "No dormitory.", SourceType::Raw, 0.5)];
        let r = resolver().resolve_hierarchy(&only_raw);
        assert_eq!(r.primary_source.unwrap().origin_id, "d1");
    }

    #[test]
    fn test_priority_order() {
        let sources = vec![
            src("d1", "Guide", "a", SourceType::Raw, 0.9),
            src("d2", "Universitet Nizomi", "b", SourceType::Raw, 0.8),
            src("c1", "Q", "c", SourceType::Curated, 0.3),
        ];
        let ids: Vec<String> = resolver()
            .prioritize(&sources)
            .into_iter()
            .map(|s| s.origin_id)
            .collect();
        assert_eq!(ids, vec!["c1", "d2", "d1"]);
    }
}
