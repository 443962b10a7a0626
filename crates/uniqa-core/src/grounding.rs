//! Post-generation hallucination check.
//!
//! An answer is grounded when its factual tokens (numbers and capitalized
//! multi-word names) all appear in the context, it contains no hedging
//! phrases, and its polarity does not contradict the context.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::intent::{contradicts, normalize, Polarity, SharedPolarity, WordSet};

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d\s,.]*\d").expect("number pattern is valid"));

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\p{Lu}[\p{Ll}'ʻʼ‘’]+(?:[ \t]+\p{Lu}[\p{Ll}'ʻʼ‘’]+)+\b").expect("entity pattern is valid")
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundingParams {
    /// Uncertainty phrases; each one found in an answer is a flagged claim.
    pub hedges: Vec<String>,
    /// Confidence for answers with no checkable facts.
    pub neutral_confidence: f64,
    pub grounded_threshold: f64,
    pub max_facts: usize,
}

impl Default for GroundingParams {
    fn default() -> Self {
        let hedges = [
            "ehtimol", "taxminan", "ko'p hollarda", "odatda", "balki", "возможно", "вероятно",
            "примерно", "обычно", "probably", "approximately", "usually", "perhaps", "in most cases",
        ];
        Self {
            hedges: hedges.iter().map(|s| s.to_string()).collect(),
            neutral_confidence: 0.7,
            grounded_threshold: 0.8,
            max_facts: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallucinationResult {
    pub is_grounded: bool,
    pub hallucinated_claims: Vec<String>,
    pub confidence: f64,
    pub reason: String,
}

pub struct HallucinationChecker {
    hedges: WordSet,
    polarity: SharedPolarity,
    params: GroundingParams,
}

impl HallucinationChecker {
    pub fn new(polarity: SharedPolarity, params: GroundingParams) -> Result<Self> {
        let words: Vec<&str> = params.hedges.iter().map(String::as_str).collect();
        Ok(Self {
            hedges: WordSet::new(&words, "hedge phrases")?,
            polarity,
            params,
        })
    }

    pub fn check_grounding(&self, answer: &str, context: &str) -> HallucinationResult {
        let answer_norm = normalize(answer);
        let context_norm = normalize(context);
        let mut claims = Vec::new();

        let mut seen: Vec<&str> = Vec::new();
        for hedge in self.hedges.find_iter(&answer_norm) {
            if !seen.contains(&hedge) {
                claims.push(format!("hedging phrase: '{hedge}'"));
                seen.push(hedge);
            }
        }

        let facts = extract_facts(answer, self.params.max_facts);
        let ungrounded: Vec<&String> = facts
            .iter()
            .filter(|f| !context_norm.contains(normalize(f).as_str()))
            .collect();
        for fact in &ungrounded {
            claims.push(format!("fact not found in context: '{fact}'"));
        }

        let answer_pol = self.polarity.polarity(answer);
        let context_pol = self.polarity.polarity(context);
        if contradicts(answer_pol, context_pol) {
            claims.push(match answer_pol {
                Polarity::Affirmative => "answer affirms availability but the context denies it".to_string(),
                _ => "answer denies availability but the context affirms it".to_string(),
            });
        }

        let confidence = if facts.is_empty() {
            self.params.neutral_confidence
        } else {
            1.0 - ungrounded.len() as f64 / facts.len() as f64
        };
        let is_grounded = confidence >= self.params.grounded_threshold && claims.is_empty();
        let reason = if is_grounded {
            "answer is fully supported by the context".to_string()
        } else if claims.is_empty() {
            format!("grounding confidence {confidence:.2} below threshold")
        } else {
            format!("{} issue(s) found", claims.len())
        };

        if !is_grounded {
            tracing::debug!(confidence, claims = claims.len(), "answer failed grounding check");
        }

        HallucinationResult {
            is_grounded,
            hallucinated_claims: claims,
            confidence,
            reason,
        }
    }
}

/// Numbers first, then capitalized multi-word names, capped at `max`.
pub fn extract_facts(text: &str, max: usize) -> Vec<String> {
    let numbers = NUMBER_RE.find_iter(text).map(|m| m.as_str().trim().to_string());
    let entities = ENTITY_RE.find_iter(text).map(|m| m.as_str().to_string());
    let mut facts: Vec<String> = Vec::new();
    for f in numbers.chain(entities) {
        if !facts.contains(&f) {
            facts.push(f);
        }
    }
    facts.truncate(max);
    facts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::KeywordPolarityDetector;
    use std::sync::Arc;

    fn checker() -> HallucinationChecker {
        HallucinationChecker::new(Arc::new(KeywordPolarityDetector::default()), GroundingParams::default()).unwrap()
    }

    #[test]
    fn test_extract_facts() {
        let facts = extract_facts("Kontrakt 12 500 000 so'm. Manzil: Toshkent Davlat Universiteti, 2025 yil.", 10);
        assert_eq!(facts, vec!["12 500 000", "2025", "Toshkent Davlat Universiteti"]);
    }

    #[test]
    fn test_grounded_answer() {
        let ctx = "MATN: Kontrakt narxi 12 500 000 so'm. Toshkent Davlat Universiteti.";
        let r = checker().check_grounding("Kontrakt narxi 12 500 000 so'm.", ctx);
        assert!(r.is_grounded, "{r:?}");
        assert_eq!(r.confidence, 1.0);
    }

    #[test]
    fn test_ungrounded_number() {
        let ctx = "MATN: Kontrakt narxi 12 500 000 so'm.";
        let r = checker().check_grounding("Kontrakt narxi 15 000 000 so'm.", ctx);
        assert!(!r.is_grounded);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.hallucinated_claims.len(), 1);
    }

    #[test]
    fn test_hedge_flagged() {
        let ctx = "MATN: Dars soat 9 da boshlanadi.";
        let r = checker().check_grounding("Darslar odatda soat 9 da boshlanadi.", ctx);
        assert!(!r.is_grounded);
        assert!(r.hallucinated_claims[0].contains("odatda"));
    }

    #[test]
    fn test_adjacent_hedges_each_flagged() {
        let ctx = "MATN: Dars soat 9 da boshlanadi.";
        let r = checker().check_grounding("Darslar ehtimol odatda soat 9 da boshlanadi.", ctx);
        assert_eq!(r.hallucinated_claims.len(), 2, "{r:?}");
        assert!(r.hallucinated_claims[0].contains("ehtimol"));
        assert!(r.hallucinated_claims[1].contains("odatda"));
    }

    #[test]
    fn test_qualitative_answer_neutral() {
        let r = checker().check_grounding("darslar ertalab boshlanadi.", "MATN: darslar ertalab boshlanadi.");
        assert_eq!(r.confidence, 0.7);
        assert!(!r.is_grounded);
        assert!(r.hallucinated_claims.is_empty());
    }

    #[test]
    fn test_polarity_contradiction() {
        let r = checker().check_grounding(
            "Magistrlar uchun yotoqxona mavjud.",
            "MATN: Magistratura talabalari uchun yotoqxona mavjud emas.",
        );
        assert!(r.hallucinated_claims.iter().any(|c| c.contains("affirms")));
        assert!(!r.is_grounded);
    }
}
