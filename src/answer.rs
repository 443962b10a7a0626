//! End-to-end answer pipeline.
//!
//! ```text
//! cache ─hit──────────────────────────────────────────────▶ cached answer
//!   │miss
//! dynamic facts ─▶ self-correcting retrieval ─▶ render {{placeholders}}
//!   │
//!   ├─ curated top source ≥ direct threshold ──────────────▶ direct answer
//!   ├─ facts only, no retrieved context ───────────────────▶ facts block
//!   ├─ top confidence < min threshold, no facts ───────────▶ not found
//!   └─ generate ─▶ grounding check ─▶ hierarchy ───────────▶ generated answer
//! ```
//!
//! Answers with confidence at or above the minimum are written back to the
//! cache. The not-found message is never cached.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use std::sync::Arc;

use uniqa_core::cache::AnswerCache;
use uniqa_core::correction::{SelfCorrectingRetriever, TraceStep};
use uniqa_core::error::{RagError, Result};
use uniqa_core::facts::FactResolver;
use uniqa_core::grounding::{HallucinationChecker, HallucinationResult};
use uniqa_core::hierarchy::SourceHierarchy;
use uniqa_core::models::{Language, RetrievalCandidate, SourceType};

use crate::config::AnswerConfig;
use crate::generate::{not_found_message, Generator};

/// How an answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    /// A curated answer returned verbatim.
    Direct,
    /// Only dynamic facts matched.
    Facts,
    Generated,
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub language: Language,
    pub kind: AnswerKind,
    pub confidence: f64,
    /// Sources in hierarchy order, at most `answer.max_sources`.
    pub sources: Vec<RetrievalCandidate>,
    pub used_facts: bool,
    pub conflict_detected: bool,
    pub hierarchy_reason: Option<String>,
    pub grounding: Option<HallucinationResult>,
    pub iterations_used: usize,
    #[serde(default)]
    pub trace: Vec<TraceStep>,
    #[serde(default)]
    pub cached: bool,
}

/// Everything decided before generation.
struct Prepared {
    query: String,
    language: Language,
    context: String,
    confidence: f64,
    sources: Vec<RetrievalCandidate>,
    used_facts: bool,
    conflict_detected: bool,
    hierarchy_reason: Option<String>,
    iterations_used: usize,
    trace: Vec<TraceStep>,
}

impl Prepared {
    fn finish(self, text: String, kind: AnswerKind, grounding: Option<HallucinationResult>) -> Answer {
        Answer {
            text,
            language: self.language,
            kind,
            confidence: self.confidence,
            sources: self.sources,
            used_facts: self.used_facts,
            conflict_detected: self.conflict_detected,
            hierarchy_reason: self.hierarchy_reason,
            grounding,
            iterations_used: self.iterations_used,
            trace: self.trace,
            cached: false,
        }
    }
}

enum Step {
    Ready(Answer),
    Generate(Prepared),
}

pub struct AnswerEngine {
    retriever: SelfCorrectingRetriever,
    facts: FactResolver,
    cache: AnswerCache,
    generator: Arc<dyn Generator>,
    checker: HallucinationChecker,
    hierarchy: SourceHierarchy,
    config: AnswerConfig,
    enforce_grounding: bool,
}

impl AnswerEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        retriever: SelfCorrectingRetriever,
        facts: FactResolver,
        cache: AnswerCache,
        generator: Arc<dyn Generator>,
        checker: HallucinationChecker,
        hierarchy: SourceHierarchy,
        config: AnswerConfig,
        enforce_grounding: bool,
    ) -> Self {
        Self {
            retriever,
            facts,
            cache,
            generator,
            checker,
            hierarchy,
            config,
            enforce_grounding,
        }
    }

    pub fn cache(&self) -> &AnswerCache {
        &self.cache
    }

    pub fn retriever(&self) -> &SelfCorrectingRetriever {
        &self.retriever
    }

    /// Answer `query` in `language`.
    pub async fn ask(&self, query: &str, language: Language) -> Result<Answer> {
        match self.prepare(query, language).await? {
            Step::Ready(answer) => Ok(answer),
            Step::Generate(prepared) => {
                let text = self
                    .generator
                    .generate(&prepared.query, &prepared.context, language)
                    .await?;
                self.complete(prepared, text).await
            }
        }
    }

    /// Like [`ask`](Self::ask), streaming generated text into `tx`.
    ///
    /// Answers that skip generation are sent as a single piece.
    pub async fn ask_stream(&self, query: &str, language: Language, tx: mpsc::Sender<String>) -> Result<Answer> {
        match self.prepare(query, language).await? {
            Step::Ready(answer) => {
                let _ = tx.send(answer.text.clone()).await;
                Ok(answer)
            }
            Step::Generate(prepared) => {
                let text = self
                    .generator
                    .generate_stream(&prepared.query, &prepared.context, language, tx)
                    .await?;
                self.complete(prepared, text).await
            }
        }
    }

    async fn prepare(&self, query: &str, language: Language) -> Result<Step> {
        let query = query.trim();

        if let Some(mut cached) = self.cache.get::<Answer>(query, language).await {
            cached.cached = true;
            return Ok(Step::Ready(cached));
        }

        let dynamic = match self.facts.dynamic_context(query, language).await {
            Ok(block) => block,
            Err(e) => {
                tracing::warn!("dynamic facts unavailable, continuing without them: {e}");
                String::new()
            }
        };

        let refined = self.retriever.retrieve(query, language).await?;
        let bundle = refined.bundle;
        let confidence = bundle.top_confidence;

        let context = self.render(&bundle.context, language).await;
        let resolution = self.hierarchy.resolve_hierarchy(&bundle.sources);
        if resolution.conflict_detected {
            tracing::info!(reason = %resolution.reason, "curated answer overrides conflicting document");
        }

        let mut prepared = Prepared {
            query: query.to_string(),
            language,
            context: String::new(),
            confidence,
            sources: resolution.ordered.iter().take(self.config.max_sources).cloned().collect(),
            used_facts: !dynamic.is_empty(),
            conflict_detected: resolution.conflict_detected,
            hierarchy_reason: (!resolution.reason.is_empty()).then(|| resolution.reason.clone()),
            iterations_used: refined.iterations_used,
            trace: refined.trace,
        };

        let top = bundle.sources.first();
        if let Some(top) = top.filter(|t| t.source_type == SourceType::Curated) {
            if confidence >= self.config.direct_answer_confidence {
                let text = self.render(&top.text, language).await;
                tracing::info!(confidence, origin = %top.origin_id, "answered from curated source");
                let answer = prepared.finish(text, AnswerKind::Direct, None);
                self.store(query, &answer).await;
                return Ok(Step::Ready(answer));
            }
        }

        if !dynamic.is_empty() && context.trim().is_empty() {
            tracing::info!("answered from dynamic facts only");
            let answer = prepared.finish(dynamic, AnswerKind::Facts, None);
            self.store(query, &answer).await;
            return Ok(Step::Ready(answer));
        }

        if confidence < self.config.min_answer_confidence && dynamic.is_empty() {
            tracing::info!(confidence, "no supporting source, returning not-found message");
            let answer = prepared.finish(not_found_message(language).to_string(), AnswerKind::NotFound, None);
            return Ok(Step::Ready(answer));
        }

        prepared.context = if dynamic.is_empty() {
            context
        } else {
            format!("Current Information:\n{dynamic}\n\n{context}")
        };
        Ok(Step::Generate(prepared))
    }

    async fn complete(&self, prepared: Prepared, text: String) -> Result<Answer> {
        let grounding = self.checker.check_grounding(&text, &prepared.context);
        if !grounding.is_grounded {
            if self.enforce_grounding {
                return Err(RagError::GroundingFailure(format!(
                    "{} (unsupported: {})",
                    grounding.reason,
                    grounding.hallucinated_claims.join(", ")
                )));
            }
            tracing::warn!(
                confidence = grounding.confidence,
                claims = ?grounding.hallucinated_claims,
                "generated answer is not fully grounded"
            );
        }

        let query = prepared.query.clone();
        let answer = prepared.finish(text, AnswerKind::Generated, Some(grounding));
        self.store(&query, &answer).await;
        Ok(answer)
    }

    async fn render(&self, text: &str, language: Language) -> String {
        match self.facts.render(text, language).await {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::warn!("fact placeholders left unrendered: {e}");
                text.to_string()
            }
        }
    }

    async fn store(&self, query: &str, answer: &Answer) {
        if answer.kind != AnswerKind::NotFound && answer.confidence >= self.config.min_answer_confidence {
            self.cache.set(query, answer.language, answer).await;
        }
    }
}
