//! Self-correcting retrieval loop.
//!
//! A bounded state machine `Retrieve -> Grade -> Refine -> ... -> Done`.
//! Every iteration re-detects the category of the current query text,
//! retrieves with it as the category filter and grades the result. The
//! best-graded bundle seen so far is returned, together with the iteration
//! count and a trace of every step.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::grade::RelevanceGrader;
use crate::models::{GradeResult, Language, RetrievalBundle};
use crate::retrieve::HybridRetriever;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionParams {
    pub max_iterations: usize,
    /// Stop as soon as a relevant grade reaches this confidence.
    pub early_stop_confidence: f64,
    pub top_k: usize,
}

impl Default for CorrectionParams {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            early_stop_confidence: 0.7,
            top_k: 5,
        }
    }
}

/// One graded iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub iteration: usize,
    pub query: String,
    pub intent: Option<String>,
    pub is_relevant: bool,
    pub confidence: f64,
    pub reason: String,
}

/// Best bundle seen, its grade and the full trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinedRetrieval {
    pub bundle: RetrievalBundle,
    pub grade: GradeResult,
    /// Query text of the best iteration.
    pub query: String,
    pub intent: Option<String>,
    pub iterations_used: usize,
    pub trace: Vec<TraceStep>,
}

impl RefinedRetrieval {
    /// False when no iteration found relevant context.
    pub fn is_relevant(&self) -> bool {
        self.grade.is_relevant
    }
}

enum State {
    Retrieve,
    Grade(RetrievalBundle),
    Refine(GradeResult),
    Done,
}

struct Best {
    bundle: RetrievalBundle,
    grade: GradeResult,
    query: String,
    intent: Option<String>,
}

#[derive(Clone)]
pub struct SelfCorrectingRetriever {
    retriever: HybridRetriever,
    grader: RelevanceGrader,
    params: CorrectionParams,
}

impl SelfCorrectingRetriever {
    pub fn new(retriever: HybridRetriever, grader: RelevanceGrader, params: CorrectionParams) -> Self {
        Self {
            retriever,
            grader,
            params,
        }
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    pub fn params(&self) -> &CorrectionParams {
        &self.params
    }

    /// Run the loop with the configured iteration bound.
    pub async fn retrieve(&self, query: &str, language: Language) -> Result<RefinedRetrieval> {
        self.retrieve_with_refinement(query, language, self.params.max_iterations)
            .await
    }

    /// Run at most `max_iterations` (at least one) retrieve/grade rounds.
    ///
    /// A retrieval error in the first iteration is returned. Later failures
    /// end the loop with the best result so far.
    pub async fn retrieve_with_refinement(
        &self,
        query: &str,
        language: Language,
        max_iterations: usize,
    ) -> Result<RefinedRetrieval> {
        let max_iterations = max_iterations.max(1);
        let classifier = self.retriever.classifier().clone();

        let mut current = query.to_string();
        let mut intent: Option<String> = None;
        let mut iteration = 0usize;
        let mut trace: Vec<TraceStep> = Vec::new();
        let mut best: Option<Best> = None;
        let mut state = State::Retrieve;

        loop {
            state = match state {
                State::Retrieve => {
                    iteration += 1;
                    intent = classifier.classify(&current);
                    match self
                        .retriever
                        .retrieve(&current, language, self.params.top_k, intent.as_deref())
                        .await
                    {
                        Ok(bundle) => State::Grade(bundle),
                        Err(e) if best.is_some() => {
                            tracing::warn!(iteration, "retrieval failed during refinement, keeping best result: {e}");
                            iteration -= 1;
                            State::Done
                        }
                        Err(e) => return Err(e),
                    }
                }
                State::Grade(bundle) => {
                    let grade = self.grader.grade(&current, &bundle.context, intent.as_deref());
                    tracing::debug!(
                        iteration,
                        query = %current,
                        relevant = grade.is_relevant,
                        confidence = grade.confidence,
                        "graded retrieval"
                    );
                    trace.push(TraceStep {
                        iteration,
                        query: current.clone(),
                        intent: intent.clone(),
                        is_relevant: grade.is_relevant,
                        confidence: grade.confidence,
                        reason: grade.reason.clone(),
                    });

                    let finished = grade.is_relevant && grade.confidence >= self.params.early_stop_confidence;
                    let improved = best
                        .as_ref()
                        .map(|b| grade.confidence > b.grade.confidence)
                        .unwrap_or(true);
                    let next = if finished || iteration >= max_iterations {
                        State::Done
                    } else {
                        State::Refine(grade.clone())
                    };
                    if improved {
                        best = Some(Best {
                            bundle,
                            grade,
                            query: current.clone(),
                            intent: intent.clone(),
                        });
                    }
                    next
                }
                State::Refine(grade) => match grade.suggested_refined_query {
                    Some(refined) if refined != current => {
                        current = refined;
                        State::Retrieve
                    }
                    _ => State::Done,
                },
                State::Done => break,
            };
        }

        let Some(best) = best else {
            // Unreachable: the first iteration either grades or returns its error.
            return Ok(RefinedRetrieval {
                bundle: RetrievalBundle::default(),
                grade: self.grader.grade(query, "", None),
                query: query.to_string(),
                intent: None,
                iterations_used: iteration,
                trace,
            });
        };

        if !best.grade.is_relevant {
            tracing::info!(query, iterations = iteration, "no relevant context found");
        }

        Ok(RefinedRetrieval {
            bundle: best.bundle,
            grade: best.grade,
            query: best.query,
            intent: best.intent,
            iterations_used: iteration,
            trace,
        })
    }
}
