//! Builds the full service graph from a [`Config`].

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use uniqa_core::cache::AnswerCache;
use uniqa_core::chunk::Chunker;
use uniqa_core::correction::SelfCorrectingRetriever;
use uniqa_core::facts::FactResolver;
use uniqa_core::grade::RelevanceGrader;
use uniqa_core::grounding::HallucinationChecker;
use uniqa_core::hierarchy::SourceHierarchy;
use uniqa_core::index::DualIndex;
use uniqa_core::intent::{KeywordIntentClassifier, KeywordPolarityDetector, SharedClassifier, SharedPolarity};
use uniqa_core::retrieve::HybridRetriever;

use crate::answer::AnswerEngine;
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::generate::{create_generator, Generator};
use crate::ingest::Ingestor;
use crate::migrate::run_migrations;
use crate::sqlite_index::{SqliteLexicalIndex, SqliteVectorIndex};
use crate::store::{DocumentStore, SqliteCacheBackend, SqliteFactStore};

/// An opened database with the ingestion and answer services on top.
pub struct Uniqa {
    pub pool: SqlitePool,
    pub ingestor: Ingestor,
    pub engine: AnswerEngine,
    pub facts: SqliteFactStore,
}

impl Uniqa {
    /// Connect, migrate and wire every component with the configured providers.
    pub async fn open(config: &Config) -> Result<Self> {
        let generator = create_generator(&config.generation)?;
        Self::open_with_generator(config, generator).await
    }

    /// Like [`open`](Self::open) with an explicit generator.
    pub async fn open_with_generator(config: &Config, generator: Arc<dyn Generator>) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        Self::assemble(config, embedder, generator).await
    }

    /// Wire everything from already constructed providers.
    pub async fn assemble(
        config: &Config,
        embedder: Option<uniqa_core::embedding::Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        crate::config::validate(config)?;

        let pool = db::connect(config).await?;
        run_migrations(&pool).await.context("Failed to run migrations")?;

        let lexical = SqliteLexicalIndex::new(pool.clone()).with_weights(config.retrieval.weights.clone());
        let index = DualIndex::new(
            Arc::new(lexical),
            Arc::new(SqliteVectorIndex::new(pool.clone())),
            embedder,
        );

        let classifier: SharedClassifier = Arc::new(KeywordIntentClassifier::new(config.categories.clone()));
        let polarity: SharedPolarity = Arc::new(KeywordPolarityDetector::default());

        let retriever = HybridRetriever::new(index.clone(), classifier.clone(), config.retrieval.clone());
        let grader = RelevanceGrader::new(classifier, config.grading.clone());
        let corrector = SelfCorrectingRetriever::new(retriever, grader, config.correction.clone());

        let facts = SqliteFactStore::new(pool.clone());
        let resolver = FactResolver::new(Arc::new(facts.clone()), config.facts.clone());
        let cache = AnswerCache::new(Arc::new(SqliteCacheBackend::new(pool.clone())), config.cache.clone());

        let checker = HallucinationChecker::new(polarity.clone(), config.grounding.params.clone())
            .context("Invalid grounding configuration")?;
        let hierarchy = SourceHierarchy::new(polarity, config.hierarchy.clone());

        let chunker = Chunker::new(config.chunking.clone()).context("Invalid chunking configuration")?;
        let ingestor = Ingestor::new(DocumentStore::new(pool.clone()), chunker, index).with_cache(cache.clone());

        let engine = AnswerEngine::new(
            corrector,
            resolver,
            cache,
            generator,
            checker,
            hierarchy,
            config.answer.clone(),
            config.grounding.enforce,
        );

        tracing::info!(db = %config.db.path.display(), "uniqa ready");
        Ok(Self {
            pool,
            ingestor,
            engine,
            facts,
        })
    }
}
