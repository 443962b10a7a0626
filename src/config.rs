use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use uniqa_core::cache::CacheParams;
use uniqa_core::chunk::ChunkerConfig;
use uniqa_core::correction::CorrectionParams;
use uniqa_core::facts::FactParams;
use uniqa_core::grade::GraderParams;
use uniqa_core::grounding::GroundingParams;
use uniqa_core::hierarchy::HierarchyParams;
use uniqa_core::intent::default_categories;
use uniqa_core::models::Category;
use uniqa_core::retrieve::RetrievalParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkerConfig,
    #[serde(default)]
    pub retrieval: RetrievalParams,
    #[serde(default)]
    pub grading: GraderParams,
    #[serde(default)]
    pub correction: CorrectionParams,
    #[serde(default)]
    pub grounding: GroundingConfig,
    #[serde(default)]
    pub hierarchy: HierarchyParams,
    #[serde(default)]
    pub facts: FactParams,
    #[serde(default)]
    pub cache: CacheParams,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Intent categories and their keywords, `[[categories]]` tables.
    #[serde(default = "default_categories")]
    pub categories: Vec<Category>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GroundingConfig {
    #[serde(flatten)]
    pub params: GroundingParams,
    /// Reject ungrounded generated answers with `GroundingFailure`.
    #[serde(default)]
    pub enforce: bool,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            params: GroundingParams::default(),
            enforce: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Alternate scheme tried once when the primary fails.
    #[serde(default)]
    pub fallback: Option<Box<EmbeddingConfig>>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            timeout_secs: 30,
            fallback: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            url: None,
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_provider() -> String {
    "ollama".to_string()
}
fn default_generation_model() -> String {
    "qwen2.5:3b".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_generation_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    /// Curated answers at or above this confidence are returned without generation.
    #[serde(default = "default_direct_answer")]
    pub direct_answer_confidence: f64,
    /// Below this (and without dynamic facts) the localized not-found message is returned.
    #[serde(default = "default_min_answer")]
    pub min_answer_confidence: f64,
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            direct_answer_confidence: default_direct_answer(),
            min_answer_confidence: default_min_answer(),
            max_sources: default_max_sources(),
        }
    }
}

fn default_direct_answer() -> f64 {
    0.75
}
fn default_min_answer() -> f64 {
    0.3
}
fn default_max_sources() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            ansi: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        anyhow::bail!("{name} must be in [0.0, 1.0], got {value}");
    }
    Ok(())
}

fn validate_embedding(section: &str, embedding: &EmbeddingConfig) -> Result<()> {
    match embedding.provider.as_str() {
        "disabled" | "ollama" | "openai" | "local" => {}
        other => anyhow::bail!(
            "Unknown {section}.provider: '{}'. Must be disabled, ollama, openai, or local.",
            other
        ),
    }
    if embedding.is_enabled() {
        if embedding.dims.is_none() || embedding.dims == Some(0) {
            anyhow::bail!(
                "{section}.dims must be > 0 when provider is '{}'",
                embedding.provider
            );
        }
        if embedding.model.is_none() {
            anyhow::bail!(
                "{section}.model must be specified when provider is '{}'",
                embedding.provider
            );
        }
    }
    Ok(())
}

/// Check cross-field constraints serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    let c = &config.chunking;
    if c.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if c.overlap_chars >= c.max_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.max_chars");
    }
    if c.min_segment_chars >= c.max_chars {
        anyhow::bail!("chunking.min_segment_chars must be < chunking.max_chars");
    }
    check_unit("chunking.dedup_threshold", c.dedup_threshold)?;

    let r = &config.retrieval;
    for (name, value) in [
        ("retrieval.lexical_floor", r.lexical_floor),
        ("retrieval.score_cap", r.score_cap),
        ("retrieval.direct_hit_threshold", r.direct_hit_threshold),
        ("retrieval.min_confidence", r.min_confidence),
        ("retrieval.cross_language_penalty", r.cross_language_penalty),
        ("retrieval.substring_fallback_score", r.substring_fallback_score),
    ] {
        check_unit(name, value)?;
    }
    check_unit("grading.relevance_threshold", config.grading.relevance_threshold)?;
    check_unit("correction.early_stop_confidence", config.correction.early_stop_confidence)?;
    check_unit("grounding.grounded_threshold", config.grounding.params.grounded_threshold)?;
    check_unit("grounding.neutral_confidence", config.grounding.params.neutral_confidence)?;
    check_unit("answer.direct_answer_confidence", config.answer.direct_answer_confidence)?;
    check_unit("answer.min_answer_confidence", config.answer.min_answer_confidence)?;

    if config.correction.max_iterations < 1 {
        anyhow::bail!("correction.max_iterations must be >= 1");
    }
    if config.correction.top_k < 1 {
        anyhow::bail!("correction.top_k must be >= 1");
    }

    validate_embedding("embedding", &config.embedding)?;
    if let Some(fallback) = &config.embedding.fallback {
        validate_embedding("embedding.fallback", fallback)?;
        if fallback.fallback.is_some() {
            anyhow::bail!("embedding.fallback cannot have its own fallback");
        }
    }

    if let Some(empty) = config.categories.iter().find(|c| c.keywords.is_empty()) {
        anyhow::bail!("category '{}' has no keywords", empty.name);
    }

    match config.generation.provider.as_str() {
        "ollama" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be ollama or disabled.",
            other
        ),
    }

    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./data/uniqa.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.max_chars, 1500);
        assert_eq!(config.correction.max_iterations, 3);
        assert_eq!(config.cache.ttl_secs, 3600);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.generation.model, "qwen2.5:3b");
        assert!((config.retrieval.power_boost - 2.5).abs() < 1e-9);
        assert!(config.categories.iter().any(|c| c.name == "Kontrakt"));
    }

    #[test]
    fn test_custom_categories_replace_defaults() {
        let config = parse(
            r#"
            [db]
            path = "x"

            [[categories]]
            name = "Sport"
            keywords = ["sport", "спорт"]
            "#,
        )
        .unwrap();
        assert_eq!(config.categories.len(), 1);
        assert_eq!(config.categories[0].keywords, vec!["sport", "спорт"]);

        let err = parse("[db]\npath = \"x\"\n[[categories]]\nname = \"Bo'sh\"\nkeywords = []\n").unwrap_err();
        assert!(err.to_string().contains("no keywords"));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = parse(
            r#"
            [db]
            path = "x.sqlite"

            [retrieval]
            direct_hit_threshold = 0.6

            [grounding]
            enforce = true
            "#,
        )
        .unwrap();
        assert!((config.retrieval.direct_hit_threshold - 0.6).abs() < 1e-9);
        assert!((config.retrieval.min_confidence - 0.15).abs() < 1e-9);
        assert!(config.grounding.enforce);
        assert_eq!(config.grounding.params.max_facts, 10);
    }

    #[test]
    fn test_rejects_bad_overlap() {
        let err = parse(
            r#"
            [db]
            path = "x.sqlite"
            [chunking]
            max_chars = 100
            overlap_chars = 100
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("overlap_chars"));
    }

    #[test]
    fn test_rejects_zero_iterations() {
        let err = parse("[db]\npath = \"x\"\n[correction]\nmax_iterations = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn test_enabled_embedding_needs_model_and_dims() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"ollama\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));

        let config = parse(
            r#"
            [db]
            path = "x"
            [embedding]
            provider = "ollama"
            model = "nomic-embed-text"
            dims = 768
            [embedding.fallback]
            provider = "openai"
            model = "text-embedding-3-small"
            dims = 768
            "#,
        )
        .unwrap();
        assert_eq!(config.embedding.fallback.unwrap().provider, "openai");
    }

    #[test]
    fn test_unknown_provider() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding.provider"));
    }
}
