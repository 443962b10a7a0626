//! Section-aware document chunker.
//!
//! Turns raw document text into [`Segment`]s tagged with their section
//! title, parent document title and any table structure found in them.
//!
//! # Algorithm
//!
//! 1. Clean: strip boilerplate headers, unwrap markdown links, drop bare
//!    URLs and control characters, turn column-like whitespace runs into
//!    ` | `, and collapse whitespace while keeping paragraph breaks.
//! 2. Detect sections (see [`crate::sections`]).
//! 3. Split every section with [`split_recursive`] using the default
//!    delimiter priority, `max_chars` and `overlap_chars`.
//! 4. Extract table structure from each piece.
//! 5. Drop pieces shorter than `min_segment_chars`.
//! 6. Drop near-duplicates (token-set Jaccard above `dedup_threshold`),
//!    keeping the first occurrence.
//!
//! Segment ids are UUID v5 of `(document_id, ordinal)`, so reprocessing an
//! unchanged document yields identical segments.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{RagError, Result};
use crate::models::{char_len, Document, Language, Segment, TableStructure};
use crate::sections::detect_sections;
use crate::split::{split_recursive, DEFAULT_PRIORITY};

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(\s*[^)]*\)").expect("link regex is valid"));
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:https?://|www\.)\S+").expect("url regex is valid"));
static COLUMN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{3,}|\t+").expect("column regex is valid"));
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" {2,}").expect("spaces regex is valid"));
static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank line regex is valid"));

/// Chunking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Target maximum segment length in characters.
    pub max_chars: usize,
    /// Characters carried over from the previous segment.
    pub overlap_chars: usize,
    pub min_segment_chars: usize,
    /// Cleaned documents shorter than this are rejected.
    pub min_document_chars: usize,
    /// Jaccard similarity above which a segment counts as a duplicate.
    pub dedup_threshold: f64,
    pub paragraphs_per_group: usize,
    pub max_header_chars: usize,
    /// Regexes for institutional boilerplate removed before chunking.
    pub boilerplate_patterns: Vec<String>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 1500,
            overlap_chars: 300,
            min_segment_chars: 50,
            min_document_chars: 10,
            dedup_threshold: 0.7,
            paragraphs_per_group: 3,
            max_header_chars: 80,
            boilerplate_patterns: vec![
                r"(?i)O['ʻ‘’`]?ZBEKISTON RESPUBLIKASI[^.\n]*".to_string(),
                r"(?i)РЕСПУБЛИКИ УЗБЕКИСТАН[^.\n]*".to_string(),
            ],
        }
    }
}

/// Turns documents into segments.
pub struct Chunker {
    config: ChunkerConfig,
    boilerplate: Vec<Regex>,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        if config.max_chars == 0 {
            return Err(RagError::Config("chunking.max_chars must be > 0".into()));
        }
        if config.overlap_chars >= config.max_chars {
            return Err(RagError::Config(
                "chunking.overlap_chars must be smaller than chunking.max_chars".into(),
            ));
        }
        let boilerplate = config
            .boilerplate_patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|e| RagError::Config(format!("boilerplate pattern {p:?}: {e}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { config, boilerplate })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk a document's body.
    pub fn chunk(&self, document: &Document) -> Result<Vec<Segment>> {
        self.chunk_text(&document.id, &document.title, document.language, &document.body)
    }

    /// Chunk raw text belonging to `document_id`.
    ///
    /// Fails with [`RagError::Ingestion`] when the text is empty, too short
    /// after cleaning, or yields no segment above the minimum length.
    pub fn chunk_text(
        &self,
        document_id: &str,
        title: &str,
        language: Language,
        raw_text: &str,
    ) -> Result<Vec<Segment>> {
        if raw_text.trim().is_empty() {
            return Err(RagError::Ingestion(format!("document {document_id} has no text")));
        }

        let cleaned = self.clean(raw_text);
        let cleaned_len = char_len(&cleaned);
        if cleaned_len < self.config.min_document_chars {
            return Err(RagError::Ingestion(format!(
                "document {document_id} has {cleaned_len} characters after cleanup, minimum is {}",
                self.config.min_document_chars
            )));
        }

        let sections = detect_sections(
            &cleaned,
            title,
            self.config.max_chars,
            self.config.max_header_chars,
            self.config.paragraphs_per_group,
        );

        let mut pieces: Vec<(String, String)> = Vec::new();
        for section in &sections {
            for piece in split_recursive(
                &section.body,
                &DEFAULT_PRIORITY,
                self.config.max_chars,
                self.config.overlap_chars,
            ) {
                if char_len(&piece) >= self.config.min_segment_chars {
                    pieces.push((section.title.clone(), piece));
                }
            }
        }

        let pieces = dedup_pieces(pieces, self.config.dedup_threshold);
        if pieces.is_empty() {
            return Err(RagError::Ingestion(format!(
                "document {document_id} produced no segments of at least {} characters",
                self.config.min_segment_chars
            )));
        }

        let segments: Vec<Segment> = pieces
            .into_iter()
            .enumerate()
            .map(|(ordinal, (section_title, text))| {
                make_segment(document_id, title, language, ordinal, section_title, text)
            })
            .collect();

        tracing::debug!(
            document_id,
            sections = sections.len(),
            segments = segments.len(),
            "chunked document"
        );

        Ok(segments)
    }

    /// Normalise raw text for chunking.
    pub fn clean(&self, raw: &str) -> String {
        let mut text = raw.replace("\r\n", "\n").replace('\r', "\n");
        for re in &self.boilerplate {
            text = re.replace_all(&text, "").into_owned();
        }
        text = LINK_RE.replace_all(&text, "$1").into_owned();
        text = URL_RE.replace_all(&text, "").into_owned();
        text.retain(|c| !c.is_control() || c == '\n' || c == '\t');

        let lines: Vec<String> = text
            .split('\n')
            .map(|line| {
                let line = line.trim();
                let line = COLUMN_RE.replace_all(line, " | ");
                SPACES_RE.replace_all(&line, " ").into_owned()
            })
            .collect();

        let joined = lines.join("\n");
        BLANK_LINES_RE.replace_all(&joined, "\n\n").trim().to_string()
    }
}

fn make_segment(
    document_id: &str,
    document_title: &str,
    language: Language,
    ordinal: usize,
    section_title: String,
    text: String,
) -> Segment {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{document_id}:{ordinal}").as_bytes(),
    );

    Segment {
        id: id.to_string(),
        document_id: document_id.to_string(),
        ordinal,
        table: extract_table(&text),
        text,
        section_title,
        document_title: document_title.to_string(),
        language,
        vector_ref: format!("doc_{document_id}_chunk_{ordinal}"),
        hash,
    }
}

fn token_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(|t| t.to_lowercase()).collect()
}

/// Token-set Jaccard similarity of two texts.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let sa = token_set(a);
    let sb = token_set(b);
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let inter = sa.intersection(&sb).count() as f64;
    let union = sa.union(&sb).count() as f64;
    inter / union
}

fn dedup_pieces(pieces: Vec<(String, String)>, threshold: f64) -> Vec<(String, String)> {
    let mut kept: Vec<(String, String)> = Vec::with_capacity(pieces.len());
    let mut kept_sets: Vec<HashSet<String>> = Vec::with_capacity(pieces.len());

    for (title, text) in pieces {
        let set = token_set(&text);
        let duplicate = kept_sets.iter().any(|other| {
            let inter = set.intersection(other).count() as f64;
            let union = set.union(other).count() as f64;
            union > 0.0 && inter / union > threshold
        });
        if !duplicate {
            kept_sets.push(set);
            kept.push((title, text));
        }
    }
    kept
}

/// Find a table in `text`: at least two lines with two or more ` | `
/// delimiters. The line with the most cells is the header row.
pub fn extract_table(text: &str) -> Option<TableStructure> {
    let table_lines: Vec<Vec<String>> = text
        .lines()
        .filter(|l| l.matches('|').count() >= 2)
        .map(|l| {
            l.split('|')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|cells| cells.len() >= 2)
        .collect();

    if table_lines.len() < 2 {
        return None;
    }

    let header_idx = table_lines
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.len().cmp(&b.len()).then(ib.cmp(ia)))
        .map(|(i, _)| i)?;
    let headers = table_lines[header_idx].clone();

    let rows = table_lines
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != header_idx)
        .map(|(_, cells)| {
            headers
                .iter()
                .enumerate()
                .map(|(col, h)| (h.clone(), cells.get(col).cloned().unwrap_or_default()))
                .collect::<BTreeMap<_, _>>()
        })
        .collect();

    Some(TableStructure { headers, rows })
}
