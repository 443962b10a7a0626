//! Dynamic facts: frequently changing values (fees, dates, phone numbers)
//! kept outside curated answers.
//!
//! Curated answers reference them with `{{key}}` placeholders, rendered per
//! request language. A query that mentions a fact topic also gets a compact
//! "current information" block built from that topic's keys.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, RwLock};

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::intent::normalize;
use crate::models::{DynamicFact, Language};

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is valid"));

/// Source of dynamic facts.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Active facts among `keys`, in `keys` order. Unknown keys are skipped.
    async fn active_facts(&self, keys: &[String]) -> Result<Vec<DynamicFact>>;
}

#[derive(Default)]
pub struct InMemoryFactStore {
    facts: RwLock<BTreeMap<String, DynamicFact>>,
}

impl InMemoryFactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, fact: DynamicFact) {
        self.facts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(fact.key.clone(), fact);
    }
}

#[async_trait]
impl FactStore for InMemoryFactStore {
    async fn active_facts(&self, keys: &[String]) -> Result<Vec<DynamicFact>> {
        let facts = self.facts.read().unwrap_or_else(|e| e.into_inner());
        Ok(keys
            .iter()
            .filter_map(|k| facts.get(k))
            .filter(|f| f.is_active)
            .cloned()
            .collect())
    }
}

/// A group of fact keys selected by trigger words in the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactTopic {
    pub name: String,
    pub triggers: Vec<String>,
    pub keys: Vec<String>,
}

impl FactTopic {
    fn new(name: &str, triggers: &[&str], keys: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            triggers: triggers.iter().map(|s| s.to_string()).collect(),
            keys: keys.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactParams {
    pub topics: Vec<FactTopic>,
    pub max_value_chars: usize,
    pub max_block_chars: usize,
}

impl Default for FactParams {
    fn default() -> Self {
        Self {
            topics: vec![
                FactTopic::new(
                    "tuition",
                    &["kontrakt", "to'lov", "shartnoma", "narx", "cost", "price", "tuition", "контракт", "оплат", "стоимост"],
                    &["tuition_fee", "contract_price", "payment_deadline"],
                ),
                FactTopic::new(
                    "admission",
                    &["qabul", "hujjat topshirish", "imtihon", "admission", "registration", "поступлени", "прием", "приём"],
                    &["admission_start", "admission_end", "admission_deadline"],
                ),
                FactTopic::new(
                    "contact",
                    &["telefon", "aloqa", "manzil", "location", "address", "phone", "email", "pochta", "контакт", "адрес", "телефон"],
                    &["main_phone", "admission_phone", "hotline", "main_email", "address", "location", "rector_name"],
                ),
                FactTopic::new(
                    "working_hours",
                    &["ish vaqti", "working hours", "opening hours", "jadval", "часы работы", "график"],
                    &["working_hours", "office_hours", "library_hours"],
                ),
            ],
            max_value_chars: 1500,
            max_block_chars: 3000,
        }
    }
}

/// Renders placeholders and builds dynamic context blocks.
#[derive(Clone)]
pub struct FactResolver {
    store: Arc<dyn FactStore>,
    params: FactParams,
}

impl FactResolver {
    pub fn new(store: Arc<dyn FactStore>, params: FactParams) -> Self {
        Self { store, params }
    }

    /// Keys of every topic triggered by `query`, deduplicated.
    pub fn keys_for(&self, query: &str) -> Vec<String> {
        let q = normalize(query);
        let mut keys: Vec<String> = Vec::new();
        for topic in &self.params.topics {
            if topic.triggers.iter().any(|t| q.contains(normalize(t).as_str())) {
                for key in &topic.keys {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
            }
        }
        keys
    }

    /// `key: value` lines for the facts triggered by `query`; empty when
    /// nothing matches.
    pub async fn dynamic_context(&self, query: &str, language: Language) -> Result<String> {
        let keys = self.keys_for(query);
        if keys.is_empty() {
            return Ok(String::new());
        }
        let facts = self.store.active_facts(&keys).await?;
        let lines: Vec<String> = facts
            .iter()
            .filter_map(|f| f.value(language).map(|v| (f, v)))
            .map(|(f, v)| format!("{}: {}", f.key, truncate_chars(v, self.params.max_value_chars, "... (truncated)")))
            .collect();
        Ok(truncate_chars(&lines.join("\n"), self.params.max_block_chars, "\n... (more data available)"))
    }

    /// Replace `{{key}}` placeholders with active values; unknown keys stay verbatim.
    pub async fn render(&self, text: &str, language: Language) -> Result<String> {
        let keys: Vec<String> = PLACEHOLDER_RE
            .captures_iter(text)
            .map(|c| c[1].to_string())
            .collect();
        if keys.is_empty() {
            return Ok(text.to_string());
        }
        let facts = self.store.active_facts(&keys).await?;
        Ok(render_placeholders(text, language, &facts))
    }
}

/// Pure placeholder substitution against an explicit fact list.
pub fn render_placeholders(text: &str, language: Language, facts: &[DynamicFact]) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures| {
            facts
                .iter()
                .find(|f| f.key == caps[1] && f.is_active)
                .and_then(|f| f.value(language))
                .map(str::to_string)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn truncate_chars(s: &str, max: usize, marker: &str) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}{}", &s[..idx], marker),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(key: &str, uz: &str, en: Option<&str>) -> DynamicFact {
        let mut values = BTreeMap::new();
        values.insert(Language::Uz, uz.to_string());
        if let Some(en) = en {
            values.insert(Language::En, en.to_string());
        }
        DynamicFact {
            key: key.into(),
            values,
            is_active: true,
        }
    }

    fn resolver() -> FactResolver {
        let store = InMemoryFactStore::new();
        store.upsert(fact("tuition_fee", "12 500 000 so'm", Some("12,500,000 UZS")));
        store.upsert(fact("main_phone", "+998 71 000 00 00", None));
        let mut inactive = fact("admission_start", "1-iyul", None);
        inactive.is_active = false;
        store.upsert(inactive);
        FactResolver::new(Arc::new(store), FactParams::default())
    }

    #[tokio::test]
    async fn test_render_placeholders() {
        let r = resolver();
        let out = r
            .render("Kontrakt: {{ tuition_fee }}. Qabul: {{admission_start}}.", Language::En)
            .await
            .unwrap();
        assert_eq!(out, "Kontrakt: 12,500,000 UZS. Qabul: {{admission_start}}.");
    }

    #[tokio::test]
    async fn test_dynamic_context_by_topic() {
        let r = resolver();
        let ctx = r.dynamic_context("Kontrakt narxi qancha?", Language::Uz).await.unwrap();
        assert_eq!(ctx, "tuition_fee: 12 500 000 so'm");
        assert!(r.dynamic_context("Sport zali", Language::Uz).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_language_fallback_to_uzbek() {
        let r = resolver();
        let ctx = r.dynamic_context("What is the phone number?", Language::En).await.unwrap();
        assert_eq!(ctx, "main_phone: +998 71 000 00 00");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3, "..."), "abc...");
        assert_eq!(truncate_chars("abc", 3, "..."), "abc");
        assert_eq!(truncate_chars("яблоко", 2, "~"), "яб~");
    }
}
