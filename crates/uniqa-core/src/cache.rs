//! Answer cache keyed by normalized query and language.
//!
//! [`AnswerCache`] is fail-open: a backend error is logged and treated as a
//! miss (or a skipped write), never surfaced to the request.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};
use crate::models::Language;

/// Key/value store with per-entry expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Remove every key starting with `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;
    /// Count live keys starting with `prefix`.
    async fn count_prefix(&self, prefix: &str) -> Result<usize>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheParams {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub key_prefix: String,
}

impl Default for CacheParams {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            key_prefix: "rag:v1:".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub total_entries: usize,
    pub ttl_secs: u64,
}

#[derive(Clone)]
pub struct AnswerCache {
    backend: Option<Arc<dyn CacheBackend>>,
    params: CacheParams,
}

impl AnswerCache {
    pub fn new(backend: Arc<dyn CacheBackend>, params: CacheParams) -> Self {
        let backend = params.enabled.then_some(backend);
        Self { backend, params }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            params: CacheParams {
                enabled: false,
                ..CacheParams::default()
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// `<prefix><sha256 hex of "lang:normalized query">`.
    pub fn key(&self, query: &str, language: Language) -> String {
        let normalized = query.trim().to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{}", language.code(), normalized).as_bytes());
        format!("{}{:x}", self.params.key_prefix, hasher.finalize())
    }

    pub async fn get<T: DeserializeOwned>(&self, query: &str, language: Language) -> Option<T> {
        let backend = self.backend.as_ref()?;
        let key = self.key(query, language);
        match backend.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    tracing::debug!(%language, "cache hit");
                    Some(value)
                }
                Err(e) => {
                    tracing::warn!("discarding undecodable cache entry: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("cache read failed, continuing uncached: {e}");
                None
            }
        }
    }

    /// Returns whether the payload was stored.
    pub async fn set<T: Serialize>(&self, query: &str, language: Language, payload: &T) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };
        let raw = match serde_json::to_string(payload) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("cache payload not serializable: {e}");
                return false;
            }
        };
        let key = self.key(query, language);
        match backend.set(&key, &raw, self.params.ttl_secs).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("cache write failed: {e}");
                false
            }
        }
    }

    pub async fn invalidate(&self, query: &str, language: Language) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };
        match backend.delete(&self.key(query, language)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("cache invalidate failed: {e}");
                false
            }
        }
    }

    /// Remove every answer entry. Other keys in a shared backend are untouched.
    pub async fn clear_all(&self) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };
        match backend.delete_prefix(&self.params.key_prefix).await {
            Ok(n) => {
                tracing::info!(removed = n, "cleared answer cache");
                true
            }
            Err(e) => {
                tracing::warn!("cache clear failed: {e}");
                false
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let total_entries = match &self.backend {
            Some(backend) => backend
                .count_prefix(&self.params.key_prefix)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!("cache stats failed: {e}");
                    0
                }),
            None => 0,
        };
        CacheStats {
            enabled: self.is_enabled(),
            total_entries,
            ttl_secs: self.params.ttl_secs,
        }
    }
}

/// Process-local backend with lazy expiry.
#[derive(Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<String, (String, DateTime<Utc>)>>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn expiry(ttl_secs: u64) -> Result<DateTime<Utc>> {
    let secs = i64::try_from(ttl_secs).map_err(|_| RagError::Cache(format!("ttl too large: {ttl_secs}")))?;
    Duration::try_seconds(secs)
        .and_then(|d| Utc::now().checked_add_signed(d))
        .ok_or_else(|| RagError::Cache(format!("ttl too large: {ttl_secs}")))
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now();
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > now)
            .map(|(v, _)| v.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let expires = expiry(ttl_secs)?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        entries.retain(|_, (_, exp)| *exp > now);
        entries.insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }

    async fn count_prefix(&self, prefix: &str) -> Result<usize> {
        let now = Utc::now();
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .iter()
            .filter(|(k, (_, exp))| k.starts_with(prefix) && *exp > now)
            .count())
    }
}
