//! Answer generation over a retrieved context.
//!
//! [`OllamaGenerator`] calls `POST /api/chat` on an Ollama instance, either
//! in one request or streaming newline-delimited JSON chunks. The system
//! prompt pins the answer to the provided context and the request language.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use uniqa_core::error::{RagError, Result};
use uniqa_core::models::Language;

use crate::config::GenerationConfig;

/// Role labels small chat models sometimes prepend to their answers.
const ROLE_LABELS: &[&str] = &["Assistant:", "Bot:", "Yordamchi:", "Ассистент:"];

/// Produces an answer for `query` from `context`.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, query: &str, context: &str, language: Language) -> Result<String>;

    /// Stream answer pieces into `tx`, returning the full text.
    ///
    /// The default sends the batch answer as a single piece.
    async fn generate_stream(
        &self,
        query: &str,
        context: &str,
        language: Language,
        tx: mpsc::Sender<String>,
    ) -> Result<String> {
        let answer = self.generate(query, context, language).await?;
        // A dropped receiver only means nobody is listening.
        let _ = tx.send(answer.clone()).await;
        Ok(answer)
    }
}

/// Localized message used when generation is skipped or no source supports an answer.
pub fn not_found_message(language: Language) -> &'static str {
    match language {
        Language::Uz => "Bu savol bo‘yicha rasmiy hujjatlarda aniq ma’lumot topilmadi.",
        Language::Ru => "По данному вопросу в официальных документах точной информации не найдено.",
        Language::En => "No specific information was found in the official documents regarding this question.",
    }
}

fn language_name(language: Language) -> &'static str {
    match language {
        Language::Uz => "Uzbek (Latin script)",
        Language::Ru => "Russian",
        Language::En => "English",
    }
}

/// System prompt restricting the model to `context`.
pub fn system_prompt(context: &str, language: Language) -> String {
    let context = if context.trim().is_empty() {
        "(no information found)"
    } else {
        context
    };
    format!(
        "You are the official information assistant of the university.\n\
         Answer ONLY from the context below. Never invent facts, numbers, names or dates.\n\
         If the context does not contain the answer, reply exactly: \"{fallback}\"\n\
         Answer in {lang}. Be concise; use bullet points for lists and bold for dates and amounts.\n\
         End the answer with the source tag of the context block you used, e.g. [MANBA: FAQ #12].\n\
         \n\
         ### CONTEXT\n\
         {context}",
        fallback = not_found_message(language),
        lang = language_name(language),
    )
}

/// Remove leading role labels.
pub fn strip_role_labels(text: &str) -> String {
    let mut out = text.trim();
    loop {
        let before = out;
        for label in ROLE_LABELS {
            if let Some(rest) = out.strip_prefix(label) {
                out = rest.trim_start();
            }
        }
        if out == before {
            break;
        }
    }
    out.to_string()
}

pub struct OllamaGenerator {
    model: String,
    url: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            url: url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            client,
        })
    }

    fn payload(&self, query: &str, context: &str, language: Language, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt(context, language)},
                {"role": "user", "content": query},
            ],
            "stream": stream,
            "options": {"temperature": self.temperature, "num_ctx": 4096},
        })
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(body)
            .send()
            .await
            .map_err(|e| RagError::Generation(format!("Ollama connection error (is Ollama running at {}?): {e}", self.url)))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(RagError::Generation(format!("Ollama API error {status}: {body_text}")));
        }
        Ok(response)
    }
}

fn message_content(json: &serde_json::Value) -> &str {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, query: &str, context: &str, language: Language) -> Result<String> {
        let body = self.payload(query, context, language, false);
        let json: serde_json::Value = self
            .send(&body)
            .await?
            .json()
            .await
            .map_err(|e| RagError::Generation(format!("Ollama returned invalid JSON: {e}")))?;
        let answer = strip_role_labels(message_content(&json));
        if answer.is_empty() {
            return Err(RagError::Generation("model returned an empty answer".into()));
        }
        Ok(answer)
    }

    async fn generate_stream(
        &self,
        query: &str,
        context: &str,
        language: Language,
        tx: mpsc::Sender<String>,
    ) -> Result<String> {
        let body = self.payload(query, context, language, true);
        let mut response = self.send(&body).await?;

        let mut pending = String::new();
        let mut full = String::new();
        let mut started = false;

        while let Some(bytes) = response
            .chunk()
            .await
            .map_err(|e| RagError::Generation(format!("stream interrupted: {e}")))?
        {
            pending.push_str(&String::from_utf8_lossy(&bytes));
            while let Some(pos) = pending.find('\n') {
                let line: String = pending.drain(..=pos).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let json: serde_json::Value = serde_json::from_str(line)
                    .map_err(|e| RagError::Generation(format!("invalid stream chunk: {e}")))?;
                let mut piece = message_content(&json).to_string();
                if !started {
                    piece = strip_role_labels(&piece);
                    started = !piece.is_empty();
                }
                if !piece.is_empty() {
                    full.push_str(&piece);
                    let _ = tx.send(piece).await;
                }
                if json.get("done").and_then(|d| d.as_bool()).unwrap_or(false) {
                    return Ok(full.trim().to_string());
                }
            }
        }
        Ok(full.trim().to_string())
    }
}

/// Generator that always fails, for `generation.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    async fn generate(&self, _query: &str, _context: &str, _language: Language) -> Result<String> {
        Err(RagError::Generation("generation is disabled".into()))
    }
}

pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<std::sync::Arc<dyn Generator>> {
    match config.provider.as_str() {
        "ollama" => Ok(std::sync::Arc::new(OllamaGenerator::new(config)?)),
        "disabled" => Ok(std::sync::Arc::new(DisabledGenerator)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_role_labels() {
        assert_eq!(strip_role_labels("Assistant: Bot: Salom"), "Salom");
        assert_eq!(strip_role_labels("  Javob tayyor "), "Javob tayyor");
    }

    #[test]
    fn test_prompt_mentions_language_and_fallback() {
        let p = system_prompt("MANBA: FAQ #1\nMATN: x", Language::Ru);
        assert!(p.contains("Russian"));
        assert!(p.contains(not_found_message(Language::Ru)));
        assert!(p.ends_with("MATN: x"));
        assert!(system_prompt("  ", Language::En).contains("(no information found)"));
    }

    #[tokio::test]
    async fn test_disabled_generator_errors() {
        let err = DisabledGenerator.generate("q", "c", Language::Uz).await.unwrap_err();
        assert!(matches!(err, RagError::Generation(_)));
    }

    #[tokio::test]
    async fn test_default_stream_sends_whole_answer() {
        struct Echo;
        #[async_trait]
        impl Generator for Echo {
            async fn generate(&self, query: &str, _c: &str, _l: Language) -> Result<String> {
                Ok(format!("echo {query}"))
            }
        }
        let (tx, mut rx) = mpsc::channel(4);
        let full = Echo.generate_stream("hi", "", Language::En, tx).await.unwrap();
        assert_eq!(full, "echo hi");
        assert_eq!(rx.recv().await.as_deref(), Some("echo hi"));
    }
}
