//! Ollama `/api/generate` client (non-streaming).
//! One POST per call, 30s timeout, label prefixes stripped from the answer.
//! Retries are the caller's business.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::normalize::strip_label_prefix;
use super::{TranslateError, Translator};
use crate::config::PipelineConfig;

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    prompt_template: String,
    strip_prefixes: Vec<String>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

impl OllamaClient {
    pub fn new(config: &PipelineConfig) -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(config.call_timeout)
            .build()
            .map_err(|e| TranslateError::Service(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            prompt_template: config.prompt_template.clone(),
            strip_prefixes: config.strip_prefixes.clone(),
        })
    }

    fn build_prompt(&self, text: &str) -> String {
        self.prompt_template.replace("{text}", text)
    }
}

#[async_trait]
impl Translator for OllamaClient {
    async fn translate(&self, text: &str, model: &str) -> Result<String, TranslateError> {
        let body = GenerateRequest {
            model,
            prompt: self.build_prompt(text),
            stream: false,
        };

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranslateError::Timeout
                } else {
                    TranslateError::Service(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(TranslateError::Status {
                status: status.as_u16(),
                body: body_text.chars().take(200).collect(),
            });
        }

        let raw = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TranslateError::Timeout
            } else {
                TranslateError::Service(e.to_string())
            }
        })?;
        let parsed: GenerateResponse =
            serde_json::from_str(&raw).map_err(|e| TranslateError::Parse(e.to_string()))?;
        let generated = parsed
            .response
            .ok_or_else(|| TranslateError::Parse("missing `response` field".into()))?;

        let cleaned = strip_label_prefix(&generated, &self.strip_prefixes);
        debug!(model, chars = cleaned.chars().count(), "generate_done");
        Ok(cleaned)
    }
}
