//! Pipeline configuration: timing constants, backend location, prompt text.
//! Defaults are compiled in; a handful of environment variables override them.

use std::time::Duration;

use tracing::warn;

use crate::translate::retry::RetryPolicy;

/// Default Ollama endpoint.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:11434";
/// Maximum number of cached translations.
pub const MAX_CACHE_SIZE: usize = 512;
/// Retries applied per logical operation (startup probe cycle, single translate call).
pub const MAX_RETRIES: u32 = 3;

/// Instruction sent ahead of the clipboard text. The target display language is Chinese.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "将以下内容翻译为中文，只返回译文不要额外说明:\n{text}";

/// Label prefixes some models put in front of the answer, checked in order.
pub const DEFAULT_STRIP_PREFIXES: &[&str] = &["译文:", "翻译结果:", "Here is the translation:"];

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub backend_url: String,
    /// Executable used for `serve` and `list`.
    pub backend_program: String,
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub throttle: Duration,
    pub cache_capacity: usize,
    pub probe_timeout: Duration,
    pub call_timeout: Duration,
    /// Wait between launching the backend and probing it again.
    pub settle_delay: Duration,
    pub startup_retry: RetryPolicy,
    pub call_retry: RetryPolicy,
    /// Prompt with a `{text}` placeholder.
    pub prompt_template: String,
    pub strip_prefixes: Vec<String>,
    /// Selected instead of the first listed model when present.
    pub preferred_model: Option<String>,
    /// Start monitoring as soon as the pipeline is up.
    pub autostart: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            backend_program: "ollama".to_string(),
            poll_interval: Duration::from_millis(100),
            debounce: Duration::from_millis(200),
            throttle: Duration::from_millis(500),
            cache_capacity: MAX_CACHE_SIZE,
            probe_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_secs(3),
            startup_retry: RetryPolicy::new(MAX_RETRIES),
            call_retry: RetryPolicy::new(MAX_RETRIES),
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            strip_prefixes: DEFAULT_STRIP_PREFIXES.iter().map(|p| p.to_string()).collect(),
            preferred_model: None,
            autostart: false,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `CLIPGLOT_*` / `OLLAMA_HOST` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("CLIPGLOT_BACKEND_URL").or_else(|| lookup("OLLAMA_HOST")) {
            config.backend_url = normalize_backend_url(&url);
        }
        if let Some(bin) = lookup("CLIPGLOT_OLLAMA_BIN").filter(|s| !s.trim().is_empty()) {
            config.backend_program = bin;
        }
        if let Some(model) = lookup("CLIPGLOT_MODEL").filter(|s| !s.trim().is_empty()) {
            config.preferred_model = Some(model.trim().to_string());
        }
        if let Some(raw) = lookup("CLIPGLOT_AUTOSTART") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.autostart = true,
                "0" | "false" | "no" | "off" => config.autostart = false,
                other => warn!(value = other, "CLIPGLOT_AUTOSTART not a boolean, keeping default"),
            }
        }

        config
    }
}

/// `OLLAMA_HOST` is often given as `host:port` without a scheme.
fn normalize_backend_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_pipeline_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.debounce, Duration::from_millis(200));
        assert_eq!(config.throttle, Duration::from_millis(500));
        assert_eq!(config.probe_timeout, Duration::from_secs(2));
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert_eq!(config.cache_capacity, MAX_CACHE_SIZE);
        assert_eq!(config.call_retry.max_retries(), 3);
        assert!(!config.autostart);
    }

    #[test]
    fn ollama_host_without_scheme_gets_http() {
        let config = PipelineConfig::from_lookup(lookup_from(&[("OLLAMA_HOST", "127.0.0.1:9999")]));
        assert_eq!(config.backend_url, "http://127.0.0.1:9999");
    }

    #[test]
    fn explicit_backend_url_wins_over_ollama_host() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("OLLAMA_HOST", "127.0.0.1:9999"),
            ("CLIPGLOT_BACKEND_URL", "http://gpu-box:11434/"),
        ]));
        assert_eq!(config.backend_url, "http://gpu-box:11434");
    }

    #[test]
    fn invalid_autostart_keeps_default() {
        let config = PipelineConfig::from_lookup(lookup_from(&[("CLIPGLOT_AUTOSTART", "maybe")]));
        assert!(!config.autostart);
        let config = PipelineConfig::from_lookup(lookup_from(&[("CLIPGLOT_AUTOSTART", "on")]));
        assert!(config.autostart);
    }
}
