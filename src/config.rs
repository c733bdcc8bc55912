use crate::comparator::ComparisonConfig;
use crate::composer::SummaryConfig;
use crate::error::{FinancialIngestError, Result};
use crate::extractor::ExtractionConfig;
use crate::pipeline::RetryPolicy;
use crate::validator::ValidationConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Every tunable of the pipeline. Missing sections fall back to their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub extraction: ExtractionConfig,
    pub validation: ValidationConfig,
    pub comparison: ComparisonConfig,
    pub summary: SummaryConfig,
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Applies one deadline to every model call, e.g. [`OllamaSettings::timeout`].
    /// Rounded up to whole seconds.
    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self.extraction.timeout_secs = secs;
        self.summary.timeout_secs = secs;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(FinancialIngestError::Config(msg));

        if self.extraction.timeout_secs == 0 || self.summary.timeout_secs == 0 {
            return fail("timeouts must be at least one second".to_string());
        }
        if self.extraction.max_document_chars == 0 {
            return fail("extraction.max_document_chars must be positive".to_string());
        }
        if self.summary.max_chars == 0 {
            return fail("summary.max_chars must be positive".to_string());
        }
        let v = &self.validation;
        if [v.derivation_tolerance, v.min_absolute_tolerance]
            .iter()
            .any(|t| t.is_nan() || *t < 0.0)
        {
            return fail("validation tolerances must be non-negative".to_string());
        }
        if let Some(max_year) = v.max_year {
            if max_year < v.min_year {
                return fail(format!(
                    "validation.max_year {} is before min_year {}",
                    max_year, v.min_year
                ));
            }
        }
        let threshold = self.comparison.flat_threshold;
        if !(0.0..1.0).contains(&threshold) {
            return fail(format!(
                "comparison.flat_threshold {} must be in [0, 1)",
                threshold
            ));
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return fail("retry.initial_backoff_ms exceeds retry.max_backoff_ms".to_string());
        }
        Ok(())
    }
}

/// Connection settings for a local Ollama server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            temperature: 0.3,
            timeout_secs: 120,
        }
    }
}

impl OllamaSettings {
    /// Reads `OLLAMA_BASE_URL`, `LLM_MODEL`, `LLM_TEMPERATURE` and `LLM_TIMEOUT`,
    /// keeping the default for any variable that is unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();
        if let Some(url) = lookup("OLLAMA_BASE_URL") {
            settings.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("LLM_MODEL") {
            settings.model = model;
        }
        if let Some(temperature) = lookup("LLM_TEMPERATURE") {
            settings.temperature = temperature.trim().parse().map_err(|_| {
                FinancialIngestError::Config(format!("LLM_TEMPERATURE '{}' is not a number", temperature))
            })?;
        }
        if let Some(timeout) = lookup("LLM_TIMEOUT") {
            settings.timeout_secs = timeout.trim().parse().map_err(|_| {
                FinancialIngestError::Config(format!("LLM_TIMEOUT '{}' is not a whole number of seconds", timeout))
            })?;
        }
        Ok(settings)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
