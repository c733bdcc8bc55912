use crate::comparator::ComparisonResult;
use crate::error::{FinancialIngestError, Result};
use crate::inference::{infer_within, InferenceService};
use crate::prompts::build_summary_prompt;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SummaryConfig {
    pub timeout_secs: u64,
    /// Replies longer than this are rejected rather than cut.
    pub max_chars: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            max_chars: 8_000,
        }
    }
}

impl SummaryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryText {
    pub text: String,
    pub company_name: String,
    pub baseline_year: i32,
    pub current_year: i32,
}

impl SummaryText {
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for SummaryText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Narrates a [`ComparisonResult`]. The model only ever sees validated figures.
pub struct SummaryComposer<'a, S: InferenceService + ?Sized> {
    inference: &'a S,
    config: &'a SummaryConfig,
}

impl<'a, S: InferenceService + ?Sized> SummaryComposer<'a, S> {
    pub fn new(inference: &'a S, config: &'a SummaryConfig) -> Self {
        Self { inference, config }
    }

    pub async fn compose(&self, result: &ComparisonResult) -> Result<SummaryText> {
        let prompt = build_summary_prompt(result)?;
        let response = infer_within(self.inference, &prompt, self.config.timeout()).await?;
        let text = check_response(&response, self.config.max_chars)?;

        info!(
            "Composed {} character summary for {} {} -> {}",
            text.chars().count(),
            result.company_name,
            result.baseline_year(),
            result.current_year()
        );

        Ok(SummaryText {
            text,
            company_name: result.company_name.clone(),
            baseline_year: result.baseline_year(),
            current_year: result.current_year(),
        })
    }
}

/// Rejects blank or over-long replies; accepted text is returned as is.
fn check_response(response: &str, max_chars: usize) -> Result<String> {
    if response.trim().is_empty() {
        return Err(FinancialIngestError::Composition(
            "inference service returned an empty summary".to_string(),
        ));
    }
    let length = response.chars().count();
    if length > max_chars {
        return Err(FinancialIngestError::Composition(format!(
            "summary is {} characters, limit is {}",
            length, max_chars
        )));
    }
    Ok(response.to_string())
}
