use crate::document::DocumentHints;
use crate::error::{FinancialIngestError, Result};
use crate::inference::{infer_within, InferenceService};
use crate::prompts::build_extraction_prompt;
use crate::record::{CandidateRecord, RawValue, DEFAULT_PROVENANCE};
use crate::schema::{FieldSchema, COMPANY_FIELD, YEAR_FIELD};
use crate::utils::truncate_chars;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

const CONFIDENCE_KEYS: [&str; 2] = ["confidence", "extraction_confidence"];
const ABSENT_MARKERS: [&str; 5] = ["", "null", "none", "n/a", "na"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    pub timeout_secs: u64,
    /// Longer documents are truncated before prompting.
    pub max_document_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            max_document_chars: 24_000,
        }
    }
}

impl ExtractionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Turns document text into an unvalidated [`CandidateRecord`] with one model call.
pub struct PromptedExtractor<'a, S: InferenceService + ?Sized> {
    inference: &'a S,
    schema: &'a FieldSchema,
    config: &'a ExtractionConfig,
}

impl<'a, S: InferenceService + ?Sized> PromptedExtractor<'a, S> {
    pub fn new(inference: &'a S, schema: &'a FieldSchema, config: &'a ExtractionConfig) -> Self {
        Self {
            inference,
            schema,
            config,
        }
    }

    pub async fn extract(&self, document_text: &str) -> Result<CandidateRecord> {
        self.extract_with_hints(document_text, &DocumentHints::default())
            .await
    }

    pub async fn extract_with_hints(
        &self,
        document_text: &str,
        hints: &DocumentHints,
    ) -> Result<CandidateRecord> {
        let text = truncate_chars(document_text, self.config.max_document_chars);
        if text.len() < document_text.len() {
            warn!(
                "Document truncated to {} characters for extraction",
                self.config.max_document_chars
            );
        }

        let prompt = build_extraction_prompt(self.schema, text, hints);
        let response = infer_within(self.inference, &prompt, self.config.timeout()).await?;
        let candidate = parse_extraction_response(&response, self.schema)?;

        info!(
            "Extracted {} candidate fields using the '{}' schema",
            candidate.len(),
            self.schema.name
        );
        Ok(candidate)
    }
}

/// Slices the outermost JSON object out of a model reply that may be wrapped in
/// markdown fences or commentary.
fn clean_json_output(raw: &str) -> &str {
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => raw.trim(),
    }
}

/// Parses a model reply into a candidate record. Nothing here checks types beyond
/// what JSON itself tells us; numeric strings are left for the validator.
pub fn parse_extraction_response(raw: &str, schema: &FieldSchema) -> Result<CandidateRecord> {
    let json = clean_json_output(raw);
    let value: Value = serde_json::from_str(json).map_err(|e| {
        FinancialIngestError::ExtractionParse(format!("response is not valid JSON: {}", e))
    })?;
    let Value::Object(object) = value else {
        return Err(FinancialIngestError::ExtractionParse(
            "expected a JSON object at the top level".to_string(),
        ));
    };

    let mut candidate = CandidateRecord::new();
    for (key, value) in object {
        if CONFIDENCE_KEYS.contains(&key.as_str()) {
            candidate.confidence = parse_confidence(&value);
            continue;
        }
        if key != COMPANY_FIELD && key != YEAR_FIELD && schema.field(&key).is_none() {
            debug!("Ignoring field '{}' not present in the '{}' schema", key, schema.name);
            continue;
        }
        if let Some((raw_value, note)) = parse_field(&key, value)? {
            candidate.insert(key, raw_value, note);
        }
    }
    Ok(candidate)
}

fn parse_confidence(value: &Value) -> Option<f64> {
    match value.as_f64() {
        Some(c) if (0.0..=1.0).contains(&c) => Some(c),
        _ => {
            warn!("Discarding extraction confidence {}", value);
            None
        }
    }
}

fn parse_field(key: &str, value: Value) -> Result<Option<(RawValue, String)>> {
    match value {
        Value::Object(mut object) => {
            let Some(inner) = object.remove("value") else {
                return Err(type_error(key, "object without a \"value\" key"));
            };
            let note = provenance(&object);
            Ok(parse_scalar(key, inner)?.map(|raw| (raw, note)))
        }
        other => Ok(parse_scalar(key, other)?.map(|raw| (raw, DEFAULT_PROVENANCE.to_string()))),
    }
}

fn provenance(object: &Map<String, Value>) -> String {
    ["source", "note"]
        .iter()
        .filter_map(|k| object.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(DEFAULT_PROVENANCE)
        .to_string()
}

fn parse_scalar(key: &str, value: Value) -> Result<Option<RawValue>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(|n| Some(RawValue::Number(n)))
            .ok_or_else(|| type_error(key, "number out of range")),
        Value::String(s) => {
            let trimmed = s.trim();
            if ABSENT_MARKERS.contains(&trimmed.to_lowercase().as_str()) {
                Ok(None)
            } else {
                Ok(Some(RawValue::Text(trimmed.to_string())))
            }
        }
        Value::Bool(_) => Err(type_error(key, "boolean")),
        Value::Array(_) => Err(type_error(key, "array")),
        Value::Object(_) => Err(type_error(key, "nested object")),
    }
}

fn type_error(key: &str, found: &str) -> FinancialIngestError {
    FinancialIngestError::ExtractionParse(format!(
        "field '{}' holds a {} instead of a number, string or null",
        key, found
    ))
}
