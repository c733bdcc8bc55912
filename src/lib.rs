//! # Financial Ingest
//!
//! Turns the text of financial statements into validated, comparable records with the
//! help of a language model, and narrates year-over-year changes.
//!
//! ## Core Concepts
//!
//! - **Candidate Record**: untrusted field values exactly as the model returned them
//! - **Field Schema**: expected fields with types, ranges, polarity and derivation formulas
//! - **Financial Record**: a validated record; derived totals are always recomputed
//! - **Trend Comparison**: per-field deltas between two years, classified with polarity
//! - **Summary**: a narrative composed only from validated, compared figures
//!
//! ## Example
//!
//! ```rust,ignore
//! use financial_ingest::*;
//!
//! let schema = FieldSchema::general();
//! let config = PipelineConfig::default();
//!
//! let y2022 = ingest(&service, &text_2022, &schema, &config).await?;
//! let y2023 = ingest(&service, &text_2023, &schema, &config).await?;
//!
//! let report = compare_and_summarize(&service, &y2022.record, &y2023.record, &schema, &config).await?;
//! println!("{}", report.summary);
//! ```

pub mod comparator;
pub mod composer;
pub mod config;
pub mod document;
pub mod error;
pub mod extractor;
pub mod inference;
pub mod pipeline;
pub mod prompts;
pub mod record;
pub mod schema;
pub mod store;
pub mod utils;
pub mod validator;

#[cfg(feature = "ollama")]
pub mod llm;

pub use comparator::{
    compare, ComparisonConfig, ComparisonResult, FieldComparison, TrendClassification,
    TrendComparator,
};
pub use composer::{SummaryComposer, SummaryConfig, SummaryText};
pub use config::{OllamaSettings, PipelineConfig};
pub use document::{clean_text, scan_hints, DocumentHints, DocumentTextExtractor, PlainTextExtractor};
pub use error::{FinancialIngestError, Result};
pub use extractor::{parse_extraction_response, ExtractionConfig, PromptedExtractor};
pub use inference::{infer_within, InferenceService};
pub use pipeline::{IngestionPipeline, RetryPolicy, TrendReport};
pub use record::*;
pub use schema::*;
pub use store::{InMemoryRecordStore, JsonFileRecordStore, RecordStore};
pub use validator::{validate, SchemaValidator, ValidatedRecord, ValidationConfig, ValidationViolation};

/// Extracts and validates one document's text. Retries the model call per
/// `config.retry`; nothing is persisted.
pub async fn ingest<S: InferenceService + ?Sized>(
    inference: &S,
    document_text: &str,
    schema: &FieldSchema,
    config: &PipelineConfig,
) -> Result<ValidatedRecord> {
    let known = DocumentHints::default();
    pipeline::extract_and_validate(inference, document_text, &known, schema, config).await
}

/// Compares two validated records of one company and narrates the result.
pub async fn compare_and_summarize<S: InferenceService + ?Sized>(
    inference: &S,
    baseline: &FinancialRecord,
    current: &FinancialRecord,
    schema: &FieldSchema,
    config: &PipelineConfig,
) -> Result<TrendReport> {
    pipeline::compare_then_summarize(inference, baseline, current, schema, config).await
}
