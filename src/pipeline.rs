use crate::comparator::{ComparisonResult, TrendComparator};
use crate::composer::{SummaryComposer, SummaryText};
use crate::config::PipelineConfig;
use crate::document::{
    clean_text, scan_hints, DocumentHints, DocumentTextExtractor, PlainTextExtractor,
};
use crate::error::{FinancialIngestError, Result};
use crate::extractor::PromptedExtractor;
use crate::inference::InferenceService;
use crate::record::{FinancialRecord, RecordSource};
use crate::schema::FieldSchema;
use crate::store::RecordStore;
use crate::validator::{SchemaValidator, ValidatedRecord};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff for inference calls. Only
/// [`FinancialIngestError::is_retryable`] errors are retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {:?}",
                        operation, attempt, max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Extraction followed by validation, retrying only the model call. Hints set by
/// the caller take precedence over those scanned from the text.
pub(crate) async fn extract_and_validate<S: InferenceService + ?Sized>(
    inference: &S,
    document_text: &str,
    known: &DocumentHints,
    schema: &FieldSchema,
    config: &PipelineConfig,
) -> Result<ValidatedRecord> {
    let validator = SchemaValidator::new(schema, &config.validation)?;
    let extractor = PromptedExtractor::new(inference, schema, &config.extraction);
    let hints = known.merged_over(scan_hints(document_text));

    info!(
        "Extracting '{}' fields from {} characters of text",
        schema.name,
        document_text.chars().count()
    );
    let candidate = config
        .retry
        .run("Extraction", || extractor.extract_with_hints(document_text, &hints))
        .await?;

    let validated = validator.validate(&candidate)?;
    info!(
        "Validated {} with {} values ({} derivation conflicts)",
        validated.record.key(),
        validated.record.values.len(),
        validated.conflicts.len()
    );
    Ok(validated)
}

pub(crate) async fn compare_then_summarize<S: InferenceService + ?Sized>(
    inference: &S,
    baseline: &FinancialRecord,
    current: &FinancialRecord,
    schema: &FieldSchema,
    config: &PipelineConfig,
) -> Result<TrendReport> {
    let comparison = TrendComparator::new(schema, &config.comparison).compare(baseline, current)?;
    let composer = SummaryComposer::new(inference, &config.summary);
    let summary = config
        .retry
        .run("Summary", || composer.compose(&comparison))
        .await?;
    Ok(TrendReport {
        comparison,
        summary,
    })
}

/// A comparison together with its narrative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendReport {
    pub comparison: ComparisonResult,
    pub summary: SummaryText,
}

/// Wires the collaborators together: text extraction, inference and storage.
pub struct IngestionPipeline<S, R, D = PlainTextExtractor> {
    inference: S,
    store: R,
    documents: D,
    config: PipelineConfig,
}

impl<S, R> IngestionPipeline<S, R, PlainTextExtractor>
where
    S: InferenceService,
    R: RecordStore,
{
    pub fn new(inference: S, store: R, config: PipelineConfig) -> Self {
        Self {
            inference,
            store,
            documents: PlainTextExtractor,
            config,
        }
    }
}

impl<S, R, D> IngestionPipeline<S, R, D>
where
    S: InferenceService,
    R: RecordStore,
    D: DocumentTextExtractor,
{
    pub fn with_document_extractor<D2: DocumentTextExtractor>(
        self,
        documents: D2,
    ) -> IngestionPipeline<S, R, D2> {
        IngestionPipeline {
            inference: self.inference,
            store: self.store,
            documents,
            config: self.config,
        }
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Text to validated record. Nothing is persisted.
    pub async fn ingest(&self, document_text: &str, schema: &FieldSchema) -> Result<ValidatedRecord> {
        let known = DocumentHints::default();
        extract_and_validate(&self.inference, document_text, &known, schema, &self.config).await
    }

    /// Uploaded file to stored record. `hints` carries a company name or year the
    /// caller already knows; they are passed to the model ahead of scanned guesses.
    pub async fn ingest_document(
        &self,
        bytes: &[u8],
        source_id: &str,
        schema: &FieldSchema,
        hints: Option<&DocumentHints>,
    ) -> Result<ValidatedRecord> {
        let document = self.documents.extract_text(bytes, source_id).await?;
        let text = clean_text(&document.text);
        let known = hints.cloned().unwrap_or_default();
        let mut validated =
            extract_and_validate(&self.inference, &text, &known, schema, &self.config).await?;
        validated.record.source = Some(RecordSource::from(&document));
        self.store.save(&validated.record).await?;
        info!(
            "Stored {} from {}",
            validated.record.key(),
            document.source_id
        );
        Ok(validated)
    }

    pub async fn compare_and_summarize(
        &self,
        baseline: &FinancialRecord,
        current: &FinancialRecord,
        schema: &FieldSchema,
    ) -> Result<TrendReport> {
        compare_then_summarize(&self.inference, baseline, current, schema, &self.config).await
    }

    pub async fn compare_years(
        &self,
        company_name: &str,
        baseline_year: i32,
        current_year: i32,
        schema: &FieldSchema,
    ) -> Result<TrendReport> {
        let (baseline, current) = futures::try_join!(
            self.store.load(company_name, baseline_year),
            self.store.load(company_name, current_year)
        )?;
        self.compare_and_summarize(&baseline, &current, schema).await
    }

    /// Compares the two most recent stored years of `company_name`.
    pub async fn compare_latest(&self, company_name: &str, schema: &FieldSchema) -> Result<TrendReport> {
        let years = self.store.list_years(company_name).await?;
        let [.., baseline_year, current_year] = years.as_slice() else {
            return Err(FinancialIngestError::InsufficientHistory {
                company_name: company_name.to_string(),
                found: years.len(),
            });
        };
        self.compare_years(company_name, *baseline_year, *current_year, schema)
            .await
    }
}
