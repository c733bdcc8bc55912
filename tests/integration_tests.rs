use async_trait::async_trait;
use financial_ingest::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum Reply {
    Text(String),
    Unavailable,
    Delayed(Duration, String),
}

/// Deterministic stand-in for the language model: replays scripted replies in order
/// and records every prompt it receives.
#[derive(Default)]
struct FakeInference {
    replies: Mutex<VecDeque<Reply>>,
    prompts: Mutex<Vec<String>>,
}

impl FakeInference {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceService for FakeInference {
    async fn infer(&self, prompt: &str, _timeout: Duration) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Unavailable) => Err(FinancialIngestError::CollaboratorUnavailable(
                "connection refused".to_string(),
            )),
            Some(Reply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            None => panic!("no scripted reply left for prompt"),
        }
    }
}

fn text(reply: &str) -> Reply {
    Reply::Text(reply.to_string())
}

const ACME_2022: &str = "ACME CORP\nINCOME STATEMENT\nFor the Year Ended December 31, 2022\n\
    Total Revenue $ 3,000,000\nCost of Goods Sold $ 1,000,000\nNet Income $ 500,000\n";

const ACME_2023: &str = "ACME CORP\nINCOME STATEMENT\nFor the Year Ended December 31, 2023\n\
    Total Revenue $ 4,000,000\nCost of Goods Sold $ 1,000,000\nNet Income $ 700,000\n";

const ACME_2022_JSON: &str = r#"```json
{"company_name": "Acme Corp", "year": 2022, "revenue": 3000000, "cogs": "1,000,000",
 "gross_profit": null, "net_income": {"value": 500000, "source": "Net Income"}, "confidence": 0.9}
```"#;

const ACME_2023_JSON: &str = r#"{"company_name": "Acme  Corp", "year": "2023", "revenue": "$4,000,000",
 "cogs": 1000000, "gross_profit": 3000000, "net_income": 700000}"#;

fn pipeline(
    inference: &Arc<FakeInference>,
    config: PipelineConfig,
) -> IngestionPipeline<Arc<FakeInference>, InMemoryRecordStore> {
    IngestionPipeline::new(inference.clone(), InMemoryRecordStore::new(), config)
}

fn record(company: &str, year: i32, revenue: f64) -> FinancialRecord {
    FinancialRecord {
        company_name: company.to_string(),
        year,
        schema_name: "general".to_string(),
        schema_version: "1".to_string(),
        values: [("revenue".to_string(), revenue), ("net_income".to_string(), 1.0)]
            .into_iter()
            .collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_acme_end_to_end() -> anyhow::Result<()> {
    let inference = FakeInference::new(vec![
        text(ACME_2022_JSON),
        text(ACME_2023_JSON),
        text("Revenue grew by a third while cost of goods sold held steady."),
    ]);
    let pipeline = pipeline(&inference, PipelineConfig::default());
    let schema = FieldSchema::general();

    let first = pipeline
        .ingest_document(ACME_2022.as_bytes(), "acme-2022.txt", &schema, None)
        .await?;
    assert_eq!(first.record.value("gross_profit"), Some(2_000_000.0));
    assert!(first.conflicts.is_empty());

    let second = pipeline
        .ingest_document(ACME_2023.as_bytes(), "acme-2023.txt", &schema, None)
        .await?;
    assert_eq!(second.record.company_name, "Acme Corp");
    assert_eq!(second.record.value("revenue"), Some(4_000_000.0));

    let report = pipeline.compare_latest("Acme Corp", &schema).await?;
    let comparison = &report.comparison;
    assert_eq!(comparison.baseline_year(), 2022);
    assert_eq!(comparison.current_year(), 2023);

    let revenue = comparison.field("revenue").unwrap();
    assert_eq!(revenue.absolute_delta, Some(1_000_000.0));
    assert!((revenue.percent_delta.unwrap() - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(revenue.classification, TrendClassification::Improved);

    let cogs = comparison.field("cogs").unwrap();
    assert_eq!(cogs.absolute_delta, Some(0.0));
    assert_eq!(cogs.classification, TrendClassification::Flat);

    let gross_profit = comparison.field("gross_profit").unwrap();
    assert_eq!(gross_profit.baseline, Some(2_000_000.0));
    assert_eq!(gross_profit.current, Some(3_000_000.0));
    assert!((gross_profit.percent_delta.unwrap() - 0.5).abs() < 1e-9);
    assert_eq!(gross_profit.classification, TrendClassification::Improved);

    assert_eq!(
        report.summary.as_str(),
        "Revenue grew by a third while cost of goods sold held steady."
    );

    let prompts = inference.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[0].contains("Total Revenue $3000000"));
    assert!(prompts[0].contains("- Year: 2022"));
    assert!(prompts[2].contains("\"field\": \"gross_profit\""));
    assert!(!prompts[2].contains("Total Revenue"));
    Ok(())
}

#[tokio::test]
async fn test_derivation_conflict_is_soft_and_recomputed() -> anyhow::Result<()> {
    let inference = FakeInference::new(vec![text(
        r#"{"company_name": "Acme Corp", "year": 2023, "revenue": 4000000, "cogs": 1000000,
            "gross_profit": 2500000, "net_income": 700000}"#,
    )]);
    let pipeline = pipeline(&inference, PipelineConfig::default());

    let validated = pipeline.ingest(ACME_2023, &FieldSchema::general()).await?;
    assert_eq!(validated.record.value("gross_profit"), Some(3_000_000.0));
    assert_eq!(validated.conflicts.len(), 1);
    assert!(matches!(
        &validated.conflicts[0],
        ValidationViolation::DerivationConflict { field, extracted, .. }
            if field == "gross_profit" && *extracted == 2_500_000.0
    ));
    Ok(())
}

#[tokio::test]
async fn test_missing_required_field_is_not_stored() {
    let inference = FakeInference::new(vec![text(
        r#"{"company_name": "Acme Corp", "year": 2023, "revenue": 4000000, "net_income": null}"#,
    )]);
    let pipeline = pipeline(&inference, PipelineConfig::default());

    let err = pipeline
        .ingest_document(ACME_2023.as_bytes(), "acme.txt", &FieldSchema::general(), None)
        .await
        .unwrap_err();

    let violations = err.violations().expect("validation error");
    assert_eq!(
        violations,
        &[ValidationViolation::MissingField {
            field: "net_income".to_string()
        }]
    );
    assert!(pipeline.store().is_empty().await);
}

#[tokio::test]
async fn test_reversed_years_are_a_period_mismatch() {
    let inference = FakeInference::new(vec![]);
    let pipeline = pipeline(&inference, PipelineConfig::default());
    pipeline.store().save(&record("Acme Corp", 2022, 3.0)).await.unwrap();
    pipeline.store().save(&record("Acme Corp", 2023, 4.0)).await.unwrap();

    let err = pipeline
        .compare_years("Acme Corp", 2023, 2022, &FieldSchema::general())
        .await
        .unwrap_err();
    assert!(matches!(err, FinancialIngestError::PeriodMismatch(_)));
    assert!(inference.prompts().is_empty());
}

#[tokio::test]
async fn test_unparseable_reply_is_not_retried() {
    let inference = FakeInference::new(vec![text("Sorry, I cannot help with that.")]);
    let pipeline = pipeline(&inference, PipelineConfig::default());

    let err = pipeline
        .ingest(ACME_2023, &FieldSchema::general())
        .await
        .unwrap_err();
    assert!(matches!(err, FinancialIngestError::ExtractionParse(_)));
    assert_eq!(inference.prompts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_model_is_retried() -> anyhow::Result<()> {
    let inference = FakeInference::new(vec![Reply::Unavailable, text(ACME_2023_JSON)]);
    let pipeline = pipeline(&inference, PipelineConfig::default());

    let validated = pipeline.ingest(ACME_2023, &FieldSchema::general()).await?;
    assert_eq!(validated.record.year, 2023);
    assert_eq!(inference.prompts().len(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_slow_model_times_out() {
    let inference = FakeInference::new(vec![Reply::Delayed(
        Duration::from_secs(600),
        ACME_2023_JSON.to_string(),
    )]);
    let config = PipelineConfig {
        extraction: ExtractionConfig {
            timeout_secs: 5,
            ..ExtractionConfig::default()
        },
        retry: RetryPolicy::no_retry(),
        ..PipelineConfig::default()
    };
    let pipeline = pipeline(&inference, config);

    let err = pipeline
        .ingest(ACME_2023, &FieldSchema::general())
        .await
        .unwrap_err();
    assert!(matches!(err, FinancialIngestError::CollaboratorUnavailable(_)));
}

#[tokio::test]
async fn test_same_company_year_twice_is_a_duplicate() {
    let inference = FakeInference::new(vec![text(ACME_2023_JSON), text(ACME_2023_JSON)]);
    let pipeline = pipeline(&inference, PipelineConfig::default());
    let schema = FieldSchema::general();

    pipeline
        .ingest_document(ACME_2023.as_bytes(), "a.txt", &schema, None)
        .await
        .unwrap();
    let err = pipeline
        .ingest_document(ACME_2023.as_bytes(), "b.txt", &schema, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FinancialIngestError::DuplicateRecord { year: 2023, .. }
    ));
}

#[tokio::test]
async fn test_empty_summary_is_a_composition_error() {
    let inference = FakeInference::new(vec![text("   ")]);
    let pipeline = pipeline(&inference, PipelineConfig::default());

    let err = pipeline
        .compare_and_summarize(
            &record("Acme Corp", 2022, 3.0),
            &record("Acme Corp", 2023, 4.0),
            &FieldSchema::general(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FinancialIngestError::Composition(_)));
}

#[tokio::test]
async fn test_compare_latest_needs_two_years() {
    let inference = FakeInference::new(vec![]);
    let pipeline = pipeline(&inference, PipelineConfig::default());
    pipeline.store().save(&record("Acme Corp", 2023, 4.0)).await.unwrap();

    let err = pipeline
        .compare_latest("Acme Corp", &FieldSchema::general())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FinancialIngestError::InsufficientHistory { found: 1, .. }
    ));
}

#[tokio::test]
async fn test_json_file_store_backs_pipeline() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("records.json");

    let inference = FakeInference::new(vec![text(ACME_2022_JSON), text(ACME_2023_JSON)]);
    let pipeline = IngestionPipeline::new(
        inference.clone(),
        JsonFileRecordStore::new(&path),
        PipelineConfig::default(),
    );
    let schema = FieldSchema::general();
    pipeline
        .ingest_document(ACME_2022.as_bytes(), "2022.txt", &schema, None)
        .await?;
    pipeline
        .ingest_document(ACME_2023.as_bytes(), "2023.txt", &schema, None)
        .await?;

    let reopened = JsonFileRecordStore::new(&path);
    assert_eq!(reopened.list_years("Acme Corp").await?, vec![2022, 2023]);
    assert_eq!(reopened.list_companies().await?, vec!["Acme Corp".to_string()]);
    let stored = reopened.load("Acme Corp", 2022).await?;
    assert_eq!(stored.value("gross_profit"), Some(2_000_000.0));
    assert_eq!(stored.schema_name, "general");

    assert_eq!(stored.confidence, Some(0.9));
    assert_eq!(stored.provenance["net_income"], "Net Income");
    assert_eq!(stored.provenance["gross_profit"], "computed as revenue - cogs");
    let source = stored.source.expect("ingested records carry their source");
    assert_eq!(source.source_id, "2022.txt");
    assert!(source.extracted_at <= chrono::Utc::now());

    let later = reopened.load("Acme Corp", 2023).await?;
    assert_eq!(later.confidence, None);
    assert_eq!(later.source.map(|s| s.source_id).as_deref(), Some("2023.txt"));
    Ok(())
}

#[tokio::test]
async fn test_saas_preset_checks_arr_against_mrr() -> anyhow::Result<()> {
    let inference = FakeInference::new(vec![text(
        r#"{"company_name": "Cloudly Inc", "year": 2023, "revenue": 1200000, "net_income": 50000,
            "monthly_recurring_revenue": 100000, "annual_recurring_revenue": 1260000, "churn_rate": "2.5%"}"#,
    )]);
    let pipeline = pipeline(&inference, PipelineConfig::default());

    let validated = pipeline
        .ingest("Cloudly Inc annual report 2023", &FieldSchema::for_industry("software"))
        .await?;
    assert_eq!(validated.record.schema_name, "saas");
    assert_eq!(
        validated.record.value("annual_recurring_revenue"),
        Some(1_200_000.0)
    );
    assert_eq!(validated.record.value("churn_rate"), Some(2.5));
    assert!(validated.conflicts.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_company_names_are_case_insensitive() -> anyhow::Result<()> {
    let reply = |company: &str, year: i32| {
        text(&format!(
            r#"{{"company_name": "{}", "year": {}, "revenue": 3000000, "cogs": 1000000, "net_income": 500000}}"#,
            company, year
        ))
    };
    let inference = FakeInference::new(vec![
        reply("ACME CORP", 2022),
        reply("Acme Corp", 2023),
        reply("acme corp", 2023),
        text("Flat year."),
    ]);
    let pipeline = pipeline(&inference, PipelineConfig::default());
    let schema = FieldSchema::general();

    pipeline
        .ingest_document(ACME_2022.as_bytes(), "upper.txt", &schema, None)
        .await?;
    pipeline
        .ingest_document(ACME_2023.as_bytes(), "title.txt", &schema, None)
        .await?;
    let err = pipeline
        .ingest_document(ACME_2023.as_bytes(), "lower.txt", &schema, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FinancialIngestError::DuplicateRecord { year: 2023, .. }
    ));
    assert_eq!(pipeline.store().len().await, 2);

    let report = pipeline.compare_latest("Acme Corp", &schema).await?;
    assert_eq!(report.comparison.baseline_year(), 2022);
    assert_eq!(report.comparison.current_year(), 2023);
    assert_eq!(
        report.comparison.field("revenue").unwrap().classification,
        TrendClassification::Flat
    );
    Ok(())
}

#[tokio::test]
async fn test_caller_hints_reach_the_prompt() -> anyhow::Result<()> {
    let inference = FakeInference::new(vec![text(
        r#"{"company_name": "Override Co", "year": 2021, "revenue": 10, "net_income": 1}"#,
    )]);
    let pipeline = pipeline(&inference, PipelineConfig::default());
    let hints = DocumentHints {
        company_name: Some("Override Co".to_string()),
        year: Some(2021),
        ..DocumentHints::default()
    };

    let validated = pipeline
        .ingest_document(
            ACME_2023.as_bytes(),
            "override.txt",
            &FieldSchema::general(),
            Some(&hints),
        )
        .await?;
    assert_eq!(validated.record.company_name, "Override Co");

    let prompt = &inference.prompts()[0];
    assert!(prompt.contains("- Company: Override Co"));
    assert!(prompt.contains("- Year: 2021"));
    assert!(!prompt.contains("- Year: 2023"));
    assert!(prompt.contains("- Report type: INCOME STATEMENT"));
    Ok(())
}
