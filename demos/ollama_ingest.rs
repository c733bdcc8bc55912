use dotenv::dotenv;
use financial_ingest::llm::OllamaClient;
use financial_ingest::{
    DocumentHints, FieldSchema, InMemoryRecordStore, IngestionPipeline, PipelineConfig,
    TrendClassification,
};
use std::error::Error;

const ACME_2022: &str = "ACME CORP\n\
INCOME STATEMENT\n\
For the Year Ended December 31, 2022\n\
--- Page 1 ---\n\
Total Revenue                 $ 3,000,000\n\
Cost of Goods Sold            $ 1,000,000\n\
Gross Profit                  $ 2,000,000\n\
Operating Expenses            $   900,000\n\
Net Income                    $   500,000\n\
BALANCE SHEET\n\
Total Assets                  $ 6,000,000\n\
Total Liabilities             $ 2,500,000\n";

const ACME_2023: &str = "ACME CORP\n\
INCOME STATEMENT\n\
For the Year Ended December 31, 2023\n\
--- Page 1 ---\n\
Total Revenue                 $ 4,000,000\n\
Cost of Goods Sold            $ 1,000,000\n\
Gross Profit                  $ 3,000,000\n\
Operating Expenses            $ 1,100,000\n\
Net Income                    $   700,000\n\
BALANCE SHEET\n\
Total Assets                  $ 7,200,000\n\
Total Liabilities             $ 2,600,000\n";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let client = OllamaClient::from_env()?;
    println!(
        "🚀 Using Ollama model '{}' at {}\n",
        client.settings().model,
        client.settings().base_url
    );

    let config = match std::env::var("PIPELINE_CONFIG") {
        Ok(path) => PipelineConfig::from_json_file(path)?,
        Err(_) => PipelineConfig::default(),
    }
    .with_inference_timeout(client.settings().timeout());
    let pipeline = IngestionPipeline::new(client, InMemoryRecordStore::new(), config);
    let schema = FieldSchema::general();
    let hints = DocumentHints {
        company_name: std::env::var("COMPANY_NAME").ok(),
        ..DocumentHints::default()
    };
    let mut company = String::new();

    for (name, text) in [("acme-2022.txt", ACME_2022), ("acme-2023.txt", ACME_2023)] {
        println!("📄 Ingesting {}...", name);
        match pipeline
            .ingest_document(text.as_bytes(), name, &schema, Some(&hints))
            .await
        {
            Ok(validated) => {
                let summary = validated.record.summary(&schema);
                let confidence = validated
                    .record
                    .confidence
                    .map(|c| format!("{:.0}%", c * 100.0))
                    .unwrap_or_else(|| "n/a".to_string());
                println!(
                    "   ✅ {} ({} fields, {:.0}% complete, confidence {})",
                    validated.record.key(),
                    validated.record.values.len(),
                    summary.completeness_score * 100.0,
                    confidence
                );
                company = validated.record.company_name.clone();
                for conflict in &validated.conflicts {
                    println!("   ⚠️  {}", conflict);
                }
            }
            Err(e) => {
                println!("   ❌ {}", e);
                if let Some(violations) = e.violations() {
                    for v in violations {
                        println!("      - {}", v);
                    }
                }
                return Ok(());
            }
        }
    }

    let report = pipeline.compare_latest(&company, &schema).await?;
    println!(
        "\n📊 {} {} -> {}",
        report.comparison.company_name,
        report.comparison.baseline_year(),
        report.comparison.current_year()
    );
    for field in report.comparison.fields.values() {
        let percent = field
            .percent_delta
            .map(|p| format!("{:+.1}%", p * 100.0))
            .unwrap_or_else(|| "n/a".to_string());
        let marker = match field.classification {
            TrendClassification::Improved => "▲",
            TrendClassification::Declined => "▼",
            _ => "•",
        };
        println!(
            "   {} {:<20} {:>8} ({})",
            marker, field.field, percent, field.classification
        );
    }

    println!("\n📝 Summary:\n{}", report.summary);
    Ok(())
}
